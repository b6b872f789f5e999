//! Operation handlers: raw field set in, envelope out.

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use super::envelope::Envelope;
use crate::errors::{EgressError, Result};
use crate::services::{MutationCoordinator, MutationOutcome};
use crate::validation::{
    parse_change_password, parse_connection_id, parse_create, parse_edit, parse_list,
};

/// Operations exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    ChangePassword,
    Delete,
    Get,
    List,
    Edit,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::ChangePassword => "change_password",
            Operation::Delete => "delete",
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Edit => "edit",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Get | Operation::List)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = EgressError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Operation::Create),
            "change_password" => Ok(Operation::ChangePassword),
            "delete" => Ok(Operation::Delete),
            "get" => Ok(Operation::Get),
            "list" => Ok(Operation::List),
            "edit" => Ok(Operation::Edit),
            other => Err(EgressError::validation(format!("unknown operation '{}'", other))),
        }
    }
}

/// Envelope plus, for committed mutations, what the coordinator produced.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub envelope: Envelope,
    pub outcome: Option<MutationOutcome>,
}

/// Transport-agnostic facade over the mutation coordinator
#[derive(Debug, Clone)]
pub struct ConnectionApi {
    coordinator: MutationCoordinator,
}

impl ConnectionApi {
    pub fn new(coordinator: MutationCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub async fn create(&self, raw: &Value) -> ApiResponse {
        self.handle(Operation::Create, raw).await
    }

    pub async fn change_password(&self, raw: &Value) -> ApiResponse {
        self.handle(Operation::ChangePassword, raw).await
    }

    pub async fn delete(&self, raw: &Value) -> ApiResponse {
        self.handle(Operation::Delete, raw).await
    }

    pub async fn get(&self, raw: &Value) -> ApiResponse {
        self.handle(Operation::Get, raw).await
    }

    pub async fn list(&self, raw: &Value) -> ApiResponse {
        self.handle(Operation::List, raw).await
    }

    pub async fn edit(&self, raw: &Value) -> ApiResponse {
        self.handle(Operation::Edit, raw).await
    }

    /// Run one operation and wrap the result in an envelope
    pub async fn handle(&self, operation: Operation, raw: &Value) -> ApiResponse {
        let cid = Uuid::new_v4();
        let span = info_span!("api_request", operation = %operation, cid = %cid);

        async {
            match self.dispatch(operation, raw).await {
                Ok((payload, outcome)) => {
                    info!("Request succeeded");
                    ApiResponse { envelope: Envelope::ok(cid, payload), outcome }
                }
                Err(e) => {
                    info!(kind = %e.kind(), error = %e, "Request failed");
                    ApiResponse { envelope: Envelope::error(cid, &e), outcome: None }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        operation: Operation,
        raw: &Value,
    ) -> Result<(Value, Option<MutationOutcome>)> {
        match operation {
            Operation::Create => {
                let request = self.parsed(operation, parse_create(raw))?;
                let outcome = self.coordinator.create(request).await?;
                Ok((json!({"id": outcome.id, "name": outcome.name}), Some(outcome)))
            }
            Operation::ChangePassword => {
                let request = self.parsed(operation, parse_change_password(raw))?;
                let outcome = self.coordinator.change_credential(request).await?;
                Ok((json!({}), Some(outcome)))
            }
            Operation::Delete => {
                let request = self.parsed(operation, parse_connection_id(raw))?;
                let outcome = self.coordinator.delete(request).await?;
                Ok((json!({}), Some(outcome)))
            }
            Operation::Get => {
                let request = self.parsed(operation, parse_connection_id(raw))?;
                let definition = self.coordinator.get(request).await?;
                Ok((serde_json::to_value(&definition)?, None))
            }
            Operation::List => {
                let request = self.parsed(operation, parse_list(raw))?;
                let definitions = self.coordinator.list(request).await?;
                let payload = json!({
                    "cluster_id": request.cluster_id,
                    "connections": serde_json::to_value(&definitions)?,
                });
                Ok((payload, None))
            }
            Operation::Edit => {
                let request = self.parsed(operation, parse_edit(raw))?;
                let outcome = self.coordinator.edit(request).await?;
                Ok((json!({"id": outcome.id, "name": outcome.name}), Some(outcome)))
            }
        }
    }

    fn parsed<T>(&self, operation: Operation, parsed: Result<T>) -> Result<T> {
        parsed.inspect_err(|e| {
            self.coordinator
                .metrics()
                .record_validation_failure(operation.as_str(), e.violations().len());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_round_trip_through_their_names() {
        for op in [
            Operation::Create,
            Operation::ChangePassword,
            Operation::Delete,
            Operation::Get,
            Operation::List,
            Operation::Edit,
        ] {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert!("rename".parse::<Operation>().is_err());
        assert!(!Operation::List.is_mutation());
    }
}
