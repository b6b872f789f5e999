//! Presence and type checks over a flat JSON request object.

use serde_json::{Map, Value};
use validator::Validate;

use crate::errors::{EgressError, FieldViolation, Result};
use crate::secrets::SecretString;

/// Reads declared fields from a raw request, collecting a violation for every
/// missing or mistyped one instead of stopping at the first.
///
/// `null` counts as absent. Fields that are not declared are ignored.
#[derive(Debug)]
pub struct FieldReader<'a> {
    fields: Option<&'a Map<String, Value>>,
    violations: Vec<FieldViolation>,
}

impl<'a> FieldReader<'a> {
    pub fn new(raw: &'a Value) -> Self {
        match raw.as_object() {
            Some(fields) => Self { fields: Some(fields), violations: Vec::new() },
            None => Self {
                fields: None,
                violations: vec![FieldViolation::new(
                    "request",
                    "type",
                    "request must be a JSON object",
                )],
            },
        }
    }

    fn lookup(&mut self, field: &str, required: bool) -> Option<&'a Value> {
        let fields = self.fields?;
        let value = fields.get(field).filter(|v| !v.is_null());
        if value.is_none() && required {
            self.violate(field, "required", format!("{} is required", field));
        }
        value
    }

    fn typed<T>(
        &mut self,
        field: &str,
        required: bool,
        expected: &str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Option<T> {
        let value = self.lookup(field, required)?;
        let typed = extract(value);
        if typed.is_none() {
            self.violate(field, "type", format!("{} must be {}", field, expected));
        }
        typed
    }

    pub fn integer(&mut self, field: &str) -> Option<i64> {
        self.typed(field, true, "an integer", Value::as_i64)
    }

    pub fn string(&mut self, field: &str) -> Option<String> {
        self.typed(field, true, "a string", |v| v.as_str().map(str::to_string))
    }

    pub fn boolean(&mut self, field: &str) -> Option<bool> {
        self.typed(field, true, "a boolean", Value::as_bool)
    }

    pub fn secret(&mut self, field: &str) -> Option<SecretString> {
        self.typed(field, true, "a string", |v| v.as_str().map(SecretString::new))
    }

    pub fn optional_integer(&mut self, field: &str) -> Option<i64> {
        self.typed(field, false, "an integer", Value::as_i64)
    }

    pub fn optional_string(&mut self, field: &str) -> Option<String> {
        self.typed(field, false, "a string", |v| v.as_str().map(str::to_string))
    }

    pub fn optional_boolean(&mut self, field: &str) -> Option<bool> {
        self.typed(field, false, "a boolean", Value::as_bool)
    }

    pub fn optional_secret(&mut self, field: &str) -> Option<SecretString> {
        self.typed(field, false, "a string", |v| v.as_str().map(SecretString::new))
    }

    /// Record a rule violation found outside the typed readers
    pub fn violate(&mut self, field: &str, rule: &str, message: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, rule, message));
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    /// Run the declared rules on `request`, built from whatever could be read,
    /// and report everything found so far.
    ///
    /// Fields that already failed presence or type checks are not reported
    /// again, and cross-field rules are skipped once anything failed to read.
    pub fn finish<T: Validate>(self, request: T) -> Result<T> {
        if self.fields.is_none() {
            return Err(EgressError::validation_violations(self.violations));
        }

        let mut violations = self.violations;
        let read_failed = !violations.is_empty();
        if let Err(errors) = request.validate() {
            for violation in FieldViolation::from_validation_errors(&errors) {
                let reported = violations.iter().any(|v| v.field == violation.field);
                let cross_field = violation.rule == "must_match";
                if !reported && !(read_failed && cross_field) {
                    violations.push(violation);
                }
            }
        }

        if violations.is_empty() {
            Ok(request)
        } else {
            Err(EgressError::validation_violations(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_mistyped_fields_are_all_reported() {
        let raw = json!({"id": "7", "flag": true, "name": null});
        let mut reader = FieldReader::new(&raw);

        assert_eq!(reader.integer("id"), None);
        assert_eq!(reader.boolean("flag"), Some(true));
        assert_eq!(reader.string("name"), None);
        assert_eq!(reader.optional_string("comment"), None);

        let rules: Vec<(&str, &str)> =
            reader.violations().iter().map(|v| (v.field.as_str(), v.rule.as_str())).collect();
        assert_eq!(rules, vec![("id", "type"), ("name", "required")]);
    }

    #[test]
    fn fractional_numbers_are_not_integers() {
        let raw = json!({"port": 21.5});
        let mut reader = FieldReader::new(&raw);
        assert_eq!(reader.integer("port"), None);
        assert_eq!(reader.violations()[0].rule, "type");
    }

    #[test]
    fn non_object_request_is_rejected() {
        let raw = json!([1, 2, 3]);
        let mut reader = FieldReader::new(&raw);
        assert_eq!(reader.integer("id"), None);
        assert_eq!(reader.violations().len(), 1);
        assert_eq!(reader.violations()[0].field, "request");
    }
}
