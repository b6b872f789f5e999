//! # Error Handling
//!
//! Error types for the egressplane control plane, plus a small context
//! extension trait for attaching call-site detail to propagated errors.

pub mod types;

pub use types::{EgressError, ErrorKind, FieldViolation, Result};

/// Attach human-readable context to an error while propagating it with `?`.
pub trait ErrorContext<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<EgressError>,
{
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|err| {
            let mut err = err.into();
            err.add_context(context.into());
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prefixed() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.context("Reading config file").unwrap_err();
        assert_eq!(err.to_string(), "I/O error: Reading config file: I/O operation failed");
    }
}
