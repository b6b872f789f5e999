//! # Validation Module
//!
//! Turns raw mutation requests into typed, validated requests.
//!
//! Validation happens in two layers that report together:
//! 1. Presence and type of every declared field, read from a flat JSON object
//! 2. Shape and cross-field rules, declared on the typed requests with `validator`
//!
//! A failure lists every violated rule, never just the first one. Nothing here
//! has side effects.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use validator::{Validate, ValidationError};

use crate::errors::{EgressError, Result};
use crate::secrets::SecretString;

pub mod fields;
pub mod requests;

pub use fields::FieldReader;
pub use requests::*;

/// Longest accepted name, host or user
pub const MAX_FIELD_LENGTH: usize = 255;
/// Longest accepted password
pub const MAX_PASSWORD_LENGTH: usize = 1024;

lazy_static! {
    /// Host validation: DNS names, IPv4 and bracket-less IPv6 literals
    static ref HOST_REGEX: Regex =
        Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)*\.?$|^[a-fA-F0-9:]*:[a-fA-F0-9:.]*$").unwrap();
}

fn invalid(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    ValidationError::new(code).with_message(message.into())
}

fn validate_text(value: &str, what: &'static str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(invalid("required", format!("{} cannot be empty", what)));
    }
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(invalid(
            "length",
            format!("{} cannot exceed {} characters", what, MAX_FIELD_LENGTH),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(invalid("format", format!("{} cannot contain control characters", what)));
    }
    Ok(())
}

/// Validate connection names
pub fn validate_connection_name(name: &str) -> std::result::Result<(), ValidationError> {
    validate_text(name, "name")
}

/// Validate user names
pub fn validate_user(user: &str) -> std::result::Result<(), ValidationError> {
    validate_text(user, "user")
}

/// Validate host names and addresses
pub fn validate_host(host: &str) -> std::result::Result<(), ValidationError> {
    validate_text(host, "host")?;
    if !HOST_REGEX.is_match(host) {
        return Err(invalid("format", "host must be a DNS name or an IP address"));
    }
    Ok(())
}

/// Validate secret material
pub fn validate_password(password: &SecretString) -> std::result::Result<(), ValidationError> {
    let secret = password.expose_secret();
    if secret.is_empty() {
        return Err(invalid("required", "password cannot be empty"));
    }
    if secret.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(invalid(
            "length",
            format!("password cannot exceed {} characters", MAX_PASSWORD_LENGTH),
        ));
    }
    Ok(())
}

/// Run the declared rules of a typed request
pub fn check<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(EgressError::from)
}
