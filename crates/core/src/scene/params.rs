//! Parameter decoding and validation shared by the scene builders.

use std::net::IpAddr;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::ticket::TicketType;

/// Ticket or flow parameters that cannot be executed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Malformed {ticket_type} parameters: {reason}")]
    Malformed {
        ticket_type: TicketType,
        reason: String,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Decode `value` into the typed parameters of `ticket_type`.
pub fn parse<T: DeserializeOwned>(
    ticket_type: TicketType,
    value: &serde_json::Value,
) -> Result<T, ValidationError> {
    T::deserialize(value).map_err(|e| ValidationError::Malformed {
        ticket_type,
        reason: e.to_string(),
    })
}

/// Serialize a per-flow context.
pub fn to_context<T: serde::Serialize>(
    ticket_type: TicketType,
    value: &T,
) -> Result<serde_json::Value, ValidationError> {
    serde_json::to_value(value).map_err(|e| ValidationError::Malformed {
        ticket_type,
        reason: e.to_string(),
    })
}

pub fn ensure_ip(field: &str, value: &str) -> Result<(), ValidationError> {
    value
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::invalid(field, format!("{:?} is not an IP address", value)))
}

pub fn ensure_non_empty<T>(field: &str, items: &[T]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::invalid(field, "must not be empty"));
    }
    Ok(())
}

pub fn ensure_distinct(field: &str, left: &str, right: &str) -> Result<(), ValidationError> {
    if left == right {
        return Err(ValidationError::invalid(
            field,
            format!("{} appears on both sides", left),
        ));
    }
    Ok(())
}

pub(crate) fn default_true() -> bool {
    true
}
