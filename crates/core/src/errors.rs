use thiserror::Error;

use crate::domain::packet::PacketError;
use crate::domain::specialist::SpecialistKind;
use crate::flows::TransitionError;
use crate::iteration::LimitExceeded;

/// Failure taxonomy surfaced to the UI layer. Every variant has a stable
/// reason code and a message safe to show a customer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing required field `{field}`")]
    MissingRequiredField { field: String },
    #[error("malformed packet: {detail}")]
    MalformedPacket { detail: String },
    #[error(transparent)]
    InvalidTransition(TransitionError),
    #[error("unknown value `{value}` for `{field}`")]
    UnknownStateValue { field: String, value: String },
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),
    #[error("{specialist} specialist unavailable: {detail}")]
    SpecialistUnavailable { specialist: SpecialistKind, detail: String },
    #[error("validation gate violated ({rule}): {detail}")]
    ValidationGateViolation { rule: &'static str, detail: String },
    #[error("packet snapshot does not match session `{session_id}`")]
    StaleSnapshot { session_id: String },
}

impl ProtocolError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MissingRequiredField { .. } => "missing_required_field",
            Self::MalformedPacket { .. } => "malformed_packet",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::UnknownStateValue { .. } => "unknown_state_value",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::SpecialistUnavailable { .. } => "specialist_unavailable",
            Self::ValidationGateViolation { .. } => "validation_gate_violation",
            Self::StaleSnapshot { .. } => "stale_snapshot",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::MissingRequiredField { field } => {
                format!("Some required information is missing ({field}). Please provide it and try again.")
            }
            Self::MalformedPacket { .. } => {
                "The request could not be read. Please try again.".to_owned()
            }
            Self::InvalidTransition(_) => {
                "That step is not possible at this point of your purchase.".to_owned()
            }
            Self::UnknownStateValue { field, .. } => {
                format!("The conversation state contained an unexpected value for {field}.")
            }
            Self::LimitExceeded(exceeded) => format!(
                "We reached the maximum number of {} for this conversation.",
                exceeded.category.as_str().replace('_', " ")
            ),
            Self::SpecialistUnavailable { specialist, .. } => format!(
                "Our {specialist} specialist could not be reached right now. Please try again shortly."
            ),
            Self::ValidationGateViolation { .. } => {
                "We could not forward your request to a specialist yet.".to_owned()
            }
            Self::StaleSnapshot { .. } => {
                "This conversation was updated elsewhere. Please reload and try again.".to_owned()
            }
        }
    }
}

impl From<PacketError> for ProtocolError {
    fn from(value: PacketError) -> Self {
        match value {
            PacketError::MissingRequiredField { field } => Self::MissingRequiredField { field },
            PacketError::UnknownStateValue { field, value } => {
                Self::UnknownStateValue { field, value }
            }
            PacketError::Malformed(detail) => Self::MalformedPacket { detail },
        }
    }
}

impl From<TransitionError> for ProtocolError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::UnknownStateValue { field, value } => {
                Self::UnknownStateValue { field: field.to_owned(), value }
            }
            other => Self::InvalidTransition(other),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request ({reason_code}): {message}")]
    BadRequest { reason_code: String, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict ({reason_code}): {message}")]
    Conflict { reason_code: String, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested conversation does not exist.",
            Self::Conflict { .. } => {
                "This conversation was updated elsewhere. Please reload and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn reason_code(&self) -> Option<&str> {
        match self {
            Self::BadRequest { reason_code, .. } | Self::Conflict { reason_code, .. } => {
                Some(reason_code)
            }
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Protocol(error @ ProtocolError::StaleSnapshot { .. }) => {
                Self::Conflict {
                    reason_code: error.reason_code().to_owned(),
                    message: error.to_string(),
                    correlation_id,
                }
            }
            ApplicationError::Protocol(ProtocolError::SpecialistUnavailable { detail, .. }) => {
                Self::ServiceUnavailable { message: detail, correlation_id }
            }
            ApplicationError::Protocol(error) => Self::BadRequest {
                reason_code: error.reason_code().to_owned(),
                message: error.to_string(),
                correlation_id,
            },
            ApplicationError::SessionNotFound(session_id) => {
                Self::NotFound { message: format!("session `{session_id}`"), correlation_id }
            }
            ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
