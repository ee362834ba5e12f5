use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::flow::FlowStep;
use crate::validation::FieldError;

/// Failure categories of the simulated vehicle/insurance backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationErrorKind {
    NetworkError,
    TimeoutError,
    InvalidPlate,
    ServerError,
    RateLimit,
    ValidationError,
}

impl SimulationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::InvalidPlate => "INVALID_PLATE",
            Self::ServerError => "SERVER_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::ValidationError => "VALIDATION_ERROR",
        }
    }

    /// Default pt-BR message shown to the user for this kind.
    pub fn default_user_message(&self) -> &'static str {
        match self {
            Self::NetworkError => "Falha na conexão. Verifique sua internet e tente novamente.",
            Self::TimeoutError => "O serviço demorou muito para responder. Tente novamente.",
            Self::InvalidPlate => {
                "Não conseguimos consultar esta placa agora. Tente novamente em instantes."
            }
            Self::ServerError => "Nossos servidores estão instáveis. Tente novamente em instantes.",
            Self::RateLimit => "Muitas tentativas em pouco tempo. Aguarde alguns segundos.",
            Self::ValidationError => "Verifique os dados informados e tente novamente.",
        }
    }

    pub fn suggested_actions(&self) -> &'static [&'static str] {
        match self {
            Self::NetworkError => &[
                "Verifique sua conexão com a internet",
                "Tente novamente em alguns instantes",
            ],
            Self::TimeoutError => &["Tente novamente", "Verifique se sua conexão está estável"],
            Self::InvalidPlate => &[
                "Confira se a placa foi digitada corretamente",
                "Tente novamente",
            ],
            Self::ServerError => &["Aguarde alguns minutos", "Tente novamente mais tarde"],
            Self::RateLimit => &["Aguarde alguns segundos antes de tentar novamente"],
            Self::ValidationError => &["Corrija os dados do formulário", "Recomece a simulação"],
        }
    }
}

impl fmt::Display for SimulationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by the mock domain service.
///
/// `ValidationError` is never retryable; every other kind is.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct SimulationError {
    pub kind: SimulationErrorKind,
    pub message: String,
    pub retryable: bool,
    pub user_friendly_message: String,
}

impl SimulationError {
    pub fn new(kind: SimulationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind != SimulationErrorKind::ValidationError,
            user_friendly_message: kind.default_user_message().to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(SimulationErrorKind::ValidationError, message)
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_friendly_message = message.into();
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable && self.kind != SimulationErrorKind::ValidationError
    }
}

/// Errors surfaced by the query cache.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query disabled: {0}")]
    Disabled(String),

    #[error(transparent)]
    Fetch(#[from] SimulationError),

    #[error("Cached value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl QueryError {
    /// The domain error behind this failure, if any.
    pub fn simulation_error(&self) -> Option<&SimulationError> {
        match self {
            Self::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Action '{action}' is not allowed from step {from}")]
    InvalidTransition {
        from: FlowStep,
        action: &'static str,
    },

    #[error("Form validation failed with {} error(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("No form data has been submitted")]
    MissingFormData,

    #[error("Car details are not available yet")]
    MissingCarDetails,

    #[error("No quote result is available")]
    MissingQuote,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Response discarded: the flow changed while the request was in flight")]
    Superseded,

    #[error("Navigation failed after {attempts} attempt(s): {reason}")]
    NavigationFailed { attempts: u32, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SimulationError> for FlowError {
    fn from(error: SimulationError) -> Self {
        FlowError::Query(QueryError::Fetch(error))
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
