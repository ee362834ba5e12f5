//! User-facing error overlays for the two failure domains of the flow.

use serde::{Deserialize, Serialize};

use crate::error::{SimulationError, SimulationErrorKind};

/// How many times the user may press "retry" on one error overlay.
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

pub const NAVIGATION_FAILED_TITLE: &str = "Não foi possível abrir sua cotação";
pub const NAVIGATION_FAILED_MESSAGE: &str =
    "Sua cotação foi calculada, mas não conseguimos exibir a página de resultados.";
const NAVIGATION_FAILED_HINTS: &[&str] = &[
    "Recomece a simulação",
    "Volte para a página inicial",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "kind", rename_all = "camelCase")]
pub enum ErrorChannel {
    Domain(SimulationErrorKind),
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryAction {
    Retry,
    Reset,
    GoHome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDisplay {
    pub channel: ErrorChannel,
    pub title: String,
    pub message: String,
    pub hints: Vec<String>,
    pub suggested_actions: Vec<RecoveryAction>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub can_retry: bool,
}

impl ErrorDisplay {
    /// `attempt` counts the tries already made from this overlay, starting at 1.
    pub fn for_simulation_error(error: &SimulationError, attempt: u32) -> Self {
        let can_retry = error.is_retryable() && attempt < MAX_RECOVERY_ATTEMPTS;
        let mut suggested_actions = Vec::with_capacity(3);
        if can_retry {
            suggested_actions.push(RecoveryAction::Retry);
        }
        suggested_actions.push(RecoveryAction::Reset);
        suggested_actions.push(RecoveryAction::GoHome);

        Self {
            channel: ErrorChannel::Domain(error.kind),
            title: title_for(error.kind).to_string(),
            message: error.user_friendly_message.clone(),
            hints: error
                .kind
                .suggested_actions()
                .iter()
                .map(|hint| hint.to_string())
                .collect(),
            suggested_actions,
            attempt,
            max_attempts: MAX_RECOVERY_ATTEMPTS,
            can_retry,
        }
    }

    pub fn navigation_failed(attempts: u32, max_attempts: u32) -> Self {
        Self {
            channel: ErrorChannel::Navigation,
            title: NAVIGATION_FAILED_TITLE.to_string(),
            message: NAVIGATION_FAILED_MESSAGE.to_string(),
            hints: NAVIGATION_FAILED_HINTS.iter().map(|h| h.to_string()).collect(),
            suggested_actions: vec![RecoveryAction::Reset, RecoveryAction::GoHome],
            attempt: attempts,
            max_attempts,
            can_retry: false,
        }
    }
}

fn title_for(kind: SimulationErrorKind) -> &'static str {
    match kind {
        SimulationErrorKind::NetworkError => "Problema de conexão",
        SimulationErrorKind::TimeoutError => "Tempo esgotado",
        SimulationErrorKind::InvalidPlate => "Placa não encontrada",
        SimulationErrorKind::ServerError => "Serviço indisponível",
        SimulationErrorKind::RateLimit => "Muitas tentativas",
        SimulationErrorKind::ValidationError => "Dados inválidos",
    }
}
