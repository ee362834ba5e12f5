use axum::{http::StatusCode, response::Json};
use quote_flow::recovery::ErrorDisplay;
use quote_flow::{FlowController, FlowError, QueryError, SimulationError, SimulationErrorKind};
use serde_json::{Value, json};
use tracing::error;

pub type ApiResult<T> = Result<Json<T>, ApiError>;
pub type ApiError = (StatusCode, Json<Value>);

pub fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

pub fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

pub fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn conflict_error(message: &str) -> ApiError {
    (StatusCode::CONFLICT, Json(json!({ "error": message })))
}

pub fn status_for_kind(kind: SimulationErrorKind) -> StatusCode {
    match kind {
        SimulationErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        SimulationErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        SimulationErrorKind::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
        SimulationErrorKind::NetworkError
        | SimulationErrorKind::ServerError
        | SimulationErrorKind::InvalidPlate => StatusCode::BAD_GATEWAY,
    }
}

/// Domain failures carry the recovery overlay instead of the raw message.
pub fn simulation_error(error: &SimulationError, display: Option<ErrorDisplay>) -> ApiError {
    let display = display.unwrap_or_else(|| ErrorDisplay::for_simulation_error(error, 1));
    (
        status_for_kind(error.kind),
        Json(json!({
            "error": error.user_friendly_message,
            "kind": error.kind,
            "retryable": error.is_retryable(),
            "display": display,
        })),
    )
}

/// Map a flow failure to a response, using the controller's current overlay.
pub fn flow_error(controller: &FlowController, error: FlowError) -> ApiError {
    match error {
        FlowError::InvalidTransition { from, action } => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": format!("'{action}' is not allowed from {from}"),
                "step": from,
            })),
        ),
        FlowError::Validation(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": "Validation failed",
                "fields": errors,
            })),
        ),
        FlowError::Query(QueryError::Fetch(e)) => simulation_error(&e, controller.error_display()),
        FlowError::Query(QueryError::Disabled(reason)) => conflict_error(&reason),
        FlowError::NavigationFailed { attempts, reason } => {
            let display = controller
                .error_display()
                .unwrap_or_else(|| ErrorDisplay::navigation_failed(attempts, attempts));
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": display.message,
                    "attempts": attempts,
                    "reason": reason,
                    "display": display,
                })),
            )
        }
        e @ (FlowError::MissingFormData
        | FlowError::MissingCarDetails
        | FlowError::MissingQuote
        | FlowError::Superseded) => conflict_error(&e.to_string()),
        e @ (FlowError::Query(QueryError::Decode(_)) | FlowError::Serialization(_)) => {
            error!(error = %e, "Flow failed unexpectedly");
            internal_error("Simulation failed", &e.to_string())
        }
    }
}
