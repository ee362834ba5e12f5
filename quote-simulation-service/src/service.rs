use axum::{
    Router,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post},
};
use quote_flow::navigation::ResultsValidation;
use quote_flow::{
    CacheStats, CarDetails, FlowSnapshot, FormData, HistoryEntry, InsuranceOffer, QueryKey,
    QuoteResult, SearchParams, validate_results_params,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::{
    ApiError, ApiResult, bad_request_error, flow_error, internal_error, not_found_error,
    simulation_error,
};
use crate::state::{AppState, Simulation};
use crate::telemetry::correlation_id_middleware;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
    pub id: Uuid,
    pub created_at: String,
    pub snapshot: FlowSnapshot,
    pub visited: Vec<String>,
    /// Current browser history entry.
    pub history: Option<HistoryEntry>,
    pub metadata: Option<MetadataResponse>,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PopStateRequest {
    #[serde(default)]
    pub state: Option<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityResponse {
    pub reset: bool,
    pub snapshot: FlowSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub url: String,
    pub session_stored: bool,
}

pub fn create_app(config: ServiceConfig) -> Router {
    build_router(AppState::new(config))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/simulations", post(create_simulation))
        .route("/simulations/{id}", get(get_simulation).delete(delete_simulation))
        .route("/simulations/{id}/submit", post(submit_form))
        .route("/simulations/{id}/car-details", get(get_car_details))
        .route("/simulations/{id}/confirm", post(confirm_car_details))
        .route("/simulations/{id}/retry-quote", post(retry_quote))
        .route("/simulations/{id}/edit", post(edit_form))
        .route("/simulations/{id}/complete", post(complete_loading))
        .route("/simulations/{id}/reset", post(reset_simulation))
        .route("/simulations/{id}/history", post(pop_state))
        .route("/simulations/{id}/visibility", post(visibility_regained))
        .route("/simulations/{id}/cache", get(cache_stats))
        .route("/offers/{offer_id}", get(get_offer))
        .route("/cotacao", get(validate_results))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Quote Simulation Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Simulated car-insurance quote flow with cached lookups and retries",
        "endpoints": {
            "POST /simulations": "Start a new quote simulation",
            "GET /simulations/{id}": "Current flow state",
            "DELETE /simulations/{id}": "Discard a simulation",
            "POST /simulations/{id}/submit": "Submit the initial form",
            "GET /simulations/{id}/car-details": "Look up the vehicle for the submitted plate",
            "POST /simulations/{id}/confirm": "Confirm the vehicle and generate the quote",
            "POST /simulations/{id}/retry-quote": "Retry a failed quote",
            "POST /simulations/{id}/edit": "Go back to the form",
            "POST /simulations/{id}/complete": "Finish loading and open the results page",
            "POST /simulations/{id}/reset": "Start over",
            "POST /simulations/{id}/history": "Browser back/forward",
            "POST /simulations/{id}/visibility": "Tab became visible again",
            "GET /simulations/{id}/cache": "Query cache statistics",
            "GET /offers/{offer_id}": "Offer details",
            "GET /cotacao": "Validate results-page parameters",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn find_simulation(state: &AppState, id: &str) -> Result<Arc<Simulation>, ApiError> {
    let uuid = Uuid::parse_str(id).map_err(|_| {
        warn!(simulation_id = %id, "Invalid simulation id format");
        bad_request_error("Invalid simulation id")
    })?;
    state
        .simulation(&uuid)
        .ok_or_else(|| not_found_error("Simulation not found", id))
}

fn simulation_response(simulation: &Simulation) -> SimulationResponse {
    SimulationResponse {
        id: simulation.id,
        created_at: simulation.created_at.to_rfc3339(),
        snapshot: simulation.controller.snapshot(),
        visited: simulation.navigator.visited(),
        history: simulation.history.current(),
        metadata: simulation
            .metadata
            .latest()
            .map(|(title, description)| MetadataResponse { title, description }),
    }
}

async fn create_simulation(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SimulationResponse>), ApiError> {
    let simulation = state.create_simulation();
    Ok((StatusCode::CREATED, Json(simulation_response(&simulation))))
}

async fn get_simulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SimulationResponse> {
    let simulation = find_simulation(&state, &id)?;
    Ok(Json(simulation_response(&simulation)))
}

async fn delete_simulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let simulation = find_simulation(&state, &id)?;
    state.remove_simulation(&simulation.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<FormData>,
) -> ApiResult<FlowSnapshot> {
    let simulation = find_simulation(&state, &id)?;
    info!(simulation_id = %id, "Submitting form");
    let controller = &simulation.controller;
    controller
        .submit(&form)
        .map_err(|e| flow_error(controller, e))?;
    Ok(Json(controller.snapshot()))
}

async fn get_car_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CarDetails> {
    let simulation = find_simulation(&state, &id)?;
    let controller = &simulation.controller;
    let car = controller
        .car_details()
        .await
        .map_err(|e| flow_error(controller, e))?;
    Ok(Json(car))
}

async fn confirm_car_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<QuoteResult> {
    let simulation = find_simulation(&state, &id)?;
    info!(simulation_id = %id, "Confirming car details");
    let controller = &simulation.controller;
    let quote = controller
        .confirm()
        .await
        .map_err(|e| flow_error(controller, e))?;
    Ok(Json(quote))
}

async fn retry_quote(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<QuoteResult> {
    let simulation = find_simulation(&state, &id)?;
    let controller = &simulation.controller;
    let quote = controller
        .retry_quote()
        .await
        .map_err(|e| flow_error(controller, e))?;
    Ok(Json(quote))
}

async fn edit_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<FlowSnapshot> {
    let simulation = find_simulation(&state, &id)?;
    let controller = &simulation.controller;
    controller.edit().map_err(|e| flow_error(controller, e))?;
    Ok(Json(controller.snapshot()))
}

async fn complete_loading(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CompletionResponse> {
    let simulation = find_simulation(&state, &id)?;
    let controller = &simulation.controller;
    let url = controller
        .loading_complete()
        .await
        .map_err(|e| flow_error(controller, e))?;

    let session_stored = controller
        .has_valid_navigation_session()
        .await
        .map_err(|e| internal_error("Failed to read navigation session", &e.to_string()))?;
    info!(simulation_id = %id, url = %url, "Quote handed off to results page");
    Ok(Json(CompletionResponse {
        url,
        session_stored,
    }))
}

async fn reset_simulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<FlowSnapshot> {
    let simulation = find_simulation(&state, &id)?;
    simulation.controller.reset();
    Ok(Json(simulation.controller.snapshot()))
}

async fn pop_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<PopStateRequest>>,
) -> ApiResult<FlowSnapshot> {
    let simulation = find_simulation(&state, &id)?;
    let entry = body.and_then(|Json(request)| request.state);
    simulation.controller.handle_pop_state(entry);
    Ok(Json(simulation.controller.snapshot()))
}

async fn visibility_regained(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<VisibilityResponse> {
    let simulation = find_simulation(&state, &id)?;
    let reset = simulation.controller.handle_visibility_regained();
    Ok(Json(VisibilityResponse {
        reset,
        snapshot: simulation.controller.snapshot(),
    }))
}

async fn cache_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CacheStats> {
    let simulation = find_simulation(&state, &id)?;
    Ok(Json(simulation.controller.cache_stats()))
}

async fn get_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> ApiResult<InsuranceOffer> {
    let api = &state.api;
    let id = offer_id.as_str();
    let offer = state
        .offers
        .fetch_query(QueryKey::offer_details(id), move || api.get_offer_details(id))
        .await
        .map_err(|e| match e.simulation_error() {
            Some(error) => simulation_error(error, None),
            None => internal_error("Failed to load offer", &e.to_string()),
        })?;
    Ok(Json(offer))
}

/// Parsed with [`SearchParams::parse`], so the first of any repeated key wins.
async fn validate_results(RawQuery(query): RawQuery) -> (StatusCode, Json<ResultsValidation>) {
    let params = SearchParams::parse(query.as_deref().unwrap_or_default());
    let validation = validate_results_params(&params);
    let status = if validation.is_valid {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(validation))
}
