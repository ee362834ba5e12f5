//! Tests for the simulation REST API

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use quote_simulation_service::{AppState, ServiceConfig, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

fn create_test_router() -> Router {
    build_router(AppState::new(ServiceConfig::deterministic()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_simulation(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/simulations", None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

fn joao() -> Value {
    json!({
        "name": "João Silva",
        "email": "joao@email.com",
        "licensePlate": "ABC1234"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-correlation-id"));
}

#[tokio::test]
async fn test_full_quote_flow() {
    let app = create_test_router();
    let id = create_simulation(&app).await;

    let (status, snapshot) = send(&app, "POST", &format!("/simulations/{id}/submit"), Some(joao())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"]["currentStep"], "CAR_DETAILS_CONFIRMATION");

    let (status, car) = send(&app, "GET", &format!("/simulations/{id}/car-details"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(car["make"], "Toyota");
    assert_eq!(car["fipeCode"], "038001-1");

    let (status, quote) = send(&app, "POST", &format!("/simulations/{id}/confirm"), None).await;
    assert_eq!(status, StatusCode::OK);
    let offers = quote["offers"].as_array().unwrap().len();
    assert!((3..=4).contains(&offers));

    let (status, done) = send(&app, "POST", &format!("/simulations/{id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        done["url"]
            .as_str()
            .unwrap()
            .contains("licensePlate=ABC1234&carMake=Toyota&carModel=Corolla")
    );
    assert_eq!(done["sessionStored"], true);

    let (_, simulation) = send(&app, "GET", &format!("/simulations/{id}"), None).await;
    assert_eq!(simulation["visited"].as_array().unwrap().len(), 1);
    assert_eq!(simulation["history"]["step"], "LOADING");
    assert!(simulation["metadata"]["title"].as_str().unwrap().contains("Corolla"));

    // lookup, offers and one prefetched detail per offer
    let (_, stats) = send(&app, "GET", &format!("/simulations/{id}/cache"), None).await;
    assert_eq!(stats["total"], 2 + offers);
}

#[tokio::test]
async fn test_invalid_form_returns_field_errors() {
    let app = create_test_router();
    let id = create_simulation(&app).await;

    let form = json!({ "name": "", "email": "invalid-email", "licensePlate": "invalid-plate" });
    let (status, body) = send(&app, "POST", &format!("/simulations/{id}/submit"), Some(form)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["name", "email", "licensePlate"]);
}

#[tokio::test]
async fn test_out_of_order_transition_conflicts() {
    let app = create_test_router();
    let id = create_simulation(&app).await;

    let (status, body) = send(&app, "POST", &format!("/simulations/{id}/confirm"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["step"], "INITIAL_FORM");

    let (status, _) = send(&app, "GET", &format!("/simulations/{id}/car-details"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_edit_and_history_restore() {
    let app = create_test_router();
    let id = create_simulation(&app).await;
    send(&app, "POST", &format!("/simulations/{id}/submit"), Some(joao())).await;

    let (status, snapshot) = send(&app, "POST", &format!("/simulations/{id}/edit"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"]["currentStep"], "INITIAL_FORM");
    assert_eq!(snapshot["state"]["formData"]["licensePlate"], "ABC1234");

    let entry = json!({
        "state": {
            "step": "CAR_DETAILS_CONFIRMATION",
            "formData": joao(),
            "timestamp": 0
        }
    });
    let (_, snapshot) = send(&app, "POST", &format!("/simulations/{id}/history"), Some(entry)).await;
    assert_eq!(snapshot["state"]["currentStep"], "CAR_DETAILS_CONFIRMATION");

    let (_, snapshot) = send(&app, "POST", &format!("/simulations/{id}/history"), None).await;
    assert_eq!(snapshot["state"]["currentStep"], "INITIAL_FORM");
    assert!(snapshot["state"]["formData"].is_null());
}

#[tokio::test]
async fn test_reset_and_visibility() {
    let app = create_test_router();
    let id = create_simulation(&app).await;
    send(&app, "POST", &format!("/simulations/{id}/submit"), Some(joao())).await;
    send(&app, "GET", &format!("/simulations/{id}/car-details"), None).await;

    let (_, body) = send(&app, "POST", &format!("/simulations/{id}/visibility"), None).await;
    assert_eq!(body["reset"], false);

    let (status, snapshot) = send(&app, "POST", &format!("/simulations/{id}/reset"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"]["currentStep"], "INITIAL_FORM");
    assert_eq!(snapshot["quoteStatus"], "idle");

    let (_, stats) = send(&app, "GET", &format!("/simulations/{id}/cache"), None).await;
    assert_eq!(stats["total"], 0);
}

#[tokio::test]
async fn test_unknown_and_malformed_simulation_ids() {
    let app = create_test_router();

    let (status, _) = send(&app, "GET", "/simulations/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, body) = send(&app, "GET", &format!("/simulations/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["id"], missing.to_string());
}

#[tokio::test]
async fn test_delete_simulation() {
    let app = create_test_router();
    let id = create_simulation(&app).await;

    let (status, body) = send(&app, "DELETE", &format!("/simulations/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (status, _) = send(&app, "GET", &format!("/simulations/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", &format!("/simulations/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_offer_details() {
    let app = create_test_router();

    let (status, offer) = send(&app, "GET", "/offers/offer-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offer["insurerName"], "Porto Seguro");

    let (status, body) = send(&app, "GET", "/offers/does-not-exist", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "VALIDATION_ERROR");
    assert_eq!(body["display"]["canRetry"], false);
}

#[tokio::test]
async fn test_results_params_validation() {
    let app = create_test_router();

    let (status, body) = send(&app, "GET", "/cotacao?name=Ana", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["isValid"], false);
    assert_eq!(body["errors"].as_array().unwrap().len(), 2);

    let uri = "/cotacao?name=Jo%C3%A3o%20Silva&email=joao%40email.com&licensePlate=ABC1234\
               &carMake=Toyota&carModel=Corolla&carYear=2020&fipeCode=038001-1&estimatedValue=85000";
    let (status, body) = send(&app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "João Silva");
    assert_eq!(body["data"]["carDetails"]["estimatedValue"], 85000.0);

    // repeated keys: the first value wins
    let uri = "/cotacao?name=Ana%20Souza&name=Bob&email=ana%40email.com&licensePlate=ABC1234";
    let (status, body) = send(&app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Ana Souza");
}
