//! HTTP surface: router, handlers, and middleware.
//!
//! Every `/api/*`, `/mock/*`, and `/modules` route sits behind the bearer
//! gate; the browser-facing admin pages do not. CORS and request logging
//! wrap the whole router, with preflight answered before authentication.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{any, delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::index::StoredBody;
use crate::registry::Registry;
use crate::store::MockFields;

/// Fixed body served on a dispatch miss.
pub const NOT_FOUND_BODY: &str = "No mock registered for this route";

const ADMIN_PAGE: &str = include_str!("../assets/create-mock.html");

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: Arc<ServerConfig>,
    pub token: Arc<str>,
}

#[derive(Debug, Serialize)]
struct AddMockReply {
    id: i64,
}

#[derive(Debug, Serialize)]
struct MessageReply {
    message: String,
}

impl MessageReply {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/mock/:route", any(dispatch_mock))
        .route("/api/add-mock", post(add_mock))
        .route("/api/get-mocks", get(get_mocks))
        .route("/api/update-mock/:id", put(update_mock))
        .route("/api/delete-mock/:id", delete(delete_mock))
        .route(
            "/api/event/register/:id",
            post(register_event).get(fetch_event).delete(remove_event),
        )
        .route("/api/event/:id", get(event_fixtures))
        .route("/modules", get(modules))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/", get(|| async { Redirect::to("/create-mock") }))
        .route("/create-mock", get(admin_page))
        .merge(protected)
        .layer(middleware::from_fn(log_requests))
        .layer(middleware::from_fn(allow_cors))
        .with_state(state)
}

/// Reject any request whose Authorization header does not exactly equal
/// the configured secret. Runs before the handler, so a rejected request
/// has no side effects.
async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == state.token.as_ref());

    if !authorized {
        return ServerError::Unauthorized.into_response();
    }
    next.run(req).await
}

/// Permissive CORS: answer preflight directly, stamp every other response.
async fn allow_cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response);
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, content-type"),
    );
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let response = next.run(req).await;
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "Request handled"
    );
    response
}

/// `ANY /mock/:route` — serve the canned response for the dispatch key.
async fn dispatch_mock(
    State(state): State<AppState>,
    method: Method,
    Path(route): Path<String>,
) -> Response {
    match state.registry.dispatch(method.as_str(), &route).await {
        Some(entry) => {
            if state.config.settings.log_matches {
                info!(method = %method, route = %route, status = entry.status, "Mock dispatched");
            }
            let status = StatusCode::from_u16(entry.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match entry.body {
                StoredBody::Json(value) => (status, Json(value)).into_response(),
                StoredBody::Raw(text) => (status, text).into_response(),
            }
        }
        None => {
            if state.config.settings.log_unmatched {
                warn!(method = %method, route = %route, "No mock registered");
            }
            (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
        }
    }
}

/// `POST /api/add-mock`
async fn add_mock(
    State(state): State<AppState>,
    Json(fields): Json<MockFields>,
) -> Result<Json<AddMockReply>, ServerError> {
    let id = state.registry.add_mock(fields).await?;
    Ok(Json(AddMockReply { id }))
}

/// `GET /api/get-mocks` — rows verbatim, response field as stored text.
async fn get_mocks(
    State(state): State<AppState>,
) -> Result<Json<Vec<crate::store::MockRow>>, ServerError> {
    Ok(Json(state.registry.list_mocks().await?))
}

/// `PUT /api/update-mock/:id` — genuine in-place update.
async fn update_mock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(fields): Json<MockFields>,
) -> Result<Response, ServerError> {
    if state.registry.update_mock(id, fields).await? {
        Ok(MessageReply::new(format!("mock {id} updated")).into_response())
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            MessageReply::new(format!("no mock with id {id}")),
        )
            .into_response())
    }
}

/// `DELETE /api/delete-mock/:id` — succeeds even when no row matched.
async fn delete_mock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageReply>, ServerError> {
    state.registry.delete_mock(id).await?;
    Ok(MessageReply::new(format!("mock {id} deleted")))
}

/// `POST /api/event/register/:id` — upsert.
async fn register_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<MessageReply>, ServerError> {
    state.registry.register_event(&id, &body).await?;
    Ok(MessageReply::new(format!("event {id} registered")))
}

/// `GET /api/event/register/:id` — stored JSON, `{}` when absent.
async fn fetch_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    Ok(Json(state.registry.fetch_event(&id).await?))
}

/// `DELETE /api/event/register/:id` — idempotent.
async fn remove_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageReply>, ServerError> {
    state.registry.remove_event(&id).await?;
    Ok(MessageReply::new(format!("event {id} removed")))
}

/// `GET /api/event/:id` — static fixture list with the presence overlay.
///
/// The path id is accepted but not consulted; the probe id comes from
/// configuration.
async fn event_fixtures(
    State(state): State<AppState>,
    Path(_id): Path<String>,
) -> Result<Json<Vec<serde_json::Value>>, ServerError> {
    let mut docs = state.config.events.clone();

    if state
        .registry
        .event_registered(&state.config.register_probe.event_id)
        .await?
    {
        let target = state.config.register_probe.fixture_id.as_str();
        for doc in &mut docs {
            if doc.get("id").and_then(|v| v.as_str()) == Some(target) {
                doc["existingRegister"] = serde_json::Value::Bool(true);
            }
        }
    }

    Ok(Json(docs))
}

/// `GET /modules` — static form-schema fixture.
async fn modules(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.config.modules.clone())
}

/// `GET /create-mock` — admin UI document.
async fn admin_page() -> Html<&'static str> {
    Html(ADMIN_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use tower::ServiceExt;

    use crate::store::MockStore;

    const TOKEN: &str = "test-secret-token";

    async fn test_app(dir: &tempfile::TempDir) -> (Router, AppState) {
        let store = MockStore::open(dir.path().join("mocks.db")).unwrap();
        let registry = Registry::open(store).await.unwrap();
        let state = AppState {
            registry: Arc::new(registry),
            config: Arc::new(ServerConfig::default()),
            token: Arc::from(TOKEN),
        };
        (router(state.clone()), state)
    }

    fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .uri(uri)
            .method(method)
            .header("Authorization", TOKEN);
        match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn response_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn add_mock_body(route: &str, method: &str, status: u16, response: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "route": route,
            "method": method,
            "status": status,
            "response": response,
        })
    }

    #[tokio::test]
    async fn add_then_dispatch_round_trips_status_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let add = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/add-mock",
                Some(add_mock_body("users", "GET", 201, serde_json::json!({"name": "Ada"}))),
            ))
            .await
            .unwrap();
        assert_eq!(add.status(), StatusCode::OK);
        let reply = response_json(add).await;
        assert!(reply["id"].as_i64().is_some());

        let dispatched = app
            .oneshot(request("GET", "/mock/users", None))
            .await
            .unwrap();
        assert_eq!(dispatched.status(), StatusCode::CREATED);
        assert_eq!(
            response_json(dispatched).await,
            serde_json::json!({"name": "Ada"})
        );
    }

    #[tokio::test]
    async fn dispatch_does_not_normalize_methods() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        app.clone()
            .oneshot(request(
                "POST",
                "/api/add-mock",
                Some(add_mock_body("users", "GET", 200, serde_json::json!({}))),
            ))
            .await
            .unwrap();

        // A registration for GET does not answer POST.
        let miss = app
            .oneshot(request("POST", "/mock/users", None))
            .await
            .unwrap();
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_yields_fixed_not_found_body() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(request("GET", "/mock/nowhere", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response_text(response).await, NOT_FOUND_BODY);
    }

    #[tokio::test]
    async fn string_response_round_trips_as_string() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        app.clone()
            .oneshot(request(
                "POST",
                "/api/add-mock",
                Some(add_mock_body("ping", "GET", 200, serde_json::json!("pong"))),
            ))
            .await
            .unwrap();

        let dispatched = app
            .oneshot(request("GET", "/mock/ping", None))
            .await
            .unwrap();
        assert_eq!(dispatched.status(), StatusCode::OK);
        assert_eq!(response_json(dispatched).await, serde_json::json!("pong"));
    }

    #[tokio::test]
    async fn malformed_stored_response_dispatches_as_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockStore::open(dir.path().join("mocks.db")).unwrap();

        // Simulate an out-of-band row whose response column is not JSON.
        let conn = rusqlite::Connection::open(store.db_path()).unwrap();
        conn.execute(
            "INSERT INTO mocks (route, method, status, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params!["legacy", "GET", 200i64, "plain old text {", "2026-01-01T00:00:00Z"],
        )
        .unwrap();
        drop(conn);

        let registry = Registry::open(store).await.unwrap();
        let state = AppState {
            registry: Arc::new(registry),
            config: Arc::new(ServerConfig::default()),
            token: Arc::from(TOKEN),
        };
        let app = router(state);

        let dispatched = app
            .oneshot(request("GET", "/mock/legacy", None))
            .await
            .unwrap();
        assert_eq!(dispatched.status(), StatusCode::OK);
        assert_eq!(response_text(dispatched).await, "plain old text {");
    }

    #[tokio::test]
    async fn list_reflects_store_after_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let add = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/add-mock",
                Some(add_mock_body("users", "GET", 200, serde_json::json!({"v": 1}))),
            ))
            .await
            .unwrap();
        let id = response_json(add).await["id"].as_i64().unwrap();

        let listed = app
            .clone()
            .oneshot(request("GET", "/api/get-mocks", None))
            .await
            .unwrap();
        let rows = response_json(listed).await;
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["id"].as_i64(), Some(id));
        // Response field is the stored string form, not re-parsed.
        assert_eq!(rows[0]["response"].as_str(), Some(r#"{"v":1}"#));

        app.clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/delete-mock/{id}"),
                None,
            ))
            .await
            .unwrap();

        let listed = app
            .oneshot(request("GET", "/api/get-mocks", None))
            .await
            .unwrap();
        assert!(response_json(listed).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_modifies_existing_row_without_inserting() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let add = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/add-mock",
                Some(add_mock_body("users", "GET", 200, serde_json::json!({"v": 1}))),
            ))
            .await
            .unwrap();
        let id = response_json(add).await["id"].as_i64().unwrap();

        let updated = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/update-mock/{id}"),
                Some(add_mock_body("users", "GET", 503, serde_json::json!({"v": 2}))),
            ))
            .await
            .unwrap();
        assert_eq!(updated.status(), StatusCode::OK);

        let listed = app
            .clone()
            .oneshot(request("GET", "/api/get-mocks", None))
            .await
            .unwrap();
        assert_eq!(response_json(listed).await.as_array().unwrap().len(), 1);

        let dispatched = app
            .oneshot(request("GET", "/mock/users", None))
            .await
            .unwrap();
        assert_eq!(dispatched.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response_json(dispatched).await,
            serde_json::json!({"v": 2})
        );
    }

    #[tokio::test]
    async fn update_of_unknown_id_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let updated = app
            .oneshot(request(
                "PUT",
                "/api/update-mock/999",
                Some(add_mock_body("users", "GET", 200, serde_json::json!({}))),
            ))
            .await
            .unwrap();
        assert_eq!(updated.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_of_unknown_id_confirms_success() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let deleted = app
            .oneshot(request("DELETE", "/api/delete-mock/424242", None))
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);
        let reply = response_json(deleted).await;
        assert!(reply["message"].as_str().unwrap().contains("deleted"));
    }

    #[tokio::test]
    async fn missing_token_yields_401_with_no_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let unauthorized = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/add-mock")
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        add_mock_body("users", "GET", 200, serde_json::json!({})).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response_text(unauthorized).await, "Unauthorized");

        let listed = app
            .oneshot(request("GET", "/api/get-mocks", None))
            .await
            .unwrap();
        assert!(response_json(listed).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_on_dispatch_too() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/mock/users")
                    .method("GET")
                    .header("Authorization", "not-the-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn event_overlay_flips_flag_only_when_probe_id_registered() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = test_app(&dir).await;
        let probe = state.config.register_probe.clone();

        let find_target = |docs: &serde_json::Value| -> serde_json::Value {
            docs.as_array()
                .unwrap()
                .iter()
                .find(|d| d["id"].as_str() == Some(probe.fixture_id.as_str()))
                .cloned()
                .unwrap()
        };

        // Before registration the flag stays false.
        let before = app
            .clone()
            .oneshot(request("GET", "/api/event/anything", None))
            .await
            .unwrap();
        let docs = response_json(before).await;
        assert_eq!(find_target(&docs)["existingRegister"], false);

        // Registering under an unrelated id does not flip the flag.
        app.clone()
            .oneshot(request(
                "POST",
                "/api/event/register/unrelated",
                Some(serde_json::json!({"any": "value"})),
            ))
            .await
            .unwrap();
        let still = app
            .clone()
            .oneshot(request("GET", "/api/event/anything", None))
            .await
            .unwrap();
        let docs = response_json(still).await;
        assert_eq!(find_target(&docs)["existingRegister"], false);

        // Presence under the probe id flips it; content is irrelevant.
        app.clone()
            .oneshot(request(
                "POST",
                &format!("/api/event/register/{}", probe.event_id),
                Some(serde_json::json!({"any": "value"})),
            ))
            .await
            .unwrap();
        let after = app
            .oneshot(request("GET", "/api/event/anything", None))
            .await
            .unwrap();
        let docs = response_json(after).await;
        assert_eq!(find_target(&docs)["existingRegister"], true);
    }

    #[tokio::test]
    async fn event_record_crud_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let empty = app
            .clone()
            .oneshot(request("GET", "/api/event/register/abc", None))
            .await
            .unwrap();
        assert_eq!(response_json(empty).await, serde_json::json!({}));

        app.clone()
            .oneshot(request(
                "POST",
                "/api/event/register/abc",
                Some(serde_json::json!({"seat": "12A"})),
            ))
            .await
            .unwrap();

        let stored = app
            .clone()
            .oneshot(request("GET", "/api/event/register/abc", None))
            .await
            .unwrap();
        assert_eq!(
            response_json(stored).await,
            serde_json::json!({"seat": "12A"})
        );

        app.clone()
            .oneshot(request("DELETE", "/api/event/register/abc", None))
            .await
            .unwrap();
        let gone = app
            .oneshot(request("GET", "/api/event/register/abc", None))
            .await
            .unwrap();
        assert_eq!(response_json(gone).await, serde_json::json!({}));
    }

    #[tokio::test]
    async fn modules_serves_configured_schema() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = test_app(&dir).await;

        let response = app
            .oneshot(request("GET", "/modules", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, state.config.modules);
    }

    #[tokio::test]
    async fn root_redirects_to_admin_page_without_auth() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/create-mock"
        );

        let page = app
            .oneshot(
                Request::builder()
                    .uri("/create-mock")
                    .method("GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(page.status(), StatusCode::OK);
        assert!(response_text(page).await.contains("<html"));
    }

    #[tokio::test]
    async fn preflight_is_answered_before_auth() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(&dir).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/get-mocks")
                    .method("OPTIONS")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }
}
