use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::insights::InsightReport;
use crate::state::{Alert, AdminSettings, EmergencyContact, UserState};
use crate::store::StoreError;
use crate::trigger::MANUAL_PANIC_REASON;
use crate::web::stream::WebState;

pub fn create_router(state: WebState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/alerts", get(get_alerts))
        .route("/api/panic", post(trigger_panic))
        .route("/api/safe", post(mark_safe))
        .route("/api/identity", axum::routing::put(update_identity))
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/contacts", post(add_contact))
        .route(
            "/api/contacts/{id}",
            axum::routing::put(update_contact).delete(remove_contact),
        )
        .route("/api/contacts/{id}/toggle", post(toggle_contact))
        .route("/api/login", post(login))
        .route("/api/insights", post(get_insights))
        .route("/ws", get(crate::web::stream::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::VersionConflict { .. } => StatusCode::CONFLICT,
        StoreError::UnknownContact(_) => StatusCode::NOT_FOUND,
        StoreError::EmptyField(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::Decode(_) | StoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn get_state(State(state): State<WebState>) -> Json<UserState> {
    Json(state.store.state())
}

async fn get_alerts(State(state): State<WebState>) -> Json<Vec<Alert>> {
    Json(state.store.alerts())
}

#[derive(Debug, Deserialize)]
struct PanicRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PanicResponse {
    /// False when an emergency was already active (the trigger is
    /// idempotent and appended nothing).
    pub triggered: bool,
    pub state: UserState,
}

async fn trigger_panic(
    State(state): State<WebState>,
    Json(request): Json<PanicRequest>,
) -> Json<PanicResponse> {
    let reason = request
        .reason
        .unwrap_or_else(|| MANUAL_PANIC_REASON.to_string());
    let now = Utc::now();
    let (snapshot, alert) = {
        let mut monitor = state.monitor.lock().unwrap();
        let alert = monitor.trigger_emergency(reason, now);
        (monitor.snapshot(now), alert)
    };
    let triggered = alert.is_some();
    if let Some(alert) = alert {
        state.store.push_alert(alert);
    }
    state.store.publish_state(snapshot.clone());
    Json(PanicResponse {
        triggered,
        state: snapshot,
    })
}

async fn mark_safe(State(state): State<WebState>) -> Json<UserState> {
    let now = Utc::now();
    let snapshot = {
        let mut monitor = state.monitor.lock().unwrap();
        monitor.mark_safe();
        monitor.snapshot(now)
    };
    state.store.publish_state(snapshot.clone());
    Json(snapshot)
}

#[derive(Debug, Deserialize)]
struct IdentityRequest {
    user_id: String,
    #[serde(default)]
    user_name: Option<String>,
}

/// Edit the monitored user's id and display name. The change carries
/// into every subsequent state and alert record and is written through
/// to the snapshot file.
async fn update_identity(
    State(state): State<WebState>,
    Json(request): Json<IdentityRequest>,
) -> Result<Json<UserState>, (StatusCode, String)> {
    if request.user_id.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "user id must not be empty".to_string(),
        ));
    }
    let user_name = request.user_name.filter(|n| !n.trim().is_empty());
    let now = Utc::now();
    let snapshot = {
        let mut monitor = state.monitor.lock().unwrap();
        monitor.set_identity(request.user_id, user_name);
        monitor.snapshot(now)
    };
    state.store.publish_identity(snapshot.clone());
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsEnvelope {
    /// Version for compare-and-set updates; echo it back in PUT to
    /// detect a racing editor.
    pub version: u64,
    #[serde(flatten)]
    pub settings: AdminSettings,
}

#[derive(Debug, Deserialize)]
struct UpdateSettingsRequest {
    #[serde(default)]
    version: Option<u64>,
    #[serde(flatten)]
    settings: AdminSettings,
}

async fn get_settings(State(state): State<WebState>) -> Json<SettingsEnvelope> {
    let (version, settings) = state.store.settings();
    Json(SettingsEnvelope { version, settings })
}

async fn update_settings(
    State(state): State<WebState>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsEnvelope>, (StatusCode, String)> {
    match state
        .store
        .update_settings(request.settings, request.version)
    {
        Ok(version) => {
            let (_, settings) = state.store.settings();
            Ok(Json(SettingsEnvelope { version, settings }))
        }
        Err(e) => Err((error_status(&e), e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct ContactRequest {
    name: String,
    phone: String,
}

async fn add_contact(
    State(state): State<WebState>,
    Json(request): Json<ContactRequest>,
) -> Result<(StatusCode, Json<EmergencyContact>), (StatusCode, String)> {
    state
        .store
        .add_contact(request.name, request.phone)
        .map(|contact| (StatusCode::CREATED, Json(contact)))
        .map_err(|e| (error_status(&e), e.to_string()))
}

async fn update_contact(
    State(state): State<WebState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ContactRequest>,
) -> Result<Json<EmergencyContact>, (StatusCode, String)> {
    state
        .store
        .update_contact(id, request.name, request.phone)
        .map(Json)
        .map_err(|e| (error_status(&e), e.to_string()))
}

async fn remove_contact(
    State(state): State<WebState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .store
        .remove_contact(id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (error_status(&e), e.to_string()))
}

async fn toggle_contact(
    State(state): State<WebState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmergencyContact>, (StatusCode, String)> {
    state
        .store
        .toggle_contact(id)
        .map(Json)
        .map_err(|e| (error_status(&e), e.to_string()))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared-password gate for the admin view. Mutating routes are not
/// session-gated; the gate only answers whether the editor may be
/// shown, exactly as broad as the demo it fronts.
async fn login(
    State(state): State<WebState>,
    Json(request): Json<LoginRequest>,
) -> Json<LoginResponse> {
    if state.admin_passwords.contains(&request.password) {
        Json(LoginResponse {
            authenticated: true,
            error: None,
        })
    } else {
        Json(LoginResponse {
            authenticated: false,
            error: Some("Invalid credentials.".to_string()),
        })
    }
}

async fn get_insights(
    State(state): State<WebState>,
) -> Result<Json<InsightReport>, (StatusCode, String)> {
    let Some(location) = state.store.state().location else {
        return Err((
            StatusCode::BAD_REQUEST,
            "no location fix available".to_string(),
        ));
    };
    Ok(Json(
        state
            .insights
            .analyze_surroundings(location.lat, location.lng)
            .await,
    ))
}
