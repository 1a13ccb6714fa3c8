//! HTTP façade: `/status`, `/set`, `/config`. Talks to the controller and
//! device table through the `AppState` handle passed in by the daemon
//! binary, never bypassing the event loop to mutate device state from a
//! second task — this module itself only runs on the daemon's single
//! `current_thread` runtime, so the `Mutex` below is never contended.

use crate::controller::Controller;
use crate::device::DeviceTable;
use crate::error::{error_message, CoreError};
use crate::model::ModelRegistry;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AppState {
    pub devices: Arc<Mutex<DeviceTable>>,
    pub models: Arc<Mutex<ModelRegistry>>,
    pub controller: Controller,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/set", get(set))
        .route("/config", get(get_config).post(post_config))
        .with_state(state)
}

#[derive(Serialize)]
struct DeviceStatus {
    id: String,
    name: String,
    status: bool,
    commanded: bool,
    pulse_deadline: u64,
    failure: Option<&'static str>,
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.devices.lock().await;
    let body: Vec<DeviceStatus> = devices
        .iter()
        .enumerate()
        .map(|(i, d)| DeviceStatus {
            id: d.id.clone(),
            name: d.name.clone(),
            status: d.status,
            commanded: d.commanded,
            pulse_deadline: d.pulse_deadline,
            failure: state.controller.failure(&devices, i),
        })
        .collect();
    Json(body)
}

#[derive(Deserialize)]
struct SetQuery {
    point: String,
    state: String,
    #[serde(default)]
    pulse: u64,
    #[serde(default)]
    cause: String,
}

fn parse_bool_state(raw: &str) -> Option<bool> {
    match raw {
        "on" | "1" => Some(true),
        "off" | "0" => Some(false),
        _ => None,
    }
}

async fn set(State(state): State<Arc<AppState>>, Query(query): Query<SetQuery>) -> impl IntoResponse {
    let Some(target) = parse_bool_state(&query.state) else {
        return error_response(CoreError::ConfigParse("invalid state".into()));
    };

    let now = crate::eventloop::unix_now();
    let mut devices = state.devices.lock().await;
    let accepted = if query.point == "all" {
        let mut any = 0;
        for index in 0..devices.len() {
            any += state
                .controller
                .set(&mut devices, index, target, query.pulse, &query.cause, now);
        }
        any
    } else {
        let Ok(index) = query.point.parse::<usize>() else {
            return error_response(CoreError::UnknownDevice(0));
        };
        state
            .controller
            .set(&mut devices, index, target, query.pulse, &query.cause, now)
    };

    Json(serde_json::json!({ "accepted": accepted })).into_response()
}

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models = state.models.lock().await;
    Json(serde_json::json!({
        "tuya": { "models": models.models().len() }
    }))
}

async fn post_config(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let config = match crate::config::parse(&body) {
        Ok(config) => config,
        Err(e) => return error_response(e),
    };

    let mut devices = state.devices.lock().await;
    devices.merge_config(config.tuya.devices.into_iter().map(Into::into).collect());
    let mut models = state.models.lock().await;
    models.reload(config.tuya.models.into_iter().map(Into::into).collect());
    devices.resolve_control_points(&models);

    Json(serde_json::json!({ "ok": true })).into_response()
}

fn error_response(err: CoreError) -> axum::response::Response {
    let code = err.code();
    (
        axum::http::StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "code": code, "message": error_message(code) })),
    )
        .into_response()
}
