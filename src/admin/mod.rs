//! Operator API.
//!
//! Every route sits behind bearer-token auth. Handlers only read from or
//! delegate to the pipeline components; no admin call changes request
//! admission except manual block and unblock.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::pipeline::AdmissionPipeline;

#[derive(Clone)]
pub struct AdminState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(pipeline: Arc<AdmissionPipeline>, api_key: &str) -> Self {
        Self {
            pipeline,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/events", get(list_events).post(submit_event))
        .route("/admin/events/export", get(export_events))
        .route("/admin/alerts", get(list_alerts))
        .route("/admin/alerts/{id}/resolve", post(resolve_alert))
        .route("/admin/blocks", get(list_blocks).post(create_block))
        .route("/admin/blocks/history", get(block_history))
        .route("/admin/blocks/{ip}/unblock", post(unblock))
        .route("/admin/violations/{ip}", get(get_violations))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
