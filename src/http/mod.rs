//! HTTP binding. Thin: every handler delegates to the core components.

pub mod error;
pub mod health;
pub mod queues;
pub mod tasks;

use std::sync::Arc;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{delete, get, post};

use crate::admission::Admission;
use crate::broker::Broker;
use crate::cancel::CancelCoordinator;
use crate::config::JobSettings;
use crate::lanes::QueueAdmin;
use crate::registry::Registry;
use crate::task::TaskCatalog;

/// Shared application state passed to every route handler.
pub struct AppState {
    pub broker: Broker,
    pub admission: Admission,
    pub registry: Registry,
    pub cancel: CancelCoordinator,
    pub admin: QueueAdmin,
}

impl AppState {
    pub fn new(broker: Broker, catalog: Arc<TaskCatalog>, settings: JobSettings) -> Self {
        let registry = Registry::new(Arc::clone(&broker.store), settings.clone());
        Self {
            admission: Admission::new(&broker, catalog, settings.clone()),
            cancel: CancelCoordinator::new(Arc::clone(&broker.store), registry.clone()),
            admin: QueueAdmin::new(&broker, settings),
            registry,
            broker,
        }
    }
}

/// Build the API router with the provided shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/tasks", post(tasks::create))
        .route("/tasks/a", post(tasks::create_a))
        .route("/tasks/b", post(tasks::create_b))
        .route("/tasks/{job_id}", get(tasks::get).delete(tasks::cancel))
        .route("/queues", get(queues::list))
        .route("/queues/{lane}/purge", delete(queues::purge))
        .layer(Extension(state))
}
