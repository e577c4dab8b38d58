use crate::host::{InventoryHost, ReportedNode};
use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing,
};
use concepts::{LifecyclePhase, RunRecord};
use http::StatusCode;
use notifier::{DeliveryStatsSnapshot, Notifier};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use target_store::{ConfigurationStore, StoreError};
use tracing::{debug, warn};

#[derive(Clone)]
pub(crate) struct WebApiState {
    pub(crate) notifier: Notifier,
    pub(crate) store: Arc<ConfigurationStore>,
    pub(crate) host: Arc<InventoryHost>,
}

pub(crate) fn app_router(state: WebApiState) -> Router {
    Router::new()
        .nest("/v1", v1_router())
        .with_state(Arc::new(state))
}

fn v1_router() -> Router<Arc<WebApiState>> {
    Router::new()
        .route("/nodes", routing::put(nodes_put))
        .route("/runs/completed", routing::post(run_completed))
        .route("/runs/finalized", routing::post(run_finalized))
        .route("/runs/started", routing::post(run_started))
        .route("/stats", routing::get(stats_get))
        .route("/target", routing::get(target_get))
        .route("/target", routing::put(target_put))
        .route("/target/check", routing::post(target_check))
}

async fn run_started(
    state: State<Arc<WebApiState>>,
    Json(run): Json<RunRecord>,
) -> HttpResponse {
    state.notifier.on_run_started(&run, &run.job);
    HttpResponse::scheduled(LifecyclePhase::Started)
}

async fn run_completed(
    state: State<Arc<WebApiState>>,
    Json(run): Json<RunRecord>,
) -> HttpResponse {
    state.notifier.on_run_completed(&run, &run.job);
    HttpResponse::scheduled(LifecyclePhase::Completed)
}

async fn run_finalized(
    state: State<Arc<WebApiState>>,
    Json(run): Json<RunRecord>,
) -> HttpResponse {
    state.notifier.on_run_finalized(&run);
    HttpResponse::scheduled(LifecyclePhase::Finalized)
}

async fn nodes_put(
    state: State<Arc<WebApiState>>,
    Json(nodes): Json<Vec<ReportedNode>>,
) -> HttpResponse {
    let count = nodes.len();
    state.host.replace_nodes(nodes);
    HttpResponse {
        status: StatusCode::OK,
        message: format!("{count} nodes reported"),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TargetBody {
    uri: Option<String>,
}

async fn target_get(state: State<Arc<WebApiState>>) -> Json<TargetBody> {
    Json(TargetBody {
        uri: state.store.get().as_str().map(ToString::to_string),
    })
}

async fn target_put(
    state: State<Arc<WebApiState>>,
    Json(body): Json<TargetBody>,
) -> Result<HttpResponse, HttpResponse> {
    let store = state.store.clone();
    let candidate = body.uri.unwrap_or_default();
    // Persisting writes and syncs a file.
    tokio::task::spawn_blocking(move || store.update(&candidate))
        .await
        .map_err(|err| {
            warn!("Target update task failed - {err:?}");
            HttpResponse::internal_error()
        })??;
    Ok(HttpResponse {
        status: StatusCode::OK,
        message: "target updated".to_string(),
    })
}

async fn target_check(Json(body): Json<TargetBody>) -> HttpResponse {
    let candidate = body.uri.unwrap_or_default();
    match ConfigurationStore::check(&candidate) {
        Ok(()) => HttpResponse {
            status: StatusCode::OK,
            message: "valid".to_string(),
        },
        Err(err) => HttpResponse {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
        },
    }
}

async fn stats_get(state: State<Arc<WebApiState>>) -> Json<DeliveryStatsSnapshot> {
    Json(state.notifier.stats())
}

pub(crate) struct HttpResponse {
    status: StatusCode,
    message: String,
}

impl HttpResponse {
    fn scheduled(phase: LifecyclePhase) -> Self {
        debug!(%phase, "Accepted lifecycle event");
        HttpResponse {
            status: StatusCode::ACCEPTED,
            message: format!("{phase} notification scheduled"),
        }
    }

    fn internal_error() -> Self {
        HttpResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for HttpResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(if self.status.is_success() {
                json!({ "ok": self.message })
            } else {
                json!({ "err": self.message })
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for HttpResponse {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(err) => HttpResponse {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
            },
            StoreError::Persistence(err) => {
                warn!("Cannot persist the notification target - {err:?}");
                HttpResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "cannot persist the notification target".to_string(),
                }
            }
        }
    }
}
