use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use axum::{
    Form, Json, Router,
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{HeaderName, header, request::Parts},
    response::IntoResponse,
    routing::{get, post},
};
use platform_api::{ApiError, ApiResult};
use platform_db::DbPool;
use products_hr::{Employee, EmployeeFilter, ListParams, apply_import, list_employees, plan_import};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

const LIST_FAILED: &str = "DB error";
const UPLOAD_FAILED: &str = "Upload failed, no changes applied";
const BAD_QUERY: &str = "Invalid query params";

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "salary server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route("/users", get(list_users_handler))
        .route("/upload", post(upload_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct ListResponse {
    results: Vec<Employee>,
}

/// `Query<ListParams>` with its rejection rendered as a JSON error.
struct ListQuery(ListParams);

impl<S> FromRequestParts<S> for ListQuery
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<ListParams>::from_request_parts(parts, state).await {
            Ok(Query(params)) => Ok(Self(params)),
            Err(err) => {
                info!(reason = %err.body_text(), "query string rejected");
                Err(ApiError::InvalidParameter(BAD_QUERY.to_string()))
            }
        }
    }
}

async fn list_users_handler(
    State(state): State<AppState>,
    ListQuery(params): ListQuery,
) -> ApiResult<Json<ListResponse>> {
    let filter = EmployeeFilter::try_from(&params)?;
    let results = list_employees(&state.pool, &filter)
        .await
        .map_err(|err| ApiError::storage(LIST_FAILED, err))?;
    Ok(Json(ListResponse { results }))
}

#[derive(Debug, Default, Deserialize)]
struct UploadForm {
    file: Option<String>,
}

/// Upload body decoded from JSON or from a urlencoded form, picked by content type.
struct UploadBody(UploadForm);

impl<S> FromRequest<S> for UploadBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        let decoded = if is_json {
            Json::<UploadForm>::from_request(req, state)
                .await
                .map(|Json(form)| form)
                .map_err(|err| err.body_text())
        } else {
            Form::<UploadForm>::from_request(req, state)
                .await
                .map(|Form(form)| form)
                .map_err(|err| err.body_text())
        };
        match decoded {
            Ok(form) => Ok(Self(form)),
            Err(reason) => {
                info!(%reason, "upload body rejected");
                Err(products_hr::ImportError::MissingFile.into())
            }
        }
    }
}

#[derive(Serialize)]
struct UploadResponse {
    success: u8,
}

async fn upload_handler(
    State(state): State<AppState>,
    UploadBody(form): UploadBody,
) -> ApiResult<Json<UploadResponse>> {
    let plan = plan_import(form.file.as_deref())?;
    if !plan.skipped.is_empty() {
        info!(
            skipped = plan.skipped.len(),
            "skipping rows with negative salaries"
        );
    }
    apply_import(&state.pool, &plan.rows)
        .await
        .map_err(|err| ApiError::storage(UPLOAD_FAILED, err))?;
    info!(rows = plan.rows.len(), "salary upload applied");
    Ok(Json(UploadResponse { success: 1 }))
}

/// `ok` means the process is serving; `db_ok` reports the pool.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = platform_db::ping(&state.pool).await;
    Json(HealthResponse {
        ok: true,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
