//! Application startup and lifecycle management.

use crate::config::SyncServiceConfig;
use crate::error::AppError;
use crate::models::{RunStats, TransactionStatus};
use crate::repository::{
    ConnectionRepository, Database, InvoiceRepository, MatchRepository, TransactionRepository,
};
use crate::services::billing::HttpBillingClient;
use crate::services::metrics::{get_metrics, init_metrics};
use crate::services::provider::HttpProviderClient;
use crate::services::retry::RetryConfig;
use crate::services::{MatchingEngine, PaymentApplicationService, SyncScheduler};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub scheduler: Arc<SyncScheduler>,
    pub cancel: CancellationToken,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "bank-sync-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "bank-sync-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// The external trigger: run one sync invocation and return its stats.
/// Invoked by cron or an equivalent external scheduler.
async fn sync_handler(State(state): State<AppState>) -> Result<Json<RunStats>, AppError> {
    let stats = state.scheduler.run_sync(&state.cancel).await?;
    Ok(Json(stats))
}

/// Manual review: park an unmatched transaction as `ignored`, taking it
/// out of the automated matching path for good.
async fn ignore_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let transactions: &dyn TransactionRepository = state.db.as_ref();

    let transaction = transactions
        .get(transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    if TransactionStatus::from_str(&transaction.status) != TransactionStatus::Unmatched {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Only unmatched transactions can be ignored"
        )));
    }

    transactions.mark_ignored(transaction_id).await?;
    tracing::info!(transaction_id = %transaction_id, "Transaction ignored");
    Ok(StatusCode::NO_CONTENT)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SyncServiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: SyncServiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: SyncServiceConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);
        let connections: Arc<dyn ConnectionRepository> = db.clone();
        let transactions: Arc<dyn TransactionRepository> = db.clone();
        let invoices: Arc<dyn InvoiceRepository> = db.clone();
        let matches: Arc<dyn MatchRepository> = db.clone();

        let provider = Arc::new(HttpProviderClient::new(&config.provider).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build provider client: {}", e))
        })?);
        let billing = Arc::new(HttpBillingClient::new(&config.billing).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build billing client: {}", e))
        })?);

        let matching = Arc::new(MatchingEngine::new(
            transactions.clone(),
            invoices,
            matches.clone(),
            config.matching.relevance_floor,
        ));
        let applier = Arc::new(PaymentApplicationService::new(
            transactions.clone(),
            matches,
            billing,
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            connections,
            transactions,
            matching,
            applier,
            provider,
            config.matching.clone(),
            config.sync.clone(),
            RetryConfig::with_max_retries(config.provider.max_retries),
        ));

        let state = AppState {
            db,
            scheduler,
            cancel: CancellationToken::new(),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "bank-sync-service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// The run-scoped cancellation token: cancelling it stops new account
    /// processing in an in-flight sync run and shuts the server down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let cancel = self.state.cancel.clone();

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .route("/sync", post(sync_handler))
            .route(
                "/transactions/:transaction_id/ignore",
                post(ignore_transaction),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state);

        tracing::info!(
            service = "bank-sync-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}
