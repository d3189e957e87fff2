//! Application startup and lifecycle management.

use crate::config::ReceiptConfig;
use crate::handlers;
use crate::services::{init_metrics, MongoDb, ReceiptService, ReconcilerConfig, Stores};
use axum::{
    extract::Request,
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ReceiptConfig,
    pub service: Arc<ReceiptService>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    /// Connects to MongoDB, ensures indexes and binds the listener.
    pub async fn build(config: ReceiptConfig) -> Result<Self, AppError> {
        let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to MongoDB");
                e
            })?;
        db.initialize_indexes().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize database indexes");
            e
        })?;

        Self::build_with_stores(config, Stores::from_backend(Arc::new(db))).await
    }

    /// Builds the application on top of an existing store set.
    pub async fn build_with_stores(config: ReceiptConfig, stores: Stores) -> Result<Self, AppError> {
        init_metrics();

        let reconciler_config = ReconcilerConfig::from(&config.reconciliation);
        let state = AppState {
            config: config.clone(),
            service: Arc::new(ReceiptService::new(stores, reconciler_config)),
        };

        let app = router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            service = %config.service_name,
            version = env!("CARGO_PKG_VERSION"),
            port = port,
            "Receipt service listening"
        );

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn service(&self) -> &Arc<ReceiptService> {
        &self.state.service
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                account_number = tracing::field::Empty,
            )
        })
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route(
            "/receipts",
            get(handlers::list_receipts).post(handlers::submit_receipt),
        )
        .route("/receipts/:id/review", post(handlers::review_receipt))
        .layer(trace_layer)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
