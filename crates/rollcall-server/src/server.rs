use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use rollcall_directory::{AuthProvider, Directory, MemoryAuthProvider, MemoryDirectory};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::{AppConfig, ConfigError},
    handlers,
    middleware as app_middleware,
    state::AppState,
    sweeper::Sweeper,
};

pub struct RollcallServer {
    addr: SocketAddr,
    config: AppConfig,
    state: AppState,
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/clients/check-phone", post(handlers::check_phone))
        .route("/guests", post(handlers::create_guest))
        .route("/guests/async", post(handlers::create_guest_async))
        .route("/status/{key}", get(handlers::processing_status))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route("/metrics", get(handlers::metrics_json))
        .route("/metrics/prometheus", get(handlers::metrics_prometheus))
        // Rate limiting runs before any handler
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::rate_limit,
        ))
        // Outermost first: body limit -> request id -> trace -> compression/cors -> metrics
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(body_limit))
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<axum::http::HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("")
                                .to_string();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = Empty,
                                request_id = %req_id
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(app_middleware::track_metrics)),
        )
        .with_state(state)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    directory: Option<Arc<dyn Directory>>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            directory: None,
            auth_provider: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Validate the config and wire the components. Collaborators not
    /// supplied fall back to the in-memory implementations.
    pub fn build(self) -> Result<RollcallServer, ConfigError> {
        self.config.validate()?;

        let directory = self.directory.unwrap_or_else(|| {
            tracing::warn!("no directory configured, using in-memory directory");
            Arc::new(MemoryDirectory::new())
        });
        let auth_provider = self.auth_provider.unwrap_or_else(|| {
            tracing::warn!("no auth provider configured, using in-memory provider");
            Arc::new(MemoryAuthProvider::new())
        });

        let state = AppState::new(&self.config, directory, auth_provider);
        Ok(RollcallServer {
            addr: self.addr,
            config: self.config,
            state,
        })
    }
}

impl RollcallServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, running the sweeper
    /// for the lifetime of the server.
    pub async fn serve<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sweeper = Sweeper::start(self.state.sweep_targets(&self.config));
        let app = build_app(self.state, &self.config);

        tracing::info!("listening on {}", listener.local_addr()?);
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        sweeper.shutdown().await;
        tracing::info!("server stopped");
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
