pub mod config;
pub mod engine;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::trace::TraceLayer;

use config::Config;
use engine::TransitionExecutor;
use services::notify::{NotificationSender, SmtpNotifier};
use services::processor::ProcessorClient;
use services::store::{InvoiceStore, PostgresStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InvoiceStore>,
    pub executor: Arc<TransitionExecutor>,
    pub processor: ProcessorClient,
    pub config: Config,
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store = PostgresStore::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        store.run_migrations().await?;

        let notifier = SmtpNotifier::new(config.smtp.clone())?;
        if notifier.is_enabled() {
            tracing::info!("SMTP notifier initialized");
        } else {
            tracing::warn!("SMTP disabled - send notifications will be recorded as failed");
        }

        Self::build_with(config, Arc::new(store), Arc::new(notifier))
    }

    /// Assemble the application around explicit collaborators. Tests use
    /// this with the in-memory store and the mock notifier.
    pub fn build_with(
        config: Config,
        store: Arc<dyn InvoiceStore>,
        notifier: Arc<dyn NotificationSender>,
    ) -> anyhow::Result<Self> {
        services::init_metrics();

        let processor = ProcessorClient::new(config.processor.clone());
        if processor.is_configured() {
            tracing::info!(processor = %processor.name(), "Processor webhook client initialized");
        } else {
            tracing::warn!("Processor webhook secret not configured - webhooks will be rejected");
        }

        let executor = Arc::new(TransitionExecutor::new(
            store.clone(),
            notifier,
            processor.name(),
        ));

        let state = AppState {
            store,
            executor,
            processor,
            config: config.clone(),
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics))
            // Accounts
            .route("/accounts", post(handlers::accounts::create_account))
            .route("/account", get(handlers::accounts::get_account))
            // Invoice CRUD
            .route(
                "/invoices",
                get(handlers::invoices::list_invoices).post(handlers::invoices::create_invoice),
            )
            .route(
                "/invoices/:id",
                get(handlers::invoices::get_invoice)
                    .put(handlers::invoices::update_invoice)
                    .delete(handlers::invoices::soft_delete_invoice),
            )
            // Transitions
            .route("/invoices/:id/send", post(handlers::invoices::send_invoice))
            .route(
                "/invoices/:id/pay",
                post(handlers::invoices::mark_invoice_paid),
            )
            .route(
                "/invoices/:id/refund",
                post(handlers::invoices::refund_invoice),
            )
            .route(
                "/invoices/:id/restore",
                post(handlers::invoices::restore_invoice),
            )
            .route(
                "/invoices/:id/events",
                get(handlers::invoices::list_invoice_events),
            )
            // Processor callbacks
            .route("/webhooks/processor", post(handlers::webhook::processor_webhook))
            .layer(from_fn(security_headers_middleware))
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            port: config.server.port,
            router,
        })
    }

    /// The assembled router, for in-process testing without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }
}
