//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the observation registry and meter registry from config
//! - Register the metrics dump as a teardown hook
//! - Run the configured role, then tear down
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Handler groups are registered before the registry is shared
//! - Teardown runs after the server has drained or the client call returned

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, ObservabilityConfig, Role};
use crate::error::AppError;
use crate::http::{HttpServer, ObservedClient};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::{
    DefaultTracingHandler, LoggingSpanReporter, MeterHandler, MeterRegistry, MetricsDumper,
    ReceiverTracingHandler, SenderTracingHandler, SpanReporter,
};
use crate::observation::{HandlerGroup, ObservationRegistry};

/// Everything the observed code paths share.
#[derive(Clone)]
pub struct Observability {
    pub registry: Arc<ObservationRegistry>,
    pub meters: Arc<MeterRegistry>,
    pub dumper: Arc<MetricsDumper>,
    dump_on_shutdown: bool,
}

impl Observability {
    /// Wire the handler groups with spans logged through `tracing`.
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::with_reporter(config, Arc::new(LoggingSpanReporter))
    }

    /// Wire the handler groups with a custom span reporter.
    ///
    /// Groups, in order: `[meter]`, then first-matching
    /// `[sender, receiver, default]`.
    pub fn with_reporter(config: &ObservabilityConfig, reporter: Arc<dyn SpanReporter>) -> Self {
        let meters = Arc::new(MeterRegistry::new());
        let mut registry = ObservationRegistry::new();

        if config.metrics_enabled {
            registry.register(HandlerGroup::single(Arc::new(MeterHandler::new(meters.clone()))));
        }
        if config.tracing_enabled {
            registry.register(HandlerGroup::first_matching(vec![
                Arc::new(SenderTracingHandler::new(reporter.clone())),
                Arc::new(ReceiverTracingHandler::new(reporter.clone())),
                Arc::new(DefaultTracingHandler::new(reporter)),
            ]));
        }

        if !config.ignored_uris.is_empty() {
            let ignored = config.ignored_uris.clone();
            registry.observation_predicate(move |observation| {
                observation
                    .low_cardinality()
                    .get("uri")
                    .map_or(true, |uri| !ignored.iter().any(|ignored| ignored == uri))
            });
        }
        if !config.common_tags.is_empty() {
            let tags = config.common_tags.clone();
            registry.observation_filter(move |observation| {
                for (key, value) in &tags {
                    observation.add_low_cardinality(key.clone(), value.clone());
                }
            });
        }

        tracing::info!(
            groups = registry.groups().len(),
            metrics = config.metrics_enabled,
            tracing = config.tracing_enabled,
            "Observation registry configured"
        );

        let dumper = Arc::new(MetricsDumper::new(meters.clone()));
        Self {
            registry: Arc::new(registry),
            meters,
            dumper,
            dump_on_shutdown: config.dump_on_shutdown,
        }
    }

    /// Register the stdout metrics dump with `shutdown`, if enabled.
    pub fn install_dump(&self, shutdown: &Shutdown) {
        if !self.dump_on_shutdown {
            return;
        }
        let dumper = self.dumper.clone();
        shutdown.on_teardown("metrics-dump", move || {
            dumper.dump_to_stdout();
        });
    }
}

/// Run the configured role to completion.
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let observability = Observability::from_config(&config.observability);
    let shutdown = Shutdown::new();
    observability.install_dump(&shutdown);

    let result = match config.role {
        Role::Server => run_server(&config, &observability, &shutdown).await,
        Role::Client => run_client(&config, &observability).await,
    };

    let hooks = shutdown.teardown();
    tracing::info!(hooks, "Shutdown complete");
    result
}

async fn run_server(
    config: &AppConfig,
    observability: &Observability,
    shutdown: &Shutdown,
) -> Result<(), AppError> {
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config.server.clone(), observability.registry.clone());
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));
    supervise(task, shutdown_signal(), shutdown).await
}

/// Wait for `signal` or for the server task to end on its own, whichever
/// comes first. On `signal` the server is told to drain and awaited.
async fn supervise<S>(
    mut task: JoinHandle<Result<(), std::io::Error>>,
    signal: S,
    shutdown: &Shutdown,
) -> Result<(), AppError>
where
    S: Future<Output = ()>,
{
    tokio::select! {
        _ = signal => {
            shutdown.trigger();
            task.await??;
        }
        result = &mut task => {
            tracing::error!("HTTP server exited before a shutdown signal");
            result??;
        }
    }
    Ok(())
}

async fn run_client(config: &AppConfig, observability: &Observability) -> Result<(), AppError> {
    let client = ObservedClient::new(&config.client, observability.registry.clone())?;
    let body = client.get_text(&config.client.target_url).await?;
    tracing::info!(target = %config.client.target_url, bytes = body.len(), "Received response");
    println!("{}", body);
    Ok(())
}
