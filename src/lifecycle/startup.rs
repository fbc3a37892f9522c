//! Startup orchestration.
//!
//! # Order
//! 1. Observability (logging first, then the metrics exporter)
//! 2. Stores, then the pipeline
//! 3. Background tasks: event flusher, maintenance, load monitor, watcher
//! 4. Listeners last, so traffic only arrives once everything is wired
//!
//! Any error before the listeners bind is fatal.

use metrics_exporter_prometheus::BuildError;
use notify::RecommendedWatcher;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::util::TryInitError;

use crate::admin::{setup_admin_router, AdminState};
use crate::clock::{Clock, SystemClock};
use crate::config::schema::{GuardConfig, StoreBackend, StoreConfig};
use crate::config::watcher::ConfigWatcher;
use crate::config::ConfigError;
use crate::http::HttpServer;
use crate::lifecycle::maintenance::Maintenance;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_signal;
use crate::observability::{logging, metrics};
use crate::pipeline::{AdmissionPipeline, Stores};
use crate::store::{MemoryBlockRegistry, MemoryCounterStore, MemoryViolationLog, RedisStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store initialisation failed: {0}")]
    Store(#[from] StoreError),

    #[error("logging initialisation failed: {0}")]
    Logging(#[from] TryInitError),

    #[error("metrics exporter failed: {0}")]
    Metrics(#[from] BuildError),

    #[error("invalid {field} address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("config watcher failed: {0}")]
    Watcher(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stores plus the handle maintenance needs on the memory backend.
pub struct StoreWiring {
    pub stores: Stores,
    pub memory_counters: Option<Arc<MemoryCounterStore>>,
}

/// Build the configured backend.
pub async fn build_stores(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<StoreWiring, StartupError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!(
                "Using in-memory stores; limits and blocks are per-process and not shared across instances"
            );
            let counters = Arc::new(MemoryCounterStore::new(clock.clone()));
            Ok(StoreWiring {
                stores: Stores {
                    counters: counters.clone(),
                    violations: Arc::new(MemoryViolationLog::new()),
                    blocks: Arc::new(MemoryBlockRegistry::new(clock)),
                },
                memory_counters: Some(counters),
            })
        }
        StoreBackend::Redis => {
            // Validation guarantees the URL for this backend.
            let url = config.redis_url.as_deref().unwrap_or_default();
            let redis = Arc::new(RedisStore::connect(url, config.key_prefix.clone()).await?);
            tracing::info!(prefix = %config.key_prefix, "Connected to Redis store");
            Ok(StoreWiring {
                stores: Stores {
                    counters: redis.clone(),
                    violations: redis.clone(),
                    blocks: redis,
                },
                memory_counters: None,
            })
        }
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// A wired pipeline with its background tasks running.
pub struct Running {
    pub pipeline: Arc<AdmissionPipeline>,
    pub shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Running {
    /// Trigger shutdown and wait for every background task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::error!(error = %error, "Background task failed");
            }
        }
    }
}

/// Wire the pipeline and spawn background tasks.
pub async fn start(config: &GuardConfig, config_path: Option<&Path>) -> Result<Running, StartupError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let wiring = build_stores(&config.store, clock.clone()).await?;
    let pipeline = Arc::new(AdmissionPipeline::new(config, wiring.stores, clock)?);
    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(pipeline.events().clone().run(shutdown.subscribe())));

    let maintenance = Maintenance::new(
        pipeline.clone(),
        wiring.memory_counters,
        Duration::from_secs(config.blocking.sweep_interval_secs.max(1)),
    );
    tasks.push(tokio::spawn(maintenance.run(shutdown.subscribe())));

    if config.rate_limit.adaptive.enabled {
        let interval = Duration::from_secs(config.rate_limit.adaptive.sample_interval_secs.max(1));
        tasks.push(tokio::spawn(pipeline.load_monitor().clone().run(interval, shutdown.subscribe())));
    }

    let watcher = match config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let reload_pipeline = pipeline.clone();
            let mut stop = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = updates.recv() => match update {
                            Some(new_config) => {
                                if let Err(error) = reload_pipeline.apply_config(&new_config) {
                                    tracing::error!(error = %error, "Rejected config reload, keeping current policy");
                                }
                            }
                            None => break,
                        },
                        _ = stop.recv() => {
                            tracing::info!("Config reload task received shutdown signal, exiting loop");
                            break;
                        }
                    }
                }
            }));
            Some(handle)
        }
        None => None,
    };

    tracing::info!(
        backend = pipeline.status().store_backend,
        rate_limiting = config.rate_limit.enabled,
        blocking = config.blocking.enabled,
        "Admission pipeline ready"
    );

    Ok(Running {
        pipeline,
        shutdown,
        tasks,
        _watcher: watcher,
    })
}

/// Run the service until SIGINT or SIGTERM.
pub async fn run(config: GuardConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "admission-guard starting");

    if config.observability.metrics_enabled {
        let addr = parse_addr("metrics", &config.observability.metrics_address)?;
        metrics::init_metrics(addr)?;
    }

    let running = start(&config, config_path.as_deref()).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(&config, running.pipeline.clone());
    let mut servers = vec![tokio::spawn({
        let shutdown = running.shutdown.subscribe();
        async move {
            if let Err(error) = server.run(listener, shutdown).await {
                tracing::error!(error = %error, "HTTP server failed");
            }
        }
    })];

    if config.admin.enabled {
        let addr = parse_addr("admin", &config.admin.bind_address)?;
        let admin_listener = TcpListener::bind(addr).await?;
        let router = setup_admin_router(AdminState::new(running.pipeline.clone(), &config.admin.api_key));
        let mut shutdown = running.shutdown.subscribe();
        tracing::info!(address = %addr, "Admin API starting");
        servers.push(tokio::spawn(async move {
            let served = axum::serve(admin_listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.recv().await;
                })
                .await;
            if let Err(error) = served {
                tracing::error!(error = %error, "Admin API failed");
            }
        }));
    }

    wait_for_signal(&running.shutdown).await;

    for server in servers {
        let _ = server.await;
    }
    running.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
