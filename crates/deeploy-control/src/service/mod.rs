//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use deeploy_state::{BlobBackend, KvBackend, MemoryBlob, MemoryKv, StateProvider};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api;
use crate::clock::SystemClock;
use crate::config::DeeployConfig;
use crate::engine::{Collaborators, DeeployEngine};
use crate::error::{ControlError, ControlResult};
use crate::fleet::{FleetClient, FleetView, MemoryFleet};
use crate::ledger::{Ledger, LedgerClient, MemoryLedger};
use crate::pending::{MemoryPendingStore, PostponedRequestScheduler};

/// The orchestration service.
///
/// Wires the gateways and state backends into a [`DeeployEngine`], serves the
/// HTTP API and reaps abandoned postponed requests until shutdown.
pub struct DeeployService {
    config: DeeployConfig,
    cancel: CancellationToken,
}

impl DeeployService {
    #[must_use]
    pub fn new(config: DeeployConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(&self) -> ControlResult<()> {
        let parts = self.collaborators().await?;
        let engine = Arc::new(DeeployEngine::new(
            &parts,
            Arc::new(MemoryPendingStore::new()),
            &self.config,
        ));
        info!(
            strategy = %self.config.deployment.update_strategy,
            "deeploy engine initialised"
        );

        let sweeper = tokio::spawn(sweep_loop(
            engine.scheduler().clone(),
            self.config.pending.sweep_interval(),
            self.cancel.clone(),
        ));

        let app = api::router(api::AppState { engine });

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
        info!(listen_addr = %self.config.server.listen_addr, "deeploy service listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::Config(format!("server error: {e}")))?;

        self.cancel.cancel();
        if let Err(e) = sweeper.await {
            error!(error = %e, "sweeper task failed");
        }

        info!("deeploy service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn collaborators(&self) -> ControlResult<Collaborators> {
        let ledger: Arc<dyn Ledger> = match &self.config.ledger.url {
            Some(url) => {
                info!(url = %url, "ledger gateway configured");
                Arc::new(LedgerClient::new(url, &self.config.ledger)?)
            }
            None => {
                warn!("no ledger gateway configured, using in-memory ledger");
                Arc::new(MemoryLedger::new())
            }
        };

        let fleet: Arc<dyn FleetView> = match &self.config.fleet.url {
            Some(url) => {
                info!(url = %url, "fleet gateway configured");
                Arc::new(FleetClient::new(url, &self.config.fleet)?)
            }
            None => {
                warn!("no fleet gateway configured, using in-memory fleet");
                Arc::new(MemoryFleet::new())
            }
        };

        let (kv, blob) = self.create_state().await;

        Ok(Collaborators {
            fleet,
            ledger,
            kv,
            blob,
            clock: Arc::new(SystemClock),
        })
    }

    async fn create_state(&self) -> (Arc<dyn KvBackend>, Arc<dyn BlobBackend>) {
        let provider = match StateProvider::from_config(&self.config.state).await {
            Ok(provider) => provider,
            Err(e) => {
                error!(error = %e, "failed to initialise state backends, using in-memory state");
                StateProvider::new()
            }
        };

        let kv = provider.kv().unwrap_or_else(|e| {
            info!(error = %e, "chainstore not configured, using in-memory store");
            Arc::new(MemoryKv::new())
        });
        let blob = provider.blob().unwrap_or_else(|e| {
            info!(error = %e, "blob store not configured, using in-memory store");
            Arc::new(MemoryBlob::new())
        });
        (kv, blob)
    }
}

/// Periodically reap postponed requests whose caller went away.
async fn sweep_loop(
    scheduler: PostponedRequestScheduler,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match scheduler.sweep().await {
            Ok(reaped) => {
                for (pending_id, envelope) in reaped {
                    warn!(%pending_id, status = %envelope.status, "abandoned request reaped");
                }
            }
            Err(e) => error!(error = %e, "pending sweep failed"),
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn service_creation() {
        let service = DeeployService::new(DeeployConfig::default());
        assert!(!service.cancel.is_cancelled());
    }

    #[test]
    fn service_shutdown() {
        let service = DeeployService::new(DeeployConfig::default());
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn unconfigured_gateways_fall_back_to_memory() {
        let service = DeeployService::new(DeeployConfig::default());
        let parts = service.collaborators().await.unwrap();
        assert!(parts.fleet.nodes().await.unwrap().is_empty());
        assert!(parts.ledger.oracles().await.unwrap().is_empty());
        assert!(parts.kv.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_loop_stops_on_cancel() {
        let parts = Collaborators::in_memory();
        let scheduler = PostponedRequestScheduler::new(
            Arc::new(MemoryPendingStore::new()),
            parts.kv,
            parts.ledger,
            parts.clock,
            std::time::Duration::from_millis(10),
            std::time::Duration::from_secs(1),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sweep_loop(
            scheduler,
            std::time::Duration::from_millis(5),
            cancel.clone(),
        ));
        cancel.cancel();
        task.await.unwrap();
    }
}
