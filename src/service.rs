//! Service wiring: listeners, background tasks, and graceful shutdown.

use crate::api::{self, AppState};
use crate::domain::config::Config;
use crate::domain::error::ServiceError;
use crate::firehose::FirehoseClient;
use crate::metrics::Metrics;
use crate::subscription::{Reaper, SubscriptionManager};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// The assembled broker: registry, metrics, and configuration, ready to
/// serve.
pub struct PubSubService {
    config: Config,
    manager: Arc<SubscriptionManager>,
    metrics: Arc<Metrics>,
}

impl PubSubService {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|e| ServiceError::Config(e.to_string()))?;

        let metrics = Arc::new(Metrics::new()?);
        let manager = Arc::new(SubscriptionManager::new(
            &config.subscriptions,
            Arc::clone(&metrics),
        ));

        Ok(Self {
            config,
            manager,
            metrics,
        })
    }

    /// The subscription registry, for embedding or tests.
    pub fn manager(&self) -> Arc<SubscriptionManager> {
        Arc::clone(&self.manager)
    }

    /// Serve until the shutdown future resolves, then drain everything.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServiceError> {
        let reaper = Reaper::spawn(
            Arc::clone(&self.manager),
            self.config.subscriptions.cleanup_interval,
        );

        let firehose = if self.config.firehose.enabled {
            let client = FirehoseClient::new(
                self.config.firehose.clone(),
                Arc::clone(&self.manager),
                Arc::clone(&self.metrics),
            );
            Some(client.spawn())
        } else {
            info!("firehose ingest disabled; running API-only");
            None
        };

        let state = AppState {
            manager: Arc::clone(&self.manager),
            metrics: Arc::clone(&self.metrics),
            ws_config: self.config.subscriptions.clone(),
        };
        let app = api::router(state, &self.config.server.cors);
        let metrics_app = api::metrics_router(Arc::clone(&self.metrics));

        let addr = self.config.server_addr();
        let listener = TcpListener::bind(addr).await.map_err(ServiceError::Bind)?;
        info!(%addr, "starting API server");

        let metrics_addr = self.config.metrics_addr();
        let metrics_listener = TcpListener::bind(metrics_addr)
            .await
            .map_err(ServiceError::Bind)?;
        info!(addr = %metrics_addr, "starting metrics server");

        // Fan the single shutdown future out to both listeners.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        });

        let mut metrics_rx = shutdown_rx.clone();
        let metrics_server = tokio::spawn(async move {
            let serve = axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move {
                    let _ = metrics_rx.changed().await;
                });
            if let Err(error) = serve.await {
                error!(%error, "metrics server error");
            }
        });

        let mut api_rx = shutdown_rx;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_rx.changed().await;
            })
            .await
            .map_err(ServiceError::Server)?;

        // Listener is drained; take down the background tasks and the
        // registry in shutdown order.
        if let Some(firehose) = firehose {
            firehose.stop().await;
        }
        reaper.stop().await;
        self.manager.shutdown().await;
        let _ = metrics_server.await;

        info!("shutdown complete");
        Ok(())
    }
}
