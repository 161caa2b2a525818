use crate::admin_client::AdminServiceClient;
use crate::change_handler::ChangeHandler;
use crate::config::Config;
use crate::matcher::Matcher;
use crate::notifier::ReleaseMessagePoller;
use crate::scanner::{ScanError, ScanStats, Scanner};
use crate::source::RuleRecordSource;
use crate::store::RuleCacheStore;
use crate::types::ReleaseId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct EngineInner {
    store: Arc<RuleCacheStore>,
    scanner: Scanner,
    change_handler: Arc<ChangeHandler>,
    // Initially false and set to true once a full scan has completed.
    ready: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineInner {
    async fn scan_pass(&self) -> Result<ScanStats, ScanError> {
        let stats = self.scanner.scan(&self.shutdown_rx).await?;
        self.ready.store(true, Ordering::Relaxed);
        Ok(stats)
    }
}

/// Serves gray release decisions from memory while keeping the rule indices in sync
/// with the source of truth.
#[derive(Clone)]
pub struct GrayReleaseEngine {
    inner: Arc<EngineInner>,
}

impl GrayReleaseEngine {
    /// Runs the first full scan before returning, then keeps scanning every
    /// `scan_interval` in the background. When a poller is given, the engine's change
    /// handler is registered on it and it is run until shutdown.
    pub async fn start(
        scan_interval: Duration,
        rule_source: Arc<dyn RuleRecordSource>,
        poller: Option<ReleaseMessagePoller>,
    ) -> Self {
        let store = Arc::new(RuleCacheStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(EngineInner {
            scanner: Scanner::new(store.clone(), rule_source.clone()),
            change_handler: Arc::new(ChangeHandler::new(store.clone(), rule_source)),
            store,
            ready: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        });

        if inner.scan_pass().await.is_err() {
            tracing::warn!("initial gray release rule scan failed, serving without gray rules");
        }

        let mut tasks = Vec::new();

        let worker_inner = inner.clone();
        tasks.push(tokio::spawn(async move {
            run_scan_worker(worker_inner, scan_interval).await;
        }));

        if let Some(mut poller) = poller {
            poller.add_listener(inner.change_handler.clone());
            tasks.push(tokio::spawn(poller.run(inner.shutdown_rx.clone())));
        }

        *inner.tasks.lock().unwrap_or_else(|p| p.into_inner()) = tasks;

        GrayReleaseEngine { inner }
    }

    /// Starts an engine backed by the admin service described in `config`.
    pub async fn from_config(config: &Config) -> Self {
        let client = Arc::new(AdminServiceClient::new(config.admin_service.url.clone()));
        let poller = config
            .release_messages
            .enabled
            .then(|| {
                ReleaseMessagePoller::new(client.clone(), config.release_messages.poll_interval())
            });

        Self::start(config.scan_interval(), client, poller).await
    }

    pub fn lookup_release(
        &self,
        client_app_id: &str,
        client_ip: &str,
        client_label: &str,
        app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Option<ReleaseId> {
        self.inner
            .store
            .lookup_release(client_app_id, client_ip, client_label, app_id, cluster, namespace)
    }

    pub fn has_gray_rule(
        &self,
        client_app_id: &str,
        client_ip: &str,
        client_label: &str,
        namespace: &str,
    ) -> bool {
        self.inner
            .store
            .has_gray_rule(client_app_id, client_ip, client_label, namespace)
    }

    pub fn matcher(&self) -> Matcher {
        Matcher::new(self.inner.store.clone())
    }

    /// Handler to subscribe to an external release notification transport.
    pub fn change_handler(&self) -> Arc<ChangeHandler> {
        self.inner.change_handler.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    /// Runs a full scan now. Fails with `ScanError::InProgress` if one is running.
    pub async fn refresh(&self) -> Result<ScanStats, ScanError> {
        let stopped = *self.inner.shutdown_rx.borrow();
        if stopped {
            return Err(ScanError::Cancelled);
        }
        self.inner.scan_pass().await
    }

    /// Stops the background tasks, interrupting a scan in progress, and waits for them.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!("engine task panicked: {err}");
            }
        }
    }
}

/// Waits `interval` after each pass finishes before starting the next one.
async fn run_scan_worker(inner: Arc<EngineInner>, interval: Duration) {
    let mut shutdown = inner.shutdown_rx.clone();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        }

        match inner.scan_pass().await {
            Err(ScanError::InProgress) => {
                tracing::debug!("scan already in progress, skipping scheduled scan");
            }
            Err(ScanError::Cancelled) => break,
            // Logged by the scanner
            _ => {}
        }
    }
    tracing::info!("gray release rule scanner stopped");
}
