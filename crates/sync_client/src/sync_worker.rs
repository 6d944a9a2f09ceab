use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connectivity::ConnectivityState;
use crate::coordinator::{SyncCoordinator, SyncOutcome, SyncStatus};
use crate::error::SyncErrorKind;

/// Caller side of a running `SyncWorker`
#[derive(Clone)]
pub struct SyncHandle {
    trigger_tx: mpsc::Sender<()>,
    outcome_rx: watch::Receiver<Option<SyncOutcome>>,
}

impl SyncHandle {
    /// Ask for a sync run. Requests made while one is queued are merged.
    pub fn trigger(&self) {
        if self.trigger_tx.try_send(()).is_err() {
            debug!("sync already requested");
        }
    }

    /// Latest outcome, `None` until the first run finishes
    pub fn outcomes(&self) -> watch::Receiver<Option<SyncOutcome>> {
        self.outcome_rx.clone()
    }
}

/// Runs the coordinator at start, when connectivity returns and on request
pub struct SyncWorker {
    coordinator: Arc<SyncCoordinator>,
    trigger_rx: mpsc::Receiver<()>,
    outcome_tx: watch::Sender<Option<SyncOutcome>>,
}

impl SyncWorker {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> (Self, SyncHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let worker = Self {
            coordinator,
            trigger_rx,
            outcome_tx,
        };
        let handle = SyncHandle {
            trigger_tx,
            outcome_rx,
        };
        (worker, handle)
    }

    pub async fn run(self, token: CancellationToken) -> anyhow::Result<()> {
        let SyncWorker {
            coordinator,
            mut trigger_rx,
            outcome_tx,
        } = self;

        let mut connectivity = coordinator.connectivity().subscribe();
        let mut was_online = *connectivity.borrow_and_update() == ConnectivityState::Online;

        info!("sync worker started");
        let mut retry_on_reconnect = sync_once(&coordinator, &outcome_tx).await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("sync worker stopping");
                    break;
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // A flap during a run collapses into a single change, so a
                    // run that hit the network is repeated even if already online
                    let online = *connectivity.borrow_and_update() == ConnectivityState::Online;
                    if online && (!was_online || retry_on_reconnect) {
                        retry_on_reconnect = sync_once(&coordinator, &outcome_tx).await;
                    }
                    was_online = online;
                }
                Some(()) = trigger_rx.recv() => {
                    retry_on_reconnect = sync_once(&coordinator, &outcome_tx).await;
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |ctx| Box::pin(async move { self.run(ctx).await }))
    }
}

/// Run once and publish the outcome. Returns whether the run should be
/// repeated when connectivity is next reported.
async fn sync_once(
    coordinator: &SyncCoordinator,
    outcome_tx: &watch::Sender<Option<SyncOutcome>>,
) -> bool {
    let outcome = coordinator.run_sync().await;
    let retry = match outcome.status {
        SyncStatus::Offline | SyncStatus::Aborted { .. } => true,
        SyncStatus::AlreadyRunning => false,
        SyncStatus::Completed => outcome
            .errors
            .iter()
            .any(|e| e.failure.kind == SyncErrorKind::TransientNetwork),
    };
    outcome_tx.send_replace(Some(outcome));
    retry
}
