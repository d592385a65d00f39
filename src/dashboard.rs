//! Background snapshot poller.
//!
//! Reads the publisher on a fixed interval and keeps the latest view for
//! whatever renders it. The poller never blocks the detection loop; it just
//! takes whatever state is present at poll time. A failed read leaves a
//! zeroed view rather than surfacing an error.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::storage::{StatePublisher, StateView};

/// Poll interval used by the dashboard.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

const SHUTDOWN_CHECK: Duration = Duration::from_millis(20);

pub struct DashboardPoller {
    publisher: Arc<dyn StatePublisher>,
    interval: Duration,
    history_window: usize,
}

impl DashboardPoller {
    pub fn new(publisher: Arc<dyn StatePublisher>) -> Self {
        Self {
            publisher,
            interval: DEFAULT_POLL_INTERVAL,
            history_window: crate::DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Take one view now. Errors collapse to an empty view.
    pub fn poll_once(&self) -> StateView {
        match self.publisher.read_view(self.history_window) {
            Ok(view) => view,
            Err(err) => {
                log::warn!("dashboard poll failed, showing empty view: {:#}", err);
                StateView::default()
            }
        }
    }

    pub fn spawn(self) -> Result<DashboardHandle> {
        let latest = Arc::new(RwLock::new(StateView::default()));
        let polls = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let latest_thread = latest.clone();
        let polls_thread = polls.clone();
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("dashboard-poller".to_string())
            .spawn(move || {
                while !shutdown_thread.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    let view = self.poll_once();
                    log::debug!(
                        "dashboard poll: total={} history={} version={}",
                        view.total,
                        view.history.len(),
                        view.version
                    );
                    match latest_thread.write() {
                        Ok(mut guard) => *guard = view,
                        Err(_) => {
                            log::error!("dashboard view lock poisoned; poller stopping");
                            return;
                        }
                    }
                    polls_thread.fetch_add(1, Ordering::SeqCst);

                    while started.elapsed() < self.interval {
                        if shutdown_thread.load(Ordering::SeqCst) {
                            return;
                        }
                        std::thread::sleep(SHUTDOWN_CHECK.min(self.interval));
                    }
                }
            })?;

        Ok(DashboardHandle {
            latest,
            polls,
            shutdown,
            join: Some(join),
        })
    }
}

pub struct DashboardHandle {
    latest: Arc<RwLock<StateView>>,
    polls: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DashboardHandle {
    /// Latest polled view (zeroed before the first poll).
    pub fn latest(&self) -> StateView {
        self.latest
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of completed polls.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("dashboard poller thread panicked"))?;
        }
        Ok(())
    }
}
