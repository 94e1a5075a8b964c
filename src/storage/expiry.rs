//! Background Expiry Sweeper
//!
//! This module implements a background task that periodically reclaims
//! expired items. This is called "active expiry" as opposed to "lazy
//! expiry" (which happens on access).
//!
//! ## Why Do We Need This?
//!
//! Lazy expiry (checking on access) is efficient but has a problem:
//! If a key expires and is never accessed again, it will stay in memory
//! (or on disk) forever!
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps for the configured interval, or stops on the shutdown signal
//! 2. Runs [`Sweep::purge_expired`] on a blocking worker thread
//! 3. Logs statistics about the cleanup
//!
//! A failed cycle is logged and retried on the next tick; it never ends
//! the task.

use crate::storage::error::{Result, StorageError};
use parking_lot::Mutex;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// A store whose expired items can be reclaimed in bulk.
pub trait Sweep: Send + Sync + 'static {
    /// Removes every item that is no longer alive.
    fn purge_expired(&self) -> Result<SweepStats>;
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Items examined
    pub scanned: u64,
    /// Expired items removed
    pub expired: u64,
    /// Records that could not be decoded and were left in place
    pub skipped: u64,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.expired += other.expired;
        self.skipped += other.skipped;
    }
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl ExpiryConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    /// The sweeper task, taken by `shutdown`
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidConfig`] if the interval is zero
    /// - [`StorageError::Runtime`] if called outside a Tokio runtime
    ///
    /// # Example
    ///
    /// ```ignore
    /// use jcache::storage::{ExpiryConfig, ExpirySweeper, MemoryStorage};
    /// use std::sync::Arc;
    ///
    /// let storage = Arc::new(MemoryStorage::new());
    /// let sweeper = ExpirySweeper::start(storage, ExpiryConfig::default())?;
    ///
    /// // Sweeper runs in the background...
    ///
    /// sweeper.shutdown().await;
    /// ```
    pub fn start(target: Arc<dyn Sweep>, config: ExpiryConfig) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(StorageError::InvalidConfig(
                "sweep interval must be greater than zero".into(),
            ));
        }
        let handle = Handle::try_current()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interval = config.interval;
        let task = handle.spawn(sweeper_loop(target, config, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Background expiry sweeper started");

        Ok(Self {
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Signals the sweeper to stop without waiting for it.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        // send_replace never fails, even when the task already exited
        if !self.shutdown_tx.send_replace(true) {
            debug!("Background expiry sweeper stop requested");
        }
    }

    /// Stops the sweeper and waits until the task has finished.
    ///
    /// Once this returns, the task no longer holds its reference to the
    /// swept store.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Expiry sweeper task failed");
            }
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    target: Arc<dyn Sweep>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let cycle_target = Arc::clone(&target);
        match tokio::task::spawn_blocking(move || cycle_target.purge_expired()).await {
            Ok(Ok(stats)) if stats.expired > 0 || stats.skipped > 0 => {
                debug!(
                    scanned = stats.scanned,
                    expired = stats.expired,
                    skipped = stats.skipped,
                    "Expired keys cleaned up"
                );
            }
            Ok(Ok(stats)) => {
                trace!(scanned = stats.scanned, "No expired keys found");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Expiry sweep failed, retrying on next tick");
            }
            Err(e) => {
                error!(error = %e, "Expiry sweep panicked, retrying on next tick");
            }
        }
    }
}
