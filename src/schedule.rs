//! Fixed-cadence runner
//!
//! One loop, one job. A run is awaited before the next tick is taken, so runs
//! never overlap; ticks missed while a run was in progress are skipped rather
//! than replayed.

use eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

/// Cadence of the articles pipeline
pub const HOURLY: Duration = Duration::from_secs(60 * 60);

/// Outcome counts of a scheduling session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Run `job` every `period` until `shutdown` resolves
///
/// The first run starts immediately. A failed run is logged and the loop
/// carries on with the next tick. When `shutdown` resolves during a run, that
/// run is dropped mid-flight and does not count towards the tally.
pub async fn every<F, Fut, T, S>(period: Duration, mut job: F, shutdown: S) -> Tally
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    S: Future<Output = ()>,
{
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut tally = Tally::default();
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }

        let run = tally.total() + 1;
        log::info!("Starting scheduled run #{}", run);
        tokio::select! {
            result = job() => match result {
                Ok(_) => {
                    tally.succeeded += 1;
                    log::info!("Scheduled run #{} succeeded", run);
                }
                Err(e) => {
                    tally.failed += 1;
                    log::error!("Scheduled run #{} failed: {:?}", run, e);
                }
            },
            _ = &mut shutdown => {
                log::warn!("Shutdown requested, abandoning run #{}", run);
                break;
            }
        }
    }

    log::info!(
        "Scheduler stopped: {} succeeded, {} failed",
        tally.succeeded,
        tally.failed
    );
    tally
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl-C, shutting down"),
        _ = terminate => log::info!("Received terminate signal, shutting down"),
    }
}
