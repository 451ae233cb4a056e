/*!
Health poller.

Reads slowly varying device state (sensor temperature and whether the
cooler holds its set point) on a fixed period, independently of any
acquisition. Runs on its own thread with a current-thread tokio runtime and
publishes reports over a bounded channel; a slow consumer loses reports, the
poller never blocks.
*/

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Device side of the poller
pub trait HealthSource: Send + 'static {
    /// Current sensor temperature in °C and whether it is locked at the set point
    fn temperature(&mut self) -> shared::Result<(f64, bool)>;

    fn set_temperature(&mut self, set_point_c: f64) -> shared::Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthReport {
    pub celsius: f64,
    pub locked: bool,
    pub at: DateTime<Local>,
}

/// Handle of the background polling thread
#[derive(Debug)]
pub struct HealthPoller {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HealthPoller {
    /// Apply `set_point_c` and poll `source` every `interval`
    pub fn spawn<S: HealthSource>(
        mut source: S,
        interval: Duration,
        set_point_c: f64,
    ) -> Result<(Self, Receiver<HealthReport>)> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("Failed to build health poller runtime")?;
        let (report_tx, report_rx) = bounded(16);
        let running = Arc::new(AtomicBool::new(true));
        let running_poller = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("health-poller".to_string())
            .spawn(move || {
                match source.set_temperature(set_point_c) {
                    Ok(()) => info!("🌡️ Temperature set point {:.1} °C", set_point_c),
                    Err(e) => warn!("⚠️ Failed to apply temperature set point: {}", e),
                }
                runtime.block_on(Self::poll_loop(source, interval, report_tx, running_poller));
                info!("🌡️ Health poller stopped");
            })
            .context("Failed to spawn health poller thread")?;

        Ok((
            Self {
                running,
                handle: Some(handle),
            },
            report_rx,
        ))
    }

    async fn poll_loop<S: HealthSource>(
        mut source: S,
        period: Duration,
        report_tx: Sender<HealthReport>,
        running: Arc<AtomicBool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // short tick so a cleared running flag is seen between reports
        let mut check = tokio::time::interval(Duration::from_millis(50));

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.temperature() {
                        Ok((celsius, locked)) => {
                            let report = HealthReport { celsius, locked, at: Local::now() };
                            match report_tx.try_send(report) {
                                Ok(()) => debug!(celsius, locked, "health report"),
                                Err(TrySendError::Full(_)) => debug!("health report dropped, consumer behind"),
                                Err(TrySendError::Disconnected(_)) => break,
                            }
                        }
                        Err(e) => warn!("⚠️ Temperature read failed: {}", e),
                    }
                }
                _ = check.tick() => {}
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop polling and join the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("⚠️ Health poller thread panicked");
            }
        }
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
