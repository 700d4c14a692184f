use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use library::{run_scan, Library, ScanObserver, ScanOptions, ScanReport};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::commands::CommandError;
use crate::events::{CatalogEvent, EventBus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Cancelling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// Requested through `cancel_scan`; ends with `scan_cancelled`.
    Caller,
    /// Application exit; ends silently.
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanStatus {
    pub is_scanning: bool,
    pub percent: f64,
}

/// When to push a progress event: after `step_percent` of progress or
/// `interval` of wall time, whichever comes first.
#[derive(Clone, Copy, Debug)]
pub struct ProgressPolicy {
    pub step_percent: f64,
    pub interval: Duration,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            step_percent: 1.0,
            interval: Duration::from_millis(250),
        }
    }
}

struct Progress {
    state: ScanState,
    cancel: Option<CancelReason>,
    processed: usize,
    total: usize,
    last_percent: f64,
    last_emit: Option<Instant>,
}

impl Progress {
    fn percent(&self) -> f64 {
        if self.total == 0 {
            return if self.state == ScanState::Idle {
                self.last_percent
            } else {
                0.0
            };
        }
        (self.processed as f64 * 100.0 / self.total as f64).clamp(0.0, 100.0)
    }
}

struct Inner {
    progress: Mutex<Progress>,
    events: EventBus,
    policy: ProgressPolicy,
    running: watch::Sender<bool>,
}

/// Single-flight owner of scan runs.
///
/// A start request while a run is active is rejected with
/// `AlreadyScanning`; the status and the pushed progress both read the
/// same counter.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

impl ScanCoordinator {
    pub fn new(events: EventBus, policy: ProgressPolicy) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                progress: Mutex::new(Progress {
                    state: ScanState::Idle,
                    cancel: None,
                    processed: 0,
                    total: 0,
                    last_percent: 0.0,
                    last_emit: None,
                }),
                events,
                policy,
                running,
            }),
        }
    }

    pub fn state(&self) -> ScanState {
        self.inner.progress.lock().state
    }

    pub fn status(&self) -> ScanStatus {
        let progress = self.inner.progress.lock();
        ScanStatus {
            is_scanning: progress.state != ScanState::Idle,
            percent: progress.percent(),
        }
    }

    /// Moves Idle -> Scanning and resets the counters.
    pub fn begin(&self) -> Result<(), CommandError> {
        let mut progress = self.inner.progress.lock();
        if progress.state != ScanState::Idle {
            return Err(CommandError::AlreadyScanning);
        }
        progress.state = ScanState::Scanning;
        progress.cancel = None;
        progress.processed = 0;
        progress.total = 0;
        progress.last_percent = 0.0;
        progress.last_emit = None;
        self.inner.running.send_replace(true);
        Ok(())
    }

    /// Starts a background scan of `root`. Returns as soon as the run is
    /// registered; outcome arrives as events.
    pub fn start(
        &self,
        library: Library,
        root: PathBuf,
        options: ScanOptions,
    ) -> Result<(), CommandError> {
        self.begin()?;
        info!("Library scan of {} started", root.display());

        let coordinator = self.clone();
        tokio::spawn(async move {
            let observer = CoordinatorObserver {
                coordinator: coordinator.clone(),
            };
            let result = tokio::task::spawn_blocking(move || {
                run_scan(&library, &root, &options, &observer)
            })
            .await;

            let outcome = match result {
                Ok(Ok(report)) => Ok(report),
                Ok(Err(err)) => {
                    error!("Library scan failed: {}", err);
                    Err(err.to_string())
                }
                Err(err) => {
                    error!("Library scan join error: {}", err);
                    Err(err.to_string())
                }
            };
            coordinator.finish(outcome);
        });
        Ok(())
    }

    /// Asks the active run to stop after its current file. Returns false
    /// when nothing is running. A request that lands after the last file
    /// still ends the run with `scan_cancelled`.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut progress = self.inner.progress.lock();
        match progress.state {
            ScanState::Idle => false,
            ScanState::Scanning | ScanState::Cancelling => {
                progress.state = ScanState::Cancelling;
                if progress.cancel != Some(CancelReason::Caller) {
                    progress.cancel = Some(reason);
                }
                info!("Library scan cancellation requested ({:?})", reason);
                true
            }
        }
    }

    /// Resolves once no run is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    pub async fn shutdown(&self) {
        if self.cancel(CancelReason::Shutdown) {
            self.wait_idle().await;
        }
    }

    fn started(&self, total: usize) {
        let emit = {
            let mut progress = self.inner.progress.lock();
            progress.total = total;
            progress.last_emit = Some(Instant::now());
            progress.percent()
        };
        self.inner
            .events
            .emit(CatalogEvent::ScanProgress { percent: emit });
    }

    fn processed(&self, processed: usize) {
        let emit = {
            let mut progress = self.inner.progress.lock();
            progress.processed = processed;
            let percent = progress.percent();
            let stepped = percent - progress.last_percent >= self.inner.policy.step_percent;
            let timed = progress
                .last_emit
                .map_or(true, |at| at.elapsed() >= self.inner.policy.interval);
            if percent < 100.0 && (stepped || timed) {
                progress.last_percent = percent;
                progress.last_emit = Some(Instant::now());
                Some(percent)
            } else {
                None
            }
        };
        if let Some(percent) = emit {
            self.inner
                .events
                .emit(CatalogEvent::ScanProgress { percent });
        }
    }

    fn cancel_requested(&self) -> bool {
        self.inner.progress.lock().state == ScanState::Cancelling
    }

    fn finish(&self, outcome: Result<ScanReport, String>) {
        let events = {
            let mut progress = self.inner.progress.lock();
            let reason = progress.cancel.take();
            progress.state = ScanState::Idle;
            progress.last_emit = None;
            match outcome {
                Ok(report) if !report.cancelled && reason.is_none() => {
                    progress.processed = progress.total;
                    progress.last_percent = 100.0;
                    vec![
                        CatalogEvent::ScanProgress { percent: 100.0 },
                        CatalogEvent::ScanComplete,
                    ]
                }
                Ok(_) => {
                    progress.last_percent = progress.percent();
                    match reason {
                        Some(CancelReason::Shutdown) => Vec::new(),
                        _ => vec![CatalogEvent::ScanCancelled],
                    }
                }
                Err(message) => {
                    progress.last_percent = progress.percent();
                    vec![CatalogEvent::ScanFailed { message }]
                }
            }
        };
        self.inner.running.send_replace(false);
        for event in events {
            self.inner.events.emit(event);
        }
    }
}

struct CoordinatorObserver {
    coordinator: ScanCoordinator,
}

impl ScanObserver for CoordinatorObserver {
    fn on_started(&self, total: usize) {
        self.coordinator.started(total);
    }

    fn on_file_processed(&self, processed: usize) {
        self.coordinator.processed(processed);
    }

    fn should_cancel(&self) -> bool {
        self.coordinator.cancel_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(step_percent: f64) -> (ScanCoordinator, EventBus) {
        let events = EventBus::new();
        let policy = ProgressPolicy {
            step_percent,
            interval: Duration::from_secs(3600),
        };
        (ScanCoordinator::new(events.clone(), policy), events)
    }

    fn report(cancelled: bool) -> ScanReport {
        ScanReport {
            cancelled,
            ..ScanReport::default()
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<CatalogEvent>) -> Vec<CatalogEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn second_begin_is_rejected_until_finish() {
        let (coordinator, _) = coordinator(1.0);
        coordinator.begin().unwrap();
        assert!(matches!(
            coordinator.begin(),
            Err(CommandError::AlreadyScanning)
        ));
        assert!(coordinator.status().is_scanning);

        coordinator.finish(Ok(report(false)));
        assert_eq!(coordinator.state(), ScanState::Idle);
        coordinator.begin().unwrap();
    }

    #[test]
    fn progress_is_rate_limited_and_finalized() {
        let (coordinator, events) = coordinator(25.0);
        let mut rx = events.subscribe();
        coordinator.begin().unwrap();
        coordinator.started(10);
        for processed in 1..=10 {
            coordinator.processed(processed);
            let status = coordinator.status();
            assert!(status.is_scanning);
            assert!((status.percent - processed as f64 * 10.0).abs() < 1e-9);
        }
        coordinator.finish(Ok(report(false)));

        let percents: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                CatalogEvent::ScanProgress { percent } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0.0, 30.0, 60.0, 90.0, 100.0]);
        assert_eq!(
            coordinator.status(),
            ScanStatus {
                is_scanning: false,
                percent: 100.0
            }
        );
    }

    #[test]
    fn caller_cancel_emits_cancelled_and_shutdown_is_silent() {
        let (coordinator, events) = coordinator(1.0);
        let mut rx = events.subscribe();
        assert!(!coordinator.cancel(CancelReason::Caller));

        coordinator.begin().unwrap();
        assert!(coordinator.cancel(CancelReason::Caller));
        assert!(coordinator.cancel_requested());
        assert!(coordinator.status().is_scanning);
        coordinator.finish(Ok(report(true)));
        assert_eq!(drain(&mut rx), vec![CatalogEvent::ScanCancelled]);

        coordinator.begin().unwrap();
        assert!(coordinator.cancel(CancelReason::Shutdown));
        coordinator.finish(Ok(report(true)));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(coordinator.state(), ScanState::Idle);
    }

    #[test]
    fn cancel_after_last_file_still_ends_cancelled() {
        let (coordinator, events) = coordinator(1.0);
        let mut rx = events.subscribe();
        coordinator.begin().unwrap();
        coordinator.started(2);
        coordinator.processed(1);
        coordinator.processed(2);
        assert!(coordinator.cancel(CancelReason::Caller));
        coordinator.finish(Ok(report(false)));

        let seen = drain(&mut rx);
        assert_eq!(seen.last(), Some(&CatalogEvent::ScanCancelled));
        assert!(!seen.contains(&CatalogEvent::ScanComplete));
        assert!(!coordinator.status().is_scanning);
    }

    #[test]
    fn failure_emits_message() {
        let (coordinator, events) = coordinator(1.0);
        let mut rx = events.subscribe();
        coordinator.begin().unwrap();
        coordinator.finish(Err("music folder /x is unavailable".to_string()));
        assert_eq!(
            drain(&mut rx),
            vec![CatalogEvent::ScanFailed {
                message: "music folder /x is unavailable".to_string()
            }]
        );
        assert!(!coordinator.status().is_scanning);
    }
}
