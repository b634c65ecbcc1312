use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::{notify, Alert, AlertSink, Notifier, Submission};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Delivery threads.
    pub workers: usize,
    /// Alerts waiting for a free worker before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Counters shared between the submitting loop and the workers.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.queued.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.delivered.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Fire-and-forget alert delivery on a fixed worker pool.
///
/// `submit` never blocks: when the queue is full the alert is dropped and
/// counted. Workers keep draining the queue after the loop has stopped;
/// `shutdown` waits for them.
pub struct Dispatcher {
    tx: Option<Sender<Alert>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn spawn(config: DispatcherConfig, notifiers: Vec<Arc<dyn Notifier>>) -> Result<Self> {
        if config.workers == 0 || config.queue_capacity == 0 {
            return Err(anyhow!(
                "dispatcher needs at least one worker and a non-zero queue"
            ));
        }
        let (tx, rx) = crossbeam_channel::bounded::<Alert>(config.queue_capacity);
        let notifiers: Arc<[Arc<dyn Notifier>]> = notifiers.into();
        let stats = Arc::new(DispatchStats::default());

        let mut workers = Vec::with_capacity(config.workers);
        for worker_index in 0..config.workers {
            let rx = rx.clone();
            let notifiers = notifiers.clone();
            let stats = stats.clone();
            let handle = std::thread::Builder::new()
                .name(format!("alert-worker-{}", worker_index))
                .spawn(move || run_worker(rx, notifiers, stats))?;
            workers.push(handle);
        }
        log::info!(
            "alert dispatcher started: {} workers, queue {}, {} recipients",
            config.workers,
            config.queue_capacity,
            notifiers.iter().map(|n| n.recipients().len()).sum::<usize>()
        );

        Ok(Self {
            tx: Some(tx),
            workers,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Stop accepting alerts, deliver what is queued, and join the workers.
    pub fn shutdown(mut self) -> Arc<DispatchStats> {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("alert worker panicked");
            }
        }
        let (queued, dropped, delivered, failed) = self.stats.snapshot();
        log::info!(
            "alert dispatcher stopped: queued={} dropped={} delivered={} failed={}",
            queued,
            dropped,
            delivered,
            failed
        );
        self.stats.clone()
    }
}

impl AlertSink for Dispatcher {
    fn submit(&self, alert: Alert) -> Submission {
        let Some(tx) = self.tx.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Submission::Dropped;
        };
        match tx.try_send(alert) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Submission::Queued
            }
            Err(TrySendError::Full(alert)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("alert queue full, dropping alert '{}'", alert.label);
                Submission::Dropped
            }
            Err(TrySendError::Disconnected(alert)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "no alert workers left, dropping alert '{}'",
                    alert.label
                );
                Submission::Dropped
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Closing the channel lets detached workers drain and exit on their own.
        self.tx.take();
    }
}

fn run_worker(rx: Receiver<Alert>, notifiers: Arc<[Arc<dyn Notifier>]>, stats: Arc<DispatchStats>) {
    for alert in rx.iter() {
        // A panicking transport costs this alert, never the worker.
        match panic::catch_unwind(AssertUnwindSafe(|| notify(&notifiers, &alert))) {
            Ok(report) => {
                stats
                    .delivered
                    .fetch_add((report.attempted - report.failed) as u64, Ordering::Relaxed);
                stats
                    .failed
                    .fetch_add(report.failed as u64, Ordering::Relaxed);
            }
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::error!("alert '{}' delivery panicked", alert.label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Slow {
        recipients: Vec<String>,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl Notifier for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn recipients(&self) -> &[String] {
            &self.recipients
        }

        fn deliver(&self, _recipient: &str, message: &str) -> Result<()> {
            std::thread::sleep(self.delay);
            self.seen.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn slow(delay_ms: u64) -> Arc<Slow> {
        Arc::new(Slow {
            recipients: vec!["ops".to_string()],
            delay: Duration::from_millis(delay_ms),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn submit_does_not_wait_for_delivery() -> Result<()> {
        let notifier = slow(200);
        let notifiers: Vec<Arc<dyn Notifier>> = vec![notifier.clone()];
        let dispatcher = Dispatcher::spawn(DispatcherConfig::default(), notifiers)?;

        let started = Instant::now();
        for label in ["bearing_defect", "headlight_defect", "spark_plug_defect"] {
            assert_eq!(
                dispatcher.submit(Alert::new(label, Local::now())),
                Submission::Queued
            );
        }
        assert!(started.elapsed() < Duration::from_millis(150));

        let stats = dispatcher.shutdown();
        assert_eq!(stats.delivered.load(Ordering::Relaxed), 3);
        assert_eq!(notifier.seen.lock().unwrap().len(), 3);
        Ok(())
    }

    #[test]
    fn overflow_drops_newest_alerts() -> Result<()> {
        let notifier = slow(300);
        let notifiers: Vec<Arc<dyn Notifier>> = vec![notifier.clone()];
        let dispatcher = Dispatcher::spawn(
            DispatcherConfig {
                workers: 1,
                queue_capacity: 1,
            },
            notifiers,
        )?;

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(dispatcher.submit(Alert::new("bearing_defect", Local::now())));
            std::thread::sleep(Duration::from_millis(20));
        }
        // One in flight, one waiting, the rest dropped.
        assert_eq!(outcomes[0], Submission::Queued);
        assert_eq!(outcomes[1], Submission::Queued);
        assert_eq!(&outcomes[2..], &[Submission::Dropped, Submission::Dropped]);

        let stats = dispatcher.shutdown();
        assert_eq!(stats.dropped.load(Ordering::Relaxed), 2);
        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
        Ok(())
    }

    /// Panics on its first delivery, succeeds afterwards.
    struct PanicsOnce {
        recipients: Vec<String>,
        calls: AtomicU64,
    }

    impl Notifier for PanicsOnce {
        fn name(&self) -> &'static str {
            "panics-once"
        }

        fn recipients(&self) -> &[String] {
            &self.recipients
        }

        fn deliver(&self, _recipient: &str, _message: &str) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("transport bug");
            }
            Ok(())
        }
    }

    #[test]
    fn worker_survives_panicking_delivery() -> Result<()> {
        let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(PanicsOnce {
            recipients: vec!["ops".to_string()],
            calls: AtomicU64::new(0),
        })];
        let dispatcher = Dispatcher::spawn(
            DispatcherConfig {
                workers: 1,
                queue_capacity: 8,
            },
            notifiers,
        )?;

        assert_eq!(
            dispatcher.submit(Alert::new("bearing_defect", Local::now())),
            Submission::Queued
        );
        // Let the lone worker hit the panic before the next alerts arrive.
        std::thread::sleep(Duration::from_millis(100));
        let outcomes: Vec<Submission> = (0..3)
            .map(|_| dispatcher.submit(Alert::new("headlight_defect", Local::now())))
            .collect();
        assert_eq!(outcomes, vec![Submission::Queued; 3]);

        let stats = dispatcher.shutdown();
        assert_eq!(stats.snapshot(), (4, 0, 3, 1));
        Ok(())
    }

    #[test]
    fn rejects_empty_pool() {
        let config = DispatcherConfig {
            workers: 0,
            queue_capacity: 4,
        };
        assert!(Dispatcher::spawn(config, Vec::new()).is_err());
    }
}
