//! Operator stop request.
//!
//! Ctrl-C and a `q` line on stdin both send on one channel. The loop polls
//! it once per frame with a short timeout, which also paces the loop.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{Context, Result};

use super::StopPoll;

pub struct StopSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    /// Handle for triggering a stop from another thread.
    pub fn trigger(&self) -> Sender<()> {
        self.tx.clone()
    }

    /// Route Ctrl-C to this signal. Only one handler may be installed per process.
    pub fn install_ctrlc(&self) -> Result<()> {
        let tx = self.trigger();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .context("install Ctrl-C handler")
    }

    /// Treat a stdin line starting with `q` as a stop request.
    pub fn watch_stdin(&self) {
        let tx = self.trigger();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim_start().starts_with('q') {
                    let _ = tx.send(());
                    break;
                }
            }
        });
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopPoll for StopSignal {
    fn poll_stop(&mut self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            // Our own sender keeps the channel alive; unreachable in practice.
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_times_out_without_request() {
        let mut stop = StopSignal::new();
        assert!(!stop.poll_stop(Duration::from_millis(1)));
    }

    #[test]
    fn trigger_from_other_thread_is_observed() {
        let mut stop = StopSignal::new();
        let tx = stop.trigger();
        std::thread::spawn(move || {
            let _ = tx.send(());
        })
        .join()
        .unwrap();
        assert!(stop.poll_stop(Duration::from_millis(100)));
        assert!(!stop.poll_stop(Duration::from_millis(1)));
    }
}
