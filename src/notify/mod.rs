//! Operator alerts.
//!
//! One `Alert` is built per detection and handed to an `AlertSink` (normally
//! the `Dispatcher`), which delivers it off the loop thread to every recipient
//! of every configured transport. Delivery is best-effort: failures are logged
//! and never reach the loop.
//!
//! Alerts carry only owned data (label and capture time). Workers never see
//! frames or the camera.

pub mod dispatcher;
pub mod sms;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};

pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use sms::{SmsConfig, SmsNotifier, TWILIO_API_BASE};
pub use telegram::{TelegramConfig, TelegramNotifier, TELEGRAM_API_BASE};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub label: String,
    pub captured_at: DateTime<Local>,
}

impl Alert {
    pub fn new(label: impl Into<String>, captured_at: DateTime<Local>) -> Self {
        Self {
            label: label.into(),
            captured_at,
        }
    }

    /// Message body for chat transports.
    pub fn message(&self) -> String {
        format!(
            "The Class which is Defect is : {} \nTimestamp: {}",
            self.label,
            self.captured_at.format(TIMESTAMP_FORMAT)
        )
    }

    /// Shorter body for SMS.
    pub fn sms_message(&self) -> String {
        format!(
            "Detected object: {}\nTime: {}",
            self.label,
            self.captured_at.format(TIMESTAMP_FORMAT)
        )
    }
}

/// A delivery transport with its fixed recipient list.
pub trait Notifier: Send + Sync {
    /// Transport identifier for logs.
    fn name(&self) -> &'static str;

    fn recipients(&self) -> &[String];

    /// Text sent for `alert`.
    fn compose(&self, alert: &Alert) -> String {
        alert.message()
    }

    /// Deliver one message to one recipient. One network call, no retry.
    fn deliver(&self, recipient: &str, message: &str) -> Result<()>;
}

/// Outcome of submitting an alert for delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Delivery capacity exhausted; the alert was discarded.
    Dropped,
}

/// Where the detection loop hands alerts. Must never block on delivery.
pub trait AlertSink {
    fn submit(&self, alert: Alert) -> Submission;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Deliver one alert to every recipient of every transport.
///
/// Each call is independent: a failed recipient does not stop the ones after
/// it, and a failed transport does not stop the next transport.
pub fn notify(notifiers: &[Arc<dyn Notifier>], alert: &Alert) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for notifier in notifiers {
        let message = notifier.compose(alert);
        for recipient in notifier.recipients() {
            report.attempted += 1;
            match notifier.deliver(recipient, &message) {
                Ok(()) => log::debug!(
                    "{} alert '{}' delivered to {}",
                    notifier.name(),
                    alert.label,
                    recipient
                ),
                Err(err) => {
                    report.failed += 1;
                    log::warn!(
                        "{} alert '{}' to {} failed: {:#}",
                        notifier.name(),
                        alert.label,
                        recipient,
                        err
                    );
                }
            }
        }
    }
    report
}

/// Shared HTTP agent for the transports.
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Describe a ureq failure without echoing the request URL, which may carry
/// credentials.
pub(crate) fn describe_http_error(transport: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, _) => anyhow::anyhow!("{} returned HTTP {}", transport, code),
        ureq::Error::Transport(t) => anyhow::anyhow!("{} transport error: {}", transport, t.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Recording {
        recipients: Vec<String>,
        failing: Vec<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn recipients(&self) -> &[String] {
            &self.recipients
        }

        fn deliver(&self, recipient: &str, message: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            if self.failing.iter().any(|r| r == recipient) {
                anyhow::bail!("unreachable");
            }
            Ok(())
        }
    }

    fn alert() -> Alert {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        Alert::new("radiator_cap_defect", at)
    }

    #[test]
    fn message_contains_label_and_timestamp() {
        assert_eq!(
            alert().message(),
            "The Class which is Defect is : radiator_cap_defect \nTimestamp: 2024-03-09 14:05:07"
        );
        assert_eq!(
            alert().sms_message(),
            "Detected object: radiator_cap_defect\nTime: 2024-03-09 14:05:07"
        );
    }

    #[test]
    fn failed_recipient_does_not_stop_the_rest() {
        let recording = Arc::new(Recording {
            recipients: vec!["r1".into(), "r2".into(), "r3".into()],
            failing: vec!["r2".into()],
            calls: Mutex::new(Vec::new()),
        });
        let notifiers: Vec<Arc<dyn Notifier>> = vec![recording.clone()];

        let report = notify(&notifiers, &alert());

        assert_eq!(report, DeliveryReport { attempted: 3, failed: 1 });
        let calls = recording.calls.lock().unwrap();
        let order: Vec<&str> = calls.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(order, vec!["r1", "r2", "r3"]);
        assert!(calls.iter().all(|(_, m)| m.contains("radiator_cap_defect")));
    }

    #[test]
    fn every_transport_is_attempted() {
        let a = Arc::new(Recording {
            recipients: vec!["a1".into()],
            failing: vec!["a1".into()],
            calls: Mutex::new(Vec::new()),
        });
        let b = Arc::new(Recording {
            recipients: vec!["b1".into(), "b2".into()],
            failing: vec![],
            calls: Mutex::new(Vec::new()),
        });
        let notifiers: Vec<Arc<dyn Notifier>> = vec![a.clone(), b.clone()];

        let report = notify(&notifiers, &alert());

        assert_eq!(report, DeliveryReport { attempted: 3, failed: 1 });
        assert_eq!(b.calls.lock().unwrap().len(), 2);
    }
}
