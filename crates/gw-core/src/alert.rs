//! Best-effort alert push to the remote server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

use gw_config::Config;

use crate::logging::event_names;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Alert payload as posted to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: String,
    /// Device id; the server keys devices by this field name.
    pub camera_id: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Alert {
    pub fn critical(device_id: &str, alert_type: &str, data: serde_json::Value) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            camera_id: device_id.to_string(),
            severity: Severity::Critical,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Destination for alerts. Implementations never fail the caller.
pub trait AlertSink: Send + Sync {
    fn push(&self, alert: &Alert);
}

/// POSTs alerts as JSON to `{server}{alert_path}`.
#[derive(Debug, Clone)]
pub struct HttpAlertSink {
    url: Option<String>,
    timeout: Duration,
}

impl HttpAlertSink {
    pub fn new(url: Option<String>, timeout: Duration) -> Self {
        Self { url, timeout }
    }

    /// Disabled when no server is configured or remote alerts are off.
    pub fn from_config(config: &Config) -> Self {
        let url = if config.features.remote_alerts {
            config.server.endpoint(&config.server.alert_path)
        } else {
            None
        };
        Self::new(url, Duration::from_secs(config.server.alert_timeout_secs))
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

impl AlertSink for HttpAlertSink {
    fn push(&self, alert: &Alert) {
        let Some(url) = &self.url else {
            debug!(alert_type = %alert.alert_type, "Remote alerts disabled, not sending");
            return;
        };

        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        match agent.post(url).send_json(alert) {
            Ok(_) => info!(
                target: event_names::ALERT_SENT,
                alert_type = %alert.alert_type,
                severity = ?alert.severity,
                "Alert sent"
            ),
            Err(e) => error!(
                target: event_names::ALERT_FAILED,
                alert_type = %alert.alert_type,
                error = %e,
                "Failed to send alert"
            ),
        }
    }
}

/// Sink that only logs; used when the daemon runs without a server.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn push(&self, alert: &Alert) {
        info!(
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            data = %alert.data,
            "Alert (local only)"
        );
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use self::recording::RecordingAlertSink;

#[cfg(any(test, feature = "test-utils"))]
mod recording {
    use super::{Alert, AlertSink};
    use std::sync::{Mutex, PoisonError};

    /// Keeps every alert in memory.
    #[derive(Debug, Default)]
    pub struct RecordingAlertSink {
        alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingAlertSink {
        pub fn alerts(&self) -> Vec<Alert> {
            self.alerts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl AlertSink for RecordingAlertSink {
        fn push(&self, alert: &Alert) {
            self.alerts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(alert.clone());
        }
    }
}
