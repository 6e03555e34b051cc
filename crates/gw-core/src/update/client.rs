//! Remote update server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::time::Duration;

use gw_config::Config;

use super::UpdateError;

/// Body of the version-check POST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Device id; the server keys devices by this field name.
    pub camera_id: String,
    pub current_version: String,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckResponse {
    pub update_available: bool,
    pub version: Option<String>,
    pub download_url: Option<String>,
    /// Hex SHA-256 of the package. Absent means the server did not say.
    pub checksum: Option<String>,
}

/// An update the server has offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOffer {
    pub version: String,
    pub download_url: String,
    pub checksum: Option<String>,
}

pub trait UpdateSource: Send + Sync {
    fn check(&self, request: &CheckRequest) -> Result<CheckResponse, UpdateError>;

    /// Stream the package at `url` into `sink`; returns bytes written.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, UpdateError>;

    /// Base URL, for status output.
    fn server(&self) -> Option<String> {
        None
    }

    /// URL used when a check response carries a version but no download URL.
    fn default_download_url(&self, version: &str) -> Option<String> {
        self.server()
            .map(|base| format!("{}/api/client/updates/download/{}", base, version))
    }
}

/// HTTP implementation over `ureq`.
#[derive(Debug, Clone)]
pub struct HttpUpdateSource {
    base: String,
    check_url: String,
    check_timeout: Duration,
    download_timeout: Duration,
}

impl HttpUpdateSource {
    pub fn new(
        base: &str,
        check_path: &str,
        check_timeout: Duration,
        download_timeout: Duration,
    ) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            check_url: format!("{}{}", base, check_path),
            base,
            check_timeout,
            download_timeout,
        }
    }

    /// `None` when no server URL is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        if config.server.url.is_empty() {
            return None;
        }
        Some(Self::new(
            &config.server.url,
            &config.server.update_check_path,
            Duration::from_secs(config.update.check_timeout_secs),
            Duration::from_secs(config.update.download_timeout_secs),
        ))
    }

    fn agent(timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(timeout).build()
    }
}

fn network(context: &str, err: impl std::fmt::Display) -> UpdateError {
    UpdateError::Network(format!("{context}: {err}"))
}

impl UpdateSource for HttpUpdateSource {
    fn check(&self, request: &CheckRequest) -> Result<CheckResponse, UpdateError> {
        let response = Self::agent(self.check_timeout)
            .post(&self.check_url)
            .send_json(request)
            .map_err(|e| network("update check", e))?;
        response
            .into_json::<CheckResponse>()
            .map_err(|e| network("update check response", e))
    }

    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, UpdateError> {
        let response = Self::agent(self.download_timeout)
            .get(url)
            .call()
            .map_err(|e| network("download", e))?;
        let mut reader = response.into_reader();
        io::copy(&mut reader, sink).map_err(|e| network("download", e))
    }

    fn server(&self) -> Option<String> {
        Some(self.base.clone())
    }
}

/// Source used when no server is configured; every call fails.
#[derive(Debug, Default)]
pub struct NoUpdateServer;

impl UpdateSource for NoUpdateServer {
    fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, UpdateError> {
        Err(UpdateError::NotConfigured("update server".to_string()))
    }

    fn download(&self, _url: &str, _sink: &mut dyn Write) -> Result<u64, UpdateError> {
        Err(UpdateError::NotConfigured("update server".to_string()))
    }
}
