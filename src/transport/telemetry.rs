//! Sensor telemetry to the remote backend.
//!
//! Best effort only: every failure is logged and reported as `false`, never
//! propagated into the controller loop.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use crate::sensors::GasConcentrations;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5051";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One sensor sample in the backend's wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    pub temp: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub light: f64,
    pub oxidising: f64,
    pub reducing: f64,
    pub nh3: f64,
}

impl TelemetryPayload {
    pub fn new(
        temp: f64,
        pressure: f64,
        humidity: f64,
        light: f64,
        gas: GasConcentrations,
    ) -> Self {
        Self {
            ts: now_millis(),
            temp,
            pressure,
            humidity,
            light,
            oxidising: gas.oxidising,
            reducing: gas.reducing,
            nh3: gas.nh3,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub trait TelemetrySink: Send {
    /// Deliver one payload. `false` means it was not accepted.
    fn post(&mut self, payload: &TelemetryPayload) -> bool;
}

/// Most recent payload, for local polling.
#[derive(Debug, Default)]
pub struct LatestTelemetry {
    latest: Mutex<Option<TelemetryPayload>>,
}

impl LatestTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, payload: TelemetryPayload) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload);
    }

    pub fn get(&self) -> Option<TelemetryPayload> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub backend_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// Backend client with bearer-token login.
pub struct HttpTelemetryClient {
    agent: ureq::Agent,
    login_url: Url,
    post_url: Url,
    username: String,
    password: String,
    token: Option<String>,
    posted: u64,
    failed: u64,
}

impl HttpTelemetryClient {
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let base = config.backend_url.trim_end_matches('/');
        let parsed = Url::parse(base)
            .with_context(|| format!("parse backend url '{}'", config.backend_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "backend url must be http(s), got '{}'",
                config.backend_url
            ));
        }
        let login_url = Url::parse(&format!("{base}/auth/login")).context("build login url")?;
        let post_url = Url::parse(&format!("{base}/api/sensors")).context("build sensors url")?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            login_url,
            post_url,
            username: config.username.clone(),
            password: config.password.clone(),
            token: None,
            posted: 0,
            failed: 0,
        })
    }

    pub fn posted(&self) -> u64 {
        self.posted
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    fn login(&mut self) -> Result<()> {
        self.token = None;
        let response = self
            .agent
            .post(self.login_url.as_str())
            .send_json(serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .context("telemetry login")?;
        let body: LoginResponse = response.into_json().context("parse login response")?;
        match body.token {
            Some(token) if !token.is_empty() => {
                self.token = Some(token);
                Ok(())
            }
            _ => Err(anyhow!("login accepted but no token in response")),
        }
    }

    fn send(&self, payload: &TelemetryPayload) -> std::result::Result<(), ureq::Error> {
        let mut request = self.agent.post(self.post_url.as_str());
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request.send_json(payload).map(|_| ())
    }

    fn try_post(&mut self, payload: &TelemetryPayload) -> Result<()> {
        if self.token.is_none() {
            if let Err(err) = self.login() {
                log::warn!("telemetry: {:#}", err);
            }
        }
        match self.send(payload) {
            Ok(()) => Ok(()),
            Err(ureq::Error::Status(401, _)) => {
                log::debug!("telemetry: token rejected; logging in again");
                if let Err(err) = self.login() {
                    log::warn!("telemetry: {:#}", err);
                }
                self.send(payload).context("post sensors after re-login")
            }
            Err(err) => Err(err).context("post sensors"),
        }
    }
}

impl TelemetrySink for HttpTelemetryClient {
    fn post(&mut self, payload: &TelemetryPayload) -> bool {
        match self.try_post(payload) {
            Ok(()) => {
                self.posted += 1;
                true
            }
            Err(err) => {
                self.failed += 1;
                log::debug!("telemetry: backend not accepting right now: {:#}", err);
                false
            }
        }
    }
}

/// Drops every payload.
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn post(&mut self, _payload: &TelemetryPayload) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_backend_field_names() {
        let payload = TelemetryPayload {
            ts: 1,
            temp: 20.5,
            pressure: 1013.0,
            humidity: 40.0,
            light: 1.0,
            oxidising: 0.1,
            reducing: 2.0,
            nh3: 0.5,
        };
        let value = serde_json::to_value(&payload).unwrap();
        for key in ["ts", "temp", "pressure", "humidity", "light", "oxidising", "reducing", "nh3"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn rejects_bad_backend_urls() {
        let config = |url: &str| TelemetryConfig {
            backend_url: url.to_string(),
            ..TelemetryConfig::default()
        };
        assert!(HttpTelemetryClient::new(&config("ftp://host")).is_err());
        assert!(HttpTelemetryClient::new(&config("not a url")).is_err());
        let client = HttpTelemetryClient::new(&config("http://10.0.0.5:5051/")).unwrap();
        assert_eq!(client.post_url.as_str(), "http://10.0.0.5:5051/api/sensors");
        assert_eq!(client.login_url.as_str(), "http://10.0.0.5:5051/auth/login");
    }

    #[test]
    fn unreachable_backend_returns_false() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut client = HttpTelemetryClient::new(&TelemetryConfig {
            backend_url: format!("http://{addr}"),
            timeout: Duration::from_millis(500),
            ..TelemetryConfig::default()
        })
        .unwrap();
        let payload = TelemetryPayload::new(20.0, 1000.0, 40.0, 1.0, GasConcentrations::default());
        assert!(!client.post(&payload));
        assert_eq!(client.failed(), 1);
    }

    #[test]
    fn latest_keeps_last_value() {
        let latest = LatestTelemetry::new();
        assert!(latest.get().is_none());
        let payload = TelemetryPayload::new(1.0, 2.0, 3.0, 4.0, GasConcentrations::default());
        latest.set(payload.clone());
        assert_eq!(latest.get(), Some(payload));
    }
}
