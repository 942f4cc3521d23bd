//! Device enrichment over the sender's own HTTP API.
//!
//! Antminer firmware serves `/cgi-bin/stats.cgi` behind HTTP digest auth.
//! The body carries the model under `INFO.type` and the nominal hashrate in
//! GH/s under `SUMMARY[0].rate_ideal`; the hashrate is reported in TH/s.

use crate::config::EnrichmentConfig;
use reporter_types::DeviceInfo;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Device rate units per reported unit (GH/s to TH/s).
const RATE_DIVISOR: f64 = 1000.0;

/// Reasons enrichment of a sender failed.
///
/// None of these affect the detection itself; the event is emitted without
/// device details.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// The request could not be sent or the body could not be read.
    #[error("device request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The device answered with a non-success status.
    #[error("device returned status {0}")]
    Status(StatusCode),

    /// A 401 arrived without a usable digest challenge.
    #[error("device sent no digest challenge")]
    MissingChallenge,

    /// The digest challenge could not be answered.
    #[error("digest authentication failed: {0}")]
    Digest(String),

    /// The body is not the expected JSON document.
    #[error("device response is not valid stats JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("device response is missing {0}")]
    MissingField(&'static str),

    /// A required field has the wrong type.
    #[error("device response field {0} is not a number")]
    NotNumeric(&'static str),
}

#[derive(Debug, Deserialize)]
struct StatsBody {
    #[serde(rename = "INFO")]
    info: Option<StatsInfo>,
    #[serde(rename = "SUMMARY")]
    summary: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct StatsInfo {
    #[serde(rename = "type")]
    device_type: Option<String>,
}

/// Extracts device details from a stats response body.
///
/// # Errors
///
/// Returns [`EnrichmentError`] if the body is not JSON or any of `INFO`,
/// `INFO.type`, `SUMMARY[0]` or a numeric `SUMMARY[0].rate_ideal` is absent.
pub fn parse_stats(body: &[u8]) -> Result<DeviceInfo, EnrichmentError> {
    let stats: StatsBody = serde_json::from_slice(body)?;

    let device_type = stats
        .info
        .ok_or(EnrichmentError::MissingField("INFO"))?
        .device_type
        .ok_or(EnrichmentError::MissingField("INFO.type"))?;

    let summary = stats
        .summary
        .and_then(|entries| entries.into_iter().next())
        .ok_or(EnrichmentError::MissingField("SUMMARY[0]"))?;

    let rate_ideal = summary
        .get("rate_ideal")
        .ok_or(EnrichmentError::MissingField("SUMMARY[0].rate_ideal"))?
        .as_f64()
        .ok_or(EnrichmentError::NotNumeric("SUMMARY[0].rate_ideal"))?;

    Ok(DeviceInfo {
        device_type,
        ideal_rate: rate_ideal / RATE_DIVISOR,
    })
}

/// HTTP client for the stats endpoint of detected devices.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    config: EnrichmentConfig,
}

impl DeviceClient {
    /// Builds a client with the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError::Request`] if the HTTP client cannot be
    /// initialised.
    pub fn new(config: EnrichmentConfig) -> Result<Self, EnrichmentError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { http, config })
    }

    /// Returns `true` if senders to `destination_port` should be enriched.
    pub fn applies_to(&self, destination_port: u16) -> bool {
        self.config.enabled && destination_port == self.config.port
    }

    fn stats_url(&self, ip: Ipv4Addr) -> String {
        format!("http://{}:{}{}", ip, self.config.http_port, self.config.path)
    }

    /// Fetches device details from `ip`.
    ///
    /// Sends the request unauthenticated first; a `401` carrying a digest
    /// challenge is answered once with the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns [`EnrichmentError`] on any network, auth, status, or body
    /// problem.
    pub async fn enrich(&self, ip: Ipv4Addr) -> Result<DeviceInfo, EnrichmentError> {
        let url = self.stats_url(ip);
        let mut response = self.http.get(&url).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .ok_or(EnrichmentError::MissingChallenge)?
                .to_string();
            let authorization = self.answer_challenge(&challenge)?;
            response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, authorization)
                .send()
                .await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status));
        }

        let body = response.bytes().await?;
        parse_stats(&body)
    }

    fn answer_challenge(&self, challenge: &str) -> Result<String, EnrichmentError> {
        let mut prompt =
            digest_auth::parse(challenge).map_err(|e| EnrichmentError::Digest(e.to_string()))?;
        let context = digest_auth::AuthContext::new(
            self.config.username.as_str(),
            self.config.password.as_str(),
            self.config.path.as_str(),
        );
        let answer = prompt
            .respond(&context)
            .map_err(|e| EnrichmentError::Digest(e.to_string()))?;
        Ok(answer.to_header_string())
    }
}
