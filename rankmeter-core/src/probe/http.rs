use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{ProbeError, ProbeErrorKind, ProbeOutcome, ProbeRequest, Prober};
use crate::error::{MeterError, Result};

/// Endpoint and credential of a provider reached over JSON/HTTP.
#[derive(Clone, Debug)]
pub struct HttpProberConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Generic provider adapter: POSTs the probe request as JSON and expects a
/// `ProbeOutcome` body back.
#[derive(Clone, Debug)]
pub struct HttpProber {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpProber {
    pub fn new(config: HttpProberConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MeterError::Internal(format!("Failed to build provider client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint,
            api_key: config.api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn transport_error(err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::timeout(format!("provider did not answer in time: {err}"))
        } else if err.is_connect() {
            ProbeError::new(
                ProbeErrorKind::ProviderUnavailable,
                format!("provider unreachable: {err}"),
            )
        } else {
            ProbeError::new(ProbeErrorKind::Upstream, format!("request failed: {err}"))
        }
    }
}

pub(super) fn status_error(status: StatusCode, message: String) -> ProbeError {
    let kind = match status.as_u16() {
        401 | 403 => ProbeErrorKind::CredentialRejected,
        429 => ProbeErrorKind::RateLimited,
        503 => ProbeErrorKind::ProviderUnavailable,
        _ => ProbeErrorKind::Upstream,
    };
    ProbeError::new(kind, message)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, request: &ProbeRequest) -> std::result::Result<ProbeOutcome, ProbeError> {
        let mut call = self.client.post(self.endpoint.clone()).json(request);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key);
        }

        let response = call.send().await.map_err(Self::transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response.json::<ProbeOutcome>().await.map_err(|e| {
                if e.is_timeout() {
                    Self::transport_error(e)
                } else {
                    ProbeError::new(
                        ProbeErrorKind::MalformedResponse,
                        format!("undecodable provider response: {e}"),
                    )
                }
            });
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| format!("provider request failed with status {status}"));
        Err(status_error(status, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_error_kinds() {
        let kind = |code: u16| {
            status_error(StatusCode::from_u16(code).unwrap(), String::new()).kind
        };
        assert_eq!(kind(401), ProbeErrorKind::CredentialRejected);
        assert_eq!(kind(403), ProbeErrorKind::CredentialRejected);
        assert_eq!(kind(429), ProbeErrorKind::RateLimited);
        assert_eq!(kind(503), ProbeErrorKind::ProviderUnavailable);
        assert_eq!(kind(502), ProbeErrorKind::Upstream);
        assert_eq!(kind(404), ProbeErrorKind::Upstream);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_provider_unavailable() {
        let prober = HttpProber::new(HttpProberConfig {
            endpoint: Url::parse("http://127.0.0.1:9/probe").unwrap(),
            api_key: None,
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let err = prober
            .check(&ProbeRequest {
                subject: "rust ledger".to_string(),
                surface: crate::types::Surface::Desktop,
                options: Default::default(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProbeErrorKind::ProviderUnavailable);
        assert!(err.is_systemic());
    }
}
