//! Provider adapters that perform one metered lookup per item surface.

mod http;
mod registry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CheckOptions, Surface};

pub use http::{HttpProber, HttpProberConfig};
pub use registry::ProberRegistry;

/// One call to a provider for a single subject on a single surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub subject: String,
    pub surface: Surface,
    pub options: CheckOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// 1-based rank of the target in the provider's answer, when present.
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub detail: Value,
}

impl ProbeOutcome {
    pub fn ranked(position: u32) -> Self {
        Self {
            position: Some(position),
            found: true,
            detail: Value::Null,
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    RateLimited,
    MalformedResponse,
    Upstream,
    ProviderUnavailable,
    CredentialRejected,
}

impl ProbeErrorKind {
    /// Errors that will fail every remaining item the same way.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            ProbeErrorKind::ProviderUnavailable | ProbeErrorKind::CredentialRejected
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProbeErrorKind::Timeout
                | ProbeErrorKind::RateLimited
                | ProbeErrorKind::Upstream
                | ProbeErrorKind::ProviderUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::RateLimited => "rate_limited",
            ProbeErrorKind::MalformedResponse => "malformed_response",
            ProbeErrorKind::Upstream => "upstream",
            ProbeErrorKind::ProviderUnavailable => "provider_unavailable",
            ProbeErrorKind::CredentialRejected => "credential_rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Timeout, message)
    }

    pub fn is_systemic(&self) -> bool {
        self.kind.is_systemic()
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter for one check kind. Calls are independent and never retried here;
/// the caller bounds each call with its own timeout.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, request: &ProbeRequest) -> Result<ProbeOutcome, ProbeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provider_wide_failures_are_systemic() {
        assert!(ProbeErrorKind::CredentialRejected.is_systemic());
        assert!(ProbeErrorKind::ProviderUnavailable.is_systemic());
        assert!(!ProbeErrorKind::RateLimited.is_systemic());
        assert!(!ProbeErrorKind::MalformedResponse.is_systemic());
    }

    #[test]
    fn error_display_names_the_kind() {
        let err = ProbeError::new(ProbeErrorKind::RateLimited, "slow down");
        assert_eq!(err.to_string(), "rate_limited: slow down");
        assert!(err.retryable);
        assert!(!ProbeError::new(ProbeErrorKind::CredentialRejected, "bad key").retryable);
    }
}
