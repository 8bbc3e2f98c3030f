//! Reconcile-time endpoint checks for OTLP outputs

use thiserror::Error;
use url::Url;

use crate::crd::OtlpProtocol;

/// Reasons an OTLP endpoint is not usable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The value (inline or from a secret) resolved to nothing
    #[error("failed to resolve value")]
    ResolveFailed,

    /// gRPC endpoints need an explicit port
    #[error("missing port")]
    PortMissing,

    /// HTTP endpoints need an `http` or `https` scheme
    #[error("missing or unsupported protocol scheme")]
    UnsupportedScheme,

    /// The value is not a URL
    #[error("parse \"{endpoint}\": {reason}")]
    Invalid {
        /// The offending value
        endpoint: String,
        /// Parser diagnostic
        reason: String,
    },
}

/// Check a resolved endpoint against the output protocol.
///
/// gRPC endpoints may omit the scheme but must carry a port. HTTP endpoints
/// must carry an `http(s)` scheme and may omit the port.
pub fn validate_endpoint(endpoint: &str, protocol: OtlpProtocol) -> Result<(), EndpointError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(EndpointError::ResolveFailed);
    }

    let has_scheme = endpoint.contains("://");
    if protocol == OtlpProtocol::Http && !has_scheme {
        return Err(EndpointError::UnsupportedScheme);
    }

    let candidate = if has_scheme {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let url = Url::parse(&candidate).map_err(|e| EndpointError::Invalid {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().map_or(true, str::is_empty) {
        return Err(EndpointError::Invalid {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        });
    }

    match protocol {
        OtlpProtocol::Http => {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(EndpointError::UnsupportedScheme);
            }
        }
        OtlpProtocol::Grpc => {
            if !has_explicit_port(&candidate) {
                return Err(EndpointError::PortMissing);
            }
        }
    }
    Ok(())
}

/// True when the authority of `url` ends in `:<digits>`.
///
/// The url crate drops default ports (`https://host:443` has no port), so
/// the check works on the raw text.
fn has_explicit_port(url: &str) -> bool {
    let Some((_, rest)) = url.split_once("://") else {
        return false;
    };
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    let port = match host_port.rfind(']') {
        Some(end) => host_port[end + 1..].strip_prefix(':'),
        None => host_port.rsplit_once(':').map(|(_, p)| p),
    };
    port.is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
