//! Connection resolution: turns raw, possibly missing parameter strings into a
//! validated [`ConnectionConfig`]. Callers decide where the strings come from
//! (flags, environment, a secrets file); nothing in here reads ambient state.

use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_VERSION: &str = "v3.1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required value: {field}")]
    Missing { field: &'static str },
    #[error("invalid manager url '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid value for {field}: '{value}' (expected true/false)")]
    InvalidFlag { field: &'static str, value: String },
    #[error("invalid api version '{0}' (expected something like v3.1)")]
    InvalidApiVersion(String),
    #[error("invalid value for {field}: '{value}' (expected a positive number of seconds)")]
    InvalidTimeout { field: &'static str, value: String },
    #[error("invalid {kind} id '{id}': use letters, digits, '-', '_' or '.'")]
    InvalidIdentifier { kind: &'static str, id: String },
}

/// Unvalidated connection parameters as supplied by the invoker.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tenant: Option<String>,
    pub insecure: Option<String>,
    pub api_version: Option<String>,
    pub request_timeout_secs: Option<String>,
}

/// Validated, immutable connection settings for one invocation.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    endpoint: Url,
    username: String,
    password: String,
    tenant: String,
    verify_tls: bool,
    api_version: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tenant", &self.tenant)
            .field("verify_tls", &self.verify_tls)
            .field("api_version", &self.api_version)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Absolute URL for a path under the versioned API root.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.api_version,
            path.trim_start_matches('/')
        )
    }
}

/// Validates raw parameters. Pure: the same input always yields the same result.
pub fn resolve(params: &ConnectionParams) -> Result<ConnectionConfig, ConfigError> {
    let endpoint = parse_endpoint(required("manager url", &params.endpoint)?)?;
    let username = required("username", &params.username)?.to_string();
    let password = required("password", &params.password)?.to_string();
    let tenant = required("tenant", &params.tenant)?.to_string();
    let verify_tls = !parse_flag("insecure", params.insecure.as_deref())?;
    let api_version = normalize_api_version(params.api_version.as_deref())?;
    let request_timeout = parse_timeout(
        "request timeout",
        params.request_timeout_secs.as_deref(),
        DEFAULT_REQUEST_TIMEOUT,
    )?;

    Ok(ConnectionConfig {
        endpoint,
        username,
        password,
        tenant,
        verify_tls,
        api_version,
        request_timeout,
    })
}

/// Manager identifiers (blueprints, deployments) share one charset.
pub fn validate_resource_id(kind: &'static str, id: &str) -> Result<(), ConfigError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            kind,
            id: id.to_string(),
        })
    }
}

/// Parses a boolean switch the way CI variables tend to spell them.
pub fn parse_flag(field: &'static str, raw: Option<&str>) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Parses a whole number of seconds, falling back to `default` when absent.
pub fn parse_timeout(
    field: &'static str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::InvalidTimeout {
                field,
                value: value.to_string(),
            }),
        },
    }
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { field })
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        value: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim_end_matches('/')).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(url)
}

fn normalize_api_version(raw: Option<&str>) -> Result<String, ConfigError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    let Some(raw) = raw else {
        return Ok(DEFAULT_API_VERSION.to_string());
    };
    let trimmed = raw.trim_matches('/');
    let version = trimmed.strip_prefix("api/").unwrap_or(trimmed);
    let valid = version
        .strip_prefix('v')
        .map(|rest| {
            let mut parts = rest.split('.');
            let major_ok = parts
                .next()
                .map_or(false, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
            let minor_ok = parts
                .next()
                .map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
            major_ok && minor_ok && parts.next().is_none()
        })
        .unwrap_or(false);
    if valid {
        Ok(version.to_string())
    } else {
        Err(ConfigError::InvalidApiVersion(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams {
            endpoint: Some("https://manager.example.com/".into()),
            username: Some("admin".into()),
            password: Some("secret".into()),
            tenant: Some("default_tenant".into()),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_with_defaults() {
        let config = resolve(&params()).expect("valid config");
        assert_eq!(config.endpoint().as_str(), "https://manager.example.com/");
        assert_eq!(config.tenant(), "default_tenant");
        assert!(config.verify_tls());
        assert_eq!(config.api_version(), "v3.1");
        assert_eq!(config.request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            config.api_url("/blueprints/web"),
            "https://manager.example.com/api/v3.1/blueprints/web"
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        assert_eq!(resolve(&params()).unwrap(), resolve(&params()).unwrap());
    }

    #[test]
    fn empty_tenant_is_rejected() {
        let mut p = params();
        p.tenant = Some("   ".into());
        assert_eq!(
            resolve(&p).unwrap_err(),
            ConfigError::Missing { field: "tenant" }
        );
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let mut p = params();
        p.password = None;
        assert_eq!(
            resolve(&p).unwrap_err(),
            ConfigError::Missing { field: "password" }
        );
    }

    #[test]
    fn malformed_urls_are_rejected() {
        for bad in ["manager.example.com", "ftp://manager", "http://", "not a url"] {
            let mut p = params();
            p.endpoint = Some(bad.into());
            assert!(
                matches!(resolve(&p), Err(ConfigError::InvalidUrl { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn insecure_flag_spellings() {
        let mut p = params();
        p.insecure = Some("YES".into());
        assert!(!resolve(&p).unwrap().verify_tls());
        p.insecure = Some("off".into());
        assert!(resolve(&p).unwrap().verify_tls());
        p.insecure = Some("maybe".into());
        assert!(matches!(
            resolve(&p),
            Err(ConfigError::InvalidFlag { field: "insecure", .. })
        ));
    }

    #[test]
    fn api_version_is_normalized() {
        let mut p = params();
        p.api_version = Some("/api/v3/".into());
        assert_eq!(resolve(&p).unwrap().api_version(), "v3");
        p.api_version = Some("3.1".into());
        assert!(matches!(
            resolve(&p),
            Err(ConfigError::InvalidApiVersion(_))
        ));
    }

    #[test]
    fn request_timeout_must_be_positive() {
        let mut p = params();
        p.request_timeout_secs = Some("15".into());
        assert_eq!(
            resolve(&p).unwrap().request_timeout(),
            Duration::from_secs(15)
        );
        p.request_timeout_secs = Some("0".into());
        assert!(matches!(
            resolve(&p),
            Err(ConfigError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = resolve(&params()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn resource_ids() {
        assert!(validate_resource_id("blueprint", "web-app_v1.2").is_ok());
        assert!(validate_resource_id("blueprint", "").is_err());
        assert!(validate_resource_id("deployment", "has space").is_err());
        assert!(validate_resource_id("deployment", "slash/y").is_err());
    }
}
