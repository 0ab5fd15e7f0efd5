use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged process-level configuration.
///
/// Merge order: CLI > ENV > config file defaults, computed once at
/// bootstrap. This only governs process-level settings (bind address,
/// auth token, DSN); the provider/virtual-model data model lives in
/// `rcc-core::config` and is not merged across sources the way these
/// fields are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Shared bearer token compared constant-time against inbound requests.
    /// `None` disables northbound authentication entirely.
    pub auth_token: Option<String>,
    /// Optional outbound proxy used for all upstream egress.
    pub proxy: Option<String>,
    /// Storage DSN for the append-only trace store.
    pub dsn: String,
    /// Whether to redact sensitive header/body fields in emitted events.
    pub event_redact_sensitive: bool,
    /// Default per-scheduler maximum concurrent in-flight requests.
    pub default_max_in_flight: usize,
    /// Graceful shutdown drain deadline, in seconds.
    pub shutdown_deadline_secs: u64,
}

/// Optional layer used to merge CLI/env/file values before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub auth_token: Option<Option<String>>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub event_redact_sensitive: Option<bool>,
    pub default_max_in_flight: Option<usize>,
    pub shutdown_deadline_secs: Option<u64>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.auth_token.is_some() {
            self.auth_token = other.auth_token;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.event_redact_sensitive.is_some() {
            self.event_redact_sensitive = other.event_redact_sensitive;
        }
        if other.default_max_in_flight.is_some() {
            self.default_max_in_flight = other.default_max_in_flight;
        }
        if other.shutdown_deadline_secs.is_some() {
            self.shutdown_deadline_secs = other.shutdown_deadline_secs;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            auth_token: self.auth_token.unwrap_or(None),
            proxy: self.proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
            default_max_in_flight: self.default_max_in_flight.unwrap_or(50),
            shutdown_deadline_secs: self.shutdown_deadline_secs.unwrap_or(30),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            auth_token: Some(value.auth_token),
            proxy: value.proxy,
            dsn: Some(value.dsn),
            event_redact_sensitive: Some(value.event_redact_sensitive),
            default_max_in_flight: Some(value.default_max_in_flight),
            shutdown_deadline_secs: Some(value.shutdown_deadline_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_values() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(8787),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9000),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(9000));
    }

    #[test]
    fn into_config_requires_dsn() {
        let patch = GlobalConfigPatch::default();
        assert!(matches!(
            patch.into_config(),
            Err(GlobalConfigError::MissingField("dsn"))
        ));
    }
}
