use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_AUTHORITY_BASE: &str = "https://login.microsoftonline.com";
const DEFAULT_GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCOPES: &[&str] = &["offline_access", "https://graph.microsoft.com/Mail.Read"];

/// Application identity and endpoint configuration.
///
/// Immutable after process start; shared read-only by every component.
/// Absence of a required value is a startup-time fatal error, never checked
/// lazily.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub redirect_uri: String,
    /// Scopes requested during authorization, joined with spaces on the wire.
    pub scopes: Vec<String>,
    /// Identity provider base, overridable for tests (`MAILGATE_AUTHORITY_BASE`).
    pub authority_base: String,
    /// Mail API base, overridable for tests (`MAILGATE_GRAPH_API_BASE`).
    pub graph_base: String,
    pub http_timeout: Duration,
}

impl GraphConfig {
    /// Loads configuration from `MAILGATE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let scopes = optional_env("MAILGATE_SCOPES")
            .map(|raw| {
                raw.split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect());

        let http_timeout = optional_env("MAILGATE_HTTP_TIMEOUT_SECS")
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| {
                    Error::Config(format!(
                        "MAILGATE_HTTP_TIMEOUT_SECS must be an integer number of seconds, got '{raw}'"
                    ))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Ok(Self {
            client_id: required_env("MAILGATE_CLIENT_ID")?,
            client_secret: required_env("MAILGATE_CLIENT_SECRET")?,
            tenant_id: required_env("MAILGATE_TENANT_ID")?,
            redirect_uri: required_env("MAILGATE_REDIRECT_URI")?,
            scopes,
            authority_base: optional_env("MAILGATE_AUTHORITY_BASE")
                .unwrap_or_else(|| DEFAULT_AUTHORITY_BASE.to_string()),
            graph_base: optional_env("MAILGATE_GRAPH_API_BASE")
                .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string()),
            http_timeout: Duration::from_secs(http_timeout),
        })
    }

    pub fn authorize_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority_base.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_base.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

fn required_env(name: &str) -> Result<String> {
    optional_env(name).ok_or_else(|| Error::Config(format!("missing required env var {name}")))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Serializes env mutation across tests in this module.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const REQUIRED_VARS: &[(&str, &str)] = &[
        ("MAILGATE_CLIENT_ID", "client-a"),
        ("MAILGATE_CLIENT_SECRET", "secret-a"),
        ("MAILGATE_TENANT_ID", "tenant-a"),
        ("MAILGATE_REDIRECT_URI", "http://localhost:8080/callback"),
    ];

    const ALL_VARS: &[&str] = &[
        "MAILGATE_CLIENT_ID",
        "MAILGATE_CLIENT_SECRET",
        "MAILGATE_TENANT_ID",
        "MAILGATE_REDIRECT_URI",
        "MAILGATE_SCOPES",
        "MAILGATE_AUTHORITY_BASE",
        "MAILGATE_GRAPH_API_BASE",
        "MAILGATE_HTTP_TIMEOUT_SECS",
    ];

    fn clear_env() {
        for name in ALL_VARS {
            std::env::remove_var(name);
        }
    }

    fn set_required() {
        for (name, value) in REQUIRED_VARS {
            std::env::set_var(name, value);
        }
    }

    #[test]
    fn from_env_fails_fast_on_missing_required_value() {
        let _lock = ENV_LOCK.lock().expect("lock env mutation");
        clear_env();
        set_required();
        std::env::remove_var("MAILGATE_CLIENT_SECRET");

        let error = GraphConfig::from_env().expect_err("missing secret must fail");
        assert!(error.to_string().contains("MAILGATE_CLIENT_SECRET"));
        clear_env();
    }

    #[test]
    fn from_env_applies_defaults() {
        let _lock = ENV_LOCK.lock().expect("lock env mutation");
        clear_env();
        set_required();

        let config = GraphConfig::from_env().expect("load config");
        assert_eq!(config.authority_base, DEFAULT_AUTHORITY_BASE);
        assert_eq!(config.graph_base, DEFAULT_GRAPH_API_BASE);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.scopes.iter().any(|s| s == "offline_access"));
        clear_env();
    }

    #[test]
    fn from_env_honors_overrides() {
        let _lock = ENV_LOCK.lock().expect("lock env mutation");
        clear_env();
        set_required();
        std::env::set_var("MAILGATE_GRAPH_API_BASE", "http://127.0.0.1:9999/v1.0");
        std::env::set_var("MAILGATE_SCOPES", "Mail.Read Mail.ReadBasic");
        std::env::set_var("MAILGATE_HTTP_TIMEOUT_SECS", "5");

        let config = GraphConfig::from_env().expect("load config");
        assert_eq!(config.graph_base, "http://127.0.0.1:9999/v1.0");
        assert_eq!(config.scopes, vec!["Mail.Read", "Mail.ReadBasic"]);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        clear_env();
    }

    #[test]
    fn endpoints_are_tenant_scoped() {
        let config = GraphConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            tenant_id: "tenant-a".into(),
            redirect_uri: "http://localhost:8080/callback".into(),
            scopes: vec!["Mail.Read".into()],
            authority_base: "https://login.example.test/".into(),
            graph_base: DEFAULT_GRAPH_API_BASE.into(),
            http_timeout: Duration::from_secs(30),
        };
        assert_eq!(
            config.authorize_endpoint(),
            "https://login.example.test/tenant-a/oauth2/v2.0/authorize"
        );
        assert_eq!(
            config.token_endpoint(),
            "https://login.example.test/tenant-a/oauth2/v2.0/token"
        );
        assert_eq!(config.scope_string(), "Mail.Read");
    }
}
