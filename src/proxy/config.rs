use serde::{Deserialize, Serialize};

/// Which backend the gateway forwards to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process echo backend
    Memory,
    /// HTTP relay
    Remote(RemoteBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBackendConfig {
    /// Relay base URL, e.g. `http://127.0.0.1:9000`
    pub base_url: String,
    /// Bearer key sent to the relay
    #[serde(default)]
    pub api_key: Option<String>,
    /// Outbound proxy (http://, https://, socks5://)
    #[serde(default)]
    pub proxy: Option<String>,
}

/// Bearer token verification settings.
///
/// The signature is always verified (HS256 with `secret_key`). Claim checks can be
/// switched off individually; all three default to enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub verify_exp: bool,
    #[serde(default = "default_true")]
    pub verify_aud: bool,
    #[serde(default = "default_true")]
    pub verify_iss: bool,
    /// Accepted `aud` values; with `verify_aud` on and none configured, any token
    /// carrying an `aud` claim is rejected
    #[serde(default)]
    pub audience: Vec<String>,
    #[serde(default)]
    pub issuer: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verify_exp: true,
            verify_aud: true,
            verify_iss: true,
            audience: Vec::new(),
            issuer: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Signature-only verification: expired tokens and any `aud`/`iss` are accepted
    pub fn relaxed() -> Self {
        Self {
            verify_exp: false,
            verify_aud: false,
            verify_iss: false,
            ..Self::default()
        }
    }

    pub fn is_relaxed(&self) -> bool {
        !(self.verify_exp && self.verify_aud && self.verify_iss)
    }
}

/// Gateway service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// - false: bind 127.0.0.1 only (default)
    /// - true: bind 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// HS256 secret for bearer tokens
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Backend call timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Upper bound for request bodies, uploads included
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Model requested for every conversation
    #[serde(default = "default_model")]
    pub model: String,

    /// Run turns sharing a resume token one at a time
    #[serde(default)]
    pub serialize_conversations: bool,

    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allow_lan_access: false,
            secret_key: default_secret_key(),
            auth: AuthConfig::default(),
            log_level: default_log_level(),
            request_timeout: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            model: default_model(),
            serialize_conversations: false,
            backend: BackendConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    5800
}

fn default_secret_key() -> String {
    "changeme".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

impl GatewayConfig {
    /// Actual listen address
    /// - allow_lan_access = false: "127.0.0.1"
    /// - allow_lan_access = true: "0.0.0.0"
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 5800);
        assert_eq!(config.secret_key, "changeme");
        assert_eq!(config.request_timeout, 300);
        assert!(!config.auth.is_relaxed());
        assert!(matches!(config.backend, BackendConfig::Memory));
        assert_eq!(config.get_bind_address(), "127.0.0.1");
    }

    #[test]
    fn test_remote_backend_parses() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"backend": {"kind": "remote", "base_url": "http://relay:9000"}}"#,
        )
        .unwrap();
        match config.backend {
            BackendConfig::Remote(remote) => {
                assert_eq!(remote.base_url, "http://relay:9000");
                assert!(remote.api_key.is_none());
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_partial_auth_section() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"auth": {"verify_exp": false}}"#).unwrap();
        assert!(!config.auth.verify_exp);
        assert!(config.auth.verify_aud);
        assert!(config.auth.is_relaxed());
    }
}
