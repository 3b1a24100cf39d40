use std::fs;
use std::path::Path;

use crate::proxy::config::{AuthConfig, BackendConfig, RemoteBackendConfig};
use crate::proxy::GatewayConfig;
use super::paths::get_data_dir;

const CONFIG_FILE: &str = "gateway_config.json";

/// Load gateway configuration from the data directory
pub fn load_gateway_config() -> Result<GatewayConfig, String> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = GatewayConfig::default();
        let _ = save_config_to(&config_path, &config);
        return Ok(config);
    }

    load_config_from(&config_path)
}

/// Save gateway configuration to the data directory
pub fn save_gateway_config(config: &GatewayConfig) -> Result<(), String> {
    let config_path = get_data_dir()?.join(CONFIG_FILE);
    save_config_to(&config_path, config)
}

pub fn load_config_from(path: &Path) -> Result<GatewayConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config file: {}", e))
}

pub fn save_config_to(path: &Path, config: &GatewayConfig) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(path, content)
        .map_err(|e| format!("Failed to save config: {}", e))
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

/// Apply `GEM_GATEWAY_*` overrides; `lookup` is `std::env::var` outside tests
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("GEM_GATEWAY_PORT") {
        config.port = port
            .parse()
            .map_err(|e| format!("Invalid GEM_GATEWAY_PORT {:?}: {}", port, e))?;
    }

    if let Some(secret) = lookup("GEM_GATEWAY_SECRET_KEY").filter(|s| !s.is_empty()) {
        config.secret_key = secret;
    }

    if let Some(level) = lookup("GEM_GATEWAY_LOG_LEVEL").filter(|s| !s.is_empty()) {
        config.log_level = level;
    }

    if let Some(value) = lookup("GEM_GATEWAY_ALLOW_LAN") {
        if is_truthy(&value) {
            config.allow_lan_access = true;
        }
    }

    if let Some(url) = lookup("GEM_GATEWAY_BACKEND_URL").filter(|s| !s.is_empty()) {
        let (api_key, proxy) = match &config.backend {
            BackendConfig::Remote(remote) => (remote.api_key.clone(), remote.proxy.clone()),
            BackendConfig::Memory => (None, None),
        };
        config.backend = BackendConfig::Remote(RemoteBackendConfig {
            base_url: url,
            api_key,
            proxy,
        });
    }

    if let Some(value) = lookup("GEM_GATEWAY_RELAXED_AUTH") {
        if is_truthy(&value) {
            config.auth = AuthConfig {
                audience: std::mem::take(&mut config.auth.audience),
                issuer: std::mem::take(&mut config.auth.issuer),
                ..AuthConfig::relaxed()
            };
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = GatewayConfig::default();
        config.port = 6100;
        config.serialize_conversations = true;
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.port, 6100);
        assert!(loaded.serialize_conversations);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config file"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                ("GEM_GATEWAY_PORT", "7000"),
                ("GEM_GATEWAY_SECRET_KEY", "s3cret"),
                ("GEM_GATEWAY_BACKEND_URL", "http://relay:9000"),
                ("GEM_GATEWAY_RELAXED_AUTH", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.secret_key, "s3cret");
        assert!(!config.auth.verify_exp);
        assert!(matches!(
            config.backend,
            BackendConfig::Remote(ref remote) if remote.base_url == "http://relay:9000"
        ));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = GatewayConfig::default();
        let result = apply_env_overrides(&mut config, lookup(&[("GEM_GATEWAY_PORT", "http")]));
        assert!(result.is_err());
        assert_eq!(config.port, 5800);
    }
}
