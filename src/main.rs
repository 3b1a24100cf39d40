use std::sync::Arc;

use gem_gateway::modules;
use gem_gateway::proxy;
use gem_gateway::proxy::config::BackendConfig;
use gem_gateway::proxy::upstream::{ChatBackend, InMemoryBackend, RemoteBackend};

#[tokio::main]
async fn main() -> Result<(), String> {
    let mut config = match modules::config::load_gateway_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load gateway config: {}. using defaults", err);
            let cfg = proxy::GatewayConfig::default();
            let _ = modules::config::save_gateway_config(&cfg);
            cfg
        }
    };

    modules::config::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    let _log_guard = modules::logger::init_logger(&config.log_level);

    let bind_address = if let Ok(addr) = std::env::var("GEM_GATEWAY_BIND") {
        addr
    } else {
        config.get_bind_address().to_string()
    };

    if config.secret_key == proxy::GatewayConfig::default().secret_key {
        tracing::warn!("using the default secret key; set GEM_GATEWAY_SECRET_KEY");
    }
    if config.auth.is_relaxed() {
        tracing::warn!(
            "bearer token claim checks disabled (exp: {}, aud: {}, iss: {}); only signatures are verified",
            !config.auth.verify_exp,
            !config.auth.verify_aud,
            !config.auth.verify_iss
        );
    }

    let backend: Arc<dyn ChatBackend> = match &config.backend {
        BackendConfig::Memory => {
            tracing::warn!("using the in-memory backend; replies are echoes");
            Arc::new(InMemoryBackend::new())
        }
        BackendConfig::Remote(remote) => {
            tracing::info!("forwarding to backend at {}", remote.base_url);
            Arc::new(RemoteBackend::new(remote)?)
        }
    };

    if !backend.is_running().await {
        tracing::warn!("backend is not reachable yet; requests will fail until it is");
    }

    let (server, handle) = proxy::AxumServer::start(bind_address.clone(), &config, backend)
        .await
        .map_err(|e| format!("failed to start gateway server: {}", e))?;

    tracing::info!(
        "gem-gateway listening on http://{}:{}",
        bind_address,
        config.port
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {}", e))?;

    tracing::info!("shutdown requested, stopping server...");
    server.stop();
    let _ = handle.await;

    Ok(())
}
