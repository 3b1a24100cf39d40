use std::fs;
use std::path::PathBuf;

const DATA_DIR: &str = ".gem-gateway";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "GEM_GATEWAY_DATA_DIR";

/// Get data directory path, creating it on first use
pub fn get_data_dir() -> Result<PathBuf, String> {
    let data_dir = match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .ok_or("Failed to get user home directory")?
            .join(DATA_DIR),
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(data_dir)
}
