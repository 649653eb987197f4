use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.pool.size == 0 {
        anyhow::bail!("Pool size must be at least 1");
    }

    // Below 4 characters even modest pools exhaust the code space; beyond 32
    // there is no practical benefit.
    if !(4..=32).contains(&config.pool.code_length) {
        anyhow::bail!(
            "Ticket code length must be between 4 and 32, got {}",
            config.pool.code_length
        );
    }

    if config.pool.max_code_retries == 0 {
        anyhow::bail!("max_code_retries must be at least 1");
    }

    if config.allocator.max_attempts == 0 {
        anyhow::bail!("Allocator max_attempts must be at least 1");
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid log format: {}", config.logging.format);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_validation() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_tiny_code_length_is_rejected() {
        let mut config = Config::default();
        config.pool.code_length = 2;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }
}
