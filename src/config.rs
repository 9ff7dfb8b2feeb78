// Configuration - resolved once at process start, passed by value
// Replaces hidden process-global client/settings state with explicit values.

use std::env;
use std::path::PathBuf;

// ============================================================================
// GATEWAY CONFIG
// ============================================================================

/// Resolved extraction-provider configuration.
///
/// `model` handles vision calls (receipt extraction); `text_model` handles
/// the cheap text-only mapping calls. The endpoint speaks the OpenAI
/// chat-completions wire format, so any compatible provider works.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub provider: String,
    pub model: String,
    pub text_model: String,
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        GatewayConfig {
            provider: env_or("EXTRACTION_PROVIDER", "openai"),
            model: env_or("EXTRACTION_MODEL", "gpt-4o"),
            text_model: env_or("EXTRACTION_TEXT_MODEL", "gpt-4o-mini"),
            endpoint: env_or(
                "EXTRACTION_ENDPOINT",
                "https://api.openai.com/v1/chat/completions",
            ),
            api_key: env_or("EXTRACTION_API_KEY", ""),
            timeout_secs: env_or("EXTRACTION_TIMEOUT_SECS", "60")
                .parse()
                .unwrap_or(60),
        }
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

/// Application-level paths plus the gateway configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Resolve configuration from the environment (after the binaries have
    /// loaded `.env` via dotenvy), with workable local defaults.
    pub fn from_env() -> Self {
        AppConfig {
            db_path: PathBuf::from(env_or("EXPENSE_DB_PATH", "expenses.db")),
            upload_dir: PathBuf::from(env_or("EXPENSE_UPLOAD_DIR", "uploads")),
            gateway: GatewayConfig::from_env(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only assert on keys the test environment is unlikely to set.
        let config = GatewayConfig::from_env();
        assert!(!config.endpoint.is_empty());
        assert!(config.timeout_secs > 0);
    }

    #[test]
    fn test_app_config_paths_default() {
        let config = AppConfig::from_env();
        assert!(!config.db_path.as_os_str().is_empty());
        assert!(!config.upload_dir.as_os_str().is_empty());
    }
}
