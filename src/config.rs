use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub generation: GenerationDefaults,
    #[serde(default)]
    pub model_card: ModelCard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

/// Sampling parameters sent upstream when the client leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// Static metadata reported by the model listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCard {
    pub version: String,
    pub format: String,
    pub parameter_size: String,
    pub quantization_level: String,
    pub size: u64,
    pub digest: String,
    pub license: String,
    pub modified_at: String,
}

fn default_port() -> u16 {
    6000
}

fn default_base_url() -> String {
    "https://api.cerebras.ai/v1".to_string()
}

fn default_model() -> String {
    "qwen-3-235b-a22b-instruct-2507".to_string()
}

fn default_api_key_env() -> String {
    "UPSTREAM_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_idle_timeout() -> u64 {
    60
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            generation: GenerationDefaults::default(),
            model_card: ModelCard::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_completion_tokens: Some(20_000),
            temperature: Some(0.7),
            top_p: Some(0.8),
        }
    }
}

impl Default for ModelCard {
    fn default() -> Self {
        Self {
            version: "0.1.17".to_string(),
            format: "gguf".to_string(),
            parameter_size: "7B".to_string(),
            quantization_level: "Q4_0".to_string(),
            size: 4_800_000_000,
            digest: "sha256:abcd1234".to_string(),
            license: "Apache 2.0".to_string(),
            modified_at: "2024-01-01T10:00:00Z".to_string(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Every section is optional.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `UPSTREAM_MODEL`, `UPSTREAM_BASE_URL` and `PORT` on top of file values.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("UPSTREAM_MODEL").filter(|m| !m.trim().is_empty()) {
            self.upstream.model = model.trim().to_string();
        }
        if let Some(url) = lookup("UPSTREAM_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.upstream.base_url = url.trim().to_string();
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ProxyError::config(format!("PORT must be a port number, got '{port}'")))?;
        }
        Ok(())
    }

    /// Resolve the API key from the configured environment variable.
    ///
    /// Called once at startup; a missing key keeps the process from starting.
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.upstream.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your Cerebras API key.",
                self.upstream.api_key_env
            ))),
        }
    }

    /// Model family for listing details: the first dash-separated segment of
    /// the upstream model (`qwen` for `qwen-3-235b-a22b-instruct-2507`).
    pub fn model_family(&self) -> String {
        self.upstream
            .model
            .split('-')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.upstream.model)
            .to_string()
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.upstream.base_url.trim_end_matches('/'))
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("ollama-cerebras-proxy.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(
            PathBuf::from(xdg)
                .join("ollama-cerebras-proxy")
                .join("config.toml"),
        );
    }
    if let Some(home) = home_dir() {
        paths.push(
            home.join(".config")
                .join("ollama-cerebras-proxy")
                .join("config.toml"),
        );
        paths.push(home.join(".ollama-cerebras-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[upstream]
model = "llama-3.3-70b"
stream_idle_timeout_secs = 5

[generation]
temperature = 0.2
"#
        )
        .unwrap();

        let config = ProxyConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.upstream.model, "llama-3.3-70b");
        assert_eq!(config.upstream.base_url, "https://api.cerebras.ai/v1");
        assert_eq!(config.upstream.stream_idle_timeout_secs, 5);
        assert_eq!(config.generation.temperature, Some(0.2));
        // unset keys keep their defaults
        assert_eq!(config.generation.max_completion_tokens, Some(20_000));
        assert_eq!(config.generation.top_p, Some(0.8));
        assert_eq!(config.model_card.version, "0.1.17");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("UPSTREAM_MODEL", "gpt-oss-120b"),
            ("PORT", "7000"),
        ]
        .into_iter()
        .collect();

        let mut config = ProxyConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.upstream.model, "gpt-oss-120b");
        assert_eq!(config.port, 7000);
        assert_eq!(config.upstream.base_url, "https://api.cerebras.ai/v1");
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let mut config = ProxyConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "PORT").then(|| "sixty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = ProxyConfig::default();
        config.upstream.api_key_env = "OLLAMA_CEREBRAS_PROXY_TEST_UNSET_KEY".to_string();
        assert!(matches!(
            config.resolve_api_key(),
            Err(ProxyError::Config { .. })
        ));
    }

    #[test]
    fn test_model_family_and_url() {
        let mut config = ProxyConfig::default();
        assert_eq!(config.model_family(), "qwen");
        config.upstream.model = "gpt-oss-120b".to_string();
        assert_eq!(config.model_family(), "gpt");
        config.upstream.base_url = "https://api.cerebras.ai/v1/".to_string();
        assert_eq!(
            config.chat_completions_url(),
            "https://api.cerebras.ai/v1/chat/completions"
        );
    }
}
