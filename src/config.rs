use crate::error::{GatewayError, Result};
use crate::providers::{BackendFormat, ProviderPreset};
use crate::translate::canonical::{ReasoningDirective, ReasoningLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "dialect-bridge.toml";
const CONFIG_DIR: &str = "dialect-bridge";

/// Default model for a backend selected through `ANTHROPIC_BASE_URL`.
pub const DEFAULT_ANTHROPIC_ENV_MODEL: &str = "glm-4.6";
/// Default model for a backend selected through `OPENAI_BASE_URL`.
pub const DEFAULT_OPENAI_ENV_MODEL: &str = "MBZUAI-IFM/K2-Think";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub backend: BackendConfig,
    /// Prepended to the system prompt of every backend request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Requested model id -> model id sent to the backend.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Model id -> reasoning level (`off`, `auto`, `low`, `medium`, `high`).
    #[serde(default)]
    pub reasoning: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<BackendFormat>,
    /// When set, every request goes to this model regardless of what the
    /// caller asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4222
}

impl GatewayConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backend,
            system_prompt: None,
            models: HashMap::new(),
            reasoning: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// The backend comes from the environment when `ANTHROPIC_BASE_URL` +
    /// `ANTHROPIC_AUTH_TOKEN` or `OPENAI_BASE_URL` + `OPENAI_API_KEY` are set,
    /// otherwise from the first config file found (explicit path > CWD >
    /// platform config dir > home).
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        let env_backend = BackendConfig::from_env(|key| std::env::var(key).ok());

        let file = match explicit_path {
            Some(path) => Some(Self::load(path)?),
            None => match config_search_paths().into_iter().find(|p| p.exists()) {
                Some(path) => {
                    tracing::info!(path = %path.display(), "Loading config");
                    Some(Self::load(&path)?)
                }
                None => None,
            },
        };

        match (file, env_backend) {
            (Some(mut config), Some(backend)) => {
                tracing::info!(backend = %backend.name, "Backend selected from environment");
                config.backend = backend;
                Ok(config)
            }
            (Some(config), None) => Ok(config),
            (None, Some(backend)) => {
                tracing::info!(backend = %backend.name, "Backend selected from environment");
                Ok(Self::new(backend))
            }
            (None, None) => Err(GatewayError::config(format!(
                "No backend configured. Set ANTHROPIC_BASE_URL/ANTHROPIC_AUTH_TOKEN or \
                 OPENAI_BASE_URL/OPENAI_API_KEY, or create a config file. Searched: {}",
                config_search_paths()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Model id to send upstream: the backend's fixed model, else the
    /// configured redirect, else the requested id.
    pub fn resolve_model(&self, requested: &str) -> String {
        if let Some(model) = &self.backend.model {
            return model.clone();
        }
        self.models
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }

    /// Reasoning directive configured for `model`, if any.
    pub fn reasoning_for(&self, model: &str) -> Option<ReasoningDirective> {
        self.reasoning.get(model).map(|level| {
            let level = ReasoningLevel::parse(level);
            ReasoningDirective {
                level,
                budget_tokens: level.budget_tokens(),
            }
        })
    }

    /// Model ids advertised on `GET /v1/models`.
    pub fn advertised_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        if let Some(model) = &self.backend.model {
            ids.push(model.clone());
        }
        ids.sort();
        ids.dedup();
        ids
    }
}

impl BackendConfig {
    /// Backend selected by environment variables, following the same
    /// precedence as `find_and_load`.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let present = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let (Some(base_url), Some(_)) =
            (present("ANTHROPIC_BASE_URL"), present("ANTHROPIC_AUTH_TOKEN"))
        {
            return Some(Self {
                name: "anthropic".to_string(),
                base_url: Some(base_url),
                api_key_env: Some("ANTHROPIC_AUTH_TOKEN".to_string()),
                format: Some(BackendFormat::Anthropic),
                model: Some(
                    present("ANTHROPIC_MODEL")
                        .unwrap_or_else(|| DEFAULT_ANTHROPIC_ENV_MODEL.to_string()),
                ),
            });
        }

        if let (Some(base_url), Some(_)) = (present("OPENAI_BASE_URL"), present("OPENAI_API_KEY")) {
            return Some(Self {
                name: "openai".to_string(),
                base_url: Some(base_url),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                format: Some(BackendFormat::OpenAi),
                model: Some(
                    present("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_ENV_MODEL.to_string()),
                ),
            });
        }

        None
    }

    fn preset(&self) -> Option<&'static ProviderPreset> {
        ProviderPreset::from_name(&self.name)
    }

    /// Resolve the effective base URL (config override or preset default).
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.base_url {
            return Ok(url.clone());
        }

        let preset = self.preset().ok_or_else(|| {
            GatewayError::config(format!(
                "Unknown backend '{}' and no base_url configured. Known backends: {}",
                self.name,
                ProviderPreset::all()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Explicit format, else the preset's, else plain `OpenAI`.
    pub fn effective_format(&self) -> BackendFormat {
        self.format
            .or_else(|| self.preset().map(|p| p.format))
            .unwrap_or(BackendFormat::OpenAi)
    }

    pub fn api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .or_else(|| self.preset().map(|p| p.default_api_key_env.to_string()))
            .unwrap_or_else(|| "API_KEY".to_string())
    }

    /// Switch to the backend called `name`. A known preset brings its own
    /// base URL, format and key variable, so values set for the previous
    /// backend are cleared.
    pub fn switch_to(&mut self, name: String) {
        if ProviderPreset::from_name(&name).is_some() {
            self.base_url = None;
            self.format = None;
            self.api_key_env = None;
        }
        self.name = name;
    }

    /// Resolve the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        let var = self.api_key_env();
        std::env::var(&var).map_err(|_| {
            GatewayError::config(format!(
                "Environment variable '{var}' not set. Set it with your backend API key."
            ))
        })
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE)];

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join(CONFIG_DIR)
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join(CONFIG_DIR).join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join(CONFIG_DIR).join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(format!(".{CONFIG_FILE}")));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn backend(name: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            base_url: None,
            api_key_env: None,
            format: None,
            model: None,
        }
    }

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000
system_prompt = "Answer in English."

[backend]
name = "gemini"
api_key_env = "MY_GEMINI_KEY"

[models]
"claude-sonnet-4" = "gemini-2.0-flash"

[reasoning]
"gemini-2.0-flash" = "high"
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.system_prompt.as_deref(), Some("Answer in English."));
        assert_eq!(config.backend.effective_format(), BackendFormat::Gemini);
        assert_eq!(config.backend.api_key_env(), "MY_GEMINI_KEY");
        assert_eq!(config.resolve_model("claude-sonnet-4"), "gemini-2.0-flash");
        assert_eq!(
            config.reasoning_for("gemini-2.0-flash"),
            Some(ReasoningDirective {
                level: ReasoningLevel::High,
                budget_tokens: Some(24576)
            })
        );
        assert_eq!(config.reasoning_for("other"), None);
    }

    #[test]
    fn test_explicit_format_and_unknown_reasoning_level() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[backend]
name = "local"
base_url = "http://localhost:8000/v1"
format = "common"

[reasoning]
"m" = "extreme"
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.backend.effective_format(), BackendFormat::Common);
        assert_eq!(
            config.backend.effective_base_url().unwrap(),
            "http://localhost:8000/v1"
        );
        assert_eq!(config.reasoning_for("m").unwrap().level, ReasoningLevel::Off);
    }

    #[test]
    fn test_effective_base_url_from_preset() {
        assert_eq!(
            backend("openai").effective_base_url().unwrap(),
            "https://api.openai.com/v1"
        );
        assert!(backend("nowhere").effective_base_url().is_err());
    }

    #[test]
    fn test_switch_to_preset_clears_previous_backend() {
        let mut b = BackendConfig {
            name: "custom".into(),
            base_url: Some("http://localhost:9000/v1".into()),
            api_key_env: Some("CUSTOM_KEY".into()),
            format: Some(BackendFormat::Anthropic),
            model: None,
        };
        b.switch_to("groq".into());
        assert_eq!(b.effective_base_url().unwrap(), "https://api.groq.com/openai/v1");
        assert_eq!(b.effective_format(), BackendFormat::Common);
        assert_eq!(b.api_key_env(), "GROQ_API_KEY");

        b.base_url = Some("http://localhost:9000/v1".into());
        b.switch_to("my-own".into());
        assert_eq!(b.name, "my-own");
        assert_eq!(b.base_url.as_deref(), Some("http://localhost:9000/v1"));
    }

    #[test]
    fn test_backend_model_overrides_redirects() {
        let mut config = GatewayConfig::new(backend("openai"));
        config.models.insert("a".into(), "b".into());
        assert_eq!(config.resolve_model("a"), "b");
        assert_eq!(config.resolve_model("z"), "z");

        config.backend.model = Some("fixed".into());
        assert_eq!(config.resolve_model("a"), "fixed");
        assert_eq!(config.advertised_models(), vec!["a", "fixed"]);
    }

    #[test]
    fn test_env_backend_precedence() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_BASE_URL", "https://api.z.ai/api/anthropic"),
            ("ANTHROPIC_AUTH_TOKEN", "tok"),
            ("OPENAI_BASE_URL", "https://router.local/v1"),
            ("OPENAI_API_KEY", "sk"),
        ]
        .into_iter()
        .collect();

        let b = BackendConfig::from_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(b.effective_format(), BackendFormat::Anthropic);
        assert_eq!(b.model.as_deref(), Some(DEFAULT_ANTHROPIC_ENV_MODEL));
        assert_eq!(b.api_key_env(), "ANTHROPIC_AUTH_TOKEN");

        let b = BackendConfig::from_env(|k| {
            env.get(k)
                .filter(|_| k.starts_with("OPENAI"))
                .map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(b.effective_format(), BackendFormat::OpenAi);
        assert_eq!(b.base_url.as_deref(), Some("https://router.local/v1"));
        assert_eq!(b.model.as_deref(), Some(DEFAULT_OPENAI_ENV_MODEL));

        assert!(BackendConfig::from_env(|_| None).is_none());
        assert!(BackendConfig::from_env(|k| {
            (k == "ANTHROPIC_BASE_URL").then(|| "https://x".to_string())
        })
        .is_none());
    }
}
