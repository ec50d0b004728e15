//! Built-in backend presets.
//!
//! A preset fills in the base URL, wire format and API-key variable for a
//! well-known provider, so a config only has to name it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::translate::Dialect;

/// Wire format a backend speaks.
///
/// `Common` is the portable subset of chat-completions understood by generic
/// `OpenAI`-compatible servers; on the wire it is still the `OpenAI` dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFormat {
    #[serde(rename = "openai")]
    OpenAi,
    Common,
    Anthropic,
    Gemini,
}

impl BackendFormat {
    /// The dialect the backend's replies and streams are written in.
    #[must_use]
    pub fn dialect(self) -> Dialect {
        match self {
            Self::OpenAi | Self::Common => Dialect::OpenAi,
            Self::Anthropic => Dialect::Anthropic,
            Self::Gemini => Dialect::Gemini,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Common => "common",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Endpoint URL for a request against `base_url`.
    #[must_use]
    pub fn endpoint_url(self, base_url: &str, model: &str, stream: bool) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::OpenAi | Self::Common => format!("{base}/chat/completions"),
            Self::Anthropic if base.ends_with("/v1") => format!("{base}/messages"),
            Self::Anthropic => format!("{base}/v1/messages"),
            Self::Gemini if stream => format!("{base}/models/{model}:streamGenerateContent?alt=sse"),
            Self::Gemini => format!("{base}/models/{model}:generateContent"),
        }
    }
}

impl fmt::Display for BackendFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub format: BackendFormat,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        format: BackendFormat::OpenAi,
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        format: BackendFormat::OpenAi,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        format: BackendFormat::OpenAi,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        format: BackendFormat::Common,
        default_api_key_env: "FIREWORKS_API_KEY",
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        format: BackendFormat::Common,
        default_api_key_env: "TOGETHER_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        format: BackendFormat::Common,
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "anthropic",
        base_url: "https://api.anthropic.com",
        format: BackendFormat::Anthropic,
        default_api_key_env: "ANTHROPIC_API_KEY",
    },
    ProviderPreset {
        name: "zhipu",
        base_url: "https://open.bigmodel.cn/api/anthropic",
        format: BackendFormat::Anthropic,
        default_api_key_env: "ZHIPU_API_KEY",
    },
    ProviderPreset {
        name: "gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        format: BackendFormat::Gemini,
        default_api_key_env: "GEMINI_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("Gemini").is_some());
        assert!(ProviderPreset::from_name("nope").is_none());
    }

    #[test]
    fn test_formats_map_to_dialects() {
        assert_eq!(BackendFormat::Common.dialect(), Dialect::OpenAi);
        assert_eq!(
            ProviderPreset::from_name("anthropic").unwrap().format.dialect(),
            Dialect::Anthropic
        );
        let names: Vec<_> = ProviderPreset::all().iter().map(|p| p.name).collect();
        assert!(names.contains(&"gemini"));
    }

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(
            BackendFormat::OpenAi.endpoint_url("https://api.openai.com/v1/", "gpt-4o", false),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            BackendFormat::Anthropic.endpoint_url("https://api.anthropic.com", "m", true),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            BackendFormat::Gemini.endpoint_url(
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-2.0-flash",
                true
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_format_names() {
        let f: BackendFormat = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(f, BackendFormat::OpenAi);
        let f: BackendFormat = serde_json::from_str("\"common\"").unwrap();
        assert_eq!(f, BackendFormat::Common);
    }
}
