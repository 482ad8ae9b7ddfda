//! Settings loaded once at startup from TOML
//!
//! String values written as `${VAR}` are replaced by the environment
//! variable of that name (empty when unset). API keys left empty fall back
//! to the conventional environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use lens_adapters::LlmProvider;
use lens_core::{ThresholdError, Thresholds};
use lens_feeds::HttpConfig;

/// Configuration errors; fatal at construction time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Thresholds(#[from] ThresholdError),
}

/// `[enrichment]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    /// Global ceiling on in-flight adapter calls
    pub max_concurrent: usize,
    /// Per-attempt deadline
    pub timeout_secs: u64,
    /// Total attempts per adapter call
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

/// `[classification]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    pub high_risk_threshold: f64,
    pub medium_risk_threshold: f64,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            high_risk_threshold: thresholds.high_risk_threshold,
            medium_risk_threshold: thresholds.medium_risk_threshold,
        }
    }
}

impl ClassificationSettings {
    pub fn thresholds(&self) -> Result<Thresholds, ThresholdError> {
        Thresholds::new(self.high_risk_threshold, self.medium_risk_threshold)
    }
}

/// `[providers.<name>]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub feed_url: Option<String>,
    pub cache_ttl_secs: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            feed_url: None,
            cache_ttl_secs: None,
        }
    }
}

impl ProviderSettings {
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

/// `[http]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub proxy: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 30,
            user_agent: None,
        }
    }
}

/// `[reasoning]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    pub enabled: bool,
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 60,
            temperature: 0.3,
            max_tokens: 2000,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enrichment: EnrichmentSettings,
    pub classification: ClassificationSettings,
    pub http: HttpSettings,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub reasoning: ReasoningSettings,
}

/// Environment variable consulted when a provider's key is not configured
fn key_fallback(provider: &str) -> Option<&'static str> {
    match provider {
        "abuseipdb" => Some("ABUSEIPDB_API_KEY"),
        "malshare" => Some("MALSHARE_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    }
}

fn substitute_env<F>(value: &mut toml::Value, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        toml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                *s = env(name).unwrap_or_default();
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(|v| substitute_env(v, env)),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| substitute_env(v, env)),
        _ => {}
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load and validate settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse settings, resolving placeholders from the process environment
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::from_toml_with_env(text, |name| std::env::var(name).ok())
    }

    /// Parse settings with an explicit environment lookup
    pub fn from_toml_with_env<F>(text: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw: toml::Value = toml::from_str(text)?;
        substitute_env(&mut raw, &env);
        let mut settings: Settings = raw.try_into()?;
        settings.apply_key_fallbacks(&env);
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults plus environment key fallbacks, used when no file is given
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = |name: &str| std::env::var(name).ok();
        let mut settings = Settings::default();
        settings.apply_key_fallbacks(&env);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_key_fallbacks<F>(&mut self, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in ["abuseipdb", "malshare"] {
            let provider = self.providers.entry(name.to_string()).or_default();
            if non_empty(provider.api_key.clone()).is_none() {
                provider.api_key = key_fallback(name).and_then(|var| non_empty(env(var)));
            }
        }

        if non_empty(self.reasoning.api_key.clone()).is_none() {
            self.reasoning.api_key = key_fallback(&self.reasoning.provider.to_string())
                .and_then(|var| non_empty(env(var)));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.enrichment;
        if e.max_concurrent < 1 {
            return Err(ConfigError::Invalid {
                field: "enrichment.max_concurrent",
                reason: "must be at least 1".to_string(),
            });
        }
        if e.max_retries < 1 {
            return Err(ConfigError::Invalid {
                field: "enrichment.max_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if e.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "enrichment.timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.reasoning.enabled && self.reasoning.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reasoning.timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        self.classification.thresholds()?;
        Ok(())
    }

    /// Settings for one provider, defaults when the section is absent
    pub fn provider(&self, name: &str) -> ProviderSettings {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    pub fn thresholds(&self) -> Result<Thresholds, ThresholdError> {
        self.classification.thresholds()
    }

    pub fn http_config(&self) -> HttpConfig {
        let mut config = HttpConfig::default().with_timeout(self.http.timeout_secs);
        config.proxy = non_empty(self.http.proxy.clone());
        if let Some(agent) = non_empty(self.http.user_agent.clone()) {
            config.user_agent = agent;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[enrichment]
max_concurrent = 8
timeout_secs = 10
max_retries = 2
retry_delay_secs = 1

[classification]
high_risk_threshold = 8.0
medium_risk_threshold = 5.0

[providers.abuseipdb]
api_key = "${TEST_ABUSE_KEY}"

[providers.openphish]
cache_ttl_secs = 300

[providers.phishtank]
enabled = false

[reasoning]
enabled = true
provider = "anthropic"
model = "claude-3-5-haiku-latest"
"#;

    fn env(name: &str) -> Option<String> {
        match name {
            "TEST_ABUSE_KEY" => Some("abuse-secret".to_string()),
            "MALSHARE_API_KEY" => Some("malshare-secret".to_string()),
            "ANTHROPIC_API_KEY" => Some("anthropic-secret".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_sample() {
        let settings = Settings::from_toml_with_env(SAMPLE, env).unwrap();

        assert_eq!(settings.enrichment.max_concurrent, 8);
        assert_eq!(settings.thresholds().unwrap().high_risk_threshold, 8.0);
        assert_eq!(settings.provider("abuseipdb").api_key.as_deref(), Some("abuse-secret"));
        assert_eq!(settings.provider("malshare").api_key.as_deref(), Some("malshare-secret"));
        assert_eq!(settings.provider("openphish").cache_ttl(), Some(Duration::from_secs(300)));
        assert!(!settings.provider("phishtank").enabled);
        assert_eq!(settings.reasoning.provider, LlmProvider::Anthropic);
        assert_eq!(settings.reasoning.api_key.as_deref(), Some("anthropic-secret"));
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml_with_env("", |_| None).unwrap();
        assert_eq!(settings.enrichment.max_concurrent, 5);
        assert_eq!(settings.enrichment.timeout_secs, 30);
        assert_eq!(settings.enrichment.max_retries, 3);
        assert_eq!(settings.enrichment.retry_delay_secs, 2);
        assert!(settings.provider("openphish").enabled);
        assert!(settings.provider("abuseipdb").api_key.is_none());
        assert!(!settings.reasoning.enabled);
    }

    #[test]
    fn test_unset_placeholder_is_empty() {
        let settings = Settings::from_toml_with_env(
            "[providers.abuseipdb]\napi_key = \"${NOPE}\"\n",
            |_| None,
        )
        .unwrap();
        assert!(settings.provider("abuseipdb").api_key.is_none());
    }

    #[test]
    fn test_validation() {
        let err = Settings::from_toml_with_env("[enrichment]\nmax_concurrent = 0\n", |_| None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "enrichment.max_concurrent", .. }));

        let err = Settings::from_toml_with_env("[enrichment]\nmax_retries = 0\n", |_| None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "enrichment.max_retries", .. }));

        let err = Settings::from_toml_with_env(
            "[classification]\nhigh_risk_threshold = 3.0\nmedium_risk_threshold = 6.0\n",
            |_| None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Thresholds(ThresholdError::Inverted { .. })));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Settings::from_toml_with_env("[enrichment\n", |_| None),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_http_config() {
        let settings = Settings::from_toml_with_env(
            "[http]\nproxy = \"socks5h://127.0.0.1:9050\"\ntimeout_secs = 12\n",
            |_| None,
        )
        .unwrap();
        let http = settings.http_config();
        assert_eq!(http.proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(http.timeout_secs, 12);
    }
}
