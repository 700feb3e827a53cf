//! `workflow.toml` loading.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//! `${VAR}` references are replaced with the environment variable's value
//! before parsing (unset variables are left as written).

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use engine::ExecutorConfig;
use nodes::RetryPolicy;

/// Upper bound on `[engine].retry_max_attempts`.
const MAX_RETRY_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub sweep: SweepConfig,
    pub queue: QueueConfig,
    pub ai: AiConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Overridden by `--database-url` / `DATABASE_URL`.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resume_batch_size: usize,
    /// Attempts per action node, including the first.
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Ceiling for a single back-off.
    pub retry_max_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resume_batch_size: 100,
            retry_max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    #[default]
    Dummy,
    Ollama,
    Gemini,
    /// No provider; AI actions fail.
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProviderKind,
    /// API root; each provider has its own default.
    pub endpoint: Option<String>,
    /// Required by `gemini`, usually `"${GEMINI_API_KEY}"`.
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::Dummy,
            endpoint: None,
            api_key: None,
        }
    }
}

impl AiConfig {
    pub fn endpoint(&self) -> &str {
        match (&self.endpoint, self.provider) {
            (Some(endpoint), _) => endpoint,
            (None, AiProviderKind::Gemini) => nodes::ai::GEMINI_ENDPOINT,
            (None, _) => "http://localhost:11434",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let attempts = self.engine.retry_max_attempts;
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&attempts) {
            bail!("[engine].retry_max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}, got {attempts}");
        }
        if self.engine.retry_max_delay_ms < self.engine.retry_base_delay_ms {
            bail!("[engine].retry_max_delay_ms must not be below retry_base_delay_ms");
        }
        if self.ai.provider == AiProviderKind::Gemini {
            match self.ai.api_key.as_deref().map(str::trim) {
                None | Some("") => bail!("[ai].api_key is required for the gemini provider"),
                Some(key) if key.starts_with("${") => bail!("[ai].api_key references an unset variable: {key}"),
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            resume_batch_size: self.engine.resume_batch_size.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.engine.retry_max_attempts,
            base_delay: Duration::from_millis(self.engine.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.engine.retry_max_delay_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs.max(1))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.database.acquire_timeout_secs)
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match std::env::var(&name) {
                Ok(value) => result.push_str(&value),
                Err(_) => result.push_str(&format!("${{{name}}}")),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.queue.capacity, 1024);
        assert_eq!(config.ai.provider, AiProviderKind::Dummy);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::parse(
            r#"
            [engine]
            retry_max_attempts = 5
            retry_base_delay_ms = 20

            [sweep]
            interval_secs = 30

            [ai]
            provider = "ollama"
            endpoint = "http://ollama:11434"
            "#,
        )
        .unwrap();

        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(20));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.ai.provider, AiProviderKind::Ollama);
        assert_eq!(config.engine.resume_batch_size, 100);
    }

    #[test]
    fn env_vars_are_expanded() {
        std::env::set_var("WORKFLOW_TEST_DB_URL", "postgres://u:p@db/crm");
        let config = AppConfig::parse("[database]\nurl = \"${WORKFLOW_TEST_DB_URL}\"").unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://u:p@db/crm"));
    }

    #[test]
    fn unset_env_vars_are_kept() {
        assert_eq!(
            expand_env_vars("url = \"${WORKFLOW_TEST_SURELY_UNSET}\""),
            "url = \"${WORKFLOW_TEST_SURELY_UNSET}\""
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queue]\ncapacity = 16\n[log]\nlevel = \"debug\"").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.queue.capacity, 16);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn retry_attempts_are_bounded() {
        assert!(AppConfig::parse("[engine]\nretry_max_attempts = 0").is_err());
        assert!(AppConfig::parse("[engine]\nretry_max_attempts = 40").is_err());
        assert!(AppConfig::parse("[engine]\nretry_max_attempts = 20").is_ok());
        assert!(AppConfig::parse("[engine]\nretry_base_delay_ms = 500\nretry_max_delay_ms = 100").is_err());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        assert!(AppConfig::parse("[ai]\nprovider = \"gpt\"").is_err());
    }

    #[test]
    fn gemini_takes_its_key_from_the_environment() {
        std::env::set_var("WORKFLOW_TEST_GEMINI_KEY", "secret-key");
        let config = AppConfig::parse(
            r#"
            [ai]
            provider = "gemini"
            api_key = "${WORKFLOW_TEST_GEMINI_KEY}"
            "#,
        )
        .unwrap();
        assert_eq!(config.ai.provider, AiProviderKind::Gemini);
        assert_eq!(config.ai.api_key.as_deref(), Some("secret-key"));
        assert_eq!(config.ai.endpoint(), nodes::ai::GEMINI_ENDPOINT);

        let missing = AppConfig::parse("[ai]\nprovider = \"gemini\"\n").unwrap_err();
        assert!(format!("{missing:#}").contains("api_key"));

        let unset = AppConfig::parse(
            "[ai]\nprovider = \"gemini\"\napi_key = \"${WORKFLOW_TEST_UNSET_GEMINI_KEY}\"\n",
        )
        .unwrap_err();
        assert!(format!("{unset:#}").contains("unset variable"));
    }
}
