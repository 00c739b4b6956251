use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const CONFIG_DIR_NAME: &str = "prism-relay";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    Anthropic,
    Gemini,
    Deepseek,
    Lmstudio,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [
        BackendId::Anthropic,
        BackendId::Gemini,
        BackendId::Deepseek,
        BackendId::Lmstudio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Anthropic => "anthropic",
            BackendId::Gemini => "gemini",
            BackendId::Deepseek => "deepseek",
            BackendId::Lmstudio => "lmstudio",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BackendId::Anthropic => "Anthropic",
            BackendId::Gemini => "Gemini",
            BackendId::Deepseek => "DeepSeek",
            BackendId::Lmstudio => "LM Studio",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            BackendId::Anthropic => "https://api.anthropic.com/v1",
            BackendId::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            BackendId::Deepseek => "https://api.deepseek.com/v1",
            BackendId::Lmstudio => "http://localhost:1234/v1",
        }
    }

    /// Empty for LM Studio: whatever model is loaded gets discovered at query time.
    pub fn default_model(self) -> &'static str {
        match self {
            BackendId::Anthropic => "claude-sonnet-4-5-20250929",
            BackendId::Gemini => "gemini-3-pro-preview",
            BackendId::Deepseek => "deepseek-chat",
            BackendId::Lmstudio => "",
        }
    }

    pub fn available_models(self) -> &'static str {
        match self {
            BackendId::Anthropic => {
                "claude-opus-4-6, claude-sonnet-4-5-20250929, claude-haiku-4-5-20251001"
            }
            BackendId::Gemini => {
                "gemini-3-pro-preview, gemini-3-flash-preview, gemini-2.5-pro, gemini-2.5-flash, gemini-2.0-flash"
            }
            BackendId::Deepseek => "deepseek-chat, deepseek-reasoner",
            BackendId::Lmstudio => "any model loaded in LM Studio",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            BackendId::Anthropic => "ANTHROPIC",
            BackendId::Gemini => "GEMINI",
            BackendId::Deepseek => "DEEPSEEK",
            BackendId::Lmstudio => "LMSTUDIO",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend `{0}` (expected one of: anthropic, gemini, deepseek, lmstudio)")]
pub struct ParseBackendIdError(pub String);

impl FromStr for BackendId {
    type Err = ParseBackendIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(BackendId::Anthropic),
            "gemini" | "google" => Ok(BackendId::Gemini),
            "deepseek" => Ok(BackendId::Deepseek),
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(BackendId::Lmstudio),
            _ => Err(ParseBackendIdError(s.to_string())),
        }
    }
}

/// How the Gemini backend is executed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeminiMode {
    #[default]
    Cli,
    Api,
}

impl FromStr for GeminiMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cli" => Ok(GeminiMode::Cli),
            "api" => Ok(GeminiMode::Api),
            other => Err(anyhow!(
                "invalid Gemini mode `{}`: set GEMINI_MODE to `cli` or `api`",
                other
            )),
        }
    }
}

impl fmt::Display for GeminiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeminiMode::Cli => f.write_str("cli"),
            GeminiMode::Api => f.write_str("api"),
        }
    }
}

/// Persisted per-provider values. Every field is optional so that a missing
/// value falls through to the built-in default.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GeminiMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_command: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub anthropic: ProviderSettings,
    #[serde(default)]
    pub gemini: ProviderSettings,
    #[serde(default)]
    pub deepseek: ProviderSettings,
    #[serde(default)]
    pub lmstudio: ProviderSettings,
}

impl Settings {
    pub fn config_path() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not find config directory")?
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;

        Ok(settings)
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let content = toml::to_string_pretty(self)?;

        // API keys live in this file: never let it exist with wider permissions.
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(path).await?;

        // The create mode does not apply to a file that already existed.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn provider(&self, id: BackendId) -> &ProviderSettings {
        match id {
            BackendId::Anthropic => &self.anthropic,
            BackendId::Gemini => &self.gemini,
            BackendId::Deepseek => &self.deepseek,
            BackendId::Lmstudio => &self.lmstudio,
        }
    }

    /// Resolves against the process environment.
    pub fn resolve(&self) -> Result<RelayConfig> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolves every backend with precedence: `env` override, then the
    /// persisted value, then the built-in default.
    pub fn resolve_with<F>(&self, env: F) -> Result<RelayConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| clean_optional(env(name));

        let timeout_ms = match lookup("LLM_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                anyhow!(
                    "invalid LLM_TIMEOUT_MS `{}`: expected a number of milliseconds",
                    raw
                )
            })?,
            None => self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        };
        if timeout_ms == 0 {
            return Err(anyhow!("timeout must be greater than zero milliseconds"));
        }

        let mut backends = Vec::with_capacity(BackendId::ALL.len());
        for id in BackendId::ALL {
            let persisted = self.provider(id);
            let prefix = id.env_prefix();
            let pick = |suffix: &str, stored: &Option<String>| {
                lookup(&format!("{}_{}", prefix, suffix)).or_else(|| clean_optional(stored.clone()))
            };

            let api_key = pick("API_KEY", &persisted.api_key);
            let default_model = pick("MODEL", &persisted.model)
                .unwrap_or_else(|| id.default_model().to_string());
            let base_url = pick("BASE_URL", &persisted.base_url)
                .unwrap_or_else(|| id.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string();

            let (mode, cli_command) = if id == BackendId::Gemini {
                let mode = match lookup("GEMINI_MODE") {
                    Some(raw) => raw.parse::<GeminiMode>()?,
                    None => persisted.mode.unwrap_or_default(),
                };
                let cli = pick("CLI", &persisted.cli_command)
                    .unwrap_or_else(|| prism_exec::gemini::DEFAULT_GEMINI_COMMAND.to_string());
                (Some(mode), Some(cli))
            } else {
                (None, None)
            };

            backends.push(BackendDescriptor {
                id,
                label: id.display_name().to_string(),
                default_model,
                available_models: id.available_models().to_string(),
                connection: Connection {
                    base_url,
                    api_key,
                    mode,
                    cli_command,
                },
            });
        }

        Ok(RelayConfig {
            backends,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Connection parameters for one backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Connection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub mode: Option<GeminiMode>,
    pub cli_command: Option<String>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("mode", &self.mode)
            .field("cli_command", &self.cli_command)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub label: String,
    pub default_model: String,
    pub available_models: String,
    pub connection: Connection,
}

impl BackendDescriptor {
    pub fn has_api_key(&self) -> bool {
        self.connection.api_key.is_some()
    }
}

/// Fully resolved, immutable configuration shared by the engine and bundler.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub backends: Vec<BackendDescriptor>,
    pub timeout: Duration,
}

impl RelayConfig {
    pub fn descriptor(&self, id: BackendId) -> Option<&BackendDescriptor> {
        self.backends.iter().find(|d| d.id == id)
    }

    /// Environment assignments reproducing this configuration, for shell export.
    pub fn env_exports(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for d in &self.backends {
            let prefix = d.id.env_prefix();
            if let Some(key) = &d.connection.api_key {
                out.push((format!("{}_API_KEY", prefix), key.clone()));
            }
            if !d.default_model.is_empty() {
                out.push((format!("{}_MODEL", prefix), d.default_model.clone()));
            }
            if d.connection.base_url != d.id.default_base_url() {
                out.push((format!("{}_BASE_URL", prefix), d.connection.base_url.clone()));
            }
            if let Some(mode) = d.connection.mode {
                out.push(("GEMINI_MODE".to_string(), mode.to_string()));
            }
        }
        out.push((
            "LLM_TIMEOUT_MS".to_string(),
            self.timeout.as_millis().to_string(),
        ));
        out.sort();
        out
    }
}

fn clean_optional(input: Option<String>) -> Option<String> {
    input.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
