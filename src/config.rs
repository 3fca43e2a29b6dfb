//! Runtime configuration
//!
//! Three layers, strongest first: environment variables, an optional TOML
//! file, built-in defaults. The data directory override comes from the CLI
//! layer, which already folds in `AURA_DATA_DIR`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Completion budget per reply
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the `SQLite` database
    pub data_dir: PathBuf,

    /// Token Facebook echoes during the webhook subscription handshake
    pub facebook_verify_token: Option<String>,

    /// Model provider configuration
    pub llm: LlmConfig,
}

/// Model provider configuration for an `OpenAI`-compatible API
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL, without the `/chat/completions` suffix
    pub api_base: String,

    /// API key; empty disables reply generation and knowledge embedding
    pub api_key: String,

    /// Chat model for replies
    pub model: String,

    /// Fine-tuned chat model, selected per turn by live settings
    pub finetuned_model: Option<String>,

    /// Embedding model for knowledge search
    pub embedding_model: String,

    /// Completion token budget per reply
    pub max_tokens: u32,
}

/// Partial configuration from a TOML file; absent keys fall through
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    facebook_verify_token: Option<String>,
    llm: FileLlmConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLlmConfig {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    finetuned_model: Option<String>,
    embedding_model: Option<String>,
    max_tokens: Option<u32>,
}

impl FileConfig {
    /// Read and parse an explicitly requested config file
    ///
    /// The operator asked for this file, so a missing or malformed one is a
    /// hard error rather than a silent default.
    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }
}

/// Environment overrides, read once at startup
#[derive(Debug, Default)]
struct Overrides {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    finetuned_model: Option<String>,
    embedding_model: Option<String>,
    facebook_verify_token: Option<String>,
}

impl Overrides {
    fn from_env() -> Self {
        Self {
            api_base: std::env::var("AURA_LLM_API_BASE").ok(),
            api_key: std::env::var("AURA_LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            model: std::env::var("AURA_LLM_MODEL").ok(),
            finetuned_model: std::env::var("AURA_FINETUNED_MODEL").ok(),
            embedding_model: std::env::var("AURA_EMBEDDING_MODEL").ok(),
            facebook_verify_token: std::env::var("AURA_FB_VERIFY_TOKEN").ok(),
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given config file cannot be read or
    /// parsed.
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let file = config_path.map(FileConfig::read).transpose()?.unwrap_or_default();
        let config = Self::resolve(file, Overrides::from_env(), data_dir);

        std::fs::create_dir_all(&config.data_dir).ok();

        Ok(config)
    }

    /// Path of the `SQLite` database file
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("aura.db")
    }

    fn resolve(file: FileConfig, env: Overrides, data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir.or(file.data_dir).unwrap_or_else(default_data_dir);

        let llm = LlmConfig {
            api_base: env
                .api_base
                .or(file.llm.api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: env.api_key.or(file.llm.api_key).unwrap_or_default(),
            model: env
                .model
                .or(file.llm.model)
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            finetuned_model: env.finetuned_model.or(file.llm.finetuned_model),
            embedding_model: env
                .embedding_model
                .or(file.llm.embedding_model)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            max_tokens: file.llm.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        Self {
            data_dir,
            facebook_verify_token: env.facebook_verify_token.or(file.facebook_verify_token),
            llm,
        }
    }
}

/// Default data directory (`~/.local/share/aura/relay` on Linux)
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("io", "aura", "aura")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("relay"))
}
