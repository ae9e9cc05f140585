//! Layered runtime configuration.
//!
//! Every setting resolves, in order of priority, from a command-line
//! override, an environment variable, the `settings` table in `config.redb`,
//! and finally a built-in default.

use std::time::Duration;

use serde::Serialize;

use crate::{
    config_db::ConfigDb,
    error::{Error, Result},
};

/// Static description of one configurable key.
#[derive(Debug, Clone, Copy)]
pub struct SettingKey {
    pub name: &'static str,
    /// Environment variables checked in order. The first one is the
    /// canonical name; later entries are accepted for compatibility.
    pub env: &'static [&'static str],
    pub default: Option<&'static str>,
    pub secret: bool,
}

pub const EMBEDDING_MODEL: SettingKey = SettingKey {
    name: "embedding_model",
    env: &["PAGEWISE_EMBEDDING_MODEL", "EMBEDDING_MODEL_NAME"],
    default: Some("bge-m3:latest"),
    secret: false,
};

pub const EMBEDDING_URL: SettingKey = SettingKey {
    name: "embedding_url",
    env: &["PAGEWISE_EMBEDDING_URL", "EMBEDDING_MODEL_API_URL"],
    default: Some("http://localhost:11434"),
    secret: false,
};

pub const LLM_MODEL: SettingKey = SettingKey {
    name: "llm_model",
    env: &["PAGEWISE_LLM_MODEL", "CHATGPT_MODEL"],
    default: Some("gpt-4o"),
    secret: false,
};

pub const LLM_BASE_URL: SettingKey = SettingKey {
    name: "llm_base_url",
    env: &["PAGEWISE_LLM_BASE_URL", "CHATGPT_API_BASE"],
    default: Some("https://api.openai.com/v1"),
    secret: false,
};

pub const LLM_API_KEY: SettingKey = SettingKey {
    name: "llm_api_key",
    env: &["PAGEWISE_LLM_API_KEY", "CHATGPT_API_KEY"],
    default: None,
    secret: true,
};

pub const TOP_K: SettingKey = SettingKey {
    name: "top_k",
    env: &["PAGEWISE_TOP_K"],
    default: Some("10"),
    secret: false,
};

pub const QUERY_TIMEOUT: SettingKey = SettingKey {
    name: "query_timeout_secs",
    env: &["PAGEWISE_QUERY_TIMEOUT"],
    default: Some("180"),
    secret: false,
};

pub const ALL: &[SettingKey] = &[
    EMBEDDING_MODEL,
    EMBEDDING_URL,
    LLM_MODEL,
    LLM_BASE_URL,
    LLM_API_KEY,
    TOP_K,
    QUERY_TIMEOUT,
];

/// Look up a key by its name.
pub fn lookup(name: &str) -> Option<&'static SettingKey> {
    ALL.iter().find(|key| key.name == name)
}

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub embedding_model: Option<String>,
    pub llm_model: Option<String>,
}

impl Overrides {
    fn get(&self, key: &SettingKey) -> Option<String> {
        match key.name {
            "embedding_model" => self.embedding_model.clone(),
            "llm_model" => self.llm_model.clone(),
            _ => None,
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub embedding_model: String,
    pub embedding_url: String,
    pub llm_model: String,
    pub llm_base_url: String,
    #[serde(skip)]
    pub llm_api_key: Option<String>,
    pub top_k: usize,
    /// `None` disables the overall query deadline.
    pub query_timeout: Option<Duration>,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn resolve(
        config_db: Option<&ConfigDb>,
        overrides: &Overrides,
    ) -> Result<Self> {
        Self::resolve_with(config_db, overrides, |name| {
            std::env::var(name).ok()
        })
    }

    /// Resolve settings using `env` as the environment lookup.
    pub fn resolve_with(
        config_db: Option<&ConfigDb>,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let value = |key: &SettingKey| -> Result<Option<String>> {
            resolve_value(key, config_db, overrides, &env)
        };
        let required = |key: &SettingKey| -> Result<String> {
            value(key)?.ok_or_else(|| {
                Error::Config(format!("missing setting '{}'", key.name))
            })
        };

        let top_k = parse_number(&TOP_K, &required(&TOP_K)?)?;
        let timeout_secs =
            parse_number(&QUERY_TIMEOUT, &required(&QUERY_TIMEOUT)?)?;

        Ok(Self {
            embedding_model: required(&EMBEDDING_MODEL)?,
            embedding_url: required(&EMBEDDING_URL)?,
            llm_model: required(&LLM_MODEL)?,
            llm_base_url: required(&LLM_BASE_URL)?,
            llm_api_key: value(&LLM_API_KEY)?,
            top_k: top_k.max(1),
            query_timeout: (timeout_secs > 0)
                .then(|| Duration::from_secs(timeout_secs as u64)),
        })
    }
}

/// One line of `config show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingRow {
    pub name: &'static str,
    /// Resolved value; secrets are masked.
    pub value: String,
    /// Whether `config.redb` holds a value for this key.
    pub stored: bool,
}

impl Settings {
    /// Resolved values in display order, marking keys persisted in
    /// `config_db`.
    pub fn rows(&self, config_db: Option<&ConfigDb>) -> Result<Vec<SettingRow>> {
        let stored = match config_db {
            Some(db) => db.list_settings()?,
            None => Vec::new(),
        };
        let api_key = match &self.llm_api_key {
            Some(_) => "********".to_string(),
            None => "(unset)".to_string(),
        };
        let timeout = self
            .query_timeout
            .map_or(0, |d| d.as_secs())
            .to_string();

        let values = [
            (EMBEDDING_MODEL, self.embedding_model.clone()),
            (EMBEDDING_URL, self.embedding_url.clone()),
            (LLM_MODEL, self.llm_model.clone()),
            (LLM_BASE_URL, self.llm_base_url.clone()),
            (LLM_API_KEY, api_key),
            (TOP_K, self.top_k.to_string()),
            (QUERY_TIMEOUT, timeout),
        ];
        Ok(values
            .into_iter()
            .map(|(key, value)| SettingRow {
                name: key.name,
                value,
                stored: stored.iter().any(|(k, _)| k == key.name),
            })
            .collect())
    }
}

fn resolve_value(
    key: &SettingKey,
    config_db: Option<&ConfigDb>,
    overrides: &Overrides,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<Option<String>> {
    if let Some(v) = overrides.get(key) {
        return Ok(Some(v));
    }
    for var in key.env {
        if let Some(v) = env(var).filter(|v| !v.trim().is_empty()) {
            return Ok(Some(v));
        }
    }
    if let Some(db) = config_db
        && let Some(v) = db.get_setting(key.name)?
    {
        return Ok(Some(v));
    }
    Ok(key.default.map(str::to_string))
}

fn parse_number(key: &SettingKey, raw: &str) -> Result<usize> {
    raw.trim().parse().map_err(|_| {
        Error::Config(format!(
            "setting '{}' must be a non-negative integer, got '{raw}'",
            key.name
        ))
    })
}
