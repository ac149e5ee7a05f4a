use std::env;
use std::sync::Arc;

use course_core::grading::RevealPolicy;

use crate::error::ConfigError;
use crate::gate::{PreviewPolicy, TopicAllowance, UnlimitedPreview};

pub const DEFAULT_DB_URL: &str = "sqlite:learn.sqlite3?mode=rwc";

const DB_URL_VAR: &str = "LEARN_DB_URL";
const SHOW_CORRECT_ANSWERS_VAR: &str = "LEARN_SHOW_CORRECT_ANSWERS";
const FREE_PREVIEW_TOPICS_VAR: &str = "LEARN_FREE_PREVIEW_TOPICS";

/// Runtime settings for the learning services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicesConfig {
    pub db_url: String,
    pub reveal: RevealPolicy,
    /// Topics a student may complete before a subscription is required.
    /// `None` never requires one.
    pub free_preview_topics: Option<u32>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_owned(),
            reveal: RevealPolicy::default(),
            free_preview_topics: None,
        }
    }
}

impl ServicesConfig {
    /// Read `LEARN_DB_URL`, `LEARN_SHOW_CORRECT_ANSWERS` and `LEARN_FREE_PREVIEW_TOPICS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ServicesConfig::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_url = present(DB_URL_VAR).unwrap_or_else(|| DEFAULT_DB_URL.to_owned());

        let show_correct_answers = match present(SHOW_CORRECT_ANSWERS_VAR) {
            Some(raw) => parse_bool(SHOW_CORRECT_ANSWERS_VAR, &raw)?,
            None => false,
        };

        let free_preview_topics = present(FREE_PREVIEW_TOPICS_VAR)
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| ConfigError::InvalidNumber {
                        var: FREE_PREVIEW_TOPICS_VAR,
                        raw,
                    })
            })
            .transpose()?;

        Ok(Self {
            db_url,
            reveal: RevealPolicy {
                show_correct_answers,
            },
            free_preview_topics,
        })
    }

    #[must_use]
    pub fn preview_policy(&self) -> Arc<dyn PreviewPolicy> {
        match self.free_preview_topics {
            Some(topics) => Arc::new(TopicAllowance { topics }),
            None => Arc::new(UnlimitedPreview),
        }
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            raw: raw.to_owned(),
        }),
    }
}
