//! Process-wide settings for both daemons.
//!
//! Loaded once at startup from environment variables and shared read-only as
//! `Arc<Settings>`. Every knob has a default except the credentials.

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "paperless-scribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Written in place of a page transcription when every model refused.
pub const REFUSAL_MARK: &str = "CHATGPT REFUSED TO TRANSCRIBE";

const DEFAULT_OPENAI_MODELS: &[&str] = &["gpt-5-mini", "gpt-5.2", "o4-mini"];
const DEFAULT_OLLAMA_MODELS: &[&str] = &["gemma3:27b", "gemma3:12b"];

const DEFAULT_OCR_REFUSAL_MARKERS: &[&str] = &[
    "i can't assist",
    "i cannot assist",
    "i can't help with transcrib",
    "i cannot help with transcrib",
    REFUSAL_MARK,
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required environment variable '{0}' is not set")]
    Missing(&'static str),

    #[error("{var} must be an integer in range, got '{value}'")]
    InvalidInteger { var: &'static str, value: String },

    #[error("{0} must be a boolean value")]
    InvalidBool(&'static str),

    #[error("{0}")]
    Invalid(String),
}

/// Which OpenAI-compatible backend serves the models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

/// Log renderer selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Console,
    Json,
}

#[derive(Debug, Clone)]
pub struct Settings {
    // Paperless-ngx API
    pub paperless_url: String,
    pub paperless_token: String,

    // Language-model endpoint
    pub llm_provider: LlmProvider,
    pub llm_base_url: String,
    pub llm_api_key: String,

    // Models
    pub ai_models: Vec<String>,
    pub ocr_refusal_markers: Vec<String>,
    pub ocr_include_page_models: bool,

    // OCR stage tags
    pub pre_tag_id: u32,
    pub post_tag_id: u32,
    pub ocr_processing_tag_id: Option<u32>,

    // Classification stage tags
    pub classify_pre_tag_id: u32,
    pub classify_post_tag_id: Option<u32>,
    pub classify_processing_tag_id: Option<u32>,
    pub error_tag_id: Option<u32>,

    // Daemon
    pub poll_interval_secs: u64,
    pub max_retries: u32,
    pub max_retry_backoff_secs: u64,
    pub request_timeout_secs: u64,

    // Image processing
    pub ocr_dpi: u32,
    pub ocr_max_side: u32,
    pub page_workers: usize,
    pub document_workers: usize,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,

    // Classification
    pub classify_person_field_id: Option<u32>,
    pub classify_default_country_tag: String,
    pub classify_max_chars: usize,
    pub classify_tag_limit: usize,
    pub classify_taxonomy_limit: usize,
    pub classify_max_pages: usize,
    pub classify_tail_pages: usize,
    pub classify_headerless_char_limit: usize,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let paperless_url = env
            .string("PAPERLESS_URL", "http://paperless:8000")
            .trim_end_matches('/')
            .to_string();
        let paperless_token = env.required("PAPERLESS_TOKEN")?;

        let llm_provider = match env.string("LLM_PROVIDER", "openai").as_str() {
            "openai" => LlmProvider::OpenAi,
            "ollama" => LlmProvider::Ollama,
            _ => {
                return Err(ConfigError::Invalid(
                    "LLM_PROVIDER must be 'openai' or 'ollama'".into(),
                ))
            }
        };
        let (llm_base_url, llm_api_key, default_models) = match llm_provider {
            LlmProvider::Ollama => (
                env.string("OLLAMA_BASE_URL", "http://localhost:11434/v1/"),
                "ollama".to_string(),
                DEFAULT_OLLAMA_MODELS,
            ),
            LlmProvider::OpenAi => (
                env.string("OPENAI_BASE_URL", "https://api.openai.com/v1/"),
                env.required("OPENAI_API_KEY")?,
                DEFAULT_OPENAI_MODELS,
            ),
        };

        let ai_models = match lookup("AI_MODELS") {
            None => default_models.iter().map(|m| m.to_string()).collect(),
            Some(raw) => {
                let models = split_list(&raw);
                if models.is_empty() {
                    return Err(ConfigError::Invalid(
                        "AI_MODELS must contain at least one model name".into(),
                    ));
                }
                models
            }
        };

        let ocr_refusal_markers = match lookup("OCR_REFUSAL_MARKERS") {
            None => DEFAULT_OCR_REFUSAL_MARKERS
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            Some(raw) => split_list(&raw).iter().map(|m| m.to_lowercase()).collect(),
        };

        let post_tag_id: u32 = narrow("POST_TAG_ID", env.int("POST_TAG_ID", 444)?)?;

        let max_retries = env.int("MAX_RETRIES", 20)?;
        if max_retries < 1 {
            return Err(ConfigError::Invalid("MAX_RETRIES must be >= 1".into()));
        }
        let max_retries: u32 = narrow("MAX_RETRIES", max_retries)?;
        let max_retry_backoff_secs = env.int("MAX_RETRY_BACKOFF_SECONDS", 30)?;
        if max_retry_backoff_secs < 1 {
            return Err(ConfigError::Invalid(
                "MAX_RETRY_BACKOFF_SECONDS must be >= 1".into(),
            ));
        }
        let max_retry_backoff_secs: u64 = narrow("MAX_RETRY_BACKOFF_SECONDS", max_retry_backoff_secs)?;

        let log_format = match env.string("LOG_FORMAT", "console").as_str() {
            "console" => LogFormat::Console,
            "json" => LogFormat::Json,
            _ => {
                return Err(ConfigError::Invalid(
                    "LOG_FORMAT must be 'json' or 'console'".into(),
                ))
            }
        };

        Ok(Self {
            paperless_url,
            paperless_token,
            llm_provider,
            llm_base_url,
            llm_api_key,
            ai_models,
            ocr_refusal_markers,
            ocr_include_page_models: env.boolean("OCR_INCLUDE_PAGE_MODELS", false)?,
            pre_tag_id: narrow("PRE_TAG_ID", env.int("PRE_TAG_ID", 443)?)?,
            post_tag_id,
            ocr_processing_tag_id: env.tag_id("OCR_PROCESSING_TAG_ID", None)?,
            classify_pre_tag_id: env
                .tag_id("CLASSIFY_PRE_TAG_ID", Some(post_tag_id))?
                .unwrap_or(post_tag_id),
            classify_post_tag_id: env.tag_id("CLASSIFY_POST_TAG_ID", None)?,
            classify_processing_tag_id: env.tag_id("CLASSIFY_PROCESSING_TAG_ID", None)?,
            error_tag_id: env.tag_id("ERROR_TAG_ID", Some(552))?,
            poll_interval_secs: env.int_at_least("POLL_INTERVAL", 15, 1)?,
            max_retries,
            max_retry_backoff_secs,
            request_timeout_secs: env.int_at_least("REQUEST_TIMEOUT", 180, 1)?,
            ocr_dpi: env.int_at_least("OCR_DPI", 300, 1)?,
            ocr_max_side: env.int_at_least("OCR_MAX_SIDE", 1600, 1)?,
            page_workers: env.int_at_least("PAGE_WORKERS", 8, 1)?,
            document_workers: env.int_at_least("DOCUMENT_WORKERS", 4, 1)?,
            log_level: env.string("LOG_LEVEL", "INFO").to_uppercase(),
            log_format,
            classify_person_field_id: env.tag_id("CLASSIFY_PERSON_FIELD_ID", None)?,
            classify_default_country_tag: env
                .string("CLASSIFY_DEFAULT_COUNTRY_TAG", "")
                .trim()
                .to_string(),
            classify_max_chars: env.int_at_least("CLASSIFY_MAX_CHARS", 0, 0)?,
            classify_tag_limit: env.int_at_least("CLASSIFY_TAG_LIMIT", 5, 0)?,
            classify_taxonomy_limit: env.int_at_least("CLASSIFY_TAXONOMY_LIMIT", 100, 0)?,
            classify_max_pages: env.int_at_least("CLASSIFY_MAX_PAGES", 3, 0)?,
            classify_tail_pages: env.int_at_least("CLASSIFY_TAIL_PAGES", 2, 0)?,
            classify_headerless_char_limit: env.int_at_least("CLASSIFY_HEADERLESS_CHAR_LIMIT", 15000, 0)?,
        })
    }

    /// Ordered model list with duplicates removed (first occurrence wins).
    pub fn unique_models(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.ai_models
            .iter()
            .filter(|m| seen.insert(m.as_str()))
            .cloned()
            .collect()
    }

    /// Filter directive for `tracing_subscriber::EnvFilter` when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> String {
        default_log_filter(&self.log_level)
    }
}

/// Map a `LOG_LEVEL` value onto a filter directive for this crate.
///
/// Dependencies stay at `warn` so HTTP client chatter does not drown the pipeline.
pub fn default_log_filter(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        "critical" | "error" => "error",
        "warning" | "warn" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    format!("warn,paperless_scribe={level}")
}

/// Convert without wrapping; values outside `T` are rejected.
fn narrow<T: TryFrom<i64>>(var: &'static str, value: i64) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::InvalidInteger {
        var,
        value: value.to_string(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, var: &'static str, default: &str) -> String {
        (self.lookup)(var).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        (self.lookup)(var).ok_or(ConfigError::Missing(var))
    }

    fn int(&self, var: &'static str, default: i64) -> Result<i64, ConfigError> {
        match (self.lookup)(var) {
            None => Ok(default),
            Some(raw) if raw.trim().is_empty() => Ok(default),
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidInteger { var, value: raw }),
        }
    }

    /// Integer raised to `floor`, then narrowed to `T`.
    fn int_at_least<T: TryFrom<i64>>(
        &self,
        var: &'static str,
        default: i64,
        floor: i64,
    ) -> Result<T, ConfigError> {
        narrow(var, self.int(var, default)?.max(floor))
    }

    /// Optional tag/field id: blank → default, `<= 0` → unset.
    fn tag_id(&self, var: &'static str, default: Option<u32>) -> Result<Option<u32>, ConfigError> {
        match (self.lookup)(var) {
            None => Ok(default),
            Some(raw) if raw.trim().is_empty() => Ok(default),
            Some(raw) => {
                let value = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidInteger { var, value: raw })?;
                Ok(u32::try_from(value).ok().filter(|v| *v > 0))
            }
        }
    }

    fn boolean(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = (self.lookup)(var) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Ok(true),
            "0" | "false" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool(var)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Settings with all defaults and both credentials filled in.
    pub fn test_settings() -> Settings {
        Settings::from_lookup(|key| match key {
            "PAPERLESS_TOKEN" => Some("token".into()),
            "OPENAI_API_KEY" => Some("sk-test".into()),
            _ => None,
        })
        .expect("defaults are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("PAPERLESS_TOKEN".into(), "token".into());
        map.insert("OPENAI_API_KEY".into(), "sk-test".into());
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let s = load(&[]).unwrap();
        assert_eq!(s.paperless_url, "http://paperless:8000");
        assert_eq!(s.pre_tag_id, 443);
        assert_eq!(s.post_tag_id, 444);
        assert_eq!(s.classify_pre_tag_id, 444);
        assert_eq!(s.error_tag_id, Some(552));
        assert_eq!(s.ocr_processing_tag_id, None);
        assert_eq!(s.max_retries, 20);
        assert_eq!(s.page_workers, 8);
        assert_eq!(s.document_workers, 4);
        assert_eq!(s.classify_tag_limit, 5);
        assert_eq!(s.classify_max_pages, 3);
        assert_eq!(s.classify_tail_pages, 2);
        assert_eq!(s.ai_models, vec!["gpt-5-mini", "gpt-5.2", "o4-mini"]);
        assert_eq!(s.log_format, LogFormat::Console);
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = Settings::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PAPERLESS_TOKEN")));
    }

    #[test]
    fn ollama_does_not_need_api_key() {
        let s = Settings::from_lookup(|key| match key {
            "PAPERLESS_TOKEN" => Some("t".into()),
            "LLM_PROVIDER" => Some("ollama".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(s.llm_provider, LlmProvider::Ollama);
        assert_eq!(s.ai_models, vec!["gemma3:27b", "gemma3:12b"]);
        assert!(s.llm_base_url.starts_with("http://localhost:11434"));
    }

    #[test]
    fn zero_max_retries_rejected() {
        assert!(load(&[("MAX_RETRIES", "0")]).is_err());
    }

    #[test]
    fn negative_queue_tag_rejected() {
        let err = load(&[("PRE_TAG_ID", "-1")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidInteger { var: "PRE_TAG_ID", ref value } if value == "-1"
        ));
    }

    #[test]
    fn out_of_range_integers_rejected_not_wrapped() {
        assert!(matches!(
            load(&[("MAX_RETRIES", "4294967296")]),
            Err(ConfigError::InvalidInteger { var: "MAX_RETRIES", .. })
        ));
        assert!(matches!(
            load(&[("POST_TAG_ID", "4294967296")]),
            Err(ConfigError::InvalidInteger { var: "POST_TAG_ID", .. })
        ));
        assert!(matches!(
            load(&[("OCR_DPI", "99999999999")]),
            Err(ConfigError::InvalidInteger { var: "OCR_DPI", .. })
        ));
    }

    #[test]
    fn small_values_are_raised_to_their_floor() {
        let s = load(&[("PAGE_WORKERS", "-4"), ("CLASSIFY_TAG_LIMIT", "-1")]).unwrap();
        assert_eq!(s.page_workers, 1);
        assert_eq!(s.classify_tag_limit, 0);
    }

    #[test]
    fn non_positive_tag_ids_are_unset() {
        let s = load(&[("ERROR_TAG_ID", "0"), ("OCR_PROCESSING_TAG_ID", "-3")]).unwrap();
        assert_eq!(s.error_tag_id, None);
        assert_eq!(s.ocr_processing_tag_id, None);
    }

    #[test]
    fn blank_classify_pre_tag_falls_back_to_post_tag() {
        let s = load(&[("POST_TAG_ID", "900"), ("CLASSIFY_PRE_TAG_ID", " ")]).unwrap();
        assert_eq!(s.classify_pre_tag_id, 900);
    }

    #[test]
    fn empty_model_list_rejected() {
        assert!(load(&[("AI_MODELS", " , ")]).is_err());
    }

    #[test]
    fn unique_models_preserves_order() {
        let s = load(&[("AI_MODELS", "a, b, a, c")]).unwrap();
        assert_eq!(s.unique_models(), vec!["a", "b", "c"]);
    }

    #[test]
    fn refusal_markers_are_lowercased() {
        let s = load(&[("OCR_REFUSAL_MARKERS", "NOPE, Sorry")]).unwrap();
        assert_eq!(s.ocr_refusal_markers, vec!["nope", "sorry"]);
    }

    #[test]
    fn invalid_bool_and_int_rejected() {
        assert!(matches!(
            load(&[("OCR_INCLUDE_PAGE_MODELS", "maybe")]),
            Err(ConfigError::InvalidBool(_))
        ));
        assert!(matches!(
            load(&[("POLL_INTERVAL", "soon")]),
            Err(ConfigError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn invalid_log_format_rejected() {
        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn log_filter_maps_level_aliases() {
        assert_eq!(default_log_filter("WARNING"), "warn,paperless_scribe=warn");
        assert_eq!(default_log_filter("INFO"), "warn,paperless_scribe=info");
        assert_eq!(default_log_filter("bogus"), "warn,paperless_scribe=info");
    }

    #[test]
    fn app_name_is_set() {
        assert_eq!(APP_NAME, "paperless-scribe");
        assert!(!APP_VERSION.is_empty());
    }
}
