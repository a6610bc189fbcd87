//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Where the engine reads from and relocates files to, relative to the vault root.
#[derive(Debug, Clone)]
pub struct FolderLayout {
    /// Watched folder that files are dropped into.
    pub inbox: String,
    /// Destination for relocated media attachments.
    pub attachments: String,
    /// Files that did not qualify for processing.
    pub bypassed: String,
    /// Files whose pipeline failed.
    pub errors: String,
    /// Pre-format copies and salvageable failures.
    pub backups: String,
    /// Document templates; basenames are the classification labels.
    pub templates: String,
}

impl FolderLayout {
    /// Folders owned by the engine, never offered as destinations.
    pub fn system_folders(&self) -> [&str; 6] {
        [
            self.inbox.as_str(),
            self.attachments.as_str(),
            self.bypassed.as_str(),
            self.errors.as_str(),
            self.backups.as_str(),
            self.templates.as_str(),
        ]
    }

    /// Whether `folder` is one of the system folders or nested under one.
    pub fn is_system_folder(&self, folder: &str) -> bool {
        self.system_folders().iter().any(|system| {
            folder == *system || folder.starts_with(&format!("{system}/"))
        })
    }
}

impl Default for FolderLayout {
    fn default() -> Self {
        Self {
            inbox: "_FileOrganizer2000/Inbox".to_string(),
            attachments: "_FileOrganizer2000/Processed/Attachments".to_string(),
            bypassed: "_FileOrganizer2000/Bypassed".to_string(),
            errors: "_FileOrganizer2000/Errors".to_string(),
            backups: "_FileOrganizer2000/Backups".to_string(),
            templates: "_FileOrganizer2000/Templates".to_string(),
        }
    }
}

/// Optional pipeline stages.
#[derive(Debug, Clone)]
pub struct FeatureFlags {
    /// Run Classify and Format.
    pub enable_document_classification: bool,
    /// Run RecommendName.
    pub enable_file_renaming: bool,
    /// Run Tag.
    pub use_similar_tags: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_document_classification: false,
            enable_file_renaming: true,
            use_similar_tags: true,
        }
    }
}

/// Inbox engine configuration.
#[derive(Debug, Clone)]
pub struct InboxConfig {
    /// Maximum files processed at once.
    pub concurrency: usize,
    /// Maximum media files (audio/image/pdf) processed at once.
    pub media_concurrency: usize,
    /// Queue-level timeout after which a task is abandoned.
    pub task_timeout: Duration,
    /// Content shorter than this (after front-matter stripping) is bypassed.
    pub min_content_chars: usize,
    /// Format is skipped above this token count.
    pub max_formatting_tokens: usize,
    /// Minimum classification confidence (0-100) required to format.
    pub format_confidence_threshold: u8,
    /// Content sent to the intelligence service is cut to this many chars.
    pub content_cutoff_chars: usize,
    pub folders: FolderLayout,
    pub features: FeatureFlags,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            media_concurrency: 2,
            task_timeout: Duration::from_secs(30),
            min_content_chars: 5,
            max_formatting_tokens: 100_000,
            format_confidence_threshold: 80,
            content_cutoff_chars: 1000,
            folders: FolderLayout::default(),
            features: FeatureFlags::default(),
        }
    }
}

impl InboxConfig {
    /// Build a config from `INBOX_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let folders = FolderLayout {
            inbox: env_or("INBOX_FOLDER", defaults.folders.inbox),
            attachments: env_or("INBOX_ATTACHMENTS_FOLDER", defaults.folders.attachments),
            bypassed: env_or("INBOX_BYPASSED_FOLDER", defaults.folders.bypassed),
            errors: env_or("INBOX_ERRORS_FOLDER", defaults.folders.errors),
            backups: env_or("INBOX_BACKUPS_FOLDER", defaults.folders.backups),
            templates: env_or("INBOX_TEMPLATES_FOLDER", defaults.folders.templates),
        };
        let features = FeatureFlags {
            enable_document_classification: env_parse(
                "INBOX_ENABLE_CLASSIFICATION",
                defaults.features.enable_document_classification,
            )?,
            enable_file_renaming: env_parse(
                "INBOX_ENABLE_RENAMING",
                defaults.features.enable_file_renaming,
            )?,
            use_similar_tags: env_parse("INBOX_ENABLE_TAGGING", defaults.features.use_similar_tags)?,
        };

        let config = Self {
            concurrency: env_parse("INBOX_CONCURRENCY", defaults.concurrency)?,
            media_concurrency: env_parse("INBOX_MEDIA_CONCURRENCY", defaults.media_concurrency)?,
            task_timeout: Duration::from_secs(env_parse(
                "INBOX_TASK_TIMEOUT_SECS",
                defaults.task_timeout.as_secs(),
            )?),
            min_content_chars: env_parse("INBOX_MIN_CONTENT_CHARS", defaults.min_content_chars)?,
            max_formatting_tokens: env_parse(
                "INBOX_MAX_FORMATTING_TOKENS",
                defaults.max_formatting_tokens,
            )?,
            format_confidence_threshold: env_parse(
                "INBOX_FORMAT_CONFIDENCE",
                defaults.format_confidence_threshold,
            )?,
            content_cutoff_chars: env_parse(
                "INBOX_CONTENT_CUTOFF_CHARS",
                defaults.content_cutoff_chars,
            )?,
            folders,
            features,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the concurrency and timeout invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "concurrency".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.media_concurrency == 0 || self.media_concurrency > self.concurrency {
            return Err(ConfigError::InvalidValue {
                key: "media_concurrency".into(),
                message: format!(
                    "must be between 1 and concurrency ({}), got {}",
                    self.concurrency, self.media_concurrency
                ),
            });
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "task_timeout".into(),
                message: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// Settings for the standalone service binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory of the vault on disk.
    pub vault_path: std::path::PathBuf,
    /// Base URL of the content-intelligence server.
    pub server_url: String,
    /// Bearer token for the content-intelligence server.
    pub api_key: SecretString,
    /// Port for the status HTTP/WS surface.
    pub http_port: u16,
    /// How often the inbox folder is rescanned.
    pub watch_interval: Duration,
    /// Per-request limit for calls to the content-intelligence server.
    pub request_timeout: Duration,
    /// Directory for rolling log files, if file logging is enabled.
    pub log_dir: Option<std::path::PathBuf>,
}

impl ServiceConfig {
    /// Read service settings from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vault_path = std::env::var("INBOX_VAULT_PATH")
            .map_err(|_| ConfigError::MissingEnvVar("INBOX_VAULT_PATH".into()))?;
        let api_key = std::env::var("INBOX_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("INBOX_API_KEY".into()))?;
        let server_url = env_or(
            "INBOX_SERVER_URL",
            "https://app.fileorganizer2000.com".to_string(),
        )
        .trim_end_matches('/')
        .to_string();

        Ok(Self {
            vault_path: vault_path.into(),
            server_url,
            api_key: SecretString::from(api_key),
            http_port: env_parse("INBOX_HTTP_PORT", 8080)?,
            watch_interval: Duration::from_secs(env_parse("INBOX_WATCH_INTERVAL_SECS", 10)?),
            request_timeout: Duration::from_secs(env_parse("INBOX_REQUEST_TIMEOUT_SECS", 60)?),
            log_dir: std::env::var("INBOX_LOG_DIR").ok().map(Into::into),
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        Err(_) => Ok(default),
    }
}
