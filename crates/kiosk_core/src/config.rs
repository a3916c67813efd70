//! Kiosk configuration file.
//!
//! # Responsibility
//! - Load `config.json` into typed sections, defaulting every missing field.
//! - Reject values the runtime cannot honor before anything starts.
//!
//! # Invariants
//! - A validated config always yields a valid `Schedule`, non-zero poll
//!   intervals and non-negative thresholds.

use crate::checkout::NotificationPolicy;
use crate::logging::{default_log_level, LogSettings};
use crate::reader::ReaderTiming;
use crate::schedule::Schedule;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationsConfig,
    pub worker: WorkerConfig,
    pub reader: ReaderConfig,
    pub monthly_summary: MonthlySummaryConfig,
    /// SMTP settings for the `email` channel.
    pub email: Option<EmailConfig>,
    /// Bot settings for the `mattermost` channel.
    pub mattermost: Option<MattermostConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("kiosk.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rotating log files; logging stays off when
    /// unset.
    pub dir: Option<PathBuf>,
    /// Size at which the current log file is rotated.
    pub max_file_mb: u64,
    /// Rotated files kept next to the current one.
    pub keep_files: usize,
    /// Also print warnings and errors to stderr.
    pub echo_warnings: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
            max_file_mb: 10,
            keep_files: 5,
            echo_warnings: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub language: String,
    pub low_balance_threshold: Decimal,
    pub low_stock_threshold: u32,
    /// Channel names registered at start-up.
    pub channels: Vec<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        let policy = NotificationPolicy::default();
        Self {
            language: policy.language,
            low_balance_threshold: policy.low_balance_threshold,
            low_stock_threshold: policy.low_stock_threshold,
            channels: vec!["log".to_string()],
        }
    }
}

impl NotificationsConfig {
    pub fn policy(&self) -> NotificationPolicy {
        NotificationPolicy {
            low_balance_threshold: self.low_balance_threshold,
            low_stock_threshold: self.low_stock_threshold,
            language: self.language.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub after_read_ms: u64,
    pub idle_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            after_read_ms: 500,
            idle_ms: 100,
            error_backoff_ms: 1_000,
        }
    }
}

impl ReaderConfig {
    pub fn timing(&self) -> ReaderTiming {
        ReaderTiming {
            after_read: Duration::from_millis(self.after_read_ms),
            idle: Duration::from_millis(self.idle_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlySummaryConfig {
    pub enabled: bool,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl Default for MonthlySummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            day: 1,
            hour: 0,
            minute: 0,
        }
    }
}

impl MonthlySummaryConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule::Monthly {
            day: self.day,
            hour: self.hour,
            minute: self.minute,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub login: String,
    pub password: String,
    /// Sender mailbox; the SMTP login when unset.
    pub from_address: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: 587,
            login: String::new(),
            password: String::new(),
            from_address: None,
            timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl EmailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sender(&self) -> &str {
        self.from_address.as_deref().unwrap_or(&self.login)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MattermostConfig {
    pub enabled: bool,
    /// Server root, e.g. `https://chat.example.org`.
    pub base_url: String,
    pub bot_token: String,
    pub timeout_secs: u64,
}

impl Default for MattermostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            bot_token: String::new(),
            timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for MattermostConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattermostConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("bot_token", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl MattermostConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl KioskConfig {
    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".to_string()));
        }
        LogSettings::from_config(&self.logging)
            .map_err(|err| ConfigError::Invalid(format!("logging: {err}")))?;
        if self.notifications.low_balance_threshold < Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "notifications.low_balance_threshold must not be negative".to_string(),
            ));
        }
        if self.notifications.language.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "notifications.language must not be empty".to_string(),
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.reader.after_read_ms == 0 || self.reader.idle_ms == 0 {
            return Err(ConfigError::Invalid(
                "reader pacing intervals must be positive".to_string(),
            ));
        }
        self.monthly_summary
            .schedule()
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("monthly_summary: {err}")))?;
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(mattermost) = self.mattermost.as_ref().filter(|section| section.enabled) {
            validate_mattermost(mattermost)?;
        }
        Ok(())
    }
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    if email.smtp_server.trim().is_empty() || email.login.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "email.smtp_server and email.login must be set".to_string(),
        ));
    }
    if email.smtp_port == 0 || email.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "email.smtp_port and email.timeout_secs must be positive".to_string(),
        ));
    }
    if !email.sender().contains('@') {
        return Err(ConfigError::Invalid(format!(
            "email sender `{}` is not a mail address",
            email.sender()
        )));
    }
    Ok(())
}

fn validate_mattermost(mattermost: &MattermostConfig) -> Result<(), ConfigError> {
    let url = mattermost.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "mattermost.base_url must be an http(s) URL, got `{url}`"
        )));
    }
    if mattermost.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("mattermost.bot_token must be set".to_string()));
    }
    if mattermost.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "mattermost.timeout_secs must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, KioskConfig};
    use crate::schedule::Schedule;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn empty_document_uses_defaults() {
        let config = KioskConfig::from_json_str("{}").expect("defaults are valid");
        assert_eq!(config, KioskConfig::default());
        assert_eq!(config.notifications.channels, vec!["log".to_string()]);
        assert_eq!(config.notifications.policy().low_balance_threshold, dec!(3.00));
        assert_eq!(config.monthly_summary.schedule(), Schedule::MONTHLY_DEFAULT);
        assert_eq!(config.reader.timing().after_read, Duration::from_millis(500));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = KioskConfig::from_json_str(
            r#"{
                "database": { "path": "/var/lib/kiosk/kiosk.sqlite3" },
                "notifications": { "low_balance_threshold": "5.50", "channels": ["email", "chat"] },
                "monthly_summary": { "day": 2, "hour": 6 }
            }"#,
        )
        .expect("config should parse");

        assert_eq!(config.notifications.low_balance_threshold, dec!(5.50));
        assert_eq!(config.notifications.low_stock_threshold, 3);
        assert_eq!(config.notifications.channels, vec!["email", "chat"]);
        assert_eq!(
            config.monthly_summary.schedule(),
            Schedule::Monthly {
                day: 2,
                hour: 6,
                minute: 0
            }
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        for raw in [
            r#"{ "worker": { "poll_interval_ms": 0 } }"#,
            r#"{ "monthly_summary": { "day": 31 } }"#,
            r#"{ "logging": { "dir": "relative/logs" } }"#,
            r#"{ "notifications": { "low_balance_threshold": "-1" } }"#,
            r#"{ "logging": { "level": "loud" } }"#,
            r#"{ "logging": { "dir": "/var/log/kiosk", "keep_files": 0 } }"#,
            r#"{ "email": { "smtp_server": "", "login": "kiosk@example.org" } }"#,
            r#"{ "email": { "smtp_server": "smtp.example.org", "login": "kiosk" } }"#,
            r#"{ "mattermost": { "base_url": "chat.example.org", "bot_token": "t" } }"#,
            r#"{ "mattermost": { "base_url": "https://chat.example.org" } }"#,
        ] {
            assert!(
                matches!(KioskConfig::from_json_str(raw), Err(ConfigError::Invalid(_))),
                "expected rejection for {raw}"
            );
        }
    }

    #[test]
    fn channel_sections_parse_with_defaults() {
        let config = KioskConfig::from_json_str(
            r#"{
                "email": { "smtp_server": "smtp.example.org", "login": "kiosk@example.org", "password": "hunter2" },
                "mattermost": { "base_url": "https://chat.example.org", "bot_token": "secret-token" }
            }"#,
        )
        .expect("config should parse");

        let email = config.email.as_ref().expect("email section");
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.sender(), "kiosk@example.org");
        assert_eq!(email.timeout(), Duration::from_secs(10));
        let mattermost = config.mattermost.as_ref().expect("mattermost section");
        assert!(mattermost.enabled);

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn disabled_mattermost_section_is_not_validated() {
        let config = KioskConfig::from_json_str(r#"{ "mattermost": { "enabled": false } }"#)
            .expect("disabled section is ignored");
        assert!(config.mattermost.is_some_and(|section| !section.enabled));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            KioskConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
