use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level `config.toml`.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default)]
    pub super_admin_emails: Vec<String>,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub log_level: Option<String>,

    #[serde(default)]
    pub web: WebConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

#[derive(Clone, Deserialize, Debug)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub web_app_host: String,
    #[serde(default = "default_port")]
    pub web_app_port: u16,
    #[serde(default)]
    pub web_app_ssl_enabled: bool,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub web_app_ssl_cert_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub web_app_ssl_key_path: Option<String>,
    #[serde(default)]
    pub root_path: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            web_app_host: default_host(),
            web_app_port: default_port(),
            web_app_ssl_enabled: false,
            web_app_ssl_cert_path: None,
            web_app_ssl_key_path: None,
            root_path: String::new(),
        }
    }
}

/// Hosted auth (GoTrue-compatible) endpoint.
#[derive(Clone, Deserialize, Debug)]
pub struct AuthConfig {
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_auth_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DirectoryConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_load_more_delay")]
    pub load_more_delay_ms: u64,
    #[serde(default = "default_local_store")]
    pub local_store_name: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            load_more_delay_ms: default_load_more_delay(),
            local_store_name: default_local_store(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct ReminderConfig {
    #[serde(default)]
    pub schedule_enabled: bool,
    #[serde(default = "default_reminder_interval")]
    pub interval_seconds: u64,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub trigger_token: Option<String>,
    #[serde(default = "default_true")]
    pub email_enabled: bool,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub resend_api_key: Option<String>,
    #[serde(default = "default_resend_url")]
    pub resend_api_url: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub telegram_bot_token: Option<String>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            schedule_enabled: false,
            interval_seconds: default_reminder_interval(),
            trigger_token: None,
            email_enabled: true,
            resend_api_key: None,
            resend_api_url: default_resend_url(),
            email_from: default_email_from(),
            telegram_bot_token: None,
        }
    }
}

fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

fn default_site_url() -> String {
    "https://callbook.hamradio.my".to_string()
}
fn default_db_name() -> String {
    "callbook.db".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_auth_timeout() -> u64 {
    10
}
fn default_page_size() -> u32 {
    24
}
fn default_load_more_delay() -> u64 {
    500
}
fn default_local_store() -> String {
    "local_storage.json".to_string()
}
fn default_reminder_interval() -> u64 {
    86400
}
fn default_true() -> bool {
    true
}
fn default_resend_url() -> String {
    "https://api.resend.com/emails".to_string()
}
fn default_email_from() -> String {
    "MY-Callbook <reminder@callbook.hamradio.my>".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.super_admin_emails = config
            .super_admin_emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if config.directory.page_size == 0 {
            anyhow::bail!("directory.page_size must be greater than zero");
        }
        config.site_url = config.site_url.trim_end_matches('/').to_string();
        config.auth.url = config.auth.url.trim_end_matches('/').to_string();
        Ok(config)
    }

    pub fn get_db_path(&self, config_path: &Path) -> PathBuf {
        sibling_path(config_path, &self.db_name)
    }

    pub fn get_local_store_path(&self, config_path: &Path) -> PathBuf {
        sibling_path(config_path, &self.directory.local_store_name)
    }

    pub fn is_super_admin(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.super_admin_emails.iter().any(|e| *e == email)
    }
}

fn sibling_path(config_path: &Path, name: &str) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    parent.join(name)
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig::parse(
        r#"
super_admin_emails = ["Root@HamRadio.my"]

[auth]
url = "http://auth.invalid/"
anon_key = "anon"
"#,
    )
    .expect("test config parses")
}
