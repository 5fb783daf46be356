//! Outbound notification channels: email through Resend and Telegram
//! through the Bot API.

use askama::Template;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use thiserror::Error;
use tracing::debug;

/// License renewal portal linked from every reminder.
pub const RENEWAL_URL: &str = "https://espectra.mcmc.gov.my/";

/// Delivery failure from a notification provider.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),
}

/// Rendered email ready to hand to a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound email provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError>;
}

/// Outbound chat provider.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Send an HTML-formatted message to a chat id or `@channel`.
    async fn send_html(&self, chat_id: &str, html: &str) -> Result<(), NotifyError>;
}

/// Resend HTTP API client.
pub struct ResendMailer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct ResendError {
    message: Option<String>,
}

impl ResendMailer {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &self.from,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(to = %email.to, "Email accepted by provider");
            return Ok(());
        }
        let reason = response
            .json::<ResendError>()
            .await
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());
        Err(NotifyError::Provider(reason))
    }
}

/// Telegram Bot API client built on `teloxide`.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

fn recipient(chat_id: &str) -> Recipient {
    let chat_id = chat_id.trim();
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

#[async_trait]
impl ChatNotifier for TelegramNotifier {
    async fn send_html(&self, chat_id: &str, html: &str) -> Result<(), NotifyError> {
        self.bot
            .send_message(recipient(chat_id), html)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// Reminder tone, picked from the days left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Urgent,
    Reminder,
    Notice,
}

/// Colours used by the email banner for one urgency level.
pub struct Palette {
    pub banner_bg: &'static str,
    pub border: &'static str,
    pub heading: &'static str,
    pub expiry: &'static str,
}

impl Urgency {
    pub const fn from_days(days_until: i64) -> Self {
        if days_until <= 7 {
            Self::Urgent
        } else if days_until <= 30 {
            Self::Reminder
        } else {
            Self::Notice
        }
    }

    pub const fn emoji(self) -> &'static str {
        match self {
            Self::Urgent => "🚨",
            Self::Reminder => "⚠️",
            Self::Notice => "📋",
        }
    }

    pub const fn tag(self) -> &'static str {
        match self {
            Self::Urgent => "URGENT",
            Self::Reminder => "REMINDER",
            Self::Notice => "NOTICE",
        }
    }

    pub const fn advice(self) -> &'static str {
        match self {
            Self::Urgent => "Your license is about to expire! Please renew immediately.",
            Self::Reminder => "Your license will expire soon. Consider renewing now.",
            Self::Notice => "This is a friendly reminder to plan your license renewal.",
        }
    }

    pub const fn palette(self) -> Palette {
        match self {
            Self::Urgent => Palette {
                banner_bg: "rgba(255,0,0,0.1)",
                border: "#ff4444",
                heading: "#ff6666",
                expiry: "#ff6666",
            },
            Self::Reminder => Palette {
                banner_bg: "rgba(255,165,0,0.1)",
                border: "#ffa500",
                heading: "#ffcc00",
                expiry: "#e5e5e5",
            },
            Self::Notice => Palette {
                banner_bg: "rgba(79,172,254,0.1)",
                border: "#4facfe",
                heading: "#4facfe",
                expiry: "#e5e5e5",
            },
        }
    }
}

/// Everything a reminder says about one license.
#[derive(Debug, Clone)]
pub struct ReminderMessage {
    pub callsign: String,
    pub name: String,
    pub expiry: NaiveDate,
    pub days_until: i64,
    pub site_url: String,
}

impl ReminderMessage {
    pub const fn urgency(&self) -> Urgency {
        Urgency::from_days(self.days_until)
    }

    fn expiry_text(&self) -> String {
        self.expiry.format("%-d %B %Y").to_string()
    }

    pub fn subject(&self) -> String {
        let urgency = self.urgency();
        format!(
            "{} {}: Your Amateur Radio License ({}) expires in {} days",
            urgency.emoji(),
            urgency.tag(),
            self.callsign,
            self.days_until
        )
    }

    pub fn email(&self, to: &str) -> Result<OutgoingEmail, NotifyError> {
        let urgency = self.urgency();
        let html = ReminderEmailTemplate {
            urgency_label: format!("{} {}", urgency.emoji(), urgency.tag()),
            palette: urgency.palette(),
            days_until: self.days_until,
            callsign: &self.callsign,
            name: &self.name,
            expiry_date: self.expiry_text(),
            renewal_url: RENEWAL_URL,
            site_url: &self.site_url,
        }
        .render()?;
        Ok(OutgoingEmail {
            to: to.to_string(),
            subject: self.subject(),
            html,
        })
    }

    pub fn telegram(&self) -> Result<String, NotifyError> {
        let text = ReminderTelegramTemplate {
            urgency: self.urgency(),
            days_until: self.days_until,
            callsign: &self.callsign,
            name: &self.name,
            expiry_date: self.expiry_text(),
            renewal_url: RENEWAL_URL,
            site_url: &self.site_url,
        }
        .render()?;
        Ok(text)
    }
}

#[derive(Template)]
#[template(path = "reminder_email.html")]
struct ReminderEmailTemplate<'a> {
    urgency_label: String,
    palette: Palette,
    days_until: i64,
    callsign: &'a str,
    name: &'a str,
    expiry_date: String,
    renewal_url: &'a str,
    site_url: &'a str,
}

#[derive(Template)]
#[template(path = "reminder_telegram.html")]
struct ReminderTelegramTemplate<'a> {
    urgency: Urgency,
    days_until: i64,
    callsign: &'a str,
    name: &'a str,
    expiry_date: String,
    renewal_url: &'a str,
    site_url: &'a str,
}

/// Body of the message sent by the notification test endpoint.
pub fn test_message(site_url: &str) -> String {
    format!(
        "✅ <b>Test notification</b>\n\nTelegram notifications from <a href=\"{site_url}\">MY-Callbook</a> are working. \
         License expiry reminders will be delivered to this chat."
    )
}
