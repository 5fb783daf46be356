use crate::config::{AppConfig, ReminderConfig};
use crate::db::Database;
use crate::db::schema::ReminderCandidate;
use crate::domain::license::{days_until, parse_expiry};
use crate::notify::{
    ChatNotifier, Mailer, NotifyError, ReminderMessage, ResendMailer, TelegramNotifier,
};
use crate::types::ReminderChannel;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Days before expiry on which an email goes out.
pub const EMAIL_MILESTONES: [i64; 7] = [90, 60, 30, 14, 7, 3, 1];
/// Days before expiry on which a Telegram message goes out.
pub const TELEGRAM_MILESTONES: [i64; 5] = [90, 60, 30, 7, 1];
/// How far ahead the sweep looks.
pub const LOOKAHEAD_DAYS: i64 = 90;

/// Stand-in address logged for reminders to records without an email.
const TELEGRAM_ONLY: &str = "telegram-only";

/// Errors that abort a whole sweep. Per-record failures never do.
#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("{0} is not configured")]
    MissingSecret(&'static str),

    #[error("Failed to fetch callsigns: {0}")]
    Fetch(anyhow::Error),
}

/// Outcome of one reminder on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderResult {
    pub callsign: String,
    pub status: String,
    pub days_until: i64,
    pub channel: ReminderChannel,
}

/// Summary returned to the caller of a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderReport {
    pub success: bool,
    pub processed: usize,
    pub results: Vec<ReminderResult>,
}

/// Delivery channels available to the sweep.
#[derive(Clone, Default)]
pub struct Dispatchers {
    pub mailer: Option<Arc<dyn Mailer>>,
    pub chat: Option<Arc<dyn ChatNotifier>>,
}

impl Dispatchers {
    /// Build the channels whose secrets are present.
    pub fn from_config(settings: &ReminderConfig) -> anyhow::Result<Self> {
        let mailer: Option<Arc<dyn Mailer>> = match &settings.resend_api_key {
            Some(key) => Some(Arc::new(ResendMailer::new(
                &settings.resend_api_url,
                key,
                &settings.email_from,
            )?)),
            None => None,
        };
        let chat: Option<Arc<dyn ChatNotifier>> = settings
            .telegram_bot_token
            .as_deref()
            .map(|token| Arc::new(TelegramNotifier::new(token)) as Arc<dyn ChatNotifier>);
        Ok(Self { mailer, chat })
    }
}

/// One reminder sweep for `today`.
#[instrument(skip_all, fields(%today))]
pub async fn run(
    db: &Database,
    config: &AppConfig,
    dispatch: &Dispatchers,
    today: NaiveDate,
) -> Result<ReminderReport, ReminderError> {
    let settings = &config.reminders;
    let mailer = match (&dispatch.mailer, settings.email_enabled) {
        (Some(mailer), true) => Some(mailer.as_ref()),
        (None, true) => return Err(ReminderError::MissingSecret("RESEND_API_KEY")),
        (_, false) => None,
    };

    let horizon = today + Duration::days(LOOKAHEAD_DAYS);
    let candidates = db
        .expiring_between(today, horizon)
        .await
        .map_err(ReminderError::Fetch)?;
    info!(count = candidates.len(), "Found callsigns expiring within 90 days");

    let mut results = Vec::new();
    for candidate in &candidates {
        let Some(expiry) = parse_expiry(&candidate.expiry_date) else {
            debug!(callsign = %candidate.callsign, "Unreadable expiry date, skipping");
            continue;
        };
        let days = days_until(expiry, today);
        let message = ReminderMessage {
            callsign: candidate.callsign.clone(),
            name: candidate.name.clone(),
            expiry,
            days_until: days,
            site_url: config.site_url.clone(),
        };

        if let Some(chat) = dispatch.chat.as_deref()
            && let Some(chat_id) = non_empty(candidate.telegram_chat_id.as_deref())
            && TELEGRAM_MILESTONES.contains(&days)
            && let Some(result) = send_telegram(db, chat, chat_id, candidate, &message).await
        {
            results.push(result);
        }

        if let Some(email) = non_empty(candidate.email.as_deref())
            && EMAIL_MILESTONES.contains(&days)
            && let Some(result) = send_email(db, mailer, email, candidate, &message).await
        {
            results.push(result);
        }
    }

    info!(processed = results.len(), "Reminder sweep finished");
    Ok(ReminderReport {
        success: true,
        processed: results.len(),
        results,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Claim the log row, send, and give the claim back if the send fails.
/// `None` when another sweep already holds the row.
async fn deliver(
    db: &Database,
    callsign: &str,
    logged_as: &str,
    days: i64,
    channel: ReminderChannel,
    send: impl Future<Output = Result<(), NotifyError>> + Send,
) -> Option<String> {
    match db.claim_reminder(callsign, logged_as, days, channel).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(%callsign, days, %channel, "Reminder already sent");
            return None;
        }
        Err(e) => {
            error!(error = %e, %callsign, %channel, "Failed to claim reminder");
            return Some(format!("failed: {e}"));
        }
    }

    match send.await {
        Ok(()) => {
            info!(%callsign, days, %channel, "Sent reminder");
            Some("sent".to_string())
        }
        Err(e) => {
            warn!(error = %e, %callsign, %channel, "Reminder failed");
            if let Err(release) = db.release_reminder(callsign, days, channel).await {
                error!(error = %release, %callsign, %channel, "Failed to release reminder claim");
                return Some(format!("failed: {e} (logged, will not retry)"));
            }
            Some(format!("failed: {e}"))
        }
    }
}

async fn send_telegram(
    db: &Database,
    chat: &dyn ChatNotifier,
    chat_id: &str,
    candidate: &ReminderCandidate,
    message: &ReminderMessage,
) -> Option<ReminderResult> {
    let logged_as = non_empty(candidate.email.as_deref()).unwrap_or(TELEGRAM_ONLY);
    let send = async {
        let text = message.telegram()?;
        chat.send_html(chat_id, &text).await
    };
    let status = deliver(
        db,
        &candidate.callsign,
        logged_as,
        message.days_until,
        ReminderChannel::Telegram,
        send,
    )
    .await?;
    Some(ReminderResult {
        callsign: candidate.callsign.clone(),
        status,
        days_until: message.days_until,
        channel: ReminderChannel::Telegram,
    })
}

async fn send_email(
    db: &Database,
    mailer: Option<&dyn Mailer>,
    email: &str,
    candidate: &ReminderCandidate,
    message: &ReminderMessage,
) -> Option<ReminderResult> {
    let status = match mailer {
        Some(mailer) => {
            let send = async {
                let outgoing = message.email(email)?;
                mailer.send(&outgoing).await
            };
            deliver(
                db,
                &candidate.callsign,
                email,
                message.days_until,
                ReminderChannel::Email,
                send,
            )
            .await?
        }
        None => {
            info!(callsign = %candidate.callsign, days = message.days_until, "Email disabled, skipping");
            "disabled".to_string()
        }
    };
    Some(ReminderResult {
        callsign: candidate.callsign.clone(),
        status,
        days_until: message.days_until,
        channel: ReminderChannel::Email,
    })
}

/// Run the sweep on a fixed interval until `shutdown` fires.
pub fn spawn_schedule(
    db: Database,
    config: Arc<AppConfig>,
    dispatch: Dispatchers,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(config.reminders.interval_seconds.max(60));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = shutdown.cancelled() => break,
            }
            debug!("Running scheduled reminder sweep");
            let today = Utc::now().date_naive();
            match run(&db, &config, &dispatch, today).await {
                Ok(report) => debug!(processed = report.processed, "Scheduled sweep done"),
                Err(e) => error!(error = %e, "Scheduled reminder sweep failed"),
            }
        }
    })
}
