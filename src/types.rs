use serde::{Deserialize, Serialize};
use std::fmt;

/// External identity of an authenticated user (hosted auth `sub`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a new `UserId`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the raw identifier value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary key of a callsign record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct CallsignId(String);

impl CallsignId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the raw identifier value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallsignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated caller as reported by the hosted auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
}

impl AuthUser {
    /// Lower-cased email, used for role checks.
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase)
    }
}

/// Roles derived for a caller on every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Roles {
    pub is_admin: bool,
    pub is_super_admin: bool,
}

/// Delivery channel of a license reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderChannel {
    Email,
    Telegram,
}

impl ReminderChannel {
    /// Convert the channel to its storage string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Telegram => "telegram",
        }
    }
}

impl TryFrom<&str> for ReminderChannel {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "email" => Ok(Self::Email),
            "telegram" => Ok(Self::Telegram),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ReminderChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_email_lowercases_and_drops_blank() {
        let user = AuthUser {
            id: UserId::new("u1"),
            email: Some("  9M2PJU@HamRadio.my ".to_string()),
        };
        assert_eq!(user.normalized_email().as_deref(), Some("9m2pju@hamradio.my"));

        let blank = AuthUser {
            id: UserId::new("u2"),
            email: Some("   ".to_string()),
        };
        assert_eq!(blank.normalized_email(), None);
    }

    #[test]
    fn reminder_channel_storage_names() {
        assert_eq!(ReminderChannel::Email.as_str(), "email");
        assert_eq!(ReminderChannel::try_from("telegram"), Ok(ReminderChannel::Telegram));
        assert!(ReminderChannel::try_from("sms").is_err());
    }
}
