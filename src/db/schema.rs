use crate::types::{CallsignId, UserId};
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

/// One row of the `callsigns` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct CallsignRecord {
    pub id: CallsignId,
    pub callsign: String,
    pub name: String,
    pub location: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub telegram: Option<String>,
    #[serde(skip_serializing)]
    pub telegram_chat_id: Option<String>,
    pub website: Option<String>,
    pub facebook: Option<String>,
    pub qrz: Option<String>,
    pub dmr_id: Option<String>,
    pub marts_id: Option<String>,
    pub is_scout: bool,
    pub is_red_crescent: bool,
    pub is_veteran: bool,
    pub is_marts_member: bool,
    pub expiry_date: Option<String>,
    pub added_date: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AdminEntry {
    pub email: String,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Donator profile joined with its callsign.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DonatorEntry {
    pub callsign_id: CallsignId,
    pub callsign: String,
    pub name: String,
    pub email: Option<String>,
    pub donator_note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Fields the reminder sweep needs from an expiring record.
#[derive(Debug, Clone, FromRow)]
pub struct ReminderCandidate {
    pub callsign: String,
    pub name: String,
    pub email: Option<String>,
    pub expiry_date: String,
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, FromRow)]
pub struct ClassCounts {
    pub class_a: i64,
    pub class_b: i64,
    pub class_c: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StateCount {
    pub state: String,
    pub count: i64,
}
