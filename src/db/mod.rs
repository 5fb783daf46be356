use crate::domain::license::LicenseClass;
use crate::types::{CallsignId, ReminderChannel, UserId};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::error::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, trace};

/// Database schema row types.
pub mod schema;
use schema::{
    AdminEntry, CallsignRecord, ClassCounts, DonatorEntry, ReminderCandidate, StateCount,
};

/// Database access layer.
#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Sqlite>,
}

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const CALLSIGN_COLUMNS: &str = "id, callsign, name, location, state, district, address, email, phone, \
     telegram, telegram_chat_id, website, facebook, qrz, dmr_id, marts_id, is_scout, \
     is_red_crescent, is_veteran, is_marts_member, expiry_date, added_date, created_at, \
     updated_at, user_id";

/// Server-side part of a directory listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryQuery {
    pub search: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub license_class: Option<LicenseClass>,
    pub added_since: Option<NaiveDate>,
    pub limit: u32,
    pub offset: i64,
}

impl Database {
    /// `new` database operation.
    pub async fn new(db_filename: &str) -> Result<Self> {
        let db_url = format!("sqlite://{db_filename}");

        if !Path::new(db_filename).exists() {
            if let Some(parent) = Path::new(db_filename).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(db_filename)?;
        }

        let connect_options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous = NORMAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA temp_store = MEMORY;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await?;

        Self::prepare(pool).await
    }

    /// Private in-memory database with migrations applied.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::prepare(pool).await
    }

    async fn prepare(pool: Pool<Sqlite>) -> Result<Self> {
        MIGRATOR.run(&pool).await?;
        integrity_check(&pool).await?;
        validate_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// One page of the directory in listing order.
    pub async fn list_directory(&self, query: &DirectoryQuery) -> Result<Vec<CallsignRecord>> {
        trace!(?query, "Listing directory page");
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {CALLSIGN_COLUMNS} FROM callsigns WHERE 1 = 1"));

        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(term));
            qb.push(" AND (callsign LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR location LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(state) = &query.state {
            qb.push(" AND state = ").push_bind(state.clone());
        }
        if let Some(district) = &query.district {
            qb.push(" AND district = ").push_bind(district.clone());
        }
        if let Some(class) = query.license_class {
            push_class_filter(&mut qb, class);
        }
        if let Some(since) = query.added_since {
            qb.push(" AND added_date >= ")
                .push_bind(since.format("%Y-%m-%d").to_string());
        }

        qb.push(" ORDER BY added_date DESC, created_at DESC, callsign ASC LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset);

        let rows = qb
            .build_query_as::<CallsignRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Subset of `ids` carrying a donator badge.
    pub async fn donator_ids(&self, ids: &[CallsignId]) -> Result<HashSet<CallsignId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT callsign_id FROM user_profiles WHERE is_donator = 1 AND callsign_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str().to_string());
        }
        separated.push_unseparated(")");
        let found: Vec<CallsignId> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(found.into_iter().collect())
    }

    /// `get_callsign` database operation.
    pub async fn get_callsign(&self, id: &CallsignId) -> Result<Option<CallsignRecord>> {
        let record = sqlx::query_as::<_, CallsignRecord>(&format!(
            "SELECT {CALLSIGN_COLUMNS} FROM callsigns WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Case-insensitive exact lookup by callsign text.
    pub async fn find_callsign(&self, callsign: &str) -> Result<Option<CallsignRecord>> {
        let record = sqlx::query_as::<_, CallsignRecord>(&format!(
            "SELECT {CALLSIGN_COLUMNS} FROM callsigns WHERE callsign = ? COLLATE NOCASE"
        ))
        .bind(callsign.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Records owned by a user, alphabetical.
    pub async fn list_owned(&self, user_id: &UserId) -> Result<Vec<CallsignRecord>> {
        let records = sqlx::query_as::<_, CallsignRecord>(&format!(
            "SELECT {CALLSIGN_COLUMNS} FROM callsigns WHERE user_id = ? ORDER BY callsign ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Oldest callsign owned by a user.
    pub async fn primary_callsign(&self, user_id: &UserId) -> Result<Option<String>> {
        let callsign = sqlx::query_scalar::<_, String>(
            "SELECT callsign FROM callsigns WHERE user_id = ? ORDER BY created_at ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(callsign)
    }

    /// `insert_callsign` database operation.
    pub async fn insert_callsign(&self, record: &CallsignRecord) -> Result<()> {
        trace!(callsign = %record.callsign, "Inserting callsign");
        sqlx::query(&format!(
            "INSERT INTO callsigns ({CALLSIGN_COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.id)
        .bind(&record.callsign)
        .bind(&record.name)
        .bind(&record.location)
        .bind(&record.state)
        .bind(&record.district)
        .bind(&record.address)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.telegram)
        .bind(&record.telegram_chat_id)
        .bind(&record.website)
        .bind(&record.facebook)
        .bind(&record.qrz)
        .bind(&record.dmr_id)
        .bind(&record.marts_id)
        .bind(record.is_scout)
        .bind(record.is_red_crescent)
        .bind(record.is_veteran)
        .bind(record.is_marts_member)
        .bind(&record.expiry_date)
        .bind(&record.added_date)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite every mutable column of an existing record.
    pub async fn update_callsign(&self, record: &CallsignRecord) -> Result<bool> {
        trace!(id = %record.id, callsign = %record.callsign, "Updating callsign");
        let res = sqlx::query(
            "UPDATE callsigns SET callsign = ?, name = ?, location = ?, state = ?, district = ?, \
             address = ?, email = ?, phone = ?, telegram = ?, telegram_chat_id = ?, website = ?, \
             facebook = ?, qrz = ?, dmr_id = ?, marts_id = ?, is_scout = ?, is_red_crescent = ?, \
             is_veteran = ?, is_marts_member = ?, expiry_date = ?, added_date = ?, updated_at = ?, \
             user_id = ? WHERE id = ?",
        )
        .bind(&record.callsign)
        .bind(&record.name)
        .bind(&record.location)
        .bind(&record.state)
        .bind(&record.district)
        .bind(&record.address)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.telegram)
        .bind(&record.telegram_chat_id)
        .bind(&record.website)
        .bind(&record.facebook)
        .bind(&record.qrz)
        .bind(&record.dmr_id)
        .bind(&record.marts_id)
        .bind(record.is_scout)
        .bind(record.is_red_crescent)
        .bind(record.is_veteran)
        .bind(record.is_marts_member)
        .bind(&record.expiry_date)
        .bind(&record.added_date)
        .bind(record.updated_at)
        .bind(&record.user_id)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// `delete_callsign` database operation.
    pub async fn delete_callsign(&self, id: &CallsignId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM callsigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// `is_admin_email` database operation.
    pub async fn is_admin_email(&self, email: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM admins WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// `list_admins` database operation.
    pub async fn list_admins(&self) -> Result<Vec<AdminEntry>> {
        let admins = sqlx::query_as::<_, AdminEntry>(
            "SELECT email, created_by, created_at FROM admins ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(admins)
    }

    /// `add_admin` database operation.
    pub async fn add_admin(&self, email: &str, created_by: Option<&str>) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query("INSERT INTO admins (email, created_by, created_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(created_by)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `remove_admin` database operation.
    pub async fn remove_admin(&self, email: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM admins WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Badge holders, newest first.
    pub async fn list_donators(&self) -> Result<Vec<DonatorEntry>> {
        let donators = sqlx::query_as::<_, DonatorEntry>(
            "SELECT p.callsign_id, c.callsign, c.name, c.email, p.donator_note, p.created_at, \
             p.updated_at FROM user_profiles p JOIN callsigns c ON c.id = p.callsign_id \
             WHERE p.is_donator = 1 ORDER BY p.created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(donators)
    }

    /// Create or refresh the donator profile of a callsign.
    pub async fn grant_donator(
        &self,
        callsign_id: &CallsignId,
        email: Option<&str>,
        note: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO user_profiles (callsign_id, email, is_donator, donator_note, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?, ?) \
             ON CONFLICT (callsign_id) DO UPDATE SET is_donator = 1, \
             donator_note = excluded.donator_note, updated_at = excluded.updated_at",
        )
        .bind(callsign_id)
        .bind(email)
        .bind(note)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear the donator flag; the profile row stays.
    pub async fn revoke_donator(&self, callsign_id: &CallsignId) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let res = sqlx::query(
            "UPDATE user_profiles SET is_donator = 0, updated_at = ? WHERE callsign_id = ? AND is_donator = 1",
        )
        .bind(now)
        .bind(callsign_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Records with an expiry date in `[from, to]` and at least one contact channel.
    pub async fn expiring_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ReminderCandidate>> {
        let rows = sqlx::query_as::<_, ReminderCandidate>(
            "SELECT callsign, name, email, expiry_date, telegram_chat_id FROM callsigns \
             WHERE expiry_date IS NOT NULL AND expiry_date >= ? AND expiry_date <= ? \
             AND ((email IS NOT NULL AND email != '') OR (telegram_chat_id IS NOT NULL AND telegram_chat_id != '')) \
             ORDER BY expiry_date ASC, callsign ASC",
        )
        .bind(from.format("%Y-%m-%d").to_string())
        .bind(to.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Reserve the log row for a reminder before it is dispatched. `false`
    /// when the row already exists, so another sweep owns that reminder.
    pub async fn claim_reminder(
        &self,
        callsign: &str,
        email: &str,
        days_before: i64,
        channel: ReminderChannel,
    ) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let res = sqlx::query(
            "INSERT OR IGNORE INTO license_reminders_sent (callsign, email, days_before, channel, sent_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(callsign)
        .bind(email)
        .bind(days_before)
        .bind(channel.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Give back a claim whose dispatch failed so a later sweep retries it.
    pub async fn release_reminder(
        &self,
        callsign: &str,
        days_before: i64,
        channel: ReminderChannel,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM license_reminders_sent WHERE callsign = ? AND days_before = ? AND channel = ?",
        )
        .bind(callsign)
        .bind(days_before)
        .bind(channel.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `count_callsigns` database operation.
    pub async fn count_callsigns(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM callsigns")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Per-class totals using the same prefix rules as the listing filter.
    pub async fn class_counts(&self) -> Result<ClassCounts> {
        let counts = sqlx::query_as::<_, ClassCounts>(
            "SELECT \
             coalesce(sum(CASE WHEN callsign LIKE '9M%' THEN 1 ELSE 0 END), 0) AS class_a, \
             coalesce(sum(CASE WHEN callsign LIKE '9W2%' OR callsign LIKE '9W6%' OR callsign LIKE '9W8%' THEN 1 ELSE 0 END), 0) AS class_b, \
             coalesce(sum(CASE WHEN callsign LIKE '9W3%' THEN 1 ELSE 0 END), 0) AS class_c \
             FROM callsigns",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    /// Records whose `added_date` is on or after `since`.
    pub async fn count_added_since(&self, since: NaiveDate) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM callsigns WHERE added_date >= ?")
                .bind(since.format("%Y-%m-%d").to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// `top_states` database operation.
    pub async fn top_states(&self, limit: u32) -> Result<Vec<StateCount>> {
        let rows = sqlx::query_as::<_, StateCount>(
            "SELECT upper(state) AS state, count(*) AS count FROM callsigns \
             WHERE state IS NOT NULL AND state != '' \
             GROUP BY upper(state) ORDER BY count DESC, state ASC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Bump the visit counter and return the new total.
    pub async fn increment_visit(&self) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("UPDATE site_visits SET total = total + 1 WHERE id = 1 RETURNING total")
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    /// `visit_count` database operation.
    pub async fn visit_count(&self) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar("SELECT total FROM site_visits WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(total.unwrap_or(0))
    }

    /// `close` database operation.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether an error from this module is a unique-constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(sqlx::Error::as_database_error)
        .is_some_and(DatabaseError::is_unique_violation)
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_class_filter(qb: &mut QueryBuilder<'_, Sqlite>, class: LicenseClass) {
    let (negate, prefixes): (bool, Vec<&str>) = match class {
        LicenseClass::Other => (
            true,
            [LicenseClass::A, LicenseClass::B, LicenseClass::C]
                .into_iter()
                .flat_map(|c| c.prefixes().iter().copied())
                .collect(),
        ),
        other => (false, other.prefixes().to_vec()),
    };
    qb.push(if negate { " AND NOT (" } else { " AND (" });
    for (i, prefix) in prefixes.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("callsign LIKE ").push_bind(format!("{prefix}%"));
    }
    qb.push(")");
}

async fn integrity_check(pool: &Pool<Sqlite>) -> Result<()> {
    let result: String = sqlx::query_scalar("PRAGMA integrity_check;")
        .fetch_one(pool)
        .await?;
    if result.trim() == "ok" {
        info!("Database integrity check: ok");
        Ok(())
    } else {
        error!(result = %result, "Database integrity check failed");
        anyhow::bail!("Database integrity check failed: {result}");
    }
}

async fn validate_schema(pool: &Pool<Sqlite>) -> Result<()> {
    let tables: Vec<String> = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .map(|row: sqlx::sqlite::SqliteRow| row.get::<String, _>("name"))
        .fetch_all(pool)
        .await?;
    let present: HashSet<String> = tables.into_iter().collect();
    let required_tables = [
        "callsigns",
        "admins",
        "user_profiles",
        "license_reminders_sent",
        "site_visits",
        "_sqlx_migrations",
    ];
    for table in &required_tables {
        if !present.contains(*table) {
            anyhow::bail!("Database schema missing table: {table}");
        }
    }

    ensure_columns(
        pool,
        "callsigns",
        &[
            "id",
            "callsign",
            "name",
            "state",
            "district",
            "email",
            "phone",
            "telegram_chat_id",
            "expiry_date",
            "added_date",
            "created_at",
            "user_id",
        ],
    )
    .await?;

    ensure_columns(
        pool,
        "license_reminders_sent",
        &["callsign", "email", "days_before", "channel", "sent_at"],
    )
    .await?;

    Ok(())
}

async fn ensure_columns(pool: &Pool<Sqlite>, table: &str, expected: &[&str]) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await?;
    let mut present = HashSet::new();
    for row in rows {
        let name: String = row.get("name");
        present.insert(name);
    }
    for col in expected {
        if !present.contains(*col) {
            anyhow::bail!("Table {table} missing column: {col}");
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::NaiveDateTime;

    impl Database {
        /// Whether a reminder row is logged.
        pub async fn reminder_sent(
            &self,
            callsign: &str,
            days_before: i64,
            channel: ReminderChannel,
        ) -> Result<bool> {
            let count: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM license_reminders_sent WHERE callsign = ? AND days_before = ? AND channel = ?",
            )
            .bind(callsign)
            .bind(days_before)
            .bind(channel.as_str())
            .fetch_one(&self.pool)
            .await?;
            Ok(count > 0)
        }
    }

    /// Minimal record for tests; adjust fields as needed.
    pub fn record(callsign: &str, added: &str, created: &str) -> CallsignRecord {
        let created_at = NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S")
            .expect("test timestamp");
        CallsignRecord {
            id: CallsignId::generate(),
            callsign: callsign.to_string(),
            name: format!("Operator {callsign}"),
            location: Some("Kuala Lumpur".to_string()),
            state: Some("KUALA LUMPUR".to_string()),
            district: None,
            address: None,
            email: None,
            phone: None,
            telegram: None,
            telegram_chat_id: None,
            website: None,
            facebook: None,
            qrz: None,
            dmr_id: None,
            marts_id: None,
            is_scout: false,
            is_red_crescent: false,
            is_veteran: false,
            is_marts_member: false,
            expiry_date: None,
            added_date: Some(added.to_string()),
            created_at,
            updated_at: created_at,
            user_id: None,
        }
    }
}
