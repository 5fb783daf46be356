use crate::db::schema::CallsignRecord;
use crate::db::{Database, is_unique_violation};
use crate::domain::license::parse_expiry;
use crate::domain::regions::{normalize_district, normalize_state};
use crate::domain::{Callsign, EmailAddress, clean_optional};
use crate::error::{AppError, AppResult};
use crate::realtime::{ChangeEvent, ChangeKind, RealtimeHub};
use crate::types::{AuthUser, CallsignId, Roles};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

/// An authenticated caller and the roles resolved for them.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: AuthUser,
    pub roles: Roles,
}

/// Submitted listing fields, as received from the form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallsignInput {
    pub callsign: String,
    pub name: String,
    pub location: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub telegram: Option<String>,
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
    /// Admins only: leave the new record without an owner.
    pub unowned: bool,
}

/// Validated, normalized fields ready to be written.
struct ValidFields {
    callsign: Callsign,
    name: String,
    location: Option<String>,
    state: Option<String>,
    district: Option<String>,
    email: Option<String>,
    expiry_date: Option<String>,
    added_date: Option<String>,
}

fn validate(input: &CallsignInput) -> AppResult<ValidFields> {
    let callsign = Callsign::parse(&input.callsign)
        .ok_or_else(|| AppError::validation("Invalid callsign format (e.g. 9M2ABC, 9W2XYZ)"))?;
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("Name is required"));
    }

    let state = match clean_optional(input.state.as_deref()) {
        Some(raw) => Some(
            normalize_state(&raw)
                .ok_or_else(|| AppError::validation(format!("Unknown state: {raw}")))?
                .to_string(),
        ),
        None => None,
    };
    let district = match (clean_optional(input.district.as_deref()), &state) {
        (None, _) => None,
        (Some(_), None) => return Err(AppError::validation("Select a state before choosing a district")),
        (Some(raw), Some(state)) => Some(
            normalize_district(state, &raw)
                .ok_or_else(|| AppError::validation(format!("{raw} is not a district of {state}")))?
                .to_string(),
        ),
    };

    let email = match clean_optional(input.email.as_deref()) {
        Some(raw) => Some(
            EmailAddress::parse(&raw)
                .ok_or_else(|| AppError::validation("Please enter a valid email address"))?
                .to_string(),
        ),
        None => None,
    };

    let expiry_date = match clean_optional(input.expiry_date.as_deref()) {
        Some(raw) => Some(format_date(
            parse_expiry(&raw).ok_or_else(|| AppError::validation("Invalid expiry date"))?,
        )),
        None => None,
    };
    let added_date = match clean_optional(input.added_date.as_deref()) {
        Some(raw) => Some(format_date(
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| AppError::validation("Invalid added date"))?,
        )),
        None => None,
    };

    Ok(ValidFields {
        callsign,
        name: name.to_string(),
        location: clean_optional(input.location.as_deref()),
        state,
        district,
        email,
        expiry_date,
        added_date,
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn apply(record: &mut CallsignRecord, fields: ValidFields, input: &CallsignInput) {
    record.callsign = fields.callsign.to_string();
    record.name = fields.name;
    record.location = fields.location;
    record.state = fields.state;
    record.district = fields.district;
    record.address = clean_optional(input.address.as_deref());
    record.email = fields.email;
    record.phone = clean_optional(input.phone.as_deref());
    record.telegram = clean_optional(input.telegram.as_deref());
    record.telegram_chat_id = clean_optional(input.telegram_chat_id.as_deref());
    record.website = clean_optional(input.website.as_deref());
    record.facebook = clean_optional(input.facebook.as_deref());
    record.qrz = clean_optional(input.qrz.as_deref());
    record.dmr_id = clean_optional(input.dmr_id.as_deref());
    record.marts_id = clean_optional(input.marts_id.as_deref());
    record.is_scout = input.is_scout;
    record.is_red_crescent = input.is_red_crescent;
    record.is_veteran = input.is_veteran;
    record.is_marts_member = input.is_marts_member;
    record.expiry_date = fields.expiry_date;
    if fields.added_date.is_some() {
        record.added_date = fields.added_date;
    }
}

fn duplicate(callsign: &str) -> AppError {
    AppError::AlreadyExists(format!("Callsign {callsign} already exists"))
}

fn publish(hub: &RealtimeHub, kind: ChangeKind, record: &CallsignRecord) {
    hub.publish_change(ChangeEvent {
        kind,
        callsign: record.callsign.clone(),
        name: record.name.clone(),
        user_id: record.user_id.clone(),
    });
}

fn is_owner(actor: &Actor, record: &CallsignRecord) -> bool {
    record.user_id.as_ref() == Some(&actor.user.id)
}

#[instrument(skip_all, fields(user_id = %actor.user.id, callsign = %input.callsign))]
pub async fn create(
    db: &Database,
    hub: &RealtimeHub,
    actor: &Actor,
    input: &CallsignInput,
    today: NaiveDate,
) -> AppResult<CallsignRecord> {
    let fields = validate(input)?;
    let now = Utc::now().naive_utc();
    let owner = if input.unowned && actor.roles.is_admin {
        None
    } else {
        Some(actor.user.id.clone())
    };
    let mut record = CallsignRecord {
        id: CallsignId::generate(),
        callsign: String::new(),
        name: String::new(),
        location: None,
        state: None,
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
        added_date: Some(format_date(today)),
        created_at: now,
        updated_at: now,
        user_id: owner,
    };
    apply(&mut record, fields, input);

    if let Err(e) = db.insert_callsign(&record).await {
        if is_unique_violation(&e) {
            return Err(duplicate(&record.callsign));
        }
        return Err(e.into());
    }
    info!(id = %record.id, "Callsign created");
    publish(hub, ChangeKind::Insert, &record);
    Ok(record)
}

#[instrument(skip_all, fields(user_id = %actor.user.id, %id))]
pub async fn update(
    db: &Database,
    hub: &RealtimeHub,
    actor: &Actor,
    id: &CallsignId,
    input: &CallsignInput,
) -> AppResult<CallsignRecord> {
    let mut record = db
        .get_callsign(id)
        .await?
        .ok_or_else(|| AppError::not_found("Callsign not found"))?;
    if !is_owner(actor, &record) && !actor.roles.is_admin {
        return Err(AppError::forbidden("You can only edit your own callsigns"));
    }
    let fields = validate(input)?;
    apply(&mut record, fields, input);
    record.updated_at = Utc::now().naive_utc();

    match db.update_callsign(&record).await {
        Ok(true) => {}
        Ok(false) => return Err(AppError::not_found("Callsign not found")),
        Err(e) if is_unique_violation(&e) => return Err(duplicate(&record.callsign)),
        Err(e) => return Err(e.into()),
    }
    info!("Callsign updated");
    publish(hub, ChangeKind::Update, &record);
    Ok(record)
}

#[instrument(skip_all, fields(user_id = %actor.user.id, %id))]
pub async fn delete(db: &Database, hub: &RealtimeHub, actor: &Actor, id: &CallsignId) -> AppResult<()> {
    let record = db
        .get_callsign(id)
        .await?
        .ok_or_else(|| AppError::not_found("Callsign not found"))?;
    if !is_owner(actor, &record) && !actor.roles.is_super_admin {
        return Err(AppError::forbidden(
            "Only the owner or a super admin can delete this callsign",
        ));
    }
    if !db.delete_callsign(id).await? {
        return Err(AppError::not_found("Callsign not found"));
    }
    info!(callsign = %record.callsign, "Callsign deleted");
    publish(hub, ChangeKind::Delete, &record);
    Ok(())
}

pub async fn mine(db: &Database, actor: &Actor) -> AppResult<Vec<CallsignRecord>> {
    Ok(db.list_owned(&actor.user.id).await?)
}

/// Display name used for presence: oldest owned callsign, else the email
/// local part, else "Member".
pub async fn identity(db: &Database, user: &AuthUser) -> String {
    match db.primary_callsign(&user.id).await {
        Ok(Some(callsign)) => return callsign,
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Identity lookup failed");
            return "Member".to_string();
        }
    }
    user.normalized_email()
        .and_then(|e| EmailAddress::parse(&e))
        .map(|e| e.local_part().to_string())
        .filter(|local| !local.is_empty())
        .unwrap_or_else(|| "Member".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn actor(id: &str, is_admin: bool, is_super_admin: bool) -> Actor {
        Actor {
            user: AuthUser {
                id: UserId::new(id),
                email: Some(format!("{id}@example.my")),
            },
            roles: Roles {
                is_admin,
                is_super_admin,
            },
        }
    }

    fn input(callsign: &str) -> CallsignInput {
        CallsignInput {
            callsign: callsign.to_string(),
            name: "Operator".to_string(),
            state: Some("selangor".to_string()),
            district: Some("petaling".to_string()),
            expiry_date: Some("2027-03-01".to_string()),
            ..CallsignInput::default()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[tokio::test]
    async fn create_normalizes_and_owns() {
        let db = Database::in_memory().await.unwrap();
        let hub = RealtimeHub::new();
        let owner = actor("u1", false, false);

        let record = create(&db, &hub, &owner, &input(" 9m2abc "), today()).await.unwrap();
        assert_eq!(record.callsign, "9M2ABC");
        assert_eq!(record.state.as_deref(), Some("SELANGOR"));
        assert_eq!(record.district.as_deref(), Some("Petaling"));
        assert_eq!(record.added_date.as_deref(), Some("2026-10-16"));
        assert_eq!(record.user_id, Some(UserId::new("u1")));

        let err = create(&db, &hub, &owner, &input("9M2ABC"), today()).await.unwrap_err();
        assert_eq!(err.to_string(), "Callsign 9M2ABC already exists");
    }

    #[tokio::test]
    async fn unowned_only_for_admins() {
        let db = Database::in_memory().await.unwrap();
        let hub = RealtimeHub::new();
        let mut payload = input("9W2XYZ");
        payload.unowned = true;

        let by_member = create(&db, &hub, &actor("u1", false, false), &payload, today()).await.unwrap();
        assert!(by_member.user_id.is_some());

        payload.callsign = "9W2XYY".to_string();
        let by_admin = create(&db, &hub, &actor("a1", true, false), &payload, today()).await.unwrap();
        assert!(by_admin.user_id.is_none());
    }

    #[tokio::test]
    async fn validation_rules() {
        let db = Database::in_memory().await.unwrap();
        let hub = RealtimeHub::new();
        let who = actor("u1", false, false);

        let mut bad = input("W1AW");
        assert!(matches!(create(&db, &hub, &who, &bad, today()).await, Err(AppError::Validation(_))));

        bad = input("9M2AAA");
        bad.district = Some("Kuching".to_string());
        assert!(matches!(create(&db, &hub, &who, &bad, today()).await, Err(AppError::Validation(_))));

        bad = input("9M2AAA");
        bad.expiry_date = Some("someday".to_string());
        assert!(matches!(create(&db, &hub, &who, &bad, today()).await, Err(AppError::Validation(_))));

        bad = input("9M2AAA");
        bad.name = "  ".to_string();
        assert!(matches!(create(&db, &hub, &who, &bad, today()).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn update_and_delete_permissions() {
        let db = Database::in_memory().await.unwrap();
        let hub = RealtimeHub::new();
        let owner = actor("u1", false, false);
        let stranger = actor("u2", false, false);
        let admin = actor("a1", true, false);
        let root = actor("r1", true, true);

        let record = create(&db, &hub, &owner, &input("9M2OWN"), today()).await.unwrap();

        let mut edit = input("9M2OWN");
        edit.name = "Renamed".to_string();
        assert!(matches!(
            update(&db, &hub, &stranger, &record.id, &edit).await,
            Err(AppError::Forbidden(_))
        ));
        let updated = update(&db, &hub, &admin, &record.id, &edit).await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.user_id, record.user_id);
        assert_eq!(updated.added_date, record.added_date);

        assert!(matches!(
            delete(&db, &hub, &admin, &record.id).await,
            Err(AppError::Forbidden(_))
        ));
        delete(&db, &hub, &root, &record.id).await.unwrap();
        assert!(matches!(
            delete(&db, &hub, &owner, &record.id).await,
            Err(AppError::NotFound(_))
        ));

        let other = create(&db, &hub, &owner, &input("9M2TWO"), today()).await.unwrap();
        delete(&db, &hub, &owner, &other.id).await.unwrap();
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let db = Database::in_memory().await.unwrap();
        let hub = RealtimeHub::new();
        let mut listener = hub.connect(crate::realtime::GLOBAL_CHANNEL, "watcher", None);
        listener.subscribe();

        create(&db, &hub, &actor("u1", false, false), &input("9M2NEW"), today())
            .await
            .unwrap();
        match listener.recv().await {
            Some(crate::realtime::RealtimeEvent::Change(change)) => {
                assert_eq!(change.kind, ChangeKind::Insert);
                assert_eq!(change.callsign, "9M2NEW");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn identity_fallbacks() {
        let db = Database::in_memory().await.unwrap();
        let hub = RealtimeHub::new();
        let who = actor("u1", false, false);
        assert_eq!(identity(&db, &who.user).await, "u1");

        let anonymous = AuthUser {
            id: UserId::new("u3"),
            email: None,
        };
        assert_eq!(identity(&db, &anonymous).await, "Member");

        create(&db, &hub, &who, &input("9M2FST"), today()).await.unwrap();
        assert_eq!(identity(&db, &who.user).await, "9M2FST");
    }
}
