use super::callsigns::Actor;
use crate::db::schema::{AdminEntry, CallsignRecord, DonatorEntry};
use crate::db::{Database, is_unique_violation};
use crate::domain::{EmailAddress, clean_optional};
use crate::error::{AppError, AppResult};
use crate::types::CallsignId;
use tracing::{info, instrument};

fn require_admin(actor: &Actor) -> AppResult<()> {
    if actor.roles.is_admin {
        Ok(())
    } else {
        Err(AppError::forbidden("Admin access required"))
    }
}

fn require_super_admin(actor: &Actor) -> AppResult<()> {
    if actor.roles.is_super_admin {
        Ok(())
    } else {
        Err(AppError::forbidden("Super admin access required"))
    }
}

pub async fn list_admins(db: &Database, actor: &Actor) -> AppResult<Vec<AdminEntry>> {
    require_super_admin(actor)?;
    Ok(db.list_admins().await?)
}

#[instrument(skip(db, actor), fields(by = %actor.user.id))]
pub async fn add_admin(db: &Database, actor: &Actor, email: &str) -> AppResult<String> {
    require_super_admin(actor)?;
    let email = EmailAddress::parse(email)
        .ok_or_else(|| AppError::validation("Please enter a valid email address"))?;
    let created_by = actor.user.normalized_email();
    match db.add_admin(email.as_str(), created_by.as_deref()).await {
        Ok(()) => {
            info!(email = %email, "Admin added");
            Ok(email.to_string())
        }
        Err(e) if is_unique_violation(&e) => {
            Err(AppError::AlreadyExists("This email is already an admin".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(db, actor), fields(by = %actor.user.id))]
pub async fn remove_admin(db: &Database, actor: &Actor, email: &str) -> AppResult<()> {
    require_super_admin(actor)?;
    let email = email.trim().to_lowercase();
    if !db.remove_admin(&email).await? {
        return Err(AppError::not_found("Admin not found"));
    }
    info!(email = %email, "Admin removed");
    Ok(())
}

pub async fn list_donators(db: &Database, actor: &Actor) -> AppResult<Vec<DonatorEntry>> {
    require_admin(actor)?;
    Ok(db.list_donators().await?)
}

/// Exact callsign lookup for the badge form, ignoring case.
pub async fn find_callsign(db: &Database, actor: &Actor, callsign: &str) -> AppResult<CallsignRecord> {
    require_admin(actor)?;
    let callsign = callsign.trim();
    if callsign.is_empty() {
        return Err(AppError::validation("Enter a callsign to search"));
    }
    db.find_callsign(callsign)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Callsign {} not found", callsign.to_uppercase())))
}

#[instrument(skip(db, actor, note), fields(by = %actor.user.id))]
pub async fn grant_donator(
    db: &Database,
    actor: &Actor,
    callsign_id: &CallsignId,
    note: Option<&str>,
) -> AppResult<()> {
    require_admin(actor)?;
    let record = db
        .get_callsign(callsign_id)
        .await?
        .ok_or_else(|| AppError::not_found("Callsign not found"))?;
    let note = clean_optional(note);
    db.grant_donator(callsign_id, record.email.as_deref(), note.as_deref())
        .await?;
    info!(callsign = %record.callsign, "Donator badge granted");
    Ok(())
}

#[instrument(skip(db, actor), fields(by = %actor.user.id))]
pub async fn revoke_donator(db: &Database, actor: &Actor, callsign_id: &CallsignId) -> AppResult<()> {
    require_admin(actor)?;
    if !db.revoke_donator(callsign_id).await? {
        return Err(AppError::not_found("Donator not found"));
    }
    info!("Donator badge revoked");
    Ok(())
}
