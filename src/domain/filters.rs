use super::license::{LicenseClass, LicenseStatus, classify};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// "Added in the last N days" facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyWindow {
    Week,
    Month,
    Quarter,
}

impl RecencyWindow {
    pub const fn days(self) -> i64 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
        }
    }

    pub fn from_days(days: &str) -> Option<Self> {
        match days.trim() {
            "7" => Some(Self::Week),
            "30" => Some(Self::Month),
            "90" => Some(Self::Quarter),
            _ => None,
        }
    }

    /// Earliest `added_date` still inside the window.
    pub fn cutoff(self, today: NaiveDate) -> NaiveDate {
        today - chrono::Duration::days(self.days())
    }
}

/// Contact availability facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactFilter {
    HasPhone,
    HasEmail,
    HasAny,
    NoContact,
}

impl ContactFilter {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "phone" | "has_phone" => Some(Self::HasPhone),
            "email" | "has_email" => Some(Self::HasEmail),
            "any" | "has_any" => Some(Self::HasAny),
            "none" | "no_contact" => Some(Self::NoContact),
            _ => None,
        }
    }

    fn matches(self, phone: Option<&str>, email: Option<&str>) -> bool {
        let has_phone = phone.is_some_and(|p| !p.trim().is_empty());
        let has_email = email.is_some_and(|e| !e.trim().is_empty());
        match self {
            Self::HasPhone => has_phone,
            Self::HasEmail => has_email,
            Self::HasAny => has_phone || has_email,
            Self::NoContact => !has_phone && !has_email,
        }
    }
}

/// Facet selections. Empty fields mean "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub state: Option<String>,
    pub district: Option<String>,
    pub license_class: Option<LicenseClass>,
    pub license_status: Option<LicenseStatus>,
    pub recent: Option<RecencyWindow>,
    pub contact: Option<ContactFilter>,
}

impl Filters {
    /// Whether any facet evaluated after the fetch is active.
    pub const fn has_derived(&self) -> bool {
        self.license_status.is_some() || self.contact.is_some()
    }

    /// Facets that depend on derived fields, applied to already fetched rows.
    pub fn matches_derived(
        &self,
        expiry_date: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
        today: NaiveDate,
    ) -> bool {
        if let Some(wanted) = self.license_status
            && classify(expiry_date, today).status != wanted
        {
            return false;
        }
        if let Some(contact) = self.contact
            && !contact.matches(phone, email)
        {
            return false;
        }
        true
    }
}

/// Search box plus facets; this is what gets persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterState {
    pub search: String,
    pub filters: Filters,
}

impl FilterState {
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty() && self.filters == Filters::default()
    }
}
