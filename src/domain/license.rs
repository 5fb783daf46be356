//! License class and expiry status, both derived data.
//!
//! Nothing here touches storage; the listing filters and the reminder job
//! call into these with the record's raw fields and the current date.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// Upper bound (inclusive) of the expiring-soon window, in days.
pub const EXPIRING_SOON_DAYS: i64 = 30;

/// License class, derived purely from the callsign prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseClass {
    A,
    B,
    C,
    Other,
}

const CLASS_B_PREFIXES: [&str; 3] = ["9W2", "9W6", "9W8"];
const CLASS_C_PREFIX: &str = "9W3";

impl LicenseClass {
    pub fn from_callsign(callsign: &str) -> Self {
        let upper = callsign.trim().to_ascii_uppercase();
        if upper.starts_with("9M") {
            Self::A
        } else if CLASS_B_PREFIXES.iter().any(|p| upper.starts_with(p)) {
            Self::B
        } else if upper.starts_with(CLASS_C_PREFIX) {
            Self::C
        } else {
            Self::Other
        }
    }

    /// Callsign prefixes that select this class, empty for `Other`.
    pub const fn prefixes(self) -> &'static [&'static str] {
        match self {
            Self::A => &["9M"],
            Self::B => &CLASS_B_PREFIXES,
            Self::C => &[CLASS_C_PREFIX],
            Self::Other => &[],
        }
    }

    /// Parse a class from a filter value: `A`/`B`/`C` or a prefix such as `9W6`.
    pub fn parse(input: &str) -> Option<Self> {
        let upper = input.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" => None,
            "A" | "CLASS A" => Some(Self::A),
            "B" | "CLASS B" => Some(Self::B),
            "C" | "CLASS C" => Some(Self::C),
            prefix => [Self::A, Self::B, Self::C]
                .into_iter()
                .find(|class| class.prefixes().contains(&prefix)),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "Class A",
            Self::B => "Class B",
            Self::C => "Class C",
            Self::Other => "Other",
        }
    }
}

/// Expiry status of a license on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    NoStatus,
    Active,
    ExpiringSoon,
    Expired,
}

impl LicenseStatus {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "expiring" | "expiring_soon" | "expiring-soon" => Some(Self::ExpiringSoon),
            "expired" => Some(Self::Expired),
            "none" | "no_status" | "no-status" => Some(Self::NoStatus),
            _ => None,
        }
    }
}

/// Classification result for one expiry date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LicenseInfo {
    pub status: LicenseStatus,
    pub days_until: Option<i64>,
}

/// Read an expiry date as stored: `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Whole days from `today` until `expiry` (negative once past).
pub fn days_until(expiry: NaiveDate, today: NaiveDate) -> i64 {
    (expiry - today).num_days()
}

pub fn classify_date(expiry: Option<NaiveDate>, today: NaiveDate) -> LicenseInfo {
    let Some(expiry) = expiry else {
        return LicenseInfo {
            status: LicenseStatus::NoStatus,
            days_until: None,
        };
    };
    let days = days_until(expiry, today);
    let status = if days < 0 {
        LicenseStatus::Expired
    } else if days <= EXPIRING_SOON_DAYS {
        LicenseStatus::ExpiringSoon
    } else {
        LicenseStatus::Active
    };
    LicenseInfo {
        status,
        days_until: Some(days),
    }
}

/// Total over all inputs: missing or unreadable dates are `NoStatus`.
pub fn classify(expiry: Option<&str>, today: NaiveDate) -> LicenseInfo {
    classify_date(expiry.and_then(parse_expiry), today)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn class_from_prefix() {
        assert_eq!(LicenseClass::from_callsign("9W2ABC"), LicenseClass::B);
        assert_eq!(LicenseClass::from_callsign("9M4XYZ"), LicenseClass::A);
        assert_eq!(LicenseClass::from_callsign("9W3ZZZ"), LicenseClass::C);
        assert_eq!(LicenseClass::from_callsign("9W9AAA"), LicenseClass::Other);
        assert_eq!(LicenseClass::from_callsign("9w6abc"), LicenseClass::B);
        assert_eq!(LicenseClass::from_callsign("9W8XX"), LicenseClass::B);
    }

    #[test]
    fn class_filter_values() {
        assert_eq!(LicenseClass::parse("b"), Some(LicenseClass::B));
        assert_eq!(LicenseClass::parse("9W6"), Some(LicenseClass::B));
        assert_eq!(LicenseClass::parse("9M"), Some(LicenseClass::A));
        assert_eq!(LicenseClass::parse("9W3"), Some(LicenseClass::C));
        assert_eq!(LicenseClass::parse("9W9"), None);
        assert_eq!(LicenseClass::parse(""), None);
    }

    #[test]
    fn missing_or_garbage_is_no_status() {
        for raw in [None, Some(""), Some("   "), Some("soon"), Some("2026-13-40")] {
            let info = classify(raw, today());
            assert_eq!(info.status, LicenseStatus::NoStatus, "{raw:?}");
            assert_eq!(info.days_until, None);
        }
    }

    #[test]
    fn expired_iff_before_today() {
        let yesterday = classify(Some("2026-10-15"), today());
        assert_eq!(yesterday.status, LicenseStatus::Expired);
        assert_eq!(yesterday.days_until, Some(-1));

        let same_day = classify(Some("2026-10-16"), today());
        assert_eq!(same_day.status, LicenseStatus::ExpiringSoon);
        assert_eq!(same_day.days_until, Some(0));
    }

    #[test]
    fn expiring_window_boundaries() {
        let edge = classify(Some("2026-11-15"), today());
        assert_eq!(edge.days_until, Some(30));
        assert_eq!(edge.status, LicenseStatus::ExpiringSoon);

        let past_edge = classify(Some("2026-11-16"), today());
        assert_eq!(past_edge.days_until, Some(31));
        assert_eq!(past_edge.status, LicenseStatus::Active);
    }

    #[test]
    fn accepts_timestamps() {
        let info = classify(Some("2027-01-01T00:00:00+08:00"), today());
        assert_eq!(info.status, LicenseStatus::Active);
        assert_eq!(info.days_until, Some(77));
    }

    #[test]
    fn exhaustive_sign_property() {
        let base = today();
        for offset in -400_i64..=400 {
            let date = base + chrono::Duration::days(offset);
            let info = classify_date(Some(date), base);
            assert_eq!(info.days_until, Some(offset));
            assert_eq!(info.status == LicenseStatus::Expired, offset < 0);
            assert_ne!(info.status, LicenseStatus::NoStatus);
        }
    }
}
