pub mod filters;
pub mod license;
pub mod regions;

/// Minimum password length accepted before calling the hosted auth API.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Callsign(String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailAddress(String);

#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Callsign {
    /// Accepts `9M`/`9W`, one digit, then one or more ASCII alphanumerics.
    /// Input is trimmed and upper-cased.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().to_ascii_uppercase();
        let rest = normalized
            .strip_prefix("9M")
            .or_else(|| normalized.strip_prefix("9W"))?;
        let mut chars = rest.chars();
        if !chars.next()?.is_ascii_digit() {
            return None;
        }
        let suffix = chars.as_str();
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(normalized))
    }

    #[allow(dead_code)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Callsign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl EmailAddress {
    /// Loose `local@domain.tld` check, stored lower case.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.chars().any(char::is_whitespace) {
            return None;
        }
        let (local, domain) = trimmed.split_once('@')?;
        if local.is_empty() || domain.contains('@') {
            return None;
        }
        let (host, tld) = domain.rsplit_once('.')?;
        if host.is_empty() || tld.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the `@`, used as a fallback display name.
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Password {
    /// Passwords are taken verbatim; only the length is enforced.
    pub fn parse(input: &str) -> Option<Self> {
        if input.chars().count() < MIN_PASSWORD_LEN {
            None
        } else {
            Some(Self(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Trim and drop empty strings from optional form fields.
pub fn clean_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callsign_accepts_malaysian_prefixes() {
        assert_eq!(Callsign::parse("9m2pju").map(|c| c.0), Some("9M2PJU".into()));
        assert!(Callsign::parse(" 9W2ABC ").is_some());
        assert!(Callsign::parse("9W3ZZZ").is_some());
        assert!(Callsign::parse("9M4X").is_some());
    }

    #[test]
    fn callsign_rejects_bad_shapes() {
        assert!(Callsign::parse("").is_none());
        assert!(Callsign::parse("9M").is_none());
        assert!(Callsign::parse("9M2").is_none());
        assert!(Callsign::parse("9MA2BC").is_none());
        assert!(Callsign::parse("W1AW").is_none());
        assert!(Callsign::parse("9V1AB").is_none());
        assert!(Callsign::parse("9W2AB-C").is_none());
    }

    #[test]
    fn email_shape() {
        assert_eq!(
            EmailAddress::parse(" Op@Example.MY ").map(|e| e.0),
            Some("op@example.my".into())
        );
        assert!(EmailAddress::parse("nobody").is_none());
        assert!(EmailAddress::parse("a@b").is_none());
        assert!(EmailAddress::parse("a b@c.d").is_none());
        assert!(EmailAddress::parse("@c.d").is_none());
    }

    #[test]
    fn email_local_part() {
        let email = EmailAddress::parse("9m2pju@hamradio.my").unwrap();
        assert_eq!(email.local_part(), "9m2pju");
    }

    #[test]
    fn password_length() {
        assert!(Password::parse("12345").is_none());
        assert!(Password::parse("123456").is_some());
        assert_eq!(format!("{:?}", Password::parse("secret1").unwrap()), "Password(***)");
    }
}
