//! Subscriber identity and parking session model.
//!
//! An [`Identity`] is created from a subscription row in one of two shapes:
//! email-keyed (email, names and phone known) or plate-keyed (only a single
//! license plate known). Either shape may later learn the opaque external id
//! the transaction log uses for the subscriber.
//!
//! Sessions are appended by the grouper and flagged once by the scanner.
use std::collections::{BTreeMap, BTreeSet};

use crate::ticks::Tick;

/// Lookup key of an identity. Plate-keyed identities keep their plate as the
/// key even after an external id is discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Email(String),
    Plate(String),
}

/// Subscription tier a plate was registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LicenseTier {
    Primary,
    Additional,
}

impl LicenseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseTier::Primary => "First",
            LicenseTier::Additional => "Additional",
        }
    }
}

/// Every tier and subscription status a plate was listed with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlateLicense {
    pub tiers: BTreeSet<LicenseTier>,
    pub statuses: BTreeSet<String>,
}

/// Result of the overlap scan for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Violation {
    #[default]
    Unset,
    Clean,
    Violator,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::Unset => "",
            Violation::Clean => "clean",
            Violation::Violator => "violator",
        }
    }
}

/// One parking event for one plate.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Source row number of the transaction; breaks exit-time ties.
    pub seq: usize,
    pub plate: String,
    pub entry_tick: Tick,
    /// May be lower than `entry_tick` when the source data is inconsistent.
    pub exit_tick: Tick,
    /// As reported by the source, not derived from the ticks.
    pub duration_minutes: f64,
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub violation: Violation,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Identity {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Digits only.
    pub phone: Option<String>,
    pub external_id: Option<String>,
    pub plates: BTreeSet<String>,
    pub licenses: BTreeMap<String, PlateLicense>,
    pub sessions: Vec<Session>,
    pub mismatch: bool,
}

/// `PLATE: a/b` per plate, comma-joined; plates with no values are left out.
fn per_plate<'a>(entries: impl Iterator<Item = (&'a String, Vec<&'a str>)>) -> String {
    entries
        .filter(|(_, values)| !values.is_empty())
        .map(|(plate, values)| format!("{}: {}", plate, values.join("/")))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Identity {
    /// Build an email-keyed identity from a subscription row's fields.
    pub fn with_email(
        email: &str,
        first_name: Option<String>,
        last_name: Option<String>,
        phone: Option<String>,
        plate: &str,
    ) -> Self {
        Self {
            email: Some(email.to_string()),
            first_name,
            last_name,
            phone,
            plates: BTreeSet::from([plate.to_string()]),
            ..Self::default()
        }
    }

    /// Build a plate-keyed identity: nothing but the plate is known.
    pub fn with_plate(plate: &str) -> Self {
        Self {
            plates: BTreeSet::from([plate.to_string()]),
            ..Self::default()
        }
    }

    pub fn is_plate_keyed(&self) -> bool {
        self.email.is_none()
    }

    pub fn key(&self) -> IdentityKey {
        match &self.email {
            Some(email) => IdentityKey::Email(email.clone()),
            None => IdentityKey::Plate(self.plates.iter().next().cloned().unwrap_or_default()),
        }
    }

    /// Add a plate. Returns `false` when the plate was already present.
    pub fn add_plate(&mut self, plate: &str) -> bool {
        self.plates.insert(plate.to_string())
    }

    /// Note the tier and status a subscription row gave `plate`.
    pub fn record_license(&mut self, plate: &str, tier: LicenseTier, status: Option<String>) {
        let license = self.licenses.entry(plate.to_string()).or_default();
        license.tiers.insert(tier);
        license.statuses.extend(status);
    }

    /// Fold another identity's license records for the same subscriber into
    /// this one.
    pub fn merge_licenses(&mut self, other: BTreeMap<String, PlateLicense>) {
        for (plate, license) in other {
            let entry = self.licenses.entry(plate).or_default();
            entry.tiers.extend(license.tiers);
            entry.statuses.extend(license.statuses);
        }
    }

    pub fn license_types(&self) -> String {
        per_plate(
            self.licenses
                .iter()
                .map(|(plate, l)| (plate, l.tiers.iter().map(LicenseTier::as_str).collect())),
        )
    }

    pub fn license_statuses(&self) -> String {
        per_plate(
            self.licenses
                .iter()
                .map(|(plate, l)| (plate, l.statuses.iter().map(String::as_str).collect())),
        )
    }

    /// Comma-joined plate list in sorted order.
    pub fn plate_list(&self) -> String {
        self.plates
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Label used in session exports: email, else external id, else plate.
    pub fn display_key(&self) -> String {
        match (&self.email, &self.external_id) {
            (Some(email), _) => email.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => format!("plate:{}", self.plate_list()),
        }
    }

    pub fn violator_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.violation == Violation::Violator)
            .count()
    }

    /// Reported minutes of all violator sessions.
    pub fn flagged_minutes(&self) -> f64 {
        self.sessions
            .iter()
            .filter(|s| s.violation == Violation::Violator)
            .map(|s| s.duration_minutes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_set_is_deduplicated() {
        let mut id = Identity::with_email("a@x.com", None, None, None, "ABC123");
        assert!(!id.add_plate("ABC123"));
        assert!(id.add_plate("XYZ789"));
        assert_eq!(id.plates.len(), 2);
        assert_eq!(id.plate_list(), "ABC123, XYZ789");
    }

    #[test]
    fn keys_follow_creation_shape() {
        let e = Identity::with_email("a@x.com", Some("Ann".into()), None, None, "ABC123");
        assert_eq!(e.key(), IdentityKey::Email("a@x.com".into()));
        assert!(!e.is_plate_keyed());

        let mut p = Identity::with_plate("QQQ111");
        assert!(p.is_plate_keyed());
        assert_eq!(p.display_key(), "plate:QQQ111");
        p.external_id = Some("u-42".into());
        // external id enriches the identity but does not re-key it
        assert_eq!(p.key(), IdentityKey::Plate("QQQ111".into()));
        assert_eq!(p.display_key(), "u-42");
    }

    #[test]
    fn licenses_collect_tiers_and_statuses_per_plate() {
        let mut id = Identity::with_email("a@x.com", None, None, None, "ABC123");
        id.record_license("ABC123", LicenseTier::Primary, Some("Subscription Added".into()));
        id.record_license("ABC123", LicenseTier::Primary, Some("Subscription Added".into()));
        id.record_license("XYZ789", LicenseTier::Additional, None);

        let mut other = BTreeMap::new();
        other.insert(
            "XYZ789".to_string(),
            PlateLicense {
                tiers: BTreeSet::from([LicenseTier::Primary]),
                statuses: BTreeSet::from(["Subscription Removed".to_string()]),
            },
        );
        id.merge_licenses(other);

        assert_eq!(id.license_types(), "ABC123: First, XYZ789: First/Additional");
        assert_eq!(
            id.license_statuses(),
            "ABC123: Subscription Added, XYZ789: Subscription Removed"
        );
        assert_eq!(Identity::with_plate("QQQ111").license_statuses(), "");
    }

    #[test]
    fn flagged_minutes_sum_violators_only() {
        let session = |minutes: f64, violation: Violation| Session {
            seq: 0,
            plate: "ABC123".into(),
            entry_tick: 0,
            exit_tick: 0,
            duration_minutes: minutes,
            start_date: String::new(),
            start_time: String::new(),
            end_date: String::new(),
            end_time: String::new(),
            violation,
        };
        let mut id = Identity::with_plate("ABC123");
        id.sessions = vec![
            session(60.0, Violation::Clean),
            session(30.5, Violation::Violator),
            session(15.0, Violation::Violator),
        ];
        assert_eq!(id.flagged_minutes(), 45.5);
    }

    #[test]
    fn violation_labels() {
        assert_eq!(Violation::default().as_str(), "");
        assert_eq!(Violation::Clean.as_str(), "clean");
        assert_eq!(Violation::Violator.as_str(), "violator");
    }
}
