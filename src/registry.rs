//! Identity registry and plate index.
//!
//! The registry owns every [`Identity`]. Email-keyed identities are found
//! by email; plate-keyed identities (subscription rows without an email) are
//! found through a fallback map keyed by their single plate. The plate index
//! maps each plate to the set of emails that claimed it in the subscription
//! export; a plate with more than one claimant is a mismatch.
//!
//! A second email-less row for a plate that already has a plate-keyed
//! identity merges into it rather than creating another identity.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, warn};

use crate::engine::EngineError;
use crate::identity::{Identity, IdentityKey};
use crate::rows::{SubscriptionRow, normalize_phone, present};

/// Plate length seen throughout the source data. Other lengths are logged.
pub const EXPECTED_PLATE_LEN: usize = 6;

/// Handle to an identity owned by a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(usize);

/// Outcome of [`Registry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new identity was created.
    Inserted,
    /// The identity existed and gained a plate.
    PlateAdded,
    /// The identity already held this plate.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub email_identities: usize,
    pub plate_identities: usize,
    pub mismatched_identities: usize,
    pub multi_claimed_plates: usize,
    /// Subscription rows without a plate.
    pub skipped_rows: usize,
    /// Plates whose length differs from [`EXPECTED_PLATE_LEN`].
    pub odd_plates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    identities: Vec<Identity>,
    by_email: HashMap<String, IdentityId>,
    by_plate: HashMap<String, IdentityId>,
    plate_index: BTreeMap<String, BTreeSet<String>>,
    skipped_rows: usize,
    odd_plates: BTreeSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the identity a subscription row describes, paired with its
    /// trimmed plate. Rows without an email produce a plate-keyed identity
    /// with no names or phone. Returns `None` when the plate is blank.
    pub fn resolve_subscription_row(row: &SubscriptionRow) -> Option<(Identity, String)> {
        let plate = row.license_plate.trim();
        if plate.is_empty() {
            return None;
        }
        let mut identity = match present(row.email.as_deref()) {
            Some(email) => Identity::with_email(
                &email,
                present(row.first_name.as_deref()),
                present(row.last_name.as_deref()),
                row.phone.as_deref().and_then(normalize_phone),
                plate,
            ),
            None => Identity::with_plate(plate),
        };
        identity.record_license(plate, row.license_tier(), present(row.status.as_deref()));
        Some((identity, plate.to_string()))
    }

    /// Resolve and register one subscription row.
    pub fn register_row(&mut self, row: &SubscriptionRow) -> Option<Registration> {
        let Some((identity, plate)) = Self::resolve_subscription_row(row) else {
            warn!(
                "subscription row without a plate skipped (program {:?})",
                row.enterprise_program_name
            );
            self.skipped_rows += 1;
            return None;
        };
        if plate.chars().count() != EXPECTED_PLATE_LEN && self.odd_plates.insert(plate.clone()) {
            warn!(
                "plate {:?} has unexpected length {} (expected {})",
                plate,
                plate.chars().count(),
                EXPECTED_PLATE_LEN
            );
        }
        Some(self.register(identity, &plate))
    }

    /// Register `plate` for `identity`. An existing identity with the same
    /// key keeps its first-seen name and phone fields, gains the plate and
    /// picks up the new row's license record.
    pub fn register(&mut self, mut identity: Identity, plate: &str) -> Registration {
        match identity.key() {
            IdentityKey::Email(email) => {
                self.plate_index
                    .entry(plate.to_string())
                    .or_default()
                    .insert(email.clone());
                if let Some(&id) = self.by_email.get(&email) {
                    let existing = &mut self.identities[id.0];
                    existing.merge_licenses(identity.licenses);
                    return if existing.add_plate(plate) {
                        Registration::PlateAdded
                    } else {
                        Registration::Unchanged
                    };
                }
                identity.add_plate(plate);
                let id = self.push(identity);
                self.by_email.insert(email, id);
                Registration::Inserted
            }
            IdentityKey::Plate(_) => {
                if let Some(&id) = self.by_plate.get(plate) {
                    debug!("plate-keyed row for {} merged into existing identity", plate);
                    self.identities[id.0].merge_licenses(identity.licenses);
                    return Registration::Unchanged;
                }
                identity.add_plate(plate);
                let id = self.push(identity);
                self.by_plate.insert(plate.to_string(), id);
                Registration::Inserted
            }
        }
    }

    fn push(&mut self, identity: Identity) -> IdentityId {
        self.identities.push(identity);
        IdentityId(self.identities.len() - 1)
    }

    pub fn find_by_email(&self, email: &str) -> Option<&Identity> {
        self.by_email.get(email).map(|id| &self.identities[id.0])
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<&Identity> {
        self.identities
            .iter()
            .find(|i| i.external_id.as_deref() == Some(external_id))
    }

    pub fn find(&self, key: &IdentityKey) -> Option<&Identity> {
        match key {
            IdentityKey::Email(email) => self.find_by_email(email),
            IdentityKey::Plate(plate) => self.find_by_plate(plate),
        }
    }

    /// Plate-keyed identity for a plate, if one was registered.
    pub fn find_by_plate(&self, plate: &str) -> Option<&Identity> {
        self.by_plate.get(plate).map(|id| &self.identities[id.0])
    }

    /// Emails that claimed `plate` in the subscription export.
    pub fn claimants(&self, plate: &str) -> Option<&BTreeSet<String>> {
        self.plate_index.get(plate)
    }

    /// Pick the identity a transaction for `plate` belongs to. Email claims
    /// win over the plate-keyed fallback; among several claimants the
    /// lexicographically smallest email is chosen.
    pub fn route(&self, plate: &str) -> Option<IdentityId> {
        if let Some(email) = self.plate_index.get(plate).and_then(|e| e.first()) {
            return self.by_email.get(email).copied();
        }
        self.by_plate.get(plate).copied()
    }

    pub fn get(&self, id: IdentityId) -> Option<&Identity> {
        self.identities.get(id.0)
    }

    pub fn get_mut(&mut self, id: IdentityId) -> Option<&mut Identity> {
        self.identities.get_mut(id.0)
    }

    /// Identities in first-seen order.
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn identities_mut(&mut self) -> &mut [Identity] {
        &mut self.identities
    }

    /// Email-keyed identities first, then plate-keyed, each in first-seen
    /// order.
    pub fn roster(&self) -> impl Iterator<Item = &Identity> {
        let emails = self.identities.iter().filter(|i| !i.is_plate_keyed());
        let plates = self.identities.iter().filter(|i| i.is_plate_keyed());
        emails.chain(plates)
    }

    /// Plates claimed by more than one email, with their claimants.
    pub fn multi_claimed_plates(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.plate_index
            .iter()
            .filter(|(_, emails)| emails.len() > 1)
            .map(|(plate, emails)| (plate.as_str(), emails))
    }

    /// Set the mismatch flag on every identity and return how many are
    /// mismatched.
    ///
    /// An email-keyed identity is mismatched when any of its plates has more
    /// than one claimant in the plate index. A plate-keyed identity is
    /// mismatched when its plate is claimed by any email at all.
    pub fn detect_mismatches(&mut self) -> usize {
        for (plate, emails) in self.multi_claimed_plates() {
            warn!("plate {} claimed by {} emails: {:?}", plate, emails.len(), emails);
        }
        let index = &self.plate_index;
        let mut count = 0;
        for identity in &mut self.identities {
            identity.mismatch = if identity.is_plate_keyed() {
                identity.plates.iter().any(|p| index.contains_key(p))
            } else {
                identity
                    .plates
                    .iter()
                    .any(|p| index.get(p).is_some_and(|e| e.len() > 1))
            };
            if identity.mismatch {
                count += 1;
            }
        }
        count
    }

    /// Check the structural assumptions the later stages rely on.
    pub fn verify_invariants(&self) -> Result<(), EngineError> {
        for identity in &self.identities {
            if identity.is_plate_keyed() && identity.plates.len() != 1 {
                return Err(EngineError::InvariantViolation(format!(
                    "plate-keyed identity holds {} plates: {}",
                    identity.plates.len(),
                    identity.plate_list()
                )));
            }
        }
        for (plate, emails) in &self.plate_index {
            for email in emails {
                let owns = self
                    .find_by_email(email)
                    .is_some_and(|i| i.plates.contains(plate));
                if !owns {
                    return Err(EngineError::InvariantViolation(format!(
                        "plate index lists {} for {} but the identity does not hold it",
                        email, plate
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> RegistryStats {
        let plate_identities = self.identities.iter().filter(|i| i.is_plate_keyed()).count();
        RegistryStats {
            email_identities: self.identities.len() - plate_identities,
            plate_identities,
            mismatched_identities: self.identities.iter().filter(|i| i.mismatch).count(),
            multi_claimed_plates: self.multi_claimed_plates().count(),
            skipped_rows: self.skipped_rows,
            odd_plates: self.odd_plates.len(),
        }
    }
}
