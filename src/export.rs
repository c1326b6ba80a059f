//! Export helpers for writing results to CSV files.
//!
//! - `save_roster_csv` writes one row per resolved identity.
//! - `save_sessions_csv` writes one row per grouped session with its
//!   violation flag and the user's running total of flagged minutes.
//!   Consecutive rows of the same user show the user only on the first row.
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use csv::Writer;
use serde::Serialize;

use crate::engine::Engine;
use crate::identity::Violation;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterRecord {
    #[serde(rename = "First")]
    pub first_name: Option<String>,
    #[serde(rename = "Last")]
    pub last_name: Option<String>,
    #[serde(rename = "Email")]
    pub email: Option<String>,
    #[serde(rename = "ID")]
    pub external_id: Option<String>,
    #[serde(rename = "Phone Number")]
    pub phone: Option<String>,
    #[serde(rename = "License")]
    pub plates: String,
    #[serde(rename = "License Type")]
    pub license_types: String,
    #[serde(rename = "License Status")]
    pub license_statuses: String,
    #[serde(rename = "Mismatch")]
    pub mismatch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Visit Start Date")]
    pub start_date: String,
    #[serde(rename = "Visit Start Time")]
    pub start_time: String,
    #[serde(rename = "Visit End Date")]
    pub end_date: String,
    #[serde(rename = "Visit End Time")]
    pub end_time: String,
    #[serde(rename = "Visit Duration (minutes)")]
    pub duration_minutes: String,
    #[serde(rename = "License Plate")]
    pub plate: String,
    #[serde(rename = "Flag")]
    pub flag: &'static str,
    #[serde(rename = "Flagged Total (minutes)")]
    pub flagged_total: String,
}

/// Whole minutes print without a fractional part.
fn format_minutes(minutes: f64) -> String {
    if minutes.fract() == 0.0 {
        format!("{:.0}", minutes)
    } else {
        minutes.to_string()
    }
}

pub fn roster_records(registry: &Registry) -> Vec<RosterRecord> {
    registry
        .roster()
        .map(|i| RosterRecord {
            first_name: i.first_name.clone(),
            last_name: i.last_name.clone(),
            email: i.email.clone(),
            external_id: i.external_id.clone(),
            phone: i.phone.clone(),
            plates: i.plate_list(),
            license_types: i.license_types(),
            license_statuses: i.license_statuses(),
            mismatch: i.mismatch,
        })
        .collect()
}

/// Sessions in roster order, each identity's sessions in scan order.
pub fn session_records(registry: &Registry) -> Vec<SessionRecord> {
    let mut out = Vec::new();
    for identity in registry.roster() {
        let user = identity.display_key();
        let mut flagged = 0.0;
        for s in &identity.sessions {
            if s.violation == Violation::Violator {
                flagged += s.duration_minutes;
            }
            out.push(SessionRecord {
                user: user.clone(),
                start_date: s.start_date.clone(),
                start_time: s.start_time.clone(),
                end_date: s.end_date.clone(),
                end_time: s.end_time.clone(),
                duration_minutes: format_minutes(s.duration_minutes),
                plate: s.plate.clone(),
                flag: s.violation.as_str(),
                flagged_total: format_minutes(flagged),
            });
        }
    }
    out
}

pub fn write_roster<W: Write>(registry: &Registry, out: W) -> Result<()> {
    let mut wtr = Writer::from_writer(out);
    for record in roster_records(registry) {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_sessions<W: Write>(registry: &Registry, out: W) -> Result<()> {
    let mut wtr = Writer::from_writer(out);
    let mut previous: Option<String> = None;
    for mut record in session_records(registry) {
        if previous.as_deref() == Some(record.user.as_str()) {
            record.user.clear();
        } else {
            previous = Some(record.user.clone());
        }
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_roster_csv<P: AsRef<Path>>(engine: &Engine, path: P) -> Result<()> {
    write_roster(&engine.registry, std::fs::File::create(path)?)
}

pub fn save_sessions_csv<P: AsRef<Path>>(engine: &Engine, path: P) -> Result<()> {
    write_sessions(&engine.registry, std::fs::File::create(path)?)
}
