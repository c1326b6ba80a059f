//! Row schemas for the two operator exports and the filters applied before
//! rows reach the engine.
//!
//! Headers are matched by name; extra columns are ignored. Blank optional
//! cells come through as `None`.
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::identity::LicenseTier;
use crate::io::sniff_delimiter;

pub const PRIMARY_VEHICLE_PROGRAM: &str = "Kellogg Square Residents - 1 st Vehicle";
pub const ADDITIONAL_VEHICLE_PROGRAM: &str = "Kellogg Square Residents -Additional Vehicle";
pub const DEFAULT_SITES: [&str; 2] = [
    "Kellogg Square Reserved Nest (Minneapolis",
    "Kellogg Square Garage (Minneapolis",
];
pub const TRANSIENT_STATUS: &str = "Transient";

const SUBSCRIPTION_COLUMNS: [&str; 2] = ["Enterprise Name", "Vehicle License Plate Text"];
const TRANSACTION_COLUMNS: [&str; 6] = [
    "Vehicle License Plate",
    "Visit Start Date (local)",
    "Visit Start Time (local)",
    "Visit End Date (local)",
    "Visit End Time (local)",
    "Visit Duration (minutes)",
];

#[derive(Debug, thiserror::Error)]
pub enum RowsError {
    #[error("missing column {0:?}")]
    MissingColumn(&'static str),
    #[error("row {row}: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// One row of the enterprise subscription export.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscriptionRow {
    #[serde(rename = "Enterprise Name")]
    pub enterprise_program_name: String,
    #[serde(rename = "Vehicle License Plate Text")]
    pub license_plate: String,
    #[serde(rename = "User Email", default)]
    pub email: Option<String>,
    #[serde(rename = "User First Name", default)]
    pub first_name: Option<String>,
    #[serde(rename = "User Last Name", default)]
    pub last_name: Option<String>,
    #[serde(rename = "User Phone Number", default)]
    pub phone: Option<String>,
    #[serde(rename = "Current Status (description)", default)]
    pub status: Option<String>,
}

impl SubscriptionRow {
    /// Anything but the primary vehicle program counts as an additional
    /// vehicle.
    pub fn license_tier(&self) -> LicenseTier {
        if self.enterprise_program_name.trim() == PRIMARY_VEHICLE_PROGRAM {
            LicenseTier::Primary
        } else {
            LicenseTier::Additional
        }
    }
}

/// One row of the anonymized transaction log.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionRow {
    #[serde(rename = "Vehicle License Plate")]
    pub license_plate: String,
    #[serde(rename = "Visit Start Date (local)")]
    pub visit_start_date: String,
    #[serde(rename = "Visit Start Time (local)")]
    pub visit_start_time: String,
    #[serde(rename = "Visit End Date (local)")]
    pub visit_end_date: String,
    #[serde(rename = "Visit End Time (local)")]
    pub visit_end_time: String,
    /// Kept as text; the grouper parses it so a bad value is reported
    /// against its transaction.
    #[serde(rename = "Visit Duration (minutes)")]
    pub duration_minutes: String,
    #[serde(rename = "User Id", default)]
    pub external_user_id: Option<String>,
    #[serde(rename = "Subscription Status", default)]
    pub subscription_status: Option<String>,
    #[serde(rename = "Site Internal Name", default)]
    pub site: Option<String>,
    /// 1-based data row in the source file, counted before filtering.
    #[serde(skip)]
    pub record: usize,
}

/// Trimmed value, or `None` when blank.
pub fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reduce a phone cell to its digits. Spreadsheet exports sometimes render
/// the number as a float (`6125550100.0`); the fractional part is dropped.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_suffix(".0").unwrap_or(s);
    let digits: String = s.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

/// Which rows of each export are relevant to the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    /// Subscription programs to keep. Empty keeps all.
    pub programs: Vec<String>,
    /// Transaction sites to keep. Empty keeps all.
    pub sites: Vec<String>,
    pub excluded_statuses: Vec<String>,
}

impl Default for RowFilter {
    fn default() -> Self {
        Self {
            programs: vec![
                PRIMARY_VEHICLE_PROGRAM.to_string(),
                ADDITIONAL_VEHICLE_PROGRAM.to_string(),
            ],
            sites: DEFAULT_SITES.iter().map(|s| s.to_string()).collect(),
            excluded_statuses: vec![TRANSIENT_STATUS.to_string()],
        }
    }
}

impl RowFilter {
    /// A filter that keeps every row.
    pub fn keep_all() -> Self {
        Self {
            programs: Vec::new(),
            sites: Vec::new(),
            excluded_statuses: Vec::new(),
        }
    }

    pub fn keeps_subscription(&self, row: &SubscriptionRow) -> bool {
        let program = row.enterprise_program_name.trim();
        self.programs.is_empty() || self.programs.iter().any(|p| p.trim() == program)
    }

    pub fn keeps_transaction(&self, row: &TransactionRow) -> bool {
        let status = row.subscription_status.as_deref().unwrap_or("").trim();
        if self.excluded_statuses.iter().any(|s| s.trim() == status) {
            return false;
        }
        let site = row.site.as_deref().unwrap_or("").trim();
        self.sites.is_empty() || self.sites.iter().any(|s| s.trim() == site)
    }
}

/// Rows kept after filtering, with how many were read.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub rows: Vec<T>,
    pub read: usize,
}

impl<T> Loaded<T> {
    pub fn dropped(&self) -> usize {
        self.read - self.rows.len()
    }
}

fn read_rows<T: DeserializeOwned>(text: &str, required: &[&'static str]) -> Result<Vec<T>, RowsError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());
    let headers = rdr
        .headers()
        .map_err(|source| RowsError::Csv { row: 0, source })?
        .clone();
    for &col in required {
        if !headers.iter().any(|h| h == col) {
            return Err(RowsError::MissingColumn(col));
        }
    }
    let mut out = Vec::new();
    for (i, rec) in rdr.deserialize::<T>().enumerate() {
        out.push(rec.map_err(|source| RowsError::Csv { row: i + 1, source })?);
    }
    Ok(out)
}

pub fn parse_subscriptions(
    text: &str,
    filter: &RowFilter,
) -> Result<Loaded<SubscriptionRow>, RowsError> {
    let all: Vec<SubscriptionRow> = read_rows(text, &SUBSCRIPTION_COLUMNS)?;
    let read = all.len();
    let rows = all
        .into_iter()
        .filter(|r| filter.keeps_subscription(r))
        .collect();
    Ok(Loaded { rows, read })
}

pub fn parse_transactions(
    text: &str,
    filter: &RowFilter,
) -> Result<Loaded<TransactionRow>, RowsError> {
    let mut all: Vec<TransactionRow> = read_rows(text, &TRANSACTION_COLUMNS)?;
    for (i, row) in all.iter_mut().enumerate() {
        row.record = i + 1;
    }
    let read = all.len();
    let rows = all
        .into_iter()
        .filter(|r| filter.keeps_transaction(r))
        .collect();
    Ok(Loaded { rows, read })
}
