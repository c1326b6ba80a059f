//! Routes transaction rows to identities and turns them into sessions.
use log::{debug, warn};

use crate::engine::{EngineError, EngineOptions};
use crate::identity::{Session, Violation};
use crate::registry::Registry;
use crate::rows::{TransactionRow, present};
use crate::ticks::{Tick, TickMode, encode_tick};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Sessions appended to some identity.
    pub grouped: usize,
    /// Rows whose plate no identity claims.
    pub unresolved: usize,
    /// Plate-keyed identities that learned their external id.
    pub newly_identified: usize,
    /// Rows skipped for bad date, time or duration fields.
    pub malformed: usize,
}

fn parse_duration(record: usize, raw: &str) -> Result<f64, EngineError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EngineError::BadNumber {
            row: record,
            field: "Visit Duration (minutes)",
            value: raw.to_string(),
        })
}

fn tick(record: usize, field: &'static str, date: &str, time: &str, mode: TickMode) -> Result<Tick, EngineError> {
    encode_tick(date, time, mode).map_err(|source| EngineError::Parse {
        row: record,
        field,
        source,
    })
}

/// Build a session from a transaction row. `record` is the row's 1-based
/// number in the transaction file and becomes the session's `seq`.
pub fn build_session(
    record: usize,
    plate: &str,
    row: &TransactionRow,
    mode: TickMode,
) -> Result<Session, EngineError> {
    let entry_tick = tick(record, "Visit Start", &row.visit_start_date, &row.visit_start_time, mode)?;
    let exit_tick = tick(record, "Visit End", &row.visit_end_date, &row.visit_end_time, mode)?;
    let duration_minutes = parse_duration(record, &row.duration_minutes)?;
    Ok(Session {
        seq: record,
        plate: plate.to_string(),
        entry_tick,
        exit_tick,
        duration_minutes,
        start_date: row.visit_start_date.trim().to_string(),
        start_time: row.visit_start_time.trim().to_string(),
        end_date: row.visit_end_date.trim().to_string(),
        end_time: row.visit_end_time.trim().to_string(),
        violation: Violation::Unset,
    })
}

/// Append every resolvable transaction to its identity's session list.
///
/// Rows for plates no identity claims are counted and dropped. The first row
/// routed to an identity without an external id backfills it; for
/// plate-keyed identities this only happens when
/// [`EngineOptions::identify_unknown`] is set, and is counted as a newly
/// identified subscriber.
///
/// A malformed date, time or duration aborts with an error unless
/// [`EngineOptions::skip_malformed`] is set, in which case the row is
/// counted and skipped.
pub fn group_transactions(
    registry: &mut Registry,
    rows: &[TransactionRow],
    options: &EngineOptions,
) -> Result<GroupStats, EngineError> {
    let mut stats = GroupStats::default();
    for (i, row) in rows.iter().enumerate() {
        // rows built in code carry no source number
        let record = if row.record > 0 { row.record } else { i + 1 };
        let plate = row.license_plate.trim();
        let Some(id) = registry.route(plate) else {
            debug!("transaction #{} for unknown plate {:?} dropped", record, plate);
            stats.unresolved += 1;
            continue;
        };
        let identity = registry.get_mut(id).ok_or_else(|| {
            EngineError::InvariantViolation(format!("plate {} routed to a missing identity", plate))
        })?;

        if identity.external_id.is_none() {
            if let Some(external_id) = present(row.external_user_id.as_deref()) {
                if !identity.is_plate_keyed() {
                    identity.external_id = Some(external_id);
                } else if options.identify_unknown {
                    debug!("plate {} identified as user {}", plate, external_id);
                    identity.external_id = Some(external_id);
                    stats.newly_identified += 1;
                }
            }
        }

        let session = match build_session(record, plate, row, options.tick_mode) {
            Ok(session) => session,
            Err(err) if options.skip_malformed => {
                warn!("skipping malformed transaction: {}", err);
                stats.malformed += 1;
                continue;
            }
            Err(err) => return Err(err),
        };
        identity.sessions.push(session);
        stats.grouped += 1;
    }
    log::info!(
        "grouped {} sessions, {} unresolved, {} newly identified, {} malformed",
        stats.grouped,
        stats.unresolved,
        stats.newly_identified,
        stats.malformed
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::SubscriptionRow;

    fn sub(plate: &str, email: Option<&str>) -> SubscriptionRow {
        SubscriptionRow {
            license_plate: plate.to_string(),
            email: email.map(str::to_string),
            ..SubscriptionRow::default()
        }
    }

    fn txn(plate: &str, user: &str, start: &str, end: &str) -> TransactionRow {
        TransactionRow {
            license_plate: plate.to_string(),
            visit_start_date: "6/1/2025".to_string(),
            visit_start_time: start.to_string(),
            visit_end_date: "6/1/2025".to_string(),
            visit_end_time: end.to_string(),
            duration_minutes: "60".to_string(),
            external_user_id: Some(user.to_string()),
            ..TransactionRow::default()
        }
    }

    fn registry(rows: &[SubscriptionRow]) -> Registry {
        let mut r = Registry::new();
        for row in rows {
            r.register_row(row);
        }
        r.detect_mismatches();
        r
    }

    #[test]
    fn unknown_plates_are_counted_and_dropped() {
        let mut r = registry(&[sub("ABC123", Some("ann@x.com"))]);
        let rows = vec![
            txn("ABC123", "u-1", "8:00 AM", "9:00 AM"),
            txn("NOPE00", "u-2", "8:00 AM", "9:00 AM"),
            txn("", "u-3", "8:00 AM", "9:00 AM"),
        ];
        let stats = group_transactions(&mut r, &rows, &EngineOptions::default()).unwrap();
        assert_eq!(stats.grouped, 1);
        assert_eq!(stats.unresolved, 2);
        let total: usize = r.identities().iter().map(|i| i.sessions.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn backfills_external_id_once() {
        let mut r = registry(&[sub("ABC123", Some("ann@x.com")), sub("QQQ111", None)]);
        let rows = vec![
            txn("QQQ111", "u-7", "8:00 AM", "9:00 AM"),
            txn("QQQ111", "u-8", "10:00 AM", "11:00 AM"),
            txn("ABC123", "u-1", "8:00 AM", "9:00 AM"),
        ];
        let stats = group_transactions(&mut r, &rows, &EngineOptions::default()).unwrap();
        assert_eq!(stats.newly_identified, 1);
        assert_eq!(r.find_by_plate("QQQ111").unwrap().external_id.as_deref(), Some("u-7"));
        // enrichment of an email identity is not counted
        assert_eq!(r.find_by_email("ann@x.com").unwrap().external_id.as_deref(), Some("u-1"));
        assert_eq!(r.find_by_external_id("u-7").unwrap().sessions.len(), 2);
    }

    #[test]
    fn id_search_can_be_disabled() {
        let mut r = registry(&[sub("QQQ111", None)]);
        let opts = EngineOptions {
            identify_unknown: false,
            ..EngineOptions::default()
        };
        let rows = vec![txn("QQQ111", "u-7", "8:00 AM", "9:00 AM")];
        let stats = group_transactions(&mut r, &rows, &opts).unwrap();
        assert_eq!(stats.newly_identified, 0);
        assert_eq!(stats.grouped, 1);
        assert!(r.find_by_plate("QQQ111").unwrap().external_id.is_none());
    }

    #[test]
    fn multi_claimed_plate_goes_to_smallest_email() {
        let mut r = registry(&[sub("ABC123", Some("zed@x.com")), sub("ABC123", Some("amy@x.com"))]);
        let rows = vec![txn("ABC123", "u-1", "8:00 AM", "9:00 AM")];
        group_transactions(&mut r, &rows, &EngineOptions::default()).unwrap();
        assert_eq!(r.find_by_email("amy@x.com").unwrap().sessions.len(), 1);
        assert!(r.find_by_email("zed@x.com").unwrap().sessions.is_empty());
    }

    #[test]
    fn malformed_time_aborts_by_default() {
        let mut r = registry(&[sub("ABC123", Some("ann@x.com"))]);
        let rows = vec![
            txn("ABC123", "u-1", "8:00 AM", "9:00 AM"),
            txn("ABC123", "u-1", "25:00", "9:00 AM"),
        ];
        let err = group_transactions(&mut r, &rows, &EngineOptions::default()).unwrap_err();
        match err {
            EngineError::Parse { row, field, .. } => {
                assert_eq!(row, 2);
                assert_eq!(field, "Visit Start");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn errors_name_the_source_row() {
        let mut r = registry(&[sub("ABC123", Some("ann@x.com"))]);
        let mut good = txn("ABC123", "u-1", "8:00 AM", "9:00 AM");
        good.record = 2;
        let mut bad = txn("ABC123", "u-1", "8:00 AM", "9:00 AM");
        bad.duration_minutes = "n/a".to_string();
        bad.record = 5;
        let err = group_transactions(&mut r, &[good, bad], &EngineOptions::default()).unwrap_err();
        match err {
            EngineError::BadNumber { row, value, .. } => {
                assert_eq!(row, 5);
                assert_eq!(value, "n/a");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(r.find_by_email("ann@x.com").unwrap().sessions[0].seq, 2);
    }

    #[test]
    fn malformed_rows_can_be_skipped() {
        let mut r = registry(&[sub("ABC123", Some("ann@x.com"))]);
        let mut bad_duration = txn("ABC123", "u-1", "8:00 AM", "9:00 AM");
        bad_duration.duration_minutes = "sixty".to_string();
        let rows = vec![
            txn("ABC123", "u-1", "8:00 AM", "9:00 AM"),
            bad_duration,
            txn("ABC123", "u-1", "8:00 AM", "9:00 PX"),
        ];
        let opts = EngineOptions {
            skip_malformed: true,
            ..EngineOptions::default()
        };
        let stats = group_transactions(&mut r, &rows, &opts).unwrap();
        assert_eq!(stats.grouped, 1);
        assert_eq!(stats.malformed, 2);
    }

    #[test]
    fn session_carries_ticks_and_raw_fields() {
        let row = txn(" ABC123 ", "u-1", "8:00 AM", "9:30 AM");
        let s = build_session(4, "ABC123", &row, TickMode::Approximate).unwrap();
        assert_eq!(s.seq, 4);
        assert_eq!(s.exit_tick - s.entry_tick, 90);
        assert_eq!(s.duration_minutes, 60.0);
        assert_eq!(s.end_time, "9:30 AM");
        assert_eq!(s.violation, Violation::Unset);
    }
}
