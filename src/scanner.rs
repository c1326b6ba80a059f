//! Overlap scan over each identity's sessions.
//!
//! Sessions are sorted by exit tick (input order breaks ties) and then
//! scanned once. The anchor is the latest session kept clean; a session that
//! enters before the anchor exits means two vehicles were parked at once on
//! one subscription and is flagged as a violator. Otherwise it becomes the
//! new anchor. Ordering by finish time makes the clean sessions a maximum
//! set of mutually non-overlapping sessions.
use rayon::prelude::*;

use crate::identity::{Identity, Session, Violation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub clean: usize,
    pub violators: usize,
    pub identities_with_violations: usize,
}

/// Sort `sessions` into exit order and flag each one.
pub fn scan_sessions(sessions: &mut [Session]) {
    if sessions.is_empty() {
        return;
    }
    // must be applied before the scan below
    sessions.sort_by_key(|s| (s.exit_tick, s.seq));

    let mut anchor = 0;
    sessions[0].violation = Violation::Clean;
    for j in 1..sessions.len() {
        if sessions[j].entry_tick < sessions[anchor].exit_tick {
            sessions[j].violation = Violation::Violator;
        } else {
            sessions[j].violation = Violation::Clean;
            anchor = j;
        }
    }
}

/// Scan every identity. Identities share no state, so `parallel` fans out
/// across them with rayon.
pub fn scan_all(identities: &mut [Identity], parallel: bool) -> ScanStats {
    if parallel {
        identities
            .par_iter_mut()
            .for_each(|identity| scan_sessions(&mut identity.sessions));
    } else {
        for identity in identities.iter_mut() {
            scan_sessions(&mut identity.sessions);
        }
    }

    let mut stats = ScanStats::default();
    for identity in identities.iter() {
        let violators = identity.violator_count();
        stats.violators += violators;
        stats.clean += identity.sessions.len() - violators;
        if violators > 0 {
            stats.identities_with_violations += 1;
        }
    }
    log::info!(
        "scan complete: {} clean, {} violators across {} identities",
        stats.clean,
        stats.violators,
        stats.identities_with_violations
    );
    stats
}
