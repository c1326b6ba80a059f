//! Summaries over resolved identities.
//!
//! Helpers behind the terminal report: percentages, phone numbers shared
//! between identities, and the identities with the most violator sessions.
use std::collections::BTreeMap;

use crate::identity::Identity;

pub fn pct(n: usize, d: usize) -> String {
    if d == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", (n as f64) / (d as f64) * 100.0)
}

/// Phone numbers listed on more than one identity, with how many share
/// each, sorted by number.
pub fn duplicate_phones(identities: &[Identity]) -> Vec<(String, usize)> {
    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    for phone in identities.iter().filter_map(|i| i.phone.as_deref()) {
        *freq.entry(phone).or_insert(0) += 1;
    }
    freq.into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(p, n)| (p.to_string(), n))
        .collect()
}

/// Identities with at least one violator session, as (display key, violator
/// count, session count). Sorted descending by violators, then ascending by
/// key; at most `top_n` entries.
pub fn top_violators(identities: &[Identity], top_n: usize) -> Vec<(String, usize, usize)> {
    use std::cmp::Reverse;
    let mut items: Vec<(String, usize, usize)> = identities
        .iter()
        .map(|i| (i.display_key(), i.violator_count(), i.sessions.len()))
        .filter(|(_, v, _)| *v > 0)
        .collect();
    items.sort_by(|a, b| (Reverse(a.1), &a.0).cmp(&(Reverse(b.1), &b.0)));
    items.truncate(top_n);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Session, Violation};

    fn with_flags(email: &str, flags: &[Violation]) -> Identity {
        let mut i = Identity::with_email(email, None, None, None, "ABC123");
        i.sessions = flags
            .iter()
            .enumerate()
            .map(|(seq, v)| Session {
                seq,
                plate: "ABC123".into(),
                entry_tick: 0,
                exit_tick: 0,
                duration_minutes: 0.0,
                start_date: String::new(),
                start_time: String::new(),
                end_date: String::new(),
                end_time: String::new(),
                violation: *v,
            })
            .collect();
        i
    }

    #[test]
    fn percentages() {
        assert_eq!(pct(1, 3), "33.33%");
        assert_eq!(pct(0, 0), "0.00%");
    }

    #[test]
    fn shared_phones_are_listed() {
        let mut a = Identity::with_email("a@x.com", None, None, Some("6125550100".into()), "AAA111");
        let b = Identity::with_email("b@x.com", None, None, Some("6125550100".into()), "BBB222");
        let c = Identity::with_email("c@x.com", None, None, Some("6125550199".into()), "CCC333");
        let d = Identity::with_plate("DDD444");
        assert_eq!(
            duplicate_phones(&[a.clone(), b.clone(), c.clone(), d.clone()]),
            vec![("6125550100".to_string(), 2)]
        );
        a.phone = None;
        assert!(duplicate_phones(&[a, b, c, d]).is_empty());
    }

    #[test]
    fn top_violators_sorted_and_limited() {
        use Violation::*;
        let ids = vec![
            with_flags("b@x.com", &[Clean, Violator]),
            with_flags("a@x.com", &[Clean, Violator]),
            with_flags("c@x.com", &[Clean, Violator, Violator]),
            with_flags("d@x.com", &[Clean]),
        ];
        let top = top_violators(&ids, 2);
        assert_eq!(
            top,
            vec![("c@x.com".to_string(), 2, 3), ("a@x.com".to_string(), 1, 2)]
        );
        assert_eq!(top_violators(&ids, 10).len(), 3);
    }
}
