//! Human-readable report rendering for terminal output.
//!
//! Produces a colored summary of input counts, the subscription registry,
//! plate mismatches, transaction grouping and the overlap scan.
use colored::*;

use crate::{
    engine::Engine,
    stats::{duplicate_phones, pct, top_violators},
};

fn visible_len(s: &str) -> usize {
    // Strip ANSI escape sequences (\x1b[ ... m) to compute printable width
    let mut len = 0;
    let mut iter = s.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\u{1b}' {
            if let Some('[') = iter.peek().cloned() {
                let _ = iter.next();
            }
            for c in iter.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            len += 1;
        }
    }
    len
}

fn section_header(title: &str) -> String {
    let len = visible_len(title);
    let mut s = String::new();
    s.push('\n');
    s.push_str(title);
    s.push('\n');
    s.push_str(&"─".repeat(len));
    s.push_str("\n\n");
    s
}

fn push_section(out: &mut String, title: ColoredString, lines: Vec<String>) {
    out.push_str(&section_header(&title.to_string()));
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
}

pub fn render_summary(engine: &Engine) -> String {
    render_summary_with_top(engine, 10)
}

pub fn render_summary_with_top(engine: &Engine, top_n: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n",
        "ParkAudit: Subscription Overlap Analysis Results"
            .bold()
            .cyan()
    ));

    // Inputs
    let input = &engine.input;
    push_section(
        &mut out,
        "Input".bold().yellow(),
        vec![
            format!(
                "Subscription rows: {} (kept {})",
                input.subscriptions_read, input.subscriptions_kept
            ),
            format!(
                "Transaction rows: {} (kept {})",
                input.transactions_read, input.transactions_kept
            ),
        ],
    );

    // Registry
    let reg = engine.registry.stats();
    let mut reg_lines = vec![
        format!(
            "Identities: {}",
            reg.email_identities + reg.plate_identities
        ),
        format!("  Email users: {}", reg.email_identities),
        format!("  Users without email: {}", reg.plate_identities),
        format!(
            "  Newly identified from transactions: {}",
            engine.grouping.newly_identified
        ),
    ];
    if reg.skipped_rows > 0 {
        reg_lines.push(format!(
            "  Rows without a plate: {}",
            reg.skipped_rows.to_string().yellow()
        ));
    }
    if reg.odd_plates > 0 {
        reg_lines.push(format!(
            "  Plates of unexpected length: {}",
            reg.odd_plates.to_string().yellow()
        ));
    }
    push_section(&mut out, "Subscription Registry".bold().cyan(), reg_lines);

    // Mismatches
    let mut mismatch_lines: Vec<String> = Vec::new();
    for (plate, emails) in engine.registry.multi_claimed_plates() {
        mismatch_lines.push(format!("{} ({} claimants)", plate.red(), emails.len()));
        for email in emails {
            mismatch_lines.push(format!("  {}", email));
        }
    }
    let anonymous: Vec<&str> = engine
        .registry
        .identities()
        .iter()
        .filter(|i| i.is_plate_keyed() && i.mismatch)
        .flat_map(|i| i.plates.iter().map(String::as_str))
        .collect();
    for plate in anonymous {
        mismatch_lines.push(format!(
            "{} {}",
            plate.red(),
            "(also claimed by a user without email)".dimmed()
        ));
    }
    if mismatch_lines.is_empty() {
        mismatch_lines.push("(No plate mismatches)".to_string());
    } else {
        mismatch_lines.insert(
            0,
            format!("Mismatched identities: {}", reg.mismatched_identities),
        );
    }
    push_section(&mut out, "Plate Mismatches".bold().cyan(), mismatch_lines);

    // Grouping
    let g = &engine.grouping;
    let mut group_lines = vec![
        format!("Grouped sessions: {}", g.grouped),
        format!("Unresolved transactions: {}", g.unresolved),
    ];
    if g.malformed > 0 {
        group_lines.push(format!(
            "Skipped malformed transactions: {}",
            g.malformed.to_string().yellow()
        ));
    }
    push_section(&mut out, "Transactions".bold().cyan(), group_lines);

    // Scan
    let s = &engine.scan;
    let flagged: f64 = engine
        .registry
        .identities()
        .iter()
        .map(|i| i.flagged_minutes())
        .sum();
    let violators = if s.violators > 0 {
        s.violators.to_string().red().to_string()
    } else {
        s.violators.to_string()
    };
    push_section(
        &mut out,
        "Violation Scan".bold().cyan(),
        vec![
            format!("Clean sessions: {}", s.clean),
            format!("Violator sessions: {}", violators),
            format!(
                "Violator percentage: {}",
                pct(s.violators, s.clean + s.violators)
            ),
            format!(
                "Identities with violations: {}",
                s.identities_with_violations
            ),
            format!("Flagged minutes: {}", flagged),
        ],
    );

    // Top violators
    let mut top_lines: Vec<String> = Vec::new();
    let top = top_violators(engine.registry.identities(), top_n);
    if top.is_empty() {
        top_lines.push("(No violations)".to_string());
    } else {
        for (user, violators, sessions) in top {
            top_lines.push(format!("  {}: {}/{} sessions", user, violators, sessions));
        }
    }
    push_section(&mut out, "Top Violators".bold().magenta(), top_lines);

    // Shared phone numbers
    let mut phone_lines: Vec<String> = Vec::new();
    let phones = duplicate_phones(engine.registry.identities());
    if phones.is_empty() {
        phone_lines.push("(No shared phone numbers)".to_string());
    } else {
        for (phone, count) in phones {
            phone_lines.push(format!("  {}: {} identities", phone, count));
        }
    }
    push_section(
        &mut out,
        "Shared Phone Numbers".bold().magenta(),
        phone_lines,
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    const SUBS: &str = "Enterprise Name,Vehicle License Plate Text,User Email,User First Name,User Last Name,User Phone Number
Kellogg Square Residents - 1 st Vehicle,ABC123,ann@x.com,Ann,Lee,6125550100
Kellogg Square Residents - 1 st Vehicle,XYZ789,ann@x.com,Ann,Lee,6125550100
Kellogg Square Residents - 1 st Vehicle,DUP001,bob@x.com,Bob,Ray,6125550100
Kellogg Square Residents - 1 st Vehicle,DUP001,cat@x.com,Cat,Day,
Kellogg Square Residents - 1 st Vehicle,ABC123,,,,
";

    const TXNS: &str = "Vehicle License Plate,Visit Start Date (local),Visit Start Time (local),Visit End Date (local),Visit End Time (local),Visit Duration (minutes),User Id,Subscription Status,Site Internal Name
ABC123,6/1/2025,8:00 AM,6/1/2025,1:00 PM,300,u-1,Subscribed,Kellogg Square Garage (Minneapolis
XYZ789,6/1/2025,10:00 AM,6/1/2025,11:00 AM,60,u-1,Subscribed,Kellogg Square Garage (Minneapolis
";

    #[test]
    fn summary_lists_each_section() {
        colored::control::set_override(false);
        let mut e = Engine::new();
        e.load_from_strings(SUBS, TXNS).unwrap();
        let s = render_summary(&e);
        for title in [
            "Input",
            "Subscription Registry",
            "Plate Mismatches",
            "Transactions",
            "Violation Scan",
            "Top Violators",
            "Shared Phone Numbers",
        ] {
            assert!(s.contains(title), "missing section {title}");
        }
        assert!(s.contains("DUP001 (2 claimants)"));
        assert!(s.contains("ABC123 (also claimed by a user without email)"));
        assert!(s.contains("Violator sessions: 1"));
        assert!(s.contains("Flagged minutes: 300"));
        assert!(s.contains("ann@x.com: 1/2 sessions"));
        assert!(s.contains("6125550100: 2 identities"));
    }

    #[test]
    fn empty_engine_renders_placeholders() {
        let s = render_summary(&Engine::new());
        assert!(s.contains("(No plate mismatches)"));
        assert!(s.contains("(No violations)"));
        assert!(s.contains("(No shared phone numbers)"));
    }

    #[test]
    fn section_rule_ignores_color_codes() {
        let header = section_header("\u{1b}[1mTitle\u{1b}[0m");
        assert!(header.contains(&"─".repeat(5)));
        assert!(!header.contains(&"─".repeat(6)));
    }
}
