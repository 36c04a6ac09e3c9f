use ccsession::{ChainStatus, IntegrityReport};
use std::fmt::Write;

/// One line per session, as printed by `scan`.
pub fn summary_line(report: &IntegrityReport) -> String {
    let mut line = format!("{:<10} {}", report.status.as_str(), report.session_id);
    match report.status {
        ChainStatus::Healthy if !report.orphans.is_empty() => {
            let _ = write!(line, "  ({} orphans off the active chain)", report.orphans.len());
        }
        ChainStatus::Fixable | ChainStatus::Unfixable => {
            let _ = write!(line, "  {} orphans: {}", report.orphans.len(), report.cause_summary());
        }
        ChainStatus::Error => {
            if let Some(e) = &report.failure {
                let _ = write!(line, "  {}", e);
            }
        }
        _ => {}
    }
    line
}

/// Full diagnosis, as printed by `check`.
pub fn detail(report: &IntegrityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session: {}", report.session_id);
    let _ = writeln!(out, "File:    {}", report.path.display());
    let _ = writeln!(out, "Status:  {}", report.status);

    if let Some(e) = &report.failure {
        let _ = writeln!(out, "Error:   {}", e);
        return out;
    }

    let _ = writeln!(
        out,
        "Records: {} ({} with uuid)",
        report.total_records, report.total_uuids
    );
    if let Some(tail) = report.tail_line {
        let _ = writeln!(out, "Tail:    line {}", tail);
    }
    match &report.chain_break {
        Some(parent) => {
            let _ = writeln!(
                out,
                "Chain:   broken after {} steps at missing parent {}",
                report.chain_steps, parent
            );
        }
        None => {
            let _ = writeln!(out, "Chain:   {} steps to root", report.chain_steps);
        }
    }
    if let Some(steps) = report.patched_steps {
        let _ = writeln!(out, "Fixed:   {} steps to root after rewiring", steps);
    }

    if !report.duplicate_uuids.is_empty() {
        let _ = writeln!(out, "\nDuplicate uuids:");
        for (uuid, count) in &report.duplicate_uuids {
            let _ = writeln!(out, "  {} x{}", uuid, count);
        }
    }

    if !report.orphans.is_empty() {
        let _ = writeln!(
            out,
            "\nOrphans ({}): {}",
            report.orphans.len(),
            report.cause_summary()
        );
        for orphan in &report.orphans {
            let target = match &orphan.rewire {
                Some(t) => format!("-> line {} ({})", t.line, t.label),
                None => "no rewire candidate".to_string(),
            };
            let chain = if orphan.on_active_chain {
                ""
            } else {
                "  [off active chain]"
            };
            let _ = writeln!(
                out,
                "  line {:<6} {:<22} parent {} {}{}",
                orphan.line, orphan.label, orphan.old_parent, target, chain
            );
            if let Some(agent) = &orphan.source_agent {
                let _ = writeln!(out, "               parent found in {}", agent);
            }
        }
    }

    if !report.stale_segments.is_empty() {
        let _ = writeln!(out, "\nStale compaction segments:");
        for segment in &report.stale_segments {
            let _ = writeln!(
                out,
                "  lines {}-{} (boundary {})",
                segment.root_line, segment.deepest_line, segment.root_uuid
            );
        }
    }
    out
}

pub fn undo_hint(session_id: &str) -> String {
    format!("To undo: ccsession restore {}", session_id)
}
