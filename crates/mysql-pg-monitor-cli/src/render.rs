//! Plain-text rendering of monitor snapshots.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mysql_pg_monitor::{rank, EntitySnapshot, Eta, MonitorSnapshot, PollerKind, ERROR_COUNT};

/// Refresh timestamps older than this were never set by a refresh.
const NEVER_REFRESHED_AFTER_DAYS: i64 = 300;

/// Render one full frame: header, statistics and the ranked table.
pub fn render(snapshot: &MonitorSnapshot, max_rows: usize, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let summary = &snapshot.summary;
    let uptime = (now - snapshot.started_at).to_std().unwrap_or_default();

    let _ = writeln!(
        out,
        "mysql-pg-monitor | {} | uptime {} | target ticks {} | source ticks {} | sweeps running {}",
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        format_duration(uptime),
        snapshot.target_ticks,
        snapshot.source_ticks,
        snapshot.active_sweeps
    );
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Tables: {} total, {} consistent, {} inconsistent, {} errors, {} changed",
        summary.entity_count,
        summary.consistent_count,
        summary.inconsistent_count,
        summary.error_count,
        summary.changed_count
    );
    let _ = writeln!(
        out,
        "Rows:   source {}, target {}, drift {}, change {}",
        format_count(summary.total_source),
        format_count(summary.total_target),
        format_signed(summary.drift),
        format_signed(summary.total_change)
    );
    let _ = writeln!(
        out,
        "Speed:  {:.1} rows/s, ETA {}",
        summary.throughput,
        format_eta(&summary.eta)
    );
    let _ = writeln!(
        out,
        "Now refreshing: {} source, {} target",
        summary.refreshing(PollerKind::Source),
        summary.refreshing(PollerKind::Target)
    );

    if summary.shards.len() > 1 {
        let _ = writeln!(out);
        for shard in &summary.shards {
            let _ = writeln!(
                out,
                "  {:<24} {:>4} tables  source {:>14}  target {:>14}  drift {:>10}  errors {}",
                shard.shard,
                shard.entities,
                format_count(shard.total_source),
                format_count(shard.total_target),
                format_signed(shard.drift),
                shard.errors
            );
        }
    }

    for diagnostic in &snapshot.diagnostics {
        let _ = writeln!(out, "  ! shard {} skipped: {}", diagnostic.shard, diagnostic.error);
    }

    let _ = writeln!(out);
    out.push_str(&render_table(&snapshot.entities, max_rows, now));
    out
}

/// The ranked per-entity table, limited to `max_rows` rows.
pub fn render_table(entities: &[EntitySnapshot], max_rows: usize, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<48} {:>15} {:>15} {:>10} {:>9}  {:<6} {:>12} {:>12}",
        "TABLE", "SOURCE", "TARGET", "DRIFT", "CHANGE", "STATUS", "SRC UPDATED", "TGT UPDATED"
    );

    let ranked = rank(entities);
    for e in ranked.iter().take(max_rows) {
        let status = if e.has_error() {
            "ERROR"
        } else if e.is_consistent() {
            "OK"
        } else {
            "DIFF"
        };
        let source_updated = if e.source_refresh_in_progress {
            "refreshing".to_string()
        } else {
            format_age(e.source_refreshed_at, now)
        };

        let _ = writeln!(
            out,
            "{:<48} {:>15} {:>15} {:>10} {:>9}  {:<6} {:>12} {:>12}",
            truncate(&e.full_name(), 48),
            format_entity_count(e.source_count, e.source_count_is_estimate),
            format_entity_count(e.target_count, e.target_count_is_estimate),
            if e.has_error() {
                "-".to_string()
            } else {
                format_signed(e.drift())
            },
            format_signed(e.change()),
            status,
            source_updated,
            format_age(e.target_refreshed_at, now)
        );
    }

    if ranked.len() > max_rows {
        let _ = writeln!(out, "... and {} more", ranked.len() - max_rows);
    }
    out
}

/// `1234567` -> `1,234,567`.
pub fn format_count(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn format_signed(n: i64) -> String {
    if n > 0 {
        format!("+{}", format_count(n))
    } else {
        format_count(n)
    }
}

fn format_entity_count(count: i64, is_estimate: bool) -> String {
    if count == ERROR_COUNT {
        "ERROR".to_string()
    } else if is_estimate {
        format!("~{}", format_count(count))
    } else {
        format_count(count)
    }
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - at;
    if age.num_days() > NEVER_REFRESHED_AFTER_DAYS {
        return "never".to_string();
    }
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}

fn format_eta(eta: &Eta) -> String {
    match eta {
        Eta::Complete => "complete".to_string(),
        Eta::Unknown => "unknown".to_string(),
        Eta::Remaining(d) => format_duration(*d),
    }
}

/// `3723s` -> `1h 02m 03s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
