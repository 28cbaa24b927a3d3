//! Terminal formatting of endpoint results and run summaries.

use crate::engine::{EndpointResult, RunSnapshot};

const HEADER: [&str; 6] = ["Hostname", "Location", "Status", "Ping", "Download", "Upload"];

/// Mbps below 1000, Gbps above.
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.2} Gbps", mbps / 1000.0)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

/// Status with cause and a disconnect note when cleanup failed.
pub fn format_status(result: &EndpointResult) -> String {
    let mut status = result.status_label();
    if result.disconnect_error.is_some() {
        status.push_str(" (disconnect error)");
    }
    status
}

/// One aligned table row.
pub fn format_result_row(result: &EndpointResult) -> String {
    format!(
        "{:<22} | {:<24} | {:<32} | {:>9} | {:>11} | {:>11}",
        result.endpoint.hostname,
        result.endpoint.location(),
        format_status(result),
        or_dash(result.ping_ms.map(|ms| format!("{:.1} ms", ms))),
        or_dash(result.download_mbps.map(format_speed)),
        or_dash(result.upload_mbps.map(format_speed)),
    )
}

/// Header, separator and one row per result, in the order given.
pub fn format_table(results: &[EndpointResult]) -> String {
    let mut out = format!(
        "{:<22} | {:<24} | {:<32} | {:>9} | {:>11} | {:>11}\n",
        HEADER[0], HEADER[1], HEADER[2], HEADER[3], HEADER[4], HEADER[5]
    );
    out.push_str(&format!(
        "{:-<22}-|-{:-<24}-|-{:-<32}-|-{:->9}-|-{:->11}-|-{:->11}\n",
        "", "", "", "", "", ""
    ));
    for result in results {
        out.push_str(&format_result_row(result));
        out.push('\n');
    }
    out
}

/// One-line summary: reason, counters and the fastest endpoint if any.
pub fn format_summary(snapshot: &RunSnapshot) -> String {
    let reason = snapshot
        .reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| format!("{:?}", snapshot.phase).to_lowercase());

    let mut summary = format!(
        "Run {}: {}/{} finished, {} succeeded, {} failed, {} skipped",
        reason,
        snapshot.finished_count(),
        snapshot.total,
        snapshot.succeeded,
        snapshot.failed,
        snapshot.skipped,
    );

    let fastest = snapshot
        .results
        .iter()
        .filter_map(|r| r.download_mbps.map(|mbps| (r, mbps)))
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((best, mbps)) = fastest {
        summary.push_str(&format!(", fastest: {} ({})", best.endpoint.hostname, format_speed(mbps)));
    }

    if let (Some(start), Some(end)) = (snapshot.started_at, snapshot.finished_at) {
        let secs = (end - start).num_milliseconds() as f64 / 1000.0;
        summary.push_str(&format!(", took {:.1}s", secs));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FailureCause, FinishReason, RunPhase, Status};
    use crate::relay::Endpoint;

    fn completed(hostname: &str, down: f64) -> EndpointResult {
        let mut r = EndpointResult::new(Endpoint::new(hostname, "se", "got"));
        for s in [Status::Connecting, Status::Verifying, Status::Pinging, Status::SpeedTesting, Status::Completed] {
            assert!(r.advance(s));
        }
        r.ping_ms = Some(12.34);
        r.download_mbps = Some(down);
        r.upload_mbps = Some(88.0);
        r
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(245.34), "245.3 Mbps");
        assert_eq!(format_speed(1250.0), "1.25 Gbps");
    }

    #[test]
    fn test_row_shows_measurements() {
        let row = format_result_row(&completed("se-got-wg-001", 412.5));
        assert!(row.contains("se-got-wg-001"));
        assert!(row.contains("Completed"));
        assert!(row.contains("12.3 ms"));
        assert!(row.contains("412.5 Mbps"));
    }

    #[test]
    fn test_row_dashes_missing_values() {
        let mut r = EndpointResult::new(Endpoint::new("se-got-wg-002", "se", "got"));
        r.advance(Status::Connecting);
        r.fail(Status::Failed, FailureCause::Connect, "refused");
        let row = format_result_row(&r);
        assert!(row.contains("Failed (connect)"));
        assert!(!row.contains(" ms"));
        assert!(!row.contains("Mbps"));
        assert!(row.ends_with('-'));
    }

    #[test]
    fn test_disconnect_error_noted() {
        let mut r = completed("se-got-wg-003", 100.0);
        r.disconnect_error = Some("daemon gone".to_string());
        assert_eq!(format_status(&r), "Completed (disconnect error)");
    }

    #[test]
    fn test_table_keeps_order() {
        let table = format_table(&[completed("b-host", 1.0), completed("a-host", 2.0)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Hostname"));
        assert!(lines[2].starts_with("b-host"));
        assert!(lines[3].starts_with("a-host"));
    }

    #[test]
    fn test_summary_counts_and_fastest() {
        let snapshot = RunSnapshot {
            phase: RunPhase::Finished,
            reason: Some(FinishReason::Completed),
            total: 3,
            succeeded: 2,
            failed: 1,
            results: vec![completed("slow", 50.0), completed("fast", 1500.0)],
            ..Default::default()
        };
        let summary = format_summary(&snapshot);
        assert!(summary.starts_with("Run completed: 3/3 finished"));
        assert!(summary.contains("2 succeeded, 1 failed, 0 skipped"));
        assert!(summary.contains("fastest: fast (1.50 Gbps)"));
    }
}
