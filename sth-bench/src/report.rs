//! Fixed-width report table for comparison results.

use crate::compare::ComparisonReport;

/// Render the comparison as a fixed-width table.
pub fn render_table(report: &ComparisonReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:>11} {:>14} {:>15} {:>9}  {}\n",
        "scenario", "concurrency", "baseline p95", "candidate p95", "delta", "verdict"
    ));
    out.push_str(&"-".repeat(84));
    out.push('\n');
    for row in &report.rows {
        out.push_str(&format!(
            "{:<20} {:>11} {:>12.1}ms {:>13.1}ms {:>+8.1}%  {}\n",
            row.scenario,
            row.concurrency,
            row.baseline_p95_ms,
            row.candidate_p95_ms,
            row.delta_pct,
            if row.regressed { "REGRESSED" } else { "ok" }
        ));
    }
    out.push_str(&format!(
        "\nthreshold: +{:.1}% on p95, {} row(s), {} regression(s)\n",
        report.threshold_pct,
        report.rows.len(),
        report.rows.iter().filter(|r| r.regressed).count()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::BenchmarkRow;
    use chrono::Utc;

    #[test]
    fn test_table_marks_regressions() {
        let report = ComparisonReport {
            started_at: Utc::now(),
            threshold_pct: 15.0,
            rows: vec![
                BenchmarkRow {
                    scenario: "keyword".into(),
                    concurrency: 10,
                    baseline_p95_ms: 10.0,
                    candidate_p95_ms: 22.0,
                    delta_pct: 120.0,
                    regressed: true,
                },
                BenchmarkRow {
                    scenario: "filtered".into(),
                    concurrency: 1,
                    baseline_p95_ms: 8.0,
                    candidate_p95_ms: 8.2,
                    delta_pct: 2.5,
                    regressed: false,
                },
            ],
        };
        let table = render_table(&report);
        assert!(table.contains("REGRESSED"));
        assert!(table.contains("keyword"));
        assert!(table.contains("1 regression(s)"));
    }

    #[test]
    fn test_table_renders_empty_report() {
        let report = ComparisonReport {
            started_at: Utc::now(),
            threshold_pct: 15.0,
            rows: vec![],
        };
        let table = render_table(&report);
        assert!(table.contains("0 row(s)"));
    }
}
