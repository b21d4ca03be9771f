use anyhow::{Context, Result};
use atomic_write_file::AtomicWriteFile;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;

use crate::github::types::PullRequest;
use crate::stats::BucketStats;

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Render the raw table: one row per pull-request record, ordered as given
/// (the store hands them over ordered by number).
pub fn render_pull_requests<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a PullRequest>,
{
    let mut out = String::from(
        "number,title,author,url,state,created_at,updated_at,merged_at,closed_at,\
         first_review_at,additions,deletions,commit_count,review_count,cycle_time_minutes\n",
    );
    for pr in records {
        let cycle = pr
            .cycle_time()
            .map(|d| format!("{:.2}", d.num_seconds() as f64 / 60.0))
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            pr.number,
            escape(&pr.title),
            escape(&pr.author),
            escape(&pr.url),
            pr.state.as_str(),
            pr.created_at.to_rfc3339(),
            pr.updated_at.to_rfc3339(),
            opt_ts(pr.merged_at),
            opt_ts(pr.closed_at),
            opt_ts(pr.first_review_at),
            pr.additions,
            pr.deletions,
            pr.commit_count,
            pr.review_count,
            cycle,
        ));
    }
    out
}

/// Render one aggregate table: one row per bucket, chronological.
pub fn render_bucket_stats(buckets: &[BucketStats]) -> String {
    let mut out = String::from(
        "bucket_start,opened,merged,closed,mean_cycle_time_minutes,\
         median_cycle_time_minutes,mean_size\n",
    );
    for bucket in buckets {
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            bucket.bucket_start.to_rfc3339(),
            bucket.opened,
            bucket.merged,
            bucket.closed,
            opt_f64(bucket.mean_cycle_time_minutes),
            opt_f64(bucket.median_cycle_time_minutes),
            opt_f64(bucket.mean_size),
        ));
    }
    out
}

/// Write one report file atomically so a crash never leaves a truncated CSV.
pub fn write_report(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
        }
    }
    let mut file = AtomicWriteFile::open(path)
        .with_context(|| format!("Failed to open atomic write file at {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    file.commit()
        .with_context(|| format!("Failed to save report at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::PrState;
    use crate::stats::{aggregate, Granularity};

    fn record(number: u64, title: &str) -> PullRequest {
        PullRequest {
            number,
            title: title.to_string(),
            author: "alice".to_string(),
            url: format!("https://github.com/o/r/pull/{}", number),
            state: PrState::Merged,
            created_at: "2024-03-01T10:00:00Z".parse().unwrap(),
            updated_at: "2024-03-02T10:00:00Z".parse().unwrap(),
            merged_at: Some("2024-03-02T10:00:00Z".parse().unwrap()),
            closed_at: Some("2024-03-02T10:00:00Z".parse().unwrap()),
            first_review_at: None,
            additions: 10,
            deletions: 4,
            commit_count: 2,
            review_count: 1,
        }
    }

    #[test]
    fn test_render_pull_requests_row() {
        let records = vec![record(12, "Fix the widget")];
        let csv = render_pull_requests(&records);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("number,title,author"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("12,Fix the widget,alice,"));
        assert!(row.contains(",MERGED,"));
        assert!(row.ends_with(",10,4,2,1,1440.00"));
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let records = vec![record(3, "Fix a, b, and \"c\"")];
        let csv = render_pull_requests(&records);
        assert!(csv.contains("\"Fix a, b, and \"\"c\"\"\""));
    }

    #[test]
    fn test_fields_with_line_breaks_are_quoted() {
        let records = vec![record(4, "title with\rcarriage return")];
        let csv = render_pull_requests(&records);
        assert!(csv.contains("\"title with\rcarriage return\""));

        let records = vec![record(5, "title with\nnewline")];
        let csv = render_pull_requests(&records);
        assert!(csv.contains("\"title with\nnewline\""));
    }

    #[test]
    fn test_render_bucket_stats_empty_metrics_blank() {
        let records = vec![record(1, "one")];
        let buckets = aggregate(&records, Granularity::Day);
        let csv = render_bucket_stats(&buckets);
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("bucket_start,"));
        // Day 1: opened but nothing merged, so cycle-time cells are empty.
        assert_eq!(
            lines.next().unwrap(),
            "2024-03-01T00:00:00+00:00,1,0,0,,,14.00"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2024-03-02T00:00:00+00:00,0,1,1,1440.00,1440.00,"
        );
    }

    #[test]
    fn test_write_report_roundtrip() {
        let path = std::env::temp_dir().join("pr_metrics_test_report/daily.csv");
        let _ = std::fs::remove_file(&path);
        write_report(&path, "a,b\n1,2\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n1,2\n");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
