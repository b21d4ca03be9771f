use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};

use crate::github::types::PullRequest;

/// Bucket width for aggregation: calendar days or ISO weeks (Monday start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Week,
}

impl Granularity {
    /// Start of the bucket containing `ts`. Buckets are half-open
    /// [start, start + unit), so an instant exactly on a boundary belongs to
    /// the bucket that starts there.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start = match self {
            Granularity::Day => date,
            Granularity::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
        };
        start.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn advance(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Day => start + Duration::days(1),
            Granularity::Week => start + Duration::days(7),
        }
    }
}

/// Metrics for one time bucket. Mean/median fields are `None` when the
/// bucket has no records on the corresponding axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStats {
    pub bucket_start: DateTime<Utc>,
    pub opened: u64,
    pub merged: u64,
    pub closed: u64,
    pub mean_cycle_time_minutes: Option<f64>,
    pub median_cycle_time_minutes: Option<f64>,
    pub mean_size: Option<f64>,
}

fn minutes(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / 60.0
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[derive(Default)]
struct BucketAccum {
    opened: u64,
    merged: u64,
    closed: u64,
    cycle_times: Vec<f64>,
    sizes: Vec<f64>,
}

/// Partition records into dense, chronologically ordered buckets from the
/// earliest creation to the latest activity, inclusive. Buckets with zero
/// activity are emitted with zero counts so downstream time-series consumers
/// see an evenly spaced sequence. Output depends only on the record set,
/// never on ingestion order.
pub fn aggregate<'a, I>(records: I, granularity: Granularity) -> Vec<BucketStats>
where
    I: IntoIterator<Item = &'a PullRequest>,
{
    let records: Vec<&PullRequest> = records.into_iter().collect();
    if records.is_empty() {
        return Vec::new();
    }

    let mut accums: HashMap<DateTime<Utc>, BucketAccum> = HashMap::new();
    let mut earliest = records[0].created_at;
    let mut latest = records[0].latest_activity();

    for record in &records {
        earliest = earliest.min(record.created_at);
        latest = latest.max(record.latest_activity());

        let opened_bucket = granularity.bucket_start(record.created_at);
        let accum = accums.entry(opened_bucket).or_default();
        accum.opened += 1;
        accum.sizes.push(record.size() as f64);

        if let Some(merged_at) = record.merged_at {
            let accum = accums.entry(granularity.bucket_start(merged_at)).or_default();
            accum.merged += 1;
            if let Some(cycle) = record.cycle_time() {
                accum.cycle_times.push(minutes(cycle));
            }
        }
        if let Some(closed_at) = record.closed_at {
            accums.entry(granularity.bucket_start(closed_at)).or_default().closed += 1;
        }
    }

    let end = granularity.bucket_start(latest);
    let mut buckets = Vec::new();
    let mut start = granularity.bucket_start(earliest);
    loop {
        let accum = accums.remove(&start).unwrap_or_default();
        let mut cycle_times = accum.cycle_times;
        cycle_times.sort_by(|a, b| a.total_cmp(b));

        buckets.push(BucketStats {
            bucket_start: start,
            opened: accum.opened,
            merged: accum.merged,
            closed: accum.closed,
            mean_cycle_time_minutes: (!cycle_times.is_empty()).then(|| mean(&cycle_times)),
            median_cycle_time_minutes: (!cycle_times.is_empty()).then(|| median(&cycle_times)),
            mean_size: (!accum.sizes.is_empty()).then(|| mean(&accum.sizes)),
        });

        if start >= end {
            break;
        }
        start = granularity.advance(start);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::PrState;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn record(
        number: u64,
        created_at: &str,
        merged_at: Option<&str>,
        size: (u64, u64),
    ) -> PullRequest {
        let merged = merged_at.map(ts);
        PullRequest {
            number,
            title: format!("PR {}", number),
            author: "alice".to_string(),
            url: format!("https://github.com/o/r/pull/{}", number),
            state: if merged.is_some() {
                PrState::Merged
            } else {
                PrState::Open
            },
            created_at: ts(created_at),
            updated_at: merged.unwrap_or_else(|| ts(created_at)),
            merged_at: merged,
            closed_at: merged,
            first_review_at: None,
            additions: size.0,
            deletions: size.1,
            commit_count: 1,
            review_count: 0,
        }
    }

    #[test]
    fn test_empty_record_set_yields_empty_aggregate() {
        assert!(aggregate(std::iter::empty(), Granularity::Day).is_empty());
    }

    #[test]
    fn test_daily_scenario_nine_day_span() {
        // #1 created day 1, merged day 3; #2 created day 1, still open;
        // #3 created day 8, merged day 9.
        let records = vec![
            record(1, "2024-03-01T09:00:00Z", Some("2024-03-03T09:00:00Z"), (5, 5)),
            record(2, "2024-03-01T15:00:00Z", None, (1, 1)),
            record(3, "2024-03-08T12:00:00Z", Some("2024-03-09T12:00:00Z"), (2, 0)),
        ];

        let buckets = aggregate(&records, Granularity::Day);
        assert_eq!(buckets.len(), 9);
        assert_eq!(buckets[0].bucket_start, ts("2024-03-01T00:00:00Z"));
        assert_eq!(buckets[8].bucket_start, ts("2024-03-09T00:00:00Z"));

        assert_eq!(buckets[0].opened, 2);
        assert_eq!(buckets[0].mean_size, Some(6.0));

        assert_eq!(buckets[2].merged, 1);
        assert_eq!(buckets[2].mean_cycle_time_minutes, Some(2880.0)); // 2 days

        assert_eq!(buckets[8].merged, 1);
        assert_eq!(buckets[8].mean_cycle_time_minutes, Some(1440.0)); // 1 day

        for (i, bucket) in buckets.iter().enumerate() {
            if ![0, 7].contains(&i) {
                assert_eq!(bucket.opened, 0, "unexpected opened count in bucket {}", i);
            }
            if ![2, 8].contains(&i) {
                assert_eq!(bucket.merged, 0, "unexpected merged count in bucket {}", i);
            }
        }
    }

    #[test]
    fn test_buckets_dense_with_zero_gaps() {
        let records = vec![
            record(1, "2024-01-01T12:00:00Z", None, (0, 0)),
            record(2, "2024-01-20T12:00:00Z", None, (0, 0)),
        ];
        let buckets = aggregate(&records, Granularity::Day);
        assert_eq!(buckets.len(), 20);
        for pair in buckets.windows(2) {
            assert_eq!(pair[1].bucket_start - pair[0].bucket_start, Duration::days(1));
        }
    }

    #[test]
    fn test_boundary_instant_belongs_to_starting_bucket() {
        let records = vec![record(1, "2024-03-02T00:00:00Z", None, (0, 0))];
        let buckets = aggregate(&records, Granularity::Day);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].bucket_start, ts("2024-03-02T00:00:00Z"));
        assert_eq!(buckets[0].opened, 1);
    }

    #[test]
    fn test_weekly_buckets_start_monday() {
        // 2024-03-06 is a Wednesday; its ISO week starts Monday 2024-03-04.
        let records = vec![
            record(1, "2024-03-06T10:00:00Z", Some("2024-03-12T10:00:00Z"), (4, 0)),
        ];
        let buckets = aggregate(&records, Granularity::Week);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].bucket_start, ts("2024-03-04T00:00:00Z"));
        assert_eq!(buckets[1].bucket_start, ts("2024-03-11T00:00:00Z"));
        assert_eq!(buckets[0].opened, 1);
        assert_eq!(buckets[1].merged, 1);
        assert_eq!(buckets[1].closed, 1);
    }

    #[test]
    fn test_median_cycle_time_even_count() {
        let records = vec![
            record(1, "2024-03-01T00:00:00Z", Some("2024-03-01T01:00:00Z"), (0, 0)),
            record(2, "2024-03-01T00:00:00Z", Some("2024-03-01T03:00:00Z"), (0, 0)),
        ];
        let buckets = aggregate(&records, Granularity::Day);
        assert_eq!(buckets[0].merged, 2);
        assert_eq!(buckets[0].median_cycle_time_minutes, Some(120.0));
        assert_eq!(buckets[0].mean_cycle_time_minutes, Some(120.0));
    }

    #[test]
    fn test_output_independent_of_ingestion_order() {
        let records = vec![
            record(1, "2024-03-01T09:00:00Z", Some("2024-03-03T09:00:00Z"), (5, 5)),
            record(2, "2024-03-02T09:00:00Z", None, (1, 1)),
            record(3, "2024-03-04T09:00:00Z", Some("2024-03-05T09:00:00Z"), (2, 0)),
        ];
        let forward = aggregate(&records, Granularity::Day);
        let reversed: Vec<&PullRequest> = records.iter().rev().collect();
        assert_eq!(forward, aggregate(reversed, Granularity::Day));
    }
}
