mod csv;

pub use csv::{render_bucket_stats, render_pull_requests, write_report};
