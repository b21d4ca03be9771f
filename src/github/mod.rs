pub mod cache;
pub mod client;
pub mod error;
pub mod types;

pub use cache::{default_cache_path, PageCache};
pub use client::{GithubClient, Page, PageSource};
pub use error::FetchError;
pub use types::{PrState, PullRequest};
