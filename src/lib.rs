pub mod fetch;
pub mod github;
pub mod output;
pub mod stats;
pub mod store;
