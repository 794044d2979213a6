//! Library crate for scan-ledger: first-seen/last-seen bookkeeping of scan results.
pub mod error;
pub mod report;
pub mod server;
pub mod store;
pub mod types;
pub mod view;
