//! Quarterly financial report synchronization for MOPS (Taiwan Market
//! Observation Post System) disclosures.
//!
//! A sweep reads each company's version ledger, plans fetch jobs for missing
//! or stale quarters, and runs them through a rate-limited worker pool that
//! fetches, extracts and stores each statement before advancing the ledger.

pub mod api;
pub mod concurrent_fetcher;
pub mod config;
pub mod data_collector;
pub mod database;
pub mod database_sqlx;
pub mod error;
pub mod extractors;
pub mod fiscal_calendar;
pub mod models;
pub mod scheduler;
pub mod version_reconciler;

pub use config::Config;
pub use error::{CalendarError, ConfigError, ExtractError};
