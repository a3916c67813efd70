//! Scheduled background jobs.
//!
//! # Responsibility
//! - Fire callbacks on a calendar or interval schedule (`trigger`).
//! - Produce and distribute monthly spending summaries (`summary`).

pub mod summary;
pub mod trigger;

pub use summary::{
    previous_month_bounds, MonthlySummary, MonthlySummaryJob, MonthlySummaryReport,
    ProductSummary, UNKNOWN_PRODUCT,
};
pub use trigger::{PeriodicJobTrigger, Schedule, TriggerError};
