//! Output module for harvest reports
//!
//! This module handles:
//! - Loading run statistics from the database
//! - Printing them for operators

pub mod stats;

pub use stats::{load_statistics, print_statistics, BackingOffSource, HarvestStatistics};
