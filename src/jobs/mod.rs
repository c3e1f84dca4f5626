//! Job execution
//!
//! The queue itself lives in storage; this module claims and runs jobs.

pub mod worker;

pub use worker::{JobReport, Worker};
