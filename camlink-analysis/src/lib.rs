//! # camlink analysis
//!
//! Submits finished recordings to the remote analysis endpoint as a
//! multipart upload with Basic authentication and reads back its verdict.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod verdict;

// Re-export main types
pub use client::{AnalysisClient, Analyzer, DEFAULT_ANALYZE_URL, FILE_FIELD};
pub use error::AnalysisError;
pub use verdict::{AnalysisResponse, Verdict, NO_RESULT};
