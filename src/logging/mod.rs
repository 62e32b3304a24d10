//! Run summaries and the seam through which they leave the crate.
//!
//! Rendering reports is somebody else's job; this module only assembles the
//! numbers and hands them to a [`report::ReportSink`].

pub mod report;
