//! Concrete jobs driven through the pipeline engine.

pub mod matrix;
pub mod messages;
pub mod sums;
