//! Work splitting for pipeline runs.
//!
//! Currently this module only contains the range partitioner that decides how
//! rows or message counts are carved into chunks and handed to producers.
pub mod partition;
