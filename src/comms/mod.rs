//! Blocking work queue and binary message framing.
//!
//! `queue` provides the bounded multi-producer, multi-consumer mailbox every
//! pipeline runs on, while `codec` encodes and decodes the fixed-layout frames
//! exchanged by the message workload.
pub mod codec;
pub mod queue;
