//! Framed binary messages exchanged between many senders and many receivers.
//!
//! Producers play senders: each one encodes its share of the messages and
//! offers the frames. Consumers decode each frame and hand the message to a
//! [`MessageSink`]. Frames that fail to decode are dropped and counted as
//! malformed in the run report.
use std::ops::Range;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    comms::codec::{encode, Frame, Message, MAX_PAYLOAD},
    pipeline::{config::PipelineConfig, Pipeline, PipelineReport},
    scheduling::partition::Partitioner,
    PipeError,
};

/// Number of distinct operation codes the generated traffic cycles through.
pub const OPERATION_CODES: u32 = 4;

/// Where decoded messages end up.
pub trait MessageSink: Sync {
    fn deliver(&self, message: Message) -> Result<(), PipeError>;
}

/// Logs each message at debug level and keeps nothing.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn deliver(&self, message: Message) -> Result<(), PipeError> {
        debug!(
            sender = message.sender_id,
            operation = message.operation_code,
            len = message.payload.len(),
            "message delivered"
        );
        Ok(())
    }
}

/// Keeps every delivered message, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<Message>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages.into_inner()
    }
}

impl MessageSink for CollectingSink {
    fn deliver(&self, message: Message) -> Result<(), PipeError> {
        self.messages.lock().push(message);
        Ok(())
    }
}

/// The `index`-th message of the generated traffic. Payload length cycles
/// through `1..=50` and the first byte carries the low byte of `index`.
pub fn sample_message(sender_id: u32, index: usize) -> Message {
    let len = 1 + index % MAX_PAYLOAD;
    let payload = (0..len).map(|i| index.wrapping_add(i) as u8).collect();
    Message {
        sender_id,
        operation_code: (index as u32) % OPERATION_CODES,
        payload,
    }
}

/// Encoded frames for messages `indices` sent by `sender_id`.
pub fn sender_frames(sender_id: u32, indices: Range<usize>) -> Result<Vec<Frame>, PipeError> {
    indices
        .map(|index| {
            let message = sample_message(sender_id, index);
            encode(message.sender_id, message.operation_code, &message.payload)
        })
        .collect()
}

/// Send `total` generated messages, split evenly over `config.producer_count`
/// senders, and deliver everything that decodes to `sink`.
pub fn exchange<K>(
    config: PipelineConfig,
    total: usize,
    sink: &K,
) -> Result<PipelineReport, PipeError>
where
    K: MessageSink + ?Sized,
{
    let shares = Partitioner::new(config.producer_count)?.assign(total);
    let sources = shares
        .into_iter()
        .enumerate()
        .map(|(sender, indices)| sender_frames(sender as u32, indices))
        .collect::<Result<Vec<_>, _>>()?;
    exchange_frames(config, sources, sink)
}

/// Run pre-built frame streams, one per producer, through the pipeline.
pub fn exchange_frames<K>(
    config: PipelineConfig,
    sources: Vec<Vec<Frame>>,
    sink: &K,
) -> Result<PipelineReport, PipeError>
where
    K: MessageSink + ?Sized,
{
    let pipeline = Pipeline::new(config)?;
    pipeline.run(sources, &|frame: Frame| sink.deliver(frame.decode()?))
}
