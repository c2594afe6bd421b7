//! Live buffers of recent events, one ring per run.
//!
//! The [`BufferManager`] subscribes to the bus (drop-old, so live readers
//! never slow the publish path) and demultiplexes events into a
//! [`RingBuffer`] per `run_id`. Readers tail the most recent events or look
//! up a single frame; under sustained load the ring simply forgets the
//! oldest frames.

mod manager;
mod ring;

pub use manager::{BufferConfig, BufferManager};
pub use ring::RingBuffer;
