//! Decoder worker
//!
//! [`DecoderWorker`] is the synchronous adapter around one
//! [`DecoderEngine`](crate::DecoderEngine): it owns the engine and the bound
//! song for a session and implements the pull primitive
//! ([`DecoderWorker::process`]). [`WorkerHandle`] runs a `DecoderWorker` on a
//! dedicated thread and exchanges PCM blocks with the real-time renderer over
//! wait-free queues.

mod decoder;
mod thread;

#[cfg(test)]
pub(crate) mod mock;

pub use decoder::DecoderWorker;
pub use thread::{SessionLink, WorkerHandle};

use std::time::Duration;

/// Number of one-second blocks the worker keeps around for reuse
pub const BLOCK_POOL_SIZE: usize = 4;

/// Capacity of the per-session request and reply queues
pub const SESSION_QUEUE_SIZE: usize = 16;

/// How long the worker waits for control messages while a session is active
pub const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long the worker waits for control messages while idle
pub const WORKER_IDLE_WAIT: Duration = Duration::from_millis(50);

/// Messages sent from the renderer to the worker.
#[derive(Debug)]
pub enum RenderRequest {
    /// Decode the next block of the given session
    Pull {
        /// Session (generation) tag
        session: u64,
    },
    /// Hand a consumed block back for reuse
    Recycle(Vec<i16>),
}

/// Messages sent from the worker to the renderer.
#[derive(Debug)]
pub enum DecodeReply {
    /// One freshly decoded block
    Block {
        /// Session (generation) tag
        session: u64,
        /// Mono 16-bit samples, at most one second
        samples: Vec<i16>,
        /// Wall-clock time spent decoding this block
        decode_time: Duration,
    },
    /// The session produced its last block
    End {
        /// Session (generation) tag
        session: u64,
    },
}
