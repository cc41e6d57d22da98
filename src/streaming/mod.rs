//! Double-buffered streaming
//!
//! The scheduler owns two fixed-size PCM buffers and fills one per call,
//! running the song decoder forward exactly as many ticks as the buffer
//! needs. Leftover frames of a tick carry over into the next buffer.

pub mod scheduler;

pub use scheduler::{FillOutcome, StreamScheduler, MAX_IDLE_TICKS};
