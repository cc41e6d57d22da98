//! Offline rendering
//!
//! Songs are rendered through the same [`StreamScheduler`](crate::StreamScheduler)
//! used for live playback, so exported files match what the device would play.

pub mod wav;

pub use wav::render_to_wav;
