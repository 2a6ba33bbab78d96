//! Detection ingestion.
//!
//! Recorded detector output is replayed from local JSON-lines files, one
//! frame per line. Replays carry no pixels; each frame exposes a blank
//! [`FrameImage`](crate::identity::FrameImage) of the recorded size.

pub mod file;

pub use file::{ReplayFrame, ReplaySource, ReplayStats};
