//! Loop recording: the dual-recorder alternation protocol that turns a
//! live input into a gapless, ordered sequence of segments covering
//! exactly one loop cycle.

mod events;
mod manager;

pub use events::{EventSink, RecorderEvent, Segment};
pub use manager::RecordingManager;
