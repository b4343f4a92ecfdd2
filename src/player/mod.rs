//! Loop playback: crossfaded endless playback of recorded segments, the
//! recording-to-looping state machine, and the session-facing wrapper.

mod board;
mod buffer;
mod loop_state;
mod networked;

pub use board::{LoopBoard, BOARD_CAPACITY};
pub use buffer::LoopBuffer;
pub use loop_state::{Loop, LoopCallbacks, LoopStatus};
pub use networked::{CreateMessage, LoopPosition, NetworkedLoop, SegmentMessage, SessionApi};
