//! # ostinato
//!
//! Beat-synchronized loop recording and crossfaded endless playback.
//!
//! The engine records loops aligned to a shared musical transport and
//! plays them back forever without audible seams:
//!
//! - [`transport::Transport`] maps wall-clock time onto a repeating
//!   bar grid and decides when the next cycle starts.
//! - [`recording::RecordingManager`] records one loop cycle as a chain
//!   of overlapping segments, alternating between two capture slots so
//!   no audio is lost at segment boundaries.
//! - [`player::LoopBuffer`] schedules the recorded segments end to end
//!   with equal-power crossfades, re-anchoring to the transport every
//!   cycle so playback never drifts.
//! - [`player::Loop`] is the lifecycle state machine tying the two
//!   together; [`player::NetworkedLoop`] and [`player::LoopBoard`]
//!   mirror it to a collaborative session.
//!
//! All timing flows through one [`sched::Scheduler`] driven by an
//! [`clock::AudioClock`], so the whole engine runs deterministically
//! under a virtual clock in tests.
//!
//! ## Example
//!
//! ```no_run
//! use ostinato::{LooperSystem, TimeSettings};
//! use ostinato::player::LoopCallbacks;
//!
//! # fn main() -> ostinato::Result<()> {
//! let system = LooperSystem::builder()
//!     .time_settings(TimeSettings::new(120.0, 4, 2)?)
//!     .build()?;
//! system.spawn_driver();
//!
//! // Record on the next bar boundary and start looping as soon as the
//! // cycle completes.
//! let loop_ = system.record_loop(true, LoopCallbacks::default())?;
//! # let _ = loop_;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod graph;
pub mod input;
pub mod player;
pub mod recording;
pub mod sched;
pub mod system;
pub mod transport;

pub use config::{RecordOptions, TimeSettings};
pub use error::{Error, Result};
pub use system::{EngineHandles, LooperSystem, LooperSystemBuilder};
