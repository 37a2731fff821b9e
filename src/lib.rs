// Library side of the app: the engine and everything the front ends share.
// Also what the unit tests build against.

pub mod audio;
pub mod audio_api;
pub mod error;
pub mod middle;
pub mod pipeline;
pub mod sequencer;
pub mod shared;
pub mod tui;

pub use error::EngineError;
pub use sequencer::{BreakHandle, Output, Sequencer, Subscription};
