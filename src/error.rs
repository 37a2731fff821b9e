/// Everything the sequencer can refuse to do. Device errors are stringified
/// since cpal has a different error type for each step of opening a stream.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine not initialized; call initialize() first")]
    NotInitialized,
    #[error("no default output device")]
    NoOutputDevice,
    #[error("unsupported sample format: {0} (only f32 supported for now)")]
    UnsupportedFormat(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("offline rendering needs an engine built with Output::Offline")]
    NotOffline,
    #[error("break/drop interrupted before it finished")]
    BreakInterrupted,
    #[error("unsupported sample rate: {0} Hz (expected 8000 to 384000)")]
    UnsupportedSampleRate(u32),
    #[error("audio command queue full; command dropped")]
    CommandDropped,
}
