use crossbeam_channel::Sender;

pub use crate::audio::BreakPhase;
use crate::shared::{Layer, StepEvent};

#[derive(Clone, Debug)]
pub enum AudioCommand {
    // Start a layer's loop on the next sixteenth, starting the transport if it
    // isn't running yet. Already-running loops ignore this.
    StartLoop(Layer),

    // Duck, rise, slam back in. `done` gets a unit once the restore fires;
    // it's dropped unanswered if the break is rejected or the engine goes away.
    BreakDrop { done: Sender<()> },

    // Transport off, loops gone, voices silenced.
    Stop,
}

// What the render side reports back. Sent with try_send, so a slow reader
// loses events rather than stalling the audio callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    Step(StepEvent),
    LayerStarted(Layer),
    Break(BreakPhase),
}
