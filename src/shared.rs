// Everything the TUI, the middle layer and the audio side agree on.
//
// The composition is fixed: one tempo, one swing amount, four layers of 16
// steps each. None of this is user-editable, so it lives here as constants.
//
// Keys (see tui/input.rs):
//   1 2 3 4       //  Choose(0 or ... or 3) for the current stage
//   Esc / q       //  Quit

pub const BPM: f64 = 122.0;
pub const SWING: f64 = 0.08;
pub const STEPS_PER_PATTERN: usize = 16;
pub const NUM_LAYERS: usize = 4;

// one bool per step, true = the pattern sounds on that step
pub type StepMask = [bool; STEPS_PER_PATTERN];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    Kick,
    Perc,
    Melody,
    Drop,
}

impl Layer {
    pub const ALL: [Layer; NUM_LAYERS] = [Layer::Kick, Layer::Perc, Layer::Melody, Layer::Drop];

    pub fn index(self) -> usize {
        match self {
            Layer::Kick => 0,
            Layer::Perc => 1,
            Layer::Melody => 2,
            Layer::Drop => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Layer::Kick => "kick",
            Layer::Perc => "perc",
            Layer::Melody => "melody",
            Layer::Drop => "drop",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// "layer X reached step Y", emitted once per tick per running loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepEvent {
    pub layer: Layer,
    pub step: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Choose(u8), // index 0-3 into the current stage's options
    Quit,
}

#[derive(Clone, Debug)]
pub struct DisplayState {
    pub stage_title: &'static str,
    pub prompt: &'static str,
    pub options: Vec<&'static str>,
    pub selections: Vec<(&'static str, &'static str)>, // (stage, choice) picked so far
    pub masks: [Option<StepMask>; NUM_LAYERS], // None until the layer starts
    pub playheads: [Option<u8>; NUM_LAYERS], // last step seen per layer
    pub dropping: bool, // a break is in flight
    pub finished: bool,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            stage_title: "",
            prompt: "",
            options: Vec::new(),
            selections: Vec::new(),
            masks: [None; NUM_LAYERS],
            playheads: [None; NUM_LAYERS],
            dropping: false,
            finished: false,
        }
    }
}
