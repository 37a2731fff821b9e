// The four fixed patterns, one per layer, plus what each step triggers.
//
// Deep house at 122: four-on-the-floor kick with a ghost on the last
// sixteenth, offbeat hats with a clap on 2 and 4, Dm9 / Am7 / Gm9 / C7 stabs,
// and a walking bassline under them.

use crate::audio::{NoteValue, VoiceId};
use crate::shared::{Layer, StepMask, STEPS_PER_PATTERN};

// 1 = full hit, 2 = ghost hit
pub const KICK: [u8; STEPS_PER_PATTERN] = [1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 2];

pub const CLOSED_HAT: [u8; STEPS_PER_PATTERN] = [0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0];
pub const OPEN_HAT: [u8; STEPS_PER_PATTERN] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
pub const CLAP: [u8; STEPS_PER_PATTERN] = [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0];

pub const MELODY: [u8; STEPS_PER_PATTERN] = [1, 0, 0, 1, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0];
pub const CHORDS: [(usize, &[&str]); 5] = [
    (0, &["D3", "F3", "A3", "C4", "E4"]),
    (3, &["D3", "F3", "A3", "C4"]),
    (6, &["A2", "C3", "E3", "G3"]),
    (10, &["G2", "Bb2", "D3", "F3", "A3"]),
    (14, &["C3", "E3", "G3", "Bb3"]),
];

pub const BASS: [u8; STEPS_PER_PATTERN] = [1, 0, 0, 1, 0, 0, 1, 0, 1, 0, 0, 0, 1, 0, 1, 0];
// one-note slices so a bass hit carries its note like a chord does
pub const BASS_NOTES: [(usize, &[&str]); 6] = [
    (0, &["D2"]),
    (3, &["E2"]),
    (6, &["A1"]),
    (8, &["G1"]),
    (12, &["Bb1"]),
    (14, &["C2"]),
];

// Kick note for every kick hit.
const KICK_NOTE: &[&str] = &["C1"];

/// One voice trigger on one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub voice: VoiceId,
    pub notes: &'static [&'static str], // empty = unpitched
    pub length: NoteValue,
    pub velocity: f32,
}

impl Hit {
    const fn new(voice: VoiceId, notes: &'static [&'static str], length: NoteValue, velocity: f32) -> Self {
        Self { voice, notes, length, velocity }
    }
}

/// Up to three hits can share a step (closed hat + open hat + clap).
pub type StepHits = [Option<Hit>; 3];

pub fn chord_at(step: usize) -> Option<&'static [&'static str]> {
    CHORDS.iter().find(|(s, _)| *s == step).map(|(_, notes)| *notes)
}

pub fn bass_note_at(step: usize) -> Option<&'static [&'static str]> {
    BASS_NOTES.iter().find(|(s, _)| *s == step).map(|(_, note)| *note)
}

fn slot(pat: &[u8; STEPS_PER_PATTERN], step: usize) -> u8 {
    pat[step % STEPS_PER_PATTERN]
}

/// What `layer` plays on `step` (taken modulo 16).
pub fn hits(layer: Layer, step: usize) -> StepHits {
    let step = step % STEPS_PER_PATTERN;
    let mut out: StepHits = [None; 3];
    match layer {
        Layer::Kick => {
            out[0] = match slot(&KICK, step) {
                1 => Some(Hit::new(VoiceId::Kick, KICK_NOTE, NoteValue::Eighth, 1.0)),
                2 => Some(Hit::new(VoiceId::Kick, KICK_NOTE, NoteValue::Sixteenth, 0.4)),
                _ => None,
            };
        }
        Layer::Perc => {
            if slot(&CLOSED_HAT, step) != 0 {
                out[0] = Some(Hit::new(VoiceId::HihatClosed, &[], NoteValue::ThirtySecond, 0.22));
            }
            if slot(&OPEN_HAT, step) != 0 {
                out[1] = Some(Hit::new(VoiceId::HihatOpen, &[], NoteValue::Eighth, 0.18));
            }
            if slot(&CLAP, step) != 0 {
                out[2] = Some(Hit::new(VoiceId::Clap, &[], NoteValue::Sixteenth, 1.0));
            }
        }
        Layer::Melody => {
            // needs both the flag and a voicing
            if slot(&MELODY, step) != 0 {
                if let Some(chord) = chord_at(step) {
                    out[0] = Some(Hit::new(VoiceId::Chords, chord, NoteValue::Eighth, 0.3));
                }
            }
        }
        Layer::Drop => {
            if slot(&BASS, step) != 0 {
                if let Some(note) = bass_note_at(step) {
                    out[0] = Some(Hit::new(VoiceId::Bass, note, NoteValue::Sixteenth, 1.0));
                }
            }
        }
    }
    out
}

/// Which steps of `layer` sound, for display. Ghost kicks count as active;
/// percussion is the union of its three parts.
pub fn active_mask(layer: Layer) -> StepMask {
    std::array::from_fn(|i| match layer {
        Layer::Kick => KICK[i] != 0,
        Layer::Perc => CLOSED_HAT[i] != 0 || OPEN_HAT[i] != 0 || CLAP[i] != 0,
        Layer::Melody => MELODY[i] != 0,
        Layer::Drop => BASS[i] != 0,
    })
}
