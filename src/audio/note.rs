// Note names ("D3", "Bb2", "F#4") and note values ("8n", "16n", "0.4").
//
// Patterns are written the way a musician would write them and resolved here.
// Everything is allocation-free so it can be called from the render callback.

const A4_HZ: f32 = 440.0;
const A4_MIDI: i32 = 69;

/// Equal-tempered frequency of a note name, or None if it doesn't parse.
pub fn frequency(name: &str) -> Option<f32> {
    let midi = midi_number(name)?;
    Some(A4_HZ * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0))
}

/// MIDI note number of a note name; C4 = 60.
pub fn midi_number(name: &str) -> Option<i32> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    let base = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.as_bytes().first()? {
        b'#' => (1, &rest[1..]),
        b'b' => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;
    Some((octave + 1) * 12 + base + accidental)
}

/// A duration, either tempo-relative ("4n" = one beat) or absolute seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteValue {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    Seconds(f64),
}

impl NoteValue {
    #[cfg(test)]
    pub fn parse(s: &str) -> Option<Self> {
        let v = match s {
            "1n" => NoteValue::Whole,
            "2n" => NoteValue::Half,
            "4n" => NoteValue::Quarter,
            "8n" => NoteValue::Eighth,
            "16n" => NoteValue::Sixteenth,
            "32n" => NoteValue::ThirtySecond,
            other => {
                let secs: f64 = other.parse().ok()?;
                if !secs.is_finite() || secs < 0.0 {
                    return None;
                }
                NoteValue::Seconds(secs)
            }
        };
        Some(v)
    }

    pub fn seconds(self, bpm: f64) -> f64 {
        let beat = 60.0 / bpm;
        match self {
            NoteValue::Whole => beat * 4.0,
            NoteValue::Half => beat * 2.0,
            NoteValue::Quarter => beat,
            NoteValue::Eighth => beat / 2.0,
            NoteValue::Sixteenth => beat / 4.0,
            NoteValue::ThirtySecond => beat / 8.0,
            NoteValue::Seconds(s) => s,
        }
    }
}

/// -6 dB ≈ 0.5
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
