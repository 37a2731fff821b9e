// Render the whole journey offline on a fixed script and write it to a WAV.
//
//   bar 0  dip      kick
//   bar 2  crunch   percussion
//   bar 4  drizzle  chords
//   bar 6  bite     break, bass comes in half a second later

use std::path::Path;

use anyhow::Context;

use crate::audio::{self, StereoFrame};
use crate::middle::Middle;
use crate::sequencer::{Output, Sequencer};
use crate::shared::{InputEvent, BPM};

pub const DEFAULT_BARS: u32 = 10;
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

const BLOCK: usize = 1024;
const SCRIPT: [(u32, u8); 4] = [(0, 0), (2, 0), (4, 0), (6, 0)];

#[derive(Clone, Copy, Debug)]
pub struct BounceOptions {
    pub sample_rate: u32,
    pub bars: u32,
}

impl Default for BounceOptions {
    fn default() -> Self {
        Self { sample_rate: DEFAULT_SAMPLE_RATE, bars: DEFAULT_BARS }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BounceSummary {
    pub frames: u64,
    pub peak: f32,
    pub finished: bool, // the journey got all the way through the drop
}

fn bar_start(bar: u32, sample_rate: u32) -> u64 {
    let bar_secs = 4.0 * 60.0 / BPM;
    (bar as f64 * bar_secs * sample_rate as f64).round() as u64
}

pub fn bounce(path: &Path, opts: BounceOptions) -> anyhow::Result<BounceSummary> {
    // before the file exists, so a bad rate leaves nothing behind
    audio::check_sample_rate(opts.sample_rate)?;
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: opts.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;

    let mut middle = Middle::new(Sequencer::new(Output::Offline { sample_rate: opts.sample_rate }));
    let total = bar_start(opts.bars, opts.sample_rate);
    let mut cues = SCRIPT
        .iter()
        .filter(|(bar, _)| *bar < opts.bars)
        .map(|&(bar, choice)| (bar_start(bar, opts.sample_rate), choice))
        .peekable();

    let mut buf = vec![StereoFrame::zero(); BLOCK];
    let mut pos = 0u64;
    let mut peak = 0.0f32;
    tracing::info!(path = %path.display(), bars = opts.bars, sample_rate = opts.sample_rate, "bouncing");

    while pos < total {
        while let Some(&(at, choice)) = cues.peek() {
            if at > pos {
                break;
            }
            middle.handle_input(InputEvent::Choose(choice))?;
            cues.next();
        }
        // stop each block on the next cue so it lands on its sample
        let mut n = (total - pos).min(BLOCK as u64);
        if let Some(&(at, _)) = cues.peek() {
            n = n.min(at - pos);
        }
        let block = &mut buf[..n as usize];
        middle.render(block)?;
        for f in block.iter() {
            peak = peak.max(f.peak());
            writer.write_sample(f.left)?;
            writer.write_sample(f.right)?;
        }
        pos += n;
    }
    writer.finalize()?;

    let finished = middle.display_state().finished;
    middle.shutdown();
    tracing::info!(frames = pos, peak, finished, "bounce done");
    Ok(BounceSummary { frames: pos, peak, finished })
}
