use crossbeam_channel::{Receiver, Sender};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio_api::{AudioCommand, EngineEvent};
use crate::error::EngineError;

mod break_drop;
mod effect;
mod engine;
mod envelope;
mod frame;
mod master;
pub mod note;
mod transport;
mod voice;

pub use break_drop::BreakPhase;
pub use frame::StereoFrame;
pub use note::NoteValue;
pub use voice::VoiceId;

use engine::{Engine, MAX_BLOCK};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 384_000;

const COMMAND_QUEUE: usize = 1024;
const EVENT_QUEUE: usize = 4096;

// Where rendered audio goes: a live cpal stream that pulls blocks from the
// engine on the device's callback thread, or nowhere at all, with the caller
// pulling blocks itself (tests, bouncing to disk).
enum Sink {
    Device(cpal::Stream),
    Offline {
        engine: Box<Engine>,
        rx: Receiver<AudioCommand>,
    },
}

pub struct AudioHandle {
    tx: Sender<AudioCommand>,
    events_rx: Receiver<EngineEvent>,
    sample_rate: u32,
    sink: Sink,
}

impl AudioHandle {
    /// Queue a command for the engine. Returns false if the queue was full
    /// and the command got dropped.
    pub fn send(&self, cmd: AudioCommand) -> bool {
        match self.tx.try_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(command = ?e.into_inner(), "audio command queue full, dropping");
                false
            }
        }
    }

    pub fn poll_event(&self) -> Option<EngineEvent> {
        self.events_rx.try_recv().ok()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.sink, Sink::Offline { .. })
    }

    /// Pull one block out of an offline engine.
    pub fn render(&mut self, out: &mut [StereoFrame]) -> Result<(), EngineError> {
        match &mut self.sink {
            Sink::Offline { engine, rx } => {
                pump(engine, rx, out);
                Ok(())
            }
            Sink::Device(_) => Err(EngineError::NotOffline),
        }
    }

    /// Tell the engine to stop and tear the sink down.
    pub fn close(self) -> Result<(), EngineError> {
        let _ = self.tx.try_send(AudioCommand::Stop);
        match self.sink {
            Sink::Device(stream) => stream.pause().map_err(|e| EngineError::Device(e.to_string())),
            Sink::Offline { .. } => Ok(()),
        }
    }
}

fn pump(engine: &mut Engine, rx: &Receiver<AudioCommand>, out: &mut [StereoFrame]) {
    while let Ok(cmd) = rx.try_recv() {
        engine.handle_cmd(cmd);
    }
    engine.render_block(out);
}

/// The voices and the transport need a real rate to build filters and place
/// ticks; anything outside this range is refused up front.
pub fn check_sample_rate(sample_rate: u32) -> Result<(), EngineError> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        Ok(())
    } else {
        Err(EngineError::UnsupportedSampleRate(sample_rate))
    }
}

/// An engine with no device behind it; call `AudioHandle::render` to advance it.
pub fn offline(sample_rate: u32) -> Result<AudioHandle, EngineError> {
    check_sample_rate(sample_rate)?;
    let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(COMMAND_QUEUE);
    let (events_tx, events_rx) = crossbeam_channel::bounded::<EngineEvent>(EVENT_QUEUE);
    let engine = Box::new(Engine::new(sample_rate, events_tx));
    Ok(AudioHandle {
        tx,
        events_rx,
        sample_rate,
        sink: Sink::Offline { engine, rx },
    })
}

/// Open the default output device and start pulling audio from a new engine.
pub fn start_audio() -> Result<AudioHandle, EngineError> {
    let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(COMMAND_QUEUE);
    let (events_tx, events_rx) = crossbeam_channel::bounded::<EngineEvent>(EVENT_QUEUE);

    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(EngineError::NoOutputDevice)?;
    let config = device
        .default_output_config()
        .map_err(|e| EngineError::Device(e.to_string()))?;

    let sample_rate = config.sample_rate();
    check_sample_rate(sample_rate)?;
    let channels = config.channels() as usize;

    match config.sample_format() {
        cpal::SampleFormat::F32 => {
            let engine = Engine::new(sample_rate, events_tx);
            let stream = build_output_stream_f32(&device, &config.into(), engine, rx, channels)?;
            stream.play().map_err(|e| EngineError::Device(e.to_string()))?;
            tracing::info!(sample_rate, channels, "audio output started");

            Ok(AudioHandle {
                tx,
                events_rx,
                sample_rate,
                sink: Sink::Device(stream),
            })
        }
        other => Err(EngineError::UnsupportedFormat(format!("{other:?}"))),
    }
}

// ── Output stream ─────────────────────────────────────────────────

fn build_output_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut engine: Engine,
    rx: Receiver<AudioCommand>,
    channels: usize,
) -> Result<cpal::Stream, EngineError> {
    let err_fn = |err| tracing::error!("audio output stream error: {err}");
    let mut scratch = vec![StereoFrame::zero(); MAX_BLOCK];

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(MAX_BLOCK * channels) {
                    let frames = &mut scratch[..chunk.len() / channels];
                    pump(&mut engine, &rx, frames);
                    interleave(frames, chunk, channels);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Device(e.to_string()))?;

    Ok(stream)
}

// Stereo frames into the device's layout: mono gets the average, extra
// channels beyond the first two stay silent.
fn interleave(frames: &[StereoFrame], out: &mut [f32], channels: usize) {
    for (f, dst) in frames.iter().zip(out.chunks_exact_mut(channels)) {
        match dst {
            [mono] => *mono = (f.left + f.right) * 0.5,
            [l, r, rest @ ..] => {
                *l = f.left;
                *r = f.right;
                rest.fill(0.0);
            }
            [] => {}
        }
    }
}
