use std::f32::consts::TAU;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::effect::{Biquad, FilterKind};
use super::envelope::{Adsr, Envelope};
use super::frame::StereoFrame;

const MAX_POLY_VOICES: usize = 16; // hard cap so we wont malloc in audio callback

// The eight sound generators the engine owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceId {
    Kick,
    HihatClosed,
    HihatOpen,
    Clap,
    Chords,
    Bass,
    Impact,
    Riser,
}

impl VoiceId {
    pub const ALL: [VoiceId; 8] = [
        VoiceId::Kick,
        VoiceId::HihatClosed,
        VoiceId::HihatOpen,
        VoiceId::Clap,
        VoiceId::Chords,
        VoiceId::Bass,
        VoiceId::Impact,
        VoiceId::Riser,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

// Anything the engine can trigger. `pitch` is None for unpitched hits
// (hats, noise), which then use their own fixed tuning.
pub trait Instrument: Send {
    fn trigger(&mut self, pitch: Option<f32>, duration: f32, velocity: f32);
    // adds into `out`
    fn render_into(&mut self, out: &mut [StereoFrame]);
    fn silence(&mut self);
    fn is_sounding(&self) -> bool;
}

// Counts down a triggered note's hold time, then releases the envelope.
#[derive(Clone, Copy, Debug, Default)]
struct Gate {
    remaining: u32,
}

impl Gate {
    fn open(&mut self, duration: f32, sample_rate: f32) {
        self.remaining = (duration * sample_rate).max(1.0) as u32;
    }

    // true on the sample the gate closes
    #[inline]
    fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining == 0
    }
}

// ── Membrane (kick, impact) ────────────────────────────────────────

/// Sine drum: the pitch starts `octaves` times above the note and falls to it
/// over `pitch_decay` seconds.
pub struct Membrane {
    sample_rate: f32,
    env: Envelope,
    gate: Gate,
    pitch_decay: f32,
    octaves: f32,
    phase: f32,
    freq: f32,
    start_freq: f32,
    elapsed: f32, // seconds since trigger
    amp: f32,
    gain: f32,
}

impl Membrane {
    pub fn new(pitch_decay: f32, octaves: f32, adsr: Adsr, gain: f32, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            env: Envelope::new(adsr, sample_rate),
            gate: Gate::default(),
            pitch_decay,
            octaves,
            phase: 0.0,
            freq: 0.0,
            start_freq: 0.0,
            elapsed: 0.0,
            amp: 0.0,
            gain,
        }
    }

    fn current_freq(&self) -> f32 {
        if self.elapsed >= self.pitch_decay {
            return self.freq;
        }
        let t = self.elapsed / self.pitch_decay;
        self.start_freq * (self.freq / self.start_freq).powf(t)
    }
}

impl Instrument for Membrane {
    fn trigger(&mut self, pitch: Option<f32>, duration: f32, velocity: f32) {
        self.freq = pitch.unwrap_or(32.7);
        self.start_freq = self.freq * self.octaves.max(1.0);
        self.elapsed = 0.0;
        self.phase = 0.0;
        self.amp = velocity;
        self.gate.open(duration, self.sample_rate);
        self.env.gate_on();
    }

    fn render_into(&mut self, out: &mut [StereoFrame]) {
        if self.env.is_idle() {
            return;
        }
        let dt = 1.0 / self.sample_rate;
        for f in out.iter_mut() {
            if self.gate.tick() {
                self.env.gate_off();
            }
            let level = self.env.next();
            let s = (self.phase * TAU).sin() * level * self.amp * self.gain;
            f.left += s;
            f.right += s;

            self.phase += self.current_freq() * dt;
            self.phase -= self.phase.floor();
            self.elapsed += dt;
            if self.env.is_idle() {
                break;
            }
        }
    }

    fn silence(&mut self) {
        self.env.reset();
        self.gate = Gate::default();
    }

    fn is_sounding(&self) -> bool {
        !self.env.is_idle()
    }
}

// ── Metal (hats) ───────────────────────────────────────────────────

// inharmonic ratios of a struck cymbal
const METAL_RATIOS: [f32; 6] = [1.0, 1.483, 1.932, 2.546, 2.63, 3.897];

/// Six square partials at cymbal ratios through a highpass.
pub struct Metal {
    sample_rate: f32,
    env: Envelope,
    gate: Gate,
    phases: [f32; 6],
    incs: [f32; 6],
    highpass: Biquad,
    amp: f32,
    gain: f32,
}

impl Metal {
    pub fn new(frequency: f32, octaves: f32, resonance: f32, adsr: Adsr, gain: f32, sample_rate: f32) -> Self {
        // `octaves` spreads the partials upward, like widening the metal's body
        let spread = 1.0 + octaves * 0.1;
        let incs = METAL_RATIOS.map(|r| frequency * r * spread / sample_rate);
        Self {
            sample_rate,
            env: Envelope::new(adsr, sample_rate),
            gate: Gate::default(),
            phases: [0.0; 6],
            incs,
            highpass: Biquad::new(FilterKind::HighPass, resonance, 0.9, sample_rate),
            amp: 0.0,
            gain,
        }
    }
}

impl Instrument for Metal {
    fn trigger(&mut self, _pitch: Option<f32>, duration: f32, velocity: f32) {
        self.amp = velocity;
        self.gate.open(duration, self.sample_rate);
        self.env.gate_on();
    }

    fn render_into(&mut self, out: &mut [StereoFrame]) {
        if self.env.is_idle() {
            return;
        }
        for f in out.iter_mut() {
            if self.gate.tick() {
                self.env.gate_off();
            }
            let mut raw = 0.0;
            for (phase, inc) in self.phases.iter_mut().zip(self.incs) {
                raw += if *phase < 0.5 { 1.0 } else { -1.0 };
                *phase += inc;
                *phase -= phase.floor();
            }
            let level = self.env.next();
            let s = self.highpass.process(raw / 6.0) * level * self.amp * self.gain;
            f.left += s;
            f.right += s;
            if self.env.is_idle() {
                break;
            }
        }
    }

    fn silence(&mut self) {
        self.env.reset();
        self.gate = Gate::default();
        self.highpass.reset();
    }

    fn is_sounding(&self) -> bool {
        !self.env.is_idle()
    }
}

// ── Noise (clap, riser) ────────────────────────────────────────────

/// White noise through an envelope.
pub struct Noise {
    sample_rate: f32,
    env: Envelope,
    gate: Gate,
    rng: SmallRng,
    amp: f32,
    gain: f32,
}

impl Noise {
    pub fn new(adsr: Adsr, gain: f32, seed: u64, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            env: Envelope::new(adsr, sample_rate),
            gate: Gate::default(),
            rng: SmallRng::seed_from_u64(seed),
            amp: 0.0,
            gain,
        }
    }
}

impl Instrument for Noise {
    fn trigger(&mut self, _pitch: Option<f32>, duration: f32, velocity: f32) {
        self.amp = velocity;
        self.gate.open(duration, self.sample_rate);
        self.env.gate_on();
    }

    fn render_into(&mut self, out: &mut [StereoFrame]) {
        if self.env.is_idle() {
            return;
        }
        for f in out.iter_mut() {
            if self.gate.tick() {
                self.env.gate_off();
            }
            let level = self.env.next();
            let n: f32 = self.rng.gen_range(-1.0..1.0);
            let s = n * level * self.amp * self.gain;
            f.left += s;
            f.right += s;
            if self.env.is_idle() {
                break;
            }
        }
    }

    fn silence(&mut self) {
        self.env.reset();
        self.gate = Gate::default();
    }

    fn is_sounding(&self) -> bool {
        !self.env.is_idle()
    }
}

// ── FM poly (chords) ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FmParams {
    pub harmonicity: f32,
    pub modulation_index: f32,
    pub envelope: Adsr,
    pub modulation_envelope: Adsr,
}

struct FmVoice {
    env: Envelope,
    mod_env: Envelope,
    gate: Gate,
    carrier_phase: f32,
    mod_phase: f32,
    freq: f32,
    amp: f32,
    age: u64, // trigger order, for stealing the oldest
}

impl FmVoice {
    fn alive(&self) -> bool {
        !self.env.is_idle()
    }
}

// triangle in -1..1 from a 0..1 phase
#[inline]
fn triangle(phase: f32) -> f32 {
    if phase < 0.5 { phase * 4.0 - 1.0 } else { 3.0 - phase * 4.0 }
}

/// Two-operator FM: triangle modulator at `harmonicity` × the note driving a
/// sine carrier. Fixed pool of voices, oldest stolen when full.
pub struct FmPoly {
    sample_rate: f32,
    params: FmParams,
    voices: Vec<FmVoice>,
    triggered: u64,
    gain: f32,
}

impl FmPoly {
    pub fn new(params: FmParams, gain: f32, sample_rate: f32) -> Self {
        let voices = (0..MAX_POLY_VOICES)
            .map(|_| FmVoice {
                env: Envelope::new(params.envelope, sample_rate),
                mod_env: Envelope::new(params.modulation_envelope, sample_rate),
                gate: Gate::default(),
                carrier_phase: 0.0,
                mod_phase: 0.0,
                freq: 0.0,
                amp: 0.0,
                age: 0,
            })
            .collect();
        Self { sample_rate, params, voices, triggered: 0, gain }
    }

    #[cfg(test)]
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.alive()).count()
    }
}

impl Instrument for FmPoly {
    fn trigger(&mut self, pitch: Option<f32>, duration: f32, velocity: f32) {
        let Some(freq) = pitch else { return };

        // what slot do we write to?
        let slot = self
            .voices
            .iter()
            .position(|v| !v.alive())
            .or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, v)| v.age)
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);

        self.triggered += 1;
        let v = &mut self.voices[slot];
        v.freq = freq;
        v.amp = velocity;
        v.age = self.triggered;
        v.carrier_phase = 0.0;
        v.mod_phase = 0.0;
        v.env.reset();
        v.mod_env.reset();
        v.env.gate_on();
        v.mod_env.gate_on();
        v.gate.open(duration, self.sample_rate);
    }

    fn render_into(&mut self, out: &mut [StereoFrame]) {
        let dt = 1.0 / self.sample_rate;
        let p = self.params;
        for v in self.voices.iter_mut().filter(|v| v.alive()) {
            let mod_freq = v.freq * p.harmonicity;
            for f in out.iter_mut() {
                if v.gate.tick() {
                    v.env.gate_off();
                    v.mod_env.gate_off();
                }
                let m = triangle(v.mod_phase) * v.mod_env.next();
                // frequency deviation = index × modulator frequency
                let inst = v.freq + m * p.modulation_index * mod_freq;
                let s = (v.carrier_phase * TAU).sin() * v.env.next() * v.amp * self.gain;
                f.left += s;
                f.right += s;

                v.carrier_phase += inst * dt;
                v.carrier_phase -= v.carrier_phase.floor();
                v.mod_phase += mod_freq * dt;
                v.mod_phase -= v.mod_phase.floor();
                if v.env.is_idle() {
                    break;
                }
            }
        }
    }

    fn silence(&mut self) {
        for v in self.voices.iter_mut() {
            v.env.reset();
            v.mod_env.reset();
            v.gate = Gate::default();
        }
    }

    fn is_sounding(&self) -> bool {
        self.voices.iter().any(|v| v.alive())
    }
}

// ── Mono (bass) ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonoParams {
    pub envelope: Adsr,
    pub filter_q: f32,
    pub filter_envelope: Adsr,
    pub base_frequency: f32,
    pub octaves: f32,
}

/// Mono synth: an 8-partial triangle through a lowpass whose cutoff follows
/// its own envelope from `base_frequency` up `octaves`.
pub struct Mono {
    sample_rate: f32,
    params: MonoParams,
    env: Envelope,
    filter_env: Envelope,
    gate: Gate,
    filter: Biquad,
    phase: f32,
    freq: f32,
    amp: f32,
    gain: f32,
}

impl Mono {
    pub fn new(params: MonoParams, gain: f32, sample_rate: f32) -> Self {
        Self {
            sample_rate,
            params,
            env: Envelope::new(params.envelope, sample_rate),
            filter_env: Envelope::new(params.filter_envelope, sample_rate),
            gate: Gate::default(),
            filter: Biquad::new(FilterKind::LowPass, params.base_frequency, params.filter_q, sample_rate),
            phase: 0.0,
            freq: 0.0,
            amp: 0.0,
            gain,
        }
    }

    // odd harmonics up to the 8th, alternating sign, 1/n² falloff
    #[inline]
    fn triangle8(phase: f32) -> f32 {
        let mut s = 0.0;
        for (k, n) in [1.0f32, 3.0, 5.0, 7.0].into_iter().enumerate() {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            s += sign * (phase * TAU * n).sin() / (n * n);
        }
        s * 8.0 / (std::f32::consts::PI * std::f32::consts::PI)
    }
}

impl Instrument for Mono {
    fn trigger(&mut self, pitch: Option<f32>, duration: f32, velocity: f32) {
        let Some(freq) = pitch else { return };
        self.freq = freq;
        self.amp = velocity;
        self.env.gate_on();
        self.filter_env.gate_on();
        self.gate.open(duration, self.sample_rate);
    }

    fn render_into(&mut self, out: &mut [StereoFrame]) {
        if self.env.is_idle() {
            return;
        }
        let dt = 1.0 / self.sample_rate;
        let p = self.params;
        for f in out.iter_mut() {
            if self.gate.tick() {
                self.env.gate_off();
                self.filter_env.gate_off();
            }
            let cutoff = p.base_frequency * 2.0_f32.powf(p.octaves * self.filter_env.next());
            self.filter.set(cutoff, p.filter_q, self.sample_rate);

            let raw = Self::triangle8(self.phase);
            let s = self.filter.process(raw) * self.env.next() * self.amp * self.gain;
            f.left += s;
            f.right += s;

            self.phase += self.freq * dt;
            self.phase -= self.phase.floor();
            if self.env.is_idle() {
                break;
            }
        }
    }

    fn silence(&mut self) {
        self.env.reset();
        self.filter_env.reset();
        self.gate = Gate::default();
        self.filter.reset();
    }

    fn is_sounding(&self) -> bool {
        !self.env.is_idle()
    }
}
