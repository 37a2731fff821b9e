use std::f32::consts::TAU;

use super::frame::StereoFrame;

// Insert effects that sit between a voice and the master bus.
// Everything is sized at construction; process() never allocates.
pub trait Effect: Send {
    fn process(&mut self, buf: &mut [StereoFrame]);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
}

// RBJ cookbook biquad, transposed direct form II, one channel.
#[derive(Clone, Copy, Debug)]
pub struct Biquad {
    kind: FilterKind,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn new(kind: FilterKind, cutoff: f32, q: f32, sample_rate: f32) -> Self {
        let mut bq = Self { kind, b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0, z1: 0.0, z2: 0.0 };
        bq.set(cutoff, q, sample_rate);
        bq
    }

    pub fn set(&mut self, cutoff: f32, q: f32, sample_rate: f32) {
        // keep clear of DC and nyquist so the coefficients stay stable
        let cutoff = cutoff.clamp(10.0, (sample_rate * 0.45).max(10.0));
        let w0 = TAU * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q.max(0.05));
        let a0 = 1.0 + alpha;
        let (b0, b1, b2) = match self.kind {
            FilterKind::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterKind::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

// Sine LFO between two values; used to sweep the bass filter.
#[derive(Clone, Copy, Debug)]
pub struct Lfo {
    phase: f32,
    inc: f32,
    min: f32,
    max: f32,
}

impl Lfo {
    pub fn new(rate_hz: f32, min: f32, max: f32, sample_rate: f32) -> Self {
        Self { phase: 0.0, inc: rate_hz / sample_rate, min, max }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let unit = 0.5 + 0.5 * (self.phase * TAU).sin();
        self.phase += self.inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        self.min + (self.max - self.min) * unit
    }
}

// how many biquads deep a rolloff is: -12 dB/oct per stage
const MAX_STAGES: usize = 2;

pub struct Filter {
    stages: [[Biquad; 2]; MAX_STAGES], // [stage][channel]
    num_stages: usize,
    cutoff: f32,
    q: f32,
    sample_rate: f32,
    lfo: Option<Lfo>,
}

impl Filter {
    /// `rolloff_db` is -12 or -24.
    pub fn new(kind: FilterKind, cutoff: f32, q: f32, rolloff_db: i32, sample_rate: f32) -> Self {
        let bq = Biquad::new(kind, cutoff, q, sample_rate);
        let num_stages = if rolloff_db <= -24 { 2 } else { 1 };
        Self {
            stages: [[bq; 2]; MAX_STAGES],
            num_stages,
            cutoff,
            q,
            sample_rate,
            lfo: None,
        }
    }

    pub fn with_lfo(mut self, lfo: Lfo) -> Self {
        self.lfo = Some(lfo);
        self
    }

    #[cfg(test)]
    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    fn retune(&mut self, cutoff: f32) {
        self.cutoff = cutoff;
        for stage in self.stages.iter_mut().take(self.num_stages) {
            for ch in stage.iter_mut() {
                ch.set(cutoff, self.q, self.sample_rate);
            }
        }
    }
}

impl Effect for Filter {
    fn process(&mut self, buf: &mut [StereoFrame]) {
        for f in buf.iter_mut() {
            if let Some(lfo) = self.lfo.as_mut() {
                let cutoff = lfo.next();
                self.retune(cutoff);
            }
            for stage in self.stages.iter_mut().take(self.num_stages) {
                f.left = stage[0].process(f.left);
                f.right = stage[1].process(f.right);
            }
        }
    }
}

// Modulated short delay, left and right LFOs a quarter cycle apart.
pub struct Chorus {
    line: Vec<StereoFrame>,
    write: usize,
    phase: f32,
    inc: f32,
    center: f32, // samples
    sweep: f32,  // samples
    wet: f32,
}

impl Chorus {
    pub fn new(rate_hz: f32, delay_ms: f32, depth: f32, wet: f32, sample_rate: f32) -> Self {
        let center = delay_ms * 0.001 * sample_rate;
        let sweep = center * depth.clamp(0.0, 1.0);
        let len = (center + sweep) as usize + 4;
        Self {
            line: vec![StereoFrame::zero(); len],
            write: 0,
            phase: 0.0,
            inc: rate_hz / sample_rate,
            center,
            sweep,
            wet: wet.clamp(0.0, 1.0),
        }
    }

    fn read(&self, delay: f32) -> StereoFrame {
        let len = self.line.len();
        let pos = self.write as f32 + len as f32 - delay;
        let i = pos as usize;
        let frac = pos - i as f32;
        let a = self.line[i % len];
        let b = self.line[(i + 1) % len];
        StereoFrame {
            left: a.left + (b.left - a.left) * frac,
            right: a.right + (b.right - a.right) * frac,
        }
    }
}

impl Effect for Chorus {
    fn process(&mut self, buf: &mut [StereoFrame]) {
        let len = self.line.len();
        for f in buf.iter_mut() {
            self.line[self.write] = *f;

            let dl = self.center + self.sweep * (self.phase * TAU).sin();
            let dr = self.center + self.sweep * ((self.phase + 0.25) * TAU).sin();
            let left = self.read(dl.max(1.0)).left;
            let right = self.read(dr.max(1.0)).right;

            f.left = f.left * (1.0 - self.wet) + left * self.wet;
            f.right = f.right * (1.0 - self.wet) + right * self.wet;

            self.write = (self.write + 1) % len;
            self.phase += self.inc;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }
}

struct Comb {
    buf: Vec<f32>,
    pos: usize,
    feedback: f32,
}

impl Comb {
    fn new(len: usize, feedback: f32) -> Self {
        Self { buf: vec![0.0; len.max(1)], pos: 0, feedback }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = self.buf[self.pos];
        self.buf[self.pos] = x + y * self.feedback;
        self.pos = (self.pos + 1) % self.buf.len();
        y
    }
}

struct Allpass {
    buf: Vec<f32>,
    pos: usize,
}

impl Allpass {
    const GAIN: f32 = 0.5;

    fn new(len: usize) -> Self {
        Self { buf: vec![0.0; len.max(1)], pos: 0 }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let delayed = self.buf[self.pos];
        let y = delayed - Self::GAIN * x;
        self.buf[self.pos] = x + Self::GAIN * delayed;
        self.pos = (self.pos + 1) % self.buf.len();
        y
    }
}

// Schroeder reverb. Comb feedback is derived from the decay time so the
// tail falls 60 dB in `decay` seconds.
pub struct Reverb {
    combs: [Comb; 4],
    allpasses: [Allpass; 2],
    wet: f32,
}

impl Reverb {
    // Freeverb's tunings at 44.1 kHz, scaled to the actual rate
    const COMB_SAMPLES: [usize; 4] = [1116, 1188, 1277, 1356];
    const ALLPASS_SAMPLES: [usize; 2] = [556, 441];

    pub fn new(decay: f32, wet: f32, sample_rate: f32) -> Self {
        let scale = sample_rate / 44_100.0;
        let decay = decay.max(0.05);
        let combs = Self::COMB_SAMPLES.map(|n| {
            let len = (n as f32 * scale) as usize;
            let delay_secs = len as f32 / sample_rate;
            let feedback = 10.0_f32.powf(-3.0 * delay_secs / decay);
            Comb::new(len, feedback)
        });
        let allpasses = Self::ALLPASS_SAMPLES.map(|n| Allpass::new((n as f32 * scale) as usize));
        Self { combs, allpasses, wet: wet.clamp(0.0, 1.0) }
    }
}

impl Effect for Reverb {
    fn process(&mut self, buf: &mut [StereoFrame]) {
        for f in buf.iter_mut() {
            let input = (f.left + f.right) * 0.5;
            let mut acc = 0.0;
            for comb in self.combs.iter_mut() {
                acc += comb.process(input);
            }
            let mut tail = acc * 0.25;
            for ap in self.allpasses.iter_mut() {
                tail = ap.process(tail);
            }
            f.left = f.left * (1.0 - self.wet) + tail * self.wet;
            f.right = f.right * (1.0 - self.wet) + tail * self.wet;
        }
    }
}
