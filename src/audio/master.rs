use super::frame::StereoFrame;

// The single gain stage everything is summed into. Unity during normal
// playback; only the break/drop ramps it.
#[derive(Clone, Debug)]
pub struct MasterBus {
    gain: f32,
    target: f32,
    step: f32,       // per-sample increment while ramping
    remaining: u32,  // samples left in the current ramp
    sample_rate: f32,
}

impl MasterBus {
    pub fn new(sample_rate: f32) -> Self {
        Self { gain: 1.0, target: 1.0, step: 0.0, remaining: 0, sample_rate }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[cfg(test)]
    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }

    /// Linear ramp from wherever the gain is now to `target`.
    pub fn ramp_to(&mut self, target: f32, secs: f32) {
        let samples = (secs * self.sample_rate).round() as u32;
        self.target = target;
        if samples == 0 {
            self.gain = target;
            self.remaining = 0;
            return;
        }
        self.step = (target - self.gain) / samples as f32;
        self.remaining = samples;
    }

    pub fn process(&mut self, buf: &mut [StereoFrame]) {
        for f in buf.iter_mut() {
            if self.remaining > 0 {
                self.remaining -= 1;
                self.gain = if self.remaining == 0 { self.target } else { self.gain + self.step };
            }
            f.left *= self.gain;
            f.right *= self.gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_unity_and_passes_audio_through() {
        let mut bus = MasterBus::new(1000.0);
        let mut buf = vec![StereoFrame::mono(0.5); 4];
        bus.process(&mut buf);
        assert_eq!(buf[3], StereoFrame::mono(0.5));
    }

    #[test]
    fn ramp_lands_exactly_on_target() {
        let mut bus = MasterBus::new(1000.0);
        bus.ramp_to(0.0, 0.05);
        let mut buf = vec![StereoFrame::mono(1.0); 50];
        bus.process(&mut buf);
        assert_eq!(bus.gain(), 0.0);
        assert!(!bus.is_ramping());
        // halfway through the fade-out
        assert!((buf[24].left - 0.5).abs() < 0.03);
        // monotonic fade, no clicks
        assert!(buf.windows(2).all(|w| w[1].left <= w[0].left));
    }

    #[test]
    fn ramp_starts_from_the_current_value() {
        let mut bus = MasterBus::new(1000.0);
        bus.ramp_to(0.0, 0.01);
        let mut buf = vec![StereoFrame::zero(); 5];
        bus.process(&mut buf);
        let midway = bus.gain();
        assert!(midway > 0.0 && midway < 1.0);
        bus.ramp_to(1.0, 0.02);
        let mut buf = vec![StereoFrame::zero(); 1];
        bus.process(&mut buf);
        assert!(bus.gain() > midway && bus.gain() < 1.0);
    }

    #[test]
    fn zero_length_ramp_jumps() {
        let mut bus = MasterBus::new(1000.0);
        bus.ramp_to(0.25, 0.0);
        assert_eq!(bus.gain(), 0.25);
    }
}
