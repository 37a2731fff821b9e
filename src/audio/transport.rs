// Shared clock for every loop: a sixteenth-note grid with swing.
//
// Times are absolute engine samples. The grid is anchored at the sample the
// transport started on; tick n sits at n sixteenths after that, and odd ticks
// are pushed late by the swing amount.

#[derive(Clone, Debug)]
pub struct Transport {
    bpm: f64,
    swing: f64,
    sample_rate: f64,
    started_at: Option<u64>,
    next_tick: u64, // index of the next tick that hasn't fired yet
}

impl Transport {
    pub fn new(bpm: f64, swing: f64, sample_rate: u32) -> Self {
        Self {
            bpm,
            swing: swing.clamp(0.0, 1.0),
            sample_rate: sample_rate as f64,
            started_at: None,
            next_tick: 0,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    #[cfg(test)]
    pub fn swing(&self) -> f64 {
        self.swing
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// No-op if already running.
    pub fn start(&mut self, now: u64) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
            self.next_tick = 0;
        }
    }

    pub fn stop(&mut self) {
        self.started_at = None;
        self.next_tick = 0;
    }

    pub fn sixteenth_secs(&self) -> f64 {
        60.0 / self.bpm / 4.0
    }

    // Odd sixteenths sit halfway through their swing pair, where the swing
    // curve peaks, so they're delayed by the full amount: a third of the
    // pair's length (two thirds of an eighth) scaled by `swing`.
    fn swing_secs(&self, tick: u64) -> f64 {
        if tick % 2 == 0 {
            return 0.0;
        }
        let pair = self.sixteenth_secs() * 2.0;
        pair / 3.0 * self.swing
    }

    /// Offset of tick `n` from the transport start, in samples.
    pub fn tick_offset(&self, tick: u64) -> u64 {
        let secs = tick as f64 * self.sixteenth_secs() + self.swing_secs(tick);
        (secs * self.sample_rate).round() as u64
    }

    /// Absolute sample of the next unfired tick.
    pub fn next_tick_at(&self) -> Option<u64> {
        self.started_at.map(|start| start + self.tick_offset(self.next_tick))
    }

    /// Consume the next tick if it's due at `now`; returns its index.
    pub fn take_due_tick(&mut self, now: u64) -> Option<u64> {
        let at = self.next_tick_at()?;
        if at > now {
            return None;
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        Some(tick)
    }
}
