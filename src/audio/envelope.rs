// ADSR envelope, one sample at a time.
//
// Attack is a linear rise to 1.0, decay a linear fall to the sustain level,
// release a linear fall from wherever the envelope was to 0.0. Retriggering
// restarts the attack from the current level so there's no click.

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Adsr {
    pub attack: f32,  // seconds
    pub decay: f32,   // seconds
    pub sustain: f32, // 0.0 to 1.0
    pub release: f32, // seconds
}

impl Adsr {
    pub const fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self { attack, decay, sustain, release }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Clone, Debug)]
pub struct Envelope {
    params: Adsr,
    stage: Stage,
    level: f32,
    // per-sample increments, precomputed
    attack_step: f32,
    decay_step: f32,
    release_step: f32,
    sample_rate: f32,
}

impl Envelope {
    pub fn new(params: Adsr, sample_rate: f32) -> Self {
        let mut env = Self {
            params,
            stage: Stage::Idle,
            level: 0.0,
            attack_step: 0.0,
            decay_step: 0.0,
            release_step: 0.0,
            sample_rate,
        };
        env.attack_step = 1.0 / env.samples(params.attack);
        env.decay_step = (1.0 - params.sustain) / env.samples(params.decay);
        env
    }

    fn samples(&self, secs: f32) -> f32 {
        (secs * self.sample_rate).max(1.0)
    }

    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
    }

    pub fn gate_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        self.stage = Stage::Release;
        self.release_step = self.level / self.samples(self.params.release);
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    #[cfg(test)]
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn next(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => {}
            Stage::Attack => {
                self.level += self.attack_step;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                self.level -= self.decay_step;
                if self.level <= self.params.sustain {
                    self.level = self.params.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {
                // a zero sustain has nothing left to hold
                if self.params.sustain <= 0.0 {
                    self.reset();
                }
            }
            Stage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 {
                    self.reset();
                }
            }
        }
        self.level
    }
}
