//! Sample-accurate ADSR envelope.
//!
//! Ported from the project's original C++ `Envelope` class with one deliberate behavioural change
//! (see [`Envelope::trigger`]): retriggering restarts `ATTACK` from the *current* level rather than
//! from zero, so stealing or retriggering a playing voice never clicks.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    phase: Phase,
    current_level: f32,

    attack_ms: f32,
    decay_ms: f32,
    sustain_level: f32,
    release_ms: f32,

    attack_samples: u32,
    decay_samples: u32,
    release_samples: u32,
    last_sample_rate: f32,

    phase_sample_count: u32,
    release_start_level: f32,

    /// Level ATTACK started from this time around; normally 0, but non-zero on a retrigger.
    attack_start_level: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            current_level: 0.0,
            attack_ms: 0.0,
            decay_ms: 0.0,
            sustain_level: 1.0,
            release_ms: 10.0,
            attack_samples: 0,
            decay_samples: 0,
            release_samples: 0,
            last_sample_rate: 0.0,
            phase_sample_count: 0,
            release_start_level: 0.0,
            attack_start_level: 0.0,
        }
    }

    pub fn set_attack_ms(&mut self, ms: f32) {
        self.attack_ms = ms.max(0.0);
        if self.last_sample_rate > 0.0 {
            self.attack_samples = ms_to_samples(self.attack_ms, self.last_sample_rate);
        }
    }

    pub fn set_decay_ms(&mut self, ms: f32) {
        self.decay_ms = ms.max(0.0);
        if self.last_sample_rate > 0.0 {
            self.decay_samples = ms_to_samples(self.decay_ms, self.last_sample_rate);
        }
    }

    pub fn set_sustain_level(&mut self, level: f32) {
        self.sustain_level = level.clamp(0.0, 1.0);
    }

    pub fn set_release_ms(&mut self, ms: f32) {
        self.release_ms = ms.max(0.0);
        if self.last_sample_rate > 0.0 {
            self.release_samples = ms_to_samples(self.release_ms, self.last_sample_rate);
        }
    }

    pub fn attack_ms(&self) -> f32 {
        self.attack_ms
    }
    pub fn decay_ms(&self) -> f32 {
        self.decay_ms
    }
    pub fn sustain_level(&self) -> f32 {
        self.sustain_level
    }
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    /// Start (or restart) the envelope. Restarting from any non-idle phase begins `ATTACK` from
    /// the current level rather than zero, avoiding a click on retrigger or voice stealing.
    pub fn trigger(&mut self) {
        self.attack_start_level = self.current_level;
        self.phase = Phase::Attack;
        self.phase_sample_count = 0;
    }

    /// Begin the release phase, capturing the current level as the point the fade starts from.
    pub fn release(&mut self) {
        if self.phase != Phase::Idle && self.phase != Phase::Release {
            self.release_start_level = self.current_level;
            self.phase = Phase::Release;
            self.phase_sample_count = 0;
        }
    }

    /// Force the envelope back to idle immediately (abrupt, no fade).
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.phase_sample_count = 0;
        self.current_level = 0.0;
        self.release_start_level = 0.0;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn current_level(&self) -> f32 {
        self.current_level
    }

    /// Advance the envelope by exactly one sample and return the new gain.
    ///
    /// Must be called once per output sample, per voice, from the audio callback.
    pub fn process_sample(&mut self, sample_rate: f32) -> f32 {
        if (sample_rate - self.last_sample_rate).abs() > 1.0 {
            self.recalculate_sample_parameters(sample_rate);
        }

        match self.phase {
            Phase::Idle => {}
            Phase::Attack => {
                if self.attack_samples > 0 {
                    let progress =
                        self.phase_sample_count as f32 / self.attack_samples as f32;
                    self.current_level =
                        self.attack_start_level + progress * (1.0 - self.attack_start_level);
                    self.phase_sample_count += 1;
                    if self.phase_sample_count >= self.attack_samples {
                        self.current_level = 1.0;
                        self.phase = Phase::Decay;
                        self.phase_sample_count = 0;
                    }
                } else {
                    self.current_level = 1.0;
                    self.phase = Phase::Decay;
                    self.phase_sample_count = 0;
                }
            }
            Phase::Decay => {
                if self.decay_samples > 0 {
                    let progress = self.phase_sample_count as f32 / self.decay_samples as f32;
                    self.current_level = 1.0 - progress * (1.0 - self.sustain_level);
                    self.phase_sample_count += 1;
                    if self.phase_sample_count >= self.decay_samples {
                        self.current_level = self.sustain_level;
                        self.phase = Phase::Sustain;
                        self.phase_sample_count = 0;
                    }
                } else {
                    self.current_level = self.sustain_level;
                    self.phase = Phase::Sustain;
                    self.phase_sample_count = 0;
                }
            }
            Phase::Sustain => {
                self.current_level = self.sustain_level;
            }
            Phase::Release => {
                if self.release_samples > 0 {
                    let progress = self.phase_sample_count as f32 / self.release_samples as f32;
                    self.current_level = self.release_start_level * (1.0 - progress);
                    self.phase_sample_count += 1;
                    if self.phase_sample_count >= self.release_samples || self.current_level <= 0.0
                    {
                        self.current_level = 0.0;
                        self.phase = Phase::Idle;
                        self.phase_sample_count = 0;
                        self.release_start_level = 0.0;
                    }
                } else {
                    self.current_level = 0.0;
                    self.phase = Phase::Idle;
                    self.phase_sample_count = 0;
                    self.release_start_level = 0.0;
                }
            }
        }

        self.current_level.clamp(0.0, 1.0)
    }

    fn recalculate_sample_parameters(&mut self, sample_rate: f32) {
        self.attack_samples = ms_to_samples(self.attack_ms, sample_rate);
        self.decay_samples = ms_to_samples(self.decay_ms, sample_rate);
        self.release_samples = ms_to_samples(self.release_ms, sample_rate);
        self.last_sample_rate = sample_rate;
    }
}

fn ms_to_samples(ms: f32, sample_rate: f32) -> u32 {
    (ms * sample_rate / 1000.0).round().max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_outputs_zero() {
        let mut env = Envelope::new();
        assert_eq!(env.process_sample(44100.0), 0.0);
        assert_eq!(env.phase(), Phase::Idle);
        assert!(!env.is_active());
    }

    #[test]
    fn zero_length_phases_transition_same_sample() {
        let mut env = Envelope::new();
        env.set_attack_ms(0.0);
        env.set_decay_ms(0.0);
        env.set_sustain_level(0.5);
        env.set_release_ms(0.0);
        env.trigger();
        // Attack, decay instantly collapse to sustain on the very first sample.
        let g = env.process_sample(44100.0);
        assert_eq!(g, 0.5);
        assert_eq!(env.phase(), Phase::Sustain);
    }

    #[test]
    fn attack_ramps_linearly_to_one() {
        let mut env = Envelope::new();
        env.set_attack_ms(10.0);
        env.set_decay_ms(0.0);
        env.set_sustain_level(1.0);
        env.trigger();
        let sr = 1000.0; // 10ms = 10 samples
        let mut last = -1.0;
        for _ in 0..10 {
            let g = env.process_sample(sr);
            assert!(g >= last);
            last = g;
        }
        assert_eq!(env.phase(), Phase::Sustain);
        assert_eq!(last, 1.0);
    }

    #[test]
    fn gain_never_exceeds_one() {
        let mut env = Envelope::new();
        env.set_attack_ms(5.0);
        env.set_decay_ms(5.0);
        env.set_sustain_level(0.8);
        env.set_release_ms(5.0);
        env.trigger();
        for _ in 0..1000 {
            let g = env.process_sample(44100.0);
            assert!((0.0..=1.0).contains(&g));
        }
    }

    #[test]
    fn release_completes_to_idle_and_zero() {
        let mut env = Envelope::new();
        env.set_attack_ms(0.0);
        env.set_decay_ms(0.0);
        env.set_sustain_level(1.0);
        env.set_release_ms(10.0);
        env.trigger();
        env.process_sample(1000.0); // enters sustain
        env.release();
        let mut g = 1.0;
        for _ in 0..20 {
            g = env.process_sample(1000.0);
            if env.phase() == Phase::Idle {
                break;
            }
        }
        assert_eq!(g, 0.0);
        assert_eq!(env.phase(), Phase::Idle);
        assert!(!env.is_active());
    }

    #[test]
    fn retrigger_during_release_starts_from_current_level_not_zero() {
        let mut env = Envelope::new();
        env.set_attack_ms(0.0);
        env.set_decay_ms(0.0);
        env.set_sustain_level(1.0);
        env.set_release_ms(100.0);
        env.trigger();
        env.process_sample(1000.0);
        env.release();
        // Run partway through release so current_level is somewhere between 0 and 1.
        let mid_level = env.process_sample(1000.0);
        assert!(mid_level > 0.0 && mid_level < 1.0);

        env.trigger();
        assert_eq!(env.phase(), Phase::Attack);
        // The very first sample of the new attack must not have dropped to zero: it continues
        // from mid_level, climbing back towards 1.0.
        let first_new_sample = env.process_sample(1000.0);
        assert!(first_new_sample >= mid_level);
    }

    #[test]
    fn sample_rate_change_recomputes_phase_samples() {
        let mut env = Envelope::new();
        env.set_attack_ms(10.0);
        env.trigger();
        env.process_sample(1000.0);
        // Changing sample rate mid-flight should not panic and should keep gain in range.
        let g = env.process_sample(2000.0);
        assert!((0.0..=1.0).contains(&g));
    }
}
