// ============================================================
// Layer 5 — Learning-Rate Schedule
// ============================================================
//   lr(step) = base_lr × warmup(step) × decay(step)
//
// Warm-up (only while step < warmup_steps, 1.0 afterwards):
//   linear       (step + 1) / warmup_steps
//   inverse_exp  0.01 ^ ((warmup_steps - step) / warmup_steps)
//
// Decay (t = steps since decay_start_step, 1.0 before it):
//   exponential   rate ^ (t / decay_steps)
//   inverse_time  1 / (1 + rate × t / decay_steps)
//   cosine        0.5 × (1 + cos(π × min(t, decay_steps) / decay_steps))

use std::f64::consts::PI;

use burn::prelude::*;

use crate::domain::{
    error::ConfigError,
    options::{DecayKind, WarmupKind},
};

#[derive(Config, Debug)]
pub struct LrScheduleConfig {
    pub base_lr:          f64,
    #[config(default = "WarmupKind::None")]
    pub warmup:           WarmupKind,
    #[config(default = 0)]
    pub warmup_steps:     usize,
    #[config(default = "DecayKind::None")]
    pub decay:            DecayKind,
    #[config(default = 0)]
    pub decay_start_step: usize,
    #[config(default = 1000)]
    pub decay_steps:      usize,
    #[config(default = 0.96)]
    pub decay_rate:       f64,
}

impl LrScheduleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_lr.is_finite() && self.base_lr > 0.0) {
            return Err(ConfigError::NonPositive { name: "learning rate", value: self.base_lr });
        }
        if self.warmup != WarmupKind::None {
            ConfigError::check_positive("warm-up steps", self.warmup_steps)?;
        }
        if self.decay != DecayKind::None {
            ConfigError::check_positive("decay steps", self.decay_steps)?;
            if !(self.decay_rate.is_finite() && self.decay_rate > 0.0) {
                return Err(ConfigError::NonPositive { name: "decay rate", value: self.decay_rate });
            }
        }
        Ok(())
    }

    pub fn warmup_factor(&self, step: usize) -> f64 {
        if step >= self.warmup_steps {
            return 1.0;
        }
        let total = self.warmup_steps as f64;
        match self.warmup {
            WarmupKind::None => 1.0,
            WarmupKind::Linear => (step + 1) as f64 / total,
            WarmupKind::InverseExp => 0.01_f64.powf((total - step as f64) / total),
        }
    }

    pub fn decay_factor(&self, step: usize) -> f64 {
        if step < self.decay_start_step {
            return 1.0;
        }
        let t = (step - self.decay_start_step) as f64;
        let period = self.decay_steps as f64;
        match self.decay {
            DecayKind::None => 1.0,
            DecayKind::Exponential => self.decay_rate.powf(t / period),
            DecayKind::InverseTime => 1.0 / (1.0 + self.decay_rate * t / period),
            DecayKind::Cosine => 0.5 * (1.0 + (PI * t.min(period) / period).cos()),
        }
    }

    pub fn learning_rate(&self, step: usize) -> f64 {
        self.base_lr * self.warmup_factor(step) * self.decay_factor(step)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_constant_without_warmup_or_decay() {
        let schedule = LrScheduleConfig::new(1e-3);
        assert!(close(schedule.learning_rate(0), 1e-3));
        assert!(close(schedule.learning_rate(10_000), 1e-3));
    }

    #[test]
    fn test_linear_warmup_ramps_to_base() {
        let schedule = LrScheduleConfig::new(1.0)
            .with_warmup(WarmupKind::Linear)
            .with_warmup_steps(4);
        let lrs: Vec<f64> = (0..6).map(|s| schedule.learning_rate(s)).collect();
        assert!(close(lrs[0], 0.25));
        assert!(close(lrs[3], 1.0));
        assert!(close(lrs[5], 1.0));
    }

    #[test]
    fn test_inverse_exp_warmup_starts_at_one_percent() {
        let schedule = LrScheduleConfig::new(1.0)
            .with_warmup(WarmupKind::InverseExp)
            .with_warmup_steps(100);
        assert!(close(schedule.warmup_factor(0), 0.01));
        assert!(schedule.warmup_factor(50) > schedule.warmup_factor(10));
        assert!(close(schedule.warmup_factor(100), 1.0));
    }

    #[test]
    fn test_decay_formulas() {
        let base = LrScheduleConfig::new(1.0).with_decay_steps(10).with_decay_rate(0.5);

        let exponential = base.clone().with_decay(DecayKind::Exponential);
        assert!(close(exponential.learning_rate(20), 0.25));

        let inverse = base.clone().with_decay(DecayKind::InverseTime);
        assert!(close(inverse.learning_rate(20), 0.5));

        let cosine = base.with_decay(DecayKind::Cosine);
        assert!(close(cosine.learning_rate(0), 1.0));
        assert!(close(cosine.learning_rate(5), 0.5));
        assert!(close(cosine.learning_rate(10), 0.0));
        assert!(close(cosine.learning_rate(50), 0.0));
    }

    #[test]
    fn test_decay_waits_for_start_step() {
        let schedule = LrScheduleConfig::new(1.0)
            .with_decay(DecayKind::Exponential)
            .with_decay_start_step(100)
            .with_decay_steps(10)
            .with_decay_rate(0.5);
        assert!(close(schedule.learning_rate(99), 1.0));
        assert!(close(schedule.learning_rate(110), 0.5));
    }

    #[test]
    fn test_invalid_schedules_are_rejected() {
        assert!(matches!(
            LrScheduleConfig::new(0.0).validate(),
            Err(ConfigError::NonPositive { .. })
        ));
        assert!(matches!(
            LrScheduleConfig::new(1e-3).with_warmup(WarmupKind::Linear).validate(),
            Err(ConfigError::ZeroDimension { .. })
        ));
    }
}
