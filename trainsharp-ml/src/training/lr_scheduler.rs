//! Per-epoch learning-rate schedules.

use super::optimizer::Optimizer;
use trainsharp_core::config::TrainConfig;
use trainsharp_core::{LrPolicy, Result, SharpError};

/// Relative improvement a plateau metric must make to count as progress.
pub const PLATEAU_THRESHOLD: f64 = 0.01;
/// Epochs without progress tolerated before a plateau decay.
pub const PLATEAU_PATIENCE: usize = 10;

/// Learning-rate schedule advanced once per epoch.
///
/// For every policy except `plateau` the rate is a closed form of the epoch
/// (see [`LrScheduler::lr_at`]). `plateau` watches a metric that should go
/// down and decays the rate once it stops improving.
#[derive(Debug, Clone, PartialEq)]
pub struct LrScheduler {
    policy: LrPolicy,
    base_lr: f64,
    gamma: f64,
    decay_epochs: Vec<usize>,
    epoch: usize,
    lr: f64,
    best: f64,
    num_bad_epochs: usize,
}

impl LrScheduler {
    pub fn new(policy: LrPolicy, base_lr: f64, gamma: f64, decay_epochs: Vec<usize>) -> Result<Self> {
        if !(base_lr.is_finite() && base_lr >= 0.0) {
            return Err(SharpError::invalid_argument(format!(
                "invalid base learning rate: {base_lr}"
            )));
        }
        if !(gamma.is_finite() && gamma >= 0.0) {
            return Err(SharpError::invalid_argument(format!(
                "invalid decay factor: {gamma}"
            )));
        }
        match policy {
            LrPolicy::Lambda | LrPolicy::Step => match decay_epochs.first() {
                None => {
                    return Err(SharpError::invalid_argument(format!(
                        "{policy} policy needs a decay epoch"
                    )));
                }
                Some(0) => {
                    return Err(SharpError::invalid_argument(format!(
                        "{policy} policy needs a positive decay epoch"
                    )));
                }
                Some(_) => {}
            },
            LrPolicy::MultiStep if decay_epochs.is_empty() => {
                return Err(SharpError::invalid_argument(
                    "multistep policy needs at least one milestone",
                ));
            }
            _ => {}
        }

        let mut scheduler = Self {
            policy,
            base_lr,
            gamma,
            decay_epochs,
            epoch: 0,
            lr: base_lr,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        };
        scheduler.lr = scheduler.lr_at(0);
        Ok(scheduler)
    }

    pub fn policy(&self) -> LrPolicy {
        self.policy
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    /// Number of completed [`step`](Self::step) calls.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Learning rate for the current epoch.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Closed-form learning rate at `epoch`. For `plateau` this is the
    /// current rate, since it depends on the metric history.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let lr0 = self.base_lr;
        let first = self.decay_epochs.first().copied().unwrap_or(1).max(1);
        match self.policy {
            LrPolicy::Lambda => lr0 * (1.0 - (epoch as f64 + 1.0) / first as f64).max(0.0),
            LrPolicy::Step => lr0 * self.gamma.powi((epoch / first) as i32),
            LrPolicy::MultiStep => {
                let passed = self.decay_epochs.iter().filter(|&&m| m <= epoch).count();
                lr0 * self.gamma.powi(passed as i32)
            }
            LrPolicy::Exp => lr0 * self.gamma.powi(epoch as i32),
            LrPolicy::Plateau => self.lr,
        }
    }

    /// Advance one epoch and return the new learning rate.
    ///
    /// `metric` is required by `plateau` and ignored otherwise.
    pub fn step(&mut self, metric: Option<f64>) -> Result<f64> {
        if self.policy == LrPolicy::Plateau {
            let metric = metric.ok_or_else(|| {
                SharpError::invalid_argument("plateau policy needs a metric to step")
            })?;
            if metric < self.best * (1.0 - PLATEAU_THRESHOLD) {
                self.best = metric;
                self.num_bad_epochs = 0;
            } else {
                self.num_bad_epochs += 1;
            }
            if self.num_bad_epochs > PLATEAU_PATIENCE {
                self.lr *= self.gamma;
                self.num_bad_epochs = 0;
                tracing::info!(epoch = self.epoch + 1, lr = self.lr, "Reducing learning rate on plateau");
            }
            self.epoch += 1;
        } else {
            self.epoch += 1;
            self.lr = self.lr_at(self.epoch);
        }
        Ok(self.lr)
    }

    /// Write the current rate into `optimizer`.
    pub fn apply(&self, optimizer: &mut dyn Optimizer) {
        optimizer.set_learning_rate(self.lr);
    }

    /// [`step`](Self::step), then write the new rate into `optimizer`.
    pub fn step_optimizer(&mut self, optimizer: &mut dyn Optimizer, metric: Option<f64>) -> Result<f64> {
        let lr = self.step(metric)?;
        optimizer.set_learning_rate(lr);
        Ok(lr)
    }
}

/// Build the schedule named by `config.lr_policy`, starting from `config.lr`.
pub fn build_scheduler(config: &TrainConfig) -> Result<LrScheduler> {
    tracing::debug!(
        policy = %config.lr_policy,
        gamma = config.lr_decay_factor,
        decay_epoch = ?config.lr_decay_epoch,
        "Building learning-rate scheduler"
    );
    LrScheduler::new(
        config.lr_policy,
        config.lr,
        config.lr_decay_factor,
        config.lr_decay_epoch.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::optimizer::Adam;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn test_lambda_decays_linearly_and_clamps() {
        let s = LrScheduler::new(LrPolicy::Lambda, 1.0, 0.1, vec![10]).unwrap();
        assert!(close(s.lr(), 0.9));
        assert!(close(s.lr_at(4), 0.5));
        assert_eq!(s.lr_at(9), 0.0);
        assert_eq!(s.lr_at(20), 0.0);
    }

    #[test]
    fn test_step_policy() {
        let mut s = LrScheduler::new(LrPolicy::Step, 0.1, 0.1, vec![30]).unwrap();
        assert!(close(s.lr_at(29), 0.1));
        assert!(close(s.lr_at(30), 0.01));
        assert!(close(s.lr_at(65), 0.001));
        for _ in 0..30 {
            s.step(None).unwrap();
        }
        assert_eq!(s.epoch(), 30);
        assert!(close(s.lr(), 0.01));
    }

    #[test]
    fn test_multistep_policy() {
        let s = LrScheduler::new(LrPolicy::MultiStep, 1.0, 0.5, vec![10, 20]).unwrap();
        assert!(close(s.lr_at(9), 1.0));
        assert!(close(s.lr_at(10), 0.5));
        assert!(close(s.lr_at(25), 0.25));
    }

    #[test]
    fn test_exp_policy() {
        let mut s = LrScheduler::new(LrPolicy::Exp, 2.0, 0.5, vec![]).unwrap();
        assert!(close(s.lr(), 2.0));
        assert!(close(s.step(None).unwrap(), 1.0));
        assert!(close(s.step(Some(123.0)).unwrap(), 0.5));
    }

    #[test]
    fn test_plateau_waits_for_patience() {
        let mut s = LrScheduler::new(LrPolicy::Plateau, 1.0, 0.1, vec![]).unwrap();
        // First metric improves on +inf, then PATIENCE + 1 epochs without progress.
        for _ in 0..=PLATEAU_PATIENCE {
            assert!(close(s.step(Some(1.0)).unwrap(), 1.0));
        }
        assert!(close(s.step(Some(0.995)).unwrap(), 0.1));
        assert!(close(s.step(Some(0.5)).unwrap(), 0.1));
    }

    #[test]
    fn test_plateau_requires_metric() {
        let mut s = LrScheduler::new(LrPolicy::Plateau, 1.0, 0.1, vec![]).unwrap();
        assert!(matches!(s.step(None), Err(SharpError::InvalidArgument(_))));
    }

    #[test]
    fn test_missing_decay_epoch_rejected() {
        for policy in [LrPolicy::Lambda, LrPolicy::Step, LrPolicy::MultiStep] {
            assert!(LrScheduler::new(policy, 0.1, 0.1, vec![]).is_err());
        }
        assert!(LrScheduler::new(LrPolicy::Step, 0.1, 0.1, vec![0]).is_err());
    }

    #[test]
    fn test_step_optimizer_updates_rate() {
        let config = TrainConfig {
            lr: 0.1,
            lr_policy: LrPolicy::Exp,
            lr_decay_factor: 0.5,
            ..TrainConfig::default()
        };
        let mut s = build_scheduler(&config).unwrap();
        let mut adam = Adam::new(config.lr, (0.9, 0.999), 1e-8).unwrap();
        s.step_optimizer(&mut adam, None).unwrap();
        assert!(close(adam.learning_rate(), 0.05));
    }
}
