//! Gradient-based optimizers.

use crate::nn::{Network, Tensor};
use std::collections::HashMap;
use trainsharp_core::config::TrainConfig;
use trainsharp_core::{OptimizerKind, Result, SharpError};

/// Second-moment decay used by [`build_optimizer`].
pub const ADAM_BETA2: f64 = 0.999;
/// Denominator epsilon used by [`build_optimizer`].
pub const ADAM_EPS: f64 = 1e-8;

/// Updates network parameters from their accumulated gradients.
pub trait Optimizer: Send {
    /// Apply one update to every parameter that has a gradient, then clear
    /// the gradients.
    fn step(&mut self, network: &mut dyn Network) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

#[derive(Debug, Clone)]
struct Moments {
    step: u32,
    m: Tensor,
    v: Tensor,
}

/// Adam with bias-corrected first and second moments, tracked per parameter.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    state: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(lr: f64, betas: (f64, f64), eps: f64) -> Result<Self> {
        if !(lr.is_finite() && lr >= 0.0) {
            return Err(SharpError::invalid_argument(format!(
                "invalid learning rate: {lr}"
            )));
        }
        for (name, beta) in [("beta1", betas.0), ("beta2", betas.1)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(SharpError::invalid_argument(format!(
                    "{name} must lie in [0, 1), got {beta}"
                )));
            }
        }
        if !(eps > 0.0) {
            return Err(SharpError::invalid_argument(format!(
                "invalid epsilon: {eps}"
            )));
        }
        Ok(Self {
            lr,
            beta1: betas.0,
            beta2: betas.1,
            eps,
            state: HashMap::new(),
        })
    }

    pub fn betas(&self) -> (f64, f64) {
        (self.beta1, self.beta2)
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }
}

impl Optimizer for Adam {
    fn step(&mut self, network: &mut dyn Network) -> Result<()> {
        let (lr, beta1, beta2, eps) = (
            self.lr as f32,
            self.beta1 as f32,
            self.beta2 as f32,
            self.eps as f32,
        );
        for layer in network.layers_mut() {
            for (key, param) in layer.parameters_mut() {
                let Some(grad) = param.grad.take() else {
                    continue;
                };
                let moments = self.state.entry(key).or_insert_with(|| Moments {
                    step: 0,
                    m: Tensor::zeros(grad.raw_dim()),
                    v: Tensor::zeros(grad.raw_dim()),
                });
                if moments.m.shape() != grad.shape() {
                    return Err(SharpError::invalid_argument(format!(
                        "gradient shape {:?} does not match optimizer state {:?}",
                        grad.shape(),
                        moments.m.shape()
                    )));
                }

                moments.step += 1;
                let t = moments.step as i32;
                moments.m = &moments.m * beta1 + &grad * (1.0 - beta1);
                moments.v = &moments.v * beta2 + grad.mapv(|g| g * g) * (1.0 - beta2);

                let m_correction = 1.0 - beta1.powi(t);
                let v_correction = 1.0 - beta2.powi(t);
                ndarray::Zip::from(&mut param.value)
                    .and(&moments.m)
                    .and(&moments.v)
                    .for_each(|w, &m, &v| {
                        let m_hat = m / m_correction;
                        let v_hat = v / v_correction;
                        *w -= lr * m_hat / (v_hat.sqrt() + eps);
                    });
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

/// Build the optimizer named by `config.optimizer`.
pub fn build_optimizer(config: &TrainConfig) -> Result<Box<dyn Optimizer>> {
    match config.optimizer {
        OptimizerKind::Adam => {
            tracing::debug!(lr = config.lr, beta1 = config.beta1, "Building Adam optimizer");
            Ok(Box::new(Adam::new(
                config.lr,
                (config.beta1, ADAM_BETA2),
                ADAM_EPS,
            )?))
        }
    }
}
