//! Evaluation meters.

use ndarray::Array2;
use trainsharp_core::{Result, SharpError};

/// Accumulates a metric over batches.
pub trait Meter {
    type Output: ?Sized;
    type Target: ?Sized;

    fn reset(&mut self);

    fn add(&mut self, outputs: &Self::Output, targets: &Self::Target) -> Result<()>;

    fn average(&self) -> f64;
}

/// Top-k accuracy, in percent, for multi-class classification.
///
/// `outputs` are `[N, classes]` scores and `targets` the `N` class indices. A
/// sample counts as correct when fewer than `k` classes score strictly higher
/// than its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiClassAccMeter {
    topk: usize,
    num_correct: usize,
    num_total: usize,
}

impl MultiClassAccMeter {
    pub fn new(topk: usize) -> Result<Self> {
        if topk == 0 {
            return Err(SharpError::invalid_argument("topk must be at least 1"));
        }
        Ok(Self {
            topk,
            num_correct: 0,
            num_total: 0,
        })
    }

    pub fn topk(&self) -> usize {
        self.topk
    }

    pub fn num_correct(&self) -> usize {
        self.num_correct
    }

    pub fn num_total(&self) -> usize {
        self.num_total
    }
}

impl Default for MultiClassAccMeter {
    fn default() -> Self {
        Self {
            topk: 1,
            num_correct: 0,
            num_total: 0,
        }
    }
}

impl Meter for MultiClassAccMeter {
    type Output = Array2<f32>;
    type Target = [usize];

    fn reset(&mut self) {
        self.num_correct = 0;
        self.num_total = 0;
    }

    fn add(&mut self, outputs: &Array2<f32>, targets: &[usize]) -> Result<()> {
        let (rows, classes) = outputs.dim();
        if rows != targets.len() {
            return Err(SharpError::invalid_argument(format!(
                "outputs have {rows} rows but {} targets were given",
                targets.len()
            )));
        }
        if classes < self.topk {
            return Err(SharpError::invalid_argument(format!(
                "{classes} predicted classes is fewer than k = {}",
                self.topk
            )));
        }

        let mut correct = 0;
        for (scores, &target) in outputs.rows().into_iter().zip(targets) {
            let target_score = *scores.get(target).ok_or_else(|| {
                SharpError::invalid_argument(format!(
                    "target class {target} out of range for {classes} classes"
                ))
            })?;
            let higher = scores.iter().filter(|&&s| s > target_score).count();
            if higher < self.topk {
                correct += 1;
            }
        }

        self.num_correct += correct;
        self.num_total += rows;
        Ok(())
    }

    fn average(&self) -> f64 {
        if self.num_total == 0 {
            return 0.0;
        }
        100.0 * self.num_correct as f64 / self.num_total as f64
    }
}
