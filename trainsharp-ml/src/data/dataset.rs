//! Indexable datasets and index-excerpt views over them.

use super::split::{IndexPartition, PartitionName};
use trainsharp_core::{Result, SharpError};

/// A random-access collection of samples.
pub trait Dataset {
    type Item;

    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Self::Item>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Dataset + ?Sized> Dataset for &D {
    type Item = D::Item;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Self::Item> {
        (**self).get(index)
    }
}

impl<T: Clone> Dataset for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn get(&self, index: usize) -> Result<T> {
        self.as_slice()
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.as_slice().len()))
    }
}

fn out_of_range(index: usize, len: usize) -> SharpError {
    SharpError::invalid_argument(format!("index {index} out of range for dataset of {len}"))
}

/// A view exposing only the samples named by `excerpt`, in excerpt order.
///
/// Useful when only part of a dataset is needed and a different sampler
/// should run over it.
#[derive(Debug, Clone)]
pub struct SliceDataset<D> {
    dataset: D,
    excerpt: Vec<usize>,
}

impl<D: Dataset> SliceDataset<D> {
    /// Every excerpt index must be in range for `dataset`.
    pub fn new(dataset: D, excerpt: Vec<usize>) -> Result<Self> {
        let len = dataset.len();
        if let Some(&bad) = excerpt.iter().find(|&&idx| idx >= len) {
            return Err(out_of_range(bad, len));
        }
        Ok(Self { dataset, excerpt })
    }

    /// View `dataset` through one partition of a split.
    pub fn from_partition(
        dataset: D,
        partition: &IndexPartition,
        name: PartitionName,
    ) -> Result<Self> {
        Self::new(dataset, partition.get(name).to_vec())
    }

    pub fn excerpt(&self) -> &[usize] {
        &self.excerpt
    }

    pub fn inner(&self) -> &D {
        &self.dataset
    }

    pub fn into_inner(self) -> D {
        self.dataset
    }
}

impl<D: Dataset> Dataset for SliceDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.excerpt.len()
    }

    fn get(&self, index: usize) -> Result<Self::Item> {
        let inner = *self
            .excerpt
            .as_slice()
            .get(index)
            .ok_or_else(|| out_of_range(index, self.excerpt.len()))?;
        self.dataset.get(inner)
    }
}
