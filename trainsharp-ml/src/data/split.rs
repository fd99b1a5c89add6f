//! Train/validation/test index partitioning.
//!
//! A dataset of `n` items is described by the index range `0..n`. The range is
//! optionally shuffled, the test share is taken off the front, and what is left
//! (`trainval`) is split again into validation (front) and training (back).

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use trainsharp_core::persistence;
use trainsharp_core::{Result, SharpError};

/// Products this close to an integer are treated as that integer before
/// rounding, so `(1.0 - 0.7) * 100.0` yields 30 test items rather than 31.
const ROUNDING_TOLERANCE: f64 = 1e-9;

/// Name of one of the five partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionName {
    All,
    Trainval,
    Train,
    Val,
    Test,
}

impl PartitionName {
    pub const ALL: [PartitionName; 5] = [
        PartitionName::All,
        PartitionName::Trainval,
        PartitionName::Train,
        PartitionName::Val,
        PartitionName::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Trainval => "trainval",
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionName {
    type Err = SharpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| SharpError::unsupported("partition", s))
    }
}

/// Disjoint index sets produced by [`split_indices`].
///
/// Invariants: `train ∪ val = trainval`, `trainval ∪ test = all`, the unions are
/// disjoint, and `all` is a permutation of `0..all.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPartition {
    all: Vec<usize>,
    trainval: Vec<usize>,
    train: Vec<usize>,
    val: Vec<usize>,
    test: Vec<usize>,
}

impl IndexPartition {
    pub fn get(&self, name: PartitionName) -> &[usize] {
        match name {
            PartitionName::All => &self.all,
            PartitionName::Trainval => &self.trainval,
            PartitionName::Train => &self.train,
            PartitionName::Val => &self.val,
            PartitionName::Test => &self.test,
        }
    }

    pub fn all(&self) -> &[usize] {
        &self.all
    }

    pub fn trainval(&self) -> &[usize] {
        &self.trainval
    }

    pub fn train(&self) -> &[usize] {
        &self.train
    }

    pub fn val(&self) -> &[usize] {
        &self.val
    }

    pub fn test(&self) -> &[usize] {
        &self.test
    }

    /// Check the partition invariants, e.g. after reading a file.
    pub fn validate(&self) -> Result<()> {
        let n = self.all.len();
        let mut seen = vec![false; n];
        for &idx in &self.all {
            if idx >= n || std::mem::replace(&mut seen[idx], true) {
                return Err(SharpError::invalid_argument(format!(
                    "'all' is not a permutation of 0..{n}"
                )));
            }
        }

        let (test, rest) = self.all.split_at(self.test.len().min(n));
        if test != self.test.as_slice() || rest != self.trainval.as_slice() {
            return Err(SharpError::invalid_argument(
                "'test' and 'trainval' do not partition 'all'",
            ));
        }

        let (val, train) = self.trainval.split_at(self.val.len().min(self.trainval.len()));
        if val != self.val.as_slice() || train != self.train.as_slice() {
            return Err(SharpError::invalid_argument(
                "'val' and 'train' do not partition 'trainval'",
            ));
        }
        Ok(())
    }

    /// Persist as JSON. The parent directory of `path` must already exist.
    pub fn save(&self, path: &Path) -> Result<()> {
        persistence::atomic_write_json_existing(path, self)?;
        tracing::info!(
            path = %path.display(),
            train = self.train.len(),
            val = self.val.len(),
            test = self.test.len(),
            "Saved dataset split"
        );
        Ok(())
    }

    /// Load a partition written by [`IndexPartition::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let partition: Self =
            persistence::load_json(path)?.ok_or_else(|| SharpError::missing_path(path))?;
        partition.validate()?;
        Ok(partition)
    }
}

fn tolerant_ceil(x: f64) -> f64 {
    let nearest = x.round();
    if (x - nearest).abs() < ROUNDING_TOLERANCE {
        nearest
    } else {
        x.ceil()
    }
}

fn tolerant_floor(x: f64) -> f64 {
    let nearest = x.round();
    if (x - nearest).abs() < ROUNDING_TOLERANCE {
        nearest
    } else {
        x.floor()
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SharpError::invalid_argument(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}

/// Partition `0..total_count` into all/trainval/train/val/test.
///
/// `num_test = ceil((1 - trainval_fraction) * total_count)` items go to `test`;
/// of the remaining `trainval`, `floor(train_fraction * len)` go to `train` and
/// the rest to `val`. Without `shuffle` the result is order-preserving and the
/// RNG is not touched.
pub fn split_indices<R: Rng + ?Sized>(
    total_count: usize,
    trainval_fraction: f64,
    train_fraction: f64,
    shuffle: bool,
    rng: &mut R,
) -> Result<IndexPartition> {
    check_fraction("trainval_fraction", trainval_fraction)?;
    check_fraction("train_fraction", train_fraction)?;

    let mut all: Vec<usize> = (0..total_count).collect();
    if shuffle {
        all.shuffle(rng);
    }

    let num_test = (tolerant_ceil((1.0 - trainval_fraction) * total_count as f64) as usize)
        .min(total_count);
    let num_trainval = total_count - num_test;
    let num_train =
        (tolerant_floor(train_fraction * num_trainval as f64) as usize).min(num_trainval);
    let num_val = num_trainval - num_train;

    let test = all[..num_test].to_vec();
    let trainval = all[num_test..].to_vec();
    let val = trainval[..num_val].to_vec();
    let train = trainval[num_val..].to_vec();

    tracing::debug!(
        total = total_count,
        trainval = trainval.len(),
        train = train.len(),
        val = val.len(),
        test = test.len(),
        shuffle,
        "Dataset split"
    );

    Ok(IndexPartition {
        all,
        trainval,
        train,
        val,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0)
    }

    #[test]
    fn test_concrete_sizes() {
        let p = split_indices(100, 0.7, 0.9, false, &mut rng()).unwrap();
        assert_eq!(p.test().len(), 30);
        assert_eq!(p.trainval().len(), 70);
        assert_eq!(p.val().len(), 7);
        assert_eq!(p.train().len(), 63);
        assert_eq!(p.all().len(), 100);
    }

    #[test]
    fn test_unshuffled_is_order_preserving() {
        let p = split_indices(10, 0.8, 0.5, false, &mut rng()).unwrap();
        assert_eq!(p.all(), (0..10).collect::<Vec<_>>().as_slice());
        assert_eq!(p.test(), &[0, 1]);
        assert_eq!(p.val(), &[2, 3, 4, 5]);
        assert_eq!(p.train(), &[6, 7, 8, 9]);

        let again = split_indices(10, 0.8, 0.5, false, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(p, again);
    }

    #[test]
    fn test_shuffle_is_seed_reproducible() {
        let a = split_indices(50, 0.7, 0.8, true, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = split_indices(50, 0.7, 0.8, true, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.all(), (0..50).collect::<Vec<_>>().as_slice());
        a.validate().unwrap();
    }

    #[test]
    fn test_empty_dataset() {
        let p = split_indices(0, 0.7, 0.9, true, &mut rng()).unwrap();
        for name in PartitionName::ALL {
            assert!(p.get(name).is_empty(), "{name} should be empty");
        }
    }

    #[test]
    fn test_full_trainval_has_no_test() {
        let p = split_indices(20, 1.0, 0.5, false, &mut rng()).unwrap();
        assert!(p.test().is_empty());
        assert_eq!(p.trainval().len(), 20);
    }

    #[test]
    fn test_zero_train_fraction_puts_everything_in_val() {
        let p = split_indices(20, 0.5, 0.0, false, &mut rng()).unwrap();
        assert!(p.train().is_empty());
        assert_eq!(p.val(), p.trainval());
    }

    #[test]
    fn test_fraction_out_of_range() {
        for (tv, tr) in [(1.5, 0.5), (-0.1, 0.5), (0.5, 1.01), (0.5, f64::NAN)] {
            let err = split_indices(10, tv, tr, false, &mut rng()).unwrap_err();
            assert!(matches!(err, SharpError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("split.json");
        let p = split_indices(37, 0.75, 0.6, true, &mut rng()).unwrap();

        p.save(&path).unwrap();
        let loaded = IndexPartition::load(&path).unwrap();
        assert_eq!(loaded, p);
    }

    #[test]
    fn test_save_into_missing_dir_is_io_error() {
        let p = split_indices(5, 0.6, 0.5, false, &mut rng()).unwrap();
        let err = p.save(Path::new("/nonexistent_dir/x.bin")).unwrap_err();
        assert!(matches!(err, SharpError::Io(_)));
    }

    #[test]
    fn test_load_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = IndexPartition::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SharpError::Io(_)));
    }

    #[test]
    fn test_load_rejects_tampered_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("split.json");
        std::fs::write(
            &path,
            r#"{"all":[0,1,2],"trainval":[1,2],"train":[2],"val":[1],"test":[1]}"#,
        )
        .unwrap();
        let err = IndexPartition::load(&path).unwrap_err();
        assert!(matches!(err, SharpError::InvalidArgument(_)));
    }

    #[test]
    fn test_partition_name_parse() {
        assert_eq!("val".parse::<PartitionName>().unwrap(), PartitionName::Val);
        assert!("validation".parse::<PartitionName>().is_err());
    }
}
