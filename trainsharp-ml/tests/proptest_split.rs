//! Property-based tests for dataset splitting and LR schedules using proptest.

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;

use trainsharp_core::LrPolicy;
use trainsharp_ml::training::LrScheduler;
use trainsharp_ml::{PartitionName, split_indices};

// --- Partition invariants ---

proptest! {
    #[test]
    fn partitions_cover_and_are_disjoint(
        total in 0usize..500,
        trainval_fraction in 0.0f64..=1.0,
        train_fraction in 0.0f64..=1.0,
        shuffle in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let p = split_indices(total, trainval_fraction, train_fraction, shuffle, &mut rng).unwrap();

        let all: HashSet<usize> = p.all().iter().copied().collect();
        prop_assert_eq!(all.len(), total);
        prop_assert!(p.all().iter().all(|&i| i < total));

        prop_assert_eq!(p.train().len() + p.val().len(), p.trainval().len());
        prop_assert_eq!(p.trainval().len() + p.test().len(), total);

        let train: HashSet<usize> = p.train().iter().copied().collect();
        let val: HashSet<usize> = p.val().iter().copied().collect();
        let test: HashSet<usize> = p.test().iter().copied().collect();
        prop_assert!(train.is_disjoint(&val));
        prop_assert!(val.union(&train).all(|i| !test.contains(i)));

        prop_assert!(p.validate().is_ok());
    }

    #[test]
    fn unshuffled_split_is_identity_order(
        total in 0usize..300,
        trainval_fraction in 0.0f64..=1.0,
        train_fraction in 0.0f64..=1.0,
    ) {
        let p = split_indices(total, trainval_fraction, train_fraction, false, &mut StdRng::seed_from_u64(0)).unwrap();
        let expected: Vec<usize> = (0..total).collect();
        prop_assert_eq!(p.all(), expected.as_slice());

        let mut rejoined = p.test().to_vec();
        rejoined.extend_from_slice(p.get(PartitionName::Val));
        rejoined.extend_from_slice(p.get(PartitionName::Train));
        prop_assert_eq!(rejoined, expected);
    }

    #[test]
    fn test_size_matches_ceiling(
        total in 1usize..1000,
        tenths in 0u32..=10,
    ) {
        let trainval_fraction = f64::from(tenths) / 10.0;
        let p = split_indices(total, trainval_fraction, 0.5, false, &mut StdRng::seed_from_u64(0)).unwrap();
        let exact = u64::from(10 - tenths) * total as u64;
        let expected = exact.div_ceil(10) as usize;
        prop_assert_eq!(p.test().len(), expected);
    }
}

// --- Schedule properties ---

proptest! {
    #[test]
    fn decaying_policies_never_increase(
        base in 1e-6f64..1.0,
        gamma in 0.0f64..=1.0,
        period in 1usize..50,
        epochs in 1usize..200,
    ) {
        for policy in [LrPolicy::Lambda, LrPolicy::Step, LrPolicy::MultiStep, LrPolicy::Exp] {
            let mut s = LrScheduler::new(policy, base, gamma, vec![period, period * 2]).unwrap();
            let mut previous = s.lr();
            prop_assert!(previous <= base);
            for _ in 0..epochs {
                let lr = s.step(None).unwrap();
                prop_assert!(lr >= 0.0);
                prop_assert!(lr <= previous + 1e-15);
                previous = lr;
            }
        }
    }
}
