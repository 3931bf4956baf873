//! Property tests for the shard arithmetic invariants.

use lumen_core::config::SHARD_SIZE;
use lumen_core::fixed::Q16_16;
use lumen_core::shard::{WeightShard, WEIGHT_COUNT};
use proptest::prelude::*;

/// A shard with an arbitrary weight pattern and contributor count.
fn arb_shard(id: u8) -> impl Strategy<Value = WeightShard> {
    (
        proptest::collection::vec(any::<i8>(), 64),
        1u8..=255,
        any::<u32>(),
    )
        .prop_map(move |(prefix, contributors, epoch)| {
            let mut shard = WeightShard::init(id);
            for (i, &w) in prefix.iter().enumerate() {
                // Scatter the random prefix across the payload.
                shard.weights[i] = w;
                shard.weights[(i * 61 + 17) % WEIGHT_COUNT] = w.wrapping_mul(3);
            }
            shard.contributors = contributors;
            shard.global_epoch = epoch;
            shard.update_checksum();
            shard
        })
}

proptest! {
    #[test]
    fn gradient_steps_never_escape_i8(
        shard in arb_shard(0),
        grads in proptest::collection::vec(any::<i8>(), 16),
        lr_raw in 0i32..(8 << 16),
    ) {
        let mut shard = shard;
        shard.apply_gradient(&grads, Q16_16::from_raw(lr_raw));
        // Saturating arithmetic holds by construction; the checksum must
        // match the mutated payload.
        prop_assert!(shard.verify_checksum());
    }

    #[test]
    fn fed_avg_stays_between_inputs(
        a in arb_shard(1),
        b in arb_shard(1),
    ) {
        let mut merged = a.clone();
        merged.fed_avg(&b);
        prop_assert!(merged.verify_checksum());
        for i in 0..WEIGHT_COUNT {
            let lo = a.weights[i].min(b.weights[i]);
            let hi = a.weights[i].max(b.weights[i]);
            prop_assert!(merged.weights[i] >= lo && merged.weights[i] <= hi);
        }
        prop_assert_eq!(
            merged.contributors as u16,
            (a.contributors as u16 + b.contributors as u16).min(255)
        );
        prop_assert_eq!(merged.global_epoch, a.global_epoch.max(b.global_epoch));
    }

    #[test]
    fn wire_roundtrip_is_lossless(shard in arb_shard(5)) {
        let mut image = [0u8; SHARD_SIZE];
        shard.to_bytes(&mut image);
        let decoded = WeightShard::from_bytes(&image).unwrap();
        prop_assert_eq!(&decoded, &shard);
        prop_assert!(decoded.verify_checksum());
    }
}
