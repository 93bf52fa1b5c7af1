//! Property tests over the sampler and the canonical config encoding.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use faultline_model::catalog::ALL_DROPS;
use faultline_model::{ConfigSampler, CorruptionScope, FaultConfig, FaultCount, SamplerSettings};

fn arb_scope() -> impl Strategy<Value = CorruptionScope> {
    prop_oneof![Just(CorruptionScope::Small), Just(CorruptionScope::Any)]
}

fn arb_settings() -> impl Strategy<Value = SamplerSettings> {
    (0usize..6, 1usize..6, arb_scope()).prop_map(|(max_drops, max_corruptions, scope)| {
        SamplerSettings {
            drops: FaultCount::Uniform {
                min: 0,
                max: max_drops,
            },
            corruptions: FaultCount::Uniform {
                min: 0,
                max: max_corruptions,
            },
            scope,
        }
    })
}

proptest! {
    #[test]
    fn sampled_configs_validate_and_carry_faults(seed in any::<u64>(), settings in arb_settings()) {
        let sampler = ConfigSampler::new(settings).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let config = sampler.sample(&mut rng);
        prop_assert!(config.validate().is_ok());
        prop_assert!(!config.is_empty());
        prop_assert!(config.drops.len() <= ALL_DROPS.len());
        for corruption in &config.corruptions {
            let allowed = settings.scope.corruption_types(corruption.role());
            prop_assert!(allowed.contains(&corruption.corruption_type));
        }
    }

    #[test]
    fn canonical_json_decodes_to_the_same_config(seed in any::<u64>(), settings in arb_settings()) {
        let sampler = ConfigSampler::new(settings).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let config = sampler.sample(&mut rng);
        let encoded = config.canonical_json().unwrap();
        let decoded = FaultConfig::from_json(&encoded).unwrap();
        prop_assert_eq!(&decoded, &config);
        prop_assert_eq!(decoded.canonical_json().unwrap(), encoded);
    }

    #[test]
    fn same_seed_same_config(seed in any::<u64>()) {
        let sampler = ConfigSampler::new(SamplerSettings {
            drops: FaultCount::Uniform { min: 0, max: 3 },
            corruptions: FaultCount::Uniform { min: 1, max: 3 },
            scope: CorruptionScope::Any,
        })
        .unwrap();
        let a = sampler.sample(&mut ChaCha8Rng::seed_from_u64(seed));
        let b = sampler.sample(&mut ChaCha8Rng::seed_from_u64(seed));
        prop_assert_eq!(a, b);
    }
}

#[test]
fn json_from_other_encoders_is_accepted() {
    // Whitespace-separated JSON, as written by generic JSON encoders.
    let raw = r#"{"drops": [{"step": 4, "partition": [[0, 1], [2, 3]]}], "corruptions": []}"#;
    let config = FaultConfig::from_json(raw).unwrap();
    assert_eq!(
        config.canonical_json().unwrap(),
        r#"{"drops":[{"step":4,"partition":[[0,1],[2,3]]}],"corruptions":[]}"#
    );
}
