#![no_main]

use arbitrary::Arbitrary;
use authchain_ledger::{quorum_size_for, BlockHash, Validator, ValidatorRegistry};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    validator_ids: Vec<String>,
    block_hash: String,
    forged_tag: String,
    deactivate: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let registry = ValidatorRegistry::new();
    for id in &input.validator_ids {
        let _ = registry.add(Validator::new(id.clone(), "fuzz"));
    }
    for pick in &input.deactivate {
        let all = registry.list_all();
        if !all.is_empty() {
            let _ = registry.deactivate(&all[*pick as usize % all.len()].id);
        }
    }

    let active = registry.active_count();
    assert_eq!(registry.quorum_size(), quorum_size_for(active));
    assert!(registry.quorum_size() > active * 2 / 3);

    let hash = BlockHash::new(input.block_hash);
    for validator in registry.list_all() {
        let tag = registry
            .compute_tag(&validator.id, &hash)
            .expect("registered validator");
        assert!(registry.verify_tag(&validator.id, &hash, &tag));
        if input.forged_tag != tag {
            assert!(!registry.verify_tag(&validator.id, &hash, &input.forged_tag));
        }
    }
});
