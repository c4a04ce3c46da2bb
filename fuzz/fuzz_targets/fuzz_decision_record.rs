#![no_main]

use authchain_ledger::{Blockchain, DecisionRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz decision payload parsing and appending
    let Ok(record) = serde_json::from_slice::<DecisionRecord>(data) else {
        return;
    };
    if record.missing_field().is_some() {
        return;
    }

    let chain = Blockchain::new();
    let block = chain
        .append(record.into_block_data())
        .expect("append to a fresh chain");

    assert_eq!(block.index, 1);
    assert_eq!(block.hash, block.calculate_hash());
    assert!(chain.verify_all().is_ok());
});
