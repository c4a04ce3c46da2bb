#![no_main]

use authchain_ledger::{verify_sequence, Block, Blockchain};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Fuzz ledger snapshot decoding and verification
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Some(blocks) = doc.get("blocks").cloned() else {
        return;
    };
    let Ok(blocks) = serde_json::from_value::<Vec<Block>>(blocks) else {
        return;
    };

    let verified = verify_sequence(&blocks);
    match Blockchain::restore(blocks) {
        Ok(chain) => {
            // Anything restore accepts must verify and stay appendable.
            assert!(verified.is_ok());
            assert!(chain.verify_all().is_ok());
            let tip = chain.latest();
            assert_eq!(chain.len() as u64, tip.index + 1);
        }
        Err(e) => {
            assert!(verified.is_err());
            assert!(e.is_integrity() || e.block_index().is_none());
        }
    }
});
