#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use protoarena::test_utils::{TEST_PACKAGE, test_pool, test_registry};
use protoarena::{Arena, DecodeOptions, EncodeOptions, Global, decode};

#[derive(Arbitrary, Debug)]
struct Input {
    data: Vec<u8>,
    recursion_limit: u8,
    discard_unknown: bool,
    check_required: bool,
    deterministic: bool,
}

fuzz_target!(|input: Input| {
    let pool = test_pool();
    let registry = test_registry(&pool);
    let Some(desc) = pool.find_message_by_name(&format!("{TEST_PACKAGE}.TestAllTypes")) else {
        return;
    };
    let options = DecodeOptions::default()
        .with_extensions(&registry)
        .with_recursion_limit(u32::from(input.recursion_limit))
        .with_discard_unknown_fields(input.discard_unknown)
        .with_check_required(input.check_required);
    let mut arena = Arena::new(&Global);
    if let Ok(msg) = decode(&mut arena, &desc, &input.data, &options) {
        let encode_options = EncodeOptions::default()
            .with_check_required(false)
            .with_deterministic(input.deterministic);
        let _ = protoarena::encode(&arena, msg, &encode_options);
    }
});
