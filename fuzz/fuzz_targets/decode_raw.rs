#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use protoarena::{Arena, DecodeOptions, DescriptorPool, EncodeOptions, Global, MessageDescriptor, decode, encode};

fn descriptor_set_type() -> &'static MessageDescriptor {
    static DESC: OnceLock<MessageDescriptor> = OnceLock::new();
    DESC.get_or_init(|| {
        DescriptorPool::with_descriptor_schema()
            .and_then(|pool| {
                pool.find_message_by_name("google.protobuf.FileDescriptorSet")
                    .ok_or(protoarena::Error::UnknownTypeName("google.protobuf.FileDescriptorSet".into()))
            })
            .unwrap()
    })
}

fuzz_target!(|data: &[u8]| {
    let desc = descriptor_set_type();
    let mut arena = Arena::new(&Global);
    let Ok(msg) = decode(&mut arena, desc, data, &DecodeOptions::default()) else {
        return;
    };
    let options = EncodeOptions::default().with_check_required(false);
    let first = encode(&arena, msg, &options).unwrap();
    let mut other = Arena::new(&Global);
    let again = decode(&mut other, desc, &first, &DecodeOptions::default()).unwrap();
    assert_eq!(encode(&other, again, &options).unwrap(), first);
});
