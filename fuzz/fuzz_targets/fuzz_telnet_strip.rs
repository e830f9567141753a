//! Telnet stripping must never panic and never grow the input.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = data.to_vec();
    let len = iobridge::telnet::strip_in_place(&mut buf);
    assert!(len <= data.len());
});
