//! The token and numeric parsers must accept arbitrary byte soup without
//! panicking — every command line from the network goes through them.

#![no_main]

use libfuzzer_sys::fuzz_target;

use iobridge::parse;

fuzz_target!(|data: &[u8]| {
    for index in 0..6 {
        let _ = parse::parse_string(data, index, b' ');
        let _ = parse::parse_uint(data, index, 0, b' ');
        let _ = parse::parse_uint(data, index, 16, b' ');
        let _ = parse::parse_int(data, index, 0, b' ');
        let _ = parse::parse_float(data, index, b' ');
    }

    if let Ok(token) = parse::parse_string(data, 0, b' ') {
        let _ = parse::parse_ipv4(token);
    }
});
