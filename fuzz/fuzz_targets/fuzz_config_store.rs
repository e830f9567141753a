//! Arbitrary operation sequences against the config store: no panics, and
//! the on-flash image stays parseable after every commit.

#![no_main]

use libfuzzer_sys::fuzz_target;

use iobridge::adapters::sim::SimFlash;
use iobridge::buffer::ByteBuf;
use iobridge::config::ConfigStore;
use iobridge::flashbuf::SectorBuffer;

fuzz_target!(|data: &[u8]| {
    let mut store = ConfigStore::new(0x0f_a000);
    let mut sector = SectorBuffer::new();
    let mut flash = SimFlash::new();

    for chunk in data.chunks(12) {
        let op = chunk.first().copied().unwrap_or(0) % 5;
        let key = core::str::from_utf8(&chunk[1..chunk.len().min(6)]).unwrap_or("k");
        let value = core::str::from_utf8(&chunk[chunk.len().min(6)..]).unwrap_or("v");

        match op {
            0 => {
                let _ = store.open_write(&mut sector, &mut flash);
            }
            1 => {
                let _ = store.set_string(&mut sector, key, -1, -1, value);
            }
            2 => {
                let _ = store.delete(&mut sector, key, -1, -1, chunk.len() % 2 == 0);
            }
            3 => {
                let _ = store.close_write(&mut sector, &mut flash);
            }
            _ => {
                store.abort_write(&mut sector, &mut flash);
            }
        }

        let mut out: ByteBuf<4096> = ByteBuf::new();
        let _ = store.dump(&mut sector, &mut flash, &mut out);
    }
});
