//! Property and fuzz-style tests for the parser-facing core pieces.
//!
//! Runs on host (x86_64) only — proptest is not available for ESP32
//! targets.

#![cfg(not(target_os = "espidf"))]

use proptest::prelude::*;

use iobridge::adapters::sim::SimFlash;
use iobridge::buffer::ByteBuf;
use iobridge::config::ConfigStore;
use iobridge::dispatch::{Dispatcher, Priority, TaskSignal};
use iobridge::flashbuf::SectorBuffer;
use iobridge::ota::boot::RtcBootRecord;
use iobridge::stats::Stats;
use iobridge::telnet;

// ── telnet stripping ──────────────────────────────────────────

/// Reference model: remove every `0xFF X Y` triplet, left to right.
fn strip_model(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut index = 0;
    while index < input.len() {
        if input[index] == 0xff {
            index += 3; // command + option swallowed, even when truncated
        } else {
            out.push(input[index]);
            index += 1;
        }
    }
    out
}

proptest! {
    #[test]
    fn telnet_strip_matches_model(input in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut data = input.clone();
        let len = telnet::strip_in_place(&mut data);
        let model = strip_model(&input);
        prop_assert_eq!(&data[..len], model.as_slice());
    }

    #[test]
    fn telnet_strip_is_identity_without_iac(
        input in proptest::collection::vec(0u8..=0xfe, 0..512),
    ) {
        let mut data = input.clone();
        let len = telnet::strip_in_place(&mut data);
        prop_assert_eq!(&data[..len], input.as_slice());
    }

    #[test]
    fn telnet_strip_output_never_longer(input in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut data = input.clone();
        let len = telnet::strip_in_place(&mut data);
        prop_assert!(len <= input.len());
    }
}

// ── config store ──────────────────────────────────────────────

fn arb_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9.]{0,20}"
}

fn arb_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._-]{1,30}"
}

proptest! {
    /// Committed sets are visible; aborted sets are not.
    #[test]
    fn config_commit_vs_abort(
        key in arb_key(),
        committed in arb_value(),
        aborted in arb_value(),
    ) {
        let mut store = ConfigStore::new(0x0f_a000);
        let mut sector = SectorBuffer::new();
        let mut flash = SimFlash::new();

        store.open_write(&mut sector, &mut flash).unwrap();
        store.set_string(&mut sector, &key, -1, -1, &committed).unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        store.open_write(&mut sector, &mut flash).unwrap();
        store.set_string(&mut sector, &key, -1, -1, &aborted).unwrap();
        store.abort_write(&mut sector, &mut flash);

        let mut out: ByteBuf<64> = ByteBuf::new();
        prop_assert!(store.get_string(&mut sector, &mut flash, &key, -1, -1, &mut out));
        prop_assert_eq!(out.as_str(), committed.as_str());
    }

    /// Any batch of distinct keys set in one transaction is fully visible
    /// after commit.
    #[test]
    fn config_batch_round_trip(
        entries in proptest::collection::btree_map(arb_key(), arb_value(), 1..12),
    ) {
        let mut store = ConfigStore::new(0x0f_a000);
        let mut sector = SectorBuffer::new();
        let mut flash = SimFlash::new();

        store.open_write(&mut sector, &mut flash).unwrap();
        for (key, value) in &entries {
            store.set_string(&mut sector, key, -1, -1, value).unwrap();
        }
        store.close_write(&mut sector, &mut flash).unwrap();

        for (key, value) in &entries {
            let mut out: ByteBuf<64> = ByteBuf::new();
            prop_assert!(
                store.get_string(&mut sector, &mut flash, key, -1, -1, &mut out),
                "missing key {}", key
            );
            prop_assert_eq!(out.as_str(), value.as_str());
        }
    }
}

// ── dispatcher fairness ───────────────────────────────────────

proptest! {
    /// Whatever the posting interleaving, the next drained task always
    /// comes from the highest non-empty priority.
    #[test]
    fn dispatcher_always_drains_highest(
        ops in proptest::collection::vec(0u8..=3, 1..64),
    ) {
        let mut dispatcher = Dispatcher::new();
        let mut stats = Stats::new();
        let mut shadow = [0usize; 3]; // pending count per priority

        for op in ops {
            match op {
                0 => {
                    if shadow[0] < 2 {
                        shadow[0] += 1;
                    }
                    dispatcher.post(Priority::Timer, TaskSignal::IoPeriodicSlow, 0, &mut stats);
                }
                1 => {
                    if shadow[1] < 32 {
                        shadow[1] += 1;
                    }
                    dispatcher.post(Priority::Command, TaskSignal::ReceivedCommand, 0, &mut stats);
                }
                2 => {
                    if shadow[2] < 32 {
                        shadow[2] += 1;
                    }
                    dispatcher.post(Priority::Uart, TaskSignal::UartDrain, 0, &mut stats);
                }
                _ => {
                    let expected = if shadow[2] > 0 {
                        Some(2)
                    } else if shadow[1] > 0 {
                        Some(1)
                    } else if shadow[0] > 0 {
                        Some(0)
                    } else {
                        None
                    };
                    let got = dispatcher.next().map(|task| match task.signal {
                        TaskSignal::UartDrain => 2,
                        TaskSignal::ReceivedCommand => 1,
                        _ => 0,
                    });
                    prop_assert_eq!(got, expected);
                    if let Some(prio) = expected {
                        shadow[prio] -= 1;
                    }
                }
            }
        }
    }
}

// ── byte buffer ───────────────────────────────────────────────

proptest! {
    /// Appends never exceed capacity and preserve the retained prefix.
    #[test]
    fn bytebuf_truncates_silently(chunks in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..64), 0..16,
    )) {
        let mut buf: ByteBuf<128> = ByteBuf::new();
        let mut model: Vec<u8> = Vec::new();

        for chunk in &chunks {
            buf.append(chunk);
            model.extend_from_slice(chunk);
            model.truncate(128);
            prop_assert!(buf.len() <= 128);
            prop_assert_eq!(buf.as_slice(), model.as_slice());
        }
    }

    /// Token extraction agrees with the standard split semantics.
    #[test]
    fn tokens_match_split_whitespace(line in "[ a-z0-9]{0,48}") {
        let mut buf: ByteBuf<64> = ByteBuf::new();
        buf.append_str(&line);

        for (index, expected) in line.split(' ').filter(|t| !t.is_empty()).enumerate() {
            prop_assert_eq!(buf.token(index, b' '), Some(expected.as_bytes()));
        }
    }
}

// ── rtc trial-boot record ─────────────────────────────────────

proptest! {
    #[test]
    fn rtc_record_round_trips(
        next_mode in 0u8..=2,
        last_mode in 0u8..=2,
        last_slot in 0u8..=3,
        temporary_slot in 0u8..=3,
    ) {
        let record = RtcBootRecord {
            next_mode,
            last_mode,
            last_slot,
            temporary_slot,
        };
        prop_assert_eq!(RtcBootRecord::decode(&record.encode()), Some(record));
    }

    /// Flipping any single bit in the checksummed region is detected.
    #[test]
    fn rtc_record_detects_single_bit_flips(
        bit in 0usize..(9 * 8),
    ) {
        let record = RtcBootRecord {
            next_mode: 2,
            last_mode: 0,
            last_slot: 0,
            temporary_slot: 1,
        };
        let mut encoded = record.encode();
        encoded[bit / 8] ^= 1 << (bit % 8);
        prop_assert_ne!(RtcBootRecord::decode(&encoded), Some(record));
    }
}
