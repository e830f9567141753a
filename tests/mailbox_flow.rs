//! Mailbox protocol tests: the full host↔device exchange for firmware
//! sectors — UDP accumulation, ACK, write/simulate/read/checksum commands
//! and the trial-boot slot commit.

#![cfg(not(target_os = "espidf"))]

mod common;

use common::Rig;
use sha1::{Digest, Sha1};

use iobridge::ota::boot;
use iobridge::ports::FlashPort;

fn sector_payload(seed: u8) -> [u8; 4096] {
    let mut data = [0u8; 4096];
    for (index, byte) in data.iter_mut().enumerate() {
        *byte = seed ^ (index as u8);
    }
    data
}

fn sha1_hex(data: &[u8]) -> String {
    Sha1::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[test]
fn mailbox_info_reports_slots_and_sectors() {
    let mut rig = Rig::new();
    let reply = rig.command("mailbox-info");
    // Slot 0 at 0x002000 = sector 2, slot 1 at 0x102000 = sector 258.
    assert_eq!(
        reply,
        "OK mailbox function available, slots: 2, current: 0, sectors: [ 2, 258 ]\n"
    );
}

#[test]
fn sector_accumulation_acks_once() {
    let mut rig = Rig::new();
    rig.mailbox_send_sector(&sector_payload(0x5a));

    let out = rig.mailbox_out();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], b"ACK");
}

#[test]
fn simulate_checksums_without_writing() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x11);
    rig.mailbox_send_sector(&payload);

    let writes_before = rig.flash.write_count;
    let reply = rig.command("mailbox-simulate 512");
    assert_eq!(
        reply,
        format!(
            "OK mailbox-simulate: received sector 512, erased: 0, skipped 0, checksum: {}\n",
            sha1_hex(&payload)
        )
    );
    assert_eq!(rig.flash.write_count, writes_before);
}

#[test]
fn write_commits_sector_and_reports_flash_digest() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x42);
    rig.mailbox_send_sector(&payload);

    let reply = rig.command("mailbox-write 300");
    assert_eq!(
        reply,
        format!(
            "OK mailbox-write: written sector 300, erased: 0, skipped 0, checksum: {}\n",
            sha1_hex(&payload)
        )
    );
    assert_eq!(rig.flash.contents(300 * 4096, 4096), payload);
}

#[test]
fn rewriting_identical_payload_reports_skipped() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x42);

    rig.mailbox_send_sector(&payload);
    rig.command("mailbox-write 300");

    rig.mailbox_send_sector(&payload);
    let reply = rig.command("mailbox-write 300");
    assert!(
        reply.contains("erased: 0, skipped 1"),
        "second write should skip: {reply}"
    );
}

#[test]
fn conflicting_rewrite_erases_first() {
    let mut rig = Rig::new();

    rig.mailbox_send_sector(&[0x00u8; 4096]);
    rig.command("mailbox-write 300");

    rig.mailbox_send_sector(&[0xffu8; 4096]);
    let reply = rig.command("mailbox-write 300");
    assert!(reply.contains("erased: 1, skipped 0"), "reply: {reply}");
}

#[test]
fn write_without_buffered_sector_fails_cleanly() {
    let mut rig = Rig::new();
    let reply = rig.command("mailbox-write 300");
    assert_eq!(reply, "ERROR: mailbox-write: mailbox incomplete, 0 bytes\n");

    // Partial sector: still incomplete.
    rig.mailbox_deliver(&[0xaa; 1000]);
    let reply = rig.command("mailbox-write 300");
    assert_eq!(
        reply,
        "ERROR: mailbox-write: mailbox incomplete, 1000 bytes\n"
    );
}

#[test]
fn mailbox_reset_recovers_from_partial_transfer() {
    let mut rig = Rig::new();
    rig.mailbox_deliver(&[0xaa; 1000]);

    assert_eq!(rig.command("mailbox-reset"), "OK mailbox-reset\n");

    // A fresh full sector now works.
    let payload = sector_payload(0x77);
    rig.mailbox_send_sector(&payload);
    let reply = rig.command("mailbox-write 301");
    assert!(reply.starts_with("OK mailbox-write"));
}

#[test]
fn read_returns_sector_bytes_and_matching_digest() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x99);
    rig.mailbox_send_sector(&payload);
    rig.command("mailbox-write 310");
    // ACK was the first mailbox datagram.
    let sent_before = rig.mailbox_out().len();

    let reply = rig.command("mailbox-read 310");
    assert_eq!(
        reply,
        format!(
            "OK mailbox-read: sending sector 310, checksum: {}\n",
            sha1_hex(&payload)
        )
    );

    // 4096 bytes go out as MTU-sized datagrams; reassemble and compare.
    let out = rig.mailbox_out();
    let raw: Vec<u8> = out[sent_before..].concat();
    assert_eq!(raw.len(), 4096);
    assert_eq!(raw, payload);
}

#[test]
fn write_then_read_round_trip() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x0f);
    rig.mailbox_send_sector(&payload);

    let write_reply = rig.command("mailbox-write 320");
    let sent_before = rig.mailbox_out().len();
    let read_reply = rig.command("mailbox-read 320");

    let write_digest = write_reply.rsplit("checksum: ").next().unwrap().trim();
    let read_digest = read_reply.rsplit("checksum: ").next().unwrap().trim();
    assert_eq!(write_digest, read_digest);

    let raw: Vec<u8> = rig.mailbox_out()[sent_before..].concat();
    assert_eq!(raw, payload);
}

#[test]
fn checksum_covers_consecutive_sectors() {
    let mut rig = Rig::new();
    let first = sector_payload(0x01);
    let second = sector_payload(0x02);

    rig.mailbox_send_sector(&first);
    rig.command("mailbox-write 400");
    rig.mailbox_send_sector(&second);
    rig.command("mailbox-write 401");

    let mut combined = Vec::new();
    combined.extend_from_slice(&first);
    combined.extend_from_slice(&second);

    let reply = rig.command("mailbox-checksum 400 2");
    assert_eq!(
        reply,
        format!(
            "OK mailbox-checksum: checksummed sectors: 2, from sector: 400, checksum: {}\n",
            sha1_hex(&combined)
        )
    );
}

#[test]
fn bench_receive_direction_consumes_sector() {
    let mut rig = Rig::new();
    rig.mailbox_send_sector(&sector_payload(0x33));

    let reply = rig.command("mailbox-bench 1");
    assert_eq!(reply, "OK mailbox-bench: received one sector\n");

    // Buffer consumed: a write now reports incomplete.
    let reply = rig.command("mailbox-write 300");
    assert!(reply.contains("mailbox incomplete"));
}

#[test]
fn bench_send_direction_emits_full_sector() {
    let mut rig = Rig::new();
    // Prime the mailbox peer so the bench send has a destination.
    rig.mailbox_deliver(&[0u8; 16]);
    rig.command("mailbox-reset");

    let sent_before = rig.mailbox_out().len();
    let reply = rig.command("mailbox-bench 0");
    assert_eq!(reply, "OK mailbox-bench: sending one sector\n");

    let raw: Vec<u8> = rig.mailbox_out()[sent_before..].concat();
    assert_eq!(raw.len(), 4096);
}

// ── trial boot / slot commit ──────────────────────────────────

#[test]
fn select_trial_boots_slot_once() {
    let mut rig = Rig::new();

    let reply = rig.command("mailbox-select 1 0");
    assert_eq!(reply, "OK mailbox-select: slot 1, permanent 0\n");

    rig.with_ports(|sys, ports| {
        // Next boot runs the trial slot; boot config is untouched.
        assert_eq!(
            boot::boot_select(&mut sys.sector, ports.flash, ports.rtc).unwrap(),
            1
        );
        let config = boot::read_boot_config(&mut sys.sector, ports.flash).unwrap();
        assert_eq!(config.slot_current, 0);
        // The boot after the trial reverts.
        assert_eq!(
            boot::boot_select(&mut sys.sector, ports.flash, ports.rtc).unwrap(),
            0
        );
    });
}

#[test]
fn select_permanent_survives_resets() {
    let mut rig = Rig::new();

    let reply = rig.command("mailbox-select 1 1");
    assert_eq!(reply, "OK mailbox-select: slot 1, permanent 1\n");

    rig.with_ports(|sys, ports| {
        for _ in 0..3 {
            assert_eq!(
                boot::boot_select(&mut sys.sector, ports.flash, ports.rtc).unwrap(),
                1
            );
        }
        let config = boot::read_boot_config(&mut sys.sector, ports.flash).unwrap();
        assert_eq!(config.slot_current, 1);
    });
}

#[test]
fn select_rejects_invalid_slot() {
    let mut rig = Rig::new();
    let reply = rig.command("mailbox-select 5 0");
    assert!(reply.starts_with("ERROR mailbox-select"));
}

#[test]
fn trial_then_permanent_commit_flow() {
    let mut rig = Rig::new();

    // Stream a new image sector into the inactive slot, trial-boot it,
    // then commit.
    let payload = sector_payload(0xc3);
    rig.mailbox_send_sector(&payload);
    let reply = rig.command("mailbox-write 258");
    assert!(reply.starts_with("OK mailbox-write"));

    rig.command("mailbox-select 1 0");
    rig.with_ports(|sys, ports| {
        assert_eq!(
            boot::boot_select(&mut sys.sector, ports.flash, ports.rtc).unwrap(),
            1
        );
    });

    rig.command("mailbox-select 1 1");
    rig.with_ports(|sys, ports| {
        assert_eq!(
            boot::boot_select(&mut sys.sector, ports.flash, ports.rtc).unwrap(),
            1
        );
    });

    // The active slot's first sector was never touched.
    let mut slot0 = [0u8; 4096];
    rig.flash.read(0x2000, &mut slot0).unwrap();
    assert!(slot0.iter().all(|&b| b == 0xff));
}

#[test]
fn flash_family_matches_mailbox_semantics() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x6c);
    rig.mailbox_send_sector(&payload);
    rig.command("mailbox-write 420");

    // flash-read stages the sector; flash-verify confirms it matches.
    let reply = rig.command("flash-read 1720320"); // 420 * 4096
    assert!(reply.contains(&sha1_hex(&payload)), "reply: {reply}");

    let reply = rig.command("flash-verify 1720320");
    assert!(reply.contains("same: 1"), "reply: {reply}");
}

#[test]
fn flash_checksum_matches_mailbox_checksum() {
    let mut rig = Rig::new();
    let payload = sector_payload(0x18);
    rig.mailbox_send_sector(&payload);
    rig.command("mailbox-write 430");

    let by_flash = rig.command("flash-checksum 1761280 4096"); // 430 * 4096
    let by_mailbox = rig.command("mailbox-checksum 430 1");

    let digest_of = |s: &str| s.rsplit("checksum: ").next().unwrap().trim().to_string();
    assert_eq!(digest_of(&by_flash), digest_of(&by_mailbox));
}
