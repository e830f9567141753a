//! `flash-*` commands: raw sector transfer through the shared staging
//! buffer, erase, checksum and boot slot selection.
//!
//! The transfer path moves sector content as printable command traffic:
//! `flash-send` accumulates chunks into the staging buffer, `flash-write`
//! commits it, `flash-read`/`flash-receive` go the other way. The mailbox
//! (UDP) path is the faster alternative; this one survives on a bare
//! command port.

use core::fmt::Write;

use crate::command::{Action, Context};
use crate::flashbuf::SectorOwner;
use crate::ota::boot;
use crate::ota::{append_digest_hex, mailbox};
use crate::parse;
use crate::ports::SECTOR_SIZE;

const OTA_TAG: &str = "flash transfer";

pub fn cmd_flash_info(ctx: &mut Context) -> Action {
    let sys = &mut *ctx.sys;
    let config = match boot::read_boot_config(&mut sys.sector, ctx.ports.flash) {
        Ok(config) => config,
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR flash-info: {e}");
            return Action::Error;
        }
    };

    let slot = match boot::read_rtc_record(ctx.ports.rtc) {
        Some(record) => record.last_slot,
        None => config.slot_current,
    };

    let _ = writeln!(
        ctx.dst,
        "OK flash function available, sector size: {} bytes, \
         OTA update available: 1, slots: {}, slot: {}, \
         address: {}, address: {}, address: {}, address: {}, \
         preferred chunk size: {}",
        SECTOR_SIZE,
        config.slot_count,
        slot,
        config.slots[0],
        config.slots[1],
        config.slots[2],
        config.slots[3],
        SECTOR_SIZE
    );
    Action::Normal
}

pub fn cmd_flash_erase(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(address), Ok(length)) = parsed else {
        ctx.dst
            .append_str("ERROR flash-erase: offset and length required\n");
        return Action::Error;
    };

    let sector_size = SECTOR_SIZE as u32;
    let mut sector_offset = address / sector_size;
    let mut sector_count = length / sector_size;
    if address % sector_size != 0 {
        sector_offset = sector_offset.saturating_sub(1);
        sector_count += 1;
    }
    if length % sector_size != 0 {
        sector_count += 1;
    }

    if (sector_offset + sector_count) * sector_size > ctx.ports.flash.size() {
        ctx.dst.append_str("ERROR flash-erase: range out of bounds\n");
        return Action::Error;
    }

    let start_us = ctx.ports.platform.uptime_us();
    for erased in 0..sector_count {
        if let Err(e) = ctx.ports.flash.erase_sector(sector_offset + erased) {
            let _ = writeln!(ctx.dst, "ERROR flash-erase: {e}");
            return Action::Error;
        }
        ctx.sys.stats.flash_sectors_erased = ctx.sys.stats.flash_sectors_erased.saturating_add(1);
    }
    let elapsed_ms = (ctx.ports.platform.uptime_us() - start_us) / 1000;

    let _ = writeln!(
        ctx.dst,
        "OK flash-erase: erased {sector_count} sectors from sector {sector_offset}, \
         in {elapsed_ms} milliseconds"
    );
    Action::Normal
}

fn chunk_args_valid(offset: u32, length: u32) -> Option<&'static str> {
    if length == 0 || offset % length != 0 {
        return Some("chunk offset should be divisible by chunk size");
    }
    if SECTOR_SIZE as u32 % length != 0 {
        return Some("chunk length should divide the flash sector size");
    }
    if offset + length > SECTOR_SIZE as u32 {
        return Some("chunk past sector end");
    }
    None
}

pub fn cmd_flash_send(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(offset), Ok(length)) = parsed else {
        ctx.dst
            .append_str("ERROR flash-send: offset and length required\n");
        return Action::Error;
    };

    if let Some(reason) = chunk_args_valid(offset, length) {
        let _ = writeln!(ctx.dst, "ERROR flash-send: {reason}");
        return Action::Error;
    }

    let Some(data_offset) = ctx.src.token_offset(0, 3, b' ') else {
        ctx.dst.append_str("ERROR flash-send: missing data\n");
        return Action::Error;
    };
    let data = &src[data_offset..];
    if data.len() != length as usize {
        let _ = writeln!(
            ctx.dst,
            "ERROR flash-send: data length mismatch: {} != {}",
            length,
            data.len()
        );
        return Action::Error;
    }

    if !ctx.sys.sector.request(SectorOwner::Ota, OTA_TAG) {
        let _ = writeln!(
            ctx.dst,
            "ERROR flash-send: sector buffer in use: {}",
            ctx.sys.sector.tag()
        );
        return Action::Error;
    }

    ctx.sys.sector.data_mut()[offset as usize..(offset + length) as usize].copy_from_slice(data);

    let _ = writeln!(
        ctx.dst,
        "OK flash-send: received bytes: {length}, at offset: {offset}"
    );
    Action::Normal
}

pub fn cmd_flash_receive(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(offset), Ok(length)) = parsed else {
        ctx.dst
            .append_str("ERROR flash-receive: chunk offset and length required\n");
        return Action::Error;
    };

    if let Some(reason) = chunk_args_valid(offset, length) {
        let _ = writeln!(ctx.dst, "ERROR flash-receive: {reason}");
        return Action::Error;
    }

    if !ctx.sys.sector.request(SectorOwner::Ota, OTA_TAG) {
        let _ = writeln!(
            ctx.dst,
            "ERROR flash-receive: sector buffer in use: {}",
            ctx.sys.sector.tag()
        );
        return Action::Error;
    }

    let _ = write!(
        ctx.dst,
        "OK flash-receive: sending bytes: {length}, from offset: {offset}, data: @"
    );
    let chunk = &ctx.sys.sector.data()[offset as usize..(offset + length) as usize];
    ctx.dst.append(chunk);
    ctx.dst.push(b'\n');

    if (offset + length) as usize >= SECTOR_SIZE {
        ctx.sys.sector.release(SectorOwner::Ota, OTA_TAG);
    }

    Action::Normal
}

pub fn cmd_flash_read(ctx: &mut Context) -> Action {
    let Ok(address) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR flash-read: address required\n");
        return Action::Error;
    };
    if address % SECTOR_SIZE as u32 != 0 {
        ctx.dst
            .append_str("ERROR flash-read: address should be sector aligned\n");
        return Action::Error;
    }

    if !ctx.sys.sector.request(SectorOwner::Ota, OTA_TAG) {
        let _ = writeln!(
            ctx.dst,
            "ERROR flash-read: sector buffer in use: {}",
            ctx.sys.sector.tag()
        );
        return Action::Error;
    }

    let sector = address / SECTOR_SIZE as u32;
    let digest = match mailbox::read_sector(ctx.ports.flash, sector, ctx.sys.sector.data_mut()) {
        Ok(digest) => digest,
        Err(e) => {
            ctx.sys.sector.release(SectorOwner::Ota, OTA_TAG);
            let _ = writeln!(ctx.dst, "ERROR flash-read: {e}");
            return Action::Error;
        }
    };

    // The buffer stays owned: flash-write/-verify consume it next.
    let _ = write!(
        ctx.dst,
        "OK flash-read: read bytes: {SECTOR_SIZE}, from address: {address} ({sector}), checksum: "
    );
    append_digest_hex(&digest, ctx.dst);
    ctx.dst.push(b'\n');
    Action::Normal
}

fn flash_write_verify(ctx: &mut Context, verify: bool) -> Action {
    let caller = if verify { "flash-verify" } else { "flash-write" };

    let Ok(address) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        let _ = writeln!(ctx.dst, "ERROR {caller}: address required");
        return Action::Error;
    };
    if address % SECTOR_SIZE as u32 != 0 {
        let _ = writeln!(ctx.dst, "ERROR {caller}: address should be sector aligned");
        return Action::Error;
    }

    if ctx.sys.sector.owner() != SectorOwner::Ota {
        let _ = writeln!(
            ctx.dst,
            "ERROR {caller}: sector buffer not staged (owner {:?})",
            ctx.sys.sector.owner()
        );
        return Action::Error;
    }

    let sector = address / SECTOR_SIZE as u32;

    if verify {
        let mut current = [0u8; SECTOR_SIZE];
        if let Err(e) = ctx.ports.flash.read(address, &mut current) {
            let _ = writeln!(ctx.dst, "ERROR {caller}: {e}");
            return Action::Error;
        }
        let same = &current == ctx.sys.sector.data();
        let digest = mailbox::digest_buffer(&current);

        ctx.sys.sector.release(SectorOwner::Ota, OTA_TAG);

        let _ = write!(
            ctx.dst,
            "OK flash-verify: verified bytes: {SECTOR_SIZE}, at address: {address} ({sector}), \
             same: {}, checksum: ",
            u8::from(same)
        );
        append_digest_hex(&digest, ctx.dst);
        ctx.dst.push(b'\n');
        return Action::Normal;
    }

    let sys = &mut *ctx.sys;
    let outcome = match mailbox::write_sector(
        ctx.ports.flash,
        sector,
        sys.sector.data(),
        &mut sys.stats,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            sys.sector.release(SectorOwner::Ota, OTA_TAG);
            let _ = writeln!(ctx.dst, "ERROR {caller}: {e}");
            return Action::Error;
        }
    };

    sys.sector.release(SectorOwner::Ota, OTA_TAG);

    let _ = write!(
        ctx.dst,
        "OK flash-write: written bytes: {SECTOR_SIZE}, to address: {address} ({sector}), \
         same: {}, erased: {}, checksum: ",
        u8::from(outcome.skipped),
        u8::from(outcome.erased)
    );
    append_digest_hex(&outcome.digest, ctx.dst);
    ctx.dst.push(b'\n');
    Action::Normal
}

pub fn cmd_flash_write(ctx: &mut Context) -> Action {
    flash_write_verify(ctx, false)
}

pub fn cmd_flash_verify(ctx: &mut Context) -> Action {
    flash_write_verify(ctx, true)
}

pub fn cmd_flash_checksum(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(address), Ok(length)) = parsed else {
        ctx.dst
            .append_str("ERROR flash-checksum: address and length required\n");
        return Action::Error;
    };
    if address % SECTOR_SIZE as u32 != 0 || length % SECTOR_SIZE as u32 != 0 {
        ctx.dst
            .append_str("ERROR flash-checksum: address and length should be sector aligned\n");
        return Action::Error;
    }

    let digest = match mailbox::checksum_sectors(
        ctx.ports.flash,
        address / SECTOR_SIZE as u32,
        length / SECTOR_SIZE as u32,
    ) {
        Ok(digest) => digest,
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR flash-checksum: {e}");
            return Action::Error;
        }
    };

    let _ = write!(
        ctx.dst,
        "OK flash-checksum: checksummed bytes: {length}, from address: {address}, checksum: "
    );
    append_digest_hex(&digest, ctx.dst);
    ctx.dst.push(b'\n');
    Action::Normal
}

fn flash_select(ctx: &mut Context, once: bool) -> Action {
    let cmdname = if once { "flash-select-once" } else { "flash-select" };

    let slot = match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(slot) if slot <= u8::MAX as u32 => slot as u8,
        _ => {
            let _ = writeln!(ctx.dst, "ERROR {cmdname}: slot required");
            return Action::Error;
        }
    };

    let sys = &mut *ctx.sys;
    match boot::select_slot(&mut sys.sector, ctx.ports.flash, ctx.ports.rtc, slot, !once) {
        Ok(config) => {
            let address = config.slots[usize::from(slot)];
            let _ = writeln!(
                ctx.dst,
                "OK {cmdname}: slot {slot} selected, address {address}"
            );
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR {cmdname}: {e}");
            Action::Error
        }
    }
}

pub fn cmd_flash_select(ctx: &mut Context) -> Action {
    flash_select(ctx, false)
}

pub fn cmd_flash_select_once(ctx: &mut Context) -> Action {
    flash_select(ctx, true)
}
