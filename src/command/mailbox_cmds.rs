//! `mailbox-*` commands: the control side of the UDP sector mailbox.
//!
//! The raw 4096-byte payloads travel on the dedicated mailbox socket; the
//! commands here consume or refill that socket's buffers and answer on
//! the command port with the SHA-1 the host verifies against.

use core::fmt::Write;

use log::warn;

use crate::command::{Action, Context};
use crate::ota::boot;
use crate::ota::{append_digest_hex, mailbox};
use crate::parse;
use crate::ports::SECTOR_SIZE;

pub fn cmd_mailbox_info(ctx: &mut Context) -> Action {
    let sys = &mut *ctx.sys;
    let config = match boot::read_boot_config(&mut sys.sector, ctx.ports.flash) {
        Ok(config) => config,
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR mailbox-info: {e}");
            return Action::Error;
        }
    };

    let slot = match boot::read_rtc_record(ctx.ports.rtc) {
        Some(record) => record.last_slot,
        None => config.slot_current,
    };

    let _ = writeln!(
        ctx.dst,
        "OK mailbox function available, slots: {}, current: {}, sectors: [ {}, {} ]",
        config.slot_count,
        slot,
        config.slots[0] / SECTOR_SIZE as u32,
        config.slots[1] / SECTOR_SIZE as u32
    );
    Action::Normal
}

pub fn cmd_mailbox_reset(ctx: &mut Context) -> Action {
    let sys = &mut *ctx.sys;
    sys.mbox_socket.rx.clear();
    sys.mbox_socket.tx.clear();
    sys.mbox_socket.unlock();
    sys.mailbox.reset();

    ctx.dst.append_str("OK mailbox-reset\n");
    Action::Normal
}

pub fn cmd_mailbox_read(ctx: &mut Context) -> Action {
    let Ok(sector) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: mailbox-read: invalid sector\n");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    sys.mbox_socket.tx.clear();
    let digest = match mailbox::read_sector(ctx.ports.flash, sector, sys.mbox_socket.tx.raw_mut())
    {
        Ok(digest) => digest,
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: mailbox-read: {e}");
            return Action::Error;
        }
    };
    sys.mbox_socket.tx.set_len(SECTOR_SIZE);

    let _ = write!(ctx.dst, "OK mailbox-read: sending sector {sector}, checksum: ");
    append_digest_hex(&digest, ctx.dst);
    ctx.dst.push(b'\n');

    sys.mailbox.sending(&mut sys.stats);
    if sys.mbox_socket.send(ctx.ports.net).is_err() {
        warn!("mailbox-read: send failed");
        sys.mailbox.reset();
    } else {
        sys.mailbox.sent_queued();
    }

    Action::Normal
}

pub fn cmd_mailbox_bench(ctx: &mut Context) -> Action {
    let Ok(direction) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: mailbox-bench: invalid direction\n");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    if direction == 0 {
        // Throughput-only: content does not matter, a full sector does.
        sys.mbox_socket.tx.set_len(SECTOR_SIZE);
        ctx.dst.append_str("OK mailbox-bench: sending one sector\n");

        sys.mailbox.sending(&mut sys.stats);
        if sys.mbox_socket.send(ctx.ports.net).is_err() {
            warn!("mailbox-bench: send failed");
            sys.mailbox.reset();
        } else {
            sys.mailbox.sent_queued();
        }
    } else {
        if sys.mbox_socket.rx.len() == SECTOR_SIZE {
            ctx.dst.append_str("OK mailbox-bench: received one sector\n");
        } else {
            let _ = writeln!(
                ctx.dst,
                "ERROR mailbox-bench: received incomplete sector: {}",
                sys.mbox_socket.rx.len()
            );
        }
        sys.mbox_socket.rx.clear();
        sys.mbox_socket.unlock();
        sys.mailbox.reset();
    }

    Action::Normal
}

pub fn cmd_mailbox_checksum(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(sector), Ok(sectors)) = parsed else {
        ctx.dst
            .append_str("ERROR mailbox-checksum: start sector and count required\n");
        return Action::Error;
    };

    let digest = match mailbox::checksum_sectors(ctx.ports.flash, sector, sectors) {
        Ok(digest) => digest,
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: mailbox-checksum: {e}");
            return Action::Error;
        }
    };

    let _ = write!(
        ctx.dst,
        "OK mailbox-checksum: checksummed sectors: {sectors}, from sector: {sector}, checksum: "
    );
    append_digest_hex(&digest, ctx.dst);
    ctx.dst.push(b'\n');
    Action::Normal
}

pub fn cmd_mailbox_simulate(ctx: &mut Context) -> Action {
    let Ok(sector) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: mailbox-simulate: invalid sector\n");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    if sys.mailbox.begin_consume(sys.mbox_socket.rx.len()).is_err() {
        let _ = writeln!(
            ctx.dst,
            "ERROR: mailbox-simulate: mailbox incomplete, {} bytes",
            sys.mbox_socket.rx.len()
        );
        return Action::Error;
    }

    let digest = mailbox::digest_buffer(sys.mbox_socket.rx.as_slice());

    let _ = write!(
        ctx.dst,
        "OK mailbox-simulate: received sector {sector}, erased: 0, skipped 0, checksum: "
    );
    append_digest_hex(&digest, ctx.dst);
    ctx.dst.push(b'\n');

    sys.mbox_socket.rx.clear();
    sys.mbox_socket.unlock();
    sys.mailbox.consumed();
    Action::Normal
}

pub fn cmd_mailbox_write(ctx: &mut Context) -> Action {
    let Ok(sector) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: mailbox-write: invalid sector\n");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    if sys.mailbox.begin_consume(sys.mbox_socket.rx.len()).is_err() {
        let _ = writeln!(
            ctx.dst,
            "ERROR: mailbox-write: mailbox incomplete, {} bytes",
            sys.mbox_socket.rx.len()
        );
        return Action::Error;
    }

    let Ok(payload) = <&[u8; SECTOR_SIZE]>::try_from(sys.mbox_socket.rx.as_slice()) else {
        sys.mailbox.reset();
        ctx.dst.append_str("ERROR: mailbox-write: mailbox incomplete\n");
        return Action::Error;
    };

    let outcome = match mailbox::write_sector(ctx.ports.flash, sector, payload, &mut sys.stats) {
        Ok(outcome) => outcome,
        Err(e) => {
            sys.mailbox.reset();
            let _ = writeln!(ctx.dst, "ERROR: mailbox-write: {e}");
            return Action::Error;
        }
    };

    let _ = write!(
        ctx.dst,
        "OK mailbox-write: written sector {sector}, erased: {}, skipped {}, checksum: ",
        u8::from(outcome.erased),
        u8::from(outcome.skipped)
    );
    append_digest_hex(&outcome.digest, ctx.dst);
    ctx.dst.push(b'\n');

    sys.mbox_socket.rx.clear();
    sys.mbox_socket.unlock();
    sys.mailbox.consumed();
    Action::Normal
}

pub fn cmd_mailbox_select(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(slot), Ok(permanent)) = parsed else {
        ctx.dst
            .append_str("ERROR mailbox-select: slot and permanent status required\n");
        return Action::Error;
    };
    if slot > u8::MAX as u32 {
        ctx.dst.append_str("ERROR mailbox-select: invalid slot\n");
        return Action::Error;
    }

    let sys = &mut *ctx.sys;
    match boot::select_slot(
        &mut sys.sector,
        ctx.ports.flash,
        ctx.ports.rtc,
        slot as u8,
        permanent != 0,
    ) {
        Ok(_) => {
            let _ = writeln!(
                ctx.dst,
                "OK mailbox-select: slot {slot}, permanent {}",
                u8::from(permanent != 0)
            );
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR mailbox-select: {e}");
            Action::Error
        }
    }
}
