//! Wall clock, timezone and SNTP commands.

use core::fmt::Write;

use crate::command::{Action, Context};
use crate::parse;

fn report_time(ctx: &mut Context) {
    let (now, source) = ctx.sys.timekeeper.now(ctx.ports.platform);
    let local = ctx.sys.timekeeper.now_local(ctx.ports.platform);
    let _ = writeln!(ctx.dst, "> time: {now} utc, {local} local ({})", source.name());
}

pub fn cmd_time_set(ctx: &mut Context) -> Action {
    let Ok(seconds) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: time-set <unix seconds>\n");
        return Action::Error;
    };

    ctx.sys
        .timekeeper
        .set_time(u64::from(seconds), ctx.ports.platform);
    report_time(ctx);
    Action::Normal
}

/// Like `time-set` but also stamps the log ring, so a later `log-display`
/// can be correlated with host time.
pub fn cmd_time_stamp_set(ctx: &mut Context) -> Action {
    let Ok(seconds) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: time-stamp-set <unix seconds>\n");
        return Action::Error;
    };

    ctx.sys
        .timekeeper
        .set_time(u64::from(seconds), ctx.ports.platform);

    let mut line: crate::buffer::ByteBuf<48> = crate::buffer::ByteBuf::new();
    let _ = write!(line, "time stamp set: {seconds}");
    ctx.sys.log_line(line.as_str(), ctx.ports.uart);

    report_time(ctx);
    Action::Normal
}

pub fn cmd_time_zone_set(ctx: &mut Context) -> Action {
    let Ok(minutes) = parse::parse_int(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: time-zone-set <offset minutes>\n");
        return Action::Error;
    };
    if !(-720..=840).contains(&minutes) {
        ctx.dst.append_str("ERROR: time-zone-set: offset out of range\n");
        return Action::Error;
    }

    ctx.sys.timekeeper.set_timezone(minutes);
    report_time(ctx);
    Action::Normal
}

pub fn cmd_sntp_set(ctx: &mut Context) -> Action {
    let Some(addr) = parse::parse_string(ctx.src.as_slice(), 1, b' ')
        .ok()
        .and_then(parse::parse_ipv4)
    else {
        ctx.dst.append_str("usage: sntp-set <a.b.c.d>\n");
        return Action::Error;
    };

    let mut value: crate::buffer::ByteBuf<16> = crate::buffer::ByteBuf::new();
    let _ = write!(value, "{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3]);

    let sys = &mut *ctx.sys;
    if let Err(e) = sys.config.open_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: sntp-set: {e}");
        return Action::Error;
    }
    if let Err(e) = sys
        .config
        .set_string(&mut sys.sector, "sntp.server", -1, -1, value.as_str())
    {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        let _ = writeln!(ctx.dst, "ERROR: sntp-set: {e}");
        return Action::Error;
    }
    if let Err(e) = sys.config.close_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: sntp-set: {e}");
        return Action::Error;
    }

    sys.timekeeper.set_server(addr);
    let _ = writeln!(ctx.dst, "> sntp server: {}", value.as_str());
    Action::Normal
}
