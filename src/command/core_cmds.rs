//! Session, identification, statistics, flag, log and raw-memory commands.

use core::fmt::Write;

use crate::Error;
use crate::command::{Action, Context, table};
use crate::config::Flag;
use crate::parse;
use crate::time::TimeSource;

pub fn cmd_help(ctx: &mut Context) -> Action {
    for command in table::COMMANDS {
        let _ = writeln!(
            ctx.dst,
            "> {}/{}: {}",
            command.short, command.long, command.help
        );
    }
    Action::Normal
}

pub fn cmd_quit(_ctx: &mut Context) -> Action {
    Action::Disconnect
}

pub fn cmd_reset(_ctx: &mut Context) -> Action {
    Action::Reset
}

pub fn cmd_identification(ctx: &mut Context) -> Action {
    let _ = writeln!(
        ctx.dst,
        "OK iobridge {} (built {}), command port: {}, mailbox port: {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        ctx.sys.cmd_port,
        ctx.sys.mailbox_port
    );
    Action::Normal
}

// ── statistics ────────────────────────────────────────────────

pub fn cmd_stats(ctx: &mut Context) -> Action {
    let uptime = ctx.ports.platform.uptime_us();
    ctx.sys.stats.render_firmware(ctx.dst, uptime);
    Action::Normal
}

pub fn cmd_stats_flash(ctx: &mut Context) -> Action {
    ctx.sys.stats.render_flash(ctx.dst);
    Action::Normal
}

pub fn cmd_stats_counters(ctx: &mut Context) -> Action {
    ctx.sys.stats.render_counters(ctx.dst);
    Action::Normal
}

pub fn cmd_stats_wlan(ctx: &mut Context) -> Action {
    ctx.sys.stats.render_wlan(ctx.dst);
    let _ = writeln!(
        ctx.dst,
        ">  associated: {}, ip: {}, recovery: {}",
        u8::from(ctx.sys.wlan.associated()),
        u8::from(ctx.sys.wlan.has_ip()),
        u8::from(ctx.sys.wlan.in_recovery())
    );
    Action::Normal
}

pub fn cmd_stats_time(ctx: &mut Context) -> Action {
    let (now, source) = ctx.sys.timekeeper.now(ctx.ports.platform);
    let _ = writeln!(ctx.dst, "> time: {} ({})", now, source.name());
    let _ = writeln!(
        ctx.dst,
        ">  timezone offset: {} minutes",
        ctx.sys.timekeeper.timezone()
    );
    match ctx.sys.timekeeper.server() {
        Some(addr) => {
            let _ = writeln!(
                ctx.dst,
                ">  sntp server: {}.{}.{}.{}, synchronised: {}",
                addr[0],
                addr[1],
                addr[2],
                addr[3],
                u8::from(source == TimeSource::Sntp)
            );
        }
        None => {
            let _ = writeln!(ctx.dst, ">  sntp server: not configured");
        }
    }
    Action::Normal
}

pub fn cmd_stats_i2c(ctx: &mut Context) -> Action {
    let _ = writeln!(
        ctx.dst,
        "> i2c bus: {}, device address: 0x{:02x}",
        ctx.ports.i2c.current_bus(),
        ctx.sys.i2c_address
    );
    let _ = writeln!(
        ctx.dst,
        ">  sensor updates: {}",
        ctx.sys.stats.i2c_sensor_updates
    );
    Action::Normal
}

pub fn cmd_stats_sequencer(ctx: &mut Context) -> Action {
    ctx.sys.sequencer.render(ctx.dst);
    Action::Normal
}

// ── flags ─────────────────────────────────────────────────────

fn persist_flags(ctx: &mut Context) -> Result<(), Error> {
    let list = ctx.sys.flags.render_list();
    let sys = &mut *ctx.sys;
    sys.config.open_write(&mut sys.sector, ctx.ports.flash)?;
    if let Err(e) = sys
        .config
        .set_string(&mut sys.sector, "flags", -1, -1, list.as_str())
    {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        return Err(e);
    }
    sys.config.close_write(&mut sys.sector, ctx.ports.flash)?;
    sys.stats.config_commits = sys.stats.config_commits.saturating_add(1);
    Ok(())
}

fn flag_set_unset(ctx: &mut Context, enable: bool) -> Action {
    let name = match parse::parse_string(ctx.src.as_slice(), 1, b' ') {
        Ok(name) => name,
        Err(_) => {
            ctx.dst.append_str("ERROR: flag name required\n");
            return Action::Error;
        }
    };

    let Some(flag) = Flag::from_name(name) else {
        let _ = writeln!(ctx.dst, "ERROR: unknown flag: {name}");
        return Action::Error;
    };

    ctx.sys.flags.set(flag, enable);

    if let Err(e) = persist_flags(ctx) {
        let _ = writeln!(ctx.dst, "ERROR: flag persist failed: {e}");
        return Action::Error;
    }

    // Both set and unset echo the full table so the operator sees the
    // resulting state at a glance.
    let flags = ctx.sys.flags;
    flags.render_table(ctx.dst);
    Action::Normal
}

pub fn cmd_flag_set(ctx: &mut Context) -> Action {
    flag_set_unset(ctx, true)
}

pub fn cmd_flag_unset(ctx: &mut Context) -> Action {
    flag_set_unset(ctx, false)
}

// ── log ring ──────────────────────────────────────────────────

pub fn cmd_log_display(ctx: &mut Context) -> Action {
    if ctx.sys.logring.is_empty() {
        ctx.dst.append_str("> log empty\n");
    } else {
        ctx.sys.logring.render(ctx.dst);
    }
    Action::Normal
}

pub fn cmd_log_clear(ctx: &mut Context) -> Action {
    ctx.sys.logring.clear();
    ctx.dst.append_str("> log cleared\n");
    Action::Normal
}

pub fn cmd_log_write(ctx: &mut Context) -> Action {
    match ctx.src.token_offset(0, 1, b' ') {
        Some(offset) => {
            let text = &ctx.src.as_slice()[offset..];
            if let Ok(text) = core::str::from_utf8(text) {
                ctx.sys.log_line(text, ctx.ports.uart);
            }
            ctx.dst.append_str("> logged\n");
            Action::Normal
        }
        None => {
            ctx.dst.append_str("ERROR: log-write: text required\n");
            Action::Error
        }
    }
}

// ── raw memory ────────────────────────────────────────────────

pub fn cmd_peek(ctx: &mut Context) -> Action {
    let address = match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(address) => address & !3,
        Err(_) => {
            ctx.dst.append_str("ERROR: peek: address required\n");
            return Action::Error;
        }
    };

    match ctx.ports.platform.peek(address) {
        Some(value) => {
            let _ = writeln!(ctx.dst, "> peek 0x{address:08x}: 0x{value:08x}");
            Action::Normal
        }
        None => {
            let _ = writeln!(ctx.dst, "ERROR: peek: 0x{address:08x} unmapped");
            Action::Error
        }
    }
}

pub fn cmd_poke(ctx: &mut Context) -> Action {
    let (address, value) = match (
        parse::parse_uint(ctx.src.as_slice(), 1, 0, b' '),
        parse::parse_uint(ctx.src.as_slice(), 2, 0, b' '),
    ) {
        (Ok(address), Ok(value)) => (address & !3, value),
        _ => {
            ctx.dst.append_str("ERROR: poke: address and value required\n");
            return Action::Error;
        }
    };

    if ctx.ports.platform.poke(address, value) {
        let _ = writeln!(ctx.dst, "> poke 0x{address:08x}: 0x{value:08x}");
        Action::Normal
    } else {
        let _ = writeln!(ctx.dst, "ERROR: poke: 0x{address:08x} refused");
        Action::Error
    }
}

// ── HTTP back-door ────────────────────────────────────────────

pub fn cmd_http_get(ctx: &mut Context) -> Action {
    let uptime = ctx.ports.platform.uptime_us() / 1_000_000;
    let _ = write!(
        ctx.dst,
        "<html><head><title>iobridge</title></head><body><pre>\n\
         iobridge {}\nuptime: {} s\n</pre></body></html>\n",
        env!("CARGO_PKG_VERSION"),
        uptime
    );
    Action::HttpOk
}
