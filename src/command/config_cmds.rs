//! Configuration store commands.

use core::fmt::Write;

use crate::buffer::ByteBuf;
use crate::command::{Action, Context};
use crate::config::VALUE_SIZE;
use crate::parse;

pub fn cmd_config_dump(ctx: &mut Context) -> Action {
    let sys = &mut *ctx.sys;
    if !sys
        .config
        .dump(&mut sys.sector, ctx.ports.flash, ctx.dst)
    {
        ctx.dst.append_str("config-dump: failed\n");
        return Action::Error;
    }
    Action::Normal
}

fn parse_indices(src: &[u8]) -> (i32, i32) {
    // Optional positional indices; the second is only read when the
    // first parses, matching the query argument convention.
    match parse::parse_int(src, 2, 0, b' ') {
        Ok(index1) => match parse::parse_int(src, 3, 0, b' ') {
            Ok(index2) => (index1, index2),
            Err(_) => (index1, -1),
        },
        Err(_) => (-1, -1),
    }
}

pub fn cmd_config_query_string(ctx: &mut Context) -> Action {
    let name = match parse::parse_string(ctx.src.as_slice(), 1, b' ') {
        Ok(name) => name,
        Err(_) => {
            ctx.dst.append_str("missing variable name\n");
            return Action::Error;
        }
    };
    let (index1, index2) = parse_indices(ctx.src.as_slice());

    let mut value: ByteBuf<VALUE_SIZE> = ByteBuf::new();
    let sys = &mut *ctx.sys;
    if !sys.config.get_string(
        &mut sys.sector,
        ctx.ports.flash,
        name,
        index1,
        index2,
        &mut value,
    ) {
        ctx.dst.append_str("ERROR\n");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "{name}={} OK", value.as_str());
    Action::Normal
}

pub fn cmd_config_query_int(ctx: &mut Context) -> Action {
    let name = match parse::parse_string(ctx.src.as_slice(), 1, b' ') {
        Ok(name) => name,
        Err(_) => {
            ctx.dst.append_str("missing variable name\n");
            return Action::Error;
        }
    };
    let (index1, index2) = parse_indices(ctx.src.as_slice());

    let sys = &mut *ctx.sys;
    match sys
        .config
        .get_uint(&mut sys.sector, ctx.ports.flash, name, index1, index2)
    {
        Some(value) => {
            let _ = writeln!(ctx.dst, "{name}={value} OK");
            Action::Normal
        }
        None => {
            ctx.dst.append_str("ERROR\n");
            Action::Error
        }
    }
}

pub fn cmd_config_set(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();

    let parsed = (
        parse::parse_string(src, 1, b' '),
        parse::parse_int(src, 2, 0, b' '),
        parse::parse_int(src, 3, 0, b' '),
        ctx.src.token_offset(0, 4, b' '),
    );
    let (Ok(name), Ok(index1), Ok(index2), Some(value_offset)) = parsed else {
        ctx.dst
            .append_str("usage: config-set <variable name pattern> <index1> <index2> <value>\n");
        return Action::Error;
    };

    let Ok(value) = core::str::from_utf8(&src[value_offset..]) else {
        ctx.dst.append_str("ERROR: value not valid UTF-8\n");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    if let Err(e) = sys.config.open_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "config set failure (open): {e}");
        return Action::Error;
    }
    if let Err(e) = sys
        .config
        .set_string(&mut sys.sector, name, index1, index2, value)
    {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        sys.stats.config_aborts = sys.stats.config_aborts.saturating_add(1);
        let _ = writeln!(ctx.dst, "config set failure (set): {e}");
        return Action::Error;
    }
    if let Err(e) = sys.config.close_write(&mut sys.sector, ctx.ports.flash) {
        sys.stats.config_aborts = sys.stats.config_aborts.saturating_add(1);
        let _ = writeln!(ctx.dst, "config set failure (close): {e}");
        return Action::Error;
    }
    sys.stats.config_commits = sys.stats.config_commits.saturating_add(1);

    ctx.dst.append_str("OK\n");
    Action::Normal
}

pub fn cmd_config_delete(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();

    let name = match parse::parse_string(src, 1, b' ') {
        Ok(name) => name,
        Err(_) => {
            ctx.dst.append_str("missing variable name\n");
            return Action::Error;
        }
    };
    let index1 = parse::parse_int(src, 2, 0, b' ').unwrap_or(-1);
    let index2 = parse::parse_int(src, 3, 0, b' ').unwrap_or(-1);
    let wildcard = parse::parse_uint(src, 4, 0, b' ').unwrap_or(0) != 0;

    let sys = &mut *ctx.sys;
    if let Err(e) = sys.config.open_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "config-delete: open failed: {e}");
        return Action::Error;
    }
    let removed = match sys
        .config
        .delete(&mut sys.sector, name, index1, index2, wildcard)
    {
        Ok(removed) => removed,
        Err(e) => {
            sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
            let _ = writeln!(ctx.dst, "config-delete: {e}");
            return Action::Error;
        }
    };
    if let Err(e) = sys.config.close_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "config-delete: close failed: {e}");
        return Action::Error;
    }
    sys.stats.config_commits = sys.stats.config_commits.saturating_add(1);

    let _ = writeln!(ctx.dst, "OK config-delete: {removed} entries deleted");
    Action::Normal
}

// ── port configuration ────────────────────────────────────────

/// Persist a port setting; a zero or default value elides the record.
fn set_port(ctx: &mut Context, key: &'static str, default: u16, label: &str) -> Action {
    let port = match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(port) if port <= u16::MAX as u32 => port as u16,
        _ => {
            let _ = writeln!(ctx.dst, "ERROR: {label}: port required");
            return Action::Error;
        }
    };

    let sys = &mut *ctx.sys;
    if let Err(e) = sys.config.open_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
        return Action::Error;
    }

    let result = if port == default {
        sys.config
            .delete(&mut sys.sector, key, -1, -1, false)
            .map(|_| ())
    } else {
        sys.config.set_uint(&mut sys.sector, key, -1, -1, u32::from(port))
    };

    if let Err(e) = result {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
        return Action::Error;
    }
    if let Err(e) = sys.config.close_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> {label}: {port} (effective after reset)");
    Action::Normal
}

pub fn cmd_bridge_port(ctx: &mut Context) -> Action {
    set_port(ctx, "bridge.port", 0, "bridge port")
}

pub fn cmd_command_port(ctx: &mut Context) -> Action {
    set_port(ctx, "cmd.port", 24, "command port")
}
