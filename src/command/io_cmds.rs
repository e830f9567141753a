//! GPIO, trigger and PWM commands.

use core::fmt::Write;

use crate::command::{Action, Context};
use crate::io::{PinFlag, TriggerAction};
use crate::parse;
use crate::ports::{Peer, PeerProto, PinMode, SocketId};

fn parse_io_pin(ctx: &Context) -> Option<(u8, u8)> {
    let src = ctx.src.as_slice();
    let io = parse::parse_uint(src, 1, 0, b' ').ok()?;
    let pin = parse::parse_uint(src, 2, 0, b' ').ok()?;
    if io > 7 || pin > 31 {
        return None;
    }
    Some((io as u8, pin as u8))
}

pub fn cmd_io_mode(ctx: &mut Context) -> Action {
    let Some((io, pin)) = parse_io_pin(ctx) else {
        ctx.dst.append_str("ERROR: io-mode: io and pin required\n");
        return Action::Error;
    };
    let mode = match parse::parse_string(ctx.src.as_slice(), 3, b' ') {
        Ok("disabled") => PinMode::Disabled,
        Ok("input") => PinMode::Input,
        Ok("output") => PinMode::Output,
        Ok("opendrain") => PinMode::OpenDrain,
        Ok("pwm") => PinMode::Pwm,
        _ => {
            ctx.dst.append_str(
                "ERROR: io-mode: mode is disabled|input|output|opendrain|pwm\n",
            );
            return Action::Error;
        }
    };

    if let Err(e) = ctx.ports.pins.set_mode(io, pin, mode) {
        let _ = writeln!(ctx.dst, "ERROR: io-mode: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> io {io} pin {pin} mode set");
    Action::Normal
}

pub fn cmd_io_read(ctx: &mut Context) -> Action {
    let Some((io, pin)) = parse_io_pin(ctx) else {
        ctx.dst.append_str("ERROR: io-read: io and pin required\n");
        return Action::Error;
    };

    match ctx.ports.pins.read_pin(io, pin) {
        Ok(level) => {
            let _ = writeln!(ctx.dst, "> io {io} pin {pin}: {}", u8::from(level));
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: io-read: {e}");
            Action::Error
        }
    }
}

pub fn cmd_io_write(ctx: &mut Context) -> Action {
    let Some((io, pin)) = parse_io_pin(ctx) else {
        ctx.dst.append_str("ERROR: io-write: io and pin required\n");
        return Action::Error;
    };
    let Ok(value) = parse::parse_uint(ctx.src.as_slice(), 3, 0, b' ') else {
        ctx.dst.append_str("ERROR: io-write: value required\n");
        return Action::Error;
    };

    if let Err(e) = ctx.ports.pins.write_pin(io, pin, value != 0) {
        let _ = writeln!(ctx.dst, "ERROR: io-write: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> io {io} pin {pin}: {}", u8::from(value != 0));
    Action::Normal
}

pub fn cmd_io_trigger(ctx: &mut Context) -> Action {
    let Some((io, pin)) = parse_io_pin(ctx) else {
        ctx.dst.append_str("ERROR: io-trigger: io and pin required\n");
        return Action::Error;
    };
    let action = match parse::parse_string(ctx.src.as_slice(), 3, b' ')
        .ok()
        .and_then(TriggerAction::from_name)
    {
        Some(action) => action,
        None => {
            ctx.dst
                .append_str("ERROR: io-trigger: action is off|on|toggle\n");
            return Action::Error;
        }
    };

    match ctx.sys.iostate.trigger(ctx.ports.pins, io, pin, action) {
        Ok(level) => {
            let _ = writeln!(
                ctx.dst,
                "> io {io} pin {pin} triggered, level: {}",
                u8::from(level)
            );
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: io-trigger: {e}");
            Action::Error
        }
    }
}

/// Fire a trigger on a remote bridge: one UDP datagram carrying the same
/// `io-trigger` line, addressed at the remote's command port.
pub fn cmd_io_trigger_remote(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();

    let parsed = (
        parse::parse_string(src, 1, b' ').ok().and_then(parse::parse_ipv4),
        parse::parse_uint(src, 2, 0, b' '),
        parse::parse_uint(src, 3, 0, b' '),
        parse::parse_string(src, 4, b' '),
    );
    let (Some(addr), Ok(io), Ok(pin), Ok(action)) = parsed else {
        ctx.dst
            .append_str("ERROR: io-trigger-remote: <ip> <io> <pin> <action> required\n");
        return Action::Error;
    };

    if TriggerAction::from_name(action).is_none() {
        ctx.dst
            .append_str("ERROR: io-trigger-remote: action is off|on|toggle\n");
        return Action::Error;
    }

    let peer = Peer {
        proto: PeerProto::Udp,
        addr,
        port: ctx.sys.cmd_port,
    };
    let mut line: crate::buffer::ByteBuf<64> = crate::buffer::ByteBuf::new();
    let _ = writeln!(line, "io-trigger {io} {pin} {action}");

    if let Err(e) = ctx
        .ports
        .net
        .send_udp(SocketId::Command, peer, line.as_slice())
    {
        let _ = writeln!(ctx.dst, "ERROR: io-trigger-remote: {e}");
        return Action::Error;
    }

    let _ = writeln!(
        ctx.dst,
        "> remote trigger sent to {}.{}.{}.{}",
        addr[0], addr[1], addr[2], addr[3]
    );
    Action::Normal
}

pub fn cmd_io_set_mask(ctx: &mut Context) -> Action {
    let Ok(mask) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: io-set-mask: mask required\n");
        return Action::Error;
    };
    ctx.sys.iostate.write_mask = mask;
    let _ = writeln!(ctx.dst, "> io write mask: 0x{mask:08x}");
    Action::Normal
}

fn io_flag(ctx: &mut Context, set: bool) -> Action {
    let label = if set { "io-set-flag" } else { "io-clear-flag" };

    let Some((io, pin)) = parse_io_pin(ctx) else {
        let _ = writeln!(ctx.dst, "ERROR: {label}: io and pin required");
        return Action::Error;
    };
    let flag = match parse::parse_string(ctx.src.as_slice(), 3, b' ')
        .ok()
        .and_then(PinFlag::from_name)
    {
        Some(flag) => flag,
        None => {
            let _ = writeln!(
                ctx.dst,
                "ERROR: {label}: flag is autostart|repeat|pullup|inverted-output"
            );
            return Action::Error;
        }
    };

    if set {
        if let Err(e) = ctx.sys.iostate.set_flag(io, pin, flag) {
            let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
            return Action::Error;
        }
    } else {
        ctx.sys.iostate.clear_flag(io, pin, flag);
    }

    ctx.sys.iostate.render_flags(io, pin, ctx.dst);
    Action::Normal
}

pub fn cmd_io_set_flag(ctx: &mut Context) -> Action {
    io_flag(ctx, true)
}

pub fn cmd_io_clear_flag(ctx: &mut Context) -> Action {
    io_flag(ctx, false)
}

pub fn cmd_pwm_width(ctx: &mut Context) -> Action {
    let Some((io, pin)) = parse_io_pin(ctx) else {
        ctx.dst.append_str("ERROR: pwm-width: io and pin required\n");
        return Action::Error;
    };
    let Ok(width) = parse::parse_uint(ctx.src.as_slice(), 3, 0, b' ') else {
        ctx.dst.append_str("ERROR: pwm-width: width required\n");
        return Action::Error;
    };

    if ctx.ports.pins.pin_mode(io, pin) != Some(PinMode::Pwm) {
        let _ = writeln!(ctx.dst, "ERROR: pwm-width: io {io} pin {pin} not in pwm mode");
        return Action::Error;
    }

    if let Err(e) = ctx.ports.pins.set_pwm_width(io, pin, width) {
        let _ = writeln!(ctx.dst, "ERROR: pwm-width: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> io {io} pin {pin} pwm width: {width}");
    Action::Normal
}

// ── status / association indicators ───────────────────────────

fn gpio_indicator(ctx: &mut Context, status: bool) -> Action {
    let label = if status {
        "gpio-status-set"
    } else {
        "gpio-association-set"
    };
    let key_io: &'static str = if status {
        "trigger.status.io"
    } else {
        "trigger.assoc.io"
    };
    let key_pin: &'static str = if status {
        "trigger.status.pin"
    } else {
        "trigger.assoc.pin"
    };

    let Some((io, pin)) = parse_io_pin(ctx) else {
        let _ = writeln!(ctx.dst, "ERROR: {label}: io and pin required");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    if let Err(e) = sys.config.open_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
        return Action::Error;
    }
    let stored = sys
        .config
        .set_uint(&mut sys.sector, key_io, -1, -1, u32::from(io))
        .and_then(|()| {
            sys.config
                .set_uint(&mut sys.sector, key_pin, -1, -1, u32::from(pin))
        });
    if let Err(e) = stored {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
        return Action::Error;
    }
    if let Err(e) = sys.config.close_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: {label}: {e}");
        return Action::Error;
    }

    if status {
        sys.iostate.status_trigger = Some((io, pin));
    } else {
        sys.iostate.assoc_trigger = Some((io, pin));
    }

    let _ = writeln!(ctx.dst, "> {label}: io {io} pin {pin}");
    Action::Normal
}

pub fn cmd_gpio_status_set(ctx: &mut Context) -> Action {
    gpio_indicator(ctx, true)
}

pub fn cmd_gpio_association_set(ctx: &mut Context) -> Action {
    gpio_indicator(ctx, false)
}
