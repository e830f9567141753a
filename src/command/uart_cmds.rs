//! UART configuration and raw write commands.
//!
//! Settings that match the hardware default are elided from the config
//! store: the record only exists when the operator deviates, so a factory
//! reset is one `config-delete uart. -1 -1 1` away.

use core::fmt::Write;

use crate::Error;
use crate::command::{Action, Context};
use crate::parse;
use crate::ports::{UartConfig, UartParity};

fn parse_uart(ctx: &Context) -> Option<u8> {
    match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(uart @ (0 | 1)) => Some(uart as u8),
        _ => None,
    }
}

/// Persist one uart setting, eliding the record when it equals `default`.
fn persist_uart_setting(
    ctx: &mut Context,
    key: &'static str,
    uart: u8,
    value: u32,
    default: u32,
) -> Result<(), Error> {
    let sys = &mut *ctx.sys;
    sys.config.open_write(&mut sys.sector, ctx.ports.flash)?;

    let staged = if value == default {
        sys.config
            .delete(&mut sys.sector, key, i32::from(uart), -1, false)
            .map(|_| ())
    } else {
        sys.config
            .set_uint(&mut sys.sector, key, i32::from(uart), -1, value)
    };

    if let Err(e) = staged {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        return Err(e);
    }
    sys.config.close_write(&mut sys.sector, ctx.ports.flash)
}

pub fn cmd_uart_baudrate(ctx: &mut Context) -> Action {
    let Some(uart) = parse_uart(ctx) else {
        ctx.dst.append_str("ERROR: uart-baudrate: uart 0|1 required\n");
        return Action::Error;
    };
    let Ok(baud) = parse::parse_uint(ctx.src.as_slice(), 2, 0, b' ') else {
        ctx.dst.append_str("ERROR: uart-baudrate: rate required\n");
        return Action::Error;
    };

    let mut cfg = ctx.ports.uart.config(uart);
    cfg.baud = baud;
    if let Err(e) = ctx.ports.uart.configure(uart, &cfg) {
        let _ = writeln!(ctx.dst, "ERROR: uart-baudrate: {e}");
        return Action::Error;
    }

    let default = UartConfig::default().baud;
    if let Err(e) = persist_uart_setting(ctx, "uart.baud.%u", uart, baud, default) {
        let _ = writeln!(ctx.dst, "ERROR: uart-baudrate: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> baudrate[{uart}]: {baud}");
    Action::Normal
}

pub fn cmd_uart_data_bits(ctx: &mut Context) -> Action {
    let Some(uart) = parse_uart(ctx) else {
        ctx.dst.append_str("ERROR: uart-data-bits: uart 0|1 required\n");
        return Action::Error;
    };
    let bits = match parse::parse_uint(ctx.src.as_slice(), 2, 0, b' ') {
        Ok(bits @ 5..=8) => bits as u8,
        _ => {
            ctx.dst.append_str("ERROR: uart-data-bits: 5-8 required\n");
            return Action::Error;
        }
    };

    let mut cfg = ctx.ports.uart.config(uart);
    cfg.data_bits = bits;
    if let Err(e) = ctx.ports.uart.configure(uart, &cfg) {
        let _ = writeln!(ctx.dst, "ERROR: uart-data-bits: {e}");
        return Action::Error;
    }

    let default = u32::from(UartConfig::default().data_bits);
    if let Err(e) = persist_uart_setting(ctx, "uart.data.%u", uart, u32::from(bits), default) {
        let _ = writeln!(ctx.dst, "ERROR: uart-data-bits: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> data bits[{uart}]: {bits}");
    Action::Normal
}

pub fn cmd_uart_stop_bits(ctx: &mut Context) -> Action {
    let Some(uart) = parse_uart(ctx) else {
        ctx.dst.append_str("ERROR: uart-stop-bits: uart 0|1 required\n");
        return Action::Error;
    };
    let bits = match parse::parse_uint(ctx.src.as_slice(), 2, 0, b' ') {
        Ok(bits @ 1..=2) => bits as u8,
        _ => {
            ctx.dst.append_str("ERROR: uart-stop-bits: 1-2 required\n");
            return Action::Error;
        }
    };

    let mut cfg = ctx.ports.uart.config(uart);
    cfg.stop_bits = bits;
    if let Err(e) = ctx.ports.uart.configure(uart, &cfg) {
        let _ = writeln!(ctx.dst, "ERROR: uart-stop-bits: {e}");
        return Action::Error;
    }

    let default = u32::from(UartConfig::default().stop_bits);
    if let Err(e) = persist_uart_setting(ctx, "uart.stop.%u", uart, u32::from(bits), default) {
        let _ = writeln!(ctx.dst, "ERROR: uart-stop-bits: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> stop bits[{uart}]: {bits}");
    Action::Normal
}

pub fn cmd_uart_parity(ctx: &mut Context) -> Action {
    let Some(uart) = parse_uart(ctx) else {
        ctx.dst.append_str("ERROR: uart-parity: uart 0|1 required\n");
        return Action::Error;
    };
    let (parity, value) = match parse::parse_string(ctx.src.as_slice(), 2, b' ') {
        Ok("none") => (UartParity::None, 0),
        Ok("even") => (UartParity::Even, 1),
        Ok("odd") => (UartParity::Odd, 2),
        _ => {
            ctx.dst
                .append_str("ERROR: uart-parity: none|even|odd required\n");
            return Action::Error;
        }
    };

    let mut cfg = ctx.ports.uart.config(uart);
    cfg.parity = parity;
    if let Err(e) = ctx.ports.uart.configure(uart, &cfg) {
        let _ = writeln!(ctx.dst, "ERROR: uart-parity: {e}");
        return Action::Error;
    }

    if let Err(e) = persist_uart_setting(ctx, "uart.parity.%u", uart, value, 0) {
        let _ = writeln!(ctx.dst, "ERROR: uart-parity: {e}");
        return Action::Error;
    }

    let name = match parity {
        UartParity::None => "none",
        UartParity::Even => "even",
        UartParity::Odd => "odd",
    };
    let _ = writeln!(ctx.dst, "> parity[{uart}]: {name}");
    Action::Normal
}

pub fn cmd_uart_loopback(ctx: &mut Context) -> Action {
    let Some(uart) = parse_uart(ctx) else {
        ctx.dst.append_str("ERROR: uart-loopback: uart 0|1 required\n");
        return Action::Error;
    };
    let Ok(enable) = parse::parse_uint(ctx.src.as_slice(), 2, 0, b' ') else {
        ctx.dst.append_str("ERROR: uart-loopback: 0|1 required\n");
        return Action::Error;
    };

    ctx.ports.uart.set_loopback(uart, enable != 0);
    let _ = writeln!(ctx.dst, "> loopback[{uart}]: {}", u8::from(enable != 0));
    Action::Normal
}

pub fn cmd_uart_write(ctx: &mut Context) -> Action {
    let Some(uart) = parse_uart(ctx) else {
        ctx.dst.append_str("ERROR: uart-write: uart 0|1 required\n");
        return Action::Error;
    };
    let Some(offset) = ctx.src.token_offset(0, 2, b' ') else {
        ctx.dst.append_str("ERROR: uart-write: text required\n");
        return Action::Error;
    };

    let payload = &ctx.src.as_slice()[offset..];
    let written = ctx.ports.uart.write(uart, payload);
    ctx.ports.uart.flush(uart);

    let _ = writeln!(ctx.dst, "> uart-write[{uart}]: {written} bytes");
    Action::Normal
}
