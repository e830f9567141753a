//! I²C, SPI and I²C-sensor commands.
//!
//! The bus ports expose raw transactions; the sensor commands layer a
//! small fixed table of known devices plus per-sensor calibration over
//! them. Payload bytes on the command line are hex tokens.

use core::fmt::Write;

use crate::buffer::ByteBuf;
use crate::command::{Action, Context};
use crate::parse;
use crate::ports::SpiConfig;
use crate::system::SensorCal;

const MAX_PAYLOAD: usize = 32;

/// Known I²C sensors: `(id, address, name, register)`.
const SENSORS: &[(u8, u8, &str, u8)] = &[
    (0, 0x48, "tmp75", 0x00),
    (1, 0x40, "htu21", 0xe3),
    (2, 0x23, "bh1750", 0x10),
];

fn parse_hex_payload(ctx: &Context, first_token: usize) -> Option<ByteBuf<MAX_PAYLOAD>> {
    let mut payload: ByteBuf<MAX_PAYLOAD> = ByteBuf::new();
    let mut index = first_token;
    while let Ok(byte) = parse::parse_uint(ctx.src.as_slice(), index, 16, b' ') {
        if byte > 0xff {
            return None;
        }
        payload.push(byte as u8);
        index += 1;
    }
    (index > first_token).then_some(payload)
}

fn append_hex<const CAP: usize>(dst: &mut ByteBuf<CAP>, data: &[u8]) {
    for byte in data {
        let _ = write!(dst, " {byte:02x}");
    }
}

// ── i2c ───────────────────────────────────────────────────────

pub fn cmd_i2c_address(ctx: &mut Context) -> Action {
    let address = match parse::parse_uint(ctx.src.as_slice(), 1, 16, b' ') {
        Ok(address) if address <= 0x7f => address as u8,
        _ => {
            ctx.dst
                .append_str("ERROR: i2c-address: 7-bit hex address required\n");
            return Action::Error;
        }
    };
    ctx.sys.i2c_address = address;
    let _ = writeln!(ctx.dst, "> i2c address: 0x{address:02x}");
    Action::Normal
}

pub fn cmd_i2c_bus(ctx: &mut Context) -> Action {
    let Ok(bus) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: i2c-bus: bus required\n");
        return Action::Error;
    };
    if let Err(e) = ctx.ports.i2c.select_bus(bus as u8) {
        let _ = writeln!(ctx.dst, "ERROR: i2c-bus: {e}");
        return Action::Error;
    }
    let _ = writeln!(ctx.dst, "> i2c bus: {bus}");
    Action::Normal
}

pub fn cmd_i2c_speed(ctx: &mut Context) -> Action {
    let Ok(speed) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: i2c-speed: kHz required\n");
        return Action::Error;
    };
    if let Err(e) = ctx.ports.i2c.set_speed(speed) {
        let _ = writeln!(ctx.dst, "ERROR: i2c-speed: {e}");
        return Action::Error;
    }
    let _ = writeln!(ctx.dst, "> i2c speed: {speed} kHz");
    Action::Normal
}

pub fn cmd_i2c_read(ctx: &mut Context) -> Action {
    let length = match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(length) if (1..=MAX_PAYLOAD as u32).contains(&length) => length as usize,
        _ => {
            ctx.dst.append_str("ERROR: i2c-read: length 1-32 required\n");
            return Action::Error;
        }
    };

    let address = ctx.sys.i2c_address;
    let mut input = [0u8; MAX_PAYLOAD];
    match ctx.ports.i2c.write_read(address, &[], &mut input[..length]) {
        Ok(got) => {
            let _ = write!(ctx.dst, "> i2c-read 0x{address:02x}:");
            append_hex(ctx.dst, &input[..got]);
            ctx.dst.push(b'\n');
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: i2c-read: {e}");
            Action::Error
        }
    }
}

pub fn cmd_i2c_write(ctx: &mut Context) -> Action {
    let Some(payload) = parse_hex_payload(ctx, 1) else {
        ctx.dst
            .append_str("ERROR: i2c-write: hex bytes required\n");
        return Action::Error;
    };

    let address = ctx.sys.i2c_address;
    match ctx
        .ports
        .i2c
        .write_read(address, payload.as_slice(), &mut [])
    {
        Ok(_) => {
            let _ = writeln!(
                ctx.dst,
                "> i2c-write 0x{address:02x}: {} bytes",
                payload.len()
            );
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: i2c-write: {e}");
            Action::Error
        }
    }
}

pub fn cmd_i2c_write_read(ctx: &mut Context) -> Action {
    let length = match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(length) if (1..=MAX_PAYLOAD as u32).contains(&length) => length as usize,
        _ => {
            ctx.dst
                .append_str("ERROR: i2c-write-read: read length 1-32 required\n");
            return Action::Error;
        }
    };
    let Some(payload) = parse_hex_payload(ctx, 2) else {
        ctx.dst
            .append_str("ERROR: i2c-write-read: hex bytes required\n");
        return Action::Error;
    };

    let address = ctx.sys.i2c_address;
    let mut input = [0u8; MAX_PAYLOAD];
    match ctx
        .ports
        .i2c
        .write_read(address, payload.as_slice(), &mut input[..length])
    {
        Ok(got) => {
            let _ = write!(ctx.dst, "> i2c-write-read 0x{address:02x}:");
            append_hex(ctx.dst, &input[..got]);
            ctx.dst.push(b'\n');
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: i2c-write-read: {e}");
            Action::Error
        }
    }
}

// ── spi ───────────────────────────────────────────────────────

pub fn cmd_spi_configure(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
        parse::parse_uint(src, 3, 0, b' '),
        parse::parse_uint(src, 4, 0, b' '),
    );
    let (Ok(mode), Ok(speed), Ok(cs_io), Ok(cs_pin)) = parsed else {
        ctx.dst.append_str(
            "usage: spi-configure <mode 0-3> <speed kHz> <cs io> <cs pin>\n",
        );
        return Action::Error;
    };
    if mode > 3 {
        ctx.dst.append_str("ERROR: spi-configure: mode 0-3\n");
        return Action::Error;
    }

    let cfg = SpiConfig {
        mode: mode as u8,
        speed_khz: speed,
        cs_io: cs_io as u8,
        cs_pin: cs_pin as u8,
    };
    if let Err(e) = ctx.ports.spi.configure(&cfg) {
        let _ = writeln!(ctx.dst, "ERROR: spi-configure: {e}");
        return Action::Error;
    }

    let _ = writeln!(
        ctx.dst,
        "> spi: mode {mode}, {speed} kHz, cs io {cs_io} pin {cs_pin}"
    );
    Action::Normal
}

pub fn cmd_spi_start(ctx: &mut Context) -> Action {
    ctx.sys.spi_staged.clear();
    if let Err(e) = ctx.ports.spi.start() {
        let _ = writeln!(ctx.dst, "ERROR: spi-start: {e}");
        return Action::Error;
    }
    ctx.dst.append_str("> spi transaction started\n");
    Action::Normal
}

pub fn cmd_spi_write(ctx: &mut Context) -> Action {
    let Some(payload) = parse_hex_payload(ctx, 1) else {
        ctx.dst.append_str("ERROR: spi-write: hex bytes required\n");
        return Action::Error;
    };

    ctx.sys.spi_staged.append(payload.as_slice());
    let _ = writeln!(
        ctx.dst,
        "> spi staged: {} bytes total",
        ctx.sys.spi_staged.len()
    );
    Action::Normal
}

pub fn cmd_spi_transmit(ctx: &mut Context) -> Action {
    let staged = ctx.sys.spi_staged.clone();
    match ctx.ports.spi.transfer(staged.as_slice(), &mut []) {
        Ok(_) => {
            ctx.sys.spi_staged.clear();
            let _ = writeln!(ctx.dst, "> spi transmitted: {} bytes", staged.len());
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: spi-transmit: {e}");
            Action::Error
        }
    }
}

pub fn cmd_spi_receive(ctx: &mut Context) -> Action {
    let length = match parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') {
        Ok(length) if (1..=MAX_PAYLOAD as u32).contains(&length) => length as usize,
        _ => {
            ctx.dst
                .append_str("ERROR: spi-receive: length 1-32 required\n");
            return Action::Error;
        }
    };

    let mut input = [0u8; MAX_PAYLOAD];
    match ctx.ports.spi.transfer(&[], &mut input[..length]) {
        Ok(got) => {
            let _ = write!(ctx.dst, "> spi-receive:");
            append_hex(ctx.dst, &input[..got]);
            ctx.dst.push(b'\n');
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: spi-receive: {e}");
            Action::Error
        }
    }
}

pub fn cmd_spi_finish(ctx: &mut Context) -> Action {
    if let Err(e) = ctx.ports.spi.finish() {
        let _ = writeln!(ctx.dst, "ERROR: spi-finish: {e}");
        return Action::Error;
    }
    ctx.dst.append_str("> spi transaction finished\n");
    Action::Normal
}

// ── i2c sensors ───────────────────────────────────────────────

fn sensor_by_id(id: u8) -> Option<&'static (u8, u8, &'static str, u8)> {
    SENSORS.iter().find(|entry| entry.0 == id)
}

pub fn cmd_i2c_sensor_read(ctx: &mut Context) -> Action {
    let Ok(id) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("ERROR: i2c-sensor-read: id required\n");
        return Action::Error;
    };
    let Some(&(id, address, name, register)) = sensor_by_id(id as u8) else {
        ctx.dst.append_str("ERROR: i2c-sensor-read: unknown sensor\n");
        return Action::Error;
    };

    let mut raw = [0u8; 2];
    match ctx.ports.i2c.write_read(address, &[register], &mut raw) {
        Ok(2) => {
            let cal = ctx
                .sys
                .sensor_cal
                .get(&id)
                .copied()
                .unwrap_or(SensorCal::IDENTITY);
            let raw_value = u16::from_be_bytes(raw);
            let value = f32::from(raw_value) * cal.factor + cal.offset;
            ctx.sys.stats.i2c_sensor_updates = ctx.sys.stats.i2c_sensor_updates.saturating_add(1);
            let _ = writeln!(
                ctx.dst,
                "> sensor {id} ({name}): raw {raw_value}, value {value:.2}"
            );
            Action::Normal
        }
        Ok(_) => {
            let _ = writeln!(ctx.dst, "ERROR: i2c-sensor-read: short read from {name}");
            Action::Error
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: i2c-sensor-read: {e}");
            Action::Error
        }
    }
}

pub fn cmd_i2c_sensor_calibrate(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_float(src, 2, b' '),
        parse::parse_float(src, 3, b' '),
    );
    let (Ok(id), Ok(factor), Ok(offset)) = parsed else {
        ctx.dst
            .append_str("usage: i2c-sensor-calibrate <id> <factor> <offset>\n");
        return Action::Error;
    };
    if sensor_by_id(id as u8).is_none() {
        ctx.dst
            .append_str("ERROR: i2c-sensor-calibrate: unknown sensor\n");
        return Action::Error;
    }

    if ctx
        .sys
        .sensor_cal
        .insert(id as u8, SensorCal { factor, offset })
        .is_err()
    {
        ctx.dst
            .append_str("ERROR: i2c-sensor-calibrate: table full\n");
        return Action::Error;
    }

    let _ = writeln!(
        ctx.dst,
        "> sensor {id} calibration: factor {factor:.4}, offset {offset:.4}"
    );
    Action::Normal
}

pub fn cmd_i2c_sensor_dump(ctx: &mut Context) -> Action {
    for &(id, address, name, register) in SENSORS {
        let cal = ctx
            .sys
            .sensor_cal
            .get(&id)
            .copied()
            .unwrap_or(SensorCal::IDENTITY);
        let _ = writeln!(
            ctx.dst,
            "> sensor {id}: {name} at 0x{address:02x} reg 0x{register:02x}, \
             factor {:.4}, offset {:.4}",
            cal.factor, cal.offset
        );
    }
    Action::Normal
}
