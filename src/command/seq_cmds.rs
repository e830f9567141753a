//! Sequencer commands.

use core::fmt::Write;

use crate::command::{Action, Context};
use crate::parse;
use crate::sequencer::Step;

pub fn cmd_sequencer_add(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
        parse::parse_uint(src, 3, 0, b' '),
        parse::parse_uint(src, 4, 0, b' '),
    );
    let (Ok(io), Ok(pin), Ok(level), Ok(hold_ds)) = parsed else {
        ctx.dst
            .append_str("usage: sequencer-add <io> <pin> <0|1> <hold ds>\n");
        return Action::Error;
    };
    if hold_ds > u32::from(u16::MAX) {
        ctx.dst.append_str("ERROR: sequencer-add: hold too long\n");
        return Action::Error;
    }

    let step = Step {
        io: io as u8,
        pin: pin as u8,
        level: level != 0,
        hold_ds: hold_ds as u16,
    };
    match ctx.sys.sequencer.add(step) {
        Ok(index) => {
            let _ = writeln!(ctx.dst, "> sequencer entry {index} added");
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: sequencer-add: {e}");
            Action::Error
        }
    }
}

pub fn cmd_sequencer_remove(ctx: &mut Context) -> Action {
    let Ok(index) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: sequencer-remove <entry>\n");
        return Action::Error;
    };

    match ctx.sys.sequencer.remove(index as usize) {
        Ok(()) => {
            let _ = writeln!(ctx.dst, "> sequencer entry {index} removed");
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: sequencer-remove: {e}");
            Action::Error
        }
    }
}

pub fn cmd_sequencer_clear(ctx: &mut Context) -> Action {
    ctx.sys.sequencer.clear();
    ctx.dst.append_str("> sequencer cleared\n");
    Action::Normal
}

pub fn cmd_sequencer_list(ctx: &mut Context) -> Action {
    let sequencer = &ctx.sys.sequencer;
    sequencer.render(ctx.dst);
    Action::Normal
}

pub fn cmd_sequencer_start(ctx: &mut Context) -> Action {
    let repeat = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ').unwrap_or(0) != 0;
    match ctx.sys.sequencer.start(repeat) {
        Ok(()) => {
            let _ = writeln!(
                ctx.dst,
                "> sequencer started{}",
                if repeat { ", repeating" } else { "" }
            );
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: sequencer-start: {e}");
            Action::Error
        }
    }
}

pub fn cmd_sequencer_stop(ctx: &mut Context) -> Action {
    ctx.sys.sequencer.stop();
    ctx.dst.append_str("> sequencer stopped\n");
    Action::Normal
}
