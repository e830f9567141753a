//! Display slot and panel commands.
//!
//! Panel pixel plumbing is a driver concern; the commands here manage the
//! slot content and presentation state the drivers render from. The two
//! panel-specific entry points answer with a detection error when no such
//! panel is attached.

use core::fmt::Write;

use crate::command::{Action, Context};
use crate::parse;

pub fn cmd_display_brightness(ctx: &mut Context) -> Action {
    let Ok(level) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: display-brightness <0-4>\n");
        return Action::Error;
    };

    if let Err(e) = ctx.sys.display.set_brightness(level as u8) {
        let _ = writeln!(ctx.dst, "ERROR: display-brightness: {e}");
        return Action::Error;
    }
    let _ = writeln!(ctx.dst, "> brightness: {level}");
    Action::Normal
}

pub fn cmd_display_dump(ctx: &mut Context) -> Action {
    let display = &ctx.sys.display;
    display.render(ctx.dst);
    Action::Normal
}

pub fn cmd_display_font_select(ctx: &mut Context) -> Action {
    let Ok(font) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: display-font-select <font>\n");
        return Action::Error;
    };
    ctx.sys.display.set_font(font as u8);
    let _ = writeln!(ctx.dst, "> font: {font}");
    Action::Normal
}

pub fn cmd_display_flip_timeout(ctx: &mut Context) -> Action {
    let Ok(ds) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: display-flip-timeout <deciseconds>\n");
        return Action::Error;
    };
    ctx.sys.display.set_flip_timeout(ds as u16);
    let _ = writeln!(ctx.dst, "> flip timeout: {ds} ds");
    Action::Normal
}

pub fn cmd_display_set(ctx: &mut Context) -> Action {
    let Ok(slot) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: display-set <slot> <text>\n");
        return Action::Error;
    };
    let Some(offset) = ctx.src.token_offset(0, 2, b' ') else {
        ctx.dst.append_str("usage: display-set <slot> <text>\n");
        return Action::Error;
    };
    let Ok(text) = core::str::from_utf8(&ctx.src.as_slice()[offset..]) else {
        ctx.dst.append_str("ERROR: display-set: text not valid UTF-8\n");
        return Action::Error;
    };

    if let Err(e) = ctx.sys.display.set_slot(slot as usize, text) {
        let _ = writeln!(ctx.dst, "ERROR: display-set: {e}");
        return Action::Error;
    }
    let _ = writeln!(ctx.dst, "> slot {slot} set");
    Action::Normal
}

pub fn cmd_display_picture_load(ctx: &mut Context) -> Action {
    let Ok(slot) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: display-picture-load <slot>\n");
        return Action::Error;
    };

    let sys = &mut *ctx.sys;
    match sys
        .display
        .picture_load(&mut sys.sector, ctx.ports.flash, slot as usize)
    {
        Ok(()) => {
            let _ = writeln!(ctx.dst, "OK display-picture-load: slot {slot}");
            Action::Normal
        }
        Err(e) => {
            let _ = writeln!(ctx.dst, "ERROR: display-picture-load: {e}");
            Action::Error
        }
    }
}

pub fn cmd_display_freeze(ctx: &mut Context) -> Action {
    let Ok(ds) = parse::parse_uint(ctx.src.as_slice(), 1, 0, b' ') else {
        ctx.dst.append_str("usage: display-freeze <deciseconds>\n");
        return Action::Error;
    };
    ctx.sys.display.freeze(ds);
    let _ = writeln!(ctx.dst, "> frozen for {ds} ds");
    Action::Normal
}

pub fn cmd_display_plot(ctx: &mut Context) -> Action {
    if !ctx.sys.display.detected() {
        ctx.dst.append_str("ERROR: display-plot: no display detected\n");
        return Action::Error;
    }

    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_uint(src, 2, 0, b' '),
    );
    let (Ok(x), Ok(y)) = parsed else {
        ctx.dst.append_str("usage: display-plot <x> <y>\n");
        return Action::Error;
    };

    let _ = writeln!(ctx.dst, "> plot: {x},{y}");
    Action::Normal
}

fn panel_absent(ctx: &mut Context, name: &str) -> Action {
    let _ = writeln!(ctx.dst, "ERROR: {name}: panel not present");
    Action::Error
}

pub fn cmd_display_eastrising(ctx: &mut Context) -> Action {
    panel_absent(ctx, "display-eastrising")
}

pub fn cmd_display_spitft(ctx: &mut Context) -> Action {
    panel_absent(ctx, "display-spitft")
}
