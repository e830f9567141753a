//! Wi-Fi configuration, scan and mode commands.

use core::fmt::Write;

use crate::Error;
use crate::command::{Action, Context};
use crate::parse;
use crate::wlan::{MULTICAST_GROUPS, WlanMode};

fn persist_pair(
    ctx: &mut Context,
    pairs: &[(&'static str, &str)],
) -> Result<(), Error> {
    let sys = &mut *ctx.sys;
    sys.config.open_write(&mut sys.sector, ctx.ports.flash)?;
    for (key, value) in pairs {
        if let Err(e) = sys.config.set_string(&mut sys.sector, key, -1, -1, value) {
            sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
            return Err(e);
        }
    }
    sys.config.close_write(&mut sys.sector, ctx.ports.flash)
}

pub fn cmd_wlan_client_configure(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_string(src, 1, b' '),
        parse::parse_string(src, 2, b' '),
    );
    let (Ok(ssid), Ok(password)) = parsed else {
        ctx.dst
            .append_str("usage: wlan-client-configure <ssid> <password>\n");
        return Action::Error;
    };

    if let Err(e) = persist_pair(
        ctx,
        &[
            ("wlan.client.ssid", ssid),
            ("wlan.client.passwd", password),
        ],
    ) {
        let _ = writeln!(ctx.dst, "ERROR: wlan-client-configure: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> client config: ssid {ssid}");
    Action::Normal
}

pub fn cmd_wlan_ap_configure(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_string(src, 1, b' '),
        parse::parse_string(src, 2, b' '),
        parse::parse_uint(src, 3, 0, b' '),
    );
    let (Ok(ssid), Ok(password), Ok(channel)) = parsed else {
        ctx.dst
            .append_str("usage: wlan-ap-configure <ssid> <password> <channel>\n");
        return Action::Error;
    };
    if !(1..=13).contains(&channel) {
        ctx.dst
            .append_str("ERROR: wlan-ap-configure: channel 1-13\n");
        return Action::Error;
    }
    if password.len() < 8 {
        ctx.dst
            .append_str("ERROR: wlan-ap-configure: password too short (min 8)\n");
        return Action::Error;
    }

    let mut channel_text: crate::buffer::ByteBuf<8> = crate::buffer::ByteBuf::new();
    let _ = write!(channel_text, "{channel}");
    if let Err(e) = persist_pair(
        ctx,
        &[
            ("wlan.ap.ssid", ssid),
            ("wlan.ap.passwd", password),
            ("wlan.ap.channel", channel_text.as_str()),
        ],
    ) {
        let _ = writeln!(ctx.dst, "ERROR: wlan-ap-configure: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> ap config: ssid {ssid}, channel {channel}");
    Action::Normal
}

pub fn cmd_wlan_mode(ctx: &mut Context) -> Action {
    let mode = match parse::parse_string(ctx.src.as_slice(), 1, b' ') {
        Ok("client") => WlanMode::Client,
        Ok("ap") | Ok("access-point") => WlanMode::AccessPoint,
        _ => {
            ctx.dst.append_str("usage: wlan-mode client|ap\n");
            return Action::Error;
        }
    };

    let mut value: crate::buffer::ByteBuf<8> = crate::buffer::ByteBuf::new();
    let _ = write!(value, "{}", mode.to_config());
    if let Err(e) = persist_pair(ctx, &[("wlan.mode", value.as_str())]) {
        let _ = writeln!(ctx.dst, "ERROR: wlan-mode: {e}");
        return Action::Error;
    }

    ctx.sys.wlan.mode_is_ap = mode == WlanMode::AccessPoint;
    let _ = writeln!(ctx.dst, "> wlan mode: {} (effective after reset)", mode.name());
    Action::Normal
}

pub fn cmd_wlan_scan(ctx: &mut Context) -> Action {
    if let Err(e) = ctx.ports.wlan.start_scan() {
        let _ = writeln!(ctx.dst, "ERROR: wlan-scan: {e}");
        return Action::Error;
    }
    ctx.sys.wlan.scan_started();
    ctx.dst
        .append_str("OK wlan-scan: scanning, see log for results\n");
    Action::Normal
}

pub fn cmd_wlan_scan_terse(ctx: &mut Context) -> Action {
    if ctx.sys.wlan.scanning() {
        ctx.dst.append_str("ERROR: wlan-scan-terse: scan still running\n");
        return Action::Error;
    }
    if ctx.sys.wlan.candidates().is_empty() {
        ctx.dst.append_str("> no scan results\n");
        return Action::Normal;
    }
    let wlan = &ctx.sys.wlan;
    wlan.render_scan(ctx.dst, true);
    Action::Normal
}

/// Reassociate with the strongest scanned AP when it beats the current one.
pub fn cmd_wlan_ap_switch(ctx: &mut Context) -> Action {
    let channel = ctx.ports.wlan.current_channel();
    let Some(target) = ctx.sys.wlan.reselection_target(channel).copied() else {
        ctx.dst
            .append_str("> ap-switch: already on the strongest access point\n");
        return Action::Normal;
    };

    let mut ssid: crate::buffer::ByteBuf<64> = crate::buffer::ByteBuf::new();
    let mut password: crate::buffer::ByteBuf<64> = crate::buffer::ByteBuf::new();
    let sys = &mut *ctx.sys;
    let have_credentials = sys.config.get_string(
        &mut sys.sector,
        ctx.ports.flash,
        "wlan.client.ssid",
        -1,
        -1,
        &mut ssid,
    ) && sys.config.get_string(
        &mut sys.sector,
        ctx.ports.flash,
        "wlan.client.passwd",
        -1,
        -1,
        &mut password,
    );
    if !have_credentials {
        ctx.dst
            .append_str("ERROR: ap-switch: client credentials not configured\n");
        return Action::Error;
    }

    if let Err(e) = ctx
        .ports
        .wlan
        .connect_bssid(ssid.as_str(), password.as_str(), &target)
    {
        let _ = writeln!(ctx.dst, "ERROR: ap-switch: {e}");
        return Action::Error;
    }

    let _ = writeln!(
        ctx.dst,
        "> ap-switch: reassociating, channel {}, rssi {}",
        target.channel, target.rssi
    );
    Action::Normal
}

pub fn cmd_multicast_group_set(ctx: &mut Context) -> Action {
    let src = ctx.src.as_slice();
    let parsed = (
        parse::parse_uint(src, 1, 0, b' '),
        parse::parse_string(src, 2, b' ').ok().and_then(parse::parse_ipv4),
    );
    let (Ok(index), Some(group)) = parsed else {
        ctx.dst
            .append_str("usage: multicast-group-set <index> <a.b.c.d>\n");
        return Action::Error;
    };
    if index >= MULTICAST_GROUPS {
        let _ = writeln!(
            ctx.dst,
            "ERROR: multicast-group-set: index 0-{}",
            MULTICAST_GROUPS - 1
        );
        return Action::Error;
    }
    if group[0] < 224 || group[0] > 239 {
        ctx.dst
            .append_str("ERROR: multicast-group-set: not a multicast address\n");
        return Action::Error;
    }

    let mut value: crate::buffer::ByteBuf<16> = crate::buffer::ByteBuf::new();
    let _ = write!(value, "{}.{}.{}.{}", group[0], group[1], group[2], group[3]);

    let sys = &mut *ctx.sys;
    if let Err(e) = sys.config.open_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: multicast-group-set: {e}");
        return Action::Error;
    }
    if let Err(e) = sys.config.set_string(
        &mut sys.sector,
        "multicast-group.%u",
        index as i32,
        -1,
        value.as_str(),
    ) {
        sys.config.abort_write(&mut sys.sector, ctx.ports.flash);
        let _ = writeln!(ctx.dst, "ERROR: multicast-group-set: {e}");
        return Action::Error;
    }
    if let Err(e) = sys.config.close_write(&mut sys.sector, ctx.ports.flash) {
        let _ = writeln!(ctx.dst, "ERROR: multicast-group-set: {e}");
        return Action::Error;
    }

    let _ = writeln!(ctx.dst, "> multicast group {index}: {}", value.as_str());
    Action::Normal
}
