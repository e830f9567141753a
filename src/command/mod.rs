//! Line-oriented command protocol engine.
//!
//! A received line is telnet-stripped, tokenised, and matched against a
//! flat table of `(short, long, handler, help)` records. Handlers share
//! one signature and return an [`Action`] code that tells the session
//! layer what to do with the connection after the reply goes out.
//!
//! ```text
//! line ──▶ strip IAC ──▶ token 0 ──▶ table match ──▶ handler(src, dst)
//!                                                        │
//!                        session layer ◀── Action ◀──────┘
//! ```

pub mod bus_cmds;
pub mod config_cmds;
pub mod core_cmds;
pub mod display_cmds;
pub mod flash_cmds;
pub mod io_cmds;
pub mod mailbox_cmds;
pub mod seq_cmds;
pub mod table;
pub mod time_cmds;
pub mod uart_cmds;
pub mod wlan_cmds;

use crate::buffer::ByteBuf;
use crate::ports::Ports;
use crate::system::System;

/// Command/receive buffer size: one flash sector plus header room, so a
/// whole `flash-send` line fits.
pub const CMD_BUF_SIZE: usize = 4096 + 64;

pub type CmdBuf = ByteBuf<CMD_BUF_SIZE>;

/// What the session layer does after the handler's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send whatever the handler wrote.
    Normal,
    /// Handler reported an error; reply is sent like normal output.
    Error,
    /// No command on the line; reply becomes `> empty command`.
    Empty,
    /// Reply, then close the connection.
    Disconnect,
    /// Reply, then reboot through the socket (trial-boot state preserved).
    Reset,
    /// Wrap the reply in a minimal HTTP response and close.
    HttpOk,
}

/// Everything a handler may touch.
pub struct Context<'a, 'p> {
    pub sys: &'a mut System,
    pub ports: &'a mut Ports<'p>,
    pub src: &'a CmdBuf,
    pub dst: &'a mut CmdBuf,
}

pub type Handler = fn(&mut Context) -> Action;

pub struct Command {
    pub short: &'static str,
    pub long: &'static str,
    pub handler: Handler,
    pub help: &'static str,
}

/// Dispatch one stripped, newline-trimmed line.
///
/// The first whitespace-separated token selects the handler by exact,
/// case-sensitive match against either name. An unknown token echoes
/// `<token>: command unknown`.
pub fn dispatch_line(
    sys: &mut System,
    ports: &mut Ports<'_>,
    src: &CmdBuf,
    dst: &mut CmdBuf,
) -> Action {
    // Configured status indicator fires on every received command.
    sys.iostate.pulse_status(ports.pins);

    let Some(token) = src.token(0, b' ') else {
        return Action::Empty;
    };

    for command in table::COMMANDS {
        if token == command.short.as_bytes() || token == command.long.as_bytes() {
            dst.clear();
            let mut ctx = Context {
                sys,
                ports,
                src,
                dst,
            };
            return (command.handler)(&mut ctx);
        }
    }

    sys.stats.cmd_unknown = sys.stats.cmd_unknown.saturating_add(1);
    dst.append(token);
    dst.append_str(": command unknown\n");
    Action::Error
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::{
        RecordingNet, SimFlash, SimI2c, SimPins, SimPlatform, SimRtcMem, SimSpi, SimUart, SimWlan,
    };

    struct Rig {
        flash: SimFlash,
        rtc: SimRtcMem,
        pins: SimPins,
        uart: SimUart,
        i2c: SimI2c,
        spi: SimSpi,
        net: RecordingNet,
        wlan: SimWlan,
        platform: SimPlatform,
        sys: System,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                flash: SimFlash::new(),
                rtc: SimRtcMem::new(),
                pins: SimPins::new(),
                uart: SimUart::new(),
                i2c: SimI2c::new(),
                spi: SimSpi::new(),
                net: RecordingNet::new(),
                wlan: SimWlan::new(),
                platform: SimPlatform::new(),
                sys: System::new(),
            }
        }

        fn run(&mut self, line: &str) -> (Action, String) {
            let mut src = CmdBuf::new();
            src.append_str(line);
            let mut dst = CmdBuf::new();
            let mut ports = Ports {
                flash: &mut self.flash,
                rtc: &mut self.rtc,
                pins: &mut self.pins,
                uart: &mut self.uart,
                i2c: &mut self.i2c,
                spi: &mut self.spi,
                net: &mut self.net,
                wlan: &mut self.wlan,
                platform: &mut self.platform,
            };
            let action = dispatch_line(&mut self.sys, &mut ports, &src, &mut dst);
            (action, dst.as_str().to_string())
        }
    }

    #[test]
    fn unknown_command_echoes_token() {
        let mut rig = Rig::new();
        let (action, reply) = rig.run("bogus-command 1 2");
        assert_eq!(action, Action::Error);
        assert_eq!(reply, "bogus-command: command unknown\n");
        assert_eq!(rig.sys.stats.cmd_unknown, 1);
    }

    #[test]
    fn empty_line_returns_empty_action() {
        let mut rig = Rig::new();
        let (action, _) = rig.run("   ");
        assert_eq!(action, Action::Empty);
    }

    #[test]
    fn short_and_long_names_hit_same_handler() {
        let mut rig = Rig::new();
        let (_, by_short) = rig.run("?");
        let (_, by_long) = rig.run("help");
        assert_eq!(by_short, by_long);
        assert!(by_short.contains("help"));
    }

    #[test]
    fn match_is_case_sensitive() {
        let mut rig = Rig::new();
        let (action, _) = rig.run("HELP");
        assert_eq!(action, Action::Error);
    }

    #[test]
    fn quit_disconnects_and_reset_resets() {
        let mut rig = Rig::new();
        assert_eq!(rig.run("quit").0, Action::Disconnect);
        assert_eq!(rig.run("q").0, Action::Disconnect);
        assert_eq!(rig.run("reset").0, Action::Reset);
    }
}
