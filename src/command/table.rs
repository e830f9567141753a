//! The command table.
//!
//! One flat slice; dispatch walks it linearly and matches the first token
//! against both names. Order follows the operator documentation: session
//! first, then configuration, peripherals, network, flash/mailbox,
//! display.

use crate::command::Command;
use crate::command::{
    bus_cmds, config_cmds, core_cmds, display_cmds, flash_cmds, io_cmds, mailbox_cmds, seq_cmds,
    time_cmds, uart_cmds, wlan_cmds,
};

pub static COMMANDS: &[Command] = &[
    // ── session ───────────────────────────────────────────────
    Command {
        short: "?",
        long: "help",
        handler: core_cmds::cmd_help,
        help: "list all commands",
    },
    Command {
        short: "q",
        long: "quit",
        handler: core_cmds::cmd_quit,
        help: "close the connection",
    },
    Command {
        short: "r",
        long: "reset",
        handler: core_cmds::cmd_reset,
        help: "reset the device",
    },
    Command {
        short: "id",
        long: "identification",
        handler: core_cmds::cmd_identification,
        help: "show identification",
    },
    // ── statistics ────────────────────────────────────────────
    Command {
        short: "s",
        long: "stats",
        handler: core_cmds::cmd_stats,
        help: "firmware statistics",
    },
    Command {
        short: "sf",
        long: "stats-flash",
        handler: core_cmds::cmd_stats_flash,
        help: "flash statistics",
    },
    Command {
        short: "sc",
        long: "stats-counters",
        handler: core_cmds::cmd_stats_counters,
        help: "show overflow counters",
    },
    Command {
        short: "si",
        long: "stats-i2c",
        handler: core_cmds::cmd_stats_i2c,
        help: "i2c statistics",
    },
    Command {
        short: "ss",
        long: "stats-sequencer",
        handler: core_cmds::cmd_stats_sequencer,
        help: "sequencer state",
    },
    Command {
        short: "st",
        long: "stats-time",
        handler: core_cmds::cmd_stats_time,
        help: "clocks and sntp state",
    },
    Command {
        short: "sw",
        long: "stats-wlan",
        handler: core_cmds::cmd_stats_wlan,
        help: "wlan statistics",
    },
    // ── configuration ─────────────────────────────────────────
    Command {
        short: "cd",
        long: "config-dump",
        handler: config_cmds::cmd_config_dump,
        help: "show all config records",
    },
    Command {
        short: "cqs",
        long: "config-query-string",
        handler: config_cmds::cmd_config_query_string,
        help: "query a string value",
    },
    Command {
        short: "cqi",
        long: "config-query-int",
        handler: config_cmds::cmd_config_query_int,
        help: "query an integer value",
    },
    Command {
        short: "cs",
        long: "config-set",
        handler: config_cmds::cmd_config_set,
        help: "set a config value",
    },
    Command {
        short: "cde",
        long: "config-delete",
        handler: config_cmds::cmd_config_delete,
        help: "delete config records",
    },
    Command {
        short: "bp",
        long: "bridge-port",
        handler: config_cmds::cmd_bridge_port,
        help: "set the uart bridge port",
    },
    Command {
        short: "cp",
        long: "command-port",
        handler: config_cmds::cmd_command_port,
        help: "set the command port",
    },
    Command {
        short: "fs",
        long: "flag-set",
        handler: core_cmds::cmd_flag_set,
        help: "set a runtime flag",
    },
    Command {
        short: "fu",
        long: "flag-unset",
        handler: core_cmds::cmd_flag_unset,
        help: "clear a runtime flag",
    },
    // ── gpio / io ─────────────────────────────────────────────
    Command {
        short: "gas",
        long: "gpio-association-set",
        handler: io_cmds::cmd_gpio_association_set,
        help: "set association pin",
    },
    Command {
        short: "gss",
        long: "gpio-status-set",
        handler: io_cmds::cmd_gpio_status_set,
        help: "set status pin",
    },
    Command {
        short: "im",
        long: "io-mode",
        handler: io_cmds::cmd_io_mode,
        help: "set pin mode",
    },
    Command {
        short: "ird",
        long: "io-read",
        handler: io_cmds::cmd_io_read,
        help: "read a pin",
    },
    Command {
        short: "iw",
        long: "io-write",
        handler: io_cmds::cmd_io_write,
        help: "write a pin",
    },
    Command {
        short: "it",
        long: "io-trigger",
        handler: io_cmds::cmd_io_trigger,
        help: "trigger a pin action",
    },
    Command {
        short: "itr",
        long: "io-trigger-remote",
        handler: io_cmds::cmd_io_trigger_remote,
        help: "trigger a remote pin",
    },
    Command {
        short: "ism",
        long: "io-set-mask",
        handler: io_cmds::cmd_io_set_mask,
        help: "set the io write mask",
    },
    Command {
        short: "isf",
        long: "io-set-flag",
        handler: io_cmds::cmd_io_set_flag,
        help: "set a pin flag",
    },
    Command {
        short: "icf",
        long: "io-clear-flag",
        handler: io_cmds::cmd_io_clear_flag,
        help: "clear a pin flag",
    },
    Command {
        short: "pw",
        long: "pwm-width",
        handler: io_cmds::cmd_pwm_width,
        help: "set a pwm pin's pulse width",
    },
    // ── i2c / spi / sensors ───────────────────────────────────
    Command {
        short: "ia",
        long: "i2c-address",
        handler: bus_cmds::cmd_i2c_address,
        help: "select device address",
    },
    Command {
        short: "ib",
        long: "i2c-bus",
        handler: bus_cmds::cmd_i2c_bus,
        help: "select the i2c bus",
    },
    Command {
        short: "is",
        long: "i2c-speed",
        handler: bus_cmds::cmd_i2c_speed,
        help: "set bus speed",
    },
    Command {
        short: "ir",
        long: "i2c-read",
        handler: bus_cmds::cmd_i2c_read,
        help: "read device bytes",
    },
    Command {
        short: "iwr",
        long: "i2c-write",
        handler: bus_cmds::cmd_i2c_write,
        help: "write device bytes",
    },
    Command {
        short: "iwrr",
        long: "i2c-write-read",
        handler: bus_cmds::cmd_i2c_write_read,
        help: "write then read i2c",
    },
    Command {
        short: "isr",
        long: "i2c-sensor-read",
        handler: bus_cmds::cmd_i2c_sensor_read,
        help: "read a known i2c sensor",
    },
    Command {
        short: "isc",
        long: "i2c-sensor-calibrate",
        handler: bus_cmds::cmd_i2c_sensor_calibrate,
        help: "set sensor calibration",
    },
    Command {
        short: "isd",
        long: "i2c-sensor-dump",
        handler: bus_cmds::cmd_i2c_sensor_dump,
        help: "list known i2c sensors",
    },
    Command {
        short: "spc",
        long: "spi-configure",
        handler: bus_cmds::cmd_spi_configure,
        help: "configure spi",
    },
    Command {
        short: "sps",
        long: "spi-start",
        handler: bus_cmds::cmd_spi_start,
        help: "start a transaction",
    },
    Command {
        short: "spw",
        long: "spi-write",
        handler: bus_cmds::cmd_spi_write,
        help: "stage payload bytes",
    },
    Command {
        short: "spt",
        long: "spi-transmit",
        handler: bus_cmds::cmd_spi_transmit,
        help: "transmit staged bytes",
    },
    Command {
        short: "spr",
        long: "spi-receive",
        handler: bus_cmds::cmd_spi_receive,
        help: "receive spi bytes",
    },
    Command {
        short: "spf",
        long: "spi-finish",
        handler: bus_cmds::cmd_spi_finish,
        help: "finish the spi transaction",
    },
    // ── uart ──────────────────────────────────────────────────
    Command {
        short: "ub",
        long: "uart-baudrate",
        handler: uart_cmds::cmd_uart_baudrate,
        help: "set baud rate",
    },
    Command {
        short: "ud",
        long: "uart-data-bits",
        handler: uart_cmds::cmd_uart_data_bits,
        help: "set data bits",
    },
    Command {
        short: "us",
        long: "uart-stop-bits",
        handler: uart_cmds::cmd_uart_stop_bits,
        help: "set stop bits",
    },
    Command {
        short: "up",
        long: "uart-parity",
        handler: uart_cmds::cmd_uart_parity,
        help: "set parity",
    },
    Command {
        short: "ul",
        long: "uart-loopback",
        handler: uart_cmds::cmd_uart_loopback,
        help: "set loopback",
    },
    Command {
        short: "uw",
        long: "uart-write",
        handler: uart_cmds::cmd_uart_write,
        help: "write raw bytes",
    },
    // ── log ───────────────────────────────────────────────────
    Command {
        short: "ld",
        long: "log-display",
        handler: core_cmds::cmd_log_display,
        help: "show the log ring",
    },
    Command {
        short: "lc",
        long: "log-clear",
        handler: core_cmds::cmd_log_clear,
        help: "clear the log ring",
    },
    Command {
        short: "lw",
        long: "log-write",
        handler: core_cmds::cmd_log_write,
        help: "append a log line",
    },
    // ── time / network ────────────────────────────────────────
    Command {
        short: "mgs",
        long: "multicast-group-set",
        handler: wlan_cmds::cmd_multicast_group_set,
        help: "set a multicast group",
    },
    Command {
        short: "sns",
        long: "sntp-set",
        handler: time_cmds::cmd_sntp_set,
        help: "set the sntp server",
    },
    Command {
        short: "ts",
        long: "time-set",
        handler: time_cmds::cmd_time_set,
        help: "set the wall clock",
    },
    Command {
        short: "tss",
        long: "time-stamp-set",
        handler: time_cmds::cmd_time_stamp_set,
        help: "set clock and stamp the log",
    },
    Command {
        short: "tzs",
        long: "time-zone-set",
        handler: time_cmds::cmd_time_zone_set,
        help: "set the timezone offset",
    },
    // ── sequencer ─────────────────────────────────────────────
    Command {
        short: "sa",
        long: "sequencer-add",
        handler: seq_cmds::cmd_sequencer_add,
        help: "append a step",
    },
    Command {
        short: "sqc",
        long: "sequencer-clear",
        handler: seq_cmds::cmd_sequencer_clear,
        help: "clear all steps",
    },
    Command {
        short: "sl",
        long: "sequencer-list",
        handler: seq_cmds::cmd_sequencer_list,
        help: "list steps",
    },
    Command {
        short: "sr",
        long: "sequencer-remove",
        handler: seq_cmds::cmd_sequencer_remove,
        help: "remove a step",
    },
    Command {
        short: "sqs",
        long: "sequencer-start",
        handler: seq_cmds::cmd_sequencer_start,
        help: "start playback",
    },
    Command {
        short: "sqt",
        long: "sequencer-stop",
        handler: seq_cmds::cmd_sequencer_stop,
        help: "stop playback",
    },
    // ── wlan ──────────────────────────────────────────────────
    Command {
        short: "wac",
        long: "wlan-ap-configure",
        handler: wlan_cmds::cmd_wlan_ap_configure,
        help: "configure ap mode",
    },
    Command {
        short: "wcc",
        long: "wlan-client-configure",
        handler: wlan_cmds::cmd_wlan_client_configure,
        help: "configure client mode",
    },
    Command {
        short: "was",
        long: "wlan-ap-switch",
        handler: wlan_cmds::cmd_wlan_ap_switch,
        help: "reassociate with the best ap",
    },
    Command {
        short: "wm",
        long: "wlan-mode",
        handler: wlan_cmds::cmd_wlan_mode,
        help: "set client or ap mode",
    },
    Command {
        short: "ws",
        long: "wlan-scan",
        handler: wlan_cmds::cmd_wlan_scan,
        help: "scan access points",
    },
    Command {
        short: "wst",
        long: "wlan-scan-terse",
        handler: wlan_cmds::cmd_wlan_scan_terse,
        help: "terse scan results",
    },
    // ── flash / ota ───────────────────────────────────────────
    Command {
        short: "fi",
        long: "flash-info",
        handler: flash_cmds::cmd_flash_info,
        help: "show layout and slots",
    },
    Command {
        short: "fe",
        long: "flash-erase",
        handler: flash_cmds::cmd_flash_erase,
        help: "erase a range",
    },
    Command {
        short: "fsn",
        long: "flash-send",
        handler: flash_cmds::cmd_flash_send,
        help: "stage a chunk to the buffer",
    },
    Command {
        short: "fr",
        long: "flash-receive",
        handler: flash_cmds::cmd_flash_receive,
        help: "fetch a buffered chunk",
    },
    Command {
        short: "frd",
        long: "flash-read",
        handler: flash_cmds::cmd_flash_read,
        help: "read a sector to the buffer",
    },
    Command {
        short: "fw",
        long: "flash-write",
        handler: flash_cmds::cmd_flash_write,
        help: "write the buffered sector",
    },
    Command {
        short: "fv",
        long: "flash-verify",
        handler: flash_cmds::cmd_flash_verify,
        help: "verify flash against the buffer",
    },
    Command {
        short: "fc",
        long: "flash-checksum",
        handler: flash_cmds::cmd_flash_checksum,
        help: "sha1 over a range",
    },
    Command {
        short: "fsl",
        long: "flash-select",
        handler: flash_cmds::cmd_flash_select,
        help: "select the boot slot",
    },
    Command {
        short: "fso",
        long: "flash-select-once",
        handler: flash_cmds::cmd_flash_select_once,
        help: "select slot for one trial boot",
    },
    // ── mailbox ───────────────────────────────────────────────
    Command {
        short: "mi",
        long: "mailbox-info",
        handler: mailbox_cmds::cmd_mailbox_info,
        help: "show mailbox and slots",
    },
    Command {
        short: "mr",
        long: "mailbox-reset",
        handler: mailbox_cmds::cmd_mailbox_reset,
        help: "reset the mailbox",
    },
    Command {
        short: "mrd",
        long: "mailbox-read",
        handler: mailbox_cmds::cmd_mailbox_read,
        help: "send a sector to the host",
    },
    Command {
        short: "mb",
        long: "mailbox-bench",
        handler: mailbox_cmds::cmd_mailbox_bench,
        help: "throughput benchmark",
    },
    Command {
        short: "mc",
        long: "mailbox-checksum",
        handler: mailbox_cmds::cmd_mailbox_checksum,
        help: "sha1 over flash sectors",
    },
    Command {
        short: "msi",
        long: "mailbox-simulate",
        handler: mailbox_cmds::cmd_mailbox_simulate,
        help: "checksum without writing",
    },
    Command {
        short: "mw",
        long: "mailbox-write",
        handler: mailbox_cmds::cmd_mailbox_write,
        help: "write the received sector",
    },
    Command {
        short: "msl",
        long: "mailbox-select",
        handler: mailbox_cmds::cmd_mailbox_select,
        help: "select slot, trial or permanent",
    },
    // ── display ───────────────────────────────────────────────
    Command {
        short: "db",
        long: "display-brightness",
        handler: display_cmds::cmd_display_brightness,
        help: "set brightness",
    },
    Command {
        short: "dd",
        long: "display-dump",
        handler: display_cmds::cmd_display_dump,
        help: "show state and slots",
    },
    Command {
        short: "dfs",
        long: "display-font-select",
        handler: display_cmds::cmd_display_font_select,
        help: "select the font",
    },
    Command {
        short: "dft",
        long: "display-flip-timeout",
        handler: display_cmds::cmd_display_flip_timeout,
        help: "set slot rotation timeout",
    },
    Command {
        short: "ds",
        long: "display-set",
        handler: display_cmds::cmd_display_set,
        help: "set slot text",
    },
    Command {
        short: "dpl",
        long: "display-picture-load",
        handler: display_cmds::cmd_display_picture_load,
        help: "stage a picture",
    },
    Command {
        short: "df",
        long: "display-freeze",
        handler: display_cmds::cmd_display_freeze,
        help: "freeze current slot",
    },
    Command {
        short: "dp",
        long: "display-plot",
        handler: display_cmds::cmd_display_plot,
        help: "plot a point",
    },
    Command {
        short: "de",
        long: "display-eastrising",
        handler: display_cmds::cmd_display_eastrising,
        help: "eastrising panel",
    },
    Command {
        short: "dst",
        long: "display-spitft",
        handler: display_cmds::cmd_display_spitft,
        help: "spi tft panel",
    },
    // ── raw memory ────────────────────────────────────────────
    Command {
        short: "pk",
        long: "peek",
        handler: core_cmds::cmd_peek,
        help: "read a 32-bit word",
    },
    Command {
        short: "po",
        long: "poke",
        handler: core_cmds::cmd_poke,
        help: "write a 32-bit word",
    },
    // ── http back-door ────────────────────────────────────────
    Command {
        short: "GET",
        long: "GET",
        handler: core_cmds::cmd_http_get,
        help: "minimal http status page",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_duplicate_names() {
        for (index, a) in COMMANDS.iter().enumerate() {
            for b in &COMMANDS[index + 1..] {
                assert_ne!(a.short, b.short, "duplicate short name {}", a.short);
                assert_ne!(a.long, b.long, "duplicate long name {}", a.long);
            }
        }
    }

    #[test]
    fn short_names_are_short() {
        for command in COMMANDS {
            assert!(
                command.short.len() <= 4,
                "short name too long: {}",
                command.short
            );
        }
    }

    #[test]
    fn every_entry_has_help() {
        for command in COMMANDS {
            assert!(!command.help.is_empty(), "missing help for {}", command.long);
        }
    }
}
