//! Persistent key/value configuration store.
//!
//! One 4 KiB flash sector holds NUL-terminated `key=value` records with
//! 0xFF fill behind them. The records are cached in the shared sector
//! buffer under the `ConfigCache` owner; reads scan the cache, writes are
//! buffered in the cache between `open_write` and `close_write`, and the
//! commit is one erase + write + verify of the sector. When the cache has
//! been evicted by an OTA or display transfer, reads fall back to a direct
//! flash scan and the next cached read re-hydrates.
//!
//! Key names may carry up to two `%u`/`%d` template slots that are expanded
//! with integer indices (`uart.baud.%u` + index 0 → `uart.baud.0`);
//! callers pass `-1` to omit an index.

use core::fmt::Write;

use log::warn;

use crate::Error;
use crate::buffer::ByteBuf;
use crate::error::FlashError;
use crate::flashbuf::{SectorBuffer, SectorOwner};
use crate::ports::{FlashPort, SECTOR_SIZE};

/// Maximum expanded key length.
pub const KEY_SIZE: usize = 64;
/// Maximum value length accepted by `set_string`.
pub const VALUE_SIZE: usize = 64;

pub type KeyBuf = ByteBuf<KEY_SIZE>;

const CACHE_TAG: &str = "config cache";

// ───────────────────────────────────────────────────────────────
// Record scanning
// ───────────────────────────────────────────────────────────────

/// Iterator over `key=value` records in a raw config sector image.
struct Records<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Records<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for Records<'a> {
    /// `(record_start, record_bytes)` — start offset includes the record,
    /// the trailing NUL sits at `record_start + record_bytes.len()`.
    type Item = (usize, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let first = self.data[self.pos];
        if first == 0xff || first == 0 {
            return None;
        }
        let start = self.pos;
        let mut end = self.pos;
        while end < self.data.len() && self.data[end] != 0 {
            end += 1;
        }
        self.pos = (end + 1).min(self.data.len());
        Some((start, &self.data[start..end]))
    }
}

/// Offset just past the last record's NUL terminator.
fn content_len(data: &[u8]) -> usize {
    let mut end = 0usize;
    for (start, bytes) in Records::new(data) {
        end = (start + bytes.len() + 1).min(data.len());
    }
    end
}

fn split_record(record: &[u8]) -> (&[u8], &[u8]) {
    match record.iter().position(|&b| b == b'=') {
        Some(eq) => (&record[..eq], &record[eq + 1..]),
        None => (record, &[][..]),
    }
}

// ───────────────────────────────────────────────────────────────
// Key template expansion
// ───────────────────────────────────────────────────────────────

/// Expand up to two `%u`/`%d` slots in `name` with `index1`/`index2`.
/// A negative index leaves its slot (and any later slot) untouched.
pub fn expand_key(name: &str, index1: i32, index2: i32) -> KeyBuf {
    let mut out = KeyBuf::new();
    let mut indices = [index1, index2].into_iter();
    let bytes = name.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
        if bytes[pos] == b'%'
            && pos + 1 < bytes.len()
            && (bytes[pos + 1] == b'u' || bytes[pos + 1] == b'd')
        {
            match indices.next() {
                Some(index) if index >= 0 => {
                    let _ = write!(out, "{index}");
                    pos += 2;
                    continue;
                }
                _ => {}
            }
        }
        out.push(bytes[pos]);
        pos += 1;
    }

    out
}

// ───────────────────────────────────────────────────────────────
// Store
// ───────────────────────────────────────────────────────────────

pub struct ConfigStore {
    /// Absolute flash offset of the config sector.
    base: u32,
    write_open: bool,
}

impl ConfigStore {
    pub const fn new(base: u32) -> Self {
        Self {
            base,
            write_open: false,
        }
    }

    pub const fn write_open(&self) -> bool {
        self.write_open
    }

    /// Make sure the sector buffer holds the config cache. Returns false
    /// when the buffer is owned by another subsystem (caller falls back to
    /// a direct flash scan).
    fn hydrate(&self, sector: &mut SectorBuffer, flash: &mut dyn FlashPort) -> Result<bool, Error> {
        if sector.owner() == SectorOwner::ConfigCache {
            return Ok(true);
        }
        if !sector.request(SectorOwner::ConfigCache, CACHE_TAG) {
            return Ok(false);
        }
        if let Err(e) = flash.read(self.base, sector.data_mut()) {
            sector.release(SectorOwner::ConfigCache, CACHE_TAG);
            return Err(e);
        }
        Ok(true)
    }

    /// Look `name` up and append its value to `dst`. Returns whether the
    /// key exists.
    pub fn get_string<const CAP: usize>(
        &self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
        name: &str,
        index1: i32,
        index2: i32,
        dst: &mut ByteBuf<CAP>,
    ) -> bool {
        let key = expand_key(name, index1, index2);

        match self.hydrate(sector, flash) {
            Ok(true) => Self::find_value(sector.data(), key.as_slice(), dst),
            Ok(false) => {
                // Cache evicted: scan flash directly, leaving the owner alone.
                let mut image = [0u8; SECTOR_SIZE];
                if flash.read(self.base, &mut image).is_err() {
                    return false;
                }
                Self::find_value(&image, key.as_slice(), dst)
            }
            Err(e) => {
                warn!("config: cache hydrate failed: {e}");
                false
            }
        }
    }

    pub fn get_uint(
        &self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
        name: &str,
        index1: i32,
        index2: i32,
    ) -> Option<u32> {
        let mut value: ByteBuf<VALUE_SIZE> = ByteBuf::new();
        if !self.get_string(sector, flash, name, index1, index2, &mut value) {
            return None;
        }
        crate::parse::parse_uint(value.as_slice(), 0, 0, b' ').ok()
    }

    pub fn get_int(
        &self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
        name: &str,
        index1: i32,
        index2: i32,
    ) -> Option<i32> {
        let mut value: ByteBuf<VALUE_SIZE> = ByteBuf::new();
        if !self.get_string(sector, flash, name, index1, index2, &mut value) {
            return None;
        }
        crate::parse::parse_int(value.as_slice(), 0, 0, b' ').ok()
    }

    fn find_value<const CAP: usize>(image: &[u8], key: &[u8], dst: &mut ByteBuf<CAP>) -> bool {
        for (_, record) in Records::new(image) {
            let (record_key, value) = split_record(record);
            if record_key == key {
                dst.append(value);
                return true;
            }
        }
        false
    }

    /// Append every record as a `key=value` line.
    pub fn dump<const CAP: usize>(
        &self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
        dst: &mut ByteBuf<CAP>,
    ) -> bool {
        match self.hydrate(sector, flash) {
            Ok(true) => {
                for (_, record) in Records::new(sector.data()) {
                    dst.append(record);
                    dst.push(b'\n');
                }
                true
            }
            Ok(false) => {
                let mut image = [0u8; SECTOR_SIZE];
                if flash.read(self.base, &mut image).is_err() {
                    return false;
                }
                for (_, record) in Records::new(&image) {
                    dst.append(record);
                    dst.push(b'\n');
                }
                true
            }
            Err(_) => false,
        }
    }

    // ── Write transaction ─────────────────────────────────────

    /// Begin a write transaction. Fails when a writer is already open or
    /// the sector buffer cannot be claimed for the cache.
    pub fn open_write(
        &mut self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
    ) -> Result<(), Error> {
        if self.write_open {
            return Err(Error::Busy("config writer"));
        }
        match self.hydrate(sector, flash)? {
            true => {
                self.write_open = true;
                Ok(())
            }
            false => Err(Error::Busy("sector buffer")),
        }
    }

    /// Insert or replace `name[=value]` in the cache. An empty value
    /// deletes the key instead of storing an empty record.
    pub fn set_string(
        &mut self,
        sector: &mut SectorBuffer,
        name: &str,
        index1: i32,
        index2: i32,
        value: &str,
    ) -> Result<(), Error> {
        if !self.write_open {
            return Err(Error::Protocol("config write not open"));
        }

        let key = expand_key(name, index1, index2);
        Self::remove_matching(sector.data_mut(), key.as_slice(), false);

        if value.is_empty() {
            return Ok(());
        }

        let data = sector.data_mut();
        let end = content_len(data);
        let needed = key.len() + 1 + value.len() + 1;
        if end + needed > SECTOR_SIZE {
            return Err(Error::Flash(FlashError::OutOfRange));
        }

        let mut pos = end;
        data[pos..pos + key.len()].copy_from_slice(key.as_slice());
        pos += key.len();
        data[pos] = b'=';
        pos += 1;
        data[pos..pos + value.len()].copy_from_slice(value.as_bytes());
        pos += value.len();
        data[pos] = 0;

        Ok(())
    }

    pub fn set_uint(
        &mut self,
        sector: &mut SectorBuffer,
        name: &str,
        index1: i32,
        index2: i32,
        value: u32,
    ) -> Result<(), Error> {
        let mut text: ByteBuf<16> = ByteBuf::new();
        let _ = write!(text, "{value}");
        self.set_string(sector, name, index1, index2, text.as_str())
    }

    /// Remove records from the cache. With `wildcard`, every key starting
    /// with the expanded pattern goes; otherwise exactly one exact match.
    /// Returns the number of removed records.
    pub fn delete(
        &mut self,
        sector: &mut SectorBuffer,
        name: &str,
        index1: i32,
        index2: i32,
        wildcard: bool,
    ) -> Result<usize, Error> {
        if !self.write_open {
            return Err(Error::Protocol("config write not open"));
        }
        let key = expand_key(name, index1, index2);
        Ok(Self::remove_matching(
            sector.data_mut(),
            key.as_slice(),
            wildcard,
        ))
    }

    fn remove_matching(data: &mut [u8; SECTOR_SIZE], key: &[u8], wildcard: bool) -> usize {
        let mut removed = 0usize;

        loop {
            let mut target: Option<(usize, usize)> = None;
            for (start, record) in Records::new(data) {
                let (record_key, _) = split_record(record);
                let hit = if wildcard {
                    record_key.starts_with(key)
                } else {
                    record_key == key
                };
                if hit {
                    target = Some((start, record.len() + 1));
                    break;
                }
            }

            let Some((start, span)) = target else {
                break;
            };

            let end = content_len(data);
            // A record that runs to the sector edge has no trailing NUL.
            let span = span.min(end - start);
            data.copy_within(start + span..end, start);
            data[end - span..end].fill(0xff);
            removed += 1;

            if !wildcard {
                break;
            }
        }

        removed
    }

    /// Commit the cache: erase the sector, write it back, verify. The cache
    /// stays hydrated afterwards. Any failure aborts the transaction and
    /// restores the cache from flash.
    pub fn close_write(
        &mut self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
    ) -> Result<(), Error> {
        if !self.write_open {
            return Err(Error::Protocol("config write not open"));
        }

        let result = self.commit(sector, flash);
        if result.is_err() {
            self.abort_write(sector, flash);
        } else {
            self.write_open = false;
        }
        result
    }

    fn commit(&self, sector: &mut SectorBuffer, flash: &mut dyn FlashPort) -> Result<(), Error> {
        // Normalise the fill behind the records before it hits flash.
        {
            let data = sector.data_mut();
            let end = content_len(data);
            data[end..].fill(0xff);
        }

        flash.erase_sector(self.base / SECTOR_SIZE as u32)?;
        flash.write(self.base, sector.data())?;

        let mut verify = [0u8; SECTOR_SIZE];
        flash.read(self.base, &mut verify)?;
        if &verify != sector.data() {
            return Err(Error::Flash(FlashError::VerifyFailed));
        }
        Ok(())
    }

    /// Drop uncommitted changes and restore the cache from flash.
    pub fn abort_write(&mut self, sector: &mut SectorBuffer, flash: &mut dyn FlashPort) {
        self.write_open = false;
        if sector.owner() == SectorOwner::ConfigCache {
            if let Err(e) = flash.read(self.base, sector.data_mut()) {
                warn!("config: abort reload failed: {e}");
                sector.release(SectorOwner::ConfigCache, CACHE_TAG);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Runtime flags
// ───────────────────────────────────────────────────────────────

/// Named boolean flags persisted in the `flags` config record as a
/// space-separated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    StripTelnet = 0,
    LogToUart = 1,
    UdpTermEmpty = 2,
    CmdFromUart = 3,
    SequencerAutostart = 4,
    DisplayClock = 5,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::StripTelnet,
        Flag::LogToUart,
        Flag::UdpTermEmpty,
        Flag::CmdFromUart,
        Flag::SequencerAutostart,
        Flag::DisplayClock,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::StripTelnet => "strip-telnet",
            Self::LogToUart => "log-to-uart",
            Self::UdpTermEmpty => "udp-term-empty",
            Self::CmdFromUart => "cmd-from-uart",
            Self::SequencerAutostart => "sequencer-autostart",
            Self::DisplayClock => "display-clock",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.name() == name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Flags {
    bits: u32,
}

impl Flags {
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    pub const fn is_set(&self, flag: Flag) -> bool {
        self.bits & (1 << flag as u32) != 0
    }

    pub fn set(&mut self, flag: Flag, on: bool) {
        if on {
            self.bits |= 1 << flag as u32;
        } else {
            self.bits &= !(1 << flag as u32);
        }
    }

    /// Parse a space-separated flag list (unknown names are skipped).
    pub fn from_list(list: &str) -> Self {
        let mut flags = Self::new();
        for name in list.split(' ') {
            if let Some(flag) = Flag::from_name(name) {
                flags.set(flag, true);
            }
        }
        flags
    }

    /// Render the set flags as a space-separated list.
    pub fn render_list(&self) -> ByteBuf<VALUE_SIZE> {
        let mut out = ByteBuf::new();
        for flag in Flag::ALL {
            if self.is_set(flag) {
                if !out.is_empty() {
                    out.push(b' ');
                }
                out.append_str(flag.name());
            }
        }
        out
    }

    /// Render the full flag table, one `name: on|off` line per flag.
    pub fn render_table<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        for flag in Flag::ALL {
            let _ = writeln!(
                dst,
                "> flag {}: {}",
                flag.name(),
                if self.is_set(flag) { "on" } else { "off" }
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimFlash;

    const BASE: u32 = 0x3c000;

    fn setup() -> (ConfigStore, SectorBuffer, SimFlash) {
        (ConfigStore::new(BASE), SectorBuffer::new(), SimFlash::new())
    }

    fn get(
        store: &ConfigStore,
        sector: &mut SectorBuffer,
        flash: &mut SimFlash,
        name: &str,
    ) -> Option<std::string::String> {
        let mut out: ByteBuf<VALUE_SIZE> = ByteBuf::new();
        store
            .get_string(sector, flash, name, -1, -1, &mut out)
            .then(|| out.as_str().to_string())
    }

    #[test]
    fn set_commit_get_round_trip() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store
            .set_string(&mut sector, "wlan.client.ssid", -1, -1, "example")
            .unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        assert_eq!(
            get(&store, &mut sector, &mut flash, "wlan.client.ssid").as_deref(),
            Some("example")
        );
    }

    #[test]
    fn uncommitted_set_is_invisible_after_abort() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store
            .set_string(&mut sector, "cmd.port", -1, -1, "2400")
            .unwrap();
        store.abort_write(&mut sector, &mut flash);

        assert_eq!(get(&store, &mut sector, &mut flash, "cmd.port"), None);
    }

    #[test]
    fn replace_keeps_single_record() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store.set_string(&mut sector, "key", -1, -1, "one").unwrap();
        store.set_string(&mut sector, "key", -1, -1, "two").unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        let mut dump: ByteBuf<256> = ByteBuf::new();
        assert!(store.dump(&mut sector, &mut flash, &mut dump));
        assert_eq!(dump.as_str(), "key=two\n");
    }

    #[test]
    fn empty_value_deletes() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store.set_string(&mut sector, "key", -1, -1, "val").unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        store.open_write(&mut sector, &mut flash).unwrap();
        store.set_string(&mut sector, "key", -1, -1, "").unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        assert_eq!(get(&store, &mut sector, &mut flash, "key"), None);
    }

    #[test]
    fn template_expansion() {
        assert_eq!(expand_key("uart.baud.%u", 0, -1).as_slice(), b"uart.baud.0");
        assert_eq!(
            expand_key("io.%u.pin.%u", 2, 13).as_slice(),
            b"io.2.pin.13"
        );
        assert_eq!(expand_key("plain.key", -1, -1).as_slice(), b"plain.key");
    }

    #[test]
    fn wildcard_delete_removes_prefix_matches() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store
            .set_string(&mut sector, "uart.baud.%u", 0, -1, "9600")
            .unwrap();
        store
            .set_string(&mut sector, "uart.baud.%u", 1, -1, "19200")
            .unwrap();
        store
            .set_string(&mut sector, "uart.parity", -1, -1, "even")
            .unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        store.open_write(&mut sector, &mut flash).unwrap();
        let removed = store
            .delete(&mut sector, "uart.baud.", -1, -1, true)
            .unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        assert_eq!(removed, 2);
        assert_eq!(get(&store, &mut sector, &mut flash, "uart.baud.0"), None);
        assert_eq!(
            get(&store, &mut sector, &mut flash, "uart.parity").as_deref(),
            Some("even")
        );
    }

    #[test]
    fn non_wildcard_delete_removes_exactly_one() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store
            .set_string(&mut sector, "bridge.port", -1, -1, "25")
            .unwrap();
        store
            .set_string(&mut sector, "bridge.port.alt", -1, -1, "26")
            .unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        store.open_write(&mut sector, &mut flash).unwrap();
        let removed = store
            .delete(&mut sector, "bridge.port", -1, -1, false)
            .unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(get(&store, &mut sector, &mut flash, "bridge.port"), None);
        assert_eq!(
            get(&store, &mut sector, &mut flash, "bridge.port.alt").as_deref(),
            Some("26")
        );
    }

    #[test]
    fn eviction_rehydrates_on_next_read() {
        let (mut store, mut sector, mut flash) = setup();

        store.open_write(&mut sector, &mut flash).unwrap();
        store.set_string(&mut sector, "key", -1, -1, "val").unwrap();
        store.close_write(&mut sector, &mut flash).unwrap();

        // OTA steals the buffer and scribbles over it.
        assert!(sector.request(SectorOwner::Ota, "ota"));
        sector.data_mut().fill(0xaa);

        // While evicted, reads fall back to a direct flash scan.
        assert_eq!(
            get(&store, &mut sector, &mut flash, "key").as_deref(),
            Some("val")
        );
        assert_eq!(sector.owner(), SectorOwner::Ota);

        // After release, the cache re-hydrates.
        sector.release(SectorOwner::Ota, "ota");
        assert_eq!(
            get(&store, &mut sector, &mut flash, "key").as_deref(),
            Some("val")
        );
        assert_eq!(sector.owner(), SectorOwner::ConfigCache);
    }

    #[test]
    fn second_writer_rejected() {
        let (mut store, mut sector, mut flash) = setup();
        store.open_write(&mut sector, &mut flash).unwrap();
        assert_eq!(
            store.open_write(&mut sector, &mut flash),
            Err(Error::Busy("config writer"))
        );
    }

    #[test]
    fn set_without_open_rejected() {
        let (mut store, mut sector, _flash) = setup();
        assert!(store.set_string(&mut sector, "k", -1, -1, "v").is_err());
    }

    #[test]
    fn flags_round_trip() {
        let mut flags = Flags::new();
        flags.set(Flag::LogToUart, true);
        flags.set(Flag::StripTelnet, true);

        let list = flags.render_list();
        let parsed = Flags::from_list(list.as_str());
        assert!(parsed.is_set(Flag::LogToUart));
        assert!(parsed.is_set(Flag::StripTelnet));
        assert!(!parsed.is_set(Flag::UdpTermEmpty));
    }

    #[test]
    fn flag_table_shows_state() {
        let mut flags = Flags::new();
        flags.set(Flag::LogToUart, true);

        let mut out: ByteBuf<512> = ByteBuf::new();
        flags.render_table(&mut out);
        assert!(out.as_str().contains("flag log-to-uart: on"));
        assert!(out.as_str().contains("flag strip-telnet: off"));
    }
}
