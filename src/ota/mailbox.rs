//! Mailbox transfer engine.
//!
//! One transaction moves exactly one 4 KiB sector between host and device.
//! The raw bytes travel over the dedicated UDP mailbox port; the control
//! commands (`mailbox-write`, `mailbox-read`, …) arrive on the command
//! port and operate on the accumulated sector. Every transfer is SHA-1
//! verified end to end; the device never retries on its own — the host
//! drives recovery via `mailbox-reset`.

use sha1::{Digest, Sha1};

use crate::Error;
use crate::ports::{FlashPort, SECTOR_SIZE};
use crate::stats::Stats;

use super::DIGEST_SIZE;

// ───────────────────────────────────────────────────────────────
// Transaction state machine
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    /// Nothing buffered, nothing queued.
    Idle,
    /// Host→device bytes accumulating (0 < got < 4096).
    Receiving { got: usize },
    /// A full sector is buffered, waiting for a command to consume it.
    Received,
    /// A mailbox command is operating on flash.
    CommandRunning,
    /// Device→host sector queued on the UDP endpoint.
    Sending,
    /// Waiting for the stack's sent notification.
    ReplyPending,
}

pub struct Mailbox {
    state: MailboxState,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            state: MailboxState::Idle,
        }
    }

    pub const fn state(&self) -> MailboxState {
        self.state
    }

    /// Track an accumulation step; `total` is the mailbox receive buffer
    /// length after the delivery. Returns whether the device owes `ACK` —
    /// only a full 4096-byte boundary triggers it, however the host's IP
    /// layer fragmented the sector.
    pub fn bytes_received(&mut self, total: usize, stats: &mut Stats) -> bool {
        if total >= SECTOR_SIZE {
            self.state = MailboxState::Received;
            stats.mailbox_sectors_received = stats.mailbox_sectors_received.saturating_add(1);
            true
        } else if total > 0 {
            self.state = MailboxState::Receiving { got: total };
            false
        } else {
            false
        }
    }

    /// A command that needs the buffered sector checks in here first.
    pub fn begin_consume(&mut self, buffered: usize) -> Result<(), Error> {
        if buffered != SECTOR_SIZE {
            return Err(Error::Protocol("mailbox incomplete"));
        }
        self.state = MailboxState::CommandRunning;
        Ok(())
    }

    /// The buffered sector was consumed; back to idle.
    pub fn consumed(&mut self) {
        self.state = MailboxState::Idle;
    }

    /// A device→host sector was queued for sending.
    pub fn sending(&mut self, stats: &mut Stats) {
        self.state = MailboxState::Sending;
        stats.mailbox_sectors_sent = stats.mailbox_sectors_sent.saturating_add(1);
    }

    /// The UDP layer accepted the payload; wait for the sent notification.
    pub fn sent_queued(&mut self) {
        self.state = MailboxState::ReplyPending;
    }

    /// The stack confirmed the send completed.
    pub fn send_complete(&mut self) {
        if self.state == MailboxState::ReplyPending || self.state == MailboxState::Sending {
            self.state = MailboxState::Idle;
        }
    }

    /// Host-driven recovery: drop everything, back to idle.
    pub fn reset(&mut self) {
        self.state = MailboxState::Idle;
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

// ───────────────────────────────────────────────────────────────
// Sector operations
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub erased: bool,
    pub skipped: bool,
    pub digest: [u8; DIGEST_SIZE],
}

/// Write one sector with the erase/skip optimisation.
///
/// - write is skipped entirely when the flash already matches `payload`;
/// - erase happens only when some stale bit would conflict — NOR flash can
///   clear bits without an erase, so `flash & payload == payload`
///   everywhere means programming alone suffices.
///
/// The digest is taken from a read-back of the sector, so it attests what
/// is actually in flash.
pub fn write_sector(
    flash: &mut dyn FlashPort,
    sector: u32,
    payload: &[u8; SECTOR_SIZE],
    stats: &mut Stats,
) -> Result<WriteOutcome, Error> {
    let offset = sector * SECTOR_SIZE as u32;

    let mut current = [0u8; SECTOR_SIZE];
    flash.read(offset, &mut current)?;

    let mut skip = true;
    let mut erase = false;
    for (have, want) in current.iter().zip(payload.iter()) {
        if have != want {
            skip = false;
        }
        if have & want != *want {
            erase = true;
        }
        if !skip && erase {
            break;
        }
    }

    if skip {
        erase = false;
    }

    if erase {
        flash.erase_sector(sector)?;
        stats.flash_sectors_erased = stats.flash_sectors_erased.saturating_add(1);
    }

    if !skip {
        flash.write(offset, payload)?;
        stats.flash_sectors_written = stats.flash_sectors_written.saturating_add(1);
    }

    let mut verify = [0u8; SECTOR_SIZE];
    flash.read(offset, &mut verify)?;

    let digest = Sha1::digest(verify);
    Ok(WriteOutcome {
        erased: erase,
        skipped: skip,
        digest: digest.into(),
    })
}

/// Read one sector into `out` and return its digest.
pub fn read_sector(
    flash: &mut dyn FlashPort,
    sector: u32,
    out: &mut [u8; SECTOR_SIZE],
) -> Result<[u8; DIGEST_SIZE], Error> {
    flash.read(sector * SECTOR_SIZE as u32, out)?;
    Ok(Sha1::digest(&out[..]).into())
}

/// SHA-1 over `count` consecutive sectors as currently on flash.
pub fn checksum_sectors(
    flash: &mut dyn FlashPort,
    start: u32,
    count: u32,
) -> Result<[u8; DIGEST_SIZE], Error> {
    let mut hasher = Sha1::new();
    let mut scratch = [0u8; SECTOR_SIZE];

    for sector in start..start + count {
        flash.read(sector * SECTOR_SIZE as u32, &mut scratch)?;
        hasher.update(scratch);
    }

    Ok(hasher.finalize().into())
}

/// Digest of a buffered (not yet written) sector — `mailbox-simulate`.
pub fn digest_buffer(payload: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha1::digest(payload).into()
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimFlash;

    fn payload(fill: u8) -> [u8; SECTOR_SIZE] {
        let mut data = [fill; SECTOR_SIZE];
        data[0] = 0x12;
        data[100] = 0x34;
        data
    }

    #[test]
    fn first_write_into_erased_flash_skips_erase() {
        let mut flash = SimFlash::new();
        let mut stats = Stats::new();

        let outcome = write_sector(&mut flash, 512, &payload(0xaa), &mut stats).unwrap();
        assert!(!outcome.erased);
        assert!(!outcome.skipped);
        assert_eq!(flash.contents(512 * 4096, SECTOR_SIZE), payload(0xaa));
    }

    #[test]
    fn identical_rewrite_reports_skipped() {
        let mut flash = SimFlash::new();
        let mut stats = Stats::new();

        write_sector(&mut flash, 512, &payload(0xaa), &mut stats).unwrap();
        let outcome = write_sector(&mut flash, 512, &payload(0xaa), &mut stats).unwrap();
        assert!(outcome.skipped);
        assert!(!outcome.erased);
        assert_eq!(stats.flash_sectors_written, 1);
    }

    #[test]
    fn conflicting_bits_force_erase() {
        let mut flash = SimFlash::new();
        let mut stats = Stats::new();

        write_sector(&mut flash, 512, &payload(0x00), &mut stats).unwrap();
        // 0xFF wants set bits where flash now has zeros.
        let outcome = write_sector(&mut flash, 512, &payload(0xff), &mut stats).unwrap();
        assert!(outcome.erased);
        assert!(!outcome.skipped);
        assert_eq!(flash.contents(512 * 4096, SECTOR_SIZE), payload(0xff));
    }

    #[test]
    fn clearing_only_bits_writes_without_erase() {
        let mut flash = SimFlash::new();
        let mut stats = Stats::new();

        write_sector(&mut flash, 512, &payload(0xff), &mut stats).unwrap();
        // 0xaa only clears bits relative to 0xff.
        let outcome = write_sector(&mut flash, 512, &payload(0xaa), &mut stats).unwrap();
        assert!(!outcome.erased);
        assert!(!outcome.skipped);
    }

    #[test]
    fn digest_matches_flash_content() {
        let mut flash = SimFlash::new();
        let mut stats = Stats::new();

        let data = payload(0x55);
        let outcome = write_sector(&mut flash, 7, &data, &mut stats).unwrap();
        assert_eq!(outcome.digest, digest_buffer(&data));

        let mut read_back = [0u8; SECTOR_SIZE];
        let read_digest = read_sector(&mut flash, 7, &mut read_back).unwrap();
        assert_eq!(read_digest, outcome.digest);
        assert_eq!(read_back, data);
    }

    #[test]
    fn checksum_spans_consecutive_sectors() {
        let mut flash = SimFlash::new();
        let mut stats = Stats::new();

        write_sector(&mut flash, 10, &payload(0x01), &mut stats).unwrap();
        write_sector(&mut flash, 11, &payload(0x02), &mut stats).unwrap();

        let combined = checksum_sectors(&mut flash, 10, 2).unwrap();

        let mut hasher = Sha1::new();
        hasher.update(payload(0x01));
        hasher.update(payload(0x02));
        let expected: [u8; DIGEST_SIZE] = hasher.finalize().into();
        assert_eq!(combined, expected);
    }

    #[test]
    fn state_machine_accumulation() {
        let mut mailbox = Mailbox::new();
        let mut stats = Stats::new();

        assert!(!mailbox.bytes_received(1400, &mut stats));
        assert_eq!(mailbox.state(), MailboxState::Receiving { got: 1400 });
        assert!(!mailbox.bytes_received(2800, &mut stats));
        // ACK fires only on the full-sector boundary.
        assert!(mailbox.bytes_received(4096, &mut stats));
        assert_eq!(mailbox.state(), MailboxState::Received);
        assert_eq!(stats.mailbox_sectors_received, 1);
    }

    #[test]
    fn consume_requires_full_sector() {
        let mut mailbox = Mailbox::new();
        let mut stats = Stats::new();

        mailbox.bytes_received(100, &mut stats);
        assert!(mailbox.begin_consume(100).is_err());

        mailbox.bytes_received(4096, &mut stats);
        assert!(mailbox.begin_consume(4096).is_ok());
        assert_eq!(mailbox.state(), MailboxState::CommandRunning);

        mailbox.consumed();
        assert_eq!(mailbox.state(), MailboxState::Idle);
    }

    #[test]
    fn send_cycle() {
        let mut mailbox = Mailbox::new();
        let mut stats = Stats::new();

        mailbox.sending(&mut stats);
        mailbox.sent_queued();
        assert_eq!(mailbox.state(), MailboxState::ReplyPending);
        mailbox.send_complete();
        assert_eq!(mailbox.state(), MailboxState::Idle);
        assert_eq!(stats.mailbox_sectors_sent, 1);
    }

    #[test]
    fn reset_from_any_state() {
        let mut mailbox = Mailbox::new();
        let mut stats = Stats::new();

        mailbox.bytes_received(512, &mut stats);
        mailbox.reset();
        assert_eq!(mailbox.state(), MailboxState::Idle);
    }
}
