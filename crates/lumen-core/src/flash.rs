//! Wear-leveled shard persistence over raw flash sectors.
//!
//! Every shard owns a ping-pong pair of slots. A slot is two consecutive
//! erase sectors, because a record (12-byte slot header + 4 KiB shard
//! image) does not fit a single 4 KiB sector and must never share an erase
//! unit with its sibling copy. Writes alternate between the two slots and
//! the old copy is demoted only after the new one is fully written and
//! marked active, so a power cut at any single point leaves one consistent
//! copy readable.

use crate::config::{FLASH_SECTOR_SIZE, FLASH_WEIGHT_BASE, SHARD_SIZE};
use crate::error::{CoreError, Result};
use crate::hal::FlashDevice;
use crate::shard::WeightShard;

/// Magic tag ("PLN\x01") marking an initialized slot header.
pub const SLOT_MAGIC: u32 = 0x504C_4E01;

/// Erase sectors per slot.
const SECTORS_PER_SLOT: u32 = 2;

/// Byte span of one slot.
pub const SLOT_SIZE: u32 = SECTORS_PER_SLOT * FLASH_SECTOR_SIZE;

/// Slots per shard (the ping-pong pair).
const SLOTS_PER_SHARD: u32 = 2;

/// Header at the start of every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader {
    /// [`SLOT_MAGIC`] when initialized.
    pub magic: u32,
    /// Erase cycles this slot has seen.
    pub write_count: u32,
    /// Shard stored here.
    pub shard_id: u16,
    /// Bit 0 = valid, bit 1 = active.
    pub flags: u16,
}

impl SectorHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 12;
    /// The slot holds a fully written record.
    pub const FLAG_VALID: u16 = 0x01;
    /// The slot is the live copy of its pair.
    pub const FLAG_ACTIVE: u16 = 0x02;

    /// Encode little-endian.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..8].copy_from_slice(&self.write_count.to_le_bytes());
        out[8..10].copy_from_slice(&self.shard_id.to_le_bytes());
        out[10..12].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Decode little-endian. Erased flash decodes to an all-ones header
    /// that fails [`Self::is_valid`].
    pub fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            write_count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            shard_id: u16::from_le_bytes([bytes[8], bytes[9]]),
            flags: u16::from_le_bytes([bytes[10], bytes[11]]),
        }
    }

    /// Magic matches and the valid flag is set.
    pub fn is_valid(&self) -> bool {
        self.magic == SLOT_MAGIC && self.flags & Self::FLAG_VALID != 0
    }

    /// The active flag is set.
    pub fn is_active(&self) -> bool {
        self.flags & Self::FLAG_ACTIVE != 0
    }
}

/// Ping-pong shard store over a raw flash device.
pub struct FlashStore<F: FlashDevice> {
    flash: F,
}

impl<F: FlashDevice> FlashStore<F> {
    /// Wrap a flash device.
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    fn pair_base(shard_id: u8) -> u32 {
        FLASH_WEIGHT_BASE + shard_id as u32 * SLOTS_PER_SHARD * SLOT_SIZE
    }

    fn read_header(&self, addr: u32) -> SectorHeader {
        let mut buf = [0u8; SectorHeader::SIZE];
        self.flash.read(addr, &mut buf);
        SectorHeader::decode(&buf)
    }

    /// Locate the slot holding the live copy of a shard.
    ///
    /// Neither slot valid: not found. Exactly one valid: that one. Both
    /// valid: the one flagged active, else the higher write count (first
    /// slot on a tie).
    pub fn find_active_slot(&self, shard_id: u8) -> Option<u32> {
        let base = Self::pair_base(shard_id);
        let h0 = self.read_header(base);
        let h1 = self.read_header(base + SLOT_SIZE);
        match (h0.is_valid(), h1.is_valid()) {
            (false, false) => None,
            (true, false) => Some(base),
            (false, true) => Some(base + SLOT_SIZE),
            (true, true) => {
                if h0.is_active() {
                    Some(base)
                } else if h1.is_active() {
                    Some(base + SLOT_SIZE)
                } else if h0.write_count >= h1.write_count {
                    Some(base)
                } else {
                    Some(base + SLOT_SIZE)
                }
            }
        }
    }

    /// Persist a shard into the inactive slot of its pair.
    ///
    /// Sequence: read the target's old write count, erase the target,
    /// write the new header (valid + active), write the shard image, and
    /// finally demote the previously active slot to valid-only. The demote
    /// preserves the old slot's write count and only clears the active
    /// bit, so it needs no erase.
    pub fn write_shard(&mut self, shard: &WeightShard) {
        let base = Self::pair_base(shard.shard_id);
        let active = self.find_active_slot(shard.shard_id);
        let target = match active {
            Some(addr) if addr == base => base + SLOT_SIZE,
            _ => base,
        };

        let old = self.read_header(target);
        let write_count = if old.magic == SLOT_MAGIC {
            old.write_count.wrapping_add(1)
        } else {
            1
        };

        self.flash.erase_sector(target);
        self.flash.erase_sector(target + FLASH_SECTOR_SIZE);

        let header = SectorHeader {
            magic: SLOT_MAGIC,
            write_count,
            shard_id: shard.shard_id as u16,
            flags: SectorHeader::FLAG_VALID | SectorHeader::FLAG_ACTIVE,
        };
        self.flash.write(target, &header.encode());

        let mut image = [0u8; SHARD_SIZE];
        shard.to_bytes(&mut image);
        self.flash.write(target + SectorHeader::SIZE as u32, &image);

        if let Some(prev) = active {
            if prev != target {
                let mut demoted = self.read_header(prev);
                demoted.flags = SectorHeader::FLAG_VALID;
                self.flash.write(prev, &demoted.encode());
            }
        }
    }

    /// Load a shard's live copy.
    ///
    /// A corrupt live copy (power cut between header and payload) falls
    /// back to the sibling slot, which holds the previous consistent
    /// version. Only when neither slot yields a checksum-valid shard does
    /// this report not-found and the caller re-initializes.
    pub fn read_shard(&self, shard_id: u8) -> Result<WeightShard> {
        let base = Self::pair_base(shard_id);
        let slot = self
            .find_active_slot(shard_id)
            .ok_or(CoreError::ShardNotFound)?;
        if let Ok(shard) = self.read_slot(slot) {
            return Ok(shard);
        }
        let sibling = if slot == base { base + SLOT_SIZE } else { base };
        if self.read_header(sibling).is_valid() {
            return self.read_slot(sibling);
        }
        Err(CoreError::ShardNotFound)
    }

    fn read_slot(&self, slot: u32) -> Result<WeightShard> {
        let mut image = [0u8; SHARD_SIZE];
        self.flash.read(slot + SectorHeader::SIZE as u32, &mut image);
        let shard = WeightShard::from_bytes(&image).ok_or(CoreError::ShardNotFound)?;
        if !shard.verify_checksum() {
            return Err(CoreError::ShardNotFound);
        }
        Ok(shard)
    }

    /// Erase cycles of the live slot, 0 when nothing is stored.
    pub fn wear_count(&self, shard_id: u8) -> u32 {
        self.find_active_slot(shard_id)
            .map_or(0, |slot| self.read_header(slot).write_count)
    }

    /// The underlying flash device.
    pub fn flash(&self) -> &F {
        &self.flash
    }
}
