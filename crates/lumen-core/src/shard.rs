//! Weight shards: CRC-protected fragments of the distributed model.
//!
//! The full model is sharded across the mesh; each node holds a rotating
//! window of shards, trains them locally, and gossips them to neighbors.
//! A shard is a self-describing 4 KiB record: a 12-byte header followed by
//! int8 quantized weights. Wire and flash layouts are identical and encoded
//! explicitly (little-endian), never through in-memory struct layout.

use core::fmt;

use crate::config::SHARD_SIZE;
use crate::fixed::Q16_16;

/// Shard header size on the wire.
pub const HEADER_SIZE: usize = 12;

/// Number of int8 weights carried per shard.
pub const WEIGHT_COUNT: usize = SHARD_SIZE - HEADER_SIZE;

/// CRC-16/CCITT: init 0xFFFF, polynomial 0x1021, no final XOR.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for &byte in data {
        crc = crc16_step(crc, byte);
    }
    crc
}

#[inline(always)]
fn crc16_step(mut crc: u16, byte: u8) -> u16 {
    crc ^= (byte as u16) << 8;
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
    }
    crc
}

/// One fragment of the distributed model.
///
/// Invariants: the checksum matches the weight payload after every mutation,
/// `contributors >= 1` once initialized, and the wire image is exactly
/// [`SHARD_SIZE`] bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct WeightShard {
    /// Which piece of the model this is (0..TOTAL_MODEL_SHARDS).
    pub shard_id: u8,
    /// Bumped on every local update or merge. Wraps.
    pub version: u8,
    /// CRC-16/CCITT over the weight payload only.
    pub checksum: u16,
    /// Consensus training epoch; merges take the maximum.
    pub global_epoch: u32,
    /// How many nodes have been averaged into these weights.
    pub contributors: u8,
    /// int8 quantized weights.
    pub weights: [i8; WEIGHT_COUNT],
}

impl WeightShard {
    /// Initialize a fresh shard with a deterministic pseudo-random payload.
    ///
    /// The seed depends on both the weight index and the shard id so every
    /// shard starts distinct, and every node starts from the same point.
    pub fn init(shard_id: u8) -> Self {
        let mut weights = [0i8; WEIGHT_COUNT];
        for (i, w) in weights.iter_mut().enumerate() {
            *w = ((i * 7 + shard_id as usize) % 17) as i8 - 8;
        }
        let mut shard = Self {
            shard_id,
            version: 1,
            checksum: 0,
            global_epoch: 0,
            contributors: 1,
            weights,
        };
        shard.update_checksum();
        shard
    }

    fn payload_crc(&self) -> u16 {
        let mut crc = 0xFFFFu16;
        for &w in self.weights.iter() {
            crc = crc16_step(crc, w as u8);
        }
        crc
    }

    /// Recompute the header checksum from the current payload.
    pub fn update_checksum(&mut self) {
        self.checksum = self.payload_crc();
    }

    /// Check the payload against the header checksum.
    pub fn verify_checksum(&self) -> bool {
        self.payload_crc() == self.checksum
    }

    /// Apply one quantized SGD step.
    ///
    /// The learning rate is quantized to Q8.8 (`round(lr * 256)`) and each
    /// weight moves by `(grad * lr_fixed) >> 8`, saturating at the int8
    /// bounds. Rates below ~0.002 quantize to a zero step; the version and
    /// checksum still advance.
    pub fn apply_gradient(&mut self, grads: &[i8], lr: Q16_16) {
        let lr_fixed = ((lr.to_raw() + (1 << 7)) >> 8) as i16;
        let count = grads.len().min(WEIGHT_COUNT);
        for i in 0..count {
            let update = (grads[i] as i32 * lr_fixed as i32) >> 8;
            let new_val = (self.weights[i] as i32 - update).clamp(-128, 127);
            self.weights[i] = new_val as i8;
        }
        self.version = self.version.wrapping_add(1);
        self.update_checksum();
    }

    /// Federated average: merge an incoming copy of the same shard, each
    /// side weighted by its contributor count.
    ///
    /// Mismatched ids and corrupt payloads are silently ignored. The merge
    /// runs in an i32 accumulator, so a merged weight always lands between
    /// the two inputs. Contributor counts saturate at 255.
    pub fn fed_avg(&mut self, other: &WeightShard) {
        if other.shard_id != self.shard_id || !other.verify_checksum() {
            return;
        }

        let a = self.contributors as i32;
        let b = other.contributors as i32;
        let total = a + b;
        if total == 0 {
            return;
        }

        for i in 0..WEIGHT_COUNT {
            let merged = (self.weights[i] as i32 * a + other.weights[i] as i32 * b) / total;
            self.weights[i] = merged as i8;
        }

        self.contributors = total.min(255) as u8;
        self.version = self.version.wrapping_add(1);
        self.global_epoch = self.global_epoch.max(other.global_epoch);
        self.update_checksum();
    }

    fn encode_header(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0] = self.shard_id;
        out[1] = self.version;
        out[2..4].copy_from_slice(&self.checksum.to_le_bytes());
        out[4..8].copy_from_slice(&self.global_epoch.to_le_bytes());
        out[8] = self.contributors;
        out
    }

    /// Serialize the full wire image.
    pub fn to_bytes(&self, out: &mut [u8; SHARD_SIZE]) {
        out[..HEADER_SIZE].copy_from_slice(&self.encode_header());
        for (i, &w) in self.weights.iter().enumerate() {
            out[HEADER_SIZE + i] = w as u8;
        }
    }

    /// Copy `out.len()` bytes of the wire image starting at `offset`.
    ///
    /// Lets the fragmenter emit 256-byte chunks without staging the whole
    /// 4 KiB image in RAM.
    pub fn read_wire(&self, offset: usize, out: &mut [u8]) {
        let header = self.encode_header();
        for (k, slot) in out.iter_mut().enumerate() {
            let pos = offset + k;
            *slot = if pos < HEADER_SIZE {
                header[pos]
            } else if pos < SHARD_SIZE {
                self.weights[pos - HEADER_SIZE] as u8
            } else {
                0
            };
        }
    }

    /// Decode a wire image. Returns `None` if fewer than [`SHARD_SIZE`]
    /// bytes are supplied. The checksum is not verified here; callers that
    /// care call [`WeightShard::verify_checksum`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SHARD_SIZE {
            return None;
        }
        let mut weights = [0i8; WEIGHT_COUNT];
        for (i, w) in weights.iter_mut().enumerate() {
            *w = bytes[HEADER_SIZE + i] as i8;
        }
        Some(Self {
            shard_id: bytes[0],
            version: bytes[1],
            checksum: u16::from_le_bytes([bytes[2], bytes[3]]),
            global_epoch: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            contributors: bytes[8],
            weights,
        })
    }
}

impl fmt::Debug for WeightShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightShard")
            .field("shard_id", &self.shard_id)
            .field("version", &self.version)
            .field("checksum", &self.checksum)
            .field("global_epoch", &self.global_epoch)
            .field("contributors", &self.contributors)
            .finish_non_exhaustive()
    }
}
