//! On-air framing for the gossip vendor model.
//!
//! Layouts are authoritative byte specifications, encoded and decoded
//! explicitly. All multi-byte fields are little-endian.

/// Vendor opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// A whole shard's weights in one frame.
    WeightUpdate = 0xC0,
    /// Ask neighbors for a specific shard.
    WeightRequest = 0xC1,
    /// Presence and capacity announcement.
    Heartbeat = 0xC2,
    /// Slow-down signal.
    Backpressure = 0xC3,
    /// One fragment of a shard transfer.
    ShardFragment = 0xC4,
    /// Acknowledgment (reserved).
    Ack = 0xC5,
}

impl Opcode {
    /// Decode a raw opcode byte. Unknown values are dropped by the caller.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xC0 => Some(Self::WeightUpdate),
            0xC1 => Some(Self::WeightRequest),
            0xC2 => Some(Self::Heartbeat),
            0xC3 => Some(Self::Backpressure),
            0xC4 => Some(Self::ShardFragment),
            0xC5 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// Common frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipHeader {
    /// Raw opcode byte.
    pub opcode: u8,
    /// Hops remaining.
    pub ttl: u8,
    /// Originating node.
    pub src_addr: u16,
    /// Per-origin sequence number for deduplication.
    pub seq_num: u8,
    /// Reserved flag bits.
    pub flags: u8,
}

impl GossipHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 6;

    /// Encode into the first [`Self::SIZE`] bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.opcode;
        out[1] = self.ttl;
        out[2..4].copy_from_slice(&self.src_addr.to_le_bytes());
        out[4] = self.seq_num;
        out[5] = self.flags;
    }

    /// Decode from a frame prefix. `None` on short input.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            opcode: bytes[0],
            ttl: bytes[1],
            src_addr: u16::from_le_bytes([bytes[2], bytes[3]]),
            seq_num: bytes[4],
            flags: bytes[5],
        })
    }
}

/// Fragment descriptor for large shard transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Shard being transferred.
    pub shard_id: u8,
    /// Index of this fragment.
    pub fragment_idx: u8,
    /// Fragment count of the whole transfer.
    pub total_fragments: u8,
}

impl FragmentInfo {
    /// Encoded size in bytes (one reserved).
    pub const SIZE: usize = 4;

    /// Encode into the first [`Self::SIZE`] bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.shard_id;
        out[1] = self.fragment_idx;
        out[2] = self.total_fragments;
        out[3] = 0;
    }

    /// Decode from a payload prefix. `None` on short input.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            shard_id: bytes[0],
            fragment_idx: bytes[1],
            total_fragments: bytes[2],
        })
    }
}

/// Heartbeat body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPayload {
    /// Sender's CPU/thermal load, 0-100.
    pub load_percent: u8,
    /// Shards the sender holds in RAM.
    pub shards_held: u8,
    /// Sender's training epoch.
    pub epoch: u16,
    /// Sender's known neighbor count.
    pub neighbors: u8,
}

impl HeartbeatPayload {
    /// Encoded size in bytes (three reserved).
    pub const SIZE: usize = 8;

    /// Encode into the first [`Self::SIZE`] bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.load_percent;
        out[1] = self.shards_held;
        out[2..4].copy_from_slice(&self.epoch.to_le_bytes());
        out[4] = self.neighbors;
        out[5..8].fill(0);
    }

    /// Decode from a payload prefix. `None` on short input.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            load_percent: bytes[0],
            shards_held: bytes[1],
            epoch: u16::from_le_bytes([bytes[2], bytes[3]]),
            neighbors: bytes[4],
        })
    }
}
