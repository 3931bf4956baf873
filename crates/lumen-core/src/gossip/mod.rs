//! Mesh gossip: shard exchange over a small-MTU flooding mesh.
//!
//! A 4 KiB shard does not fit in one mesh datagram, so it travels as 16
//! fragments of 256 bytes that get reassembled out of order on the far
//! side. The module also tracks neighbors, deduplicates flooded frames,
//! and carries the backpressure signal that slows gossip when the
//! neighborhood is overloaded.
//!
//! Every protocol failure (short frame, duplicate, unknown opcode, bad
//! CRC, no reassembly slot) is a silent drop; a lossy mesh makes all of
//! them ordinary events.

pub mod wire;

use heapless::Vec;

use crate::config::{
    FRAGMENT_SIZE, MAX_NEIGHBORS, MAX_PENDING_FRAGMENTS, MESH_MSG_MAX_SIZE, SHARD_SIZE,
    TOTAL_MODEL_SHARDS,
};
use crate::hal::RadioLink;
use crate::shard::WeightShard;
use wire::{FragmentInfo, GossipHeader, HeartbeatPayload, Opcode};

/// Entries kept in the duplicate-suppression ring.
const DEDUP_RING_LEN: usize = 16;

/// Neighbors reporting load above this count as overloaded.
const OVERLOAD_THRESHOLD: u8 = 80;

/// Reassembly slot id meaning "free".
const EMPTY_SLOT: u8 = 0xFF;

/// One tracked mesh neighbor.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// Mesh address.
    pub addr: u16,
    /// Last RSSI, biased by +128 into unsigned range.
    pub rssi: u8,
    /// Load the neighbor last reported, 0-100.
    pub load_percent: u8,
    /// Tick of the last frame seen from this neighbor.
    pub last_seen_tick: u32,
    /// Bitmap of model shards this neighbor has been seen broadcasting.
    pub held_shards: u64,
}

/// What a received frame amounted to, once decoded and reassembled.
#[derive(Debug)]
pub enum GossipEvent {
    /// A complete, checksum-valid shard arrived.
    Shard(WeightShard),
    /// A neighbor asked for a shard we may hold.
    ShardRequested {
        /// Shard being requested.
        shard_id: u8,
        /// Requesting node.
        from: u16,
    },
}

struct ReassemblySlot {
    shard_id: u8,
    received_mask: u16,
    buffer: [u8; SHARD_SIZE],
}

const FREE_SLOT: ReassemblySlot = ReassemblySlot {
    shard_id: EMPTY_SLOT,
    received_mask: 0,
    buffer: [0; SHARD_SIZE],
};

/// Ring of recently seen (source, sequence) pairs.
struct DedupRing {
    src: [u16; DEDUP_RING_LEN],
    seq: [u8; DEDUP_RING_LEN],
    next: usize,
}

impl DedupRing {
    const fn new() -> Self {
        Self {
            src: [0; DEDUP_RING_LEN],
            seq: [0; DEDUP_RING_LEN],
            next: 0,
        }
    }

    /// True if the pair was already seen; otherwise records it, replacing
    /// the oldest entry.
    fn check_and_insert(&mut self, src: u16, seq: u8) -> bool {
        for i in 0..DEDUP_RING_LEN {
            if self.src[i] == src && self.seq[i] == seq {
                return true;
            }
        }
        self.src[self.next] = src;
        self.seq[self.next] = seq;
        self.next = (self.next + 1) % DEDUP_RING_LEN;
        false
    }
}

/// The gossip vendor model: framing, neighbor table, reassembly pool.
pub struct MeshGossip<R: RadioLink> {
    radio: R,
    my_addr: u16,
    seq_num: u8,
    neighbors: Vec<Neighbor, MAX_NEIGHBORS>,
    dedup: DedupRing,
    slots: [ReassemblySlot; MAX_PENDING_FRAGMENTS],
}

impl<R: RadioLink> MeshGossip<R> {
    /// New gossip instance bound to a provisioned mesh address.
    pub fn new(radio: R, my_addr: u16) -> Self {
        Self {
            radio,
            my_addr,
            seq_num: 0,
            neighbors: Vec::new(),
            dedup: DedupRing::new(),
            slots: [FREE_SLOT; MAX_PENDING_FRAGMENTS],
        }
    }

    /// Handle one received frame.
    ///
    /// Runs dedup and neighbor bookkeeping, then dispatches on opcode.
    /// Returns an event only when a frame completes into something the
    /// node has to act on.
    pub fn on_receive(
        &mut self,
        frame: &[u8],
        src: u16,
        rssi: i8,
        now_tick: u32,
    ) -> Option<GossipEvent> {
        let header = GossipHeader::decode(frame)?;
        if self.dedup.check_and_insert(header.src_addr, header.seq_num) {
            return None;
        }
        self.touch_neighbor(src, rssi, now_tick);

        let payload = &frame[GossipHeader::SIZE..];
        match Opcode::from_u8(header.opcode)? {
            Opcode::WeightUpdate => {
                // Direct whole-shard update; only possible on transports
                // with a large MTU. The shard's own checksum is the only
                // integrity gate.
                if payload.len() >= SHARD_SIZE {
                    WeightShard::from_bytes(payload).map(GossipEvent::Shard)
                } else {
                    None
                }
            }
            Opcode::WeightRequest => payload
                .first()
                .map(|&shard_id| GossipEvent::ShardRequested { shard_id, from: src }),
            Opcode::Heartbeat => {
                self.handle_heartbeat(payload, src);
                None
            }
            Opcode::ShardFragment => self.handle_fragment(payload, src),
            Opcode::Backpressure => {
                self.handle_backpressure(src);
                None
            }
            Opcode::Ack => None,
        }
    }

    /// Broadcast a shard as 16 fragments.
    pub fn broadcast_shard(&mut self, shard: &WeightShard) {
        let total_fragments = SHARD_SIZE.div_ceil(FRAGMENT_SIZE) as u8;
        for idx in 0..total_fragments {
            let mut msg = [0u8; MESH_MSG_MAX_SIZE];
            let header = GossipHeader {
                opcode: Opcode::ShardFragment as u8,
                ttl: 3,
                src_addr: self.my_addr,
                seq_num: self.next_seq(),
                flags: 0,
            };
            header.encode(&mut msg);
            let info = FragmentInfo {
                shard_id: shard.shard_id,
                fragment_idx: idx,
                total_fragments,
            };
            info.encode(&mut msg[GossipHeader::SIZE..]);

            let offset = idx as usize * FRAGMENT_SIZE;
            let chunk_len = FRAGMENT_SIZE.min(SHARD_SIZE - offset);
            let data_start = GossipHeader::SIZE + FragmentInfo::SIZE;
            shard.read_wire(offset, &mut msg[data_start..data_start + chunk_len]);

            self.radio.send(&msg[..data_start + chunk_len]);
        }
    }

    /// Announce presence, load, and training progress to direct neighbors.
    pub fn send_heartbeat(&mut self, load_percent: u8, shards_held: u8, epoch: u16) {
        let mut msg = [0u8; GossipHeader::SIZE + HeartbeatPayload::SIZE];
        GossipHeader {
            opcode: Opcode::Heartbeat as u8,
            ttl: 1,
            src_addr: self.my_addr,
            seq_num: self.next_seq(),
            flags: 0,
        }
        .encode(&mut msg);
        HeartbeatPayload {
            load_percent,
            shards_held,
            epoch,
            neighbors: self.neighbors.len() as u8,
        }
        .encode(&mut msg[GossipHeader::SIZE..]);
        self.radio.send(&msg);
    }

    /// Ask neighbors for a specific shard.
    pub fn request_shard(&mut self, shard_id: u8) {
        let mut msg = [0u8; GossipHeader::SIZE + 1];
        GossipHeader {
            opcode: Opcode::WeightRequest as u8,
            ttl: 2,
            src_addr: self.my_addr,
            seq_num: self.next_seq(),
            flags: 0,
        }
        .encode(&mut msg);
        msg[GossipHeader::SIZE] = shard_id;
        self.radio.send(&msg);
    }

    /// True when strictly more than half of known neighbors report
    /// overload.
    pub fn should_throttle(&self) -> bool {
        let overloaded = self
            .neighbors
            .iter()
            .filter(|n| n.load_percent > OVERLOAD_THRESHOLD)
            .count();
        overloaded > self.neighbors.len() / 2
    }

    /// Number of tracked neighbors.
    pub fn neighbor_count(&self) -> u8 {
        self.neighbors.len() as u8
    }

    /// The tracked neighbor table.
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    /// Our provisioned mesh address.
    pub fn my_addr(&self) -> u16 {
        self.my_addr
    }

    /// Reassembly slots currently holding a partial shard.
    pub fn pending_reassemblies(&self) -> usize {
        self.slots.iter().filter(|s| s.shard_id != EMPTY_SLOT).count()
    }

    /// The underlying radio handle.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq_num;
        self.seq_num = self.seq_num.wrapping_add(1);
        seq
    }

    fn touch_neighbor(&mut self, addr: u16, rssi: i8, now_tick: u32) {
        let biased_rssi = (rssi as i16 + 128) as u8;
        if let Some(n) = self.neighbors.iter_mut().find(|n| n.addr == addr) {
            n.rssi = biased_rssi;
            n.last_seen_tick = now_tick;
            return;
        }
        // Table full: first-write-wins, the newcomer is dropped.
        let _ = self.neighbors.push(Neighbor {
            addr,
            rssi: biased_rssi,
            load_percent: 0,
            last_seen_tick: now_tick,
            held_shards: 0,
        });
    }

    fn handle_heartbeat(&mut self, payload: &[u8], src: u16) {
        let Some(hb) = HeartbeatPayload::decode(payload) else {
            return;
        };
        if let Some(n) = self.neighbors.iter_mut().find(|n| n.addr == src) {
            n.load_percent = hb.load_percent;
        }
    }

    fn handle_backpressure(&mut self, src: u16) {
        if let Some(n) = self.neighbors.iter_mut().find(|n| n.addr == src) {
            n.load_percent = 100;
        }
    }

    fn handle_fragment(&mut self, payload: &[u8], src: u16) -> Option<GossipEvent> {
        let info = FragmentInfo::decode(payload)?;
        if info.total_fragments == 0 || info.total_fragments as usize > 16 {
            return None;
        }
        let data = &payload[FragmentInfo::SIZE..];

        if info.shard_id < TOTAL_MODEL_SHARDS {
            if let Some(n) = self.neighbors.iter_mut().find(|n| n.addr == src) {
                n.held_shards |= 1u64 << info.shard_id;
            }
        }

        let slot_idx = self.find_slot(info.shard_id)?;
        let slot = &mut self.slots[slot_idx];
        slot.shard_id = info.shard_id;

        let offset = info.fragment_idx as usize * FRAGMENT_SIZE;
        if info.fragment_idx < 16 && offset + data.len() <= SHARD_SIZE {
            slot.buffer[offset..offset + data.len()].copy_from_slice(data);
            slot.received_mask |= 1 << info.fragment_idx;
        }

        let complete_mask = ((1u32 << info.total_fragments) - 1) as u16;
        if slot.received_mask == complete_mask {
            let shard = WeightShard::from_bytes(&slot.buffer)?;
            slot.shard_id = EMPTY_SLOT;
            slot.received_mask = 0;
            if shard.verify_checksum() {
                return Some(GossipEvent::Shard(shard));
            }
        }
        None
    }

    fn find_slot(&self, shard_id: u8) -> Option<usize> {
        let mut first_free = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.shard_id == shard_id {
                return Some(i);
            }
            if slot.shard_id == EMPTY_SLOT && first_free.is_none() {
                first_free = Some(i);
            }
        }
        first_free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Captures sent frames in a bounded buffer.
    #[derive(Default)]
    struct CaptureRadio {
        frames: Vec<heapless::Vec<u8, MESH_MSG_MAX_SIZE>, 24>,
    }

    impl RadioLink for CaptureRadio {
        fn send(&mut self, frame: &[u8]) {
            let mut copy = heapless::Vec::new();
            copy.extend_from_slice(frame).unwrap();
            self.frames.push(copy).ok();
        }
    }

    fn heartbeat_frame(src_addr: u16, seq: u8, load: u8) -> [u8; 14] {
        let mut frame = [0u8; 14];
        GossipHeader {
            opcode: Opcode::Heartbeat as u8,
            ttl: 1,
            src_addr,
            seq_num: seq,
            flags: 0,
        }
        .encode(&mut frame);
        HeartbeatPayload {
            load_percent: load,
            shards_held: 4,
            epoch: 1,
            neighbors: 0,
        }
        .encode(&mut frame[GossipHeader::SIZE..]);
        frame
    }

    #[test]
    fn test_short_frame_dropped() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        assert!(mesh.on_receive(&[0xC2, 1, 0], 2, -40, 0).is_none());
        assert_eq!(mesh.neighbor_count(), 0);
    }

    #[test]
    fn test_duplicate_frames_suppressed() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        let frame = heartbeat_frame(7, 42, 30);

        assert!(mesh.on_receive(&frame, 7, -40, 100).is_none());
        assert_eq!(mesh.neighbor_count(), 1);
        let seen_before = mesh.neighbors()[0].last_seen_tick;

        // Same (src, seq): dropped before any bookkeeping.
        assert!(mesh.on_receive(&frame, 7, -10, 999).is_none());
        assert_eq!(mesh.neighbors()[0].last_seen_tick, seen_before);

        // New sequence number from the same source goes through.
        let frame2 = heartbeat_frame(7, 43, 30);
        mesh.on_receive(&frame2, 7, -10, 999);
        assert_eq!(mesh.neighbors()[0].last_seen_tick, 999);
    }

    #[test]
    fn test_neighbor_table_first_write_wins() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        for i in 0..20u16 {
            let frame = heartbeat_frame(100 + i, i as u8, 10);
            mesh.on_receive(&frame, 100 + i, -50, 0);
        }
        assert_eq!(mesh.neighbor_count(), MAX_NEIGHBORS as u8);
        // The first sixteen senders kept their entries.
        assert!(mesh.neighbors().iter().any(|n| n.addr == 100));
        assert!(mesh.neighbors().iter().all(|n| n.addr < 116));
    }

    #[test]
    fn test_rssi_bias_and_heartbeat_load() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        let frame = heartbeat_frame(9, 0, 77);
        mesh.on_receive(&frame, 9, -60, 5);
        let n = &mesh.neighbors()[0];
        assert_eq!(n.rssi, 68); // -60 + 128
        assert_eq!(n.load_percent, 77);
        assert_eq!(n.last_seen_tick, 5);
    }

    #[test]
    fn test_backpressure_marks_neighbor_overloaded() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        mesh.on_receive(&heartbeat_frame(9, 0, 10), 9, -60, 0);

        let mut frame = [0u8; GossipHeader::SIZE];
        GossipHeader {
            opcode: Opcode::Backpressure as u8,
            ttl: 1,
            src_addr: 9,
            seq_num: 1,
            flags: 0,
        }
        .encode(&mut frame);
        mesh.on_receive(&frame, 9, -60, 1);
        assert_eq!(mesh.neighbors()[0].load_percent, 100);
    }

    #[test]
    fn test_should_throttle_strict_majority() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        for (i, load) in [85u8, 90, 50, 30].iter().enumerate() {
            mesh.on_receive(&heartbeat_frame(10 + i as u16, i as u8, *load), 10 + i as u16, -50, 0);
        }
        // 2 of 4 overloaded is not strictly more than half.
        assert!(!mesh.should_throttle());

        mesh.on_receive(&heartbeat_frame(12, 99, 95), 12, -50, 1);
        // Loads now {85, 90, 95, 30}.
        assert!(mesh.should_throttle());
    }

    #[test]
    fn test_broadcast_emits_sixteen_fragments() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 0x0A);
        let shard = WeightShard::init(7);
        mesh.broadcast_shard(&shard);

        let frames = &mesh.radio().frames;
        assert_eq!(frames.len(), 16);
        for (i, frame) in frames.iter().enumerate() {
            let header = GossipHeader::decode(frame).unwrap();
            assert_eq!(header.opcode, Opcode::ShardFragment as u8);
            assert_eq!(header.ttl, 3);
            assert_eq!(header.src_addr, 0x0A);
            let info = FragmentInfo::decode(&frame[GossipHeader::SIZE..]).unwrap();
            assert_eq!(info.shard_id, 7);
            assert_eq!(info.fragment_idx, i as u8);
            assert_eq!(info.total_fragments, 16);
            assert!(frame.len() <= MESH_MSG_MAX_SIZE);
        }
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let mut sender = MeshGossip::new(CaptureRadio::default(), 0x0A);
        let shard = WeightShard::init(7);
        sender.broadcast_shard(&shard);

        let mut receiver = MeshGossip::new(CaptureRadio::default(), 0x0B);
        let mut delivered = None;
        let mut deliveries = 0;
        for frame in sender.radio().frames.iter().rev() {
            if let Some(GossipEvent::Shard(s)) = receiver.on_receive(frame, 0x0A, -45, 0) {
                delivered = Some(s);
                deliveries += 1;
            }
        }
        assert_eq!(deliveries, 1);
        assert_eq!(delivered.unwrap(), shard);
        assert_eq!(receiver.pending_reassemblies(), 0);
        // Fragments also taught us which shard the sender holds.
        assert_eq!(receiver.neighbors()[0].held_shards, 1u64 << 7);
    }

    #[test]
    fn test_missing_fragment_keeps_slot_occupied() {
        let mut sender = MeshGossip::new(CaptureRadio::default(), 0x0A);
        let shard = WeightShard::init(7);
        sender.broadcast_shard(&shard);

        let mut receiver = MeshGossip::new(CaptureRadio::default(), 0x0B);
        for (i, frame) in sender.radio().frames.iter().enumerate() {
            if i == 5 {
                continue;
            }
            assert!(receiver.on_receive(frame, 0x0A, -45, 0).is_none());
        }
        assert_eq!(receiver.pending_reassemblies(), 1);
    }

    #[test]
    fn test_reassembly_pool_exhaustion_drops() {
        let mut receiver = MeshGossip::new(CaptureRadio::default(), 0x0B);
        // Occupy every slot with a different half-finished shard.
        for shard_id in 0..MAX_PENDING_FRAGMENTS as u8 {
            let mut sender = MeshGossip::new(CaptureRadio::default(), 0x10 + shard_id as u16);
            sender.broadcast_shard(&WeightShard::init(shard_id));
            let frame = &sender.radio().frames[0];
            receiver.on_receive(frame, 0x10 + shard_id as u16, -45, 0);
        }
        assert_eq!(receiver.pending_reassemblies(), MAX_PENDING_FRAGMENTS);

        // A fifth transfer has nowhere to go and is silently dropped.
        let mut sender = MeshGossip::new(CaptureRadio::default(), 0x20);
        sender.broadcast_shard(&WeightShard::init(60));
        for frame in sender.radio().frames.iter() {
            assert!(receiver.on_receive(frame, 0x20, -45, 0).is_none());
        }
        assert_eq!(receiver.pending_reassemblies(), MAX_PENDING_FRAGMENTS);
    }

    #[test]
    fn test_corrupt_reassembly_freed_but_not_delivered() {
        let mut sender = MeshGossip::new(CaptureRadio::default(), 0x0A);
        let shard = WeightShard::init(3);
        sender.broadcast_shard(&shard);

        let mut receiver = MeshGossip::new(CaptureRadio::default(), 0x0B);
        let data_start = GossipHeader::SIZE + FragmentInfo::SIZE;
        for (i, frame) in sender.radio().frames.iter().enumerate() {
            let mut frame: heapless::Vec<u8, MESH_MSG_MAX_SIZE> = frame.clone();
            if i == 2 {
                // Flip a payload byte so the reassembled checksum fails.
                frame[data_start + 10] ^= 0xFF;
            }
            assert!(receiver.on_receive(&frame, 0x0A, -45, 0).is_none());
        }
        // Slot was recycled even though delivery was refused.
        assert_eq!(receiver.pending_reassemblies(), 0);
    }

    #[test]
    fn test_direct_weight_update_delivery() {
        let shard = WeightShard::init(11);
        let mut frame = [0u8; GossipHeader::SIZE + SHARD_SIZE];
        GossipHeader {
            opcode: Opcode::WeightUpdate as u8,
            ttl: 1,
            src_addr: 5,
            seq_num: 0,
            flags: 0,
        }
        .encode(&mut frame);
        let mut image = [0u8; SHARD_SIZE];
        shard.to_bytes(&mut image);
        frame[GossipHeader::SIZE..].copy_from_slice(&image);

        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        match mesh.on_receive(&frame, 5, -50, 0) {
            Some(GossipEvent::Shard(s)) => assert_eq!(s, shard),
            other => panic!("expected shard delivery, got {other:?}"),
        }
    }

    #[test]
    fn test_weight_request_surfaces_event() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        let mut frame = [0u8; GossipHeader::SIZE + 1];
        GossipHeader {
            opcode: Opcode::WeightRequest as u8,
            ttl: 2,
            src_addr: 4,
            seq_num: 0,
            flags: 0,
        }
        .encode(&mut frame);
        frame[GossipHeader::SIZE] = 9;

        match mesh.on_receive(&frame, 4, -50, 0) {
            Some(GossipEvent::ShardRequested { shard_id, from }) => {
                assert_eq!(shard_id, 9);
                assert_eq!(from, 4);
            }
            other => panic!("expected request event, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_opcode_still_updates_neighbor() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        let mut frame = [0u8; GossipHeader::SIZE];
        GossipHeader {
            opcode: 0x7F,
            ttl: 1,
            src_addr: 3,
            seq_num: 0,
            flags: 0,
        }
        .encode(&mut frame);
        assert!(mesh.on_receive(&frame, 3, -50, 0).is_none());
        assert_eq!(mesh.neighbor_count(), 1);
    }

    #[test]
    fn test_sequence_numbers_monotonic_mod_256() {
        let mut mesh = MeshGossip::new(CaptureRadio::default(), 1);
        mesh.seq_num = 254;
        mesh.send_heartbeat(0, 4, 0);
        mesh.send_heartbeat(0, 4, 0);
        mesh.send_heartbeat(0, 4, 0);
        let seqs: heapless::Vec<u8, 3> = mesh
            .radio()
            .frames
            .iter()
            .map(|f| GossipHeader::decode(f).unwrap().seq_num)
            .collect();
        assert_eq!(&seqs[..], &[254, 255, 0]);
    }
}
