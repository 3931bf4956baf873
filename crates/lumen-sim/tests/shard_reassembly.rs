//! Fragmented shard transfer end to end: a sync broadcast fans out as 16
//! fragments, survives reordering, and lands either as a FedAvg merge
//! (resident shard) or a flash write (foreign shard).

use lumen_core::config::GOSSIP_INTERVAL_MS;
use lumen_core::flash::FlashStore;
use lumen_core::gossip::MeshGossip;
use lumen_core::shard::WeightShard;
use lumen_sim::{deliver_frames, SimPlatform, SimRadio};

#[test]
fn sync_broadcast_emits_sixteen_fragments_and_heartbeat() {
    let platform = SimPlatform::new();
    let mut node = platform.build_node(0x0001);

    // Cross the gossip interval, then grant one slice: the sync task wins
    // (Normal beats Low) and broadcasts shard 0 plus a heartbeat.
    platform.clock.advance_ms(GOSSIP_INTERVAL_MS + 1);
    platform.clock.open_window_us(5000);
    node.radio_idle();

    assert_eq!(platform.radio.frame_count(), 17);
    platform.check().unwrap();
}

#[test]
fn resident_shard_delivery_fed_avgs() {
    let sender = SimPlatform::new();
    let mut sender_node = sender.build_node(0x0001);
    let receiver = SimPlatform::new();
    let mut receiver_node = receiver.build_node(0x0002);

    sender.clock.advance_ms(GOSSIP_INTERVAL_MS + 1);
    sender.clock.open_window_us(5000);
    sender_node.radio_idle();

    let delivered = deliver_frames(&sender, &mut receiver_node, 0x0001, -48);
    assert_eq!(delivered, 17);

    // Shard 0 is resident on both sides: the receiver merged it.
    let merged = receiver_node.engine().resident(0).unwrap();
    assert_eq!(merged.contributors, 2);
    assert!(merged.verify_checksum());

    // The heartbeat registered the sender as a neighbor.
    assert_eq!(receiver_node.mesh().neighbor_count(), 1);
    let neighbor = &receiver_node.mesh().neighbors()[0];
    assert_eq!(neighbor.addr, 0x0001);
    assert_eq!(neighbor.held_shards, 1);

    receiver.check().unwrap();
}

#[test]
fn foreign_shard_reassembles_out_of_order_and_persists() {
    // A shard outside the receiver's resident window (ids 0..4) must be
    // written to flash instead of merged.
    let mut shard = WeightShard::init(7);
    shard.global_epoch = 3;
    shard.contributors = 6;
    shard.update_checksum();

    let tx_radio = SimRadio::new();
    let mut tx_mesh = MeshGossip::new(tx_radio.clone(), 0x0001);
    tx_mesh.broadcast_shard(&shard);
    let frames = tx_radio.take_frames();
    assert_eq!(frames.len(), 16);

    let receiver = SimPlatform::new();
    let mut receiver_node = receiver.build_node(0x0002);
    for frame in frames.iter().rev() {
        receiver_node.on_mesh_frame(frame, 0x0001, -48);
    }

    // Read it back through an independent store over the same flash.
    let store = FlashStore::new(receiver.flash.clone());
    let persisted = store.read_shard(7).unwrap();
    assert_eq!(persisted, shard);
    receiver.check().unwrap();
}

#[test]
fn lost_fragment_blocks_delivery() {
    let shard = WeightShard::init(7);
    let tx_radio = SimRadio::new();
    let mut tx_mesh = MeshGossip::new(tx_radio.clone(), 0x0001);
    tx_mesh.broadcast_shard(&shard);
    let frames = tx_radio.take_frames();

    let receiver = SimPlatform::new();
    let mut receiver_node = receiver.build_node(0x0002);
    for (i, frame) in frames.iter().enumerate() {
        if i == 5 {
            continue;
        }
        receiver_node.on_mesh_frame(frame, 0x0001, -48);
    }

    // Nothing was merged or persisted; the slot stays occupied waiting.
    let store = FlashStore::new(receiver.flash.clone());
    assert!(store.read_shard(7).is_err());
    assert_eq!(receiver_node.mesh().pending_reassemblies(), 1);
}

#[test]
fn shard_request_answered_from_resident_window() {
    use lumen_core::gossip::wire::{GossipHeader, Opcode};

    let platform = SimPlatform::new();
    let mut node = platform.build_node(0x0001);

    // Ask for resident shard 2.
    let mut frame = [0u8; GossipHeader::SIZE + 1];
    GossipHeader {
        opcode: Opcode::WeightRequest as u8,
        ttl: 2,
        src_addr: 0x0009,
        seq_num: 1,
        flags: 0,
    }
    .encode(&mut frame);
    frame[GossipHeader::SIZE] = 2;
    node.on_mesh_frame(&frame, 0x0009, -50);

    // The node re-broadcasts the requested shard as 16 fragments.
    assert_eq!(platform.radio.frame_count(), 16);

    // A request for a shard we do not hold goes unanswered.
    let mut frame = [0u8; GossipHeader::SIZE + 1];
    GossipHeader {
        opcode: Opcode::WeightRequest as u8,
        ttl: 2,
        src_addr: 0x0009,
        seq_num: 2,
        flags: 0,
    }
    .encode(&mut frame);
    frame[GossipHeader::SIZE] = 60;
    node.on_mesh_frame(&frame, 0x0009, -50);
    assert_eq!(platform.radio.frame_count(), 16);
}
