//! Resource budget and tuning constants.
//!
//! Reference part: 48 MHz RISC core, 64 KiB SRAM (~40 KiB usable after the
//! radio stack claims its share), 512 KiB flash, no FPU, 16 system ticks per
//! microsecond.

use crate::fixed::Q16_16;

/// SRAM available to the learning core after the radio stack.
pub const SRAM_BUDGET: u32 = 40 * 1024;

/// Size of one weight shard in bytes, header included. Hard invariant.
pub const SHARD_SIZE: usize = 4096;

/// Largest datagram the mesh transport accepts.
pub const MESH_MSG_MAX_SIZE: usize = 380;

/// Resident shard window held in RAM.
pub const MAX_SHARDS_IN_RAM: usize = 4;

/// Shard count of the full distributed model.
pub const TOTAL_MODEL_SHARDS: u8 = 64;

/// Base SGD step size before resonance scaling, Q16.16 (~0.001).
pub const LEARNING_RATE: Q16_16 = Q16_16::from_raw(66);

/// Weight broadcast period.
pub const GOSSIP_INTERVAL_MS: u32 = 5000;

/// Background compute is progressively throttled above this die temperature.
pub const TEMP_THROTTLE_C: i16 = 55;

/// All background tasks are halted at this die temperature.
pub const TEMP_SHUTDOWN_C: i16 = 70;

/// Keep-out margin before the next radio event.
pub const BLE_GUARD_US: u32 = 2000;

/// Upper bound on a single compute burst.
pub const AI_TIMESLOT_US: u32 = 5000;

/// Slices shorter than this are not worth a dispatch.
pub const MIN_SLICE_US: u32 = 100;

/// Scheduler task table capacity.
pub const MAX_TASKS: usize = 8;

/// Temperature is sampled once per this many scheduler slices.
pub const THERMAL_SAMPLE_INTERVAL: u8 = 100;

/// Neighbor table capacity.
pub const MAX_NEIGHBORS: usize = 16;

/// Concurrent shard reassembly slots.
pub const MAX_PENDING_FRAGMENTS: usize = 4;

/// Shard bytes carried per mesh fragment.
pub const FRAGMENT_SIZE: usize = 256;

/// Start of the weight region in flash, after the firmware image.
pub const FLASH_WEIGHT_BASE: u32 = 0x40000;

/// Erase granularity of the reference flash part.
pub const FLASH_SECTOR_SIZE: u32 = 4096;

// The resident window and the reassembly pool dominate the static RAM
// footprint; everything else is a few hundred bytes of tables.
const _: () = {
    assert!(MAX_SHARDS_IN_RAM * SHARD_SIZE + MAX_PENDING_FRAGMENTS * SHARD_SIZE
        <= SRAM_BUDGET as usize);
    assert!(SHARD_SIZE % FRAGMENT_SIZE == 0);
    assert!(FRAGMENT_SIZE + 16 <= MESH_MSG_MAX_SIZE);
};
