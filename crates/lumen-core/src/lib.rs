//! # Lumen Core: Mesh-Learning Smart Bulb Firmware
//!
//! Firmware core for a constrained smart-bulb radio controller that drives
//! two LED channels, participates in a low-power mesh network, and runs a
//! federated learning loop whose int8 model is sharded across the mesh.
//!
//! ## Design principles
//!
//! - **Zero heap allocation**: every table and buffer is statically sized
//!   and lives inside its owner; nothing allocates after init.
//! - **Cooperative micro-slices**: background compute runs only in the
//!   windows the radio stack reports between its events, never within the
//!   guard margin, and thermal pressure shrinks the windows to nothing.
//! - **Fixed-point throughout**: the target has no FPU. Weights are int8,
//!   accumulators int32, and the resonance pipeline Q16.16.
//! - **Silent-drop error policy**: a lossy mesh makes short frames,
//!   duplicates, and corrupt payloads ordinary events. They are dropped
//!   where they are detected and the core never panics.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use lumen_core::BulbNode;
//!
//! // Platform handles implement the `hal` traits.
//! let mut node = BulbNode::new(clock, temp, radio, flash, pwm, mesh_addr);
//!
//! // Wire the three platform callbacks:
//! node.radio_idle();                      // BLE idle hook
//! node.on_mesh_frame(&frame, src, rssi);  // vendor-model receive
//! node.on_light_command(200, 30, 500);    // light control
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod flash;
pub mod gossip;
pub mod hal;
pub mod light;
pub mod node;
pub mod sched;
pub mod shard;

pub use crate::{
    engine::LearningEngine,
    error::{CoreError, Result},
    fixed::Q16_16,
    flash::FlashStore,
    gossip::{GossipEvent, MeshGossip},
    light::{LightController, LightSnapshot, Scene},
    node::{BulbNode, Diagnostics, NodeTask},
    sched::{Grant, Priority, Scheduler, TaskState, TaskStats},
    shard::WeightShard,
};

/// Crate version for host-side compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
