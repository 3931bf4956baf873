//! Learning engine: sharded federated training in scheduler micro-slices.
//!
//! Each slice runs at most one micro-step of the pipeline: collect local
//! features, score the previous prediction against what actually happened,
//! push one averaged gradient sample, and every tenth sample apply the
//! accumulated gradient to the current resident shard with a
//! coherence-modulated learning rate. Shards rotate under the training
//! cursor so the resident window trains evenly, and a separate cursor
//! round-robins outbound gossip.
//!
//! Everything is integer or Q16.16 fixed-point; there is no FPU on the
//! target.

use crate::config::{GOSSIP_INTERVAL_MS, LEARNING_RATE, MAX_NEIGHBORS, MAX_SHARDS_IN_RAM};
use crate::fixed::Q16_16;
use crate::flash::FlashStore;
use crate::gossip::MeshGossip;
use crate::hal::{Clock, FlashDevice, RadioLink};
use crate::light::LightSnapshot;
use crate::sched::Grant;
use crate::shard::WeightShard;

/// Feature vector length consumed by the prediction heads.
pub const FEATURE_LEN: usize = 16;

/// Number of prediction heads.
pub const HEAD_COUNT: usize = 6;

/// Golden ratio in Q16.16; the resonance ceiling.
pub const PHI: Q16_16 = Q16_16::from_raw(106_039);

/// Training is skipped below this slice budget.
const TRAIN_MIN_BUDGET_US: u32 = 1000;

/// Gradient samples accumulated between weight updates.
const SAMPLES_PER_UPDATE: u8 = 10;

/// Seconds in a day, for the circadian phase.
const DAY_SECONDS: u32 = 86_400;

/// Environmental observation snapshot, one byte per field.
///
/// The wire order is fixed: the first fourteen named fields followed by
/// two reserved zero bytes, sixteen bytes total. `mesh_activity`,
/// `rssi_avg`, `rssi_variance`, and `hop_count_avg` are extension points
/// that currently read zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    /// Light power estimate, 0-100.
    pub power_level: i8,
    /// Die temperature centered at 40C.
    pub temperature: i8,
    /// Mesh messages in the last second (extension point).
    pub mesh_activity: i8,
    /// Active mesh neighbors.
    pub neighbor_count: i8,
    /// Coarse uptime rhythm from the system tick.
    pub uptime_phase: i8,
    /// Time-of-day phase.
    pub circadian_phase: i8,
    /// Average neighbor RSSI (extension point).
    pub rssi_avg: i8,
    /// RSSI stability (extension point).
    pub rssi_variance: i8,
    /// Current brightness.
    pub brightness: i8,
    /// Current color temperature.
    pub color_temp: i8,
    /// Detected scene.
    pub scene_id: i8,
    /// Brightness rate of change.
    pub brightness_velocity: i8,
    /// Average hops to neighbors (extension point).
    pub hop_count_avg: i8,
    /// Unique shards in the neighborhood; resident count for now.
    pub shard_diversity: i8,
}

impl Features {
    /// Flatten into the fixed byte order used by the heads.
    pub fn to_array(&self) -> [i8; FEATURE_LEN] {
        [
            self.power_level,
            self.temperature,
            self.mesh_activity,
            self.neighbor_count,
            self.uptime_phase,
            self.circadian_phase,
            self.rssi_avg,
            self.rssi_variance,
            self.brightness,
            self.color_temp,
            self.scene_id,
            self.brightness_velocity,
            self.hop_count_avg,
            self.shard_diversity,
            0,
            0,
        ]
    }
}

/// Multi-head prediction targets (eight bytes with two reserved).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Targets {
    /// Neighbor activity one second out.
    pub next_mesh_activity: i8,
    /// Whether the light is about to change.
    pub next_power_level: i8,
    /// Time progression.
    pub circadian_next: i8,
    /// Signal change.
    pub neighbor_rssi_delta: i8,
    /// User behavior.
    pub next_scene: i8,
    /// Thermal direction.
    pub temperature_trend: i8,
}

/// Running-mean gradient accumulator.
#[derive(Debug, Clone, Copy)]
struct GradientAccum {
    grads: [i8; FEATURE_LEN],
    sample_count: u8,
}

impl GradientAccum {
    const fn new() -> Self {
        Self {
            grads: [0; FEATURE_LEN],
            sample_count: 0,
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    /// Fold in one sample: g <- (g*n + sample) / (n+1).
    fn accumulate(&mut self, sample: &[i8; FEATURE_LEN]) {
        let n = self.sample_count as i16;
        for i in 0..FEATURE_LEN {
            self.grads[i] = ((self.grads[i] as i16 * n + sample[i] as i16) / (n + 1)) as i8;
        }
        self.sample_count += 1;
    }
}

/// Forward pass: six prediction heads over the 16-byte feature vector.
///
/// Head `h` reads weights `[16h, 16h+16)`; the activation is a clamp of
/// the accumulated sum shifted down by 6.
pub fn forward(shard: &WeightShard, features: &Features) -> Targets {
    let feat = features.to_array();
    let head = |h: usize| -> i8 {
        let base = h * FEATURE_LEN;
        let mut sum: i32 = 0;
        for i in 0..FEATURE_LEN {
            sum += shard.weights[base + i] as i32 * feat[i] as i32;
        }
        (sum >> 6).clamp(-128, 127) as i8
    };
    Targets {
        next_mesh_activity: head(0),
        next_power_level: head(1),
        circadian_next: head(2),
        neighbor_rssi_delta: head(3),
        next_scene: head(4),
        temperature_trend: head(5),
    }
}

/// Weighted multi-head absolute error, averaged and clamped to `0..=127`.
/// Scene prediction carries the heaviest weight.
pub fn multi_head_loss(predicted: &Targets, actual: &Targets) -> i8 {
    let diff = |a: i8, b: i8| (a as i16 - b as i16).abs();
    let total = diff(predicted.next_mesh_activity, actual.next_mesh_activity) * 2
        + diff(predicted.next_power_level, actual.next_power_level)
        + diff(predicted.circadian_next, actual.circadian_next)
        + diff(predicted.neighbor_rssi_delta, actual.neighbor_rssi_delta) * 2
        + diff(predicted.next_scene, actual.next_scene) * 3
        + diff(predicted.temperature_trend, actual.temperature_trend);
    (total / 10).min(127) as i8
}

/// Backward pass: per-feature gradient `error * f[i] / 16`, saturated.
pub fn backward(error: i8, features: &Features) -> [i8; FEATURE_LEN] {
    let feat = features.to_array();
    let mut grads = [0i8; FEATURE_LEN];
    for i in 0..FEATURE_LEN {
        let g = error as i16 * feat[i] as i16 / 16;
        grads[i] = g.clamp(-128, 127) as i8;
    }
    grads
}

/// The engine: resident shard window, training state, gossip cadence.
pub struct LearningEngine {
    shards: [WeightShard; MAX_SHARDS_IN_RAM],
    gradient_accum: GradientAccum,
    current_shard_idx: usize,
    broadcast_idx: usize,
    local_epoch: u16,
    samples_since_sync: u8,
    last_gossip_tick: u32,
    coherence_score: Q16_16,
    learning_rate: Q16_16,
    prev_features: Features,
    prev_targets: Targets,
}

impl LearningEngine {
    /// Fresh engine with the resident window seeded deterministically.
    pub fn new() -> Self {
        Self {
            shards: core::array::from_fn(|i| WeightShard::init(i as u8)),
            gradient_accum: GradientAccum::new(),
            current_shard_idx: 0,
            broadcast_idx: 0,
            local_epoch: 0,
            samples_since_sync: 0,
            last_gossip_tick: 0,
            coherence_score: Q16_16::ZERO,
            learning_rate: LEARNING_RATE,
            prev_features: Features::default(),
            prev_targets: Targets::default(),
        }
    }

    /// Override the base learning rate (platform tuning hook).
    pub fn set_learning_rate(&mut self, lr: Q16_16) {
        self.learning_rate = lr;
    }

    /// One training micro-step. Returns true when work was done.
    ///
    /// Bails when the slice is shorter than 1 ms; the step is not
    /// preemptible and must fit its budget.
    pub fn train_step(
        &mut self,
        grant: &Grant,
        light: &LightSnapshot,
        neighbor_count: u8,
    ) -> bool {
        if grant.budget_us < TRAIN_MIN_BUDGET_US {
            return false;
        }

        let features = self.collect_features(grant, light, neighbor_count);
        let actual = self.compute_actual_targets(&features);

        let predicted = forward(&self.shards[self.current_shard_idx], &self.prev_features);
        let error = multi_head_loss(&predicted, &actual);

        let grads = backward(error, &self.prev_features);
        self.gradient_accum.accumulate(&grads);
        self.samples_since_sync += 1;

        if self.samples_since_sync >= SAMPLES_PER_UPDATE {
            let resonance =
                self.compute_resonance(grant.throttle, neighbor_count, light.transitioning);
            self.coherence_score = resonance;

            let lr = self.learning_rate.saturating_mul(resonance);
            let accum = self.gradient_accum.grads;
            self.shards[self.current_shard_idx].apply_gradient(&accum, lr);

            self.gradient_accum.clear();
            self.samples_since_sync = 0;
            self.local_epoch = self.local_epoch.wrapping_add(1);
        }

        self.prev_features = features;
        self.prev_targets = actual;
        self.current_shard_idx = (self.current_shard_idx + 1) % MAX_SHARDS_IN_RAM;
        true
    }

    /// Periodic gossip step. Always returns false; there is nothing more
    /// to do within the same slice.
    ///
    /// Skips silently while the gossip interval has not elapsed or the
    /// neighborhood signals backpressure (the interval timer still resets
    /// in that case, spreading retries).
    pub fn sync_step<C: Clock, R: RadioLink>(
        &mut self,
        grant: &Grant,
        mesh: &mut MeshGossip<R>,
    ) -> bool {
        let elapsed_ms =
            grant.now_tick.wrapping_sub(self.last_gossip_tick) / (C::TICKS_PER_US * 1000);
        if elapsed_ms < GOSSIP_INTERVAL_MS {
            return false;
        }
        if mesh.should_throttle() {
            self.last_gossip_tick = grant.now_tick;
            return false;
        }

        mesh.broadcast_shard(&self.shards[self.broadcast_idx]);
        self.broadcast_idx = (self.broadcast_idx + 1) % MAX_SHARDS_IN_RAM;

        mesh.send_heartbeat(grant.throttle, MAX_SHARDS_IN_RAM as u8, self.local_epoch);
        self.last_gossip_tick = grant.now_tick;
        false
    }

    /// Merge or persist a shard received from the mesh.
    pub fn on_shard_received<F: FlashDevice>(
        &mut self,
        incoming: &WeightShard,
        store: &mut FlashStore<F>,
    ) {
        for shard in self.shards.iter_mut() {
            if shard.shard_id == incoming.shard_id {
                shard.fed_avg(incoming);
                return;
            }
        }
        store.write_shard(incoming);
    }

    /// Swap a resident slot for a different model shard, persisting the
    /// outgoing one. Missing or corrupt flash copies re-initialize from
    /// the seed.
    pub fn rotate_shard<F: FlashDevice>(
        &mut self,
        slot: usize,
        new_shard_id: u8,
        store: &mut FlashStore<F>,
    ) {
        if slot >= MAX_SHARDS_IN_RAM {
            return;
        }
        store.write_shard(&self.shards[slot]);
        self.shards[slot] = store
            .read_shard(new_shard_id)
            .unwrap_or_else(|_| WeightShard::init(new_shard_id));
    }

    /// Coherence-driven learning-rate multiplier in roughly [0.5, PHI].
    ///
    /// Coherence is the product of thermal stability, mesh health, and
    /// light steadiness. High coherence boosts learning toward the golden
    /// ratio; low coherence dampens it to preserve stability.
    pub fn compute_resonance(
        &self,
        throttle: u8,
        neighbor_count: u8,
        light_transitioning: bool,
    ) -> Q16_16 {
        let stability =
            Q16_16::from_int((100 - throttle.min(100) as i32).max(0)).div(Q16_16::from_int(100));
        let mesh_health = Q16_16::from_int(neighbor_count.min(MAX_NEIGHBORS as u8) as i32)
            .div(Q16_16::from_int(MAX_NEIGHBORS as i32));
        let light_stable = if light_transitioning {
            Q16_16::HALF
        } else {
            Q16_16::ONE
        };
        let coherence = stability
            .saturating_mul(mesh_health)
            .saturating_mul(light_stable);

        let c_02 = Q16_16::from_raw(13_107); // 0.2
        let c_08 = Q16_16::from_raw(52_429); // 0.8
        if coherence > c_08 {
            PHI
        } else if coherence > Q16_16::HALF {
            // Linear ramp from 1.0 at coherence 0.5 up to PHI at 0.8.
            let t = coherence
                .saturating_sub(Q16_16::HALF)
                .div(Q16_16::from_raw(19_661)); // 0.3
            Q16_16::ONE.saturating_add(t.saturating_mul(PHI.saturating_sub(Q16_16::ONE)))
        } else if coherence > c_02 {
            Q16_16::ONE
        } else {
            Q16_16::HALF.saturating_add(coherence)
        }
    }

    /// Signed day phase derived from the local epoch counter (one epoch is
    /// roughly one second of wall time). Triangle-wave approximation of a
    /// daily sine, bounded in `[-128, 127]`.
    pub fn circadian_phase(&self) -> i8 {
        let approx_seconds = self.local_epoch as u32;
        let day_phase = ((approx_seconds % DAY_SECONDS) * 256 / DAY_SECONDS) as i16;
        let centered = day_phase - 128;
        let value = if centered < -64 {
            -128 - (centered + 128) * 2
        } else if centered < 64 {
            centered * 2
        } else {
            256 - (centered + 64) * 2
        };
        value as i8
    }

    fn collect_features(
        &self,
        grant: &Grant,
        light: &LightSnapshot,
        neighbor_count: u8,
    ) -> Features {
        Features {
            power_level: light.power_estimate as i8,
            temperature: (grant.temp_c - 40) as i8,
            mesh_activity: 0,
            neighbor_count: neighbor_count as i8,
            uptime_phase: ((grant.now_tick >> 20) & 0x7F) as i8,
            circadian_phase: self.circadian_phase(),
            rssi_avg: 0,
            rssi_variance: 0,
            brightness: light.brightness as i8,
            color_temp: light.color_temp as i8,
            scene_id: light.scene as i8,
            brightness_velocity: light.brightness_velocity,
            hop_count_avg: 0,
            shard_diversity: MAX_SHARDS_IN_RAM as i8,
        }
    }

    /// What actually happened since the previous step, as targets for the
    /// prediction made back then.
    fn compute_actual_targets(&self, current: &Features) -> Targets {
        Targets {
            next_mesh_activity: current.mesh_activity,
            next_power_level: current.power_level,
            circadian_next: current.circadian_phase,
            neighbor_rssi_delta: current.rssi_avg.wrapping_sub(self.prev_features.rssi_avg),
            next_scene: current.scene_id,
            temperature_trend: current.temperature.wrapping_sub(self.prev_features.temperature),
        }
    }

    /// Current local training epoch.
    pub fn local_epoch(&self) -> u16 {
        self.local_epoch
    }

    /// Shards held in RAM.
    pub fn shards_held(&self) -> u8 {
        MAX_SHARDS_IN_RAM as u8
    }

    /// Id of the shard under the training cursor.
    pub fn current_shard_id(&self) -> u8 {
        self.shards[self.current_shard_idx].shard_id
    }

    /// Last computed coherence/resonance value.
    pub fn coherence(&self) -> Q16_16 {
        self.coherence_score
    }

    /// The resident shard window.
    pub fn shards(&self) -> &[WeightShard] {
        &self.shards
    }

    /// Resident shard with the given id, if any.
    pub fn resident(&self, shard_id: u8) -> Option<&WeightShard> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }

    /// Targets observed at the most recent training step.
    pub fn last_targets(&self) -> Targets {
        self.prev_targets
    }
}

impl Default for LearningEngine {
    fn default() -> Self {
        Self::new()
    }
}
