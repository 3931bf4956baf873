//! Composition root: one bulb node wired to its platform.
//!
//! The device hosts exactly one scheduler, one gossip instance, one light
//! controller, one flash store, and one engine; this module builds them
//! once and routes the three platform entry points (radio idle hook,
//! vendor-model receive, light control) plus the 50 Hz light timer.

use crate::engine::LearningEngine;
use crate::fixed::Q16_16;
use crate::flash::FlashStore;
use crate::gossip::{GossipEvent, MeshGossip};
use crate::hal::{Clock, FlashDevice, PwmOutput, RadioLink, TempSensor};
use crate::light::LightController;
use crate::sched::{Priority, Scheduler};

/// Background tasks the node registers with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTask {
    /// Local training micro-step.
    Train,
    /// Weight gossip and heartbeat.
    Sync,
}

/// Diagnostic counters exposed to the host platform.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    /// Thermal throttle, 0-100.
    pub throttle_level: u8,
    /// Last sampled die temperature.
    pub temp_c: i16,
    /// Last coherence/resonance value.
    pub coherence: Q16_16,
    /// Tracked mesh neighbors.
    pub neighbor_count: u8,
    /// Local training epoch.
    pub local_epoch: u16,
    /// Rough background duty cycle.
    pub ai_duty_cycle: u8,
}

/// One bulb node: platform handles plus the full firmware core.
pub struct BulbNode<C, T, R, F, W>
where
    C: Clock,
    T: TempSensor,
    R: RadioLink,
    F: FlashDevice,
    W: PwmOutput,
{
    clock: C,
    temp_sensor: T,
    sched: Scheduler<NodeTask>,
    mesh: MeshGossip<R>,
    store: FlashStore<F>,
    light: LightController<W>,
    engine: LearningEngine,
}

impl<C, T, R, F, W> BulbNode<C, T, R, F, W>
where
    C: Clock,
    T: TempSensor,
    R: RadioLink,
    F: FlashDevice,
    W: PwmOutput,
{
    /// Build and wire a node for a provisioned mesh address.
    pub fn new(clock: C, temp_sensor: T, radio: R, flash: F, pwm: W, mesh_addr: u16) -> Self {
        let mut sched = Scheduler::new();
        // A fresh table always has room for the two engine tasks.
        let _ = sched.register(NodeTask::Train, Priority::Low);
        let _ = sched.register(NodeTask::Sync, Priority::Normal);

        Self {
            clock,
            temp_sensor,
            sched,
            mesh: MeshGossip::new(radio, mesh_addr),
            store: FlashStore::new(flash),
            light: LightController::new(pwm),
            engine: LearningEngine::new(),
        }
    }

    /// Radio-stack idle hook: grant one micro-slice to the best task.
    pub fn radio_idle(&mut self) {
        let Self {
            clock,
            temp_sensor,
            sched,
            mesh,
            light,
            engine,
            ..
        } = self;
        let snapshot = light.snapshot();
        sched.run_slice(clock, temp_sensor, |task, grant| match task {
            NodeTask::Train => engine.train_step(&grant, &snapshot, mesh.neighbor_count()),
            NodeTask::Sync => engine.sync_step::<C, R>(&grant, mesh),
        });
    }

    /// Vendor-model receive callback.
    pub fn on_mesh_frame(&mut self, frame: &[u8], src: u16, rssi: i8) {
        let now = self.clock.now();
        match self.mesh.on_receive(frame, src, rssi, now) {
            Some(GossipEvent::Shard(shard)) => {
                self.engine.on_shard_received(&shard, &mut self.store);
            }
            Some(GossipEvent::ShardRequested { shard_id, .. }) => {
                // Answer from the resident window; flash-only shards are
                // not worth the blocking read here.
                if let Some(shard) = self.engine.resident(shard_id) {
                    self.mesh.broadcast_shard(shard);
                }
            }
            None => {}
        }
    }

    /// Standard light-control message. Constant time; never waits on the
    /// engine or the scheduler.
    pub fn on_light_command(&mut self, brightness: u8, color_temp: u8, transition_ms: u16) {
        self.light.set_target(brightness, color_temp, transition_ms);
    }

    /// 50 Hz tick from the platform timer.
    pub fn light_tick(&mut self) {
        self.light.update();
    }

    /// Swap a resident engine slot for another model shard.
    pub fn rotate_shard(&mut self, slot: usize, new_shard_id: u8) {
        self.engine.rotate_shard(slot, new_shard_id, &mut self.store);
    }

    /// Erase cycles on a shard's live flash slot.
    pub fn wear_count(&self, shard_id: u8) -> u32 {
        self.store.wear_count(shard_id)
    }

    /// Snapshot of the diagnostic counters.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            throttle_level: self.sched.throttle_level(),
            temp_c: self.sched.temp_c(),
            coherence: self.engine.coherence(),
            neighbor_count: self.mesh.neighbor_count(),
            local_epoch: self.engine.local_epoch(),
            ai_duty_cycle: self.sched.ai_duty_cycle(),
        }
    }

    /// The learning engine.
    pub fn engine(&self) -> &LearningEngine {
        &self.engine
    }

    /// The gossip instance.
    pub fn mesh(&self) -> &MeshGossip<R> {
        &self.mesh
    }

    /// The light controller.
    pub fn light(&self) -> &LightController<W> {
        &self.light
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Scheduler<NodeTask> {
        &self.sched
    }
}
