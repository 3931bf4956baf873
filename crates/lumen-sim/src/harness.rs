//! Wiring helpers for full simulated nodes.

use lumen_core::BulbNode;
use tracing::debug;

use crate::platform::{SimClock, SimFlash, SimPwm, SimRadio, SimTempSensor};
use crate::SimError;

/// A fully simulated bulb node.
pub type SimNode = BulbNode<SimClock, SimTempSensor, SimRadio, SimFlash, SimPwm>;

/// One node's worth of simulated devices. Handles stay with the test for
/// scripting and inspection while the node owns clones.
#[derive(Clone, Default)]
pub struct SimPlatform {
    /// Tick source.
    pub clock: SimClock,
    /// Temperature ADC.
    pub temp: SimTempSensor,
    /// Radio link.
    pub radio: SimRadio,
    /// Flash part.
    pub flash: SimFlash,
    /// LED PWM.
    pub pwm: SimPwm,
}

impl SimPlatform {
    /// Fresh platform: tick zero, 25C, erased flash, silent radio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node wired to this platform.
    pub fn build_node(&self, mesh_addr: u16) -> SimNode {
        BulbNode::new(
            self.clock.clone(),
            self.temp.clone(),
            self.radio.clone(),
            self.flash.clone(),
            self.pwm.clone(),
            mesh_addr,
        )
    }

    /// First HAL contract violation recorded by any device, if one exists.
    pub fn check(&self) -> Result<(), SimError> {
        if let Some(v) = self.flash.violations().into_iter().next() {
            return Err(v);
        }
        if let Some(v) = self.radio.violations().into_iter().next() {
            return Err(v);
        }
        Ok(())
    }
}

/// Drain the frames captured on `from`'s radio into `to`, as if the two
/// nodes were in direct mesh range. Returns the number delivered.
pub fn deliver_frames(from: &SimPlatform, to: &mut SimNode, src_addr: u16, rssi: i8) -> usize {
    let frames = from.radio.take_frames();
    let count = frames.len();
    debug!(count, src_addr, "delivering frames");
    for frame in frames {
        to.on_mesh_frame(&frame, src_addr, rssi);
    }
    count
}

/// Run `n` idle slices, opening a fresh compute window of `window_us`
/// microseconds before each.
pub fn run_slices(platform: &SimPlatform, node: &mut SimNode, n: usize, window_us: u32) {
    for _ in 0..n {
        platform.clock.open_window_us(window_us);
        node.radio_idle();
    }
}
