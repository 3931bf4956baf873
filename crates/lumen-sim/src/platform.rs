//! Simulated platform devices.
//!
//! Every device is a cheap cloneable handle over shared state, so a test
//! can keep a handle for inspection while the node under test owns its
//! clone. The flash model enforces NOR semantics (erase to 0xFF, writes
//! only clear bits) and supports power-loss injection at operation
//! granularity; violations of the HAL contracts are recorded rather than
//! panicking, so a test can assert on them after driving the firmware.

use std::cell::RefCell;
use std::rc::Rc;

use lumen_core::config::{BLE_GUARD_US, FLASH_SECTOR_SIZE, FLASH_WEIGHT_BASE, MESH_MSG_MAX_SIZE};
use lumen_core::hal::{Clock, FlashDevice, PwmOutput, RadioLink, TempSensor};
use tracing::{debug, trace};

use crate::SimError;

/// Default simulated flash region: 64 shard pairs of two 8 KiB slots.
pub const SIM_FLASH_LEN: usize = 64 * 4 * FLASH_SECTOR_SIZE as usize;

#[derive(Debug, Default)]
struct ClockState {
    now: u32,
    next_radio_event: u32,
}

/// Scripted tick source.
#[derive(Clone, Default)]
pub struct SimClock {
    state: Rc<RefCell<ClockState>>,
}

impl SimClock {
    /// New clock at tick zero with no radio window open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute tick.
    pub fn set_now(&self, tick: u32) {
        self.state.borrow_mut().now = tick;
    }

    /// Advance by raw ticks.
    pub fn advance(&self, ticks: u32) {
        let mut state = self.state.borrow_mut();
        state.now = state.now.wrapping_add(ticks);
    }

    /// Advance by microseconds.
    pub fn advance_us(&self, us: u32) {
        self.advance(us * Self::TICKS_PER_US);
    }

    /// Advance by milliseconds.
    pub fn advance_ms(&self, ms: u32) {
        self.advance_us(ms * 1000);
    }

    /// Place the next radio event at an absolute tick.
    pub fn set_next_radio_event(&self, tick: u32) {
        self.state.borrow_mut().next_radio_event = tick;
    }

    /// Open a compute window of `us` microseconds past the guard margin
    /// before the next radio event.
    pub fn open_window_us(&self, us: u32) {
        let mut state = self.state.borrow_mut();
        state.next_radio_event = state
            .now
            .wrapping_add((us + BLE_GUARD_US) * Self::TICKS_PER_US);
    }
}

impl Clock for SimClock {
    fn now(&self) -> u32 {
        self.state.borrow().now
    }

    fn next_radio_event(&self) -> u32 {
        self.state.borrow().next_radio_event
    }
}

/// Scripted temperature ADC.
#[derive(Clone)]
pub struct SimTempSensor {
    raw: Rc<RefCell<u16>>,
}

impl SimTempSensor {
    /// New sensor reading 25C.
    pub fn new() -> Self {
        let sensor = Self {
            raw: Rc::new(RefCell::new(0)),
        };
        sensor.set_celsius(25);
        sensor
    }

    /// Script a raw ADC value.
    pub fn set_raw(&self, raw: u16) {
        *self.raw.borrow_mut() = raw;
    }

    /// Script a temperature using the reference calibration
    /// (`raw = c * 4 + 1100`).
    pub fn set_celsius(&self, celsius: i16) {
        self.set_raw((celsius * 4 + 1100) as u16);
    }
}

impl Default for SimTempSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl TempSensor for SimTempSensor {
    fn sample_raw(&mut self) -> u16 {
        *self.raw.borrow()
    }
}

#[derive(Debug, Default)]
struct RadioState {
    sent: Vec<Vec<u8>>,
    violations: Vec<SimError>,
}

/// Frame-capturing radio link.
#[derive(Clone, Default)]
pub struct SimRadio {
    state: Rc<RefCell<RadioState>>,
}

impl SimRadio {
    /// New radio with an empty capture buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.borrow().sent.clone()
    }

    /// Drain the capture buffer.
    pub fn take_frames(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    /// Number of frames sent so far.
    pub fn frame_count(&self) -> usize {
        self.state.borrow().sent.len()
    }

    /// Recorded contract violations.
    pub fn violations(&self) -> Vec<SimError> {
        self.state.borrow().violations.clone()
    }
}

impl RadioLink for SimRadio {
    fn send(&mut self, frame: &[u8]) {
        let mut state = self.state.borrow_mut();
        if frame.len() > MESH_MSG_MAX_SIZE {
            state.violations.push(SimError::FrameTooLarge {
                len: frame.len(),
                max: MESH_MSG_MAX_SIZE,
            });
            return;
        }
        trace!(len = frame.len(), "mesh send");
        state.sent.push(frame.to_vec());
    }
}

#[derive(Debug)]
struct FlashState {
    data: Vec<u8>,
    powered: bool,
    ops_until_power_loss: Option<u32>,
    violations: Vec<SimError>,
}

/// NOR-semantics flash with power-loss injection.
///
/// The region starts at [`FLASH_WEIGHT_BASE`] and spans [`SIM_FLASH_LEN`]
/// bytes, initially erased (0xFF). Erase and program operations count
/// toward an optional power-loss budget; once it reaches zero the part
/// goes dead until [`SimFlash::restore_power`].
#[derive(Clone)]
pub struct SimFlash {
    state: Rc<RefCell<FlashState>>,
}

impl SimFlash {
    /// New, fully erased flash.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FlashState {
                data: vec![0xFF; SIM_FLASH_LEN],
                powered: true,
                ops_until_power_loss: None,
                violations: Vec::new(),
            })),
        }
    }

    /// Cut power after `ops` more erase/program operations.
    pub fn fail_after(&self, ops: u32) {
        self.state.borrow_mut().ops_until_power_loss = Some(ops);
    }

    /// Restore power and clear any pending power-loss budget.
    pub fn restore_power(&self) {
        let mut state = self.state.borrow_mut();
        state.powered = true;
        state.ops_until_power_loss = None;
    }

    /// Read raw bytes for assertions, bypassing the device interface.
    pub fn peek(&self, addr: u32, len: usize) -> Vec<u8> {
        let start = (addr - FLASH_WEIGHT_BASE) as usize;
        self.state.borrow().data[start..start + len].to_vec()
    }

    /// Corrupt one byte for fault-injection tests.
    pub fn poke(&self, addr: u32, value: u8) {
        let start = (addr - FLASH_WEIGHT_BASE) as usize;
        self.state.borrow_mut().data[start] = value;
    }

    /// Recorded contract violations.
    pub fn violations(&self) -> Vec<SimError> {
        self.state.borrow().violations.clone()
    }

    fn in_range(addr: u32, len: usize) -> bool {
        addr >= FLASH_WEIGHT_BASE
            && (addr - FLASH_WEIGHT_BASE) as usize + len <= SIM_FLASH_LEN
    }

    /// Consume one operation from the power budget; false when dead.
    fn consume_op(state: &mut FlashState) -> bool {
        if !state.powered {
            return false;
        }
        if let Some(ops) = state.ops_until_power_loss {
            if ops == 0 {
                state.powered = false;
                debug!("simulated power loss");
                return false;
            }
            state.ops_until_power_loss = Some(ops - 1);
        }
        true
    }
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashDevice for SimFlash {
    fn erase_sector(&mut self, addr: u32) {
        let mut state = self.state.borrow_mut();
        if addr % FLASH_SECTOR_SIZE != 0 {
            state.violations.push(SimError::MisalignedErase { addr });
        }
        if !Self::in_range(addr, FLASH_SECTOR_SIZE as usize) {
            state.violations.push(SimError::FlashOutOfRange {
                addr,
                len: FLASH_SECTOR_SIZE as usize,
            });
            return;
        }
        if !Self::consume_op(&mut state) {
            return;
        }
        trace!(addr, "erase sector");
        let start = (addr - FLASH_WEIGHT_BASE) as usize;
        state.data[start..start + FLASH_SECTOR_SIZE as usize].fill(0xFF);
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        let mut state = self.state.borrow_mut();
        if !Self::in_range(addr, buf.len()) {
            state.violations.push(SimError::FlashOutOfRange {
                addr,
                len: buf.len(),
            });
            buf.fill(0xFF);
            return;
        }
        let start = (addr - FLASH_WEIGHT_BASE) as usize;
        buf.copy_from_slice(&state.data[start..start + buf.len()]);
    }

    fn write(&mut self, addr: u32, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        if !Self::in_range(addr, data.len()) {
            state.violations.push(SimError::FlashOutOfRange {
                addr,
                len: data.len(),
            });
            return;
        }
        if !Self::consume_op(&mut state) {
            return;
        }
        trace!(addr, len = data.len(), "program");
        let start = (addr - FLASH_WEIGHT_BASE) as usize;
        for (i, &byte) in data.iter().enumerate() {
            let old = state.data[start + i];
            if byte & !old != 0 {
                state.violations.push(SimError::BitSetWithoutErase {
                    addr: addr + i as u32,
                });
            }
            // NOR behavior: programming can only clear bits.
            state.data[start + i] = old & byte;
        }
    }
}

/// Duty-cycle recording PWM.
#[derive(Clone, Default)]
pub struct SimPwm {
    state: Rc<RefCell<Vec<(u8, u16)>>>,
}

impl SimPwm {
    /// New recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(channel, duty)` call in order.
    pub fn history(&self) -> Vec<(u8, u16)> {
        self.state.borrow().clone()
    }

    /// Most recent duty set on a channel.
    pub fn last_duty(&self, channel: u8) -> Option<u16> {
        self.state
            .borrow()
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map(|(_, d)| *d)
    }
}

impl PwmOutput for SimPwm {
    fn set_duty(&mut self, channel: u8, duty: u16) {
        self.state.borrow_mut().push((channel, duty));
    }
}
