//! Light controller.
//!
//! The bulb's first job is to be a light. Target changes complete in
//! constant time from the receive path; smooth transitions happen in the
//! 50 Hz update tick. The learning engine only ever sees the read-only
//! [`LightSnapshot`] surface.

use crate::hal::{PwmOutput, PWM_CHANNEL_COOL, PWM_CHANNEL_WARM};

/// Milliseconds per 50 Hz update step.
const STEP_MS: u16 = 20;

/// Detected lighting scene, a pure function of (on, brightness, color_temp).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    /// Light off or nearly so.
    Off = 0,
    /// Under 30% brightness, warm.
    DimWarm,
    /// 30-60% brightness, warm.
    Cozy,
    /// Over 60% brightness, warm.
    BrightWarm,
    /// Over 60% brightness, cool.
    Daylight,
    /// High brightness, neutral temperature.
    Reading,
    /// Anything else.
    Unknown,
}

/// Read-only feature surface exported to the learning engine.
#[derive(Debug, Clone, Copy)]
pub struct LightSnapshot {
    /// Current brightness, 0-255.
    pub brightness: u8,
    /// Current color temperature, 0 (warm) to 100 (cool).
    pub color_temp: u8,
    /// Detected scene.
    pub scene: Scene,
    /// Remaining brightness delta while transitioning, else 0.
    pub brightness_velocity: i8,
    /// Rough power draw on a 0-100 scale.
    pub power_estimate: u8,
    /// A transition is in progress.
    pub transitioning: bool,
    /// The light is on.
    pub on: bool,
}

/// Owns the LED state and the PWM outputs.
pub struct LightController<P: PwmOutput> {
    pwm: P,
    brightness: u8,
    color_temp: u8,
    target_brightness: u8,
    target_temp: u8,
    transition_steps: u16,
    on: bool,
}

impl<P: PwmOutput> LightController<P> {
    /// New controller at the power-on default (full warm-neutral white).
    pub fn new(pwm: P) -> Self {
        Self {
            pwm,
            brightness: 100,
            color_temp: 50,
            target_brightness: 100,
            target_temp: 50,
            transition_steps: 0,
            on: true,
        }
    }

    /// Set a new target. Called from the mesh receive path; completes in
    /// constant time regardless of engine or scheduler state.
    pub fn set_target(&mut self, brightness: u8, color_temp: u8, transition_ms: u16) {
        let color_temp = color_temp.min(100);
        self.target_brightness = brightness;
        self.target_temp = color_temp;
        self.on = brightness > 0;

        if transition_ms == 0 {
            self.brightness = brightness;
            self.color_temp = color_temp;
            self.transition_steps = 0;
            self.apply_pwm();
        } else {
            self.transition_steps = (transition_ms / STEP_MS).max(1);
        }
    }

    /// One 50 Hz tick: ease toward the target, snapping on the final step.
    pub fn update(&mut self) {
        if self.transition_steps == 0 {
            return;
        }

        let bright_delta = self.target_brightness as i16 - self.brightness as i16;
        let temp_delta = self.target_temp as i16 - self.color_temp as i16;
        self.brightness =
            (self.brightness as i16 + bright_delta / self.transition_steps as i16) as u8;
        self.color_temp =
            (self.color_temp as i16 + temp_delta / self.transition_steps as i16) as u8;
        self.transition_steps -= 1;

        if self.transition_steps == 0 {
            self.brightness = self.target_brightness;
            self.color_temp = self.target_temp;
        }

        self.apply_pwm();
    }

    fn apply_pwm(&mut self) {
        if !self.on {
            self.pwm.set_duty(PWM_CHANNEL_WARM, 0);
            self.pwm.set_duty(PWM_CHANNEL_COOL, 0);
            return;
        }
        // Map brightness x mix onto the 16-bit duty range (255 * 100 * 257
        // / 100 = 65535).
        let warm = (self.brightness as u32 * self.color_temp as u32 * 257 / 100) as u16;
        let cool = (self.brightness as u32 * (100 - self.color_temp) as u32 * 257 / 100) as u16;
        self.pwm.set_duty(PWM_CHANNEL_WARM, warm);
        self.pwm.set_duty(PWM_CHANNEL_COOL, cool);
    }

    /// Rough power draw estimate. Warm LEDs run about 90% of the cool
    /// string's efficiency, so warm-heavy mixes read slightly lower.
    pub fn power_estimate(&self) -> u8 {
        if !self.on {
            return 0;
        }
        let warm = self.brightness as u32 * self.color_temp as u32;
        let cool = self.brightness as u32 * (100 - self.color_temp) as u32;
        ((warm * 90 + cool * 100) / 10_000) as u8
    }

    /// Remaining brightness delta while a transition is active, else 0.
    pub fn brightness_velocity(&self) -> i8 {
        if self.transition_steps == 0 {
            return 0;
        }
        (self.target_brightness as i16 - self.brightness as i16) as i8
    }

    /// Classify the current state into a [`Scene`].
    pub fn detect_scene(&self) -> Scene {
        if !self.on || self.brightness < 5 {
            return Scene::Off;
        }
        let is_warm = self.color_temp < 40;
        let is_cool = self.color_temp > 60;
        let is_dim = self.brightness < 75;
        let is_bright = self.brightness > 150;

        if is_dim && is_warm {
            Scene::DimWarm
        } else if !is_bright && is_warm {
            Scene::Cozy
        } else if is_bright && is_warm {
            Scene::BrightWarm
        } else if is_bright && is_cool {
            Scene::Daylight
        } else if is_bright {
            Scene::Reading
        } else {
            Scene::Unknown
        }
    }

    /// Export the read-only feature surface.
    pub fn snapshot(&self) -> LightSnapshot {
        LightSnapshot {
            brightness: self.brightness,
            color_temp: self.color_temp,
            scene: self.detect_scene(),
            brightness_velocity: self.brightness_velocity(),
            power_estimate: self.power_estimate(),
            transitioning: self.transition_steps > 0,
            on: self.on,
        }
    }

    /// Current brightness.
    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Current color temperature.
    pub fn color_temp(&self) -> u8 {
        self.color_temp
    }

    /// The light is on.
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// A transition is in progress.
    pub fn is_transitioning(&self) -> bool {
        self.transition_steps > 0
    }
}
