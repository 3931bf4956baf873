//! Cooperative micro-slice scheduler.
//!
//! The radio stack owns the CPU; background work runs only inside the
//! guaranteed-safe window it reports between radio events, and never within
//! [`crate::config::BLE_GUARD_US`] of the next one. One call to
//! [`Scheduler::run_slice`] grants at most one task one bounded budget.
//! Die temperature progressively shrinks that budget and, past the
//! shutdown threshold, eliminates it.

use heapless::Vec;

use crate::config::{
    AI_TIMESLOT_US, BLE_GUARD_US, MAX_TASKS, MIN_SLICE_US, TEMP_SHUTDOWN_C, TEMP_THROTTLE_C,
    THERMAL_SAMPLE_INTERVAL,
};
use crate::error::{CoreError, Result};
use crate::hal::{raw_to_celsius, Clock, TempSensor};

/// Task priority; numerically smaller runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Radio-adjacent work that must never wait.
    Critical = 0,
    /// Light control.
    High = 1,
    /// Weight sync and gossip.
    Normal = 2,
    /// Local training.
    Low = 3,
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable.
    Idle,
    /// Currently holding the slice.
    Running,
    /// Skipped while thermal throttle exceeds 50%.
    Throttled,
    /// Permanently removed from selection.
    Killed,
}

/// One bounded compute window handed to a task, along with the scheduler
/// state the task may want to read without re-borrowing the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    /// Microseconds the task may spend. Tasks bail early when this is below
    /// their own floor; they are never preempted.
    pub budget_us: u32,
    /// Current thermal throttle, 0-100.
    pub throttle: u8,
    /// Last sampled die temperature.
    pub temp_c: i16,
    /// System tick at the start of the slice.
    pub now_tick: u32,
}

#[derive(Debug)]
struct TaskEntry<T> {
    tag: T,
    priority: Priority,
    state: TaskState,
    last_run_tick: u32,
    total_runtime_us: u32,
    run_count: u16,
    /// Requeue hint returned by the last run. Recorded for future priority
    /// boosting; not consulted yet.
    wants_more: bool,
}

/// Per-task accounting, readable through [`Scheduler::task_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
    /// Registered priority.
    pub priority: Priority,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Slice-start tick of the most recent run.
    pub last_run_tick: u32,
    /// Accumulated runtime in microseconds.
    pub total_runtime_us: u32,
    /// Number of completed runs.
    pub run_count: u16,
    /// Requeue hint from the most recent run.
    pub wants_more: bool,
}

/// Cooperative scheduler over a caller-supplied task tag.
///
/// The tag is the dispatch key: [`Scheduler::run_slice`] picks the best
/// runnable entry and hands its tag plus a [`Grant`] to the dispatch
/// closure. Tags keep the scheduler free of callback storage and let the
/// composition root own all task state.
#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: Vec<TaskEntry<T>, MAX_TASKS>,
    sample_counter: u8,
    temp_c: i16,
    throttle: u8,
}

impl<T: Copy + PartialEq> Scheduler<T> {
    /// Empty scheduler at ambient temperature.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            sample_counter: 0,
            temp_c: 25,
            throttle: 0,
        }
    }

    /// Register a task. Fails once the fixed table is full.
    pub fn register(&mut self, tag: T, priority: Priority) -> Result<()> {
        self.tasks
            .push(TaskEntry {
                tag,
                priority,
                state: TaskState::Idle,
                last_run_tick: 0,
                total_runtime_us: 0,
                run_count: 0,
                wants_more: false,
            })
            .map_err(|_| CoreError::TaskTableFull)
    }

    /// Force a task's lifecycle state (thermal kill, external throttling).
    pub fn set_state(&mut self, tag: T, state: TaskState) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.tag == tag) {
            task.state = state;
        }
    }

    /// Run one micro-slice. Called from the radio stack's idle hook.
    ///
    /// Order of business: refresh thermals (every
    /// [`THERMAL_SAMPLE_INTERVAL`]th call), bail outright on thermal
    /// emergency, compute the budget from the radio event horizon, pick the
    /// highest-priority runnable task, dispatch it, account its runtime.
    /// Never errors: an empty window or an empty table is a normal slice.
    pub fn run_slice<C, S, F>(&mut self, clock: &C, sensor: &mut S, dispatch: F)
    where
        C: Clock,
        S: TempSensor,
        F: FnOnce(T, Grant) -> bool,
    {
        self.update_thermals(sensor);
        if self.throttle >= 100 {
            return;
        }

        let now = clock.now();
        let next_radio = clock.next_radio_event();
        let guard_ticks = BLE_GUARD_US * C::TICKS_PER_US;
        let available_ticks = next_radio.saturating_sub(now).saturating_sub(guard_ticks);
        if available_ticks == 0 {
            return;
        }

        let mut budget_us = available_ticks / C::TICKS_PER_US;
        if budget_us > AI_TIMESLOT_US {
            budget_us = AI_TIMESLOT_US;
        }
        budget_us = budget_us * (100 - self.throttle as u32) / 100;
        if budget_us < MIN_SLICE_US {
            return;
        }

        let throttle = self.throttle;
        let mut best: Option<usize> = None;
        for (i, task) in self.tasks.iter().enumerate() {
            if task.state == TaskState::Killed {
                continue;
            }
            if task.state == TaskState::Throttled && throttle > 50 {
                continue;
            }
            // Strict comparison: ties go to the first-registered task.
            let better = match best {
                None => true,
                Some(b) => task.priority < self.tasks[b].priority,
            };
            if better {
                best = Some(i);
            }
        }
        let Some(idx) = best else {
            return;
        };

        let grant = Grant {
            budget_us,
            throttle,
            temp_c: self.temp_c,
            now_tick: now,
        };
        let tag = self.tasks[idx].tag;
        self.tasks[idx].state = TaskState::Running;

        let start = clock.now();
        let wants_more = dispatch(tag, grant);
        let elapsed_us = clock.now().wrapping_sub(start) / C::TICKS_PER_US;

        let task = &mut self.tasks[idx];
        task.total_runtime_us = task.total_runtime_us.saturating_add(elapsed_us);
        task.run_count = task.run_count.wrapping_add(1);
        task.last_run_tick = now;
        task.wants_more = wants_more;
        task.state = TaskState::Idle;
    }

    fn update_thermals<S: TempSensor>(&mut self, sensor: &mut S) {
        self.sample_counter += 1;
        if self.sample_counter < THERMAL_SAMPLE_INTERVAL {
            return;
        }
        self.sample_counter = 0;

        self.temp_c = raw_to_celsius(sensor.sample_raw());
        self.throttle = if self.temp_c >= TEMP_SHUTDOWN_C {
            100
        } else if self.temp_c >= TEMP_THROTTLE_C {
            // Linear ramp from 0% at the throttle threshold to 100% at
            // shutdown.
            ((self.temp_c - TEMP_THROTTLE_C) as u32 * 100
                / (TEMP_SHUTDOWN_C - TEMP_THROTTLE_C) as u32) as u8
        } else {
            0
        };
    }

    /// Current thermal throttle, 0-100.
    pub fn throttle_level(&self) -> u8 {
        self.throttle
    }

    /// Last sampled die temperature.
    pub fn temp_c(&self) -> i16 {
        self.temp_c
    }

    /// Rough duty-cycle estimate for background (Normal and Low) tasks.
    pub fn ai_duty_cycle(&self) -> u8 {
        let total: u32 = self
            .tasks
            .iter()
            .filter(|t| t.priority >= Priority::Normal)
            .map(|t| t.total_runtime_us)
            .sum();
        ((total / 10_000) % 100) as u8
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Accounting snapshot for a registered task.
    pub fn task_stats(&self, tag: T) -> Option<TaskStats> {
        self.tasks.iter().find(|t| t.tag == tag).map(|t| TaskStats {
            priority: t.priority,
            state: t.state,
            last_run_tick: t.last_run_tick,
            total_runtime_us: t.total_runtime_us,
            run_count: t.run_count,
            wants_more: t.wants_more,
        })
    }
}

impl<T: Copy + PartialEq> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
