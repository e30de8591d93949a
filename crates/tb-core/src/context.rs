// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Per-run execution context.
//!
//! The generator and the optimizer thread a single [`RunContext`] through
//! their call stacks: one deterministic RNG, one progress hook, one memory
//! probe, one monotonic clock. Nothing global, nothing shared between
//! concurrent callers.

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// External task-progression hook.
///
/// Consulted between granularities, between VNS neighbours and between
/// top-level rule drawings; never mid-mutation. The default implementation
/// is silent and never interrupts.
pub trait Progress {
    /// A nested task begins.
    fn begin_task(&self) {}

    /// The innermost task ends.
    fn end_task(&self) {}

    /// Set the main label of the current task.
    fn display_main_label(&self, _label: &str) {}

    /// Set the detail label of the current task.
    fn display_label(&self, _label: &str) {}

    /// Report progression in percent.
    fn display_progression(&self, _percent: u32) {}

    /// True when the caller asked to stop; builders then free partial
    /// outputs and optimizers return their incumbent.
    fn is_interruption_requested(&self) -> bool {
        false
    }
}

/// Progress hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl Progress for SilentProgress {}

/// Best-effort memory availability probe.
pub trait MemoryProbe {
    /// Remaining available memory in bytes, if known.
    fn remaining_available(&self) -> Option<u64>;
}

/// Memory probe that never limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedMemory;

impl MemoryProbe for UnboundedMemory {
    fn remaining_available(&self) -> Option<u64> {
        None
    }
}

/// Fixed-budget memory probe, mostly for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemory(pub u64);

impl MemoryProbe for FixedMemory {
    fn remaining_available(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// Execution context for one generator or optimizer invocation.
pub struct RunContext {
    /// Deterministic RNG; reseeded at well-defined points only.
    pub rng: ChaCha8Rng,
    /// Task-progression hook.
    pub progress: Box<dyn Progress>,
    /// Memory probe.
    pub memory: Box<dyn MemoryProbe>,
    started: Instant,
}

impl RunContext {
    /// Create a context with the given RNG seed and silent collaborators.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            progress: Box::new(SilentProgress),
            memory: Box::new(UnboundedMemory),
            started: Instant::now(),
        }
    }

    /// Replace the progress hook.
    pub fn with_progress(mut self, progress: Box<dyn Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the memory probe.
    pub fn with_memory(mut self, memory: Box<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    /// Reset the RNG to a fresh stream for `seed`.
    ///
    /// Sampling steps that must be reproducible reseed explicitly, as the
    /// original engine resets its random seed before every drawing pass.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Restart the monotonic clock (one optimizer invocation = one budget).
    pub fn restart_clock(&mut self) {
        self.started = Instant::now();
    }

    /// Elapsed time since context creation or the last clock restart.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Delegates to the progress hook.
    pub fn interruption_requested(&self) -> bool {
        self.progress.is_interruption_requested()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(1)
    }
}
