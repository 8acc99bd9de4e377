//! The audio-side virtual machine and its control handle
//!
//! [`Vm`] lives on the audio thread and is driven by [`Vm::process_block`].
//! [`VmHandle`] is the cheap, cloneable control surface for every other
//! thread: it queues programs, writes parameters and stages configuration
//! changes. The two share exactly three things: the swap controller, the
//! parameter channel and a set of staged config atomics, all of which are
//! lock-free.
//!
//! Each block runs in this order:
//!
//! 1. apply staged configuration
//! 2. finish a completing crossfade (release the old slot, sweep orphaned
//!    states into the fading table)
//! 3. advance and collect fading states
//! 4. advance a running crossfade, or else promote a pending program and
//!    decide whether to fade into it
//! 5. render: both programs blended while a crossfade runs, otherwise the
//!    current program alone, otherwise silence
//! 6. advance parameter smoothing and the clock
//!
//! # Example
//! ```ignore
//! let mut vm = Vm::new(VmConfig::default())?;
//! let handle = vm.handle();
//!
//! handle.load(&[
//!     Instruction::constant(0, 0.25),
//!     Instruction::output(0, None),
//! ])?;
//!
//! let mut left = [0.0; BLOCK_SIZE];
//! let mut right = [0.0; BLOCK_SIZE];
//! vm.process_block(&mut left, &mut right);
//! ```

use crate::config::{BlendMode, CrossfadePolicy, VmConfig};
use crate::constants::{BLOCK_SIZE, MAX_CROSSFADE_BLOCKS, SLOT_COUNT};
use crate::crossfade::{CrossfadeBuffers, CrossfadePhase, CrossfadeState};
use crate::dsp_state::{Breakpoint, PatternState};
use crate::error::{ConfigError, LoadError, ParamError, StateInitError};
use crate::executor::Executor;
use crate::hash::hash_name;
use crate::instruction::Instruction;
use crate::params::{AtomicF32, ParamChannel};
use crate::pattern::{Event, PatternProgram, SourceSpan, TimeSpan};
use crate::program::Program;
use crate::state_pool::StatePool;
use crate::swap::{SlotState, SwapController};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Configuration written by the control thread, applied by the audio thread
/// at the next block boundary.
struct StagedConfig {
    sample_rate: AtomicF32,
    bpm: AtomicF32,
    crossfade_blocks: AtomicU32,
    fade_blocks: AtomicU32,
    dirty: AtomicBool,
}

impl StagedConfig {
    fn new(config: &VmConfig) -> Self {
        Self {
            sample_rate: AtomicF32::new(config.sample_rate),
            bpm: AtomicF32::new(config.bpm),
            crossfade_blocks: AtomicU32::new(config.crossfade_blocks),
            fade_blocks: AtomicU32::new(config.fade_blocks),
            dirty: AtomicBool::new(false),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

struct Shared {
    swap: SwapController,
    params: ParamChannel,
    staged: StagedConfig,
}

/// Snapshot of the VM's transition and pool bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmStatus {
    pub has_program: bool,
    pub has_pending: bool,
    pub swap_count: u32,
    pub slots: [SlotState; SLOT_COUNT],
    pub crossfade_phase: CrossfadePhase,
    pub crossfade_position: f32,
    pub active_states: usize,
    pub fading_states: usize,
    pub state_overflows: u64,
    pub param_count: usize,
    pub block_counter: u64,
    pub beat_position: f64,
}

pub struct Vm {
    executor: Executor,
    shared: Arc<Shared>,
    crossfade: CrossfadeState,
    scratch: CrossfadeBuffers,
    crossfade_blocks: u32,
    policy: CrossfadePolicy,
    blend: BlendMode,
}

impl Default for Vm {
    fn default() -> Self {
        Self::from_valid(VmConfig::default())
    }
}

impl Vm {
    /// Build a VM with every pool pre-sized from `config`.
    pub fn new(config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: VmConfig) -> Self {
        let params = ParamChannel::new(config.max_params, config.sample_rate);
        params.set_default_slew_ms(config.default_slew_ms);
        let shared = Arc::new(Shared {
            swap: SwapController::new(config.max_program_size),
            params,
            staged: StagedConfig::new(&config),
        });
        debug!(
            sample_rate = config.sample_rate,
            bpm = config.bpm,
            buffers = config.buffer_count,
            states = config.state_capacity,
            "vm created"
        );
        Self {
            executor: Executor::new(&config),
            shared,
            crossfade: CrossfadeState::default(),
            scratch: CrossfadeBuffers::default(),
            crossfade_blocks: config.crossfade_blocks.min(MAX_CROSSFADE_BLOCKS),
            policy: config.crossfade_policy,
            blend: config.blend,
        }
    }

    /// Control handle sharing this VM's program slots and parameters.
    pub fn handle(&self) -> VmHandle {
        VmHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queue a program for the next block boundary.
    pub fn load(&self, bytecode: &[Instruction]) -> Result<(), LoadError> {
        self.shared.swap.load(bytecode)
    }

    /// Discard every slot, buffer, state and crossfade, rewind the clock and
    /// install `bytecode` as the current program. Not for use mid-playback:
    /// in-flight state is lost.
    pub fn load_immediate(&mut self, bytecode: &[Instruction]) -> Result<(), LoadError> {
        self.reset();
        self.shared.swap.load_immediate(bytecode)?;
        debug!(instructions = bytecode.len(), "program installed immediately");
        Ok(())
    }

    /// Render one block.
    pub fn process_block(
        &mut self,
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        self.apply_staged_config();
        self.handle_swap();

        out_left.fill(0.0);
        out_right.fill(0.0);
        self.executor.states.begin_frame();
        if self.crossfade.is_active() {
            self.render_crossfade(out_left, out_right);
        } else if let Some(current) = self.shared.swap.current() {
            if let Some(program) = current.as_deref() {
                self.executor
                    .execute_block(program, &self.shared.params, out_left, out_right);
            }
        }

        self.shared.params.update_interpolation_block();
        self.executor.ctx.advance_block();
    }

    fn apply_staged_config(&mut self) {
        let staged = &self.shared.staged;
        if !staged.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let ctx = &mut self.executor.ctx;
        ctx.sample_rate = staged.sample_rate.load(Ordering::Acquire);
        ctx.bpm = staged.bpm.load(Ordering::Acquire);
        self.crossfade_blocks = staged
            .crossfade_blocks
            .load(Ordering::Acquire)
            .min(MAX_CROSSFADE_BLOCKS);
        self.executor
            .states
            .set_fade_blocks(staged.fade_blocks.load(Ordering::Acquire));
        debug!(
            sample_rate = ctx.sample_rate,
            bpm = ctx.bpm,
            crossfade_blocks = self.crossfade_blocks,
            "applied staged config"
        );
    }

    fn handle_swap(&mut self) {
        let swap = &self.shared.swap;
        let states = &mut self.executor.states;

        if self.crossfade.is_completing() {
            swap.release_previous();
            self.crossfade.complete();
            states.gc_sweep();
            debug!(fading = states.fading_count(), "crossfade complete");
        }

        states.advance_fading();
        states.gc_fading();

        if self.crossfade.is_active() {
            self.crossfade.advance();
            return;
        }
        if !swap.has_pending() {
            return;
        }

        let old = swap.current();
        if !swap.execute_swap() {
            return;
        }
        let Some(new) = swap.current() else {
            return;
        };
        let Some(new_program) = new.as_deref() else {
            return;
        };

        let old_program = old.as_ref().and_then(|guard| guard.as_deref());
        let fade = match old_program {
            Some(old_program) if !old_program.is_empty() => {
                self.policy.requires_crossfade(old_program, new_program)
            }
            _ => false,
        };
        if fade {
            self.crossfade.begin(self.crossfade_blocks);
            debug!(
                blocks = self.crossfade_blocks,
                swaps = swap.swap_count(),
                "crossfade started"
            );
        } else {
            swap.release_previous();
            trace!(swaps = swap.swap_count(), "program swapped without fade");
        }
    }

    fn render_crossfade(
        &mut self,
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        let swap = &self.shared.swap;
        let params = &self.shared.params;
        let scratch = &mut self.scratch;
        scratch.clear();

        if let Some(previous) = swap.previous() {
            if let Some(program) = previous.as_deref() {
                self.executor
                    .execute_block(program, params, &mut scratch.old_left, &mut scratch.old_right);
            }
        }
        if let Some(current) = swap.current() {
            if let Some(program) = current.as_deref() {
                self.executor
                    .execute_block(program, params, &mut scratch.new_left, &mut scratch.new_right);
            }
        }

        scratch.mix(
            self.blend,
            self.crossfade.position(),
            self.crossfade.next_position(),
            out_left,
            out_right,
        );
    }

    /// Render `blocks` blocks and return the concatenated left and right
    /// channels.
    pub fn render_blocks(&mut self, blocks: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = Vec::with_capacity(blocks * BLOCK_SIZE);
        let mut right = Vec::with_capacity(blocks * BLOCK_SIZE);
        let mut block_left = [0.0; BLOCK_SIZE];
        let mut block_right = [0.0; BLOCK_SIZE];
        for _ in 0..blocks {
            self.process_block(&mut block_left, &mut block_right);
            left.extend_from_slice(&block_left);
            right.extend_from_slice(&block_right);
        }
        (left, right)
    }

    /// Drop every program, buffer, state and crossfade and rewind the clock.
    /// Parameters are kept.
    pub fn reset(&mut self) {
        self.shared.swap.reset();
        self.executor.reset();
        self.crossfade.complete();
        self.scratch.clear();
    }

    /// Move the beat clock to `beat`. Sequencing states pick up from the new
    /// position on the next block.
    pub fn seek(&mut self, beat: f64) {
        self.executor.ctx.seek(beat);
        self.executor.states.reset_playheads();
        debug!(beat, "seek");
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.executor.ctx.sample_rate = sample_rate;
        self.shared.params.set_sample_rate(sample_rate);
        self.shared.staged.sample_rate.store(sample_rate, Ordering::Release);
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.executor.ctx.bpm = bpm;
        self.shared.staged.bpm.store(bpm, Ordering::Release);
    }

    pub fn set_crossfade_blocks(&mut self, blocks: u32) {
        self.crossfade_blocks = blocks.min(MAX_CROSSFADE_BLOCKS);
        self.shared
            .staged
            .crossfade_blocks
            .store(self.crossfade_blocks, Ordering::Release);
    }

    pub fn set_fade_blocks(&mut self, blocks: u32) {
        self.executor.states.set_fade_blocks(blocks);
        self.shared.staged.fade_blocks.store(blocks, Ordering::Release);
    }

    pub fn set_crossfade_policy(&mut self, policy: CrossfadePolicy) {
        self.policy = policy;
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) {
        self.blend = blend;
    }

    pub fn set_param(&self, name: &str, value: f32, slew_ms: Option<f32>) -> Result<(), ParamError> {
        self.shared.params.set_param(name, value, slew_ms)
    }

    pub fn params(&self) -> &ParamChannel {
        &self.shared.params
    }

    /// Load a precomputed step table for a `SEQ_STEP` node.
    pub fn init_seq_step(
        &mut self,
        key: u32,
        times: &[f64],
        values: &[f32],
        velocities: &[f32],
        cycle_length: f64,
    ) -> Result<(), StateInitError> {
        self.executor
            .states
            .init_seq_step(key, times, values, velocities, cycle_length)
    }

    /// Attach a pattern program to a `PAT_QUERY`/`PAT_STEP` node.
    pub fn init_pattern_program(
        &mut self,
        key: u32,
        program: Arc<PatternProgram>,
    ) -> Result<(), StateInitError> {
        self.executor.states.init_pattern_program(key, program)
    }

    pub fn init_timeline(
        &mut self,
        key: u32,
        points: &[Breakpoint],
        loop_length: Option<f64>,
    ) -> Result<(), StateInitError> {
        self.executor.states.init_timeline(key, points, loop_length)
    }

    /// Events the pattern attached to `key` sounds during `arc`, clipped to
    /// it, using the same program and seed the audio path uses. `None` if no
    /// pattern is attached.
    pub fn preview_pattern(&self, key: u32, arc: TimeSpan) -> Option<Vec<Event>> {
        let state = self.executor.states.get::<PatternState>(key)?;
        let program = state.program.as_deref()?;
        Some(program.query(program.root, arc, state.seed))
    }

    /// Source span of the event most recently fired by the pattern at `key`.
    pub fn active_source_span(&self, key: u32) -> Option<SourceSpan> {
        self.executor
            .states
            .get::<PatternState>(key)
            .and_then(|state| state.active_source)
    }

    pub fn has_program(&self) -> bool {
        self.shared.swap.has_program()
    }

    pub fn is_crossfading(&self) -> bool {
        self.crossfade.is_active()
    }

    pub fn crossfade_position(&self) -> f32 {
        self.crossfade.position()
    }

    pub fn swap_count(&self) -> u32 {
        self.shared.swap.swap_count()
    }

    /// Beat position at the start of the next block.
    pub fn beat_position(&self) -> f64 {
        self.executor.ctx.beat_position
    }

    pub fn states(&self) -> &StatePool {
        &self.executor.states
    }

    pub fn current_program(&self) -> Option<Arc<Program>> {
        self.shared.swap.current().and_then(|guard| (*guard).clone())
    }

    pub fn status(&self) -> VmStatus {
        let swap = &self.shared.swap;
        let states = &self.executor.states;
        VmStatus {
            has_program: swap.has_program(),
            has_pending: swap.has_pending(),
            swap_count: swap.swap_count(),
            slots: swap.slot_states(),
            crossfade_phase: self.crossfade.phase(),
            crossfade_position: self.crossfade.position(),
            active_states: states.len(),
            fading_states: states.fading_count(),
            state_overflows: states.overflow_count(),
            param_count: self.shared.params.param_count(),
            block_counter: self.executor.ctx.block_counter,
            beat_position: self.executor.ctx.beat_position,
        }
    }
}

/// Control-thread side of a [`Vm`]. Cloning is cheap; every clone talks to
/// the same VM.
#[derive(Clone)]
pub struct VmHandle {
    shared: Arc<Shared>,
}

impl VmHandle {
    /// Queue a program for the next block boundary. Fails with
    /// [`LoadError::SlotBusy`] while another program is still pending.
    pub fn load(&self, bytecode: &[Instruction]) -> Result<(), LoadError> {
        self.shared.swap.load(bytecode)
    }

    pub fn has_pending(&self) -> bool {
        self.shared.swap.has_pending()
    }

    pub fn swap_count(&self) -> u32 {
        self.shared.swap.swap_count()
    }

    /// Set a parameter's target; `None` uses the default slew.
    pub fn set_param(&self, name: &str, value: f32, slew_ms: Option<f32>) -> Result<(), ParamError> {
        self.shared.params.set_param(name, value, slew_ms)
    }

    /// Smoothed value of a parameter, 0.0 if unknown.
    pub fn get_param(&self, name: &str) -> f32 {
        self.shared.params.get(hash_name(name))
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.shared.params.has_param(name)
    }

    pub fn remove_param(&self, name: &str) -> bool {
        self.shared.params.remove_param(name)
    }

    /// Takes effect at the next block. New parameter ramps use the new rate
    /// immediately.
    pub fn set_sample_rate(&self, sample_rate: f32) {
        self.shared.params.set_sample_rate(sample_rate);
        self.shared
            .staged
            .sample_rate
            .store(sample_rate, Ordering::Release);
        self.shared.staged.mark_dirty();
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.shared.staged.bpm.store(bpm, Ordering::Release);
        self.shared.staged.mark_dirty();
    }

    /// Duration of future crossfades, clamped to `MAX_CROSSFADE_BLOCKS`.
    pub fn set_crossfade_blocks(&self, blocks: u32) {
        self.shared
            .staged
            .crossfade_blocks
            .store(blocks.min(MAX_CROSSFADE_BLOCKS), Ordering::Release);
        self.shared.staged.mark_dirty();
    }

    /// Fade-out length for states orphaned from now on.
    pub fn set_fade_blocks(&self, blocks: u32) {
        self.shared.staged.fade_blocks.store(blocks, Ordering::Release);
        self.shared.staged.mark_dirty();
    }
}
