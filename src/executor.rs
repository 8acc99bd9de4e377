//! Instruction executor
//!
//! Owns the buffer pool, the state pool and the execution context, and runs
//! one program over one block. The executor never inspects sample values and
//! never fails: an empty program or no program at all leaves the outputs
//! silent.

use crate::buffer_pool::BufferPool;
use crate::config::VmConfig;
use crate::constants::BLOCK_SIZE;
use crate::context::ExecutionContext;
use crate::opcodes::{execute, OpContext};
use crate::params::ParamChannel;
use crate::program::Program;
use crate::state_pool::StatePool;

pub struct Executor {
    pub buffers: BufferPool,
    pub states: StatePool,
    pub ctx: ExecutionContext,
}

impl Executor {
    pub fn new(config: &VmConfig) -> Self {
        let mut states = StatePool::new(config.state_capacity);
        states.set_fade_blocks(config.fade_blocks);
        Self {
            buffers: BufferPool::new(config.buffer_count),
            states,
            ctx: ExecutionContext::new(config.sample_rate, config.bpm),
        }
    }

    /// Clear both outputs, then run every instruction of `program` in order.
    ///
    /// Touch marks are not cleared here; the caller brackets one or more
    /// passes with `StatePool::begin_frame`.
    pub fn execute_block(
        &mut self,
        program: &Program,
        params: &ParamChannel,
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        out_left.fill(0.0);
        out_right.fill(0.0);

        let mut ctx = OpContext {
            buffers: &mut self.buffers,
            states: &mut self.states,
            params,
            timing: &self.ctx,
            out_left,
            out_right,
        };
        for inst in program.instructions() {
            execute(&mut ctx, inst);
        }
    }

    /// Drop all buffers and states and rewind the clock.
    pub fn reset(&mut self) {
        self.buffers.clear_all();
        self.states.reset();
        self.ctx.reset();
    }
}
