//! Block-granular crossfade between the outgoing and incoming program
//!
//! ```text
//! Idle ─begin─▶ Pending ─advance─▶ Active ─remaining hits 0─▶ Completing ─complete─▶ Idle
//! ```
//!
//! While a fade runs, both programs render into their own scratch pair and
//! [`CrossfadeBuffers::mix`] blends them sample by sample, ramping from the
//! current position to the next one so the blend reaches full "new" gain on
//! the last blended block and consecutive blocks join without a step.

use crate::buffer_pool::Block;
use crate::config::BlendMode;
use crate::constants::{BLOCK_SIZE, PI};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrossfadePhase {
    #[default]
    Idle,
    Pending,
    Active,
    Completing,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrossfadeState {
    phase: CrossfadePhase,
    total_blocks: u32,
    remaining_blocks: u32,
}

impl CrossfadeState {
    /// Start (or restart) a fade lasting `duration_blocks` blocks.
    pub fn begin(&mut self, duration_blocks: u32) {
        self.phase = CrossfadePhase::Pending;
        self.total_blocks = duration_blocks;
        self.remaining_blocks = duration_blocks;
    }

    /// Step one block.
    pub fn advance(&mut self) {
        if self.phase == CrossfadePhase::Pending {
            self.phase = CrossfadePhase::Active;
        }
        if self.phase == CrossfadePhase::Active {
            self.remaining_blocks = self.remaining_blocks.saturating_sub(1);
            if self.remaining_blocks == 0 {
                self.phase = CrossfadePhase::Completing;
            }
        }
    }

    pub fn complete(&mut self) {
        *self = Self::default();
    }

    /// `1 - remaining/total`, or 1.0 for a zero-length fade.
    pub fn position(&self) -> f32 {
        if self.total_blocks == 0 {
            return 1.0;
        }
        1.0 - self.remaining_blocks as f32 / self.total_blocks as f32
    }

    /// Position after the next advance, where the current block's blend ends.
    pub fn next_position(&self) -> f32 {
        if self.total_blocks == 0 {
            return 1.0;
        }
        1.0 - self.remaining_blocks.saturating_sub(1) as f32 / self.total_blocks as f32
    }

    pub fn phase(&self) -> CrossfadePhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == CrossfadePhase::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.phase == CrossfadePhase::Pending
    }

    /// Both programs render this block. A completing fade plays only the
    /// new program.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, CrossfadePhase::Pending | CrossfadePhase::Active)
    }

    pub fn is_completing(&self) -> bool {
        self.phase == CrossfadePhase::Completing
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn remaining_blocks(&self) -> u32 {
        self.remaining_blocks
    }
}

/// Gains `(old, new)` for a blend position in `[0, 1]`.
#[inline]
pub fn blend_gains(mode: BlendMode, position: f32) -> (f32, f32) {
    let p = position.clamp(0.0, 1.0);
    match mode {
        BlendMode::EqualPower => {
            let angle = p * PI * 0.5;
            (angle.cos(), angle.sin())
        }
        BlendMode::Linear => (1.0 - p, p),
    }
}

/// Scratch output pairs for the two programs during a fade.
#[derive(Debug, Clone, Default)]
pub struct CrossfadeBuffers {
    pub old_left: Block,
    pub old_right: Block,
    pub new_left: Block,
    pub new_right: Block,
}

impl CrossfadeBuffers {
    pub fn clear(&mut self) {
        self.old_left = Block::ZERO;
        self.old_right = Block::ZERO;
        self.new_left = Block::ZERO;
        self.new_right = Block::ZERO;
    }

    /// Blend into the outputs, ramping the position from `from` to `to`
    /// across the block.
    pub fn mix(
        &self,
        mode: BlendMode,
        from: f32,
        to: f32,
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        let step = (to - from) / BLOCK_SIZE as f32;
        for i in 0..BLOCK_SIZE {
            let (g_old, g_new) = blend_gains(mode, from + step * (i + 1) as f32);
            out_left[i] = self.old_left[i] * g_old + self.new_left[i] * g_new;
            out_right[i] = self.old_right[i] * g_old + self.new_right[i] * g_new;
        }
    }

    /// Equal-power blend at a fixed position.
    pub fn mix_equal_power(
        &self,
        position: f32,
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        self.mix(BlendMode::EqualPower, position, position, out_left, out_right);
    }

    /// Linear blend at a fixed position.
    pub fn mix_linear(
        &self,
        position: f32,
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        self.mix(BlendMode::Linear, position, position, out_left, out_right);
    }
}
