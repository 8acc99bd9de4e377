//! Triple-slot program hand-off
//!
//! Three slots, each with an atomic state:
//!
//! ```text
//!   Free ──load──▶ Writing ──▶ Pending ──execute_swap──▶ Current
//!    ▲                                                    │
//!    └────────release_previous──── Previous ◀──next swap──┘
//! ```
//!
//! The control thread claims a `Free` slot, builds the [`Program`], publishes
//! it through the slot's `ArcSwapOption`, then marks the slot `Pending`. Only
//! one slot may be pending at a time; a second `load` is refused with
//! [`LoadError::SlotBusy`] so versions can never be applied out of order.
//!
//! The audio thread alone promotes `Pending` to `Current`, at a block
//! boundary, and alone releases `Previous` back to `Free`. A released slot
//! keeps its program allocated until the control thread reuses the slot, so
//! nothing is freed on the audio thread.

use crate::constants::SLOT_COUNT;
use crate::error::LoadError;
use crate::instruction::Instruction;
use crate::program::Program;
use arc_swap::{ArcSwapOption, Guard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const NO_SLOT: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    Free = 0,
    Writing = 1,
    Pending = 2,
    Current = 3,
    Previous = 4,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SlotState::Writing,
            2 => SlotState::Pending,
            3 => SlotState::Current,
            4 => SlotState::Previous,
            _ => SlotState::Free,
        }
    }
}

#[derive(Default)]
struct ProgramSlot {
    state: AtomicU8,
    program: ArcSwapOption<Program>,
}

impl ProgramSlot {
    fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Loaded program as seen by the audio thread for one block.
pub type ProgramGuard = Guard<Option<Arc<Program>>>;

pub struct SwapController {
    slots: [ProgramSlot; SLOT_COUNT],
    current: AtomicU8,
    previous: AtomicU8,
    has_pending: AtomicBool,
    swap_count: AtomicU32,
    max_program_size: usize,
}

impl SwapController {
    pub fn new(max_program_size: usize) -> Self {
        Self {
            slots: Default::default(),
            current: AtomicU8::new(NO_SLOT),
            previous: AtomicU8::new(NO_SLOT),
            has_pending: AtomicBool::new(false),
            swap_count: AtomicU32::new(0),
            max_program_size,
        }
    }

    /// Queue a program for the next block boundary. Control thread only.
    pub fn load(&self, bytecode: &[Instruction]) -> Result<(), LoadError> {
        if bytecode.len() > self.max_program_size {
            warn!(
                len = bytecode.len(),
                max = self.max_program_size,
                "rejected oversized program"
            );
            return Err(LoadError::TooLarge {
                len: bytecode.len(),
                max: self.max_program_size,
            });
        }

        if self
            .has_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoadError::SlotBusy);
        }

        let Some(slot) = self
            .slots
            .iter()
            .find(|slot| slot.transition(SlotState::Free, SlotState::Writing))
        else {
            self.has_pending.store(false, Ordering::Release);
            return Err(LoadError::SlotBusy);
        };

        slot.program.store(Some(Arc::new(Program::new(bytecode))));
        slot.set_state(SlotState::Pending);
        debug!(instructions = bytecode.len(), "program queued");
        Ok(())
    }

    /// Promote the pending program to current. Audio thread only, at a block
    /// boundary. Returns true if a swap happened.
    pub fn execute_swap(&self) -> bool {
        if !self.has_pending.load(Ordering::Acquire) {
            return false;
        }
        // The writer may still be filling its slot.
        let Some(pending) = self
            .slots
            .iter()
            .position(|slot| slot.state() == SlotState::Pending)
        else {
            return false;
        };

        // A previous program still held at this point is no longer needed.
        self.release_previous();

        let old = self.current.load(Ordering::Acquire);
        if let Some(slot) = self.slots.get(old as usize) {
            if slot.state() == SlotState::Current {
                slot.set_state(SlotState::Previous);
                self.previous.store(old, Ordering::Release);
            }
        }

        self.slots[pending].set_state(SlotState::Current);
        self.current.store(pending as u8, Ordering::Release);
        self.has_pending.store(false, Ordering::Release);
        self.swap_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Return the previous slot to the free list. Audio thread only.
    pub fn release_previous(&self) {
        let prev = self.previous.swap(NO_SLOT, Ordering::AcqRel);
        if let Some(slot) = self.slots.get(prev as usize) {
            slot.transition(SlotState::Previous, SlotState::Free);
        }
    }

    /// Install `bytecode` as current immediately, dropping every other slot.
    /// Only valid while the audio thread is not processing.
    pub fn load_immediate(&self, bytecode: &[Instruction]) -> Result<(), LoadError> {
        self.reset();
        self.load(bytecode)?;
        self.execute_swap();
        self.release_previous();
        Ok(())
    }

    pub fn current(&self) -> Option<ProgramGuard> {
        self.slot_program(self.current.load(Ordering::Acquire), SlotState::Current)
    }

    pub fn previous(&self) -> Option<ProgramGuard> {
        self.slot_program(self.previous.load(Ordering::Acquire), SlotState::Previous)
    }

    fn slot_program(&self, index: u8, expected: SlotState) -> Option<ProgramGuard> {
        let slot = self.slots.get(index as usize)?;
        if slot.state() != expected {
            return None;
        }
        let guard = slot.program.load();
        guard.is_some().then_some(guard)
    }

    pub fn has_program(&self) -> bool {
        self.current().is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.has_pending.load(Ordering::Acquire)
    }

    pub fn has_previous(&self) -> bool {
        self.previous().is_some()
    }

    pub fn swap_count(&self) -> u32 {
        self.swap_count.load(Ordering::Relaxed)
    }

    pub fn max_program_size(&self) -> usize {
        self.max_program_size
    }

    pub fn slot_states(&self) -> [SlotState; SLOT_COUNT] {
        std::array::from_fn(|i| self.slots[i].state())
    }

    /// Free every slot that is not mid-write and forget current/previous.
    pub fn reset(&self) {
        for slot in &self.slots {
            if slot.state() != SlotState::Writing {
                slot.set_state(SlotState::Free);
            }
        }
        self.current.store(NO_SLOT, Ordering::Release);
        self.previous.store(NO_SLOT, Ordering::Release);
        self.has_pending.store(false, Ordering::Release);
    }
}
