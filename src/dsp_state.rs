//! Per-node opcode state
//!
//! Every stateful opcode owns one variant of [`DspState`], keyed in the
//! state pool by the instruction's semantic key. Access is typed through
//! [`StateVariant`]: asking for a `T` under a key that currently holds a
//! different variant replaces the whole value with `T::default()`, so two
//! incompatible layouts are never confused.

use crate::constants::{MAX_BREAKPOINTS, MAX_QUERY_EVENTS, MAX_SEQ_EVENTS};
use crate::pattern::{Event, PatternProgram, SourceSpan};
use arrayvec::ArrayVec;
use std::sync::Arc;

/// Typed view of one [`DspState`] variant.
pub trait StateVariant: Default + Sized {
    fn wrap(self) -> DspState;
    fn peek(state: &DspState) -> Option<&Self>;
    fn peek_mut(state: &mut DspState) -> Option<&mut Self>;
}

macro_rules! dsp_states {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Tagged union of every opcode state.
        #[derive(Debug, Default)]
        pub enum DspState {
            #[default]
            Empty,
            $($variant($ty),)*
        }

        impl DspState {
            pub fn kind(&self) -> &'static str {
                match self {
                    DspState::Empty => "empty",
                    $(DspState::$variant(_) => stringify!($variant),)*
                }
            }
        }

        $(
            impl StateVariant for $ty {
                fn wrap(self) -> DspState {
                    DspState::$variant(self)
                }

                fn peek(state: &DspState) -> Option<&Self> {
                    match state {
                        DspState::$variant(s) => Some(s),
                        _ => None,
                    }
                }

                fn peek_mut(state: &mut DspState) -> Option<&mut Self> {
                    match state {
                        DspState::$variant(s) => Some(s),
                        _ => None,
                    }
                }
            }
        )*
    };
}

dsp_states! {
    Osc(OscState),
    Noise(NoiseState),
    Slew(SlewState),
    Sah(SahState),
    Lfo(LfoState),
    Euclid(EuclidState),
    SeqStep(SeqStepState),
    Timeline(TimelineState),
    Pattern(PatternState),
}

impl DspState {
    /// Forget playback position so sequencing states resynchronise with the
    /// clock on their next block. Oscillator phases are left alone.
    pub fn reset_playhead(&mut self) {
        match self {
            DspState::SeqStep(s) => s.expected = None,
            DspState::Pattern(s) => {
                s.window = None;
                s.stepped = None;
            }
            _ => {}
        }
    }
}

/// Phase accumulator shared by every oscillator shape.
///
/// During a crossfade both programs may run the same key in one block; the
/// `entry_*` fields let the second pass start from where the first began.
/// The other per-sample states below carry the same snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct OscState {
    pub phase: f32,
    pub prev_trigger: f32,
    pub entry_block: Option<u64>,
    pub entry_phase: f32,
    pub entry_trigger: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoiseState {
    pub seed: u32,
    pub seeded: bool,
    pub entry_block: Option<u64>,
    pub entry_seed: u32,
    pub entry_seeded: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SlewState {
    pub current: f32,
    pub initialized: bool,
    pub entry_block: Option<u64>,
    pub entry_current: f32,
    pub entry_initialized: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SahState {
    pub held: f32,
    pub prev_trigger: f32,
    pub entry_block: Option<u64>,
    pub entry_held: f32,
    pub entry_trigger: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LfoState {
    /// Cycle index the sample-and-hold value was drawn for.
    pub held_cycle: Option<i64>,
    pub held: f32,
    pub entry_block: Option<u64>,
    pub entry_cycle: Option<i64>,
    pub entry_held: f32,
}

/// Cached onset mask; rebuilt only when the inputs change.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclidState {
    pub mask: u64,
    pub hits: u32,
    pub steps: u32,
    pub rotation: i32,
    pub valid: bool,
}

/// One entry of a precomputed step table. `time` is in beats from the start
/// of the cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SeqEntry {
    pub time: f64,
    pub value: f32,
    pub velocity: f32,
}

#[derive(Debug, Default)]
pub struct SeqStepState {
    pub entries: ArrayVec<SeqEntry, MAX_SEQ_EVENTS>,
    /// Beats per table cycle.
    pub cycle_length: f64,
    /// Index of the next entry to fire.
    pub next: usize,
    /// Cycle position the next sample should start at; `None` forces a resync.
    pub expected: Option<f64>,
    pub held_value: f32,
    pub held_velocity: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    #[default]
    Linear,
    /// Quadratic ease-in.
    Exponential,
    /// Jump at the breakpoint, hold until the next.
    Hold,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    /// Beats from the start of the timeline.
    pub time: f64,
    pub value: f32,
    /// Shape of the segment leaving this point.
    pub curve: Curve,
}

#[derive(Debug, Default)]
pub struct TimelineState {
    pub points: ArrayVec<Breakpoint, MAX_BREAKPOINTS>,
    /// Loop length in beats; `None` plays once and holds the last value.
    pub loop_length: Option<f64>,
}

#[derive(Debug, Default)]
pub struct PatternState {
    pub program: Option<Arc<PatternProgram>>,
    pub seed: u64,
    /// Events with onset inside `window`, sorted.
    pub events: ArrayVec<Event, MAX_QUERY_EVENTS>,
    /// Beat window the events were queried for.
    pub window: Option<(f64, f64)>,
    /// Window the `entry_*` values were captured for. Stepping the same
    /// window again starts over from them and produces the same output.
    pub stepped: Option<(f64, f64)>,
    pub entry_value: f32,
    pub entry_velocity: f32,
    pub held_value: f32,
    pub held_velocity: f32,
    pub active_source: Option<SourceSpan>,
}
