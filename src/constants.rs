//! Runtime-wide sizes, sentinels and timing defaults.

/// Samples per block. Every buffer, every opcode and every host callback
/// works in units of exactly this many samples.
pub const BLOCK_SIZE: usize = 128;

pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;
pub const DEFAULT_BPM: f32 = 120.0;

/// Beats per pattern cycle (one bar of 4/4).
pub const BEATS_PER_CYCLE: f64 = 4.0;

pub const MAX_BUFFERS: usize = 256;
pub const MAX_STATES: usize = 256;
pub const MAX_PARAMS: usize = 256;
pub const MAX_PROGRAM_SIZE: usize = 4096;

/// Number of program slots in the swap controller (previous/current/pending).
pub const SLOT_COUNT: usize = 3;

/// Buffer index meaning "no buffer". Reads yield silence, writes are discarded.
pub const BUFFER_UNUSED: u16 = 0xFFFF;

pub const DEFAULT_CROSSFADE_BLOCKS: u32 = 3;
pub const MAX_CROSSFADE_BLOCKS: u32 = 64;
pub const DEFAULT_FADE_BLOCKS: u32 = 3;

pub const DEFAULT_SLEW_MS: f32 = 5.0;

/// Events a single per-block pattern query may hold.
pub const MAX_QUERY_EVENTS: usize = 64;
/// Entries in a precomputed step-sequencer table.
pub const MAX_SEQ_EVENTS: usize = 64;
/// Breakpoints in a timeline automation.
pub const MAX_BREAKPOINTS: usize = 64;
/// Values carried by a single pattern event (chords).
pub const MAX_EVENT_VALUES: usize = 4;
/// Nesting limit for sub-sequence references.
pub const MAX_PATTERN_DEPTH: usize = 16;

pub const PI: f32 = std::f32::consts::PI;
pub const TWO_PI: f32 = std::f32::consts::TAU;
