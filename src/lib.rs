//! # Strata - Block-Synchronous Audio Runtime
//!
//! Strata runs compiled synthesis programs one fixed-size block at a time.
//! A program is a flat list of bytecode instructions wired together through
//! a pool of pre-allocated audio buffers. Programs can be replaced while
//! audio is running: the swap happens on a block boundary, the old and new
//! program are blended for a few blocks, and nodes that disappear fade out
//! instead of cutting off.
//!
//! ## Core Features
//!
//! - **Bytecode VM**: 18-byte instruction records, one dispatch per
//!   instruction per block, unknown opcodes are no-ops
//! - **Hot-swap**: triple-slot program hand-off with equal-power or linear
//!   crossfade
//! - **Stable node state**: per-node state keyed by a semantic hash, so
//!   oscillators keep their phase across edits
//! - **Lock-free parameters**: named, smoothed control values written from
//!   any thread
//! - **Deterministic patterns**: lazily queried rhythm trees whose
//!   "randomness" is a pure hash of seed, node and time
//!
//! ## Quick Start
//!
//! ```rust
//! use strata::{Instruction, Opcode, Vm, VmConfig, BLOCK_SIZE};
//!
//! let mut vm = Vm::new(VmConfig::default()).unwrap();
//!
//! // A 220 Hz sine at half gain.
//! vm.load_immediate(&[
//!     Instruction::constant(0, 220.0),
//!     Instruction::new(Opcode::OscSin, 1, &[0]).with_key(0x5157),
//!     Instruction::constant(2, 0.5),
//!     Instruction::new(Opcode::Mul, 3, &[1, 2]),
//!     Instruction::output(3, None),
//! ])
//! .unwrap();
//!
//! let mut left = [0.0; BLOCK_SIZE];
//! let mut right = [0.0; BLOCK_SIZE];
//! vm.process_block(&mut left, &mut right);
//! assert!(left.iter().all(|s| s.abs() <= 0.5));
//! ```
//!
//! ### Live Editing From Another Thread
//!
//! ```rust
//! use strata::{Instruction, Vm};
//!
//! let mut vm = Vm::default();
//! let handle = vm.handle();
//!
//! std::thread::spawn(move || {
//!     handle.set_param("level", 0.8, Some(20.0)).unwrap();
//!     handle
//!         .load(&[Instruction::env_get(0, "level", None), Instruction::output(0, None)])
//!         .unwrap();
//! })
//! .join()
//! .unwrap();
//!
//! let (left, _right) = vm.render_blocks(4);
//! assert_eq!(left.len(), 4 * strata::BLOCK_SIZE);
//! ```
//!
//! ### Patterns
//!
//! ```rust
//! use std::sync::Arc;
//! use strata::pattern::{PatternBuilder, TimeSpan};
//!
//! // "60 [62 64] 67" with the middle step gated by a (3,8) euclidean rhythm.
//! let mut b = PatternBuilder::new();
//! let low = b.atom(60.0);
//! let (a, c) = (b.atom(62.0), b.atom(64.0));
//! let pair = b.cat(&[a, c]);
//! let tresillo = b.euclid(3, 8, 0, pair);
//! let high = b.atom(67.0);
//! let root = b.cat(&[low, tresillo, high]);
//! let program = Arc::new(b.build(root).unwrap());
//!
//! let first = program.query_root(TimeSpan::new(0.0, 4.0), 7);
//! assert_eq!(first, program.query_root(TimeSpan::new(0.0, 4.0), 7));
//! ```
//!
//! ## Architecture
//!
//! - [`vm`] - audio-side [`Vm`] and control-side [`VmHandle`] (start here)
//! - [`executor`] - runs one program over one block
//! - [`opcodes`] - every opcode implementation
//! - [`swap`] - triple-slot program hand-off
//! - [`crossfade`] - block-granular blend between programs
//! - [`state_pool`] - per-node state with touch/sweep/fade lifecycle
//! - [`params`] - lock-free smoothed parameter table
//! - [`pattern`] - pattern arena, query evaluator and euclidean rhythms
//! - [`sequence`] - block stepping over timed events
//! - [`instruction`] - opcodes and the bytecode record format
//! - [`config`] - runtime configuration, loadable from TOML
//!
//! ## Threading
//!
//! The [`Vm`] belongs to the audio thread. It never allocates, locks or
//! blocks inside [`Vm::process_block`]. Every other thread talks to it
//! through a [`VmHandle`], which can queue one program at a time (a second
//! load before the swap fails with [`LoadError::SlotBusy`]), write
//! parameters, and stage timing changes for the next block boundary.

pub mod buffer_pool;
pub mod config;
pub mod constants;
pub mod context;
pub mod crossfade;
pub mod dsp_state;
pub mod error;
pub mod executor;
pub mod hash;
pub mod instruction;
pub mod opcodes;
pub mod params;
pub mod pattern;
pub mod program;
pub mod sequence;
pub mod state_pool;
pub mod swap;
pub mod vm;

pub use buffer_pool::{Block, BufferPool};
pub use config::{BlendMode, CrossfadePolicy, VmConfig};
pub use constants::BLOCK_SIZE;
pub use context::ExecutionContext;
pub use dsp_state::{Breakpoint, Curve};
pub use error::{
    BytecodeError, ConfigError, LoadError, ParamError, PatternError, StateInitError,
    StatePoolError,
};
pub use hash::hash_name;
pub use instruction::{decode_bytecode, encode_bytecode, Instruction, Opcode};
pub use program::Program;
pub use vm::{Vm, VmHandle, VmStatus};
