//! Error types for every fallible control-side call.
//!
//! The audio path never returns these: capacity failures inside an opcode
//! degrade to silence for that opcode and bump a diagnostic counter.

use thiserror::Error;

/// Why a program could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("program has {len} instructions, limit is {max}")]
    TooLarge { len: usize, max: usize },

    /// A program is already pending. Retry after the next block.
    #[error("a program is already pending a swap")]
    SlotBusy,
}

#[derive(Debug, Error)]
pub enum BytecodeError {
    #[error("bytecode length {len} is not a multiple of the {record}-byte record size")]
    Truncated { len: usize, record: usize },

    #[error("failed to decode instruction record: {0}")]
    Decode(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("parameter table is full ({capacity} parameters)")]
    TableFull { capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatePoolError {
    #[error("state pool is full ({capacity} entries)")]
    Full { capacity: usize },

    #[error("state for key {key:#010x} has an unexpected type")]
    TypeMismatch { key: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateInitError {
    #[error("event table columns differ in length ({times} times, {values} values, {velocities} velocities)")]
    LengthMismatch {
        times: usize,
        values: usize,
        velocities: usize,
    },

    #[error("{len} events exceed the table limit of {max}")]
    TooManyEvents { len: usize, max: usize },

    #[error("{len} breakpoints exceed the limit of {max}")]
    TooManyBreakpoints { len: usize, max: usize },

    #[error(transparent)]
    Pool(#[from] StatePoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern program has no nodes")]
    Empty,

    #[error("node {index} out of range ({len} nodes)")]
    NodeOutOfRange { index: usize, len: usize },

    #[error("node {node} references child list entries {start}..{end} beyond {len}")]
    ChildOutOfRange {
        node: usize,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("node {node} references sequence {id}, only {len} defined")]
    SequenceOutOfRange { node: usize, id: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
