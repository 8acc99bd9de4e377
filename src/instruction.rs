//! Bytecode instructions
//!
//! A program is a flat, ordered list of fixed-size [`Instruction`] records.
//! Each record names one opcode, one output buffer, up to five input or
//! auxiliary buffer slots, a small mode selector and a 32-bit key. For
//! stateful opcodes the key is the node's semantic identity; for constant
//! opcodes it carries the constant's `f32` bits; for `EnvGet` it carries the
//! parameter name hash.
//!
//! On the wire each record is 18 little-endian bytes:
//!
//! | bytes | field |
//! |---|---|
//! | 0 | opcode |
//! | 1 | mode |
//! | 2..4 | output buffer |
//! | 4..14 | five input buffers |
//! | 14..18 | key |

use crate::constants::BUFFER_UNUSED;
use crate::error::BytecodeError;
use crate::hash::hash_name;
use serde::{Deserialize, Serialize};

pub const MAX_INPUTS: usize = 5;

/// Encoded size of one instruction record.
pub const RECORD_SIZE: usize = 18;

/// Operation selector. Bytes without a known opcode decode to `Reserved`
/// and execute as no-ops, so a newer compiler can target an older runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Opcode {
    Nop,
    PushConst,
    Copy,

    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,

    OscSin,
    OscTri,
    OscSaw,
    OscSqr,
    OscRamp,
    OscPhasor,

    Abs,
    Sqrt,
    Log,
    Exp,
    Min,
    Max,
    Clamp,
    Wrap,
    Floor,
    Ceil,

    Output,
    Noise,
    Mtof,
    Dc,
    Slew,
    Sah,
    EnvGet,

    Clock,
    Lfo,
    SeqStep,
    Euclid,
    Trigger,
    Timeline,
    PatQuery,
    PatStep,

    Reserved(u8),
}

impl From<u8> for Opcode {
    fn from(byte: u8) -> Self {
        use Opcode::*;
        match byte {
            0 => Nop,
            1 => PushConst,
            2 => Copy,
            10 => Add,
            11 => Sub,
            12 => Mul,
            13 => Div,
            14 => Pow,
            15 => Neg,
            20 => OscSin,
            21 => OscTri,
            22 => OscSaw,
            23 => OscSqr,
            24 => OscRamp,
            25 => OscPhasor,
            40 => Abs,
            41 => Sqrt,
            42 => Log,
            43 => Exp,
            44 => Min,
            45 => Max,
            46 => Clamp,
            47 => Wrap,
            48 => Floor,
            49 => Ceil,
            50 => Output,
            51 => Noise,
            52 => Mtof,
            53 => Dc,
            54 => Slew,
            55 => Sah,
            56 => EnvGet,
            90 => Clock,
            91 => Lfo,
            92 => SeqStep,
            93 => Euclid,
            94 => Trigger,
            95 => Timeline,
            96 => PatQuery,
            97 => PatStep,
            other => Reserved(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        use Opcode::*;
        match op {
            Nop => 0,
            PushConst => 1,
            Copy => 2,
            Add => 10,
            Sub => 11,
            Mul => 12,
            Div => 13,
            Pow => 14,
            Neg => 15,
            OscSin => 20,
            OscTri => 21,
            OscSaw => 22,
            OscSqr => 23,
            OscRamp => 24,
            OscPhasor => 25,
            Abs => 40,
            Sqrt => 41,
            Log => 42,
            Exp => 43,
            Min => 44,
            Max => 45,
            Clamp => 46,
            Wrap => 47,
            Floor => 48,
            Ceil => 49,
            Output => 50,
            Noise => 51,
            Mtof => 52,
            Dc => 53,
            Slew => 54,
            Sah => 55,
            EnvGet => 56,
            Clock => 90,
            Lfo => 91,
            SeqStep => 92,
            Euclid => 93,
            Trigger => 94,
            Timeline => 95,
            PatQuery => 96,
            PatStep => 97,
            Reserved(byte) => byte,
        }
    }
}

impl Opcode {
    /// Whether the key field names a state-pool entry.
    pub fn is_stateful(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            OscSin
                | OscTri
                | OscSaw
                | OscSqr
                | OscRamp
                | OscPhasor
                | Noise
                | Slew
                | Sah
                | Lfo
                | SeqStep
                | Euclid
                | Timeline
                | PatQuery
                | PatStep
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Opcode-specific sub-mode (waveform shape, output routing, ...).
    pub mode: u8,
    pub out: u16,
    pub inputs: [u16; MAX_INPUTS],
    pub key: u32,
}

impl Instruction {
    /// Build an instruction; inputs beyond those given are `BUFFER_UNUSED`.
    pub fn new(opcode: Opcode, out: u16, inputs: &[u16]) -> Self {
        let mut slots = [BUFFER_UNUSED; MAX_INPUTS];
        for (slot, &input) in slots.iter_mut().zip(inputs) {
            *slot = input;
        }
        Self {
            opcode,
            mode: 0,
            out,
            inputs: slots,
            key: 0,
        }
    }

    pub fn with_key(mut self, key: u32) -> Self {
        self.key = key;
        self
    }

    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    /// `out = value` for every sample.
    pub fn constant(out: u16, value: f32) -> Self {
        Self::new(Opcode::PushConst, out, &[]).with_key(value.to_bits())
    }

    /// `out = input + offset`.
    pub fn dc(out: u16, input: u16, offset: f32) -> Self {
        Self::new(Opcode::Dc, out, &[input]).with_key(offset.to_bits())
    }

    /// Read a smoothed external parameter, falling back to `fallback` (or 0)
    /// while the parameter is absent.
    pub fn env_get(out: u16, name: &str, fallback: Option<u16>) -> Self {
        let mut inst = Self::new(Opcode::EnvGet, out, &[]).with_key(hash_name(name));
        if let Some(input) = fallback {
            inst.inputs[0] = input;
        }
        inst
    }

    /// Accumulate `left` into both channels, or `left`/`right` into their own
    /// channels when a right input is given.
    pub fn output(left: u16, right: Option<u16>) -> Self {
        match right {
            Some(r) => Self::new(Opcode::Output, BUFFER_UNUSED, &[left, r]),
            None => Self::new(Opcode::Output, BUFFER_UNUSED, &[left]),
        }
    }

    /// The key field reinterpreted as an `f32` constant.
    pub fn constant_value(&self) -> f32 {
        f32::from_bits(self.key)
    }

    pub fn input(&self, slot: usize) -> u16 {
        self.inputs.get(slot).copied().unwrap_or(BUFFER_UNUSED)
    }

    pub fn has_input(&self, slot: usize) -> bool {
        self.input(slot) != BUFFER_UNUSED
    }
}

/// Decode a raw record stream into instructions.
pub fn decode_bytecode(bytes: &[u8]) -> Result<Vec<Instruction>, BytecodeError> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(BytecodeError::Truncated {
            len: bytes.len(),
            record: RECORD_SIZE,
        });
    }
    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|record| bincode::deserialize(record).map_err(BytecodeError::from))
        .collect()
}

pub fn encode_bytecode(program: &[Instruction]) -> Result<Vec<u8>, BytecodeError> {
    let mut bytes = Vec::with_capacity(program.len() * RECORD_SIZE);
    for inst in program {
        bincode::serialize_into(&mut bytes, inst)?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_mapping_is_bijective_for_known_opcodes() {
        for byte in 0..=u8::MAX {
            let op = Opcode::from(byte);
            assert_eq!(u8::from(op), byte, "byte {} did not survive mapping", byte);
        }
    }

    #[test]
    fn test_unknown_opcode_is_reserved() {
        assert_eq!(Opcode::from(200), Opcode::Reserved(200));
        assert_eq!(Opcode::from(3), Opcode::Reserved(3));
    }

    #[test]
    fn test_record_size_is_fixed() {
        let inst = Instruction::constant(4, 0.25).with_mode(2);
        let bytes = encode_bytecode(&[inst]).unwrap();
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert_eq!(bytes[0], 1, "opcode byte first");
        assert_eq!(bytes[1], 2, "mode byte second");
        assert_eq!(&bytes[2..4], &4u16.to_le_bytes());
        assert_eq!(&bytes[14..18], &0.25f32.to_bits().to_le_bytes());
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let err = decode_bytecode(&[0u8; RECORD_SIZE + 3]).unwrap_err();
        assert!(matches!(err, BytecodeError::Truncated { len: 21, .. }));
    }

    #[test]
    fn test_decode_preserves_reserved_bytes() {
        let mut bytes = encode_bytecode(&[Instruction::new(Opcode::Add, 0, &[1, 2])]).unwrap();
        bytes[0] = 250;
        let decoded = decode_bytecode(&bytes).unwrap();
        assert_eq!(decoded[0].opcode, Opcode::Reserved(250));
        assert_eq!(decoded[0].inputs[..2], [1, 2]);
    }

    #[test]
    fn test_constructors_fill_unused_inputs() {
        let inst = Instruction::new(Opcode::Mul, 3, &[1, 2]);
        assert_eq!(inst.inputs, [1, 2, BUFFER_UNUSED, BUFFER_UNUSED, BUFFER_UNUSED]);
        assert!(inst.has_input(1));
        assert!(!inst.has_input(2));
        assert!(!inst.has_input(9));

        let env = Instruction::env_get(0, "cutoff", None);
        assert_eq!(env.key, hash_name("cutoff"));
        assert!(!env.has_input(0));
        assert_eq!(Instruction::env_get(0, "cutoff", Some(5)).input(0), 5);
    }

    #[test]
    fn test_statefulness() {
        assert!(Opcode::OscSin.is_stateful());
        assert!(Opcode::PatStep.is_stateful());
        assert!(!Opcode::PushConst.is_stateful());
        assert!(!Opcode::EnvGet.is_stateful());
        assert!(!Opcode::Trigger.is_stateful(), "trigger is a pure function of the clock");
        assert!(!Opcode::Reserved(77).is_stateful());
    }
}
