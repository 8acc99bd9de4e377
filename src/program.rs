use crate::hash::fnv1a_words;
use crate::instruction::Instruction;

/// Structural fingerprint of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProgramSignature {
    /// FNV-1a over the semantic keys in instruction order.
    pub dag_hash: u32,
    pub instruction_count: u32,
    pub state_key_count: u32,
}

/// An immutable, loaded instruction sequence plus derived metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
    signature: ProgramSignature,
    /// Semantic keys of stateful instructions, sorted and deduplicated.
    state_keys: Vec<u32>,
}

impl Program {
    pub fn new(instructions: &[Instruction]) -> Self {
        let keyed = instructions
            .iter()
            .filter(|inst| inst.opcode.is_stateful())
            .map(|inst| inst.key);

        let dag_hash = fnv1a_words(keyed.clone());
        let mut state_keys: Vec<u32> = keyed.collect();
        state_keys.sort_unstable();
        state_keys.dedup();

        Self {
            instructions: instructions.to_vec(),
            signature: ProgramSignature {
                dag_hash,
                instruction_count: instructions.len() as u32,
                state_key_count: state_keys.len() as u32,
            },
            state_keys,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn signature(&self) -> ProgramSignature {
        self.signature
    }

    pub fn state_keys(&self) -> &[u32] {
        &self.state_keys
    }

    pub fn references_key(&self, key: u32) -> bool {
        self.state_keys.binary_search(&key).is_ok()
    }
}
