//! Compiled rhythmic patterns and their lazy, deterministic evaluation
//!
//! A [`PatternProgram`] is a flat arena of [`PatternNode`]s addressed by
//! `u16` index. Composite nodes refer to their children through ranges in a
//! shared child list, so the whole program is three plain vectors and can be
//! shared immutably between the control thread (UI preview) and the audio
//! thread (playback) behind an `Arc`.
//!
//! Querying never mutates anything. The same `(node, arc, seed)` always
//! yields the same events, bit for bit, regardless of what was queried
//! before; random choices are hashes of `(seed, node, time)`.
//!
//! # Example
//! ```ignore
//! let mut b = PatternBuilder::new();
//! let kick = b.atom(36.0);
//! let rest = b.silence();
//! let snare = b.atom(38.0);
//! let bar = b.cat(&[kick, rest, snare, rest]);
//! let program = b.build(bar)?;
//!
//! // One cycle is 4 beats by default.
//! let events = program.query_root(TimeSpan::new(0.0, 4.0), 7);
//! assert_eq!(events.len(), 2);
//! ```

mod euclid;
mod event;
mod query;

pub use euclid::{euclid_mask, is_onset, MAX_EUCLID_STEPS};
pub use event::{sort_events, Event, EventSink, SourceSpan, TimeSpan};

use crate::constants::{BEATS_PER_CYCLE, MAX_EVENT_VALUES};
use crate::error::PatternError;

pub type NodeIndex = u16;

/// "No node" sentinel.
pub const NO_NODE: NodeIndex = u16::MAX;

/// Contiguous run of entries in [`PatternProgram::children`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRange {
    pub start: u16,
    pub len: u16,
}

impl ChildRange {
    fn indices(self) -> std::ops::Range<usize> {
        self.start as usize..self.start as usize + self.len as usize
    }
}

/// A leaf carrying one or more values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Atom {
    pub values: [f32; MAX_EVENT_VALUES],
    pub num_values: u8,
    pub velocity: f32,
    /// Probability the atom sounds in a given cycle.
    pub chance: f32,
    pub source: Option<SourceSpan>,
}

impl Atom {
    pub fn new(value: f32) -> Self {
        Self::chord(&[value])
    }

    /// Several simultaneous values; extras beyond the event limit are dropped.
    pub fn chord(values: &[f32]) -> Self {
        let mut slots = [0.0; MAX_EVENT_VALUES];
        let n = values.len().min(MAX_EVENT_VALUES);
        slots[..n].copy_from_slice(&values[..n]);
        Self {
            values: slots,
            num_values: n as u8,
            velocity: 1.0,
            chance: 1.0,
            source: None,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_chance(mut self, chance: f32) -> Self {
        self.chance = chance;
        self
    }

    pub fn with_source(mut self, span: SourceSpan) -> Self {
        self.source = Some(span);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Atom(Atom),
    Silence,
    /// Children share each cycle in proportion to their weights.
    Cat(ChildRange),
    /// One child per cycle, in order.
    Alternate(ChildRange),
    /// Every child plays over the full span.
    Stack(ChildRange),
    /// One child per cycle, picked by hash.
    Choose(ChildRange),
    Fast { factor: f32, child: NodeIndex },
    Slow { factor: f32, child: NodeIndex },
    Euclid {
        hits: u8,
        steps: u8,
        rotation: i8,
        child: NodeIndex,
    },
    /// Keeps each child event with the given probability.
    Degrade { probability: f32, child: NodeIndex },
    /// Moves the child later by `offset` cycles (earlier when negative).
    Shift { offset: f32, child: NodeIndex },
    SubSeq { id: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternNode {
    pub kind: NodeKind,
    /// Relative span inside a parent `Cat`.
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternProgram {
    pub nodes: Vec<PatternNode>,
    pub children: Vec<NodeIndex>,
    /// Roots of separately defined sequences, addressed by `SubSeq` id.
    pub sequences: Vec<NodeIndex>,
    pub root: NodeIndex,
    /// Beats per cycle.
    pub cycle_length: f64,
    pub seed: u64,
}

impl PatternProgram {
    pub fn node(&self, index: NodeIndex) -> Option<&PatternNode> {
        self.nodes.get(index as usize)
    }

    fn child_slice(&self, range: ChildRange) -> &[NodeIndex] {
        self.children.get(range.indices()).unwrap_or(&[])
    }

    /// Check every index in the arena. Children must precede their parent,
    /// so the only possible cycles go through `SubSeq`, whose nesting is
    /// bounded at query time.
    pub fn validate(&self) -> Result<(), PatternError> {
        let len = self.nodes.len();
        if len == 0 {
            return Err(PatternError::Empty);
        }
        let check = |index: NodeIndex, limit: usize| -> Result<(), PatternError> {
            if (index as usize) < limit {
                Ok(())
            } else {
                Err(PatternError::NodeOutOfRange {
                    index: index as usize,
                    len: limit,
                })
            }
        };

        check(self.root, len)?;
        for &seq in &self.sequences {
            check(seq, len)?;
        }

        for (i, node) in self.nodes.iter().enumerate() {
            match node.kind {
                NodeKind::Atom(_) | NodeKind::Silence => {}
                NodeKind::Cat(range)
                | NodeKind::Alternate(range)
                | NodeKind::Stack(range)
                | NodeKind::Choose(range) => {
                    let indices = range.indices();
                    if indices.end > self.children.len() {
                        return Err(PatternError::ChildOutOfRange {
                            node: i,
                            start: indices.start,
                            end: indices.end,
                            len: self.children.len(),
                        });
                    }
                    for &child in &self.children[indices] {
                        check(child, i)?;
                    }
                }
                NodeKind::Fast { child, .. }
                | NodeKind::Slow { child, .. }
                | NodeKind::Euclid { child, .. }
                | NodeKind::Degrade { child, .. }
                | NodeKind::Shift { child, .. } => check(child, i)?,
                NodeKind::SubSeq { id } => {
                    if id as usize >= self.sequences.len() {
                        return Err(PatternError::SequenceOutOfRange {
                            node: i,
                            id: id as usize,
                            len: self.sequences.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Incremental constructor for a [`PatternProgram`].
///
/// Nodes are appended as they are built, so children always precede the
/// composite that references them.
#[derive(Debug, Clone)]
pub struct PatternBuilder {
    nodes: Vec<PatternNode>,
    children: Vec<NodeIndex>,
    sequences: Vec<NodeIndex>,
    cycle_length: f64,
    seed: u64,
}

impl Default for PatternBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            children: Vec::new(),
            sequences: Vec::new(),
            cycle_length: BEATS_PER_CYCLE,
            seed: 0,
        }
    }

    pub fn cycle_length(mut self, beats: f64) -> Self {
        self.cycle_length = beats;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn push(&mut self, kind: NodeKind) -> NodeIndex {
        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(PatternNode { kind, weight: 1.0 });
        index
    }

    fn push_children(&mut self, children: &[NodeIndex]) -> ChildRange {
        let start = self.children.len() as u16;
        self.children.extend_from_slice(children);
        ChildRange {
            start,
            len: children.len() as u16,
        }
    }

    pub fn atom(&mut self, value: f32) -> NodeIndex {
        self.push(NodeKind::Atom(Atom::new(value)))
    }

    pub fn atom_with(&mut self, atom: Atom) -> NodeIndex {
        self.push(NodeKind::Atom(atom))
    }

    pub fn silence(&mut self) -> NodeIndex {
        self.push(NodeKind::Silence)
    }

    pub fn cat(&mut self, children: &[NodeIndex]) -> NodeIndex {
        let range = self.push_children(children);
        self.push(NodeKind::Cat(range))
    }

    pub fn alternate(&mut self, children: &[NodeIndex]) -> NodeIndex {
        let range = self.push_children(children);
        self.push(NodeKind::Alternate(range))
    }

    pub fn stack(&mut self, children: &[NodeIndex]) -> NodeIndex {
        let range = self.push_children(children);
        self.push(NodeKind::Stack(range))
    }

    pub fn choose(&mut self, children: &[NodeIndex]) -> NodeIndex {
        let range = self.push_children(children);
        self.push(NodeKind::Choose(range))
    }

    pub fn fast(&mut self, factor: f32, child: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Fast { factor, child })
    }

    pub fn slow(&mut self, factor: f32, child: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Slow { factor, child })
    }

    pub fn euclid(&mut self, hits: u8, steps: u8, rotation: i8, child: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Euclid {
            hits,
            steps,
            rotation,
            child,
        })
    }

    /// Keep each event of `child` with `probability`, decided by a hash of
    /// the seed and the event's onset.
    pub fn degrade(&mut self, probability: f32, child: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Degrade { probability, child })
    }

    pub fn shift(&mut self, offset: f32, child: NodeIndex) -> NodeIndex {
        self.push(NodeKind::Shift { offset, child })
    }

    pub fn sub_seq(&mut self, id: u16) -> NodeIndex {
        self.push(NodeKind::SubSeq { id })
    }

    /// Set a node's relative span inside a parent `Cat` (`a@3` style).
    pub fn weight(&mut self, node: NodeIndex, weight: f32) -> NodeIndex {
        if let Some(n) = self.nodes.get_mut(node as usize) {
            n.weight = weight;
        }
        node
    }

    /// Register `root` as a sequence addressable by `SubSeq`; returns its id.
    pub fn define_sequence(&mut self, root: NodeIndex) -> u16 {
        self.sequences.push(root);
        (self.sequences.len() - 1) as u16
    }

    pub fn build(self, root: NodeIndex) -> Result<PatternProgram, PatternError> {
        let program = PatternProgram {
            nodes: self.nodes,
            children: self.children,
            sequences: self.sequences,
            root,
            cycle_length: self.cycle_length,
            seed: self.seed,
        };
        program.validate()?;
        Ok(program)
    }
}
