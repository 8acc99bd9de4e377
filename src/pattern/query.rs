//! Lazy evaluation of a pattern arena over an arc.
//!
//! Each node is evaluated in its own local time, where cycle `k` is the unit
//! span `[k, k+1)`. A [`Frame`] maps local time back to beats. The frame of an
//! event depends only on the tree, never on the queried window, so an event's
//! beat time is identical in every query that returns it.
//!
//! Nodes emit every event that overlaps their window. A child squeezed into a
//! slot or played for one cycle is clipped to that span; the event keeps its
//! full extent in [`Event::whole`]. The root then cuts in one of two ways:
//! [`query`](PatternProgram::query) clips overlapping events to the arc,
//! while [`query_onsets_into`](PatternProgram::query_onsets_into) keeps the
//! parts that carry their onset inside `[start, end)`, so adjacent arcs
//! partition the onsets with no gaps and no duplicates.

use super::euclid::{euclid_mask, is_onset};
use super::event::{sort_events, Event, EventSink, TimeSpan};
use super::{ChildRange, NodeIndex, NodeKind, PatternProgram};
use crate::constants::MAX_PATTERN_DEPTH;
use crate::hash::deterministic_unit;

/// Root window padding, in cycles. Internal pruning is done on the padded
/// window; the exact cut happens on beat times at the root.
const WINDOW_PAD: f64 = 1e-7;

/// Nested FAST/SLOW factors whose product exceeds this evaluate to silence.
const MAX_SPEED: f64 = 65_536.0;

/// Clipped fragments shorter than this (beats) that start before their span
/// are rounding residue from the neighbouring event and are dropped. Edges
/// closer than this to a span boundary are left alone.
const MIN_FRAGMENT: f64 = 1e-9;

/// `beats = offset + scale * local`
#[derive(Debug, Clone, Copy)]
struct Frame {
    offset: f64,
    scale: f64,
    /// Product of the FAST/SLOW factors above this node.
    speed: f64,
}

impl Frame {
    fn to_beats(self, local: f64) -> f64 {
        self.offset + self.scale * local
    }
}

/// How the root cuts node output down to the queried arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArcCut {
    /// Parts carrying their event's onset, with the onset in the arc.
    Onsets,
    /// Every event overlapping the arc, clipped to it.
    Clip,
}

struct ArcFilter<'a> {
    inner: &'a mut dyn EventSink,
    arc: TimeSpan,
    cut: ArcCut,
}

impl EventSink for ArcFilter<'_> {
    fn push_event(&mut self, mut event: Event) -> bool {
        let starts_inside = self.arc.contains(event.time);
        match self.cut {
            ArcCut::Onsets if !(starts_inside && event.has_onset()) => return true,
            ArcCut::Onsets => {}
            ArcCut::Clip => {
                let part = TimeSpan::new(event.time, event.end());
                let Some(part) = part.intersect(&self.arc) else {
                    return true;
                };
                if !starts_inside && part.duration() <= MIN_FRAGMENT {
                    return true;
                }
                event.time = part.begin;
                event.duration = part.duration();
            }
        }
        self.inner.push_event(event)
    }

    fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    fn events_mut(&mut self) -> &mut [Event] {
        self.inner.events_mut()
    }
}

/// Confines a child's events to the beat span it plays in.
struct SpanClip<'a> {
    inner: &'a mut dyn EventSink,
    span: TimeSpan,
}

impl EventSink for SpanClip<'_> {
    fn push_event(&mut self, mut event: Event) -> bool {
        let mut begin = event.time;
        let mut end = event.end();
        if begin < self.span.begin - MIN_FRAGMENT {
            begin = self.span.begin;
        }
        if end > self.span.end + MIN_FRAGMENT {
            end = self.span.end;
        }
        let clipped = begin != event.time;
        if end <= begin || (clipped && end - begin <= MIN_FRAGMENT) {
            return true;
        }
        event.time = begin;
        event.duration = end - begin;
        self.inner.push_event(event)
    }

    fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    fn events_mut(&mut self) -> &mut [Event] {
        self.inner.events_mut()
    }
}

struct DegradeFilter<'a> {
    inner: &'a mut dyn EventSink,
    probability: f64,
    seed: u64,
    node: NodeIndex,
}

impl EventSink for DegradeFilter<'_> {
    fn push_event(&mut self, event: Event) -> bool {
        if deterministic_unit(self.seed, self.node as u32, event.whole.begin) >= self.probability {
            return true;
        }
        self.inner.push_event(event)
    }

    fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    fn events_mut(&mut self) -> &mut [Event] {
        self.inner.events_mut()
    }
}

struct Evaluator<'a> {
    program: &'a PatternProgram,
    seed: u64,
}

impl Evaluator<'_> {
    fn children(&self, range: ChildRange) -> &[NodeIndex] {
        self.program.child_slice(range)
    }

    fn weight(&self, node: NodeIndex) -> f64 {
        self.program
            .node(node)
            .map_or(0.0, |n| (n.weight as f64).max(0.0))
    }

    fn eval(
        &self,
        index: NodeIndex,
        window: TimeSpan,
        frame: Frame,
        depth: usize,
        sink: &mut dyn EventSink,
    ) {
        if window.is_empty() || sink.is_full() {
            return;
        }
        let Some(node) = self.program.node(index) else {
            return;
        };

        match node.kind {
            NodeKind::Silence => {}

            NodeKind::Atom(atom) => {
                // Cycle `k` sounds over `[k, k+1)`, so the cycle holding the
                // window start overlaps it too.
                let mut k = window.begin.floor();
                while k < window.end {
                    let time = frame.to_beats(k);
                    let sounds = atom.chance >= 1.0
                        || deterministic_unit(self.seed, index as u32, time) < atom.chance as f64;
                    if sounds {
                        let event = Event {
                            time,
                            duration: frame.scale,
                            whole: TimeSpan::new(time, time + frame.scale),
                            chance: atom.chance,
                            velocity: atom.velocity,
                            values: atom.values,
                            num_values: atom.num_values,
                            source: atom.source,
                        };
                        if !sink.push_event(event) {
                            return;
                        }
                    }
                    k += 1.0;
                }
            }

            NodeKind::Cat(range) => {
                let children = self.children(range);
                let total: f64 = children.iter().map(|&c| self.weight(c)).sum();
                if total <= 0.0 {
                    return;
                }
                for k in window.cycles() {
                    let kf = k as f64;
                    let mut prefix = 0.0;
                    for (i, &child) in children.iter().enumerate() {
                        let w = self.weight(child);
                        let begin = kf + prefix / total;
                        prefix += w;
                        let end = if i + 1 == children.len() {
                            kf + 1.0
                        } else {
                            kf + prefix / total
                        };
                        if w > 0.0 {
                            self.eval_slot(child, window, TimeSpan::new(begin, end), kf, frame, depth, sink);
                        }
                    }
                }
            }

            NodeKind::Alternate(range) => {
                let children = self.children(range);
                if children.is_empty() {
                    return;
                }
                let n = children.len() as i64;
                for k in window.cycles() {
                    let Some(part) = window.intersect(&TimeSpan::new(k as f64, k as f64 + 1.0)) else {
                        continue;
                    };
                    let child = children[k.rem_euclid(n) as usize];
                    // The child sees its own cycle k / n at parent cycle k.
                    let shift = (k - k.div_euclid(n)) as f64;
                    let child_window = TimeSpan::new(part.begin - shift, part.end - shift);
                    let child_frame = Frame {
                        offset: frame.to_beats(shift),
                        ..frame
                    };
                    self.eval_within(child, child_window, child_frame, self.cycle_span(k, frame), depth, sink);
                }
            }

            NodeKind::Stack(range) => {
                for &child in self.children(range) {
                    self.eval(child, window, frame, depth, sink);
                }
            }

            NodeKind::Choose(range) => {
                let children = self.children(range);
                if children.is_empty() {
                    return;
                }
                for k in window.cycles() {
                    let Some(part) = window.intersect(&TimeSpan::new(k as f64, k as f64 + 1.0)) else {
                        continue;
                    };
                    let roll = deterministic_unit(self.seed, index as u32, frame.to_beats(k as f64));
                    let pick = ((roll * children.len() as f64) as usize).min(children.len() - 1);
                    self.eval_within(children[pick], part, frame, self.cycle_span(k, frame), depth, sink);
                }
            }

            NodeKind::Fast { factor, child } => {
                self.eval_scaled(child, factor as f64, window, frame, depth, sink)
            }

            NodeKind::Slow { factor, child } => {
                if factor > 0.0 {
                    self.eval_scaled(child, 1.0 / factor as f64, window, frame, depth, sink)
                }
            }

            NodeKind::Euclid {
                hits,
                steps,
                rotation,
                child,
            } => {
                if steps == 0 {
                    return;
                }
                let mask = euclid_mask(hits as u32, steps as u32, rotation as i32);
                let s = steps as f64;
                for k in window.cycles() {
                    let kf = k as f64;
                    for step in 0..steps as u32 {
                        if !is_onset(mask, step) {
                            continue;
                        }
                        let begin = kf + step as f64 / s;
                        let end = if step + 1 == steps as u32 {
                            kf + 1.0
                        } else {
                            kf + (step + 1) as f64 / s
                        };
                        self.eval_slot(child, window, TimeSpan::new(begin, end), kf, frame, depth, sink);
                    }
                }
            }

            NodeKind::Degrade { probability, child } => {
                let mut filter = DegradeFilter {
                    inner: &mut *sink,
                    probability: probability as f64,
                    seed: self.seed,
                    node: index,
                };
                self.eval(child, window, frame, depth, &mut filter);
            }

            NodeKind::Shift { offset, child } => {
                let o = offset as f64;
                if !o.is_finite() {
                    return;
                }
                let child_window = TimeSpan::new(window.begin - o, window.end - o);
                let child_frame = Frame {
                    offset: frame.to_beats(o),
                    ..frame
                };
                self.eval(child, child_window, child_frame, depth, sink);
            }

            NodeKind::SubSeq { id } => {
                if depth >= MAX_PATTERN_DEPTH {
                    return;
                }
                if let Some(&root) = self.program.sequences.get(id as usize) {
                    self.eval(root, window, frame, depth + 1, sink);
                }
            }
        }
    }

    /// Evaluate `child` squeezed into `slot` of parent cycle `k`; the child
    /// plays its own cycle `k` there.
    #[allow(clippy::too_many_arguments)]
    fn eval_slot(
        &self,
        child: NodeIndex,
        window: TimeSpan,
        slot: TimeSpan,
        k: f64,
        frame: Frame,
        depth: usize,
        sink: &mut dyn EventSink,
    ) {
        let Some(part) = window.intersect(&slot) else {
            return;
        };
        let width = slot.duration();
        // Snap to the cycle edges when the slot is fully covered so that
        // rounding can never leak an onset from the neighbouring cycle.
        let begin = if part.begin <= slot.begin {
            k
        } else {
            k + (part.begin - slot.begin) / width
        };
        let end = if part.end >= slot.end {
            k + 1.0
        } else {
            k + (part.end - slot.begin) / width
        };
        let child_frame = Frame {
            offset: frame.to_beats(slot.begin - k * width),
            scale: frame.scale * width,
            ..frame
        };
        let span = TimeSpan::new(frame.to_beats(slot.begin), frame.to_beats(slot.end));
        self.eval_within(child, TimeSpan::new(begin, end), child_frame, span, depth, sink);
    }

    /// Beats covered by local cycle `k`.
    fn cycle_span(&self, k: i64, frame: Frame) -> TimeSpan {
        TimeSpan::new(frame.to_beats(k as f64), frame.to_beats(k as f64 + 1.0))
    }

    /// Evaluate `child` with its events clipped to `span` (beats).
    fn eval_within(
        &self,
        child: NodeIndex,
        window: TimeSpan,
        frame: Frame,
        span: TimeSpan,
        depth: usize,
        sink: &mut dyn EventSink,
    ) {
        let mut clip = SpanClip { inner: sink, span };
        self.eval(child, window, frame, depth, &mut clip);
    }

    fn eval_scaled(
        &self,
        child: NodeIndex,
        factor: f64,
        window: TimeSpan,
        frame: Frame,
        depth: usize,
        sink: &mut dyn EventSink,
    ) {
        let speed = frame.speed * factor;
        if !(factor > 0.0 && speed <= MAX_SPEED) {
            return;
        }
        let child_window = TimeSpan::new(window.begin * factor, window.end * factor);
        let child_frame = Frame {
            offset: frame.offset,
            scale: frame.scale / factor,
            speed,
        };
        self.eval(child, child_window, child_frame, depth, sink);
    }
}

impl PatternProgram {
    /// Events of `node` that sound during `arc` (beats), clipped to it and
    /// sorted by start. An event already sounding at `arc.begin` comes back
    /// as a fragment starting there; [`Event::whole`] keeps its full extent.
    ///
    /// Pure: repeated calls with the same arguments return identical lists.
    pub fn query(&self, node: NodeIndex, arc: TimeSpan, seed: u64) -> Vec<Event> {
        let mut events = Vec::new();
        self.query_into(node, arc, seed, &mut events);
        events
    }

    /// [`query`](Self::query) on the program root.
    pub fn query_root(&self, arc: TimeSpan, seed: u64) -> Vec<Event> {
        self.query(self.root, arc, seed)
    }

    /// Events of `node` whose onset lies in `arc`, sorted by onset.
    pub fn query_onsets(&self, node: NodeIndex, arc: TimeSpan, seed: u64) -> Vec<Event> {
        let mut events = Vec::new();
        self.query_onsets_into(node, arc, seed, &mut events);
        events
    }

    /// Append the clipped events of `node` in `arc` to `sink` and sort the
    /// appended run. With a fixed-capacity sink nothing is allocated; events
    /// past the sink's capacity are dropped.
    pub fn query_into(&self, node: NodeIndex, arc: TimeSpan, seed: u64, sink: &mut dyn EventSink) {
        self.cut_into(node, arc, seed, ArcCut::Clip, sink);
    }

    /// Onset-owned variant of [`query_into`](Self::query_into), used for
    /// stepping: each event is returned by exactly one of a run of adjacent
    /// arcs, not clipped to the arc.
    pub fn query_onsets_into(
        &self,
        node: NodeIndex,
        arc: TimeSpan,
        seed: u64,
        sink: &mut dyn EventSink,
    ) {
        self.cut_into(node, arc, seed, ArcCut::Onsets, sink);
    }

    fn cut_into(&self, node: NodeIndex, arc: TimeSpan, seed: u64, cut: ArcCut, sink: &mut dyn EventSink) {
        if arc.is_empty() || !(self.cycle_length > 0.0) {
            return;
        }
        let first = sink.events_mut().len();
        let window = TimeSpan::new(
            arc.begin / self.cycle_length - WINDOW_PAD,
            arc.end / self.cycle_length + WINDOW_PAD,
        );
        let frame = Frame {
            offset: 0.0,
            scale: self.cycle_length,
            speed: 1.0,
        };
        let evaluator = Evaluator { program: self, seed };
        {
            let mut filter = ArcFilter {
                inner: &mut *sink,
                arc,
                cut,
            };
            evaluator.eval(node, window, frame, 0, &mut filter);
        }
        sort_events(&mut sink.events_mut()[first..]);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Atom, PatternBuilder, SourceSpan};
    use super::*;
    use arrayvec::ArrayVec;

    fn cycle(n: f64) -> TimeSpan {
        // Default cycle length is 4 beats.
        TimeSpan::new(0.0, 4.0 * n)
    }

    fn times(events: &[Event]) -> Vec<f64> {
        events.iter().map(|e| e.time).collect()
    }

    fn values(events: &[Event]) -> Vec<f32> {
        events.iter().map(|e| e.value()).collect()
    }

    #[test]
    fn test_atom_spans_cycle() {
        let mut b = PatternBuilder::new();
        let a = b.atom(60.0);
        let p = b.build(a).unwrap();

        let events = p.query_root(cycle(2.0), 0);
        assert_eq!(times(&events), vec![0.0, 4.0]);
        assert!(events.iter().all(|e| e.duration == 4.0));
        assert_eq!(values(&events), vec![60.0, 60.0]);
    }

    #[test]
    fn test_cat_divides_cycle() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let s = b.silence();
        let y = b.atom(2.0);
        let z = b.atom(3.0);
        let cat = b.cat(&[x, s, y, z]);
        let p = b.build(cat).unwrap();

        let events = p.query_root(cycle(1.0), 0);
        assert_eq!(times(&events), vec![0.0, 2.0, 3.0]);
        assert_eq!(values(&events), vec![1.0, 2.0, 3.0]);
        assert!(events.iter().all(|e| (e.duration - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_cat_weights() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let y = b.atom(2.0);
        b.weight(x, 3.0);
        let cat = b.cat(&[x, y]);
        let p = b.build(cat).unwrap();

        let events = p.query_root(cycle(1.0), 0);
        assert_eq!(times(&events), vec![0.0, 3.0]);
        assert!((events[0].duration - 3.0).abs() < 1e-12);
        assert!((events[1].duration - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_alternate_rotates_per_cycle() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let y = b.atom(2.0);
        let z = b.atom(3.0);
        let alt = b.alternate(&[x, y, z]);
        let p = b.build(alt).unwrap();

        let events = p.query_root(cycle(4.0), 0);
        assert_eq!(values(&events), vec![1.0, 2.0, 3.0, 1.0]);
        assert_eq!(times(&events), vec![0.0, 4.0, 8.0, 12.0]);
    }

    #[test]
    fn test_nested_alternate_inside_cat() {
        // "a <b c>": the alternation advances once per parent cycle.
        let mut b = PatternBuilder::new();
        let a = b.atom(1.0);
        let x = b.atom(2.0);
        let y = b.atom(3.0);
        let alt = b.alternate(&[x, y]);
        let cat = b.cat(&[a, alt]);
        let p = b.build(cat).unwrap();

        let events = p.query_root(cycle(2.0), 0);
        assert_eq!(values(&events), vec![1.0, 2.0, 1.0, 3.0]);
        assert_eq!(times(&events), vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_fast_and_slow() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let y = b.atom(2.0);
        let cat = b.cat(&[x, y]);
        let fast = b.fast(2.0, cat);
        let slow = b.slow(2.0, cat);
        let p = b.build(fast).unwrap();

        let fast_events = p.query(fast, cycle(1.0), 0);
        assert_eq!(times(&fast_events), vec![0.0, 1.0, 2.0, 3.0]);
        assert!(fast_events.iter().all(|e| (e.duration - 1.0).abs() < 1e-12));

        let slow_events = p.query(slow, cycle(2.0), 0);
        assert_eq!(times(&slow_events), vec![0.0, 4.0]);
        assert!(slow_events.iter().all(|e| (e.duration - 4.0).abs() < 1e-12));
    }

    #[test]
    fn test_nonpositive_fast_is_silent() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let zero = b.fast(0.0, x);
        let neg = b.fast(-2.0, x);
        let p = b.build(zero).unwrap();
        assert!(p.query(zero, cycle(1.0), 0).is_empty());
        assert!(p.query(neg, cycle(1.0), 0).is_empty());
    }

    #[test]
    fn test_nested_fast_is_bounded_by_total_speed() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let inner = b.fast(256.0, x);
        let at_limit = b.fast(256.0, inner);
        let past_limit = b.fast(512.0, inner);
        let runaway_inner = b.fast(65_536.0, x);
        let runaway = b.fast(65_536.0, runaway_inner);
        let p = b.build(at_limit).unwrap();

        // 65536 events per 4-beat cycle: 16 in the first 1/1024 beat.
        let arc = TimeSpan::new(0.0, 1.0 / 1024.0);
        assert_eq!(p.query_onsets(at_limit, arc, 0).len(), 16);
        assert!(p.query(past_limit, cycle(1.0), 0).is_empty());
        assert!(p.query(runaway, cycle(64.0), 0).is_empty());

        // Slowing back down restores the budget.
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let fast = b.fast(65_536.0, x);
        let slow = b.slow(65_536.0, fast);
        let p = b.build(slow).unwrap();
        assert_eq!(times(&p.query_root(cycle(2.0), 0)), vec![0.0, 4.0]);
    }

    #[test]
    fn test_euclid_node() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let e = b.euclid(3, 8, 0, x);
        let p = b.build(e).unwrap();

        let events = p.query_root(cycle(1.0), 0);
        assert_eq!(times(&events), vec![0.0, 1.5, 3.0]);
        assert!(events.iter().all(|e| (e.duration - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_stack_and_shift() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let y = b.atom(2.0);
        let late = b.shift(0.5, y);
        let stack = b.stack(&[x, late]);
        let p = b.build(stack).unwrap();

        let onsets = p.query_onsets(stack, cycle(1.0), 0);
        assert_eq!(times(&onsets), vec![0.0, 2.0]);
        assert_eq!(values(&onsets), vec![1.0, 2.0]);

        // The clipped view also carries the tail of the previous shifted note.
        let clipped = p.query_root(cycle(1.0), 0);
        assert_eq!(times(&clipped), vec![0.0, 0.0, 2.0]);
        assert_eq!(clipped.iter().filter(|e| e.has_onset()).count(), 2);
    }

    #[test]
    fn test_onset_ownership_partitions_arcs() {
        let mut b = PatternBuilder::new();
        let atoms: Vec<_> = (0..8).map(|i| b.atom(i as f32)).collect();
        let cat = b.cat(&atoms);
        let p = b.build(cat).unwrap();

        let onsets = |begin, end| p.query_onsets(cat, TimeSpan::new(begin, end), 0);
        let whole = onsets(0.0, 4.0);
        let mut pieces = onsets(0.0, 1.5);
        pieces.extend(onsets(1.5, 2.0));
        pieces.extend(onsets(2.0, 4.0));
        assert_eq!(whole, pieces, "adjacent arcs must partition the onsets");

        // An event straddling the arc start is owned by the earlier arc.
        assert!(onsets(0.25, 0.5).is_empty());
    }

    #[test]
    fn test_sustained_event_is_clipped_to_the_arc() {
        let mut b = PatternBuilder::new();
        let x = b.atom(60.0);
        let p = b.build(x).unwrap();

        let inside = p.query_root(TimeSpan::new(1.0, 2.0), 0);
        assert_eq!(inside.len(), 1, "the note is sounding over [1, 2)");
        assert_eq!((inside[0].time, inside[0].duration), (1.0, 1.0));
        assert_eq!(inside[0].whole, TimeSpan::new(0.0, 4.0));
        assert!(!inside[0].has_onset());

        let head = p.query_root(TimeSpan::new(0.0, 2.0), 0);
        assert_eq!(head.len(), 1);
        assert_eq!((head[0].time, head[0].duration), (0.0, 2.0));
        assert!(head[0].has_onset());

        // Across a cycle boundary: the tail of one note and the head of the next.
        let seam = p.query_root(TimeSpan::new(3.0, 5.0), 0);
        assert_eq!(times(&seam), vec![3.0, 4.0]);
        assert!(seam.iter().all(|e| e.duration == 1.0));
        assert_eq!(seam.iter().filter(|e| e.has_onset()).count(), 1);

        // Stepping never sees the tail.
        assert!(p.query_onsets(x, TimeSpan::new(1.0, 2.0), 0).is_empty());
    }

    #[test]
    fn test_shifted_child_stays_in_its_slot() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let y = b.atom(2.0);
        let late = b.shift(0.5, y);
        let cat = b.cat(&[x, late]);
        let p = b.build(cat).unwrap();

        // Slot [2, 4): y starts halfway in and is cut at the slot end; the
        // slot opens on the tail of the previous y.
        let onsets = p.query_onsets(cat, cycle(1.0), 0);
        assert_eq!(times(&onsets), vec![0.0, 3.0]);
        assert_eq!(onsets[1].duration, 1.0);
        assert_eq!(onsets[1].whole, TimeSpan::new(3.0, 5.0));

        let clipped = p.query_root(cycle(1.0), 0);
        assert_eq!(times(&clipped), vec![0.0, 2.0, 3.0]);
        assert_eq!(values(&clipped), vec![1.0, 2.0, 2.0]);
        assert!(!clipped[1].has_onset());
    }

    #[test]
    fn test_clipped_fragments_tile_the_arc() {
        let mut b = PatternBuilder::new();
        let atoms: Vec<_> = (0..3).map(|i| b.atom(i as f32)).collect();
        let cat = b.cat(&atoms);
        let p = b.build(cat).unwrap();

        // Three slots of 4/3 beats; a gapless cat covers any arc exactly.
        let events = p.query_root(TimeSpan::new(0.5, 2.0), 0);
        assert_eq!(values(&events), vec![0.0, 1.0]);
        let covered: f64 = events.iter().map(|e| e.duration).sum();
        assert!((covered - 1.5).abs() < 1e-12, "covered {}", covered);
        assert!(events.iter().all(|e| e.end() <= 2.0 + 1e-12));
    }

    #[test]
    fn test_choose_is_deterministic_and_seeded() {
        let mut b = PatternBuilder::new();
        let opts: Vec<_> = (0..4).map(|i| b.atom(i as f32)).collect();
        let choose = b.choose(&opts);
        let p = b.build(choose).unwrap();

        let a = p.query_root(cycle(32.0), 11);
        let again = p.query_root(cycle(32.0), 11);
        assert_eq!(a, again);

        let picks: std::collections::HashSet<u32> = a.iter().map(|e| e.value() as u32).collect();
        assert!(picks.len() > 1, "32 cycles should not all pick the same child");

        let other = p.query_root(cycle(32.0), 12);
        assert_ne!(values(&a), values(&other), "seed should change the choices");
    }

    #[test]
    fn test_degrade_keeps_about_p() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let fast = b.fast(16.0, x);
        let mostly = b.degrade(0.8, fast);
        let rarely = b.degrade(0.2, fast);
        let none = b.degrade(0.0, fast);
        let all = b.degrade(1.0, fast);
        let p = b.build(mostly).unwrap();

        let kept = p.query(mostly, cycle(64.0), 3).len();
        assert!(kept > 716 && kept < 922, "kept {} of 1024 at 0.8", kept);
        let kept = p.query(rarely, cycle(64.0), 3).len();
        assert!(kept > 102 && kept < 308, "kept {} of 1024 at 0.2", kept);
        assert!(p.query(none, cycle(4.0), 3).is_empty());
        assert_eq!(p.query(all, cycle(4.0), 3).len(), 64);
    }

    #[test]
    fn test_atom_chance_and_source() {
        let mut b = PatternBuilder::new();
        let x = b.atom_with(
            Atom::new(1.0)
                .with_chance(0.0)
                .with_source(SourceSpan::new(3, 4)),
        );
        let y = b.atom_with(Atom::new(2.0).with_source(SourceSpan::new(5, 6)).with_velocity(0.5));
        let cat = b.cat(&[x, y]);
        let p = b.build(cat).unwrap();

        let events = p.query_root(cycle(1.0), 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, Some(SourceSpan::new(5, 6)));
        assert_eq!(events[0].velocity, 0.5);
    }

    #[test]
    fn test_sub_seq_recursion_is_bounded() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let inner = b.fast(2.0, x);
        let id = b.define_sequence(inner);
        let sub = b.sub_seq(id);
        let looped = b.sub_seq(1);
        let self_ref = b.cat(&[x, looped]);
        b.define_sequence(self_ref);
        let p = b.build(sub).unwrap();

        assert_eq!(times(&p.query(sub, cycle(1.0), 0)), vec![0.0, 2.0]);
        // Self-referencing sequence terminates.
        let events = p.query(self_ref, cycle(1.0), 0);
        assert!(!events.is_empty());
        assert!(events.len() <= 64);
    }

    #[test]
    fn test_fixed_capacity_sink() {
        let mut b = PatternBuilder::new();
        let x = b.atom(1.0);
        let fast = b.fast(100.0, x);
        let p = b.build(fast).unwrap();

        let mut sink: ArrayVec<Event, 8> = ArrayVec::new();
        p.query_into(fast, cycle(1.0), 0, &mut sink);
        assert_eq!(sink.len(), 8);
        assert!(sink.windows(2).all(|w| w[0].time <= w[1].time));
    }
}
