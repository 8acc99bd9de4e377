use crate::constants::MAX_EVENT_VALUES;
use arrayvec::ArrayVec;

/// Half-open time interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub begin: f64,
    pub end: f64,
}

impl TimeSpan {
    pub fn new(begin: f64, end: f64) -> Self {
        Self { begin, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.begin && t < self.end
    }

    pub fn intersect(&self, other: &TimeSpan) -> Option<TimeSpan> {
        let span = TimeSpan::new(self.begin.max(other.begin), self.end.min(other.end));
        (!span.is_empty()).then_some(span)
    }

    /// Integer cycles `k` whose unit span `[k, k+1)` overlaps this span.
    pub fn cycles(&self) -> std::ops::Range<i64> {
        if self.is_empty() {
            return 0..0;
        }
        self.begin.floor() as i64..self.end.ceil() as i64
    }
}

/// Byte range in the source text an event came from, for UI highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
}

impl SourceSpan {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// A timed unit of pattern output. Times are in beats.
///
/// `time` and `duration` give the part inside the queried arc; `whole` is
/// the full extent of the event, which starts earlier or ends later when a
/// query clipped it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub time: f64,
    pub duration: f64,
    pub whole: TimeSpan,
    pub chance: f32,
    pub velocity: f32,
    pub values: [f32; MAX_EVENT_VALUES],
    pub num_values: u8,
    pub source: Option<SourceSpan>,
}

impl Event {
    pub fn values(&self) -> &[f32] {
        &self.values[..self.num_values as usize]
    }

    /// First value, or 0 for a value-less event.
    pub fn value(&self) -> f32 {
        self.values().first().copied().unwrap_or(0.0)
    }

    pub fn end(&self) -> f64 {
        self.time + self.duration
    }

    /// True when this part includes the event's onset.
    pub fn has_onset(&self) -> bool {
        self.time == self.whole.begin
    }
}

/// Destination for events produced by a query.
///
/// Implemented for `Vec<Event>` (control side, unbounded) and for
/// `ArrayVec<Event, N>` (audio side, fixed capacity, never allocates).
pub trait EventSink {
    /// Store an event. Returns false if the sink is full and dropped it.
    fn push_event(&mut self, event: Event) -> bool;

    fn is_full(&self) -> bool {
        false
    }

    fn events_mut(&mut self) -> &mut [Event];
}

impl EventSink for Vec<Event> {
    fn push_event(&mut self, event: Event) -> bool {
        self.push(event);
        true
    }

    fn events_mut(&mut self) -> &mut [Event] {
        self
    }
}

impl<const N: usize> EventSink for ArrayVec<Event, N> {
    fn push_event(&mut self, event: Event) -> bool {
        self.try_push(event).is_ok()
    }

    fn is_full(&self) -> bool {
        ArrayVec::is_full(self)
    }

    fn events_mut(&mut self) -> &mut [Event] {
        self
    }
}

/// Stable in-place sort by onset time. Insertion sort: query results are
/// short and nearly sorted, and this never allocates.
pub fn sort_events(events: &mut [Event]) {
    for i in 1..events.len() {
        let mut j = i;
        while j > 0 && events[j - 1].time > events[j].time {
            events.swap(j - 1, j);
            j -= 1;
        }
    }
}
