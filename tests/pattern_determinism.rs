/// Pattern queries are pure functions of (program, arc, seed): same inputs,
/// same events, no matter how the timeline is sliced or what was queried
/// before. Onset queries partition the stream across adjacent arcs; clipped
/// queries tile it.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use strata::pattern::{Event, PatternBuilder, PatternProgram, TimeSpan};

fn groove() -> PatternProgram {
    let mut b = PatternBuilder::new();

    let kick = b.atom(36.0);
    let hat = b.atom(42.0);
    let fast_hat = b.fast(2.0, hat);
    let tresillo = b.euclid(3, 8, 0, fast_hat);

    let (c, e, g) = (b.atom(60.0), b.atom(64.0), b.atom(67.0));
    let pick = b.choose(&[c, e, g]);
    let ghost = b.atom(38.0);
    let ghosts = b.fast(4.0, ghost);
    let thinned = b.degrade(0.5, ghosts);
    let layer = b.stack(&[pick, thinned]);

    let (x, y) = (b.atom(72.0), b.atom(74.0));
    let alt = b.alternate(&[x, y]);
    let late = b.shift(0.125, alt);

    let bar = b.cat(&[kick, tresillo, layer, late]);
    let root = b.slow(2.0, bar);
    b.build(root).unwrap()
}

fn fingerprint(events: &[Event]) -> String {
    let mut text = String::new();
    for e in events {
        writeln!(
            text,
            "{:.9} {:.9} {:?} {} {}",
            e.time,
            e.duration,
            e.values(),
            e.velocity,
            e.chance
        )
        .unwrap();
    }
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[test]
fn test_rebuilt_program_has_the_same_fingerprint() {
    let arc = TimeSpan::new(0.0, 64.0);
    let a = fingerprint(&groove().query_root(arc, 11));
    let b = fingerprint(&groove().query_root(arc, 11));
    println!("fingerprint: {}", a);
    assert_eq!(a, b);
}

#[test]
fn test_query_history_does_not_matter() {
    let program = groove();
    let window = TimeSpan::new(8.0, 24.0);
    let first = program.query_root(window, 3);

    // Scribble over every other region of the timeline first.
    for k in 0..32 {
        let start = k as f64 * 1.5 - 4.0;
        program.query_root(TimeSpan::new(start, start + 3.0), 3);
    }
    assert_eq!(program.query_root(window, 3), first);
}

fn sounding_time(events: &[Event]) -> f64 {
    events.iter().map(|e| e.duration).sum()
}

#[test]
fn test_adjacent_arcs_partition_the_stream() {
    let program = groove();
    let onsets = |begin: f64, end: f64| program.query_onsets(program.root, TimeSpan::new(begin, end), 5);
    let whole = onsets(0.0, 32.0);
    let clipped = program.query_root(TimeSpan::new(0.0, 32.0), 5);
    assert!(!whole.is_empty());

    let mut rng = StdRng::seed_from_u64(0x5EED);
    for round in 0..20 {
        let mut cuts: Vec<f64> = (0..rng.gen_range(1..12))
            .map(|_| rng.gen_range(0.0..32.0))
            .collect();
        cuts.push(0.0);
        cuts.push(32.0);
        cuts.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let pieces: Vec<Event> = cuts.windows(2).flat_map(|w| onsets(w[0], w[1])).collect();
        assert_eq!(pieces, whole, "round {} cuts {:?}", round, cuts);

        // Clipped parts split sounding events at the cuts without losing time.
        let parts: Vec<Event> = cuts
            .windows(2)
            .flat_map(|w| program.query_root(TimeSpan::new(w[0], w[1]), 5))
            .collect();
        assert_eq!(
            parts.iter().filter(|e| e.has_onset()).count(),
            whole.len(),
            "round {}",
            round
        );
        let drift = (sounding_time(&parts) - sounding_time(&clipped)).abs();
        assert!(drift < 1e-6, "round {} lost {} beats", round, drift);
    }
}

#[test]
fn test_events_are_sorted_and_inside_the_arc() {
    let program = groove();
    let arc = TimeSpan::new(4.7, 17.9);
    let events = program.query_root(arc, 9);
    assert!(events.windows(2).all(|w| w[0].time <= w[1].time));
    assert!(events.iter().all(|e| arc.contains(e.time)));
    assert!(events.iter().all(|e| e.end() <= arc.end + 1e-9), "parts end inside the arc");
    assert!(events.iter().any(|e| !e.has_onset()), "the arc opens mid-event");
}

#[test]
fn test_seed_changes_choices() {
    let mut b = PatternBuilder::new();
    let options: Vec<_> = (0..8).map(|v| b.atom(v as f32)).collect();
    let root = b.choose(&options);
    let program = b.build(root).unwrap();

    let arc = TimeSpan::new(0.0, 4.0 * 32.0);
    let one: Vec<f32> = program.query_root(arc, 1).iter().map(|e| e.value()).collect();
    let two: Vec<f32> = program.query_root(arc, 2).iter().map(|e| e.value()).collect();
    assert_eq!(one.len(), 32);
    assert_eq!(two.len(), 32);
    assert_ne!(one, two, "a different seed should pick differently");
    assert_eq!(one, program.query_root(arc, 1).iter().map(|e| e.value()).collect::<Vec<_>>());
}

#[test]
fn test_euclid_hit_counts_per_cycle() {
    for (hits, steps, expected) in [(3u8, 8u8, 3usize), (4, 4, 4), (1, 4, 1), (5, 8, 5), (0, 8, 0)] {
        let mut b = PatternBuilder::new();
        let atom = b.atom(1.0);
        let root = b.euclid(hits, steps, 0, atom);
        let program = b.build(root).unwrap();
        for cycle in 0..4 {
            let start = cycle as f64 * 4.0;
            let events = program.query_root(TimeSpan::new(start, start + 4.0), 0);
            assert_eq!(events.len(), expected, "E({},{}) cycle {}", hits, steps, cycle);
        }
    }
}

#[test]
fn test_tresillo_onsets() {
    let mut b = PatternBuilder::new();
    let atom = b.atom(1.0);
    let root = b.euclid(3, 8, 0, atom);
    let program = b.build(root).unwrap();
    let times: Vec<f64> = program
        .query_root(TimeSpan::new(0.0, 4.0), 0)
        .iter()
        .map(|e| e.time)
        .collect();
    // x..x..x. over four beats
    assert_eq!(times, vec![0.0, 1.5, 3.0]);
}

#[test]
fn test_degrade_keeps_about_half() {
    let mut b = PatternBuilder::new();
    let atom = b.atom(1.0);
    let dense = b.fast(16.0, atom);
    let root = b.degrade(0.5, dense);
    let program = b.build(root).unwrap();

    let arc = TimeSpan::new(0.0, 4.0 * 32.0);
    let kept = program.query_root(arc, 21).len();
    let total = 16 * 32;
    let fraction = kept as f64 / total as f64;
    println!("degrade kept {}/{}", kept, total);
    assert!(fraction > 0.4 && fraction < 0.6, "kept fraction {}", fraction);
}

#[test]
fn test_degrade_probability_is_a_keep_chance() {
    let arc = TimeSpan::new(0.0, 4.0 * 32.0);
    let total = (16 * 32) as f64;
    for (probability, low, high) in [(0.8f32, 0.7, 0.9), (0.25, 0.15, 0.35)] {
        let mut b = PatternBuilder::new();
        let atom = b.atom(1.0);
        let dense = b.fast(16.0, atom);
        let root = b.degrade(probability, dense);
        let program = b.build(root).unwrap();

        let fraction = program.query_root(arc, 21).len() as f64 / total;
        assert!(
            fraction > low && fraction < high,
            "degrade({}) kept fraction {}",
            probability,
            fraction
        );
    }
}
