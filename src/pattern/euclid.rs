//! Euclidean rhythms
//!
//! Bjorklund's algorithm spreads `hits` onsets as evenly as possible over
//! `steps` positions. Results match Toussaint's tables and TidalCycles:
//! `(3,8)` is `x..x..x.`, `(5,8)` is `x.xx.xx.`.

/// Longest supported rhythm; onsets are returned as a `u64` bit mask.
pub const MAX_EUCLID_STEPS: u32 = 64;

/// A bit string of up to 64 steps, step `i` in bit `i`.
#[derive(Clone, Copy)]
struct Bits {
    mask: u64,
    len: u32,
}

impl Bits {
    fn append(self, other: Bits) -> Bits {
        Bits {
            mask: self.mask | (other.mask << self.len),
            len: self.len + other.len,
        }
    }

    fn repeat(self, times: u32) -> Bits {
        let mut out = Bits { mask: 0, len: 0 };
        for _ in 0..times {
            out = out.append(self);
        }
        out
    }
}

/// Onset mask for `hits` over `steps`, rotated left by `rotation` steps.
///
/// Bit `i` is set when step `i` is an onset. `steps` is clamped to
/// [`MAX_EUCLID_STEPS`]; `hits >= steps` fills every step.
///
/// # Example
/// ```ignore
/// assert_eq!(euclid_mask(3, 8, 0), 0b0100_1001);
/// ```
pub fn euclid_mask(hits: u32, steps: u32, rotation: i32) -> u64 {
    let steps = steps.min(MAX_EUCLID_STEPS);
    if steps == 0 || hits == 0 {
        return 0;
    }
    let full = if steps == 64 { u64::MAX } else { (1u64 << steps) - 1 };
    if hits >= steps {
        return full;
    }

    // Every group in `x` is identical, as is every group in `y`, so each
    // side is a single pattern plus a count.
    let (mut x, mut y) = (Bits { mask: 1, len: 1 }, Bits { mask: 0, len: 1 });
    let (mut nx, mut ny) = (hits, steps - hits);
    while nx.min(ny) > 1 {
        let merged = x.append(y);
        if nx > ny {
            (x, y) = (merged, x);
            (nx, ny) = (ny, nx - ny);
        } else {
            x = merged;
            ny -= nx;
        }
    }
    let mask = x.repeat(nx).append(y.repeat(ny)).mask;
    rotate(mask, steps, rotation)
}

fn rotate(mask: u64, steps: u32, rotation: i32) -> u64 {
    let r = rotation.rem_euclid(steps as i32) as u32;
    if r == 0 {
        return mask;
    }
    let full = if steps == 64 { u64::MAX } else { (1u64 << steps) - 1 };
    ((mask >> r) | (mask << (steps - r))) & full
}

pub fn is_onset(mask: u64, step: u32) -> bool {
    step < 64 && mask & (1u64 << step) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_string(mask: u64, steps: u32) -> String {
        (0..steps).map(|i| if is_onset(mask, i) { 'x' } else { '.' }).collect()
    }

    #[test]
    fn test_euclid_3_8() {
        let mask = euclid_mask(3, 8, 0);
        assert_eq!(mask.count_ones(), 3, "E(3,8) should have 3 onsets");
        assert_eq!(as_string(mask, 8), "x..x..x.");
    }

    #[test]
    fn test_euclid_4_4_fills() {
        assert_eq!(as_string(euclid_mask(4, 4, 0), 4), "xxxx");
    }

    #[test]
    fn test_euclid_1_4() {
        let mask = euclid_mask(1, 4, 0);
        assert_eq!(mask.count_ones(), 1);
        assert_eq!(as_string(mask, 4), "x...");
    }

    #[test]
    fn test_known_rhythms() {
        assert_eq!(as_string(euclid_mask(5, 8, 0), 8), "x.xx.xx.");
        assert_eq!(as_string(euclid_mask(2, 5, 0), 5), "x.x..");
        assert_eq!(as_string(euclid_mask(3, 4, 0), 4), "xxx.");
        assert_eq!(as_string(euclid_mask(7, 16, 0), 16), "x..x.x.x..x.x.x.");
    }

    #[test]
    fn test_rotation() {
        // Rotating left by one: the onset at step 3 moves to step 2.
        assert_eq!(as_string(euclid_mask(3, 8, 1), 8), "..x..x.x");
        assert_eq!(euclid_mask(3, 8, -7), euclid_mask(3, 8, 1));
        assert_eq!(euclid_mask(3, 8, 8), euclid_mask(3, 8, 0));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(euclid_mask(0, 8, 0), 0);
        assert_eq!(euclid_mask(3, 0, 0), 0);
        assert_eq!(euclid_mask(9, 8, 0).count_ones(), 8);
        assert_eq!(euclid_mask(64, 64, 0), u64::MAX);
    }
}
