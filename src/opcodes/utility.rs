use super::{finite_or_zero, unary, OpContext};
use crate::buffer_pool::Block;
use crate::constants::BLOCK_SIZE;
use crate::dsp_state::{NoiseState, SahState, SlewState};
use crate::hash::splitmix64;
use crate::instruction::Instruction;
use crate::params::smoothing_coeff;

/// `OUTPUT` mode values.
pub const OUTPUT_BOTH: u8 = 0;
pub const OUTPUT_LEFT: u8 = 1;
pub const OUTPUT_RIGHT: u8 = 2;

/// Accumulate into the stereo output.
///
/// `in0` feeds both channels, or only the left one when `in1` is present and
/// feeds the right. The mode restricts output to one side.
pub fn output(ctx: &mut OpContext, inst: &Instruction) {
    let left = ctx.input(inst, 0);
    let right = if inst.has_input(1) {
        ctx.input(inst, 1)
    } else {
        left
    };

    if inst.mode != OUTPUT_RIGHT {
        for (acc, &s) in ctx.out_left.iter_mut().zip(left.iter()) {
            *acc += finite_or_zero(s);
        }
    }
    if inst.mode != OUTPUT_LEFT {
        for (acc, &s) in ctx.out_right.iter_mut().zip(right.iter()) {
            *acc += finite_or_zero(s);
        }
    }
}

/// White noise in `[-1, 1)` from a per-node LCG seeded by the node's key,
/// so a given program renders the same noise every run.
pub fn noise(ctx: &mut OpContext, inst: &Instruction) {
    let block = ctx.timing.block_counter;
    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<NoiseState>(inst.key) {
        if state.entry_block == Some(block) {
            state.seed = state.entry_seed;
            state.seeded = state.entry_seeded;
        } else {
            state.entry_block = Some(block);
            state.entry_seed = state.seed;
            state.entry_seeded = state.seeded;
        }
        if !state.seeded {
            state.seed = splitmix64(inst.key as u64) as u32;
            state.seeded = true;
        }
        for sample in out.iter_mut() {
            state.seed = state.seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            *sample = state.seed as i32 as f32 / 2_147_483_648.0;
        }
    }
    ctx.write(inst.out, &out);
}

/// MIDI note number to Hz, A4 = 69 = 440 Hz.
pub fn mtof(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, |note| 440.0 * ((note - 69.0) / 12.0).exp2());
}

/// `in0` plus the offset stored in the key field.
pub fn dc(ctx: &mut OpContext, inst: &Instruction) {
    let offset = inst.constant_value();
    unary(ctx, inst, |x| x + offset);
}

/// One-pole glide toward `in0`. `in1` gives the glide time in milliseconds,
/// read once per block; without it the parameter default slew is used.
pub fn slew(ctx: &mut OpContext, inst: &Instruction) {
    let target = ctx.input(inst, 0);
    let slew_ms = if inst.has_input(1) {
        ctx.input(inst, 1)[0]
    } else {
        ctx.params.default_slew_ms()
    };
    let coeff = smoothing_coeff(slew_ms, ctx.timing.sample_rate);
    let block = ctx.timing.block_counter;

    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<SlewState>(inst.key) {
        if state.entry_block == Some(block) {
            state.current = state.entry_current;
            state.initialized = state.entry_initialized;
        } else {
            state.entry_block = Some(block);
            state.entry_current = state.current;
            state.entry_initialized = state.initialized;
        }
        if !state.initialized {
            state.current = finite_or_zero(target[0]);
            state.initialized = true;
        }
        for i in 0..BLOCK_SIZE {
            state.current = finite_or_zero(state.current + (target[i] - state.current) * coeff);
            out[i] = state.current;
        }
    }
    ctx.write(inst.out, &out);
}

/// Sample `in0` on each rising edge of `in1` and hold it.
pub fn sah(ctx: &mut OpContext, inst: &Instruction) {
    let input = ctx.input(inst, 0);
    let trigger = ctx.input(inst, 1);
    let block = ctx.timing.block_counter;

    let mut out = Block::ZERO;
    if let Ok(state) = ctx.states.get_or_create::<SahState>(inst.key) {
        if state.entry_block == Some(block) {
            state.held = state.entry_held;
            state.prev_trigger = state.entry_trigger;
        } else {
            state.entry_block = Some(block);
            state.entry_held = state.held;
            state.entry_trigger = state.prev_trigger;
        }
        for i in 0..BLOCK_SIZE {
            if state.prev_trigger <= 0.0 && trigger[i] > 0.0 {
                state.held = finite_or_zero(input[i]);
            }
            state.prev_trigger = trigger[i];
            out[i] = state.held;
        }
    }
    ctx.write(inst.out, &out);
}

/// Read the smoothed parameter whose name hash is in the key field. While
/// the parameter does not exist, copy `in0` if given, else output 0.
pub fn env_get(ctx: &mut OpContext, inst: &Instruction) {
    match ctx.params.try_get(inst.key) {
        Some(value) => {
            let value = finite_or_zero(value);
            ctx.output(inst).fill(value);
        }
        None => {
            let fallback = ctx.input(inst, 0);
            ctx.write(inst.out, &fallback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Rig;
    use super::*;
    use crate::hash::hash_name;
    use crate::instruction::Opcode;

    #[test]
    fn test_output_accumulates_both_channels() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 0.25));
        rig.run(Instruction::output(0, None));
        rig.run(Instruction::output(0, None));
        assert!(rig.left.iter().all(|&s| s == 0.5));
        assert!(rig.right.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_output_routing() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 1.0));
        rig.run(Instruction::constant(1, -1.0));
        rig.run(Instruction::output(0, Some(1)));
        assert_eq!((rig.left[0], rig.right[0]), (1.0, -1.0));

        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 1.0));
        rig.run(Instruction::output(0, None).with_mode(OUTPUT_LEFT));
        assert_eq!((rig.left[0], rig.right[0]), (1.0, 0.0));
        rig.run(Instruction::output(0, None).with_mode(OUTPUT_RIGHT));
        assert_eq!((rig.left[0], rig.right[0]), (1.0, 1.0));
    }

    #[test]
    fn test_noise_is_reproducible_and_bounded() {
        let render = || {
            let mut rig = Rig::new();
            rig.run(Instruction::new(Opcode::Noise, 0, &[]).with_key(42));
            *rig.buf(0)
        };
        let a = render();
        assert_eq!(a, render());
        assert!(a.iter().all(|s| (-1.0..1.0).contains(s)));
        assert!(a.iter().any(|&s| s != a[0]));
    }

    #[test]
    fn test_mtof() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 69.0));
        rig.run(Instruction::new(Opcode::Mtof, 1, &[0]));
        assert!((rig.buf(1)[0] - 440.0).abs() < 1e-3);
        rig.run(Instruction::constant(0, 81.0));
        rig.run(Instruction::new(Opcode::Mtof, 1, &[0]));
        assert!((rig.buf(1)[0] - 880.0).abs() < 1e-3);
    }

    #[test]
    fn test_dc_offset() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 1.0));
        rig.run(Instruction::dc(1, 0, 0.5));
        assert!(rig.buf(1).iter().all(|&s| s == 1.5));
    }

    #[test]
    fn test_slew_glides_without_overshoot() {
        let mut rig = Rig::new();
        let slew = Instruction::new(Opcode::Slew, 1, &[0, 2]).with_key(3);
        rig.run(Instruction::constant(0, 0.0));
        rig.run(Instruction::constant(2, 10.0));
        rig.run(slew);

        rig.timing.advance_block();
        rig.run(Instruction::constant(0, 1.0));
        rig.run(slew);
        let out = rig.buf(1);
        assert!(out.windows(2).all(|w| w[0] < w[1]), "rises monotonically");
        assert!(out[BLOCK_SIZE - 1] < 1.0, "10ms glide is not done after one block");
    }

    #[test]
    fn test_sample_and_hold() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 0.75));
        rig.buffers.get_mut(1)[40] = 1.0;
        rig.run(Instruction::new(Opcode::Sah, 2, &[0, 1]).with_key(8));
        let out = rig.buf(2);
        assert_eq!(out[39], 0.0);
        assert_eq!(out[40], 0.75);
        assert_eq!(out[127], 0.75);
    }

    #[test]
    fn test_stateful_utilities_repeat_within_a_block() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(0, 0.0));
        rig.run(Instruction::constant(2, 5.0));
        let slew = Instruction::new(Opcode::Slew, 1, &[0, 2]).with_key(0x51);
        let noise = Instruction::new(Opcode::Noise, 3, &[]).with_key(0x52);
        let sah = Instruction::new(Opcode::Sah, 5, &[3, 4]).with_key(0x53);
        rig.run(slew);
        rig.run(noise);
        rig.run(sah);

        rig.timing.advance_block();
        rig.run(Instruction::constant(0, 1.0));
        rig.buffers.get_mut(4)[10] = 1.0;
        let mut first = Vec::new();
        for inst in [slew, noise, sah] {
            rig.run(inst);
            first.push(*rig.buf(inst.out));
        }
        // A second program sharing the keys in the same block sees the
        // same starting state.
        for (inst, expected) in [slew, noise, sah].into_iter().zip(&first) {
            rig.run(inst);
            assert_eq!(rig.buf(inst.out), expected, "{:?}", inst.opcode);
        }

        rig.timing.advance_block();
        rig.run(slew);
        assert!(rig.buf(1)[0] > first[0][BLOCK_SIZE - 1], "the next block carries on");
    }

    #[test]
    fn test_env_get_reads_param_or_fallback() {
        let mut rig = Rig::new();
        rig.run(Instruction::constant(5, 0.3));
        rig.run(Instruction::env_get(0, "gain", Some(5)));
        assert_eq!(rig.buf(0)[0], 0.3, "fallback while absent");
        rig.run(Instruction::env_get(0, "gain", None));
        assert_eq!(rig.buf(0)[0], 0.0);

        rig.params.set_param("gain", 0.8, None).unwrap();
        rig.run(Instruction::env_get(0, "gain", Some(5)));
        assert!(rig.buf(0).iter().all(|&s| s == 0.8));
        assert_eq!(rig.params.get(hash_name("gain")), 0.8);
    }
}
