use super::{binary, unary, OpContext};
use crate::instruction::Instruction;

/// Fill the output with the constant stored in the key field.
pub fn push_const(ctx: &mut OpContext, inst: &Instruction) {
    let value = super::finite_or_zero(inst.constant_value());
    ctx.output(inst).fill(value);
}

pub fn copy(ctx: &mut OpContext, inst: &Instruction) {
    ctx.buffers.copy(inst.out, inst.input(0));
}

pub fn add(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, |a, b| a + b);
}

pub fn sub(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, |a, b| a - b);
}

pub fn mul(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, |a, b| a * b);
}

/// `a / b`, 0 where `b` is 0.
pub fn div(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, |a, b| if b != 0.0 { a / b } else { 0.0 });
}

/// `a ^ b`; results that are not real numbers become 0.
pub fn pow(ctx: &mut OpContext, inst: &Instruction) {
    binary(ctx, inst, f32::powf);
}

pub fn neg(ctx: &mut OpContext, inst: &Instruction) {
    unary(ctx, inst, |a| -a);
}
