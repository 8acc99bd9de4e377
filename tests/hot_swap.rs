/// Program replacement while audio is running: slot back-pressure, crossfade
/// shape and a control thread racing the audio thread.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use strata::{
    BlendMode, CrossfadePolicy, Instruction, LoadError, Opcode, Vm, VmConfig, BLOCK_SIZE,
};

const GLIDE_KEY: u32 = 0x51;

fn constant_program(value: f32) -> Vec<Instruction> {
    vec![Instruction::constant(0, value), Instruction::output(0, None)]
}

/// A slow slew toward `target`, optionally through a unity gain stage.
fn glide_program(target: f32, unity_gain: bool) -> Vec<Instruction> {
    let mut program = vec![
        Instruction::constant(0, target),
        Instruction::constant(2, 200.0),
        Instruction::new(Opcode::Slew, 1, &[0, 2]).with_key(GLIDE_KEY),
    ];
    if unity_gain {
        program.push(Instruction::constant(3, 1.0));
        program.push(Instruction::new(Opcode::Mul, 4, &[1, 3]));
        program.push(Instruction::output(4, None));
    } else {
        program.push(Instruction::output(1, None));
    }
    program
}

#[test]
fn test_second_load_before_swap_is_refused() {
    let vm = Vm::default();
    let handle = vm.handle();
    handle.load(&constant_program(0.1)).unwrap();
    assert_eq!(
        handle.load(&constant_program(0.2)),
        Err(LoadError::SlotBusy),
        "only one program may wait for the boundary"
    );
    assert!(handle.has_pending());
}

#[test]
fn test_oversized_program_is_refused() {
    let vm = Vm::new(VmConfig {
        max_program_size: 4,
        ..Default::default()
    })
    .unwrap();
    let program = vec![Instruction::constant(0, 1.0); 5];
    assert_eq!(
        vm.load(&program),
        Err(LoadError::TooLarge { len: 5, max: 4 })
    );
    assert!(!vm.handle().has_pending(), "a refused load leaves no slot behind");
}

#[test]
fn test_load_succeeds_again_after_the_swap() {
    let mut vm = Vm::default();
    let handle = vm.handle();
    handle.load(&constant_program(0.1)).unwrap();
    vm.render_blocks(1);
    handle.load(&constant_program(0.2)).unwrap();
    vm.render_blocks(1);
    assert_eq!(vm.swap_count(), 2);
}

#[test]
fn test_equal_power_blend_of_identical_programs_exceeds_unity() {
    // Equal-power gains sum to sqrt(2) at the midpoint, which is audible as
    // a bump for correlated material.
    let mut vm = Vm::default();
    vm.load_immediate(&constant_program(1.0)).unwrap();
    vm.render_blocks(1);
    vm.load(&constant_program(1.0)).unwrap();
    let (left, _) = vm.render_blocks(3);
    let peak = left.iter().cloned().fold(0.0f32, f32::max);
    println!("peak during equal-power blend: {}", peak);
    assert!(peak > 1.0);
    assert!(peak <= std::f32::consts::SQRT_2 + 1e-5);
}

#[test]
fn test_linear_blend_has_no_bump() {
    let mut vm = Vm::default();
    vm.set_blend_mode(BlendMode::Linear);
    vm.load_immediate(&constant_program(1.0)).unwrap();
    vm.render_blocks(1);
    vm.load(&constant_program(1.0)).unwrap();
    let (left, _) = vm.render_blocks(5);
    assert!(left.iter().all(|&s| (s - 1.0).abs() < 1e-6));
}

#[test]
fn test_crossfade_restarts_for_a_program_queued_mid_fade() {
    let mut vm = Vm::new(VmConfig {
        crossfade_blocks: 8,
        blend: BlendMode::Linear,
        ..Default::default()
    })
    .unwrap();
    vm.load_immediate(&constant_program(0.0)).unwrap();
    vm.render_blocks(1);

    vm.load(&constant_program(0.5)).unwrap();
    vm.render_blocks(2);
    assert!(vm.is_crossfading());

    // Queued while the first fade runs; it waits for that fade to finish.
    vm.load(&constant_program(1.0)).unwrap();
    let mut blocks = 0;
    while vm.handle().has_pending() {
        vm.render_blocks(1);
        blocks += 1;
        assert!(blocks < 32);
    }
    assert!(vm.is_crossfading(), "the new swap starts its own fade");
    let (left, _) = vm.render_blocks(10);
    assert_eq!(left[left.len() - 1], 1.0);
}

#[test]
fn test_shared_slew_glides_at_one_rate_through_a_crossfade() {
    let config = VmConfig {
        crossfade_blocks: 8,
        blend: BlendMode::Linear,
        ..Default::default()
    };
    let mut reference = Vm::new(config.clone()).unwrap();
    let mut edited = Vm::new(config).unwrap();
    for vm in [&mut reference, &mut edited] {
        vm.load_immediate(&glide_program(0.0, false)).unwrap();
        vm.render_blocks(1);
        vm.load(&glide_program(1.0, false)).unwrap();
        vm.render_blocks(12);
        assert!(!vm.is_crossfading());
    }

    // Same slew key, new graph around it: the fade must not speed it up.
    edited.load(&glide_program(1.0, true)).unwrap();
    let (expected, _) = reference.render_blocks(12);
    let (got, _) = edited.render_blocks(12);
    assert!(expected[0] > 0.0 && expected[expected.len() - 1] < 1.0, "still gliding");
    let worst = expected
        .iter()
        .zip(&got)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(worst < 1e-5, "diverged by {}", worst);
}

#[test]
fn test_structural_policy_cuts_over_on_constant_edits() {
    let mut vm = Vm::new(VmConfig {
        crossfade_policy: CrossfadePolicy::OnStructuralChange,
        ..Default::default()
    })
    .unwrap();
    vm.load_immediate(&constant_program(0.2)).unwrap();
    vm.render_blocks(1);
    vm.load(&constant_program(0.4)).unwrap();
    let (left, _) = vm.render_blocks(1);
    assert!(left.iter().all(|&s| s == 0.4));
    assert!(!vm.is_crossfading());
}

#[test]
fn test_control_thread_races_audio_thread() {
    const VERSIONS: usize = 40;
    let mut vm = Vm::new(VmConfig {
        crossfade_blocks: 2,
        ..Default::default()
    })
    .unwrap();
    let handle = vm.handle();
    let done = Arc::new(AtomicBool::new(false));

    let control = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for version in 1..=VERSIONS {
                let program = constant_program(version as f32 * 0.01);
                // SlotBusy means the audio thread has not swapped yet.
                while let Err(err) = handle.load(&program) {
                    assert_eq!(err, LoadError::SlotBusy);
                    thread::sleep(Duration::from_micros(50));
                }
                handle
                    .set_param("version", version as f32, None)
                    .unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut left = [0.0; BLOCK_SIZE];
    let mut right = [0.0; BLOCK_SIZE];
    let mut blocks = 0usize;
    while !done.load(Ordering::Acquire) || vm.handle().has_pending() || vm.is_crossfading() {
        vm.process_block(&mut left, &mut right);
        assert!(left.iter().all(|s| s.is_finite()));
        blocks += 1;
        assert!(blocks < 10_000_000, "audio loop did not settle");
    }
    control.join().unwrap();

    // One more block plays the settled program at full gain.
    vm.process_block(&mut left, &mut right);
    println!("{} versions in {} blocks", VERSIONS, blocks);
    assert_eq!(vm.swap_count() as usize, VERSIONS);
    let last = VERSIONS as f32 * 0.01;
    assert!(left.iter().all(|&s| s == last), "got {}", left[0]);
    assert_eq!(vm.params().get_target(strata::hash_name("version")), VERSIONS as f32);
}
