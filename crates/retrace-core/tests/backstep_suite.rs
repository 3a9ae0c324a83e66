//! Backstep coverage: forward/backward symmetry, bounded history, grouping
//! of multi-write instructions and trap entry.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use proptest::prelude::*;
use retrace_core::state::csr::{UCAUSE, USCRATCH, USTATUS, UTVEC};
use retrace_core::{
    Engine, EngineConfig, Exception, Execution, FReg, FloatRegisterFile, Instruction,
    MachineState, Reg, RegisterFile, Simulation, Statement, StopReason, TrapCause, UndoKind,
    DATA_START, TEXT_START,
};
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

#[derive(Debug, Clone)]
enum Op {
    Nop,
    SetReg(u32, u32),
    StoreWord(u32, u32),
    StoreByte(u32, u8),
    Scratch(u32),
    Float(u32, u64),
    Multi(u32, u32),
    Ecall,
}

impl Instruction for Op {
    fn execute(&self, machine: &mut MachineState) -> Execution {
        match *self {
            Self::Nop => {}
            Self::SetReg(index, value) => {
                machine.set_register(Reg::new(index).expect("register index"), value);
            }
            Self::StoreWord(addr, value) => machine.set_word(addr, value).expect("data store"),
            Self::StoreByte(addr, value) => machine.set_byte(addr, value).expect("data store"),
            Self::Scratch(value) => machine.set_csr(USCRATCH, value).expect("writable csr"),
            Self::Float(index, bits) => {
                machine.set_float_register(FReg::new(index).expect("float index"), bits);
            }
            Self::Multi(a, b) => {
                machine.set_register(Reg::A0, a);
                machine.set_register(Reg::A1, b);
                machine.set_word(DATA_START, a ^ b).expect("data store");
                machine.set_float_register(FReg::new(0).expect("float index"), u64::from(a));
            }
            Self::Ecall => {
                return Execution::Trap(Exception::new(TrapCause::EnvironmentCall, 0, "ecall"));
            }
        }
        Execution::Continue
    }
}

fn simulation(capacity: usize, program: &[Op]) -> Arc<Simulation> {
    let sim = Arc::new(Simulation::new(EngineConfig {
        backstep_capacity: capacity,
        ..EngineConfig::default()
    }));
    let statements: Vec<Statement> = program
        .iter()
        .cloned()
        .map(|op| Arc::new(op) as Statement)
        .collect();
    sim.load_program(TEXT_START, statements)
        .expect("text is loadable");
    sim
}

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    registers: RegisterFile,
    floats: FloatRegisterFile,
    scratch: u32,
    data: Vec<u32>,
}

fn snapshot(sim: &Simulation) -> Snapshot {
    let machine = sim.lock_machine();
    Snapshot {
        registers: machine.registers().clone(),
        floats: machine.floats().clone(),
        scratch: machine.csrs().read(USCRATCH).expect("known csr"),
        data: (0..16)
            .map(|slot| {
                machine
                    .memory()
                    .word(DATA_START + slot * 4)
                    .expect("data is readable")
            })
            .collect(),
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Nop),
        (1_u32..32, any::<u32>()).prop_map(|(index, value)| Op::SetReg(index, value)),
        (0_u32..16, any::<u32>()).prop_map(|(slot, value)| Op::StoreWord(DATA_START + slot * 4, value)),
        (0_u32..64, any::<u8>()).prop_map(|(offset, value)| Op::StoreByte(DATA_START + offset, value)),
        any::<u32>().prop_map(Op::Scratch),
        (0_u32..32, any::<u64>()).prop_map(|(index, bits)| Op::Float(index, bits)),
        (any::<u32>(), any::<u32>()).prop_map(|(a, b)| Op::Multi(a, b)),
    ]
}

proptest! {
    #[test]
    fn property_forward_then_backward_restores_state(program in prop::collection::vec(op_strategy(), 1..40)) {
        let sim = simulation(4096, &program);
        let before = snapshot(&sim);
        let steps = program.len() as u64;

        let outcome = Engine::new(Arc::clone(&sim)).run(TEXT_START, steps, &[]);
        prop_assert_eq!(outcome.reason, StopReason::MaxSteps);
        prop_assert_eq!(outcome.steps, steps);

        for _ in 0..program.len() {
            let replayed = sim.back_step().expect("replayable");
            prop_assert!(replayed >= 1);
        }
        prop_assert_eq!(sim.back_step(), Ok(0));
        prop_assert_eq!(snapshot(&sim), before);
    }

    #[test]
    fn property_history_is_bounded_by_capacity(capacity in 1_usize..32, extra in 0_usize..16) {
        let program: Vec<Op> = (0..capacity + extra)
            .map(|value| Op::SetReg(10, value as u32 + 1))
            .collect();
        let sim = simulation(capacity, &program);

        let outcome = Engine::new(Arc::clone(&sim)).run(TEXT_START, 0, &[]);
        prop_assert_eq!(outcome.reason, StopReason::CliffTermination);
        prop_assert_eq!(sim.undo_log().len(), capacity);

        for _ in 0..capacity {
            prop_assert_eq!(sim.back_step(), Ok(1));
        }
        prop_assert_eq!(sim.back_step(), Ok(0));
        let a0 = sim.lock_machine().registers().get(Reg::A0);
        prop_assert_eq!(a0, extra as u32);
    }
}

#[test]
fn multi_write_instruction_backsteps_as_one_unit() {
    let sim = simulation(64, &[Op::SetReg(10, 7), Op::Multi(0xAAAA, 0x5555)]);
    let outcome = Engine::new(Arc::clone(&sim)).run(TEXT_START, 0, &[]);
    assert_eq!(outcome.reason, StopReason::CliffTermination);

    assert_eq!(sim.back_step(), Ok(4));
    let machine = sim.lock_machine();
    assert_eq!(machine.pc(), TEXT_START + 4);
    assert_eq!(machine.registers().get(Reg::A0), 7);
    assert_eq!(machine.registers().get(Reg::A1), 0);
    assert_eq!(machine.memory().word(DATA_START), Ok(0));
    assert_eq!(machine.floats().get(FReg::new(0).expect("float index")), 0);
}

#[test]
fn side_effect_free_instruction_still_backsteps_pc() {
    let sim = simulation(64, &[Op::Nop, Op::Nop, Op::Nop]);
    Engine::new(Arc::clone(&sim)).run(TEXT_START, 0, &[]);

    assert_eq!(
        sim.undo_log().peek().map(|entry| entry.kind),
        Some(UndoKind::Nothing)
    );
    assert_eq!(sim.back_step(), Ok(1));
    assert_eq!(sim.pc(), TEXT_START + 8);
    assert_eq!(sim.back_step(), Ok(1));
    assert_eq!(sim.pc(), TEXT_START + 4);
}

#[test]
fn trap_entry_backsteps_separately_from_handler() {
    // 0: ecall, 1: handler
    let sim = simulation(64, &[Op::Ecall, Op::SetReg(10, 1)]);
    {
        let mut machine = sim.lock_machine();
        machine
            .set_csr_backdoor(UTVEC, TEXT_START + 4)
            .expect("known csr");
        machine.set_csr_backdoor(USTATUS, 1).expect("known csr");
    }
    sim.undo_log().clear();

    let outcome = Engine::new(Arc::clone(&sim)).run(TEXT_START, 1, &[]);
    assert_eq!(outcome.reason, StopReason::MaxSteps);
    assert_eq!(sim.lock_machine().csrs().ucause(), 8);

    assert_eq!(sim.back_step(), Ok(1));
    assert_eq!(sim.pc(), TEXT_START + 4);

    let dispatch_entries = sim.back_step().expect("replayable");
    assert!(dispatch_entries >= 4);
    let machine = sim.lock_machine();
    assert_eq!(machine.pc(), TEXT_START);
    assert_eq!(machine.csrs().read(UCAUSE), Ok(0));
    assert_eq!(machine.csrs().ustatus(), 1);
    drop(machine);

    assert_eq!(sim.back_step(), Ok(0));
}

#[test]
fn disabled_history_records_nothing() {
    let sim = Arc::new(Simulation::new(EngineConfig {
        backstep_enabled: false,
        ..EngineConfig::default()
    }));
    sim.load_program(TEXT_START, [Arc::new(Op::SetReg(10, 1)) as Statement])
        .expect("text is loadable");
    Engine::new(Arc::clone(&sim)).run(TEXT_START, 0, &[]);
    assert!(sim.undo_log().is_empty());
    assert_eq!(sim.back_step(), Ok(0));
}
