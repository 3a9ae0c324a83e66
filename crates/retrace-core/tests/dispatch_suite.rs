//! Engine-level coverage of interrupt priority, breakpoints, step budgets,
//! wait-for-interrupt and the interval timer.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proptest as _;
use retrace_core::state::csr::{UCAUSE, UEPC, UIE, UIP, USTATUS, UTVEC};
use retrace_core::{
    Counter, Engine, EngineConfig, Execution, ExitReason, Instruction, IntervalTimer,
    MachineState, Reg, RunState, Simulation, Statement, StopReason, TEXT_START,
};
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

#[derive(Debug, Clone)]
enum Op {
    Nop,
    /// Records the interrupt code in `a0` and stops.
    Mark(u32),
    JumpTo(u32),
    /// Posts a software interrupt through `uip.USIP`.
    PostSoftware,
    Wait,
    Exit(i32),
}

impl Instruction for Op {
    fn execute(&self, machine: &mut MachineState) -> Execution {
        match *self {
            Self::Nop => Execution::Continue,
            Self::Mark(code) => {
                machine.set_register(Reg::A0, code);
                Execution::Ebreak
            }
            Self::JumpTo(target) => {
                machine.set_pc(target);
                Execution::Continue
            }
            Self::PostSoftware => {
                machine.set_csr(UIP, 1).expect("writable csr");
                Execution::Continue
            }
            Self::Wait => Execution::Wait,
            Self::Exit(code) => Execution::Exit(ExitReason::Code(code)),
        }
    }
}

const MAIN: u32 = TEXT_START + 0x40;

fn load(program: Vec<Op>) -> Arc<Simulation> {
    let sim = Arc::new(Simulation::new(EngineConfig::default()));
    let statements: Vec<Statement> = program
        .into_iter()
        .map(|op| Arc::new(op) as Statement)
        .collect();
    sim.load_program(TEXT_START, statements)
        .expect("text is loadable");
    sim
}

/// Vector table at `TEXT_START` (slots 0, 4 and 8 mark their cause) followed
/// by `main` at [`MAIN`].
fn vectored(main: Vec<Op>) -> Arc<Simulation> {
    let mut program: Vec<Op> = (0..16)
        .map(|slot| match slot {
            0 | 4 | 8 => Op::Mark(slot),
            _ => Op::Nop,
        })
        .collect();
    program.extend(main);
    let sim = load(program);
    {
        let mut machine = sim.lock_machine();
        machine
            .set_csr_backdoor(UTVEC, TEXT_START | 1)
            .expect("known csr");
        machine.set_csr_backdoor(USTATUS, 1).expect("known csr");
    }
    sim
}

fn set_uie(sim: &Simulation, bits: u32) {
    sim.lock_machine()
        .set_csr_backdoor(UIE, bits)
        .expect("known csr");
}

#[rstest]
#[case::external_beats_all(0x111, true, true, true, 8)]
#[case::software_beats_timer(0x111, false, true, true, 0)]
#[case::timer_alone(0x111, false, false, true, 4)]
#[case::disabled_external_is_skipped(0x011, true, false, true, 4)]
#[case::disabled_software_is_skipped(0x110, false, true, true, 4)]
fn highest_enabled_interrupt_is_dispatched_first(
    #[case] uie: u32,
    #[case] external: bool,
    #[case] software: bool,
    #[case] timer: bool,
    #[case] expected: u32,
) {
    let sim = vectored(vec![Op::Nop, Op::Nop]);
    set_uie(&sim, uie);
    let interrupts = sim.interrupts();
    if external {
        interrupts.raise_external(0xE);
    }
    if software {
        interrupts.raise_software();
    }
    if timer {
        interrupts.raise_timer(0x7);
    }

    let outcome = Engine::new(Arc::clone(&sim)).run(MAIN, 0, &[]);
    assert_eq!(outcome.reason, StopReason::Breakpoint);
    assert_eq!(outcome.steps, 1);

    let machine = sim.lock_machine();
    assert_eq!(machine.registers().get(Reg::A0), expected);
    assert_eq!(machine.csrs().read(UCAUSE), Ok(0x8000_0000 | expected));
    assert_eq!(machine.csrs().read(UEPC), Ok(MAIN));
    assert_eq!(machine.csrs().ustatus(), 0x10);
    drop(machine);

    assert_eq!(interrupts.pending_external().is_some(), external && expected != 8);
    assert_eq!(interrupts.pending_software(), software && expected != 0);
    assert_eq!(interrupts.pending_timer().is_some(), timer && expected != 4);
}

#[test]
fn interrupts_wait_while_globally_disabled() {
    let sim = vectored(vec![Op::Nop, Op::Exit(3)]);
    set_uie(&sim, 0x111);
    sim.lock_machine()
        .set_csr_backdoor(USTATUS, 0)
        .expect("known csr");
    sim.interrupts().raise_timer(1);

    let outcome = Engine::new(Arc::clone(&sim)).run(MAIN, 0, &[]);
    assert_eq!(outcome.reason, StopReason::NormalTermination);
    assert_eq!(outcome.exit_code, Some(3));
    assert_eq!(sim.interrupts().pending_timer(), Some(1));
}

#[test]
fn breakpoints_halt_exactly_after_retirement() {
    let sim = load(vec![Op::Nop; 10]);
    let engine = Engine::new(Arc::clone(&sim));
    let breakpoints = [TEXT_START + 12, TEXT_START + 28];

    let first = engine.run(TEXT_START, 0, &breakpoints);
    assert_eq!(first.reason, StopReason::Breakpoint);
    assert_eq!(first.steps, 3);
    assert_eq!(first.pc, TEXT_START + 12);

    let second = engine.run(first.pc, 0, &breakpoints);
    assert_eq!(second.reason, StopReason::Breakpoint);
    assert_eq!(second.steps, 4);
    assert_eq!(second.pc, TEXT_START + 28);

    let last = engine.run(second.pc, 0, &breakpoints);
    assert_eq!(last.reason, StopReason::CliffTermination);
    assert_eq!(last.steps, 3);
}

#[test]
fn step_budget_retires_exactly_that_many_instructions() {
    let sim = load(vec![Op::JumpTo(TEXT_START)]);
    let engine = Engine::new(Arc::clone(&sim));

    let outcome = engine.run(TEXT_START, 25, &[]);
    assert_eq!(outcome.reason, StopReason::MaxSteps);
    assert_eq!(outcome.steps, 25);
    assert_eq!(sim.lock_machine().csrs().counter(Counter::Instret), 25);

    engine.run(TEXT_START, 10, &[]);
    let machine = sim.lock_machine();
    assert_eq!(machine.csrs().counter(Counter::Instret), 35);
    assert_eq!(machine.csrs().counter(Counter::Cycle), 35);
    assert!(machine.csrs().counter(Counter::Time) > 0);
}

fn wait_for_state(sim: &Simulation, state: RunState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while sim.run_state() != state {
        assert!(Instant::now() < deadline, "run state never became {state:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn wfi_blocks_until_stopped() {
    let sim = load(vec![Op::Wait, Op::Exit(0)]);
    let engine = Engine::new(Arc::clone(&sim));
    let worker = thread::spawn(move || engine.run(TEXT_START, 0, &[]));

    wait_for_state(&sim, RunState::Waiting);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(sim.run_state(), RunState::Waiting);

    sim.request_stop(StopReason::Stop);
    let outcome = worker.join().expect("engine thread");
    assert_eq!(outcome.reason, StopReason::Stop);
    assert_eq!(outcome.steps, 1);
    assert_eq!(sim.run_state(), RunState::Terminated);
}

#[test]
fn wfi_resumes_on_any_pending_interrupt() {
    let sim = load(vec![Op::Wait, Op::Exit(4)]);
    let engine = Engine::new(Arc::clone(&sim));
    let worker = thread::spawn(move || engine.run(TEXT_START, 0, &[]));

    wait_for_state(&sim, RunState::Waiting);
    sim.interrupts().raise_external(1);
    let outcome = worker.join().expect("engine thread");
    assert_eq!(outcome.reason, StopReason::NormalTermination);
    assert_eq!(outcome.exit_code, Some(4));
}

#[test]
fn interval_timer_interrupts_a_spinning_program() {
    let sim = vectored(vec![Op::JumpTo(MAIN)]);
    set_uie(&sim, 0x010);
    let timer = IntervalTimer::spawn(Arc::clone(sim.interrupts()), Duration::from_millis(1))
        .expect("timer thread");

    let outcome = Engine::new(Arc::clone(&sim)).run(MAIN, 0, &[]);
    let _ticks = timer.stop();

    assert_eq!(outcome.reason, StopReason::Breakpoint);
    let machine = sim.lock_machine();
    assert_eq!(machine.registers().get(Reg::A0), 4);
    assert_eq!(machine.csrs().read(UEPC), Ok(MAIN));
}

#[test]
fn wfi_returns_immediately_when_the_program_posted_usip() {
    let sim = load(vec![Op::PostSoftware, Op::Wait, Op::Exit(6)]);
    let engine = Engine::new(Arc::clone(&sim));
    let worker = thread::spawn(move || engine.run(TEXT_START, 0, &[]));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            sim.request_stop(StopReason::Stop);
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    let outcome = worker.join().expect("engine thread");
    assert_eq!(outcome.reason, StopReason::NormalTermination);
    assert_eq!(outcome.exit_code, Some(6));
    assert_eq!(outcome.steps, 2);
    assert_eq!(sim.lock_machine().csrs().uip(), 1);
}
