//! Throughput harness for the retrace-core execution loop.
//!
//! ## Usage
//!
//! ```sh
//! cargo run -p retrace-core --example performance_harness
//! ```
//!
//! ## Metrics
//!
//! - Instructions per second, with and without backstep history
//! - Undo entries recorded per second
//!
//! Each workload runs on several threads, one simulation per thread, in
//! batches of [`BATCH_STEPS`] instructions at unlimited speed.

#![allow(clippy::pedantic)]

use retrace_core::{
    Engine, EngineConfig, Execution, Instruction, MachineState, Reg, Simulation, Statement,
    StopReason, DATA_START, TEXT_START,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

const BATCH_STEPS: u64 = 10_000;
const NUM_THREADS: usize = 4;

#[derive(Debug, Clone, Copy)]
enum Op {
    Nop,
    AddImmediate(u32),
    StoreCounter,
    LoopBack,
}

impl Instruction for Op {
    fn execute(&self, machine: &mut MachineState) -> Execution {
        match *self {
            Self::Nop => {}
            Self::AddImmediate(imm) => {
                let value = machine.register(Reg::A0).wrapping_add(imm);
                machine.set_register(Reg::A0, value);
            }
            Self::StoreCounter => {
                let value = machine.register(Reg::A0);
                if let Err(fault) = machine.set_word(DATA_START, value) {
                    return Execution::Trap(fault.into());
                }
            }
            Self::LoopBack => machine.set_pc(TEXT_START),
        }
        Execution::Continue
    }
}

#[derive(Debug, Clone, Copy)]
struct BenchmarkResult {
    name: &'static str,
    backstep: bool,
    instructions_per_second: f64,
    undo_entries_per_second: f64,
}

fn run_workload(
    name: &'static str,
    program: &[Op],
    backstep: bool,
    duration: Duration,
) -> BenchmarkResult {
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let tx = tx.clone();
            let program = program.to_vec();
            thread::spawn(move || {
                let sim = Arc::new(Simulation::new(EngineConfig {
                    backstep_enabled: backstep,
                    ..EngineConfig::default()
                }));
                let statements: Vec<Statement> = program
                    .into_iter()
                    .map(|op| Arc::new(op) as Statement)
                    .collect();
                if sim.load_program(TEXT_START, statements).is_err() {
                    return;
                }
                let engine = Engine::new(Arc::clone(&sim));

                let mut total_instructions = 0u64;
                let start = Instant::now();
                while start.elapsed() < duration {
                    let outcome = engine.run(sim.pc(), BATCH_STEPS, &[]);
                    total_instructions += outcome.steps;
                    if outcome.reason != StopReason::MaxSteps {
                        break;
                    }
                }

                tx.send((total_instructions, sim.undo_log().pushes())).ok();
            })
        })
        .collect();

    for h in handles {
        h.join().ok();
    }

    drop(tx);

    let mut total_instructions = 0u64;
    let mut total_entries = 0u64;
    for (inst, entries) in rx {
        total_instructions += inst;
        total_entries += entries;
    }

    let elapsed_secs = duration.as_secs_f64();
    BenchmarkResult {
        name,
        backstep,
        instructions_per_second: total_instructions as f64 / elapsed_secs,
        undo_entries_per_second: total_entries as f64 / elapsed_secs,
    }
}

fn format_number(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{:.2}", n)
    }
}

fn print_results(results: &[BenchmarkResult]) {
    println!();
    println!("retrace-core performance harness");
    println!("  threads: {NUM_THREADS}, batch: {BATCH_STEPS} steps");
    println!();
    println!(
        "{:14} {:>9} {:>14} {:>14}",
        "workload", "backstep", "instr/sec", "undo/sec"
    );
    for result in results {
        println!(
            "{:14} {:>9} {:>14} {:>14}",
            result.name,
            if result.backstep { "on" } else { "off" },
            format_number(result.instructions_per_second),
            format_number(result.undo_entries_per_second),
        );
    }
    println!();
}

fn main() {
    let duration = Duration::from_secs(2);
    let workloads: [(&'static str, Vec<Op>); 3] = [
        ("nop_loop", vec![Op::Nop, Op::Nop, Op::Nop, Op::LoopBack]),
        (
            "register_loop",
            vec![
                Op::AddImmediate(1),
                Op::AddImmediate(3),
                Op::AddImmediate(5),
                Op::LoopBack,
            ],
        ),
        (
            "memory_loop",
            vec![Op::AddImmediate(1), Op::StoreCounter, Op::LoopBack],
        ),
    ];

    let mut results = Vec::new();
    for (name, program) in &workloads {
        for backstep in [false, true] {
            results.push(run_workload(name, program, backstep, duration));
        }
    }
    print_results(&results);
}
