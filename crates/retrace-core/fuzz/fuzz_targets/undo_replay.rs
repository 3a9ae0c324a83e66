#![no_main]

use libfuzzer_sys::fuzz_target;
use retrace_core::{FReg, MachineState, Memory, Reg, UndoLog, DATA_START, TEXT_START};
use std::sync::Arc;

const SCRATCH_WORDS: u32 = 8;

fn fingerprint(machine: &MachineState) -> Vec<u64> {
    let mut out: Vec<u64> = (0..32_u32)
        .filter_map(Reg::new)
        .map(|reg| u64::from(machine.registers().get(reg)))
        .collect();
    out.extend(
        (0..32_u32)
            .filter_map(FReg::new)
            .map(|reg| machine.floats().get(reg)),
    );
    out.extend((0..SCRATCH_WORDS).map(|slot| {
        machine
            .memory()
            .word(DATA_START + slot * 4)
            .map_or(u64::MAX, u64::from)
    }));
    out.push(u64::from(machine.pc()));
    out
}

fuzz_target!(|data: &[u8]| {
    let undo = Arc::new(UndoLog::new(usize::MAX, true));
    let mut machine = MachineState::new(Memory::new(false), Arc::clone(&undo));
    machine.set_pc_backdoor(TEXT_START);
    let initial = fingerprint(&machine);

    for chunk in data.chunks_exact(6) {
        let selector = chunk[0] % 5;
        let index = u32::from(chunk[1] % 32);
        let value = u32::from_le_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
        let addr = DATA_START + (u32::from(chunk[1]) % (SCRATCH_WORDS * 4));
        match selector {
            0 => {
                if let Some(reg) = Reg::new(index) {
                    machine.set_register(reg, value);
                }
            }
            1 => {
                if let Some(reg) = FReg::new(index) {
                    machine.set_float_register(reg, u64::from(value) << 7);
                }
            }
            2 => {
                let _ = machine.set_word(addr & !3, value);
            }
            3 => {
                let _ = machine.set_byte(addr, chunk[2]);
            }
            _ => {
                machine.set_pc(TEXT_START + (value & 0xFF) * 4);
            }
        }
    }

    while undo.back_step(&mut machine).is_ok_and(|replayed| replayed > 0) {}
    assert_eq!(fingerprint(&machine), initial);
});
