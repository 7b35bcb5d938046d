//! Lazy execution trace.
//!
//! [`Trace`] steps the CPU only when the next snapshot is requested. It
//! ends at a halt, a fault, or when the step budget is spent, and it
//! cannot be rewound: a consumed trace is gone.

use crate::alu::Flags;
use crate::cpu::decode::Instruction;
use crate::cpu::execute::{Cpu, RunResult};
use serde::{Serialize, Deserialize};

/// State after one retired instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Cycle count after this instruction retired.
    pub cycle: u64,
    /// Address of the instruction.
    pub pc: u32,
    /// Raw instruction word.
    pub word: u32,
    pub instruction: Instruction,
    /// Flags after write-back.
    pub flags: Flags,
    /// PC of the next instruction.
    pub next_pc: u32,
}

/// Iterator over per-cycle snapshots of a running CPU.
#[derive(Debug)]
pub struct Trace<'a> {
    cpu: &'a mut Cpu,
    remaining: u64,
    start: u64,
}

impl<'a> Trace<'a> {
    pub(crate) fn new(cpu: &'a mut Cpu, max_steps: u64) -> Self {
        let start = cpu.cycles;
        Self { cpu, remaining: max_steps, start }
    }

    /// Drain the rest of the trace and report how the run ended.
    pub fn finish(mut self) -> RunResult {
        self.by_ref().for_each(drop);
        self.cpu.outcome(self.start)
    }
}

impl Iterator for Trace<'_> {
    type Item = TraceEntry;

    fn next(&mut self) -> Option<TraceEntry> {
        if self.remaining == 0 || !self.cpu.is_running() {
            return None;
        }

        let instruction = self.cpu.step().ok()?;
        self.remaining -= 1;

        Some(TraceEntry {
            cycle: self.cpu.cycles,
            pc: self.cpu.last_pc(),
            word: self.cpu.last_word(),
            instruction,
            flags: self.cpu.flags,
            next_pc: self.cpu.pc,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::alu::AluOp;
    use crate::cpu::decode::encode;
    use crate::cpu::execute::HaltReason;
    use crate::{Cpu, Instruction};

    fn program() -> Vec<u32> {
        [
            Instruction::AluImm { op: AluOp::Add, rd: 1, rs1: 0, imm: 2 },
            Instruction::AluImm { op: AluOp::Add, rd: 1, rs1: 1, imm: 3 },
            Instruction::Halt,
        ]
        .iter()
        .map(encode)
        .collect()
    }

    #[test]
    fn test_trace_yields_each_cycle() {
        let mut cpu = Cpu::default();
        cpu.load_program(&program()).unwrap();

        let entries: Vec<_> = cpu.trace(100).collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].pc, 0);
        assert_eq!(entries[1].pc, 4);
        assert_eq!(entries[1].next_pc, 8);
        assert_eq!(entries[2].instruction, Instruction::Halt);
        assert_eq!(entries[2].cycle, 3);
        assert_eq!(cpu.regs.read(1).unwrap(), 5);
    }

    #[test]
    fn test_trace_is_lazy() {
        let mut cpu = Cpu::default();
        cpu.load_program(&program()).unwrap();

        let mut trace = cpu.trace(100);
        let first = trace.next().unwrap();
        assert_eq!(first.cycle, 1);
        drop(trace);
        assert_eq!(cpu.cycles, 1);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_trace_respects_budget() {
        let mut cpu = Cpu::default();
        cpu.load_program(&program()).unwrap();

        let mut trace = cpu.trace(2);
        assert!(trace.next().is_some());
        let result = trace.finish();
        assert_eq!(result.reason, HaltReason::StepBudgetExhausted);
        assert_eq!(result.steps, 2);
    }

    #[test]
    fn test_trace_stops_on_fault() {
        let mut cpu = Cpu::default();
        cpu.load_program(&[0xffff_ffff]).unwrap();

        let mut trace = cpu.trace(10);
        assert!(trace.next().is_none());
        let result = trace.finish();
        assert_eq!(result.reason, HaltReason::InvalidOpcode { opcode: 0x3f });
        assert_eq!(result.steps, 0);
    }
}
