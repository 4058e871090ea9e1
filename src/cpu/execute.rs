//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle, the privilege state machine,
//! the instruction-counting timer and the stack-based interrupt frames.
//!
//! Every memory access goes through [`Cpu::read`] or [`Cpu::write`], which
//! enforce the user/kernel boundary before anything reaches the port.

use crate::config::Config;
use crate::cpu::decode::{
    self, DecodeError, Opcode, KERNEL_BOUNDARY, MEMORY_SIZE, STACK_TOP, SYSCALL_VECTOR,
    TIMER_VECTOR,
};
use crate::cpu::memory::{MemoryPort, PortError};
use crate::cpu::random::XorShift;
use crate::cpu::registers::{Mode, Registers};
use serde::{Serialize, Deserialize};
use std::io::Write;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU executed `End`.
    Halted,
    /// CPU stopped on a fatal error.
    Faulted,
}

/// Why the CPU switched to kernel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    /// The timer expired while in user mode.
    Timer,
    /// The program executed `Int`.
    Syscall,
}

impl Interrupt {
    /// Handler address for this interrupt.
    pub const fn vector(self) -> i32 {
        match self {
            Interrupt::Timer => TIMER_VECTOR,
            Interrupt::Syscall => SYSCALL_VECTOR,
        }
    }
}

/// Record of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executed {
    /// Address the opcode was fetched from.
    pub pc: i32,
    pub opcode: Opcode,
    /// Operand word, for opcodes that take one.
    pub operand: Option<i32>,
    /// Kernel entry triggered during this cycle, if any.
    pub interrupt: Option<Interrupt>,
}

/// Serializable view of the CPU, for reports and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub registers: Registers,
    pub mode: Mode,
    pub timer: u32,
    pub timer_threshold: u32,
    pub cycles: u64,
    pub interrupts: u64,
    pub state: CpuState,
}

/// The CPU.
///
/// `M` is whatever backs the address space; `W` receives `PutPort` output.
pub struct Cpu<M: MemoryPort, W: Write> {
    /// CPU registers.
    pub regs: Registers,
    /// Current privilege level.
    pub mode: Mode,
    /// Instructions executed since the last timer interrupt.
    pub timer: u32,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    /// Number of timer interrupts taken.
    pub interrupts: u64,
    timer_threshold: u32,
    port: M,
    output: W,
    rng: XorShift,
    /// PC of the instruction currently executing (for fault reports).
    current_pc: i32,
    last: Option<Executed>,
}

impl<M: MemoryPort, W: Write> Cpu<M, W> {
    /// Create a CPU in its power-on state.
    pub fn new(port: M, output: W, config: &Config) -> Self {
        Self {
            regs: Registers::new(),
            mode: Mode::User,
            timer: 0,
            state: CpuState::Running,
            cycles: 0,
            interrupts: 0,
            timer_threshold: config.timer_threshold,
            port,
            output,
            rng: config.rng(),
            current_pc: 0,
            last: None,
        }
    }

    /// Execute a single instruction, then advance the timer.
    ///
    /// Any error is fatal: the CPU moves to [`CpuState::Faulted`] and the
    /// memory service is told to terminate.
    pub fn step(&mut self) -> Result<Executed, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        match self.cycle() {
            Ok(executed) => {
                self.last = Some(executed);
                Ok(executed)
            }
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    fn cycle(&mut self) -> Result<Executed, CpuError> {
        // Fetch
        let pc = self.regs.pc;
        self.current_pc = pc;
        let word = self.fetch()?;
        self.regs.ir = word;

        // Decode
        let opcode = decode::decode(word).map_err(|source| CpuError::Decode { pc, source })?;

        // Execute
        let (operand, mut interrupt) = self.execute(opcode)?;
        self.cycles += 1;
        trace!(pc, %opcode, ?operand, regs = %self.regs, mode = %self.mode, "executed");

        // The memory service is gone after `End`; nothing may follow it.
        if self.state == CpuState::Halted {
            return Ok(Executed { pc, opcode, operand, interrupt });
        }

        // Timer
        self.timer = self.timer.saturating_add(1);
        if self.mode == Mode::User && self.timer >= self.timer_threshold {
            self.timer = 0;
            self.interrupts += 1;
            self.enter_kernel(Interrupt::Timer)?;
            interrupt = Some(Interrupt::Timer);
        }

        Ok(Executed { pc, opcode, operand, interrupt })
    }

    /// Execute a decoded opcode.
    ///
    /// Returns the operand consumed (if any) and the interrupt raised (if any).
    fn execute(&mut self, opcode: Opcode) -> Result<(Option<i32>, Option<Interrupt>), CpuError> {
        let operand = if opcode.has_operand() {
            let word = self.fetch()?;
            self.regs.ir = word;
            Some(word)
        } else {
            None
        };
        let arg = operand.unwrap_or_default();
        let mut interrupt = None;

        match opcode {
            // ==================== Loads / Stores ====================

            Opcode::LoadValue => {
                self.regs.ac = arg;
            }

            Opcode::LoadAddr => {
                self.regs.ac = self.read(arg)?;
            }

            Opcode::LoadIndAddr => {
                let pointer = self.read(arg)?;
                self.regs.ac = self.read(pointer)?;
            }

            Opcode::LoadIdxX => {
                self.regs.ac = self.read(arg.wrapping_add(self.regs.x))?;
            }

            Opcode::LoadIdxY => {
                self.regs.ac = self.read(arg.wrapping_add(self.regs.y))?;
            }

            Opcode::LoadSpX => {
                self.regs.ac = self.read(self.regs.sp.wrapping_add(self.regs.x))?;
            }

            Opcode::StoreAddr => {
                self.write(arg, self.regs.ac)?;
            }

            // ==================== I/O ====================

            Opcode::Get => {
                self.regs.ac = self.rng.range_inclusive(1, 100);
            }

            Opcode::PutPort => {
                self.put(arg)?;
            }

            // ==================== Arithmetic / Moves ====================

            Opcode::AddX => self.regs.ac = self.regs.ac.wrapping_add(self.regs.x),
            Opcode::AddY => self.regs.ac = self.regs.ac.wrapping_add(self.regs.y),
            Opcode::SubX => self.regs.ac = self.regs.ac.wrapping_sub(self.regs.x),
            Opcode::SubY => self.regs.ac = self.regs.ac.wrapping_sub(self.regs.y),
            Opcode::CopyToX => self.regs.x = self.regs.ac,
            Opcode::CopyFromX => self.regs.ac = self.regs.x,
            Opcode::CopyToY => self.regs.y = self.regs.ac,
            Opcode::CopyFromY => self.regs.ac = self.regs.y,
            Opcode::CopyToSp => self.regs.sp = self.regs.ac,
            Opcode::CopyFromSp => self.regs.ac = self.regs.sp,

            // ==================== Control Flow ====================

            Opcode::JumpAddr => {
                self.regs.jump(arg);
            }

            Opcode::JumpIfEqualAddr => {
                if self.regs.ac == 0 {
                    self.regs.jump(arg);
                }
            }

            Opcode::JumpIfNotEqualAddr => {
                if self.regs.ac != 0 {
                    self.regs.jump(arg);
                }
            }

            Opcode::CallAddr => {
                self.push(self.regs.pc)?;
                self.regs.jump(arg);
            }

            Opcode::Ret => {
                let ret = self.pop()?;
                self.regs.jump(ret);
            }

            Opcode::IncX => self.regs.x = self.regs.x.wrapping_add(1),
            Opcode::DecX => self.regs.x = self.regs.x.wrapping_sub(1),

            Opcode::Push => {
                self.push(self.regs.ac)?;
            }

            Opcode::Pop => {
                self.regs.ac = self.pop()?;
            }

            // ==================== Privilege ====================

            Opcode::Int => {
                // Already in kernel mode: nothing to do.
                if self.mode == Mode::User {
                    self.enter_kernel(Interrupt::Syscall)?;
                    interrupt = Some(Interrupt::Syscall);
                }
            }

            Opcode::IRet => {
                self.return_from_interrupt()?;
            }

            Opcode::End => {
                self.port.terminate()?;
                self.state = CpuState::Halted;
                debug!(cycles = self.cycles + 1, "program ended");
            }
        }

        Ok((operand, interrupt))
    }

    /// Switch to kernel mode and save the user context on the kernel stack.
    ///
    /// The frame is, from the top of memory down: SP, PC, IR, AC, X, Y.
    fn enter_kernel(&mut self, cause: Interrupt) -> Result<(), CpuError> {
        debug!(?cause, regs = %self.regs, "entering kernel");
        self.mode = Mode::Kernel;

        let saved_sp = self.regs.sp;
        self.regs.sp = STACK_TOP;
        self.push(saved_sp)?;
        self.push(self.regs.pc)?;
        self.push(self.regs.ir)?;
        self.push(self.regs.ac)?;
        self.push(self.regs.x)?;
        self.push(self.regs.y)?;

        self.regs.jump(cause.vector());
        Ok(())
    }

    /// Restore the frame saved by [`Cpu::enter_kernel`] and drop to user mode.
    fn return_from_interrupt(&mut self) -> Result<(), CpuError> {
        self.regs.y = self.pop()?;
        self.regs.x = self.pop()?;
        self.regs.ac = self.pop()?;
        self.regs.ir = self.pop()?;
        self.regs.pc = self.pop()?;
        self.regs.sp = self.pop()?;
        self.mode = Mode::User;
        debug!(regs = %self.regs, "returned to user mode");
        Ok(())
    }

    /// Write AC to an output port: 1 prints it as a number, 2 as a character.
    fn put(&mut self, port: i32) -> Result<(), CpuError> {
        let ac = self.regs.ac;
        let written = match port {
            1 => write!(self.output, "{}", ac),
            2 => {
                let ch = u32::try_from(ac)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                write!(self.output, "{}", ch)
            }
            other => {
                warn!(port = other, pc = self.current_pc, "ignoring write to unknown port");
                return Ok(());
            }
        };
        written
            .and_then(|()| self.output.flush())
            .map_err(|e| CpuError::Output(e.to_string()))
    }

    /// Read the word at PC and advance PC.
    fn fetch(&mut self) -> Result<i32, CpuError> {
        let pc = self.regs.advance_pc();
        self.read(pc)
    }

    fn push(&mut self, value: i32) -> Result<(), CpuError> {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write(self.regs.sp, value)
    }

    fn pop(&mut self) -> Result<i32, CpuError> {
        let value = self.read(self.regs.sp)?;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        Ok(value)
    }

    /// Read through the port after the protection check.
    fn read(&mut self, addr: i32) -> Result<i32, CpuError> {
        self.check_access(addr)?;
        Ok(self.port.read(addr)?)
    }

    /// Write through the port after the protection check.
    fn write(&mut self, addr: i32, value: i32) -> Result<(), CpuError> {
        self.check_access(addr)?;
        Ok(self.port.write(addr, value)?)
    }

    /// User mode may only touch `0..KERNEL_BOUNDARY`; kernel mode anything in memory.
    fn check_access(&self, addr: i32) -> Result<(), CpuError> {
        let pc = self.current_pc;
        if !self.mode.is_kernel() && addr >= KERNEL_BOUNDARY {
            return Err(CpuError::ProtectionFault { addr, pc });
        }
        if !(0..MEMORY_SIZE).contains(&addr) {
            return Err(CpuError::AddressOutOfRange { addr, pc });
        }
        Ok(())
    }

    fn fault(&mut self, error: &CpuError) {
        debug!(%error, regs = %self.regs, mode = %self.mode, "CPU fault");
        self.state = CpuState::Faulted;
        if let Err(e) = self.port.terminate() {
            debug!(error = %e, "could not signal memory service");
        }
    }

    /// Capture the architectural state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            registers: self.regs,
            mode: self.mode,
            timer: self.timer,
            timer_threshold: self.timer_threshold,
            cycles: self.cycles,
            interrupts: self.interrupts,
            state: self.state,
        }
    }

    /// The configured timer threshold.
    pub fn timer_threshold(&self) -> u32 {
        self.timer_threshold
    }

    /// The memory port.
    pub fn port(&self) -> &M {
        &self.port
    }

    #[cfg(test)]
    fn port_mut(&mut self) -> &mut M {
        &mut self.port
    }

    /// Stop a running CPU before it reaches `End` and tell the memory
    /// service to shut down. Does nothing once the CPU has stopped.
    pub fn terminate(&mut self) -> Result<(), CpuError> {
        if self.state != CpuState::Running {
            return Ok(());
        }
        debug!(cycles = self.cycles, "terminated early");
        self.state = CpuState::Halted;
        Ok(self.port.terminate()?)
    }

    /// The output sink.
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Take the CPU apart, returning its port and output sink.
    pub fn into_parts(self) -> (M, W) {
        (self.port, self.output)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Executed> {
        self.last
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl<M: MemoryPort, W: Write> std::fmt::Debug for Cpu<M, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("cycles", &self.cycles)
            .field("timer", &self.timer)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution. All of them end the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory violation: user mode access to system address {addr} (PC={pc})")]
    ProtectionFault { addr: i32, pc: i32 },

    #[error("memory address {addr} out of range (PC={pc})")]
    AddressOutOfRange { addr: i32, pc: i32 },

    #[error("decode error at PC={pc}: {source}")]
    Decode { pc: i32, source: DecodeError },

    #[error("memory port error: {0}")]
    Port(#[from] PortError),

    #[error("output error: {0}")]
    Output(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::memory::Memory;
    use proptest::prelude::*;

    type TestCpu = Cpu<Memory, Vec<u8>>;

    fn make_cpu(threshold: i64) -> TestCpu {
        let config = Config::new(threshold).unwrap().with_seed(1);
        Cpu::new(Memory::new(), Vec::new(), &config)
    }

    fn with_program(threshold: i64, start: i32, words: &[i32]) -> TestCpu {
        let mut cpu = make_cpu(threshold);
        cpu.port_mut().load(start, words).unwrap();
        cpu
    }

    fn output(cpu: &TestCpu) -> String {
        String::from_utf8(cpu.output().clone()).unwrap()
    }

    fn op(opcode: Opcode) -> i32 {
        opcode.code()
    }

    #[test]
    fn test_load_put_end() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 5, op(Opcode::PutPort), 1, op(Opcode::End),
        ]);

        let executed = cpu.run().unwrap();

        assert_eq!(executed, 3);
        assert!(cpu.is_halted());
        assert_eq!(output(&cpu), "5");
    }

    #[test]
    fn test_put_characters() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 72, op(Opcode::PutPort), 2,
            op(Opcode::LoadValue), 105, op(Opcode::PutPort), 2,
            op(Opcode::LoadValue), 10, op(Opcode::PutPort), 1,
            op(Opcode::PutPort), 7,
            op(Opcode::End),
        ]);

        cpu.run().unwrap();

        assert_eq!(output(&cpu), "Hi10");
    }

    #[test]
    fn test_pc_advances_by_words_consumed() {
        let straight_line = Opcode::ALL.into_iter().filter(|op| {
            !matches!(
                op,
                Opcode::JumpAddr
                    | Opcode::JumpIfEqualAddr
                    | Opcode::JumpIfNotEqualAddr
                    | Opcode::CallAddr
                    | Opcode::Ret
                    | Opcode::Int
                    | Opcode::IRet
                    | Opcode::End
            )
        });

        for opcode in straight_line {
            let mut cpu = with_program(1000, 100, &[opcode.code(), 10]);
            cpu.regs.pc = 100;
            cpu.regs.sp = 900;

            let executed = cpu.step().unwrap();

            assert_eq!(cpu.regs.pc, 101 + opcode.operand_words(), "{}", opcode);
            assert_eq!(executed.operand.is_some(), opcode.has_operand(), "{}", opcode);
        }
    }

    #[test]
    fn test_loads() {
        let mut cpu = make_cpu(1000);
        let mem = cpu.port_mut();
        mem.load(0, &[
            op(Opcode::LoadAddr), 500,
            op(Opcode::LoadIndAddr), 501,
            op(Opcode::LoadIdxX), 500,
            op(Opcode::LoadIdxY), 500,
            op(Opcode::LoadSpX),
        ]).unwrap();
        mem.load(500, &[11, 503, 33, 44]).unwrap();
        mem.set(995, 77).unwrap();

        cpu.regs.x = 2;
        cpu.regs.y = 3;
        cpu.regs.sp = 993;

        cpu.step().unwrap();
        assert_eq!(cpu.regs.ac, 11);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.ac, 44);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.ac, 33);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.ac, 44);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.ac, 77);
    }

    #[test]
    fn test_store() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), -9, op(Opcode::StoreAddr), 700, op(Opcode::End),
        ]);
        cpu.run().unwrap();
        assert_eq!(cpu.port().get(700).unwrap(), -9);
    }

    #[test]
    fn test_register_moves_and_arithmetic() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 10,
            op(Opcode::CopyToX),
            op(Opcode::LoadValue), 3,
            op(Opcode::CopyToY),
            op(Opcode::AddX),     // 13
            op(Opcode::AddY),     // 16
            op(Opcode::SubX),     // 6
            op(Opcode::IncX),     // X = 11
            op(Opcode::SubX),     // -5
            op(Opcode::DecX),
            op(Opcode::DecX),     // X = 9
            op(Opcode::SubY),     // -8
            op(Opcode::End),
        ]);

        cpu.run().unwrap();

        assert_eq!(cpu.regs.ac, -8);
        assert_eq!(cpu.regs.x, 9);
        assert_eq!(cpu.regs.y, 3);
    }

    #[test]
    fn test_sp_moves() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 800,
            op(Opcode::CopyToSp),
            op(Opcode::LoadValue), 0,
            op(Opcode::CopyFromSp),
            op(Opcode::End),
        ]);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.sp, 800);
        assert_eq!(cpu.regs.ac, 800);
    }

    #[test]
    fn test_arithmetic_wraps() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::AddX), op(Opcode::End)]);
        cpu.regs.ac = i32::MAX;
        cpu.regs.x = 1;
        cpu.run().unwrap();
        assert_eq!(cpu.regs.ac, i32::MIN);
    }

    #[test]
    fn test_jump_if_equal() {
        // AC == 0: jump taken
        let mut cpu = with_program(1000, 0, &[op(Opcode::JumpIfEqualAddr), 50]);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 50);

        // AC != 0: fall through
        let mut cpu = with_program(1000, 0, &[op(Opcode::JumpIfEqualAddr), 50]);
        cpu.regs.ac = 4;
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 2);
    }

    #[test]
    fn test_jump_if_not_equal() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::JumpIfNotEqualAddr), 50]);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 2);

        let mut cpu = with_program(1000, 0, &[op(Opcode::JumpIfNotEqualAddr), 50]);
        cpu.regs.ac = -1;
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 50);
    }

    #[test]
    fn test_call_and_return() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::CallAddr), 10, op(Opcode::End)]);
        cpu.port_mut().set(10, op(Opcode::Ret)).unwrap();

        // CallAddr
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 10);
        assert_eq!(cpu.regs.sp, 999);
        assert_eq!(cpu.port().get(999).unwrap(), 2);

        // Ret
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 2);
        assert_eq!(cpu.regs.sp, 1000);

        // End
        cpu.step().unwrap();
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 3);
    }

    #[test]
    fn test_push_pop_opcodes() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 1, op(Opcode::Push),
            op(Opcode::LoadValue), 2, op(Opcode::Push),
            op(Opcode::Pop), op(Opcode::CopyToX),
            op(Opcode::Pop),
            op(Opcode::End),
        ]);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.x, 2);
        assert_eq!(cpu.regs.ac, 1);
        assert_eq!(cpu.regs.sp, 1000);
    }

    #[test]
    fn test_get_is_in_range() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::Get); 50]);
        for _ in 0..50 {
            cpu.step().unwrap();
            assert!((1..=100).contains(&cpu.regs.ac));
        }
    }

    #[test]
    fn test_get_is_seeded() {
        let mut a = with_program(1000, 0, &[op(Opcode::Get)]);
        let mut b = with_program(1000, 0, &[op(Opcode::Get)]);
        a.step().unwrap();
        b.step().unwrap();
        assert_eq!(a.regs.ac, b.regs.ac);
    }

    #[test]
    fn test_user_store_to_kernel_faults() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 7, op(Opcode::StoreAddr), 1000, op(Opcode::End),
        ]);

        let err = cpu.run().unwrap_err();

        assert_eq!(err, CpuError::ProtectionFault { addr: 1000, pc: 2 });
        assert_eq!(cpu.state, CpuState::Faulted);
        assert_eq!(cpu.port().get(1000).unwrap(), 0);
    }

    #[test]
    fn test_user_fetch_from_kernel_faults() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::JumpAddr), 1200]);
        cpu.step().unwrap();
        assert!(matches!(cpu.step(), Err(CpuError::ProtectionFault { addr: 1200, .. })));
    }

    #[test]
    fn test_out_of_range_address() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::LoadIdxX), 10]);
        cpu.regs.x = -20;
        assert_eq!(cpu.step(), Err(CpuError::AddressOutOfRange { addr: -10, pc: 0 }));
    }

    #[test]
    fn test_invalid_opcode() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::LoadValue), 1, 42]);

        cpu.step().unwrap();
        let err = cpu.step().unwrap_err();

        assert_eq!(err, CpuError::Decode { pc: 2, source: DecodeError::InvalidOpcode(42) });
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_step_after_halt() {
        let mut cpu = with_program(1000, 0, &[op(Opcode::End)]);
        cpu.run().unwrap();
        assert_eq!(cpu.step(), Err(CpuError::NotRunning(CpuState::Halted)));
    }

    #[test]
    fn test_run_limited() {
        // Tight infinite loop
        let mut cpu = with_program(1000, 0, &[op(Opcode::JumpAddr), 0]);
        assert_eq!(cpu.run_limited(25).unwrap(), 25);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_timer_interrupt_saves_frame() {
        let mut cpu = with_program(3, 0, &[op(Opcode::IncX); 4]);
        cpu.port_mut().set(TIMER_VECTOR, op(Opcode::IRet)).unwrap();
        cpu.regs.ac = 8;
        cpu.regs.y = 6;

        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.mode, Mode::User);
        let executed = cpu.step().unwrap();

        assert_eq!(executed.interrupt, Some(Interrupt::Timer));
        assert_eq!(cpu.mode, Mode::Kernel);
        assert_eq!(cpu.regs.pc, TIMER_VECTOR);
        assert_eq!(cpu.regs.sp, 1994);
        assert_eq!(cpu.timer, 0);
        assert_eq!(cpu.interrupts, 1);
        let frame: Vec<i32> = cpu.port().dump(1994, 6).into_iter().map(|(_, v)| v).collect();
        // Y, X, AC, IR, PC, SP
        assert_eq!(frame, vec![6, 3, 8, op(Opcode::IncX), 3, 1000]);

        // IRet
        cpu.step().unwrap();
        assert_eq!(cpu.mode, Mode::User);
        assert_eq!(cpu.regs.pc, 3);
        assert_eq!(cpu.regs.sp, 1000);
        assert_eq!(cpu.regs.x, 3);
    }

    #[test]
    fn test_timer_fires_every_threshold_instructions() {
        let mut cpu = with_program(5, 0, &[op(Opcode::JumpAddr), 0]);
        // Timer handler: return immediately.
        cpu.port_mut().set(TIMER_VECTOR, op(Opcode::IRet)).unwrap();

        let mut user_steps = 0;
        let mut fired_at = Vec::new();
        for _ in 0..30 {
            let was_user = cpu.mode == Mode::User;
            let executed = cpu.step().unwrap();
            if was_user {
                user_steps += 1;
            }
            if executed.interrupt == Some(Interrupt::Timer) {
                fired_at.push(user_steps);
            }
        }

        // Five timer ticks per firing, one of which is the handler's IRet.
        assert_eq!(fired_at, vec![5, 9, 13, 17, 21, 25]);
    }

    #[test]
    fn test_timer_deferred_in_kernel() {
        let mut cpu = with_program(2, 0, &[op(Opcode::IncX); 4]);
        cpu.port_mut().load(TIMER_VECTOR, &[
            op(Opcode::LoadValue), 1,
            op(Opcode::LoadValue), 2,
            op(Opcode::LoadValue), 3,
            op(Opcode::IRet),
        ]).unwrap();

        cpu.step().unwrap();
        assert_eq!(cpu.step().unwrap().interrupt, Some(Interrupt::Timer));

        // Three kernel instructions: timer passes the threshold, nothing fires.
        for _ in 0..3 {
            assert_eq!(cpu.step().unwrap().interrupt, None);
            assert_eq!(cpu.mode, Mode::Kernel);
        }
        assert_eq!(cpu.timer, 3);

        // The deferred interrupt is taken as soon as IRet drops to user mode.
        let executed = cpu.step().unwrap();
        assert_eq!(executed.opcode, Opcode::IRet);
        assert_eq!(executed.interrupt, Some(Interrupt::Timer));
        assert_eq!(cpu.mode, Mode::Kernel);
        assert_eq!(cpu.port().get(1998).unwrap(), 2);
    }

    #[test]
    fn test_syscall() {
        let mut cpu = with_program(1000, 0, &[
            op(Opcode::LoadValue), 9, op(Opcode::Int), op(Opcode::End),
        ]);
        cpu.port_mut().load(SYSCALL_VECTOR, &[op(Opcode::Int), op(Opcode::IRet)]).unwrap();

        cpu.step().unwrap();
        let executed = cpu.step().unwrap();
        assert_eq!(executed.interrupt, Some(Interrupt::Syscall));
        assert_eq!(cpu.mode, Mode::Kernel);
        assert_eq!(cpu.regs.pc, SYSCALL_VECTOR);

        // Int in kernel mode is a no-op
        let executed = cpu.step().unwrap();
        assert_eq!(executed.interrupt, None);
        assert_eq!(cpu.regs.pc, SYSCALL_VECTOR + 1);
        assert_eq!(cpu.regs.sp, 1994);

        // IRet, End
        cpu.run().unwrap();
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.ac, 9);
        assert_eq!(cpu.mode, Mode::User);
    }

    #[test]
    fn test_kernel_reads_anywhere() {
        let mut cpu = with_program(1000, SYSCALL_VECTOR, &[
            op(Opcode::LoadAddr), 1999, op(Opcode::StoreAddr), 1001,
        ]);
        cpu.port_mut().set(1999, 31).unwrap();
        cpu.mode = Mode::Kernel;
        cpu.regs.pc = SYSCALL_VECTOR;

        cpu.step().unwrap();
        cpu.step().unwrap();

        assert_eq!(cpu.port().get(1001).unwrap(), 31);
    }

    #[test]
    fn test_no_timer_after_end() {
        let mut cpu = with_program(1, 0, &[op(Opcode::End)]);
        let executed = cpu.step().unwrap();
        assert_eq!(executed.interrupt, None);
        assert_eq!(cpu.mode, Mode::User);
        assert_eq!(cpu.port().get(1999).unwrap(), 0);
    }

    #[test]
    fn test_snapshot_json() {
        let cpu = make_cpu(7);
        let json = serde_json::to_value(cpu.snapshot()).unwrap();
        assert_eq!(json["timer_threshold"], 7);
        assert_eq!(json["mode"], "User");
        assert_eq!(json["registers"]["sp"], 1000);
    }

    proptest! {
        #[test]
        fn prop_push_pop_inverse(
            values in prop::collection::vec(any::<i32>(), 1..20),
            sp in 100i32..=1000,
        ) {
            let mut cpu = make_cpu(1000);
            cpu.regs.sp = sp;

            for &v in &values {
                cpu.push(v).unwrap();
            }
            prop_assert_eq!(cpu.regs.sp, sp - values.len() as i32);

            for &v in values.iter().rev() {
                prop_assert_eq!(cpu.pop().unwrap(), v);
            }
            prop_assert_eq!(cpu.regs.sp, sp);
        }

        #[test]
        fn prop_kernel_round_trip(
            pc in 0i32..1000,
            sp in 0i32..=1000,
            ir in any::<i32>(),
            ac in any::<i32>(),
            x in any::<i32>(),
            y in any::<i32>(),
        ) {
            let mut cpu = make_cpu(1000);
            cpu.port_mut().set(SYSCALL_VECTOR, op(Opcode::IRet)).unwrap();
            let before = Registers { pc, sp, ir, ac, x, y };
            cpu.regs = before;

            cpu.enter_kernel(Interrupt::Syscall).unwrap();
            prop_assert_eq!(cpu.mode, Mode::Kernel);
            cpu.step().unwrap();

            prop_assert_eq!(cpu.regs, before);
            prop_assert_eq!(cpu.mode, Mode::User);
        }

        #[test]
        fn prop_protection_boundary(addr in 1000i32..2000, value in any::<i32>()) {
            let mut cpu = make_cpu(1000);
            prop_assert!(
                matches!(cpu.read(addr), Err(CpuError::ProtectionFault { .. })),
                "user read of {} allowed", addr
            );
            prop_assert!(
                matches!(cpu.write(addr, value), Err(CpuError::ProtectionFault { .. })),
                "user write of {} allowed", addr
            );
            prop_assert_eq!(cpu.port().get(addr).unwrap(), 0);

            cpu.mode = Mode::Kernel;
            cpu.write(addr, value).unwrap();
            prop_assert_eq!(cpu.read(addr).unwrap(), value);
        }
    }
}
