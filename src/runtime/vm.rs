use crate::bytecode::instruction::{Instruction, Src};
use crate::bytecode::op::REGISTER_COUNT;
use crate::lang::arith;
use crate::runtime::runtime_error::VmError;
use std::fmt::{self, Write};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub max_steps: Option<usize>,
    pub max_call_depth: usize,
    /// Record a [`TraceEvent`] per executed instruction.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_steps: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Halted,
}

/// An entered loop: the register it tests and the offset of its WHILE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopContext {
    pub reg: u8,
    pub start: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    return_pc: usize,
    /// Loop stack height at the call; RETURN drops loops entered since.
    loop_depth: usize,
}

/// One executed instruction and the register file after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub step: usize,
    pub pc: usize,
    pub instruction: Instruction,
    pub registers: [i64; REGISTER_COUNT],
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6}  {:04}  {:<24}", self.step, self.pc, self.instruction.to_string())?;
        for (i, value) in self.registers.iter().enumerate() {
            write!(f, " r{}={}", i, value)?;
        }
        Ok(())
    }
}

/// Observable result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub output: Vec<i64>,
    pub registers: [i64; REGISTER_COUNT],
    pub steps: usize,
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in &self.output {
            writeln!(f, "{}", value)?;
        }
        Ok(())
    }
}

/// The register machine.
pub struct Vm {
    registers: [i64; REGISTER_COUNT],
    call_stack: Vec<Frame>,
    loops: Vec<LoopContext>,
    output: Vec<i64>,
    pc: usize,
    state: VmState,
    steps: usize,
    config: VmConfig,
    trace: Vec<TraceEvent>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            call_stack: Vec::new(),
            loops: Vec::new(),
            output: Vec::new(),
            pc: 0,
            state: VmState::Halted,
            steps: 0,
            config,
            trace: Vec::new(),
        }
    }

    pub fn registers(&self) -> &[i64; REGISTER_COUNT] {
        &self.registers
    }

    pub fn output(&self) -> &[i64] {
        &self.output
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    pub fn loops(&self) -> &[LoopContext] {
        &self.loops
    }

    pub fn reset_execution_state(&mut self) {
        self.registers = [0; REGISTER_COUNT];
        self.call_stack.clear();
        self.loops.clear();
        self.output.clear();
        self.trace.clear();
        self.pc = 0;
        self.steps = 0;
        self.state = VmState::Running;
    }

    /// Run `code` from offset 0 until FUNC_END, a RETURN with an empty
    /// call stack, or the pc leaving the code.
    ///
    /// # Errors
    ///
    /// Undecodable instructions and exceeded limits. The machine keeps its
    /// state after an error so it can be inspected with [`show_state`].
    ///
    /// [`show_state`]: Vm::show_state
    pub fn run(&mut self, code: &[u8]) -> Result<Execution, VmError> {
        self.reset_execution_state();

        while self.state == VmState::Running && self.pc < code.len() {
            self.step(code)?;
        }
        self.state = VmState::Halted;

        Ok(Execution {
            output: self.output.clone(),
            registers: self.registers,
            steps: self.steps,
        })
    }

    fn check_limits(&mut self) -> Result<(), VmError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(VmError::StepLimitExceeded { limit: max });
            }
        }
        Ok(())
    }

    /// Execute the single instruction at the pc.
    pub fn step(&mut self, code: &[u8]) -> Result<(), VmError> {
        self.check_limits()?;

        let at = self.pc;
        let instruction = Instruction::decode(code, at)?;
        self.pc = at + instruction.width();

        match instruction {
            Instruction::Mov { dst, value } => self.set(dst, value as i64),
            Instruction::Add { dst, a, b } => {
                let v = arith::add(self.value(a), self.value(b));
                self.set(dst, v);
            }
            Instruction::Sub { dst, a, b } => {
                let v = arith::sub(self.value(a), self.value(b));
                self.set(dst, v);
            }
            Instruction::Mul { dst, a, b } => {
                let v = arith::mul(self.value(a), self.value(b));
                self.set(dst, v);
            }
            Instruction::Div { dst, a, b } => {
                let v = arith::floor_div(self.value(a), self.value(b));
                self.set(dst, v);
            }
            Instruction::Out { reg } => self.output.push(self.get(reg)),
            Instruction::Call { addr } => {
                if self.call_stack.len() >= self.config.max_call_depth {
                    return Err(VmError::CallDepthExceeded {
                        limit: self.config.max_call_depth,
                        pc: at,
                    });
                }
                self.call_stack.push(Frame {
                    return_pc: self.pc,
                    loop_depth: self.loops.len(),
                });
                self.pc = addr as usize;
            }
            Instruction::Return => match self.call_stack.pop() {
                Some(frame) => {
                    self.pc = frame.return_pc;
                    self.loops.truncate(frame.loop_depth);
                }
                None => {
                    self.pc = code.len();
                    self.state = VmState::Halted;
                }
            },
            Instruction::If { reg, skip } => {
                if self.get(reg) == 0 {
                    self.pc += skip as usize;
                }
            }
            Instruction::Else { skip } => self.pc += skip as usize,
            Instruction::EndIf => {}
            Instruction::While { reg, skip } => {
                if self.get(reg) == 0 {
                    self.pc += skip as usize;
                } else {
                    self.loops.push(LoopContext { reg, start: at });
                }
            }
            Instruction::EndWhile => {
                // WHILE re-tests and pushes again on the way back in.
                if let Some(ctx) = self.loops.pop() {
                    if self.get(ctx.reg) != 0 {
                        self.pc = ctx.start;
                    }
                }
            }
            Instruction::FuncEnd => self.state = VmState::Halted,
        }

        if self.config.trace {
            self.trace.push(TraceEvent {
                step: self.steps,
                pc: at,
                instruction,
                registers: self.registers,
            });
        }
        Ok(())
    }

    // Registers were validated when the instruction was decoded.
    fn get(&self, reg: u8) -> i64 {
        self.registers[reg as usize]
    }

    fn set(&mut self, reg: u8, value: i64) {
        self.registers[reg as usize] = value;
    }

    fn value(&self, src: Src) -> i64 {
        match src {
            Src::Reg(r) => self.get(r),
            Src::Imm(v) => v as i64,
        }
    }

    /// Registers, call stack, loop stack and output as text.
    pub fn show_state(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== VM STATE ===");
        let _ = writeln!(
            out,
            "pc: {:04}  state: {:?}  steps: {}",
            self.pc, self.state, self.steps
        );

        let _ = writeln!(out, "registers:");
        for (i, value) in self.registers.iter().enumerate() {
            let _ = writeln!(out, "  r{} = {}", i, value);
        }

        if self.call_stack.is_empty() {
            let _ = writeln!(out, "call stack: (empty)");
        } else {
            let _ = writeln!(out, "call stack:");
            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                let _ = writeln!(out, "  {}: return to {:04}", i, frame.return_pc);
            }
        }

        if !self.loops.is_empty() {
            let _ = writeln!(out, "loops:");
            for ctx in self.loops.iter().rev() {
                let _ = writeln!(out, "  WHILE @{:04} on r{}", ctx.start, ctx.reg);
            }
        }

        let _ = writeln!(out, "output: {:?}", self.output);
        out
    }
}
