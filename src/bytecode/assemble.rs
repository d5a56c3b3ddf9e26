//! Two-pass assembler from linear IR to register bytecode.
//!
//! The program image is main code ending in `FUNC_END`, followed by every
//! function body ending in `RETURN`. Function bodies are lowered before
//! main so their registers can be reserved; the layout pass measures every
//! piece, the emission pass writes each at its final address and then
//! patches jump distances and forward calls.

use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::context::{CompilationContext, PatchKind};
use crate::bytecode::instruction::{Instruction, MAX_SOURCE_IMMEDIATE, Src};
use crate::bytecode::op::{MAX_ADDRESS, Opcode};
use crate::bytecode::program::Program;
use crate::ir::instr::IrInstr;
use crate::ir::operand::{Number, Operand};
use crate::ir::verify::{StructureError, check_balance};
use crate::lang::node::{BinaryOp, LogicalOp, UnaryOp};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Binding that carries a function's return value back to the caller.
pub const RETURN_BINDING: &str = "$ret";

/// Base used to build constants that do not fit a single `MOV`.
const CONST_RADIX: i64 = MAX_SOURCE_IMMEDIATE as i64;

/// Assemble IR into a program.
///
/// # Errors
///
/// Unbalanced IR, register exhaustion, operands with no runtime form,
/// calls to undefined functions or with the wrong arity, and jumps or
/// addresses that do not fit in one byte.
pub fn assemble(instrs: &[IrInstr]) -> Result<Program, AssembleError> {
    check_balance(instrs)?;
    let (main, functions) = split(instrs);
    let signatures = signatures(&functions)?;
    check_recursion(&functions)?;

    let layout = layout(&main, &functions, &signatures)?;
    emit(&main, &functions, &signatures, &layout)
}

struct FunctionDef<'a> {
    name: &'a str,
    params: &'a [String],
    body: Vec<&'a IrInstr>,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    len: usize,
}

/// Byte layout measured by the first pass.
#[derive(Debug)]
struct Layout {
    main_len: usize,
    functions: Vec<Span>,
    labels: HashMap<String, usize>,
}

fn layout(
    main: &[&IrInstr],
    functions: &[FunctionDef<'_>],
    signatures: &HashMap<String, Vec<String>>,
) -> Result<Layout, AssembleError> {
    let unknown = HashMap::new();
    let mut pass = Assembler::new(signatures, &unknown);
    pass.bind_parameters(functions)?;

    let mut relative = Vec::with_capacity(functions.len());
    for function in functions {
        let start = pass.ctx.position();
        pass.lower_function(function)?;
        relative.push(Span {
            start,
            len: pass.ctx.position() - start,
        });
    }

    let main_start = pass.ctx.position();
    pass.lower_main(main)?;
    let main_len = pass.ctx.position() - main_start;

    let spans: Vec<Span> = relative
        .iter()
        .map(|span| Span {
            start: main_len + span.start,
            len: span.len,
        })
        .collect();
    let labels = functions
        .iter()
        .zip(&spans)
        .map(|(function, span)| (function.name.to_string(), span.start))
        .collect();

    Ok(Layout {
        main_len,
        functions: spans,
        labels,
    })
}

fn emit(
    main: &[&IrInstr],
    functions: &[FunctionDef<'_>],
    signatures: &HashMap<String, Vec<String>>,
    layout: &Layout,
) -> Result<Program, AssembleError> {
    let mut pass = Assembler::new(signatures, &layout.labels);
    pass.bind_parameters(functions)?;

    for (function, span) in functions.iter().zip(&layout.functions) {
        pass.ctx.seek(span.start);
        pass.lower_function(function)?;
        check_end(function.name, span.start + span.len, pass.ctx.position())?;
    }

    pass.ctx.seek(0);
    pass.lower_main(main)?;
    check_end("main", layout.main_len, pass.ctx.position())?;

    pass.ctx.resolve()?;

    let mut symbols = BTreeMap::new();
    for (name, &address) in &pass.ctx.labels {
        let byte = u8::try_from(address).map_err(|_| AssembleError::AddressOutOfRange {
            label: name.clone(),
            address,
        })?;
        symbols.insert(name.clone(), byte);
    }

    Ok(Program {
        code: pass.ctx.code,
        symbols,
    })
}

fn check_end(label: &str, expected: usize, actual: usize) -> Result<(), AssembleError> {
    if expected == actual {
        Ok(())
    } else {
        Err(AssembleError::LayoutMismatch {
            label: label.to_string(),
            expected,
            actual,
        })
    }
}

/// Separate top-level code from function bodies. Nested declarations become
/// functions of their own; macro declarations are dropped.
fn split(instrs: &[IrInstr]) -> (Vec<&IrInstr>, Vec<FunctionDef<'_>>) {
    let mut main = Vec::new();
    let mut functions = Vec::new();
    let mut i = 0;

    while i < instrs.len() {
        match &instrs[i] {
            IrInstr::FuncDecl { name, params } => {
                let end = closing(instrs, i);
                let (body, nested) = split(&instrs[i + 1..end]);
                functions.push(FunctionDef { name, params, body });
                functions.extend(nested);
                i = end + 1;
            }
            IrInstr::MacroDecl(_) => i = closing(instrs, i) + 1,
            instr => {
                main.push(instr);
                i += 1;
            }
        }
    }

    (main, functions)
}

/// Index of the END_FUNC or END_MACRO closing the declaration at `open`.
fn closing(instrs: &[IrInstr], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, instr) in instrs.iter().enumerate().skip(open) {
        match instr {
            IrInstr::FuncDecl { .. } | IrInstr::MacroDecl(_) => depth += 1,
            IrInstr::EndFunc | IrInstr::EndMacro => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    instrs.len()
}

fn signatures(functions: &[FunctionDef<'_>]) -> Result<HashMap<String, Vec<String>>, AssembleError> {
    let mut signatures = HashMap::new();
    for function in functions {
        if signatures
            .insert(function.name.to_string(), function.params.to_vec())
            .is_some()
        {
            return Err(AssembleError::DuplicateFunction {
                name: function.name.to_string(),
            });
        }
    }
    Ok(signatures)
}

/// Functions called directly from a body, in order.
fn callees<'a>(function: &FunctionDef<'a>) -> Vec<&'a str> {
    let mut names = Vec::new();
    for &instr in &function.body {
        if let IrInstr::Call { callee, .. } = instr {
            names.push(callee.as_str());
        }
        for operand in instr.operands() {
            names.extend(operand.calls());
        }
    }
    names
}

/// Parameters and temporaries live in fixed registers, so no call chain may
/// re-enter a function it started from.
fn check_recursion(functions: &[FunctionDef<'_>]) -> Result<(), AssembleError> {
    let graph: HashMap<&str, Vec<&str>> = functions
        .iter()
        .map(|function| (function.name, callees(function)))
        .collect();

    let mut done = HashSet::new();
    for function in functions {
        visit(function.name, &graph, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

fn visit<'a>(
    name: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    path: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Result<(), AssembleError> {
    if let Some(start) = path.iter().position(|&caller| caller == name) {
        let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
        cycle.push(name.to_string());
        return Err(AssembleError::RecursiveCall { cycle });
    }
    if done.contains(name) {
        return Ok(());
    }
    // undefined callees are reported when the call is emitted
    let Some(callees) = graph.get(name) else {
        return Ok(());
    };

    path.push(name);
    for &callee in callees {
        visit(callee, graph, path, done)?;
    }
    path.pop();
    done.insert(name);
    Ok(())
}

fn scoped(function: &str, name: &str) -> String {
    format!("{}::{}", function, name)
}

/// Integer value of a number, if it has one.
fn integral(n: Number) -> Option<i64> {
    match n {
        Number::Int(v) => Some(v),
        Number::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18 => {
            Some(f as i64)
        }
        Number::Float(_) => None,
    }
}

fn width(op: Opcode) -> u8 {
    op.width() as u8
}

/// Names declared inside the function being lowered, parameters included.
struct FunctionScope {
    name: String,
    locals: HashSet<String>,
}

enum LoopCondition {
    Register(u8),
    /// A temporary held for the whole loop and recomputed before END_WHILE.
    Pinned { reg: u8, operand: Operand },
}

impl LoopCondition {
    fn register(&self) -> u8 {
        match self {
            LoopCondition::Register(reg) | LoopCondition::Pinned { reg, .. } => *reg,
        }
    }
}

enum Open {
    If { block: usize },
    While { block: usize, cond: LoopCondition },
    Block,
}

/// Lowering state for one pass.
struct Assembler<'a> {
    ctx: CompilationContext,
    signatures: &'a HashMap<String, Vec<String>>,
    /// Function addresses from layout; empty during the layout pass.
    known: &'a HashMap<String, usize>,
    scope: Option<FunctionScope>,
}

impl<'a> Assembler<'a> {
    fn new(
        signatures: &'a HashMap<String, Vec<String>>,
        known: &'a HashMap<String, usize>,
    ) -> Self {
        Self {
            ctx: CompilationContext::new(),
            signatures,
            known,
            scope: None,
        }
    }

    fn emit(&mut self, instr: Instruction) {
        self.ctx.emit(&instr);
    }

    fn temp(&mut self) -> Result<u8, AssembleError> {
        self.ctx.registers.temp()
    }

    fn release(&mut self, reg: Option<u8>) {
        self.ctx.registers.release_all([reg]);
    }

    /// Parameters and the return binding live for the whole program.
    fn bind_parameters(&mut self, functions: &[FunctionDef<'_>]) -> Result<(), AssembleError> {
        if functions.is_empty() {
            return Ok(());
        }
        for function in functions {
            for param in function.params {
                self.ctx.registers.bind_global(&scoped(function.name, param))?;
            }
        }
        self.ctx.registers.bind_global(RETURN_BINDING)?;
        Ok(())
    }

    fn lower_function(&mut self, function: &FunctionDef<'_>) -> Result<(), AssembleError> {
        self.ctx.registers.reset_touched();
        self.ctx.define_label(function.name)?;
        self.scope = Some(FunctionScope {
            name: function.name.to_string(),
            locals: function.params.iter().cloned().collect(),
        });

        self.lower_body(&function.body)?;
        if !matches!(function.body.last(), Some(IrInstr::Return(_))) {
            self.emit(Instruction::Return);
        }

        self.scope = None;
        self.ctx.registers.reserve_touched();
        Ok(())
    }

    fn lower_main(&mut self, main: &[&IrInstr]) -> Result<(), AssembleError> {
        self.lower_body(main)?;
        self.emit(Instruction::FuncEnd);
        Ok(())
    }

    /// Register key for `name`: function locals are qualified by the
    /// function name, everything else is global.
    fn key(&self, name: &str) -> String {
        match &self.scope {
            Some(scope) if scope.locals.contains(name) => scoped(&scope.name, name),
            _ => name.to_string(),
        }
    }

    fn bind(&mut self, name: &str) -> Result<u8, AssembleError> {
        let key = self.key(name);
        Ok(self.ctx.registers.bind(&key)?.reg)
    }

    /// Register holding `name`. A name read in top-level code before any
    /// write is bound and zeroed on the spot; inside a function it refers
    /// to the global of that name.
    fn read(&mut self, name: &str) -> Result<u8, AssembleError> {
        let key = self.key(name);
        if let Some(reg) = self.ctx.registers.lookup(&key) {
            return Ok(reg);
        }
        let reg = self.ctx.registers.bind(&key)?.reg;
        if self.scope.is_none() {
            self.emit(Instruction::Mov { dst: reg, value: 0 });
        }
        Ok(reg)
    }

    fn lower_body(&mut self, body: &[&IrInstr]) -> Result<(), AssembleError> {
        let mut open: Vec<Open> = Vec::new();

        for (index, instr) in body.iter().enumerate() {
            match instr {
                IrInstr::Declare { name, value } => {
                    if let Some(scope) = &mut self.scope {
                        scope.locals.insert(name.clone());
                    }
                    let dst = self.bind(name)?;
                    self.lower_value(value, dst)?;
                }
                IrInstr::Assign { name, value } => {
                    let dst = self.bind(name)?;
                    self.lower_value(value, dst)?;
                }
                IrInstr::Print(op) => {
                    let (reg, temp) = self.register_for(op)?;
                    self.emit(Instruction::Out { reg });
                    self.release(temp);
                }
                IrInstr::Call { callee, args } => self.call(callee, args)?,
                IrInstr::Expr(Operand::Call { callee, args }) => self.call(callee, args)?,
                IrInstr::Expr(op) => {
                    let temp = self.temp()?;
                    self.lower_value(op, temp)?;
                    self.release(Some(temp));
                }
                IrInstr::Return(op) => {
                    let ret = self.ctx.registers.bind_global(RETURN_BINDING)?.reg;
                    self.lower_value(op, ret)?;
                    self.emit(Instruction::Return);
                }
                IrInstr::If(op) => {
                    let (reg, temp) = self.register_for(op)?;
                    let block = self.ctx.open_block();
                    self.ctx
                        .emit_patched(&Instruction::If { reg, skip: 0 }, PatchKind::IfSkip { block });
                    self.release(temp);
                    open.push(Open::If { block });
                }
                IrInstr::Else => match open.last() {
                    Some(Open::If { block }) => {
                        let block = *block;
                        self.ctx
                            .emit_patched(&Instruction::Else { skip: 0 }, PatchKind::ElseSkip { block });
                        self.ctx.mark_else_body(block);
                    }
                    _ => return Err(misplaced(index, instr)),
                },
                IrInstr::EndIf => match open.pop() {
                    Some(Open::If { block }) => {
                        let end = self.ctx.position();
                        self.ctx.close_block(block, end);
                        self.emit(Instruction::EndIf);
                    }
                    _ => return Err(misplaced(index, instr)),
                },
                IrInstr::While(op) => {
                    let cond = match op {
                        Operand::Var(name) => LoopCondition::Register(self.read(name)?),
                        other => {
                            let reg = self.temp()?;
                            self.lower_value(other, reg)?;
                            LoopCondition::Pinned {
                                reg,
                                operand: other.clone(),
                            }
                        }
                    };
                    let block = self.ctx.open_block();
                    self.ctx.emit_patched(
                        &Instruction::While {
                            reg: cond.register(),
                            skip: 0,
                        },
                        PatchKind::WhileSkip { block },
                    );
                    open.push(Open::While { block, cond });
                }
                IrInstr::EndWhile => match open.pop() {
                    Some(Open::While { block, cond }) => {
                        if let LoopCondition::Pinned { reg, operand } = &cond {
                            self.lower_value(operand, *reg)?;
                        }
                        self.emit(Instruction::EndWhile);
                        let end = self.ctx.position();
                        self.ctx.close_block(block, end);
                        if let LoopCondition::Pinned { reg, .. } = cond {
                            self.release(Some(reg));
                        }
                    }
                    _ => return Err(misplaced(index, instr)),
                },
                IrInstr::BlockStart => {
                    self.ctx.registers.push_scope();
                    open.push(Open::Block);
                }
                IrInstr::BlockEnd => match open.pop() {
                    Some(Open::Block) => self.ctx.registers.pop_scope(),
                    _ => return Err(misplaced(index, instr)),
                },
                IrInstr::FuncDecl { .. }
                | IrInstr::EndFunc
                | IrInstr::MacroDecl(_)
                | IrInstr::EndMacro => return Err(misplaced(index, instr)),
            }
        }

        if open.is_empty() {
            Ok(())
        } else {
            Err(StructureError {
                index: body.len(),
                message: "construct is never closed".into(),
            }
            .into())
        }
    }

    /// A register holding `op`: a variable's own register, or a fresh
    /// temporary the caller must release.
    fn register_for(&mut self, op: &Operand) -> Result<(u8, Option<u8>), AssembleError> {
        match op {
            Operand::Var(name) => Ok((self.read(name)?, None)),
            other => {
                let temp = self.temp()?;
                self.lower_value(other, temp)?;
                Ok((temp, Some(temp)))
            }
        }
    }

    /// A source operand for `op`. Variables and small non-negative
    /// integers are encoded directly, anything else goes through a
    /// temporary.
    fn source(&mut self, op: &Operand) -> Result<(Src, Option<u8>), AssembleError> {
        match op {
            Operand::Var(name) => Ok((Src::Reg(self.read(name)?), None)),
            Operand::Number(n) => match integral(*n) {
                Some(v) if (0..=CONST_RADIX).contains(&v) => Ok((Src::Imm(v as u8), None)),
                _ => self.into_temp(op),
            },
            _ => self.into_temp(op),
        }
    }

    fn into_temp(&mut self, op: &Operand) -> Result<(Src, Option<u8>), AssembleError> {
        let temp = self.temp()?;
        self.lower_value(op, temp)?;
        Ok((Src::Reg(temp), Some(temp)))
    }

    /// Emit code leaving the value of `op` in `dst`. Every register read
    /// happens before `dst` is first written.
    fn lower_value(&mut self, op: &Operand, dst: u8) -> Result<(), AssembleError> {
        match op {
            Operand::Number(n) => {
                let value = integral(*n)
                    .ok_or_else(|| AssembleError::unsupported(op, "only integers exist at runtime"))?;
                self.load_const(value, dst);
            }
            Operand::Str(_) => {
                return Err(AssembleError::unsupported(
                    op,
                    "strings have no runtime representation",
                ));
            }
            Operand::Var(name) => {
                let reg = self.read(name)?;
                self.emit(Instruction::Add {
                    dst,
                    a: Src::Reg(reg),
                    b: Src::Imm(0),
                });
            }
            Operand::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, dst)?,
            Operand::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let (a, temp) = self.source(operand)?;
                self.emit(Instruction::Sub {
                    dst,
                    a: Src::Imm(0),
                    b: a,
                });
                self.release(temp);
            }
            Operand::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                let t = self.temp()?;
                self.lower_value(operand, t)?;
                self.emit(Instruction::Mov { dst, value: 1 });
                self.emit(Instruction::If {
                    reg: t,
                    skip: width(Opcode::Mov),
                });
                self.emit(Instruction::Mov { dst, value: 0 });
                self.emit(Instruction::EndIf);
                self.release(Some(t));
            }
            Operand::Logical { op, lhs, rhs } => {
                let ta = self.temp()?;
                self.lower_value(lhs, ta)?;
                let tb = self.temp()?;
                self.lower_value(rhs, tb)?;
                match op {
                    LogicalOp::And => self.lower_and(ta, tb, dst),
                    LogicalOp::Or => self.lower_or(ta, tb, dst),
                }
                self.release_all([Some(ta), Some(tb)]);
            }
            Operand::Call { callee, args } => {
                self.call(callee, args)?;
                let ret = self.ctx.registers.bind_global(RETURN_BINDING)?.reg;
                self.emit(Instruction::Add {
                    dst,
                    a: Src::Reg(ret),
                    b: Src::Imm(0),
                });
            }
        }
        Ok(())
    }

    fn release_all(&mut self, regs: [Option<u8>; 2]) {
        self.ctx.registers.release_all(regs);
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Operand,
        rhs: &Operand,
        dst: u8,
    ) -> Result<(), AssembleError> {
        let (a, ta) = self.source(lhs)?;
        let (b, tb) = self.source(rhs)?;

        match op {
            BinaryOp::Add => self.emit(Instruction::Add { dst, a, b }),
            BinaryOp::Sub => self.emit(Instruction::Sub { dst, a, b }),
            BinaryOp::Mul => self.emit(Instruction::Mul { dst, a, b }),
            BinaryOp::Div => self.emit(Instruction::Div { dst, a, b }),
            BinaryOp::Mod => {
                // a - (a / b) * b
                let q = self.temp()?;
                self.emit(Instruction::Div { dst: q, a, b });
                self.emit(Instruction::Mul {
                    dst: q,
                    a: Src::Reg(q),
                    b,
                });
                self.emit(Instruction::Sub {
                    dst,
                    a,
                    b: Src::Reg(q),
                });
                self.release(Some(q));
            }
            BinaryOp::Lt => self.less_than(a, b, dst)?,
            BinaryOp::Gt => self.less_than(b, a, dst)?,
            BinaryOp::LtEq | BinaryOp::GtEq => {
                let q = self.temp()?;
                if op == BinaryOp::LtEq {
                    self.less_than(b, a, q)?;
                } else {
                    self.less_than(a, b, q)?;
                }
                self.emit(Instruction::Sub {
                    dst,
                    a: Src::Imm(1),
                    b: Src::Reg(q),
                });
                self.release(Some(q));
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                let d = self.temp()?;
                self.emit(Instruction::Sub { dst: d, a, b });
                let (same, differ) = if op == BinaryOp::Eq { (1, 0) } else { (0, 1) };
                self.emit(Instruction::Mov { dst, value: same });
                self.emit(Instruction::If {
                    reg: d,
                    skip: width(Opcode::Mov),
                });
                self.emit(Instruction::Mov { dst, value: differ });
                self.emit(Instruction::EndIf);
                self.release(Some(d));
            }
        }

        self.release_all([ta, tb]);
        Ok(())
    }

    /// `dst = a < b`, exact over the whole `i64` range.
    ///
    /// `a - b` can overflow, so the sign is taken from
    /// `e = floor((a - b) / 2)`, built as
    /// `floor(a / 2) - floor(b / 2) + floor((a mod 2 - b mod 2) / 2)`,
    /// which always fits. `floor(floor(e / 2^62) / 4)` is then -1 for a
    /// negative `e` and 0 otherwise.
    fn less_than(&mut self, a: Src, b: Src, dst: u8) -> Result<(), AssembleError> {
        let e = self.temp()?;
        let t = self.temp()?;

        self.parity(a, e);
        self.parity(b, t);
        self.emit(Instruction::Sub {
            dst: e,
            a: Src::Reg(e),
            b: Src::Reg(t),
        });
        self.emit(Instruction::Div {
            dst: e,
            a: Src::Reg(e),
            b: Src::Imm(2),
        });
        self.emit(Instruction::Div {
            dst: t,
            a,
            b: Src::Imm(2),
        });
        self.emit(Instruction::Add {
            dst: e,
            a: Src::Reg(e),
            b: Src::Reg(t),
        });
        self.emit(Instruction::Div {
            dst: t,
            a: b,
            b: Src::Imm(2),
        });
        self.emit(Instruction::Sub {
            dst: e,
            a: Src::Reg(e),
            b: Src::Reg(t),
        });

        self.load_sign_divisor(t);
        self.emit(Instruction::Div {
            dst: e,
            a: Src::Reg(e),
            b: Src::Reg(t),
        });
        self.emit(Instruction::Div {
            dst: e,
            a: Src::Reg(e),
            b: Src::Imm(4),
        });
        self.emit(Instruction::Sub {
            dst,
            a: Src::Imm(0),
            b: Src::Reg(e),
        });
        self.release_all([Some(e), Some(t)]);
        Ok(())
    }

    /// `dst = x mod 2` (0 or 1 under floor division).
    fn parity(&mut self, x: Src, dst: u8) {
        self.emit(Instruction::Div {
            dst,
            a: x,
            b: Src::Imm(2),
        });
        self.emit(Instruction::Mul {
            dst,
            a: Src::Reg(dst),
            b: Src::Imm(2),
        });
        self.emit(Instruction::Sub {
            dst,
            a: x,
            b: Src::Reg(dst),
        });
    }

    /// `dst = 2^62`, as `((128^2)^2)^2 * 64`.
    fn load_sign_divisor(&mut self, dst: u8) {
        self.emit(Instruction::Mov { dst, value: 128 });
        for _ in 0..3 {
            self.emit(Instruction::Mul {
                dst,
                a: Src::Reg(dst),
                b: Src::Reg(dst),
            });
        }
        self.emit(Instruction::Mul {
            dst,
            a: Src::Reg(dst),
            b: Src::Imm(64),
        });
    }

    fn lower_and(&mut self, a: u8, b: u8, dst: u8) {
        self.emit(Instruction::Mov { dst, value: 0 });
        self.emit(Instruction::If {
            reg: a,
            skip: width(Opcode::If) + width(Opcode::Mov) + width(Opcode::EndIf),
        });
        self.emit(Instruction::If {
            reg: b,
            skip: width(Opcode::Mov),
        });
        self.emit(Instruction::Mov { dst, value: 1 });
        self.emit(Instruction::EndIf);
        self.emit(Instruction::EndIf);
    }

    fn lower_or(&mut self, a: u8, b: u8, dst: u8) {
        self.emit(Instruction::Mov { dst, value: 1 });
        self.emit(Instruction::If {
            reg: a,
            skip: width(Opcode::Else),
        });
        self.emit(Instruction::Else {
            skip: 2 * width(Opcode::Mov) + width(Opcode::If) + width(Opcode::EndIf),
        });
        self.emit(Instruction::Mov { dst, value: 0 });
        self.emit(Instruction::If {
            reg: b,
            skip: width(Opcode::Mov),
        });
        self.emit(Instruction::Mov { dst, value: 1 });
        self.emit(Instruction::EndIf);
        self.emit(Instruction::EndIf);
    }

    /// Build any `i64` in `dst` from byte-sized immediates.
    fn load_const(&mut self, value: i64, dst: u8) {
        if (0..=MAX_ADDRESS as i64).contains(&value) {
            self.emit(Instruction::Mov {
                dst,
                value: value as u8,
            });
        } else if (-CONST_RADIX..0).contains(&value) {
            self.emit(Instruction::Sub {
                dst,
                a: Src::Imm(0),
                b: Src::Imm((-value) as u8),
            });
        } else if value > 0 {
            self.load_const(value / CONST_RADIX, dst);
            self.emit(Instruction::Mul {
                dst,
                a: Src::Reg(dst),
                b: Src::Imm(CONST_RADIX as u8),
            });
            let low = value % CONST_RADIX;
            if low != 0 {
                self.emit(Instruction::Add {
                    dst,
                    a: Src::Reg(dst),
                    b: Src::Imm(low as u8),
                });
            }
        } else {
            // value = -(m + 1) with m >= 127
            self.load_const(-(value + 1), dst);
            self.emit(Instruction::Sub {
                dst,
                a: Src::Imm(0),
                b: Src::Reg(dst),
            });
            self.emit(Instruction::Sub {
                dst,
                a: Src::Reg(dst),
                b: Src::Imm(1),
            });
        }
    }

    /// Copy arguments into the callee's parameter registers and emit CALL.
    /// Arguments are evaluated into temporaries first so one argument can
    /// read a parameter another overwrites.
    fn call(&mut self, callee: &str, args: &[Operand]) -> Result<(), AssembleError> {
        let signatures = self.signatures;
        if let Some(params) = signatures.get(callee) {
            if params.len() != args.len() {
                return Err(AssembleError::ArityMismatch {
                    name: callee.to_string(),
                    expected: params.len(),
                    got: args.len(),
                });
            }
            let mut targets = Vec::with_capacity(params.len());
            for param in params {
                targets.push(self.ctx.registers.bind_global(&scoped(callee, param))?.reg);
            }

            if let ([arg], [target]) = (args, targets.as_slice()) {
                self.lower_value(arg, *target)?;
            } else {
                let mut temps = Vec::with_capacity(args.len());
                for arg in args {
                    let temp = self.temp()?;
                    self.lower_value(arg, temp)?;
                    temps.push(temp);
                }
                for (&temp, &target) in temps.iter().zip(&targets) {
                    self.emit(Instruction::Add {
                        dst: target,
                        a: Src::Reg(temp),
                        b: Src::Imm(0),
                    });
                }
                self.ctx.registers.release_all(temps.into_iter().map(Some));
            }
        }

        let known = self.known;
        match known.get(callee) {
            Some(&address) => {
                let addr = u8::try_from(address).map_err(|_| AssembleError::AddressOutOfRange {
                    label: callee.to_string(),
                    address,
                })?;
                self.emit(Instruction::Call { addr });
            }
            None => {
                self.ctx.emit_patched(
                    &Instruction::Call { addr: 0 },
                    PatchKind::Call {
                        label: callee.to_string(),
                    },
                );
            }
        }
        Ok(())
    }
}

fn misplaced(index: usize, instr: &IrInstr) -> AssembleError {
    StructureError {
        index,
        message: format!("unexpected {}", instr.mnemonic()),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::macros::MacroEngine;
    use crate::frontend::parser::Parser;
    use crate::ir::generate::generate;
    use pretty_assertions::assert_eq;

    fn ir(source: &str) -> Vec<IrInstr> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let tokens = MacroEngine::new().process(tokens).unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        generate(&program).instrs
    }

    fn code(source: &str) -> Vec<u8> {
        assemble(&ir(source)).unwrap().code
    }

    fn assemble_err(source: &str) -> AssembleError {
        assemble(&ir(source)).unwrap_err()
    }

    #[test]
    fn test_declare_and_print() {
        assert_eq!(
            code("let x = 5; print x;"),
            vec![0x10, 0, 5, 0x20, 0, 0xFF]
        );
    }

    #[test]
    fn test_countdown_layout() {
        assert_eq!(
            code("let x = 5; while (x) { print x; x = x - 1; }"),
            vec![
                0x10, 0, 5, // MOV r0, 5
                0x60, 0, 7, // WHILE r0, +7
                0x20, 0, // OUT r0
                0x12, 0, 0x80, 0x01, // SUB r0, r0, #1
                0x61, // END_WHILE
                0xFF,
            ]
        );
    }

    #[test]
    fn test_if_else_skips() {
        assert_eq!(
            code("let x = 1; if (x) { print x; } else { print 0; }"),
            vec![
                0x10, 0, 1, // MOV r0, 1
                0x50, 0, 4, // IF r0, +4
                0x20, 0, // OUT r0
                0x51, 5, // ELSE +5
                0x10, 1, 0, // MOV r1, 0
                0x20, 1, // OUT r1
                0x52, 0xFF,
            ]
        );
    }

    #[test]
    fn test_if_without_else_lands_on_end_if() {
        let bytes = code("let x = 0; if (x) { print x; }");
        assert_eq!(&bytes[3..6], &[0x50, 0, 2]);
        assert_eq!(bytes[8], 0x52);
    }

    #[test]
    fn test_function_placed_after_main() {
        let program = assemble(&ir("func f(a) { return a + 1; } print f(2);")).unwrap();
        assert_eq!(
            program.code,
            vec![
                0x10, 0, 2, // MOV r0, 2      (argument into f::a)
                0x30, 12, // CALL @12
                0x11, 2, 0x81, 0x00, // ADD r2, r1, #0 ($ret)
                0x20, 2, // OUT r2
                0xFF, //
                0x11, 1, 0x80, 0x01, // f: ADD r1, r0, #1
                0x40,
            ]
        );
        assert_eq!(program.symbols.get("f"), Some(&12));
    }

    #[test]
    fn test_forward_call_between_functions() {
        let program =
            assemble(&ir("func a() { b(); } func b() { print 1; } a();")).unwrap();
        let a = program.symbols["a"] as usize;
        let b = program.symbols["b"];
        assert_eq!(&program.code[a..a + 2], &[0x30, b]);
    }

    #[test]
    fn test_macro_bodies_emit_nothing() {
        assert_eq!(
            code("macro unused let q = 9; endmacro print 1;"),
            vec![0x10, 0, 1, 0x20, 0, 0xFF]
        );
    }

    #[test]
    fn test_block_scope_releases_register() {
        assert_eq!(
            code("{ let a = 1; } let b = 2; print b;"),
            vec![0x10, 0, 1, 0x10, 0, 2, 0x20, 0, 0xFF]
        );
    }

    #[test]
    fn test_constant_building() {
        assert_eq!(
            code("let x = 1000;"),
            vec![
                0x10, 0, 7, // MOV r0, 7
                0x13, 0, 0x80, 127, // MUL r0, r0, #127
                0x11, 0, 0x80, 111, // ADD r0, r0, #111
                0xFF,
            ]
        );
        assert_eq!(code("let x = -5;"), vec![0x12, 0, 0, 5, 0xFF]);
    }

    #[test]
    fn test_undefined_call_is_an_error() {
        assert_eq!(
            assemble_err("nowhere(1);"),
            AssembleError::UnresolvedCall {
                name: "nowhere".into()
            }
        );
    }

    #[test]
    fn test_arity_mismatch() {
        assert!(matches!(
            assemble_err("func f(a, b) { return a; } f(1);"),
            AssembleError::ArityMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_register_exhaustion() {
        let source = (0..9)
            .map(|i| format!("let v{} = {};", i, i))
            .collect::<String>();
        assert!(matches!(
            assemble_err(&source),
            AssembleError::RegisterExhausted { name, .. } if name == "v8"
        ));
    }

    #[test]
    fn test_strings_are_unsupported() {
        assert!(matches!(
            assemble_err("print \"hi\";"),
            AssembleError::UnsupportedOperand { .. }
        ));
    }

    #[test]
    fn test_unbalanced_ir_is_rejected() {
        let err = assemble(&[IrInstr::If(Operand::var("x"))]).unwrap_err();
        assert!(matches!(err, AssembleError::Unbalanced(_)));
    }

    #[test]
    fn test_skip_out_of_range() {
        let body = "x = x + 1; ".repeat(70);
        let source = format!("let x = 1; if (x) {{ {} }}", body);
        assert!(matches!(
            assemble_err(&source),
            AssembleError::SkipOutOfRange { .. }
        ));
    }

    #[test]
    fn test_duplicate_function() {
        assert_eq!(
            assemble_err("func f() { } func f() { }"),
            AssembleError::DuplicateFunction { name: "f".into() }
        );
    }

    #[test]
    fn test_self_recursion_is_rejected() {
        assert_eq!(
            assemble_err(
                "func fact(n) { if (n) { return n * fact(n - 1); } return 1; } print fact(5);"
            ),
            AssembleError::RecursiveCall {
                cycle: vec!["fact".into(), "fact".into()]
            }
        );
    }

    #[test]
    fn test_mutual_recursion_is_rejected() {
        assert_eq!(
            assemble_err("func even(n) { odd(n - 1); } func odd(n) { let r = even(n); } even(4);"),
            AssembleError::RecursiveCall {
                cycle: vec!["even".into(), "odd".into(), "even".into()]
            }
        );
    }

    #[test]
    fn test_shared_callee_is_not_a_cycle() {
        let program =
            assemble(&ir("func leaf() { print 1; } func a() { leaf(); } func b() { a(); leaf(); } b();"))
                .unwrap();
        assert_eq!(program.symbols.len(), 3);
    }
}
