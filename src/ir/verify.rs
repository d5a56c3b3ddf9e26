use crate::ir::instr::IrInstr;
use crate::ir::operand::is_numeric_literal;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Note,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    /// `ASSIGN` to a name that no earlier `DECLARE` introduced.
    AssignBeforeDeclare { name: String },
    /// A read of a name that is neither declared nor assigned yet.
    UseBeforeDeclare { name: String },
    /// The optimiser re-folded a right-hand side.
    Optimized {
        name: String,
        before: String,
        after: String,
    },
}

/// A non-fatal finding about the instruction at `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrDiagnostic {
    pub index: usize,
    pub kind: DiagnosticKind,
}

impl IrDiagnostic {
    pub fn severity(&self) -> Severity {
        match self.kind {
            DiagnosticKind::Optimized { .. } => Severity::Note,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for IrDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::AssignBeforeDeclare { name } => write!(
                f,
                "ir[{}]: warning: assignment to undeclared variable '{}'",
                self.index, name
            ),
            DiagnosticKind::UseBeforeDeclare { name } => write!(
                f,
                "ir[{}]: warning: use of undeclared variable '{}'",
                self.index, name
            ),
            DiagnosticKind::Optimized {
                name,
                before,
                after,
            } => write!(
                f,
                "ir[{}]: note: optimized {}: {} -> {}",
                self.index, name, before, after
            ),
        }
    }
}

/// Declaration check over the instruction list, in program order.
///
/// Function parameters count as declared. Macro bodies are templates and
/// are skipped.
pub fn verify(instrs: &[IrInstr]) -> Vec<IrDiagnostic> {
    let mut declared: HashSet<&str> = HashSet::new();
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut diagnostics = Vec::new();
    let mut macro_depth = 0usize;

    for (index, instr) in instrs.iter().enumerate() {
        match instr {
            IrInstr::MacroDecl(_) => {
                macro_depth += 1;
                continue;
            }
            IrInstr::EndMacro => {
                macro_depth = macro_depth.saturating_sub(1);
                continue;
            }
            _ if macro_depth > 0 => continue,
            _ => {}
        }

        for operand in instr.operands() {
            for name in operand.reads() {
                if !declared.contains(name) && !assigned.contains(name) {
                    diagnostics.push(IrDiagnostic {
                        index,
                        kind: DiagnosticKind::UseBeforeDeclare {
                            name: name.to_string(),
                        },
                    });
                }
            }
        }

        match instr {
            IrInstr::Declare { name, .. } => {
                declared.insert(name);
            }
            IrInstr::Assign { name, .. } => {
                if !declared.contains(name.as_str()) {
                    diagnostics.push(IrDiagnostic {
                        index,
                        kind: DiagnosticKind::AssignBeforeDeclare { name: name.clone() },
                    });
                    assigned.insert(name);
                }
            }
            IrInstr::FuncDecl { params, .. } => {
                declared.extend(params.iter().map(String::as_str));
            }
            _ => {}
        }
    }

    diagnostics
}

/// Re-fold the right-hand side of every `DECLARE`/`ASSIGN` that is not
/// already a numeric literal. Returns one note per rewritten instruction.
pub fn optimize(instrs: &mut [IrInstr]) -> Vec<IrDiagnostic> {
    let mut notes = Vec::new();

    for (index, instr) in instrs.iter_mut().enumerate() {
        let (IrInstr::Declare { name, value } | IrInstr::Assign { name, value }) = instr else {
            continue;
        };
        let before = value.to_string();
        if is_numeric_literal(&before) {
            continue;
        }
        let folded = value.fold();
        if folded != *value {
            notes.push(IrDiagnostic {
                index,
                kind: DiagnosticKind::Optimized {
                    name: name.clone(),
                    before,
                    after: folded.to_string(),
                },
            });
            *value = folded;
        }
    }

    notes
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("ir[{index}]: {message}")]
pub struct StructureError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    If { has_else: bool },
    While,
    Func,
    Macro,
    Block,
}

impl Frame {
    fn opener(self) -> &'static str {
        match self {
            Frame::If { .. } => "IF",
            Frame::While => "WHILE",
            Frame::Func => "FUNC_DECL",
            Frame::Macro => "MACRO_DECL",
            Frame::Block => "BLOCK_START",
        }
    }
}

/// Check that every structured instruction is closed by its partner, in
/// properly nested order, and that `ELSE` appears at most once per `IF`.
pub fn check_balance(instrs: &[IrInstr]) -> Result<(), StructureError> {
    let mut stack: Vec<(usize, Frame)> = Vec::new();

    for (index, instr) in instrs.iter().enumerate() {
        let error = |message: String| StructureError { index, message };

        let expected = match instr {
            IrInstr::If(_) => {
                stack.push((index, Frame::If { has_else: false }));
                continue;
            }
            IrInstr::While(_) => {
                stack.push((index, Frame::While));
                continue;
            }
            IrInstr::FuncDecl { .. } => {
                stack.push((index, Frame::Func));
                continue;
            }
            IrInstr::MacroDecl(_) => {
                stack.push((index, Frame::Macro));
                continue;
            }
            IrInstr::BlockStart => {
                stack.push((index, Frame::Block));
                continue;
            }
            IrInstr::Else => {
                match stack.last_mut() {
                    Some((_, Frame::If { has_else })) if !*has_else => *has_else = true,
                    Some((_, Frame::If { .. })) => {
                        return Err(error("second ELSE for the same IF".into()));
                    }
                    Some((_, frame)) => {
                        return Err(error(format!(
                            "ELSE inside {} without an enclosing IF",
                            frame.opener()
                        )));
                    }
                    None => return Err(error("ELSE without IF".into())),
                }
                continue;
            }
            IrInstr::EndIf => "IF",
            IrInstr::EndWhile => "WHILE",
            IrInstr::EndFunc => "FUNC_DECL",
            IrInstr::EndMacro => "MACRO_DECL",
            IrInstr::BlockEnd => "BLOCK_START",
            _ => continue,
        };

        match stack.pop() {
            Some((_, frame)) if frame.opener() == expected => {}
            Some((open, frame)) => {
                return Err(error(format!(
                    "{} closes {} opened at ir[{}]",
                    instr.mnemonic(),
                    frame.opener(),
                    open
                )));
            }
            None => {
                return Err(error(format!("{} without {}", instr.mnemonic(), expected)));
            }
        }
    }

    match stack.pop() {
        Some((open, frame)) => Err(StructureError {
            index: open,
            message: format!("{} is never closed", frame.opener()),
        }),
        None => Ok(()),
    }
}
