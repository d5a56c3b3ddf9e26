use crate::ir::operand::Operand;
use std::fmt;

/// One linear IR instruction.
///
/// Structured instructions come in balanced pairs (`If`/`EndIf` with an
/// optional `Else`, `While`/`EndWhile`, `FuncDecl`/`EndFunc`,
/// `MacroDecl`/`EndMacro`, `BlockStart`/`BlockEnd`).
#[derive(Debug, Clone, PartialEq)]
pub enum IrInstr {
    Declare { name: String, value: Operand },
    Assign { name: String, value: Operand },
    Print(Operand),
    Call { callee: String, args: Vec<Operand> },
    FuncDecl { name: String, params: Vec<String> },
    EndFunc,
    Return(Operand),
    If(Operand),
    Else,
    EndIf,
    While(Operand),
    EndWhile,
    Expr(Operand),
    BlockStart,
    BlockEnd,
    MacroDecl(String),
    EndMacro,
}

impl IrInstr {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            IrInstr::Declare { .. } => "DECLARE",
            IrInstr::Assign { .. } => "ASSIGN",
            IrInstr::Print(_) => "PRINT",
            IrInstr::Call { .. } => "CALL",
            IrInstr::FuncDecl { .. } => "FUNC_DECL",
            IrInstr::EndFunc => "END_FUNC",
            IrInstr::Return(_) => "RETURN",
            IrInstr::If(_) => "IF",
            IrInstr::Else => "ELSE",
            IrInstr::EndIf => "END_IF",
            IrInstr::While(_) => "WHILE",
            IrInstr::EndWhile => "END_WHILE",
            IrInstr::Expr(_) => "EXPR",
            IrInstr::BlockStart => "BLOCK_START",
            IrInstr::BlockEnd => "BLOCK_END",
            IrInstr::MacroDecl(_) => "MACRO_DECL",
            IrInstr::EndMacro => "END_MACRO",
        }
    }

    /// Every operand carried by the instruction.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            IrInstr::Declare { value, .. } | IrInstr::Assign { value, .. } => vec![value],
            IrInstr::Print(op)
            | IrInstr::Return(op)
            | IrInstr::If(op)
            | IrInstr::While(op)
            | IrInstr::Expr(op) => vec![op],
            IrInstr::Call { args, .. } => args.iter().collect(),
            _ => Vec::new(),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for IrInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.mnemonic())?;
        match self {
            IrInstr::Declare { name, value } | IrInstr::Assign { name, value } => {
                write!(f, " {} = {}", name, value)
            }
            IrInstr::Print(op) => write!(f, " -> {}", op),
            IrInstr::Call { callee, args } => {
                write!(f, " {}(", callee)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            IrInstr::FuncDecl { name, params } => {
                write!(f, " {}(", name)?;
                write_list(f, params)?;
                write!(f, ")")
            }
            IrInstr::Return(op) | IrInstr::If(op) | IrInstr::While(op) | IrInstr::Expr(op) => {
                write!(f, " {}", op)
            }
            IrInstr::MacroDecl(name) => write!(f, " {}", name),
            IrInstr::EndFunc
            | IrInstr::Else
            | IrInstr::EndIf
            | IrInstr::EndWhile
            | IrInstr::BlockStart
            | IrInstr::BlockEnd
            | IrInstr::EndMacro => Ok(()),
        }
    }
}

/// Render a listing, one instruction per line.
pub fn render(instrs: &[IrInstr]) -> String {
    let mut out = String::new();
    for instr in instrs {
        out.push_str(&instr.to_string());
        out.push('\n');
    }
    out
}
