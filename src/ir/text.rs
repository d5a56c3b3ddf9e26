//! Reading IR back from its textual listing (`[DECLARE] x = 5`, ...).

use crate::frontend::lexer::Lexer;
use crate::frontend::parser::Parser;
use crate::ir::generate::IrGenerator;
use crate::ir::instr::IrInstr;
use crate::ir::operand::{Number, Operand, is_numeric_literal};
use crate::ir::verify::check_balance;
use crate::lang::node::Expr;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref LINE: Regex = Regex::new(r"^\[([A-Z_]+)\]\s*(.*)$").expect("IR line pattern");
    static ref BINDING: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$").expect("IR binding pattern");
    static ref SIGNATURE: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\((.*)\)$").expect("IR signature pattern");
    static ref NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("IR name pattern");
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {message}")]
pub struct IrTextError {
    pub line: usize,
    pub message: String,
}

/// Parse a textual IR listing. Blank lines and lines starting with `;` are
/// ignored. Operands are re-folded, and the result must be balanced.
pub fn parse_ir(text: &str) -> Result<Vec<IrInstr>, IrTextError> {
    let mut instrs = Vec::new();
    let mut lines = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        instrs.push(parse_line(trimmed).map_err(|message| IrTextError { line, message })?);
        lines.push(line);
    }

    check_balance(&instrs).map_err(|e| IrTextError {
        line: lines.get(e.index).copied().unwrap_or(0),
        message: e.message,
    })?;
    Ok(instrs)
}

fn parse_line(text: &str) -> Result<IrInstr, String> {
    let caps = LINE
        .captures(text)
        .ok_or_else(|| format!("expected '[MNEMONIC] operands', got '{}'", text))?;
    let mnemonic = &caps[1];
    let rest = caps[2].trim();

    let no_operands = |instr: IrInstr| {
        if rest.is_empty() {
            Ok(instr)
        } else {
            Err(format!("[{}] takes no operands, got '{}'", mnemonic, rest))
        }
    };

    match mnemonic {
        "DECLARE" | "ASSIGN" => {
            let caps = BINDING
                .captures(rest)
                .ok_or_else(|| format!("expected 'name = value', got '{}'", rest))?;
            let name = caps[1].to_string();
            let value = operand(&caps[2])?;
            Ok(if mnemonic == "DECLARE" {
                IrInstr::Declare { name, value }
            } else {
                IrInstr::Assign { name, value }
            })
        }
        "PRINT" => {
            let rest = rest.strip_prefix("->").unwrap_or(rest);
            Ok(IrInstr::Print(operand(rest)?))
        }
        "CALL" => match operand(rest)? {
            Operand::Call { callee, args } => Ok(IrInstr::Call { callee, args }),
            other => Err(format!("expected a call, got '{}'", other)),
        },
        "FUNC_DECL" => {
            let caps = SIGNATURE
                .captures(rest)
                .ok_or_else(|| format!("expected 'name(params)', got '{}'", rest))?;
            let params = caps[2]
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    if NAME.is_match(p) {
                        Ok(p.to_string())
                    } else {
                        Err(format!("invalid parameter name '{}'", p))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(IrInstr::FuncDecl {
                name: caps[1].to_string(),
                params,
            })
        }
        "RETURN" => Ok(IrInstr::Return(operand(rest)?)),
        "IF" => Ok(IrInstr::If(operand(rest)?)),
        "WHILE" => Ok(IrInstr::While(operand(rest)?)),
        "EXPR" => Ok(IrInstr::Expr(operand(rest)?)),
        "MACRO_DECL" => {
            if NAME.is_match(rest) {
                Ok(IrInstr::MacroDecl(rest.to_string()))
            } else {
                Err(format!("invalid macro name '{}'", rest))
            }
        }
        "END_FUNC" => no_operands(IrInstr::EndFunc),
        "ELSE" => no_operands(IrInstr::Else),
        "END_IF" => no_operands(IrInstr::EndIf),
        "END_WHILE" => no_operands(IrInstr::EndWhile),
        "BLOCK_START" => no_operands(IrInstr::BlockStart),
        "BLOCK_END" => no_operands(IrInstr::BlockEnd),
        "END_MACRO" => no_operands(IrInstr::EndMacro),
        other => Err(format!("unknown IR instruction [{}]", other)),
    }
}

/// Numeric literals are taken as-is; anything else goes through the
/// expression parser and the folder.
fn operand(text: &str) -> Result<Operand, String> {
    let text = text.trim();
    if is_numeric_literal(text) {
        return if text.contains('.') {
            text.parse()
                .map(|n| Operand::Number(Number::Float(n)))
                .map_err(|e| format!("bad float '{}': {}", text, e))
        } else {
            text.parse()
                .map(Operand::int)
                .map_err(|e| format!("bad integer '{}': {}", text, e))
        };
    }

    let tokens = Lexer::new(text).tokenize().map_err(|e| e.to_string())?;
    let expr = Parser::new(tokens)
        .parse_expression_only()
        .map_err(|e| e.to_string())?;
    if contains_assignment(&expr) {
        return Err(format!("assignment inside operand '{}'", text));
    }
    Ok(IrGenerator::new().flatten(&expr))
}

fn contains_assignment(expr: &Expr) -> bool {
    match expr {
        Expr::Assign { .. } => true,
        Expr::Literal(_) | Expr::Variable(_) => false,
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            contains_assignment(left) || contains_assignment(right)
        }
        Expr::Unary { operand, .. } => contains_assignment(operand),
        Expr::Call { args, .. } => args.iter().any(contains_assignment),
    }
}
