use crate::ir::instr::IrInstr;
use crate::ir::operand::{Number, Operand};
use crate::ir::verify::{self, IrDiagnostic};
use crate::lang::node::{Expr, Stmt};
use crate::lang::value::Value;

/// Result of lowering a program: the instruction list plus every
/// non-fatal diagnostic produced by verification and optimisation.
#[derive(Debug, Clone, PartialEq)]
pub struct IrOutput {
    pub instrs: Vec<IrInstr>,
    pub diagnostics: Vec<IrDiagnostic>,
}

/// Lower statements to IR, then verify and optimise it.
///
/// Every construct emits its own closing instruction, so the output is
/// balanced by construction. [`assemble`](crate::bytecode::assemble) runs
/// `check_balance` on every input, textual IR included, and is where an
/// unbalanced listing is rejected.
pub fn generate(program: &[Stmt]) -> IrOutput {
    let mut generator = IrGenerator::new();
    generator.lower_block(program);
    let mut instrs = generator.finish();

    debug_assert!(verify::check_balance(&instrs).is_ok());

    let mut diagnostics = verify::verify(&instrs);
    diagnostics.extend(verify::optimize(&mut instrs));
    IrOutput {
        instrs,
        diagnostics,
    }
}

/// Walks the AST and appends IR in program order.
#[derive(Debug, Default)]
pub struct IrGenerator {
    out: Vec<IrInstr>,
}

impl IrGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<IrInstr> {
        self.out
    }

    pub fn lower_block(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            self.lower_stmt(stmt);
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { name, init } => {
                let value = self.flatten(init);
                self.out.push(IrInstr::Declare {
                    name: name.clone(),
                    value,
                });
            }
            Stmt::Print(expr) => {
                let value = self.flatten(expr);
                self.out.push(IrInstr::Print(value));
            }
            Stmt::Return(expr) => {
                let value = self.flatten(expr);
                self.out.push(IrInstr::Return(value));
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.flatten(cond);
                self.out.push(IrInstr::If(cond));
                self.lower_block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.out.push(IrInstr::Else);
                    self.lower_block(else_branch);
                }
                self.out.push(IrInstr::EndIf);
            }
            Stmt::While { cond, body } => {
                // assignments hoisted out of the condition run again before
                // every re-test
                let start = self.out.len();
                let cond = self.flatten(cond);
                let hoisted = self.out[start..].to_vec();
                self.out.push(IrInstr::While(cond));
                self.lower_block(body);
                self.out.extend(hoisted);
                self.out.push(IrInstr::EndWhile);
            }
            Stmt::Block(body) => {
                self.out.push(IrInstr::BlockStart);
                self.lower_block(body);
                self.out.push(IrInstr::BlockEnd);
            }
            Stmt::FuncDecl { name, params, body } => {
                self.out.push(IrInstr::FuncDecl {
                    name: name.clone(),
                    params: params.clone(),
                });
                self.lower_block(body);
                self.out.push(IrInstr::EndFunc);
            }
            Stmt::MacroDecl { name, body } => {
                self.out.push(IrInstr::MacroDecl(name.clone()));
                self.lower_block(body);
                self.out.push(IrInstr::EndMacro);
            }
            Stmt::Expr(Expr::Assign { name, value }) => self.lower_assign(name, value),
            Stmt::Expr(Expr::Call { callee, args }) => {
                let args = args.iter().map(|a| self.flatten(a)).collect();
                self.out.push(IrInstr::Call {
                    callee: callee.clone(),
                    args,
                });
            }
            Stmt::Expr(expr) => {
                let value = self.flatten(expr);
                self.out.push(IrInstr::Expr(value));
            }
        }
    }

    /// `a = b = e` lowers to `ASSIGN b = e` then `ASSIGN a = b`.
    fn lower_assign(&mut self, name: &str, value: &Expr) {
        let value = match value {
            Expr::Assign {
                name: inner,
                value: inner_value,
            } => {
                self.lower_assign(inner, inner_value);
                Operand::var(inner.clone())
            }
            other => self.flatten(other),
        };
        self.out.push(IrInstr::Assign {
            name: name.to_string(),
            value,
        });
    }

    /// Render an expression as an operand, folding constant subtrees.
    /// An assignment nested inside an expression is hoisted to an `ASSIGN`
    /// emitted before the instruction that uses it.
    pub fn flatten(&mut self, expr: &Expr) -> Operand {
        match expr {
            Expr::Literal(value) => literal(value),
            Expr::Variable(name) => Operand::var(name.clone()),
            Expr::Binary { op, left, right } => {
                let lhs = self.flatten(left);
                let rhs = self.flatten(right);
                Operand::binary(*op, lhs, rhs)
            }
            Expr::Unary { op, operand } => {
                let operand = self.flatten(operand);
                Operand::unary(*op, operand)
            }
            Expr::Logical { op, left, right } => {
                let lhs = self.flatten(left);
                let rhs = self.flatten(right);
                Operand::logical(*op, lhs, rhs)
            }
            Expr::Call { callee, args } => Operand::Call {
                callee: callee.clone(),
                args: args.iter().map(|a| self.flatten(a)).collect(),
            },
            Expr::Assign { name, value } => {
                self.lower_assign(name, value);
                Operand::var(name.clone())
            }
        }
    }
}

fn literal(value: &Value) -> Operand {
    match value {
        Value::Integer(n) => Operand::int(*n),
        Value::Float(n) => Operand::Number(Number::Float(*n)),
        Value::String(s) => Operand::Str(s.clone()),
        Value::Char(c) => Operand::int(*c as i64),
        Value::Bool(b) => Operand::int(*b as i64),
        Value::Null => Operand::int(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::macros::MacroEngine;
    use crate::frontend::parser::Parser;
    use crate::ir::instr::render;
    use pretty_assertions::assert_eq;

    fn ir(source: &str) -> IrOutput {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let tokens = MacroEngine::new().process(tokens).unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        generate(&program)
    }

    fn ir_text(source: &str) -> String {
        render(&ir(source).instrs)
    }

    #[test]
    fn test_countdown() {
        assert_eq!(
            ir_text("let x = 5; while (x) { print x; x = x - 1; }"),
            "[DECLARE] x = 5\n\
             [WHILE] x\n\
             [PRINT] -> x\n\
             [ASSIGN] x = (x - 1)\n\
             [END_WHILE]\n"
        );
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(
            ir_text("let a = 2 + 3 * 4; let b = -7 / 2; let c = 1 < 2; let d = 10 / 0;"),
            "[DECLARE] a = 14\n\
             [DECLARE] b = -4\n\
             [DECLARE] c = 1\n\
             [DECLARE] d = 0\n"
        );
    }

    #[test]
    fn test_partial_folding() {
        assert_eq!(
            ir_text("let y = 1; let x = y + (2 * 3);"),
            "[DECLARE] y = 1\n[DECLARE] x = (y + 6)\n"
        );
    }

    #[test]
    fn test_logical_not_folded() {
        assert_eq!(
            ir_text("let a = 1 && 0; let b = !1;"),
            "[DECLARE] a = (1 && 0)\n[DECLARE] b = (! 1)\n"
        );
    }

    #[test]
    fn test_if_else_and_block() {
        assert_eq!(
            ir_text("let x = 0; if (x > 0) { print 1; } else { print 2; } { let t = 3; }"),
            "[DECLARE] x = 0\n\
             [IF] (x > 0)\n\
             [PRINT] -> 1\n\
             [ELSE]\n\
             [PRINT] -> 2\n\
             [END_IF]\n\
             [BLOCK_START]\n\
             [DECLARE] t = 3\n\
             [BLOCK_END]\n"
        );
    }

    #[test]
    fn test_functions_and_calls() {
        assert_eq!(
            ir_text("func sq(n) { return n * n; } sq(3); let r = sq(4);"),
            "[FUNC_DECL] sq(n)\n\
             [RETURN] (n * n)\n\
             [END_FUNC]\n\
             [CALL] sq(3)\n\
             [DECLARE] r = sq(4)\n"
        );
    }

    #[test]
    fn test_chained_and_nested_assignment() {
        assert_eq!(
            ir_text("let a = 0; let b = 0; a = b = 3; print (a = 4) + 1;"),
            "[DECLARE] a = 0\n\
             [DECLARE] b = 0\n\
             [ASSIGN] b = 3\n\
             [ASSIGN] a = b\n\
             [ASSIGN] a = 4\n\
             [PRINT] -> (a + 1)\n"
        );
    }

    #[test]
    fn test_macro_decl_and_expansion() {
        assert_eq!(
            ir_text("macro one let k = 1; endmacro #one"),
            "[MACRO_DECL] one\n\
             [DECLARE] k = 1\n\
             [END_MACRO]\n\
             [DECLARE] k_1_0 = 1\n"
        );
    }

    #[test]
    fn test_literal_lowering() {
        assert_eq!(
            ir_text("print true; print 'A'; print null; print \"hi\";"),
            "[PRINT] -> 1\n[PRINT] -> 65\n[PRINT] -> 0\n[PRINT] -> \"hi\"\n"
        );
    }

    #[test]
    fn test_assignment_in_loop_condition_repeats() {
        assert_eq!(
            ir_text("let x = 3; while (x = x - 1) { print x; }"),
            "[DECLARE] x = 3\n\
             [ASSIGN] x = (x - 1)\n\
             [WHILE] x\n\
             [PRINT] -> x\n\
             [ASSIGN] x = (x - 1)\n\
             [END_WHILE]\n"
        );
    }

    #[test]
    fn test_nested_constructs_balance() {
        let out = ir("func f(a) { while (a) { if (a > 1) { { a = a - 1; } } else { a = 0; } } return a; }
             macro m print 1; endmacro
             let i = 2; while (i = i - 1) { #m }");
        assert_eq!(verify::check_balance(&out.instrs), Ok(()));
    }

    #[test]
    fn test_assign_before_declare_is_reported_not_fatal() {
        let out = ir("z = 1;");
        assert_eq!(out.instrs.len(), 1);
        assert!(out.diagnostics.iter().any(|d| d.to_string().contains("'z'")));
    }
}
