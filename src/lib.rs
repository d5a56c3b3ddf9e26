//! # Rexion
//!
//! A compiler and register machine for a small imperative language.
//!
//! ```text
//! source ─► tokens ─► macro expansion ─► AST ─► IR ─► bytecode ─► VM
//! ```
//!
//! [`compile`] runs the front half (lexing, macros, parsing, IR lowering),
//! [`assemble`] turns IR into a [`Program`], and [`execute`] runs it.

pub mod bytecode;
pub mod frontend;
pub mod ir;
pub mod lang;
pub mod runtime;

pub use bytecode::{AssembleError, Program};
pub use frontend::macros::ExpansionTrace;
pub use frontend::{LexError, LintWarning, ParseError, Token};
pub use ir::{IrDiagnostic, IrInstr};
pub use lang::node::Stmt;
pub use runtime::{Execution, Vm, VmConfig, VmError};

use frontend::{Lexer, MacroEngine, Parser, lint_tokens};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Everything the front half produced for one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    /// Token stream after macro expansion and unrolling.
    pub tokens: Vec<Token>,
    pub ast: Vec<Stmt>,
    pub ir: Vec<IrInstr>,
    pub diagnostics: Vec<IrDiagnostic>,
    pub lints: Vec<LintWarning>,
    pub expansions: Vec<ExpansionTrace>,
}

/// Lex, expand, parse and lower `source` to IR.
pub fn compile(source: &str) -> Result<Compilation, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;

    let mut engine = MacroEngine::new();
    let tokens = engine.process(tokens)?;
    let lints = lint_tokens(&tokens);

    let ast = Parser::new(tokens.clone()).parse()?;
    let output = ir::generate(&ast);

    Ok(Compilation {
        tokens,
        ast,
        ir: output.instrs,
        diagnostics: output.diagnostics,
        lints,
        expansions: engine.trace().to_vec(),
    })
}

/// Assemble IR into a program image.
pub fn assemble(instrs: &[IrInstr]) -> Result<Program, AssembleError> {
    bytecode::assemble(instrs)
}

/// Run a program on a fresh VM with default limits.
pub fn execute(program: &Program) -> Result<Execution, VmError> {
    execute_with(program, VmConfig::default())
}

pub fn execute_with(program: &Program, config: VmConfig) -> Result<Execution, VmError> {
    Vm::with_config(config).run(&program.code)
}
