//! Linear intermediate representation between the AST and bytecode.

pub mod generate;
pub mod instr;
pub mod operand;
pub mod text;
pub mod verify;

pub use generate::{IrOutput, generate};
pub use instr::IrInstr;
pub use operand::{Number, Operand};
pub use verify::IrDiagnostic;
