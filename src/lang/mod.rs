//! # Rexion syntax tree
//!
//! The AST produced by the parser and lowered by the IR generator, plus the
//! integer arithmetic shared by the constant folder and the VM.
//!
//! ## Conventions
//!
//! - All integers are `i64`; division and modulo round toward negative infinity.
//! - Division by zero yields `0` rather than failing.

pub mod arith;
pub mod node;
pub mod value;
