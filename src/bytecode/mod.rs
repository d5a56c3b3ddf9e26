pub mod assemble;
pub mod assemble_error;
pub mod context;
pub mod disasm;
pub mod instruction;
pub mod op;
pub mod program;
pub mod verify;

pub use assemble::assemble;
pub use assemble_error::AssembleError;
pub use instruction::{Instruction, Src};
pub use op::Opcode;
pub use program::Program;
