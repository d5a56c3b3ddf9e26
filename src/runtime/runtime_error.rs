use crate::bytecode::instruction::DecodeError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("runtime error: unknown opcode 0x{opcode:02X} at pc={pc}")]
    UnknownOpcode { opcode: u8, pc: usize },

    #[error("runtime error: truncated {mnemonic} at pc={pc}")]
    TruncatedInstruction { mnemonic: &'static str, pc: usize },

    #[error("runtime error: invalid register r{register} at pc={pc}")]
    InvalidRegister { register: u8, pc: usize },

    #[error("runtime error: execution step limit exceeded ({limit})")]
    StepLimitExceeded { limit: usize },

    #[error("runtime error: call depth limit exceeded ({limit}) at pc={pc} - possible infinite recursion")]
    CallDepthExceeded { limit: usize, pc: usize },
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownOpcode { opcode, offset } => VmError::UnknownOpcode {
                opcode,
                pc: offset,
            },
            DecodeError::Truncated {
                mnemonic, offset, ..
            } => VmError::TruncatedInstruction {
                mnemonic,
                pc: offset,
            },
            DecodeError::InvalidRegister { register, offset } => VmError::InvalidRegister {
                register,
                pc: offset,
            },
            DecodeError::OutOfBounds { offset } => VmError::TruncatedInstruction {
                mnemonic: "instruction",
                pc: offset,
            },
        }
    }
}
