use crate::bytecode::disasm::{Decoded, disassemble};
use crate::bytecode::instruction::{DecodeError, Instruction};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("verify error: {0}")]
    Decode(#[from] DecodeError),

    #[error("verify error: {mnemonic} at offset {offset} targets {target}, which is not an instruction boundary")]
    BadTarget {
        mnemonic: &'static str,
        offset: usize,
        target: usize,
    },

    #[error("verify error: END_WHILE at offset {offset} has no open WHILE")]
    UnmatchedEndWhile { offset: usize },

    #[error("verify error: WHILE at offset {offset} exits to {target}, expected {expected} (past its END_WHILE)")]
    LoopExit {
        offset: usize,
        target: usize,
        expected: usize,
    },

    #[error("verify error: WHILE at offset {offset} is never closed")]
    UnclosedWhile { offset: usize },
}

/// Static check of a byte stream before running it.
///
/// Every byte must decode, skips may land on any instruction boundary or
/// the end of the code, calls must land on an instruction, and each WHILE
/// must exit just past its own END_WHILE.
///
/// NOTE: this is a linear scan. IF/ELSE nesting is not checked because the
/// VM treats both as plain forward jumps.
pub fn verify(code: &[u8]) -> Result<(), VerifyError> {
    let decoded = disassemble(code)?;
    let boundaries: HashSet<usize> = decoded.iter().map(|d| d.offset).collect();

    for d in &decoded {
        let Some(target) = d.target() else {
            continue;
        };
        let landed = match d.instruction {
            Instruction::Call { .. } => boundaries.contains(&target),
            _ => boundaries.contains(&target) || target == code.len(),
        };
        if !landed {
            return Err(VerifyError::BadTarget {
                mnemonic: d.instruction.opcode().mnemonic(),
                offset: d.offset,
                target,
            });
        }
    }

    check_loops(&decoded)
}

fn check_loops(decoded: &[Decoded]) -> Result<(), VerifyError> {
    let mut open: Vec<&Decoded> = Vec::new();

    for d in decoded {
        match d.instruction {
            Instruction::While { .. } => open.push(d),
            Instruction::EndWhile => {
                let start = open
                    .pop()
                    .ok_or(VerifyError::UnmatchedEndWhile { offset: d.offset })?;
                let target = start.target().unwrap_or(start.end());
                if target != d.end() {
                    return Err(VerifyError::LoopExit {
                        offset: start.offset,
                        target,
                        expected: d.end(),
                    });
                }
            }
            _ => {}
        }
    }

    match open.pop() {
        Some(start) => Err(VerifyError::UnclosedWhile {
            offset: start.offset,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_passes() {
        let code = [
            0x10, 0, 5, 0x60, 0, 7, 0x20, 0, 0x12, 0, 0x80, 0x01, 0x61, 0xFF,
        ];
        assert_eq!(verify(&code), Ok(()));
    }

    #[test]
    fn test_skip_into_operand_bytes() {
        // IF r0, +1 lands inside the OUT operand
        let code = [0x50, 0, 1, 0x20, 0, 0x52];
        assert_eq!(
            verify(&code),
            Err(VerifyError::BadTarget {
                mnemonic: "IF",
                offset: 0,
                target: 4
            })
        );
    }

    #[test]
    fn test_skip_to_end_of_code_is_fine() {
        assert_eq!(verify(&[0x51, 1, 0x40]), Ok(()));
    }

    #[test]
    fn test_call_must_hit_an_instruction() {
        let code = [0x30, 9, 0xFF];
        assert!(matches!(
            verify(&code),
            Err(VerifyError::BadTarget { mnemonic: "CALL", .. })
        ));
    }

    #[test]
    fn test_loop_structure() {
        assert_eq!(
            verify(&[0x61]),
            Err(VerifyError::UnmatchedEndWhile { offset: 0 })
        );
        assert_eq!(
            verify(&[0x60, 0, 0, 0xFF]),
            Err(VerifyError::UnclosedWhile { offset: 0 })
        );
        // WHILE exits before its END_WHILE
        assert!(matches!(
            verify(&[0x60, 0, 0, 0x61]),
            Err(VerifyError::LoopExit { expected: 4, .. })
        ));
    }

    #[test]
    fn test_decode_failures_surface() {
        assert!(matches!(
            verify(&[0x13, 0]),
            Err(VerifyError::Decode(DecodeError::Truncated { .. }))
        ));
    }
}
