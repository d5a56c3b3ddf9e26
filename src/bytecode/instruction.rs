use crate::bytecode::op::{Opcode, REGISTER_COUNT};
use std::fmt;
use thiserror::Error;

/// Source operand tag: a byte with this bit set names a register.
pub const REGISTER_FLAG: u8 = 0x80;

/// Largest immediate a source operand can carry.
pub const MAX_SOURCE_IMMEDIATE: u8 = 0x7F;

/// Source operand of ADD/SUB/MUL/DIV: `0x80 | r` reads register `r`,
/// `0x00..=0x7F` is an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg(u8),
    Imm(u8),
}

impl Src {
    pub fn encode(self) -> u8 {
        match self {
            Src::Reg(r) => REGISTER_FLAG | r,
            Src::Imm(v) => v,
        }
    }

    pub fn decode(byte: u8) -> Src {
        if byte & REGISTER_FLAG != 0 {
            Src::Reg(byte & !REGISTER_FLAG)
        } else {
            Src::Imm(byte)
        }
    }
}

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Src::Reg(r) => write!(f, "r{}", r),
            Src::Imm(v) => write!(f, "#{}", v),
        }
    }
}

/// A decoded instruction. Skips are forward byte distances measured from
/// the end of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Mov { dst: u8, value: u8 },
    Add { dst: u8, a: Src, b: Src },
    Sub { dst: u8, a: Src, b: Src },
    Mul { dst: u8, a: Src, b: Src },
    Div { dst: u8, a: Src, b: Src },
    Out { reg: u8 },
    Call { addr: u8 },
    Return,
    If { reg: u8, skip: u8 },
    Else { skip: u8 },
    EndIf,
    While { reg: u8, skip: u8 },
    EndWhile,
    FuncEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{opcode:02X} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("truncated {mnemonic} at offset {offset}: needs {needed} operand byte(s)")]
    Truncated {
        mnemonic: &'static str,
        offset: usize,
        needed: usize,
    },

    #[error("invalid register r{register} at offset {offset}")]
    InvalidRegister { register: u8, offset: usize },

    #[error("no instruction at offset {offset}")]
    OutOfBounds { offset: usize },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Mov { .. } => Opcode::Mov,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Mul { .. } => Opcode::Mul,
            Instruction::Div { .. } => Opcode::Div,
            Instruction::Out { .. } => Opcode::Out,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Return => Opcode::Return,
            Instruction::If { .. } => Opcode::If,
            Instruction::Else { .. } => Opcode::Else,
            Instruction::EndIf => Opcode::EndIf,
            Instruction::While { .. } => Opcode::While,
            Instruction::EndWhile => Opcode::EndWhile,
            Instruction::FuncEnd => Opcode::FuncEnd,
        }
    }

    pub fn width(&self) -> usize {
        self.opcode().width()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().byte());
        match *self {
            Instruction::Mov { dst, value } => out.extend([dst, value]),
            Instruction::Add { dst, a, b }
            | Instruction::Sub { dst, a, b }
            | Instruction::Mul { dst, a, b }
            | Instruction::Div { dst, a, b } => out.extend([dst, a.encode(), b.encode()]),
            Instruction::Out { reg } => out.push(reg),
            Instruction::Call { addr } => out.push(addr),
            Instruction::If { reg, skip } | Instruction::While { reg, skip } => {
                out.extend([reg, skip])
            }
            Instruction::Else { skip } => out.push(skip),
            Instruction::Return
            | Instruction::EndIf
            | Instruction::EndWhile
            | Instruction::FuncEnd => {}
        }
    }

    /// Decode the instruction starting at `offset`.
    ///
    /// # Errors
    ///
    /// Unknown opcode, missing operand bytes, or a register operand outside
    /// the register file.
    pub fn decode(code: &[u8], offset: usize) -> Result<Instruction, DecodeError> {
        let byte = code
            .get(offset)
            .copied()
            .ok_or(DecodeError::OutOfBounds { offset })?;
        let opcode =
            Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { opcode: byte, offset })?;

        let needed = opcode.operand_count();
        let operands = code
            .get(offset + 1..offset + 1 + needed)
            .ok_or(DecodeError::Truncated {
                mnemonic: opcode.mnemonic(),
                offset,
                needed,
            })?;

        let reg = |i: usize| -> Result<u8, DecodeError> {
            let register = operands[i];
            if (register as usize) < REGISTER_COUNT {
                Ok(register)
            } else {
                Err(DecodeError::InvalidRegister { register, offset })
            }
        };
        let src = |i: usize| -> Result<Src, DecodeError> {
            match Src::decode(operands[i]) {
                Src::Reg(register) if register as usize >= REGISTER_COUNT => {
                    Err(DecodeError::InvalidRegister { register, offset })
                }
                other => Ok(other),
            }
        };

        Ok(match opcode {
            Opcode::Mov => Instruction::Mov {
                dst: reg(0)?,
                value: operands[1],
            },
            Opcode::Add => Instruction::Add {
                dst: reg(0)?,
                a: src(1)?,
                b: src(2)?,
            },
            Opcode::Sub => Instruction::Sub {
                dst: reg(0)?,
                a: src(1)?,
                b: src(2)?,
            },
            Opcode::Mul => Instruction::Mul {
                dst: reg(0)?,
                a: src(1)?,
                b: src(2)?,
            },
            Opcode::Div => Instruction::Div {
                dst: reg(0)?,
                a: src(1)?,
                b: src(2)?,
            },
            Opcode::Out => Instruction::Out { reg: reg(0)? },
            Opcode::Call => Instruction::Call { addr: operands[0] },
            Opcode::Return => Instruction::Return,
            Opcode::If => Instruction::If {
                reg: reg(0)?,
                skip: operands[1],
            },
            Opcode::Else => Instruction::Else { skip: operands[0] },
            Opcode::EndIf => Instruction::EndIf,
            Opcode::While => Instruction::While {
                reg: reg(0)?,
                skip: operands[1],
            },
            Opcode::EndWhile => Instruction::EndWhile,
            Opcode::FuncEnd => Instruction::FuncEnd,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().mnemonic();
        match self {
            Instruction::Mov { dst, value } => write!(f, "{:<9} r{}, {}", name, dst, value),
            Instruction::Add { dst, a, b }
            | Instruction::Sub { dst, a, b }
            | Instruction::Mul { dst, a, b }
            | Instruction::Div { dst, a, b } => write!(f, "{:<9} r{}, {}, {}", name, dst, a, b),
            Instruction::Out { reg } => write!(f, "{:<9} r{}", name, reg),
            Instruction::Call { addr } => write!(f, "{:<9} @{:04}", name, addr),
            Instruction::If { reg, skip } | Instruction::While { reg, skip } => {
                write!(f, "{:<9} r{}, +{}", name, reg, skip)
            }
            Instruction::Else { skip } => write!(f, "{:<9} +{}", name, skip),
            Instruction::Return
            | Instruction::EndIf
            | Instruction::EndWhile
            | Instruction::FuncEnd => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(instr: Instruction) -> Vec<u8> {
        let mut out = Vec::new();
        instr.encode_into(&mut out);
        out
    }

    #[test]
    fn test_encoding_widths_match_table() {
        let samples = [
            Instruction::Mov { dst: 1, value: 200 },
            Instruction::Sub {
                dst: 0,
                a: Src::Reg(0),
                b: Src::Imm(1),
            },
            Instruction::Out { reg: 3 },
            Instruction::Call { addr: 9 },
            Instruction::If { reg: 2, skip: 4 },
            Instruction::Else { skip: 7 },
            Instruction::EndWhile,
        ];
        for instr in samples {
            assert_eq!(encode(instr).len(), instr.width(), "{}", instr);
        }
    }

    #[test]
    fn test_source_operand_tagging() {
        assert_eq!(
            encode(Instruction::Add {
                dst: 2,
                a: Src::Reg(7),
                b: Src::Imm(127),
            }),
            vec![0x11, 2, 0x87, 0x7F]
        );
        assert_eq!(Src::decode(0x85), Src::Reg(5));
        assert_eq!(Src::decode(0x05), Src::Imm(5));
    }

    #[test]
    fn test_decode() {
        let code = [0x10, 0, 5, 0x60, 0, 9];
        assert_eq!(
            Instruction::decode(&code, 0),
            Ok(Instruction::Mov { dst: 0, value: 5 })
        );
        assert_eq!(
            Instruction::decode(&code, 3),
            Ok(Instruction::While { reg: 0, skip: 9 })
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Instruction::decode(&[0x99], 0),
            Err(DecodeError::UnknownOpcode {
                opcode: 0x99,
                offset: 0
            })
        );
        assert!(matches!(
            Instruction::decode(&[0x11, 0, 1], 0),
            Err(DecodeError::Truncated { needed: 3, .. })
        ));
        assert_eq!(
            Instruction::decode(&[0x20, 8], 0),
            Err(DecodeError::InvalidRegister {
                register: 8,
                offset: 0
            })
        );
        assert_eq!(
            Instruction::decode(&[0x11, 0, 0x88, 0], 0),
            Err(DecodeError::InvalidRegister {
                register: 8,
                offset: 0
            })
        );
    }

    #[test]
    fn test_display() {
        let instr = Instruction::Sub {
            dst: 0,
            a: Src::Reg(0),
            b: Src::Imm(1),
        };
        assert_eq!(instr.to_string(), "SUB       r0, r0, #1");
        assert_eq!(Instruction::Call { addr: 12 }.to_string(), "CALL      @0012");
    }
}
