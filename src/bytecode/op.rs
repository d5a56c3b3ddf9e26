// =============================================================================
// OPCODE - Byte values of the register machine
// =============================================================================

/// Number of general-purpose registers. Register operands are `0..REGISTER_COUNT`.
pub const REGISTER_COUNT: usize = 8;

/// Highest address (and skip distance) a single operand byte can hold.
pub const MAX_ADDRESS: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// `MOV reg, imm`
    Mov = 0x10,
    /// `ADD reg, a, b`
    Add = 0x11,
    Sub = 0x12,
    Mul = 0x13,
    /// Floor division; a zero divisor yields 0.
    Div = 0x14,
    /// `OUT reg` appends the register value to the output sequence.
    Out = 0x20,
    /// `CALL addr`
    Call = 0x30,
    Return = 0x40,
    /// `IF reg, skip` skips forward when the register is zero.
    If = 0x50,
    /// `ELSE skip` always skips forward.
    Else = 0x51,
    EndIf = 0x52,
    /// `WHILE reg, skip`
    While = 0x60,
    EndWhile = 0x61,
    /// Halts the machine.
    FuncEnd = 0xFF,
}

impl Opcode {
    pub const ALL: [Opcode; 14] = [
        Opcode::Mov,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Out,
        Opcode::Call,
        Opcode::Return,
        Opcode::If,
        Opcode::Else,
        Opcode::EndIf,
        Opcode::While,
        Opcode::EndWhile,
        Opcode::FuncEnd,
    ];

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Opcode::ALL.into_iter().find(|op| *op as u8 == byte)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Number of operand bytes following the opcode.
    pub fn operand_count(self) -> usize {
        match self {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => 3,
            Opcode::Mov | Opcode::If | Opcode::While => 2,
            Opcode::Out | Opcode::Call | Opcode::Else => 1,
            Opcode::Return | Opcode::EndIf | Opcode::EndWhile | Opcode::FuncEnd => 0,
        }
    }

    /// Encoded size in bytes, opcode included.
    pub fn width(self) -> usize {
        1 + self.operand_count()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Mov => "MOV",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Out => "OUT",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::If => "IF",
            Opcode::Else => "ELSE",
            Opcode::EndIf => "END_IF",
            Opcode::While => "WHILE",
            Opcode::EndWhile => "END_WHILE",
            Opcode::FuncEnd => "FUNC_END",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_table() {
        let table: Vec<(u8, usize)> = Opcode::ALL.iter().map(|op| (op.byte(), op.width())).collect();
        assert_eq!(
            table,
            vec![
                (0x10, 3),
                (0x11, 4),
                (0x12, 4),
                (0x13, 4),
                (0x14, 4),
                (0x20, 2),
                (0x30, 2),
                (0x40, 1),
                (0x50, 3),
                (0x51, 2),
                (0x52, 1),
                (0x60, 3),
                (0x61, 1),
                (0xFF, 1),
            ]
        );
    }

    #[test]
    fn test_from_byte() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op));
        }
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x15), None);
    }
}
