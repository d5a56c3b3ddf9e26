use crate::bytecode::instruction::{DecodeError, Instruction};
use crate::bytecode::program::Program;
use std::collections::BTreeSet;
use std::fmt::Write;

/// An instruction together with the offset it was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub offset: usize,
    pub instruction: Instruction,
}

impl Decoded {
    /// Offset just past this instruction.
    pub fn end(&self) -> usize {
        self.offset + self.instruction.width()
    }

    /// Where control may transfer to, other than falling through.
    pub fn target(&self) -> Option<usize> {
        match self.instruction {
            Instruction::If { skip, .. }
            | Instruction::Else { skip }
            | Instruction::While { skip, .. } => Some(self.end() + skip as usize),
            Instruction::Call { addr } => Some(addr as usize),
            _ => None,
        }
    }
}

/// Decode a whole byte stream, instruction by instruction.
pub fn disassemble(code: &[u8]) -> Result<Vec<Decoded>, DecodeError> {
    let mut decoded = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instruction = Instruction::decode(code, offset)?;
        decoded.push(Decoded {
            offset,
            instruction,
        });
        offset += instruction.width();
    }
    Ok(decoded)
}

pub fn encode(instrs: &[Instruction]) -> Vec<u8> {
    let mut code = Vec::new();
    for instr in instrs {
        instr.encode_into(&mut code);
    }
    code
}

fn collect_jump_targets(decoded: &[Decoded]) -> BTreeSet<usize> {
    decoded.iter().filter_map(Decoded::target).collect()
}

/// Human-readable listing. Function entries get a header, jump and call
/// targets are marked with `►`.
pub fn listing(program: &Program) -> Result<String, DecodeError> {
    let decoded = disassemble(&program.code)?;
    let targets = collect_jump_targets(&decoded);
    let mut out = String::new();

    let rule = "════════════════════════════════════════";
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, " {} bytes, {} instructions", program.code.len(), decoded.len());
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "main:");

    for d in &decoded {
        if let Some(name) = program.symbol_at(d.offset) {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}:", name);
        }
        let is_target = targets.contains(&d.offset);
        if is_target {
            let _ = writeln!(out, "      ┌──────────────────────────────────");
        }

        let marker = if is_target { "► " } else { "  " };
        let _ = write!(out, "{:04} {}{}", d.offset, marker, d.instruction);
        match (d.instruction, d.target()) {
            (Instruction::Call { .. }, Some(target)) => match program.symbol_at(target) {
                Some(name) => {
                    let _ = write!(out, "  ; {}", name);
                }
                None => {
                    let _ = write!(out, "  ; ?");
                }
            },
            (_, Some(target)) => {
                let _ = write!(out, "  ↓ (→ {:04})", target);
            }
            _ => {}
        }
        let _ = writeln!(out);
    }

    Ok(out)
}

/// Sixteen bytes per row, prefixed by the row offset.
pub fn hex_dump(code: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in code.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let _ = writeln!(out, "{:04X}  {}", row * 16, bytes.join(" "));
    }
    out
}
