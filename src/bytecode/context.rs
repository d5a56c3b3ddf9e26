use crate::bytecode::assemble_error::AssembleError;
use crate::bytecode::instruction::Instruction;
use crate::bytecode::op::{MAX_ADDRESS, REGISTER_COUNT};
use std::collections::HashMap;

/// What occupies a register during lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Named(String),
    Temp,
    /// Owned by a function body that was lowered earlier.
    Reserved,
}

/// Register allocation state: first-fit over [`REGISTER_COUNT`] slots.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    slots: [Option<Slot>; REGISTER_COUNT],
    /// Names first bound inside each open `BLOCK_START` scope.
    frames: Vec<Vec<String>>,
    /// Bitmask of registers handed out since the last `reserve_touched`.
    touched: u8,
}

/// Result of binding a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub reg: u8,
    /// The name had no register before this call.
    pub fresh: bool,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<u8> {
        self.slots.iter().position(|slot| match slot {
            Some(Slot::Named(n)) => n == name,
            _ => false,
        }).map(|r| r as u8)
    }

    /// Reuse the register already bound to `name`, or take the first free
    /// one. A fresh binding made inside a block scope is released when the
    /// scope closes.
    pub fn bind(&mut self, name: &str) -> Result<Binding, AssembleError> {
        let binding = self.bind_global(name)?;
        if binding.fresh {
            if let Some(frame) = self.frames.last_mut() {
                frame.push(name.to_string());
            }
        }
        Ok(binding)
    }

    /// Like [`bind`](Self::bind) but never scoped to the current block.
    pub fn bind_global(&mut self, name: &str) -> Result<Binding, AssembleError> {
        if let Some(reg) = self.lookup(name) {
            return Ok(Binding { reg, fresh: false });
        }
        let reg = self.claim(name, Slot::Named(name.to_string()))?;
        Ok(Binding { reg, fresh: true })
    }

    pub fn temp(&mut self) -> Result<u8, AssembleError> {
        self.claim("temporary", Slot::Temp)
    }

    /// Free a temporary. Named and reserved registers are left alone.
    pub fn release(&mut self, reg: u8) {
        if let Some(slot) = self.slots.get_mut(reg as usize) {
            if *slot == Some(Slot::Temp) {
                *slot = None;
            }
        }
    }

    pub fn release_all(&mut self, regs: impl IntoIterator<Item = Option<u8>>) {
        for reg in regs.into_iter().flatten() {
            self.release(reg);
        }
    }

    pub fn push_scope(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop_scope(&mut self) {
        for name in self.frames.pop().unwrap_or_default() {
            if let Some(reg) = self.lookup(&name) {
                self.slots[reg as usize] = None;
            }
        }
    }

    /// Mark every register touched since the last call, and now free, as
    /// reserved. Lowering a function body ends with this so later code
    /// never shares its registers.
    pub fn reserve_touched(&mut self) {
        for (reg, slot) in self.slots.iter_mut().enumerate() {
            if self.touched & (1 << reg) != 0 && slot.is_none() {
                *slot = Some(Slot::Reserved);
            }
        }
        self.touched = 0;
    }

    pub fn reset_touched(&mut self) {
        self.touched = 0;
    }

    /// `name=rN` for every occupied register.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(reg, slot)| {
                let label = match slot.as_ref()? {
                    Slot::Named(name) => name.as_str(),
                    Slot::Temp => "<temp>",
                    Slot::Reserved => "<reserved>",
                };
                Some(format!("{}=r{}", label, reg))
            })
            .collect();
        parts.join(", ")
    }

    fn claim(&mut self, name: &str, slot: Slot) -> Result<u8, AssembleError> {
        let reg = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| AssembleError::RegisterExhausted {
                name: name.to_string(),
                bound: self.describe(),
            })?;
        self.slots[reg] = Some(slot);
        self.touched |= 1 << reg;
        Ok(reg as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchKind {
    IfSkip { block: usize },
    ElseSkip { block: usize },
    WhileSkip { block: usize },
    Call { label: String },
}

/// A placeholder byte at `at` waiting for its value. Skips are measured
/// from `base`, the end of the instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub kind: PatchKind,
    pub at: usize,
    pub base: usize,
}

/// Offsets of one IF or WHILE construct, filled in as its pieces are
/// emitted. For IF, `end` is the END_IF offset; for WHILE it is the offset
/// just past END_WHILE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockBounds {
    pub else_body: Option<usize>,
    pub end: Option<usize>,
}

/// Per-pass assembly state: the code image, registers, labels and
/// pending patches. Writes go to `cursor`, which may be moved so function
/// bodies can be placed at addresses known from layout.
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    pub code: Vec<u8>,
    cursor: usize,
    pub registers: RegisterMap,
    pub labels: HashMap<String, usize>,
    pub patches: Vec<Patch>,
    pub blocks: Vec<BlockBounds>,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn seek(&mut self, offset: usize) {
        if self.code.len() < offset {
            self.code.resize(offset, 0);
        }
        self.cursor = offset;
    }

    /// Encode `instr` at the cursor and return its offset.
    pub fn emit(&mut self, instr: &Instruction) -> usize {
        let offset = self.cursor;
        let mut bytes = Vec::with_capacity(instr.width());
        instr.encode_into(&mut bytes);
        for byte in bytes {
            if self.cursor < self.code.len() {
                self.code[self.cursor] = byte;
            } else {
                self.code.push(byte);
            }
            self.cursor += 1;
        }
        offset
    }

    /// Emit an instruction whose last operand byte is filled in later.
    pub fn emit_patched(&mut self, instr: &Instruction, kind: PatchKind) -> usize {
        let offset = self.emit(instr);
        self.patches.push(Patch {
            kind,
            at: self.cursor - 1,
            base: self.cursor,
        });
        offset
    }

    pub fn open_block(&mut self) -> usize {
        self.blocks.push(BlockBounds::default());
        self.blocks.len() - 1
    }

    pub fn mark_else_body(&mut self, block: usize) {
        if let Some(bounds) = self.blocks.get_mut(block) {
            bounds.else_body = Some(self.cursor);
        }
    }

    pub fn close_block(&mut self, block: usize, end: usize) {
        if let Some(bounds) = self.blocks.get_mut(block) {
            bounds.end = Some(end);
        }
    }

    pub fn define_label(&mut self, name: &str) -> Result<(), AssembleError> {
        if self.labels.insert(name.to_string(), self.cursor).is_some() {
            return Err(AssembleError::DuplicateFunction {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Fill every placeholder. Skips must fit in one byte, and call
    /// targets must be defined and addressable.
    pub fn resolve(&mut self) -> Result<(), AssembleError> {
        for patch in &self.patches {
            let value = match &patch.kind {
                PatchKind::Call { label } => {
                    let address = *self.labels.get(label).ok_or_else(|| {
                        AssembleError::UnresolvedCall {
                            name: label.clone(),
                        }
                    })?;
                    if address > MAX_ADDRESS {
                        return Err(AssembleError::AddressOutOfRange {
                            label: label.clone(),
                            address,
                        });
                    }
                    address
                }
                PatchKind::IfSkip { block }
                | PatchKind::ElseSkip { block }
                | PatchKind::WhileSkip { block } => {
                    let bounds = self.blocks.get(*block).copied().unwrap_or_default();
                    let target = match patch.kind {
                        PatchKind::IfSkip { .. } => bounds.else_body.or(bounds.end),
                        _ => bounds.end,
                    };
                    let distance = target
                        .and_then(|t| t.checked_sub(patch.base))
                        .ok_or(AssembleError::UnresolvedPatch { offset: patch.at })?;
                    if distance > MAX_ADDRESS {
                        return Err(AssembleError::SkipOutOfRange {
                            offset: patch.at,
                            distance,
                        });
                    }
                    distance
                }
            };
            let slot = self
                .code
                .get_mut(patch.at)
                .ok_or(AssembleError::UnresolvedPatch { offset: patch.at })?;
            *slot = value as u8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_and_reuse() {
        let mut regs = RegisterMap::new();
        assert_eq!(regs.bind("x").unwrap(), Binding { reg: 0, fresh: true });
        assert_eq!(regs.temp().unwrap(), 1);
        assert_eq!(regs.bind("y").unwrap().reg, 2);
        assert_eq!(regs.bind("x").unwrap(), Binding { reg: 0, fresh: false });
        regs.release(1);
        assert_eq!(regs.bind("z").unwrap().reg, 1);
    }

    #[test]
    fn test_exhaustion_names_live_bindings() {
        let mut regs = RegisterMap::new();
        for i in 0..REGISTER_COUNT {
            regs.bind(&format!("v{}", i)).unwrap();
        }
        match regs.bind("extra") {
            Err(AssembleError::RegisterExhausted { name, bound }) => {
                assert_eq!(name, "extra");
                assert!(bound.contains("v7=r7"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_scope_releases_inner_names_only() {
        let mut regs = RegisterMap::new();
        regs.bind("outer").unwrap();
        regs.push_scope();
        regs.bind("inner").unwrap();
        regs.bind("outer").unwrap();
        regs.pop_scope();
        assert_eq!(regs.lookup("outer"), Some(0));
        assert_eq!(regs.lookup("inner"), None);
    }

    #[test]
    fn test_reserved_registers_are_skipped() {
        let mut regs = RegisterMap::new();
        regs.bind_global("p").unwrap();
        regs.reset_touched();
        let t = regs.temp().unwrap();
        regs.release(t);
        regs.reserve_touched();
        assert_eq!(regs.temp().unwrap(), 2);
        assert!(regs.describe().contains("<reserved>=r1"));
    }

    #[test]
    fn test_resolve_skips() {
        let mut ctx = CompilationContext::new();
        let block = ctx.open_block();
        ctx.emit_patched(&Instruction::If { reg: 0, skip: 0 }, PatchKind::IfSkip { block });
        ctx.emit(&Instruction::Out { reg: 0 });
        let end = ctx.position();
        ctx.close_block(block, end);
        ctx.emit(&Instruction::EndIf);
        ctx.resolve().unwrap();
        assert_eq!(ctx.code, vec![0x50, 0, 2, 0x20, 0, 0x52]);
    }

    #[test]
    fn test_unresolved_call() {
        let mut ctx = CompilationContext::new();
        ctx.emit_patched(
            &Instruction::Call { addr: 0 },
            PatchKind::Call { label: "nowhere".into() },
        );
        assert_eq!(
            ctx.resolve(),
            Err(AssembleError::UnresolvedCall { name: "nowhere".into() })
        );
    }

    #[test]
    fn test_seek_places_code() {
        let mut ctx = CompilationContext::new();
        ctx.seek(3);
        ctx.emit(&Instruction::Return);
        ctx.seek(0);
        ctx.emit(&Instruction::Mov { dst: 1, value: 9 });
        assert_eq!(ctx.code, vec![0x10, 1, 9, 0x40]);
    }
}
