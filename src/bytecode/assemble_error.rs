use crate::ir::verify::StructureError;
use thiserror::Error;

/// Failure to turn IR into bytecode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssembleError {
    #[error("assemble error: call to undefined function '{name}'\n  hint: declare it with `func {name}(...) {{ ... }}`")]
    UnresolvedCall { name: String },

    #[error("assemble error: internal error: placeholder at offset {offset} was never resolved")]
    UnresolvedPatch { offset: usize },

    #[error("assemble error: no free register for '{name}' (live: {bound})\n  hint: at most 8 values can be live at once; split long expressions or scope variables in blocks")]
    RegisterExhausted { name: String, bound: String },

    #[error("assemble error: function '{label}' starts at offset {address}, beyond the one-byte address range\n  hint: shorten the main program or move large functions last")]
    AddressOutOfRange { label: String, address: usize },

    #[error("assemble error: skip of {distance} bytes at offset {offset} does not fit in one byte\n  hint: move part of the body into a function")]
    SkipOutOfRange { offset: usize, distance: usize },

    #[error("assemble error: cannot load '{operand}' into a register: {reason}")]
    UnsupportedOperand { operand: String, reason: String },

    #[error("assemble error: '{name}' takes {expected} argument(s) but {got} were given")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("assemble error: function '{name}' is declared more than once")]
    DuplicateFunction { name: String },

    #[error("assemble error: recursive call {}\n  hint: a function cannot call itself, directly or through other functions; use a while loop instead", cycle.join(" -> "))]
    RecursiveCall { cycle: Vec<String> },

    #[error("assemble error: unbalanced IR: {0}")]
    Unbalanced(#[from] StructureError),

    #[error("assemble error: internal error: '{label}' laid out at {expected} but emitted at {actual}")]
    LayoutMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
}

impl AssembleError {
    pub fn unsupported(operand: &impl ToString, reason: impl Into<String>) -> Self {
        AssembleError::UnsupportedOperand {
            operand: operand.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_hints() {
        let err = AssembleError::UnresolvedCall { name: "f".into() };
        assert_eq!(
            err.to_string(),
            "assemble error: call to undefined function 'f'\n  hint: declare it with `func f(...) { ... }`"
        );

        let err = AssembleError::ArityMismatch {
            name: "add".into(),
            expected: 2,
            got: 1,
        };
        assert!(!err.to_string().contains("hint"));
    }

    #[test]
    fn test_recursive_call_shows_cycle() {
        let err = AssembleError::RecursiveCall {
            cycle: vec!["even".into(), "odd".into(), "even".into()],
        };
        assert!(
            err.to_string()
                .starts_with("assemble error: recursive call even -> odd -> even\n  hint:")
        );
    }

    #[test]
    fn test_structure_error_converts() {
        let err: AssembleError = StructureError {
            index: 3,
            message: "IF is never closed".into(),
        }
        .into();
        assert_eq!(err.to_string(), "assemble error: unbalanced IR: ir[3]: IF is never closed");
    }
}
