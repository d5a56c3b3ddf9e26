use thiserror::Error;

/// A parsing error with source location.
///
/// `line` and `column` are 1-based positions taken from the offending token.
/// At end of input the parser points at the `Eof` token, so locations are
/// never `0:0`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("{line}:{column}: expected {expected}, got {got}")]
    Unexpected {
        expected: String,
        got: String,
        line: usize,
        column: usize,
    },

    #[error("{line}:{column}: invalid assignment target")]
    InvalidAssignmentTarget { line: usize, column: usize },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::Unexpected { line, .. } | ParseError::InvalidAssignmentTarget { line, .. } => {
                *line
            }
        }
    }
}
