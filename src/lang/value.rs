/// Literal value as written in source.
///
/// Only integers survive to the register machine; the other variants are
/// lowered (`true` → 1, chars → code point) or rejected by the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer.
    Integer(i64),

    /// 64-bit floating-point number.
    Float(f64),

    /// UTF-8 string value.
    String(String),

    /// Character literal: `'a'`.
    Char(char),

    /// Boolean value.
    Bool(bool),

    Null,
}

impl std::fmt::Display for Value {
    /// Format a value using source syntax.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "\"{}\"", s.escape_default()),
            Value::Char(c) => write!(f, "'{}'", c.escape_default()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
        }
    }
}
