use crate::lang::arith;
use crate::lang::node::{BinaryOp, LogicalOp, UnaryOp};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref NUMERIC_LITERAL: Regex = Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric literal pattern");
}

/// True when `text` is a numeric literal: optional minus, digits, optional
/// fractional part.
pub fn is_numeric_literal(text: &str) -> bool {
    NUMERIC_LITERAL.is_match(text)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::Float(n) => n == 0.0,
        }
    }

    /// Evaluate `self op rhs`. Integer pairs use the shared wrapping
    /// arithmetic; any float operand promotes both sides. Comparisons yield
    /// `Int(1)` or `Int(0)`.
    pub fn apply(self, op: BinaryOp, rhs: Number) -> Number {
        let truth = |b: bool| Number::Int(b as i64);
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => match op {
                BinaryOp::Add => Number::Int(arith::add(a, b)),
                BinaryOp::Sub => Number::Int(arith::sub(a, b)),
                BinaryOp::Mul => Number::Int(arith::mul(a, b)),
                BinaryOp::Div => Number::Int(arith::floor_div(a, b)),
                BinaryOp::Mod => Number::Int(arith::floor_mod(a, b)),
                BinaryOp::Eq => truth(a == b),
                BinaryOp::NotEq => truth(a != b),
                BinaryOp::Lt => truth(a < b),
                BinaryOp::Gt => truth(a > b),
                BinaryOp::LtEq => truth(a <= b),
                BinaryOp::GtEq => truth(a >= b),
            },
            (lhs, rhs) => {
                let (a, b) = (lhs.as_f64(), rhs.as_f64());
                match op {
                    BinaryOp::Add => Number::Float(a + b),
                    BinaryOp::Sub => Number::Float(a - b),
                    BinaryOp::Mul => Number::Float(a * b),
                    BinaryOp::Div => Number::Float(arith::floor_div_f64(a, b)),
                    BinaryOp::Mod => Number::Float(arith::floor_mod_f64(a, b)),
                    BinaryOp::Eq => truth(a == b),
                    BinaryOp::NotEq => truth(a != b),
                    BinaryOp::Lt => truth(a < b),
                    BinaryOp::Gt => truth(a > b),
                    BinaryOp::LtEq => truth(a <= b),
                    BinaryOp::GtEq => truth(a >= b),
                }
            }
        }
    }

    pub fn negate(self) -> Number {
        match self {
            Number::Int(n) => Number::Int(arith::sub(0, n)),
            Number::Float(n) => Number::Float(-n),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            // Always print a fractional part so the text stays a numeric literal.
            Number::Float(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{:.1}", n)
            }
            Number::Float(n) => write!(f, "{}", n),
        }
    }
}

/// A flattened IR operand. `Display` renders the textual IR form:
/// binary and logical nodes as `(l op r)`, unary as `(op x)`, calls as
/// `f(a, b)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(Number),
    Str(String),
    Var(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Operand>,
        rhs: Box<Operand>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Operand>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Operand>,
        rhs: Box<Operand>,
    },
    Call {
        callee: String,
        args: Vec<Operand>,
    },
}

impl Operand {
    pub fn int(n: i64) -> Self {
        Operand::Number(Number::Int(n))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Operand::Var(name.into())
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Build a binary node, folding it when both sides are numeric literals.
    pub fn binary(op: BinaryOp, lhs: Operand, rhs: Operand) -> Operand {
        match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => Operand::Number(a.apply(op, b)),
            _ => Operand::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    /// Build a unary node. Only numeric negation folds; `!` is logical.
    pub fn unary(op: UnaryOp, operand: Operand) -> Operand {
        match (op, operand.as_number()) {
            (UnaryOp::Neg, Some(n)) => Operand::Number(n.negate()),
            _ => Operand::Unary {
                op,
                operand: Box::new(operand),
            },
        }
    }

    pub fn logical(op: LogicalOp, lhs: Operand, rhs: Operand) -> Operand {
        Operand::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Re-run folding bottom-up over the whole tree.
    pub fn fold(&self) -> Operand {
        match self {
            Operand::Number(_) | Operand::Str(_) | Operand::Var(_) => self.clone(),
            Operand::Binary { op, lhs, rhs } => Operand::binary(*op, lhs.fold(), rhs.fold()),
            Operand::Unary { op, operand } => Operand::unary(*op, operand.fold()),
            Operand::Logical { op, lhs, rhs } => Operand::logical(*op, lhs.fold(), rhs.fold()),
            Operand::Call { callee, args } => Operand::Call {
                callee: callee.clone(),
                args: args.iter().map(Operand::fold).collect(),
            },
        }
    }

    /// Variable names read by this operand, in evaluation order.
    pub fn reads(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_reads(&mut names);
        names
    }

    /// Names of the functions this operand calls, outermost first.
    pub fn calls(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_calls(&mut names);
        names
    }

    fn collect_calls<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Operand::Number(_) | Operand::Str(_) | Operand::Var(_) => {}
            Operand::Binary { lhs, rhs, .. } | Operand::Logical { lhs, rhs, .. } => {
                lhs.collect_calls(names);
                rhs.collect_calls(names);
            }
            Operand::Unary { operand, .. } => operand.collect_calls(names),
            Operand::Call { callee, args } => {
                names.push(callee);
                for arg in args {
                    arg.collect_calls(names);
                }
            }
        }
    }

    fn collect_reads<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Operand::Number(_) | Operand::Str(_) => {}
            Operand::Var(name) => names.push(name),
            Operand::Binary { lhs, rhs, .. } | Operand::Logical { lhs, rhs, .. } => {
                lhs.collect_reads(names);
                rhs.collect_reads(names);
            }
            Operand::Unary { operand, .. } => operand.collect_reads(names),
            Operand::Call { args, .. } => {
                for arg in args {
                    arg.collect_reads(names);
                }
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{}", n),
            Operand::Str(s) => write!(f, "\"{}\"", s.escape_default()),
            Operand::Var(name) => write!(f, "{}", name),
            Operand::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            Operand::Unary { op, operand } => write!(f, "({} {})", op, operand),
            Operand::Logical { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            Operand::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i64) -> Operand {
        Operand::int(n)
    }

    #[test]
    fn test_numeric_literal_pattern() {
        for ok in ["0", "42", "-7", "3.25", "-0.5"] {
            assert!(is_numeric_literal(ok), "{}", ok);
        }
        for bad in ["", "-", "1.", ".5", "x1", "(1 + 2)", "1e5"] {
            assert!(!is_numeric_literal(bad), "{}", bad);
        }
    }

    #[test]
    fn test_binary_folds_literals() {
        assert_eq!(Operand::binary(BinaryOp::Add, num(2), num(3)), num(5));
        assert_eq!(Operand::binary(BinaryOp::Div, num(-7), num(2)), num(-4));
        assert_eq!(Operand::binary(BinaryOp::Div, num(9), num(0)), num(0));
        assert_eq!(Operand::binary(BinaryOp::Gt, num(3), num(2)), num(1));
        assert_eq!(Operand::binary(BinaryOp::Mod, num(-7), num(3)), num(2));
    }

    #[test]
    fn test_mixed_float_folding() {
        let folded = Operand::binary(
            BinaryOp::Mul,
            Operand::Number(Number::Float(1.5)),
            num(2),
        );
        assert_eq!(folded, Operand::Number(Number::Float(3.0)));
        assert_eq!(folded.to_string(), "3.0");
        assert!(is_numeric_literal(&folded.to_string()));
    }

    #[test]
    fn test_variables_block_folding() {
        let op = Operand::binary(BinaryOp::Sub, Operand::var("x"), num(1));
        assert_eq!(op.to_string(), "(x - 1)");
    }

    #[test]
    fn test_logical_and_not_never_fold() {
        let and = Operand::logical(LogicalOp::And, num(1), num(0));
        assert_eq!(and.to_string(), "(1 && 0)");
        let not = Operand::unary(UnaryOp::Not, num(0));
        assert_eq!(not.to_string(), "(! 0)");
        assert_eq!(Operand::unary(UnaryOp::Neg, num(4)), num(-4));
    }

    #[test]
    fn test_refold_nested_tree() {
        let unfolded = Operand::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(Operand::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(num(1)),
                rhs: Box::new(num(2)),
            }),
            rhs: Box::new(Operand::var("y")),
        };
        assert_eq!(unfolded.fold().to_string(), "(3 * y)");
    }

    #[test]
    fn test_call_display_and_reads() {
        let call = Operand::Call {
            callee: "f".to_string(),
            args: vec![Operand::var("a"), Operand::binary(BinaryOp::Add, Operand::var("b"), num(1))],
        };
        assert_eq!(call.to_string(), "f(a, (b + 1))");
        assert_eq!(call.reads(), vec!["a", "b"]);
    }

    #[test]
    fn test_calls_in_nested_operands() {
        let inner = Operand::Call {
            callee: "g".to_string(),
            args: vec![Operand::var("x")],
        };
        let outer = Operand::binary(
            BinaryOp::Mul,
            Operand::var("n"),
            Operand::Call {
                callee: "f".to_string(),
                args: vec![inner],
            },
        );
        assert_eq!(outer.calls(), vec!["f", "g"]);
        assert!(Operand::var("f").calls().is_empty());
    }
}
