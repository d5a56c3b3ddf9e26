use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    Integer,
    Float,
    Str,
    Char,

    // Identifier (user-defined name)
    Ident,

    // Keywords
    Func,
    Return,
    If,
    Else,
    Elif,
    While,
    For,
    In,
    Break,
    Continue,
    Let,
    Const,
    True,
    False,
    Null,
    Print,
    Macro,
    EndMacro,
    /// `int float bool char string void any`
    TypeName,

    // Comparison
    Eq,
    NotEq,
    LtEq,
    GtEq,
    Lt,
    Gt,

    // Logic
    And,
    Or,
    Not,

    // Arithmetic
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Semi,
    Colon,
    Arrow,

    /// `#name`
    MacroDirective,

    Eof,
}

impl TokenKind {
    /// Keyword lookup for a scanned identifier. Matches are exact, so
    /// `printer` stays an identifier.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "func" => TokenKind::Func,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "elif" => TokenKind::Elif,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "print" => TokenKind::Print,
            "macro" => TokenKind::Macro,
            "endmacro" => TokenKind::EndMacro,
            "int" | "float" | "bool" | "char" | "string" | "void" | "any" => TokenKind::TypeName,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_keyword(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Func | Return
                | If
                | Else
                | Elif
                | While
                | For
                | In
                | Break
                | Continue
                | Let
                | Const
                | True
                | False
                | Null
                | Print
                | Macro
                | EndMacro
                | TypeName
        )
    }

    /// Human-readable name used in parser diagnostics.
    pub fn describe(self) -> &'static str {
        use TokenKind::*;
        match self {
            Integer => "integer",
            Float => "float",
            Str => "string",
            Char => "char",
            Ident => "identifier",
            Func => "'func'",
            Return => "'return'",
            If => "'if'",
            Else => "'else'",
            Elif => "'elif'",
            While => "'while'",
            For => "'for'",
            In => "'in'",
            Break => "'break'",
            Continue => "'continue'",
            Let => "'let'",
            Const => "'const'",
            True => "'true'",
            False => "'false'",
            Null => "'null'",
            Print => "'print'",
            Macro => "'macro'",
            EndMacro => "'endmacro'",
            TypeName => "type name",
            Eq => "'=='",
            NotEq => "'!='",
            LtEq => "'<='",
            GtEq => "'>='",
            Lt => "'<'",
            Gt => "'>'",
            And => "'&&'",
            Or => "'||'",
            Not => "'!'",
            Assign => "'='",
            Plus => "'+'",
            Minus => "'-'",
            Star => "'*'",
            Slash => "'/'",
            Percent => "'%'",
            LParen => "'('",
            RParen => "')'",
            LBrace => "'{'",
            RBrace => "'}'",
            LBracket => "'['",
            RBracket => "']'",
            Comma => "','",
            Dot => "'.'",
            DotDot => "'..'",
            Semi => "';'",
            Colon => "':'",
            Arrow => "'->'",
            MacroDirective => "macro directive",
            Eof => "end of input",
        }
    }
}

/// A lexed token. `text` is the exact source slice, except for string and
/// char literals where it holds the unescaped contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub col: usize,
    pub len: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        let text = text.into();
        let len = text.chars().count();
        Token {
            kind,
            text,
            line,
            col,
            len,
        }
    }

    pub fn eof(line: usize, col: usize) -> Self {
        Token {
            kind: TokenKind::Eof,
            text: String::new(),
            line,
            col,
            len: 0,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Str => write!(f, "\"{}\"", self.text),
            TokenKind::Char => write!(f, "'{}'", self.text),
            _ => write!(f, "'{}'", self.text),
        }
    }
}
