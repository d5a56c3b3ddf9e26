use crate::frontend::token::{Token, TokenKind};
use colored::{ColoredString, Colorize};
use std::fmt::Write;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the source text instead of the kind's Debug form
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    /// One line per token: `[line:col] CLASS    token`.
    pub fn dump(&self, tokens: &[Token]) -> String {
        let mut out = String::new();
        for token in tokens {
            let class = format!("{:<8}", Self::class(token.kind));
            let body = if self.show_debug_repr {
                format!("{:?} {:?}", token.kind, token.text)
            } else {
                token.to_string()
            };
            let _ = writeln!(
                out,
                "[{:02}:{:02}] {} {}",
                token.line,
                token.col,
                self.paint(token.kind, &class),
                self.paint(token.kind, &body)
            );
        }
        out
    }

    fn class(kind: TokenKind) -> &'static str {
        use TokenKind::*;
        match kind {
            Eof => "EOF",

            // literals
            Integer | Float => "NUMBER",
            Str => "STRING",
            Char => "CHAR",
            True | False | Null => "LITERAL",

            // names
            Ident => "IDENT",
            MacroDirective => "MACRO",

            // structure
            LParen | RParen | LBrace | RBrace | LBracket | RBracket => "DELIM",
            Comma | Dot | DotDot | Semi | Colon | Arrow => "PUNCT",

            // ops / comparisons
            Plus | Minus | Star | Slash | Percent | Assign => "OP",
            Eq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",
            And | Or | Not => "LOGIC",

            // everything else = keyword
            _ => "KEYWORD",
        }
    }

    fn paint(&self, kind: TokenKind, text: &str) -> ColoredString {
        if !self.color {
            return text.normal();
        }
        use TokenKind::*;
        match kind {
            Eof => text.dimmed(),
            Str | Char => text.green(),
            Integer | Float | True | False | Null => text.cyan(),
            Ident => text.yellow(),
            MacroDirective => text.blue(),
            Plus | Minus | Star | Slash | Percent | Assign | Eq | NotEq | Lt | LtEq | Gt
            | GtEq | And | Or | Not => text.magenta(),
            _ => text.normal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    #[test]
    fn test_plain_dump() {
        let tokens = Lexer::new("let x = 5;").tokenize().unwrap();
        let text = TokenDumper::new().no_color().pretty().dump(&tokens);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("[01:01] KEYWORD "));
        assert!(lines[1].contains("IDENT"));
        assert!(lines[3].contains("NUMBER"));
        assert!(lines[5].contains("EOF"));
    }

    #[test]
    fn test_debug_repr_shows_kind() {
        let tokens = Lexer::new("#m").tokenize().unwrap();
        let text = TokenDumper::new().no_color().dump(&tokens);
        assert!(text.contains("MacroDirective \"#m\"") || text.contains("MacroDirective"));
    }
}
