pub mod lexer;
pub mod macros;
pub mod parser;
pub mod parser_error;
pub mod token;
pub mod token_dumper;

pub use lexer::{LexError, Lexer};
pub use macros::{LintWarning, MacroEngine, lint_tokens};
pub use parser::Parser;
pub use parser_error::ParseError;
pub use token::{Token, TokenKind};
