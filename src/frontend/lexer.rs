use crate::frontend::token::{Token, TokenKind};
use thiserror::Error;

const SNIPPET_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{line}:{column}: {message}\n  near: {snippet}")]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub snippet: String,
}

impl LexError {
    pub fn at(token: &Token, message: impl Into<String>) -> Self {
        LexError {
            message: message.into(),
            line: token.line,
            column: token.col,
            snippet: token.text.clone(),
        }
    }
}

/// Single forward scan over the source. Tokens are produced lazily through
/// `Iterator`; the stream ends with one `Eof` token, or stops after the
/// first error.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    finished: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            finished: false,
        }
    }

    /// Drain the lexer into a vector. The last token is always `Eof`.
    pub fn tokenize(self) -> Result<Vec<Token>, LexError> {
        self.collect()
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn snippet(&self, from: usize) -> String {
        self.source[from.min(self.source.len())..]
            .iter()
            .take_while(|&&c| c != '\n')
            .take(SNIPPET_LEN)
            .collect()
    }

    fn error(&self, message: impl Into<String>, line: usize, col: usize, from: usize) -> LexError {
        LexError {
            message: message.into(),
            line,
            column: col,
            snippet: self.snippet(from),
        }
    }

    fn token(&self, kind: TokenKind, text: String, line: usize, col: usize, start: usize) -> Token {
        Token {
            kind,
            text,
            line,
            col,
            len: self.pos - start,
        }
    }

    /// Skips whitespace, `// line` and `/* block */` comments.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match (self.current(), self.peek()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.current() {
                        if ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    let (line, col, start) = (self.line, self.col, self.pos);
                    self.advance();
                    self.advance();
                    loop {
                        match (self.current(), self.peek()) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => {
                                return Err(self.error(
                                    "unterminated block comment",
                                    line,
                                    col,
                                    start,
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_escape(&mut self, quote: char) -> Result<char, LexError> {
        let (line, col, start) = (self.line, self.col, self.pos);
        self.advance();
        let ch = match self.current() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some(c) if c == quote => quote,
            Some(c) => {
                return Err(self.error(
                    format!("unknown escape sequence: \\{}", c),
                    line,
                    col,
                    start,
                ));
            }
            None => return Err(self.error("unterminated escape sequence", line, col, start)),
        };
        self.advance();
        Ok(ch)
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let (line, col, start) = (self.line, self.col, self.pos);
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(self.token(TokenKind::Str, string, line, col, start));
                }
                Some('\\') => string.push(self.read_escape('"')?),
                Some('\n') | None => {
                    return Err(self.error("unterminated string", line, col, start));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_char(&mut self) -> Result<Token, LexError> {
        let (line, col, start) = (self.line, self.col, self.pos);
        self.advance();

        let ch = match self.current() {
            Some('\\') => self.read_escape('\'')?,
            Some('\'') | Some('\n') | None => {
                return Err(self.error("empty or unterminated char literal", line, col, start));
            }
            Some(ch) => {
                self.advance();
                ch
            }
        };

        if self.current() != Some('\'') {
            return Err(self.error("unterminated char literal", line, col, start));
        }
        self.advance();
        Ok(self.token(TokenKind::Char, ch.to_string(), line, col, start))
    }

    /// `digits` or `digits.digits`. A dot not followed by a digit is left for
    /// the next token, so `1..3` scans as `1`, `..`, `3`.
    fn read_number(&mut self) -> Token {
        let (line, col, start) = (self.line, self.col, self.pos);
        let mut text = String::new();
        let mut kind = TokenKind::Integer;

        while let Some(ch) = self.current().filter(char::is_ascii_digit) {
            text.push(ch);
            self.advance();
        }

        if self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            text.push('.');
            self.advance();
            while let Some(ch) = self.current().filter(char::is_ascii_digit) {
                text.push(ch);
                self.advance();
            }
        }

        self.token(kind, text, line, col, start)
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn read_identifier(&mut self) -> Token {
        let (line, col, start) = (self.line, self.col, self.pos);
        let word = self.read_word();
        let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Ident);
        self.token(kind, word, line, col, start)
    }

    fn read_directive(&mut self) -> Result<Token, LexError> {
        let (line, col, start) = (self.line, self.col, self.pos);
        self.advance();
        if !self
            .current()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return Err(self.error("expected macro name after '#'", line, col, start));
        }
        let name = self.read_word();
        Ok(self.token(
            TokenKind::MacroDirective,
            format!("#{}", name),
            line,
            col,
            start,
        ))
    }

    fn read_operator(&mut self) -> Result<Token, LexError> {
        let (line, col, start) = (self.line, self.col, self.pos);
        let Some(ch) = self.current() else {
            return Ok(Token::eof(line, col));
        };

        let two = match (ch, self.peek()) {
            ('=', Some('=')) => Some(TokenKind::Eq),
            ('!', Some('=')) => Some(TokenKind::NotEq),
            ('<', Some('=')) => Some(TokenKind::LtEq),
            ('>', Some('=')) => Some(TokenKind::GtEq),
            ('&', Some('&')) => Some(TokenKind::And),
            ('|', Some('|')) => Some(TokenKind::Or),
            ('-', Some('>')) => Some(TokenKind::Arrow),
            ('.', Some('.')) => Some(TokenKind::DotDot),
            _ => None,
        };
        if let Some(kind) = two {
            let text: String = self.source[self.pos..self.pos + 2].iter().collect();
            self.advance();
            self.advance();
            return Ok(self.token(kind, text, line, col, start));
        }

        let kind = match ch {
            '!' => TokenKind::Not,
            '=' => TokenKind::Assign,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            other => {
                return Err(self.error(
                    format!("Illegal character '{}'", other),
                    line,
                    col,
                    start,
                ));
            }
        };
        self.advance();
        Ok(self.token(kind, ch.to_string(), line, col, start))
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;

        match self.current() {
            None => Ok(Token::eof(self.line, self.col)),
            Some('"') => self.read_string(),
            Some('\'') => self.read_char(),
            Some('#') => self.read_directive(),
            Some(ch) if ch.is_ascii_digit() => Ok(self.read_number()),
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => Ok(self.read_identifier()),
            Some(_) => self.read_operator(),
        }
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.is(TokenKind::Eof) => self.finished = true,
            Err(_) => self.finished = true,
            Ok(_) => {}
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .expect("tokenize failed")
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| *k != TokenKind::Eof)
            .collect()
    }

    fn texts(src: &str) -> Vec<String> {
        Lexer::new(src)
            .tokenize()
            .expect("tokenize failed")
            .into_iter()
            .filter(|t| !t.is(TokenKind::Eof))
            .map(|t| t.text)
            .collect()
    }

    fn lex_err(src: &str) -> LexError {
        Lexer::new(src).tokenize().unwrap_err()
    }

    #[test]
    fn test_declaration() {
        use TokenKind::*;
        assert_eq!(
            kinds("let x = 5;"),
            vec![Let, Ident, Assign, Integer, Semi]
        );
    }

    #[test]
    fn test_numbers_and_range() {
        use TokenKind::*;
        assert_eq!(kinds("3.14 42"), vec![Float, Integer]);
        assert_eq!(kinds("1..3"), vec![Integer, DotDot, Integer]);
        assert_eq!(texts("1..3"), vec!["1", "..", "3"]);
        assert_eq!(kinds("1."), vec![Integer, Dot]);
    }

    #[test]
    fn test_two_char_operators_win() {
        use TokenKind::*;
        assert_eq!(
            kinds("== != <= >= && || -> = < > !"),
            vec![Eq, NotEq, LtEq, GtEq, And, Or, Arrow, Assign, Lt, Gt, Not]
        );
    }

    #[test]
    fn test_keyword_vs_ident() {
        use TokenKind::*;
        assert_eq!(
            kinds("print printer if iff int integer endmacro"),
            vec![Print, Ident, If, Ident, TypeName, Ident, EndMacro]
        );
    }

    #[test]
    fn test_comments_are_never_emitted() {
        use TokenKind::*;
        assert_eq!(
            kinds("// line\nx /* block\n spanning */ y"),
            vec![Ident, Ident]
        );
    }

    #[test]
    fn test_string_and_char_literals() {
        let tokens = Lexer::new(r#""a\nb" '\'' 'z'"#).tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "a\nb");
        assert_eq!(tokens[0].len, 6);
        assert_eq!(tokens[1].kind, TokenKind::Char);
        assert_eq!(tokens[1].text, "'");
        assert_eq!(tokens[2].text, "z");
    }

    #[test]
    fn test_macro_directive() {
        let tokens = Lexer::new("#greet;").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::MacroDirective);
        assert_eq!(tokens[0].text, "#greet");
        assert_eq!(tokens[1].kind, TokenKind::Semi);
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("let x\n  = 10;").tokenize().unwrap();
        let at: Vec<(usize, usize, usize)> =
            tokens.iter().map(|t| (t.line, t.col, t.len)).collect();
        assert_eq!(
            at,
            vec![(1, 1, 3), (1, 5, 1), (2, 3, 1), (2, 5, 2), (2, 7, 1), (2, 8, 0)]
        );
    }

    #[test]
    fn test_eof_is_last_and_iteration_stops() {
        let mut lexer = Lexer::new("x");
        assert!(lexer.next().is_some_and(|t| t.is_ok_and(|t| t.is(TokenKind::Ident))));
        assert!(lexer.next().is_some_and(|t| t.is_ok_and(|t| t.is(TokenKind::Eof))));
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_illegal_character() {
        let err = lex_err("let x = 5 @ 3;\nnext");
        assert_eq!(err.message, "Illegal character '@'");
        assert_eq!((err.line, err.column), (1, 11));
        assert_eq!(err.snippet, "@ 3;");
    }

    #[test]
    fn test_snippet_is_capped() {
        let err = lex_err("$abcdefghijklmnopqrstuvwxyz");
        assert_eq!(err.snippet.chars().count(), 20);
    }

    #[test]
    fn test_single_ampersand_is_illegal() {
        assert!(lex_err("a & b").message.contains("Illegal character '&'"));
    }

    #[test]
    fn test_unterminated_errors() {
        assert!(lex_err("\"abc").message.contains("unterminated string"));
        assert!(lex_err("/* open").message.contains("unterminated block comment"));
        assert!(lex_err("'ab'").message.contains("unterminated char"));
        assert!(lex_err("# 1").message.contains("expected macro name"));
    }

    #[test]
    fn test_error_stops_iteration() {
        let mut lexer = Lexer::new("@ x");
        assert!(lexer.next().is_some_and(|r| r.is_err()));
        assert!(lexer.next().is_none());
    }
}
