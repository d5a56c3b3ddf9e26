//! Token-level preprocessing: macro definition and hygienic expansion,
//! compile-time `for` unrolling, and a small lint over the final stream.

use crate::frontend::lexer::LexError;
use crate::frontend::token::{Token, TokenKind};
use std::collections::HashMap;
use std::fmt;

/// Nested expansions deeper than this are rejected (catches self-recursive macros).
pub const MAX_MACRO_DEPTH: usize = 32;

/// Upper bound on the number of copies a single `for` may produce.
pub const MAX_UNROLL: usize = 4096;

/// One entry per expansion, in the order expansions happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionTrace {
    pub name: String,
    pub line: usize,
    pub depth: usize,
    pub serial: usize,
    pub renamed: usize,
}

impl fmt::Display for ExpansionTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} at line {} (depth {}, expansion {}, {} identifiers renamed)",
            self.name, self.line, self.depth, self.serial, self.renamed
        )
    }
}

#[derive(Debug, Default)]
pub struct MacroEngine {
    macros: HashMap<String, Vec<Token>>,
    /// Names of the macros currently being expanded, innermost last.
    scopes: Vec<String>,
    serial: usize,
    trace: Vec<ExpansionTrace>,
}

impl MacroEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, body: Vec<Token>) {
        self.macros.insert(name.to_string(), body);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn trace(&self) -> &[ExpansionTrace] {
        &self.trace
    }

    /// Expand the `#name` directive. Every identifier in the body is renamed
    /// to `{ident}_{depth}_{serial}`; `serial` grows with each expansion so
    /// two expansions never share a name.
    pub fn expand(&mut self, directive: &Token) -> Result<Vec<Token>, LexError> {
        let name = directive.text.trim_start_matches('#');
        let body = self
            .macros
            .get(name)
            .cloned()
            .ok_or_else(|| LexError::at(directive, format!("Unknown macro: #{}", name)))?;

        if self.scopes.len() >= MAX_MACRO_DEPTH {
            return Err(LexError::at(
                directive,
                format!(
                    "macro expansion too deep (limit {}) while expanding #{}",
                    MAX_MACRO_DEPTH, name
                ),
            ));
        }

        self.scopes.push(name.to_string());
        let depth = self.scopes.len();
        let serial = self.serial;
        self.serial += 1;

        let mut renamed = 0;
        let body: Vec<Token> = body
            .into_iter()
            .map(|mut token| {
                if token.is(TokenKind::Ident) {
                    token.text = format!("{}_{}_{}", token.text, depth, serial);
                    token.len = token.text.chars().count();
                    renamed += 1;
                }
                token
            })
            .collect();

        self.trace.push(ExpansionTrace {
            name: name.to_string(),
            line: directive.line,
            depth,
            serial,
            renamed,
        });

        let result = self.process(body);
        self.scopes.pop();
        result
    }

    /// Run the full preprocessing pass over a token stream.
    ///
    /// ```text
    /// macro NAME ... endmacro        definition (kept in the stream)
    /// #NAME                          expansion
    /// for ID in INT..INT { ... }     unrolled
    /// ```
    pub fn process(&mut self, tokens: Vec<Token>) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            match token.kind {
                TokenKind::Macro => {
                    let (end, name) = self.read_definition(&tokens, i)?;
                    let body = tokens[i + 2..end].to_vec();
                    self.define(&name, body.clone());

                    out.extend_from_slice(&tokens[i..i + 2]);
                    out.extend(self.process(body)?);
                    out.push(tokens[end].clone());
                    i = end + 1;
                }
                TokenKind::MacroDirective => {
                    out.extend(self.expand(token)?);
                    i += 1;
                }
                TokenKind::For => {
                    let (next, unrolled) = unroll_for(&tokens, i)?;
                    out.extend(self.process(unrolled)?);
                    i = next;
                }
                _ => {
                    out.push(token.clone());
                    i += 1;
                }
            }
        }

        Ok(out)
    }

    /// Returns the index of the closing `endmacro` and the macro name.
    fn read_definition(&self, tokens: &[Token], start: usize) -> Result<(usize, String), LexError> {
        let keyword = &tokens[start];
        let name = match tokens.get(start + 1) {
            Some(t) if t.is(TokenKind::Ident) => t.text.clone(),
            Some(t) => return Err(LexError::at(t, "expected macro name after 'macro'")),
            None => return Err(LexError::at(keyword, "expected macro name after 'macro'")),
        };

        let end = tokens[start + 2..]
            .iter()
            .position(|t| t.is(TokenKind::EndMacro))
            .map(|offset| start + 2 + offset)
            .ok_or_else(|| LexError::at(keyword, format!("unterminated macro '{}'", name)))?;

        Ok((end, name))
    }
}

/// Parse `for ID in A..B { body }` starting at `start` and return the index
/// just past the closing brace plus `B - A + 1` copies of the body.
fn unroll_for(tokens: &[Token], start: usize) -> Result<(usize, Vec<Token>), LexError> {
    let keyword = &tokens[start];
    let mut pos = start + 1;

    let var = expect(tokens, &mut pos, TokenKind::Ident, keyword, "loop variable")?.text;
    expect(tokens, &mut pos, TokenKind::In, keyword, "'in'")?;
    let from = read_bound(tokens, &mut pos, keyword)?;
    expect(tokens, &mut pos, TokenKind::DotDot, keyword, "'..'")?;
    let to = read_bound(tokens, &mut pos, keyword)?;
    expect(tokens, &mut pos, TokenKind::LBrace, keyword, "'{'")?;

    let body_start = pos;
    let mut depth = 1usize;
    while depth > 0 {
        match tokens.get(pos).map(|t| t.kind) {
            Some(TokenKind::LBrace) => depth += 1,
            Some(TokenKind::RBrace) => depth -= 1,
            Some(TokenKind::Eof) | None => {
                return Err(LexError::at(keyword, "unterminated 'for' body"));
            }
            Some(_) => {}
        }
        pos += 1;
    }
    let body = &tokens[body_start..pos - 1];

    let count = if to < from {
        0
    } else {
        usize::try_from(to.abs_diff(from)).map_or(usize::MAX, |d| d.saturating_add(1))
    };
    if count > MAX_UNROLL {
        return Err(LexError::at(
            keyword,
            format!(
                "'for' range {}..{} unrolls to {} copies (limit {})",
                from, to, count, MAX_UNROLL
            ),
        ));
    }

    let mut unrolled = Vec::with_capacity(body.len() * count);
    if count > 0 {
        for value in from..=to {
            unrolled.extend(body.iter().map(|t| {
                if t.is(TokenKind::Ident) && t.text == var {
                    Token {
                        kind: TokenKind::Integer,
                        text: value.to_string(),
                        line: t.line,
                        col: t.col,
                        len: t.len,
                    }
                } else {
                    t.clone()
                }
            }));
        }
    }

    Ok((pos, unrolled))
}

fn expect(
    tokens: &[Token],
    pos: &mut usize,
    kind: TokenKind,
    keyword: &Token,
    what: &str,
) -> Result<Token, LexError> {
    match tokens.get(*pos) {
        Some(t) if t.is(kind) => {
            *pos += 1;
            Ok(t.clone())
        }
        Some(t) => Err(LexError::at(
            t,
            format!("malformed 'for': expected {}, got {}", what, t),
        )),
        None => Err(LexError::at(
            keyword,
            format!("malformed 'for': expected {}", what),
        )),
    }
}

fn read_bound(tokens: &[Token], pos: &mut usize, keyword: &Token) -> Result<i64, LexError> {
    let negative = tokens.get(*pos).is_some_and(|t| t.is(TokenKind::Minus));
    if negative {
        *pos += 1;
    }
    let token = expect(tokens, pos, TokenKind::Integer, keyword, "integer bound")?;
    let value: i64 = token
        .text
        .parse()
        .map_err(|_| LexError::at(&token, "'for' bound out of range"))?;
    Ok(if negative { -value } else { value })
}

// =============================================================================
// LINT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintKind {
    RedundantSemicolon,
    SuspiciousAssignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LintWarning {
    pub kind: LintKind,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self.kind {
            LintKind::RedundantSemicolon => "Redundant semicolon",
            LintKind::SuspiciousAssignment => "Possible mistaken '=='",
        };
        write!(f, "{}:{}: warning: {}", self.line, self.column, message)
    }
}

/// Non-fatal checks over adjacent token pairs.
pub fn lint_tokens(tokens: &[Token]) -> Vec<LintWarning> {
    tokens
        .windows(2)
        .filter_map(|pair| {
            let kind = match (pair[0].kind, pair[1].kind) {
                (TokenKind::Semi, TokenKind::Semi) => LintKind::RedundantSemicolon,
                (TokenKind::Assign, TokenKind::Assign) => LintKind::SuspiciousAssignment,
                _ => return None,
            };
            Some(LintWarning {
                kind,
                line: pair[1].line,
                column: pair[1].col,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn process(src: &str) -> Result<Vec<Token>, LexError> {
        let tokens = Lexer::new(src).tokenize().expect("tokenize failed");
        MacroEngine::new().process(tokens)
    }

    fn texts(src: &str) -> Vec<String> {
        process(src)
            .expect("process failed")
            .into_iter()
            .filter(|t| !t.is(TokenKind::Eof))
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_unroll_copies_in_order() {
        assert_eq!(
            texts("for i in 1..3 { print i; }"),
            vec!["print", "1", ";", "print", "2", ";", "print", "3", ";"]
        );
    }

    #[test]
    fn test_unroll_count() {
        let tokens = process("for k in 0..9 { print k; }").unwrap();
        let prints = tokens.iter().filter(|t| t.is(TokenKind::Print)).count();
        assert_eq!(prints, 10);
        assert!(tokens.iter().all(|t| !t.is(TokenKind::For)));
    }

    #[test]
    fn test_unroll_empty_and_negative_ranges() {
        assert!(texts("for i in 3..1 { print i; }").is_empty());
        assert_eq!(
            texts("for i in -1..0 { print i; }"),
            vec!["print", "-1", ";", "print", "0", ";"]
        );
    }

    #[test]
    fn test_nested_unroll() {
        let tokens = process("for i in 1..2 { for j in 1..3 { print i * j; } }").unwrap();
        assert_eq!(tokens.iter().filter(|t| t.is(TokenKind::Print)).count(), 6);
    }

    #[test]
    fn test_unroll_body_keeps_nested_braces() {
        assert_eq!(
            texts("for i in 1..1 { if (i) { print i; } }"),
            vec!["if", "(", "1", ")", "{", "print", "1", ";", "}"]
        );
    }

    #[test]
    fn test_malformed_for() {
        let err = process("for i 1..3 { }").unwrap_err();
        assert!(err.message.contains("expected 'in'"), "{}", err.message);
        let err = process("for i in 1..3 { print i;").unwrap_err();
        assert!(err.message.contains("unterminated"), "{}", err.message);
    }

    #[test]
    fn test_unroll_limit() {
        let err = process("for i in 0..100000 { }").unwrap_err();
        assert!(err.message.contains("limit"), "{}", err.message);
    }

    #[test]
    fn test_definition_kept_and_expanded() {
        let out = texts("macro two let t = 2; endmacro #two");
        assert_eq!(
            out,
            vec![
                "macro", "two", "let", "t", "=", "2", ";", "endmacro", "let", "t_1_0", "=", "2",
                ";"
            ]
        );
    }

    #[test]
    fn test_expansions_are_hygienic() {
        let tokens = process("macro m let t = 1; endmacro #m #m").unwrap();
        let renamed: Vec<&str> = tokens
            .iter()
            .filter(|t| t.is(TokenKind::Ident) && t.text.starts_with("t_"))
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(renamed, vec!["t_1_0", "t_1_1"]);
    }

    #[test]
    fn test_nested_directive_uses_deeper_scope() {
        let mut engine = MacroEngine::new();
        let tokens = Lexer::new("macro a let x = 1; endmacro macro b #a endmacro #b")
            .tokenize()
            .unwrap();
        let out = engine.process(tokens).unwrap();
        assert!(out.iter().any(|t| t.text == "x_2_2"));

        let trace = engine.trace();
        assert_eq!(trace.len(), 3);
        assert_eq!((trace[2].name.as_str(), trace[2].depth), ("a", 2));
    }

    #[test]
    fn test_unknown_macro() {
        let err = process("#nope").unwrap_err();
        assert_eq!(err.message, "Unknown macro: #nope");
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn test_recursive_macro_is_rejected() {
        let err = process("macro r #r endmacro").unwrap_err();
        assert!(err.message.contains("too deep"), "{}", err.message);
    }

    #[test]
    fn test_unterminated_macro() {
        let err = process("macro m let x = 1;").unwrap_err();
        assert!(err.message.contains("unterminated macro 'm'"));
    }

    #[test]
    fn test_lint() {
        let tokens = Lexer::new("let x = 1;;\nx = = 2;").tokenize().unwrap();
        let warnings = lint_tokens(&tokens);
        assert_eq!(
            warnings,
            vec![
                LintWarning {
                    kind: LintKind::RedundantSemicolon,
                    line: 1,
                    column: 11
                },
                LintWarning {
                    kind: LintKind::SuspiciousAssignment,
                    line: 2,
                    column: 5
                },
            ]
        );
        assert!(warnings[1].to_string().contains("Possible mistaken '=='"));
    }
}
