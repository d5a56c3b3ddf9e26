use crate::frontend::parser_error::ParseError;
use crate::frontend::token::{Token, TokenKind};
use crate::lang::node::{BinaryOp, Expr, LogicalOp, Stmt, UnaryOp};
use crate::lang::value::Value;

/// Recursive-descent parser.
///
/// Consumes the preprocessed token stream (macros expanded, `for` unrolled)
/// and produces the statement list of a program. The stream must end with
/// an `Eof` token, which `Lexer::tokenize` guarantees.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(|t| t.is(TokenKind::Eof)) {
            let (line, col) = tokens
                .last()
                .map_or((1, 1), |t| (t.line, t.col + t.len));
            tokens.push(Token::eof(line, col));
        }
        Parser { tokens, pos: 0 }
    }

    /// Returns the current token without consuming it. Past the end this is
    /// always the trailing `Eof`.
    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    /// Peeks one token past the current one.
    fn peek_next(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + 1).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !token.is(TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().is(kind)
    }

    /// Consumes the current token if it has the given kind.
    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        Ok(self.expect(TokenKind::Ident)?.text)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::Unexpected {
            expected: expected.to_string(),
            got: token.to_string(),
            line: token.line,
            column: token.col,
        }
    }

    /// Parses a complete program.
    ///
    /// # Errors
    ///
    /// Returns the first `ParseError`; there is no recovery.
    pub fn parse(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::Semi) {
                continue;
            }
            statements.push(self.declaration()?);
        }
        Ok(statements)
    }

    /// Parses exactly one expression followed by end of input.
    pub fn parse_expression_only(&mut self) -> Result<Expr, ParseError> {
        let expr = self.expression()?;
        self.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    // =========================================================================
    // Declarations and statements
    // =========================================================================

    /// ```text
    /// declaration := func_decl | var_decl | macro_decl | statement
    /// ```
    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().kind {
            TokenKind::Func => self.func_decl(),
            TokenKind::Let => self.var_decl(),
            TokenKind::Macro => self.macro_decl(),
            _ => self.statement(),
        }
    }

    /// ```text
    /// func_decl := "func" IDENT "(" (IDENT ("," IDENT)*)? ")" block
    /// ```
    fn func_decl(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::Func)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.block()?;
        Ok(Stmt::FuncDecl { name, params, body })
    }

    /// ```text
    /// var_decl := "let" IDENT "=" expression ";"
    /// ```
    fn var_decl(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::Let)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let init = self.expression()?;
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::VarDecl { name, init })
    }

    /// ```text
    /// macro_decl := "macro" IDENT declaration* "endmacro"
    /// ```
    fn macro_decl(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::Macro)?;
        let name = self.expect_ident()?;

        let mut body = Vec::new();
        while !self.check(TokenKind::EndMacro) {
            if self.check(TokenKind::Eof) {
                return Err(self.unexpected(TokenKind::EndMacro.describe()));
            }
            body.push(self.declaration()?);
        }
        self.expect(TokenKind::EndMacro)?;

        Ok(Stmt::MacroDecl { name, body })
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().kind {
            TokenKind::If => self.if_stmt(),
            TokenKind::While => {
                self.advance();
                let cond = self.paren_condition()?;
                let body = self.block()?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::Return => {
                self.advance();
                let value = self.expression()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Print => {
                self.advance();
                let value = self.expression()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Print(value))
            }
            TokenKind::LBrace => Ok(Stmt::Block(self.block()?)),
            _ => {
                let expr = self.expression()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// ```text
    /// if_stmt := "if" "(" expression ")" block ("else" (if_stmt | block))?
    /// ```
    ///
    /// `else if` nests the second `if` as the only statement of the else branch.
    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(TokenKind::If)?;
        let cond = self.paren_condition()?;
        let then_branch = self.block()?;

        let else_branch = if self.matches(TokenKind::Else) {
            if self.check(TokenKind::If) {
                Some(vec![self.if_stmt()?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn paren_condition(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen)?;
        Ok(cond)
    }

    /// ```text
    /// block := "{" declaration* "}"
    /// ```
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.unexpected(TokenKind::RBrace.describe()));
            }
            if self.matches(TokenKind::Semi) {
                continue;
            }
            statements.push(self.declaration()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(statements)
    }

    // =========================================================================
    // Expressions (lowest to highest precedence)
    // =========================================================================

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    /// ```text
    /// assignment := logic_or ("=" assignment)?
    /// ```
    ///
    /// # Errors
    ///
    /// `InvalidAssignmentTarget` when the left side is not a plain variable.
    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.logic_or()?;

        if self.check(TokenKind::Assign) {
            let equals = self.advance();
            let value = self.assignment()?;
            return match target {
                Expr::Variable(name) => Ok(Expr::Assign {
                    name,
                    value: Box::new(value),
                }),
                _ => Err(ParseError::InvalidAssignmentTarget {
                    line: equals.line,
                    column: equals.col,
                }),
            };
        }

        Ok(target)
    }

    fn logic_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.logic_and()?;
        while self.matches(TokenKind::Or) {
            let right = self.logic_and()?;
            left = Expr::logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn logic_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.equality()?;
        while self.matches(TokenKind::And) {
            let right = self.equality()?;
            left = Expr::logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.comparison()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::unary(op, operand))
    }

    /// ```text
    /// primary := INT | FLOAT | STRING | CHAR | "true" | "false" | "null"
    ///          | IDENT "(" args? ")" | IDENT | "(" expression ")"
    /// ```
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let value = match token.kind {
            TokenKind::Integer => match token.text.parse::<i64>() {
                Ok(n) => Value::Integer(n),
                Err(_) => return Err(self.unexpected("integer within 64-bit range")),
            },
            TokenKind::Float => match token.text.parse::<f64>() {
                Ok(n) => Value::Float(n),
                Err(_) => return Err(self.unexpected("float literal")),
            },
            TokenKind::Str => Value::String(token.text.clone()),
            TokenKind::Char => match token.text.chars().next() {
                Some(c) => Value::Char(c),
                None => return Err(self.unexpected("char literal")),
            },
            TokenKind::True => Value::Bool(true),
            TokenKind::False => Value::Bool(false),
            TokenKind::Null => Value::Null,
            TokenKind::Ident => {
                let is_call = self.peek_next().is(TokenKind::LParen);
                self.advance();
                if is_call {
                    return self.finish_call(token.text);
                }
                return Ok(Expr::Variable(token.text));
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(TokenKind::RParen)?;
                return Ok(expr);
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Expr::Literal(value))
    }

    fn finish_call(&mut self, callee: String) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(Expr::Call { callee, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Vec<Stmt> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse().unwrap_err()
    }

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    fn int(n: i64) -> Expr {
        Expr::Literal(Value::Integer(n))
    }

    #[test]
    fn test_var_decl() {
        assert_eq!(
            parse("let x = 5;"),
            vec![Stmt::VarDecl {
                name: "x".to_string(),
                init: int(5)
            }]
        );
    }

    #[test]
    fn test_precedence() {
        let program = parse("print 1 + 2 * 3 < 10 == 1;");
        let expected = Expr::binary(
            BinaryOp::Eq,
            Expr::binary(
                BinaryOp::Lt,
                Expr::binary(
                    BinaryOp::Add,
                    int(1),
                    Expr::binary(BinaryOp::Mul, int(2), int(3)),
                ),
                int(10),
            ),
            int(1),
        );
        assert_eq!(program, vec![Stmt::Print(expected)]);
    }

    #[test]
    fn test_logical_binds_looser_than_equality() {
        let program = parse("print a == 1 || b && !c;");
        let expected = Expr::logical(
            LogicalOp::Or,
            Expr::binary(BinaryOp::Eq, var("a"), int(1)),
            Expr::logical(
                LogicalOp::And,
                var("b"),
                Expr::unary(UnaryOp::Not, var("c")),
            ),
        );
        assert_eq!(program, vec![Stmt::Print(expected)]);
    }

    #[test]
    fn test_left_associative_subtraction() {
        let program = parse("print 10 - 3 - 2;");
        let expected = Expr::binary(
            BinaryOp::Sub,
            Expr::binary(BinaryOp::Sub, int(10), int(3)),
            int(2),
        );
        assert_eq!(program, vec![Stmt::Print(expected)]);
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let program = parse("a = b = 3;");
        let expected = Expr::Assign {
            name: "a".to_string(),
            value: Box::new(Expr::Assign {
                name: "b".to_string(),
                value: Box::new(int(3)),
            }),
        };
        assert_eq!(program, vec![Stmt::Expr(expected)]);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_err("1 + 2 = 3;");
        assert_eq!(err, ParseError::InvalidAssignmentTarget { line: 1, column: 7 });
    }

    #[test]
    fn test_if_else_while() {
        let program = parse("if (x) { print 1; } else { print 2; } while (x) { x = x - 1; }");
        assert_eq!(program.len(), 2);
        assert!(matches!(
            &program[0],
            Stmt::If { then_branch, else_branch: Some(e), .. } if then_branch.len() == 1 && e.len() == 1
        ));
        assert!(matches!(&program[1], Stmt::While { body, .. } if body.len() == 1));
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse("if (a) { } else if (b) { print 1; } else { print 2; }");
        let Stmt::If {
            else_branch: Some(else_branch),
            ..
        } = &program[0]
        else {
            panic!("expected if, got {:?}", program[0]);
        };
        assert!(matches!(&else_branch[..], [Stmt::If { else_branch: Some(_), .. }]));
    }

    #[test]
    fn test_func_decl_and_call() {
        let program = parse("func add(a, b) { return a + b; } print add(1, 2);");
        assert!(matches!(
            &program[0],
            Stmt::FuncDecl { name, params, body } if name == "add" && params == &["a", "b"] && body.len() == 1
        ));
        assert_eq!(
            program[1],
            Stmt::Print(Expr::Call {
                callee: "add".to_string(),
                args: vec![int(1), int(2)]
            })
        );
    }

    #[test]
    fn test_call_needs_paren_right_after_name() {
        assert_eq!(
            parse("print f (2); print f;"),
            vec![
                Stmt::Print(Expr::Call {
                    callee: "f".to_string(),
                    args: vec![int(2)]
                }),
                Stmt::Print(var("f")),
            ]
        );
        // a parenthesised expression after a name is not an argument list
        assert!(matches!(parse_err("print f + (2) (3);"), ParseError::Unexpected { .. }));
    }

    #[test]
    fn test_macro_decl() {
        let program = parse("macro m let t = 1; print t; endmacro");
        assert!(matches!(
            &program[0],
            Stmt::MacroDecl { name, body } if name == "m" && body.len() == 2
        ));
    }

    #[test]
    fn test_literals() {
        let program = parse("print 2.5; print \"s\"; print 'c'; print true; print null;");
        let values: Vec<_> = program
            .into_iter()
            .map(|s| match s {
                Stmt::Print(Expr::Literal(v)) => v,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            values,
            vec![
                Value::Float(2.5),
                Value::String("s".to_string()),
                Value::Char('c'),
                Value::Bool(true),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_block_statement() {
        assert!(matches!(&parse("{ let a = 1; }")[0], Stmt::Block(b) if b.len() == 1));
    }

    #[test]
    fn test_stray_semicolons_are_skipped() {
        let program = parse(";let x = 1;; { ; print x; }");
        assert_eq!(program.len(), 2);
        assert!(matches!(&program[1], Stmt::Block(b) if b.len() == 1));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = parse_err("let x = 5");
        assert_eq!(
            err,
            ParseError::Unexpected {
                expected: "';'".to_string(),
                got: "end of input".to_string(),
                line: 1,
                column: 10,
            }
        );
    }

    #[test]
    fn test_missing_paren_in_condition() {
        let err = parse_err("if x { }");
        assert!(err.to_string().contains("expected '('"), "{}", err);
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_err("while (x) { print x;");
        assert!(err.to_string().contains("expected '}'"), "{}", err);
    }

    #[test]
    fn test_reserved_keyword_is_rejected() {
        let err = parse_err("break;");
        assert!(err.to_string().contains("expected expression, got 'break'"), "{}", err);
    }

    #[test]
    fn test_expression_only() {
        let tokens = Lexer::new("(x > 0)").tokenize().unwrap();
        let expr = Parser::new(tokens).parse_expression_only().unwrap();
        assert_eq!(expr, Expr::binary(BinaryOp::Gt, var("x"), int(0)));

        let tokens = Lexer::new("x y").tokenize().unwrap();
        assert!(Parser::new(tokens).parse_expression_only().is_err());
    }
}
