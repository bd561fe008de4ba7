use std::rc::Rc;

use crate::{
    ast::{BinaryOp, Expr, ExprKind, FunctionDecl, Literal, LogicalOp, Script, Stmt, StmtKind, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
    resource::{ResourceKind, ResourceTracker, Ticket},
};

/// A parsed script. Owned by the load that produced it and never outlives
/// compilation; its ticket keeps the tracker's tree count honest.
#[derive(Debug)]
pub struct SyntaxTree {
    pub name: String,
    pub script: Script,
    _ticket: Ticket,
}

pub fn parse(name: &str, source: &str, tracker: &ResourceTracker) -> Result<SyntaxTree, Diagnostic> {
    let ticket = tracker.acquire(ResourceKind::SyntaxTree);
    let script = parse_script(source).map_err(|diag| diag.with_file(name))?;
    Ok(SyntaxTree {
        name: name.to_string(),
        script,
        _ticket: ticket,
    })
}

pub fn parse_script(source: &str) -> Result<Script, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_script()
}

/// How deeply syntax may nest before the parser gives up. Every recursive
/// construct and every link of an operator or member chain spends one unit,
/// so both parsing and compiling the resulting tree stay within the native
/// stack.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds use far larger frames.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 35;

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Nesting budget left. Recursive constructs give their unit back when
    /// they return; chain links keep theirs until the statement ends.
    depth_remaining: u16,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    fn parse_script(&mut self) -> Result<Script, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        Ok(Script { items })
    }

    fn parse_block_items(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` to close block")?;
        Ok((items, lbrace.span.to(rbrace.span)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let entry = self.depth_remaining;
        self.decr_depth_remaining()?;
        let result = self.parse_statement_impl();
        self.depth_remaining = entry;
        result
    }

    fn parse_statement_impl(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Keyword(Keyword::Var) => self.parse_var(),
            TokenKind::Keyword(Keyword::Function) => {
                let decl = self.parse_function(true)?;
                Ok(Stmt {
                    span: decl.span,
                    kind: StmtKind::Function(decl),
                })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Throw) => self.parse_throw(),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::LBrace => {
                let (items, span) = self.parse_block_items()?;
                Ok(Stmt {
                    kind: StmtKind::Block(items),
                    span,
                })
            }
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Empty,
                    span: token.span,
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_var(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Var)?.span;
        let mut end;
        let mut declarations = Vec::new();
        loop {
            let name = self.consume_identifier("expected variable name")?;
            end = name.span;
            let initializer = if self.matches(TokenKind::Assign) {
                let expr = self.parse_assignment()?;
                end = expr.span;
                Some(expr)
            } else {
                None
            };
            declarations.push((name.lexeme, initializer));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.consume_optional_semicolon();
        Ok(Stmt {
            kind: StmtKind::Var(declarations),
            span: start.to(end),
        })
    }

    fn parse_function(&mut self, require_name: bool) -> Result<Rc<FunctionDecl>, Diagnostic> {
        let start = self.consume_keyword(Keyword::Function)?.span;
        let name = if self.check(TokenKind::Identifier) {
            Some(self.advance().lexeme)
        } else if require_name {
            return Err(self.error(self.peek(), "expected function name"));
        } else {
            None
        };
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.consume_identifier("expected parameter name")?.lexeme);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let (body, span) = self.parse_block_items()?;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body,
            span: start.to(span),
        }))
    }

    fn parse_condition(&mut self) -> Result<Expr, Diagnostic> {
        self.consume(TokenKind::LParen, "expected `(` before condition")?;
        let condition = self.parse_expression()?;
        self.consume(TokenKind::RParen, "expected `)` after condition")?;
        Ok(condition)
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span;
        let condition = self.parse_condition()?;
        let then_branch = self.parse_statement()?;
        let mut end = then_branch.span;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            let branch = self.parse_statement()?;
            end = branch.span;
            Some(Box::new(branch))
        } else {
            None
        };
        Ok(Stmt {
            span: start.to(end),
            kind: StmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span;
        let condition = self.parse_condition()?;
        let body = self.parse_statement()?;
        Ok(Stmt {
            span: start.to(body.span),
            kind: StmtKind::While {
                condition,
                body: Box::new(body),
            },
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let expr = if self.check(TokenKind::Semicolon)
            || self.check(TokenKind::RBrace)
            || self.check(TokenKind::Eof)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_optional_semicolon();
        let end = expr.as_ref().map(|e| e.span).unwrap_or(token.span);
        Ok(Stmt {
            span: token.span.to(end),
            kind: StmtKind::Return(expr),
        })
    }

    fn parse_throw(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Throw)?;
        let expr = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: token.span.to(expr.span),
            kind: StmtKind::Throw(expr),
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Try)?.span;
        let (body, _) = self.parse_block_items()?;
        self.consume_keyword(Keyword::Catch)?;
        self.consume(TokenKind::LParen, "expected `(` after `catch`")?;
        let binding = self.consume_identifier("expected catch binding")?.lexeme;
        self.consume(TokenKind::RParen, "expected `)` after catch binding")?;
        let (handler, span) = self.parse_block_items()?;
        Ok(Stmt {
            span: start.to(span),
            kind: StmtKind::Try {
                body,
                binding,
                handler,
            },
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let expr = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, Diagnostic> {
        self.decr_depth_remaining()?;
        let result = self.parse_assignment_impl();
        self.depth_remaining += 1;
        result
    }

    fn parse_assignment_impl(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.parse_or()?;
        if self.matches(TokenKind::Assign) {
            let equals = self.previous().span;
            let value = self.parse_assignment()?;
            match expr.kind {
                ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => Ok(Expr {
                    span: expr.span.to(value.span),
                    kind: ExprKind::Assign {
                        target: Box::new(expr),
                        value: Box::new(value),
                    },
                }),
                _ => Err(
                    Diagnostic::new(DiagnosticKind::Parser, "invalid assignment target")
                        .with_span(equals),
                ),
            }
        } else {
            Ok(expr)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_and()?;
        while self.matches(TokenKind::DoublePipe) {
            self.decr_depth_remaining()?;
            let right = self.parse_and()?;
            expr = logical(LogicalOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_equality()?;
        while self.matches(TokenKind::DoubleAmpersand) {
            self.decr_depth_remaining()?;
            let right = self.parse_equality()?;
            expr = logical(LogicalOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        while let Some(op) = if self.matches(TokenKind::EqualEqual) {
            Some(BinaryOp::Equal)
        } else if self.matches(TokenKind::BangEqual) {
            Some(BinaryOp::NotEqual)
        } else if self.matches(TokenKind::EqualEqualEqual) {
            Some(BinaryOp::StrictEqual)
        } else if self.matches(TokenKind::BangEqualEqual) {
            Some(BinaryOp::StrictNotEqual)
        } else {
            None
        } {
            self.decr_depth_remaining()?;
            let right = self.parse_comparison()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_term()?;
        while let Some(op) = if self.matches(TokenKind::LessEqual) {
            Some(BinaryOp::LessEqual)
        } else if self.matches(TokenKind::GreaterEqual) {
            Some(BinaryOp::GreaterEqual)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Less)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Greater)
        } else {
            None
        } {
            self.decr_depth_remaining()?;
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_factor()?;
        while let Some(op) = if self.matches(TokenKind::Plus) {
            Some(BinaryOp::Add)
        } else if self.matches(TokenKind::Minus) {
            Some(BinaryOp::Sub)
        } else {
            None
        } {
            self.decr_depth_remaining()?;
            let right = self.parse_factor()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_unary()?;
        while let Some(op) = if self.matches(TokenKind::Star) {
            Some(BinaryOp::Mul)
        } else if self.matches(TokenKind::Slash) {
            Some(BinaryOp::Div)
        } else if self.matches(TokenKind::Percent) {
            Some(BinaryOp::Mod)
        } else {
            None
        } {
            self.decr_depth_remaining()?;
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Bang) {
            UnaryOp::Not
        } else if self.matches_keyword(Keyword::Typeof) {
            UnaryOp::Typeof
        } else {
            return self.parse_call();
        };
        let operator = self.previous().span;
        self.decr_depth_remaining()?;
        let right = self.parse_unary();
        self.depth_remaining += 1;
        let right = right?;
        Ok(Expr {
            span: operator.to(right.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(TokenKind::LParen)
                || self.check(TokenKind::LBracket)
                || self.check(TokenKind::Dot)
            {
                self.decr_depth_remaining()?;
            }
            if self.matches(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let paren = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: expr.span.to(paren.span),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: expr.span.to(bracket.span),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let ident = self.consume_property_name("expected property name after `.`")?;
                expr = Expr {
                    span: expr.span.to(ident.span),
                    kind: ExprKind::Field {
                        target: Box::new(expr),
                        field: ident.lexeme,
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek().clone();
        let kind = match &token.kind {
            TokenKind::Keyword(Keyword::True) => ExprKind::Literal(Literal::Bool(true)),
            TokenKind::Keyword(Keyword::False) => ExprKind::Literal(Literal::Bool(false)),
            TokenKind::Keyword(Keyword::Null) => ExprKind::Literal(Literal::Null),
            TokenKind::Keyword(Keyword::This) => ExprKind::This,
            TokenKind::Number => {
                let value = token
                    .lexeme
                    .parse()
                    .map_err(|_| self.error(&token, "malformed number literal"))?;
                ExprKind::Literal(Literal::Number(value))
            }
            TokenKind::String => ExprKind::Literal(Literal::String(token.lexeme.clone())),
            TokenKind::Identifier => ExprKind::Variable(token.lexeme.clone()),
            TokenKind::Keyword(Keyword::Function) => {
                let decl = self.parse_function(false)?;
                return Ok(Expr {
                    span: decl.span,
                    kind: ExprKind::Function(decl),
                });
            }
            TokenKind::LParen => {
                let lparen = self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                return Ok(Expr {
                    span: lparen.span.to(rparen.span),
                    kind: ExprKind::Group(Box::new(inner)),
                });
            }
            TokenKind::LBrace => return self.parse_object_literal(),
            TokenKind::Eof => return Err(self.error(&token, "unexpected end of input")),
            _ => return Err(self.error(&token, "unexpected token in expression")),
        };
        self.advance();
        Ok(Expr {
            span: token.span,
            kind,
        })
    }

    fn parse_object_literal(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.advance();
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let key = self.consume_property_name("expected property name in object literal")?;
            self.consume(TokenKind::Colon, "expected `:` in object literal")?;
            let value = self.parse_assignment()?;
            entries.push((key.lexeme, value));
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after object literal")?;
        Ok(Expr {
            span: lbrace.span.to(rbrace.span),
            kind: ExprKind::ObjectLiteral(entries),
        })
    }

    fn consume_optional_semicolon(&mut self) {
        let _ = self.matches(TokenKind::Semicolon);
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        self.matches(TokenKind::Keyword(keyword))
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, Diagnostic> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(self.peek(), message))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        let message = format!("expected keyword `{}`", format!("{keyword:?}").to_lowercase());
        self.consume(TokenKind::Keyword(keyword), &message)
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    /// Property names may be identifiers, keywords, strings or numbers.
    fn consume_property_name(&mut self, message: &str) -> Result<Token, Diagnostic> {
        match &self.peek().kind {
            TokenKind::Identifier | TokenKind::Keyword(_) | TokenKind::String | TokenKind::Number => {
                Ok(self.advance())
            }
            _ => Err(self.error(self.peek(), message)),
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// The tokenizer always terminates the stream with `Eof`, so the last
    /// token stands in for anything past the end.
    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn decr_depth_remaining(&mut self) -> Result<(), Diagnostic> {
        match self.depth_remaining.checked_sub(1) {
            Some(depth_remaining) => {
                self.depth_remaining = depth_remaining;
                Ok(())
            }
            None => Err(Diagnostic::new(DiagnosticKind::Parser, "too much nesting")
                .with_span(self.peek().span)),
        }
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let message = if token.kind == TokenKind::Eof {
            message.to_string()
        } else {
            format!("{message}, found `{}`", token.lexeme)
        };
        Diagnostic::new(DiagnosticKind::Parser, message).with_span(token.span)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: left.span.to(right.span),
        kind: ExprKind::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
