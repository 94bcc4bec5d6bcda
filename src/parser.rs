use crate::{
    ast::{Atom, BinaryOp, Expr, ExprKind, Program, Stmt, StmtKind, TypeExpr, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, SourceSpan},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

pub fn parse_program(source: &str) -> Result<Program, Diagnostic> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        Ok(Program { items })
    }

    fn parse_block_items(&mut self, terminator: TokenKind) -> Result<Vec<Stmt>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(terminator.clone()) && !self.check(TokenKind::Eof) {
            items.push(self.parse_statement()?);
        }
        self.consume(terminator, "expected block terminator")?;
        Ok(items)
    }

    fn parse_block(&mut self) -> Result<(Vec<Stmt>, SourceSpan), Diagnostic> {
        let lbrace = self.consume(TokenKind::LBrace, "expected `{` to start block")?;
        let items = self.parse_block_items(TokenKind::RBrace)?;
        let end = self.previous().span.end;
        Ok((items, SourceSpan::new(lbrace.span.start, end)))
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Var) => return self.parse_var_decl(),
                TokenKind::Keyword(Keyword::Const) => return self.parse_const_decl(),
                TokenKind::Keyword(Keyword::Fn) => return self.parse_function(),
                TokenKind::Keyword(Keyword::Import) => return self.parse_import(),
                TokenKind::Keyword(Keyword::If) => return self.parse_if(),
                TokenKind::Keyword(Keyword::While) => return self.parse_while(),
                TokenKind::Keyword(Keyword::Return) => return self.parse_return(),
                TokenKind::Keyword(Keyword::Break) => {
                    return self.parse_bare_keyword(Keyword::Break, StmtKind::Break);
                }
                TokenKind::Keyword(Keyword::Continue) => {
                    return self.parse_bare_keyword(Keyword::Continue, StmtKind::Continue);
                }
                TokenKind::Keyword(Keyword::Print) => return self.parse_print(),
                TokenKind::Keyword(Keyword::Assert) => return self.parse_assert(),
                TokenKind::LBrace => {
                    let (items, span) = self.parse_block()?;
                    return Ok(Stmt {
                        kind: StmtKind::Block(items),
                        span,
                    });
                }
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Var)?.span.start;
        let name_token = self.consume_identifier("expected variable name")?;
        let annotation = self.parse_annotation()?;
        let initializer = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_optional_semicolon();
        let end = initializer
            .as_ref()
            .map(|expr| expr.span.end)
            .unwrap_or(name_token.span.end);
        Ok(Stmt {
            kind: StmtKind::VarDecl {
                name: name_token.lexeme,
                constant: false,
                annotation,
                initializer,
            },
            span: SourceSpan::new(start, end),
        })
    }

    fn parse_const_decl(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Const)?.span.start;
        let name_token = self.consume_identifier("expected constant name")?;
        let annotation = self.parse_annotation()?;
        self.consume(TokenKind::Assign, "expected `=` in constant declaration")?;
        let value = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: SourceSpan::new(start, value.span.end),
            kind: StmtKind::VarDecl {
                name: name_token.lexeme,
                constant: true,
                annotation,
                initializer: Some(value),
            },
        })
    }

    fn parse_annotation(&mut self) -> Result<Option<TypeExpr>, Diagnostic> {
        if self.matches(TokenKind::Colon) {
            Ok(Some(self.parse_type_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_function(&mut self) -> Result<Stmt, Diagnostic> {
        let start_token = self.consume_keyword(Keyword::Fn)?;
        let name_token = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let param = self.consume_identifier("expected parameter name")?;
                if params.contains(&param.lexeme) {
                    return Err(self.error(&param, "duplicate parameter name"));
                }
                params.push(param.lexeme);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: SourceSpan::new(start_token.span.start, span.end),
            kind: StmtKind::Function {
                name: name_token.lexeme,
                params,
                body,
            },
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, Diagnostic> {
        let import_token = self.consume_keyword(Keyword::Import)?;
        let name_token = self.consume_identifier("expected hook name after `import`")?;
        let mut end = name_token.span.end;
        let alias = if self.matches_keyword(Keyword::As) {
            let alias_token = self.consume_identifier("expected alias after `as`")?;
            end = alias_token.span.end;
            Some(alias_token.lexeme)
        } else {
            None
        };
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: SourceSpan::new(import_token.span.start, end),
            kind: StmtKind::Import {
                name: name_token.lexeme,
                alias,
            },
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::If)?.span.start;
        let condition = self.parse_expression()?;
        let (then_branch, then_span) = self.parse_block()?;
        let mut end = then_span.end;
        let else_branch = if self.matches_keyword(Keyword::Else) {
            if self.check(TokenKind::Keyword(Keyword::If)) {
                let else_if = self.parse_if()?;
                end = else_if.span.end;
                Some(vec![else_if])
            } else {
                let (branch, span) = self.parse_block()?;
                end = span.end;
                Some(branch)
            }
        } else {
            None
        };
        Ok(Stmt {
            span: SourceSpan::new(start, end),
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::While)?.span.start;
        let condition = self.parse_expression()?;
        let (body, span) = self.parse_block()?;
        Ok(Stmt {
            span: SourceSpan::new(start, span.end),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(Keyword::Return)?;
        let mut values = Vec::new();
        if !self.check(TokenKind::Semicolon)
            && !self.check(TokenKind::RBrace)
            && !self.check(TokenKind::Eof)
        {
            loop {
                values.push(self.parse_expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume_optional_semicolon();
        let end = values
            .last()
            .map(|expr| expr.span.end)
            .unwrap_or(token.span.end);
        Ok(Stmt {
            span: SourceSpan::new(token.span.start, end),
            kind: StmtKind::Return(values),
        })
    }

    fn parse_bare_keyword(&mut self, keyword: Keyword, kind: StmtKind) -> Result<Stmt, Diagnostic> {
        let token = self.consume_keyword(keyword)?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: token.span,
            kind,
        })
    }

    fn parse_print(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Print)?.span.start;
        let expr = self.parse_expression()?;
        self.consume_optional_semicolon();
        Ok(Stmt {
            span: SourceSpan::new(start, expr.span.end),
            kind: StmtKind::Print(expr),
        })
    }

    fn parse_assert(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.consume_keyword(Keyword::Assert)?.span.start;
        let condition = self.parse_expression()?;
        let message = if self.matches(TokenKind::Comma) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_optional_semicolon();
        let end = message
            .as_ref()
            .map(|expr| expr.span.end)
            .unwrap_or(condition.span.end);
        Ok(Stmt {
            span: SourceSpan::new(start, end),
            kind: StmtKind::Assert { condition, message },
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
        let expr = self.parse_or()?;
        if self.matches(TokenKind::Assign) {
            let equals = self.previous().clone();
            let value = self.parse_assignment()?;
            return match expr.kind {
                ExprKind::Variable(_) | ExprKind::Index { .. } | ExprKind::Field { .. } => {
                    Ok(Expr {
                        span: SourceSpan::new(expr.span.start, value.span.end),
                        kind: ExprKind::Assign {
                            target: Box::new(expr),
                            value: Box::new(value),
                        },
                    })
                }
                _ => Err(self.error(&equals, "invalid assignment target")),
            };
        }
        Ok(expr)
    }

    /// Parses a left-associative chain of the operators in `table` over `operand`.
    fn parse_binary(
        &mut self,
        table: &[(TokenKind, BinaryOp)],
        operand: fn(&mut Self) -> Result<Expr, Diagnostic>,
    ) -> Result<Expr, Diagnostic> {
        let mut expr = operand(self)?;
        'chain: loop {
            for (token, op) in table {
                if self.matches(token.clone()) {
                    let right = operand(self)?;
                    expr = Expr {
                        span: SourceSpan::new(expr.span.start, right.span.end),
                        kind: ExprKind::Binary {
                            op: *op,
                            left: Box::new(expr),
                            right: Box::new(right),
                        },
                    };
                    continue 'chain;
                }
            }
            return Ok(expr);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(&[(TokenKind::DoublePipe, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(
            &[(TokenKind::DoubleAmpersand, BinaryOp::And)],
            Self::parse_equality,
        )
    }

    fn parse_equality(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(
            &[
                (TokenKind::EqualEqual, BinaryOp::Equal),
                (TokenKind::BangEqual, BinaryOp::NotEqual),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(
            &[
                (TokenKind::LessEqual, BinaryOp::LessEqual),
                (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
                (TokenKind::Less, BinaryOp::Less),
                (TokenKind::Greater, BinaryOp::Greater),
            ],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_binary(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let op = if self.matches(TokenKind::Minus) {
            UnaryOp::Negate
        } else if self.matches(TokenKind::Bang) {
            UnaryOp::Not
        } else {
            return self.parse_call();
        };
        let operator = self.previous().span;
        let right = self.parse_unary()?;
        Ok(Expr {
            span: SourceSpan::new(operator.start, right.span.end),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(right),
            },
        })
    }

    fn parse_call(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let args = self.parse_list(TokenKind::RParen, Self::parse_expression)?;
                let paren = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, paren.span.end),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                let index = self.parse_expression()?;
                let bracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, bracket.span.end),
                    kind: ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            } else if self.matches(TokenKind::Dot) {
                let ident = self.consume_identifier("expected field after `.`")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, ident.span.end),
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

    fn parse_list<T>(
        &mut self,
        terminator: TokenKind,
        mut element: impl FnMut(&mut Self) -> Result<T, Diagnostic>,
    ) -> Result<Vec<T>, Diagnostic> {
        let mut items = Vec::new();
        while !self.check(terminator.clone()) {
            items.push(element(self)?);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_eof("unexpected end of expression"));
        };
        let atom = |kind| Expr {
            span: token.span,
            kind,
        };
        match &token.kind {
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(atom(ExprKind::Atom(Atom::Bool(true))))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(atom(ExprKind::Atom(Atom::Bool(false))))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(atom(ExprKind::Atom(Atom::Null)))
            }
            TokenKind::Number => {
                self.advance();
                let value = token
                    .lexeme
                    .replace('_', "")
                    .parse::<f64>()
                    .map_err(|_| self.error(&token, "invalid number literal"))?;
                Ok(atom(ExprKind::Atom(Atom::Number(value))))
            }
            TokenKind::String => {
                self.advance();
                Ok(atom(ExprKind::Atom(Atom::String(token.lexeme.clone()))))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(atom(ExprKind::Variable(token.lexeme.clone())))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(Expr {
                    span: SourceSpan::new(token.span.start, rparen.span.end),
                    kind: ExprKind::Group(Box::new(inner)),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_list(TokenKind::RBracket, Self::parse_expression)?;
                let rbracket =
                    self.consume(TokenKind::RBracket, "expected `]` after array literal")?;
                Ok(Expr {
                    span: SourceSpan::new(token.span.start, rbracket.span.end),
                    kind: ExprKind::ArrayLiteral(elements),
                })
            }
            TokenKind::LBrace => self.parse_inline_map(),
            _ => Err(self.error(&token, "unexpected token in expression")),
        }
    }

    fn parse_inline_map(&mut self) -> Result<Expr, Diagnostic> {
        let lbrace = self.advance();
        let entries = self.parse_list(TokenKind::RBrace, |parser| {
            let key = parser.parse_expression()?;
            parser.consume(TokenKind::Colon, "expected `:` in dictionary literal")?;
            let value = parser.parse_expression()?;
            Ok((key, value))
        })?;
        let rbrace = self.consume(TokenKind::RBrace, "expected `}` after dictionary literal")?;
        Ok(Expr {
            span: SourceSpan::new(lbrace.span.start, rbrace.span.end),
            kind: ExprKind::MapLiteral(entries),
        })
    }

    fn parse_type_expr(&mut self) -> Result<TypeExpr, Diagnostic> {
        let ident = self.consume_identifier("expected type name")?;
        let mut ty = TypeExpr {
            name: ident.lexeme,
            generics: Vec::new(),
            span: ident.span,
        };
        if self.matches(TokenKind::Less) {
            let mut generics = Vec::new();
            loop {
                generics.push(self.parse_type_expr()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
            let close = self.consume(TokenKind::Greater, "expected `>` to close generics")?;
            ty.generics = generics;
            ty.span.end = close.span.end;
        }
        Ok(ty)
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
            Err(self
                .peek()
                .map(|tok| self.error(tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, Diagnostic> {
        let message = format!("expected keyword `{keyword:?}`");
        self.consume(TokenKind::Keyword(keyword), &message)
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, Diagnostic> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|token| token.kind == kind)
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

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eof) | None)
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string()).with_span(token.span)
    }

    fn error_eof(&self, message: &str) -> Diagnostic {
        Diagnostic::new(DiagnosticKind::Parser, message.to_string())
    }
}
