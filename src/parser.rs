//! AST and recursive-descent parser for the host-expression subset.
//!
//! Every node carries a source span so conversions can be mapped back to
//! the original text later. Parse failures are values; nothing panics on
//! author input.

use crate::error::{CompileTimeError, SourceSpan};
use crate::lexer::{find_unsupported, Lexer, SpannedToken, StringPart, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl LogicalOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
            LogicalOp::Nullish => "??",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier {
        name: String,
        span: SourceSpan,
    },
    Literal {
        value: Literal,
        span: SourceSpan,
    },
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
        span: SourceSpan,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: SourceSpan,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        optional: bool,
        span: SourceSpan,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: SourceSpan,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: SourceSpan,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: SourceSpan,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        span: SourceSpan,
    },
    Template {
        parts: Vec<TemplatePart>,
        span: SourceSpan,
    },
    ArrayLit {
        elements: Vec<Expr>,
        span: SourceSpan,
    },
    ObjectLit {
        entries: Vec<(String, Expr)>,
        span: SourceSpan,
    },
}

impl Expr {
    pub fn span(&self) -> SourceSpan {
        match self {
            Expr::Identifier { span, .. }
            | Expr::Literal { span, .. }
            | Expr::Member { span, .. }
            | Expr::Index { span, .. }
            | Expr::Call { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Template { span, .. }
            | Expr::ArrayLit { span, .. }
            | Expr::ObjectLit { span, .. } => *span,
        }
    }
}

/// Why a source string failed to parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseFailure {
    /// Construct outside the supported subset; carries the categorized error.
    Unsupported(CompileTimeError),
    /// Plain syntax error.
    Syntax { message: String, span: SourceSpan },
}

impl ParseFailure {
    pub fn message(&self) -> String {
        match self {
            ParseFailure::Unsupported(error) => error.message.clone(),
            ParseFailure::Syntax { message, .. } => message.clone(),
        }
    }

    pub fn span(&self) -> SourceSpan {
        match self {
            ParseFailure::Unsupported(error) => {
                error.location.unwrap_or_else(|| SourceSpan::new(1, 1, 1))
            }
            ParseFailure::Syntax { span, .. } => *span,
        }
    }
}

fn merge_spans(start: SourceSpan, end: SourceSpan) -> SourceSpan {
    if start.line == end.line && end.column + end.length > start.column {
        SourceSpan::new(start.line, start.column, end.column + end.length - start.column)
    } else {
        start
    }
}

/// Parse a complete expression source string.
pub fn parse(source: &str) -> Result<Expr, ParseFailure> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| ParseFailure::Syntax {
            message: e.message,
            span: e.span,
        })?;
    if let Some(error) = find_unsupported(&tokens) {
        return Err(ParseFailure::Unsupported(error.with_expression(source)));
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse the body of an arrow-function-shaped source: `(a, b) => expr` or
/// `x => expr`. Everything before the arrow is discarded; only the body is
/// compiled.
pub fn parse_function_body(source: &str) -> Result<Expr, ParseFailure> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| ParseFailure::Syntax {
            message: e.message,
            span: e.span,
        })?;
    let arrow = tokens.iter().position(|t| t.token == Token::Arrow);
    let body: Vec<SpannedToken> = match arrow {
        Some(index) => tokens[index + 1..].to_vec(),
        None => tokens,
    };
    if let Some(error) = find_unsupported(&body) {
        return Err(ParseFailure::Unsupported(error.with_expression(source)));
    }
    let mut parser = Parser::new(body);
    let expr = parser.parse_expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Build a template expression out of pre-split parts, parsing each
/// interpolation recursively.
pub fn parse_template_parts(parts: &[StringPart], span: SourceSpan) -> Result<Expr, ParseFailure> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            StringPart::Literal(text) => out.push(TemplatePart::Literal(text.clone())),
            StringPart::Expression(source) => {
                out.push(TemplatePart::Interpolation(parse(source)?));
            }
        }
    }
    Ok(Expr::Template { parts: out, span })
}

pub struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    fn current(&self) -> &SpannedToken {
        self.tokens
            .get(self.position)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with Eof"))
    }

    fn current_token(&self) -> &Token {
        &self.current().token
    }

    fn current_span(&self) -> SourceSpan {
        self.current().span
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseFailure> {
        if self.current_token() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseFailure::Syntax {
                message: format!("expected {}, got {}", expected, self.current_token()),
                span: self.current_span(),
            })
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseFailure> {
        if self.current_token() == &Token::Eof {
            Ok(())
        } else {
            Err(ParseFailure::Syntax {
                message: format!("unexpected trailing {}", self.current_token()),
                span: self.current_span(),
            })
        }
    }

    pub fn parse_expression(&mut self) -> Result<Expr, ParseFailure> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseFailure> {
        let condition = self.parse_binary(1)?;

        if self.current_token() == &Token::Question {
            self.advance();
            // Right-associative on both branches.
            let then_branch = self.parse_conditional()?;
            self.expect(Token::Colon)?;
            let else_branch = self.parse_conditional()?;
            let span = merge_spans(condition.span(), else_branch.span());
            Ok(Expr::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
                span,
            })
        } else {
            Ok(condition)
        }
    }

    fn get_binary_op(&self) -> Option<(BinOpKind, u8)> {
        match self.current_token() {
            Token::Nullish => Some((BinOpKind::Logical(LogicalOp::Nullish), 1)),
            Token::Or => Some((BinOpKind::Logical(LogicalOp::Or), 1)),
            Token::And => Some((BinOpKind::Logical(LogicalOp::And), 2)),
            Token::Eq => Some((BinOpKind::Binary(BinaryOp::Eq), 3)),
            Token::Ne => Some((BinOpKind::Binary(BinaryOp::Ne), 3)),
            Token::Lt => Some((BinOpKind::Binary(BinaryOp::Lt), 4)),
            Token::Le => Some((BinOpKind::Binary(BinaryOp::Le), 4)),
            Token::Gt => Some((BinOpKind::Binary(BinaryOp::Gt), 4)),
            Token::Ge => Some((BinOpKind::Binary(BinaryOp::Ge), 4)),
            Token::Plus => Some((BinOpKind::Binary(BinaryOp::Add), 5)),
            Token::Minus => Some((BinOpKind::Binary(BinaryOp::Sub), 5)),
            Token::Star => Some((BinOpKind::Binary(BinaryOp::Mul), 6)),
            Token::Slash => Some((BinOpKind::Binary(BinaryOp::Div), 6)),
            Token::Percent => Some((BinOpKind::Binary(BinaryOp::Mod), 6)),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseFailure> {
        let mut left = self.parse_unary()?;

        while let Some((kind, precedence)) = self.get_binary_op() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let span = merge_spans(left.span(), right.span());
            left = match kind {
                BinOpKind::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                },
                BinOpKind::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                },
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseFailure> {
        let span = self.current_span();
        let op = match self.current_token() {
            Token::Not => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            Token::Plus => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            let span = merge_spans(span, operand.span());
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseFailure> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.current_token() {
                Token::Dot => {
                    self.advance();
                    let (property, prop_span) = self.expect_property_name()?;
                    let span = merge_spans(expr.span(), prop_span);
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                        span,
                    };
                }
                Token::QuestionDot => {
                    self.advance();
                    if self.current_token() == &Token::LParen {
                        expr = self.parse_call(expr, true)?;
                    } else {
                        let (property, prop_span) = self.expect_property_name()?;
                        let span = merge_spans(expr.span(), prop_span);
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property,
                            optional: true,
                            span,
                        };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.current_span();
                    self.expect(Token::RBracket)?;
                    let span = merge_spans(expr.span(), end);
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }
                Token::LParen => {
                    expr = self.parse_call(expr, false)?;
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_call(&mut self, callee: Expr, optional: bool) -> Result<Expr, ParseFailure> {
        self.expect(Token::LParen)?;
        let mut arguments = Vec::new();
        while self.current_token() != &Token::RParen {
            arguments.push(self.parse_expression()?);
            if self.current_token() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.current_span();
        self.expect(Token::RParen)?;
        let span = merge_spans(callee.span(), end);
        Ok(Expr::Call {
            callee: Box::new(callee),
            arguments,
            optional,
            span,
        })
    }

    fn expect_property_name(&mut self) -> Result<(String, SourceSpan), ParseFailure> {
        match self.current_token().clone() {
            Token::Ident(name) => {
                let span = self.current_span();
                self.advance();
                Ok((name, span))
            }
            other => Err(ParseFailure::Syntax {
                message: format!("expected property name after '.', got {}", other),
                span: self.current_span(),
            }),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseFailure> {
        let span = self.current_span();
        match self.current_token().clone() {
            Token::IntLiteral(n) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Int(n),
                    span,
                })
            }
            Token::FloatLiteral(f) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Float(f),
                    span,
                })
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::String(s),
                    span,
                })
            }
            Token::BoolLiteral(b) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Bool(b),
                    span,
                })
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Null,
                    span,
                })
            }
            Token::TemplateString(parts) => {
                self.advance();
                parse_template_parts(&parts, span)
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Identifier { name, span })
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while self.current_token() != &Token::RBracket {
                    elements.push(self.parse_expression()?);
                    if self.current_token() == &Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let end = self.current_span();
                self.expect(Token::RBracket)?;
                Ok(Expr::ArrayLit {
                    elements,
                    span: merge_spans(span, end),
                })
            }
            Token::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while self.current_token() != &Token::RBrace {
                    let key = match self.current_token().clone() {
                        Token::Ident(name) => {
                            self.advance();
                            name
                        }
                        Token::StringLiteral(name) => {
                            self.advance();
                            name
                        }
                        other => {
                            return Err(ParseFailure::Syntax {
                                message: format!("expected object key, got {}", other),
                                span: self.current_span(),
                            });
                        }
                    };
                    self.expect(Token::Colon)?;
                    entries.push((key, self.parse_expression()?));
                    if self.current_token() == &Token::Comma {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let end = self.current_span();
                self.expect(Token::RBrace)?;
                Ok(Expr::ObjectLit {
                    entries,
                    span: merge_spans(span, end),
                })
            }
            other => Err(ParseFailure::Syntax {
                message: format!("unexpected {}", other),
                span,
            }),
        }
    }
}

enum BinOpKind {
    Binary(BinaryOp),
    Logical(LogicalOp),
}
