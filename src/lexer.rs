//! Tokenizer for the supported host-expression subset.
//!
//! Single-pass, hand-written. Produces spanned tokens; never panics on bad
//! input. Template literals keep their fixed parts and interpolation
//! sources separate so the parser can recurse into `${...}` bodies.

use crate::error::{CompileTimeError, SourceSpan};
use std::fmt;

/// One segment of a template literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StringPart {
    Literal(String),
    /// The expression text inside `${}`.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    TemplateString(Vec<StringPart>),
    BoolLiteral(bool),
    Null,

    // Identifiers
    Ident(String),

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,
    Nullish, // ??
    Not,

    // Assignment family: lexed so the unsupported-syntax scan can name them
    Assign,
    AugAssign(char), // +=, -=, *=, /=, %=

    // Structure
    Question,
    QuestionDot, // ?.
    Colon,
    Dot,
    Comma,
    Arrow, // =>
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::IntLiteral(n) => write!(f, "{}", n),
            Token::StringLiteral(s) => write!(f, "\"{}\"", s),
            _ => write!(f, "{:?}", self),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: SourceSpan,
}

/// A tokenization failure: unexpected character, unterminated string.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub span: SourceSpan,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();
        Lexer {
            input: chars,
            position: 0,
            line: 1,
            column: 1,
            current_char,
        }
    }

    fn advance(&mut self) {
        if self.current_char == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn here(&self) -> (usize, usize, usize) {
        (self.line, self.column, self.position)
    }

    fn span_from(&self, start: (usize, usize, usize)) -> SourceSpan {
        SourceSpan::new(start.0, start.1, self.position.saturating_sub(start.2).max(1))
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.here();
        let mut num_str = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            num_str.parse().map(Token::FloatLiteral).map_err(|_| LexError {
                message: format!("malformed float literal '{}'", num_str),
                span: self.span_from(start),
            })
        } else {
            num_str.parse().map(Token::IntLiteral).map_err(|_| LexError {
                message: format!("integer literal '{}' out of range", num_str),
                span: self.span_from(start),
            })
        }
    }

    fn read_escaped_char(&mut self) -> char {
        // Caller consumed the backslash.
        let escaped = self.current_char.unwrap_or('\\');
        let unescaped = match escaped {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            '`' => '`',
            '$' => '$',
            '0' => '\0',
            other => other,
        };
        self.advance();
        unescaped
    }

    /// Plain single- or double-quoted string. No interpolation.
    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.here();
        self.advance(); // opening quote
        let mut literal = String::new();

        loop {
            match self.current_char {
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok(Token::StringLiteral(literal));
                }
                Some('\\') => {
                    self.advance();
                    literal.push(self.read_escaped_char());
                }
                Some(ch) => {
                    literal.push(ch);
                    self.advance();
                }
                None => {
                    return Err(LexError {
                        message: "unterminated string literal".into(),
                        span: self.span_from(start),
                    });
                }
            }
        }
    }

    /// Backtick template literal with `${...}` interpolations.
    fn read_template(&mut self) -> Result<Token, LexError> {
        let start = self.here();
        self.advance(); // opening backtick
        let mut parts = Vec::new();
        let mut current_literal = String::new();

        loop {
            match self.current_char {
                Some('`') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    current_literal.push(self.read_escaped_char());
                }
                Some('$') if self.peek(1) == Some('{') => {
                    if !current_literal.is_empty() {
                        parts.push(StringPart::Literal(current_literal.clone()));
                        current_literal.clear();
                    }
                    self.advance();
                    self.advance();

                    // Read expression until the matching brace.
                    let mut expr = String::new();
                    let mut brace_depth = 1;
                    loop {
                        match self.current_char {
                            Some('{') => {
                                brace_depth += 1;
                                expr.push('{');
                                self.advance();
                            }
                            Some('}') => {
                                brace_depth -= 1;
                                if brace_depth == 0 {
                                    self.advance();
                                    break;
                                }
                                expr.push('}');
                                self.advance();
                            }
                            Some(ch) => {
                                expr.push(ch);
                                self.advance();
                            }
                            None => {
                                return Err(LexError {
                                    message: "unterminated interpolation in template literal"
                                        .into(),
                                    span: self.span_from(start),
                                });
                            }
                        }
                    }
                    parts.push(StringPart::Expression(expr));
                }
                Some(ch) => {
                    current_literal.push(ch);
                    self.advance();
                }
                None => {
                    return Err(LexError {
                        message: "unterminated template literal".into(),
                        span: self.span_from(start),
                    });
                }
            }
        }

        if !current_literal.is_empty() || parts.is_empty() {
            parts.push(StringPart::Literal(current_literal));
        }
        Ok(Token::TemplateString(parts))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match ident.as_str() {
            "true" => Token::BoolLiteral(true),
            "false" => Token::BoolLiteral(false),
            "null" | "undefined" => Token::Null,
            _ => Token::Ident(ident),
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, LexError> {
        self.skip_whitespace();
        let start = self.here();

        let token = match self.current_char {
            None => Token::Eof,
            Some('"') => self.read_string('"')?,
            Some('\'') => self.read_string('\'')?,
            Some('`') => self.read_template()?,
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some(ch) if ch.is_alphabetic() || ch == '_' || ch == '$' => self.read_identifier(),
            Some('+') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::AugAssign('+')
            }
            Some('+') => {
                self.advance();
                Token::Plus
            }
            Some('-') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::AugAssign('-')
            }
            Some('-') => {
                self.advance();
                Token::Minus
            }
            Some('*') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::AugAssign('*')
            }
            Some('*') => {
                self.advance();
                Token::Star
            }
            Some('/') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::AugAssign('/')
            }
            Some('/') => {
                self.advance();
                Token::Slash
            }
            Some('%') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::AugAssign('%')
            }
            Some('%') => {
                self.advance();
                Token::Percent
            }
            Some('=') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                // Strict and loose equality both lower to CEL ==
                if self.current_char == Some('=') {
                    self.advance();
                }
                Token::Eq
            }
            Some('=') if self.peek(1) == Some('>') => {
                self.advance();
                self.advance();
                Token::Arrow
            }
            Some('=') => {
                self.advance();
                Token::Assign
            }
            Some('!') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                }
                Token::Ne
            }
            Some('!') => {
                self.advance();
                Token::Not
            }
            Some('<') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::Le
            }
            Some('<') => {
                self.advance();
                Token::Lt
            }
            Some('>') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::Ge
            }
            Some('>') => {
                self.advance();
                Token::Gt
            }
            Some('&') if self.peek(1) == Some('&') => {
                self.advance();
                self.advance();
                Token::And
            }
            Some('|') if self.peek(1) == Some('|') => {
                self.advance();
                self.advance();
                Token::Or
            }
            Some('?') if self.peek(1) == Some('?') => {
                self.advance();
                self.advance();
                Token::Nullish
            }
            Some('?') if self.peek(1) == Some('.') => {
                self.advance();
                self.advance();
                Token::QuestionDot
            }
            Some('?') => {
                self.advance();
                Token::Question
            }
            Some(':') => {
                self.advance();
                Token::Colon
            }
            Some('.') => {
                self.advance();
                Token::Dot
            }
            Some(',') => {
                self.advance();
                Token::Comma
            }
            Some('(') => {
                self.advance();
                Token::LParen
            }
            Some(')') => {
                self.advance();
                Token::RParen
            }
            Some('[') => {
                self.advance();
                Token::LBracket
            }
            Some(']') => {
                self.advance();
                Token::RBracket
            }
            Some('{') => {
                self.advance();
                Token::LBrace
            }
            Some('}') => {
                self.advance();
                Token::RBrace
            }
            Some(ch) => {
                self.advance();
                return Err(LexError {
                    message: format!("unexpected character '{}'", ch),
                    span: self.span_from(start),
                });
            }
        };

        Ok(SpannedToken {
            token,
            span: self.span_from(start),
        })
    }

    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

/// Split a raw string containing `${...}` interpolations into template
/// parts, without requiring backticks. Used for plain strings the analyzer
/// treats as templates.
pub fn split_interpolations(source: &str) -> Result<Vec<StringPart>, LexError> {
    let wrapped = format!("`{}`", source.replace('`', "\\`"));
    let mut lexer = Lexer::new(&wrapped);
    match lexer.next_token()?.token {
        Token::TemplateString(parts) => Ok(parts),
        _ => unreachable!("template lexing always yields a template token"),
    }
}

/// Keywords and operators outside the supported subset. The scan runs over
/// the token stream before parsing so authors get a categorized error with
/// the offending span instead of a generic parse failure.
pub fn find_unsupported(tokens: &[SpannedToken]) -> Option<CompileTimeError> {
    for (i, spanned) in tokens.iter().enumerate() {
        match &spanned.token {
            Token::Ident(name) => {
                let message = match name.as_str() {
                    "async" | "await" => Some(format!("'{}' expressions are not supported", name)),
                    "class" => Some("class declarations are not supported".to_string()),
                    "function" => Some("function declarations are not supported".to_string()),
                    "yield" => Some("generators are not supported".to_string()),
                    "with" => Some("'with' blocks are not supported".to_string()),
                    "eval" => {
                        let is_call = tokens
                            .get(i + 1)
                            .is_some_and(|next| next.token == Token::LParen);
                        is_call.then(|| "'eval(...)' is not supported".to_string())
                    }
                    "Function" => {
                        let after_new = i > 0
                            && matches!(&tokens[i - 1].token, Token::Ident(prev) if prev == "new");
                        after_new.then(|| "'new Function(...)' is not supported".to_string())
                    }
                    _ => None,
                };
                if let Some(message) = message {
                    return Some(
                        CompileTimeError::unsupported_syntax(message)
                            .with_location(spanned.span)
                            .suggest("use the supported expression subset: references, literals, operators, ternaries and template literals"),
                    );
                }
            }
            Token::Assign => {
                return Some(
                    CompileTimeError::unsupported_syntax("assignment is not supported")
                        .with_location(spanned.span)
                        .suggest("expressions must be pure; use '==' for comparison"),
                );
            }
            Token::AugAssign(op) => {
                return Some(
                    CompileTimeError::unsupported_syntax(format!(
                        "compound assignment '{}=' is not supported",
                        op
                    ))
                    .with_location(spanned.span),
                );
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_of(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_lexer_basic() {
        let tokens = tokens_of("schema.spec.name");
        assert_eq!(tokens[0], Token::Ident("schema".to_string()));
        assert_eq!(tokens[1], Token::Dot);
        assert_eq!(tokens[2], Token::Ident("spec".to_string()));
        assert_eq!(tokens[4], Token::Ident("name".to_string()));
        assert_eq!(tokens[5], Token::Eof);
    }

    #[test]
    fn test_lexer_operators() {
        let tokens = tokens_of("a >= 1 && b != 'x' || c ?? d");
        assert!(tokens.contains(&Token::Ge));
        assert!(tokens.contains(&Token::And));
        assert!(tokens.contains(&Token::Ne));
        assert!(tokens.contains(&Token::Or));
        assert!(tokens.contains(&Token::Nullish));
    }

    #[test]
    fn test_strict_equality_collapses() {
        let tokens = tokens_of("a === b !== c");
        assert_eq!(tokens[1], Token::Eq);
        assert_eq!(tokens[3], Token::Ne);
    }

    #[test]
    fn test_optional_chaining_token() {
        let tokens = tokens_of("a?.b ? c : d");
        assert_eq!(tokens[1], Token::QuestionDot);
        assert_eq!(tokens[3], Token::Question);
        assert_eq!(tokens[5], Token::Colon);
    }

    #[test]
    fn test_template_literal_parts() {
        let tokens = tokens_of("`http://${schema.spec.host}/api`");
        match &tokens[0] {
            Token::TemplateString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], StringPart::Literal("http://".to_string()));
                assert_eq!(
                    parts[1],
                    StringPart::Expression("schema.spec.host".to_string())
                );
                assert_eq!(parts[2], StringPart::Literal("/api".to_string()));
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_braces_in_interpolation() {
        let tokens = tokens_of("`${a ? 'x' : 'y'}`");
        match &tokens[0] {
            Token::TemplateString(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(
                    parts[0],
                    StringPart::Expression("a ? 'x' : 'y'".to_string())
                );
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn test_split_interpolations() {
        let parts = split_interpolations("x-${resources.ns.metadata.name}-y").unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[1],
            StringPart::Expression("resources.ns.metadata.name".to_string())
        );
    }

    #[test]
    fn test_unterminated_string_is_error_not_panic() {
        assert!(Lexer::new("'oops").tokenize().is_err());
        assert!(Lexer::new("`oops ${a").tokenize().is_err());
    }

    #[test]
    fn test_unsupported_scan() {
        let tokens = Lexer::new("await fetch(url)").tokenize().unwrap();
        let error = find_unsupported(&tokens).unwrap();
        assert_eq!(
            error.category,
            crate::error::CompileErrorCategory::UnsupportedSyntax
        );

        let tokens = Lexer::new("a = b").tokenize().unwrap();
        assert!(find_unsupported(&tokens).is_some());

        let tokens = Lexer::new("new Function('x')").tokenize().unwrap();
        assert!(find_unsupported(&tokens).is_some());

        // 'eval' as a plain property name is fine
        let tokens = Lexer::new("schema.spec.eval").tokenize().unwrap();
        assert!(find_unsupported(&tokens).is_none());

        let tokens = Lexer::new("a == b && c >= 2").tokenize().unwrap();
        assert!(find_unsupported(&tokens).is_none());
    }

    #[test]
    fn test_spans_track_columns() {
        let tokens = Lexer::new("abc + def").tokenize().unwrap();
        assert_eq!(tokens[0].span.column, 1);
        assert_eq!(tokens[1].span.column, 5);
        assert_eq!(tokens[2].span.column, 7);
    }
}
