//! Error types for the expression compilation pipeline.
//!
//! Provides rich error reporting with source locations, code snippets,
//! and helpful suggestions - inspired by Rust's excellent error messages.
//! Input-level problems are reported as values (inside conversion results);
//! only programmer errors may panic.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A span inside an expression source string.
///
/// Lines and columns are 1-indexed; `length` counts characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl SourceSpan {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Self {
            line,
            column,
            length,
        }
    }

    /// Span covering an entire single-line expression.
    pub fn whole(source: &str) -> Self {
        Self::new(1, 1, source.chars().count())
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A suggestion for fixing an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub message: String,
    pub replacement: Option<String>,
}

impl Suggestion {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            replacement: None,
        }
    }

    pub fn with_replacement(message: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            replacement: Some(replacement.into()),
        }
    }
}

/// What kind of construct defeated the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionErrorCategory {
    Javascript,
    TemplateLiteral,
    FunctionCall,
    MemberAccess,
    BinaryOperation,
    Conditional,
    OptionalChaining,
    NullishCoalescing,
    Unknown,
}

impl ConversionErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::TemplateLiteral => "template-literal",
            Self::FunctionCall => "function-call",
            Self::MemberAccess => "member-access",
            Self::BinaryOperation => "binary-operation",
            Self::Conditional => "conditional",
            Self::OptionalChaining => "optional-chaining",
            Self::NullishCoalescing => "nullish-coalescing",
            Self::Unknown => "unknown",
        }
    }
}

/// The analyzer could not lower an input expression.
///
/// Never thrown across the API boundary; carried inside conversion results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionError {
    pub expression: String,
    pub category: ConversionErrorCategory,
    pub message: String,
    pub location: Option<SourceSpan>,
    pub context: BTreeMap<String, String>,
    pub suggestions: Vec<Suggestion>,
}

impl ConversionError {
    pub fn new(
        expression: impl Into<String>,
        category: ConversionErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            expression: expression.into(),
            category,
            message: message.into(),
            location: None,
            context: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: SourceSpan) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Add a simple suggestion message.
    pub fn suggest(mut self, message: impl Into<String>) -> Self {
        self.suggestions.push(Suggestion::new(message));
        self
    }

    /// Render the error the way rustc renders diagnostics, with color.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{}: {}\n",
            "error".red().bold(),
            self.message.bold()
        ));
        let span = self
            .location
            .unwrap_or_else(|| SourceSpan::whole(&self.expression));
        out.push_str(&format!("  --> expr:{}:{}\n", span.line, span.column));
        out.push_str("   |\n");
        for (i, line) in self.expression.lines().enumerate() {
            out.push_str(&format!("{:3} | {}\n", span.line + i, line));
        }
        out.push_str("   |");
        if span.column > 0 {
            out.push(' ');
            out.push_str(&" ".repeat(span.column - 1));
            out.push_str(&"^".repeat(span.length.max(1)).red().to_string());
        }
        out.push('\n');
        for suggestion in &self.suggestions {
            out.push_str(&format!("   = {}: {}\n", "help".cyan(), suggestion.message));
            if let Some(ref replacement) = suggestion.replacement {
                out.push_str(&format!("   = suggestion: {}\n", replacement));
            }
        }
        out
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot convert expression ({}): {}",
            self.category.as_str(),
            self.message
        )?;
        if let Some(span) = self.location {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConversionError {}

/// Compile-time compatibility check failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileErrorCategory {
    TypeIncompatibility,
    UnsupportedSyntax,
    GenericConstraintViolation,
    CircularTypeReference,
    MissingTypeInformation,
}

impl CompileErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypeIncompatibility => "TYPE_INCOMPATIBILITY",
            Self::UnsupportedSyntax => "UNSUPPORTED_SYNTAX",
            Self::GenericConstraintViolation => "GENERIC_CONSTRAINT_VIOLATION",
            Self::CircularTypeReference => "CIRCULAR_TYPE_REFERENCE",
            Self::MissingTypeInformation => "MISSING_TYPE_INFORMATION",
        }
    }
}

/// A compile-time compatibility check failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileTimeError {
    pub category: CompileErrorCategory,
    pub message: String,
    pub expression: Option<String>,
    pub location: Option<SourceSpan>,
    pub suggestions: Vec<Suggestion>,
}

impl CompileTimeError {
    pub fn new(category: CompileErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            expression: None,
            location: None,
            suggestions: Vec::new(),
        }
    }

    pub fn unsupported_syntax(message: impl Into<String>) -> Self {
        Self::new(CompileErrorCategory::UnsupportedSyntax, message)
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_location(mut self, location: SourceSpan) -> Self {
        self.location = Some(location);
        self
    }

    pub fn suggest(mut self, message: impl Into<String>) -> Self {
        self.suggestions.push(Suggestion::new(message));
        self
    }
}

impl fmt::Display for CompileTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category.as_str(), self.message)?;
        if let Some(span) = self.location {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileTimeError {}

/// Non-fatal compile-time findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCategory {
    PotentialRuntimeError,
    PerformanceImpact,
    DeprecatedFeature,
    TypeAssertionUsed,
    ImplicitAny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileTimeWarning {
    pub category: WarningCategory,
    pub message: String,
    pub expression: Option<String>,
    pub location: Option<SourceSpan>,
}

impl CompileTimeWarning {
    pub fn new(category: WarningCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            expression: None,
            location: None,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

impl fmt::Display for CompileTimeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning: {}", self.message)
    }
}

/// Crate-level error for the few fallible seams that do return `Err`
/// (construction invariants, file I/O around source maps and reports).
#[derive(Debug, thiserror::Error)]
pub enum CelforgeError {
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("invalid CEL expression: {0}")]
    InvalidCel(String),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    CompileTime(#[from] CompileTimeError),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CelforgeError>;
