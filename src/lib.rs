//! celforge: compile host-language expression graphs to CEL.
//!
//! Infrastructure-as-code authors write Kubernetes resource graphs in a
//! general-purpose language; field values may transparently embed lazy
//! references to other resources' fields. This crate is the expression
//! compilation core of that pipeline: it detects embedded references in
//! arbitrary values, parses the supported host-expression subset, and
//! rewrites everything into Common Expression Language strings for a
//! cluster-side orchestrator to evaluate - with source maps back to the
//! original text, memoization, and post-hoc mapping of CEL evaluation
//! failures.
//!
//! The typical flow:
//!
//! ```
//! use celforge::{AnalysisContext, CelDialect, ExpressionAnalyzer};
//!
//! let analyzer = ExpressionAnalyzer::new();
//! let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
//! let result = analyzer.analyze_expression("schema.spec.name", &mut ctx);
//! assert_eq!(result.expression.unwrap().as_str(), "schema.spec.name");
//! ```

// Allow recursive functions that use self only for recursion; common in
// AST traversal code.
#![allow(clippy::only_used_in_recursion)]

pub mod analyzer;
pub mod binder;
pub mod cache;
pub mod context;
pub mod detector;
pub mod emitter;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod reference;
pub mod runtime_error;
pub mod shape;
pub mod source_map;
pub mod switcher;
pub mod value;

pub use analyzer::{ConversionResult, ExpressionAnalyzer};
pub use binder::{BindingMode, ConditionalBinder, PredicateSource, ResourceBinding};
pub use cache::{AstCache, CacheConfig, CacheKey, CacheMetrics, CachedAnalyzer, ConversionCache};
pub use context::{
    classify, AnalysisContext, CelDialect, Classification, ClassifierInput, FactoryKind,
    AUTO_SWITCH_THRESHOLD,
};
pub use detector::{is_reference, CategorizedReferences, ReferenceDetector};
pub use error::{
    CelforgeError, CompileErrorCategory, CompileTimeError, CompileTimeWarning, ConversionError,
    ConversionErrorCategory, SourceSpan, Suggestion, WarningCategory,
};
pub use reference::{CelExpression, Reference, TypeHint, SCHEMA_ID};
pub use runtime_error::{
    categorize as categorize_runtime_error, group_errors, report as error_report, statistics,
    MappedRuntimeError, RuntimeErrorCategory, RuntimeErrorMapper,
};
pub use shape::{ShapeAnalyzer, ShapeResult};
pub use source_map::{EntryMetadata, SourceMap, SourceMapEntry};
pub use switcher::{ContextSwitcher, SwitchMetrics, SwitchPoint, SwitchResult};
pub use value::Value;
