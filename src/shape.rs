//! Shape analysis: converting every leaf of a record-shaped value while
//! preserving its structure.
//!
//! Reference-free subtrees are passed through untouched (the fast path);
//! failing leaves keep their original value and contribute an error entry
//! instead of aborting the walk.

use crate::analyzer::{ConversionResult, ExpressionAnalyzer};
use crate::context::AnalysisContext;
use crate::error::{CompileTimeWarning, ConversionError};
use crate::reference::Reference;
use crate::source_map::SourceMapEntry;
use crate::value::Value;
use std::collections::BTreeMap;
use tracing::trace;

/// The parallel structure produced by a shape analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeResult {
    /// Input structure with converted leaves replaced by CEL values.
    pub shape: Value,
    pub dependencies: Vec<Reference>,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<CompileTimeWarning>,
    pub source_map_entries: Vec<SourceMapEntry>,
    pub requires_conversion: bool,
    pub converted_count: usize,
    pub passthrough_count: usize,
}

/// A conversion failure at one field, carrying the path into the record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub path: String,
    pub error: ConversionError,
}

#[derive(Debug, Default)]
pub struct ShapeAnalyzer {
    analyzer: ExpressionAnalyzer,
}

impl ShapeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyzer(&self) -> &ExpressionAnalyzer {
        &self.analyzer
    }

    /// Walk `value`, converting every leaf that needs it.
    pub fn analyze_shape(&self, value: &Value, ctx: &mut AnalysisContext) -> ShapeResult {
        let mut result = ShapeResult {
            shape: Value::Null,
            dependencies: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            source_map_entries: Vec::new(),
            requires_conversion: false,
            converted_count: 0,
            passthrough_count: 0,
        };
        result.shape = self.walk(value, "$", ctx, &mut result);
        result.requires_conversion = !result.dependencies.is_empty();
        result
    }

    fn walk(
        &self,
        value: &Value,
        path: &str,
        ctx: &mut AnalysisContext,
        result: &mut ShapeResult,
    ) -> Value {
        // Fast path: a subtree with no references and no expression leaves
        // is cloned through wholesale.
        if value.is_container()
            && !self.analyzer.detector().contains(value)
            && !contains_expression(value)
        {
            trace!(path, "no references: passing subtree through");
            result.passthrough_count += 1;
            return value.clone();
        }

        match value {
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, child) in map {
                    let child_path = format!("{}.{}", path, key);
                    out.insert(key.clone(), self.walk(child, &child_path, ctx, result));
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let child_path = format!("{}[{}]", path, index);
                    out.push(self.walk(item, &child_path, ctx, result));
                }
                Value::Array(out)
            }
            leaf => self.convert_leaf(leaf, path, ctx, result),
        }
    }

    fn convert_leaf(
        &self,
        leaf: &Value,
        path: &str,
        ctx: &mut AnalysisContext,
        result: &mut ShapeResult,
    ) -> Value {
        let conversion = self.analyzer.analyze(leaf, ctx);
        self.merge(path, &conversion, result);
        if !conversion.valid {
            // Field-level isolation: keep the original value.
            return leaf.clone();
        }
        match conversion.expression {
            Some(expression) if conversion.requires_conversion => {
                result.converted_count += 1;
                Value::Cel(expression)
            }
            _ => {
                result.passthrough_count += 1;
                leaf.clone()
            }
        }
    }

    fn merge(&self, path: &str, conversion: &ConversionResult, result: &mut ShapeResult) {
        for dependency in &conversion.dependencies {
            if !result.dependencies.contains(dependency) {
                result.dependencies.push(dependency.clone());
            }
        }
        for error in &conversion.errors {
            result.errors.push(FieldError {
                path: path.to_string(),
                error: error.clone(),
            });
        }
        result.warnings.extend(conversion.warnings.iter().cloned());
        result
            .source_map_entries
            .extend(conversion.source_map_entries.iter().cloned());
    }
}

/// Expression leaves and interpolated strings force a walk even when no
/// reference value is embedded, since parsing may still discover paths.
fn contains_expression(value: &Value) -> bool {
    match value {
        Value::Expression(_) => true,
        Value::String(text) => text.contains("${"),
        Value::Array(items) => items.iter().any(contains_expression),
        Value::Object(map) => map.values().any(contains_expression),
        _ => false,
    }
}
