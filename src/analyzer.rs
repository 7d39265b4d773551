//! The analysis facade: dispatch by input shape, orchestrating detection,
//! classification, parsing and emission.
//!
//! Analysis never returns `Err` for author input. Every call produces a
//! [`ConversionResult`]; failed conversions come back with `valid == false`
//! and a populated error list.

use crate::context::{classify, AnalysisContext, CelDialect, ClassifierInput};
use crate::detector::ReferenceDetector;
use crate::emitter::{emit_reference, AstLowering};
use crate::error::{
    CompileTimeWarning, ConversionError, ConversionErrorCategory, SourceSpan, WarningCategory,
};
use crate::lexer::split_interpolations;
use crate::parser::{parse, parse_function_body, parse_template_parts, Expr, ParseFailure};
use crate::reference::{CelExpression, Reference, TypeHint};
use crate::source_map::{EntryMetadata, SourceMapEntry};
use crate::value::Value;
use serde::Serialize;
use tracing::debug;

/// What one analyze call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub valid: bool,
    pub expression: Option<CelExpression>,
    pub dependencies: Vec<Reference>,
    pub source_map_entries: Vec<SourceMapEntry>,
    pub errors: Vec<ConversionError>,
    pub warnings: Vec<CompileTimeWarning>,
    pub requires_conversion: bool,
}

impl ConversionResult {
    /// A value that needed no conversion at all.
    pub fn passthrough() -> Self {
        Self {
            valid: true,
            expression: None,
            dependencies: Vec::new(),
            source_map_entries: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            requires_conversion: false,
        }
    }

    pub fn failure(error: ConversionError) -> Self {
        Self {
            valid: false,
            expression: None,
            dependencies: Vec::new(),
            source_map_entries: Vec::new(),
            errors: vec![error],
            warnings: Vec::new(),
            requires_conversion: false,
        }
    }

    /// Approximate heap footprint, used by the cache for its memory bound.
    pub fn approx_size(&self) -> usize {
        let mut size = std::mem::size_of::<Self>();
        if let Some(ref expression) = self.expression {
            size += expression.as_str().len();
        }
        for dependency in &self.dependencies {
            size += dependency.resource_id().len() + dependency.field_path().len();
        }
        for entry in &self.source_map_entries {
            size += entry.original_expression.len() + entry.cel_expression.len();
        }
        for error in &self.errors {
            size += error.expression.len() + error.message.len();
        }
        size
    }
}

/// The facade over the whole conversion pipeline. Stateless apart from the
/// detector configuration; cheap to construct, safe to share by reference.
#[derive(Debug, Default)]
pub struct ExpressionAnalyzer {
    detector: ReferenceDetector,
}

impl ExpressionAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detector(&self) -> &ReferenceDetector {
        &self.detector
    }

    /// Analyze a value of unknown shape.
    pub fn analyze(&self, value: &Value, ctx: &mut AnalysisContext) -> ConversionResult {
        match value {
            Value::Reference(reference) => self.analyze_reference(reference, ctx),
            Value::Cel(cel) => ConversionResult {
                valid: true,
                expression: Some(cel.clone()),
                ..ConversionResult::passthrough()
            },
            Value::Expression(source) => self.analyze_expression(source, ctx),
            Value::String(text) => {
                if text.contains("${") {
                    self.analyze_template(text, ctx)
                } else {
                    ConversionResult::passthrough()
                }
            }
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                ConversionResult::passthrough()
            }
            Value::Array(_) | Value::Object(_) => self.analyze_composite(value, ctx),
        }
    }

    /// Analyze a host-language expression source string.
    pub fn analyze_expression(&self, source: &str, ctx: &mut AnalysisContext) -> ConversionResult {
        match parse(source) {
            Ok(expr) => self.analyze_parsed(source, &expr, "expression", ctx),
            Err(failure) => ConversionResult::failure(conversion_error_from(source, failure)),
        }
    }

    /// Analyze an arrow-function-shaped source; only the body is compiled.
    pub fn analyze_function(&self, source: &str, ctx: &mut AnalysisContext) -> ConversionResult {
        match parse_function_body(source) {
            Ok(expr) => self.analyze_parsed(source, &expr, "function", ctx),
            Err(failure) => ConversionResult::failure(conversion_error_from(source, failure)),
        }
    }

    /// Analyze an already-parsed expression. This is the entry point the
    /// AST cache feeds.
    pub fn analyze_parsed(
        &self,
        source: &str,
        expr: &Expr,
        expression_type: &str,
        ctx: &mut AnalysisContext,
    ) -> ConversionResult {
        let lowering = AstLowering::new(ctx);
        let lowered = match lowering.lower(expr) {
            Ok(lowered) => lowered,
            Err(error) => return ConversionResult::failure(error),
        };

        // Pick the dialect: the caller's, or classify when unpinned.
        let dialect = if ctx.dialect == CelDialect::Unknown {
            let classification = classify(
                &ClassifierInput {
                    source: Some(source),
                    references: &lowered.references,
                    is_template: matches!(expr, Expr::Template { .. }),
                },
                ctx,
            );
            debug!(
                dialect = %classification.dialect,
                confidence = classification.confidence,
                "classified expression context"
            );
            classification.dialect
        } else {
            ctx.dialect
        };

        if let Some(error) = self.check_scope(source, &lowered.references, dialect, ctx) {
            return ConversionResult::failure(error);
        }

        // A bare reference chain is re-emitted through the dialect rules so
        // boolean coercions and readiness heuristics apply.
        let (cel_text, type_hint) = if let [single] = lowered.references.as_slice() {
            if lowered.cel == single.cel_path() {
                let typed = match ctx.expected_type {
                    Some(hint) => single.clone().with_type(hint),
                    None => single.clone(),
                };
                let emitted = emit_reference(&typed, dialect);
                (emitted.as_str().to_string(), emitted.type_hint())
            } else {
                (lowered.cel.clone(), lowered.type_hint)
            }
        } else {
            (lowered.cel.clone(), lowered.type_hint)
        };

        let mut warnings = lowered.warnings.clone();
        if matches!(dialect, CelDialect::Conditional | CelDialect::Readiness)
            && type_hint != Some(TypeHint::Boolean)
        {
            warnings.push(
                CompileTimeWarning::new(
                    WarningCategory::PotentialRuntimeError,
                    format!(
                        "{} expressions must evaluate to a boolean; this one could not be proven boolean",
                        dialect
                    ),
                )
                .with_expression(source),
            );
        }

        let expression = match CelExpression::new(cel_text.clone()) {
            Ok(expression) => match type_hint {
                Some(hint) => expression.with_type(hint),
                None => expression,
            },
            Err(_) => {
                return ConversionResult::failure(ConversionError::new(
                    source,
                    ConversionErrorCategory::Unknown,
                    "conversion produced an empty expression",
                ));
            }
        };

        let mut result = ConversionResult {
            valid: true,
            expression: Some(expression),
            dependencies: lowered.references.clone(),
            source_map_entries: Vec::new(),
            errors: Vec::new(),
            warnings,
            requires_conversion: !lowered.references.is_empty(),
        };
        self.record_entry(
            &mut result,
            ctx,
            source,
            &cel_text,
            expr.span(),
            dialect,
            expression_type,
        );
        result
    }

    fn analyze_reference(
        &self,
        reference: &Reference,
        ctx: &mut AnalysisContext,
    ) -> ConversionResult {
        let dialect = if ctx.dialect == CelDialect::Unknown {
            let refs = std::slice::from_ref(reference);
            classify(
                &ClassifierInput {
                    references: refs,
                    ..Default::default()
                },
                ctx,
            )
            .dialect
        } else {
            ctx.dialect
        };

        let original = reference.cel_path();
        if let Some(error) =
            self.check_scope(&original, std::slice::from_ref(reference), dialect, ctx)
        {
            return ConversionResult::failure(error);
        }

        let emitted = emit_reference(reference, dialect);
        let cel_text = emitted.as_str().to_string();
        let mut result = ConversionResult {
            valid: true,
            expression: Some(emitted),
            dependencies: vec![reference.clone()],
            source_map_entries: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            requires_conversion: true,
        };
        self.record_entry(
            &mut result,
            ctx,
            &original,
            &cel_text,
            SourceSpan::whole(&original),
            dialect,
            "reference",
        );
        result
    }

    fn analyze_template(&self, text: &str, ctx: &mut AnalysisContext) -> ConversionResult {
        let parts = match split_interpolations(text) {
            Ok(parts) => parts,
            Err(error) => {
                return ConversionResult::failure(
                    ConversionError::new(
                        text,
                        ConversionErrorCategory::TemplateLiteral,
                        error.message,
                    )
                    .with_location(error.span),
                );
            }
        };
        let template = match parse_template_parts(&parts, SourceSpan::whole(text)) {
            Ok(template) => template,
            Err(failure) => {
                let mut error = conversion_error_from(text, failure);
                error.category = ConversionErrorCategory::TemplateLiteral;
                return ConversionResult::failure(error);
            }
        };
        // Plain-string templates always emit in the template dialect.
        let pinned = std::mem::replace(&mut ctx.dialect, CelDialect::TemplateLiteral);
        let mut result = self.analyze_parsed(text, &template, "template", ctx);
        ctx.dialect = pinned;
        result.requires_conversion = !result.dependencies.is_empty();
        result
    }

    fn analyze_composite(&self, value: &Value, ctx: &mut AnalysisContext) -> ConversionResult {
        let references = self.detector.detect(value);
        if references.is_empty() {
            return ConversionResult::passthrough();
        }
        let dialect = if ctx.dialect == CelDialect::Unknown {
            classify(
                &ClassifierInput {
                    references: &references,
                    ..Default::default()
                },
                ctx,
            )
            .dialect
        } else {
            ctx.dialect
        };
        // Structure is preserved by the shape analyzer; the facade reports
        // the dependency set and leaves the composite unconverted.
        debug!(
            count = references.len(),
            kind = value.kind(),
            "composite value carries references"
        );
        ConversionResult {
            valid: true,
            expression: crate::emitter::emit_references(&references, dialect),
            dependencies: references,
            source_map_entries: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            requires_conversion: true,
        }
    }

    /// Scope validation: in the resource-builder dialect (and whenever the
    /// context is strict), resource-rooted references must name co-present
    /// resources.
    fn check_scope(
        &self,
        source: &str,
        references: &[Reference],
        dialect: CelDialect,
        ctx: &AnalysisContext,
    ) -> Option<ConversionError> {
        let enforce = ctx.strict || dialect == CelDialect::ResourceBuilder;
        if !enforce {
            return None;
        }
        for reference in references {
            if !reference.is_schema() && !ctx.knows_resource(reference.resource_id()) {
                return Some(
                    ConversionError::new(
                        source,
                        ConversionErrorCategory::MemberAccess,
                        format!(
                            "resource '{}' is not available in this context",
                            reference.resource_id()
                        ),
                    )
                    .with_context("resourceId", reference.resource_id())
                    .with_context("fieldPath", reference.field_path())
                    .suggest("declare the resource in the same graph before referencing it"),
                );
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn record_entry(
        &self,
        result: &mut ConversionResult,
        ctx: &mut AnalysisContext,
        original: &str,
        cel: &str,
        span: SourceSpan,
        dialect: CelDialect,
        expression_type: &str,
    ) {
        let mut dependencies: Vec<String> = Vec::new();
        for reference in &result.dependencies {
            let id = reference.resource_id().to_string();
            if !dependencies.contains(&id) {
                dependencies.push(id);
            }
        }
        let entry = SourceMapEntry {
            original_expression: original.to_string(),
            cel_expression: cel.to_string(),
            source_location: span,
            context: dialect,
            metadata: EntryMetadata {
                expression_type: expression_type.to_string(),
                kubernetes_refs: result
                    .dependencies
                    .iter()
                    .map(|r| r.cel_path())
                    .collect(),
                dependencies,
                conversion_notes: None,
            },
        };
        if let Some(ref mut map) = ctx.source_map {
            map.push(entry.clone());
        }
        result.source_map_entries.push(entry);
    }
}

fn conversion_error_from(source: &str, failure: ParseFailure) -> ConversionError {
    match failure {
        ParseFailure::Unsupported(compile_error) => {
            let mut error = ConversionError::new(
                source,
                ConversionErrorCategory::Javascript,
                compile_error.message.clone(),
            )
            .with_context("category", compile_error.category.as_str());
            if let Some(span) = compile_error.location {
                error = error.with_location(span);
            }
            for suggestion in compile_error.suggestions {
                error = error.with_suggestion(suggestion);
            }
            error
        }
        ParseFailure::Syntax { message, span } => {
            ConversionError::new(source, ConversionErrorCategory::Javascript, message)
                .with_location(span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FactoryKind;

    fn reference(id: &str, path: &str) -> Reference {
        Reference::new(id, path).unwrap()
    }

    #[test]
    fn test_schema_ref_in_status_dialect() {
        // Scenario A.
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx =
            AnalysisContext::new(CelDialect::StatusBuilder).with_factory(FactoryKind::Kro);
        let result = analyzer.analyze_expression("schema.spec.name", &mut ctx);

        assert!(result.valid);
        assert_eq!(
            result.expression.as_ref().unwrap().as_str(),
            "schema.spec.name"
        );
        assert_eq!(result.dependencies.len(), 1);
        assert!(result.dependencies[0].is_schema());
        assert_eq!(result.dependencies[0].field_path(), "spec.name");
        assert!(result.requires_conversion);
    }

    #[test]
    fn test_numeric_ref_in_conditional_dialect() {
        // Scenario B.
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::Conditional);
        let value = Value::Reference(
            reference("deployment", "status.readyReplicas").with_type(TypeHint::Number),
        );
        let result = analyzer.analyze(&value, &mut ctx);

        assert!(result.valid);
        assert_eq!(
            result.expression.as_ref().unwrap().as_str(),
            "resources.deployment.status.readyReplicas > 0"
        );
        assert_eq!(
            result.expression.as_ref().unwrap().type_hint(),
            Some(TypeHint::Boolean)
        );
    }

    #[test]
    fn test_template_string_mixing_roots() {
        // Scenario C.
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::TemplateLiteral);
        let text = "http://${schema.spec.name}-service.${resources.namespace.metadata.name}/";
        let result = analyzer.analyze(&Value::from(text), &mut ctx);

        assert!(result.valid);
        assert_eq!(
            result.expression.as_ref().unwrap().as_str(),
            "\"http://\" + schema.spec.name + \"-service.\" + resources.namespace.metadata.name + \"/\""
        );
        assert_eq!(result.dependencies.len(), 2);
        assert!(result.requires_conversion);
    }

    #[test]
    fn test_readiness_over_conditions() {
        // Scenario D.
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::Readiness);
        let value = Value::Reference(reference("helmRelease", "status.conditions"));
        let result = analyzer.analyze(&value, &mut ctx);

        assert_eq!(
            result.expression.as_ref().unwrap().as_str(),
            "resources.helmRelease.status.conditions.find(c, c.type == \"Ready\").status == \"True\""
        );
    }

    #[test]
    fn test_primitives_pass_through() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::Float(0.5),
            Value::from("http://example.com"),
        ] {
            let result = analyzer.analyze(&value, &mut ctx);
            assert!(result.valid);
            assert!(!result.requires_conversion);
            assert!(result.dependencies.is_empty());
            assert!(result.expression.is_none());
        }
    }

    #[test]
    fn test_cel_value_passes_through_converted() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        let cel = CelExpression::new("resources.db.status.host").unwrap();
        let result = analyzer.analyze(&Value::Cel(cel.clone()), &mut ctx);
        assert!(result.valid);
        assert_eq!(result.expression, Some(cel));
        assert!(!result.requires_conversion);
    }

    #[test]
    fn test_composite_harvests_dependencies() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        let value = Value::object([
            ("static", Value::from("x")),
            (
                "dynamic",
                Value::Reference(reference("db", "status.host")),
            ),
        ]);
        let result = analyzer.analyze(&value, &mut ctx);
        assert!(result.valid);
        assert!(result.requires_conversion);
        assert_eq!(result.dependencies, vec![reference("db", "status.host")]);
    }

    #[test]
    fn test_parse_error_is_value_not_panic() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        let result = analyzer.analyze_expression("schema.spec.name +", &mut ctx);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].category,
            ConversionErrorCategory::Javascript
        );
        assert!(result.expression.is_none());
    }

    #[test]
    fn test_unsupported_syntax_reported_with_category() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        let result = analyzer.analyze_expression("await schema.spec.name", &mut ctx);
        assert!(!result.valid);
        assert_eq!(
            result.errors[0].context.get("category").map(String::as_str),
            Some("UNSUPPORTED_SYNTAX")
        );
    }

    #[test]
    fn test_resource_builder_scope_enforcement() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::ResourceBuilder).with_resource("present");
        let ok = analyzer.analyze_expression("resources.present.status.ready", &mut ctx);
        assert!(ok.valid);

        let bad = analyzer.analyze_expression("resources.absent.status.ready", &mut ctx);
        assert!(!bad.valid);
        assert!(bad.errors[0].message.contains("absent"));
    }

    #[test]
    fn test_source_map_recording() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder).with_source_map();
        let result = analyzer.analyze_expression("schema.spec.name", &mut ctx);
        assert_eq!(result.source_map_entries.len(), 1);

        let map = ctx.take_source_map().unwrap();
        let entry = map.lookup_by_cel("schema.spec.name").unwrap();
        assert_eq!(entry.original_expression, "schema.spec.name");
        assert_eq!(entry.metadata.expression_type, "expression");
    }

    #[test]
    fn test_function_shaped_input() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::Readiness).with_resource("deployment");
        let result =
            analyzer.analyze_function("(r) => deployment.status.readyReplicas > 0", &mut ctx);
        assert!(result.valid);
        assert_eq!(
            result.expression.as_ref().unwrap().as_str(),
            "resources.deployment.status.readyReplicas > 0"
        );
    }

    #[test]
    fn test_conditional_warns_on_unprovable_boolean() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::new(CelDialect::Conditional);
        let result = analyzer.analyze_expression("schema.spec.a + schema.spec.b", &mut ctx);
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.category == WarningCategory::PotentialRuntimeError));
    }

    #[test]
    fn test_classification_when_dialect_unpinned() {
        let analyzer = ExpressionAnalyzer::new();
        let mut ctx = AnalysisContext::default();
        ctx.has_schema = true;
        let result = analyzer.analyze(
            &Value::from("prefix-${schema.spec.name}"),
            &mut ctx,
        );
        assert!(result.valid);
        assert_eq!(
            result.expression.as_ref().unwrap().as_str(),
            "\"prefix-\" + schema.spec.name"
        );
    }
}
