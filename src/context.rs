//! Analysis context and the emission-dialect classifier.
//!
//! Every conversion happens against a context: which dialect of CEL to
//! emit, which resources are in scope, how strict to be. When the caller
//! does not pin a dialect, the classifier scores structural, content and
//! contextual signals to pick one.

use crate::reference::{Reference, TypeHint};
use crate::source_map::SourceMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Auto-switching a nested subtree's dialect requires at least this
/// classification confidence.
pub const AUTO_SWITCH_THRESHOLD: f64 = 0.7;

/// The six emission dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CelDialect {
    StatusBuilder,
    ResourceBuilder,
    Conditional,
    Readiness,
    TemplateLiteral,
    FieldHydration,
    Unknown,
}

impl CelDialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusBuilder => "status-builder",
            Self::ResourceBuilder => "resource-builder",
            Self::Conditional => "conditional",
            Self::Readiness => "readiness",
            Self::TemplateLiteral => "template-literal",
            Self::FieldHydration => "field-hydration",
            Self::Unknown => "unknown",
        }
    }

    /// The CEL result type this dialect is expected to produce, when pinned.
    pub fn expected_type(&self) -> Option<TypeHint> {
        match self {
            Self::Conditional | Self::Readiness => Some(TypeHint::Boolean),
            Self::TemplateLiteral => Some(TypeHint::String),
            _ => None,
        }
    }

    /// Tie-break priority; lower wins.
    fn priority(&self) -> u8 {
        match self {
            Self::StatusBuilder => 0,
            Self::ResourceBuilder => 1,
            Self::Conditional => 2,
            Self::Readiness => 3,
            Self::TemplateLiteral => 4,
            Self::FieldHydration => 5,
            Self::Unknown => 6,
        }
    }

    fn all() -> [CelDialect; 7] {
        [
            Self::StatusBuilder,
            Self::ResourceBuilder,
            Self::Conditional,
            Self::Readiness,
            Self::TemplateLiteral,
            Self::FieldHydration,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for CelDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which deployment backend the surrounding factory targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactoryKind {
    Direct,
    #[default]
    Kro,
}

/// Minimal descriptor of a resource that is in scope for conversions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub kind: Option<String>,
}

/// Everything a single analysis call needs to know about its surroundings.
///
/// Borrowed for the duration of the call. The source map, when present, is
/// owned by the caller: pass it in, take it back out after the call.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub dialect: CelDialect,
    pub available_resources: BTreeMap<String, ResourceShape>,
    pub has_schema: bool,
    pub factory: FactoryKind,
    pub strict: bool,
    pub strict_null_checks: bool,
    pub expected_type: Option<TypeHint>,
    /// Declared builder-function hint, e.g. `"statusBuilder"`.
    pub function_hint: Option<String>,
    /// Caller-owned source map; the analyzer appends but never retains it.
    pub source_map: Option<SourceMap>,
}

impl Default for CelDialect {
    fn default() -> Self {
        CelDialect::Unknown
    }
}

impl AnalysisContext {
    pub fn new(dialect: CelDialect) -> Self {
        Self {
            dialect,
            has_schema: true,
            ..Default::default()
        }
    }

    pub fn with_resource(mut self, id: impl Into<String>) -> Self {
        self.available_resources
            .insert(id.into(), ResourceShape::default());
        self
    }

    pub fn with_resource_kind(mut self, id: impl Into<String>, kind: impl Into<String>) -> Self {
        self.available_resources.insert(
            id.into(),
            ResourceShape {
                kind: Some(kind.into()),
            },
        );
        self
    }

    pub fn with_factory(mut self, factory: FactoryKind) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_expected_type(mut self, hint: TypeHint) -> Self {
        self.expected_type = Some(hint);
        self
    }

    pub fn with_function_hint(mut self, hint: impl Into<String>) -> Self {
        self.function_hint = Some(hint.into());
        self
    }

    pub fn with_source_map(mut self) -> Self {
        self.source_map = Some(SourceMap::new());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self.strict_null_checks = true;
        self
    }

    pub fn knows_resource(&self, id: &str) -> bool {
        self.available_resources.contains_key(id)
    }

    /// Take the accumulated source map back out after an analysis call.
    pub fn take_source_map(&mut self) -> Option<SourceMap> {
        self.source_map.take()
    }
}

/// One scored signal that contributed to a classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: &'static str,
    pub dialect: CelDialect,
    pub weight: f64,
}

/// The classifier's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub dialect: CelDialect,
    pub confidence: f64,
    pub signals: Vec<Signal>,
}

/// What the classifier looks at. `source` is the raw expression text when
/// the input was expression-shaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierInput<'a> {
    pub source: Option<&'a str>,
    pub references: &'a [Reference],
    pub is_template: bool,
}

// Fixed signal weights. All non-negative, so adding a signal for a dialect
// can only raise that dialect's score.
const W_FUNCTION_HINT: f64 = 0.9;
const W_TEMPLATE: f64 = 0.8;
const W_READINESS_PATH: f64 = 0.75;
const W_COMPARISON: f64 = 0.3;
const W_TERNARY: f64 = 0.3;
const W_SCHEMA_REF: f64 = 0.3;
const W_RESOURCE_REF: f64 = 0.3;
const W_KEYWORD: f64 = 0.3;
const W_LOGICAL: f64 = 0.2;
const W_STATUS_PATH: f64 = 0.2;
const W_EXPECTED_BOOL: f64 = 0.2;
const W_DIRECT_FACTORY: f64 = 0.1;

/// Score every dialect against the input and pick the winner.
pub fn classify(input: &ClassifierInput<'_>, ctx: &AnalysisContext) -> Classification {
    let mut signals: Vec<Signal> = Vec::new();
    let mut push = |name: &'static str, dialect: CelDialect, weight: f64| {
        signals.push(Signal {
            name,
            dialect,
            weight,
        });
    };

    // Contextual: declared builder hints dominate.
    if let Some(hint) = ctx.function_hint.as_deref() {
        match hint {
            "statusBuilder" => push("function-hint", CelDialect::StatusBuilder, W_FUNCTION_HINT),
            "readyWhen" => push("function-hint", CelDialect::Readiness, W_FUNCTION_HINT),
            "includeWhen" => push("function-hint", CelDialect::Conditional, W_FUNCTION_HINT),
            other => {
                if ctx.knows_resource(other) || other == "resourceBuilder" {
                    push("function-hint", CelDialect::ResourceBuilder, W_FUNCTION_HINT);
                }
            }
        }
    }

    // Structural.
    if input.is_template || input.source.is_some_and(|s| s.contains("${") || s.contains('`')) {
        push("template-syntax", CelDialect::TemplateLiteral, W_TEMPLATE);
    }
    if let Some(source) = input.source {
        if source.contains('?') && source.contains(':') && !source.contains("?.") {
            push("ternary", CelDialect::Conditional, W_TERNARY);
        }
        if source.contains("&&") || source.contains("||") || source.contains("??") {
            push("logical-operator", CelDialect::Conditional, W_LOGICAL);
        }
        if ["==", "!=", "<=", ">=", "<", ">"]
            .iter()
            .any(|op| source.contains(op))
        {
            push("comparison", CelDialect::Conditional, W_COMPARISON);
        }
        let lowered = source.to_ascii_lowercase();
        if lowered.contains("ready") || lowered.contains("available") {
            push("readiness-keyword", CelDialect::Readiness, W_KEYWORD);
        }
    }

    // Content: which references appear and what their paths touch.
    for reference in input.references {
        if reference.is_schema() {
            push("schema-reference", CelDialect::ResourceBuilder, W_SCHEMA_REF);
        } else {
            push("resource-reference", CelDialect::StatusBuilder, W_RESOURCE_REF);
        }
        let path = reference.field_path();
        if path.contains("readyReplicas")
            || path.contains("availableReplicas")
            || path.contains("conditions")
            || path.ends_with("ready")
        {
            push("readiness-path", CelDialect::Readiness, W_READINESS_PATH);
        }
        if path.starts_with("status.") || path.contains(".status.") {
            push("status-path", CelDialect::StatusBuilder, W_STATUS_PATH);
        }
    }

    // Contextual: declared expectations.
    if ctx.expected_type == Some(TypeHint::Boolean) {
        push("expected-boolean", CelDialect::Conditional, W_EXPECTED_BOOL);
    }
    if ctx.factory == FactoryKind::Direct {
        push("direct-factory", CelDialect::FieldHydration, W_DIRECT_FACTORY);
    }

    let mut scores: BTreeMap<CelDialect, f64> = BTreeMap::new();
    for signal in &signals {
        *scores.entry(signal.dialect).or_insert(0.0) += signal.weight;
    }

    let mut best = CelDialect::Unknown;
    let mut best_score = 0.0;
    for dialect in CelDialect::all() {
        let score = scores.get(&dialect).copied().unwrap_or(0.0);
        if score > best_score
            || (score == best_score && score > 0.0 && dialect.priority() < best.priority())
        {
            best = dialect;
            best_score = score;
        }
    }

    Classification {
        dialect: best,
        confidence: best_score.clamp(0.0, 1.0),
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(id: &str, path: &str) -> Reference {
        Reference::new(id, path).unwrap()
    }

    #[test]
    fn test_function_hint_dominates() {
        let ctx = AnalysisContext::new(CelDialect::Unknown).with_function_hint("statusBuilder");
        let classification = classify(&ClassifierInput::default(), &ctx);
        assert_eq!(classification.dialect, CelDialect::StatusBuilder);
        assert!(classification.confidence >= 0.9);
    }

    #[test]
    fn test_template_signal() {
        let ctx = AnalysisContext::new(CelDialect::Unknown);
        let input = ClassifierInput {
            source: Some("http://${schema.spec.host}/"),
            ..Default::default()
        };
        let classification = classify(&input, &ctx);
        assert_eq!(classification.dialect, CelDialect::TemplateLiteral);
    }

    #[test]
    fn test_readiness_from_paths() {
        let refs = vec![reference("deployment", "status.readyReplicas")];
        let ctx = AnalysisContext::new(CelDialect::Unknown);
        let input = ClassifierInput {
            references: &refs,
            ..Default::default()
        };
        let classification = classify(&input, &ctx);
        assert_eq!(classification.dialect, CelDialect::Readiness);
    }

    #[test]
    fn test_conditional_from_operators() {
        let ctx = AnalysisContext::new(CelDialect::Unknown).with_expected_type(TypeHint::Boolean);
        let input = ClassifierInput {
            source: Some("schema.spec.replicas > 1 && schema.spec.enabled"),
            ..Default::default()
        };
        let classification = classify(&input, &ctx);
        assert_eq!(classification.dialect, CelDialect::Conditional);
    }

    #[test]
    fn test_no_signals_is_unknown_with_zero_confidence() {
        let ctx = AnalysisContext::default();
        let classification = classify(&ClassifierInput::default(), &ctx);
        assert_eq!(classification.dialect, CelDialect::Unknown);
        assert_eq!(classification.confidence, 0.0);
    }

    #[test]
    fn test_scoring_is_monotonic() {
        // Adding a readiness signal never lowers the readiness score.
        let ctx = AnalysisContext::new(CelDialect::Unknown);
        let without: Vec<Reference> = vec![];
        let with = vec![reference("deployment", "status.readyReplicas")];

        let score_of = |refs: &[Reference]| {
            let input = ClassifierInput {
                references: refs,
                ..Default::default()
            };
            classify(&input, &ctx)
                .signals
                .iter()
                .filter(|s| s.dialect == CelDialect::Readiness)
                .map(|s| s.weight)
                .sum::<f64>()
        };

        assert!(score_of(&with) >= score_of(&without));
    }

    #[test]
    fn test_tie_break_priority() {
        // Equal scores resolve by documented priority order.
        let ctx = AnalysisContext::new(CelDialect::Unknown);
        let refs = vec![
            Reference::schema("spec.name").unwrap(),
            reference("web", "spec.replicas"),
        ];
        let input = ClassifierInput {
            references: &refs,
            ..Default::default()
        };
        // schema-ref scores resource-builder 0.3, resource-ref scores
        // status-builder 0.3; status-builder wins the tie.
        let classification = classify(&input, &ctx);
        assert_eq!(classification.dialect, CelDialect::StatusBuilder);
    }

    #[test]
    fn test_dialect_wire_names() {
        assert_eq!(
            serde_json::to_string(&CelDialect::StatusBuilder).unwrap(),
            "\"status-builder\""
        );
        assert_eq!(CelDialect::FieldHydration.as_str(), "field-hydration");
    }

    #[test]
    fn test_context_builders() {
        let ctx = AnalysisContext::new(CelDialect::Conditional)
            .with_resource("deployment")
            .with_resource_kind("service", "Service")
            .with_factory(FactoryKind::Direct)
            .strict();
        assert!(ctx.knows_resource("deployment"));
        assert!(ctx.knows_resource("service"));
        assert!(!ctx.knows_resource("ingress"));
        assert!(ctx.strict && ctx.strict_null_checks);
    }
}
