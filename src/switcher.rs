//! Context switching for deeply nested expressions.
//!
//! A status shape can carry a readiness predicate three levels down; the
//! enclosing dialect is wrong for that subtree. The switcher walks the
//! value, re-classifies each expression-bearing leaf, records the
//! disagreements as switch points, and emits per target dialect before
//! combining the pieces.

use crate::analyzer::ExpressionAnalyzer;
use crate::context::{classify, AnalysisContext, CelDialect, ClassifierInput, AUTO_SWITCH_THRESHOLD};
use crate::detector::ReferenceDetector;
use crate::error::CompileTimeWarning;
use crate::reference::{CelExpression, Reference, TypeHint};
use crate::value::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default bound on how deep the switcher looks for disagreements.
pub const DEFAULT_MAX_SWITCH_DEPTH: usize = 10;

/// One place where the detected context disagreed with the enclosing one.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchPoint {
    /// Path into the value, e.g. `$.status.ready`.
    pub path: String,
    pub from: CelDialect,
    pub to: CelDialect,
    pub depth: usize,
    pub confidence: f64,
    pub references: Vec<Reference>,
}

/// Timing and counting data for one switching pass.
#[derive(Debug, Clone, Default)]
pub struct SwitchMetrics {
    pub total: Duration,
    pub detection: Duration,
    pub emission: Duration,
    pub switch_count: usize,
    pub max_depth_reached: usize,
}

/// The combined output of a switching pass.
#[derive(Debug, Clone)]
pub struct SwitchResult {
    pub cel: Option<CelExpression>,
    pub switch_points: Vec<SwitchPoint>,
    pub per_dialect: Vec<(CelDialect, CelExpression)>,
    pub warnings: Vec<CompileTimeWarning>,
    pub metrics: SwitchMetrics,
}

struct Candidate {
    path: String,
    depth: usize,
    value: Value,
}

#[derive(Debug)]
pub struct ContextSwitcher {
    analyzer: ExpressionAnalyzer,
    detector: ReferenceDetector,
    max_depth: usize,
}

impl Default for ContextSwitcher {
    fn default() -> Self {
        Self {
            analyzer: ExpressionAnalyzer::new(),
            detector: ReferenceDetector::default(),
            max_depth: DEFAULT_MAX_SWITCH_DEPTH,
        }
    }
}

impl ContextSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    /// Walk `value`, detect context disagreements, emit per target dialect
    /// and combine.
    pub fn process(&self, value: &Value, ctx: &mut AnalysisContext) -> SwitchResult {
        let started = Instant::now();
        let mut metrics = SwitchMetrics::default();

        // Phase 1: find expression-bearing leaves and classify them.
        let detection_started = Instant::now();
        let mut candidates = Vec::new();
        self.collect(value, "$", 0, &mut candidates, &mut metrics);

        let enclosing = ctx.dialect;
        let mut switch_points = Vec::new();
        let mut switched: Vec<(CelDialect, Vec<Candidate>)> = Vec::new();
        let mut unswitched: Vec<Candidate> = Vec::new();

        for candidate in candidates {
            let references = self.detector.detect(&candidate.value);
            let source = match &candidate.value {
                Value::Expression(text) => Some(text.as_str()),
                Value::String(text) => Some(text.as_str()),
                _ => None,
            };
            let classification = classify(
                &ClassifierInput {
                    source,
                    references: &references,
                    is_template: source.is_some_and(|s| s.contains("${")),
                },
                ctx,
            );
            let switches = classification.dialect != enclosing
                && classification.confidence > AUTO_SWITCH_THRESHOLD;
            if switches {
                debug!(
                    path = %candidate.path,
                    from = %enclosing,
                    to = %classification.dialect,
                    confidence = classification.confidence,
                    "context switch point"
                );
                switch_points.push(SwitchPoint {
                    path: candidate.path.clone(),
                    from: enclosing,
                    to: classification.dialect,
                    depth: candidate.depth,
                    confidence: classification.confidence,
                    references,
                });
                match switched
                    .iter_mut()
                    .find(|(dialect, _)| *dialect == classification.dialect)
                {
                    Some((_, group)) => group.push(candidate),
                    None => switched.push((classification.dialect, vec![candidate])),
                }
            } else {
                unswitched.push(candidate);
            }
        }
        metrics.detection = detection_started.elapsed();
        metrics.switch_count = switch_points.len();

        // Phase 2: emit per dialect group, enclosing dialect first.
        let emission_started = Instant::now();
        let mut warnings = Vec::new();
        let mut per_dialect: Vec<(CelDialect, CelExpression)> = Vec::new();

        if !unswitched.is_empty() {
            if let Some(combined) =
                self.emit_group(&unswitched, enclosing, ctx, &mut warnings)
            {
                per_dialect.push((enclosing, combined));
            }
        }
        for (dialect, group) in &switched {
            if let Some(combined) = self.emit_group(group, *dialect, ctx, &mut warnings) {
                per_dialect.push((*dialect, combined));
            }
        }
        metrics.emission = emission_started.elapsed();

        let cel = self.combine(&per_dialect);
        metrics.total = started.elapsed();

        SwitchResult {
            cel,
            switch_points,
            per_dialect,
            warnings,
            metrics,
        }
    }

    fn collect(
        &self,
        value: &Value,
        path: &str,
        depth: usize,
        candidates: &mut Vec<Candidate>,
        metrics: &mut SwitchMetrics,
    ) {
        metrics.max_depth_reached = metrics.max_depth_reached.max(depth);
        if depth > self.max_depth {
            // Depths beyond the bound are ignored by design.
            warn!(path, depth, "context switching depth bound reached");
            return;
        }
        match value {
            Value::Expression(_) | Value::Reference(_) => candidates.push(Candidate {
                path: path.to_string(),
                depth,
                value: value.clone(),
            }),
            Value::String(text) if text.contains("${") => candidates.push(Candidate {
                path: path.to_string(),
                depth,
                value: value.clone(),
            }),
            Value::Object(map) => {
                for (key, child) in map {
                    self.collect(child, &format!("{}.{}", path, key), depth + 1, candidates, metrics);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.collect(
                        item,
                        &format!("{}[{}]", path, index),
                        depth + 1,
                        candidates,
                        metrics,
                    );
                }
            }
            _ => {}
        }
    }

    fn emit_group(
        &self,
        group: &[Candidate],
        dialect: CelDialect,
        ctx: &mut AnalysisContext,
        warnings: &mut Vec<CompileTimeWarning>,
    ) -> Option<CelExpression> {
        let pinned = std::mem::replace(&mut ctx.dialect, dialect);
        let mut pieces = Vec::new();
        let mut string_typed = true;
        for candidate in group {
            let result = self.analyzer.analyze(&candidate.value, ctx);
            warnings.extend(result.warnings);
            match result.expression {
                Some(expression) if result.valid => {
                    if expression.type_hint() != Some(TypeHint::String) {
                        string_typed = false;
                    }
                    pieces.push(expression.as_str().to_string());
                }
                _ => {
                    for error in result.errors {
                        warnings.push(
                            CompileTimeWarning::new(
                                crate::error::WarningCategory::PotentialRuntimeError,
                                format!("subtree at {} failed to convert: {}", candidate.path, error),
                            )
                            .with_expression(error.expression),
                        );
                    }
                }
            }
        }
        ctx.dialect = pinned;

        if pieces.is_empty() {
            return None;
        }
        let joined = pieces.join(" + ");
        let expression = CelExpression::new(joined).ok()?;
        Some(if string_typed {
            expression.with_type(TypeHint::String)
        } else {
            expression
        })
    }

    /// Combine the per-dialect pieces: plain `+` concatenation when every
    /// piece is a string, `+` with a context marker otherwise.
    fn combine(&self, per_dialect: &[(CelDialect, CelExpression)]) -> Option<CelExpression> {
        match per_dialect {
            [] => None,
            [(_, single)] => Some(single.clone()),
            many => {
                let all_strings = many
                    .iter()
                    .all(|(_, expression)| expression.type_hint() == Some(TypeHint::String));
                let joined = if all_strings {
                    many.iter()
                        .map(|(_, expression)| expression.as_str())
                        .collect::<Vec<_>>()
                        .join(" + ")
                } else {
                    many.iter()
                        .map(|(dialect, expression)| {
                            format!("/* context: {} */ {}", dialect, expression.as_str())
                        })
                        .collect::<Vec<_>>()
                        .join(" + ")
                };
                CelExpression::new(joined).ok()
            }
        }
    }
}
