//! Binding include/ready/custom predicates to resource handles.
//!
//! The binder sits between authors and the analyzer: predicates arrive as
//! raw CEL or as host-expression source, get converted in the matching
//! dialect (auto-process mode) or stored verbatim (passthrough mode), and
//! ride along on the handle without polluting its manifest serialization.

use crate::analyzer::ExpressionAnalyzer;
use crate::context::{AnalysisContext, CelDialect, FactoryKind};
use crate::error::{CompileTimeWarning, ConversionError, ConversionErrorCategory, WarningCategory};
use crate::reference::CelExpression;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// How predicate values are treated before being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    /// Run host expressions through the analyzer in the matching dialect.
    #[default]
    AutoProcess,
    /// Store the value verbatim.
    Passthrough,
}

/// A predicate as supplied by the author.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateSource {
    /// Already-lowered CEL.
    Cel(CelExpression),
    /// Host-language expression source (possibly arrow-function shaped).
    Expression(String),
}

/// A resource handle enhanced with gating predicates.
///
/// The predicates are deliberately excluded from the handle's own
/// serialization; serializing a binding yields the manifest alone, and
/// [`ResourceBinding::predicates`] extracts the predicate fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBinding {
    resource_id: String,
    manifest: serde_json::Value,
    include_when: Option<CelExpression>,
    ready_when: Option<CelExpression>,
    custom: BTreeMap<String, CelExpression>,
}

impl ResourceBinding {
    pub fn new(resource_id: impl Into<String>, manifest: serde_json::Value) -> Self {
        Self {
            resource_id: resource_id.into(),
            manifest,
            include_when: None,
            ready_when: None,
            custom: BTreeMap::new(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn manifest(&self) -> &serde_json::Value {
        &self.manifest
    }

    pub fn include_when(&self) -> Option<&CelExpression> {
        self.include_when.as_ref()
    }

    pub fn ready_when(&self) -> Option<&CelExpression> {
        self.ready_when.as_ref()
    }

    pub fn custom_predicate(&self, name: &str) -> Option<&CelExpression> {
        self.custom.get(name)
    }

    /// Extract exactly the predicate fields for serialization.
    pub fn predicates(&self) -> PredicateSet {
        PredicateSet {
            include_when: self.include_when.clone(),
            ready_when: self.ready_when.clone(),
            custom: self.custom.clone(),
        }
    }
}

impl Serialize for ResourceBinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Predicates stay invisible to normal enumeration of the handle.
        self.manifest.serialize(serializer)
    }
}

/// The predicate fields of a binding, in wire shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_when: Option<CelExpression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_when: Option<CelExpression>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, CelExpression>,
}

/// What one bind call produced besides the stored predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindReport {
    pub warnings: Vec<CompileTimeWarning>,
    pub errors: Vec<ConversionError>,
}

impl BindReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ConditionalBinder {
    analyzer: ExpressionAnalyzer,
    mode: BindingMode,
}

impl ConditionalBinder {
    pub fn new(mode: BindingMode) -> Self {
        Self {
            analyzer: ExpressionAnalyzer::new(),
            mode,
        }
    }

    /// Attach an include-when predicate: boolean CEL deciding whether the
    /// resource is emitted at all.
    pub fn bind_include_when(
        &self,
        binding: &mut ResourceBinding,
        source: PredicateSource,
        ctx: &mut AnalysisContext,
    ) -> BindReport {
        let mut report = self.validate(&source, "includeWhen", ctx);
        if !report.ok() {
            return report;
        }
        if let Some(cel) =
            self.process(source, CelDialect::Conditional, ctx, &mut report)
        {
            binding.include_when = Some(cel);
        }
        report
    }

    /// Attach a ready-when predicate: boolean CEL deciding readiness.
    pub fn bind_ready_when(
        &self,
        binding: &mut ResourceBinding,
        source: PredicateSource,
        ctx: &mut AnalysisContext,
    ) -> BindReport {
        let mut report = self.validate(&source, "readyWhen", ctx);
        if !report.ok() {
            return report;
        }
        if let Some(cel) = self.process(source, CelDialect::Readiness, ctx, &mut report) {
            binding.ready_when = Some(cel);
        }
        report
    }

    /// Attach a named custom predicate.
    pub fn bind_predicate(
        &self,
        binding: &mut ResourceBinding,
        name: impl Into<String>,
        source: PredicateSource,
        ctx: &mut AnalysisContext,
    ) -> BindReport {
        let name = name.into();
        let mut report = self.validate(&source, &name, ctx);
        if !report.ok() {
            return report;
        }
        if let Some(cel) =
            self.process(source, CelDialect::Conditional, ctx, &mut report)
        {
            binding.custom.insert(name, cel);
        }
        report
    }

    fn validate(
        &self,
        source: &PredicateSource,
        field: &str,
        ctx: &AnalysisContext,
    ) -> BindReport {
        let mut report = BindReport::default();
        if ctx.factory == FactoryKind::Direct {
            report.warnings.push(CompileTimeWarning::new(
                WarningCategory::PotentialRuntimeError,
                format!(
                    "'{}' is evaluated client-side in direct mode; its expressiveness is limited",
                    field
                ),
            ));
        }
        if ctx.factory == FactoryKind::Kro {
            if let PredicateSource::Expression(text) = source {
                if text.contains("=>") {
                    report.errors.push(
                        ConversionError::new(
                            text.clone(),
                            ConversionErrorCategory::FunctionCall,
                            format!("'{}' must not be a function in kro mode", field),
                        )
                        .suggest("pass the predicate body as an expression string"),
                    );
                }
            }
        }
        report
    }

    fn process(
        &self,
        source: PredicateSource,
        dialect: CelDialect,
        ctx: &mut AnalysisContext,
        report: &mut BindReport,
    ) -> Option<CelExpression> {
        match (self.mode, source) {
            (_, PredicateSource::Cel(cel)) => Some(cel),
            (BindingMode::Passthrough, PredicateSource::Expression(text)) => {
                match CelExpression::new(text) {
                    Ok(cel) => Some(cel),
                    Err(_) => {
                        report.errors.push(ConversionError::new(
                            "",
                            ConversionErrorCategory::Unknown,
                            "predicate must not be empty",
                        ));
                        None
                    }
                }
            }
            (BindingMode::AutoProcess, PredicateSource::Expression(text)) => {
                let pinned = std::mem::replace(&mut ctx.dialect, dialect);
                let result = if text.contains("=>") {
                    self.analyzer.analyze_function(&text, ctx)
                } else {
                    self.analyzer.analyze_expression(&text, ctx)
                };
                ctx.dialect = pinned;

                report.warnings.extend(result.warnings);
                if !result.valid {
                    report.errors.extend(result.errors);
                    return None;
                }
                result.expression
            }
        }
    }
}
