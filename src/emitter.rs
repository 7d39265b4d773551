//! CEL emission: turning references and parsed expressions into CEL text.
//!
//! Two layers. The reference emitter applies the per-dialect rules to flat
//! reference lists. The AST lowering walks a parsed expression, folds
//! member chains rooted at `schema`/`resources` into references, and
//! renders the rest of the tree with explicit precedence handling.

use crate::context::{AnalysisContext, CelDialect};
use crate::error::{CompileTimeWarning, ConversionError, ConversionErrorCategory, WarningCategory};
use crate::parser::{BinaryOp, Expr, Literal, LogicalOp, TemplatePart, UnaryOp};
use crate::reference::{CelExpression, Reference, TypeHint};

// Emitted-CEL precedence, tightest last. Parentheses are attached whenever
// a child's precedence is lower than its parent requires.
pub const PREC_CONDITIONAL: u8 = 1;
pub const PREC_OR: u8 = 2;
pub const PREC_AND: u8 = 3;
pub const PREC_COMPARISON: u8 = 4;
pub const PREC_ADDITIVE: u8 = 5;
pub const PREC_MULTIPLICATIVE: u8 = 6;
pub const PREC_UNARY: u8 = 7;
pub const PREC_PRIMARY: u8 = 8;

/// CEL global functions that pass through by name.
const CEL_FUNCTIONS: &[&str] = &[
    "string",
    "int",
    "double",
    "bool",
    "bytes",
    "size",
    "has",
    "duration",
    "timestamp",
    "matches",
];

/// Comprehension-style member calls whose first argument binds a variable.
const CEL_MACROS: &[&str] = &["find", "filter", "map", "exists", "exists_one", "all"];

/// Emit a single reference in the given dialect.
pub fn emit_reference(reference: &Reference, dialect: CelDialect) -> CelExpression {
    let path = reference.cel_path();
    let (cel, hint) = match dialect {
        CelDialect::StatusBuilder | CelDialect::ResourceBuilder => {
            (path, reference.type_hint())
        }
        CelDialect::Conditional => (conditional_check(reference), Some(TypeHint::Boolean)),
        CelDialect::Readiness => (readiness_check(reference), Some(TypeHint::Boolean)),
        CelDialect::TemplateLiteral => (template_coerced(reference), Some(TypeHint::String)),
        CelDialect::FieldHydration | CelDialect::Unknown => (path, reference.type_hint()),
    };
    let expression = CelExpression::new(cel).expect("reference paths are never empty");
    match hint {
        Some(hint) => expression.with_type(hint),
        None => expression,
    }
}

/// Emit a set of references in the given dialect, combined the way the
/// dialect combines multiple values.
pub fn emit_references(references: &[Reference], dialect: CelDialect) -> Option<CelExpression> {
    match references {
        [] => None,
        [single] => Some(emit_reference(single, dialect)),
        many => {
            let rendered: Vec<String> = many
                .iter()
                .map(|r| emit_reference(r, dialect).as_str().to_string())
                .collect();
            let (joined, hint) = match dialect {
                CelDialect::StatusBuilder
                | CelDialect::ResourceBuilder
                | CelDialect::TemplateLiteral => {
                    (rendered.join(" + "), Some(TypeHint::String))
                }
                CelDialect::Conditional | CelDialect::Readiness => {
                    (rendered.join(" && "), Some(TypeHint::Boolean))
                }
                CelDialect::FieldHydration | CelDialect::Unknown => {
                    (format!("[{}]", rendered.join(", ")), Some(TypeHint::List))
                }
            };
            let expression = CelExpression::new(joined).expect("joined emission is never empty");
            Some(match hint {
                Some(hint) => expression.with_type(hint),
                None => expression,
            })
        }
    }
}

/// Boolean coercion for a reference used as a predicate.
fn conditional_check(reference: &Reference) -> String {
    let path = reference.cel_path();
    match reference.type_hint() {
        Some(TypeHint::Boolean) => path,
        Some(TypeHint::Number) => format!("{} > 0", path),
        Some(TypeHint::String) => format!("{} != \"\"", path),
        _ => format!("has({})", path),
    }
}

/// Readiness heuristics, checked in priority order over the field path.
/// `conditions` is tested ahead of the generic `status` match so condition
/// arrays get the `.find(...)` form even under a `status.` prefix.
fn readiness_check(reference: &Reference) -> String {
    let path = reference.cel_path();
    let field_path = reference.field_path();
    if field_path.contains("readyReplicas") {
        format!("{} > 0", path)
    } else if field_path.to_ascii_lowercase().ends_with("ready") {
        path
    } else if field_path.contains("conditions") {
        format!(
            "{}.find(c, c.type == \"Ready\").status == \"True\"",
            path
        )
    } else if field_path.contains("status") {
        format!("{} == \"Ready\"", path)
    } else {
        format!("has({}) && {} != \"\"", path, path)
    }
}

/// String coercion for a reference interpolated into a template. Untyped
/// references are assumed string; only a known non-string hint forces the
/// `string(...)` wrapper.
fn template_coerced(reference: &Reference) -> String {
    let path = reference.cel_path();
    match reference.type_hint() {
        None | Some(TypeHint::String) => path,
        Some(_) => format!("string({})", path),
    }
}

/// Escape a literal into a CEL double-quoted string.
pub fn quote_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// The result of lowering one AST node.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub cel: String,
    pub precedence: u8,
    pub type_hint: Option<TypeHint>,
    pub references: Vec<Reference>,
    pub warnings: Vec<CompileTimeWarning>,
}

impl Lowered {
    fn new(cel: String, precedence: u8) -> Self {
        Self {
            cel,
            precedence,
            type_hint: None,
            references: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn typed(mut self, hint: TypeHint) -> Self {
        self.type_hint = Some(hint);
        self
    }

    /// The rendered CEL, parenthesized if this node binds looser than the
    /// position it is being placed into.
    fn rendered(&self, min_precedence: u8) -> String {
        if self.precedence < min_precedence {
            format!("({})", self.cel)
        } else {
            self.cel.clone()
        }
    }
}

/// A member chain folded down to a reference path.
struct FoldedPath {
    resource_id: String,
    path: String,
    /// Parent path at the last `?.` link, when the chain was optional.
    guard_at: Option<String>,
}

/// Walks a parsed expression and renders CEL against an analysis context.
pub struct AstLowering<'a> {
    ctx: &'a AnalysisContext,
}

impl<'a> AstLowering<'a> {
    pub fn new(ctx: &'a AnalysisContext) -> Self {
        Self { ctx }
    }

    pub fn lower(&self, expr: &Expr) -> Result<Lowered, ConversionError> {
        let mut scope = Vec::new();
        self.lower_inner(expr, &mut scope)
    }

    fn lower_inner(
        &self,
        expr: &Expr,
        scope: &mut Vec<String>,
    ) -> Result<Lowered, ConversionError> {
        match expr {
            Expr::Literal { value, .. } => Ok(self.lower_literal(value)),
            Expr::Identifier { name, .. } => self.lower_identifier(name, expr, scope),
            Expr::Member { .. } | Expr::Index { .. } => {
                if let Some(folded) = self.fold_path(expr, scope) {
                    return Ok(self.lower_folded(folded));
                }
                // Not reference-shaped: lower structurally (e.g. indexing
                // into a bound comprehension variable).
                match expr {
                    Expr::Member {
                        object,
                        property,
                        optional,
                        ..
                    } => {
                        let base = self.lower_inner(object, scope)?;
                        let rendered = base.rendered(PREC_PRIMARY);
                        let mut out = if *optional {
                            Lowered::new(
                                format!(
                                    "has({base}.{prop}) ? {base}.{prop} : null",
                                    base = rendered,
                                    prop = property
                                ),
                                PREC_CONDITIONAL,
                            )
                        } else {
                            Lowered::new(format!("{}.{}", rendered, property), PREC_PRIMARY)
                        };
                        out.references = base.references;
                        out.warnings = base.warnings;
                        Ok(out)
                    }
                    Expr::Index { object, index, .. } => {
                        let base = self.lower_inner(object, scope)?;
                        let idx = self.lower_inner(index, scope)?;
                        let mut out = Lowered::new(
                            format!("{}[{}]", base.rendered(PREC_PRIMARY), idx.cel),
                            PREC_PRIMARY,
                        );
                        out.references = merge_refs(base.references, idx.references);
                        out.warnings = merge_warnings(base.warnings, idx.warnings);
                        Ok(out)
                    }
                    _ => unreachable!(),
                }
            }
            Expr::Unary { op, operand, .. } => {
                let inner = self.lower_inner(operand, scope)?;
                let rendered = inner.rendered(PREC_UNARY);
                let (cel, hint) = match op {
                    UnaryOp::Not => (format!("!{}", rendered), TypeHint::Boolean),
                    UnaryOp::Neg => (format!("-{}", rendered), TypeHint::Number),
                    // CEL has no unary plus; it is the identity.
                    UnaryOp::Plus => (rendered, TypeHint::Number),
                };
                let mut out = Lowered::new(cel, PREC_UNARY).typed(hint);
                out.references = inner.references;
                out.warnings = inner.warnings;
                Ok(out)
            }
            Expr::Binary {
                op, left, right, ..
            } => self.lower_binary(*op, left, right, scope),
            Expr::Logical {
                op, left, right, ..
            } => self.lower_logical(*op, left, right, scope),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let cond = self.lower_inner(condition, scope)?;
                let then_low = self.lower_inner(then_branch, scope)?;
                let else_low = self.lower_inner(else_branch, scope)?;
                // A nested ternary in condition position must be grouped.
                let cond_rendered = cond.rendered(PREC_OR);
                let cel = format!(
                    "{} ? {} : {}",
                    cond_rendered, then_low.cel, else_low.cel
                );
                let hint = match (then_low.type_hint, else_low.type_hint) {
                    (Some(a), Some(b)) if a == b => Some(a),
                    _ => None,
                };
                let mut out = Lowered::new(cel, PREC_CONDITIONAL);
                out.type_hint = hint;
                out.references = merge_refs(
                    merge_refs(cond.references, then_low.references),
                    else_low.references,
                );
                out.warnings = merge_warnings(
                    merge_warnings(cond.warnings, then_low.warnings),
                    else_low.warnings,
                );
                Ok(out)
            }
            Expr::Template { parts, .. } => self.lower_template(parts, scope),
            Expr::ArrayLit { elements, .. } => {
                let mut rendered = Vec::with_capacity(elements.len());
                let mut references = Vec::new();
                let mut warnings = Vec::new();
                for element in elements {
                    let low = self.lower_inner(element, scope)?;
                    rendered.push(low.cel);
                    references = merge_refs(references, low.references);
                    warnings = merge_warnings(warnings, low.warnings);
                }
                let mut out =
                    Lowered::new(format!("[{}]", rendered.join(", ")), PREC_PRIMARY)
                        .typed(TypeHint::List);
                out.references = references;
                out.warnings = warnings;
                Ok(out)
            }
            Expr::ObjectLit { entries, .. } => {
                let mut rendered = Vec::with_capacity(entries.len());
                let mut references = Vec::new();
                let mut warnings = Vec::new();
                for (key, value) in entries {
                    let low = self.lower_inner(value, scope)?;
                    rendered.push(format!("{}: {}", quote_string(key), low.cel));
                    references = merge_refs(references, low.references);
                    warnings = merge_warnings(warnings, low.warnings);
                }
                let mut out =
                    Lowered::new(format!("{{{}}}", rendered.join(", ")), PREC_PRIMARY)
                        .typed(TypeHint::Object);
                out.references = references;
                out.warnings = warnings;
                Ok(out)
            }
            Expr::Call {
                callee, arguments, ..
            } => self.lower_call(callee, arguments, scope),
        }
    }

    fn lower_literal(&self, value: &Literal) -> Lowered {
        match value {
            Literal::Int(n) => {
                Lowered::new(n.to_string(), PREC_PRIMARY).typed(TypeHint::Number)
            }
            Literal::Float(f) => {
                Lowered::new(format!("{:?}", f), PREC_PRIMARY).typed(TypeHint::Number)
            }
            Literal::String(s) => {
                Lowered::new(quote_string(s), PREC_PRIMARY).typed(TypeHint::String)
            }
            Literal::Bool(b) => {
                Lowered::new(b.to_string(), PREC_PRIMARY).typed(TypeHint::Boolean)
            }
            Literal::Null => Lowered::new("null".to_string(), PREC_PRIMARY),
        }
    }

    fn lower_identifier(
        &self,
        name: &str,
        expr: &Expr,
        scope: &mut Vec<String>,
    ) -> Result<Lowered, ConversionError> {
        if scope.iter().any(|bound| bound == name) {
            return Ok(Lowered::new(name.to_string(), PREC_PRIMARY));
        }
        if name == "schema" && !self.ctx.has_schema {
            return Err(ConversionError::new(
                name,
                ConversionErrorCategory::MemberAccess,
                "no input schema is declared in this context",
            )
            .with_location(expr.span())
            .suggest("declare a schema for the graph before referencing 'schema.*'"));
        }
        if name == "schema" || name == "resources" || self.ctx.knows_resource(name) {
            return Err(ConversionError::new(
                name,
                ConversionErrorCategory::MemberAccess,
                format!("'{}' must be followed by a field path", name),
            )
            .with_location(expr.span())
            .suggest("reference a concrete field, e.g. 'schema.spec.name'"));
        }
        let mut error = ConversionError::new(
            name,
            ConversionErrorCategory::MemberAccess,
            format!("unknown identifier '{}'", name),
        )
        .with_location(expr.span());
        if !self.ctx.available_resources.is_empty() {
            let known: Vec<&str> = self
                .ctx
                .available_resources
                .keys()
                .map(String::as_str)
                .collect();
            error = error.suggest(format!(
                "expected 'schema', 'resources', or one of: {}",
                known.join(", ")
            ));
        } else {
            error = error.suggest("expected 'schema' or 'resources.<id>'");
        }
        Err(error)
    }

    /// Try to fold a member/index chain into a reference path. Returns
    /// `None` when the chain is not rooted at `schema`, `resources`, or a
    /// declared resource id.
    fn fold_path(&self, expr: &Expr, scope: &[String]) -> Option<FoldedPath> {
        enum Partial {
            SchemaRoot,
            ResourcesRoot,
            ResourceOnly(String),
            Path {
                resource_id: String,
                path: String,
                guard_at: Option<String>,
            },
        }

        fn walk(
            this: &AstLowering<'_>,
            expr: &Expr,
            scope: &[String],
        ) -> Option<Partial> {
            match expr {
                Expr::Identifier { name, .. } => {
                    if scope.iter().any(|bound| bound == name) {
                        return None;
                    }
                    if name == "schema" && this.ctx.has_schema {
                        Some(Partial::SchemaRoot)
                    } else if name == "resources" {
                        Some(Partial::ResourcesRoot)
                    } else if this.ctx.knows_resource(name) {
                        Some(Partial::ResourceOnly(name.clone()))
                    } else {
                        None
                    }
                }
                Expr::Member {
                    object,
                    property,
                    optional,
                    ..
                } => {
                    let inner = walk(this, object, scope)?;
                    let next = match inner {
                        Partial::SchemaRoot => Partial::Path {
                            resource_id: crate::reference::SCHEMA_ID.to_string(),
                            path: property.clone(),
                            guard_at: optional.then(|| "schema".to_string()),
                        },
                        Partial::ResourcesRoot => Partial::ResourceOnly(property.clone()),
                        Partial::ResourceOnly(id) => {
                            let guard = optional.then(|| format!("resources.{}", id));
                            Partial::Path {
                                resource_id: id,
                                path: property.clone(),
                                guard_at: guard,
                            }
                        }
                        Partial::Path {
                            resource_id,
                            path,
                            guard_at,
                        } => {
                            let parent = if resource_id == crate::reference::SCHEMA_ID {
                                format!("schema.{}", path)
                            } else {
                                format!("resources.{}.{}", resource_id, path)
                            };
                            Partial::Path {
                                resource_id,
                                path: format!("{}.{}", path, property),
                                guard_at: if *optional { Some(parent) } else { guard_at },
                            }
                        }
                    };
                    Some(next)
                }
                Expr::Index { object, index, .. } => {
                    let inner = walk(this, object, scope)?;
                    let suffix = match &**index {
                        Expr::Literal {
                            value: Literal::Int(n),
                            ..
                        } => format!("[{}]", n),
                        Expr::Literal {
                            value: Literal::String(s),
                            ..
                        } => format!("[{}]", quote_string(s)),
                        _ => return None,
                    };
                    match inner {
                        Partial::Path {
                            resource_id,
                            path,
                            guard_at,
                        } => Some(Partial::Path {
                            resource_id,
                            path: format!("{}{}", path, suffix),
                            guard_at,
                        }),
                        _ => None,
                    }
                }
                _ => None,
            }
        }

        match walk(self, expr, scope)? {
            Partial::Path {
                resource_id,
                path,
                guard_at,
            } => Some(FoldedPath {
                resource_id,
                path,
                guard_at,
            }),
            _ => None,
        }
    }

    fn lower_folded(&self, folded: FoldedPath) -> Lowered {
        let reference = match Reference::new(folded.resource_id, folded.path) {
            Ok(reference) => reference,
            Err(_) => {
                // Path shapes that survive parsing always validate; an
                // empty segment cannot be produced by the parser.
                unreachable!("parser produces well-formed field paths")
            }
        };
        let path = reference.cel_path();
        let mut out = match folded.guard_at {
            Some(guard) => Lowered::new(
                format!("has({}) ? {} : null", guard, path),
                PREC_CONDITIONAL,
            ),
            None => Lowered::new(path, PREC_PRIMARY),
        };
        out.references = vec![reference];
        out
    }

    fn lower_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &mut Vec<String>,
    ) -> Result<Lowered, ConversionError> {
        let left_low = self.lower_inner(left, scope)?;
        let right_low = self.lower_inner(right, scope)?;
        let precedence = match op {
            BinaryOp::Add | BinaryOp::Sub => PREC_ADDITIVE,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => PREC_MULTIPLICATIVE,
            _ => PREC_COMPARISON,
        };
        // Left-associative: the right operand needs grouping at equal
        // precedence, the left only when strictly looser.
        let cel = format!(
            "{} {} {}",
            left_low.rendered(precedence),
            op.symbol(),
            right_low.rendered(precedence + 1)
        );
        let hint = if op.is_comparison() {
            Some(TypeHint::Boolean)
        } else if op == BinaryOp::Add
            && (left_low.type_hint == Some(TypeHint::String)
                || right_low.type_hint == Some(TypeHint::String))
        {
            Some(TypeHint::String)
        } else {
            Some(TypeHint::Number)
        };
        let mut out = Lowered::new(cel, precedence);
        out.type_hint = hint;
        out.references = merge_refs(left_low.references, right_low.references);
        out.warnings = merge_warnings(left_low.warnings, right_low.warnings);
        Ok(out)
    }

    fn lower_logical(
        &self,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
        scope: &mut Vec<String>,
    ) -> Result<Lowered, ConversionError> {
        let left_low = self.lower_inner(left, scope)?;
        let right_low = self.lower_inner(right, scope)?;
        let mut references = merge_refs(left_low.references.clone(), right_low.references.clone());
        let mut warnings = merge_warnings(left_low.warnings.clone(), right_low.warnings.clone());

        let out = match op {
            LogicalOp::And => {
                let cel = format!(
                    "{} && {}",
                    left_low.rendered(PREC_AND),
                    right_low.rendered(PREC_AND + 1)
                );
                Lowered::new(cel, PREC_AND).typed(TypeHint::Boolean)
            }
            LogicalOp::Or => {
                if left_low.type_hint == Some(TypeHint::Boolean) {
                    let cel = format!(
                        "{} || {}",
                        left_low.rendered(PREC_OR),
                        right_low.rendered(PREC_OR + 1)
                    );
                    Lowered::new(cel, PREC_OR).typed(TypeHint::Boolean)
                } else {
                    // Fallback semantics: non-boolean `a || b` means "a,
                    // unless a is missing or empty".
                    let lhs = left_low.rendered(PREC_COMPARISON + 1);
                    let guard = match left_low.type_hint {
                        Some(TypeHint::String) => {
                            format!("{} != null && {} != \"\"", lhs, lhs)
                        }
                        Some(TypeHint::Number) => {
                            format!("{} != null && {} != 0", lhs, lhs)
                        }
                        _ => format!("{} != null", lhs),
                    };
                    if left_low.type_hint.is_some()
                        && right_low.type_hint.is_some()
                        && left_low.type_hint != right_low.type_hint
                    {
                        warnings.push(
                            CompileTimeWarning::new(
                                WarningCategory::TypeAssertionUsed,
                                "'||' fallback mixes value types; the result type is erased",
                            )
                            .with_expression(format!("{} || {}", left_low.cel, right_low.cel)),
                        );
                    }
                    let cel = format!("{} ? {} : {}", guard, lhs, right_low.cel);
                    let mut lowered = Lowered::new(cel, PREC_CONDITIONAL);
                    lowered.type_hint = left_low.type_hint.or(right_low.type_hint);
                    lowered
                }
            }
            LogicalOp::Nullish => {
                // Null-only fallback, no emptiness checks.
                let lhs = left_low.rendered(PREC_COMPARISON + 1);
                let cel = format!("{} != null ? {} : {}", lhs, lhs, right_low.cel);
                let mut lowered = Lowered::new(cel, PREC_CONDITIONAL);
                lowered.type_hint = left_low.type_hint.or(right_low.type_hint);
                lowered
            }
        };

        let mut out = out;
        out.references = std::mem::take(&mut references);
        out.warnings.append(&mut warnings);
        Ok(out)
    }

    fn lower_template(
        &self,
        parts: &[TemplatePart],
        scope: &mut Vec<String>,
    ) -> Result<Lowered, ConversionError> {
        let mut pieces = Vec::new();
        let mut references = Vec::new();
        let mut warnings = Vec::new();
        for part in parts {
            match part {
                TemplatePart::Literal(text) => {
                    if !text.is_empty() {
                        pieces.push(quote_string(text));
                    }
                }
                TemplatePart::Interpolation(expr) => {
                    let low = self.lower_inner(expr, scope)?;
                    let piece = match low.type_hint {
                        // Untyped interpolations are assumed to already be
                        // strings; a known non-string type gets coerced.
                        None | Some(TypeHint::String) => low.rendered(PREC_ADDITIVE + 1),
                        Some(_) => format!("string({})", low.cel),
                    };
                    pieces.push(piece);
                    references = merge_refs(references, low.references);
                    warnings = merge_warnings(warnings, low.warnings);
                }
            }
        }
        if pieces.is_empty() {
            pieces.push(quote_string(""));
        }
        let (cel, precedence) = if pieces.len() == 1 {
            (pieces.remove(0), PREC_PRIMARY)
        } else {
            (pieces.join(" + "), PREC_ADDITIVE)
        };
        let mut out = Lowered::new(cel, precedence).typed(TypeHint::String);
        out.references = references;
        out.warnings = warnings;
        Ok(out)
    }

    fn lower_call(
        &self,
        callee: &Expr,
        arguments: &[Expr],
        scope: &mut Vec<String>,
    ) -> Result<Lowered, ConversionError> {
        match callee {
            Expr::Identifier { name, span } => {
                if !CEL_FUNCTIONS.contains(&name.as_str()) {
                    return Err(ConversionError::new(
                        name,
                        ConversionErrorCategory::FunctionCall,
                        format!("unknown function '{}'", name),
                    )
                    .with_location(*span)
                    .suggest(format!(
                        "supported functions: {}",
                        CEL_FUNCTIONS.join(", ")
                    )));
                }
                let mut rendered = Vec::with_capacity(arguments.len());
                let mut references = Vec::new();
                let mut warnings = Vec::new();
                for argument in arguments {
                    let low = self.lower_inner(argument, scope)?;
                    rendered.push(low.cel);
                    references = merge_refs(references, low.references);
                    warnings = merge_warnings(warnings, low.warnings);
                }
                let hint = match name.as_str() {
                    "string" => Some(TypeHint::String),
                    "int" | "double" | "size" => Some(TypeHint::Number),
                    "has" | "bool" | "matches" => Some(TypeHint::Boolean),
                    _ => None,
                };
                let mut out = Lowered::new(
                    format!("{}({})", name, rendered.join(", ")),
                    PREC_PRIMARY,
                );
                out.type_hint = hint;
                out.references = references;
                out.warnings = warnings;
                Ok(out)
            }
            Expr::Member {
                object, property, ..
            } => {
                let base = self.lower_inner(object, scope)?;
                let mut rendered = Vec::with_capacity(arguments.len());
                let mut references = base.references.clone();
                let mut warnings = base.warnings.clone();

                // Comprehension macros bind their first argument as a
                // variable visible inside the remaining arguments.
                let binds = CEL_MACROS.contains(&property.as_str());
                let bound_name = if binds {
                    match arguments.first() {
                        Some(Expr::Identifier { name, .. }) => Some(name.clone()),
                        _ => None,
                    }
                } else {
                    None
                };

                for (i, argument) in arguments.iter().enumerate() {
                    if i == 0 {
                        if let Some(ref name) = bound_name {
                            rendered.push(name.clone());
                            scope.push(name.clone());
                            continue;
                        }
                    }
                    let low = self.lower_inner(argument, scope)?;
                    rendered.push(low.cel);
                    references = merge_refs(references, low.references);
                    warnings = merge_warnings(warnings, low.warnings);
                }
                if bound_name.is_some() {
                    scope.pop();
                }

                let mut out = Lowered::new(
                    format!(
                        "{}.{}({})",
                        base.rendered(PREC_PRIMARY),
                        property,
                        rendered.join(", ")
                    ),
                    PREC_PRIMARY,
                );
                out.references = references;
                out.warnings = warnings;
                Ok(out)
            }
            other => Err(ConversionError::new(
                format!("{:?}", other),
                ConversionErrorCategory::FunctionCall,
                "only named functions and method calls are supported",
            )
            .with_location(other.span())),
        }
    }
}

fn merge_refs(mut left: Vec<Reference>, right: Vec<Reference>) -> Vec<Reference> {
    for reference in right {
        if !left.contains(&reference) {
            left.push(reference);
        }
    }
    left
}

fn merge_warnings(
    mut left: Vec<CompileTimeWarning>,
    mut right: Vec<CompileTimeWarning>,
) -> Vec<CompileTimeWarning> {
    left.append(&mut right);
    left
}
