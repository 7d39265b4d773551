//! Mapping CEL evaluation failures back to original expressions.
//!
//! When the orchestrator reports that a CEL expression blew up, this
//! module categorizes the failure, walks the source map back to the
//! author's original expression, extracts whatever context the CEL text
//! and message carry, and suggests fixes. Unmapped CEL yields `None`;
//! nothing is fabricated.

use crate::error::{SourceSpan, Suggestion};
use crate::source_map::SourceMap;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeErrorCategory {
    NullReference,
    FieldNotFound,
    TypeMismatch,
    Evaluation,
    Syntax,
    Unknown,
}

impl RuntimeErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NullReference => "null-reference",
            Self::FieldNotFound => "field-not-found",
            Self::TypeMismatch => "type-mismatch",
            Self::Evaluation => "evaluation",
            Self::Syntax => "syntax",
            Self::Unknown => "unknown",
        }
    }
}

/// A CEL failure mapped back to its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedRuntimeError {
    pub cel_expression: String,
    pub raw_message: String,
    pub category: RuntimeErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_type: Option<String>,
    pub original_expression: String,
    pub source_location: SourceSpan,
    pub suggestions: Vec<Suggestion>,
}

/// Categorize a raw failure message by keyword scan.
pub fn categorize(message: &str) -> RuntimeErrorCategory {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("null") || lowered.contains("undefined") {
        RuntimeErrorCategory::NullReference
    } else if lowered.contains("type") || lowered.contains("expected") {
        RuntimeErrorCategory::TypeMismatch
    } else if lowered.contains("field") || lowered.contains("not found") {
        RuntimeErrorCategory::FieldNotFound
    } else if lowered.contains("syntax") || lowered.contains("parse") {
        RuntimeErrorCategory::Syntax
    } else if lowered.contains("evaluation") || lowered.contains("runtime") {
        RuntimeErrorCategory::Evaluation
    } else {
        RuntimeErrorCategory::Unknown
    }
}

pub struct RuntimeErrorMapper {
    source_map: SourceMap,
}

impl RuntimeErrorMapper {
    pub fn new(source_map: SourceMap) -> Self {
        Self { source_map }
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// Map a failing CEL string and message back to the original
    /// expression. Returns `None` when the source map has no entry for the
    /// CEL string.
    pub fn map_error(&self, cel: &str, message: &str) -> Option<MappedRuntimeError> {
        let entry = self.source_map.lookup_by_cel(cel)?;
        let category = categorize(message);
        let (resource_id, field_path) = extract_cel_context(cel);
        let (expected_type, actual_type) = extract_type_pair(message);
        let position = extract_position(message);
        let suggestions = suggestions_for(category, resource_id.as_deref(), field_path.as_deref());

        Some(MappedRuntimeError {
            cel_expression: cel.to_string(),
            raw_message: message.to_string(),
            category,
            position,
            resource_id,
            field_path,
            expected_type,
            actual_type,
            original_expression: entry.original_expression.clone(),
            source_location: entry.source_location,
            suggestions,
        })
    }
}

/// Pull `resources.<id>.` / `schema.` context out of the CEL text.
fn extract_cel_context(cel: &str) -> (Option<String>, Option<String>) {
    if let Some(start) = cel.find("resources.") {
        let tail = &cel[start + "resources.".len()..];
        let path_like: String = tail
            .chars()
            .take_while(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '[' | ']' | '"'))
            .collect();
        let mut segments = path_like.splitn(2, '.');
        let resource_id = segments.next().filter(|s| !s.is_empty()).map(str::to_string);
        let field_path = segments.next().filter(|s| !s.is_empty()).map(str::to_string);
        return (resource_id, field_path);
    }
    if let Some(start) = cel.find("schema.") {
        let tail = &cel[start + "schema.".len()..];
        let path_like: String = tail
            .chars()
            .take_while(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '[' | ']' | '"'))
            .collect();
        if !path_like.is_empty() {
            return (None, Some(path_like));
        }
    }
    (None, None)
}

/// `expected X, got Y` out of the message.
fn extract_type_pair(message: &str) -> (Option<String>, Option<String>) {
    let expected = extract_between(message, "expected ", ",")
        .map(|s| s.trim().to_string());
    let actual = message
        .split("got ")
        .nth(1)
        .map(|tail| {
            tail.trim_end_matches(['.', ' '])
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string()
        })
        .filter(|s| !s.is_empty());
    (expected, actual)
}

/// `at position N` out of the message.
fn extract_position(message: &str) -> Option<usize> {
    let tail = message.split("at position ").nth(1)?;
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Extract text between two delimiters.
fn extract_between(text: &str, start: &str, end: &str) -> Option<String> {
    let start_idx = text.find(start)? + start.len();
    let remaining = &text[start_idx..];
    let end_idx = remaining.find(end)?;
    Some(remaining[..end_idx].to_string())
}

fn suggestions_for(
    category: RuntimeErrorCategory,
    resource_id: Option<&str>,
    field_path: Option<&str>,
) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    match category {
        RuntimeErrorCategory::NullReference => {
            match field_path {
                Some(path) => suggestions.push(Suggestion::with_replacement(
                    "guard the access with optional chaining",
                    format!("use '?.{}' so missing fields yield null", last_segment(path)),
                )),
                None => suggestions.push(Suggestion::new(
                    "guard the access with optional chaining (?.)",
                )),
            }
            suggestions.push(Suggestion::new(
                "provide a fallback with '??' for fields that appear late",
            ));
        }
        RuntimeErrorCategory::FieldNotFound => {
            if let (Some(id), Some(path)) = (resource_id, field_path) {
                suggestions.push(Suggestion::new(format!(
                    "verify resource '{}' exposes '{}'",
                    id, path
                )));
            }
            suggestions.push(Suggestion::new(
                "check the field path against the resource schema",
            ));
        }
        RuntimeErrorCategory::TypeMismatch => {
            suggestions.push(Suggestion::new(
                "coerce the value explicitly, e.g. string(...) or int(...)",
            ));
        }
        RuntimeErrorCategory::Syntax => {
            suggestions.push(Suggestion::new(
                "the emitted CEL is malformed; re-run the conversion and compare the source map entry",
            ));
        }
        RuntimeErrorCategory::Evaluation => {
            suggestions.push(Suggestion::new(
                "inspect the live resource state; the expression is valid but its inputs were not",
            ));
        }
        RuntimeErrorCategory::Unknown => {
            suggestions.push(Suggestion::new("inspect the raw message"));
        }
    }
    suggestions
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Errors sharing category, resource and similar messages, folded together.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorGroup {
    pub category: RuntimeErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub count: usize,
    pub sample_message: String,
    pub original_expressions: Vec<String>,
}

/// Group similar errors: same category, same resource, overlapping message
/// vocabulary.
pub fn group_errors(errors: &[MappedRuntimeError]) -> Vec<ErrorGroup> {
    let mut groups: Vec<ErrorGroup> = Vec::new();
    for error in errors {
        let found = groups.iter_mut().find(|group| {
            group.category == error.category
                && group.resource_id == error.resource_id
                && message_overlap(&group.sample_message, &error.raw_message) >= 0.5
        });
        match found {
            Some(group) => {
                group.count += 1;
                if !group
                    .original_expressions
                    .contains(&error.original_expression)
                {
                    group
                        .original_expressions
                        .push(error.original_expression.clone());
                }
            }
            None => groups.push(ErrorGroup {
                category: error.category,
                resource_id: error.resource_id.clone(),
                count: 1,
                sample_message: error.raw_message.clone(),
                original_expressions: vec![error.original_expression.clone()],
            }),
        }
    }
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}

/// Word-level Jaccard similarity between two messages.
fn message_overlap(a: &str, b: &str) -> f64 {
    let words_a: std::collections::BTreeSet<&str> = a.split_whitespace().collect();
    let words_b: std::collections::BTreeSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Human-readable rollup of a batch of mapped errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub total: usize,
    pub groups: Vec<ErrorGroup>,
    pub by_category: BTreeMap<String, usize>,
}

impl ErrorReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} runtime error(s) in {} group(s)\n",
            "report:".bold(),
            self.total,
            self.groups.len()
        ));
        for group in &self.groups {
            let heading = format!(
                "  [{}] x{} {}",
                group.category.as_str(),
                group.count,
                group.resource_id.as_deref().unwrap_or("-")
            );
            out.push_str(&format!("{}\n", heading.red()));
            out.push_str(&format!("    message: {}\n", group.sample_message));
            for original in &group.original_expressions {
                out.push_str(&format!("    from: {}\n", original.cyan()));
            }
        }
        out
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build a report out of a batch of mapped errors.
pub fn report(errors: &[MappedRuntimeError]) -> ErrorReport {
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for error in errors {
        *by_category
            .entry(error.category.as_str().to_string())
            .or_insert(0) += 1;
    }
    ErrorReport {
        total: errors.len(),
        groups: group_errors(errors),
        by_category,
    }
}

/// Per-category statistics over a batch of mapped errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatisticsReport {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_resource: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_frequent: Option<RuntimeErrorCategory>,
}

pub fn statistics(errors: &[MappedRuntimeError]) -> ErrorStatisticsReport {
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut counts: BTreeMap<RuntimeErrorCategory, usize> = BTreeMap::new();
    let mut by_resource: BTreeMap<String, usize> = BTreeMap::new();
    for error in errors {
        *by_category
            .entry(error.category.as_str().to_string())
            .or_insert(0) += 1;
        *counts.entry(error.category).or_insert(0) += 1;
        if let Some(ref id) = error.resource_id {
            *by_resource.entry(id.clone()).or_insert(0) += 1;
        }
    }
    let most_frequent = counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(category, _)| category);
    ErrorStatisticsReport {
        total: errors.len(),
        by_category,
        by_resource,
        most_frequent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CelDialect;
    use crate::source_map::EntryMetadata;

    fn mapper_with(cel: &str, original: &str) -> RuntimeErrorMapper {
        let mut map = SourceMap::new();
        map.record(
            original,
            cel,
            SourceSpan::new(1, 1, original.len()),
            CelDialect::StatusBuilder,
            EntryMetadata::default(),
        );
        RuntimeErrorMapper::new(map)
    }

    #[test]
    fn test_categorize_keywords() {
        assert_eq!(
            categorize("no such attribute: value is null"),
            RuntimeErrorCategory::NullReference
        );
        assert_eq!(
            categorize("expected string, got int"),
            RuntimeErrorCategory::TypeMismatch
        );
        assert_eq!(
            categorize("field 'host' not present"),
            RuntimeErrorCategory::FieldNotFound
        );
        assert_eq!(
            categorize("parse failure near token"),
            RuntimeErrorCategory::Syntax
        );
        assert_eq!(
            categorize("evaluation aborted"),
            RuntimeErrorCategory::Evaluation
        );
        assert_eq!(categorize("???"), RuntimeErrorCategory::Unknown);
    }

    #[test]
    fn test_map_error_round_trip() {
        let cel = "resources.deployment.status.readyReplicas > 0";
        let mapper = mapper_with(cel, "deployment.status.readyReplicas > 0");
        let mapped = mapper
            .map_error(cel, "field 'readyReplicas' not present")
            .unwrap();

        assert_eq!(
            mapped.original_expression,
            "deployment.status.readyReplicas > 0"
        );
        assert_eq!(mapped.category, RuntimeErrorCategory::FieldNotFound);
        assert_eq!(mapped.resource_id.as_deref(), Some("deployment"));
        assert_eq!(
            mapped.field_path.as_deref(),
            Some("status.readyReplicas")
        );
        assert!(!mapped.suggestions.is_empty());
    }

    #[test]
    fn test_unmapped_cel_yields_none() {
        let mapper = mapper_with("resources.a.x", "a.x");
        assert!(mapper.map_error("resources.never.seen", "null value").is_none());
    }

    #[test]
    fn test_type_pair_and_position_extraction() {
        let cel = "schema.spec.replicas";
        let mapper = mapper_with(cel, "schema.spec.replicas");
        let mapped = mapper
            .map_error(cel, "type error: expected int, got string at position 7")
            .unwrap();
        assert_eq!(mapped.expected_type.as_deref(), Some("int"));
        assert_eq!(mapped.actual_type.as_deref(), Some("string"));
        assert_eq!(mapped.position, Some(7));
        assert_eq!(mapped.field_path.as_deref(), Some("spec.replicas"));
        assert!(mapped.resource_id.is_none());
    }

    #[test]
    fn test_null_reference_suggests_optional_chaining() {
        let cel = "resources.db.status.host";
        let mapper = mapper_with(cel, "db.status.host");
        let mapped = mapper.map_error(cel, "value is null").unwrap();
        assert_eq!(mapped.category, RuntimeErrorCategory::NullReference);
        assert!(mapped
            .suggestions
            .iter()
            .any(|s| s.message.contains("optional chaining")));
    }

    #[test]
    fn test_grouping_similar_errors() {
        let cel = "resources.db.status.host";
        let mapper = mapper_with(cel, "db.status.host");
        let a = mapper.map_error(cel, "value is null for field host").unwrap();
        let b = mapper.map_error(cel, "value is null for field host").unwrap();
        let mut c = mapper.map_error(cel, "value is null for field host").unwrap();
        c.category = RuntimeErrorCategory::Evaluation;

        let groups = group_errors(&[a, b, c]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].category, RuntimeErrorCategory::NullReference);
    }

    #[test]
    fn test_report_and_statistics() {
        let cel = "resources.db.status.host";
        let mapper = mapper_with(cel, "db.status.host");
        let errors = vec![
            mapper.map_error(cel, "value is null").unwrap(),
            mapper.map_error(cel, "value is null").unwrap(),
            mapper.map_error(cel, "evaluation aborted").unwrap(),
        ];

        let report = report(&errors);
        assert_eq!(report.total, 3);
        assert_eq!(report.by_category.get("null-reference"), Some(&2));
        let rendered = report.render();
        assert!(rendered.contains("null-reference"));
        assert!(report.to_json().unwrap().contains("byCategory"));

        let stats = statistics(&errors);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_resource.get("db"), Some(&3));
        assert_eq!(stats.most_frequent, Some(RuntimeErrorCategory::NullReference));
    }
}
