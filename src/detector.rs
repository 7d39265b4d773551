//! Reference detection over arbitrary nested values.
//!
//! Walks a value breadth-first with an explicit work queue and an
//! identity-based visited set, harvesting every embedded [`Reference`]
//! without descending into the references themselves.

use crate::reference::Reference;
use crate::value::Value;
use std::collections::{HashSet, VecDeque};
use tracing::warn;

/// Depth at which full expansion stops.
pub const MAX_DEPTH: usize = 50;

/// Beyond `max_depth`, only containers that might hold a reference are
/// enqueued, up to this many additional levels.
pub const RELAXED_DEPTH_MARGIN: usize = 25;

/// Hard ceiling on visited nodes. A walk that blows through this is treated
/// as a traversal failure: empty result plus a warning, never a panic.
const NODE_BUDGET: usize = 100_000;

/// References split by root: schema-rooted versus resource-rooted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorizedReferences {
    pub schema: Vec<Reference>,
    pub resource: Vec<Reference>,
}

#[derive(Debug, Clone)]
pub struct ReferenceDetector {
    max_depth: usize,
}

impl Default for ReferenceDetector {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
        }
    }
}

impl ReferenceDetector {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Harvest every reference embedded in `value`, deduplicated by
    /// identity, in deterministic document order.
    pub fn detect(&self, value: &Value) -> Vec<Reference> {
        let mut found = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut visited: HashSet<*const Value> = HashSet::new();
        let mut queue: VecDeque<(&Value, usize)> = VecDeque::new();
        queue.push_back((value, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if !visited.insert(node as *const Value) {
                continue;
            }
            if visited.len() > NODE_BUDGET {
                warn!(
                    nodes = visited.len(),
                    "reference detection aborted: value graph exceeds node budget"
                );
                return Vec::new();
            }
            match node {
                Value::Reference(reference) => {
                    // Harvest without descending into the reference itself.
                    let key = (
                        reference.resource_id().to_string(),
                        reference.field_path().to_string(),
                    );
                    if seen.insert(key) {
                        found.push(reference.clone());
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        self.enqueue(&mut queue, item, depth + 1);
                    }
                }
                Value::Object(map) => {
                    for child in map.values() {
                        self.enqueue(&mut queue, child, depth + 1);
                    }
                }
                // Scalars, CEL values and expression strings carry no
                // embedded references of their own.
                _ => {}
            }
        }

        found
    }

    fn enqueue<'a>(&self, queue: &mut VecDeque<(&'a Value, usize)>, child: &'a Value, depth: usize) {
        if depth <= self.max_depth {
            queue.push_back((child, depth));
        } else if depth <= self.max_depth + RELAXED_DEPTH_MARGIN && might_contain_reference(child) {
            queue.push_back((child, depth));
        }
        // Past the relaxed bound the subtree is dropped.
    }

    /// Short-circuiting variant: stops at the first reference found.
    pub fn contains(&self, value: &Value) -> bool {
        let mut visited: HashSet<*const Value> = HashSet::new();
        let mut queue: VecDeque<(&Value, usize)> = VecDeque::new();
        queue.push_back((value, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if !visited.insert(node as *const Value) {
                continue;
            }
            if visited.len() > NODE_BUDGET {
                warn!("reference probe aborted: value graph exceeds node budget");
                return false;
            }
            match node {
                Value::Reference(_) => return true,
                Value::Array(items) => {
                    for item in items {
                        self.enqueue(&mut queue, item, depth + 1);
                    }
                }
                Value::Object(map) => {
                    for child in map.values() {
                        self.enqueue(&mut queue, child, depth + 1);
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// Split references into schema-rooted and resource-rooted groups.
    pub fn categorize(&self, references: &[Reference]) -> CategorizedReferences {
        let mut categorized = CategorizedReferences::default();
        for reference in references {
            if reference.is_schema() {
                categorized.schema.push(reference.clone());
            } else {
                categorized.resource.push(reference.clone());
            }
        }
        categorized
    }
}

/// Is `value` itself a reference?
pub fn is_reference(value: &Value) -> bool {
    matches!(value, Value::Reference(_))
}

/// Cheap heuristic used past the full-expansion depth: any container might
/// still hold a reference; scalars cannot. Errs on the side of traversing.
fn might_contain_reference(value: &Value) -> bool {
    matches!(
        value,
        Value::Array(_) | Value::Object(_) | Value::Reference(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::SCHEMA_ID;

    fn reference(id: &str, path: &str) -> Reference {
        Reference::new(id, path).unwrap()
    }

    fn deep_nest(mut leaf: Value, levels: usize) -> Value {
        for _ in 0..levels {
            leaf = Value::object([("inner", leaf)]);
        }
        leaf
    }

    #[test]
    fn test_detect_in_nested_structure() {
        let value = Value::object([
            ("name", Value::from("api")),
            (
                "env",
                Value::Array(vec![
                    Value::Reference(reference("config", "data.url")),
                    Value::from("static"),
                ]),
            ),
            (
                "status",
                Value::object([(
                    "replicas",
                    Value::Reference(reference("deployment", "status.readyReplicas")),
                )]),
            ),
        ]);

        let detector = ReferenceDetector::default();
        let found = detector.detect(&value);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&reference("config", "data.url")));
        assert!(found.contains(&reference("deployment", "status.readyReplicas")));
    }

    #[test]
    fn test_detect_deduplicates() {
        let duplicate = reference("db", "status.host");
        let value = Value::Array(vec![
            Value::Reference(duplicate.clone()),
            Value::Reference(duplicate.clone()),
            Value::object([("again", Value::Reference(duplicate.clone()))]),
        ]);

        let found = ReferenceDetector::default().detect(&value);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_detect_is_deterministic_and_idempotent() {
        let value = Value::Array(vec![
            Value::Reference(reference("a", "x")),
            Value::Reference(reference("b", "y")),
            Value::Reference(reference("c", "z")),
        ]);
        let detector = ReferenceDetector::default();
        let first = detector.detect(&value);
        let second = detector.detect(&value);
        assert_eq!(first, second);
        assert_eq!(first[0].resource_id(), "a");
        assert_eq!(first[2].resource_id(), "c");
    }

    #[test]
    fn test_no_references() {
        let value = Value::object([
            ("port", Value::Int(8080)),
            ("hosts", Value::Array(vec![Value::from("a"), Value::from("b")])),
        ]);
        let detector = ReferenceDetector::default();
        assert!(detector.detect(&value).is_empty());
        assert!(!detector.contains(&value));
    }

    #[test]
    fn test_contains_short_circuits() {
        let value = Value::Array(vec![
            Value::Reference(reference("first", "status.ready")),
            deep_nest(Value::Null, 40),
        ]);
        assert!(ReferenceDetector::default().contains(&value));
    }

    #[test]
    fn test_depth_bound_drops_deep_scalars_keeps_containers() {
        // A reference buried below max_depth but within the relaxed margin
        // is still found because containers keep being enqueued.
        let detector = ReferenceDetector::with_max_depth(5);
        let buried = deep_nest(
            Value::Reference(reference("deep", "status.ready")),
            5 + RELAXED_DEPTH_MARGIN - 1,
        );
        assert_eq!(detector.detect(&buried).len(), 1);

        // Past the relaxed bound the subtree is dropped entirely.
        let too_deep = deep_nest(
            Value::Reference(reference("lost", "status.ready")),
            5 + RELAXED_DEPTH_MARGIN + 5,
        );
        assert!(detector.detect(&too_deep).is_empty());
    }

    #[test]
    fn test_categorize() {
        let refs = vec![
            Reference::schema("spec.name").unwrap(),
            reference("deployment", "status.readyReplicas"),
        ];
        let categorized = ReferenceDetector::default().categorize(&refs);
        assert_eq!(categorized.schema.len(), 1);
        assert_eq!(categorized.resource.len(), 1);
        assert_eq!(categorized.schema[0].resource_id(), SCHEMA_ID);
    }

    #[test]
    fn test_is_reference() {
        assert!(is_reference(&Value::Reference(reference("a", "b"))));
        assert!(!is_reference(&Value::from("resources.a.b")));
    }
}
