//! End-to-end scenarios through the public API: analyze host values,
//! check the emitted CEL, follow the source map back from a runtime
//! failure.

use celforge::{
    classify, AnalysisContext, CelDialect, ClassifierInput, ExpressionAnalyzer, FactoryKind,
    Reference, ReferenceDetector, RuntimeErrorMapper, ShapeAnalyzer, TypeHint, Value,
};

fn reference(id: &str, path: &str) -> Reference {
    Reference::new(id, path).unwrap()
}

#[test]
fn test_scenario_single_schema_ref_status_dialect() {
    let analyzer = ExpressionAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder).with_factory(FactoryKind::Kro);
    let result = analyzer.analyze_expression("schema.spec.name", &mut ctx);

    assert!(result.valid);
    assert_eq!(
        result.expression.as_ref().unwrap().as_str(),
        "schema.spec.name"
    );
    assert_eq!(result.dependencies.len(), 1);
    assert_eq!(result.dependencies[0].resource_id(), celforge::SCHEMA_ID);
    assert_eq!(result.dependencies[0].field_path(), "spec.name");
    assert!(result.requires_conversion);
}

#[test]
fn test_scenario_boolean_coercion_of_numeric_field() {
    let analyzer = ExpressionAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::Conditional);
    let value = Value::Reference(
        reference("deployment", "status.readyReplicas").with_type(TypeHint::Number),
    );
    let result = analyzer.analyze(&value, &mut ctx);

    let cel = result.expression.unwrap();
    assert_eq!(cel.as_str(), "resources.deployment.status.readyReplicas > 0");
    assert_eq!(cel.type_hint(), Some(TypeHint::Boolean));
}

#[test]
fn test_scenario_template_mixing_schema_and_resource() {
    let analyzer = ExpressionAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::TemplateLiteral);
    let text = "http://${schema.spec.name}-service.${resources.namespace.metadata.name}/";
    let result = analyzer.analyze(&Value::from(text), &mut ctx);

    assert_eq!(
        result.expression.as_ref().unwrap().as_str(),
        "\"http://\" + schema.spec.name + \"-service.\" + resources.namespace.metadata.name + \"/\""
    );
    assert_eq!(result.dependencies.len(), 2);
    let roots: Vec<&str> = result
        .dependencies
        .iter()
        .map(|r| r.resource_id())
        .collect();
    assert!(roots.contains(&celforge::SCHEMA_ID));
    assert!(roots.contains(&"namespace"));
}

#[test]
fn test_scenario_readiness_over_conditions_array() {
    let analyzer = ExpressionAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::Readiness);
    let value = Value::Reference(reference("helmRelease", "status.conditions"));
    let result = analyzer.analyze(&value, &mut ctx);

    assert_eq!(
        result.expression.unwrap().as_str(),
        "resources.helmRelease.status.conditions.find(c, c.type == \"Ready\").status == \"True\""
    );
}

#[test]
fn test_scenario_shape_mixed_static_and_dynamic() {
    let shape_analyzer = ShapeAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder).with_resource("deployment");
    let input = Value::object([
        ("ready", Value::Bool(true)),
        (
            "phase",
            Value::Expression(
                "deployment.status.readyReplicas > 0 ? 'Ready' : 'Installing'".into(),
            ),
        ),
        ("url", Value::from("http://example.com")),
    ]);
    let result = shape_analyzer.analyze_shape(&input, &mut ctx);

    assert!(result.requires_conversion);
    assert_eq!(
        result.dependencies,
        vec![reference("deployment", "status.readyReplicas")]
    );
    let shape = result.shape.as_object().unwrap();
    assert_eq!(shape["ready"], Value::Bool(true));
    assert_eq!(shape["url"], Value::from("http://example.com"));
    assert!(matches!(shape["phase"], Value::Cel(_)));
}

#[test]
fn test_reference_purity_property() {
    // Values without references never require conversion; values with at
    // least one always do.
    let analyzer = ExpressionAnalyzer::new();

    let clean = [
        Value::Null,
        Value::Int(7),
        Value::from("static text"),
        Value::object([("a", Value::Array(vec![Value::Bool(false)]))]),
    ];
    for value in &clean {
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        let result = analyzer.analyze(value, &mut ctx);
        assert!(!result.requires_conversion, "value: {:?}", value);
        assert!(result.dependencies.is_empty());
    }

    let dirty = [
        Value::Reference(reference("db", "status.host")),
        Value::object([(
            "nested",
            Value::Array(vec![Value::Reference(reference("svc", "spec.clusterIP"))]),
        )]),
    ];
    for value in &dirty {
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder);
        let result = analyzer.analyze(value, &mut ctx);
        assert!(result.requires_conversion, "value: {:?}", value);
        assert!(!result.dependencies.is_empty());
    }
}

#[test]
fn test_detector_idempotence_property() {
    let detector = ReferenceDetector::default();
    let value = Value::object([
        ("a", Value::Reference(reference("x", "spec.a"))),
        (
            "b",
            Value::Array(vec![
                Value::Reference(reference("y", "spec.b")),
                Value::Reference(reference("x", "spec.a")),
            ]),
        ),
    ]);

    let first = detector.detect(&value);
    let second = detector.detect(&value);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);

    // Re-detecting over the already-harvested references finds nothing new.
    let as_values = Value::Array(first.iter().cloned().map(Value::Reference).collect());
    let third = detector.detect(&as_values);
    assert_eq!(third, first);
}

#[test]
fn test_emission_laws_property() {
    use celforge::emitter::emit_reference;

    let schema = Reference::schema("spec.host").unwrap();
    assert_eq!(
        emit_reference(&schema, CelDialect::StatusBuilder).as_str(),
        "schema.spec.host"
    );

    let resource = reference("web", "spec.host");
    assert_eq!(
        emit_reference(&resource, CelDialect::StatusBuilder).as_str(),
        "resources.web.spec.host"
    );

    let numeric = reference("web", "spec.replicas").with_type(TypeHint::Number);
    assert!(emit_reference(&numeric, CelDialect::Conditional)
        .as_str()
        .ends_with(" > 0"));

    let ready = reference("web", "status.readyReplicas");
    assert!(emit_reference(&ready, CelDialect::Readiness)
        .as_str()
        .ends_with(" > 0"));
}

#[test]
fn test_context_scoring_monotonicity_property() {
    let ctx = AnalysisContext::new(CelDialect::Unknown);

    let readiness_score = |refs: &[Reference]| -> f64 {
        classify(
            &ClassifierInput {
                references: refs,
                ..Default::default()
            },
            &ctx,
        )
        .signals
        .iter()
        .filter(|s| s.dialect == CelDialect::Readiness)
        .map(|s| s.weight)
        .sum()
    };

    let none: Vec<Reference> = vec![];
    let one = vec![reference("a", "status.readyReplicas")];
    let two = vec![
        reference("a", "status.readyReplicas"),
        reference("b", "status.conditions"),
    ];
    let s0 = readiness_score(&none);
    let s1 = readiness_score(&one);
    let s2 = readiness_score(&two);
    assert!(s1 >= s0);
    assert!(s2 >= s1);
}

#[test]
fn test_source_map_round_trip_and_runtime_mapping() {
    // Properties 8 and 9: every emitted fragment maps back to its original;
    // unmapped CEL maps to nothing.
    let analyzer = ExpressionAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::Readiness)
        .with_resource("deployment")
        .with_source_map();

    let source = "deployment.status.readyReplicas > 0";
    let result = analyzer.analyze_expression(source, &mut ctx);
    let cel = result.expression.as_ref().unwrap().as_str().to_string();

    let map = ctx.take_source_map().unwrap();
    let entry = map.lookup_by_cel(&cel).unwrap();
    assert_eq!(entry.original_expression, source);
    assert_eq!(entry.context, CelDialect::Readiness);

    let mapper = RuntimeErrorMapper::new(map);
    let mapped = mapper
        .map_error(&cel, "field 'readyReplicas' not found")
        .unwrap();
    assert_eq!(mapped.original_expression, source);
    assert_eq!(
        mapped.category,
        celforge::RuntimeErrorCategory::FieldNotFound
    );

    assert!(mapper
        .map_error("resources.unmapped.status.x", "boom")
        .is_none());
}

#[test]
fn test_whole_graph_flow() {
    // A small status shape: convert, then pretend one emitted expression
    // failed at runtime and walk it back.
    let shape_analyzer = ShapeAnalyzer::new();
    let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder)
        .with_resource("deployment")
        .with_resource("service")
        .with_source_map();

    let status_shape = Value::object([
        (
            "endpoint",
            Value::from("http://${resources.service.spec.clusterIP}:8080"),
        ),
        (
            "readyReplicas",
            Value::Reference(
                reference("deployment", "status.readyReplicas").with_type(TypeHint::Number),
            ),
        ),
        ("version", Value::from("v1.2.3")),
    ]);

    let result = shape_analyzer.analyze_shape(&status_shape, &mut ctx);
    assert!(result.errors.is_empty());
    assert_eq!(result.dependencies.len(), 2);
    assert_eq!(result.converted_count, 2);

    let map = ctx.take_source_map().unwrap();
    assert_eq!(map.len(), 2);

    let endpoint_cel = "\"http://\" + resources.service.spec.clusterIP + \":8080\"";
    let mapper = RuntimeErrorMapper::new(map);
    let mapped = mapper
        .map_error(endpoint_cel, "value is null: clusterIP")
        .unwrap();
    assert_eq!(
        mapped.original_expression,
        "http://${resources.service.spec.clusterIP}:8080"
    );
    assert_eq!(mapped.resource_id.as_deref(), Some("service"));
}
