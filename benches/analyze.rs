use celforge::{AnalysisContext, CacheConfig, CachedAnalyzer, CelDialect, ExpressionAnalyzer};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const EXPRESSIONS: &[&str] = &[
    "schema.spec.name",
    "resources.deployment.status.readyReplicas > 0",
    "deployment.status.readyReplicas > 0 ? 'Ready' : 'Installing'",
    "`http://${schema.spec.name}-service.${resources.namespace.metadata.name}/`",
    "schema.spec.replicas ?? 1",
    "resources.db.status?.host || 'localhost'",
];

fn bench_analyze(c: &mut Criterion) {
    let analyzer = ExpressionAnalyzer::new();

    c.bench_function("analyze_expression_corpus", |b| {
        b.iter(|| {
            for expression in EXPRESSIONS {
                let mut ctx =
                    AnalysisContext::new(CelDialect::StatusBuilder).with_resource("deployment");
                black_box(analyzer.analyze_expression(black_box(expression), &mut ctx));
            }
        })
    });
}

fn bench_cache_hit_path(c: &mut Criterion) {
    let cached = CachedAnalyzer::new(CacheConfig::default());
    // Warm the cache.
    for expression in EXPRESSIONS {
        let mut ctx = AnalysisContext::new(CelDialect::StatusBuilder).with_resource("deployment");
        cached.analyze_expression(expression, &mut ctx);
    }

    c.bench_function("cached_analyze_hit", |b| {
        b.iter(|| {
            for expression in EXPRESSIONS {
                let mut ctx =
                    AnalysisContext::new(CelDialect::StatusBuilder).with_resource("deployment");
                black_box(cached.analyze_expression(black_box(expression), &mut ctx));
            }
        })
    });
}

criterion_group!(benches, bench_analyze, bench_cache_hit_path);
criterion_main!(benches);
