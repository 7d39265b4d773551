//! Memoization for conversions and parsed ASTs.
//!
//! One keyed store for conversion results, a parallel store for ASTs.
//! Three independent bounds govern eviction: entry count, approximate
//! memory, and per-entry TTL. Only successful results are stored; error
//! results always go back to the caller uncached.

use crate::analyzer::{ConversionResult, ExpressionAnalyzer};
use crate::context::{AnalysisContext, CelDialect};
use crate::parser::{parse, Expr, ParseFailure};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tunables for the conversion cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Hard upper bound on stored conversion results.
    pub max_entries: usize,
    /// Approximate byte budget; entries are sized by their string lengths.
    pub max_memory_mb: usize,
    /// Per-entry expiry, measured from insert.
    pub ttl: Duration,
    /// Background sweep period; zero disables the sweeper thread.
    pub cleanup_interval: Duration,
    /// Toggles the parallel AST store.
    pub enable_ast_cache: bool,
    /// Toggles counter maintenance.
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_memory_mb: 50,
            ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::ZERO,
            enable_ast_cache: true,
            enable_metrics: true,
        }
    }
}

/// Canonical cache key. Equal canonical inputs compare equal across
/// process runs by construction; no digest step is involved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    expression: String,
    dialect: CelDialect,
    strict: bool,
    strict_null_checks: bool,
    expected_type: String,
}

impl CacheKey {
    pub fn new(expression: &str, ctx: &AnalysisContext) -> Self {
        Self {
            expression: expression.to_string(),
            dialect: ctx.dialect,
            strict: ctx.strict,
            strict_null_checks: ctx.strict_null_checks,
            expected_type: ctx
                .expected_type
                .map(|hint| hint.as_str().to_string())
                .unwrap_or_default(),
        }
    }

    /// Stable diagnostic rendering of the key.
    pub fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.expression,
            self.dialect.as_str(),
            self.strict,
            self.strict_null_checks,
            self.expected_type
        )
    }
}

struct CacheEntry {
    result: ConversionResult,
    inserted_at: Instant,
    last_access: u64,
    approx_bytes: usize,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    total_requests: u64,
    retrieval_time: Duration,
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: usize,
    access_counter: u64,
    counters: Counters,
}

impl Inner {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_bytes: 0,
            access_counter: 0,
            counters: Counters::default(),
        }
    }

    /// Remove expired entries; returns how many were dropped.
    fn purge_expired(&mut self, ttl: Duration) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.approx_bytes);
            }
        }
        self.counters.expirations += expired.len() as u64;
        expired.len()
    }

    /// Evict least-recently-used entries until both bounds hold; returns
    /// how many were evicted.
    fn evict_to_bounds(&mut self, max_entries: usize, max_bytes: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries || self.total_bytes > max_bytes {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    if let Some(entry) = self.entries.remove(&key) {
                        self.total_bytes = self.total_bytes.saturating_sub(entry.approx_bytes);
                    }
                    evicted += 1;
                }
                None => break,
            }
        }
        self.counters.evictions += evicted as u64;
        evicted
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_requests: u64,
    pub entry_count: usize,
    pub approx_bytes: usize,
    pub retrieval_time_us: u128,
    pub hit_ratio: f64,
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
    pub remaining: usize,
}

struct Sweeper {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

/// The keyed store for conversion results.
pub struct ConversionCache {
    inner: Arc<Mutex<Inner>>,
    config: CacheConfig,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ConversionCache {
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new(Mutex::new(Inner::new()));
        let sweeper = if config.cleanup_interval > Duration::ZERO {
            Some(Self::spawn_sweeper(
                Arc::clone(&inner),
                config.cleanup_interval,
                config.ttl,
            ))
        } else {
            None
        };
        Self {
            inner,
            config,
            sweeper: Mutex::new(sweeper),
        }
    }

    fn spawn_sweeper(inner: Arc<Mutex<Inner>>, interval: Duration, ttl: Duration) -> Sweeper {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let (lock, condvar) = &*stop_for_thread;
            let mut stopped = lock.lock().unwrap();
            while !*stopped {
                let (guard, timeout) = condvar.wait_timeout(stopped, interval).unwrap();
                stopped = guard;
                if *stopped {
                    break;
                }
                if timeout.timed_out() {
                    // Take the cache lock only for the sweep itself so the
                    // sweeper yields to foreground operations.
                    let removed = inner.lock().unwrap().purge_expired(ttl);
                    if removed > 0 {
                        debug!(removed, "cache sweep expired entries");
                    }
                }
            }
        });
        Sweeper { stop, handle }
    }

    fn max_bytes(&self) -> usize {
        self.config.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Look up a stored conversion. Expired entries count as misses.
    pub fn lookup(&self, key: &CacheKey) -> Option<ConversionResult> {
        let started = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        inner.access_counter += 1;
        let sequence = inner.access_counter;

        let expired = inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() >= self.config.ttl);
        let outcome = if expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.approx_bytes);
                inner.counters.expirations += 1;
            }
            None
        } else {
            inner.entries.get_mut(key).map(|entry| {
                entry.last_access = sequence;
                entry.result.clone()
            })
        };

        if self.config.enable_metrics {
            inner.counters.total_requests += 1;
            match outcome {
                Some(_) => inner.counters.hits += 1,
                None => inner.counters.misses += 1,
            }
            inner.counters.retrieval_time += started.elapsed();
        }
        outcome
    }

    /// Store a successful conversion. Error results are never memoized.
    pub fn insert(&self, key: CacheKey, result: ConversionResult) {
        if !result.valid {
            return;
        }
        let approx_bytes = key.canonical().len() + result.approx_size();
        let mut inner = self.inner.lock().unwrap();
        inner.access_counter += 1;
        let sequence = inner.access_counter;
        if let Some(previous) = inner.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                last_access: sequence,
                approx_bytes,
            },
        ) {
            inner.total_bytes = inner.total_bytes.saturating_sub(previous.approx_bytes);
        }
        inner.total_bytes += approx_bytes;
        inner.evict_to_bounds(self.config.max_entries, self.max_bytes());
    }

    /// Lookup, or run the conversion and store it. The conversion runs
    /// outside the lock; concurrent duplicate work is possible and fine.
    pub fn get_or_insert_with(
        &self,
        key: CacheKey,
        convert: impl FnOnce() -> ConversionResult,
    ) -> ConversionResult {
        if let Some(hit) = self.lookup(&key) {
            return hit;
        }
        let result = convert();
        self.insert(key, result.clone());
        result
    }

    /// Drop expired entries and re-apply the bounds; eviction is observable
    /// through the returned counts.
    pub fn cleanup(&self) -> CleanupReport {
        let mut inner = self.inner.lock().unwrap();
        let expired = inner.purge_expired(self.config.ttl);
        let evicted = inner.evict_to_bounds(self.config.max_entries, self.max_bytes());
        CleanupReport {
            expired,
            evicted,
            remaining: inner.entries.len(),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        let inner = self.inner.lock().unwrap();
        let counters = &inner.counters;
        let looked_up = counters.hits + counters.misses;
        CacheMetrics {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            expirations: counters.expirations,
            total_requests: counters.total_requests,
            entry_count: inner.entries.len(),
            approx_bytes: inner.total_bytes,
            retrieval_time_us: counters.retrieval_time.as_micros(),
            hit_ratio: if looked_up == 0 {
                0.0
            } else {
                counters.hits as f64 / looked_up as f64
            },
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Stop the sweeper and release the stored entries. Idempotent; safe
    /// to call once no analyses are in flight for this cache.
    pub fn destroy(&self) {
        if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
            {
                let (lock, condvar) = &*sweeper.stop;
                *lock.lock().unwrap() = true;
                condvar.notify_all();
            }
            let _ = sweeper.handle.join();
        }
        self.clear();
    }
}

impl Drop for ConversionCache {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Parallel store for parsed expression ASTs, keyed by source text.
pub struct AstCache {
    entries: Mutex<HashMap<String, Arc<Expr>>>,
    max_entries: usize,
    hits: Mutex<u64>,
    misses: Mutex<u64>,
}

impl AstCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            hits: Mutex::new(0),
            misses: Mutex::new(0),
        }
    }

    pub fn get_or_parse(&self, source: &str) -> Result<Arc<Expr>, ParseFailure> {
        if let Some(expr) = self.entries.lock().unwrap().get(source) {
            *self.hits.lock().unwrap() += 1;
            return Ok(Arc::clone(expr));
        }
        *self.misses.lock().unwrap() += 1;
        let expr = Arc::new(parse(source)?);
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries {
            // Parsed ASTs are cheap to rebuild; dropping the whole store on
            // overflow keeps this side cache trivial.
            entries.clear();
        }
        entries.insert(source.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    pub fn hit_count(&self) -> u64 {
        *self.hits.lock().unwrap()
    }

    pub fn miss_count(&self) -> u64 {
        *self.misses.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Analyzer wrapped with both caches: the convenient front door for
/// repeated conversions of the same expressions.
pub struct CachedAnalyzer {
    analyzer: ExpressionAnalyzer,
    cache: ConversionCache,
    ast_cache: Option<AstCache>,
}

impl CachedAnalyzer {
    pub fn new(config: CacheConfig) -> Self {
        let ast_cache = config
            .enable_ast_cache
            .then(|| AstCache::new(config.max_entries.max(64)));
        Self {
            analyzer: ExpressionAnalyzer::new(),
            cache: ConversionCache::new(config),
            ast_cache,
        }
    }

    pub fn analyzer(&self) -> &ExpressionAnalyzer {
        &self.analyzer
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    pub fn ast_cache(&self) -> Option<&AstCache> {
        self.ast_cache.as_ref()
    }

    pub fn analyze_expression(&self, source: &str, ctx: &mut AnalysisContext) -> ConversionResult {
        let key = CacheKey::new(source, ctx);
        if let Some(hit) = self.cache.lookup(&key) {
            // Replay the mappings into the caller's source map so cached
            // conversions stay traceable.
            if let Some(ref mut map) = ctx.source_map {
                map.extend(hit.source_map_entries.iter().cloned());
            }
            return hit;
        }
        let result = match self.ast_cache {
            Some(ref ast_cache) => match ast_cache.get_or_parse(source) {
                Ok(expr) => self.analyzer.analyze_parsed(source, &expr, "expression", ctx),
                Err(_) => self.analyzer.analyze_expression(source, ctx),
            },
            None => self.analyzer.analyze_expression(source, ctx),
        };
        self.cache.insert(key, result.clone());
        result
    }
}

impl Default for CachedAnalyzer {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AnalysisContext {
        AnalysisContext::new(CelDialect::StatusBuilder)
    }

    fn key_for(expression: &str) -> CacheKey {
        CacheKey::new(expression, &ctx())
    }

    fn valid_result(cel: &str) -> ConversionResult {
        let analyzer = ExpressionAnalyzer::new();
        let mut context = ctx();
        analyzer.analyze_expression(cel, &mut context)
    }

    #[test]
    fn test_key_stability() {
        let a = CacheKey::new("schema.spec.name", &ctx());
        let b = CacheKey::new("schema.spec.name", &ctx());
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());

        let strict = CacheKey::new("schema.spec.name", &ctx().strict());
        assert_ne!(a, strict);
    }

    #[test]
    fn test_hit_miss_counters() {
        // Scenario F: identical calls hit after the first.
        let cached = CachedAnalyzer::new(CacheConfig::default());
        let mut context = ctx();
        for _ in 0..3 {
            let result = cached.analyze_expression("schema.spec.name", &mut context);
            assert!(result.valid);
        }
        let metrics = cached.cache().metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 2);
        assert!((metrics.hit_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cached_result_is_structurally_equal() {
        let cached = CachedAnalyzer::new(CacheConfig::default());
        let mut context = ctx();
        let first = cached.analyze_expression("schema.spec.replicas > 0", &mut context);
        let second = cached.analyze_expression("schema.spec.replicas > 0", &mut context);
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_results_bypass_cache() {
        let cached = CachedAnalyzer::new(CacheConfig::default());
        let mut context = ctx();
        let result = cached.analyze_expression("schema.spec.name +", &mut context);
        assert!(!result.valid);
        assert_eq!(cached.cache().len(), 0);

        // Every retry recomputes and misses.
        cached.analyze_expression("schema.spec.name +", &mut context);
        let metrics = cached.cache().metrics();
        assert_eq!(metrics.misses, 2);
        assert_eq!(metrics.hits, 0);
    }

    #[test]
    fn test_eviction_respects_entry_bound() {
        let cache = ConversionCache::new(CacheConfig {
            max_entries: 3,
            ..CacheConfig::default()
        });
        let inserted = 10usize;
        for i in 0..inserted {
            let expression = format!("schema.spec.f{}", i);
            cache.insert(key_for(&expression), valid_result(&expression));
        }
        assert!(cache.len() <= 3);
        let metrics = cache.metrics();
        assert!(metrics.evictions >= (inserted - 3) as u64);
    }

    #[test]
    fn test_lru_victim_order() {
        let cache = ConversionCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.insert(key_for("schema.spec.a"), valid_result("schema.spec.a"));
        cache.insert(key_for("schema.spec.b"), valid_result("schema.spec.b"));
        // Touch `a` so `b` becomes the LRU victim.
        assert!(cache.lookup(&key_for("schema.spec.a")).is_some());
        cache.insert(key_for("schema.spec.c"), valid_result("schema.spec.c"));

        assert!(cache.lookup(&key_for("schema.spec.a")).is_some());
        assert!(cache.lookup(&key_for("schema.spec.b")).is_none());
        assert!(cache.lookup(&key_for("schema.spec.c")).is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ConversionCache::new(CacheConfig {
            ttl: Duration::from_millis(20),
            ..CacheConfig::default()
        });
        cache.insert(key_for("schema.spec.a"), valid_result("schema.spec.a"));
        assert!(cache.lookup(&key_for("schema.spec.a")).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.lookup(&key_for("schema.spec.a")).is_none());
        assert!(cache.metrics().expirations >= 1);
    }

    #[test]
    fn test_cleanup_reports_counts() {
        let cache = ConversionCache::new(CacheConfig {
            ttl: Duration::from_millis(10),
            ..CacheConfig::default()
        });
        for i in 0..4 {
            let expression = format!("schema.spec.f{}", i);
            cache.insert(key_for(&expression), valid_result(&expression));
        }
        std::thread::sleep(Duration::from_millis(30));
        let report = cache.cleanup();
        assert_eq!(report.expired, 4);
        assert_eq!(report.remaining, 0);
    }

    #[test]
    fn test_background_sweeper_and_destroy() {
        let cache = ConversionCache::new(CacheConfig {
            ttl: Duration::from_millis(10),
            cleanup_interval: Duration::from_millis(15),
            ..CacheConfig::default()
        });
        cache.insert(key_for("schema.spec.a"), valid_result("schema.spec.a"));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.len(), 0);

        // Destroy is deterministic and idempotent.
        cache.destroy();
        cache.destroy();
    }

    #[test]
    fn test_concurrent_use() {
        let cached = Arc::new(CachedAnalyzer::new(CacheConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let shared = Arc::clone(&cached);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let mut context = AnalysisContext::new(CelDialect::StatusBuilder);
                    let expression = format!("schema.spec.f{}", i % 5);
                    let result = shared.analyze_expression(&expression, &mut context);
                    assert!(result.valid);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let metrics = cached.cache().metrics();
        assert_eq!(metrics.hits + metrics.misses, 200);
        assert_eq!(cached.cache().len(), 5);
    }

    #[test]
    fn test_ast_cache() {
        let ast_cache = AstCache::new(16);
        let first = ast_cache.get_or_parse("schema.spec.name").unwrap();
        let second = ast_cache.get_or_parse("schema.spec.name").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ast_cache.hit_count(), 1);
        assert_eq!(ast_cache.miss_count(), 1);
        assert!(ast_cache.get_or_parse("not valid +").is_err());
    }

    #[test]
    fn test_memory_bound_evicts() {
        let cache = ConversionCache::new(CacheConfig {
            max_entries: 10_000,
            max_memory_mb: 0, // zero budget forces eviction on every insert
            ..CacheConfig::default()
        });
        cache.insert(key_for("schema.spec.a"), valid_result("schema.spec.a"));
        assert_eq!(cache.len(), 0);
        assert!(cache.metrics().evictions >= 1);
    }
}
