use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Named query boundaries used for tracing and profiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
  ResolveComponent,
  Sendable,
  BoundaryEdge,
  DeclarationScan,
}

/// Aggregate statistics for a single query kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QueryStat {
  pub total: u64,
  pub cache_hits: u64,
  pub cache_misses: u64,
  pub total_time_ms: f64,
  pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct QueryStats {
  pub queries: BTreeMap<QueryKind, QueryStat>,
}

#[derive(Debug, Clone, Default)]
struct QueryStatAccumulator {
  total: u64,
  cache_hits: u64,
  cache_misses: u64,
  total_time_ms: f64,
}

/// Thread-safe accumulator shared by the resolver, the sendability analyzer
/// and the boundary pass.
#[derive(Clone, Default)]
pub struct QueryStatsCollector {
  inner: Arc<Mutex<BTreeMap<QueryKind, QueryStatAccumulator>>>,
}

impl QueryStatsCollector {
  pub fn record(&self, kind: QueryKind, cache_hit: bool, duration: Duration) {
    let mut guard = self.inner.lock();
    let entry = guard.entry(kind).or_default();
    entry.total += 1;
    if cache_hit {
      entry.cache_hits += 1;
    } else {
      entry.cache_misses += 1;
    }
    entry.total_time_ms += duration.as_secs_f64() * 1000.0;
  }

  pub fn timer(&self, kind: QueryKind, cache_hit: bool) -> QueryTimer {
    QueryTimer {
      collector: self.clone(),
      kind,
      cache_hit,
      start: Instant::now(),
    }
  }

  pub fn snapshot(&self) -> QueryStats {
    let guard = self.inner.lock();
    let queries = guard
      .iter()
      .map(|(kind, acc)| {
        let stat = QueryStat {
          total: acc.total,
          cache_hits: acc.cache_hits,
          cache_misses: acc.cache_misses,
          total_time_ms: acc.total_time_ms,
          hit_rate: if acc.total == 0 {
            0.0
          } else {
            acc.cache_hits as f64 / acc.total as f64
          },
        };
        (*kind, stat)
      })
      .collect();
    QueryStats { queries }
  }
}

/// Records one query into a collector when finished.
pub struct QueryTimer {
  collector: QueryStatsCollector,
  kind: QueryKind,
  cache_hit: bool,
  start: Instant,
}

impl QueryTimer {
  pub fn finish(self) {
    let duration = self.start.elapsed();
    self.collector.record(self.kind, self.cache_hit, duration);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_computes_hit_rate() {
    let stats = QueryStatsCollector::default();
    stats.record(QueryKind::Sendable, true, Duration::from_millis(1));
    stats.record(QueryKind::Sendable, false, Duration::from_millis(1));
    stats.record(QueryKind::Sendable, true, Duration::from_millis(1));
    stats.timer(QueryKind::BoundaryEdge, false).finish();

    let snapshot = stats.snapshot();
    let sendable = &snapshot.queries[&QueryKind::Sendable];
    assert_eq!(sendable.total, 3);
    assert_eq!(sendable.cache_hits, 2);
    assert!((sendable.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(snapshot.queries[&QueryKind::BoundaryEdge].cache_misses, 1);
    assert!(!snapshot.queries.contains_key(&QueryKind::ResolveComponent));
  }
}
