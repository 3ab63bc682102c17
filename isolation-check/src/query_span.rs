use crate::profile::{QueryKind, QueryStatsCollector, QueryTimer};
use std::time::Instant;

macro_rules! query_span {
  ($name:literal, $subject:expr, $cache_hit:expr) => {
    tracing::debug_span!(
      $name,
      subject = $subject,
      cache_hit = $cache_hit,
      outcome = tracing::field::Empty,
      duration_ms = tracing::field::Empty,
    )
  };
}

pub(crate) use query_span;

/// Structured span around a query boundary. When tracing is disabled and no
/// collector is attached this is a no-op.
pub(crate) struct QuerySpan {
  span: tracing::Span,
  start: Instant,
  span_enabled: bool,
  timer: Option<QueryTimer>,
}

impl QuerySpan {
  pub(crate) fn enter(
    kind: QueryKind,
    span: tracing::Span,
    cache_hit: bool,
    stats: Option<&QueryStatsCollector>,
  ) -> Option<QuerySpan> {
    let span_enabled = !span.is_disabled();
    if !span_enabled && stats.is_none() {
      return None;
    }
    let timer = stats.map(|stats| stats.timer(kind, cache_hit));
    if span_enabled {
      let _guard = span.enter();
    }
    Some(QuerySpan {
      span,
      start: Instant::now(),
      span_enabled,
      timer,
    })
  }

  pub(crate) fn finish(self, outcome: &str) {
    if let Some(timer) = self.timer {
      timer.finish();
    }
    if self.span_enabled {
      self.span.record("outcome", outcome);
      self
        .span
        .record("duration_ms", self.start.elapsed().as_secs_f64() * 1000.0);
    }
  }
}
