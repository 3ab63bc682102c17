mod common;

use common::*;
use isolation_check::{CallEdge, CheckOptions, Checker, DeclId, DeclarationGraph, EdgeId};
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
  buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
  fn into_inner(self) -> Vec<u8> {
    match Arc::try_unwrap(self.buffer) {
      Ok(buffer) => buffer.into_inner().unwrap(),
      Err(arc) => arc.lock().unwrap().clone(),
    }
  }
}

struct SharedWriterGuard<'a> {
  buffer: &'a Arc<Mutex<Vec<u8>>>,
}

impl<'a> io::Write for SharedWriterGuard<'a> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.buffer.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> MakeWriter<'a> for SharedWriter {
  type Writer = SharedWriterGuard<'a>;

  fn make_writer(&'a self) -> Self::Writer {
    SharedWriterGuard {
      buffer: &self.buffer,
    }
  }
}

fn graph() -> DeclarationGraph {
  DeclarationGraph::builder()
    .decl(global_actor(1, "Main"))
    .decl(class(2, "Box"))
    .decl(func(3, "render").annotated(on_global(1)).asynchronous())
    .decl(func(4, "worker").asynchronous())
    .edge(
      CallEdge::new(EdgeId(0), DeclId(4), DeclId(3))
        .awaited()
        .argument("box", nominal(2)),
    )
    .build()
    .unwrap()
}

fn capture(options: CheckOptions) -> String {
  let writer = SharedWriter::default();
  let subscriber = tracing_subscriber::fmt()
    .with_span_events(FmtSpan::CLOSE)
    .with_max_level(tracing::Level::DEBUG)
    .with_ansi(false)
    .with_writer(writer.clone())
    .finish();
  let _guard = tracing::subscriber::set_default(subscriber);

  let graph = graph();
  let report = Checker::new(&graph, options).unwrap().check();
  assert_eq!(report.violations.len(), 1);

  drop(_guard);
  String::from_utf8(writer.into_inner()).unwrap()
}

#[test]
fn tracing_emits_query_spans() {
  let output = capture(CheckOptions::default());
  for span in [
    "isolation_check.check",
    "isolation_check.resolve_component",
    "isolation_check.sendable",
    "isolation_check.boundary_edge",
    "isolation_check.declaration_scan",
  ] {
    assert!(output.contains(span), "expected {span} span output, got: {output}");
  }
  assert!(
    output.contains("duration_ms"),
    "expected duration_ms field to be recorded"
  );
  assert!(output.contains("isolation check finished"));
}

#[test]
fn stats_are_collected_without_a_subscriber() {
  let graph = graph();
  let options = CheckOptions {
    parallel: true,
    ..CheckOptions::default()
  };
  let report = Checker::new(&graph, options).unwrap().check();
  let kinds: Vec<_> = report.stats.queries.keys().copied().collect();
  assert_eq!(kinds, vec![
    isolation_check::QueryKind::ResolveComponent,
    isolation_check::QueryKind::Sendable,
    isolation_check::QueryKind::BoundaryEdge,
    isolation_check::QueryKind::DeclarationScan,
  ]);
  let edges = &report.stats.queries[&isolation_check::QueryKind::BoundaryEdge];
  assert_eq!(edges.total, 1);
}
