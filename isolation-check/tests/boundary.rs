mod common;

use common::*;
use isolation_check::{
  CallEdge, CheckOptions, DeclId, DeclScope, DeclarationGraph, DefaultValue, EdgeId,
  IsolationAnnotation, IsolationDomain, IsolationQuery, ModuleId, ValueKind, Violation,
  ViolationCategory, ViolationSubject,
};
use std::collections::BTreeMap;

const MAIN: u32 = 1;

fn on_edge(report: &[Violation], edge: u32) -> Vec<(ViolationCategory, Option<&str>)> {
  report
    .iter()
    .filter(|violation| violation.subject == ViolationSubject::Edge(EdgeId(edge)))
    .map(|violation| (violation.category, violation.value_name()))
    .collect()
}

#[test]
fn async_nonisolated_callee_needs_a_hop_off_the_actor() {
  let graph = DeclarationGraph::builder()
    .decl(actor(2, "Account"))
    .decl(method(3, "close", 2))
    .decl(func(4, "archive").asynchronous())
    .decl(func(5, "sync_helper"))
    .decl(func(6, "driver").asynchronous())
    .edge(CallEdge::new(EdgeId(0), DeclId(3), DeclId(4)))
    .edge(CallEdge::new(EdgeId(1), DeclId(3), DeclId(4)).awaited())
    .edge(CallEdge::new(EdgeId(2), DeclId(3), DeclId(5)))
    .edge(CallEdge::new(EdgeId(3), DeclId(6), DeclId(4)))
    .build()
    .unwrap();
  let report = check(&graph);
  assert_eq!(on_edge(&report.violations, 0), vec![(
    ViolationCategory::MissingSuspension,
    None
  )]);
  assert!(on_edge(&report.violations, 1).is_empty());
  assert!(on_edge(&report.violations, 2).is_empty());
  assert!(on_edge(&report.violations, 3).is_empty());
  assert_eq!(report.violations[0].from, IsolationDomain::ActorInstance(DeclId(2)));
  assert_eq!(report.violations[0].to, IsolationDomain::NonIsolated);
}

#[test]
fn actor_instances_match_only_through_the_same_binding() {
  let graph = DeclarationGraph::builder()
    .decl(actor(2, "Account"))
    .decl(method(3, "deposit", 2))
    .decl(method(4, "transfer", 2))
    .edge(CallEdge::new(EdgeId(0), DeclId(4), DeclId(3)).on("self"))
    .edge(CallEdge::new(EdgeId(1), DeclId(4), DeclId(3)).on("other"))
    .edge(CallEdge::new(EdgeId(2), DeclId(4), DeclId(3)))
    .edge(CallEdge::new(EdgeId(3), DeclId(4), DeclId(3)).on("other").awaited())
    .build()
    .unwrap();
  let report = check(&graph);
  assert!(on_edge(&report.violations, 0).is_empty());
  assert_eq!(on_edge(&report.violations, 1).len(), 1);
  // Unqualified call: implicit `self`.
  assert!(on_edge(&report.violations, 2).is_empty());
  assert!(on_edge(&report.violations, 3).is_empty());
}

#[test]
fn unqualified_calls_stay_on_the_actor() {
  // actor Account { func transfer() { deposit() } }
  let graph = DeclarationGraph::builder()
    .decl(actor(2, "Account"))
    .decl(method(3, "deposit", 2))
    .decl(method(4, "transfer", 2))
    .decl(
      func(5, "settle").annotated(IsolationAnnotation::IsolatedParam {
        name: "account".into(),
        actor: DeclId(2),
      }),
    )
    .edge(CallEdge::new(EdgeId(0), DeclId(4), DeclId(3)))
    .edge(CallEdge::new(EdgeId(1), DeclId(5), DeclId(3)))
    .edge(CallEdge::new(EdgeId(2), DeclId(5), DeclId(3)).on("self"))
    .build()
    .unwrap();
  let report = check(&graph);
  assert_eq!(report.resolution.domain(DeclId(4)), report.resolution.domain(DeclId(3)));
  assert!(on_edge(&report.violations, 0).is_empty());
  assert!(on_edge(&report.violations, 1).is_empty());
  // The free function is bound to `account`, not `self`.
  assert_eq!(on_edge(&report.violations, 2), vec![(
    ViolationCategory::MissingSuspension,
    None
  )]);
}

#[test]
fn spawned_tasks_check_their_captures() {
  let graph = DeclarationGraph::builder()
    .decl(class(2, "Buffer"))
    .decl(actor(3, "Pipeline"))
    .decl(method(4, "flush", 3))
    .decl(closure(5, 4, false))
    .decl(closure(6, 4, true))
    .edge(
      CallEdge::new(EdgeId(0), DeclId(4), DeclId(5))
        .spawning()
        .capture("buffer", nominal(2)),
    )
    .edge(
      CallEdge::new(EdgeId(1), DeclId(4), DeclId(6))
        .spawning()
        .capture("buffer", nominal(2)),
    )
    .build()
    .unwrap();
  let report = check(&graph);
  assert_eq!(on_edge(&report.violations, 0), vec![(
    ViolationCategory::ConcurrentAccess,
    Some("buffer")
  )]);
  assert_eq!(
    report.violations[0].value.as_ref().map(|value| value.kind),
    Some(ValueKind::Capture)
  );
  // The inheriting task stays on the same actor.
  assert!(on_edge(&report.violations, 1).is_empty());
}

#[test]
fn detached_tasks_from_nonisolated_code_check_their_captures() {
  let graph = DeclarationGraph::builder()
    .decl(class(2, "Buffer"))
    .decl(func(4, "flush"))
    .decl(closure(5, 4, false))
    .decl(closure(6, 4, true))
    .edge(
      CallEdge::new(EdgeId(0), DeclId(4), DeclId(5))
        .spawning()
        .capture("buffer", nominal(2))
        .capture("count", int()),
    )
    .edge(
      CallEdge::new(EdgeId(1), DeclId(4), DeclId(6))
        .spawning()
        .capture("buffer", nominal(2)),
    )
    .edge(CallEdge::new(EdgeId(2), DeclId(4), DeclId(5)).spawning())
    .build()
    .unwrap();
  let report = check(&graph);
  assert_eq!(report.resolution.domain(DeclId(4)), IsolationDomain::NonIsolated);
  assert_eq!(on_edge(&report.violations, 0), vec![(
    ViolationCategory::ConcurrentAccess,
    Some("buffer")
  )]);
  assert_eq!(on_edge(&report.violations, 1), vec![(
    ViolationCategory::ConcurrentAccess,
    Some("buffer")
  )]);
  // Nothing captured, nothing to report; spawning never needs an await.
  assert!(on_edge(&report.violations, 2).is_empty());
}

#[test]
fn results_and_property_reads_flow_back() {
  let graph = DeclarationGraph::builder()
    .decl(global_actor(MAIN, "Main"))
    .decl(class(2, "Snapshot"))
    .decl(func(3, "capture").annotated(on_global(MAIN)).asynchronous())
    .decl(property(4, "latest", nominal(2)).annotated(on_global(MAIN)))
    .decl(func(5, "worker").asynchronous())
    .edge(
      CallEdge::new(EdgeId(0), DeclId(5), DeclId(3))
        .awaited()
        .returning(nominal(2)),
    )
    .edge(CallEdge::new(EdgeId(1), DeclId(5), DeclId(4)).awaited())
    .build()
    .unwrap();
  let report = check(&graph);
  assert_eq!(on_edge(&report.violations, 0), vec![(
    ViolationCategory::ConcurrentAccess,
    Some("capture")
  )]);
  assert_eq!(on_edge(&report.violations, 1), vec![(
    ViolationCategory::ConcurrentAccess,
    Some("latest")
  )]);
  assert!(report
    .violations
    .iter()
    .all(|violation| violation.value.as_ref().unwrap().kind == ValueKind::Result));
}

#[test]
fn use_site_module_decides_implicit_value_sendability() {
  let graph = DeclarationGraph::builder()
    .decl(global_actor(MAIN, "Main"))
    .decl(structure(2, "Coordinates"))
    .decl(field(3, "lat", 2, int()))
    .decl(func(4, "plot").annotated(on_global(MAIN)).asynchronous())
    .decl(func(5, "local_caller").asynchronous())
    .decl(func(6, "remote_caller").asynchronous())
    .edge(
      CallEdge::new(EdgeId(0), DeclId(5), DeclId(4))
        .awaited()
        .argument("at", nominal(2)),
    )
    .edge(
      CallEdge::new(EdgeId(1), DeclId(6), DeclId(4))
        .awaited()
        .argument("at", nominal(2)),
    )
    .build()
    .unwrap();
  let options = CheckOptions {
    module_boundary: BTreeMap::from([(DeclId(6), ModuleId(3))]),
    ..CheckOptions::default()
  };
  let report = check_with(&graph, options);
  assert!(on_edge(&report.violations, 0).is_empty());
  assert_eq!(on_edge(&report.violations, 1), vec![(
    ViolationCategory::ConcurrentAccess,
    Some("at")
  )]);
}

#[test]
fn isolated_witness_of_nonisolated_requirement() {
  let graph = DeclarationGraph::builder()
    .decl(global_actor(MAIN, "Main"))
    .decl(protocol(2, "Refreshable"))
    .decl(method(3, "refresh", 2))
    .decl(method(4, "reload", 2).asynchronous())
    .decl(
      class(5, "Screen")
        .annotated(on_global(MAIN))
        .conforming_to(DeclId(2), DeclScope::Primary),
    )
    .decl(method(6, "refresh", 5).satisfying(DeclId(3)))
    .decl(method(7, "reload", 5).satisfying(DeclId(4)))
    .build()
    .unwrap();
  let report = check(&graph);
  let mismatches: Vec<_> = report
    .violations_of(ViolationCategory::ContractMismatch)
    .map(|violation| (violation.decl, violation.related))
    .collect();
  // The async requirement already implies a hop.
  assert_eq!(mismatches, vec![(DeclId(6), Some(DeclId(3)))]);
  let violation = report
    .violations_of(ViolationCategory::ContractMismatch)
    .next()
    .unwrap();
  assert_eq!(violation.from, IsolationDomain::NonIsolated);
  assert_eq!(violation.to, IsolationDomain::GlobalActor(DeclId(MAIN)));
}

#[test]
fn contract_exemptions() {
  let graph = DeclarationGraph::builder()
    .decl(global_actor(MAIN, "Main"))
    // Only actors may conform.
    .decl(protocol(2, "Journal").actor_only())
    .decl(method(3, "append", 2))
    .decl(actor(4, "FileJournal").conforming_to(DeclId(2), DeclScope::Primary))
    .decl(method(5, "append", 4).satisfying(DeclId(3)))
    // Supertype isolated to the same actor as the override.
    .decl(class(6, "Base").annotated(on_global(MAIN)))
    .decl(method(7, "layout", 6).annotated(IsolationAnnotation::Nonisolated))
    .decl(class(8, "Derived").inheriting_from(DeclId(6)))
    .decl(method(9, "layout", 8).overriding(DeclId(7)))
    // Plain override with a different actor.
    .decl(class(10, "Plain"))
    .decl(method(11, "tick", 10))
    .decl(class(12, "Special").inheriting_from(DeclId(10)))
    .decl(method(13, "tick", 12).overriding(DeclId(11)).annotated(on_global(MAIN)))
    .build()
    .unwrap();
  let report = check(&graph);
  let mismatches: Vec<_> = report
    .violations_of(ViolationCategory::ContractMismatch)
    .map(|violation| violation.decl)
    .collect();
  assert_eq!(mismatches, vec![DeclId(13)]);
}

#[test]
fn defaults_evaluated_outside_the_actor() {
  let graph = DeclarationGraph::builder()
    .decl(global_actor(MAIN, "Main"))
    .decl(func(2, "current_theme").annotated(on_global(MAIN)))
    .decl(func(3, "fallback"))
    .decl(structure(4, "Settings"))
    .decl(
      field(5, "theme", 4, int()).with_default(DefaultValue {
        references: vec![DeclId(2), DeclId(3)],
        span: None,
      }),
    )
    .decl(structure(6, "MainSettings"))
    .decl(method(7, "init", 6).initializer().annotated(on_global(MAIN)))
    .decl(
      field(8, "theme", 6, int()).with_default(DefaultValue {
        references: vec![DeclId(2)],
        span: None,
      }),
    )
    .decl(class(9, "Panel").annotated(on_global(MAIN)))
    .decl(
      field(10, "theme", 9, int()).with_default(DefaultValue {
        references: vec![DeclId(2)],
        span: None,
      }),
    )
    .build()
    .unwrap();
  let report = check(&graph);
  let defaults: Vec<_> = report
    .violations_of(ViolationCategory::UnsafeIsolatedDefault)
    .map(|violation| (violation.decl, violation.related, violation.from))
    .collect();
  assert_eq!(defaults, vec![(
    DeclId(5),
    Some(DeclId(2)),
    IsolationDomain::NonIsolated
  )]);
}

#[test]
fn nonisolated_actor_storage_must_be_sendable() {
  let graph = DeclarationGraph::builder()
    .decl(class(2, "Log"))
    .decl(actor(3, "Service"))
    .decl(
      field(4, "log", 3, nominal(2))
        .mutable()
        .annotated(IsolationAnnotation::Nonisolated),
    )
    .decl(
      field(5, "hits", 3, int())
        .mutable()
        .annotated(IsolationAnnotation::Nonisolated),
    )
    .decl(field(6, "name", 3, nominal(2)).annotated(IsolationAnnotation::Nonisolated))
    .build()
    .unwrap();
  let report = check(&graph);
  let flagged: Vec<_> = report
    .violations_of(ViolationCategory::UnsafeSharedMutable)
    .map(|violation| violation.decl)
    .collect();
  assert_eq!(flagged, vec![DeclId(4)]);
}

#[test]
fn severity_follows_the_mode() {
  let graph = DeclarationGraph::builder()
    .decl(class(2, "Cache"))
    .decl(property(3, "shared", nominal(2)).mutable())
    .build()
    .unwrap();
  let report = check_with(
    &graph,
    CheckOptions::from_json(r#"{ "mode": "warn" }"#).unwrap(),
  );
  assert_eq!(report.violations[0].severity, diagnostics::Severity::Warning);
  let report = check(&graph);
  assert_eq!(report.violations[0].severity, diagnostics::Severity::Error);
}
