//! Boundary analysis over call edges plus the declaration-level scans.
//!
//! A call edge crosses an isolation boundary when caller and callee run in
//! different domains. Two actor-instance domains of the same actor type are
//! the same domain only when the call site binds the callee to the caller's
//! own actor value (`self`, or the caller's `isolated` parameter). A call
//! without an explicit receiver is bound to that value implicitly. A spawned
//! detached task always crosses: it runs concurrently with its creator.

use crate::domain::IsolationDomain;
use crate::graph::{
  CallEdge, DeclId, DeclKind, Declaration, DeclarationGraph, EdgeId, EdgeKind, TypeKind, TypeRef,
  ValueKind,
};
use crate::options::CheckOptions;
use crate::profile::{QueryKind, QueryStatsCollector};
use crate::query_span::{query_span, QuerySpan};
use crate::resolve::IsolationQuery;
use crate::sendable::{AuditReason, AuditRecord, Sendability, SendabilityAnalyzer};
use diagnostics::{Severity, Span};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Violation taxonomy; the host filters and suppresses per category.
#[derive(
  Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
  /// A non-Sendable value crossing a boundary.
  ConcurrentAccess,
  UnsafeSharedMutable,
  /// Isolated witness of a non-isolated requirement or overridden member.
  ContractMismatch,
  /// Boundary crossed by a synchronous call.
  MissingSuspension,
  UnsafeIsolatedDefault,
}

impl ViolationCategory {
  pub const ALL: [ViolationCategory; 5] = [
    ViolationCategory::ConcurrentAccess,
    ViolationCategory::UnsafeSharedMutable,
    ViolationCategory::ContractMismatch,
    ViolationCategory::MissingSuspension,
    ViolationCategory::UnsafeIsolatedDefault,
  ];

  pub const fn number(self) -> u8 {
    match self {
      ViolationCategory::ConcurrentAccess => 1,
      ViolationCategory::UnsafeSharedMutable => 2,
      ViolationCategory::ContractMismatch => 3,
      ViolationCategory::MissingSuspension => 4,
      ViolationCategory::UnsafeIsolatedDefault => 5,
    }
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      ViolationCategory::ConcurrentAccess => "concurrent access",
      ViolationCategory::UnsafeSharedMutable => "unsafe shared mutable declaration",
      ViolationCategory::ContractMismatch => "isolation contract mismatch",
      ViolationCategory::MissingSuspension => "missing suspension",
      ViolationCategory::UnsafeIsolatedDefault => "unsafe isolated default",
    }
  }
}

impl fmt::Display for ViolationCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Declarations sort before call edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSubject {
  Decl(DeclId),
  Edge(EdgeId),
}

/// The value a category 1 violation is about.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueRef {
  pub kind: ValueKind,
  pub name: String,
  pub ty: TypeRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
  pub category: ViolationCategory,
  pub subject: ViolationSubject,
  /// Offending declaration; the caller for call edges.
  pub decl: DeclId,
  /// Callee, requirement, overridden member or referenced declaration.
  pub related: Option<DeclId>,
  pub value: Option<ValueRef>,
  pub from: IsolationDomain,
  pub to: IsolationDomain,
  pub span: Option<Span>,
  pub severity: Severity,
}

impl Violation {
  pub fn value_name(&self) -> Option<&str> {
    self.value.as_ref().map(|value| value.name.as_str())
  }
}

/// Subject, then category, then value name.
pub fn sort_violations(violations: &mut [Violation]) {
  violations.sort_by(|a, b| {
    a.subject
      .cmp(&b.subject)
      .then(a.category.cmp(&b.category))
      .then_with(|| a.value_name().cmp(&b.value_name()))
      .then(a.related.cmp(&b.related))
  });
}

pub struct BoundaryAnalyzer<'a, Q> {
  graph: &'a DeclarationGraph,
  options: &'a CheckOptions,
  isolation: &'a Q,
  sendability: &'a SendabilityAnalyzer<'a, Q>,
  stats: Option<QueryStatsCollector>,
}

impl<'a, Q: IsolationQuery> BoundaryAnalyzer<'a, Q> {
  pub fn new(
    graph: &'a DeclarationGraph,
    options: &'a CheckOptions,
    isolation: &'a Q,
    sendability: &'a SendabilityAnalyzer<'a, Q>,
  ) -> Self {
    Self {
      graph,
      options,
      isolation,
      sendability,
      stats: None,
    }
  }

  pub fn with_stats(mut self, stats: QueryStatsCollector) -> Self {
    self.stats = Some(stats);
    self
  }

  fn severity(&self) -> Severity {
    self.options.mode.severity()
  }

  /// Every violation in the graph, sorted.
  pub fn analyze(&self) -> Vec<Violation> {
    let mut violations = self.scan_declarations();
    for edge in self.graph.edges() {
      violations.extend(self.analyze_edge(edge));
    }
    sort_violations(&mut violations);
    violations
  }

  /// Declaration-level checks that do not depend on any call edge.
  pub fn scan_declarations(&self) -> Vec<Violation> {
    let declarations = self.graph.declarations().count() as u64;
    let span = QuerySpan::enter(
      QueryKind::DeclarationScan,
      query_span!("isolation_check.declaration_scan", declarations, false),
      false,
      self.stats.as_ref(),
    );
    let mut violations = self.scan_shared_mutable();
    violations.extend(self.check_contracts());
    violations.extend(self.check_defaults());
    if let Some(span) = span {
      span.finish(if violations.is_empty() { "clean" } else { "violations" });
    }
    violations
  }

  pub fn analyze_edge(&self, edge: &CallEdge) -> Vec<Violation> {
    let span = QuerySpan::enter(
      QueryKind::BoundaryEdge,
      query_span!("isolation_check.boundary_edge", edge.id.0, false),
      false,
      self.stats.as_ref(),
    );
    let violations = self.edge_violations(edge);
    if let Some(span) = span {
      span.finish(if violations.is_empty() { "clean" } else { "violations" });
    }
    violations
  }

  fn edge_violations(&self, edge: &CallEdge) -> Vec<Violation> {
    let from = self.isolation.domain(edge.caller);
    let to = self.isolation.domain(edge.callee);
    if !self.crosses(edge, from, to) {
      return Vec::new();
    }

    let mut violations = Vec::new();
    let violation = |category, value| Violation {
      category,
      subject: ViolationSubject::Edge(edge.id),
      decl: edge.caller,
      related: Some(edge.callee),
      value,
      from,
      to,
      span: edge.span.or_else(|| self.graph.span_of(edge.caller)),
      severity: self.severity(),
    };
    if !edge.is_asynchronous() {
      violations.push(violation(ViolationCategory::MissingSuspension, None));
    }

    let use_site = self.options.module_of(edge.caller);
    for value in self.transferred(edge) {
      match self.sendability.is_sendable_from(&value.ty, use_site) {
        Sendability::Sendable => {}
        Sendability::NotSendable => {
          violations.push(violation(ViolationCategory::ConcurrentAccess, Some(value)));
        }
        Sendability::UncheckedSendable => {
          for asserted in self.sendability.unchecked_assertions(&value.ty) {
            self.sendability.record_audit(AuditRecord {
              asserted,
              reason: AuditReason::Transfer {
                edge: edge.id,
                value: value.kind,
                name: value.name.clone(),
              },
            });
          }
        }
      }
    }
    violations
  }

  /// Whether `edge` moves execution into a different domain.
  fn crosses(&self, edge: &CallEdge, from: IsolationDomain, to: IsolationDomain) -> bool {
    match to {
      IsolationDomain::NonIsolated => {
        // A detached task runs concurrently with its creator, whatever the
        // creator's isolation.
        if edge.kind == EdgeKind::Spawn {
          return true;
        }
        // A synchronous non-isolated callee runs on the caller's executor; an
        // async one runs without any isolation.
        let is_async = self.graph.decl(edge.callee).is_some_and(|callee| callee.is_async);
        is_async && from.is_isolated()
      }
      IsolationDomain::GlobalActor(_) => from != to,
      IsolationDomain::ActorInstance(_) => {
        if from != to {
          return true;
        }
        let caller_binding = self.binding(edge.caller);
        let callee_binding = match self.graph.decl(edge.callee) {
          Some(callee) if matches!(callee.kind, DeclKind::Closure { .. }) => {
            self.binding(edge.callee)
          }
          // Unqualified calls go through the caller's own actor value.
          _ => edge.receiver.as_deref().or(caller_binding),
        };
        match (caller_binding, callee_binding) {
          (Some(caller), Some(callee)) => caller != callee,
          _ => true,
        }
      }
    }
  }

  /// Name of the actor value a declaration's body is isolated through.
  fn binding(&self, decl: DeclId) -> Option<&'a str> {
    let mut current = self.graph.decl(decl)?;
    while let DeclKind::Closure {
      inherits_isolation: true,
    } = current.kind
    {
      current = self.graph.decl(current.enclosing?)?;
    }
    Some(current.isolated_param().unwrap_or("self"))
  }

  /// Arguments, captures and the result, in that order.
  fn transferred(&self, edge: &CallEdge) -> Vec<ValueRef> {
    let mut values: Vec<ValueRef> = edge
      .arguments
      .iter()
      .map(|arg| (ValueKind::Argument, arg))
      .chain(edge.captures.iter().map(|cap| (ValueKind::Capture, cap)))
      .map(|(kind, transfer)| ValueRef {
        kind,
        name: transfer.name.clone(),
        ty: transfer.ty.clone(),
      })
      .collect();
    let result = edge.result.clone().or_else(|| {
      // Reading a stored property hands its value back to the caller.
      self
        .graph
        .decl(edge.callee)
        .filter(|callee| callee.kind == DeclKind::StoredProperty)
        .and_then(|callee| callee.ty.clone())
    });
    if let Some(ty) = result {
      values.push(ValueRef {
        kind: ValueKind::Result,
        name: self.graph.name_of(edge.callee).to_string(),
        ty,
      });
    }
    values
  }

  /// Category 2: global and static variables with neither isolation nor a
  /// Sendable type, and non-isolated mutable storage of isolated types.
  pub fn scan_shared_mutable(&self) -> Vec<Violation> {
    let mut violations = Vec::new();
    for decl in self.graph.declarations() {
      if decl.kind != DeclKind::StoredProperty || !decl.is_mutable {
        continue;
      }
      let domain = self.isolation.domain(decl.id);
      if domain.is_isolated() {
        continue;
      }
      let global = decl.is_top_level() || decl.is_static;
      if !global && !self.is_isolated_storage(decl) {
        continue;
      }
      if decl.is_nonisolated_unsafe() {
        self.sendability.record_audit(AuditRecord {
          asserted: decl.id,
          reason: AuditReason::NonisolatedUnsafe { decl: decl.id },
        });
        continue;
      }
      let Some(ty) = &decl.ty else {
        continue;
      };
      match self.sendability.is_sendable_from(ty, self.options.module_of(decl.id)) {
        Sendability::Sendable => {}
        Sendability::UncheckedSendable => {
          for asserted in self.sendability.unchecked_assertions(ty) {
            self.sendability.record_audit(AuditRecord {
              asserted,
              reason: AuditReason::SharedMutable { decl: decl.id },
            });
          }
        }
        Sendability::NotSendable => violations.push(Violation {
          category: ViolationCategory::UnsafeSharedMutable,
          subject: ViolationSubject::Decl(decl.id),
          decl: decl.id,
          related: None,
          value: None,
          from: domain,
          to: domain,
          span: decl.span,
          severity: self.severity(),
        }),
      }
    }
    violations
  }

  /// Instance storage of an actor or global-actor type.
  fn is_isolated_storage(&self, decl: &Declaration) -> bool {
    self.graph.enclosing_type(decl).is_some_and(|owner| {
      owner.type_kind() == Some(TypeKind::Actor)
        || self.isolation.domain(owner.id).global_actor().is_some()
    })
  }

  /// Category 3: isolated witnesses of non-isolated requirements and
  /// isolated overrides of non-isolated members.
  pub fn check_contracts(&self) -> Vec<Violation> {
    let mut violations = Vec::new();
    for decl in self.graph.declarations() {
      if decl.satisfies.is_empty() && decl.overrides.is_empty() {
        continue;
      }
      let witness = self.isolation.domain(decl.id);
      if !witness.is_isolated() {
        continue;
      }
      for target in decl.satisfies.iter().chain(decl.overrides.iter()) {
        let Some(target_decl) = self.graph.decl(*target) else {
          continue;
        };
        let expected = self.isolation.domain(*target);
        if expected == witness || self.exempt(target_decl, witness) {
          continue;
        }
        violations.push(Violation {
          category: ViolationCategory::ContractMismatch,
          subject: ViolationSubject::Decl(decl.id),
          decl: decl.id,
          related: Some(*target),
          value: None,
          from: expected,
          to: witness,
          span: decl.span,
          severity: self.severity(),
        });
      }
    }
    violations
  }

  fn exempt(&self, target: &Declaration, witness: IsolationDomain) -> bool {
    // Callers of an async requirement already hop to the witness.
    if target.is_async {
      return true;
    }
    let Some(container) = target.enclosing.and_then(|id| self.graph.decl(id)) else {
      return false;
    };
    if container.actor_constrained && matches!(witness, IsolationDomain::ActorInstance(_)) {
      return true;
    }
    self.isolation.domain(container.id) == witness
  }

  /// Category 5: default values of stored properties that need isolated
  /// declarations but are evaluated by an initializer running elsewhere.
  pub fn check_defaults(&self) -> Vec<Violation> {
    let mut violations = Vec::new();
    for decl in self.graph.declarations() {
      if decl.kind != DeclKind::StoredProperty || decl.is_static {
        continue;
      }
      let (Some(default), Some(owner)) = (&decl.default_value, self.graph.enclosing_type(decl))
      else {
        continue;
      };
      let contexts = self.init_contexts(owner);
      for reference in &default.references {
        let needed = self.isolation.domain(*reference);
        if !needed.is_isolated() {
          continue;
        }
        let Some(context) = contexts.iter().find(|context| **context != needed) else {
          continue;
        };
        violations.push(Violation {
          category: ViolationCategory::UnsafeIsolatedDefault,
          subject: ViolationSubject::Decl(decl.id),
          decl: decl.id,
          related: Some(*reference),
          value: None,
          from: *context,
          to: needed,
          span: default.span.or(decl.span),
          severity: self.severity(),
        });
      }
    }
    violations
  }

  /// Domains of the initializers that evaluate `owner`'s default values.
  fn init_contexts(&self, owner: &Declaration) -> Vec<IsolationDomain> {
    let mut contexts: Vec<IsolationDomain> = self
      .graph
      .initializers(owner.id)
      .map(|init| self.isolation.domain(init.id))
      .collect();
    if contexts.is_empty() {
      // The synthesized initializer follows the type-level global actor.
      let synthesized = match self.isolation.domain(owner.id) {
        domain @ IsolationDomain::GlobalActor(_) => domain,
        _ => IsolationDomain::NonIsolated,
      };
      contexts.push(synthesized);
    }
    contexts.sort();
    contexts.dedup();
    contexts
  }
}

impl<Q: IsolationQuery + Sync> BoundaryAnalyzer<'_, Q> {
  /// Same result as [`analyze`](Self::analyze), with call edges spread over
  /// the rayon pool.
  pub fn analyze_parallel(&self) -> Vec<Violation> {
    let mut violations = self.scan_declarations();
    let per_edge: Vec<Vec<Violation>> = self
      .graph
      .edges()
      .par_iter()
      .map(|edge| self.analyze_edge(edge))
      .collect();
    violations.extend(per_edge.into_iter().flatten());
    sort_violations(&mut violations);
    violations
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::graph::{GraphBuilder, IsolationAnnotation};
  use crate::resolve::resolve_all_parallel;

  #[test]
  fn category_numbers_follow_taxonomy() {
    let numbers: Vec<u8> = ViolationCategory::ALL.iter().map(|c| c.number()).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
  }

  #[test]
  fn violations_sort_declarations_before_edges() {
    let make = |category, subject| Violation {
      category,
      subject,
      decl: DeclId(0),
      related: None,
      value: None,
      from: IsolationDomain::NonIsolated,
      to: IsolationDomain::NonIsolated,
      span: None,
      severity: Severity::Error,
    };
    let mut violations = vec![
      make(ViolationCategory::MissingSuspension, ViolationSubject::Edge(EdgeId(0))),
      make(ViolationCategory::ConcurrentAccess, ViolationSubject::Edge(EdgeId(0))),
      make(ViolationCategory::UnsafeSharedMutable, ViolationSubject::Decl(DeclId(9))),
    ];
    sort_violations(&mut violations);
    let order: Vec<_> = violations.iter().map(|v| (v.subject, v.category)).collect();
    assert_eq!(order, vec![
      (ViolationSubject::Decl(DeclId(9)), ViolationCategory::UnsafeSharedMutable),
      (ViolationSubject::Edge(EdgeId(0)), ViolationCategory::ConcurrentAccess),
      (ViolationSubject::Edge(EdgeId(0)), ViolationCategory::MissingSuspension),
    ]);
  }

  #[test]
  fn isolated_parameter_binding_matches_receiver() {
    // actor Counter; func bump(isolated c: Counter) calls c.increment()
    let graph = GraphBuilder::default()
      .decl(Declaration::new(DeclId(1), "Counter", DeclKind::Type(TypeKind::Actor)))
      .decl(Declaration::new(DeclId(2), "increment", DeclKind::Function).enclosed_by(DeclId(1)))
      .decl(
        Declaration::new(DeclId(3), "bump", DeclKind::Function).annotated(
          IsolationAnnotation::IsolatedParam {
            name: "c".into(),
            actor: DeclId(1),
          },
        ),
      )
      .edge(CallEdge::new(EdgeId(0), DeclId(3), DeclId(2)).on("c"))
      .edge(CallEdge::new(EdgeId(1), DeclId(3), DeclId(2)).on("other"))
      .build()
      .unwrap();
    let options = CheckOptions::default();
    let resolution = resolve_all_parallel(&graph, &options, None);
    let sendability = SendabilityAnalyzer::new(&graph, &options, &resolution);
    let analyzer = BoundaryAnalyzer::new(&graph, &options, &resolution, &sendability);
    assert!(analyzer.analyze_edge(&graph.edges()[0]).is_empty());
    let other = analyzer.analyze_edge(&graph.edges()[1]);
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].category, ViolationCategory::MissingSuspension);
  }
}
