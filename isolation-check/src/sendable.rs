//! Transferability of values across isolation domains.
//!
//! Evaluation is structural and memoized per `(type, use-site module)`.
//! Recursive types are handled optimistically: a type reached again while it
//! is still being evaluated is assumed `Sendable`. A result that leaned on an
//! assumption about an enclosing frame is provisional and never cached; it is
//! recomputed once the assumption has been settled. `NotSendable` never
//! depends on an optimistic assumption being false, so it is always cached.
//!
//! Reliance on an unchecked assertion is recorded in an audit log, never
//! turned into a violation.

use crate::graph::{
  DeclId, DeclKind, Declaration, DeclarationGraph, EdgeId, ModuleId, SendableAssertion, TypeKind,
  TypeRef, ValueKind,
};
use crate::options::CheckOptions;
use crate::profile::{QueryKind, QueryStatsCollector};
use crate::query_span::{query_span, QuerySpan};
use crate::resolve::IsolationQuery;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sendability {
  Sendable,
  NotSendable,
  /// Accepted on the author's word; satisfies every obligation but is
  /// audited.
  UncheckedSendable,
}

impl Sendability {
  pub fn is_sendable(self) -> bool {
    self != Sendability::NotSendable
  }

  /// Combined sendability of a value made of both parts.
  pub fn meet(self, other: Sendability) -> Sendability {
    use Sendability::*;
    match (self, other) {
      (NotSendable, _) | (_, NotSendable) => NotSendable,
      (UncheckedSendable, _) | (_, UncheckedSendable) => UncheckedSendable,
      (Sendable, Sendable) => Sendable,
    }
  }
}

/// Why an unchecked assertion had to be trusted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
  /// A value of the asserted type crossed an isolation boundary.
  Transfer {
    edge: EdgeId,
    value: ValueKind,
    name: String,
  },
  /// The asserted type is the type of a field of a composite that was found
  /// Sendable.
  Field { owner: DeclId, field: DeclId },
  /// A non-isolated global or static variable of the asserted type.
  SharedMutable { decl: DeclId },
  /// `nonisolated(unsafe)` waived the shared-mutable check.
  NonisolatedUnsafe { decl: DeclId },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AuditRecord {
  /// Declaration carrying the unchecked assertion.
  pub asserted: DeclId,
  pub reason: AuditReason,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendableIssueKind {
  /// Checked assertion on a class that can be subclassed.
  Subclassable,
  NonSendableField { field: DeclId },
  /// Checked assertion on a class with a mutable, non-isolated field.
  MutableField { field: DeclId },
}

/// A checked Sendable assertion that failed verification.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SendableIssue {
  pub ty: DeclId,
  pub kind: SendableIssueKind,
}

type MemoKey = (DeclId, ModuleId);

pub struct SendabilityAnalyzer<'a, Q> {
  graph: &'a DeclarationGraph,
  options: &'a CheckOptions,
  isolation: &'a Q,
  memo: DashMap<MemoKey, Sendability, ahash::RandomState>,
  audit: Mutex<BTreeSet<AuditRecord>>,
  stats: Option<QueryStatsCollector>,
}

impl<'a, Q: IsolationQuery> SendabilityAnalyzer<'a, Q> {
  pub fn new(graph: &'a DeclarationGraph, options: &'a CheckOptions, isolation: &'a Q) -> Self {
    Self {
      graph,
      options,
      isolation,
      memo: DashMap::with_hasher(ahash::RandomState::new()),
      audit: Mutex::new(BTreeSet::new()),
      stats: None,
    }
  }

  pub fn with_stats(mut self, stats: QueryStatsCollector) -> Self {
    self.stats = Some(stats);
    self
  }

  /// Sendability of `ty` used inside the local module.
  pub fn is_sendable(&self, ty: &TypeRef) -> Sendability {
    self.is_sendable_from(ty, ModuleId::LOCAL)
  }

  pub fn is_sendable_from(&self, ty: &TypeRef, use_site: ModuleId) -> Sendability {
    Walk::new(self).ty(ty, use_site).result
  }

  /// Sendability of the nominal type `decl`.
  pub fn decl_sendability(&self, decl: DeclId, use_site: ModuleId) -> Sendability {
    self.is_sendable_from(&TypeRef::Nominal(decl), use_site)
  }

  /// Nominal types inside `ty` whose sendability rests on an unchecked
  /// assertion, in id order.
  pub fn unchecked_assertions(&self, ty: &TypeRef) -> Vec<DeclId> {
    let mut out: Vec<DeclId> = ty
      .nominals()
      .into_iter()
      .filter(|id| {
        self
          .graph
          .decl(*id)
          .is_some_and(|decl| self.rule(decl).is_some_and(|s| s == Sendability::UncheckedSendable))
      })
      .collect();
    out.sort_unstable();
    out.dedup();
    out
  }

  pub fn record_audit(&self, record: AuditRecord) {
    let mut audit = self.audit.lock();
    if !audit.contains(&record) {
      tracing::debug!(asserted = record.asserted.0, "relying on unchecked assertion");
      audit.insert(record);
    }
  }

  /// Every audit record so far, in a stable order.
  pub fn audit_log(&self) -> Vec<AuditRecord> {
    self.audit.lock().iter().cloned().collect()
  }

  /// Verify every checked Sendable assertion.
  pub fn validate_conformances(&self) -> Vec<SendableIssue> {
    let mut issues = Vec::new();
    for decl in self.graph.declarations() {
      if decl.sendable != SendableAssertion::Checked {
        continue;
      }
      let Some(kind) = decl.type_kind() else {
        continue;
      };
      // Isolated types are Sendable whatever their fields.
      let isolated_type =
        kind == TypeKind::Actor || self.isolation.domain(decl.id).global_actor().is_some();
      if kind == TypeKind::Protocol || isolated_type {
        continue;
      }
      if kind == TypeKind::Class && !decl.is_final {
        issues.push(SendableIssue {
          ty: decl.id,
          kind: SendableIssueKind::Subclassable,
        });
      }
      let home = self.options.module_of(decl.id);
      for field in self.graph.stored_fields(decl.id) {
        let isolated =
          kind == TypeKind::Class && self.isolation.domain(field.id).global_actor().is_some();
        if isolated {
          continue;
        }
        if kind == TypeKind::Class && field.is_mutable {
          issues.push(SendableIssue {
            ty: decl.id,
            kind: SendableIssueKind::MutableField { field: field.id },
          });
        }
        let sendable = field
          .ty
          .as_ref()
          .map_or(Sendability::NotSendable, |ty| self.is_sendable_from(ty, home));
        if !sendable.is_sendable() {
          issues.push(SendableIssue {
            ty: decl.id,
            kind: SendableIssueKind::NonSendableField { field: field.id },
          });
        }
      }
    }
    issues.sort();
    issues
  }

  /// Rules that decide a nominal type without looking at its fields.
  fn rule(&self, decl: &Declaration) -> Option<Sendability> {
    let Some(kind) = decl.type_kind() else {
      // Functions, properties and closures are not value types.
      return Some(Sendability::NotSendable);
    };
    if kind == TypeKind::Actor {
      return Some(Sendability::Sendable);
    }
    if self.isolation.domain(decl.id).global_actor().is_some() {
      return Some(Sendability::Sendable);
    }
    match decl.sendable {
      SendableAssertion::Unchecked => Some(Sendability::UncheckedSendable),
      SendableAssertion::Checked if kind == TypeKind::Protocol => Some(Sendability::Sendable),
      SendableAssertion::None if kind == TypeKind::Protocol => Some(Sendability::NotSendable),
      SendableAssertion::None if kind == TypeKind::Class => Some(Sendability::NotSendable),
      SendableAssertion::Checked if kind == TypeKind::Class && !decl.is_final => {
        Some(Sendability::NotSendable)
      }
      _ => None,
    }
  }
}

/// Result of evaluating a type on one walk.
struct Outcome {
  result: Sendability,
  /// Shallowest stack frame assumed Sendable along the way.
  assumed: Option<usize>,
  /// Field audits waiting for the result to become final.
  audits: Vec<AuditRecord>,
}

impl Outcome {
  fn settled(result: Sendability) -> Self {
    Self {
      result,
      assumed: None,
      audits: Vec::new(),
    }
  }

  fn join(&mut self, other: Outcome) {
    self.result = self.result.meet(other.result);
    self.assumed = match (self.assumed, other.assumed) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (a, b) => a.or(b),
    };
    self.audits.extend(other.audits);
  }
}

/// One top-level query. Owns the in-progress stack so concurrent queries on
/// a shared analyzer do not interfere.
struct Walk<'w, 'a, Q> {
  analyzer: &'w SendabilityAnalyzer<'a, Q>,
  stack: Vec<MemoKey>,
}

impl<'w, 'a, Q: IsolationQuery> Walk<'w, 'a, Q> {
  fn new(analyzer: &'w SendabilityAnalyzer<'a, Q>) -> Self {
    Self {
      analyzer,
      stack: Vec::new(),
    }
  }

  fn ty(&mut self, ty: &TypeRef, use_site: ModuleId) -> Outcome {
    match ty {
      TypeRef::Primitive(_) => Outcome::settled(Sendability::Sendable),
      TypeRef::Function { sendable: true } => Outcome::settled(Sendability::Sendable),
      TypeRef::Function { sendable: false } => Outcome::settled(Sendability::NotSendable),
      TypeRef::Nominal(id) => self.nominal(*id, use_site),
      TypeRef::Optional(inner) => self.ty(inner, use_site),
      TypeRef::Tuple(items) => {
        let mut outcome = Outcome::settled(Sendability::Sendable);
        for item in items {
          outcome.join(self.ty(item, use_site));
        }
        outcome
      }
    }
  }

  fn nominal(&mut self, id: DeclId, use_site: ModuleId) -> Outcome {
    let analyzer = self.analyzer;
    let key = (id, use_site);
    if let Some(hit) = analyzer.memo.get(&key) {
      return Outcome::settled(*hit);
    }
    if let Some(depth) = self.stack.iter().position(|open| *open == key) {
      return Outcome {
        result: Sendability::Sendable,
        assumed: Some(depth),
        audits: Vec::new(),
      };
    }
    let Some(decl) = analyzer.graph.decl(id) else {
      return Outcome::settled(Sendability::NotSendable);
    };

    let top_level = self.stack.is_empty();
    let span = if top_level {
      QuerySpan::enter(
        QueryKind::Sendable,
        query_span!("isolation_check.sendable", id.0, false),
        false,
        analyzer.stats.as_ref(),
      )
    } else {
      None
    };

    let depth = self.stack.len();
    self.stack.push(key);
    let mut outcome = self.compute(decl, use_site);
    self.stack.pop();

    let discharged = outcome.assumed.map_or(true, |assumed| assumed >= depth);
    if outcome.result == Sendability::NotSendable || discharged {
      analyzer.memo.insert(key, outcome.result);
      if outcome.result.is_sendable() {
        for record in outcome.audits.drain(..) {
          analyzer.record_audit(record);
        }
      }
      outcome.audits.clear();
      outcome.assumed = None;
    }
    if let Some(span) = span {
      span.finish(match outcome.result {
        Sendability::Sendable => "sendable",
        Sendability::NotSendable => "not_sendable",
        Sendability::UncheckedSendable => "unchecked",
      });
    }
    outcome
  }

  fn compute(&mut self, decl: &Declaration, use_site: ModuleId) -> Outcome {
    let analyzer = self.analyzer;
    if let Some(decided) = analyzer.rule(decl) {
      return Outcome::settled(decided);
    }
    let home = analyzer.options.module_of(decl.id);
    let kind = match decl.kind {
      DeclKind::Type(kind) => kind,
      _ => return Outcome::settled(Sendability::NotSendable),
    };
    // The implicit grant for value types does not cross module boundaries.
    if decl.sendable == SendableAssertion::None && kind.is_value_type() && use_site != home {
      return Outcome::settled(Sendability::NotSendable);
    }

    let mut outcome = Outcome::settled(Sendability::Sendable);
    for field in analyzer.graph.stored_fields(decl.id) {
      if kind == TypeKind::Class {
        if analyzer.isolation.domain(field.id).global_actor().is_some() {
          continue;
        }
        if field.is_mutable {
          return Outcome::settled(Sendability::NotSendable);
        }
      }
      let Some(ty) = &field.ty else {
        return Outcome::settled(Sendability::NotSendable);
      };
      let mut field_outcome = self.ty(ty, home);
      if field_outcome.result == Sendability::UncheckedSendable {
        for asserted in analyzer.unchecked_assertions(ty) {
          field_outcome.audits.push(AuditRecord {
            asserted,
            reason: AuditReason::Field {
              owner: decl.id,
              field: field.id,
            },
          });
        }
        field_outcome.result = Sendability::Sendable;
      }
      outcome.join(field_outcome);
      if outcome.result == Sendability::NotSendable {
        return Outcome::settled(Sendability::NotSendable);
      }
    }
    outcome
  }
}
