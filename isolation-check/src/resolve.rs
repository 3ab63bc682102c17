//! Static isolation resolution.
//!
//! Resolution order for a member (first matching rule wins):
//!
//! 1. explicit annotations: `nonisolated`, an `isolated` parameter, a global
//!    actor attribute (two different ones are a conflict and resolve to
//!    non-isolated);
//! 2. closures take their enclosing function's domain when they inherit it;
//! 3. `self` of an actor instance method, and instance stored properties of
//!    an actor;
//! 4. the configured entry-point convention;
//! 5. a global actor attribute on the enclosing extension, then the
//!    enclosing type's type-level global actor;
//! 6. a global-actor requirement witnessed in the scope of its conformance;
//! 7. an overridden member isolated to a global actor;
//! 8. otherwise non-isolated.
//!
//! Type-level isolation uses its own rules: explicit attribute, actor-ness,
//! primary-scope conformance to a global-actor protocol, inheritance.
//!
//! Declarations are resolved one dependency component at a time (see
//! [`Components`](crate::graph::Components)). Within a component the members
//! are started in ascending id order and any declaration found to depend on
//! itself resolves to non-isolated with a cycle issue.

use crate::domain::{IsolationDomain, IsolationSource, Resolved};
use crate::graph::{
  DeclId, DeclKind, DeclScope, Declaration, DeclarationGraph, IsolationAnnotation, TypeKind,
};
use crate::options::CheckOptions;
use crate::profile::{QueryKind, QueryStatsCollector};
use crate::query_span::{query_span, QuerySpan};
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::Serialize;
use std::cell::RefCell;

/// Read access to resolved isolation, shared by the lazy resolver and
/// precomputed tables.
pub trait IsolationQuery {
  fn resolved(&self, decl: DeclId) -> Resolved;

  fn domain(&self, decl: DeclId) -> IsolationDomain {
    self.resolved(decl).domain
  }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionIssueKind {
  /// The declaration's isolation depends on itself.
  Cycle,
  ConflictingAnnotations,
  /// Inference produced more than one global actor.
  AmbiguousInference { candidates: Vec<DeclId> },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ResolutionIssue {
  pub decl: DeclId,
  pub kind: ResolutionIssueKind,
}

/// Fully resolved isolation for a graph.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
  table: AHashMap<DeclId, Resolved>,
  issues: Vec<ResolutionIssue>,
}

impl Resolution {
  fn new(table: AHashMap<DeclId, Resolved>, mut issues: Vec<ResolutionIssue>) -> Self {
    issues.sort();
    issues.dedup();
    Self { table, issues }
  }

  pub fn get(&self, decl: DeclId) -> Option<Resolved> {
    self.table.get(&decl).copied()
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  /// Sorted by declaration id.
  pub fn entries(&self) -> Vec<(DeclId, Resolved)> {
    let mut entries: Vec<_> = self.table.iter().map(|(id, r)| (*id, *r)).collect();
    entries.sort_by_key(|(id, _)| *id);
    entries
  }

  pub fn issues(&self) -> &[ResolutionIssue] {
    &self.issues
  }
}

impl IsolationQuery for Resolution {
  fn resolved(&self, decl: DeclId) -> Resolved {
    self.get(decl).unwrap_or_default()
  }
}

/// Lazy, memoized resolver. Not thread-safe; use
/// [`resolve_all_parallel`] for the parallel driver.
pub struct IsolationResolver<'g> {
  graph: &'g DeclarationGraph,
  options: &'g CheckOptions,
  settled: RefCell<AHashMap<DeclId, Resolved>>,
  done: RefCell<Vec<bool>>,
  issues: RefCell<Vec<ResolutionIssue>>,
  stats: Option<QueryStatsCollector>,
}

impl<'g> IsolationResolver<'g> {
  pub fn new(graph: &'g DeclarationGraph, options: &'g CheckOptions) -> Self {
    Self {
      graph,
      options,
      settled: RefCell::new(AHashMap::new()),
      done: RefCell::new(vec![false; graph.components().len()]),
      issues: RefCell::new(Vec::new()),
      stats: None,
    }
  }

  pub fn with_stats(mut self, stats: QueryStatsCollector) -> Self {
    self.stats = Some(stats);
    self
  }

  pub fn resolve(&self, decl: DeclId) -> IsolationDomain {
    self.resolve_detailed(decl).domain
  }

  pub fn resolve_detailed(&self, decl: DeclId) -> Resolved {
    if let Some(hit) = self.settled.borrow().get(&decl) {
      return *hit;
    }
    if let Some(component) = self.graph.components().component_of(decl) {
      self.ensure_component(component);
    }
    self
      .settled
      .borrow()
      .get(&decl)
      .copied()
      .unwrap_or_default()
  }

  /// Issues found so far, sorted.
  pub fn issues(&self) -> Vec<ResolutionIssue> {
    let mut issues = self.issues.borrow().clone();
    issues.sort();
    issues
  }

  /// Resolve every declaration and snapshot the result.
  pub fn resolve_all(&self) -> Resolution {
    for component in 0..self.graph.components().len() {
      self.ensure_component(component);
    }
    Resolution::new(self.settled.borrow().clone(), self.issues.borrow().clone())
  }

  fn ensure_component(&self, component: usize) {
    let components = self.graph.components();
    let mut work = vec![(component, false)];
    while let Some((current, expanded)) = work.pop() {
      if self.done.borrow()[current] {
        continue;
      }
      if !expanded {
        work.push((current, true));
        for dep in components.dependencies(current) {
          if !self.done.borrow()[*dep] {
            work.push((*dep, false));
          }
        }
        continue;
      }
      let (resolved, issues) = {
        let settled = self.settled.borrow();
        solve_component(
          self.graph,
          self.options,
          &settled,
          current,
          self.stats.as_ref(),
        )
      };
      self.settled.borrow_mut().extend(resolved);
      self.issues.borrow_mut().extend(issues);
      self.done.borrow_mut()[current] = true;
    }
  }
}

impl IsolationQuery for IsolationResolver<'_> {
  fn resolved(&self, decl: DeclId) -> Resolved {
    self.resolve_detailed(decl)
  }
}

/// Resolve every declaration, running independent components on the rayon
/// pool. Produces exactly what [`IsolationResolver::resolve_all`] produces.
pub fn resolve_all_parallel(
  graph: &DeclarationGraph,
  options: &CheckOptions,
  stats: Option<&QueryStatsCollector>,
) -> Resolution {
  let components = graph.components();
  let mut settled: AHashMap<DeclId, Resolved> = AHashMap::with_capacity(components.len());
  let mut issues = Vec::new();
  for level in components.levels() {
    let results: Vec<_> = level
      .par_iter()
      .map(|component| solve_component(graph, options, &settled, *component, stats))
      .collect();
    for (resolved, found) in results {
      settled.extend(resolved);
      issues.extend(found);
    }
  }
  Resolution::new(settled, issues)
}

type ComponentResult = (Vec<(DeclId, Resolved)>, Vec<ResolutionIssue>);

fn solve_component(
  graph: &DeclarationGraph,
  options: &CheckOptions,
  settled: &AHashMap<DeclId, Resolved>,
  component: usize,
  stats: Option<&QueryStatsCollector>,
) -> ComponentResult {
  let members = graph.components().members(component);
  let span = QuerySpan::enter(
    QueryKind::ResolveComponent,
    query_span!(
      "isolation_check.resolve_component",
      component as u64,
      false
    ),
    false,
    stats,
  );
  let mut solver = ComponentSolver {
    graph,
    options,
    settled,
    local: AHashMap::with_capacity(members.len()),
    stack: Vec::new(),
    cyclic: AHashSet::new(),
    issues: Vec::new(),
  };
  for member in members {
    solver.lookup(*member);
  }
  let mut resolved: Vec<_> = solver.local.into_iter().collect();
  resolved.sort_by_key(|(id, _)| *id);
  if let Some(span) = span {
    span.finish(if solver.issues.is_empty() { "ok" } else { "issues" });
  }
  (resolved, solver.issues)
}

struct ComponentSolver<'a> {
  graph: &'a DeclarationGraph,
  options: &'a CheckOptions,
  settled: &'a AHashMap<DeclId, Resolved>,
  local: AHashMap<DeclId, Resolved>,
  stack: Vec<DeclId>,
  cyclic: AHashSet<DeclId>,
  issues: Vec<ResolutionIssue>,
}

impl<'a> ComponentSolver<'a> {
  /// `None` means `decl` is currently being resolved further up the stack.
  fn lookup(&mut self, decl: DeclId) -> Option<Resolved> {
    if let Some(hit) = self.settled.get(&decl).or_else(|| self.local.get(&decl)) {
      return Some(*hit);
    }
    if let Some(pos) = self.stack.iter().position(|open| *open == decl) {
      self.cyclic.extend(self.stack[pos..].iter().copied());
      return None;
    }
    let Some(data) = self.graph.decl(decl) else {
      return Some(Resolved::default());
    };

    self.stack.push(decl);
    let computed = self.compute(data);
    self.stack.pop();

    let resolved = match computed {
      Some(resolved) if !self.cyclic.contains(&decl) => resolved,
      _ => {
        tracing::debug!(decl = decl.0, "cyclic isolation inference");
        self.issue(decl, ResolutionIssueKind::Cycle);
        Resolved::nonisolated(IsolationSource::Cycle)
      }
    };
    self.local.insert(decl, resolved);
    Some(resolved)
  }

  fn issue(&mut self, decl: DeclId, kind: ResolutionIssueKind) {
    self.issues.push(ResolutionIssue { decl, kind });
  }

  fn compute(&mut self, decl: &'a Declaration) -> Option<Resolved> {
    if let Some(explicit) = self.explicit(decl) {
      return Some(explicit);
    }
    match decl.kind {
      DeclKind::Type(kind) => self.type_level(decl, kind),
      DeclKind::Closure { inherits_isolation } => {
        if !inherits_isolation {
          return Some(Resolved::default());
        }
        match decl.enclosing {
          Some(parent) => {
            let outer = self.lookup(parent)?;
            Some(Resolved::new(outer.domain, IsolationSource::ClosureContext))
          }
          None => Some(Resolved::default()),
        }
      }
      DeclKind::Function | DeclKind::StoredProperty => self.member(decl),
    }
  }

  fn explicit(&mut self, decl: &Declaration) -> Option<Resolved> {
    let mut distinct: Vec<IsolationAnnotation> = decl
      .annotations
      .iter()
      .map(|ann| match ann {
        // Both spellings denote the same domain.
        IsolationAnnotation::NonisolatedUnsafe => IsolationAnnotation::Nonisolated,
        other => other.clone(),
      })
      .collect();
    distinct.sort();
    distinct.dedup();
    if distinct.len() > 1 {
      tracing::debug!(decl = decl.id.0, "conflicting isolation annotations");
      self.issue(decl.id, ResolutionIssueKind::ConflictingAnnotations);
      return Some(Resolved::nonisolated(IsolationSource::Conflict));
    }
    match distinct.pop()? {
      IsolationAnnotation::Nonisolated | IsolationAnnotation::NonisolatedUnsafe => {
        Some(Resolved::nonisolated(IsolationSource::Explicit))
      }
      IsolationAnnotation::IsolatedParam { actor, .. } => Some(Resolved::new(
        IsolationDomain::ActorInstance(actor),
        IsolationSource::IsolatedParam,
      )),
      IsolationAnnotation::GlobalActor(actor) => Some(Resolved::new(
        IsolationDomain::GlobalActor(actor),
        IsolationSource::Explicit,
      )),
    }
  }

  fn type_level(&mut self, decl: &Declaration, kind: TypeKind) -> Option<Resolved> {
    if kind == TypeKind::Actor {
      let domain = if decl.is_global_actor {
        IsolationDomain::GlobalActor(decl.id)
      } else {
        IsolationDomain::ActorInstance(decl.id)
      };
      return Some(Resolved::new(domain, IsolationSource::ActorType));
    }

    let mut candidates = Vec::new();
    for conformance in &decl.conformances {
      // Conformances stated in an extension never isolate the whole type.
      if conformance.scope != DeclScope::Primary {
        continue;
      }
      if let Some(actor) = self.lookup(conformance.protocol)?.domain.global_actor() {
        candidates.push(actor);
      }
    }
    if let Some(resolved) = self.pick(decl.id, candidates, IsolationSource::Conformance) {
      return Some(resolved);
    }

    let mut candidates = Vec::new();
    for supertype in &decl.supertypes {
      if let Some(actor) = self.lookup(*supertype)?.domain.global_actor() {
        candidates.push(actor);
      }
    }
    if let Some(resolved) = self.pick(decl.id, candidates, IsolationSource::Inheritance) {
      return Some(resolved);
    }
    Some(Resolved::default())
  }

  fn member(&mut self, decl: &Declaration) -> Option<Resolved> {
    let graph = self.graph;
    let enclosing_type = graph.enclosing_type(decl);

    if let Some(owner) = enclosing_type {
      let plain_actor = owner.type_kind() == Some(TypeKind::Actor) && !owner.is_global_actor;
      if plain_actor && !decl.is_static {
        let source = match decl.kind {
          DeclKind::StoredProperty => IsolationSource::ActorStorage,
          _ => IsolationSource::ActorSelf,
        };
        return Some(Resolved::new(IsolationDomain::ActorInstance(owner.id), source));
      }
    }

    if let Some(actor) = self.options.entry_point_global_actor {
      let top_level_state = decl.is_top_level()
        && decl.in_entry_file
        && decl.kind == DeclKind::StoredProperty
        && decl.is_mutable;
      if decl.is_entry_point || top_level_state {
        return Some(Resolved::new(
          IsolationDomain::GlobalActor(actor),
          IsolationSource::EntryPoint,
        ));
      }
    }

    if let DeclScope::Extension(ext) = decl.scope {
      if let Some(actor) = graph.extension(ext).and_then(|ext| ext.global_actor) {
        return Some(Resolved::new(
          IsolationDomain::GlobalActor(actor),
          IsolationSource::Extension,
        ));
      }
    }

    if let Some(owner) = enclosing_type {
      let owner_isolation = self.lookup(owner.id)?;
      if let Some(actor) = owner_isolation.domain.global_actor() {
        // Isolation inferred from a conformance is bound to the scope that
        // states the conformance.
        let applies = decl.scope == DeclScope::Primary
          || owner_isolation.source != IsolationSource::Conformance;
        if applies {
          return Some(Resolved::new(
            IsolationDomain::GlobalActor(actor),
            IsolationSource::EnclosingType,
          ));
        }
      }
    }

    let mut candidates = Vec::new();
    for requirement in &decl.satisfies {
      let same_scope = match (enclosing_type, graph.decl(*requirement)) {
        (Some(owner), Some(req)) => req
          .enclosing
          .and_then(|protocol| graph.conformance_scope(owner.id, protocol))
          .is_some_and(|scope| scope == decl.scope),
        _ => false,
      };
      if !same_scope {
        continue;
      }
      if let Some(actor) = self.lookup(*requirement)?.domain.global_actor() {
        candidates.push(actor);
      }
    }
    if let Some(resolved) = self.pick(decl.id, candidates, IsolationSource::Requirement) {
      return Some(resolved);
    }

    let mut candidates = Vec::new();
    for overridden in &decl.overrides {
      if let Some(actor) = self.lookup(*overridden)?.domain.global_actor() {
        candidates.push(actor);
      }
    }
    if let Some(resolved) = self.pick(decl.id, candidates, IsolationSource::Override) {
      return Some(resolved);
    }

    Some(Resolved::default())
  }

  /// Single distinct candidate wins; several are ambiguous.
  fn pick(
    &mut self,
    decl: DeclId,
    mut candidates: Vec<DeclId>,
    source: IsolationSource,
  ) -> Option<Resolved> {
    candidates.sort_unstable();
    candidates.dedup();
    match candidates.len() {
      0 => None,
      1 => Some(Resolved::new(
        IsolationDomain::GlobalActor(candidates[0]),
        source,
      )),
      _ => {
        tracing::debug!(decl = decl.0, "ambiguous inferred isolation");
        self.issue(decl, ResolutionIssueKind::AmbiguousInference { candidates });
        Some(Resolved::nonisolated(IsolationSource::Ambiguous))
      }
    }
  }
}
