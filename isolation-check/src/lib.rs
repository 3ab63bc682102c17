//! Static actor-isolation and Sendable checking over a resolved declaration
//! graph.
//!
//! The host front end lowers a compilation unit into a [`DeclarationGraph`];
//! [`Checker`] resolves the isolation domain of every declaration, decides
//! which types may cross isolation domains, walks every call edge and returns
//! a [`CheckReport`]. Analysis never fails: violations, declaration-level
//! issues and unchecked-assertion audits are all data in the report.
//!
//! ```
//! use isolation_check::{
//!   CallEdge, CheckOptions, Checker, DeclId, DeclKind, Declaration, DeclarationGraph, EdgeId,
//!   IsolationAnnotation, TypeKind, ViolationCategory,
//! };
//!
//! let graph = DeclarationGraph::builder()
//!   .decl(
//!     Declaration::new(DeclId(1), "MainActor", DeclKind::Type(TypeKind::Actor))
//!       .global_actor_type(),
//!   )
//!   .decl(
//!     Declaration::new(DeclId(2), "render", DeclKind::Function)
//!       .annotated(IsolationAnnotation::GlobalActor(DeclId(1))),
//!   )
//!   .decl(Declaration::new(DeclId(3), "worker", DeclKind::Function).asynchronous())
//!   .edge(CallEdge::new(EdgeId(0), DeclId(3), DeclId(2)))
//!   .build()
//!   .unwrap();
//! let checker = Checker::new(&graph, CheckOptions::default()).unwrap();
//! let report = checker.check();
//! assert_eq!(report.violations.len(), 1);
//! assert_eq!(report.violations[0].category, ViolationCategory::MissingSuspension);
//! ```

pub mod boundary;
pub mod codes;
pub mod domain;
pub mod emit;
pub mod error;
pub mod graph;
pub mod options;
pub mod profile;
mod query_span;
pub mod resolve;
pub mod sendable;

pub use boundary::{BoundaryAnalyzer, ValueRef, Violation, ViolationCategory, ViolationSubject};
pub use domain::{IsolationDomain, IsolationSource, Resolved};
pub use emit::DiagnosticEmitter;
pub use error::{ConfigError, GraphError, Referrer};
pub use graph::{
  CallEdge, Conformance, DeclId, DeclKind, DeclScope, Declaration, DeclarationGraph, DefaultValue,
  EdgeId, EdgeKind, Extension, ExtensionId, GraphBuilder, IsolationAnnotation, ModuleId,
  SendableAssertion, Transfer, TypeKind, TypeRef, ValueKind,
};
pub use options::{CheckMode, CheckOptions};
pub use profile::{QueryKind, QueryStat, QueryStats, QueryStatsCollector};
pub use resolve::{
  resolve_all_parallel, IsolationQuery, IsolationResolver, Resolution, ResolutionIssue,
  ResolutionIssueKind,
};
pub use sendable::{
  AuditReason, AuditRecord, Sendability, SendabilityAnalyzer, SendableIssue, SendableIssueKind,
};

use diagnostics::Diagnostic;

/// Everything one checking pass found.
#[derive(Debug, Clone)]
pub struct CheckReport {
  pub resolution: Resolution,
  /// Sorted by subject, category and value name.
  pub violations: Vec<Violation>,
  pub resolution_issues: Vec<ResolutionIssue>,
  pub sendable_issues: Vec<SendableIssue>,
  pub audit: Vec<AuditRecord>,
  pub stats: QueryStats,
}

impl CheckReport {
  /// No violations and no declaration-level issues. Audit records do not
  /// count.
  pub fn is_clean(&self) -> bool {
    self.violations.is_empty()
      && self.resolution_issues.is_empty()
      && self.sendable_issues.is_empty()
  }

  pub fn violations_of(&self, category: ViolationCategory) -> impl Iterator<Item = &Violation> {
    self
      .violations
      .iter()
      .filter(move |violation| violation.category == category)
  }

  pub fn diagnostics(&self, graph: &DeclarationGraph, options: &CheckOptions) -> Vec<Diagnostic> {
    DiagnosticEmitter::new(options).diagnostics(self, graph)
  }
}

/// Entry point for a checking pass over one graph.
pub struct Checker<'g> {
  graph: &'g DeclarationGraph,
  options: CheckOptions,
  stats: QueryStatsCollector,
}

impl<'g> Checker<'g> {
  pub fn new(graph: &'g DeclarationGraph, options: CheckOptions) -> Result<Self, ConfigError> {
    options.validate(graph)?;
    Ok(Self {
      graph,
      options,
      stats: QueryStatsCollector::default(),
    })
  }

  pub fn options(&self) -> &CheckOptions {
    &self.options
  }

  pub fn graph(&self) -> &'g DeclarationGraph {
    self.graph
  }

  /// Runs the driver selected by `options.parallel`.
  pub fn check(&self) -> CheckReport {
    if self.options.parallel {
      self.check_parallel()
    } else {
      self.check_sequential()
    }
  }

  /// Single-threaded pass driven by the lazy resolver.
  pub fn check_sequential(&self) -> CheckReport {
    let span = self.span(false);
    let _guard = span.enter();
    let resolver =
      IsolationResolver::new(self.graph, &self.options).with_stats(self.stats.clone());
    let (violations, sendable_issues, audit) =
      self.analyze(&resolver, |boundary| boundary.analyze());
    let resolution = resolver.resolve_all();
    self.report(resolution, violations, sendable_issues, audit)
  }

  /// Resolves dependency components level by level and analyzes call edges
  /// on the rayon pool. Produces the same report as
  /// [`check_sequential`](Self::check_sequential).
  pub fn check_parallel(&self) -> CheckReport {
    let span = self.span(true);
    let _guard = span.enter();
    let resolution = resolve_all_parallel(self.graph, &self.options, Some(&self.stats));
    let (violations, sendable_issues, audit) =
      self.analyze(&resolution, |boundary| boundary.analyze_parallel());
    self.report(resolution, violations, sendable_issues, audit)
  }

  fn span(&self, parallel: bool) -> tracing::Span {
    tracing::debug_span!(
      "isolation_check.check",
      declarations = self.graph.declarations().count() as u64,
      edges = self.graph.edges().len() as u64,
      parallel,
    )
  }

  fn analyze<Q, F>(
    &self,
    isolation: &Q,
    walk: F,
  ) -> (Vec<Violation>, Vec<SendableIssue>, Vec<AuditRecord>)
  where
    Q: IsolationQuery,
    F: FnOnce(&BoundaryAnalyzer<'_, Q>) -> Vec<Violation>,
  {
    let sendability = SendabilityAnalyzer::new(self.graph, &self.options, isolation)
      .with_stats(self.stats.clone());
    let sendable_issues = sendability.validate_conformances();
    let boundary = BoundaryAnalyzer::new(self.graph, &self.options, isolation, &sendability)
      .with_stats(self.stats.clone());
    let violations = walk(&boundary);
    (violations, sendable_issues, sendability.audit_log())
  }

  fn report(
    &self,
    resolution: Resolution,
    violations: Vec<Violation>,
    sendable_issues: Vec<SendableIssue>,
    audit: Vec<AuditRecord>,
  ) -> CheckReport {
    tracing::debug!(
      violations = violations.len(),
      issues = resolution.issues().len(),
      audits = audit.len(),
      "isolation check finished"
    );
    CheckReport {
      resolution_issues: resolution.issues().to_vec(),
      resolution,
      violations,
      sendable_issues,
      audit,
      stats: self.stats.snapshot(),
    }
  }
}
