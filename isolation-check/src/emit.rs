//! Conversion of a [`CheckReport`] into host diagnostics.

use crate::boundary::{Violation, ViolationCategory};
use crate::codes;
use crate::domain::IsolationDomain;
use crate::graph::{DeclId, DeclarationGraph};
use crate::options::CheckOptions;
use crate::resolve::{ResolutionIssue, ResolutionIssueKind};
use crate::sendable::{AuditReason, AuditRecord, SendableIssue, SendableIssueKind};
use crate::CheckReport;
use diagnostics::{Diagnostic, DiagnosticSink, Label, Severity, Span};

pub struct DiagnosticEmitter<'a> {
  options: &'a CheckOptions,
}

impl<'a> DiagnosticEmitter<'a> {
  pub fn new(options: &'a CheckOptions) -> Self {
    Self { options }
  }

  /// Every diagnostic for `report`, normalized.
  pub fn diagnostics(&self, report: &CheckReport, graph: &DeclarationGraph) -> Vec<Diagnostic> {
    let render = Render { graph };
    let severity = self.options.mode.severity();
    let mut out: Vec<Diagnostic> = report
      .violations
      .iter()
      .filter(|violation| !self.options.is_suppressed(violation.category))
      .map(|violation| render.violation(violation))
      .collect();
    out.extend(
      report
        .resolution_issues
        .iter()
        .map(|issue| render.resolution_issue(issue, severity)),
    );
    out.extend(
      report
        .sendable_issues
        .iter()
        .map(|issue| render.sendable_issue(issue, severity)),
    );
    out.extend(report.audit.iter().map(|record| render.audit(record)));
    codes::normalize_diagnostics(&mut out);
    out
  }

  /// Hand every diagnostic to `sink`; returns how many were reported.
  pub fn emit(
    &self,
    report: &CheckReport,
    graph: &DeclarationGraph,
    sink: &mut impl DiagnosticSink,
  ) -> usize {
    let diagnostics = self.diagnostics(report, graph);
    let count = diagnostics.len();
    for diagnostic in diagnostics {
      sink.report(diagnostic);
    }
    tracing::debug!(count, "emitted isolation diagnostics");
    count
  }
}

struct Render<'g> {
  graph: &'g DeclarationGraph,
}

impl Render<'_> {
  fn span(&self, decl: DeclId) -> Span {
    self.graph.span_of(decl).unwrap_or_else(Span::placeholder)
  }

  fn name(&self, decl: DeclId) -> &str {
    self.graph.name_of(decl)
  }

  fn domain(&self, domain: IsolationDomain) -> String {
    match domain {
      IsolationDomain::NonIsolated => "nonisolated".to_string(),
      IsolationDomain::ActorInstance(actor) => {
        format!("isolated to an instance of `{}`", self.name(actor))
      }
      IsolationDomain::GlobalActor(actor) => {
        format!("isolated to global actor `{}`", self.name(actor))
      }
    }
  }

  fn related_label(&self, violation: &Violation, message: &str) -> Option<Label> {
    let related = violation.related?;
    let span = self.graph.span_of(related)?;
    Some(Label::secondary(span, format!("{message} `{}`", self.name(related))))
  }

  fn violation(&self, violation: &Violation) -> Diagnostic {
    let code = codes::for_category(violation.category);
    let primary = violation.span.unwrap_or_else(Span::placeholder);
    let from = self.domain(violation.from);
    let to = self.domain(violation.to);
    let related = violation.related.map(|id| self.name(id)).unwrap_or_default();
    let (message, label, secondary) = match violation.category {
      ViolationCategory::ConcurrentAccess => {
        let (what, name, ty) = violation
          .value
          .as_ref()
          .map(|value| (value.kind.as_str(), value.name.as_str(), value.ty.to_string()))
          .unwrap_or(("value", "", String::new()));
        (
          format!(
            "{what} `{name}` of non-Sendable type `{ty}` passed from {from} code to `{related}`, which is {to}"
          ),
          format!("non-Sendable {what}"),
          "callee",
        )
      }
      ViolationCategory::UnsafeSharedMutable => (
        format!(
          "`{}` is mutable shared state that is neither isolated nor Sendable",
          self.name(violation.decl)
        ),
        "declared here".to_string(),
        "",
      ),
      ViolationCategory::ContractMismatch => (
        format!(
          "`{}` is {to} but `{related}`, which it implements, is {from}",
          self.name(violation.decl)
        ),
        "isolated implementation".to_string(),
        "requirement",
      ),
      ViolationCategory::MissingSuspension => (
        format!("synchronous call from {from} code to `{related}`, which is {to}"),
        "call is not awaited".to_string(),
        "callee",
      ),
      ViolationCategory::UnsafeIsolatedDefault => (
        format!(
          "default value of `{}` uses `{related}`, which is {to}, but is evaluated by an initializer that is {from}",
          self.name(violation.decl)
        ),
        "evaluated during initialization".to_string(),
        "referenced declaration",
      ),
    };
    let mut diagnostic = code
      .diagnostic(violation.severity, message, primary)
      .with_label(Label::primary(primary, label));
    if !secondary.is_empty() {
      diagnostic = diagnostic.merge_related(self.related_label(violation, secondary));
    }
    diagnostic
  }

  fn resolution_issue(&self, issue: &ResolutionIssue, severity: Severity) -> Diagnostic {
    let primary = self.span(issue.decl);
    let name = self.name(issue.decl);
    match &issue.kind {
      ResolutionIssueKind::Cycle => codes::ISOLATION_CYCLE.diagnostic(
        severity,
        format!("isolation of `{name}` depends on itself"),
        primary,
      ),
      ResolutionIssueKind::ConflictingAnnotations => codes::CONFLICTING_ANNOTATIONS.diagnostic(
        severity,
        format!("`{name}` carries conflicting isolation annotations"),
        primary,
      ),
      ResolutionIssueKind::AmbiguousInference { candidates } => {
        let names: Vec<String> = candidates
          .iter()
          .map(|actor| format!("`{}`", self.name(*actor)))
          .collect();
        codes::AMBIGUOUS_INFERENCE
          .diagnostic(
            severity,
            format!("`{name}` infers several global actors: {}", names.join(", ")),
            primary,
          )
          .merge_related(candidates.iter().filter_map(|actor| {
            self
              .graph
              .span_of(*actor)
              .map(|span| Label::secondary(span, "candidate global actor"))
          }))
      }
    }
  }

  fn sendable_issue(&self, issue: &SendableIssue, severity: Severity) -> Diagnostic {
    let primary = self.span(issue.ty);
    let name = self.name(issue.ty);
    let (message, field) = match issue.kind {
      SendableIssueKind::Subclassable => (
        format!("non-final class `{name}` cannot conform to Sendable"),
        None,
      ),
      SendableIssueKind::NonSendableField { field } => (
        format!(
          "stored property `{}` of Sendable type `{name}` has non-Sendable type",
          self.name(field)
        ),
        Some(field),
      ),
      SendableIssueKind::MutableField { field } => (
        format!(
          "stored property `{}` of Sendable class `{name}` is mutable",
          self.name(field)
        ),
        Some(field),
      ),
    };
    codes::INVALID_SENDABLE
      .diagnostic(severity, message, primary)
      .merge_related(
        field
          .and_then(|field| self.graph.span_of(field))
          .map(|span| Label::secondary(span, "stored property")),
      )
  }

  fn audit(&self, record: &AuditRecord) -> Diagnostic {
    let asserted = self.name(record.asserted);
    let asserted_label = self
      .graph
      .span_of(record.asserted)
      .map(|span| Label::secondary(span, "unchecked assertion"));
    match &record.reason {
      AuditReason::Transfer { edge, value, name } => {
        let primary = self
          .graph
          .edges()
          .iter()
          .find(|candidate| candidate.id == *edge)
          .and_then(|candidate| candidate.span)
          .unwrap_or_else(Span::placeholder);
        codes::UNCHECKED_SENDABLE
          .diagnostic(
            Severity::Note,
            format!(
              "{} `{name}` crosses an isolation boundary relying on unchecked Sendable `{asserted}`",
              value.as_str()
            ),
            primary,
          )
          .merge_related(asserted_label)
      }
      AuditReason::Field { owner, field } => codes::UNCHECKED_SENDABLE
        .diagnostic(
          Severity::Note,
          format!(
            "`{}` is Sendable because field `{}` relies on unchecked Sendable `{asserted}`",
            self.name(*owner),
            self.name(*field)
          ),
          self.span(*field),
        )
        .merge_related(asserted_label),
      AuditReason::SharedMutable { decl } => codes::UNCHECKED_SENDABLE
        .diagnostic(
          Severity::Note,
          format!(
            "shared mutable `{}` relies on unchecked Sendable `{asserted}`",
            self.name(*decl)
          ),
          self.span(*decl),
        )
        .merge_related(asserted_label),
      AuditReason::NonisolatedUnsafe { decl } => codes::NONISOLATED_UNSAFE.diagnostic(
        Severity::Note,
        format!("`{}` opts out of isolation checking", self.name(*decl)),
        self.span(*decl),
      ),
    }
  }
}
