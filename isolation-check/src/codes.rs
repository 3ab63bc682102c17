//! Registry of diagnostic codes emitted by `isolation-check`.
//!
//! Each [`Code`] documents the expected shape of diagnostics the checker
//! emits: the short description, where the primary span should point, and
//! any additional labels or notes that accompany the diagnostic. `ISO0xxx`
//! codes are violations (one per category), `ISO1xxx` are declaration-level
//! issues and `ISO2xxx` are audit notes.

use crate::boundary::ViolationCategory;
use diagnostics::{sort_diagnostics, sort_labels, Diagnostic, Severity, Span};

/// Metadata describing a diagnostic code.
#[derive(Clone, Copy, Debug)]
pub struct Code {
  /// Stable string identifier, e.g. `ISO0004`.
  pub id: &'static str,
  /// Short description of what the diagnostic reports.
  pub description: &'static str,
  /// Guidance for where the primary span should be anchored.
  pub primary_span: &'static str,
  /// Expected labels attached to the diagnostic (primary and secondary).
  pub labels: &'static [&'static str],
  /// Expected notes automatically added to the diagnostic.
  pub notes: &'static [&'static str],
}

impl Code {
  pub const fn new(
    id: &'static str,
    description: &'static str,
    primary_span: &'static str,
    labels: &'static [&'static str],
    notes: &'static [&'static str],
  ) -> Self {
    Code {
      id,
      description,
      primary_span,
      labels,
      notes,
    }
  }

  /// Identifier as a plain string (useful for comparisons in tests).
  pub const fn as_str(&self) -> &'static str {
    self.id
  }

  /// Construct a diagnostic of the given severity tagged with this code and
  /// its expected notes.
  pub fn diagnostic(
    &self,
    severity: Severity,
    message: impl Into<String>,
    primary: Span,
  ) -> Diagnostic {
    let mut diagnostic = Diagnostic::new(severity, self.id, message, primary);
    for note in self.notes {
      diagnostic.push_note(*note);
    }
    diagnostic
  }

  pub fn error(&self, message: impl Into<String>, primary: Span) -> Diagnostic {
    self.diagnostic(Severity::Error, message, primary)
  }

  pub fn warning(&self, message: impl Into<String>, primary: Span) -> Diagnostic {
    self.diagnostic(Severity::Warning, message, primary)
  }

  pub fn note(&self, message: impl Into<String>, primary: Span) -> Diagnostic {
    self.diagnostic(Severity::Note, message, primary)
  }
}

/// Code reported for a violation category.
pub const fn for_category(category: ViolationCategory) -> Code {
  match category {
    ViolationCategory::ConcurrentAccess => CONCURRENT_ACCESS,
    ViolationCategory::UnsafeSharedMutable => UNSAFE_SHARED_MUTABLE,
    ViolationCategory::ContractMismatch => CONTRACT_MISMATCH,
    ViolationCategory::MissingSuspension => MISSING_SUSPENSION,
    ViolationCategory::UnsafeIsolatedDefault => UNSAFE_ISOLATED_DEFAULT,
  }
}

/// Sort labels inside each diagnostic and then the diagnostics themselves to
/// keep outputs deterministic regardless of traversal order.
pub fn normalize_diagnostics(diagnostics: &mut Vec<Diagnostic>) {
  for diagnostic in diagnostics.iter_mut() {
    normalize_diagnostic(diagnostic);
  }
  sort_diagnostics(diagnostics);
}

/// Canonicalize label and note ordering within a single diagnostic.
pub fn normalize_diagnostic(diagnostic: &mut Diagnostic) {
  sort_labels(&mut diagnostic.labels);
  diagnostic.notes.sort();
}

/// ISO0001: A value that is not Sendable crosses an isolation boundary.
///
/// - Primary span: the call site.
/// - Labels: primary names the value; secondary at the callee declaration.
/// - Notes: none.
pub const CONCURRENT_ACCESS: Code = Code::new(
  "ISO0001",
  "non-Sendable value crosses an isolation boundary",
  "call site transferring the value",
  &["primary: transferred value", "secondary: callee declaration"],
  &[],
);

/// ISO0002: Global or static mutable state with neither isolation nor a
/// Sendable type.
///
/// - Primary span: the variable declaration.
/// - Labels: primary only.
/// - Notes: remediation hint.
pub const UNSAFE_SHARED_MUTABLE: Code = Code::new(
  "ISO0002",
  "shared mutable state is not concurrency-safe",
  "declaration of the mutable variable",
  &["primary: variable declaration"],
  &["isolate it to a global actor, make it immutable, or give it a Sendable type"],
);

/// ISO0003: An isolated declaration witnesses a requirement or overrides a
/// member with different isolation.
///
/// - Primary span: the witnessing or overriding declaration.
/// - Labels: secondary at the requirement or overridden member.
/// - Notes: none.
pub const CONTRACT_MISMATCH: Code = Code::new(
  "ISO0003",
  "isolation does not match the requirement or overridden member",
  "witnessing or overriding declaration",
  &["primary: witness", "secondary: requirement or overridden member"],
  &[],
);

/// ISO0004: A call crosses an isolation boundary synchronously.
///
/// - Primary span: the call site.
/// - Labels: secondary at the callee declaration.
/// - Notes: remediation hint.
pub const MISSING_SUSPENSION: Code = Code::new(
  "ISO0004",
  "isolation boundary crossed without a suspension point",
  "call site",
  &["primary: call site", "secondary: callee declaration"],
  &["calls into another isolation domain must be awaited"],
);

/// ISO0005: A stored property's default value needs isolated declarations but
/// is evaluated by an initializer running elsewhere.
///
/// - Primary span: the default value expression, else the property.
/// - Labels: secondary at the referenced declaration.
/// - Notes: none.
pub const UNSAFE_ISOLATED_DEFAULT: Code = Code::new(
  "ISO0005",
  "default value requires isolated access",
  "default value expression",
  &["primary: default value", "secondary: referenced declaration"],
  &[],
);

/// ISO1001: A declaration's isolation depends on itself.
///
/// - Primary span: the declaration.
/// - Labels: primary only.
/// - Notes: the declaration is treated as non-isolated.
pub const ISOLATION_CYCLE: Code = Code::new(
  "ISO1001",
  "cyclic isolation inference",
  "declaration on the cycle",
  &["primary: declaration"],
  &["resolved as nonisolated"],
);

/// ISO1002: Conflicting explicit isolation annotations.
///
/// - Primary span: the declaration.
/// - Labels: primary only.
/// - Notes: the declaration is treated as non-isolated.
pub const CONFLICTING_ANNOTATIONS: Code = Code::new(
  "ISO1002",
  "conflicting isolation annotations",
  "annotated declaration",
  &["primary: declaration"],
  &["resolved as nonisolated"],
);

/// ISO1003: Inference found more than one global actor.
///
/// - Primary span: the declaration.
/// - Labels: secondary at each candidate global actor.
/// - Notes: the declaration is treated as non-isolated.
pub const AMBIGUOUS_INFERENCE: Code = Code::new(
  "ISO1003",
  "ambiguous inferred isolation",
  "declaration with several inferred global actors",
  &["primary: declaration", "secondary: candidate global actors"],
  &["resolved as nonisolated"],
);

/// ISO1004: A checked Sendable assertion fails verification.
///
/// - Primary span: the asserting type.
/// - Labels: secondary at the offending field when there is one.
/// - Notes: none.
pub const INVALID_SENDABLE: Code = Code::new(
  "ISO1004",
  "type cannot conform to Sendable",
  "type carrying the assertion",
  &["primary: type", "secondary: offending field"],
  &[],
);

/// ISO2001: An unchecked Sendable assertion was relied upon.
///
/// - Primary span: where the reliance happens (call site, field or variable).
/// - Labels: secondary at the asserting type.
/// - Notes: none.
pub const UNCHECKED_SENDABLE: Code = Code::new(
  "ISO2001",
  "unchecked Sendable assertion relied upon",
  "use relying on the assertion",
  &["primary: use", "secondary: asserting type"],
  &[],
);

/// ISO2002: `nonisolated(unsafe)` waived the shared-mutable check.
///
/// - Primary span: the variable declaration.
/// - Labels: primary only.
/// - Notes: none.
pub const NONISOLATED_UNSAFE: Code = Code::new(
  "ISO2002",
  "nonisolated(unsafe) relied upon",
  "variable declaration",
  &["primary: variable declaration"],
  &[],
);

#[cfg(test)]
mod tests {
  use super::*;
  use diagnostics::{FileId, Label, TextRange};

  #[test]
  fn category_codes_are_numbered() {
    for category in ViolationCategory::ALL {
      let expected = format!("ISO000{}", category.number());
      assert_eq!(for_category(category).as_str(), expected);
    }
  }

  #[test]
  fn codes_attach_their_notes() {
    let diag = UNSAFE_SHARED_MUTABLE.warning("x", Span::placeholder());
    assert_eq!(diag.severity, Severity::Warning);
    assert_eq!(diag.notes.len(), 1);
  }

  #[test]
  fn normalization_orders_labels_and_diagnostics() {
    let at = |start| Span::new(FileId(0), TextRange::new(start, start + 1));
    let mut diagnostics = vec![
      MISSING_SUSPENSION.error("late", at(9)),
      CONCURRENT_ACCESS
        .error("early", at(1))
        .with_label(Label::secondary(at(5), "callee"))
        .with_label(Label::primary(at(1), "value")),
    ];
    normalize_diagnostics(&mut diagnostics);
    assert_eq!(diagnostics[0].code, "ISO0001");
    assert!(diagnostics[0].labels[0].is_primary);
    assert_eq!(diagnostics[1].code, "ISO0004");
  }
}
