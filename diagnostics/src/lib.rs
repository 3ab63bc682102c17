//! Shared diagnostics model for the isolation checker.
//!
//! The data structures here are intentionally minimal and deterministic so a
//! host toolchain can receive them without pulling in any heavy dependencies.
//! Rendering and localization are left to the host; this crate only carries
//! codes, severities, spans and messages, plus helpers that put diagnostics in
//! a stable order.
//!
//! ```
//! use diagnostics::{Diagnostic, DiagnosticSink, FileId, Span, TextRange};
//!
//! let mut sink: Vec<Diagnostic> = Vec::new();
//! let diag = Diagnostic::error(
//!   "TEST0001",
//!   "an example error",
//!   Span::new(FileId(0), TextRange::new(4, 5)),
//! );
//! sink.report(diag);
//! assert_eq!(sink[0].code, "TEST0001");
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Display;
use std::fmt::Formatter;

/// A stable identifier for a source file, passed through opaquely from the
/// host front end.
#[derive(
  Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FileId(pub u32);

/// A byte range in a file.
#[derive(
  Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TextRange {
  pub start: u32,
  pub end: u32,
}

impl TextRange {
  pub const fn new(start: u32, end: u32) -> Self {
    Self { start, end }
  }

  pub fn len(&self) -> u32 {
    self.end.saturating_sub(self.start)
  }

  pub fn is_empty(&self) -> bool {
    self.start >= self.end
  }
}

/// A span across a specific file.
#[derive(
  Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Span {
  pub file: FileId,
  pub range: TextRange,
}

impl Span {
  pub const fn new(file: FileId, range: TextRange) -> Self {
    Self { file, range }
  }

  /// Zero-length span in a placeholder file, used when the front end supplied
  /// no position for the offending entity.
  pub const fn placeholder() -> Self {
    Self {
      file: FileId(u32::MAX),
      range: TextRange::new(0, 0),
    }
  }

  pub fn is_placeholder(&self) -> bool {
    self.file == FileId(u32::MAX)
  }
}

/// Diagnostic severity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Error,
  Warning,
  Note,
}

impl Severity {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Severity::Error => "error",
      Severity::Warning => "warning",
      Severity::Note => "note",
    }
  }
}

impl Display for Severity {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A label attached to a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Label {
  pub span: Span,
  pub message: String,
  pub is_primary: bool,
}

impl Label {
  pub fn new(span: Span, message: impl Into<String>, is_primary: bool) -> Self {
    Self {
      span,
      message: message.into(),
      is_primary,
    }
  }

  pub fn primary(span: Span, message: impl Into<String>) -> Self {
    Self::new(span, message, true)
  }

  pub fn secondary(span: Span, message: impl Into<String>) -> Self {
    Self::new(span, message, false)
  }
}

/// A user-facing diagnostic with optional labels and notes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
  pub code: &'static str,
  pub severity: Severity,
  pub message: String,
  pub primary: Span,
  pub labels: Vec<Label>,
  pub notes: Vec<String>,
}

impl Diagnostic {
  pub fn new(
    severity: Severity,
    code: &'static str,
    message: impl Into<String>,
    primary: Span,
  ) -> Self {
    Self {
      code,
      severity,
      message: message.into(),
      primary,
      labels: Vec::new(),
      notes: Vec::new(),
    }
  }

  pub fn error(code: &'static str, message: impl Into<String>, primary: Span) -> Self {
    Self::new(Severity::Error, code, message, primary)
  }

  pub fn warning(code: &'static str, message: impl Into<String>, primary: Span) -> Self {
    Self::new(Severity::Warning, code, message, primary)
  }

  pub fn note(code: &'static str, message: impl Into<String>, primary: Span) -> Self {
    Self::new(Severity::Note, code, message, primary)
  }

  pub fn with_label(mut self, label: Label) -> Self {
    self.labels.push(label);
    self
  }

  pub fn with_note(mut self, note: impl Into<String>) -> Self {
    self.notes.push(note.into());
    self
  }

  pub fn push_note(&mut self, note: impl Into<String>) {
    self.notes.push(note.into());
  }

  pub fn merge_related<I>(mut self, labels: I) -> Self
  where
    I: IntoIterator<Item = Label>,
  {
    self.labels.extend(labels);
    self
  }
}

/// Receiver of diagnostics on the host side.
pub trait DiagnosticSink {
  fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
  fn report(&mut self, diagnostic: Diagnostic) {
    self.push(diagnostic);
  }
}

/// Primary labels first, then by position and message.
pub fn sort_labels(labels: &mut [Label]) {
  labels.sort_by(|a, b| {
    b.is_primary
      .cmp(&a.is_primary)
      .then(a.span.cmp(&b.span))
      .then(a.message.cmp(&b.message))
  });
}

/// Orders diagnostics by file, position, code and message so output does not
/// depend on traversal order.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
  diagnostics.sort_by(compare_diagnostics);
}

fn compare_diagnostics(a: &Diagnostic, b: &Diagnostic) -> Ordering {
  a.primary
    .file
    .cmp(&b.primary.file)
    .then(a.primary.range.start.cmp(&b.primary.range.start))
    .then(a.primary.range.end.cmp(&b.primary.range.end))
    .then(a.code.cmp(b.code))
    .then(a.message.cmp(&b.message))
}
