//! Configuration surface recognised by the checker.
//!
//! Options arrive from the host toolchain, usually as JSON:
//!
//! ```
//! use isolation_check::{CheckMode, CheckOptions, DeclId, ModuleId};
//!
//! let options = CheckOptions::from_json(
//!   r#"{ "mode": "warn", "entryPointGlobalActor": 1, "moduleBoundary": { "7": 2 } }"#,
//! )
//! .unwrap();
//! assert_eq!(options.mode, CheckMode::Warn);
//! assert_eq!(options.entry_point_global_actor, Some(DeclId(1)));
//! assert_eq!(options.module_of(DeclId(7)), ModuleId(2));
//! assert_eq!(options.module_of(DeclId(8)), ModuleId::LOCAL);
//! ```

use crate::boundary::ViolationCategory;
use crate::error::ConfigError;
use crate::graph::{DeclId, DeclarationGraph, ModuleId, TypeKind};
use diagnostics::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether violations fail the compilation or are only reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
  Warn,
  #[default]
  Error,
}

impl CheckMode {
  pub fn severity(self) -> Severity {
    match self {
      CheckMode::Warn => Severity::Warning,
      CheckMode::Error => Severity::Error,
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckOptions {
  pub mode: CheckMode,
  /// Assumed isolation of the designated entry point and the top-level
  /// mutable declarations of the entry file.
  pub entry_point_global_actor: Option<DeclId>,
  /// Owning module per declaration; anything missing is local.
  pub module_boundary: BTreeMap<DeclId, ModuleId>,
  /// Categories the host does not want reported.
  pub suppress: BTreeSet<ViolationCategory>,
  /// Resolve and analyze with the rayon driver.
  pub parallel: bool,
}

impl CheckOptions {
  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(text)?)
  }

  pub fn module_of(&self, decl: DeclId) -> ModuleId {
    self
      .module_boundary
      .get(&decl)
      .copied()
      .unwrap_or(ModuleId::LOCAL)
  }

  pub fn is_suppressed(&self, category: ViolationCategory) -> bool {
    self.suppress.contains(&category)
  }

  /// Check references into the graph the options were written against.
  pub fn validate(&self, graph: &DeclarationGraph) -> Result<(), ConfigError> {
    if let Some(actor) = self.entry_point_global_actor {
      let decl = graph
        .decl(actor)
        .ok_or(ConfigError::UnknownEntryPointActor(actor))?;
      if decl.type_kind() != Some(TypeKind::Actor) || !decl.is_global_actor {
        return Err(ConfigError::NotAnActor(actor));
      }
    }
    Ok(())
  }
}
