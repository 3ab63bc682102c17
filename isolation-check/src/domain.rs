use crate::graph::DeclId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static isolation domain of a declaration.
///
/// Domains compare structurally. Two `ActorInstance` domains only denote the
/// same runtime actor when the call site binds them to the same value; the
/// boundary analysis tracks that through binding names.
#[derive(
  Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolationDomain {
  #[default]
  NonIsolated,
  ActorInstance(DeclId),
  GlobalActor(DeclId),
}

impl IsolationDomain {
  pub fn is_isolated(self) -> bool {
    self != IsolationDomain::NonIsolated
  }

  pub fn global_actor(self) -> Option<DeclId> {
    match self {
      IsolationDomain::GlobalActor(actor) => Some(actor),
      _ => None,
    }
  }
}

impl fmt::Display for IsolationDomain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IsolationDomain::NonIsolated => f.write_str("nonisolated"),
      IsolationDomain::ActorInstance(actor) => write!(f, "actor-isolated to {actor}"),
      IsolationDomain::GlobalActor(actor) => write!(f, "global actor {actor}"),
    }
  }
}

/// Which rule produced a resolved domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationSource {
  /// `nonisolated` or an explicit global actor attribute.
  Explicit,
  IsolatedParam,
  /// Instance method of an actor, isolated through `self`.
  ActorSelf,
  /// Instance stored property of an actor.
  ActorStorage,
  /// The type is itself an actor (or a global actor).
  ActorType,
  EntryPoint,
  /// Inherited closure/task context.
  ClosureContext,
  /// Global actor attribute on the enclosing extension.
  Extension,
  /// Type-level isolation of the enclosing type.
  EnclosingType,
  /// Witness of a global-actor requirement in the conformance's scope.
  Requirement,
  Override,
  /// Type-level: same-scope conformance to a global-actor protocol.
  Conformance,
  /// Type-level: superclass or refined protocol.
  Inheritance,
  #[default]
  Default,
  Cycle,
  Conflict,
  Ambiguous,
}

impl IsolationSource {
  /// The domain came from an error path rather than a rule.
  pub fn is_recovery(self) -> bool {
    matches!(
      self,
      IsolationSource::Cycle | IsolationSource::Conflict | IsolationSource::Ambiguous
    )
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolved {
  pub domain: IsolationDomain,
  pub source: IsolationSource,
}

impl Resolved {
  pub const fn new(domain: IsolationDomain, source: IsolationSource) -> Self {
    Self { domain, source }
  }

  pub const fn nonisolated(source: IsolationSource) -> Self {
    Self::new(IsolationDomain::NonIsolated, source)
  }
}
