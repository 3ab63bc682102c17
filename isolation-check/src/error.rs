use crate::graph::{DeclId, EdgeId, ExtensionId};
use std::error::Error;
use std::fmt;

/// Entity holding a reference that failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Referrer {
  Decl(DeclId),
  Extension(ExtensionId),
  Edge(EdgeId),
}

impl fmt::Display for Referrer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Referrer::Decl(id) => write!(f, "declaration {id}"),
      Referrer::Extension(id) => write!(f, "extension {id}"),
      Referrer::Edge(id) => write!(f, "call edge {id}"),
    }
  }
}

/// The front end handed over a graph that does not hang together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
  DuplicateDecl(DeclId),
  DuplicateExtension(ExtensionId),
  DuplicateEdge(EdgeId),
  UnknownDecl {
    from: Referrer,
    missing: DeclId,
    role: &'static str,
  },
  UnknownExtension {
    from: Referrer,
    missing: ExtensionId,
  },
  MissingPropertyType(DeclId),
  /// The declaration is (transitively) enclosed by itself.
  CyclicEnclosing(DeclId),
}

impl fmt::Display for GraphError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphError::DuplicateDecl(id) => write!(f, "declaration {id} defined twice"),
      GraphError::DuplicateExtension(id) => write!(f, "extension {id} defined twice"),
      GraphError::DuplicateEdge(id) => write!(f, "call edge {id} defined twice"),
      GraphError::UnknownDecl {
        from,
        missing,
        role,
      } => write!(f, "{from} references unknown declaration {missing} as {role}"),
      GraphError::UnknownExtension { from, missing } => {
        write!(f, "{from} references unknown extension {missing}")
      }
      GraphError::MissingPropertyType(id) => {
        write!(f, "stored property {id} has no type")
      }
      GraphError::CyclicEnclosing(id) => write!(f, "declaration {id} encloses itself"),
    }
  }
}

impl Error for GraphError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  Parse(String),
  UnknownEntryPointActor(DeclId),
  NotAnActor(DeclId),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::Parse(message) => write!(f, "invalid checker options: {message}"),
      ConfigError::UnknownEntryPointActor(id) => {
        write!(f, "entry point global actor {id} is not a declaration")
      }
      ConfigError::NotAnActor(id) => {
        write!(f, "entry point global actor {id} is not a global actor type")
      }
    }
  }
}

impl Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
  fn from(value: serde_json::Error) -> Self {
    ConfigError::Parse(value.to_string())
  }
}
