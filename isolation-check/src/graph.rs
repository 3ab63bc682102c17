//! Declaration graph consumed by the checker.
//!
//! The front end lowers a compilation unit into [`Declaration`]s (types,
//! functions, stored properties and closures), [`Extension`]s and
//! [`CallEdge`]s. Protocol requirement satisfaction and superclass overrides
//! arrive already resolved into the static `satisfies`/`overrides` edge sets,
//! so isolation inference is plain graph traversal.
//!
//! Construction validates every reference and decomposes the "isolation
//! depends on" relation into strongly connected components, ordered so that
//! every component comes after all components it depends on. The resolver
//! processes declarations one component at a time, which keeps results
//! independent of query order even when conformance or override chains are
//! cyclic.
//!
//! The graph is immutable once built.

use crate::error::{GraphError, Referrer};
use ahash::{AHashMap, AHashSet};
use diagnostics::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeclId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtensionId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Compilation unit a declaration belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

impl ModuleId {
  /// The unit being checked.
  pub const LOCAL: ModuleId = ModuleId(0);
}

impl fmt::Display for DeclId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

impl fmt::Display for ExtensionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ext#{}", self.0)
  }
}

impl fmt::Display for EdgeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "edge#{}", self.0)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
  Struct,
  Enum,
  Class,
  Actor,
  Protocol,
}

impl TypeKind {
  /// Copy-on-assignment types with no shared mutable backing.
  pub fn is_value_type(self) -> bool {
    matches!(self, TypeKind::Struct | TypeKind::Enum)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
  Type(TypeKind),
  Function,
  StoredProperty,
  /// Closure or task body. An inheriting closure runs in its enclosing
  /// function's isolation context for its whole lifetime; a detached one runs
  /// without isolation.
  Closure { inherits_isolation: bool },
}

/// Textual scope a member was declared in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclScope {
  #[default]
  Primary,
  Extension(ExtensionId),
}

/// Isolation written in source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationAnnotation {
  Nonisolated,
  /// `nonisolated(unsafe)`: non-isolated, and the shared-mutable check is
  /// waived in favour of an audit record.
  NonisolatedUnsafe,
  GlobalActor(DeclId),
  /// An `isolated` parameter binding the declaration to that actor value.
  IsolatedParam { name: String, actor: DeclId },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendableAssertion {
  #[default]
  None,
  /// Declared conformance, verified structurally.
  Checked,
  /// Caller-asserted opt-out, accepted without verification.
  Unchecked,
}

/// Already-substituted type of a stored field or transferred value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
  /// Builtin scalar; always transferable.
  Primitive(String),
  Nominal(DeclId),
  Tuple(Vec<TypeRef>),
  Optional(Box<TypeRef>),
  Function { sendable: bool },
}

impl TypeRef {
  pub fn primitive(name: impl Into<String>) -> Self {
    TypeRef::Primitive(name.into())
  }

  /// Every nominal declaration mentioned by this type.
  pub fn nominals(&self) -> Vec<DeclId> {
    let mut out = Vec::new();
    self.collect_nominals(&mut out);
    out
  }

  fn collect_nominals(&self, out: &mut Vec<DeclId>) {
    match self {
      TypeRef::Nominal(id) => out.push(*id),
      TypeRef::Tuple(items) => items.iter().for_each(|item| item.collect_nominals(out)),
      TypeRef::Optional(inner) => inner.collect_nominals(out),
      TypeRef::Primitive(_) | TypeRef::Function { .. } => {}
    }
  }
}

impl fmt::Display for TypeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TypeRef::Primitive(name) => f.write_str(name),
      TypeRef::Nominal(id) => write!(f, "{id}"),
      TypeRef::Tuple(items) => {
        f.write_str("(")?;
        for (idx, item) in items.iter().enumerate() {
          if idx > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{item}")?;
        }
        f.write_str(")")
      }
      TypeRef::Optional(inner) => write!(f, "{inner}?"),
      TypeRef::Function { sendable: true } => f.write_str("@Sendable () -> ()"),
      TypeRef::Function { sendable: false } => f.write_str("() -> ()"),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conformance {
  pub protocol: DeclId,
  pub scope: DeclScope,
}

/// Default value expression of a stored property, reduced to the
/// declarations it needs to evaluate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValue {
  pub references: Vec<DeclId>,
  pub span: Option<Span>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
  pub id: DeclId,
  pub name: String,
  pub kind: DeclKind,
  pub span: Option<Span>,
  pub enclosing: Option<DeclId>,
  pub scope: DeclScope,
  pub annotations: Vec<IsolationAnnotation>,
  /// Protocol requirements this declaration witnesses.
  pub satisfies: Vec<DeclId>,
  /// Supertype members this declaration overrides.
  pub overrides: Vec<DeclId>,
  pub conformances: Vec<Conformance>,
  /// Superclasses, or refined protocols for a protocol.
  pub supertypes: Vec<DeclId>,
  pub is_async: bool,
  pub is_static: bool,
  pub is_mutable: bool,
  pub is_final: bool,
  pub is_global_actor: bool,
  pub is_entry_point: bool,
  pub in_entry_file: bool,
  pub is_initializer: bool,
  /// Protocol that only actors may conform to.
  pub actor_constrained: bool,
  pub ty: Option<TypeRef>,
  pub default_value: Option<DefaultValue>,
  pub sendable: SendableAssertion,
}

impl Declaration {
  pub fn new(id: DeclId, name: impl Into<String>, kind: DeclKind) -> Self {
    Self {
      id,
      name: name.into(),
      kind,
      span: None,
      enclosing: None,
      scope: DeclScope::Primary,
      annotations: Vec::new(),
      satisfies: Vec::new(),
      overrides: Vec::new(),
      conformances: Vec::new(),
      supertypes: Vec::new(),
      is_async: false,
      is_static: false,
      is_mutable: false,
      is_final: false,
      is_global_actor: false,
      is_entry_point: false,
      in_entry_file: false,
      is_initializer: false,
      actor_constrained: false,
      ty: None,
      default_value: None,
      sendable: SendableAssertion::None,
    }
  }

  pub fn with_span(mut self, span: Span) -> Self {
    self.span = Some(span);
    self
  }

  pub fn enclosed_by(mut self, enclosing: DeclId) -> Self {
    self.enclosing = Some(enclosing);
    self
  }

  pub fn in_scope(mut self, scope: DeclScope) -> Self {
    self.scope = scope;
    self
  }

  pub fn annotated(mut self, annotation: IsolationAnnotation) -> Self {
    self.annotations.push(annotation);
    self
  }

  pub fn satisfying(mut self, requirement: DeclId) -> Self {
    self.satisfies.push(requirement);
    self
  }

  pub fn overriding(mut self, overridden: DeclId) -> Self {
    self.overrides.push(overridden);
    self
  }

  pub fn conforming_to(mut self, protocol: DeclId, scope: DeclScope) -> Self {
    self.conformances.push(Conformance { protocol, scope });
    self
  }

  pub fn inheriting_from(mut self, supertype: DeclId) -> Self {
    self.supertypes.push(supertype);
    self
  }

  pub fn asynchronous(mut self) -> Self {
    self.is_async = true;
    self
  }

  pub fn static_member(mut self) -> Self {
    self.is_static = true;
    self
  }

  pub fn mutable(mut self) -> Self {
    self.is_mutable = true;
    self
  }

  pub fn final_type(mut self) -> Self {
    self.is_final = true;
    self
  }

  pub fn global_actor_type(mut self) -> Self {
    self.is_global_actor = true;
    self
  }

  pub fn entry_point(mut self) -> Self {
    self.is_entry_point = true;
    self
  }

  pub fn in_entry_file(mut self) -> Self {
    self.in_entry_file = true;
    self
  }

  pub fn initializer(mut self) -> Self {
    self.is_initializer = true;
    self
  }

  pub fn actor_only(mut self) -> Self {
    self.actor_constrained = true;
    self
  }

  pub fn typed(mut self, ty: TypeRef) -> Self {
    self.ty = Some(ty);
    self
  }

  pub fn with_default(mut self, default_value: DefaultValue) -> Self {
    self.default_value = Some(default_value);
    self
  }

  pub fn asserting(mut self, sendable: SendableAssertion) -> Self {
    self.sendable = sendable;
    self
  }

  pub fn type_kind(&self) -> Option<TypeKind> {
    match self.kind {
      DeclKind::Type(kind) => Some(kind),
      _ => None,
    }
  }

  pub fn is_type(&self) -> bool {
    self.type_kind().is_some()
  }

  pub fn is_top_level(&self) -> bool {
    self.enclosing.is_none()
  }

  pub fn is_nonisolated_unsafe(&self) -> bool {
    self
      .annotations
      .iter()
      .any(|ann| matches!(ann, IsolationAnnotation::NonisolatedUnsafe))
  }

  pub fn isolated_param(&self) -> Option<&str> {
    self.annotations.iter().find_map(|ann| match ann {
      IsolationAnnotation::IsolatedParam { name, .. } => Some(name.as_str()),
      _ => None,
    })
  }

  /// Declarations whose isolation may feed into this one's.
  fn isolation_dependencies(&self) -> impl Iterator<Item = DeclId> + '_ {
    self
      .enclosing
      .into_iter()
      .chain(self.satisfies.iter().copied())
      .chain(self.overrides.iter().copied())
      .chain(self.conformances.iter().map(|c| c.protocol))
      .chain(self.supertypes.iter().copied())
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
  pub id: ExtensionId,
  pub extended: DeclId,
  pub global_actor: Option<DeclId>,
  pub span: Option<Span>,
}

impl Extension {
  pub fn new(id: ExtensionId, extended: DeclId) -> Self {
    Self {
      id,
      extended,
      global_actor: None,
      span: None,
    }
  }

  pub fn isolated_to(mut self, actor: DeclId) -> Self {
    self.global_actor = Some(actor);
    self
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
  #[default]
  Call,
  /// Task creation; asynchronous by construction.
  Spawn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
  Argument,
  Capture,
  Result,
}

impl ValueKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ValueKind::Argument => "argument",
      ValueKind::Capture => "captured value",
      ValueKind::Result => "result",
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transfer {
  pub name: String,
  pub ty: TypeRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
  pub id: EdgeId,
  pub caller: DeclId,
  pub callee: DeclId,
  pub kind: EdgeKind,
  /// The call site is marked as a potential suspension point.
  pub suspends: bool,
  /// Caller-side name of the actor value the callee is isolated to, e.g.
  /// `self` for `self.update()` or `other` for `other.update()`.
  pub receiver: Option<String>,
  pub arguments: Vec<Transfer>,
  pub captures: Vec<Transfer>,
  pub result: Option<TypeRef>,
  pub span: Option<Span>,
}

impl CallEdge {
  pub fn new(id: EdgeId, caller: DeclId, callee: DeclId) -> Self {
    Self {
      id,
      caller,
      callee,
      kind: EdgeKind::Call,
      suspends: false,
      receiver: None,
      arguments: Vec::new(),
      captures: Vec::new(),
      result: None,
      span: None,
    }
  }

  pub fn awaited(mut self) -> Self {
    self.suspends = true;
    self
  }

  pub fn spawning(mut self) -> Self {
    self.kind = EdgeKind::Spawn;
    self
  }

  pub fn on(mut self, receiver: impl Into<String>) -> Self {
    self.receiver = Some(receiver.into());
    self
  }

  pub fn argument(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
    self.arguments.push(Transfer {
      name: name.into(),
      ty,
    });
    self
  }

  pub fn capture(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
    self.captures.push(Transfer {
      name: name.into(),
      ty,
    });
    self
  }

  pub fn returning(mut self, ty: TypeRef) -> Self {
    self.result = Some(ty);
    self
  }

  pub fn with_span(mut self, span: Span) -> Self {
    self.span = Some(span);
    self
  }

  /// Whether the transition is asynchronous at the call site.
  pub fn is_asynchronous(&self) -> bool {
    self.suspends || self.kind == EdgeKind::Spawn
  }
}

/// Strongly connected components of the isolation dependency relation.
#[derive(Debug, Default)]
pub struct Components {
  members: Vec<Vec<DeclId>>,
  deps: Vec<Vec<usize>>,
  of: AHashMap<DeclId, usize>,
}

impl Components {
  pub fn len(&self) -> usize {
    self.members.len()
  }

  pub fn is_empty(&self) -> bool {
    self.members.is_empty()
  }

  /// Members in ascending id order.
  pub fn members(&self, component: usize) -> &[DeclId] {
    &self.members[component]
  }

  pub fn dependencies(&self, component: usize) -> &[usize] {
    &self.deps[component]
  }

  pub fn component_of(&self, decl: DeclId) -> Option<usize> {
    self.of.get(&decl).copied()
  }

  /// Components grouped so that each group only depends on earlier groups.
  pub fn levels(&self) -> Vec<Vec<usize>> {
    let mut level = vec![0usize; self.members.len()];
    let mut levels: Vec<Vec<usize>> = Vec::new();
    // Components are already ordered dependencies-first.
    for component in 0..self.members.len() {
      let depth = self.deps[component]
        .iter()
        .map(|dep| level[*dep] + 1)
        .max()
        .unwrap_or(0);
      level[component] = depth;
      if levels.len() <= depth {
        levels.resize_with(depth + 1, Vec::new);
      }
      levels[depth].push(component);
    }
    levels
  }

  fn build(decls: &BTreeMap<DeclId, Declaration>) -> Self {
    let ids: Vec<DeclId> = decls.keys().copied().collect();
    let index: AHashMap<DeclId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let adjacency: Vec<Vec<usize>> = ids
      .iter()
      .map(|id| {
        let mut succ: Vec<usize> = decls[id]
          .isolation_dependencies()
          .filter_map(|dep| index.get(&dep).copied())
          .collect();
        succ.sort_unstable();
        succ.dedup();
        succ
      })
      .collect();

    let sccs = tarjan(&adjacency);
    let mut of = AHashMap::with_capacity(ids.len());
    let mut members = Vec::with_capacity(sccs.len());
    for (component, nodes) in sccs.iter().enumerate() {
      let mut decl_ids: Vec<DeclId> = nodes.iter().map(|n| ids[*n]).collect();
      decl_ids.sort_unstable();
      for id in &decl_ids {
        of.insert(*id, component);
      }
      members.push(decl_ids);
    }
    let deps = sccs
      .iter()
      .enumerate()
      .map(|(component, nodes)| {
        let mut seen = AHashSet::new();
        let mut out: Vec<usize> = nodes
          .iter()
          .flat_map(|n| adjacency[*n].iter())
          .map(|succ| of[&ids[*succ]])
          .filter(|dep| *dep != component && seen.insert(*dep))
          .collect();
        out.sort_unstable();
        out
      })
      .collect();
    Components { members, deps, of }
  }
}

/// Iterative Tarjan. Components come out dependencies-first: a component is
/// emitted only after everything reachable from it.
fn tarjan(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
  const UNVISITED: usize = usize::MAX;
  let n = adjacency.len();
  let mut index = vec![UNVISITED; n];
  let mut lowlink = vec![0usize; n];
  let mut on_stack = vec![false; n];
  let mut stack: Vec<usize> = Vec::new();
  let mut calls: Vec<(usize, usize)> = Vec::new();
  let mut next = 0usize;
  let mut out = Vec::new();

  for root in 0..n {
    if index[root] != UNVISITED {
      continue;
    }
    index[root] = next;
    lowlink[root] = next;
    next += 1;
    stack.push(root);
    on_stack[root] = true;
    calls.push((root, 0));

    while let Some(frame) = calls.last_mut() {
      let v = frame.0;
      if frame.1 < adjacency[v].len() {
        let w = adjacency[v][frame.1];
        frame.1 += 1;
        if index[w] == UNVISITED {
          index[w] = next;
          lowlink[w] = next;
          next += 1;
          stack.push(w);
          on_stack[w] = true;
          calls.push((w, 0));
        } else if on_stack[w] {
          lowlink[v] = lowlink[v].min(index[w]);
        }
        continue;
      }

      calls.pop();
      if let Some(parent) = calls.last() {
        let p = parent.0;
        lowlink[p] = lowlink[p].min(lowlink[v]);
      }
      if lowlink[v] == index[v] {
        let mut component = Vec::new();
        while let Some(w) = stack.pop() {
          on_stack[w] = false;
          component.push(w);
          if w == v {
            break;
          }
        }
        out.push(component);
      }
    }
  }
  out
}

#[derive(Debug)]
pub struct DeclarationGraph {
  decls: BTreeMap<DeclId, Declaration>,
  extensions: BTreeMap<ExtensionId, Extension>,
  edges: Vec<CallEdge>,
  members: AHashMap<DeclId, Vec<DeclId>>,
  components: Components,
}

impl DeclarationGraph {
  pub fn new(
    decls: Vec<Declaration>,
    extensions: Vec<Extension>,
    mut edges: Vec<CallEdge>,
  ) -> Result<Self, GraphError> {
    let mut decl_map = BTreeMap::new();
    for decl in decls {
      let id = decl.id;
      if decl_map.insert(id, decl).is_some() {
        return Err(GraphError::DuplicateDecl(id));
      }
    }
    let mut ext_map = BTreeMap::new();
    for ext in extensions {
      let id = ext.id;
      if ext_map.insert(id, ext).is_some() {
        return Err(GraphError::DuplicateExtension(id));
      }
    }
    edges.sort_by_key(|edge| edge.id);
    if let Some(pair) = edges.windows(2).find(|pair| pair[0].id == pair[1].id) {
      return Err(GraphError::DuplicateEdge(pair[0].id));
    }

    validate(&decl_map, &ext_map, &edges)?;

    let mut members: AHashMap<DeclId, Vec<DeclId>> = AHashMap::new();
    for decl in decl_map.values() {
      if let Some(parent) = decl.enclosing {
        members.entry(parent).or_default().push(decl.id);
      }
    }
    let components = Components::build(&decl_map);

    Ok(Self {
      decls: decl_map,
      extensions: ext_map,
      edges,
      members,
      components,
    })
  }

  pub fn builder() -> GraphBuilder {
    GraphBuilder::default()
  }

  pub fn decl(&self, id: DeclId) -> Option<&Declaration> {
    self.decls.get(&id)
  }

  /// All declarations in ascending id order.
  pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
    self.decls.values()
  }

  pub fn extension(&self, id: ExtensionId) -> Option<&Extension> {
    self.extensions.get(&id)
  }

  /// Call edges in ascending id order.
  pub fn edges(&self) -> &[CallEdge] {
    &self.edges
  }

  pub fn components(&self) -> &Components {
    &self.components
  }

  /// Declarations directly enclosed by `parent`, in ascending id order.
  pub fn members(&self, parent: DeclId) -> impl Iterator<Item = &Declaration> {
    self
      .members
      .get(&parent)
      .into_iter()
      .flatten()
      .filter_map(|id| self.decls.get(id))
  }

  /// Instance stored properties of a type.
  pub fn stored_fields(&self, ty: DeclId) -> impl Iterator<Item = &Declaration> {
    self
      .members(ty)
      .filter(|member| member.kind == DeclKind::StoredProperty && !member.is_static)
  }

  pub fn initializers(&self, ty: DeclId) -> impl Iterator<Item = &Declaration> {
    self
      .members(ty)
      .filter(|member| member.kind == DeclKind::Function && member.is_initializer)
  }

  /// The enclosing declaration when it is a type.
  pub fn enclosing_type(&self, decl: &Declaration) -> Option<&Declaration> {
    decl
      .enclosing
      .and_then(|id| self.decl(id))
      .filter(|parent| parent.is_type())
  }

  /// Scope in which `ty` states its conformance to `protocol`.
  pub fn conformance_scope(&self, ty: DeclId, protocol: DeclId) -> Option<DeclScope> {
    self
      .decl(ty)?
      .conformances
      .iter()
      .find(|conformance| conformance.protocol == protocol)
      .map(|conformance| conformance.scope)
  }

  pub fn span_of(&self, decl: DeclId) -> Option<Span> {
    self.decl(decl).and_then(|d| d.span)
  }

  pub fn name_of(&self, decl: DeclId) -> &str {
    self.decl(decl).map(|d| d.name.as_str()).unwrap_or("<unknown>")
  }
}

fn validate(
  decls: &BTreeMap<DeclId, Declaration>,
  extensions: &BTreeMap<ExtensionId, Extension>,
  edges: &[CallEdge],
) -> Result<(), GraphError> {
  let check = |from: Referrer, id: DeclId, role: &'static str| {
    if decls.contains_key(&id) {
      Ok(())
    } else {
      Err(GraphError::UnknownDecl {
        from,
        missing: id,
        role,
      })
    }
  };
  let check_type = |from: Referrer, ty: &TypeRef| {
    ty.nominals()
      .into_iter()
      .try_for_each(|id| check(from, id, "type"))
  };

  for decl in decls.values() {
    let from = Referrer::Decl(decl.id);
    if let Some(parent) = decl.enclosing {
      check(from, parent, "enclosing declaration")?;
    }
    if let DeclScope::Extension(ext) = decl.scope {
      if !extensions.contains_key(&ext) {
        return Err(GraphError::UnknownExtension { from, missing: ext });
      }
    }
    for ann in &decl.annotations {
      match ann {
        IsolationAnnotation::GlobalActor(actor)
        | IsolationAnnotation::IsolatedParam { actor, .. } => check(from, *actor, "actor")?,
        IsolationAnnotation::Nonisolated | IsolationAnnotation::NonisolatedUnsafe => {}
      }
    }
    for id in &decl.satisfies {
      check(from, *id, "requirement")?;
    }
    for id in &decl.overrides {
      check(from, *id, "overridden declaration")?;
    }
    for conformance in &decl.conformances {
      check(from, conformance.protocol, "protocol")?;
      if let DeclScope::Extension(ext) = conformance.scope {
        if !extensions.contains_key(&ext) {
          return Err(GraphError::UnknownExtension { from, missing: ext });
        }
      }
    }
    for id in &decl.supertypes {
      check(from, *id, "supertype")?;
    }
    if let Some(ty) = &decl.ty {
      check_type(from, ty)?;
    } else if decl.kind == DeclKind::StoredProperty {
      return Err(GraphError::MissingPropertyType(decl.id));
    }
    if let Some(default) = &decl.default_value {
      for id in &default.references {
        check(from, *id, "default value reference")?;
      }
    }
  }

  for decl in decls.values() {
    let mut parent = decl.enclosing;
    let mut steps = 0usize;
    while let Some(id) = parent {
      steps += 1;
      if id == decl.id || steps > decls.len() {
        return Err(GraphError::CyclicEnclosing(decl.id));
      }
      parent = decls.get(&id).and_then(|outer| outer.enclosing);
    }
  }

  for ext in extensions.values() {
    let from = Referrer::Extension(ext.id);
    check(from, ext.extended, "extended type")?;
    if let Some(actor) = ext.global_actor {
      check(from, actor, "actor")?;
    }
  }

  for edge in edges {
    let from = Referrer::Edge(edge.id);
    check(from, edge.caller, "caller")?;
    check(from, edge.callee, "callee")?;
    for transfer in edge.arguments.iter().chain(edge.captures.iter()) {
      check_type(from, &transfer.ty)?;
    }
    if let Some(ty) = &edge.result {
      check_type(from, ty)?;
    }
  }
  Ok(())
}

/// Incremental construction, mostly for hosts and tests that assemble a
/// graph by hand.
#[derive(Debug, Default)]
pub struct GraphBuilder {
  decls: Vec<Declaration>,
  extensions: Vec<Extension>,
  edges: Vec<CallEdge>,
}

impl GraphBuilder {
  pub fn decl(mut self, decl: Declaration) -> Self {
    self.decls.push(decl);
    self
  }

  pub fn push_decl(&mut self, decl: Declaration) -> &mut Self {
    self.decls.push(decl);
    self
  }

  pub fn extension(mut self, extension: Extension) -> Self {
    self.extensions.push(extension);
    self
  }

  pub fn edge(mut self, edge: CallEdge) -> Self {
    self.edges.push(edge);
    self
  }

  pub fn push_edge(&mut self, edge: CallEdge) -> &mut Self {
    self.edges.push(edge);
    self
  }

  pub fn build(self) -> Result<DeclarationGraph, GraphError> {
    DeclarationGraph::new(self.decls, self.extensions, self.edges)
  }
}
