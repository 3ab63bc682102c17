#![allow(dead_code)]

use isolation_check::{
  CheckOptions, CheckReport, Checker, DeclId, DeclKind, Declaration, DeclarationGraph,
  IsolationAnnotation, TypeKind, TypeRef,
};

pub fn global_actor(id: u32, name: &str) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::Type(TypeKind::Actor)).global_actor_type()
}

pub fn actor(id: u32, name: &str) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::Type(TypeKind::Actor))
}

pub fn class(id: u32, name: &str) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::Type(TypeKind::Class))
}

pub fn structure(id: u32, name: &str) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::Type(TypeKind::Struct))
}

pub fn protocol(id: u32, name: &str) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::Type(TypeKind::Protocol))
}

pub fn func(id: u32, name: &str) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::Function)
}

pub fn method(id: u32, name: &str, owner: u32) -> Declaration {
  func(id, name).enclosed_by(DeclId(owner))
}

pub fn property(id: u32, name: &str, ty: TypeRef) -> Declaration {
  Declaration::new(DeclId(id), name, DeclKind::StoredProperty).typed(ty)
}

pub fn field(id: u32, name: &str, owner: u32, ty: TypeRef) -> Declaration {
  property(id, name, ty).enclosed_by(DeclId(owner))
}

pub fn closure(id: u32, enclosing: u32, inherits_isolation: bool) -> Declaration {
  Declaration::new(
    DeclId(id),
    format!("closure{id}"),
    DeclKind::Closure { inherits_isolation },
  )
  .enclosed_by(DeclId(enclosing))
}

pub fn on_global(actor: u32) -> IsolationAnnotation {
  IsolationAnnotation::GlobalActor(DeclId(actor))
}

pub fn int() -> TypeRef {
  TypeRef::primitive("Int")
}

pub fn nominal(id: u32) -> TypeRef {
  TypeRef::Nominal(DeclId(id))
}

pub fn check(graph: &DeclarationGraph) -> CheckReport {
  check_with(graph, CheckOptions::default())
}

pub fn check_with(graph: &DeclarationGraph, options: CheckOptions) -> CheckReport {
  Checker::new(graph, options).unwrap().check()
}
