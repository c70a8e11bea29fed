//! The symbol environment used while lowering an AST to IR.
//!
//! Scopes are kept as a stack of frames rather than a parent-linked tree;
//! `get` walks the whole stack but `put`/`update` only ever touch the
//! innermost frame, matching the source compiler's `Environment.update`,
//! which never consults its `parent_env`.

use std::fmt::Debug;

use derive_more::Display;

use crate::common::{Id, Map};

/// What we know about a bound variable.
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub ty: Id,
    pub name: Id,
    pub temp: bool,
    pub offset: Option<i32>,
}

impl VarInfo {
    pub fn named(ty: Id, name: Id) -> Self {
        VarInfo {
            ty,
            name,
            temp: false,
            offset: None,
        }
    }

    pub fn temp(ty: Id, name: Id) -> Self {
        VarInfo {
            ty,
            name,
            temp: true,
            offset: None,
        }
    }
}

#[derive(Display)]
#[display("{} was redefined", _0.as_str())]
pub struct Redefinition(pub Id);

impl Debug for Redefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Display)]
#[display("no such variable in the current scope: {}", _0.as_str())]
pub struct UnknownVariable(pub Id);

impl Debug for UnknownVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// A lexically nested mapping from variable name to [`VarInfo`].
pub struct Env {
    scopes: Vec<Map<Id, VarInfo>>,
}

impl Env {
    /// A fresh environment with a single, empty root scope.
    pub fn new() -> Self {
        Env {
            scopes: vec![Map::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Map::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        assert!(!self.scopes.is_empty(), "popped the root scope");
    }

    /// Look up `name`, walking outward through enclosing scopes. Returns
    /// `None` only when `name` is absent in every scope.
    pub fn get(&self, name: Id) -> Option<&VarInfo> {
        self.scopes.iter().rev().find_map(|scope| scope.get(&name))
    }

    /// Bind `name` in the innermost scope. Fails with [`Redefinition`] if
    /// `name` is already bound *locally* and `allow_overwrite` is false.
    pub fn put(&mut self, name: Id, info: VarInfo, allow_overwrite: bool) -> Result<(), Redefinition> {
        let scope = self.scopes.last_mut().expect("env always has a scope");
        if !allow_overwrite && scope.contains_key(&name) {
            return Err(Redefinition(name));
        }
        scope.insert(name, info);
        Ok(())
    }

    /// Apply `f` to the info for `name` if it is bound in the innermost
    /// scope. Fails if `name` is absent there, even if it is bound in an
    /// enclosing scope.
    pub fn update(&mut self, name: Id, f: impl FnOnce(&mut VarInfo)) -> Result<(), UnknownVariable> {
        let scope = self.scopes.last_mut().expect("env always has a scope");
        match scope.get_mut(&name) {
            Some(info) => {
                f(info);
                Ok(())
            }
            None => Err(UnknownVariable(name)),
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;

    #[test]
    fn get_walks_enclosing_scopes() {
        let mut env = Env::new();
        env.put(intern("i"), VarInfo::named(intern("int"), intern("i")), false)
            .unwrap();
        env.push_scope();
        assert!(env.get(intern("i")).is_some());
        assert!(env.get(intern("missing")).is_none());
    }

    #[test]
    fn put_rejects_local_redefinition() {
        let mut env = Env::new();
        let name = intern("i");
        env.put(name, VarInfo::named(intern("int"), name), false).unwrap();
        assert!(env.put(name, VarInfo::named(intern("int"), name), false).is_err());
    }

    #[test]
    fn update_does_not_reach_into_enclosing_scopes() {
        let mut env = Env::new();
        let name = intern("i");
        env.put(name, VarInfo::named(intern("int"), name), false).unwrap();
        env.push_scope();
        assert!(env.update(name, |info| info.offset = Some(4)).is_err());
    }
}
