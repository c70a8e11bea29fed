//! Common definitions that are shared between different parts of the compiler.

use derive_more::Display;

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
pub type Id = internment::Intern<String>;

/// Intern a string as an identifier.
pub fn intern(s: impl Into<String>) -> Id {
    Id::new(s.into())
}

/// Arithmetic operators, shared by the AST and the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum BOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
}

/// Relational operators, shared by the AST and the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum RelOp {
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
}
