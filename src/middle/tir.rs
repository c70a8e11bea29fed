//! The tiny IR: an append-only table of three-address quadruples.
//!
//! Unlike a tree of typed instructions, the table is linear and
//! label-free while it's being built; control flow is expressed purely
//! through jump targets recorded as table indices, resolved later by
//! [`QTable::patch`]. This mirrors the source compiler's quadruple stream,
//! but replaces its in-place mutation of a `result` string with an
//! explicit handle so the rest of the compiler never pokes at a
//! quadruple's fields directly.

use derive_more::Display;

use crate::common::{BOp, Id, RelOp};

/// An operand to a quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Operand {
    #[display("{}", _0.as_str())]
    Var(Id),
    #[display("{_0}")]
    Const(i64),
    #[display("L{_0}")]
    Label(usize),
}

impl Operand {
    pub fn as_var(&self) -> Option<Id> {
        match self {
            Operand::Var(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Operand::Const(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<usize> {
        match self {
            Operand::Label(i) => Some(*i),
            _ => None,
        }
    }
}

/// The operation a quadruple performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Op {
    #[display("{_0}")]
    Arith(BOp),
    #[display("=")]
    Copy,
    #[display("goto")]
    Goto,
    #[display("if{_0}")]
    IfRel(RelOp),
    /// The source compiler's older unary `if` form (truthiness test). Never
    /// constructed by this crate's lowering rules, which always have a
    /// comparison to lower into `IfRel`; kept for data-model completeness
    /// and so `back::codegen` has a defensive arm for it.
    #[display("if")]
    IfTruthy,
}

/// A single three-address instruction.
#[derive(Debug, Clone, Copy)]
pub struct Quadruple {
    pub op: Op,
    pub arg1: Option<Operand>,
    pub arg2: Option<Operand>,
    pub result: Option<Operand>,
}

impl std::fmt::Display for Quadruple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |o: Option<Operand>| o.map(|o| o.to_string()).unwrap_or_else(|| "_".to_string());
        match self.op {
            Op::Goto => write!(f, "goto {}", show(self.result)),
            Op::IfRel(rel) => write!(
                f,
                "if{rel} {} {} goto {}",
                show(self.arg1),
                show(self.arg2),
                show(self.result)
            ),
            Op::IfTruthy => write!(f, "if {} goto {}", show(self.arg1), show(self.result)),
            Op::Copy => write!(f, "{} = {}", show(self.result), show(self.arg1)),
            Op::Arith(op) => write!(f, "{} = {} {op} {}", show(self.result), show(self.arg1), show(self.arg2)),
        }
    }
}

/// A handle to a jump quadruple whose target is not yet known.
///
/// This is the only way to mutate a quadruple's `result` field after it has
/// been appended (Invariant Q1), and [`QTable::patch`] refuses to resolve
/// the same handle twice (P9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct JumpHandle(usize);

impl JumpHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An append-only sequence of quadruples.
#[derive(Debug, Default)]
pub struct QTable {
    quads: Vec<Quadruple>,
}

impl QTable {
    pub fn new() -> Self {
        QTable::default()
    }

    /// Append a non-jump quadruple (its `result`, if any, is already known).
    pub fn append(&mut self, q: Quadruple) -> usize {
        let index = self.quads.len();
        self.quads.push(q);
        index
    }

    /// Append a jump quadruple with an unresolved target, returning a
    /// handle for later patching.
    pub fn emit_jump(&mut self, op: Op, arg1: Option<Operand>, arg2: Option<Operand>) -> JumpHandle {
        let index = self.append(Quadruple {
            op,
            arg1,
            arg2,
            result: None,
        });
        JumpHandle(index)
    }

    pub fn at(&self, index: usize) -> &Quadruple {
        &self.quads[index]
    }

    pub fn next_index(&self) -> usize {
        self.quads.len()
    }

    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quadruple> {
        self.quads.iter()
    }

    /// Resolve a jump's target. Panics if the handle's target has already
    /// been resolved — backpatching is strictly a once-only operation.
    pub fn patch(&mut self, handle: JumpHandle, target: usize) {
        let quad = &mut self.quads[handle.0];
        assert!(
            quad.result.is_none(),
            "attempted to backpatch an already-resolved jump at index {}",
            handle.0
        );
        quad.result = Some(Operand::Label(target));
    }

    /// `true` if every jump in the table has a resolved target (P1).
    pub fn fully_resolved(&self) -> bool {
        self.quads.iter().all(|q| match q.op {
            Op::Goto | Op::IfRel(_) | Op::IfTruthy => q.result.is_some(),
            _ => true,
        })
    }
}

impl std::fmt::Display for QTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, q) in self.quads.iter().enumerate() {
            writeln!(f, "{i}: {q}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;

    fn var(name: &str) -> Operand {
        Operand::Var(intern(name))
    }

    #[test]
    fn append_returns_monotonic_indices() {
        let mut table = QTable::new();
        let i0 = table.append(Quadruple {
            op: Op::Copy,
            arg1: Some(Operand::Const(0)),
            arg2: None,
            result: Some(var("i")),
        });
        let i1 = table.append(Quadruple {
            op: Op::Copy,
            arg1: Some(Operand::Const(1)),
            arg2: None,
            result: Some(var("j")),
        });
        assert_eq!(i0, 0);
        assert_eq!(i1, 1);
        assert_eq!(table.next_index(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn patch_resolves_a_jump_exactly_once() {
        let mut table = QTable::new();
        let handle = table.emit_jump(Op::Goto, None, None);
        assert!(table.at(handle.index()).result.is_none());
        table.patch(handle, 5);
        assert_eq!(table.at(handle.index()).result, Some(Operand::Label(5)));
    }

    #[test]
    #[should_panic(expected = "already-resolved")]
    fn patching_twice_panics() {
        let mut table = QTable::new();
        let handle = table.emit_jump(Op::Goto, None, None);
        table.patch(handle, 1);
        table.patch(handle, 2);
    }

    #[test]
    fn fully_resolved_reflects_outstanding_jumps() {
        let mut table = QTable::new();
        let handle = table.emit_jump(Op::Goto, None, None);
        assert!(!table.fully_resolved());
        table.patch(handle, table.next_index());
        assert!(table.fully_resolved());
    }
}
