//! The middle-end: the quadruple table, the basic-block partitioner, and
//! the scoped symbol environment used while lowering an AST into IR.

pub mod env;
pub mod partition;
pub mod tir;

pub use env::{Env, VarInfo};
pub use partition::{partition, BasicBlock, Partition};
pub use tir::{JumpHandle, Op, Operand, QTable, Quadruple};

use crate::common::{Id, Set};

/// The output of lowering a program: the quadruple table plus the set of
/// named (non-temporary) variables that need `.bss` storage.
#[derive(Debug)]
pub struct Lowered {
    pub table: QTable,
    pub named_vars: Set<Id>,
    pub temp_count: usize,
}

/// This crate performs no optimization passes beyond the constant-operand
/// recognition that lowering already does inline (an `Operand` is tagged
/// `Const`/`Var` at the point it's produced, so there's no separate
/// string-sniffing pass to run). `-O` is accepted by the CLI but is
/// currently a no-op over the already-lowered table.
pub fn optimize(lowered: Lowered) -> Lowered {
    lowered
}
