//! Partitions a finished [`QTable`] into basic blocks using the classical
//! leader algorithm.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::common::Map;
use crate::middle::tir::{Op, QTable};

/// A contiguous, half-open slice of the quadruple table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: usize,
    pub start: usize,
    pub end: usize,
}

impl BasicBlock {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// The result of partitioning: the blocks in order, and a map from every
/// leader instruction index to the id of the block it starts (used by
/// codegen to turn a jump's instruction-index target into a block label).
#[derive(Debug)]
pub struct Partition {
    pub blocks: Vec<BasicBlock>,
    pub block_of: Map<usize, usize>,
}

impl Partition {
    pub fn block_for_target(&self, target: usize) -> usize {
        self.block_of[&target]
    }
}

/// Compute leaders and emit blocks between consecutive leaders.
///
/// 1. Index 0 is a leader.
/// 2. The target of every jump is a leader, if it lies within the table.
/// 3. The instruction immediately following any jump is a leader.
pub fn partition(table: &QTable) -> Partition {
    let len = table.len();
    let mut leaders = BTreeSet::new();
    if len > 0 {
        leaders.insert(0);
    }

    for (i, q) in table.iter().enumerate() {
        let is_jump = matches!(q.op, Op::Goto | Op::IfRel(_) | Op::IfTruthy);
        if !is_jump {
            continue;
        }
        if let Some(target) = q.result.and_then(|r| r.as_label()) {
            if target < len {
                leaders.insert(target);
            }
        }
        if i + 1 < len {
            leaders.insert(i + 1);
        }
    }

    let leaders: Vec<usize> = leaders.into_iter().collect();
    let mut blocks = Vec::with_capacity(leaders.len());
    let mut block_of = Map::new();
    for (id, &start) in leaders.iter().enumerate() {
        let end = leaders.get(id + 1).copied().unwrap_or(len);
        blocks.push(BasicBlock { id, start, end });
        block_of.insert(start, id);
    }

    Partition { blocks, block_of }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;
    use crate::common::RelOp;
    use crate::middle::tir::{Operand, Quadruple};

    fn copy(table: &mut QTable, name: &str, value: i64) {
        table.append(Quadruple {
            op: Op::Copy,
            arg1: Some(Operand::Const(value)),
            arg2: None,
            result: Some(Operand::Var(intern(name))),
        });
    }

    /// Scenario 6: a 6-instruction table where instruction 1 is a `goto`
    /// (so index 2 is a leader via the fall-through rule) and instruction 2
    /// is an `if<` jumping to index 5.
    #[test]
    fn scenario_six_basic_block_partition() {
        let mut table = QTable::new();
        copy(&mut table, "a", 0); // 0
        table.append(Quadruple {
            op: Op::Goto,
            arg1: None,
            arg2: None,
            result: Some(Operand::Label(2)),
        }); // 1
        table.append(Quadruple {
            op: Op::IfRel(RelOp::Lt),
            arg1: Some(Operand::Var(intern("a"))),
            arg2: Some(Operand::Const(10)),
            result: Some(Operand::Label(5)),
        }); // 2
        copy(&mut table, "b", 1); // 3
        copy(&mut table, "c", 2); // 4
        copy(&mut table, "d", 3); // 5

        let p = partition(&table);
        let ranges: Vec<Range<usize>> = p.blocks.iter().map(|b| b.range()).collect();
        assert_eq!(ranges, vec![0..2, 2..3, 3..5, 5..6]);
        assert_eq!(p.block_for_target(5), 3);
    }

    #[test]
    fn repartitioning_is_idempotent() {
        let mut table = QTable::new();
        copy(&mut table, "a", 0);
        table.append(Quadruple {
            op: Op::Goto,
            arg1: None,
            arg2: None,
            result: Some(Operand::Label(0)),
        });

        let first = partition(&table);
        let second = partition(&table);
        let first_ranges: Vec<_> = first.blocks.iter().map(|b| b.range()).collect();
        let second_ranges: Vec<_> = second.blocks.iter().map(|b| b.range()).collect();
        assert_eq!(first_ranges, second_ranges);
    }

    #[test]
    fn empty_table_partitions_to_nothing() {
        let table = QTable::new();
        let p = partition(&table);
        assert!(p.blocks.is_empty());
    }
}
