//! The x86 code generator: register/address descriptors, spill selection,
//! and per-block instruction emission.
//!
//! The allocator tracks two symmetric pieces of state per the source
//! compiler's `self.registers` / `self.address` dicts (Invariant D2): a
//! register descriptor (which variables currently live in a register) and
//! an address descriptor (which registers hold a variable, and whether
//! memory is authoritative). Every mutation that touches one side updates
//! the other through [`CodeGenerator::bind`]/[`CodeGenerator::unbind`], so
//! the two views never drift apart.

use std::fmt::Debug;

use derive_more::Display;

use crate::back::asm::{relop_mnemonic, Register, REGISTER_POOL, WORD_SIZE};
use crate::common::{BOp, Id, Map, RelOp, Set};
use crate::middle::partition::{self, BasicBlock, Partition};
use crate::middle::tir::{Op, Operand, QTable};
use crate::middle::Lowered;

#[derive(Display)]
pub enum CodegenError {
    /// A variable is live (not in memory) but bound to no register. This
    /// can only happen if a bind/unbind pair violated Invariant D2.
    #[display("internal error: variable {} has no home", _0.as_str())]
    NoHome(Id),
    #[display("internal error: unimplemented operator {_0}")]
    UnimplementedOp(String),
}

impl Debug for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// What a register currently holds, and what the canonical home of a
/// variable is, kept in lockstep (Invariant D2).
#[derive(Debug, Clone)]
struct AddressDescriptor {
    registers: Set<Register>,
    memory: bool,
    /// `Some(offset)` for a stack-resident temporary (`-offset(%ebp)`);
    /// `None` for a named variable, which lives in `.bss` under its own
    /// name.
    offset: Option<i32>,
}

/// Either an immediate or a register, as substituted into an emitted
/// instruction's operand position.
#[derive(Debug, Clone, Copy)]
enum OperandLoc {
    Imm(i64),
    Reg(Register),
}

impl std::fmt::Display for OperandLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandLoc::Imm(n) => write!(f, "${n}"),
            OperandLoc::Reg(r) => write!(f, "{r}"),
        }
    }
}

struct CodeGenerator<'a> {
    named_vars: &'a Set<Id>,
    table: &'a QTable,
    partition: &'a Partition,
    registers: Map<Register, Set<Id>>,
    address: Map<Id, AddressDescriptor>,
    next_offset: i32,
    preserved_used: Set<Register>,
}

impl<'a> CodeGenerator<'a> {
    fn new(lowered: &'a Lowered, partition: &'a Partition) -> Self {
        let mut registers = Map::new();
        for &reg in REGISTER_POOL.iter() {
            registers.insert(reg, Set::new());
        }
        CodeGenerator {
            named_vars: &lowered.named_vars,
            table: &lowered.table,
            partition,
            registers,
            address: Map::new(),
            next_offset: 0,
            preserved_used: Set::new(),
        }
    }

    fn mark_preserved(&mut self, reg: Register) {
        if reg.is_preserved() {
            self.preserved_used.insert(reg);
        }
    }

    /// Look up (creating if necessary) the address descriptor for `var`. A
    /// variable's first access assigns it: named variables are `.bss`-
    /// resident under their own name (`offset: None`); temporaries get the
    /// next free stack slot, in first-encounter order during codegen.
    fn descriptor_mut(&mut self, var: Id) -> &mut AddressDescriptor {
        if !self.address.contains_key(&var) {
            let offset = if self.named_vars.contains(&var) {
                None
            } else {
                self.next_offset += WORD_SIZE;
                Some(self.next_offset)
            };
            self.address.insert(
                var,
                AddressDescriptor {
                    registers: Set::new(),
                    memory: true,
                    offset,
                },
            );
        }
        self.address.get_mut(&var).unwrap()
    }

    fn store_location(&mut self, var: Id) -> String {
        match self.descriptor_mut(var).offset {
            Some(off) => format!("-{off}(%ebp)"),
            None => var.as_str().to_string(),
        }
    }

    /// Reset descriptors at the top of a basic block: no register holds
    /// anything, and every variable's authoritative value is (as far as
    /// this block knows) in memory.
    fn reset_block(&mut self) {
        for set in self.registers.values_mut() {
            set.clear();
        }
        for desc in self.address.values_mut() {
            desc.registers.clear();
            desc.memory = true;
        }
    }

    fn bind(&mut self, reg: Register, var: Id) {
        self.registers.get_mut(&reg).unwrap().insert(var);
        self.descriptor_mut(var).registers.insert(reg);
    }

    fn unbind(&mut self, reg: Register, var: Id) {
        self.registers.get_mut(&reg).unwrap().remove(&var);
        if let Some(d) = self.address.get_mut(&var) {
            d.registers.remove(&reg);
        }
    }

    fn clear_register(&mut self, reg: Register) {
        let vars: Vec<Id> = self.registers[&reg].iter().copied().collect();
        for v in vars {
            self.unbind(reg, v);
        }
    }

    fn store(&mut self, reg: Register, var: Id, lines: &mut Vec<String>) {
        let loc = self.store_location(var);
        lines.push(format!("    movl {reg}, {loc}"));
        self.descriptor_mut(var).memory = true;
    }

    /// Free `reg` for reuse: any variable it holds whose value would
    /// otherwise be lost (not already in memory, and not held by any other
    /// register) is flushed first.
    fn evict(&mut self, reg: Register, lines: &mut Vec<String>) {
        let vars: Vec<Id> = self.registers[&reg].iter().copied().collect();
        for v in vars {
            let lost = {
                let d = &self.address[&v];
                !d.memory && d.registers.iter().all(|&r| r == reg)
            };
            if lost {
                self.store(reg, v, lines);
            }
            self.unbind(reg, v);
        }
    }

    fn load(&mut self, reg: Register, operand: Operand, lines: &mut Vec<String>) {
        self.clear_register(reg);
        match operand {
            Operand::Const(n) => lines.push(format!("    movl ${n}, {reg}")),
            Operand::Var(v) => {
                let loc = self.store_location(v);
                lines.push(format!("    movl {loc}, {reg}"));
                self.bind(reg, v);
            }
            Operand::Label(_) => unreachable!("labels are never loaded into a register"),
        }
    }

    /// Choose a register to hold `v` (an operand of an instruction whose
    /// other operand is `u`, if any), per the four-step selection rule:
    /// reuse a register `v` is already in; else take any free register;
    /// else evict the register with the fewest variables that would
    /// actually be lost, breaking ties by enumeration order.
    ///
    /// The register returned here is threaded through eviction and the
    /// subsequent bind consistently — there's no separate "last one looked
    /// at" register floating around to accidentally use instead.
    fn select_register(&mut self, v: Operand, u: Option<Operand>, lines: &mut Vec<String>) -> Register {
        if let Operand::Var(v_var) = v {
            if let Some(&reg) = self.address.get(&v_var).and_then(|d| d.registers.iter().next()) {
                self.mark_preserved(reg);
                return reg;
            }
        }

        for &reg in REGISTER_POOL.iter() {
            if self.registers[&reg].is_empty() {
                self.mark_preserved(reg);
                return reg;
            }
        }

        let same_var = matches!((v, u), (Operand::Var(a), Some(Operand::Var(b))) if a == b);
        let v_var = v.as_var();
        let mut best: Option<(Register, usize)> = None;
        for &reg in REGISTER_POOL.iter() {
            let candidates: Vec<Id> = self.registers[&reg].iter().copied().collect();
            let cost = candidates
                .into_iter()
                .filter(|&candidate| {
                    if same_var && Some(candidate) == v_var {
                        return false;
                    }
                    let d = &self.address[&candidate];
                    !d.memory && d.registers.iter().all(|&r| r == reg)
                })
                .count();
            if best.map_or(true, |(_, best_cost)| cost < best_cost) {
                best = Some((reg, cost));
            }
        }
        let (reg, _cost) = best.expect("the register pool is never empty");
        self.evict(reg, lines);
        self.mark_preserved(reg);
        reg
    }

    /// Get `operand` into an instruction-ready form: an immediate if it's a
    /// constant and `force_register` allows that, otherwise a register
    /// (selecting and, if needed, loading one).
    fn acquire(&mut self, operand: Operand, other: Option<Operand>, force_register: bool, lines: &mut Vec<String>) -> OperandLoc {
        if !force_register {
            if let Operand::Const(n) = operand {
                return OperandLoc::Imm(n);
            }
        }
        let reg = self.select_register(operand, other, lines);
        let already_loaded = matches!(operand, Operand::Var(v) if self.registers[&reg].contains(&v));
        if !already_loaded {
            self.load(reg, operand, lines);
        }
        OperandLoc::Reg(reg)
    }

    fn gen_copy(&mut self, arg1: Operand, result: Id, lines: &mut Vec<String>) {
        let reg = match self.acquire(arg1, None, true, lines) {
            OperandLoc::Reg(r) => r,
            OperandLoc::Imm(_) => unreachable!("a copy's source always forces a register"),
        };

        if let Operand::Var(a_var) = arg1 {
            let lost = {
                let d = &self.address[&a_var];
                !d.memory && d.registers.iter().all(|&r| r == reg)
            };
            if lost {
                self.store(reg, a_var, lines);
            }
            self.unbind(reg, a_var);
        }

        self.clear_register(reg);
        self.bind(reg, result);
        self.descriptor_mut(result).memory = false;
    }

    /// `+`/`-`: `a` is always loaded into a register (it's the instruction's
    /// destination, and x86 can't add two immediates), `b` may stay an
    /// immediate. Before the instruction overwrites `a`'s register with the
    /// result, `a` itself is flushed if it would otherwise be lost.
    fn gen_arith(&mut self, op: BOp, arg1: Operand, arg2: Operand, result: Id, lines: &mut Vec<String>) {
        let mnemonic = match op {
            BOp::Add => "addl",
            BOp::Sub => "subl",
            _ => unreachable!("caller only dispatches Add/Sub here"),
        };

        let ra = match self.acquire(arg1, Some(arg2), true, lines) {
            OperandLoc::Reg(r) => r,
            OperandLoc::Imm(_) => unreachable!("arithmetic's left operand always forces a register"),
        };
        let src = self.acquire(arg2, Some(arg1), false, lines);

        if let Operand::Var(a_var) = arg1 {
            let lost = {
                let d = &self.address[&a_var];
                !d.memory && d.registers.iter().all(|&r| r == ra)
            };
            if lost {
                self.store(ra, a_var, lines);
            }
            self.unbind(ra, a_var);
        }

        lines.push(format!("    {mnemonic} {src}, {ra}"));
        self.clear_register(ra);
        self.bind(ra, result);
        self.descriptor_mut(result).memory = false;
    }

    /// `if<relop> a, b -> L`: load both sides (loads go into the normal
    /// instruction stream), but the comparison and jump themselves are
    /// returned separately so the caller can defer them to the end of the
    /// block, after the end-of-block flush.
    fn gen_if(&mut self, relop: RelOp, arg1: Operand, arg2: Operand, target_label: &str, lines: &mut Vec<String>) -> (String, String) {
        let loc1 = self.acquire(arg1, Some(arg2), false, lines);
        let loc2 = self.acquire(arg2, Some(arg1), false, lines);
        (
            format!("    cmpl {loc2}, {loc1}"),
            format!("    {} {target_label}", relop_mnemonic(relop)),
        )
    }

    /// Flush every variable whose value is currently only register-resident
    /// (P4). Run once per block, right before its deferred terminal jump.
    fn flush_block(&mut self, lines: &mut Vec<String>) -> Result<(), CodegenError> {
        let dirty: Vec<Id> = self.address.iter().filter(|(_, d)| !d.memory).map(|(&v, _)| v).collect();
        for var in dirty {
            let reg = *self.address[&var].registers.iter().next().ok_or(CodegenError::NoHome(var))?;
            self.store(reg, var, lines);
        }
        Ok(())
    }

    /// The label a jump to `target` should land on. Every in-range target is
    /// guaranteed a leader (and so a block) by the partitioner; a target
    /// equal to the table's length is control flow falling off the end of
    /// the program, which has no block of its own and lands on `LEND`.
    fn jump_label(&self, target: usize) -> String {
        if target >= self.table.len() {
            "LEND".to_string()
        } else {
            format!("L{}", self.partition.block_for_target(target))
        }
    }

    /// Generate one basic block's instructions, plus its single deferred
    /// terminal jump (if the block ends in one).
    fn gen_block(&mut self, block: &BasicBlock, lines: &mut Vec<String>) -> Result<(), CodegenError> {
        self.reset_block();
        let mut deferred = Vec::new();
        for idx in block.range() {
            let q = self.table.at(idx);
            match q.op {
                Op::Goto => {
                    let target = q.result.and_then(|r| r.as_label()).expect("a goto always has a resolved target");
                    let label = self.jump_label(target);
                    deferred.push(format!("    jmp {label}"));
                }
                Op::IfRel(relop) => {
                    let target = q.result.and_then(|r| r.as_label()).expect("an if<relop> always has a resolved target");
                    let label = self.jump_label(target);
                    let a = q.arg1.expect("if<relop> has arg1");
                    let b = q.arg2.expect("if<relop> has arg2");
                    let (cmp, jcc) = self.gen_if(relop, a, b, &label, lines);
                    deferred.push(cmp);
                    deferred.push(jcc);
                }
                Op::IfTruthy => return Err(CodegenError::UnimplementedOp("if".to_string())),
                Op::Copy => {
                    let a = q.arg1.expect("= has arg1");
                    let r = q.result.and_then(|r| r.as_var()).expect("= has a variable result");
                    self.gen_copy(a, r, lines);
                }
                Op::Arith(op @ (BOp::Add | BOp::Sub)) => {
                    let a = q.arg1.expect("arithmetic has arg1");
                    let b = q.arg2.expect("arithmetic has arg2");
                    let r = q.result.and_then(|r| r.as_var()).expect("arithmetic has a variable result");
                    self.gen_arith(op, a, b, r, lines);
                }
                Op::Arith(op) => return Err(CodegenError::UnimplementedOp(op.to_string())),
            }
        }
        self.flush_block(lines)?;
        lines.extend(deferred);
        Ok(())
    }
}

/// Generate a complete x86 (AT&T syntax) assembly module for a lowered
/// program: a `.bss` slot per named variable, a `_start` that calls `main`
/// and exits, and `main` itself — body first (which is also where the set
/// of callee-saved registers actually used is discovered), then wrapped in
/// a prologue/epilogue built from that now-complete set.
pub fn generate(lowered: &Lowered) -> Result<Vec<String>, CodegenError> {
    let table_partition = partition::partition(&lowered.table);
    let mut gen = CodeGenerator::new(lowered, &table_partition);

    let mut body = Vec::new();
    for block in &table_partition.blocks {
        body.push(format!("L{}:", block.id));
        gen.gen_block(block, &mut body)?;
    }
    body.push("LEND:".to_string());

    let mut module = vec![".bss".to_string()];
    for var in lowered.named_vars.iter() {
        module.push(format!("    .lcomm {}, {WORD_SIZE}", var.as_str()));
    }

    module.push(".text".to_string());
    module.push("_start:".to_string());
    module.push("    call main".to_string());
    module.push("    movl $1, %eax".to_string());
    module.push("    movl $0, %ebx".to_string());
    module.push("    int $0x80".to_string());
    module.push("    hlt".to_string());
    module.push("main:".to_string());

    for &reg in REGISTER_POOL.iter() {
        if gen.preserved_used.contains(&reg) {
            module.push(format!("    pushl {reg}"));
        }
    }
    module.push("    pushl %ebp".to_string());
    module.push("    movl %esp, %ebp".to_string());
    if lowered.temp_count > 0 {
        module.push(format!("    subl ${}, %esp", lowered.temp_count as i32 * WORD_SIZE));
    }

    module.extend(body);

    module.push("    movl %ebp, %esp".to_string());
    module.push("    popl %ebp".to_string());
    for &reg in REGISTER_POOL.iter().rev() {
        if gen.preserved_used.contains(&reg) {
            module.push(format!("    popl {reg}"));
        }
    }
    module.push("    ret".to_string());

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::lower::lower;
    use crate::front::parse::parse;

    fn asm(src: &str) -> Vec<String> {
        let program = parse(src).unwrap();
        let lowered = lower(&program).unwrap();
        generate(&lowered).unwrap()
    }

    #[test]
    fn scenario_four_simple_assignment_flushes_at_block_end() {
        let lines = asm("int i; i := 0;");
        assert!(lines.iter().any(|l| l.contains("movl $0,")));
        assert!(lines.iter().any(|l| l.contains("movl") && l.trim_end().ends_with(", i")));
    }

    #[test]
    fn scenario_five_three_temporaries_get_sequential_offsets() {
        let lines = asm("int a; a := 1 + 2 + 3;");
        assert!(lines.iter().any(|l| l.contains("subl $8, %esp")));
        assert!(lines.iter().any(|l| l.contains("-4(%ebp)")));
    }

    #[test]
    fn preserved_registers_are_pushed_and_popped_around_the_frame() {
        // Force enough live variables across a block boundary that the
        // allocator must eventually spill into a callee-saved register.
        let src = "int a; int b; int c; int d; int e; int f; int g; \
                   a := 1; b := 2; c := 3; d := 4; e := 5; f := 6; g := 7; \
                   a := a + b + c + d + e + f + g;";
        let lines = asm(src);
        let pushes: Vec<&String> = lines.iter().filter(|l| l.trim_start().starts_with("pushl %e")).collect();
        let pops: Vec<&String> = lines.iter().filter(|l| l.trim_start().starts_with("popl %e")).collect();
        // Every preserved register pushed in the prologue must be popped in
        // reverse order in the epilogue (excluding the frame pointer itself).
        let reg_pushes: Vec<&str> = pushes
            .iter()
            .map(|l| l.trim_start().trim_start_matches("pushl ").trim())
            .filter(|&r| r != "%ebp")
            .collect();
        let reg_pops: Vec<&str> = pops
            .iter()
            .map(|l| l.trim_start().trim_start_matches("popl ").trim())
            .filter(|&r| r != "%ebp")
            .collect();
        let mut reversed_pops: Vec<&str> = reg_pops.clone();
        reversed_pops.reverse();
        assert_eq!(reg_pushes, reversed_pops);
    }

    #[test]
    fn unimplemented_operators_are_reported() {
        let program = parse("int a; a := 2 * 3;").unwrap();
        let lowered = lower(&program).unwrap();
        let err = generate(&lowered).unwrap_err();
        assert!(format!("{err}").contains("unimplemented operator *"));
    }

    #[test]
    fn named_variables_get_bss_storage_not_a_stack_slot() {
        let lines = asm("int i; i := 0;");
        assert!(lines.iter().any(|l| l.contains(".lcomm i, 4")));
        assert!(!lines.iter().any(|l| l.contains("(%ebp)")));
    }

    #[test]
    fn while_loop_jumps_back_to_its_head_block() {
        let lines = asm("int i; i := 0; while (i < 10) { i := i + 1; }");
        assert!(lines.iter().any(|l| l.trim_start().starts_with("jmp L")));
        assert!(lines.iter().any(|l| l.trim_start().starts_with("jl L")));
    }

    #[test]
    fn copied_source_survives_a_later_read_in_the_same_block() {
        // `j := i` reuses i's register (step 1 of select_register); i must
        // be flushed to memory before that reuse, or the later `k := i + 1`
        // reloads a stale `.bss` zero instead of i's real value.
        let lines = asm("int i; int j; int k; i := 5; j := i; k := i + 1;");
        let flush = lines
            .iter()
            .position(|l| l.contains("movl") && l.trim_end().ends_with(", i"))
            .expect("i must be flushed to memory before its register is reused for j");
        let reload = lines
            .iter()
            .position(|l| l.trim_start().starts_with("movl i,"))
            .expect("k := i + 1 must reload i from memory");
        assert!(flush < reload, "i's flush must come before it is reloaded");
    }
}
