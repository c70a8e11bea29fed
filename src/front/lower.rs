//! The IR generator: a tree walker over `front::ast` that lowers a program
//! into a [`QTable`] under a scoped [`Env`], using backpatch handles
//! (rather than in-place mutation) to resolve control-flow targets.

use std::fmt::Debug;

use derive_more::Display;

use crate::common::{intern, Id, Set};
use crate::front::ast::{BoolExpr, Expr, Program, Stmt};
use crate::middle::env::{Env, Redefinition, VarInfo};
use crate::middle::tir::{JumpHandle, Op, Operand, QTable, Quadruple};
use crate::middle::Lowered;

#[derive(Display)]
pub enum LowerError {
    #[display("Undefined variable: {}", _0.as_str())]
    UndefinedVariable(Id),
    #[display("{_0}")]
    Redefinition(Redefinition),
}

impl Debug for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<Redefinition> for LowerError {
    fn from(e: Redefinition) -> Self {
        LowerError::Redefinition(e)
    }
}

/// Per-compilation-unit lowering state. A fresh context is created for
/// every call to [`lower`], so the temp counter never leaks across
/// compilation units sharing a process (spec §5, O2).
struct LowerCtx {
    table: QTable,
    env: Env,
    next_temp: usize,
    named_vars: Set<Id>,
}

impl LowerCtx {
    fn new() -> Self {
        LowerCtx {
            table: QTable::new(),
            env: Env::new(),
            next_temp: 0,
            named_vars: Set::new(),
        }
    }

    /// Allocate a fresh `t<N>` name and bind it in the environment, marked
    /// as a temporary (P3: strictly increasing indices within a unit).
    fn fresh_temp(&mut self) -> Id {
        self.next_temp += 1;
        let name = intern(format!("t{}", self.next_temp));
        self.env
            .put(name, VarInfo::temp(intern("int"), name), false)
            .expect("freshly generated temp name cannot already be bound");
        name
    }
}

/// The two lists of unresolved jumps produced by lowering a boolean
/// expression: jumps taken when it's true, and jumps taken when it's false.
struct BoolResult {
    true_list: Vec<JumpHandle>,
    false_list: Vec<JumpHandle>,
}

fn patch_all(ctx: &mut LowerCtx, handles: &[JumpHandle], target: usize) {
    for &handle in handles {
        ctx.table.patch(handle, target);
    }
}

fn lookup(ctx: &LowerCtx, name: Id) -> Result<Id, LowerError> {
    ctx.env
        .get(name)
        .map(|info| info.name)
        .ok_or(LowerError::UndefinedVariable(name))
}

/// Lower a whole program into a fresh [`QTable`].
pub fn lower(program: &Program) -> Result<Lowered, LowerError> {
    let mut ctx = LowerCtx::new();
    for stmt in &program.stmts {
        lower_stmt(&mut ctx, stmt)?;
    }
    Ok(Lowered {
        table: ctx.table,
        named_vars: ctx.named_vars,
        temp_count: ctx.next_temp,
    })
}

fn lower_stmt(ctx: &mut LowerCtx, stmt: &Stmt) -> Result<(), LowerError> {
    match stmt {
        Stmt::Definition { ty, name } => {
            ctx.env.put(*name, VarInfo::named(*ty, *name), false)?;
            ctx.named_vars.insert(*name);
            Ok(())
        }
        Stmt::Assign(name, expr) => {
            let target = lookup(ctx, *name)?;
            let value = lower_expr(ctx, expr)?;
            ctx.table.append(Quadruple {
                op: Op::Copy,
                arg1: Some(value),
                arg2: None,
                result: Some(Operand::Var(target)),
            });
            Ok(())
        }
        Stmt::If { cond, tt, ff } => lower_if(ctx, cond, tt, ff.as_deref()),
        Stmt::While { cond, body } => lower_while(ctx, cond, body),
    }
}

fn lower_expr(ctx: &mut LowerCtx, expr: &Expr) -> Result<Operand, LowerError> {
    match expr {
        Expr::Const(value) => Ok(Operand::Const(*value)),
        Expr::Var(name) => Ok(Operand::Var(lookup(ctx, *name)?)),
        Expr::BinOp { op, lhs, rhs } => {
            let l = lower_expr(ctx, lhs)?;
            let r = lower_expr(ctx, rhs)?;
            let t = ctx.fresh_temp();
            ctx.table.append(Quadruple {
                op: Op::Arith(*op),
                arg1: Some(l),
                arg2: Some(r),
                result: Some(Operand::Var(t)),
            });
            Ok(Operand::Var(t))
        }
    }
}

fn lower_bool(ctx: &mut LowerCtx, expr: &BoolExpr) -> Result<BoolResult, LowerError> {
    match expr {
        BoolExpr::Comparison { op, lhs, rhs } => {
            let l = lower_expr(ctx, lhs)?;
            let r = lower_expr(ctx, rhs)?;
            let true_jump = ctx.table.emit_jump(Op::IfRel(*op), Some(l), Some(r));
            let false_jump = ctx.table.emit_jump(Op::Goto, None, None);
            Ok(BoolResult {
                true_list: vec![true_jump],
                false_list: vec![false_jump],
            })
        }
        BoolExpr::And(lhs, rhs) => {
            let l = lower_bool(ctx, lhs)?;
            let mid = ctx.table.next_index();
            patch_all(ctx, &l.true_list, mid);
            let r = lower_bool(ctx, rhs)?;
            let mut false_list = l.false_list;
            false_list.extend(r.false_list);
            Ok(BoolResult {
                true_list: r.true_list,
                false_list,
            })
        }
        BoolExpr::Or(lhs, rhs) => {
            let l = lower_bool(ctx, lhs)?;
            let mid = ctx.table.next_index();
            patch_all(ctx, &l.false_list, mid);
            let r = lower_bool(ctx, rhs)?;
            let mut true_list = l.true_list;
            true_list.extend(r.true_list);
            Ok(BoolResult {
                true_list,
                false_list: r.false_list,
            })
        }
        BoolExpr::Not(inner) => {
            let r = lower_bool(ctx, inner)?;
            Ok(BoolResult {
                true_list: r.false_list,
                false_list: r.true_list,
            })
        }
    }
}

fn lower_if(ctx: &mut LowerCtx, cond: &BoolExpr, tt: &[Stmt], ff: Option<&[Stmt]>) -> Result<(), LowerError> {
    let cond_res = lower_bool(ctx, cond)?;
    let then_start = ctx.table.next_index();
    patch_all(ctx, &cond_res.true_list, then_start);
    for stmt in tt {
        lower_stmt(ctx, stmt)?;
    }

    match ff {
        Some(else_stmts) => {
            let skip_else = ctx.table.emit_jump(Op::Goto, None, None);
            let else_start = ctx.table.next_index();
            patch_all(ctx, &cond_res.false_list, else_start);
            for stmt in else_stmts {
                lower_stmt(ctx, stmt)?;
            }
            let end = ctx.table.next_index();
            ctx.table.patch(skip_else, end);
        }
        None => {
            let after = ctx.table.next_index();
            patch_all(ctx, &cond_res.false_list, after);
        }
    }
    Ok(())
}

fn lower_while(ctx: &mut LowerCtx, cond: &BoolExpr, body: &[Stmt]) -> Result<(), LowerError> {
    let before = ctx.table.next_index();
    let cond_res = lower_bool(ctx, cond)?;
    let body_start = ctx.table.next_index();
    patch_all(ctx, &cond_res.true_list, body_start);
    for stmt in body {
        lower_stmt(ctx, stmt)?;
    }
    ctx.table.append(Quadruple {
        op: Op::Goto,
        arg1: None,
        arg2: None,
        result: Some(Operand::Label(before)),
    });
    let after = ctx.table.next_index();
    patch_all(ctx, &cond_res.false_list, after);
    Ok(())
}
