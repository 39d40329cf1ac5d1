//! Expression flattening
//!
//! Depth-first compilation of expression trees into the linear SSA op stream.
//! Structurally identical subtrees are detected through a canonical prefix
//! serialization and computed once; stencil kernels are lowered in an
//! isolated context so the emitted `kernel_operations` block is
//! self-contained.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use evolimo_dsl::definition::GroupDef;
use evolimo_dsl::expr::{BinaryOp, CompareOp, Expr, UnaryOp};
use evolimo_ir::{OpKind, Operation, ParamInfo};

use crate::CompileError;

/// Target name of the sentinel op that closes a kernel block.
pub const KERNEL_OUTPUT: &str = "kernel_output";

/// Canonical serialization used as the CSE cache key. Two implementations of
/// the IR must agree on this form for op-stream compatibility, so keep it
/// boring: prefix notation, bracketed attributes, `{:?}` floats.
pub fn canonical_key(expr: &Expr) -> String {
    match expr {
        Expr::State { id } => format!("s:{id}"),
        Expr::Param { group, id } => format!("p:{group}:{id}"),
        Expr::Aux { id } => format!("a:{id}"),
        Expr::Const { value } => format!("c:{value:?}"),
        Expr::Binary { op, left, right } => {
            let name = match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
            };
            format!("{name}({},{})", canonical_key(left), canonical_key(right))
        }
        Expr::Compare { op, left, right } => {
            let name = match op {
                CompareOp::Lt => "lt",
                CompareOp::Gt => "gt",
                CompareOp::Ge => "ge",
            };
            format!("{name}({},{})", canonical_key(left), canonical_key(right))
        }
        Expr::Where {
            cond,
            true_val,
            false_val,
        } => format!(
            "where({},{},{})",
            canonical_key(cond),
            canonical_key(true_val),
            canonical_key(false_val)
        ),
        Expr::Unary { op, value } => {
            let name = match op {
                UnaryOp::Sqrt => "sqrt",
                UnaryOp::Relu => "relu",
                UnaryOp::Neg => "neg",
            };
            format!("{name}({})", canonical_key(value))
        }
        Expr::Transpose { value, dim0, dim1 } => {
            format!("transpose[{dim0},{dim1}]({})", canonical_key(value))
        }
        Expr::Sum {
            value,
            dim,
            keepdim,
        } => format!("sum[{dim},{keepdim}]({})", canonical_key(value)),
        Expr::Cat { values, dim } => {
            let parts: Vec<String> = values.iter().map(canonical_key).collect();
            format!("cat[{dim}]({})", parts.join(","))
        }
        Expr::Slice {
            value,
            dim,
            start,
            len,
        } => format!("slice[{dim},{start},{len}]({})", canonical_key(value)),
        Expr::GridScatter { value, x, y } => format!(
            "grid_scatter({},{},{})",
            canonical_key(value),
            canonical_key(x),
            canonical_key(y)
        ),
        Expr::Stencil {
            value,
            range,
            kernel,
        } => format!(
            "stencil[{range}]({};{})",
            canonical_key(value),
            canonical_key(kernel)
        ),
        Expr::GridGather { value, x, y } => format!(
            "grid_gather({},{},{})",
            canonical_key(value),
            canonical_key(x),
            canonical_key(y)
        ),
    }
}

/// Record every state variable referenced by `expr` (descending into stencil
/// kernels).
pub fn collect_state_refs(expr: &Expr, out: &mut BTreeSet<String>) {
    walk(expr, &mut |e| {
        if let Expr::State { id } = e {
            out.insert(id.clone());
        }
    });
}

/// Record every `(group, param)` referenced by `expr`, validating each group
/// against the declared set. Descends into stencil kernels so parameters used
/// only inside a neighborhood kernel still reach the phenotype layout.
pub fn collect_params(
    expr: &Expr,
    groups: &IndexMap<String, GroupDef>,
    out: &mut IndexMap<String, BTreeSet<String>>,
) -> Result<(), CompileError> {
    let mut err = None;
    walk(expr, &mut |e| {
        if let Expr::Param { group, id } = e {
            if !groups.contains_key(group) {
                err.get_or_insert_with(|| CompileError::UnknownGroup {
                    group: group.clone(),
                    param: id.clone(),
                });
                return;
            }
            out.entry(group.clone()).or_default().insert(id.clone());
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn walk(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match expr {
        Expr::State { .. } | Expr::Param { .. } | Expr::Aux { .. } | Expr::Const { .. } => {}
        Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => {
            walk(left, f);
            walk(right, f);
        }
        Expr::Where {
            cond,
            true_val,
            false_val,
        } => {
            walk(cond, f);
            walk(true_val, f);
            walk(false_val, f);
        }
        Expr::Unary { value, .. }
        | Expr::Transpose { value, .. }
        | Expr::Sum { value, .. }
        | Expr::Slice { value, .. } => walk(value, f),
        Expr::Cat { values, .. } => {
            for v in values {
                walk(v, f);
            }
        }
        Expr::GridScatter { value, x, y } | Expr::GridGather { value, x, y } => {
            walk(value, f);
            walk(x, f);
            walk(y, f);
        }
        Expr::Stencil { value, kernel, .. } => {
            walk(value, f);
            walk(kernel, f);
        }
    }
}

/// One flattening context. The top-level compile uses a single context for
/// all rules (so CSE spans rules); each stencil kernel gets a fresh one.
pub struct Flattener<'a> {
    groups: &'a IndexMap<String, GroupDef>,
    pub ops: Vec<Operation>,
    cache: IndexMap<String, String>,
    next_temp: usize,
}

impl<'a> Flattener<'a> {
    pub fn new(groups: &'a IndexMap<String, GroupDef>) -> Self {
        Self {
            groups,
            ops: Vec::new(),
            cache: IndexMap::new(),
            next_temp: 0,
        }
    }

    fn fresh_temp(&mut self) -> String {
        let name = format!("temp_{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    /// Flatten `expr`, returning the name of the variable holding its value.
    pub fn flatten(&mut self, expr: &Expr) -> Result<String, CompileError> {
        let key = canonical_key(expr);
        if let Some(var) = self.cache.get(&key) {
            return Ok(var.clone());
        }

        let var = match expr {
            Expr::State { id } => format!("s_{id}"),
            Expr::Aux { id } => id.clone(),
            Expr::Param { group, id } => {
                if !self.groups.contains_key(group) {
                    return Err(CompileError::UnknownGroup {
                        group: group.clone(),
                        param: id.clone(),
                    });
                }
                let var = format!("p_{id}");
                let mut op = Operation::new(&var, OpKind::RefParam, vec![]);
                op.param_info = Some(ParamInfo {
                    group: group.clone(),
                    param: id.clone(),
                });
                self.ops.push(op);
                var
            }
            Expr::Const { value } => {
                let var = self.fresh_temp();
                let mut op = Operation::new(&var, OpKind::Const, vec![]);
                op.value = Some(*value);
                self.ops.push(op);
                var
            }
            Expr::Binary { op, left, right } => {
                let l = self.flatten(left)?;
                let r = self.flatten(right)?;
                let kind = match op {
                    BinaryOp::Add => OpKind::Add,
                    BinaryOp::Sub => OpKind::Sub,
                    BinaryOp::Mul => OpKind::Mul,
                    BinaryOp::Div => OpKind::Div,
                };
                self.emit(kind, vec![l, r])
            }
            Expr::Compare { op, left, right } => {
                let l = self.flatten(left)?;
                let r = self.flatten(right)?;
                let kind = match op {
                    CompareOp::Lt => OpKind::Lt,
                    CompareOp::Gt => OpKind::Gt,
                    CompareOp::Ge => OpKind::Ge,
                };
                self.emit(kind, vec![l, r])
            }
            Expr::Where {
                cond,
                true_val,
                false_val,
            } => {
                let c = self.flatten(cond)?;
                let t = self.flatten(true_val)?;
                let f = self.flatten(false_val)?;
                self.emit(OpKind::Where, vec![c, t, f])
            }
            Expr::Unary { op, value } => {
                let v = self.flatten(value)?;
                let kind = match op {
                    UnaryOp::Sqrt => OpKind::Sqrt,
                    UnaryOp::Relu => OpKind::Relu,
                    UnaryOp::Neg => OpKind::Neg,
                };
                self.emit(kind, vec![v])
            }
            Expr::Transpose { value, dim0, dim1 } => {
                let v = self.flatten(value)?;
                let var = self.fresh_temp();
                let mut op = Operation::new(&var, OpKind::Transpose, vec![v]);
                op.dim0 = Some(*dim0);
                op.dim1 = Some(*dim1);
                self.ops.push(op);
                var
            }
            Expr::Sum {
                value,
                dim,
                keepdim,
            } => {
                let v = self.flatten(value)?;
                let var = self.fresh_temp();
                let mut op = Operation::new(&var, OpKind::Sum, vec![v]);
                op.dim = Some(*dim);
                op.keepdim = Some(*keepdim);
                self.ops.push(op);
                var
            }
            Expr::Cat { values, dim } => {
                let mut args = Vec::with_capacity(values.len());
                for v in values {
                    args.push(self.flatten(v)?);
                }
                let var = self.fresh_temp();
                let mut op = Operation::new(&var, OpKind::Cat, args);
                op.dim = Some(*dim);
                self.ops.push(op);
                var
            }
            Expr::Slice {
                value,
                dim,
                start,
                len,
            } => {
                let v = self.flatten(value)?;
                let var = self.fresh_temp();
                let mut op = Operation::new(&var, OpKind::Slice, vec![v]);
                op.dim = Some(*dim);
                op.start = Some(*start);
                op.len = Some(*len);
                self.ops.push(op);
                var
            }
            Expr::GridScatter { value, x, y } => {
                let v = self.flatten(value)?;
                let xs = self.flatten(x)?;
                let ys = self.flatten(y)?;
                self.emit(OpKind::GridScatter, vec![v, xs, ys])
            }
            Expr::Stencil {
                value,
                range,
                kernel,
            } => {
                let v = self.flatten(value)?;

                // Isolated context: kernel ops only see `center`/`neighbor`
                // aux bindings plus whatever they compute themselves.
                let mut inner = Flattener::new(self.groups);
                let result = inner.flatten(kernel)?;
                inner
                    .ops
                    .push(Operation::new(KERNEL_OUTPUT, OpKind::Assign, vec![result]));

                let var = self.fresh_temp();
                let mut op = Operation::new(&var, OpKind::Stencil, vec![v]);
                op.stencil_range = Some(*range);
                op.kernel_operations = inner.ops;
                self.ops.push(op);
                var
            }
            Expr::GridGather { value, x, y } => {
                let v = self.flatten(value)?;
                let xs = self.flatten(x)?;
                let ys = self.flatten(y)?;
                self.emit(OpKind::GridGather, vec![v, xs, ys])
            }
        };

        self.cache.insert(key, var.clone());
        Ok(var)
    }

    fn emit(&mut self, kind: OpKind, args: Vec<String>) -> String {
        let var = self.fresh_temp();
        self.ops.push(Operation::new(&var, kind, args));
        var
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolimo_dsl::expr::{constant, param, state, stencil};
    use evolimo_ir::Activation;

    fn groups() -> IndexMap<String, GroupDef> {
        let mut g = IndexMap::new();
        g.insert(
            "physics".to_string(),
            GroupDef {
                activation: Activation::None,
            },
        );
        g
    }

    #[test]
    fn test_identical_subtrees_share_one_op() {
        let groups = groups();
        let mut fl = Flattener::new(&groups);
        let shared = state("pos_x") * constant(2.0);
        let a = fl.flatten(&shared.clone()).unwrap();
        let b = fl.flatten(&(shared + constant(1.0))).unwrap();
        assert_ne!(a, b);
        let muls = fl
            .ops
            .iter()
            .filter(|op| op.op == OpKind::Mul)
            .count();
        assert_eq!(muls, 1);
    }

    #[test]
    fn test_state_ref_emits_no_op() {
        let groups = groups();
        let mut fl = Flattener::new(&groups);
        let var = fl.flatten(&state("vel_x")).unwrap();
        assert_eq!(var, "s_vel_x");
        assert!(fl.ops.is_empty());
    }

    #[test]
    fn test_param_ref_carries_info() {
        let groups = groups();
        let mut fl = Flattener::new(&groups);
        let var = fl.flatten(&param("physics", "drag")).unwrap();
        assert_eq!(var, "p_drag");
        let op = &fl.ops[0];
        assert_eq!(op.op, OpKind::RefParam);
        let info = op.param_info.as_ref().unwrap();
        assert_eq!(info.group, "physics");
        assert_eq!(info.param, "drag");
    }

    #[test]
    fn test_unknown_group_is_fatal() {
        let groups = groups();
        let mut fl = Flattener::new(&groups);
        let err = fl.flatten(&param("nope", "drag")).unwrap_err();
        assert!(matches!(err, CompileError::UnknownGroup { .. }));
    }

    #[test]
    fn test_stencil_lowers_kernel_with_sentinel() {
        let groups = groups();
        let mut fl = Flattener::new(&groups);
        let e = stencil(state("pos_x"), 1, |c, n| n - c);
        fl.flatten(&e).unwrap();

        let op = fl
            .ops
            .iter()
            .find(|op| op.op == OpKind::Stencil)
            .expect("stencil op");
        assert_eq!(op.stencil_range, Some(1));
        let last = op.kernel_operations.last().unwrap();
        assert_eq!(last.target, KERNEL_OUTPUT);
        assert_eq!(last.op, OpKind::Assign);
        // The kernel body references the aux bindings directly.
        let sub = &op.kernel_operations[0];
        assert_eq!(sub.op, OpKind::Sub);
        assert_eq!(sub.args, vec!["neighbor", "center"]);
    }

    #[test]
    fn test_identical_stencils_collapse_different_kernels_do_not() {
        let groups = groups();
        let mut fl = Flattener::new(&groups);
        let a = stencil(state("pos_x"), 1, |c, n| n - c);
        let b = stencil(state("pos_x"), 1, |c, n| n - c);
        let c = stencil(state("pos_x"), 1, |c, n| c - n);
        let va = fl.flatten(&a).unwrap();
        let vb = fl.flatten(&b).unwrap();
        let vc = fl.flatten(&c).unwrap();
        assert_eq!(va, vb);
        assert_ne!(va, vc);
        let stencils = fl
            .ops
            .iter()
            .filter(|op| op.op == OpKind::Stencil)
            .count();
        assert_eq!(stencils, 2);
    }

    #[test]
    fn test_collect_params_descends_into_kernels() {
        let groups = groups();
        let e = stencil(state("pos_x"), 1, |c, n| {
            (n - c) * param("physics", "gravity")
        });
        let mut out = IndexMap::new();
        collect_params(&e, &groups, &mut out).unwrap();
        assert!(out["physics"].contains("gravity"));
    }

    #[test]
    fn test_canonical_key_distinguishes_attributes() {
        let a = state("x").sum(0);
        let b = state("x").sum_keepdim(0);
        assert_ne!(canonical_key(&a), canonical_key(&b));
    }
}
