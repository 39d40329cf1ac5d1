//! Expression tree for per-step dynamics
//!
//! These nodes describe tensor-valued computations over the batched agent
//! state. They are built once by definition modules, flattened by the
//! compiler, and discarded; nothing here executes anything.

use std::ops;

/// Binary arithmetic operators. Broadcasting follows standard elementwise
/// rules at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison operators. At runtime these produce 1.0 where true, else 0.0,
/// in the operand dtype; they are the only source of boolean-like values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Ge,
}

/// Elementwise unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Sqrt,
    Relu,
    Neg,
}

/// An immutable expression node.
///
/// `Stencil` stores its neighborhood kernel as an already-expanded expression
/// over the `center`/`neighbor` aux bindings: the authoring closure is
/// consumed by [`stencil`] at construction time, so the tree stays plain data
/// end to end.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Scalar-per-agent state column.
    State { id: String },
    /// Scalar-per-agent genetic parameter in a named group.
    Param { group: String, id: String },
    /// Runtime-named intermediate (`center`/`neighbor` inside stencil
    /// kernels, interaction outputs).
    Aux { id: String },
    /// Broadcast scalar constant.
    Const { value: f64 },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Elementwise select: `cond` is 0/1-valued.
    Where {
        cond: Box<Expr>,
        true_val: Box<Expr>,
        false_val: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        value: Box<Expr>,
    },
    Transpose {
        value: Box<Expr>,
        dim0: usize,
        dim1: usize,
    },
    Sum {
        value: Box<Expr>,
        dim: usize,
        keepdim: bool,
    },
    Cat {
        values: Vec<Expr>,
        dim: usize,
    },
    Slice {
        value: Box<Expr>,
        dim: usize,
        start: usize,
        len: usize,
    },
    /// `[N, D] -> [H, W, C, D]` using the grid configured on the definition.
    GridScatter {
        value: Box<Expr>,
        x: Box<Expr>,
        y: Box<Expr>,
    },
    /// Neighborhood reduction over the scattered grid.
    Stencil {
        value: Box<Expr>,
        range: i64,
        kernel: Box<Expr>,
    },
    /// `[H, W, C, D] -> [N, D]`, reversing the last scatter's slot map.
    GridGather {
        value: Box<Expr>,
        x: Box<Expr>,
        y: Box<Expr>,
    },
}

/// Aux binding name for the receiving particle inside a stencil kernel.
pub const STENCIL_CENTER: &str = "center";
/// Aux binding name for the contributing particle inside a stencil kernel.
pub const STENCIL_NEIGHBOR: &str = "neighbor";

/// Reference a state column by id.
pub fn state(id: impl Into<String>) -> Expr {
    Expr::State { id: id.into() }
}

/// Reference a genetic parameter in a group.
pub fn param(group: impl Into<String>, id: impl Into<String>) -> Expr {
    Expr::Param {
        group: group.into(),
        id: id.into(),
    }
}

/// Reference a runtime-named intermediate.
pub fn aux(id: impl Into<String>) -> Expr {
    Expr::Aux { id: id.into() }
}

/// Broadcast scalar constant.
pub fn constant(value: f64) -> Expr {
    Expr::Const { value }
}

/// Concatenate along `dim`.
pub fn cat(values: Vec<Expr>, dim: usize) -> Expr {
    Expr::Cat { values, dim }
}

/// Scatter per-agent rows into the fixed-capacity grid.
pub fn grid_scatter(value: Expr, x: Expr, y: Expr) -> Expr {
    Expr::GridScatter {
        value: Box::new(value),
        x: Box::new(x),
        y: Box::new(y),
    }
}

/// Neighborhood reduction: `kernel` is invoked once, here, with the
/// `center`/`neighbor` aux bindings, and its expansion travels with the node.
/// Inside the kernel both operands are pair rows of shape `[P, D]`, so the
/// channel axis is `dim = 1`.
pub fn stencil(value: Expr, range: i64, kernel: impl Fn(Expr, Expr) -> Expr) -> Expr {
    let body = kernel(aux(STENCIL_CENTER), aux(STENCIL_NEIGHBOR));
    Expr::Stencil {
        value: Box::new(value),
        range,
        kernel: Box::new(body),
    }
}

/// Gather per-agent rows back out of the grid.
pub fn grid_gather(value: Expr, x: Expr, y: Expr) -> Expr {
    Expr::GridGather {
        value: Box::new(value),
        x: Box::new(x),
        y: Box::new(y),
    }
}

impl Expr {
    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Elementwise `self < rhs` as 0/1.
    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::Lt, self, rhs.into())
    }

    /// Elementwise `self > rhs` as 0/1.
    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::Gt, self, rhs.into())
    }

    /// Elementwise `self >= rhs` as 0/1.
    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CompareOp::Ge, self, rhs.into())
    }

    /// Elementwise select with `self` as the 0/1 condition.
    pub fn select(self, on_true: impl Into<Expr>, on_false: impl Into<Expr>) -> Expr {
        Expr::Where {
            cond: Box::new(self),
            true_val: Box::new(on_true.into()),
            false_val: Box::new(on_false.into()),
        }
    }

    pub fn sqrt(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Sqrt,
            value: Box::new(self),
        }
    }

    pub fn relu(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Relu,
            value: Box::new(self),
        }
    }

    /// Swap two axes.
    pub fn transpose(self, dim0: usize, dim1: usize) -> Expr {
        Expr::Transpose {
            value: Box::new(self),
            dim0,
            dim1,
        }
    }

    /// Reduce along `dim`, removing it.
    pub fn sum(self, dim: usize) -> Expr {
        Expr::Sum {
            value: Box::new(self),
            dim,
            keepdim: false,
        }
    }

    /// Reduce along `dim`, keeping it as size 1.
    pub fn sum_keepdim(self, dim: usize) -> Expr {
        Expr::Sum {
            value: Box::new(self),
            dim,
            keepdim: true,
        }
    }

    /// Contiguous sub-range along `dim`.
    pub fn slice(self, dim: usize, start: usize, len: usize) -> Expr {
        Expr::Slice {
            value: Box::new(self),
            dim,
            start,
            len,
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        constant(value)
    }
}

macro_rules! impl_expr_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl ops::$trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self, constant(rhs))
            }
        }

        impl ops::$trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, constant(self), rhs)
            }
        }
    };
}

impl_expr_binop!(Add, add, BinaryOp::Add);
impl_expr_binop!(Sub, sub, BinaryOp::Sub);
impl_expr_binop!(Mul, mul, BinaryOp::Mul);
impl_expr_binop!(Div, div, BinaryOp::Div);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            value: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_sugar_builds_tree() {
        let e = state("vel_x") - state("vel_x") * param("physics", "drag") * 0.1;
        match e {
            Expr::Binary {
                op: BinaryOp::Sub,
                left,
                right,
            } => {
                assert_eq!(*left, state("vel_x"));
                assert!(matches!(
                    *right,
                    Expr::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_scalar_lhs_promotes_to_const() {
        let e = 1.0 - param("physics", "drag");
        match e {
            Expr::Binary { left, .. } => assert_eq!(*left, constant(1.0)),
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_stencil_expands_kernel_at_construction() {
        let e = stencil(state("pos_x"), 1, |c, n| n - c);
        match e {
            Expr::Stencil { range, kernel, .. } => {
                assert_eq!(range, 1);
                assert_eq!(
                    *kernel,
                    aux(STENCIL_NEIGHBOR) - aux(STENCIL_CENTER)
                );
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_structural_equality() {
        let a = (state("pos_x") + constant(1.0)).sqrt();
        let b = (state("pos_x") + constant(1.0)).sqrt();
        assert_eq!(a, b);
    }

    #[test]
    fn test_select_wraps_condition() {
        let e = state("pos_x").gt(0.0).select(1.0, 0.0);
        assert!(matches!(e, Expr::Where { .. }));
    }
}
