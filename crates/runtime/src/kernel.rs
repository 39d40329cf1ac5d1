//! Update kernel
//!
//! Interprets the IR's op stream against the batched state tensor and the
//! per-group parameter tensors, producing the next state. Execution follows
//! IR order exactly; every op reads named bindings produced by earlier ops
//! (or the implicit `s_*`/`p_*` columns) and writes one binding. After the
//! stream runs, the next state is reassembled by concatenating each state
//! variable's final assignment in column order, then boundary conditions are
//! applied.

use candle_core::{DType, Device, Tensor};
use indexmap::IndexMap;
use tracing::trace;

use evolimo_ir::{BoundaryCondition, BoundaryKind, GridConfig, OpKind, Operation, OutputIR};

use crate::error::{Error, Result};
use crate::grid::{self, ScatterMap};

/// Per-step metrics that are not errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStats {
    /// Agents dropped by grid scatter this step (capacity overflow).
    pub grid_dropped: usize,
}

/// A compiled-IR step function. Stateless across steps; cheap to clone.
#[derive(Debug, Clone)]
pub struct UpdateKernel {
    state_vars: Vec<String>,
    groups: Vec<(String, Vec<String>)>,
    boundary_conditions: Vec<BoundaryCondition>,
    operations: Vec<Operation>,
    grid: Option<GridConfig>,
}

impl UpdateKernel {
    pub fn new(ir: &OutputIR) -> Self {
        Self {
            state_vars: ir.state_vars.clone(),
            groups: ir
                .groups
                .iter()
                .map(|(name, spec)| (name.clone(), spec.params.clone()))
                .collect(),
            boundary_conditions: ir.boundary_conditions.clone(),
            operations: ir.operations.clone(),
            grid: ir.grid_config.clone(),
        }
    }

    /// Execute one step: `(state [N,S], {group -> [N,K]}) -> state' [N,S]`.
    pub fn update(
        &self,
        state: &Tensor,
        params: &IndexMap<String, Tensor>,
    ) -> Result<(Tensor, StepStats)> {
        let mut ctx = ExecContext {
            device: state.device(),
            grid: self.grid.as_ref(),
            bindings: IndexMap::new(),
            scatter: None,
            dropped: 0,
        };

        // Column extraction: one [N, 1] view per state var and parameter.
        for (i, var) in self.state_vars.iter().enumerate() {
            ctx.bindings
                .insert(format!("s_{var}"), state.narrow(1, i, 1)?);
        }
        for (group, param_names) in &self.groups {
            let tensor = params
                .get(group)
                .ok_or_else(|| Error::MissingGroup(group.clone()))?;
            for (k, name) in param_names.iter().enumerate() {
                ctx.bindings
                    .insert(format!("p_{name}"), tensor.narrow(1, k, 1)?);
            }
        }

        ctx.run(&self.operations)?;

        // Reassemble in state_vars order, then apply boundaries per column.
        let mut columns = Vec::with_capacity(self.state_vars.len());
        for var in &self.state_vars {
            let col = ctx
                .bindings
                .get(var)
                .ok_or_else(|| Error::UnknownStateVar(var.clone()))?;
            columns.push(col.clone());
        }
        for bc in &self.boundary_conditions {
            let idx = self
                .state_vars
                .iter()
                .position(|v| v == &bc.target_state)
                .ok_or_else(|| Error::UnknownStateVar(bc.target_state.clone()))?;
            columns[idx] = apply_boundary(&columns[idx], bc)?;
        }

        let refs: Vec<&Tensor> = columns.iter().collect();
        let next = Tensor::cat(&refs, 1)?;
        Ok((
            next,
            StepStats {
                grid_dropped: ctx.dropped,
            },
        ))
    }
}

fn apply_boundary(col: &Tensor, bc: &BoundaryCondition) -> Result<Tensor> {
    let [min, max] = bc.range;
    match bc.kind {
        BoundaryKind::Torus => {
            let span = max - min;
            if span <= 0.0 {
                return Ok(col.clone());
            }
            // ((x - min) mod span) + min with a non-negative remainder.
            let shifted = col.affine(1.0, -min)?;
            let wraps = (&shifted / span)?.floor()?;
            let rem = (&shifted - &(wraps * span)?)?;
            Ok(rem.affine(1.0, min)?)
        }
        BoundaryKind::Clamp => Ok(col.clamp(min, max)?),
        BoundaryKind::None => Ok(col.clone()),
    }
}

/// Mutable interpretation state for one op stream. Stencil kernels run in a
/// child context that sees only `center`, `neighbor`, and the parameter
/// columns.
struct ExecContext<'a> {
    device: &'a Device,
    grid: Option<&'a GridConfig>,
    bindings: IndexMap<String, Tensor>,
    scatter: Option<ScatterMap>,
    dropped: usize,
}

impl ExecContext<'_> {
    fn run(&mut self, ops: &[Operation]) -> Result<()> {
        for op in ops {
            let value = self.exec(op)?;
            trace!(target_var = %op.target, op = %op.op, "op executed");
            self.bindings.insert(op.target.clone(), value);
        }
        Ok(())
    }

    fn named(&self, op: &Operation, name: &str) -> Result<Tensor> {
        self.bindings
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownBinding {
                op: op.op.to_string(),
                name: name.to_string(),
            })
    }

    fn arg(&self, op: &Operation, i: usize) -> Result<Tensor> {
        let name = op.args.get(i).ok_or_else(|| Error::UnknownBinding {
            op: op.op.to_string(),
            name: format!("args[{i}]"),
        })?;
        self.named(op, name)
    }

    fn exec(&mut self, op: &Operation) -> Result<Tensor> {
        Ok(match op.op {
            OpKind::Assign => self.arg(op, 0)?,
            OpKind::Const => {
                let value = op.value.unwrap_or(0.0) as f32;
                Tensor::full(value, (1, 1), self.device)?
            }
            // The binding was established from the group tensors up front;
            // the op just republishes it under its target name.
            OpKind::RefParam => self.named(op, &op.target)?,
            OpKind::Add => self.arg(op, 0)?.broadcast_add(&self.arg(op, 1)?)?,
            OpKind::Sub => self.arg(op, 0)?.broadcast_sub(&self.arg(op, 1)?)?,
            OpKind::Mul => self.arg(op, 0)?.broadcast_mul(&self.arg(op, 1)?)?,
            OpKind::Div => self.arg(op, 0)?.broadcast_div(&self.arg(op, 1)?)?,
            OpKind::Lt => self
                .arg(op, 0)?
                .broadcast_lt(&self.arg(op, 1)?)?
                .to_dtype(DType::F32)?,
            OpKind::Gt => self
                .arg(op, 0)?
                .broadcast_gt(&self.arg(op, 1)?)?
                .to_dtype(DType::F32)?,
            OpKind::Ge => self
                .arg(op, 0)?
                .broadcast_ge(&self.arg(op, 1)?)?
                .to_dtype(DType::F32)?,
            OpKind::Where => {
                // c*t + (1-c)*f keeps broadcast semantics aligned with the
                // arithmetic ops.
                let cond = self.arg(op, 0)?;
                let on_true = self.arg(op, 1)?;
                let on_false = self.arg(op, 2)?;
                let picked_true = cond.broadcast_mul(&on_true)?;
                let picked_false = cond.affine(-1.0, 1.0)?.broadcast_mul(&on_false)?;
                picked_true.broadcast_add(&picked_false)?
            }
            OpKind::Sqrt => self.arg(op, 0)?.sqrt()?,
            OpKind::Relu => self.arg(op, 0)?.relu()?,
            OpKind::Neg => self.arg(op, 0)?.neg()?,
            OpKind::Transpose => {
                self.arg(op, 0)?
                    .transpose(op.dim0.unwrap_or(0), op.dim1.unwrap_or(1))?
            }
            OpKind::Sum => {
                let value = self.arg(op, 0)?;
                let dim = op.dim.unwrap_or(0);
                if op.keepdim.unwrap_or(false) {
                    value.sum_keepdim(dim)?
                } else {
                    value.sum(dim)?
                }
            }
            OpKind::Cat => {
                let mut tensors = Vec::with_capacity(op.args.len());
                for i in 0..op.args.len() {
                    tensors.push(self.arg(op, i)?);
                }
                let refs: Vec<&Tensor> = tensors.iter().collect();
                Tensor::cat(&refs, op.dim.unwrap_or(0))?
            }
            OpKind::Slice => self.arg(op, 0)?.narrow(
                op.dim.unwrap_or(0),
                op.start.unwrap_or(0),
                op.len.unwrap_or(1),
            )?,
            OpKind::GridScatter => {
                let cfg = self.grid.ok_or(Error::MissingGridConfig)?;
                let value = self.arg(op, 0)?;
                let x = self.arg(op, 1)?;
                let y = self.arg(op, 2)?;
                let (grid_tensor, map) = grid::scatter(cfg, &value, &x, &y)?;
                self.dropped += map.dropped;
                self.scatter = Some(map);
                grid_tensor
            }
            OpKind::Stencil => {
                let value = self.arg(op, 0)?;
                let map = self.scatter.as_ref().ok_or(Error::MissingScatter)?;
                let range = op.stencil_range.unwrap_or(1);

                // Kernel ops see the parameter columns plus the pair
                // bindings; grid state is deliberately absent so nested grid
                // ops fail fast.
                let param_bindings: IndexMap<String, Tensor> = self
                    .bindings
                    .iter()
                    .filter(|(name, _)| name.starts_with("p_"))
                    .map(|(name, tensor)| (name.clone(), tensor.clone()))
                    .collect();
                let device = self.device;
                let kernel_ops = &op.kernel_operations;

                grid::stencil(&value, range, map, |center, neighbor| {
                    let mut inner = ExecContext {
                        device,
                        grid: None,
                        bindings: param_bindings.clone(),
                        scatter: None,
                        dropped: 0,
                    };
                    inner
                        .bindings
                        .insert("center".to_string(), center.clone());
                    inner
                        .bindings
                        .insert("neighbor".to_string(), neighbor.clone());
                    inner.run(kernel_ops)?;
                    inner.bindings.get("kernel_output").cloned().ok_or_else(|| {
                        Error::UnknownBinding {
                            op: "stencil".to_string(),
                            name: "kernel_output".to_string(),
                        }
                    })
                })?
            }
            OpKind::GridGather => {
                let value = self.arg(op, 0)?;
                let map = self.scatter.as_ref().ok_or(Error::MissingScatter)?;
                grid::gather(&value, map)?
            }
        })
    }
}
