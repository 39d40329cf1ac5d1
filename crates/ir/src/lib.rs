//! Evolimo IR
//!
//! The serialized operation list and simulation constants produced by the
//! compiler and consumed by the runtime. This is the stable handoff between
//! the two sides: both derive state-column layout and parameter-column
//! ordering from the same `OutputIR` value, never from each other.

pub mod visual;

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use visual::VisualMapping;

/// Errors reading or writing IR JSON.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("failed to read/write IR: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed IR JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One operation in the flattened update program.
///
/// Operations form an SSA-like stream: each op assigns `target` exactly once,
/// and `args` name values produced by earlier ops (or the implicit `s_*`,
/// `p_*`, and aux bindings). The stream is topologically ordered by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub target: String,
    pub op: OpKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_info: Option<ParamInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepdim: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim0: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim1: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stencil_range: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_operations: Vec<Operation>,
}

impl Operation {
    /// A bare operation with no optional payload. Builders fill in the rest.
    pub fn new(target: impl Into<String>, op: OpKind, args: Vec<String>) -> Self {
        Self {
            target: target.into(),
            op,
            args,
            value: None,
            param_info: None,
            dim: None,
            keepdim: None,
            dim0: None,
            dim1: None,
            stencil_range: None,
            start: None,
            len: None,
            kernel_operations: Vec::new(),
        }
    }
}

/// Operation discriminant. Serialized as the snake_case strings of the wire
/// format (`"grid_scatter"`, `"ref_param"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Copy an existing binding into `target`. Rule results, pass-throughs,
    /// and the `kernel_output` sentinel all use this.
    Assign,
    /// Broadcast scalar constant (`value`).
    Const,
    /// Bind a genetic parameter column (`param_info`).
    RefParam,
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Ge,
    Where,
    Sqrt,
    Relu,
    Neg,
    Transpose,
    Sum,
    Cat,
    Slice,
    GridScatter,
    Stencil,
    GridGather,
}

impl OpKind {
    /// Wire name, identical to the serde representation.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Assign => "assign",
            OpKind::Const => "const",
            OpKind::RefParam => "ref_param",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::Lt => "lt",
            OpKind::Gt => "gt",
            OpKind::Ge => "ge",
            OpKind::Where => "where",
            OpKind::Sqrt => "sqrt",
            OpKind::Relu => "relu",
            OpKind::Neg => "neg",
            OpKind::Transpose => "transpose",
            OpKind::Sum => "sum",
            OpKind::Cat => "cat",
            OpKind::Slice => "slice",
            OpKind::GridScatter => "grid_scatter",
            OpKind::Stencil => "stencil",
            OpKind::GridGather => "grid_gather",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Group and parameter id carried by a `ref_param` op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub group: String,
    pub param: String,
}

/// Simulation-wide sizes baked into the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constants {
    pub n_agents: usize,
    pub gene_len: usize,
    pub hidden_len: usize,
}

/// Fixed-capacity uniform grid configuration for the stencil path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cells along x.
    pub width: usize,
    /// Cells along y.
    pub height: usize,
    /// Particles represented per cell; overflow is dropped for the step.
    pub capacity: usize,
    /// World units per cell, `[x, y]`.
    pub cell_size: [f64; 2],
}

/// Activation applied to one phenotype head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Softmax,
    Tanh,
    Sigmoid,
    None,
}

/// One phenotype output group: activation plus parameter ids in column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub activation: Activation,
    /// Sorted lexicographically by the compiler; the runtime binds parameter
    /// columns in exactly this order.
    pub params: Vec<String>,
}

/// Boundary behavior for one state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Torus,
    Clamp,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCondition {
    pub target_state: String,
    pub kind: BoundaryKind,
    pub range: [f64; 2],
}

/// Initial value distribution for a state column or the gene matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Distribution {
    Const { value: f64 },
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
}

impl Distribution {
    pub fn constant(value: f64) -> Self {
        Self::Const { value }
    }

    pub fn uniform(low: f64, high: f64) -> Self {
        Self::Uniform { low, high }
    }

    pub fn normal(mean: f64, std: f64) -> Self {
        Self::Normal { mean, std }
    }
}

/// Initial distributions for every state variable plus the gene matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initialization {
    pub state: IndexMap<String, Distribution>,
    pub genes: Distribution,
}

/// The complete compiled program for one definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputIR {
    /// State variables in column order. `state[:, i]` holds `state_vars[i]`.
    pub state_vars: Vec<String>,
    pub constants: Constants,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_config: Option<GridConfig>,
    pub groups: IndexMap<String, GroupSpec>,
    pub boundary_conditions: Vec<BoundaryCondition>,
    pub initialization: Initialization,
    pub operations: Vec<Operation>,
}

impl OutputIR {
    /// Column index of a state variable, if present.
    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.state_vars.iter().position(|s| s == name)
    }

    pub fn state_dims(&self) -> usize {
        self.state_vars.len()
    }

    pub fn from_json(json: &str) -> Result<Self, IrError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IrError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IrError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
