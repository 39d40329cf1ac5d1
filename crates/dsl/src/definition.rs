//! Definition surface
//!
//! A [`SimulationDef`] bundles everything the compiler needs for one world:
//! declared state order, parameter groups, per-state update rules, boundary
//! conditions, initialization, and the optional grid and visual mapping.

use indexmap::IndexMap;

use evolimo_ir::{
    Activation, BoundaryCondition, BoundaryKind, Distribution, GridConfig, VisualMapping,
};

use crate::expr::Expr;

/// One per-step update rule: `target_state <- expr(state, params)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub target_state: String,
    pub expr: Expr,
}

/// A named parameter group. Its member parameters are discovered from the
/// rules; only the head activation is declared here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDef {
    pub activation: Activation,
}

/// Everything the compiler consumes for one definition module.
#[derive(Debug, Clone)]
pub struct SimulationDef {
    pub name: String,
    pub n_agents: usize,
    pub gene_len: usize,
    pub hidden_len: usize,
    /// Declared column order; referenced-but-undeclared state vars are
    /// appended lexically by the compiler.
    pub state_var_order: Vec<String>,
    pub parameter_groups: IndexMap<String, GroupDef>,
    pub rules: Vec<Rule>,
    pub boundaries: Vec<BoundaryCondition>,
    pub state_init: IndexMap<String, Distribution>,
    pub genes_init: Distribution,
    pub grid: Option<GridConfig>,
    pub visual: Option<VisualMapping>,
}

impl SimulationDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            n_agents: 1_000,
            gene_len: 32,
            hidden_len: 64,
            state_var_order: Vec::new(),
            parameter_groups: IndexMap::new(),
            rules: Vec::new(),
            boundaries: Vec::new(),
            state_init: IndexMap::new(),
            genes_init: Distribution::normal(0.0, 1.0),
            grid: None,
            visual: None,
        }
    }

    pub fn n_agents(mut self, n: usize) -> Self {
        self.n_agents = n;
        self
    }

    pub fn gene_len(mut self, len: usize) -> Self {
        self.gene_len = len;
        self
    }

    pub fn hidden_len(mut self, len: usize) -> Self {
        self.hidden_len = len;
        self
    }

    /// Declare the state column order.
    pub fn state_order<S: Into<String>>(mut self, vars: impl IntoIterator<Item = S>) -> Self {
        self.state_var_order = vars.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a parameter group and its head activation.
    pub fn group(mut self, name: impl Into<String>, activation: Activation) -> Self {
        self.parameter_groups
            .insert(name.into(), GroupDef { activation });
        self
    }

    /// Add an update rule for a state variable.
    pub fn rule(mut self, target_state: impl Into<String>, expr: Expr) -> Self {
        self.rules.push(Rule {
            target_state: target_state.into(),
            expr,
        });
        self
    }

    pub fn boundary(
        mut self,
        target_state: impl Into<String>,
        kind: BoundaryKind,
        range: [f64; 2],
    ) -> Self {
        self.boundaries.push(BoundaryCondition {
            target_state: target_state.into(),
            kind,
            range,
        });
        self
    }

    pub fn init_state(mut self, var: impl Into<String>, dist: Distribution) -> Self {
        self.state_init.insert(var.into(), dist);
        self
    }

    pub fn init_genes(mut self, dist: Distribution) -> Self {
        self.genes_init = dist;
        self
    }

    pub fn grid(mut self, grid: GridConfig) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn visual(mut self, mapping: VisualMapping) -> Self {
        self.visual = Some(mapping);
        self
    }
}
