//! Evolimo Compiler
//!
//! Turns a [`SimulationDef`] into the deterministic JSON IR the runtime
//! executes. The pipeline: collect state variables, collect and validate
//! parameter groups, flatten every rule with cross-rule CSE, close the op
//! list with pass-through assignments, and verify initialization coverage.

pub mod flatten;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info};

use evolimo_dsl::SimulationDef;
use evolimo_ir::{
    Constants, GroupSpec, Initialization, OpKind, Operation, OutputIR,
};

pub use flatten::{canonical_key, Flattener, KERNEL_OUTPUT};

/// Compile-time failures. All are fatal and name the offending identifier.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unknown parameter group `{group}` referenced by parameter `{param}`")]
    UnknownGroup { group: String, param: String },

    #[error("state variable `{0}` has no initialization entry")]
    MissingInitialization(String),

    #[error("state variable `{0}` is assigned by more than one rule")]
    DuplicateRule(String),

    #[error("failed to write generated output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize IR: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compile one definition to its IR.
pub fn compile(def: &SimulationDef) -> Result<OutputIR, CompileError> {
    // State-var collection: declared order first, then referenced-but-
    // undeclared vars in lexical order. Declared vars stay even when no rule
    // touches them; they become pass-throughs below.
    let mut referenced = BTreeSet::new();
    for rule in &def.rules {
        referenced.insert(rule.target_state.clone());
        flatten::collect_state_refs(&rule.expr, &mut referenced);
    }
    let mut state_vars = def.state_var_order.clone();
    for var in &referenced {
        if !state_vars.contains(var) {
            state_vars.push(var.clone());
        }
    }

    // Parameter collection, descending into stencil kernels.
    let mut collected: IndexMap<String, BTreeSet<String>> = IndexMap::new();
    for rule in &def.rules {
        flatten::collect_params(&rule.expr, &def.parameter_groups, &mut collected)?;
    }
    let mut groups = IndexMap::new();
    for (name, group) in &def.parameter_groups {
        match collected.get(name) {
            Some(params) if !params.is_empty() => {
                groups.insert(
                    name.clone(),
                    GroupSpec {
                        activation: group.activation,
                        params: params.iter().cloned().collect(),
                    },
                );
            }
            // A declared group no rule references would produce a zero-width
            // phenotype head; leave it out of the IR.
            _ => debug!(group = %name, "dropping parameter group with no referenced params"),
        }
    }

    // Flattening with CSE across rules, then one assignment per rule.
    let mut fl = Flattener::new(&def.parameter_groups);
    let mut assigned = BTreeSet::new();
    for rule in &def.rules {
        let var = fl.flatten(&rule.expr)?;
        if !assigned.insert(rule.target_state.clone()) {
            return Err(CompileError::DuplicateRule(rule.target_state.clone()));
        }
        fl.ops.push(Operation::new(
            &rule.target_state,
            OpKind::Assign,
            vec![var],
        ));
    }

    // Pass-through: every unwritten state var copies itself forward so the
    // runtime can rebuild the full state by one concatenation rule.
    let mut operations = fl.ops;
    for var in &state_vars {
        if !assigned.contains(var) {
            operations.push(Operation::new(
                var,
                OpKind::Assign,
                vec![format!("s_{var}")],
            ));
        }
    }

    // Initialization coverage.
    let mut state_init = IndexMap::new();
    for var in &state_vars {
        match def.state_init.get(var) {
            Some(dist) => {
                state_init.insert(var.clone(), dist.clone());
            }
            None => return Err(CompileError::MissingInitialization(var.clone())),
        }
    }

    debug!(
        definition = %def.name,
        state_vars = state_vars.len(),
        operations = operations.len(),
        "compiled definition"
    );

    Ok(OutputIR {
        state_vars,
        constants: Constants {
            n_agents: def.n_agents,
            gene_len: def.gene_len,
            hidden_len: def.hidden_len,
        },
        grid_config: def.grid.clone(),
        groups,
        boundary_conditions: def.boundaries.clone(),
        initialization: Initialization {
            state: state_init,
            genes: def.genes_init.clone(),
        },
        operations,
    })
}

/// Compile every definition and write `_gen/<name>/dynamics_ir.json` (plus
/// `visual_mapping.json` when the definition carries one). Returns the paths
/// of the written IR files.
pub fn compile_to_dir(
    defs: &[SimulationDef],
    out_dir: &Path,
) -> Result<Vec<PathBuf>, CompileError> {
    let mut written = Vec::with_capacity(defs.len());
    for def in defs {
        let ir = compile(def)?;
        let dir = out_dir.join(&def.name);
        fs::create_dir_all(&dir)?;

        let ir_path = dir.join("dynamics_ir.json");
        fs::write(&ir_path, serde_json::to_string_pretty(&ir)?)?;

        if let Some(visual) = &def.visual {
            fs::write(
                dir.join("visual_mapping.json"),
                serde_json::to_string_pretty(visual)?,
            )?;
        }

        info!(definition = %def.name, path = %ir_path.display(), "wrote IR");
        written.push(ir_path);
    }
    Ok(written)
}
