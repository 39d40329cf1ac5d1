//! Minimal one-dimensional world: particles slide along x and lose velocity
//! to drag. Exercises the non-grid path end to end.

use evolimo_dsl::{param, state, SimulationDef};
use evolimo_ir::{Activation, BoundaryKind, Distribution};

const DT: f64 = 0.1;

pub fn definition() -> SimulationDef {
    SimulationDef::new("drag_1d")
        .n_agents(1_000)
        .gene_len(16)
        .hidden_len(32)
        .state_order(["pos_x", "vel_x", "energy"])
        .group("physics", Activation::Sigmoid)
        .rule(
            "vel_x",
            state("vel_x") - state("vel_x") * param("physics", "drag") * DT,
        )
        .rule("pos_x", state("pos_x") + state("vel_x") * DT)
        .boundary("pos_x", BoundaryKind::Torus, [-10.0, 10.0])
        .init_state("pos_x", Distribution::uniform(-10.0, 10.0))
        .init_state("vel_x", Distribution::normal(0.0, 1.0))
        .init_state("energy", Distribution::constant(100.0))
        .init_genes(Distribution::normal(0.0, 1.0))
}
