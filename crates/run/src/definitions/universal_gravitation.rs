//! N-body world on a torus: every particle attracts its grid neighborhood
//! with a softened inverse-square pull, loses velocity to drag, and pays an
//! energy cost for existing and for moving.

use evolimo_dsl::{cat, grid_gather, grid_scatter, param, state, stencil, Expr, SimulationDef};
use evolimo_ir::visual::{
    ColorMapping, OpacityMapping, PositionMapping, SizeMapping, VisualMapping, VisualSource,
};
use evolimo_ir::{Activation, BoundaryKind, Distribution, GridConfig};

const DT: f64 = 0.1;
/// Softening added to squared pair distance to bound close-range forces.
const SOFTENING: f64 = 0.01;
const WORLD_SIZE: f64 = 128.0;

// Channel layout of the scattered grid rows.
const CH_POS_X: usize = 0;
const CH_POS_Y: usize = 1;
const CH_VEL_X: usize = 2;
const CH_VEL_Y: usize = 3;
const CH_SIZE: usize = 4;

/// Inverse-square attraction between one (center, neighbor) pair. Operands
/// are pair rows `[P, D]`; the result carries forces in the velocity
/// channels and zeros elsewhere.
fn gravity_kernel(center: Expr, neighbor: Expr) -> Expr {
    let dx = neighbor.clone().slice(1, CH_POS_X, 1) - center.clone().slice(1, CH_POS_X, 1);
    let dy = neighbor.clone().slice(1, CH_POS_Y, 1) - center.clone().slice(1, CH_POS_Y, 1);
    let mass = neighbor.slice(1, CH_SIZE, 1);

    let d2 = dx.clone() * dx.clone() + dy.clone() * dy.clone() + SOFTENING;
    let pull = mass * (1.0 / d2);
    let fx = pull.clone() * dx;
    let fy = pull * dy;

    let zero = center.slice(1, CH_POS_X, 1) * 0.0;
    cat(
        vec![zero.clone(), zero.clone(), fx, fy, zero.clone(), zero],
        1,
    )
}

pub fn definition() -> SimulationDef {
    let full_state = cat(
        vec![
            state("pos_x"),
            state("pos_y"),
            state("vel_x"),
            state("vel_y"),
            state("size"),
            state("energy"),
        ],
        1,
    );
    let force_grid = stencil(
        grid_scatter(full_state, state("pos_x"), state("pos_y")),
        1,
        gravity_kernel,
    );
    // The whole scatter/stencil/gather chain is shared by both velocity
    // rules and is computed once.
    let forces = grid_gather(force_grid, state("pos_x"), state("pos_y"));
    let fx = forces.clone().slice(1, CH_VEL_X, 1);
    let fy = forces.slice(1, CH_VEL_Y, 1);

    let gravity = param("physics", "gravity");
    let drag = param("physics", "drag");
    let damping = 1.0 - drag * DT;

    let speed =
        (state("vel_x") * state("vel_x") + state("vel_y") * state("vel_y")).sqrt();

    SimulationDef::new("universal_gravitation")
        .n_agents(1_000)
        .gene_len(32)
        .hidden_len(64)
        .state_order(["pos_x", "pos_y", "vel_x", "vel_y", "size", "energy"])
        .group("physics", Activation::Sigmoid)
        .group("attributes", Activation::Softmax)
        .grid(GridConfig {
            width: 32,
            height: 32,
            capacity: 8,
            cell_size: [4.0, 4.0],
        })
        .rule(
            "vel_x",
            (state("vel_x") + fx * gravity.clone() * DT) * damping.clone(),
        )
        .rule("vel_y", (state("vel_y") + fy * gravity * DT) * damping)
        .rule("pos_x", state("pos_x") + state("vel_x") * DT)
        .rule("pos_y", state("pos_y") + state("vel_y") * DT)
        .rule(
            "energy",
            state("energy")
                - param("attributes", "metabolism") * DT
                - param("attributes", "move_cost") * speed * DT,
        )
        .boundary("pos_x", BoundaryKind::Torus, [0.0, WORLD_SIZE])
        .boundary("pos_y", BoundaryKind::Torus, [0.0, WORLD_SIZE])
        .init_state("pos_x", Distribution::uniform(0.0, WORLD_SIZE))
        .init_state("pos_y", Distribution::uniform(0.0, WORLD_SIZE))
        .init_state("vel_x", Distribution::normal(0.0, 0.5))
        .init_state("vel_y", Distribution::normal(0.0, 0.5))
        .init_state("size", Distribution::uniform(1.0, 3.0))
        .init_state("energy", Distribution::constant(100.0))
        .init_genes(Distribution::normal(0.0, 1.0))
        .visual(VisualMapping {
            position: PositionMapping {
                x: "pos_x".to_string(),
                y: "pos_y".to_string(),
            },
            size: Some(SizeMapping {
                source: VisualSource::single("size"),
                value_range: Some([1.0, 3.0]),
                range: [2.0, 8.0],
                scale: Some("sqrt".to_string()),
            }),
            color: Some(ColorMapping {
                source: VisualSource::single("energy"),
                colormap: "viridis".to_string(),
                range: Some([0.0, 100.0]),
            }),
            opacity: Some(OpacityMapping {
                source: VisualSource::single("energy"),
                value_range: Some([0.0, 100.0]),
                range: [0.25, 1.0],
            }),
        })
}
