//! State and gene initialization
//!
//! Distributions are sampled host-side from a seeded generator and uploaded
//! as whole tensors, so two runs with the same seed produce bitwise-identical
//! starting conditions on any device. Columns are sampled in `state_vars`
//! order; the gene matrix is sampled row-major.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Normal, Uniform};

use evolimo_ir::{Distribution, OutputIR};

use crate::error::{Error, Result};

/// Draw `n` samples from a distribution.
pub fn sample(dist: &Distribution, n: usize, rng: &mut StdRng) -> Result<Vec<f32>> {
    Ok(match dist {
        Distribution::Const { value } => vec![*value as f32; n],
        Distribution::Uniform { low, high } => {
            // A degenerate range collapses to its lower bound.
            if high <= low {
                vec![*low as f32; n]
            } else {
                let d = Uniform::new(*low as f32, *high as f32);
                (0..n).map(|_| rng.sample(d)).collect()
            }
        }
        Distribution::Normal { mean, std } => {
            let d = Normal::new(*mean as f32, *std as f32)
                .map_err(|_| Error::InvalidNormal(*std))?;
            (0..n).map(|_| rng.sample(d)).collect()
        }
    })
}

/// Build the `[N, S]` state tensor from the IR's per-column distributions.
pub fn init_state(ir: &OutputIR, device: &Device, rng: &mut StdRng) -> Result<Tensor> {
    let n = ir.constants.n_agents;
    let mut columns = Vec::with_capacity(ir.state_vars.len());
    for var in &ir.state_vars {
        let dist = ir
            .initialization
            .state
            .get(var)
            .ok_or_else(|| Error::UnknownStateVar(var.clone()))?;
        let values = sample(dist, n, rng)?;
        columns.push(Tensor::from_vec(values, (n, 1), device)?);
    }
    let refs: Vec<&Tensor> = columns.iter().collect();
    Ok(Tensor::cat(&refs, 1)?)
}

/// Build the `[N, gene_len]` gene matrix.
pub fn init_genes(ir: &OutputIR, device: &Device, rng: &mut StdRng) -> Result<Tensor> {
    let n = ir.constants.n_agents;
    let len = ir.constants.gene_len;
    let values = sample(&ir.initialization.genes, n * len, rng)?;
    Ok(Tensor::from_vec(values, (n, len), device)?)
}
