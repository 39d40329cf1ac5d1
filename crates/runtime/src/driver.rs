//! Step driver
//!
//! Owns the state and gene tensors for one simulation and advances them one
//! step at a time. Genes are static during a run, so the phenotype output is
//! computed once at construction and again only when the genes are replaced
//! between steps.

use candle_core::{Device, Tensor};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, instrument};

use evolimo_ir::OutputIR;

use crate::error::{Error, Result};
use crate::init;
use crate::kernel::{StepStats, UpdateKernel};
use crate::phenotype::Phenotype;

pub struct Simulation {
    ir: OutputIR,
    kernel: UpdateKernel,
    phenotype: Phenotype,
    genes: Tensor,
    params: IndexMap<String, Tensor>,
    state: Tensor,
    steps: u64,
    last_stats: StepStats,
}

impl Simulation {
    /// Allocate genes and state per the IR's initialization section, build
    /// the phenotype engine, and compute the parameter tensors. All
    /// randomness flows from `seed`.
    pub fn new(ir: OutputIR, device: &Device, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let phenotype = Phenotype::new(&ir, device, &mut rng)?;
        let genes = init::init_genes(&ir, device, &mut rng)?;
        let state = init::init_state(&ir, device, &mut rng)?;
        let params = phenotype.forward(&genes)?;
        let kernel = UpdateKernel::new(&ir);

        info!(
            n_agents = ir.constants.n_agents,
            state_dims = ir.state_dims(),
            gene_len = ir.constants.gene_len,
            "simulation initialized"
        );

        Ok(Self {
            ir,
            kernel,
            phenotype,
            genes,
            params,
            state,
            steps: 0,
            last_stats: StepStats::default(),
        })
    }

    /// Advance one step.
    #[instrument(skip(self), fields(step = self.steps))]
    pub fn step(&mut self) -> Result<StepStats> {
        let (next, stats) = self.kernel.update(&self.state, &self.params)?;
        self.state = next;
        self.steps += 1;
        self.last_stats = stats;
        if stats.grid_dropped > 0 {
            debug!(dropped = stats.grid_dropped, "grid capacity overflow");
        }
        Ok(stats)
    }

    /// Snapshot of the current `[N, S]` state, for the replay writer.
    pub fn state(&self) -> &Tensor {
        &self.state
    }

    pub fn genes(&self) -> &Tensor {
        &self.genes
    }

    /// Replace the gene matrix between steps and recompute parameters.
    pub fn set_genes(&mut self, genes: Tensor) -> Result<()> {
        self.params = self.phenotype.forward(&genes)?;
        self.genes = genes;
        Ok(())
    }

    pub fn ir(&self) -> &OutputIR {
        &self.ir
    }

    pub fn params(&self) -> &IndexMap<String, Tensor> {
        &self.params
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Agents dropped by grid scatter in the most recent step.
    pub fn overflow_count(&self) -> usize {
        self.last_stats.grid_dropped
    }

    /// Sum one state column, reading back to the host. Forces device sync.
    pub fn column_sum(&self, var: &str) -> Result<f32> {
        let idx = self
            .ir
            .state_index(var)
            .ok_or_else(|| Error::UnknownStateVar(var.to_string()))?;
        Ok(self
            .state
            .narrow(1, idx, 1)?
            .sum_all()?
            .to_vec0::<f32>()?)
    }
}
