//! Phenotype engine
//!
//! A shallow MLP mapping the gene matrix to one parameter tensor per group:
//! `gene_len -> hidden_len` with ReLU, then one head per group followed by
//! the group's activation. Head order and head column order come straight
//! from the IR, so the update kernel can bind `p_*` columns by position.
//!
//! Weights are drawn from the caller's seeded generator rather than the
//! backend's variable initializer; the engine is stateless across steps and
//! its weights change only when it is rebuilt.

use candle_core::{Device, Tensor};
use candle_nn::{ops, Linear, Module};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::Uniform;

use evolimo_ir::{Activation, OutputIR};

use crate::error::Result;

struct Head {
    group: String,
    layer: Linear,
    activation: Activation,
}

pub struct Phenotype {
    hidden: Linear,
    heads: Vec<Head>,
}

impl Phenotype {
    /// Construct the engine for an IR. One head per IR group, sized
    /// `hidden_len -> |params|`.
    pub fn new(ir: &OutputIR, device: &Device, rng: &mut StdRng) -> Result<Self> {
        let c = &ir.constants;
        let hidden = init_linear(c.gene_len, c.hidden_len, rng, device)?;
        let mut heads = Vec::with_capacity(ir.groups.len());
        for (name, spec) in &ir.groups {
            heads.push(Head {
                group: name.clone(),
                layer: init_linear(c.hidden_len, spec.params.len(), rng, device)?,
                activation: spec.activation,
            });
        }
        Ok(Self { hidden, heads })
    }

    /// `genes: [N, gene_len] -> {group -> [N, |params|]}`.
    pub fn forward(&self, genes: &Tensor) -> Result<IndexMap<String, Tensor>> {
        let h = self.hidden.forward(genes)?.relu()?;
        let mut out = IndexMap::with_capacity(self.heads.len());
        for head in &self.heads {
            let y = head.layer.forward(&h)?;
            let y = match head.activation {
                Activation::Softmax => ops::softmax(&y, 1)?,
                Activation::Tanh => y.tanh()?,
                Activation::Sigmoid => ops::sigmoid(&y)?,
                Activation::None => y,
            };
            out.insert(head.group.clone(), y);
        }
        Ok(out)
    }
}

/// Uniform(-1/sqrt(in), 1/sqrt(in)) weights and bias.
fn init_linear(
    in_dim: usize,
    out_dim: usize,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Linear> {
    let bound = (1.0 / in_dim.max(1) as f64).sqrt() as f32;
    let dist = Uniform::new(-bound, bound);
    let weight: Vec<f32> = (0..out_dim * in_dim).map(|_| rng.sample(dist)).collect();
    let bias: Vec<f32> = (0..out_dim).map(|_| rng.sample(dist)).collect();
    let weight = Tensor::from_vec(weight, (out_dim, in_dim), device)?;
    let bias = Tensor::from_vec(bias, out_dim, device)?;
    Ok(Linear::new(weight, Some(bias)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolimo_ir::{Constants, GroupSpec, Initialization, OutputIR};
    use indexmap::IndexMap;
    use rand::SeedableRng;

    fn test_ir() -> OutputIR {
        let mut groups = IndexMap::new();
        groups.insert(
            "attr".to_string(),
            GroupSpec {
                activation: Activation::Softmax,
                params: vec!["metabolism".to_string(), "move_cost".to_string()],
            },
        );
        groups.insert(
            "physics".to_string(),
            GroupSpec {
                activation: Activation::Sigmoid,
                params: vec!["drag".to_string()],
            },
        );
        OutputIR {
            state_vars: vec![],
            constants: Constants {
                n_agents: 16,
                gene_len: 8,
                hidden_len: 12,
            },
            grid_config: None,
            groups,
            boundary_conditions: vec![],
            initialization: Initialization {
                state: IndexMap::new(),
                genes: evolimo_ir::Distribution::normal(0.0, 1.0),
            },
            operations: vec![],
        }
    }

    #[test]
    fn test_head_shapes_match_groups() {
        let device = Device::Cpu;
        let ir = test_ir();
        let mut rng = StdRng::seed_from_u64(0);
        let phenotype = Phenotype::new(&ir, &device, &mut rng).unwrap();
        let genes = Tensor::zeros((16, 8), candle_core::DType::F32, &device).unwrap();
        let out = phenotype.forward(&genes).unwrap();
        assert_eq!(out["attr"].dims(), &[16, 2]);
        assert_eq!(out["physics"].dims(), &[16, 1]);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Device::Cpu;
        let ir = test_ir();
        let mut rng = StdRng::seed_from_u64(3);
        let phenotype = Phenotype::new(&ir, &device, &mut rng).unwrap();
        let genes_values = crate::init::sample(
            &evolimo_ir::Distribution::normal(0.0, 1.0),
            16 * 8,
            &mut rng,
        )
        .unwrap();
        let genes = Tensor::from_vec(genes_values, (16, 8), &device).unwrap();
        let out = phenotype.forward(&genes).unwrap();
        let rows = out["attr"].sum_keepdim(1).unwrap().to_vec2::<f32>().unwrap();
        for row in rows {
            assert!((row[0] - 1.0).abs() < 1e-5, "row sum {}", row[0]);
        }
    }

    #[test]
    fn test_sigmoid_head_in_unit_interval() {
        let device = Device::Cpu;
        let ir = test_ir();
        let mut rng = StdRng::seed_from_u64(5);
        let phenotype = Phenotype::new(&ir, &device, &mut rng).unwrap();
        let genes = Tensor::from_vec(vec![2.0f32; 16 * 8], (16, 8), &device).unwrap();
        let out = phenotype.forward(&genes).unwrap();
        let values = out["physics"].flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let device = Device::Cpu;
        let ir = test_ir();
        let genes = Tensor::from_vec(vec![0.5f32; 16 * 8], (16, 8), &device).unwrap();
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        let pa = Phenotype::new(&ir, &device, &mut a).unwrap();
        let pb = Phenotype::new(&ir, &device, &mut b).unwrap();
        assert_eq!(
            pa.forward(&genes).unwrap()["attr"].to_vec2::<f32>().unwrap(),
            pb.forward(&genes).unwrap()["attr"].to_vec2::<f32>().unwrap()
        );
    }
}
