//! Fixed-capacity spatial grid
//!
//! The scatter -> stencil -> gather path that turns O(N^2) neighbor
//! interactions into near-linear work. Scatter assigns each agent a
//! `(cell, slot)` pair using host-side per-cell counters filled in agent
//! order; agents beyond a cell's capacity are dropped for the step and
//! counted. Stencil evaluates the compiled kernel over every
//! (center slot, neighbor slot) pair of every cell offset within range,
//! with torus wrap at the world edges. Gather reverses the slot map; dropped
//! agents read zeros.

use candle_core::{DType, Tensor};

use evolimo_ir::GridConfig;

use crate::error::{Error, Result};

/// Slot assignment recorded by the last scatter, consumed by stencil (for
/// the validity mask) and gather (for the reverse map).
pub struct ScatterMap {
    /// Flat `cell * capacity + slot` index per agent; dropped agents point
    /// one past the end, at the zero row gather appends.
    indices: Tensor,
    /// 1.0 where a grid slot holds a particle, `[H, W, C, 1]`.
    mask: Tensor,
    /// Agents that exceeded their cell's capacity this step.
    pub dropped: usize,
}

fn cell_index(pos: f32, cell_size: f64, cells: usize) -> usize {
    let idx = (pos as f64 / cell_size).floor();
    idx.clamp(0.0, (cells - 1) as f64) as usize
}

/// `[N, D] -> [H, W, C, D]`. Slots fill in agent-iteration order; empty
/// slots are zero.
pub fn scatter(
    cfg: &GridConfig,
    value: &Tensor,
    x: &Tensor,
    y: &Tensor,
) -> Result<(Tensor, ScatterMap)> {
    let device = value.device();
    let (n, d) = value.dims2()?;
    let xs = x.flatten_all()?.to_vec1::<f32>()?;
    let ys = y.flatten_all()?.to_vec1::<f32>()?;

    let (w, h, cap) = (cfg.width, cfg.height, cfg.capacity);
    let total = w * h * cap;
    let mut counts = vec![0usize; w * h];
    let mut mask = vec![0f32; total];
    let mut indices = Vec::with_capacity(n);
    let mut dropped = 0usize;

    for i in 0..n {
        let cx = cell_index(xs[i], cfg.cell_size[0], w);
        let cy = cell_index(ys[i], cfg.cell_size[1], h);
        let cell = cy * w + cx;
        if counts[cell] < cap {
            let flat = cell * cap + counts[cell];
            counts[cell] += 1;
            mask[flat] = 1.0;
            indices.push(flat as u32);
        } else {
            dropped += 1;
            indices.push(total as u32);
        }
    }

    let indices = Tensor::from_vec(indices, n, device)?;
    // The extra row swallows dropped agents, then falls away.
    let grid_flat = Tensor::zeros((total + 1, d), DType::F32, device)?.index_add(
        &indices,
        &value.contiguous()?,
        0,
    )?;
    let grid = grid_flat.narrow(0, 0, total)?.reshape((h, w, cap, d))?;
    let mask = Tensor::from_vec(mask, (h, w, cap, 1), device)?;

    Ok((grid, ScatterMap { indices, mask, dropped }))
}

/// Pad dims 0 and 1 with the opposite edges so shifted views wrap around the
/// world.
pub fn pad_torus(grid: &Tensor, pad: usize) -> Result<Tensor> {
    if pad == 0 {
        return Ok(grid.clone());
    }
    let h = grid.dim(0)?;
    let w = grid.dim(1)?;
    if pad > h.min(w) {
        return Err(candle_core::Error::Msg(format!(
            "stencil range {pad} exceeds grid dimensions {h}x{w}"
        ))
        .into());
    }
    let top = grid.narrow(0, h - pad, pad)?;
    let bottom = grid.narrow(0, 0, pad)?;
    let rows = Tensor::cat(&[&top, grid, &bottom], 0)?;
    let left = rows.narrow(1, w - pad, pad)?;
    let right = rows.narrow(1, 0, pad)?;
    Ok(Tensor::cat(&[&left, &rows, &right], 1)?)
}

/// Neighborhood reduction. `kernel` receives the center and neighbor pair
/// rows as `[P, D]` tensors and must return `[P, D]`; its output is summed
/// into each center slot over every in-range neighbor, skipping the
/// self-pair and empty slots. Offsets accumulate in lexical `(dy, dx)`
/// order, neighbor slots ascending, so results are reproducible.
pub fn stencil(
    grid: &Tensor,
    range: i64,
    map: &ScatterMap,
    kernel: impl Fn(&Tensor, &Tensor) -> Result<Tensor>,
) -> Result<Tensor> {
    let (h, w, cap, d) = grid.dims4()?;
    let device = grid.device();
    let pad = range.max(0) as usize;

    let padded = pad_torus(grid, pad)?;
    let padded_mask = pad_torus(&map.mask, pad)?;

    let pairs = h * w * cap * cap;
    // Center rows replicated per neighbor slot: [H,W,C,1,D] -> [P, D].
    let center = grid
        .unsqueeze(3)?
        .broadcast_as((h, w, cap, cap, d))?
        .contiguous()?
        .reshape((pairs, d))?;

    // 1 everywhere except the slot diagonal; applied at the zero offset only.
    let mut not_self = vec![1f32; cap * cap];
    for c in 0..cap {
        not_self[c * cap + c] = 0.0;
    }
    let not_self = Tensor::from_vec(not_self, (1, 1, cap, cap, 1), device)?;

    let mut acc = Tensor::zeros((h, w, cap, d), DType::F32, device)?;
    for dy in -range..=range {
        for dx in -range..=range {
            let oy = (pad as i64 + dy) as usize;
            let ox = (pad as i64 + dx) as usize;
            let shifted = padded.narrow(0, oy, h)?.narrow(1, ox, w)?;
            let neighbor = shifted
                .unsqueeze(2)?
                .broadcast_as((h, w, cap, cap, d))?
                .contiguous()?
                .reshape((pairs, d))?;

            let out = kernel(&center, &neighbor)?;
            let (on, od) = out.dims2()?;
            if on != pairs || od != d {
                return Err(Error::KernelChannelMismatch { expected: d, got: od });
            }
            let out = out.contiguous()?.reshape((h, w, cap, cap, d))?;

            // Empty neighbor slots contribute nothing.
            let shifted_mask = padded_mask.narrow(0, oy, h)?.narrow(1, ox, w)?;
            let pair_mask = shifted_mask.unsqueeze(2)?;
            let mut weighted = out.broadcast_mul(&pair_mask)?;
            if dy == 0 && dx == 0 {
                weighted = weighted.broadcast_mul(&not_self)?;
            }
            acc = (acc + weighted.sum(3)?)?;
        }
    }
    Ok(acc)
}

/// `[H, W, C, D] -> [N, D]`, reversing the last scatter's slot map. Agents
/// dropped at scatter read zeros.
pub fn gather(grid: &Tensor, map: &ScatterMap) -> Result<Tensor> {
    let (h, w, cap, d) = grid.dims4()?;
    let flat = grid.contiguous()?.reshape((h * w * cap, d))?;
    let zero = Tensor::zeros((1, d), DType::F32, grid.device())?;
    let padded = Tensor::cat(&[&flat, &zero], 0)?;
    Ok(padded.index_select(&map.indices, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn cfg() -> GridConfig {
        GridConfig {
            width: 4,
            height: 4,
            capacity: 2,
            cell_size: [1.0, 1.0],
        }
    }

    fn tensor2(values: &[f32], rows: usize, cols: usize) -> Tensor {
        Tensor::from_vec(values.to_vec(), (rows, cols), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_scatter_gather_round_trip() {
        let value = tensor2(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2);
        let x = tensor2(&[0.5, 2.5, 0.5], 3, 1);
        let y = tensor2(&[0.5, 1.5, 0.5], 3, 1);
        let (grid, map) = scatter(&cfg(), &value, &x, &y).unwrap();
        assert_eq!(map.dropped, 0);
        let back = gather(&grid, &map).unwrap();
        assert_eq!(
            back.to_vec2::<f32>().unwrap(),
            value.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_scatter_drops_beyond_capacity_in_agent_order() {
        // Three agents in the same cell, capacity 2: the third is dropped.
        let value = tensor2(&[1.0, 2.0, 3.0], 3, 1);
        let x = tensor2(&[0.2, 0.4, 0.6], 3, 1);
        let y = tensor2(&[0.2, 0.4, 0.6], 3, 1);
        let (grid, map) = scatter(&cfg(), &value, &x, &y).unwrap();
        assert_eq!(map.dropped, 1);
        let back = gather(&grid, &map).unwrap();
        // Dropped agents read zeros.
        assert_eq!(back.to_vec2::<f32>().unwrap(), vec![
            vec![1.0],
            vec![2.0],
            vec![0.0]
        ]);
    }

    #[test]
    fn test_scatter_clamps_out_of_range_positions() {
        let value = tensor2(&[1.0, 2.0], 2, 1);
        let x = tensor2(&[-5.0, 100.0], 2, 1);
        let y = tensor2(&[-5.0, 100.0], 2, 1);
        let (_, map) = scatter(&cfg(), &value, &x, &y).unwrap();
        assert_eq!(map.dropped, 0);
    }

    #[test]
    fn test_pad_torus_wraps_opposite_edges() {
        let grid = Tensor::from_vec(
            (0..16).map(|v| v as f32).collect::<Vec<_>>(),
            (4, 4, 1, 1),
            &Device::Cpu,
        )
        .unwrap();
        let padded = pad_torus(&grid, 1).unwrap();
        assert_eq!(padded.dims(), &[6, 6, 1, 1]);
        // Corner of the padding equals the opposite corner of the grid.
        let corner = padded
            .narrow(0, 0, 1)
            .unwrap()
            .narrow(1, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(corner, vec![15.0]);
        // Center of the padded grid equals the original origin.
        let origin = padded
            .narrow(0, 1, 1)
            .unwrap()
            .narrow(1, 1, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(origin, vec![0.0]);
    }

    #[test]
    fn test_stencil_pair_sum_is_antisymmetric() {
        // Kernel n - c over all pairs: the grand total over agents is zero
        // (every pair is seen from both sides with opposite sign).
        let n_agents = 6;
        let positions: Vec<f32> = (0..n_agents).map(|i| 0.5 + (i % 4) as f32).collect();
        let value = tensor2(&positions, n_agents, 1);
        let x = value.clone();
        let y = tensor2(&vec![0.5; n_agents], n_agents, 1);
        let (grid, map) = scatter(&cfg(), &value, &x, &y).unwrap();
        assert_eq!(map.dropped, 0);

        let out = stencil(&grid, 1, &map, |c, n| Ok((n - c)?)).unwrap();
        let forces = gather(&out, &map).unwrap();
        let total: f32 = forces.flatten_all().unwrap().to_vec1::<f32>().unwrap().iter().sum();
        assert!(total.abs() < 1e-4, "total {total}");
    }

    #[test]
    fn test_stencil_excludes_self_pair() {
        // A single agent interacting with nothing accumulates zero even
        // though its own slot is within range.
        let value = tensor2(&[7.0], 1, 1);
        let x = tensor2(&[0.5], 1, 1);
        let y = tensor2(&[0.5], 1, 1);
        let (grid, map) = scatter(&cfg(), &value, &x, &y).unwrap();
        let out = stencil(&grid, 1, &map, |c, n| Ok((n + c)?)).unwrap();
        let forces = gather(&out, &map).unwrap();
        assert_eq!(forces.to_vec2::<f32>().unwrap(), vec![vec![0.0]]);
    }

    #[test]
    fn test_stencil_counts_neighbors_within_range() {
        // Kernel that returns 1 per valid pair counts in-range neighbors.
        let value = tensor2(&[1.0, 1.0, 1.0], 3, 1);
        let x = tensor2(&[0.5, 1.5, 3.5], 3, 1);
        let y = tensor2(&[0.5, 0.5, 0.5], 3, 1);
        let (grid, map) = scatter(&cfg(), &value, &x, &y).unwrap();
        let out = stencil(&grid, 1, &map, |c, _n| Ok(c.ones_like()?)).unwrap();
        let counts = gather(&out, &map).unwrap();
        // Cells 0, 1, 3 on a width-4 ring: 0 sees 1 and (via wrap) 3;
        // 1 sees only 0; 3 sees only 0.
        assert_eq!(counts.to_vec2::<f32>().unwrap(), vec![
            vec![2.0],
            vec![1.0],
            vec![1.0]
        ]);
    }
}
