//! Geometric multigrid over the grid-shaped stencil systems.

use serde::{Deserialize, Serialize};

use super::system::{blas, FdmLinearSystem};

/// Tuning knobs for the V-cycle and the outer cycle loop.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MgParameters {
    pub max_number_of_levels: usize,
    pub number_of_restriction_iterations: u32,
    pub number_of_correction_iterations: u32,
    pub number_of_coarsest_iterations: u32,
    pub number_of_final_iterations: u32,
    pub max_number_of_cycles: u32,
    pub tolerance: f64,
}

impl Default for MgParameters {
    fn default() -> Self {
        Self {
            max_number_of_levels: 6,
            number_of_restriction_iterations: 5,
            number_of_correction_iterations: 5,
            number_of_coarsest_iterations: 30,
            number_of_final_iterations: 20,
            max_number_of_cycles: 10,
            tolerance: 1e-9,
        }
    }
}

/// Level resolutions for a hierarchy rooted at the given finest grid.
///
/// Coarsening halves both dimensions and stops when either dimension turns
/// odd, drops below four cells, or the level cap is reached.
pub(crate) fn level_dims(
    width: usize,
    height: usize,
    max_number_of_levels: usize,
) -> Vec<(usize, usize)> {
    let mut dims = vec![(width, height)];
    let (mut w, mut h) = (width, height);
    while dims.len() < max_number_of_levels && w % 2 == 0 && h % 2 == 0 && w >= 4 && h >= 4 {
        w /= 2;
        h /= 2;
        dims.push((w, h));
    }
    dims
}

/// Hierarchy of stencil systems, finest at index 0.
#[derive(Clone, Debug, Default)]
pub struct FdmMgLinearSystem {
    pub levels: Vec<FdmLinearSystem>,
}

impl FdmMgLinearSystem {
    pub fn number_of_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn finest(&self) -> &FdmLinearSystem {
        &self.levels[0]
    }

    pub fn finest_mut(&mut self) -> &mut FdmLinearSystem {
        &mut self.levels[0]
    }

    pub fn resize_with_finest(&mut self, width: usize, height: usize, max_number_of_levels: usize) {
        self.levels = level_dims(width, height, max_number_of_levels)
            .into_iter()
            .map(|(w, h)| FdmLinearSystem::new(w, h))
            .collect();
    }
}

/// One red-black Gauss-Seidel sweep.
pub(crate) fn relax_red_black(system: &mut FdmLinearSystem) {
    let width = system.width();
    let height = system.height();
    for pass in 0..2 {
        for j in 0..height {
            let start = (j % 2 + pass) % 2;
            let mut i = start;
            while i < width {
                let idx = j * width + i;
                let row = system.a.rows[idx];
                let mut r = 0.0;
                if i > 0 {
                    r += system.a.rows[idx - 1].right * system.x[idx - 1];
                }
                if i + 1 < width {
                    r += row.right * system.x[idx + 1];
                }
                if j > 0 {
                    r += system.a.rows[idx - width].up * system.x[idx - width];
                }
                if j + 1 < height {
                    r += row.up * system.x[idx + width];
                }
                system.x[idx] = (system.b[idx] - r) / row.center;
                i += 2;
            }
        }
    }
}

/// Restricts a fine-level vector by averaging each 2x2 block.
pub(crate) fn restrict(finer: &[f64], finer_width: usize, coarser: &mut [f64], coarser_width: usize) {
    let coarser_height = coarser.len() / coarser_width;
    for cj in 0..coarser_height {
        for ci in 0..coarser_width {
            let fi = 2 * ci;
            let fj = 2 * cj;
            let sum = finer[fj * finer_width + fi]
                + finer[fj * finer_width + fi + 1]
                + finer[(fj + 1) * finer_width + fi]
                + finer[(fj + 1) * finer_width + fi + 1];
            coarser[cj * coarser_width + ci] = 0.25 * sum;
        }
    }
}

fn interp_indices(i: usize, n_coarse: usize) -> ([usize; 2], [f64; 2]) {
    let ci = i / 2;
    if i % 2 == 0 {
        let lo = if i > 1 { ci - 1 } else { ci };
        ([lo, ci], [0.25, 0.75])
    } else {
        let hi = if ci + 1 < n_coarse { ci + 1 } else { ci };
        ([ci, hi], [0.75, 0.25])
    }
}

/// Adds the bilinearly interpolated coarse correction onto the fine level.
pub(crate) fn correct(
    coarser: &[f64],
    coarser_width: usize,
    finer: &mut [f64],
    finer_width: usize,
) {
    let coarser_height = coarser.len() / coarser_width;
    let finer_height = finer.len() / finer_width;
    for fj in 0..finer_height {
        let (j_idx, j_w) = interp_indices(fj, coarser_height);
        for fi in 0..finer_width {
            let (i_idx, i_w) = interp_indices(fi, coarser_width);
            let mut value = 0.0;
            for b in 0..2 {
                for a in 0..2 {
                    value += i_w[a] * j_w[b] * coarser[j_idx[b] * coarser_width + i_idx[a]];
                }
            }
            finer[fj * finer_width + fi] += value;
        }
    }
}

/// Runs one V-cycle over the hierarchy and returns the finest residual norm.
pub(crate) fn v_cycle(
    levels: &mut [FdmLinearSystem],
    params: &MgParameters,
    residual_buffers: &mut Vec<Vec<f64>>,
) -> f64 {
    let num_levels = levels.len();
    residual_buffers.resize(num_levels, Vec::new());
    for (buf, level) in residual_buffers.iter_mut().zip(levels.iter()) {
        buf.resize(level.x.len(), 0.0);
    }

    for lv in 0..num_levels - 1 {
        for _ in 0..params.number_of_restriction_iterations {
            relax_red_black(&mut levels[lv]);
        }
        let (fine, coarse) = levels.split_at_mut(lv + 1);
        let fine = &fine[lv];
        let coarse = &mut coarse[0];
        fine.a
            .residual(&fine.x, &fine.b, &mut residual_buffers[lv]);
        let coarse_width = coarse.width();
        restrict(
            &residual_buffers[lv],
            fine.width(),
            &mut coarse.b,
            coarse_width,
        );
        coarse.x.fill(0.0);
    }

    for _ in 0..params.number_of_coarsest_iterations {
        relax_red_black(&mut levels[num_levels - 1]);
    }

    for lv in (0..num_levels - 1).rev() {
        let (fine, coarse) = levels.split_at_mut(lv + 1);
        let fine = &mut fine[lv];
        let coarse = &coarse[0];
        let fine_width = fine.width();
        correct(&coarse.x, coarse.width(), &mut fine.x, fine_width);
        for _ in 0..params.number_of_correction_iterations {
            relax_red_black(fine);
        }
    }

    for _ in 0..params.number_of_final_iterations {
        relax_red_black(&mut levels[0]);
    }

    let finest = &levels[0];
    finest
        .a
        .residual(&finest.x, &finest.b, &mut residual_buffers[0]);
    blas::l2_norm(&residual_buffers[0])
}

/// Multigrid solver running V-cycles until the residual target is met.
pub struct FdmMgSolver {
    params: MgParameters,
    last_number_of_cycles: u32,
    last_residual_norm: f64,
    residual_buffers: Vec<Vec<f64>>,
}

impl FdmMgSolver {
    pub fn new(params: MgParameters) -> Self {
        Self {
            params,
            last_number_of_cycles: 0,
            last_residual_norm: f64::MAX,
            residual_buffers: Vec::new(),
        }
    }

    pub fn params(&self) -> &MgParameters {
        &self.params
    }

    pub fn last_number_of_cycles(&self) -> u32 {
        self.last_number_of_cycles
    }

    pub fn last_residual(&self) -> f64 {
        self.last_residual_norm
    }

    pub fn tolerance(&self) -> f64 {
        self.params.tolerance
    }

    pub fn solve(&mut self, system: &mut FdmMgLinearSystem) -> bool {
        assert!(!system.levels.is_empty(), "multigrid system has no levels");
        self.last_number_of_cycles = 0;
        self.last_residual_norm = f64::MAX;

        for cycle in 0..self.params.max_number_of_cycles {
            self.last_residual_norm =
                v_cycle(&mut system.levels, &self.params, &mut self.residual_buffers);
            self.last_number_of_cycles = cycle + 1;
            if self.last_residual_norm < self.params.tolerance {
                break;
            }
        }

        log::debug!(
            "mg: residual {:e} after {} cycles",
            self.last_residual_norm,
            self.last_number_of_cycles
        );
        self.last_residual_norm < self.params.tolerance
    }
}
