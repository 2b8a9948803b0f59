use rayon::prelude::*;

use crate::parallel;

use super::system::{blas, CsrMatrix, FdmCompressedLinearSystem, FdmLinearSystem, FdmMatrix};
use super::FdmLinearSystemSolver;

/// Damped-free Jacobi iteration with double-buffered sweeps.
pub struct FdmJacobiSolver {
    max_number_of_iterations: u32,
    last_number_of_iterations: u32,
    residual_check_interval: u32,
    tolerance: f64,
    last_residual: f64,

    x_temp: Vec<f64>,
    residual_buf: Vec<f64>,
}

impl FdmJacobiSolver {
    pub fn new(max_number_of_iterations: u32, residual_check_interval: u32, tolerance: f64) -> Self {
        assert!(residual_check_interval > 0, "residual check interval must be positive");
        Self {
            max_number_of_iterations,
            last_number_of_iterations: 0,
            residual_check_interval,
            tolerance,
            last_residual: f64::MAX,
            x_temp: Vec::new(),
            residual_buf: Vec::new(),
        }
    }

    pub fn last_number_of_iterations(&self) -> u32 {
        self.last_number_of_iterations
    }

    fn relax(a: &FdmMatrix, b: &[f64], x: &[f64], x_temp: &mut [f64]) {
        let width = a.width;
        let height = a.height;
        let depth = a.depth;
        let slab = width * height;
        let rows = &a.rows;
        parallel::pool().install(|| {
            x_temp
                .par_chunks_mut(width.max(1))
                .enumerate()
                .for_each(|(jk, out_row)| {
                    let j = jk % height.max(1);
                    let k = jk / height.max(1);
                    for (i, out) in out_row.iter_mut().enumerate() {
                        let idx = jk * width + i;
                        let row = &rows[idx];
                        let mut r = 0.0;
                        if i > 0 {
                            r += rows[idx - 1].right * x[idx - 1];
                        }
                        if i + 1 < width {
                            r += row.right * x[idx + 1];
                        }
                        if j > 0 {
                            r += rows[idx - width].up * x[idx - width];
                        }
                        if j + 1 < height {
                            r += row.up * x[idx + width];
                        }
                        if k > 0 {
                            r += rows[idx - slab].front * x[idx - slab];
                        }
                        if k + 1 < depth {
                            r += row.front * x[idx + slab];
                        }
                        *out = (b[idx] - r) / row.center;
                    }
                });
        });
    }

    fn relax_compressed(a: &CsrMatrix, b: &[f64], x: &[f64], x_temp: &mut [f64]) {
        parallel::pool().install(|| {
            x_temp.par_iter_mut().enumerate().for_each(|(i, out)| {
                let begin = a.row_pointers[i];
                let end = a.row_pointers[i + 1];
                let mut r = 0.0;
                let mut diag = 1.0;
                for nz in begin..end {
                    let col = a.column_indices[nz];
                    if col == i {
                        diag = a.non_zeros[nz];
                    } else {
                        r += a.non_zeros[nz] * x[col];
                    }
                }
                *out = (b[i] - r) / diag;
            });
        });
    }
}

impl FdmLinearSystemSolver for FdmJacobiSolver {
    /// Always reports success; convergence is judged through
    /// [`last_residual`](FdmLinearSystemSolver::last_residual).
    fn solve(&mut self, system: &mut FdmLinearSystem) -> bool {
        let size = system.x.len();
        self.x_temp.resize(size, 0.0);
        self.residual_buf.resize(size, 0.0);
        self.last_number_of_iterations = 0;
        self.last_residual = f64::MAX;

        for iter in 0..self.max_number_of_iterations {
            Self::relax(&system.a, &system.b, &system.x, &mut self.x_temp);
            std::mem::swap(&mut system.x, &mut self.x_temp);
            self.last_number_of_iterations = iter + 1;

            if (iter + 1) % self.residual_check_interval == 0 {
                system.a.residual(&system.x, &system.b, &mut self.residual_buf);
                if blas::l2_norm(&self.residual_buf) < self.tolerance {
                    break;
                }
            }
        }

        system.a.residual(&system.x, &system.b, &mut self.residual_buf);
        self.last_residual = blas::l2_norm(&self.residual_buf);
        log::debug!(
            "jacobi: residual {:e} after {} iterations",
            self.last_residual,
            self.last_number_of_iterations
        );
        true
    }

    fn solve_compressed(&mut self, system: &mut FdmCompressedLinearSystem) -> bool {
        let size = system.x.len();
        self.x_temp.resize(size, 0.0);
        self.residual_buf.resize(size, 0.0);
        self.last_number_of_iterations = 0;
        self.last_residual = f64::MAX;

        for iter in 0..self.max_number_of_iterations {
            Self::relax_compressed(&system.a, &system.b, &system.x, &mut self.x_temp);
            std::mem::swap(&mut system.x, &mut self.x_temp);
            self.last_number_of_iterations = iter + 1;

            if (iter + 1) % self.residual_check_interval == 0 {
                system.a.residual(&system.x, &system.b, &mut self.residual_buf);
                if blas::l2_norm(&self.residual_buf) < self.tolerance {
                    break;
                }
            }
        }

        system.a.residual(&system.x, &system.b, &mut self.residual_buf);
        self.last_residual = blas::l2_norm(&self.residual_buf);
        true
    }

    fn can_solve_compressed(&self) -> bool {
        true
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn last_residual(&self) -> f64 {
        self.last_residual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonally_dominant_system(n: usize) -> FdmLinearSystem {
        let mut system = FdmLinearSystem::new(n, n, n);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let row = system.a.at_mut(i, j, k);
                    row.center = 8.0;
                    row.right = if i + 1 < n { -1.0 } else { 0.0 };
                    row.up = if j + 1 < n { -1.0 } else { 0.0 };
                    row.front = if k + 1 < n { -1.0 } else { 0.0 };
                    system.b[(k * n + j) * n + i] = 1.0 + (i as f64) - 0.5 * (j as f64) + 0.25 * (k as f64);
                }
            }
        }
        system
    }

    #[test]
    fn converges_on_diagonally_dominant_system() {
        let mut system = diagonally_dominant_system(3);
        let mut solver = FdmJacobiSolver::new(300, 4, 1e-9);

        assert!(solver.solve(&mut system));
        assert!(solver.last_residual() < solver.tolerance());
    }

    #[test]
    fn reports_success_even_when_not_converged() {
        let mut system = diagonally_dominant_system(3);
        let mut solver = FdmJacobiSolver::new(1, 1, 1e-30);

        // One sweep cannot reach the tolerance, but the call still succeeds.
        assert!(solver.solve(&mut system));
        assert!(solver.last_residual() > solver.tolerance());
        assert_eq!(solver.last_number_of_iterations(), 1);
    }

    #[test]
    fn residual_does_not_increase_with_more_iterations() {
        let mut short = diagonally_dominant_system(3);
        let mut long = short.clone();

        let mut short_solver = FdmJacobiSolver::new(5, 5, 0.0);
        let mut long_solver = FdmJacobiSolver::new(50, 5, 0.0);
        short_solver.solve(&mut short);
        long_solver.solve(&mut long);

        assert!(long_solver.last_residual() <= short_solver.last_residual());
    }
}
