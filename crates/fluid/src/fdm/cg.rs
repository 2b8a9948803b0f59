use rayon::prelude::*;

use crate::parallel;

use super::system::{blas, FdmCompressedLinearSystem, FdmLinearSystem};
use super::FdmLinearSystemSolver;

pub(crate) fn saxpy_in_place(alpha: f64, x: &[f64], y: &mut [f64]) {
    parallel::pool().install(|| {
        y.par_iter_mut()
            .zip(x.par_iter())
            .for_each(|(out, &xv)| *out += alpha * xv);
    });
}

pub(crate) fn scaled_update(beta: f64, s: &[f64], d: &mut [f64]) {
    parallel::pool().install(|| {
        d.par_iter_mut()
            .zip(s.par_iter())
            .for_each(|(out, &sv)| *out = sv + beta * *out);
    });
}

/// Unpreconditioned conjugate-gradient loop.
///
/// `r`, `d` and `q` must be sized to `b`. Returns the iteration count; `r`
/// holds the final residual vector.
pub(crate) fn cg<A>(
    apply: A,
    b: &[f64],
    x: &mut [f64],
    max_number_of_iterations: u32,
    tolerance: f64,
    r: &mut [f64],
    d: &mut [f64],
    q: &mut [f64],
) -> u32
where
    A: Fn(&[f64], &mut [f64]),
{
    // r = b - A x, d = r
    apply(x, q);
    for ((rv, &bv), &qv) in r.iter_mut().zip(b).zip(q.iter()) {
        *rv = bv - qv;
    }
    d.copy_from_slice(r);

    let mut sigma = blas::dot(r, d);
    let tol_sq = tolerance * tolerance;
    let mut iter = 0;

    while sigma > tol_sq && iter < max_number_of_iterations {
        apply(d, q);
        let dq = blas::dot(d, q);
        if dq.abs() < f64::EPSILON {
            break;
        }
        let alpha = sigma / dq;

        saxpy_in_place(alpha, d, x);
        saxpy_in_place(-alpha, q, r);

        let sigma_old = sigma;
        sigma = blas::dot(r, r);
        if sigma_old.abs() < f64::EPSILON {
            break;
        }
        let beta = sigma / sigma_old;
        scaled_update(beta, r, d);

        iter += 1;
    }

    iter
}

/// Conjugate-gradient solver for the symmetric positive-definite systems
/// produced by the pressure and diffusion builders.
pub struct FdmCgSolver {
    max_number_of_iterations: u32,
    last_number_of_iterations: u32,
    tolerance: f64,
    last_residual_norm: f64,

    r: Vec<f64>,
    d: Vec<f64>,
    q: Vec<f64>,
}

impl FdmCgSolver {
    pub fn new(max_number_of_iterations: u32, tolerance: f64) -> Self {
        Self {
            max_number_of_iterations,
            last_number_of_iterations: 0,
            tolerance,
            last_residual_norm: f64::MAX,
            r: Vec::new(),
            d: Vec::new(),
            q: Vec::new(),
        }
    }

    pub fn last_number_of_iterations(&self) -> u32 {
        self.last_number_of_iterations
    }

    fn resize_buffers(&mut self, size: usize) {
        self.r.resize(size, 0.0);
        self.d.resize(size, 0.0);
        self.q.resize(size, 0.0);
    }
}

impl FdmLinearSystemSolver for FdmCgSolver {
    fn solve(&mut self, system: &mut FdmLinearSystem) -> bool {
        let size = system.x.len();
        self.resize_buffers(size);
        system.x.fill(0.0);

        let a = &system.a;
        self.last_number_of_iterations = cg(
            |v, out| a.mvm(v, out),
            &system.b,
            &mut system.x,
            self.max_number_of_iterations,
            self.tolerance,
            &mut self.r,
            &mut self.d,
            &mut self.q,
        );
        self.last_residual_norm = blas::l2_norm(&self.r);

        log::debug!(
            "cg: residual {:e} after {} iterations",
            self.last_residual_norm,
            self.last_number_of_iterations
        );
        self.last_residual_norm <= self.tolerance
            || self.last_number_of_iterations < self.max_number_of_iterations
    }

    fn solve_compressed(&mut self, system: &mut FdmCompressedLinearSystem) -> bool {
        let size = system.x.len();
        self.resize_buffers(size);
        system.x.fill(0.0);

        let a = &system.a;
        self.last_number_of_iterations = cg(
            |v, out| a.mvm(v, out),
            &system.b,
            &mut system.x,
            self.max_number_of_iterations,
            self.tolerance,
            &mut self.r,
            &mut self.d,
            &mut self.q,
        );
        self.last_residual_norm = blas::l2_norm(&self.r);

        self.last_residual_norm <= self.tolerance
            || self.last_number_of_iterations < self.max_number_of_iterations
    }

    fn can_solve_compressed(&self) -> bool {
        true
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn last_residual(&self) -> f64 {
        self.last_residual_norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd_system(n: usize) -> FdmLinearSystem {
        let mut system = FdmLinearSystem::new(n, n);
        for j in 0..n {
            for i in 0..n {
                let row = system.a.at_mut(i, j);
                row.center = 4.0;
                row.right = if i + 1 < n { -1.0 } else { 0.0 };
                row.up = if j + 1 < n { -1.0 } else { 0.0 };
                system.b[j * n + i] = ((i * 7 + j * 3) % 5) as f64 - 2.0;
            }
        }
        system
    }

    #[test]
    fn solves_small_spd_system_to_tolerance() {
        let mut system = spd_system(3);
        let mut solver = FdmCgSolver::new(100, 1e-10);

        assert!(solver.solve(&mut system));
        assert!(solver.last_residual() < 1e-10);

        let mut r = vec![0.0; 9];
        system.a.residual(&system.x, &system.b, &mut r);
        assert!(blas::l2_norm(&r) < 1e-9);
    }

    #[test]
    fn compressed_solve_matches_dense_solve() {
        let mut dense = spd_system(3);

        let mut compressed = FdmCompressedLinearSystem::default();
        compressed.a.row_pointers.push(0);
        for j in 0..3usize {
            for i in 0..3usize {
                let idx = j * 3 + i;
                if j > 0 {
                    compressed.a.column_indices.push(idx - 3);
                    compressed.a.non_zeros.push(dense.a.at(i, j - 1).up);
                }
                if i > 0 {
                    compressed.a.column_indices.push(idx - 1);
                    compressed.a.non_zeros.push(dense.a.at(i - 1, j).right);
                }
                compressed.a.column_indices.push(idx);
                compressed.a.non_zeros.push(dense.a.at(i, j).center);
                if i + 1 < 3 {
                    compressed.a.column_indices.push(idx + 1);
                    compressed.a.non_zeros.push(dense.a.at(i, j).right);
                }
                if j + 1 < 3 {
                    compressed.a.column_indices.push(idx + 3);
                    compressed.a.non_zeros.push(dense.a.at(i, j).up);
                }
                compressed.a.row_pointers.push(compressed.a.column_indices.len());
            }
        }
        compressed.b = dense.b.clone();
        compressed.x = vec![0.0; 9];

        let mut solver = FdmCgSolver::new(100, 1e-10);
        assert!(solver.can_solve_compressed());
        assert!(solver.solve(&mut dense));
        assert!(solver.solve_compressed(&mut compressed));

        for (a, b) in dense.x.iter().zip(&compressed.x) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn repeated_solves_are_stable() {
        let mut system = spd_system(3);
        let mut solver = FdmCgSolver::new(100, 1e-10);

        solver.solve(&mut system);
        let first = system.x.clone();
        let first_residual = solver.last_residual();

        solver.solve(&mut system);
        assert!(solver.last_residual() <= first_residual + 1e-12);
        for (a, b) in system.x.iter().zip(&first) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
