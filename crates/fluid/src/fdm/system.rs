//! Linear system storage for the 5-point finite-difference stencil.

use rayon::prelude::*;

use crate::parallel;

/// One matrix row of the symmetric 5-point stencil.
///
/// Only center/right/up are stored; the left and down coefficients live in
/// the neighbors' rows.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FdmMatrixRow {
    pub center: f64,
    pub right: f64,
    pub up: f64,
}

/// Grid-shaped symmetric sparse matrix.
#[derive(Clone, Debug)]
pub struct FdmMatrix {
    pub width: usize,
    pub height: usize,
    pub rows: Vec<FdmMatrixRow>,
}

impl FdmMatrix {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            rows: vec![FdmMatrixRow::default(); width * height],
        }
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.width && j < self.height);
        j * self.width + i
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize) -> &FdmMatrixRow {
        &self.rows[j * self.width + i]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize) -> &mut FdmMatrixRow {
        &mut self.rows[j * self.width + i]
    }

    /// result = A * v
    pub fn mvm(&self, v: &[f64], result: &mut [f64]) {
        let width = self.width;
        let height = self.height;
        let rows = &self.rows;
        parallel::pool().install(|| {
            result
                .par_chunks_mut(width.max(1))
                .enumerate()
                .for_each(|(j, out_row)| {
                    for (i, out) in out_row.iter_mut().enumerate() {
                        let idx = j * width + i;
                        let row = &rows[idx];
                        let mut sum = row.center * v[idx];
                        if i > 0 {
                            sum += rows[idx - 1].right * v[idx - 1];
                        }
                        if i + 1 < width {
                            sum += row.right * v[idx + 1];
                        }
                        if j > 0 {
                            sum += rows[idx - width].up * v[idx - width];
                        }
                        if j + 1 < height {
                            sum += row.up * v[idx + width];
                        }
                        *out = sum;
                    }
                });
        });
    }

    /// result = b - A * x
    pub fn residual(&self, x: &[f64], b: &[f64], result: &mut [f64]) {
        let width = self.width;
        let height = self.height;
        let rows = &self.rows;
        parallel::pool().install(|| {
            result
                .par_chunks_mut(width.max(1))
                .enumerate()
                .for_each(|(j, out_row)| {
                    for (i, out) in out_row.iter_mut().enumerate() {
                        let idx = j * width + i;
                        let row = &rows[idx];
                        let mut sum = row.center * x[idx];
                        if i > 0 {
                            sum += rows[idx - 1].right * x[idx - 1];
                        }
                        if i + 1 < width {
                            sum += row.right * x[idx + 1];
                        }
                        if j > 0 {
                            sum += rows[idx - width].up * x[idx - width];
                        }
                        if j + 1 < height {
                            sum += row.up * x[idx + width];
                        }
                        *out = b[idx] - sum;
                    }
                });
        });
    }
}

/// Dense-stencil linear system A x = b.
#[derive(Clone, Debug)]
pub struct FdmLinearSystem {
    pub a: FdmMatrix,
    pub x: Vec<f64>,
    pub b: Vec<f64>,
}

impl FdmLinearSystem {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            a: FdmMatrix::new(width, height),
            x: vec![0.0; width * height],
            b: vec![0.0; width * height],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.a.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.a.height
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.a = FdmMatrix::new(width, height);
        self.x = vec![0.0; width * height];
        self.b = vec![0.0; width * height];
    }

    pub fn clear(&mut self) {
        self.a.rows.fill(FdmMatrixRow::default());
        self.x.fill(0.0);
        self.b.fill(0.0);
    }
}

/// Compressed-row sparse matrix.
#[derive(Clone, Debug, Default)]
pub struct CsrMatrix {
    pub row_pointers: Vec<usize>,
    pub column_indices: Vec<usize>,
    pub non_zeros: Vec<f64>,
}

impl CsrMatrix {
    #[inline]
    pub fn rows(&self) -> usize {
        self.row_pointers.len().saturating_sub(1)
    }

    pub fn clear(&mut self) {
        self.row_pointers.clear();
        self.column_indices.clear();
        self.non_zeros.clear();
    }

    /// result = A * v
    pub fn mvm(&self, v: &[f64], result: &mut [f64]) {
        parallel::pool().install(|| {
            result.par_iter_mut().enumerate().for_each(|(i, out)| {
                let begin = self.row_pointers[i];
                let end = self.row_pointers[i + 1];
                let mut sum = 0.0;
                for nz in begin..end {
                    sum += self.non_zeros[nz] * v[self.column_indices[nz]];
                }
                *out = sum;
            });
        });
    }

    /// result = b - A * x
    pub fn residual(&self, x: &[f64], b: &[f64], result: &mut [f64]) {
        parallel::pool().install(|| {
            result.par_iter_mut().enumerate().for_each(|(i, out)| {
                let begin = self.row_pointers[i];
                let end = self.row_pointers[i + 1];
                let mut sum = 0.0;
                for nz in begin..end {
                    sum += self.non_zeros[nz] * x[self.column_indices[nz]];
                }
                *out = b[i] - sum;
            });
        });
    }
}

/// Linear system over a compressed-row matrix.
#[derive(Clone, Debug, Default)]
pub struct FdmCompressedLinearSystem {
    pub a: CsrMatrix,
    pub x: Vec<f64>,
    pub b: Vec<f64>,
}

impl FdmCompressedLinearSystem {
    pub fn clear(&mut self) {
        self.a.clear();
        self.x.clear();
        self.b.clear();
    }
}

/// Vector helpers shared by the iterative solvers.
pub mod blas {
    use super::*;

    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        parallel::pool().install(|| {
            a.par_iter()
                .zip(b.par_iter())
                .map(|(&x, &y)| x * y)
                .sum()
        })
    }

    /// result = a * x + y
    pub fn axpy(a: f64, x: &[f64], y: &[f64], result: &mut [f64]) {
        debug_assert_eq!(x.len(), y.len());
        parallel::pool().install(|| {
            result
                .par_iter_mut()
                .zip(x.par_iter().zip(y.par_iter()))
                .for_each(|(out, (&xv, &yv))| *out = a * xv + yv);
        });
    }

    pub fn l2_norm(v: &[f64]) -> f64 {
        dot(v, v).sqrt()
    }

    pub fn linf_norm(v: &[f64]) -> f64 {
        parallel::pool().install(|| {
            v.par_iter().map(|x| x.abs()).reduce(|| 0.0, f64::max)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_like_system(n: usize) -> FdmLinearSystem {
        let mut system = FdmLinearSystem::new(n, n);
        for j in 0..n {
            for i in 0..n {
                let row = system.a.at_mut(i, j);
                row.center = 4.0;
                row.right = if i + 1 < n { -1.0 } else { 0.0 };
                row.up = if j + 1 < n { -1.0 } else { 0.0 };
                system.b[j * n + i] = (i + j) as f64;
            }
        }
        system
    }

    #[test]
    fn mvm_matches_manual_stencil() {
        let mut system = laplacian_like_system(3);
        for (k, x) in system.x.iter_mut().enumerate() {
            *x = k as f64;
        }
        let mut result = vec![0.0; 9];
        system.a.mvm(&system.x.clone(), &mut result);

        // Center cell (1, 1): 4*4 - 3 - 5 - 1 - 7 = 0.
        assert!((result[4] - 0.0).abs() < 1e-12);
        // Corner cell (0, 0): 4*0 - 1 - 3 = -4.
        assert!((result[0] + 4.0).abs() < 1e-12);
    }

    #[test]
    fn residual_is_zero_for_exact_solution() {
        let system = laplacian_like_system(3);
        let mut ax = vec![0.0; 9];
        let x = vec![1.0; 9];
        system.a.mvm(&x, &mut ax);

        let mut r = vec![0.0; 9];
        system.a.residual(&x, &ax, &mut r);
        assert!(blas::l2_norm(&r) < 1e-12);
    }

    #[test]
    fn csr_matches_dense_product() {
        let system = laplacian_like_system(3);
        let x: Vec<f64> = (0..9).map(|k| (k as f64).sin()).collect();

        // Hand-roll CSR from the dense stencil.
        let mut csr = CsrMatrix::default();
        csr.row_pointers.push(0);
        for j in 0..3 {
            for i in 0..3 {
                let idx = j * 3 + i;
                if j > 0 {
                    csr.column_indices.push(idx - 3);
                    csr.non_zeros.push(system.a.at(i, j - 1).up);
                }
                if i > 0 {
                    csr.column_indices.push(idx - 1);
                    csr.non_zeros.push(system.a.at(i - 1, j).right);
                }
                csr.column_indices.push(idx);
                csr.non_zeros.push(system.a.at(i, j).center);
                if i + 1 < 3 {
                    csr.column_indices.push(idx + 1);
                    csr.non_zeros.push(system.a.at(i, j).right);
                }
                if j + 1 < 3 {
                    csr.column_indices.push(idx + 3);
                    csr.non_zeros.push(system.a.at(i, j).up);
                }
                csr.row_pointers.push(csr.column_indices.len());
            }
        }

        let mut dense_out = vec![0.0; 9];
        let mut csr_out = vec![0.0; 9];
        system.a.mvm(&x, &mut dense_out);
        csr.mvm(&x, &mut csr_out);
        for (d, c) in dense_out.iter().zip(&csr_out) {
            assert!((d - c).abs() < 1e-12);
        }
    }

    #[test]
    fn blas_vector_ops() {
        let x = vec![1.0, 2.0, 3.0];
        let y = vec![-1.0, 0.5, 2.0];
        assert!((blas::dot(&x, &y) - 6.0).abs() < 1e-12);

        let mut r = vec![0.0; 3];
        blas::axpy(2.0, &x, &y, &mut r);
        assert_eq!(r, vec![1.0, 4.5, 8.0]);

        assert!((blas::l2_norm(&[3.0, 4.0]) - 5.0).abs() < 1e-12);
        assert!((blas::linf_norm(&[-7.0, 2.0]) - 7.0).abs() < 1e-12);
    }
}
