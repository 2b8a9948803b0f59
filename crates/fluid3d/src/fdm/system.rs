//! Linear system storage for the 7-point finite-difference stencil.

use rayon::prelude::*;

use crate::parallel;

/// One matrix row of the symmetric 7-point stencil.
///
/// Only center/right/up/front are stored; the left, down, and back
/// coefficients live in the neighbors' rows.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FdmMatrixRow {
    pub center: f64,
    pub right: f64,
    pub up: f64,
    pub front: f64,
}

/// Grid-shaped symmetric sparse matrix.
#[derive(Clone, Debug)]
pub struct FdmMatrix {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub rows: Vec<FdmMatrixRow>,
}

impl FdmMatrix {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
            rows: vec![FdmMatrixRow::default(); width * height * depth],
        }
    }

    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.width && j < self.height && k < self.depth);
        (k * self.height + j) * self.width + i
    }

    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> &FdmMatrixRow {
        &self.rows[(k * self.height + j) * self.width + i]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut FdmMatrixRow {
        &mut self.rows[(k * self.height + j) * self.width + i]
    }

    /// result = A * v
    pub fn mvm(&self, v: &[f64], result: &mut [f64]) {
        let width = self.width;
        let height = self.height;
        let depth = self.depth;
        let slab = width * height;
        let rows = &self.rows;
        parallel::pool().install(|| {
            result
                .par_chunks_mut(width.max(1))
                .enumerate()
                .for_each(|(jk, out_row)| {
                    let j = jk % height.max(1);
                    let k = jk / height.max(1);
                    for (i, out) in out_row.iter_mut().enumerate() {
                        let idx = jk * width + i;
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
                        if k > 0 {
                            sum += rows[idx - slab].front * v[idx - slab];
                        }
                        if k + 1 < depth {
                            sum += row.front * v[idx + slab];
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
        let depth = self.depth;
        let slab = width * height;
        let rows = &self.rows;
        parallel::pool().install(|| {
            result
                .par_chunks_mut(width.max(1))
                .enumerate()
                .for_each(|(jk, out_row)| {
                    let j = jk % height.max(1);
                    let k = jk / height.max(1);
                    for (i, out) in out_row.iter_mut().enumerate() {
                        let idx = jk * width + i;
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
                        if k > 0 {
                            sum += rows[idx - slab].front * x[idx - slab];
                        }
                        if k + 1 < depth {
                            sum += row.front * x[idx + slab];
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
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            a: FdmMatrix::new(width, height, depth),
            x: vec![0.0; width * height * depth],
            b: vec![0.0; width * height * depth],
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

    #[inline]
    pub fn depth(&self) -> usize {
        self.a.depth
    }

    pub fn resize(&mut self, width: usize, height: usize, depth: usize) {
        self.a = FdmMatrix::new(width, height, depth);
        self.x = vec![0.0; width * height * depth];
        self.b = vec![0.0; width * height * depth];
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
        let mut system = FdmLinearSystem::new(n, n, n);
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let row = system.a.at_mut(i, j, k);
                    row.center = 6.0;
                    row.right = if i + 1 < n { -1.0 } else { 0.0 };
                    row.up = if j + 1 < n { -1.0 } else { 0.0 };
                    row.front = if k + 1 < n { -1.0 } else { 0.0 };
                    system.b[(k * n + j) * n + i] = (i + j + k) as f64;
                }
            }
        }
        system
    }

    #[test]
    fn mvm_matches_manual_stencil() {
        let mut system = laplacian_like_system(3);
        for (n, x) in system.x.iter_mut().enumerate() {
            *x = n as f64;
        }
        let mut result = vec![0.0; 27];
        system.a.mvm(&system.x.clone(), &mut result);

        // Center cell (1, 1, 1): 6*13 - 12 - 14 - 10 - 16 - 4 - 22 = 0.
        assert!((result[13] - 0.0).abs() < 1e-12);
        // Corner cell (0, 0, 0): 6*0 - 1 - 3 - 9 = -13.
        assert!((result[0] + 13.0).abs() < 1e-12);
    }

    #[test]
    fn residual_is_zero_for_exact_solution() {
        let system = laplacian_like_system(3);
        let mut ax = vec![0.0; 27];
        let x = vec![1.0; 27];
        system.a.mvm(&x, &mut ax);

        let mut r = vec![0.0; 27];
        system.a.residual(&x, &ax, &mut r);
        assert!(blas::l2_norm(&r) < 1e-12);
    }

    #[test]
    fn csr_matches_dense_product() {
        let system = laplacian_like_system(3);
        let x: Vec<f64> = (0..27).map(|n| (n as f64).sin()).collect();

        // Hand-roll CSR from the dense stencil.
        let mut csr = CsrMatrix::default();
        csr.row_pointers.push(0);
        for k in 0..3 {
            for j in 0..3 {
                for i in 0..3 {
                    let idx = (k * 3 + j) * 3 + i;
                    if k > 0 {
                        csr.column_indices.push(idx - 9);
                        csr.non_zeros.push(system.a.at(i, j, k - 1).front);
                    }
                    if j > 0 {
                        csr.column_indices.push(idx - 3);
                        csr.non_zeros.push(system.a.at(i, j - 1, k).up);
                    }
                    if i > 0 {
                        csr.column_indices.push(idx - 1);
                        csr.non_zeros.push(system.a.at(i - 1, j, k).right);
                    }
                    csr.column_indices.push(idx);
                    csr.non_zeros.push(system.a.at(i, j, k).center);
                    if i + 1 < 3 {
                        csr.column_indices.push(idx + 1);
                        csr.non_zeros.push(system.a.at(i, j, k).right);
                    }
                    if j + 1 < 3 {
                        csr.column_indices.push(idx + 3);
                        csr.non_zeros.push(system.a.at(i, j, k).up);
                    }
                    if k + 1 < 3 {
                        csr.column_indices.push(idx + 9);
                        csr.non_zeros.push(system.a.at(i, j, k).front);
                    }
                    csr.row_pointers.push(csr.column_indices.len());
                }
            }
        }

        let mut dense_out = vec![0.0; 27];
        let mut csr_out = vec![0.0; 27];
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
