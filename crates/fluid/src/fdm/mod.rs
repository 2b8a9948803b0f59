//! Finite-difference linear systems and the iterative solvers over them.

mod cg;
mod jacobi;
mod mg;
mod mgpcg;
mod system;

pub use cg::FdmCgSolver;
pub use jacobi::FdmJacobiSolver;
pub(crate) use mg::level_dims;
pub use mg::{FdmMgLinearSystem, FdmMgSolver, MgParameters};
pub use mgpcg::FdmMgpcgSolver;
pub use system::{
    blas, CsrMatrix, FdmCompressedLinearSystem, FdmLinearSystem, FdmMatrix, FdmMatrixRow,
};

/// Solver interface shared by the stencil-system solvers.
///
/// `solve` reports whether the solver considers the solve successful; the
/// Jacobi solver reports success unconditionally, so callers that need a
/// convergence statement compare [`last_residual`](Self::last_residual)
/// against [`tolerance`](Self::tolerance).
pub trait FdmLinearSystemSolver: Send {
    fn solve(&mut self, system: &mut FdmLinearSystem) -> bool;

    /// Solves the compressed form. Solvers that do not support it leave the
    /// system untouched and return false.
    fn solve_compressed(&mut self, _system: &mut FdmCompressedLinearSystem) -> bool {
        false
    }

    fn can_solve_compressed(&self) -> bool {
        false
    }

    fn tolerance(&self) -> f64;

    fn last_residual(&self) -> f64;
}
