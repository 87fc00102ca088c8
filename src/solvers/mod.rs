//! Constrained least-squares backends and their dispatch
//!
//! Every backend shares one contract: a forward callable, an adjoint
//! callable, a right-hand side, an optional initial guess and an
//! iteration budget in; a volume-length, elementwise nonnegative vector
//! out. Backends without native bound support clip explicitly rather
//! than return out-of-domain values.

pub mod lbfgsb;
pub mod lsmr;
pub mod nnls;
pub mod projgrad;
pub mod trust_region;

use std::str::FromStr;

/// Default relative tolerance handed to the linear iterative backends
const LINEAR_TOLERANCE: f64 = 1e-10;

/// Available optimization backends
///
/// Invalid backend configurations are unrepresentable; name-based
/// configuration goes through [`FromStr`] and fails fast on unknown
/// names before any numeric work starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverBackend {
    /// Unbounded LSMR iteration, clipped to nonnegative afterwards
    Lsmr,
    /// Projected-gradient bounded linear least squares
    BoundedLsq,
    /// Exact nonnegative least squares; small problems only
    Nnls,
    /// Projected limited-memory quasi-Newton with bounds
    Lbfgsb,
    /// Damped Gauss-Newton on the residual vector; slow fallback
    TrustRegion,
}

impl FromStr for SolverBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lsmr" => Ok(Self::Lsmr),
            "bounded_lsq" => Ok(Self::BoundedLsq),
            "nnls" => Ok(Self::Nnls),
            "lbfgsb" => Ok(Self::Lbfgsb),
            "trust_region" => Ok(Self::TrustRegion),
            other => Err(format!(
                "Unknown solver backend '{}' (expected lsmr, bounded_lsq, nnls, lbfgsb or trust_region)",
                other
            )),
        }
    }
}

impl SolverBackend {
    /// Lower-case name used in log lines and filenames
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lsmr => "lsmr",
            Self::BoundedLsq => "bounded_lsq",
            Self::Nnls => "nnls",
            Self::Lbfgsb => "lbfgsb",
            Self::TrustRegion => "trust_region",
        }
    }
}

/// Run the configured backend and return a nonnegative solution
///
/// # Arguments
/// * `backend` - Which backend to run
/// * `a_op` - Computes A·x
/// * `at_op` - Computes Aᵀ·y
/// * `b` - Stacked right-hand side
/// * `x0` - Optional initial guess
/// * `iter_max` - Iteration budget (≥ 1)
/// * `should_stop` - Cooperative cancellation; when it fires, the best
///   iterate reached so far is returned
///
/// # Returns
/// Volume-length vector, elementwise ≥ 0
pub fn solve_nonnegative<F, G, C>(
    backend: SolverBackend,
    a_op: &F,
    at_op: &G,
    b: &[f64],
    x0: Option<&[f64]>,
    iter_max: usize,
    should_stop: &C,
) -> Result<Vec<f64>, String>
where
    F: Fn(&[f64]) -> Vec<f64>,
    G: Fn(&[f64]) -> Vec<f64>,
    C: Fn() -> bool,
{
    if iter_max == 0 {
        return Err("Iteration budget must be at least 1".to_string());
    }

    let x = match backend {
        SolverBackend::Lsmr => {
            let x = lsmr::lsmr_solve(a_op, at_op, b, 0.0, LINEAR_TOLERANCE, iter_max, x0, should_stop);
            // LSMR has no bound support; project post hoc.
            x.into_iter().map(|v| v.max(0.0)).collect()
        }
        SolverBackend::BoundedLsq => {
            projgrad::bounded_lsq_solve(a_op, at_op, b, x0, iter_max, should_stop)
        }
        SolverBackend::Nnls => nnls::nnls_solve(a_op, at_op, b, iter_max, should_stop)?,
        SolverBackend::Lbfgsb => lbfgsb::lbfgsb_solve(a_op, at_op, b, x0, iter_max, should_stop),
        SolverBackend::TrustRegion => {
            trust_region::trust_region_solve(a_op, at_op, b, x0, iter_max, should_stop)
        }
    };

    debug_assert!(x.iter().all(|&v| v >= 0.0));
    Ok(x)
}
