//! Bound-constrained nonlinear least squares (damped Gauss-Newton)
//!
//! Minimizes the residual vector Ax − b directly under x ≥ 0, using the
//! operator pair as an implicit Jacobian: each outer iteration solves a
//! damped step min ‖Aδ + r‖₂² + damp²‖δ‖₂² with an inner LSMR run,
//! projects the trial point onto the feasible set and accepts it only
//! when the residual improves, shrinking or growing the damping
//! accordingly. Markedly slower than the linear backends (one inner
//! LSMR solve per outer iteration); kept as a fallback only.

use crate::solvers::lsmr::lsmr_solve;

/// Inner LSMR budget per damped step
const INNER_ITERATIONS: usize = 20;
/// Damping growth/shrink factors on rejected/accepted steps
const DAMP_GROW: f64 = 2.0;
const DAMP_SHRINK: f64 = 3.0;

fn residual<F>(a_op: &F, b: &[f64], x: &[f64]) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    a_op(x).iter().zip(b.iter()).map(|(&a, &bi)| a - bi).collect()
}

fn squared_norm(v: &[f64]) -> f64 {
    v.iter().map(|&x| x * x).sum()
}

/// Damped Gauss-Newton solve of the nonnegative least-squares problem
///
/// # Arguments
/// * `a_op` - Computes A·x (also serves as the Jacobian action)
/// * `at_op` - Computes Aᵀ·y
/// * `b` - Right-hand side
/// * `x0` - Optional initial guess (projected onto the feasible set)
/// * `max_iter` - Outer-iteration budget
/// * `should_stop` - Cooperative cancellation, checked per outer iteration
///
/// # Returns
/// Elementwise nonnegative iterate; the residual norm never increases
/// across accepted steps
pub fn trust_region_solve<F, G, C>(
    a_op: &F,
    at_op: &G,
    b: &[f64],
    x0: Option<&[f64]>,
    max_iter: usize,
    should_stop: &C,
) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
    G: Fn(&[f64]) -> Vec<f64>,
    C: Fn() -> bool,
{
    let atb = at_op(b);
    let n = atb.len();

    let mut x: Vec<f64> = match x0 {
        Some(x0) => x0.iter().map(|&v| v.max(0.0)).collect(),
        None => vec![0.0; n],
    };

    let mut r = residual(a_op, b, &x);
    let mut cost = squared_norm(&r);
    let mut damp = 1e-3;

    for _ in 0..max_iter {
        if should_stop() || cost == 0.0 {
            break;
        }

        // Damped Gauss-Newton step: A δ ≈ −r
        let neg_r: Vec<f64> = r.iter().map(|&ri| -ri).collect();
        let delta = lsmr_solve(a_op, at_op, &neg_r, damp, 1e-10, INNER_ITERATIONS, None, should_stop);

        let x_trial: Vec<f64> = x
            .iter()
            .zip(delta.iter())
            .map(|(&xi, &di)| (xi + di).max(0.0))
            .collect();
        let r_trial = residual(a_op, b, &x_trial);
        let cost_trial = squared_norm(&r_trial);

        if cost_trial < cost {
            x = x_trial;
            r = r_trial;
            cost = cost_trial;
            damp = (damp / DAMP_SHRINK).max(1e-12);
        } else {
            damp *= DAMP_GROW;
            if damp > 1e12 {
                break;
            }
        }
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEVER: fn() -> bool = || false;

    #[test]
    fn test_identity_positive_rhs() {
        let id = |v: &[f64]| v.to_vec();
        let b = vec![1.0, 2.0, 3.0];
        let x = trust_region_solve(&id, &id, &b, None, 50, &NEVER);
        for (xi, bi) in x.iter().zip(b.iter()) {
            assert!((xi - bi).abs() < 1e-5, "x = {:?}", x);
        }
    }

    #[test]
    fn test_bound_respected() {
        let id = |v: &[f64]| v.to_vec();
        let b = vec![-2.0, 5.0];
        let x = trust_region_solve(&id, &id, &b, None, 50, &NEVER);
        assert!(x.iter().all(|&v| v >= 0.0), "x = {:?}", x);
        assert!((x[1] - 5.0).abs() < 1e-4, "x = {:?}", x);
    }

    #[test]
    fn test_warm_start_stays_feasible() {
        let a_op = |x: &[f64]| vec![2.0 * x[0], 3.0 * x[1]];
        let b = vec![4.0, 9.0];
        let x0 = vec![-1.0, 10.0];
        let x = trust_region_solve(&a_op, &a_op, &b, Some(&x0), 50, &NEVER);
        assert!((x[0] - 2.0).abs() < 1e-4, "x = {:?}", x);
        assert!((x[1] - 3.0).abs() < 1e-4, "x = {:?}", x);
    }
}
