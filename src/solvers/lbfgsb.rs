//! Bound-constrained quasi-Newton minimization
//!
//! Limited-memory BFGS with gradient projection for
//! min ½‖Ax − b‖₂² subject to x ≥ 0. The gradient is evaluated through
//! the operator pair as Aᵀ(Ax − b); search directions come from the
//! two-loop recursion and are safeguarded by a projected Armijo
//! backtracking line search, so every accepted step decreases the
//! objective and stays feasible.
//!
//! Reference:
//! Byrd, Lu, Nocedal & Zhu, "A limited memory algorithm for bound
//! constrained optimization", SISC 1995.

use std::collections::VecDeque;

/// Curvature pairs kept for the two-loop recursion
const MEMORY: usize = 8;
/// Sufficient-decrease constant for the Armijo condition
const ARMIJO_C1: f64 = 1e-4;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// Two-loop recursion: approximate -H·g from stored curvature pairs
fn search_direction(history: &VecDeque<(Vec<f64>, Vec<f64>, f64)>, g: &[f64]) -> Vec<f64> {
    let mut q: Vec<f64> = g.to_vec();
    let mut alphas = Vec::with_capacity(history.len());

    for (s, y, rho) in history.iter().rev() {
        let a = rho * dot(s, &q);
        for (qi, &yi) in q.iter_mut().zip(y.iter()) {
            *qi -= a * yi;
        }
        alphas.push(a);
    }

    // Initial Hessian scaling from the most recent pair
    if let Some((s, y, _)) = history.back() {
        let yy = dot(y, y);
        if yy > 0.0 {
            let gamma = dot(s, y) / yy;
            for qi in q.iter_mut() {
                *qi *= gamma;
            }
        }
    }

    for ((s, y, rho), &a) in history.iter().zip(alphas.iter().rev()) {
        let beta = rho * dot(y, &q);
        for (qi, &si) in q.iter_mut().zip(s.iter()) {
            *qi += (a - beta) * si;
        }
    }

    for qi in q.iter_mut() {
        *qi = -*qi;
    }
    q
}

/// Projected L-BFGS solve of the nonnegative least-squares problem
///
/// # Arguments
/// * `a_op` - Computes A·x
/// * `at_op` - Computes Aᵀ·y
/// * `b` - Right-hand side
/// * `x0` - Optional initial guess (projected onto the feasible set);
///   zero start is preferred when masks leave voxels unobserved
/// * `max_iter` - Iteration budget
/// * `should_stop` - Cooperative cancellation, checked once per iteration
///
/// # Returns
/// Elementwise nonnegative iterate with a non-increasing objective
pub fn lbfgsb_solve<F, G, C>(
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

    let objective_and_gradient = |x: &[f64]| -> (f64, Vec<f64>) {
        let ax = a_op(x);
        let r: Vec<f64> = ax.iter().zip(b.iter()).map(|(&a, &bi)| a - bi).collect();
        let f = 0.5 * dot(&r, &r);
        (f, at_op(&r))
    };

    let (mut f, mut g) = objective_and_gradient(&x);
    let mut history: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::with_capacity(MEMORY);

    for _ in 0..max_iter {
        if should_stop() {
            break;
        }

        let mut d = search_direction(&history, &g);
        if dot(&d, &g) >= 0.0 {
            // Recursion produced an ascent direction; fall back to
            // steepest descent.
            d = g.iter().map(|&gi| -gi).collect();
        }

        // Projected Armijo backtracking
        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..40 {
            let x_trial: Vec<f64> = x
                .iter()
                .zip(d.iter())
                .map(|(&xi, &di)| (xi + step * di).max(0.0))
                .collect();
            let dx: Vec<f64> = x_trial.iter().zip(x.iter()).map(|(&t, &xi)| t - xi).collect();
            if dx.iter().all(|&v| v == 0.0) {
                break;
            }
            let (f_trial, g_trial) = objective_and_gradient(&x_trial);
            if f_trial <= f + ARMIJO_C1 * dot(&g, &dx) {
                accepted = Some((x_trial, dx, f_trial, g_trial));
                break;
            }
            step *= 0.5;
        }
        let Some((x_new, s, f_new, g_new)) = accepted else { break };

        let y: Vec<f64> = g_new.iter().zip(g.iter()).map(|(&a, &b)| a - b).collect();
        let sy = dot(&s, &y);
        if sy > 1e-12 {
            if history.len() == MEMORY {
                history.pop_front();
            }
            history.push_back((s, y, 1.0 / sy));
        }

        x = x_new;
        f = f_new;
        g = g_new;
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEVER: fn() -> bool = || false;

    fn objective<F: Fn(&[f64]) -> Vec<f64>>(a_op: &F, b: &[f64], x: &[f64]) -> f64 {
        let ax = a_op(x);
        0.5 * ax.iter().zip(b.iter()).map(|(&a, &bi)| (a - bi) * (a - bi)).sum::<f64>()
    }

    #[test]
    fn test_identity_positive_rhs() {
        let id = |v: &[f64]| v.to_vec();
        let b = vec![1.0, 2.0, 3.0];
        let x = lbfgsb_solve(&id, &id, &b, None, 100, &NEVER);
        for (xi, bi) in x.iter().zip(b.iter()) {
            assert!((xi - bi).abs() < 1e-5, "x = {:?}", x);
        }
    }

    #[test]
    fn test_bound_active_for_negative_target() {
        let id = |v: &[f64]| v.to_vec();
        let b = vec![-4.0, 2.0];
        let x = lbfgsb_solve(&id, &id, &b, None, 100, &NEVER);
        assert!(x[0] == 0.0, "x = {:?}", x);
        assert!((x[1] - 2.0).abs() < 1e-5, "x = {:?}", x);
    }

    #[test]
    fn test_result_is_nonnegative_from_any_start() {
        let a_op = |x: &[f64]| vec![x[0] + 0.5 * x[1], 0.5 * x[0] + x[1]];
        let b = vec![-1.0, -2.0];
        let x0 = vec![3.0, -7.0];
        let x = lbfgsb_solve(&a_op, &a_op, &b, Some(&x0), 100, &NEVER);
        assert!(x.iter().all(|&v| v >= 0.0), "x = {:?}", x);
    }

    #[test]
    fn test_objective_monotone_in_iteration_count() {
        let a_op = |x: &[f64]| {
            vec![
                1.5 * x[0] + 0.3 * x[1],
                0.3 * x[0] + 2.0 * x[1] + 0.4 * x[2],
                0.4 * x[1] + 1.0 * x[2],
            ]
        };
        let b = vec![2.0, -1.0, 3.0];

        let mut previous = f64::INFINITY;
        for iters in 1..15 {
            let x = lbfgsb_solve(&a_op, &a_op, &b, None, iters, &NEVER);
            let f = objective(&a_op, &b, &x);
            assert!(
                f <= previous + 1e-12,
                "objective rose from {} to {} at {} iterations",
                previous,
                f,
                iters
            );
            previous = f;
        }
    }
}
