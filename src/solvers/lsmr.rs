//! LSMR solver
//!
//! Least Squares Minimal Residual algorithm for
//! min ‖Ax − b‖₂² + damp²‖x‖₂² with A given only as forward/adjoint
//! callables. Preferred over LSQR here because the iterate is safer to
//! use when the solver is terminated early on an iteration budget.
//!
//! Reference:
//! Fong & Saunders, "LSMR: An iterative algorithm for sparse
//! least-squares problems", SISC 2011.

/// Stable Givens rotation: returns (c, s, r) with r = hypot(a, b)
fn sym_ortho(a: f64, b: f64) -> (f64, f64, f64) {
    if b == 0.0 {
        (a.signum(), 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, b.signum(), b.abs())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = b.signum() / (1.0 + tau * tau).sqrt();
        let c = s * tau;
        (c, s, b / s)
    } else {
        let tau = b / a;
        let c = a.signum() / (1.0 + tau * tau).sqrt();
        let s = c * tau;
        (c, s, a / c)
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// LSMR iteration on a matrix-free operator pair
///
/// # Arguments
/// * `a_op` - Computes A·x (volume space → stacked space)
/// * `at_op` - Computes Aᵀ·y (stacked space → volume space)
/// * `b` - Right-hand side
/// * `damp` - Damping parameter (0 for standard least squares)
/// * `tol` - Relative tolerance on the ‖Aᵀr‖ estimate
/// * `max_iter` - Iteration budget
/// * `x0` - Optional warm start; the shifted system A·dx ≈ b − A·x0 is
///   solved and x0 added back
/// * `should_stop` - Cooperative cancellation, checked once per iteration
///
/// # Returns
/// Best iterate reached within the budget (unconstrained; callers
/// needing bounds clip afterwards)
pub fn lsmr_solve<F, G, C>(
    a_op: &F,
    at_op: &G,
    b: &[f64],
    damp: f64,
    tol: f64,
    max_iter: usize,
    x0: Option<&[f64]>,
    should_stop: &C,
) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
    G: Fn(&[f64]) -> Vec<f64>,
    C: Fn() -> bool,
{
    let m = b.len();

    // Warm start solves the shifted problem for dx = x - x0.
    let mut u: Vec<f64> = match x0 {
        Some(x0) => {
            let ax0 = a_op(x0);
            b.iter().zip(ax0.iter()).map(|(&bi, &ai)| bi - ai).collect()
        }
        None => b.to_vec(),
    };
    debug_assert_eq!(u.len(), m);

    let mut beta = norm(&u);
    if beta > 0.0 {
        for ui in u.iter_mut() {
            *ui /= beta;
        }
    }

    let mut v = at_op(&u);
    let n = v.len();
    let mut alpha = if beta > 0.0 { norm(&v) } else { 0.0 };
    if alpha > 0.0 {
        for vi in v.iter_mut() {
            *vi /= alpha;
        }
    }

    let mut x = vec![0.0; n];
    let mut h = v.clone();
    let mut h_bar = vec![0.0; n];

    let mut alpha_bar = alpha;
    let mut zeta_bar = alpha * beta;
    let mut rho = 1.0;
    let mut rho_bar = 1.0;
    let mut c_bar = 1.0;
    let mut s_bar = 0.0;

    let zeta_bar0 = zeta_bar.abs();

    if zeta_bar0 > 0.0 {
        for _ in 0..max_iter {
            if should_stop() {
                break;
            }

            // Golub-Kahan bidiagonalization step
            let av = a_op(&v);
            for (ui, &avi) in u.iter_mut().zip(av.iter()) {
                *ui = avi - alpha * *ui;
            }
            beta = norm(&u);
            if beta > 0.0 {
                for ui in u.iter_mut() {
                    *ui /= beta;
                }
            }

            let atu = at_op(&u);
            for (vi, &ati) in v.iter_mut().zip(atu.iter()) {
                *vi = ati - beta * *vi;
            }
            alpha = norm(&v);
            if alpha > 0.0 {
                for vi in v.iter_mut() {
                    *vi /= alpha;
                }
            }

            // Rotation eliminating the damping term
            let (_c_hat, _s_hat, alpha_hat) = sym_ortho(alpha_bar, damp);

            // Rotation annihilating the subdiagonal
            let rho_old = rho;
            let (c, s, rho_new) = sym_ortho(alpha_hat, beta);
            rho = rho_new;
            let theta_new = s * alpha;
            alpha_bar = c * alpha;

            // Second-level rotation for the minimal-residual recurrence
            let rho_bar_old = rho_bar;
            let theta_bar = s_bar * rho;
            let (c_bar_new, s_bar_new, rho_bar_new) = sym_ortho(c_bar * rho, theta_new);
            c_bar = c_bar_new;
            s_bar = s_bar_new;
            rho_bar = rho_bar_new;
            let zeta = c_bar * zeta_bar;
            zeta_bar = -s_bar * zeta_bar;

            if rho <= 1e-300 || rho_bar <= 1e-300 || rho_old <= 1e-300 || rho_bar_old <= 1e-300 {
                break;
            }

            // Solution update
            let scale_h_bar = theta_bar * rho / (rho_old * rho_bar_old);
            for (hb, &hi) in h_bar.iter_mut().zip(h.iter()) {
                *hb = hi - scale_h_bar * *hb;
            }
            let scale_x = zeta / (rho * rho_bar);
            for (xi, &hb) in x.iter_mut().zip(h_bar.iter()) {
                *xi += scale_x * hb;
            }
            let scale_h = theta_new / rho;
            for (hi, &vi) in h.iter_mut().zip(v.iter()) {
                *hi = vi - scale_h * *hi;
            }

            // |zeta_bar| estimates ‖Aᵀr‖ up to a constant factor
            if zeta_bar.abs() <= tol * zeta_bar0 {
                break;
            }
        }
    }

    if let Some(x0) = x0 {
        for (xi, &x0i) in x.iter_mut().zip(x0.iter()) {
            *xi += x0i;
        }
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEVER: fn() -> bool = || false;

    #[test]
    fn test_identity_system() {
        let b = vec![1.0, 2.0, 3.0];
        let x = lsmr_solve(
            &|v: &[f64]| v.to_vec(),
            &|v: &[f64]| v.to_vec(),
            &b,
            0.0,
            1e-12,
            50,
            None,
            &NEVER,
        );
        for (xi, bi) in x.iter().zip(b.iter()) {
            assert!((xi - bi).abs() < 1e-8, "x = {:?} should equal b", x);
        }
    }

    #[test]
    fn test_diagonal_system() {
        let diag = [1.0, 2.0, 3.0, 4.0];
        let b = vec![1.0, 4.0, 9.0, 16.0];
        let a_op = |x: &[f64]| x.iter().zip(diag.iter()).map(|(&xi, &d)| xi * d).collect::<Vec<_>>();
        let at_op = a_op;

        let x = lsmr_solve(&a_op, &at_op, &b, 0.0, 1e-12, 100, None, &NEVER);

        for (i, &xi) in x.iter().enumerate() {
            let expected = b[i] / diag[i];
            assert!((xi - expected).abs() < 1e-7, "x[{}] = {}, expected {}", i, xi, expected);
        }
    }

    #[test]
    fn test_overdetermined_least_squares() {
        // 4 equations, 2 unknowns; normal-equations solution is (3, 7)
        let a_op = |x: &[f64]| vec![x[0], x[1], x[0], x[1]];
        let at_op = |y: &[f64]| vec![y[0] + y[2], y[1] + y[3]];
        let b = vec![2.0, 6.0, 4.0, 8.0];

        let x = lsmr_solve(&a_op, &at_op, &b, 0.0, 1e-12, 100, None, &NEVER);

        assert!((x[0] - 3.0).abs() < 1e-7, "x[0] = {}", x[0]);
        assert!((x[1] - 7.0).abs() < 1e-7, "x[1] = {}", x[1]);
    }

    #[test]
    fn test_damped_solution_is_shrunk() {
        let b = vec![10.0, 20.0, 30.0];
        let id = |v: &[f64]| v.to_vec();

        let plain = lsmr_solve(&id, &id, &b, 0.0, 1e-12, 100, None, &NEVER);
        let damped = lsmr_solve(&id, &id, &b, 1.0, 1e-12, 100, None, &NEVER);

        // With damp = 1 and A = I, the solution is b / 2
        for i in 0..3 {
            assert!((plain[i] - b[i]).abs() < 1e-7);
            assert!((damped[i] - b[i] / 2.0).abs() < 1e-6, "damped[{}] = {}", i, damped[i]);
        }
    }

    #[test]
    fn test_warm_start_matches_cold_start() {
        let diag = [2.0, 5.0, 0.5];
        let b = vec![4.0, 10.0, 2.0];
        let a_op = |x: &[f64]| x.iter().zip(diag.iter()).map(|(&xi, &d)| xi * d).collect::<Vec<_>>();

        let cold = lsmr_solve(&a_op, &a_op, &b, 0.0, 1e-12, 100, None, &NEVER);
        let x0 = vec![1.0, 1.0, 1.0];
        let warm = lsmr_solve(&a_op, &a_op, &b, 0.0, 1e-12, 100, Some(&x0), &NEVER);

        for i in 0..3 {
            assert!((cold[i] - warm[i]).abs() < 1e-6, "cold {} vs warm {}", cold[i], warm[i]);
        }
    }

    #[test]
    fn test_zero_rhs_returns_zero() {
        let id = |v: &[f64]| v.to_vec();
        let x = lsmr_solve(&id, &id, &[0.0; 5], 0.0, 1e-12, 50, None, &NEVER);
        assert!(x.iter().all(|&xi| xi == 0.0));
    }

    #[test]
    fn test_cancellation_stops_early() {
        let id = |v: &[f64]| v.to_vec();
        let b = vec![1.0, 2.0, 3.0];
        let x = lsmr_solve(&id, &id, &b, 0.0, 1e-12, 100, None, &|| true);
        // Cancelled before the first iteration: nothing accumulated
        assert!(x.iter().all(|&xi| xi == 0.0));
    }
}
