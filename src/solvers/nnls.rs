//! Nonnegative least squares (Lawson-Hanson active set)
//!
//! Solves min ‖Ax − b‖₂² subject to x ≥ 0 exactly, by densifying the
//! operator column by column and running the classic active-set
//! iteration. The densification applies the forward operator once per
//! unknown, so this backend is only suitable for small problems; the
//! iterative backends handle everything else.
//!
//! Reference:
//! Lawson & Hanson, "Solving Least Squares Problems", SIAM 1995, ch. 23.

use nalgebra::{DMatrix, DVector};

/// Tolerance below which a dual value is treated as nonpositive
const DUAL_TOLERANCE: f64 = 1e-10;

/// Densify the operator by applying it to each unit vector
fn densify<F>(a_op: &F, m: usize, n: usize) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let mut a = DMatrix::zeros(m, n);
    let mut e = vec![0.0; n];
    for col in 0..n {
        e[col] = 1.0;
        let column = a_op(&e);
        for (row, &value) in column.iter().enumerate() {
            a[(row, col)] = value;
        }
        e[col] = 0.0;
    }
    a
}

/// Unconstrained least squares restricted to the passive columns
fn passive_least_squares(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    passive: &[usize],
) -> Result<DVector<f64>, String> {
    let m = a.nrows();
    let mut sub = DMatrix::zeros(m, passive.len());
    for (j, &col) in passive.iter().enumerate() {
        for i in 0..m {
            sub[(i, j)] = a[(i, col)];
        }
    }
    sub.svd(true, true)
        .solve(b, 1e-12)
        .map_err(|e| format!("Passive-set least squares failed: {}", e))
}

/// Lawson-Hanson NNLS on a matrix-free operator pair
///
/// # Arguments
/// * `a_op` - Computes A·x; applied n times to densify the operator
/// * `at_op` - Computes Aᵀ·y, used for the dual vector
/// * `b` - Right-hand side
/// * `max_iter` - Budget on passive-set changes
/// * `should_stop` - Cooperative cancellation, checked per outer iteration
///
/// # Returns
/// Elementwise nonnegative least-squares solution (or the best feasible
/// iterate when the budget runs out)
pub fn nnls_solve<F, G, C>(
    a_op: &F,
    at_op: &G,
    b: &[f64],
    max_iter: usize,
    should_stop: &C,
) -> Result<Vec<f64>, String>
where
    F: Fn(&[f64]) -> Vec<f64>,
    G: Fn(&[f64]) -> Vec<f64>,
    C: Fn() -> bool,
{
    let n = at_op(b).len();
    let m = b.len();
    let a = densify(a_op, m, n);
    let b_vec = DVector::from_column_slice(b);

    let mut x = DVector::zeros(n);
    let mut passive: Vec<usize> = Vec::new();
    let mut in_passive = vec![false; n];

    for _ in 0..max_iter {
        if should_stop() {
            break;
        }

        // Dual vector w = Aᵀ(b − Ax); optimal once no free index has
        // positive dual.
        let w = a.transpose() * (&b_vec - &a * &x);
        let mut best: Option<(usize, f64)> = None;
        for i in 0..n {
            if !in_passive[i] && w[i] > DUAL_TOLERANCE {
                if best.map_or(true, |(_, wv)| w[i] > wv) {
                    best = Some((i, w[i]));
                }
            }
        }
        let Some((entering, _)) = best else { break };

        passive.push(entering);
        in_passive[entering] = true;

        // Inner loop: restore feasibility of the passive-set solution
        loop {
            let z = passive_least_squares(&a, &b_vec, &passive)?;

            if z.iter().all(|&zi| zi > 0.0) {
                x.fill(0.0);
                for (j, &col) in passive.iter().enumerate() {
                    x[col] = z[j];
                }
                break;
            }

            // Step toward z until the first passive variable hits zero
            let mut step = f64::INFINITY;
            for (j, &col) in passive.iter().enumerate() {
                if z[j] <= 0.0 {
                    let denom = x[col] - z[j];
                    if denom > 0.0 {
                        step = step.min(x[col] / denom);
                    }
                }
            }
            if !step.is_finite() {
                return Err("Nonnegative least squares failed to make progress".to_string());
            }

            for (j, &col) in passive.iter().enumerate() {
                x[col] += step * (z[j] - x[col]);
            }

            // Demote variables pinned at the bound
            let mut j = 0;
            while j < passive.len() {
                let col = passive[j];
                if x[col] <= DUAL_TOLERANCE {
                    x[col] = 0.0;
                    in_passive[col] = false;
                    passive.swap_remove(j);
                } else {
                    j += 1;
                }
            }
            if passive.is_empty() {
                break;
            }
        }
    }

    Ok(x.iter().map(|&v| v.max(0.0)).collect())
}
