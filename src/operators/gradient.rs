//! Finite-difference gradient operator and its exact adjoint
//!
//! Forward differences along each volume axis with periodic boundary
//! conditions, scaled by the reciprocal voxel size, stacked into one
//! 3N vector [gx; gy; gz]. The adjoint applies the transposed
//! difference per axis and sums the three contributions, so
//! `dot(D x, y) == dot(x, Dᵀ y)` holds to floating-point rounding —
//! required for the augmented system's own adjointness when the
//! gradient rows act as first-order regularization.

/// Stacked forward-difference gradient D
///
/// # Arguments
/// * `x` - Input volume (nx * ny * nz, Fortran order)
/// * `nx`, `ny`, `nz` - Volume dimensions
/// * `vsx`, `vsy`, `vsz` - Voxel sizes
///
/// # Returns
/// 3N vector: derivatives along x, then y, then z
pub fn gradient(
    x: &[f64],
    nx: usize, ny: usize, nz: usize,
    vsx: f64, vsy: f64, vsz: f64,
) -> Vec<f64> {
    let n_total = nx * ny * nz;
    let mut g = vec![0.0; 3 * n_total];

    let hx = 1.0 / vsx;
    let hy = 1.0 / vsy;
    let hz = 1.0 / vsz;

    // Fortran order: index = i + j*nx + k*nx*ny
    for k in 0..nz {
        let kp1 = if k + 1 < nz { k + 1 } else { 0 };
        for j in 0..ny {
            let jp1 = if j + 1 < ny { j + 1 } else { 0 };
            for i in 0..nx {
                let ip1 = if i + 1 < nx { i + 1 } else { 0 };

                let idx = i + j * nx + k * nx * ny;
                let idx_xp = ip1 + j * nx + k * nx * ny;
                let idx_yp = i + jp1 * nx + k * nx * ny;
                let idx_zp = i + j * nx + kp1 * nx * ny;

                let x_val = x[idx];
                g[idx] = (x[idx_xp] - x_val) * hx;
                g[n_total + idx] = (x[idx_yp] - x_val) * hy;
                g[2 * n_total + idx] = (x[idx_zp] - x_val) * hz;
            }
        }
    }

    g
}

/// Adjoint gradient Dᵀ
///
/// # Arguments
/// * `g` - Stacked 3N vector [gx; gy; gz]
/// * `nx`, `ny`, `nz` - Volume dimensions
/// * `vsx`, `vsy`, `vsz` - Voxel sizes
///
/// # Returns
/// Volume-sized vector with the three per-axis adjoint contributions summed
pub fn gradient_adjoint(
    g: &[f64],
    nx: usize, ny: usize, nz: usize,
    vsx: f64, vsy: f64, vsz: f64,
) -> Vec<f64> {
    let n_total = nx * ny * nz;
    let mut out = vec![0.0; n_total];

    let hx = 1.0 / vsx;
    let hy = 1.0 / vsy;
    let hz = 1.0 / vsz;

    let gx = &g[0..n_total];
    let gy = &g[n_total..2 * n_total];
    let gz = &g[2 * n_total..3 * n_total];

    // Transpose of the forward difference: (Dᵀg)[i] = h*(g[i-1] - g[i]),
    // with periodic wrap matching the forward pass.
    for k in 0..nz {
        let km1 = if k == 0 { nz - 1 } else { k - 1 };
        for j in 0..ny {
            let jm1 = if j == 0 { ny - 1 } else { j - 1 };
            for i in 0..nx {
                let im1 = if i == 0 { nx - 1 } else { i - 1 };

                let idx = i + j * nx + k * nx * ny;
                let idx_xm = im1 + j * nx + k * nx * ny;
                let idx_ym = i + jm1 * nx + k * nx * ny;
                let idx_zm = i + j * nx + km1 * nx * ny;

                out[idx] = (gx[idx_xm] - gx[idx]) * hx
                    + (gy[idx_ym] - gy[idx]) * hy
                    + (gz[idx_zm] - gz[idx]) * hz;
            }
        }
    }

    out
}

/// Squared gradient magnitude summed over the volume: Σ |∇x|²
///
/// Diagnostic measure of volume roughness.
pub fn gradient_energy(
    x: &[f64],
    nx: usize, ny: usize, nz: usize,
    vsx: f64, vsy: f64, vsz: f64,
) -> f64 {
    gradient(x, nx, ny, nz, vsx, vsy, vsz).iter().map(|&v| v * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
    }

    fn lcg_vec(n: usize, mut seed: u64) -> Vec<f64> {
        (0..n)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((seed >> 33) as f64 / (1u64 << 30) as f64) - 1.0
            })
            .collect()
    }

    #[test]
    fn test_constant_volume_has_zero_gradient() {
        let (nx, ny, nz) = (4, 5, 3);
        let x = vec![3.7; nx * ny * nz];
        let g = gradient(&x, nx, ny, nz, 1.0, 1.0, 1.0);
        assert!(g.iter().all(|&v| v.abs() < 1e-14));
    }

    #[test]
    fn test_gradient_adjoint_dot_product_identity() {
        let (nx, ny, nz) = (5, 4, 3);
        let n = nx * ny * nz;
        let x = lcg_vec(n, 3);
        let y = lcg_vec(3 * n, 11);

        let dx = gradient(&x, nx, ny, nz, 0.8, 1.1, 2.0);
        let dty = gradient_adjoint(&y, nx, ny, nz, 0.8, 1.1, 2.0);

        let lhs = dot(&dx, &y);
        let rhs = dot(&x, &dty);
        assert!(
            (lhs - rhs).abs() < 1e-12 * (1.0 + lhs.abs()),
            "<Dx, y> = {} but <x, Dt y> = {}",
            lhs,
            rhs
        );
    }

    #[test]
    fn test_gradient_spacing_scaling() {
        let (nx, ny, nz) = (3, 1, 1);
        let x = vec![0.0, 1.0, 2.0];
        // Spacing 2.0 halves the forward difference
        let g = gradient(&x, nx, ny, nz, 2.0, 1.0, 1.0);
        assert!((g[0] - 0.5).abs() < 1e-14);
        assert!((g[1] - 0.5).abs() < 1e-14);
        // Periodic wrap at the last voxel
        assert!((g[2] - (0.0 - 2.0) / 2.0).abs() < 1e-14);
    }

    #[test]
    fn test_gradient_energy_smoother_is_lower() {
        let (nx, ny, nz) = (6, 6, 1);
        let n = nx * ny * nz;
        let noisy = lcg_vec(n, 5);
        let flat = vec![0.1; n];

        let e_noisy = gradient_energy(&noisy, nx, ny, nz, 1.0, 1.0, 1.0);
        let e_flat = gradient_energy(&flat, nx, ny, nz, 1.0, 1.0, 1.0);
        assert!(e_flat < e_noisy);
    }
}
