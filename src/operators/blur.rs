//! Oriented Gaussian blur-and-resample operators
//!
//! The slice acquisition model y_k = A_k x blurs the volume with the
//! slice's PSF covariance and samples the result on the slice grid. Both
//! directions are realized from a single weight enumeration: for every
//! slice voxel, a truncated Gaussian footprint over nearby volume voxels
//! is evaluated and normalized. The forward operator gathers volume
//! values through these weights; the adjoint scatters slice values back
//! through the very same weights, so `dot(A v, u) == dot(v, Aᵀ u)` holds
//! by construction up to floating-point rounding.

use nalgebra::{Matrix3, Vector3};

use crate::image::ImageGeometry;
use crate::psf::{psf_covariance, psf_covariance_inverse, DeconvolutionMode, PredefinedCovariance};

/// Immutable blur+resample operator for one slice
///
/// Built once per slice by [`SliceBlur::build`] and then applied
/// statelessly in both directions. Holds the PSF covariance (in volume
/// axes), the quadratic form expressed in volume index coordinates, and
/// the truncated footprint extent.
#[derive(Clone, Debug)]
pub struct SliceBlur {
    slice_geometry: ImageGeometry,
    volume_geometry: ImageGeometry,
    /// Quadratic form B such that the Mahalanobis distance of an index
    /// offset δ is δᵀBδ, with B = (R·S)ᵀ Σ⁻¹ (R·S)
    index_form: Matrix3<f64>,
    /// Physical→index map of the volume grid
    vol_index_from_physical: Matrix3<f64>,
    vol_origin: Vector3<f64>,
    /// Footprint half-width per volume index axis, in voxels
    half_width: [f64; 3],
}

impl SliceBlur {
    /// Build the operator for one slice
    ///
    /// # Arguments
    /// * `slice_geometry` - Grid of the acquired slice
    /// * `volume_geometry` - Grid of the reconstruction volume
    /// * `mode` - PSF covariance policy
    /// * `predefined` - Covariance override for predefined mode
    /// * `alpha_cut` - Kernel truncation radius in standard deviations
    pub fn build(
        slice_geometry: &ImageGeometry,
        volume_geometry: &ImageGeometry,
        mode: DeconvolutionMode,
        predefined: Option<&PredefinedCovariance>,
        alpha_cut: f64,
    ) -> Result<Self, String> {
        if alpha_cut <= 0.0 {
            return Err(format!("Kernel cutoff must be positive, got {}", alpha_cut));
        }

        let cov = psf_covariance(slice_geometry, volume_geometry, mode, predefined)?;
        let cov_inv = psf_covariance_inverse(&cov)?;

        let idx_to_phys = volume_geometry.index_to_physical_matrix();
        let phys_to_idx = idx_to_phys.try_inverse().ok_or_else(|| {
            format!("Degenerate volume geometry: spacing {:?}", volume_geometry.spacing)
        })?;

        // Mahalanobis form in index coordinates and the covariance seen
        // from index space; the latter's diagonal gives the marginal
        // variances that bound the truncated footprint.
        let index_form = idx_to_phys.transpose() * cov_inv * idx_to_phys;
        let cov_index = phys_to_idx * cov * phys_to_idx.transpose();
        let half_width = [
            alpha_cut * cov_index[(0, 0)].max(0.0).sqrt(),
            alpha_cut * cov_index[(1, 1)].max(0.0).sqrt(),
            alpha_cut * cov_index[(2, 2)].max(0.0).sqrt(),
        ];

        Ok(Self {
            slice_geometry: slice_geometry.clone(),
            volume_geometry: volume_geometry.clone(),
            index_form,
            vol_index_from_physical: phys_to_idx,
            vol_origin: Vector3::new(
                volume_geometry.origin[0],
                volume_geometry.origin[1],
                volume_geometry.origin[2],
            ),
            half_width,
        })
    }

    /// Covariance-weighted footprint of every slice voxel
    ///
    /// Calls `f(slice_flat, volume_flat, weight)` for each pair with a
    /// normalized weight. Slice voxels whose footprint misses the volume
    /// grid (or whose weights underflow) produce no calls, which yields
    /// a zero row in the forward operator and a zero column in the
    /// adjoint.
    fn for_each_weight<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        let (snx, sny, snz) = self.slice_geometry.dims;
        let (vnx, vny, vnz) = self.volume_geometry.dims;
        let mut footprint: Vec<(usize, f64)> = Vec::new();

        for sk in 0..snz {
            for sj in 0..sny {
                for si in 0..snx {
                    let p = self.slice_geometry.index_to_physical(si as f64, sj as f64, sk as f64);
                    let c = self.vol_index_from_physical * (p - self.vol_origin);

                    let bounds = |center: f64, hw: f64, n: usize| -> Option<(usize, usize)> {
                        let lo = (center - hw).floor().max(0.0);
                        let hi = (center + hw).ceil().min(n as f64 - 1.0);
                        if lo > hi {
                            None
                        } else {
                            Some((lo as usize, hi as usize))
                        }
                    };

                    let Some((ilo, ihi)) = bounds(c[0], self.half_width[0], vnx) else { continue };
                    let Some((jlo, jhi)) = bounds(c[1], self.half_width[1], vny) else { continue };
                    let Some((klo, khi)) = bounds(c[2], self.half_width[2], vnz) else { continue };

                    footprint.clear();
                    let mut weight_sum = 0.0;
                    for vk in klo..=khi {
                        for vj in jlo..=jhi {
                            for vi in ilo..=ihi {
                                let d = Vector3::new(
                                    vi as f64 - c[0],
                                    vj as f64 - c[1],
                                    vk as f64 - c[2],
                                );
                                let m = (self.index_form * d).dot(&d);
                                let w = (-0.5 * m).exp();
                                if w > 0.0 {
                                    footprint.push((self.volume_geometry.flat_index(vi, vj, vk), w));
                                    weight_sum += w;
                                }
                            }
                        }
                    }

                    if weight_sum <= f64::MIN_POSITIVE {
                        continue;
                    }

                    let slice_flat = self.slice_geometry.flat_index(si, sj, sk);
                    for &(vol_flat, w) in footprint.iter() {
                        f(slice_flat, vol_flat, w / weight_sum);
                    }
                }
            }
        }
    }

    /// Forward operation A_k: blur the volume and sample it on the slice grid
    ///
    /// # Arguments
    /// * `volume` - Volume voxels, Fortran order
    ///
    /// # Returns
    /// Slice-shaped buffer, Fortran order
    pub fn forward(&self, volume: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.slice_geometry.n_voxels()];
        self.for_each_weight(|slice_flat, vol_flat, w| {
            out[slice_flat] += w * volume[vol_flat];
        });
        out
    }

    /// Adjoint operation A_kᵀ: scatter slice values back onto the volume grid
    ///
    /// Contributions are accumulated into `volume_accum`, which must
    /// have volume length; the caller zeroes or sums as appropriate.
    pub fn adjoint(&self, slice_values: &[f64], volume_accum: &mut [f64]) {
        self.for_each_weight(|slice_flat, vol_flat, w| {
            volume_accum[vol_flat] += w * slice_values[slice_flat];
        });
    }

    /// Grid of the slice this operator samples onto
    pub fn slice_geometry(&self) -> &ImageGeometry {
        &self.slice_geometry
    }
}
