//! Augmented linear system for regularized slice-to-volume reconstruction
//!
//! Stacks the masked per-slice acquisition operators and the scaled
//! gradient rows into one linear operator with a matching adjoint:
//!
//!   forward:  x ↦ [ M_1 A_1 x; …; M_K A_K x; √α · D x ]
//!   adjoint:  y ↦ Σ_k A_kᵀ M_k y_k + √α · Dᵀ y_grad
//!
//! The right-hand side stacks the masked observed slice intensities,
//! zero-padded over the regularization rows. All segment boundaries come
//! from one [`SegmentLayout`] built up front; no offset arithmetic is
//! repeated ad hoc.

use crate::image::{ImageGeometry, Slice, Stack};
use crate::operators::gradient::{gradient, gradient_adjoint};
use crate::operators::SliceBlur;
use crate::psf::{DeconvolutionMode, PredefinedCovariance};

/// Offset table of the stacked system vector
///
/// Slice segments appear in stack-then-slice order, followed by one
/// 3N gradient segment when the system is regularized.
#[derive(Clone, Debug)]
pub struct SegmentLayout {
    segments: Vec<(usize, usize)>,
    n_slice_voxels: usize,
    n_volume_voxels: usize,
    regularized: bool,
}

impl SegmentLayout {
    /// Build the table from the stacks and the target volume grid
    ///
    /// Fails when the stacks contain no voxels at all: an empty system
    /// cannot be solved and must be rejected before any numeric work.
    pub fn build(
        stacks: &[Stack],
        volume_geometry: &ImageGeometry,
        regularized: bool,
    ) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut offset = 0;
        for stack in stacks {
            for slice in &stack.slices {
                let len = slice.n_voxels();
                segments.push((offset, len));
                offset += len;
            }
        }
        if offset == 0 {
            return Err("Cannot build a system from stacks with zero slice voxels".to_string());
        }
        Ok(Self {
            segments,
            n_slice_voxels: offset,
            n_volume_voxels: volume_geometry.n_voxels(),
            regularized,
        })
    }

    /// Slice segment (offset, len) by flattened slice index
    pub fn slice_segment(&self, index: usize) -> (usize, usize) {
        self.segments[index]
    }

    /// Number of slice segments
    pub fn n_slices(&self) -> usize {
        self.segments.len()
    }

    /// Total voxel count over all slices
    pub fn n_slice_voxels(&self) -> usize {
        self.n_slice_voxels
    }

    /// Voxel count of the reconstruction volume
    pub fn n_volume_voxels(&self) -> usize {
        self.n_volume_voxels
    }

    /// Gradient segment (offset, len), present only when regularized
    pub fn gradient_segment(&self) -> Option<(usize, usize)> {
        self.regularized
            .then(|| (self.n_slice_voxels, 3 * self.n_volume_voxels))
    }

    /// Length of the stacked system vector
    pub fn total_len(&self) -> usize {
        self.n_slice_voxels + if self.regularized { 3 * self.n_volume_voxels } else { 0 }
    }
}

/// The assembled forward/adjoint operator pair and right-hand side
pub struct AugmentedSystem<'a> {
    slices: Vec<&'a Slice>,
    operators: Vec<SliceBlur>,
    layout: SegmentLayout,
    volume_geometry: ImageGeometry,
    alpha: f64,
}

impl<'a> AugmentedSystem<'a> {
    /// Assemble the system for a set of stacks against a volume grid
    ///
    /// # Arguments
    /// * `stacks` - All acquisition stacks (read-only)
    /// * `volume_geometry` - Grid of the reconstruction volume
    /// * `mode` - PSF covariance policy
    /// * `predefined` - Covariance override for predefined mode
    /// * `alpha_cut` - Blur kernel truncation radius in standard deviations
    /// * `alpha` - Regularization weight; 0 disables the gradient rows
    pub fn build(
        stacks: &'a [Stack],
        volume_geometry: &ImageGeometry,
        mode: DeconvolutionMode,
        predefined: Option<&PredefinedCovariance>,
        alpha_cut: f64,
        alpha: f64,
    ) -> Result<Self, String> {
        if alpha < 0.0 {
            return Err(format!("Regularization weight must be nonnegative, got {}", alpha));
        }

        let layout = SegmentLayout::build(stacks, volume_geometry, alpha > 0.0)?;

        let mut slices = Vec::with_capacity(layout.n_slices());
        let mut operators = Vec::with_capacity(layout.n_slices());
        for stack in stacks {
            for slice in &stack.slices {
                operators.push(SliceBlur::build(
                    &slice.geometry,
                    volume_geometry,
                    mode,
                    predefined,
                    alpha_cut,
                )?);
                slices.push(slice);
            }
        }

        Ok(Self {
            slices,
            operators,
            layout,
            volume_geometry: volume_geometry.clone(),
            alpha,
        })
    }

    /// Offset table of this system
    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    fn volume_dims(&self) -> (usize, usize, usize, f64, f64, f64) {
        let (nx, ny, nz) = self.volume_geometry.dims;
        let [vsx, vsy, vsz] = self.volume_geometry.spacing;
        (nx, ny, nz, vsx, vsy, vsz)
    }

    /// Apply the augmented forward operator to a volume vector
    pub fn forward(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.layout.total_len()];

        for (idx, (slice, op)) in self.slices.iter().zip(self.operators.iter()).enumerate() {
            let (offset, len) = self.layout.slice_segment(idx);
            let mut values = op.forward(x);
            slice.apply_mask(&mut values);
            out[offset..offset + len].copy_from_slice(&values);
        }

        if let Some((offset, len)) = self.layout.gradient_segment() {
            let (nx, ny, nz, vsx, vsy, vsz) = self.volume_dims();
            let g = gradient(x, nx, ny, nz, vsx, vsy, vsz);
            let sqrt_alpha = self.alpha.sqrt();
            for (o, &gi) in out[offset..offset + len].iter_mut().zip(g.iter()) {
                *o = sqrt_alpha * gi;
            }
        }

        out
    }

    /// Apply the augmented adjoint operator to a stacked vector
    pub fn adjoint(&self, y: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.layout.n_volume_voxels()];
        let mut masked = Vec::new();

        for (idx, (slice, op)) in self.slices.iter().zip(self.operators.iter()).enumerate() {
            let (offset, len) = self.layout.slice_segment(idx);
            masked.clear();
            masked.extend_from_slice(&y[offset..offset + len]);
            slice.apply_mask(&mut masked);
            op.adjoint(&masked, &mut out);
        }

        if let Some((offset, len)) = self.layout.gradient_segment() {
            let (nx, ny, nz, vsx, vsy, vsz) = self.volume_dims();
            let dt = gradient_adjoint(&y[offset..offset + len], nx, ny, nz, vsx, vsy, vsz);
            let sqrt_alpha = self.alpha.sqrt();
            for (o, &di) in out.iter_mut().zip(dt.iter()) {
                *o += sqrt_alpha * di;
            }
        }

        out
    }

    /// Stacked right-hand side: masked slice intensities, zero-padded
    /// over the regularization rows
    pub fn rhs(&self) -> Vec<f64> {
        let mut b = vec![0.0; self.layout.total_len()];
        for (idx, slice) in self.slices.iter().enumerate() {
            let (offset, len) = self.layout.slice_segment(idx);
            let mut values = slice.data.clone();
            slice.apply_mask(&mut values);
            b[offset..offset + len].copy_from_slice(&values);
        }
        b
    }

    /// Data residual Σ_k ‖M_k(A_k x − y_k)‖² for a volume estimate
    ///
    /// Diagnostic only; the solvers stop on iteration count, not on
    /// this value.
    pub fn residual_ell2(&self, x: &[f64]) -> f64 {
        let mut residual = 0.0;
        for (slice, op) in self.slices.iter().zip(self.operators.iter()) {
            let mut diff = op.forward(x);
            for (d, &obs) in diff.iter_mut().zip(slice.data.iter()) {
                *d -= obs;
            }
            slice.apply_mask(&mut diff);
            residual += diff.iter().map(|&d| d * d).sum::<f64>();
        }
        residual
    }

    /// Prior residual ‖D x‖² for a volume estimate
    pub fn residual_prior(&self, x: &[f64]) -> f64 {
        let (nx, ny, nz, vsx, vsy, vsz) = self.volume_dims();
        gradient(x, nx, ny, nz, vsx, vsy, vsz).iter().map(|&g| g * g).sum()
    }
}
