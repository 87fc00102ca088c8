//! Point-spread-function modeling for slice acquisition
//!
//! Models the acquisition blur of a 2D multi-slice sequence as an
//! oriented 3D Gaussian. In slice coordinates the PSF is axis-aligned
//! with variances derived from the slice spacing (FWHM model):
//!
//!   σ_x² = (1.2·s_x)² / (8 ln 2),  σ_y² = (1.2·s_y)² / (8 ln 2),
//!   σ_z² = s_z² / (8 ln 2)
//!
//! i.e. an in-plane FWHM of 1.2 times the pixel size and a through-plane
//! FWHM equal to the slice thickness. The covariance is then rotated
//! into the coordinate axes of the reconstruction volume so that
//! blurring can be carried out directly on the volume grid:
//!
//!   Σ_vol = U Σ_slice Uᵀ,  U = R_volᵀ R_slice
//!
//! Reference:
//! Rousseau F, et al. "Registration-Based Approach for Reconstruction of
//! High-Resolution In Utero Fetal MR Brain Images." Acad Radiol 2006.

use std::str::FromStr;

use nalgebra::{Cholesky, Matrix3, Vector3};

use crate::image::ImageGeometry;

/// Through-plane spacing substituted in in-plane-only mode
///
/// Several orders of magnitude below any realistic slice thickness, so
/// the resulting through-plane blur is negligible and only in-plane
/// deconvolution is modeled.
pub const IN_PLANE_THROUGH_PLANE_SPACING: f64 = 1e-6;

/// How the per-slice blur covariance is obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeconvolutionMode {
    /// Covariance from the slice's actual 3D spacing and orientation
    Full3D,
    /// Same computation with the through-plane spacing collapsed, so
    /// only in-plane blur is modeled
    InPlaneOnly,
    /// Caller-supplied covariance instead of one derived from geometry
    PredefinedCovariance,
}

impl FromStr for DeconvolutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_3d" => Ok(Self::Full3D),
            "in_plane" => Ok(Self::InPlaneOnly),
            "predefined_covariance" => Ok(Self::PredefinedCovariance),
            other => Err(format!(
                "Unknown deconvolution mode '{}' (expected full_3d, in_plane or predefined_covariance)",
                other
            )),
        }
    }
}

/// Caller-supplied blur covariance for predefined-covariance mode
#[derive(Clone, Debug)]
pub enum PredefinedCovariance {
    /// Diagonal variances (σ_x², σ_y², σ_z²) in slice axes
    Diagonal([f64; 3]),
    /// Full 3x3 symmetric covariance in slice axes, row-major
    Full([f64; 9]),
}

impl PredefinedCovariance {
    fn matrix(&self) -> Matrix3<f64> {
        match self {
            Self::Diagonal(d) => Matrix3::from_diagonal(&Vector3::new(d[0], d[1], d[2])),
            Self::Full(m) => Matrix3::from_row_slice(m),
        }
    }
}

/// Axis-aligned PSF covariance in slice coordinates from slice spacing
fn covariance_from_spacing(spacing: [f64; 3]) -> Matrix3<f64> {
    let fwhm_to_var = 8.0 * (2.0f64).ln();
    let sx2 = (1.2 * spacing[0]).powi(2) / fwhm_to_var;
    let sy2 = (1.2 * spacing[1]).powi(2) / fwhm_to_var;
    let sz2 = spacing[2].powi(2) / fwhm_to_var;
    Matrix3::from_diagonal(&Vector3::new(sx2, sy2, sz2))
}

/// Rotate a slice-axis covariance into volume coordinate axes
fn rotate_to_volume_axes(
    cov_slice: Matrix3<f64>,
    slice_geometry: &ImageGeometry,
    volume_geometry: &ImageGeometry,
) -> Matrix3<f64> {
    let u = volume_geometry.direction_matrix().transpose() * slice_geometry.direction_matrix();
    u * cov_slice * u.transpose()
}

/// Gaussian blur covariance of one slice, expressed in volume axes
///
/// # Arguments
/// * `slice_geometry` - Geometry of the acquired slice
/// * `volume_geometry` - Geometry of the reconstruction volume
/// * `mode` - Covariance policy
/// * `predefined` - Covariance override, required in predefined mode
///
/// # Returns
/// 3x3 symmetric positive-definite covariance in volume coordinates
pub fn psf_covariance(
    slice_geometry: &ImageGeometry,
    volume_geometry: &ImageGeometry,
    mode: DeconvolutionMode,
    predefined: Option<&PredefinedCovariance>,
) -> Result<Matrix3<f64>, String> {
    let cov_slice = match mode {
        DeconvolutionMode::Full3D => covariance_from_spacing(slice_geometry.spacing),
        DeconvolutionMode::InPlaneOnly => {
            let mut spacing = slice_geometry.spacing;
            spacing[2] = IN_PLANE_THROUGH_PLANE_SPACING;
            covariance_from_spacing(spacing)
        }
        DeconvolutionMode::PredefinedCovariance => predefined
            .ok_or_else(|| {
                "Predefined-covariance mode requires a covariance to be supplied".to_string()
            })?
            .matrix(),
    };

    let cov = rotate_to_volume_axes(cov_slice, slice_geometry, volume_geometry);

    // Reject indefinite or singular covariances before they reach the
    // operators; Cholesky succeeds exactly for symmetric PD matrices.
    if Cholesky::new(cov).is_none() {
        return Err(format!("PSF covariance is not positive definite: {:?}", cov));
    }

    Ok(cov)
}

/// Inverse of a PSF covariance, via Cholesky factorization
pub fn psf_covariance_inverse(cov: &Matrix3<f64>) -> Result<Matrix3<f64>, String> {
    Cholesky::new(*cov)
        .map(|c| c.inverse())
        .ok_or_else(|| format!("PSF covariance is not positive definite: {:?}", cov))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(spacing: [f64; 3]) -> ImageGeometry {
        ImageGeometry::axis_aligned((8, 8, 1), spacing, [0.0; 3])
    }

    #[test]
    fn test_full_3d_diagonal_for_aligned_grids() {
        let slice = geom([1.0, 1.0, 3.0]);
        let volume = geom([1.0, 1.0, 1.0]);

        let cov = psf_covariance(&slice, &volume, DeconvolutionMode::Full3D, None).unwrap();

        let fwhm_to_var = 8.0 * (2.0f64).ln();
        assert!((cov[(0, 0)] - 1.44 / fwhm_to_var).abs() < 1e-12);
        assert!((cov[(1, 1)] - 1.44 / fwhm_to_var).abs() < 1e-12);
        assert!((cov[(2, 2)] - 9.0 / fwhm_to_var).abs() < 1e-12);
        assert!(cov[(0, 1)].abs() < 1e-15);
    }

    #[test]
    fn test_in_plane_suppresses_through_plane() {
        let slice = geom([1.0, 1.0, 3.0]);
        let volume = geom([1.0, 1.0, 1.0]);

        let full = psf_covariance(&slice, &volume, DeconvolutionMode::Full3D, None).unwrap();
        let in_plane = psf_covariance(&slice, &volume, DeconvolutionMode::InPlaneOnly, None).unwrap();

        assert!((in_plane[(0, 0)] - full[(0, 0)]).abs() < 1e-12);
        assert!(in_plane[(2, 2)] < full[(2, 2)] * 1e-9);
    }

    #[test]
    fn test_rotation_into_volume_axes() {
        let mut slice = geom([1.0, 1.0, 3.0]);
        // Slice axes rotated 90 degrees about x relative to the volume:
        // slice through-plane axis maps onto the volume y axis.
        slice.direction = [1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0];
        let volume = geom([1.0, 1.0, 1.0]);

        let cov = psf_covariance(&slice, &volume, DeconvolutionMode::Full3D, None).unwrap();

        let fwhm_to_var = 8.0 * (2.0f64).ln();
        assert!((cov[(1, 1)] - 9.0 / fwhm_to_var).abs() < 1e-10);
        assert!((cov[(2, 2)] - 1.44 / fwhm_to_var).abs() < 1e-10);
    }

    #[test]
    fn test_predefined_diagonal() {
        let slice = geom([1.0, 1.0, 3.0]);
        let volume = geom([1.0, 1.0, 1.0]);
        let predefined = PredefinedCovariance::Diagonal([0.5, 0.6, 0.7]);

        let cov = psf_covariance(
            &slice,
            &volume,
            DeconvolutionMode::PredefinedCovariance,
            Some(&predefined),
        )
        .unwrap();

        assert!((cov[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((cov[(1, 1)] - 0.6).abs() < 1e-12);
        assert!((cov[(2, 2)] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_predefined_mode_requires_covariance() {
        let slice = geom([1.0, 1.0, 3.0]);
        let volume = geom([1.0, 1.0, 1.0]);
        assert!(psf_covariance(&slice, &volume, DeconvolutionMode::PredefinedCovariance, None).is_err());
    }

    #[test]
    fn test_indefinite_predefined_rejected() {
        let slice = geom([1.0, 1.0, 3.0]);
        let volume = geom([1.0, 1.0, 1.0]);
        let predefined = PredefinedCovariance::Diagonal([1.0, -1.0, 1.0]);
        assert!(psf_covariance(
            &slice,
            &volume,
            DeconvolutionMode::PredefinedCovariance,
            Some(&predefined),
        )
        .is_err());
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("full_3d".parse::<DeconvolutionMode>().unwrap(), DeconvolutionMode::Full3D);
        assert!("fourier".parse::<DeconvolutionMode>().is_err());
    }

    #[test]
    fn test_covariance_inverse() {
        let cov = Matrix3::from_diagonal(&Vector3::new(2.0, 4.0, 8.0));
        let inv = psf_covariance_inverse(&cov).unwrap();
        assert!((inv[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((inv[(1, 1)] - 0.25).abs() < 1e-12);
        assert!((inv[(2, 2)] - 0.125).abs() < 1e-12);
    }
}
