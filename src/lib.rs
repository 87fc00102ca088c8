//! SRR-Core: slice-to-volume super-resolution reconstruction
//!
//! This crate estimates a high-resolution 3D volume from multiple
//! motion-corrupted, lower-resolution 2D slice stacks by inverting the
//! physical slice-acquisition model y_k = M_k A_k x under first-order
//! Tikhonov regularization, subject to a nonnegativity constraint.
//!
//! # Modules
//! - `image`: volumes, slices, stacks and oriented grid geometry
//! - `psf`: per-slice Gaussian PSF covariance in volume coordinates
//! - `operators`: blur+resample forward/adjoint and gradient operators
//! - `system`: augmented linear system assembly (operator, adjoint, rhs)
//! - `solvers`: constrained least-squares backends (LSMR, projected
//!   gradient, NNLS, L-BFGS, damped Gauss-Newton)
//! - `recon`: top-level Tikhonov reconstruction entry point
//! - `fusion`: Shepard-style scattered data approximation
//! - `nifti_io`: NIfTI stack/mask reading and volume writing

// Data model
pub mod image;

// Acquisition model
pub mod psf;
pub mod operators;
pub mod system;

// Optimization
pub mod solvers;
pub mod recon;

// Alternative reconstruction
pub mod fusion;

// I/O modules
pub mod nifti_io;

pub use image::{ImageGeometry, Slice, Stack, Volume};
pub use psf::{DeconvolutionMode, PredefinedCovariance};
pub use recon::{SolverConfig, TikhonovSolver};
pub use solvers::SolverBackend;
