//! Tikhonov-regularized slice-to-volume reconstruction
//!
//! Top-level solve entry point: assembles the augmented system from the
//! acquisition stacks and the initial volume estimate, dispatches the
//! configured backend, and writes the nonnegative solution back into
//! the volume. The volume voxels are replaced only once, after the
//! solver returns, so a cancelled or failed run never leaves a
//! partially updated volume behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::image::{Stack, Volume};
use crate::psf::{DeconvolutionMode, PredefinedCovariance};
use crate::solvers::{solve_nonnegative, SolverBackend};
use crate::system::AugmentedSystem;

/// Reconstruction parameters
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// First-order regularization weight; 0 disables the gradient rows
    pub alpha: f64,
    /// Blur kernel truncation radius in standard deviations
    pub alpha_cut: f64,
    /// Iteration budget handed to the backend
    pub iter_max: usize,
    /// Optimization backend
    pub backend: SolverBackend,
    /// PSF covariance policy
    pub mode: DeconvolutionMode,
    /// Covariance override, required when `mode` is predefined
    pub predefined_covariance: Option<PredefinedCovariance>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            alpha: 0.02,
            alpha_cut: 3.0,
            iter_max: 10,
            backend: SolverBackend::Lsmr,
            mode: DeconvolutionMode::Full3D,
            predefined_covariance: None,
        }
    }
}

/// Slice-to-volume reconstruction solver
///
/// Owns the stacks (read-only), the current volume estimate and the
/// configuration for one or more solve runs. Statistics of the last run
/// are available through accessors after `run` returns.
#[derive(Debug)]
pub struct TikhonovSolver {
    stacks: Vec<Stack>,
    volume: Volume,
    config: SolverConfig,
    cancel: Option<Arc<AtomicBool>>,
    elapsed_seconds: Option<f64>,
    residual_ell2: Option<f64>,
    residual_prior: Option<f64>,
}

impl TikhonovSolver {
    /// Validate inputs and configuration, then build the solver
    ///
    /// Fails fast — before any numeric work — on an empty problem,
    /// a nonpositive iteration budget, a negative regularization
    /// weight, a nonpositive kernel cutoff, or predefined-covariance
    /// mode without a covariance.
    pub fn new(stacks: Vec<Stack>, initial_volume: Volume, config: SolverConfig) -> Result<Self, String> {
        let total_slice_voxels: usize = stacks.iter().map(|s| s.n_voxels()).sum();
        if total_slice_voxels == 0 {
            return Err("Cannot reconstruct from stacks with zero slice voxels".to_string());
        }
        if config.iter_max == 0 {
            return Err("Iteration budget must be at least 1".to_string());
        }
        if config.alpha < 0.0 {
            return Err(format!("Regularization weight must be nonnegative, got {}", config.alpha));
        }
        if config.alpha_cut <= 0.0 {
            return Err(format!("Kernel cutoff must be positive, got {}", config.alpha_cut));
        }
        if config.mode == DeconvolutionMode::PredefinedCovariance
            && config.predefined_covariance.is_none()
        {
            return Err("Predefined-covariance mode requires a covariance to be supplied".to_string());
        }

        Ok(Self {
            stacks,
            volume: initial_volume,
            config,
            cancel: None,
            elapsed_seconds: None,
            residual_ell2: None,
            residual_prior: None,
        })
    }

    /// Install a cancellation flag checked between solver iterations
    ///
    /// When set, the run stops early and the best iterate reached so
    /// far becomes the result; the volume is still updated atomically.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Run the reconstruction
    ///
    /// On success the volume voxels are replaced by the nonnegative
    /// solution and the run statistics are recorded.
    pub fn run(&mut self) -> Result<(), String> {
        let n_slices: usize = self.stacks.iter().map(|s| s.slices.len()).sum();
        println!(
            "[SRR] Reconstructing {:?} volume from {} stacks ({} slices), backend {}, alpha {}",
            self.volume.geometry.dims,
            self.stacks.len(),
            n_slices,
            self.config.backend.name(),
            self.config.alpha
        );

        let start = Instant::now();

        let system = AugmentedSystem::build(
            &self.stacks,
            &self.volume.geometry,
            self.config.mode,
            self.config.predefined_covariance.as_ref(),
            self.config.alpha_cut,
            self.config.alpha,
        )?;

        let b = system.rhs();
        let x0: Vec<f64> = self.volume.data.iter().map(|&v| v.max(0.0)).collect();

        let cancel = self.cancel.clone();
        let should_stop = move || cancel.as_ref().map_or(false, |f| f.load(Ordering::Relaxed));

        let a_op = |x: &[f64]| system.forward(x);
        let at_op = |y: &[f64]| system.adjoint(y);

        let solution = solve_nonnegative(
            self.config.backend,
            &a_op,
            &at_op,
            &b,
            Some(&x0),
            self.config.iter_max,
            &should_stop,
        )?;

        let residual_ell2 = system.residual_ell2(&solution);
        let residual_prior = system.residual_prior(&solution);
        let elapsed = start.elapsed().as_secs_f64();

        // Single atomic update of the caller-visible state.
        self.volume.data = solution;
        self.elapsed_seconds = Some(elapsed);
        self.residual_ell2 = Some(residual_ell2);
        self.residual_prior = Some(residual_prior);

        println!(
            "[SRR] Done in {:.2} s, data residual {:.6e}, prior residual {:.6e}",
            elapsed, residual_ell2, residual_prior
        );

        Ok(())
    }

    /// Current volume estimate (the reconstruction after a successful run)
    pub fn reconstruction(&self) -> &Volume {
        &self.volume
    }

    /// Consume the solver and take the volume
    pub fn into_reconstruction(self) -> Volume {
        self.volume
    }

    /// Wall-clock seconds of the last run
    pub fn elapsed_seconds(&self) -> Result<f64, String> {
        self.elapsed_seconds
            .ok_or_else(|| "Elapsed time has not been measured; run the reconstruction first".to_string())
    }

    /// Data residual Σ_k ‖M_k(A_k x − y_k)‖² of the last run
    pub fn residual_ell2(&self) -> Result<f64, String> {
        self.residual_ell2
            .ok_or_else(|| "Residual has not been computed; run the reconstruction first".to_string())
    }

    /// Prior residual ‖D x‖² of the last run
    pub fn residual_prior(&self) -> Result<f64, String> {
        self.residual_prior
            .ok_or_else(|| "Residual has not been computed; run the reconstruction first".to_string())
    }
}
