//! Image data model: oriented 3D grids, volumes, slices and stacks
//!
//! All voxel buffers are flat `Vec<f64>` in Fortran (column-major) order
//! to match NIfTI convention: index = i + j*nx + k*nx*ny. Geometry
//! (spacing, origin, direction cosines) is carried separately so that
//! physical-space positions can be computed per voxel.

use nalgebra::{Matrix3, Vector3};

/// Tolerance used when comparing two grids for equality
const GRID_TOLERANCE: f64 = 1e-6;

/// Geometry of an oriented 3D image grid
///
/// `direction` is the 3x3 direction-cosine matrix in row-major order
/// (world rows, index columns), as stored in a NIfTI sform. A voxel
/// index (i, j, k) maps to the physical point
/// `origin + direction * diag(spacing) * (i, j, k)`.
#[derive(Clone, Debug)]
pub struct ImageGeometry {
    /// Grid dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub spacing: [f64; 3],
    /// Physical position of voxel (0, 0, 0) in mm
    pub origin: [f64; 3],
    /// Direction cosines, row-major
    pub direction: [f64; 9],
}

impl ImageGeometry {
    /// Create an axis-aligned geometry (identity direction)
    pub fn axis_aligned(dims: (usize, usize, usize), spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            dims,
            spacing,
            origin,
            direction: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Total number of voxels
    pub fn n_voxels(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Flat Fortran-order index of voxel (i, j, k)
    #[inline]
    pub fn flat_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + j * self.dims.0 + k * self.dims.0 * self.dims.1
    }

    /// Direction cosines as a matrix
    pub fn direction_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.direction)
    }

    /// Index-to-physical map `R * diag(spacing)`
    pub fn index_to_physical_matrix(&self) -> Matrix3<f64> {
        self.direction_matrix() * Matrix3::from_diagonal(&Vector3::new(
            self.spacing[0],
            self.spacing[1],
            self.spacing[2],
        ))
    }

    /// Physical position of the center of voxel (i, j, k)
    pub fn index_to_physical(&self, i: f64, j: f64, k: f64) -> Vector3<f64> {
        let m = self.index_to_physical_matrix();
        Vector3::new(self.origin[0], self.origin[1], self.origin[2]) + m * Vector3::new(i, j, k)
    }

    /// Continuous index of a physical point
    ///
    /// Returns an error when the geometry is degenerate (zero spacing or
    /// a singular direction matrix).
    pub fn physical_to_index(&self, p: &Vector3<f64>) -> Result<Vector3<f64>, String> {
        let inv = self
            .index_to_physical_matrix()
            .try_inverse()
            .ok_or_else(|| format!("Degenerate image geometry: spacing {:?}", self.spacing))?;
        let o = Vector3::new(self.origin[0], self.origin[1], self.origin[2]);
        Ok(inv * (p - o))
    }

    /// Whether two geometries describe the same grid (within tolerance)
    pub fn same_grid(&self, other: &ImageGeometry) -> bool {
        if self.dims != other.dims {
            return false;
        }
        let close = |a: f64, b: f64| (a - b).abs() < GRID_TOLERANCE;
        self.spacing.iter().zip(other.spacing.iter()).all(|(&a, &b)| close(a, b))
            && self.origin.iter().zip(other.origin.iter()).all(|(&a, &b)| close(a, b))
            && self.direction.iter().zip(other.direction.iter()).all(|(&a, &b)| close(a, b))
    }

    /// Build a geometry from a 4x4 row-major affine (NIfTI sform)
    ///
    /// Spacing is recovered as the Euclidean norm of each affine column;
    /// direction cosines are the normalized columns.
    pub fn from_affine(dims: (usize, usize, usize), affine: &[f64; 16]) -> Result<Self, String> {
        let mut spacing = [0.0; 3];
        let mut direction = [0.0; 9];
        for col in 0..3 {
            let cx = affine[col];
            let cy = affine[4 + col];
            let cz = affine[8 + col];
            let norm = (cx * cx + cy * cy + cz * cz).sqrt();
            if norm <= 0.0 {
                return Err(format!("Affine column {} has zero norm", col));
            }
            spacing[col] = norm;
            direction[col] = cx / norm;
            direction[3 + col] = cy / norm;
            direction[6 + col] = cz / norm;
        }
        Ok(Self {
            dims,
            spacing,
            origin: [affine[3], affine[7], affine[11]],
            direction,
        })
    }

    /// Convert to a 4x4 row-major affine (NIfTI sform)
    pub fn to_affine(&self) -> [f64; 16] {
        let m = self.index_to_physical_matrix();
        [
            m[(0, 0)], m[(0, 1)], m[(0, 2)], self.origin[0],
            m[(1, 0)], m[(1, 1)], m[(1, 2)], self.origin[1],
            m[(2, 0)], m[(2, 1)], m[(2, 2)], self.origin[2],
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// A 3D scalar volume: geometry plus voxel data
///
/// Geometry is immutable for the duration of a solve; only the voxel
/// buffer is replaced when a reconstruction completes.
#[derive(Clone, Debug)]
pub struct Volume {
    pub geometry: ImageGeometry,
    pub data: Vec<f64>,
}

impl Volume {
    /// Create a volume, validating the data length against the geometry
    pub fn new(geometry: ImageGeometry, data: Vec<f64>) -> Result<Self, String> {
        if data.len() != geometry.n_voxels() {
            return Err(format!(
                "Volume data length {} does not match grid {:?} ({} voxels)",
                data.len(),
                geometry.dims,
                geometry.n_voxels()
            ));
        }
        Ok(Self { geometry, data })
    }

    /// Create a zero-filled volume
    pub fn zeros(geometry: ImageGeometry) -> Self {
        let n = geometry.n_voxels();
        Self { geometry, data: vec![0.0; n] }
    }
}

/// A single acquired slice: a thin 3D image with an optional binary mask
///
/// The mask shares the slice grid exactly; supplying a mask of a
/// different length is a dimension-mismatch error. Slices are read-only
/// during reconstruction.
#[derive(Clone, Debug)]
pub struct Slice {
    pub geometry: ImageGeometry,
    pub data: Vec<f64>,
    mask: Option<Vec<u8>>,
}

impl Slice {
    /// Create an unmasked slice (treated as an all-ones mask)
    pub fn new(geometry: ImageGeometry, data: Vec<f64>) -> Result<Self, String> {
        if data.len() != geometry.n_voxels() {
            return Err(format!(
                "Slice data length {} does not match grid {:?} ({} voxels)",
                data.len(),
                geometry.dims,
                geometry.n_voxels()
            ));
        }
        Ok(Self { geometry, data, mask: None })
    }

    /// Create a masked slice; the mask must share the slice grid
    pub fn with_mask(geometry: ImageGeometry, data: Vec<f64>, mask: Vec<u8>) -> Result<Self, String> {
        let mut slice = Self::new(geometry, data)?;
        if mask.len() != slice.geometry.n_voxels() {
            return Err(format!(
                "Mask length {} does not match slice grid {:?} ({} voxels)",
                mask.len(),
                slice.geometry.dims,
                slice.geometry.n_voxels()
            ));
        }
        slice.mask = Some(mask);
        Ok(slice)
    }

    /// Attach a mask defined on its own grid; the grids must agree
    pub fn attach_mask(&mut self, mask_geometry: &ImageGeometry, mask: Vec<u8>) -> Result<(), String> {
        if !self.geometry.same_grid(mask_geometry) {
            return Err(format!(
                "Mask grid {:?} does not match slice grid {:?}",
                mask_geometry.dims, self.geometry.dims
            ));
        }
        if mask.len() != self.geometry.n_voxels() {
            return Err(format!(
                "Mask length {} does not match slice grid ({} voxels)",
                mask.len(),
                self.geometry.n_voxels()
            ));
        }
        self.mask = Some(mask);
        Ok(())
    }

    /// Number of voxels in this slice
    pub fn n_voxels(&self) -> usize {
        self.geometry.n_voxels()
    }

    /// Binary validity mask, if any
    pub fn mask(&self) -> Option<&[u8]> {
        self.mask.as_deref()
    }

    /// Multiply a slice-space buffer elementwise by the mask (in place)
    ///
    /// The masking operator is diagonal with 0/1 entries and therefore
    /// self-adjoint. Slices without a mask leave the buffer untouched.
    pub fn apply_mask(&self, buffer: &mut [f64]) {
        if let Some(mask) = &self.mask {
            for (v, &m) in buffer.iter_mut().zip(mask.iter()) {
                if m == 0 {
                    *v = 0.0;
                }
            }
        }
    }
}

/// An ordered sequence of slices from one acquisition session
#[derive(Clone, Debug, Default)]
pub struct Stack {
    pub slices: Vec<Slice>,
}

impl Stack {
    pub fn new(slices: Vec<Slice>) -> Self {
        Self { slices }
    }

    /// Total voxel count over all slices
    pub fn n_voxels(&self) -> usize {
        self.slices.iter().map(|s| s.n_voxels()).sum()
    }
}
