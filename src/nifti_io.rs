//! NIfTI I/O boundary for stacks, masks and reconstructed volumes
//!
//! Implements the data-reader collaborator of the reconstruction core:
//! read a multi-slice stack image (.nii / .nii.gz) from disk, split it
//! into single-slice images with their own geometry, attach an optional
//! mask image sharing the stack grid, and write a reconstructed volume
//! back out. The solver itself never touches files.

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::image::{ImageGeometry, Slice, Stack, Volume};

/// A 3D NIfTI image decoded into geometry plus voxels
pub struct NiftiImage {
    pub geometry: ImageGeometry,
    /// Voxel data in Fortran order, scaling slope/intercept applied
    pub data: Vec<f64>,
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get affine transformation matrix from header
///
/// Prefers the sform when set; falls back to axis-aligned voxel scaling
/// from pixdim.
fn affine_from_header(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let x = &header.srow_x;
        let y = &header.srow_y;
        let z = &header.srow_z;
        [
            x[0] as f64, x[1] as f64, x[2] as f64, x[3] as f64,
            y[0] as f64, y[1] as f64, y[2] as f64, y[3] as f64,
            z[0] as f64, z[1] as f64, z[2] as f64, z[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Load a 3D NIfTI image from bytes
///
/// Supports both .nii and .nii.gz (gzip is auto-detected). 4D inputs
/// keep only the first timepoint.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiImage, String> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder)
            .map_err(|e| format!("Failed to read gzipped NIfTI: {}", e))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| format!("Failed to read NIfTI: {}", e))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(format!("Expected at least a 3D image, got {}D", ndim));
    }

    let scl_slope = if header.scl_slope == 0.0 { 1.0 } else { header.scl_slope as f64 };
    let scl_inter = header.scl_inter as f64;
    let affine = affine_from_header(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| format!("Failed to convert NIfTI volume: {}", e))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(format!("Expected at least a 3D array, got {}D", shape.len()));
    }
    let dims = (shape[0], shape[1], shape[2]);

    // Extract data in Fortran order (x varies fastest); 4D inputs keep
    // the first volume only.
    let mut data = Vec::with_capacity(dims.0 * dims.1 * dims.2);
    if shape.len() == 3 {
        for k in 0..dims.2 {
            for j in 0..dims.1 {
                for i in 0..dims.0 {
                    data.push(scl_slope * array[[i, j, k]] + scl_inter);
                }
            }
        }
    } else {
        for k in 0..dims.2 {
            for j in 0..dims.1 {
                for i in 0..dims.0 {
                    data.push(scl_slope * array[[i, j, k, 0]] + scl_inter);
                }
            }
        }
    }

    let geometry = ImageGeometry::from_affine(dims, &affine)?;
    Ok(NiftiImage { geometry, data })
}

/// Read a NIfTI image from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<NiftiImage, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e))?;
    load_nifti(&bytes)
}

/// Split a stack image into single-slice images
///
/// Each slice keeps the in-plane grid and gains its own origin shifted
/// along the stack's through-plane axis, so the physical position of
/// every voxel is unchanged.
pub fn split_into_slices(image: &NiftiImage) -> Result<Vec<Slice>, String> {
    let (nx, ny, nz) = image.geometry.dims;
    let plane = nx * ny;
    let mut slices = Vec::with_capacity(nz);

    for k in 0..nz {
        let origin = image.geometry.index_to_physical(0.0, 0.0, k as f64);
        let slice_geometry = ImageGeometry {
            dims: (nx, ny, 1),
            spacing: image.geometry.spacing,
            origin: [origin[0], origin[1], origin[2]],
            direction: image.geometry.direction,
        };
        let data = image.data[k * plane..(k + 1) * plane].to_vec();
        slices.push(Slice::new(slice_geometry, data)?);
    }

    Ok(slices)
}

/// Read a stack image and an optional mask image into a Stack
///
/// The mask must share the stack grid exactly; any mask voxel above
/// zero counts as valid.
pub fn read_stack(stack_path: &Path, mask_path: Option<&Path>) -> Result<Stack, String> {
    let image = read_nifti_file(stack_path)?;
    let mut slices = split_into_slices(&image)?;

    if let Some(mask_path) = mask_path {
        let mask_image = read_nifti_file(mask_path)?;
        if !mask_image.geometry.same_grid(&image.geometry) {
            return Err(format!(
                "Mask grid {:?} does not match stack grid {:?} ('{}')",
                mask_image.geometry.dims,
                image.geometry.dims,
                mask_path.display()
            ));
        }
        let (nx, ny, _) = image.geometry.dims;
        let plane = nx * ny;
        for (k, slice) in slices.iter_mut().enumerate() {
            let mask: Vec<u8> = mask_image.data[k * plane..(k + 1) * plane]
                .iter()
                .map(|&v| u8::from(v > 0.0))
                .collect();
            let geometry = slice.geometry.clone();
            slice.attach_mask(&geometry, mask)?;
        }
    }

    Ok(Stack::new(slices))
}

/// Read several stacks with optional masks, preserving order
pub fn read_stacks(
    paths: &[(std::path::PathBuf, Option<std::path::PathBuf>)],
) -> Result<Vec<Stack>, String> {
    paths
        .iter()
        .map(|(stack, mask)| read_stack(stack, mask.as_deref()))
        .collect()
}

/// Serialize a volume as uncompressed NIfTI-1 bytes
pub fn save_nifti(volume: &Volume) -> Result<Vec<u8>, String> {
    use std::io::Write;

    let (nx, ny, nz) = volume.geometry.dims;
    let affine = volume.geometry.to_affine();
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [
        1.0,
        volume.geometry.spacing[0] as f32,
        volume.geometry.spacing[1] as f32,
        volume.geometry.spacing[2] as f32,
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4-byte extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for i in 0..4 {
        header[280 + i * 4..284 + i * 4].copy_from_slice(&(affine[i] as f32).to_le_bytes());
        header[296 + i * 4..300 + i * 4].copy_from_slice(&(affine[4 + i] as f32).to_le_bytes());
        header[312 + i * 4..316 + i * 4].copy_from_slice(&(affine[8 + i] as f32).to_le_bytes());
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + volume.data.len() * 4);
    buffer.write_all(&header).map_err(|e| format!("Write header failed: {}", e))?;
    buffer.write_all(&[0u8; 4]).map_err(|e| format!("Write extension failed: {}", e))?;
    for &val in &volume.data {
        buffer
            .write_all(&(val as f32).to_le_bytes())
            .map_err(|e| format!("Write data failed: {}", e))?;
    }

    Ok(buffer)
}

/// Save a volume to a file; .nii.gz paths are gzip compressed
pub fn save_nifti_to_file(path: &Path, volume: &Volume) -> Result<(), String> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let uncompressed = save_nifti(volume)?;
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&uncompressed)
            .map_err(|e| format!("Gzip compression failed: {}", e))?;
        encoder.finish().map_err(|e| format!("Gzip finish failed: {}", e))?
    } else {
        uncompressed
    };

    std::fs::write(path, &bytes)
        .map_err(|e| format!("Failed to write file '{}': {}", path.display(), e))
}
