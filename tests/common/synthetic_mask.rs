use ndarray::{Array3, s};
use nifti::{NiftiHeader, writer::WriterOptions};
use nifti_rtstruct::Geometry;
use std::path::Path;

/// `[i, j, k]` indexed label volume with `label` inside the half-open box.
pub fn block_mask(dims: [usize; 3], lo: [usize; 3], hi: [usize; 3], label: f32) -> Array3<f32> {
    let mut data = Array3::<f32>::zeros((dims[0], dims[1], dims[2]));
    data.slice_mut(s![lo[0]..hi[0], lo[1]..hi[1], lo[2]..hi[2]])
        .fill(label);
    data
}

/// Write `data` (indexed `[i, j, k]`) as NIfTI with an sform equivalent to `geometry`.
pub fn write_mask(path: &Path, data: &Array3<f32>, geometry: &Geometry) {
    let linear = geometry.index_to_physical_matrix();
    let origin = geometry.origin();
    // LPS to RAS: negate the x and y rows.
    let sign = [-1.0, -1.0, 1.0];
    let row = |r: usize| -> [f32; 4] {
        [
            (sign[r] * linear[(r, 0)]) as f32,
            (sign[r] * linear[(r, 1)]) as f32,
            (sign[r] * linear[(r, 2)]) as f32,
            (sign[r] * origin[r]) as f32,
        ]
    };
    let spacing = geometry.spacing();
    let header = NiftiHeader {
        pixdim: [
            1.0,
            spacing[0] as f32,
            spacing[1] as f32,
            spacing[2] as f32,
            0.0,
            0.0,
            0.0,
            0.0,
        ],
        sform_code: 1,
        qform_code: 0,
        srow_x: row(0),
        srow_y: row(1),
        srow_z: row(2),
        quatern_b: 0.0,
        quatern_c: 0.0,
        quatern_d: 0.0,
        scl_slope: 1.0,
        scl_inter: 0.0,
        ..NiftiHeader::default()
    };

    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(data)
        .expect("should have written mask");
}
