use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use nalgebra::{Matrix3, Vector3};
use nifti_rtstruct::{Geometry, emitter::rtstruct::new_uid};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Layout of a synthetic CT series.
#[derive(Debug, Clone)]
pub struct SeriesSpec {
    pub columns: usize,
    pub rows: usize,
    pub slices: usize,
    /// In-plane spacing, used for both rows and columns.
    pub pixel_spacing: f64,
    pub slice_spacing: f64,
    pub origin: [f64; 3],
    pub row_cosine: [f64; 3],
    pub column_cosine: [f64; 3],
    /// Step between consecutive instance numbers.
    pub slice_direction: [f64; 3],
}

impl SeriesSpec {
    pub fn axial(columns: usize, rows: usize, slices: usize, pixel: f64, slice: f64) -> Self {
        Self {
            columns,
            rows,
            slices,
            pixel_spacing: pixel,
            slice_spacing: slice,
            origin: [-20.0, -15.0, -40.0],
            row_cosine: [1.0, 0.0, 0.0],
            column_cosine: [0.0, 1.0, 0.0],
            slice_direction: [0.0, 0.0, 1.0],
        }
    }

    /// Geometry the loader should derive when slices are ordered by instance number.
    pub fn geometry(&self) -> Geometry {
        Geometry::new(
            [self.columns, self.rows, self.slices],
            Vector3::new(self.pixel_spacing, self.pixel_spacing, self.slice_spacing),
            Vector3::from(self.origin),
            Matrix3::from_columns(&[
                Vector3::from(self.row_cosine),
                Vector3::from(self.column_cosine),
                Vector3::from(self.slice_direction),
            ]),
        )
        .expect("fixture geometry should be valid")
    }

    fn position(&self, k: usize) -> [f64; 3] {
        let step = k as f64 * self.slice_spacing;
        [
            self.origin[0] + step * self.slice_direction[0],
            self.origin[1] + step * self.slice_direction[1],
            self.origin[2] + step * self.slice_direction[2],
        ]
    }
}

fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| format!("{v}")).collect())
}

fn put(obj: &mut InMemDicomObject, tag: dicom::core::Tag, vr: VR, value: PrimitiveValue) {
    obj.put(DataElement::new(tag, vr, value));
}

/// Write one CT image file per slice into `dir` and return their paths.
///
/// A stray non-DICOM file is written alongside.
pub fn write_ct_series(dir: &Path, spec: &SeriesSpec) -> Vec<PathBuf> {
    fs::create_dir_all(dir).expect("should have created series dir");
    fs::write(dir.join("README.txt"), "not a dicom file").expect("should have written readme");

    let study_uid = new_uid();
    let series_uid = new_uid();
    let frame_uid = new_uid();
    let pixels = spec.rows * spec.columns;

    (0..spec.slices)
        .map(|k| {
            let sop_uid = new_uid();
            let mut obj = InMemDicomObject::new_empty();
            put(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE.into());
            put(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, sop_uid.as_str().into());
            put(&mut obj, tags::MODALITY, VR::CS, "CT".into());
            put(&mut obj, tags::PATIENT_NAME, VR::PN, "Synthetic^Patient".into());
            put(&mut obj, tags::PATIENT_ID, VR::LO, "SYN-001".into());
            put(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, study_uid.as_str().into());
            put(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, series_uid.as_str().into());
            put(&mut obj, tags::FRAME_OF_REFERENCE_UID, VR::UI, frame_uid.as_str().into());
            put(&mut obj, tags::INSTANCE_NUMBER, VR::IS, (k + 1).to_string().as_str().into());
            put(&mut obj, tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&spec.position(k)));
            let mut orientation = spec.row_cosine.to_vec();
            orientation.extend_from_slice(&spec.column_cosine);
            put(&mut obj, tags::IMAGE_ORIENTATION_PATIENT, VR::DS, ds(&orientation));
            put(
                &mut obj,
                tags::PIXEL_SPACING,
                VR::DS,
                ds(&[spec.pixel_spacing, spec.pixel_spacing]),
            );
            put(&mut obj, tags::SLICE_THICKNESS, VR::DS, ds(&[spec.slice_spacing]));
            put(&mut obj, tags::ROWS, VR::US, PrimitiveValue::from(spec.rows as u16));
            put(&mut obj, tags::COLUMNS, VR::US, PrimitiveValue::from(spec.columns as u16));
            put(&mut obj, tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16));
            put(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2".into());
            put(&mut obj, tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16u16));
            put(&mut obj, tags::BITS_STORED, VR::US, PrimitiveValue::from(16u16));
            put(&mut obj, tags::HIGH_BIT, VR::US, PrimitiveValue::from(15u16));
            put(&mut obj, tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0u16));
            put(&mut obj, tags::RESCALE_INTERCEPT, VR::DS, ds(&[-1024.0]));
            put(&mut obj, tags::RESCALE_SLOPE, VR::DS, ds(&[1.0]));

            let values: Vec<u16> = (0..pixels).map(|p| (1000 + k * 10 + p % 7) as u16).collect();
            put(&mut obj, tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(values.into()));

            let file = obj
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                        .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                        .media_storage_sop_instance_uid(sop_uid.as_str()),
                )
                .expect("should have built file meta");
            let path = dir.join(format!("slice_{k:03}.dcm"));
            file.write_to_file(&path).expect("should have written slice");
            path
        })
        .collect()
}
