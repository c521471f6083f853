//! Default RTSTRUCT writer.
//!
//! Patient and study attributes are copied from the reference series, one
//! ROI is written per file and each traced boundary becomes a
//! `CLOSED_PLANAR` contour referencing the slice it lies on.

use super::{ContourEmitter, EmitterError, contour::trace_contours};
use crate::{
    enums::SortBy,
    reconciler::AlignedMask,
    series_loader::{SeriesLoader, SliceHeader},
};

use dicom::{
    core::{DataElement, Length, PrimitiveValue, Tag, VR, value::DataSetSequence},
    object::{FileMetaTableBuilder, InMemDicomObject, OpenFileOptions},
};
use dicom_dictionary_std::{tags, uids};
use nalgebra::Vector3;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Tags of the RT Structure Set and ROI Contour modules.
pub mod rt_tags {
    use dicom::core::Tag;

    pub const STRUCTURE_SET_LABEL: Tag = Tag(0x3006, 0x0002);
    pub const STRUCTURE_SET_NAME: Tag = Tag(0x3006, 0x0004);
    pub const STRUCTURE_SET_DATE: Tag = Tag(0x3006, 0x0008);
    pub const STRUCTURE_SET_TIME: Tag = Tag(0x3006, 0x0009);
    pub const REFERENCED_FRAME_OF_REFERENCE_SEQUENCE: Tag = Tag(0x3006, 0x0010);
    pub const RT_REFERENCED_STUDY_SEQUENCE: Tag = Tag(0x3006, 0x0012);
    pub const RT_REFERENCED_SERIES_SEQUENCE: Tag = Tag(0x3006, 0x0014);
    pub const CONTOUR_IMAGE_SEQUENCE: Tag = Tag(0x3006, 0x0016);
    pub const STRUCTURE_SET_ROI_SEQUENCE: Tag = Tag(0x3006, 0x0020);
    pub const ROI_NUMBER: Tag = Tag(0x3006, 0x0022);
    pub const REFERENCED_FRAME_OF_REFERENCE_UID: Tag = Tag(0x3006, 0x0024);
    pub const ROI_NAME: Tag = Tag(0x3006, 0x0026);
    pub const ROI_DISPLAY_COLOR: Tag = Tag(0x3006, 0x002A);
    pub const ROI_GENERATION_ALGORITHM: Tag = Tag(0x3006, 0x0036);
    pub const ROI_CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0039);
    pub const CONTOUR_SEQUENCE: Tag = Tag(0x3006, 0x0040);
    pub const CONTOUR_GEOMETRIC_TYPE: Tag = Tag(0x3006, 0x0042);
    pub const NUMBER_OF_CONTOUR_POINTS: Tag = Tag(0x3006, 0x0046);
    pub const CONTOUR_NUMBER: Tag = Tag(0x3006, 0x0048);
    pub const CONTOUR_DATA: Tag = Tag(0x3006, 0x0050);
    pub const RT_ROI_OBSERVATIONS_SEQUENCE: Tag = Tag(0x3006, 0x0080);
    pub const OBSERVATION_NUMBER: Tag = Tag(0x3006, 0x0082);
    pub const REFERENCED_ROI_NUMBER: Tag = Tag(0x3006, 0x0084);
    pub const RT_ROI_INTERPRETED_TYPE: Tag = Tag(0x3006, 0x00A4);
    pub const ROI_INTERPRETER: Tag = Tag(0x3006, 0x00A6);
}

use rt_tags::*;

/// Study Component Management SOP class, referenced by RT Referenced Study.
const STUDY_COMPONENT_MANAGEMENT: &str = "1.2.840.10008.3.1.2.3.1";

/// Attributes copied verbatim from the first reference slice.
const COPIED_TAGS: [Tag; 11] = [
    tags::SPECIFIC_CHARACTER_SET,
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::STUDY_INSTANCE_UID,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::STUDY_ID,
    tags::ACCESSION_NUMBER,
    tags::REFERRING_PHYSICIAN_NAME,
];

/// Writes one-ROI RT Structure Set files next to a reference CT series.
#[derive(Debug, Clone)]
pub struct RtStructEmitter {
    color: [u8; 3],
    manufacturer: String,
}

impl Default for RtStructEmitter {
    fn default() -> Self {
        Self {
            color: [255, 0, 0],
            manufacturer: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl RtStructEmitter {
    /// Assemble the RTSTRUCT dataset for `mask` without writing it.
    pub fn build(
        &self,
        mask: &AlignedMask,
        series_dir: &Path,
        roi_name: &str,
    ) -> Result<InMemDicomObject, EmitterError> {
        // Slices are matched to planes by position, so their order here is irrelevant.
        let layout = SeriesLoader::read_headers(series_dir, SortBy::ImagePositionPatient)
            .map_err(EmitterError::new)?;
        let (rows, columns, slices) = mask.dim();
        let [nx, ny, nz] = layout.geometry.dimensions();
        if (rows, columns, slices) != (ny, nx, nz) {
            return Err(EmitterError::msg(format!(
                "mask grid {:?} does not match series {} ({}x{}x{})",
                mask.dim(),
                series_dir.display(),
                ny,
                nx,
                nz
            )));
        }

        let first = &layout.slices[0];
        let reference = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(&first.path)
            .map_err(EmitterError::new)?;

        let mut obj = InMemDicomObject::new_empty();
        for tag in COPIED_TAGS {
            if let Ok(element) = reference.element(tag) {
                obj.put(element.clone());
            }
        }
        let frame_of_reference = string_of(&reference, tags::FRAME_OF_REFERENCE_UID);
        let study_uid = string_of(&reference, tags::STUDY_INSTANCE_UID);
        let series_uid = first.series_instance_uid.clone();

        let now = chrono::Local::now();
        let date = now.format("%Y%m%d").to_string();
        let time = now.format("%H%M%S").to_string();
        let sop_instance_uid = new_uid();

        put_str(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::RT_STRUCTURE_SET_STORAGE);
        put_str(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, &sop_instance_uid);
        put_str(&mut obj, tags::MODALITY, VR::CS, "RTSTRUCT");
        put_str(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, &new_uid());
        put_str(&mut obj, tags::SERIES_NUMBER, VR::IS, "1");
        put_str(&mut obj, tags::INSTANCE_NUMBER, VR::IS, "1");
        put_str(&mut obj, tags::MANUFACTURER, VR::LO, &self.manufacturer);
        put_str(&mut obj, tags::SERIES_DATE, VR::DA, &date);
        put_str(&mut obj, tags::SERIES_TIME, VR::TM, &time);
        put_str(&mut obj, STRUCTURE_SET_LABEL, VR::SH, "RTstruct");
        put_str(&mut obj, STRUCTURE_SET_NAME, VR::LO, roi_name);
        put_str(&mut obj, STRUCTURE_SET_DATE, VR::DA, &date);
        put_str(&mut obj, STRUCTURE_SET_TIME, VR::TM, &time);

        let contour_images: Vec<InMemDicomObject> =
            layout.slices.iter().map(image_reference).collect();

        let mut series_item = InMemDicomObject::new_empty();
        put_str(&mut series_item, tags::SERIES_INSTANCE_UID, VR::UI, &series_uid);
        put_sequence(&mut series_item, CONTOUR_IMAGE_SEQUENCE, contour_images);

        let mut study_item = InMemDicomObject::new_empty();
        put_str(
            &mut study_item,
            tags::REFERENCED_SOP_CLASS_UID,
            VR::UI,
            STUDY_COMPONENT_MANAGEMENT,
        );
        put_str(&mut study_item, tags::REFERENCED_SOP_INSTANCE_UID, VR::UI, &study_uid);
        put_sequence(&mut study_item, RT_REFERENCED_SERIES_SEQUENCE, vec![series_item]);

        let mut frame_item = InMemDicomObject::new_empty();
        put_str(&mut frame_item, tags::FRAME_OF_REFERENCE_UID, VR::UI, &frame_of_reference);
        put_sequence(&mut frame_item, RT_REFERENCED_STUDY_SEQUENCE, vec![study_item]);
        put_sequence(&mut obj, REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![frame_item]);

        let mut roi_item = InMemDicomObject::new_empty();
        put_str(&mut roi_item, ROI_NUMBER, VR::IS, "1");
        put_str(
            &mut roi_item,
            REFERENCED_FRAME_OF_REFERENCE_UID,
            VR::UI,
            &frame_of_reference,
        );
        put_str(&mut roi_item, ROI_NAME, VR::LO, roi_name);
        put_str(&mut roi_item, ROI_GENERATION_ALGORITHM, VR::CS, "AUTOMATIC");
        put_sequence(&mut obj, STRUCTURE_SET_ROI_SEQUENCE, vec![roi_item]);

        let contours = self.contour_items(mask, &layout.slices)?;
        info!("{} contours for ROI '{}'", contours.len(), roi_name);

        let mut roi_contour = InMemDicomObject::new_empty();
        roi_contour.put(DataElement::new(
            ROI_DISPLAY_COLOR,
            VR::IS,
            PrimitiveValue::Strs(self.color.iter().map(|c| c.to_string()).collect()),
        ));
        put_str(&mut roi_contour, REFERENCED_ROI_NUMBER, VR::IS, "1");
        put_sequence(&mut roi_contour, CONTOUR_SEQUENCE, contours);
        put_sequence(&mut obj, ROI_CONTOUR_SEQUENCE, vec![roi_contour]);

        let mut observation = InMemDicomObject::new_empty();
        put_str(&mut observation, OBSERVATION_NUMBER, VR::IS, "1");
        put_str(&mut observation, REFERENCED_ROI_NUMBER, VR::IS, "1");
        put_str(&mut observation, RT_ROI_INTERPRETED_TYPE, VR::CS, "ORGAN");
        put_str(&mut observation, ROI_INTERPRETER, VR::PN, "");
        put_sequence(&mut obj, RT_ROI_OBSERVATIONS_SEQUENCE, vec![observation]);

        Ok(obj)
    }

    /// One Contour Sequence item per traced boundary, slice by slice.
    fn contour_items(
        &self,
        mask: &AlignedMask,
        slices: &[SliceHeader],
    ) -> Result<Vec<InMemDicomObject>, EmitterError> {
        let (_, _, depth) = mask.dim();
        let tolerance = mask.geometry().spacing()[2] / 2.0;
        let mut items = Vec::new();
        for s in 0..depth {
            let Some(plane) = mask.slice(s) else {
                continue;
            };
            let origin = mask.physical_point(0, 0, s);
            let slice = slice_on_plane(slices, &origin, tolerance).ok_or_else(|| {
                EmitterError::msg(format!(
                    "no series slice lies on contour plane {s} at ({:.3}, {:.3}, {:.3})",
                    origin.x, origin.y, origin.z
                ))
            })?;
            for contour in trace_contours(plane) {
                let data: Vec<String> = contour
                    .iter()
                    .flat_map(|&(row, column)| {
                        let p = mask.physical_point(row, column, s);
                        [p.x, p.y, p.z]
                    })
                    .map(format_ds)
                    .collect();

                let mut item = InMemDicomObject::new_empty();
                let number = (items.len() + 1).to_string();
                put_sequence(&mut item, CONTOUR_IMAGE_SEQUENCE, vec![image_reference(slice)]);
                put_str(&mut item, CONTOUR_NUMBER, VR::IS, &number);
                put_str(&mut item, CONTOUR_GEOMETRIC_TYPE, VR::CS, "CLOSED_PLANAR");
                put_str(&mut item, NUMBER_OF_CONTOUR_POINTS, VR::IS, &contour.len().to_string());
                item.put(DataElement::new(
                    CONTOUR_DATA,
                    VR::DS,
                    PrimitiveValue::Strs(data.into_iter().collect()),
                ));
                items.push(item);
            }
        }
        debug!("traced {} contours over {} slices", items.len(), depth);
        Ok(items)
    }
}

/// The slice whose plane is nearest to `point` along its normal, if within `tolerance`.
fn slice_on_plane<'a>(
    slices: &'a [SliceHeader],
    point: &Vector3<f64>,
    tolerance: f64,
) -> Option<&'a SliceHeader> {
    slices
        .iter()
        .map(|slice| (slice, slice.normal().dot(&(point - slice.position)).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .filter(|(_, distance)| *distance <= tolerance)
        .map(|(slice, _)| slice)
}

impl ContourEmitter for RtStructEmitter {
    fn emit(
        &self,
        mask: &AlignedMask,
        series_dir: &Path,
        roi_name: &str,
        output: &Path,
    ) -> Result<PathBuf, EmitterError> {
        let obj = self.build(mask, series_dir, roi_name)?;
        let sop_instance_uid = string_of(&obj, tags::SOP_INSTANCE_UID);
        let file = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::RT_STRUCTURE_SET_STORAGE)
                    .media_storage_sop_instance_uid(sop_instance_uid),
            )
            .map_err(EmitterError::new)?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(EmitterError::new)?;
        }
        // Write next to the target and rename so a failure leaves no output.
        let partial = output.with_extension("dcm.partial");
        if let Err(e) = file.write_to_file(&partial) {
            let _ = fs::remove_file(&partial);
            return Err(EmitterError::new(e));
        }
        fs::rename(&partial, output).map_err(EmitterError::new)?;
        info!("saved {}", output.display());
        Ok(output.to_path_buf())
    }
}

fn image_reference(slice: &SliceHeader) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    let class_uid = if slice.sop_class_uid.is_empty() {
        uids::CT_IMAGE_STORAGE
    } else {
        slice.sop_class_uid.as_str()
    };
    put_str(&mut item, tags::REFERENCED_SOP_CLASS_UID, VR::UI, class_uid);
    put_str(
        &mut item,
        tags::REFERENCED_SOP_INSTANCE_UID,
        VR::UI,
        &slice.sop_instance_uid,
    );
    item
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_sequence(obj: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    obj.put(DataElement::new(
        tag,
        VR::SQ,
        DataSetSequence::new(items, Length::UNDEFINED),
    ));
}

fn string_of(obj: &InMemDicomObject, tag: Tag) -> String {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        .unwrap_or_default()
}

/// Decimal strings are limited to 16 characters.
fn format_ds(value: f64) -> String {
    let text = format!("{value:.4}");
    if text.len() <= 16 {
        text
    } else {
        format!("{value:.6e}")
    }
}

/// UID under the `2.25` root derived from a random UUID.
pub fn new_uid() -> String {
    format!("2.25.{}", uuid::Uuid::new_v4().as_u128())
}
