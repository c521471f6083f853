use crate::{
    enums::SortBy,
    geometry::{Geometry, GeometryError, ReferenceGeometry},
    volume::{VolumeError, VoxelGrid},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, OpenFileOptions, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Relative tolerance on the distance between consecutive slices.
const SLICE_SPACING_TOLERANCE: f64 = 1e-2;
/// Tolerance on orientation cosines shared by all slices of a series.
const ORIENTATION_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Error)]
pub enum SeriesLoaderError {
    #[error("No valid DICOM images found in {0}")]
    NoValidImages(PathBuf),

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Inconsistent image orientation across slices")]
    InconsistentOrientation,

    #[error("Slices {0} and {1} share the same position")]
    DuplicatePosition(usize, usize),

    #[error("Non-uniform slice spacing: expected {expected:.4} mm, found {found:.4} mm")]
    NonUniformSpacing { expected: f64, found: f64 },

    #[error("Slice stack is not perpendicular to the image plane")]
    TiltedStack,

    #[error("Invalid series geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Failed to decode pixel data of {0}")]
    Decode(PathBuf),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Geometry and identification attributes of a single image slice.
#[derive(Debug, Clone)]
pub struct SliceHeader {
    pub path: PathBuf,
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    pub series_instance_uid: String,
    pub instance_number: Option<i32>,
    pub position: Vector3<f64>,
    pub row_cosine: Vector3<f64>,
    pub column_cosine: Vector3<f64>,
    /// `(row spacing, column spacing)` as stored in PixelSpacing.
    pub pixel_spacing: (f64, f64),
    pub slice_thickness: Option<f64>,
    pub rows: usize,
    pub columns: usize,
}

impl SliceHeader {
    pub fn normal(&self) -> Vector3<f64> {
        self.row_cosine.cross(&self.column_cosine)
    }
}

/// Slice headers in stacking order and the geometry derived from them.
#[derive(Debug, Clone)]
pub struct SeriesLayout {
    pub slices: Vec<SliceHeader>,
    pub geometry: Geometry,
}

/// A decoded series: the intensity volume plus the ordered slice headers.
#[derive(Debug, Clone)]
pub struct DicomSeries {
    pub volume: VoxelGrid<f32>,
    pub slices: Vec<SliceHeader>,
}

impl DicomSeries {
    pub fn reference_geometry(&self) -> ReferenceGeometry {
        ReferenceGeometry::new(self.volume.geometry().clone())
    }
}

pub struct SeriesLoader;

impl SeriesLoader {
    /// Load and decode the series stored in `path`.
    ///
    /// Every regular file in the directory is tried; files that are not
    /// DICOM images with geometry attributes are skipped. Slices are opened
    /// in parallel using rayon.
    ///
    /// # Errors
    ///
    /// Returns error if no valid series is found or its geometry is inconsistent
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<DicomSeries, SeriesLoaderError> {
        let path = path.as_ref();
        let objects: Vec<_> = Self::candidate_files(path)?
            .into_par_iter()
            .filter_map(|file| match open_file(&file) {
                Ok(object) => Some((file, object)),
                Err(e) => {
                    debug!("skipping {}: {}", file.display(), e);
                    None
                }
            })
            .collect();

        Self::load_from_dicom_objects(path, objects, sort_by)
    }

    /// Build a series from already opened objects, keyed by their file path.
    pub fn load_from_dicom_objects(
        path: &Path,
        objects: Vec<(PathBuf, FileDicomObject<InMemDicomObject>)>,
        sort_by: SortBy,
    ) -> Result<DicomSeries, SeriesLoaderError> {
        let mut by_path: HashMap<PathBuf, FileDicomObject<InMemDicomObject>> = HashMap::new();
        let mut headers = Vec::with_capacity(objects.len());
        for (file, object) in objects {
            if let Some(header) = Self::extract_header(&file, &object) {
                headers.push(header);
                by_path.insert(file, object);
            } else {
                debug!("skipping {}: missing image geometry", file.display());
            }
        }

        let layout = Self::build_layout(path, headers, sort_by)?;

        let images: Vec<Array2<f32>> = layout
            .slices
            .par_iter()
            .map(|slice| {
                by_path
                    .get(&slice.path)
                    .and_then(Self::decode_image)
                    .ok_or_else(|| SeriesLoaderError::Decode(slice.path.clone()))
            })
            .collect::<Result<_, _>>()?;

        Self::validate_dimensions(&images, &layout.geometry)?;
        let volume = VoxelGrid::new(Self::build_volume_array(&images), layout.geometry)?;
        info!(
            "loaded series {} with {} slices, dim {:?}",
            path.display(),
            layout.slices.len(),
            volume.dim()
        );

        Ok(DicomSeries {
            volume,
            slices: layout.slices,
        })
    }

    /// Parse slice headers and geometry without decoding pixel data.
    pub fn read_headers(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<SeriesLayout, SeriesLoaderError> {
        let path = path.as_ref();
        let headers: Vec<_> = Self::candidate_files(path)?
            .into_par_iter()
            .filter_map(|file| {
                let object = OpenFileOptions::new()
                    .read_until(tags::PIXEL_DATA)
                    .open_file(&file)
                    .map_err(|e| debug!("skipping {}: {}", file.display(), e))
                    .ok()?;
                Self::extract_header(&file, &object)
            })
            .collect();

        Self::build_layout(path, headers, sort_by)
    }

    fn candidate_files(path: &Path) -> Result<Vec<PathBuf>, SeriesLoaderError> {
        let paths: Vec<_> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        if paths.is_empty() {
            return Err(SeriesLoaderError::NoValidImages(path.to_path_buf()));
        }
        Ok(paths)
    }

    fn extract_header(
        path: &Path,
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Option<SliceHeader> {
        let position = Self::float_triplet(
            dicom_object
                .element(tags::IMAGE_POSITION_PATIENT)
                .ok()?
                .to_multi_float64()
                .ok()?,
        )?;
        let orientation = dicom_object
            .element(tags::IMAGE_ORIENTATION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        if orientation.len() < 6 {
            return None;
        }
        let pixel_spacing = dicom_object
            .element(tags::PIXEL_SPACING)
            .ok()?
            .to_multi_float64()
            .ok()?;
        if pixel_spacing.len() < 2 {
            return None;
        }
        let rows = dicom_object.element(tags::ROWS).ok()?.to_int::<u16>().ok()?;
        let columns = dicom_object.element(tags::COLUMNS).ok()?.to_int::<u16>().ok()?;

        Some(SliceHeader {
            path: path.to_path_buf(),
            sop_instance_uid: Self::string(dicom_object, tags::SOP_INSTANCE_UID)?,
            sop_class_uid: Self::string(dicom_object, tags::SOP_CLASS_UID).unwrap_or_default(),
            series_instance_uid: Self::string(dicom_object, tags::SERIES_INSTANCE_UID)
                .unwrap_or_default(),
            instance_number: dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|e| e.to_int::<i32>().ok()),
            position,
            row_cosine: Vector3::new(orientation[0], orientation[1], orientation[2]),
            column_cosine: Vector3::new(orientation[3], orientation[4], orientation[5]),
            pixel_spacing: (pixel_spacing[0], pixel_spacing[1]),
            slice_thickness: dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|e| e.to_float64().ok()),
            rows: rows as usize,
            columns: columns as usize,
        })
    }

    fn float_triplet(values: Vec<f64>) -> Option<Vector3<f64>> {
        (values.len() >= 3).then(|| Vector3::new(values[0], values[1], values[2]))
    }

    fn string(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: dicom::core::Tag,
    ) -> Option<String> {
        let value = dicom_object.element(tag).ok()?.to_str().ok()?;
        Some(value.trim_end_matches(['\0', ' ']).to_string())
    }

    /// Keep the largest series, order its slices and derive the grid geometry.
    fn build_layout(
        path: &Path,
        headers: Vec<SliceHeader>,
        sort_by: SortBy,
    ) -> Result<SeriesLayout, SeriesLoaderError> {
        let mut groups: HashMap<String, Vec<SliceHeader>> = HashMap::new();
        for header in headers {
            groups
                .entry(header.series_instance_uid.clone())
                .or_default()
                .push(header);
        }
        if groups.len() > 1 {
            warn!(
                "{} contains {} series, using the largest one",
                path.display(),
                groups.len()
            );
        }
        let mut slices = groups
            .into_values()
            .max_by_key(|group| group.len())
            .ok_or_else(|| SeriesLoaderError::NoValidImages(path.to_path_buf()))?;

        Self::sort_slices(&mut slices, sort_by);
        let geometry = Self::derive_geometry(&slices)?;
        Ok(SeriesLayout { slices, geometry })
    }

    fn sort_slices(slices: &mut [SliceHeader], sort_by: SortBy) {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let normal = slices[0].normal();
                slices.sort_by(|a, b| normal.dot(&a.position).total_cmp(&normal.dot(&b.position)));
            }
            SortBy::InstanceNumber => {
                slices.sort_by_key(|slice| slice.instance_number.unwrap_or(i32::MAX));
            }
        }
    }

    fn derive_geometry(slices: &[SliceHeader]) -> Result<Geometry, SeriesLoaderError> {
        let first = &slices[0];
        if slices
            .iter()
            .any(|s| s.rows != first.rows || s.columns != first.columns)
        {
            return Err(SeriesLoaderError::InconsistentDimensions);
        }
        if slices.iter().any(|s| {
            (s.row_cosine - first.row_cosine).amax() > ORIENTATION_TOLERANCE
                || (s.column_cosine - first.column_cosine).amax() > ORIENTATION_TOLERANCE
        }) {
            return Err(SeriesLoaderError::InconsistentOrientation);
        }

        let normal = first.normal();
        let (slice_direction, slice_spacing) = if slices.len() == 1 {
            (normal, first.slice_thickness.filter(|t| *t > 0.0).unwrap_or(1.0))
        } else {
            let last = &slices[slices.len() - 1];
            let span = last.position - first.position;
            let spacing = span.norm() / (slices.len() - 1) as f64;
            if spacing == 0.0 {
                return Err(SeriesLoaderError::DuplicatePosition(0, slices.len() - 1));
            }
            for (index, pair) in slices.windows(2).enumerate() {
                let step = (pair[1].position - pair[0].position).norm();
                if step == 0.0 {
                    return Err(SeriesLoaderError::DuplicatePosition(index, index + 1));
                }
                if (step - spacing).abs() > SLICE_SPACING_TOLERANCE * spacing {
                    return Err(SeriesLoaderError::NonUniformSpacing {
                        expected: spacing,
                        found: step,
                    });
                }
            }
            let slice_direction = span / span.norm();
            if slice_direction.dot(&normal).abs() < 1.0 - ORIENTATION_TOLERANCE * 10.0 {
                return Err(SeriesLoaderError::TiltedStack);
            }
            (slice_direction, spacing)
        };

        let direction =
            Matrix3::from_columns(&[first.row_cosine, first.column_cosine, slice_direction]);
        // PixelSpacing is (row spacing, column spacing); x steps along a row.
        let spacing = Vector3::new(first.pixel_spacing.1, first.pixel_spacing.0, slice_spacing);

        Ok(Geometry::new(
            [first.columns, first.rows, slices.len()],
            spacing,
            first.position,
            direction,
        )?)
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::Default)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn validate_dimensions(
        images: &[Array2<f32>],
        geometry: &Geometry,
    ) -> Result<(), SeriesLoaderError> {
        let (_, rows, columns) = geometry.array_shape();
        if images.iter().any(|img| img.dim() != (rows, columns)) {
            return Err(SeriesLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<f32>]) -> Array3<f32> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }
}
