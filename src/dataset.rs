//! Codec adapter: every read and write of an individual instance file goes
//! through here, built on the dicom-rs object and pixeldata APIs.

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::dictionary::{DataDictionary, TagRange};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{DefaultDicomObject, FileMetaTableBuilder, InMemDicomObject, open_file};
use dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::{StandardDataDictionary, tags, uids};
use ndarray::{Array2, s};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::record::{CatalogRecord, SeriesAttributes};
use crate::volume::Slice;

/// Attributes read at scan time that only drive the load-time normalization
/// passes and are not kept on the record.
#[derive(Debug, Clone, Default)]
pub struct ScanExtra {
    pub frames: Option<i32>,
    pub sop_class: Option<String>,
}

/// Generate a fresh DICOM UID in the UUID-derived root.
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Open one instance file.
pub fn read_file(path: &Path) -> Result<DefaultDicomObject> {
    Ok(open_file(path)?)
}

/// Open one instance file and detach the bare dataset, dropping the file
/// meta group.
pub fn read_dataset(path: &Path) -> Result<InMemDicomObject> {
    let object = open_file(path)?;
    Ok((*object).clone())
}

pub fn string_value(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn int_value(object: &InMemDicomObject, tag: Tag) -> Option<i32> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_int::<i32>().ok())
}

pub fn float_value(object: &InMemDicomObject, tag: Tag) -> Option<f64> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_float64().ok())
}

pub fn string_by_name(object: &InMemDicomObject, name: &str) -> Option<String> {
    object
        .element_by_name(name)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn float_by_name(object: &InMemDicomObject, name: &str) -> Option<f64> {
    object
        .element_by_name(name)
        .ok()
        .and_then(|element| element.to_float64().ok())
}

fn put_str(object: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    object.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_u16(object: &mut InMemDicomObject, tag: Tag, value: u16) {
    object.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
}

/// Set a decimal-string attribute addressed by its dictionary name. Used to
/// stamp non-spatial coordinate values onto written instances.
pub fn set_float_by_name(object: &mut InMemDicomObject, name: &str, value: f64) -> Result<()> {
    let entry = StandardDataDictionary
        .by_name(name)
        .ok_or_else(|| Error::Codec(format!("unknown attribute name {name}")))?;
    let tag = match &entry.tag {
        TagRange::Single(tag) => *tag,
        _ => {
            return Err(Error::Codec(format!(
                "{name} is not a single-tag attribute"
            )));
        }
    };
    put_str(object, tag, VR::DS, &value.to_string());
    Ok(())
}

/// Stamp the resolved hierarchy attributes plus a fresh instance identity
/// onto a dataset about to be written.
pub(crate) fn stamp(
    object: &mut InMemDicomObject,
    attributes: &SeriesAttributes,
    sop_uid: &str,
    instance_number: i32,
) {
    if let Some(value) = &attributes.patient_id {
        put_str(object, tags::PATIENT_ID, VR::LO, value);
    }
    if let Some(value) = &attributes.patient_name {
        put_str(object, tags::PATIENT_NAME, VR::PN, value);
    }
    if let Some(value) = &attributes.study_uid {
        put_str(object, tags::STUDY_INSTANCE_UID, VR::UI, value);
    }
    if let Some(value) = &attributes.study_description {
        put_str(object, tags::STUDY_DESCRIPTION, VR::LO, value);
    }
    if let Some(value) = &attributes.study_date {
        put_str(object, tags::STUDY_DATE, VR::DA, value);
    }
    if let Some(value) = &attributes.series_uid {
        put_str(object, tags::SERIES_INSTANCE_UID, VR::UI, value);
    }
    if let Some(value) = &attributes.series_description {
        put_str(object, tags::SERIES_DESCRIPTION, VR::LO, value);
    }
    if let Some(value) = attributes.series_number {
        put_str(object, tags::SERIES_NUMBER, VR::IS, &value.to_string());
    }
    put_str(object, tags::SOP_INSTANCE_UID, VR::UI, sop_uid);
    put_str(
        object,
        tags::INSTANCE_NUMBER,
        VR::IS,
        &instance_number.to_string(),
    );
}

/// Build a catalog record from a dataset's current attribute values.
pub(crate) fn record_of(object: &InMemDicomObject) -> CatalogRecord {
    CatalogRecord {
        patient_id: string_value(object, tags::PATIENT_ID).unwrap_or_default(),
        patient_name: string_value(object, tags::PATIENT_NAME),
        study_uid: string_value(object, tags::STUDY_INSTANCE_UID).unwrap_or_default(),
        study_description: string_value(object, tags::STUDY_DESCRIPTION),
        study_date: string_value(object, tags::STUDY_DATE),
        series_uid: string_value(object, tags::SERIES_INSTANCE_UID).unwrap_or_default(),
        series_description: string_value(object, tags::SERIES_DESCRIPTION),
        series_number: int_value(object, tags::SERIES_NUMBER),
        sop_uid: string_value(object, tags::SOP_INSTANCE_UID).unwrap_or_default(),
        instance_number: int_value(object, tags::INSTANCE_NUMBER),
        status: Default::default(),
    }
}

/// Read one file into its catalog record plus the transient attributes the
/// normalization passes need.
pub(crate) fn scan_file(path: &Path, root: &Path) -> Result<(String, CatalogRecord, ScanExtra)> {
    let object = open_file(path)?;
    let record = record_of(&object);
    let extra = ScanExtra {
        frames: int_value(&object, tags::NUMBER_OF_FRAMES),
        sop_class: string_value(&object, tags::SOP_CLASS_UID),
    };
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();
    Ok((relative, record, extra))
}

/// Decode the first frame of a dataset's pixel payload.
pub fn pixel_slice(object: &DefaultDicomObject) -> Result<Array2<u16>> {
    let decoded = object
        .decode_pixel_data()
        .map_err(|err| Error::Codec(err.to_string()))?;
    let array = decoded
        .to_ndarray::<u16>()
        .map_err(|err| Error::Codec(err.to_string()))?;
    Ok(array.slice_move(s![0, .., .., 0]))
}

/// Voxel spacing from the pixel measures. The slice distance comes from the
/// slice gap for multislice data, from the slice thickness otherwise.
pub fn spacing(object: &InMemDicomObject, multislice: bool) -> Option<(f32, f32, f32)> {
    let pixel_spacing = object
        .element(tags::PIXEL_SPACING)
        .ok()?
        .to_multi_float32()
        .ok()?;
    let distance_tag = if multislice {
        tags::SPACING_BETWEEN_SLICES
    } else {
        tags::SLICE_THICKNESS
    };
    let dz = object.element(distance_tag).ok()?.to_float32().ok()?;
    Some((
        pixel_spacing.first().copied()?,
        pixel_spacing.get(1).copied()?,
        dz,
    ))
}

/// Write a slice into a dataset: pixel module attributes, payload and
/// spatial position.
pub fn apply_slice(
    object: &mut InMemDicomObject,
    slice: &Slice,
    spacing: (f32, f32, f32),
    multislice: bool,
) {
    let (rows, columns) = slice.data().dim();
    put_u16(object, tags::ROWS, rows as u16);
    put_u16(object, tags::COLUMNS, columns as u16);
    put_u16(object, tags::BITS_ALLOCATED, 16);
    put_u16(object, tags::BITS_STORED, 16);
    put_u16(object, tags::HIGH_BIT, 15);
    put_u16(object, tags::PIXEL_REPRESENTATION, 0);
    put_u16(object, tags::SAMPLES_PER_PIXEL, 1);
    put_str(
        object,
        tags::PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        "MONOCHROME2",
    );
    object.put(DataElement::new(
        tags::PIXEL_SPACING,
        VR::DS,
        PrimitiveValue::Strs(
            vec![spacing.0.to_string(), spacing.1.to_string()].into(),
        ),
    ));
    let distance_tag = if multislice {
        tags::SPACING_BETWEEN_SLICES
    } else {
        tags::SLICE_THICKNESS
    };
    put_str(object, distance_tag, VR::DS, &spacing.2.to_string());
    put_str(
        object,
        tags::SLICE_LOCATION,
        VR::DS,
        &slice.location().to_string(),
    );
    let pixels: Vec<u16> = slice.data().iter().copied().collect();
    object.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(pixels.into()),
    ));
}

/// Write a dataset to disk as explicit VR little endian, with file meta
/// derived from its SOP class and instance identifiers.
pub fn write_dataset(object: &InMemDicomObject, path: &Path) -> Result<()> {
    let sop_class = string_value(object, tags::SOP_CLASS_UID)
        .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_string());
    let sop_uid = string_value(object, tags::SOP_INSTANCE_UID)
        .ok_or_else(|| Error::Codec(format!("{}: dataset has no SOPInstanceUID", path.display())))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(sop_class)
        .media_storage_sop_instance_uid(sop_uid);
    object
        .clone()
        .with_meta(meta)
        .map_err(|err| Error::Codec(err.to_string()))?
        .write_to_file(path)
        .map_err(|err| Error::Codec(err.to_string()))?;
    Ok(())
}

/// A minimal MR Image Storage dataset, used as the template when a volume is
/// written without a reference series.
pub fn template() -> InMemDicomObject {
    let mut object = InMemDicomObject::new_empty();
    put_str(&mut object, tags::SOP_CLASS_UID, VR::UI, uids::MR_IMAGE_STORAGE);
    put_str(&mut object, tags::MODALITY, VR::CS, "MR");
    object
}

/// Convert a multiframe file into one single-frame file per frame, written
/// next to the original. The original file is left in place; the caller
/// decides its fate based on the outcome.
pub fn split_multiframe(path: &Path) -> Result<Vec<PathBuf>> {
    let object = open_file(path)?;
    let decoded = object
        .decode_pixel_data()
        .map_err(|err| Error::Codec(err.to_string()))?;
    let array = decoded
        .to_ndarray::<u16>()
        .map_err(|err| Error::Codec(err.to_string()))?;
    let frames = array.shape()[0];

    let base = (*object).clone();
    let location = float_value(&base, tags::SLICE_LOCATION).unwrap_or(0.0);
    let step = float_value(&base, tags::SPACING_BETWEEN_SLICES)
        .or_else(|| float_value(&base, tags::SLICE_THICKNESS))
        .unwrap_or(1.0);
    let directory = path.parent().unwrap_or_else(|| Path::new("."));

    let mut produced = Vec::with_capacity(frames);
    for frame in 0..frames {
        let mut dataset = base.clone();
        let pixels: Vec<u16> = array.slice(s![frame, .., .., 0]).iter().copied().collect();
        dataset.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(pixels.into()),
        ));
        put_str(&mut dataset, tags::NUMBER_OF_FRAMES, VR::IS, "1");
        put_str(&mut dataset, tags::SOP_INSTANCE_UID, VR::UI, &new_uid());
        put_str(
            &mut dataset,
            tags::INSTANCE_NUMBER,
            VR::IS,
            &(frame as i32 + 1).to_string(),
        );
        put_str(
            &mut dataset,
            tags::SLICE_LOCATION,
            VR::DS,
            &(location + frame as f64 * step).to_string(),
        );
        let file = directory.join(format!("{}.dcm", new_uid()));
        write_dataset(&dataset, &file)?;
        produced.push(file);
    }
    Ok(produced)
}
