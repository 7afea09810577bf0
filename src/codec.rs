use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom_core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom_core::{DataElement, Length, VR};
use dicom_object::{from_reader, DefaultDicomObject, InMemDicomObject, ReadError};
use thiserror::Error;

use crate::dataset::{Dataset, ElementPath, ItemStep, TagId, Vr, VrKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("Could not serialize {}: {message}", .path.display())]
    Serialize { path: PathBuf, message: String },
    #[error("Could not set {tag}: {message}")]
    Value { tag: TagId, message: String },
}

/// Boundary to the DICOM container library.
pub trait Codec: Send + Sync {
    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<Dataset, CodecError>;

    fn serialize(&self, dataset: &Dataset) -> Result<Vec<u8>, CodecError>;

    /// Builds a new dataset with the element at `path` set to `value`. The input is left untouched.
    fn with_value(
        &self,
        dataset: &Dataset,
        path: &ElementPath,
        vr: Vr,
        value: &str,
    ) -> Result<Dataset, CodecError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DicomCodec;

impl Codec for DicomCodec {
    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<Dataset, CodecError> {
        let object = open_dicom_bytes(path, bytes).map_err(|err| CodecError::Parse {
            path: path.to_path_buf(),
            message: format!("{err:#}"),
        })?;
        Ok(Dataset::from_object(path.to_path_buf(), object))
    }

    fn serialize(&self, dataset: &Dataset) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        dataset
            .object()
            .write_all(&mut bytes)
            .map_err(|err| CodecError::Serialize {
                path: dataset.path().to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(bytes)
    }

    fn with_value(
        &self,
        dataset: &Dataset,
        path: &ElementPath,
        vr: Vr,
        value: &str,
    ) -> Result<Dataset, CodecError> {
        let object = replace_text_value(dataset.object(), path, vr, value).map_err(|err| {
            CodecError::Value {
                tag: path.tag,
                message: format!("{err:#}"),
            }
        })?;
        Ok(Dataset::from_object(dataset.path().to_path_buf(), object))
    }
}

fn replace_text_value(
    object: &DefaultDicomObject,
    path: &ElementPath,
    vr: Vr,
    value: &str,
) -> Result<DefaultDicomObject> {
    if matches!(vr.kind(), VrKind::Binary | VrKind::Sequence | VrKind::Numeric) {
        bail!("{vr} values are not stored as text");
    }

    let primitive = if value.is_empty() {
        PrimitiveValue::Empty
    } else if value.contains('\\') {
        PrimitiveValue::Strs(value.split('\\').map(str::to_string).collect())
    } else {
        PrimitiveValue::from(value)
    };

    let mut edited = object.clone();
    put_text_at(&mut edited, &path.items, path.tag, primitive)?;
    Ok(edited)
}

/// Replaces the leaf inside the addressed item, then re-puts each enclosing sequence.
fn put_text_at(
    object: &mut InMemDicomObject,
    steps: &[ItemStep],
    tag: TagId,
    primitive: PrimitiveValue,
) -> Result<()> {
    let Some((step, rest)) = steps.split_first() else {
        let existing_vr = object
            .element(tag.into())
            .with_context(|| format!("{tag} is not present"))?
            .vr();
        object.put(DataElement::new(tag.into(), existing_vr, primitive));
        return Ok(());
    };

    let mut items = object
        .element(step.sequence.into())
        .with_context(|| format!("{} is not present", step.sequence))?
        .items()
        .with_context(|| format!("{} is not a sequence", step.sequence))?
        .to_vec();
    let item = items
        .get_mut(step.item)
        .with_context(|| format!("{} has no item {}", step.sequence, step.item + 1))?;
    put_text_at(item, rest, tag, primitive)?;

    object.put(DataElement::new(
        step.sequence.into(),
        VR::SQ,
        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
    ));
    Ok(())
}

fn open_dicom_bytes(path: &Path, bytes: &[u8]) -> Result<DefaultDicomObject> {
    match read_object(bytes) {
        Ok(obj) => Ok(obj),
        Err(err) => {
            if is_missing_meta_group_length_error(&err) {
                if let Some(repaired) = repair_missing_meta_group_length(bytes) {
                    log::info!(
                        "Repairing missing File Meta Information Group Length in {}",
                        path.display()
                    );
                    return read_object(&repaired).with_context(|| {
                        format!(
                            "Could not open {} after repairing missing File Meta Information Group Length (0002,0000)",
                            path.display()
                        )
                    });
                }
            }

            Err(err).with_context(|| format!("Could not open {}", path.display()))
        }
    }
}

/// Reads from the `DICM` magic onward, skipping the 128-byte preamble when one is present.
fn read_object(bytes: &[u8]) -> std::result::Result<DefaultDicomObject, ReadError> {
    let start = match detect_dicom_prefix_offset(bytes) {
        Some(132) => 128,
        _ => 0,
    };
    from_reader(Cursor::new(bytes[start..].to_vec()))
}

fn is_missing_meta_group_length_error(error: &ReadError) -> bool {
    matches!(
        error,
        ReadError::ParseMetaDataSet {
            source: dicom_object::meta::Error::UnexpectedTag { tag, .. }
        } if tag.group() == 0x0002 && tag.element() != 0x0000
    )
}

fn repair_missing_meta_group_length(bytes: &[u8]) -> Option<Vec<u8>> {
    let offset = detect_dicom_prefix_offset(bytes)?;
    if bytes.len() < offset + 4 {
        return None;
    }

    let first_group = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
    let first_element = u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]);
    if first_group != 0x0002 || first_element == 0x0000 {
        return None;
    }

    let group_len = u32::try_from(meta_group_len(bytes, offset)?).ok()?;

    let mut repaired = Vec::with_capacity(bytes.len() + 12);
    repaired.extend_from_slice(&bytes[..offset]);
    repaired.extend_from_slice(&group_length_element(group_len));
    repaired.extend_from_slice(&bytes[offset..]);
    Some(repaired)
}

fn detect_dicom_prefix_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        return Some(132);
    }
    if bytes.len() >= 4 && &bytes[..4] == b"DICM" {
        return Some(4);
    }
    None
}

/// Byte length of the group 0002 elements starting at `start`, which are always explicit VR.
fn meta_group_len(bytes: &[u8], start: usize) -> Option<usize> {
    let mut position = start;
    while position + 8 <= bytes.len() {
        let group = u16::from_le_bytes([bytes[position], bytes[position + 1]]);
        if group != 0x0002 {
            break;
        }

        let vr = [bytes[position + 4], bytes[position + 5]];
        let (header_len, value_len) = explicit_vr_element_length(bytes, position, vr)?;
        let next = position
            .checked_add(header_len)?
            .checked_add(value_len as usize)?;
        if next > bytes.len() {
            return None;
        }
        position = next;
    }

    (position > start).then(|| position - start)
}

fn explicit_vr_element_length(bytes: &[u8], position: usize, vr: [u8; 2]) -> Option<(usize, u32)> {
    let long_form = Vr::from_code(std::str::from_utf8(&vr).ok()?);
    let uses_u32_len = matches!(
        long_form,
        Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OV | Vr::OW | Vr::SQ | Vr::SV | Vr::UC | Vr::UR
            | Vr::UT | Vr::UN | Vr::UV
    );

    if uses_u32_len {
        let raw = bytes.get(position + 8..position + 12)?;
        let value_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if value_len == u32::MAX {
            return None;
        }
        Some((12, value_len))
    } else {
        let value_len = u16::from_le_bytes([bytes[position + 6], bytes[position + 7]]) as u32;
        Some((8, value_len))
    }
}

fn group_length_element(group_len: u32) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..2].copy_from_slice(&0x0002u16.to_le_bytes());
    out[2..4].copy_from_slice(&0x0000u16.to_le_bytes());
    out[4..6].copy_from_slice(b"UL");
    out[6..8].copy_from_slice(&4u16.to_le_bytes());
    out[8..12].copy_from_slice(&group_len.to_le_bytes());
    out
}
