//! In-memory DICOM records for unit tests.

use std::path::{Path, PathBuf};

use dicom_core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom_core::{DataElement, Length, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{DefaultDicomObject, InMemDicomObject};

use crate::dataset::Dataset;

pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

pub struct SliceFixture {
    instance_number: Option<i32>,
    text: Vec<(Tag, VR, String)>,
    rescale: Option<(f64, f64)>,
    pixels: Option<(u16, u16, Vec<u16>)>,
    sequences: Vec<(Tag, Vec<Vec<(Tag, VR, String)>>)>,
}

impl SliceFixture {
    pub fn new(instance_number: i32) -> Self {
        Self {
            instance_number: Some(instance_number),
            text: Vec::new(),
            rescale: None,
            pixels: None,
            sequences: Vec::new(),
        }
    }

    pub fn without_instance_number() -> Self {
        Self {
            instance_number: None,
            ..Self::new(0)
        }
    }

    pub fn with_text(mut self, tag: Tag, vr: VR, value: &str) -> Self {
        self.text.push((tag, vr, value.to_string()));
        self
    }

    pub fn rescale(mut self, slope: f64, intercept: f64) -> Self {
        self.rescale = Some((slope, intercept));
        self
    }

    /// Adds a sequence whose items each hold the given text elements.
    pub fn with_sequence(mut self, tag: Tag, items: &[&[(Tag, VR, &str)]]) -> Self {
        let items = items
            .iter()
            .map(|item| {
                item.iter()
                    .map(|(tag, vr, value)| (*tag, *vr, value.to_string()))
                    .collect()
            })
            .collect();
        self.sequences.push((tag, items));
        self
    }

    pub fn with_pixels(mut self, rows: u16, columns: u16, samples: Vec<u16>) -> Self {
        self.pixels = Some((rows, columns, samples));
        self
    }

    pub fn object(&self) -> DefaultDicomObject {
        let instance_uid = format!("1.2.826.0.1.3680043.2.{}", self.instance_number.unwrap_or(0));
        let mut obj = InMemDicomObject::new_empty();
        let mut put_str = |tag: Tag, vr: VR, value: &str| {
            obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };

        put_str(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE);
        put_str(tags::SOP_INSTANCE_UID, VR::UI, &instance_uid);
        put_str(tags::MODALITY, VR::CS, "CT");
        put_str(tags::STUDY_DESCRIPTION, VR::LO, "Chest");
        put_str(tags::PATIENT_NAME, VR::PN, "Doe^Jane");
        put_str(tags::PATIENT_ID, VR::LO, "P001");
        if let Some(number) = self.instance_number {
            put_str(tags::INSTANCE_NUMBER, VR::IS, &number.to_string());
        }
        if let Some((slope, intercept)) = self.rescale {
            put_str(tags::RESCALE_SLOPE, VR::DS, &slope.to_string());
            put_str(tags::RESCALE_INTERCEPT, VR::DS, &intercept.to_string());
        }
        for (tag, vr, value) in &self.text {
            put_str(*tag, *vr, value);
        }

        if let Some((rows, columns, samples)) = &self.pixels {
            put_str(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
            let mut put_us = |tag: Tag, value: u16| {
                obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
            };
            put_us(tags::SAMPLES_PER_PIXEL, 1);
            put_us(tags::ROWS, *rows);
            put_us(tags::COLUMNS, *columns);
            put_us(tags::BITS_ALLOCATED, 16);
            put_us(tags::BITS_STORED, 16);
            put_us(tags::HIGH_BIT, 15);
            put_us(tags::PIXEL_REPRESENTATION, 0);
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(samples.clone().into()),
            ));
        }

        for (tag, items) in &self.sequences {
            let items = items
                .iter()
                .map(|item| {
                    let mut child = InMemDicomObject::new_empty();
                    for (tag, vr, value) in item {
                        let value = PrimitiveValue::from(value.as_str());
                        child.put(DataElement::new(*tag, *vr, value));
                    }
                    child
                })
                .collect::<Vec<_>>();
            obj.put(DataElement::new(
                *tag,
                VR::SQ,
                Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
            ));
        }

        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(instance_uid),
        )
        .expect("fixture file meta is complete")
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.object()
            .write_all(&mut bytes)
            .expect("fixture serializes");
        bytes
    }

    pub fn dataset(&self, path: impl AsRef<Path>) -> Dataset {
        Dataset::from_object(PathBuf::from(path.as_ref()), self.object())
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref().to_path_buf();
        std::fs::write(&path, self.bytes()).expect("fixture file writes");
        path
    }
}
