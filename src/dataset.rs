use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use dicom_core::dictionary::DataDictionary;
use dicom_core::header::Header;
use dicom_core::value::{PrimitiveValue, Value};
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::{DefaultDicomObject, InMemDicomObject, Tag};
use dicom_pixeldata::PixelDecoder;
use thiserror::Error;

const MAX_DISPLAY_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId {
    pub group: u16,
    pub element: u16,
}

impl TagId {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }
}

impl From<Tag> for TagId {
    fn from(tag: Tag) -> Self {
        Self::new(tag.group(), tag.element())
    }
}

impl From<TagId> for Tag {
    fn from(id: TagId) -> Self {
        Tag(id.group, id.element)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

pub const PIXEL_DATA: TagId = TagId::new(0x7FE0, 0x0010);

/// One hop into a sequence: the sequence tag and a zero-based item index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemStep {
    pub sequence: TagId,
    pub item: usize,
}

/// Address of an element, either top-level or inside sequence items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementPath {
    pub items: Vec<ItemStep>,
    pub tag: TagId,
}

impl ElementPath {
    pub fn nested(items: Vec<ItemStep>, tag: TagId) -> Self {
        Self { items, tag }
    }

    pub fn is_nested(&self) -> bool {
        !self.items.is_empty()
    }

    /// The path to `tag` inside item `item` of the sequence this path names.
    pub fn child(&self, item: usize, tag: TagId) -> Self {
        let mut items = self.items.clone();
        items.push(ItemStep {
            sequence: self.tag,
            item,
        });
        Self { items, tag }
    }
}

impl From<TagId> for ElementPath {
    fn from(tag: TagId) -> Self {
        Self {
            items: Vec::new(),
            tag,
        }
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.items {
            write!(f, "{}[{}] > ", step.sequence, step.item + 1)?;
        }
        write!(f, "{}", self.tag)
    }
}

/// Value representation of an element. Unknown codes collapse into `UN`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OV,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    SV,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
    UV,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrKind {
    Text,
    Date,
    NumericString,
    Identifier,
    Numeric,
    Binary,
    Sequence,
}

impl Vr {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "AE" => Vr::AE,
            "AS" => Vr::AS,
            "AT" => Vr::AT,
            "CS" => Vr::CS,
            "DA" => Vr::DA,
            "DS" => Vr::DS,
            "DT" => Vr::DT,
            "FD" => Vr::FD,
            "FL" => Vr::FL,
            "IS" => Vr::IS,
            "LO" => Vr::LO,
            "LT" => Vr::LT,
            "OB" => Vr::OB,
            "OD" => Vr::OD,
            "OF" => Vr::OF,
            "OL" => Vr::OL,
            "OV" => Vr::OV,
            "OW" => Vr::OW,
            "PN" => Vr::PN,
            "SH" => Vr::SH,
            "SL" => Vr::SL,
            "SQ" => Vr::SQ,
            "SS" => Vr::SS,
            "ST" => Vr::ST,
            "SV" => Vr::SV,
            "TM" => Vr::TM,
            "UC" => Vr::UC,
            "UI" => Vr::UI,
            "UL" => Vr::UL,
            "UR" => Vr::UR,
            "US" => Vr::US,
            "UT" => Vr::UT,
            "UV" => Vr::UV,
            _ => Vr::UN,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FD => "FD",
            Vr::FL => "FL",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OV => "OV",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::SV => "SV",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
            Vr::UV => "UV",
        }
    }

    pub fn kind(self) -> VrKind {
        match self {
            Vr::CS | Vr::LO | Vr::LT | Vr::PN | Vr::SH | Vr::ST | Vr::UC | Vr::UT => VrKind::Text,
            Vr::DA | Vr::DT | Vr::TM => VrKind::Date,
            Vr::AS | Vr::DS | Vr::IS => VrKind::NumericString,
            Vr::AE | Vr::UI | Vr::UR => VrKind::Identifier,
            Vr::AT | Vr::FD | Vr::FL | Vr::SL | Vr::SS | Vr::SV | Vr::UL | Vr::US | Vr::UV => {
                VrKind::Numeric
            }
            Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OV | Vr::OW | Vr::UN => VrKind::Binary,
            Vr::SQ => VrKind::Sequence,
        }
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Values(Vec<String>),
    Binary { bytes: u32 },
    Sequence(Vec<Vec<TagElement>>),
    PixelFragments { fragments: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagElement {
    pub id: TagId,
    pub vr: Vr,
    pub keyword: &'static str,
    pub value: ElementValue,
}

impl TagElement {
    /// Components joined with `\`, or `None` for binary, sequence and pixel values.
    pub fn normalized(&self) -> Option<String> {
        match &self.value {
            ElementValue::Values(values) => Some(values.join("\\")),
            _ => None,
        }
    }

    pub fn display_value(&self) -> String {
        let rendered = match &self.value {
            ElementValue::Values(values) if values.is_empty() => "(empty)".to_string(),
            ElementValue::Values(values) => values.join("\\"),
            ElementValue::Binary { bytes } => format!("Binary data ({bytes} bytes)"),
            ElementValue::Sequence(items) => {
                let suffix = if items.len() == 1 { "" } else { "s" };
                format!("{} item{suffix}", items.len())
            }
            ElementValue::PixelFragments { fragments } => {
                let suffix = if *fragments == 1 { "" } else { "s" };
                format!("Pixel data ({fragments} fragment{suffix})")
            }
        };

        if rendered.chars().count() > MAX_DISPLAY_LEN {
            let mut truncated = rendered
                .chars()
                .take(MAX_DISPLAY_LEN - 3)
                .collect::<String>();
            truncated.push_str("...");
            truncated
        } else {
            rendered
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} [{}]", self.id, self.keyword, self.vr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

/// First frame of the pixel data, one stored value per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArray {
    pub rows: usize,
    pub columns: usize,
    pub bits_allocated: u16,
    pub values: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("No pixel data in this record")]
    Missing,
    #[error("Failed to decode pixel data: {0}")]
    Decode(String),
    #[error("Unsupported sample format: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub rows: usize,
    pub columns: usize,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub signed: bool,
    pub planar: bool,
}

/// One loaded record. Never mutated after construction; edits build a new value.
#[derive(Debug, Clone)]
pub struct Dataset {
    path: PathBuf,
    elements: BTreeMap<TagId, TagElement>,
    slice_index: i64,
    rescale: Rescale,
    invert: bool,
    object: DefaultDicomObject,
}

impl Dataset {
    pub fn from_object(path: PathBuf, object: DefaultDicomObject) -> Self {
        let elements = collect_elements(&object);
        let slice_index = derive_slice_index(&object);
        let rescale = Rescale {
            slope: read_float_first(&object, "RescaleSlope").unwrap_or(1.0),
            intercept: read_float_first(&object, "RescaleIntercept").unwrap_or(0.0),
        };
        let invert = read_string(&object, "PhotometricInterpretation")
            .map(|value| value.eq_ignore_ascii_case("MONOCHROME1"))
            .unwrap_or(false);

        Self {
            path,
            elements,
            slice_index,
            rescale,
            invert,
            object,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn slice_index(&self) -> i64 {
        self.slice_index
    }

    pub fn rescale(&self) -> Rescale {
        self.rescale
    }

    pub fn inverts(&self) -> bool {
        self.invert
    }

    pub fn elements(&self) -> impl Iterator<Item = &TagElement> {
        self.elements.values()
    }

    pub fn element(&self, id: TagId) -> Option<&TagElement> {
        self.elements.get(&id)
    }

    /// Walks sequence items down to the addressed element.
    pub fn element_at(&self, path: &ElementPath) -> Option<&TagElement> {
        let Some((first, rest)) = path.items.split_first() else {
            return self.element(path.tag);
        };

        let mut items = match &self.element(first.sequence)?.value {
            ElementValue::Sequence(items) => items,
            _ => return None,
        };
        let mut item = items.get(first.item)?;
        for step in rest {
            items = match &find_in_item(item, step.sequence)?.value {
                ElementValue::Sequence(items) => items,
                _ => return None,
            };
            item = items.get(step.item)?;
        }
        find_in_item(item, path.tag)
    }

    pub fn contains(&self, id: TagId) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn normalized_value(&self, id: TagId) -> Option<String> {
        self.element(id).and_then(TagElement::normalized)
    }

    pub fn has_pixel_data(&self) -> bool {
        self.contains(PIXEL_DATA)
    }

    pub(crate) fn object(&self) -> &DefaultDicomObject {
        &self.object
    }

    pub fn sample_layout(&self) -> Result<SampleLayout, SampleError> {
        let rows = read_int_first(&self.object, "Rows")
            .filter(|value| *value > 0)
            .ok_or_else(|| SampleError::Unsupported("missing or invalid Rows".to_string()))?;
        let columns = read_int_first(&self.object, "Columns")
            .filter(|value| *value > 0)
            .ok_or_else(|| SampleError::Unsupported("missing or invalid Columns".to_string()))?;
        let bits_allocated = read_int_first(&self.object, "BitsAllocated").unwrap_or(16);
        let bits_stored = read_int_first(&self.object, "BitsStored").unwrap_or(bits_allocated);

        Ok(SampleLayout {
            rows: rows as usize,
            columns: columns as usize,
            samples_per_pixel: read_int_first(&self.object, "SamplesPerPixel").unwrap_or(1) as u16,
            bits_allocated: bits_allocated.clamp(0, u16::MAX as i32) as u16,
            bits_stored: bits_stored.clamp(0, u16::MAX as i32) as u16,
            signed: read_int_first(&self.object, "PixelRepresentation") == Some(1),
            planar: read_int_first(&self.object, "PlanarConfiguration") == Some(1),
        })
    }

    /// Decodes the first frame. Colour records yield their first channel.
    pub fn samples(&self) -> Result<SampleArray, SampleError> {
        if !self.has_pixel_data() {
            return Err(SampleError::Missing);
        }
        let layout = self.sample_layout()?;
        let decoded = self
            .object
            .decode_pixel_data_frame(0)
            .map_err(|err| SampleError::Decode(err.to_string()))?;
        let values = first_frame_values(decoded.data(), &layout)?;

        Ok(SampleArray {
            rows: layout.rows,
            columns: layout.columns,
            bits_allocated: layout.bits_allocated,
            values,
        })
    }
}

pub fn first_frame_values(bytes: &[u8], layout: &SampleLayout) -> Result<Vec<i32>, SampleError> {
    let bytes_per_sample = match layout.bits_allocated {
        8 => 1,
        16 => 2,
        32 => 4,
        other => {
            return Err(SampleError::Unsupported(format!(
                "BitsAllocated={other} (only 8/16/32)"
            )))
        }
    };
    let spp = layout.samples_per_pixel as usize;
    if spp != 1 && spp != 3 {
        return Err(SampleError::Unsupported(format!(
            "SamplesPerPixel={spp} (only 1 or 3)"
        )));
    }
    if layout.bits_stored == 0 || layout.bits_stored > layout.bits_allocated {
        return Err(SampleError::Unsupported(format!(
            "BitsStored={} with BitsAllocated={}",
            layout.bits_stored, layout.bits_allocated
        )));
    }

    let pixel_count = layout
        .rows
        .checked_mul(layout.columns)
        .ok_or_else(|| SampleError::Unsupported("image dimensions overflow".to_string()))?;
    let expected = pixel_count
        .checked_mul(spp)
        .and_then(|value| value.checked_mul(bytes_per_sample))
        .ok_or_else(|| SampleError::Unsupported("image dimensions overflow".to_string()))?;
    if bytes.len() < expected {
        return Err(SampleError::Unsupported(format!(
            "pixel data holds {} bytes, expected at least {expected}",
            bytes.len()
        )));
    }

    let sample_at = |index: usize| -> i32 {
        let start = index * bytes_per_sample;
        let raw = match bytes_per_sample {
            1 => bytes[start] as u32,
            2 => u16::from_le_bytes([bytes[start], bytes[start + 1]]) as u32,
            _ => u32::from_le_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]),
        };
        stored_value(raw, layout.bits_stored, layout.signed)
    };

    // Interleaved colour keeps channel 0 every `spp` samples; planar keeps the first plane.
    let stride = if layout.planar { 1 } else { spp };
    Ok((0..pixel_count).map(|pixel| sample_at(pixel * stride)).collect())
}

fn stored_value(raw: u32, bits_stored: u16, signed: bool) -> i32 {
    let bits = u32::from(bits_stored.min(32));
    let masked = if bits >= 32 {
        raw
    } else {
        raw & ((1u32 << bits) - 1)
    };

    if signed {
        if bits >= 32 {
            return masked as i32;
        }
        let sign_bit = 1u32 << (bits - 1);
        if masked & sign_bit != 0 {
            (masked as i64 - (1i64 << bits)) as i32
        } else {
            masked as i32
        }
    } else {
        i32::try_from(masked).unwrap_or(i32::MAX)
    }
}

fn find_in_item(item: &[TagElement], id: TagId) -> Option<&TagElement> {
    item.iter().find(|element| element.id == id)
}

fn collect_elements(obj: &InMemDicomObject) -> BTreeMap<TagId, TagElement> {
    obj.iter()
        .map(|element| {
            let tag = element.tag();
            let vr = Vr::from_code(element.vr().to_string().as_ref());
            let id = TagId::from(tag);
            let keyword = StandardDataDictionary
                .by_tag(tag)
                .map(|entry| entry.alias)
                .unwrap_or("Unknown");
            let value = match element.value() {
                Value::Primitive(primitive) => primitive_value(primitive, vr),
                Value::Sequence(sequence) => ElementValue::Sequence(
                    sequence
                        .items()
                        .iter()
                        .map(|item| collect_elements(item).into_values().collect())
                        .collect(),
                ),
                Value::PixelSequence(sequence) => ElementValue::PixelFragments {
                    fragments: sequence.fragments().len(),
                },
            };

            (
                id,
                TagElement {
                    id,
                    vr,
                    keyword,
                    value,
                },
            )
        })
        .collect()
}

fn primitive_value(value: &PrimitiveValue, vr: Vr) -> ElementValue {
    match value {
        PrimitiveValue::Empty => ElementValue::Values(Vec::new()),
        PrimitiveValue::Tags(tags) => ElementValue::Values(
            tags.iter()
                .map(|tag| TagId::from(*tag).to_string())
                .collect(),
        ),
        _ if vr.kind() == VrKind::Binary => ElementValue::Binary {
            bytes: value.calculate_byte_len() as u32,
        },
        _ => ElementValue::Values(
            value
                .to_multi_str()
                .iter()
                .map(|component| trim_component(component).to_string())
                .collect(),
        ),
    }
}

pub fn trim_component(value: &str) -> &str {
    value.trim_matches(|c: char| c == ' ' || c == '\0')
}

fn derive_slice_index(obj: &InMemDicomObject) -> i64 {
    if let Some(number) = read_int_first(obj, "InstanceNumber") {
        return number as i64;
    }
    if let Some(location) = read_float_first(obj, "SliceLocation") {
        return (location * 1000.0).round() as i64;
    }
    i64::MAX
}

fn read_string(obj: &InMemDicomObject, name: &str) -> Option<String> {
    obj.element_by_name(name)
        .ok()
        .and_then(|el| el.to_str().ok())
        .map(|v| trim_component(&v).to_string())
        .filter(|v| !v.is_empty())
}

fn read_float_first(obj: &InMemDicomObject, name: &str) -> Option<f64> {
    read_string(obj, name).and_then(|s| parse_multi_valued_number(&s))
}

fn read_int_first(obj: &InMemDicomObject, name: &str) -> Option<i32> {
    read_string(obj, name).and_then(|value| {
        let first = value.split('\\').next()?.trim();
        first
            .parse::<i32>()
            .ok()
            .or_else(|| first.parse::<f64>().ok().map(|v| v.round() as i32))
    })
}

fn parse_multi_valued_number(value: &str) -> Option<f64> {
    value.split('\\').next()?.trim().parse::<f64>().ok()
}
