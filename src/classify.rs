use std::fmt;

use crate::dataset::{TagId, Vr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    Single(usize),
    Bulk,
}

impl EditScope {
    pub fn is_bulk(self) -> bool {
        matches!(self, EditScope::Bulk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Editable,
    VrNotEditable(Vr),
    Critical,
    SliceSpecificInBulk,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Editable => f.write_str("Editable"),
            Reason::VrNotEditable(vr) => write!(f, "VR {vr} is not editable"),
            Reason::Critical => f.write_str("Critical tag, editing could corrupt the file"),
            Reason::SliceSpecificInBulk => {
                f.write_str("Slice-specific tag, edit it one slice at a time")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub editable: bool,
    pub reason: Reason,
}

impl Classification {
    fn denied(reason: Reason) -> Self {
        Self {
            editable: false,
            reason,
        }
    }
}

pub const CRITICAL_TAGS: &[TagId] = &[
    // File meta
    TagId::new(0x0002, 0x0000),
    TagId::new(0x0002, 0x0001),
    TagId::new(0x0002, 0x0002),
    TagId::new(0x0002, 0x0003),
    TagId::new(0x0002, 0x0010),
    TagId::new(0x0002, 0x0012),
    // SOP identity
    TagId::new(0x0008, 0x0016),
    TagId::new(0x0008, 0x0018),
    // Pixel geometry
    TagId::new(0x0028, 0x0002),
    TagId::new(0x0028, 0x0004),
    TagId::new(0x0028, 0x0006),
    TagId::new(0x0028, 0x0008),
    TagId::new(0x0028, 0x0010),
    TagId::new(0x0028, 0x0011),
    TagId::new(0x0028, 0x0100),
    TagId::new(0x0028, 0x0101),
    TagId::new(0x0028, 0x0102),
    TagId::new(0x0028, 0x0103),
    TagId::new(0x7FE0, 0x0010),
];

pub const SLICE_SPECIFIC_TAGS: &[TagId] = &[
    TagId::new(0x0018, 0x5100), // PatientPosition
    TagId::new(0x0020, 0x0032), // ImagePositionPatient
    TagId::new(0x0020, 0x0037), // ImageOrientationPatient
    TagId::new(0x0020, 0x1041), // SliceLocation
    TagId::new(0x0020, 0x0013), // InstanceNumber
    TagId::new(0x0020, 0x0012), // AcquisitionNumber
    TagId::new(0x0008, 0x0032), // AcquisitionTime
    TagId::new(0x0008, 0x0033), // ContentTime
    TagId::new(0x0018, 0x0050), // SliceThickness
    TagId::new(0x0028, 0x1050), // WindowCenter
    TagId::new(0x0028, 0x1051), // WindowWidth
    TagId::new(0x0020, 0x1002), // ImagesInAcquisition
];

pub fn vr_is_editable(vr: Vr) -> bool {
    match vr {
        Vr::CS
        | Vr::LO
        | Vr::LT
        | Vr::PN
        | Vr::SH
        | Vr::ST
        | Vr::UT
        | Vr::DS
        | Vr::IS
        | Vr::AS
        | Vr::DA
        | Vr::DT
        | Vr::TM => true,
        Vr::AE
        | Vr::AT
        | Vr::FD
        | Vr::FL
        | Vr::OB
        | Vr::OD
        | Vr::OF
        | Vr::OL
        | Vr::OV
        | Vr::OW
        | Vr::SL
        | Vr::SQ
        | Vr::SS
        | Vr::SV
        | Vr::UC
        | Vr::UI
        | Vr::UL
        | Vr::UN
        | Vr::UR
        | Vr::US
        | Vr::UV => false,
    }
}

pub fn is_critical(tag: TagId) -> bool {
    CRITICAL_TAGS.contains(&tag)
}

pub fn is_slice_specific(tag: TagId) -> bool {
    SLICE_SPECIFIC_TAGS.contains(&tag)
}

pub fn classify(tag: TagId, vr: Vr, scope: EditScope) -> Classification {
    if !vr_is_editable(vr) {
        return Classification::denied(Reason::VrNotEditable(vr));
    }
    if is_critical(tag) {
        return Classification::denied(Reason::Critical);
    }
    if scope.is_bulk() && is_slice_specific(tag) {
        return Classification::denied(Reason::SliceSpecificInBulk);
    }
    Classification {
        editable: true,
        reason: Reason::Editable,
    }
}
