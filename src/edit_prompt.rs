use crate::classify::{classify, Classification, EditScope};
use crate::consistency::analyze;
use crate::dataset::{ElementPath, Vr};
use crate::registry::DatasetRegistry;

const SUMMARY_LIMIT: usize = 3;

/// Everything an edit dialog needs to show, decided before it opens.
#[derive(Debug, Clone, PartialEq)]
pub struct EditPrompt {
    pub path: ElementPath,
    pub keyword: &'static str,
    pub vr: Vr,
    pub index: usize,
    pub current_value: String,
    pub single: Classification,
    pub bulk: Option<BulkPreview>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkPreview {
    pub classification: Classification,
    pub target_count: usize,
    pub banner: String,
}

impl EditPrompt {
    /// Returns `None` when the record or the element is missing.
    pub fn build(
        registry: &DatasetRegistry,
        index: usize,
        path: impl Into<ElementPath>,
    ) -> Option<Self> {
        let path = path.into();
        let tag = path.tag;
        let dataset = registry.get(index)?;
        let element = dataset.element_at(&path)?;

        // Nested elements are addressed per record and never offered in bulk.
        let bulk = (registry.len() > 1 && !path.is_nested()).then(|| {
            let groups = analyze(tag, registry.datasets());
            let target_count = groups.present_count();
            let suffix = if target_count == 1 { "" } else { "s" };
            BulkPreview {
                classification: classify(tag, element.vr, EditScope::Bulk),
                target_count,
                banner: format!(
                    "Will update {target_count} file{suffix} ({})",
                    groups.summary(SUMMARY_LIMIT)
                ),
            }
        });

        Some(Self {
            path,
            keyword: element.keyword,
            vr: element.vr,
            index,
            current_value: element.normalized().unwrap_or_else(|| element.display_value()),
            single: classify(tag, element.vr, EditScope::Single(index)),
            bulk,
        })
    }

    pub fn read_only(&self) -> bool {
        !self.single.editable
    }

    /// Bulk is offered by default whenever it is allowed, matching how multi-file sessions edit.
    pub fn default_scope(&self) -> EditScope {
        match &self.bulk {
            Some(preview) if preview.classification.editable => EditScope::Bulk,
            _ => EditScope::Single(self.index),
        }
    }

    pub fn title(&self) -> String {
        format!("{} {} [{}]", self.path, self.keyword, self.vr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    /// Carries the path the dialog was opened for, whatever is selected when it closes.
    Submit {
        path: ElementPath,
        value: String,
        scope: EditScope,
    },
    Cancel,
}

/// Capability the viewer implements to run an edit dialog.
pub trait PromptSurface {
    fn present(&mut self, prompt: EditPrompt);

    /// Takes the operator's answer once the dialog closes.
    fn read_result(&mut self) -> Option<PromptResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Reason;
    use crate::dataset::TagId;
    use crate::fixtures::SliceFixture;
    use dicom_core::VR;
    use dicom_dictionary_std::tags;

    const PATIENT_NAME: TagId = TagId::new(0x0010, 0x0010);
    const OPERATOR: TagId = TagId::new(0x0008, 0x1070);
    const INSTANCE_NUMBER: TagId = TagId::new(0x0020, 0x0013);

    #[test]
    fn bulk_banner_reports_same_value() {
        let registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(1).dataset("a.dcm"),
            SliceFixture::new(2).dataset("b.dcm"),
        ]);
        let prompt = EditPrompt::build(&registry, 0, PATIENT_NAME).expect("prompt");

        let bulk = prompt.bulk.as_ref().expect("bulk preview");
        assert_eq!(bulk.banner, "Will update 2 files (same value)");
        assert_eq!(prompt.default_scope(), EditScope::Bulk);
        assert_eq!(prompt.current_value, "Doe^Jane");
    }

    #[test]
    fn bulk_banner_lists_mixed_values_for_present_records() {
        let registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(1).with_text(tags::OPERATORS_NAME, VR::PN, "A"),
            SliceFixture::new(2).with_text(tags::OPERATORS_NAME, VR::PN, "B"),
            SliceFixture::new(3),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, fixture)| fixture.dataset(format!("{index}.dcm")))
        .collect());
        let prompt = EditPrompt::build(&registry, 1, OPERATOR).expect("prompt");

        assert_eq!(
            prompt.bulk.expect("bulk preview").banner,
            "Will update 2 files (Mixed values: A, B)"
        );
    }

    #[test]
    fn slice_specific_tag_defaults_to_single_scope() {
        let registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(1).dataset("a.dcm"),
            SliceFixture::new(2).dataset("b.dcm"),
        ]);
        let prompt = EditPrompt::build(&registry, 1, INSTANCE_NUMBER).expect("prompt");

        assert!(!prompt.read_only());
        assert_eq!(prompt.default_scope(), EditScope::Single(1));
        assert_eq!(
            prompt.bulk.expect("bulk preview").classification.reason,
            Reason::SliceSpecificInBulk
        );
    }

    #[test]
    fn single_record_has_no_bulk_preview_and_missing_tag_has_no_prompt() {
        let registry = DatasetRegistry::from_datasets(vec![SliceFixture::new(1).dataset("a.dcm")]);
        let prompt = EditPrompt::build(&registry, 0, PATIENT_NAME).expect("prompt");
        assert!(prompt.bulk.is_none());
        assert!(EditPrompt::build(&registry, 0, OPERATOR).is_none());

        let sop = TagId::new(0x0008, 0x0018);
        assert!(EditPrompt::build(&registry, 0, sop).expect("prompt").read_only());
    }

    #[test]
    fn nested_element_prompt_is_single_scope_only() {
        let fixture = |number| {
            SliceFixture::new(number).with_sequence(
                tags::REQUEST_ATTRIBUTES_SEQUENCE,
                &[&[(tags::REQUESTED_PROCEDURE_ID, VR::SH, "RP1")]],
            )
        };
        let registry = DatasetRegistry::from_datasets(vec![
            fixture(1).dataset("a.dcm"),
            fixture(2).dataset("b.dcm"),
        ]);
        let path = ElementPath::from(TagId::from(tags::REQUEST_ATTRIBUTES_SEQUENCE))
            .child(0, TagId::from(tags::REQUESTED_PROCEDURE_ID));
        let prompt = EditPrompt::build(&registry, 1, path.clone()).expect("prompt");

        assert_eq!(prompt.path, path);
        assert_eq!(prompt.current_value, "RP1");
        assert!(!prompt.read_only());
        assert!(prompt.bulk.is_none());
        assert_eq!(prompt.default_scope(), EditScope::Single(1));
        assert_eq!(prompt.title(), "(0040,0275)[1] > (0040,1001) RequestedProcedureID [SH]");
    }
}
