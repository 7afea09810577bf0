use std::sync::Arc;

use crate::dataset::{Dataset, TagId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    Present(String),
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueGroup {
    pub key: GroupKey,
    pub members: Vec<usize>,
}

/// Partition of dataset indices by a tag's normalized value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyGroup {
    pub tag: Option<TagId>,
    pub groups: Vec<ValueGroup>,
}

impl ConsistencyGroup {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn present_groups(&self) -> impl Iterator<Item = &ValueGroup> {
        self.groups
            .iter()
            .filter(|group| matches!(group.key, GroupKey::Present(_)))
    }

    pub fn distinct_values(&self) -> Vec<&str> {
        self.present_groups()
            .filter_map(|group| match &group.key {
                GroupKey::Present(value) => Some(value.as_str()),
                GroupKey::Absent => None,
            })
            .collect()
    }

    pub fn is_consistent(&self) -> bool {
        self.present_groups().count() <= 1
    }

    pub fn present_count(&self) -> usize {
        self.present_groups().map(|group| group.members.len()).sum()
    }

    pub fn absent_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|group| group.key == GroupKey::Absent)
            .map(|group| group.members.len())
            .sum()
    }

    /// `same value`, or `Mixed values: a, b, c...` listing at most `limit` values.
    pub fn summary(&self, limit: usize) -> String {
        let values = self.distinct_values();
        if values.len() <= 1 {
            return "same value".to_string();
        }

        let shown = values
            .iter()
            .take(limit)
            .map(|value| if value.is_empty() { "(empty)" } else { value })
            .collect::<Vec<_>>()
            .join(", ");
        if values.len() > limit {
            format!("Mixed values: {shown}...")
        } else {
            format!("Mixed values: {shown}")
        }
    }
}

pub fn analyze(tag: TagId, datasets: &[Arc<Dataset>]) -> ConsistencyGroup {
    let mut groups: Vec<ValueGroup> = Vec::new();
    let mut any_present = false;

    for (index, dataset) in datasets.iter().enumerate() {
        let key = match dataset.element(tag) {
            Some(element) => {
                any_present = true;
                GroupKey::Present(element.normalized().unwrap_or_else(|| element.display_value()))
            }
            None => GroupKey::Absent,
        };

        match groups.iter_mut().find(|group| group.key == key) {
            Some(group) => group.members.push(index),
            None => groups.push(ValueGroup {
                key,
                members: vec![index],
            }),
        }
    }

    if !any_present {
        return ConsistencyGroup::default();
    }
    ConsistencyGroup {
        tag: Some(tag),
        groups,
    }
}
