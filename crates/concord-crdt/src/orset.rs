//! Tag-based observed-remove set state

use std::collections::{BTreeSet, HashMap, HashSet};

use sha2::{Digest, Sha256};

use concord_core::AddTag;

use crate::Operation;

/// Element -> live add tags; an element is present iff it has a tag
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrSet {
    elements: HashMap<String, HashSet<AddTag>>,
}

impl OrSet {
    pub fn new() -> Self {
        OrSet::default()
    }

    /// Union one tag into an element's tag set
    pub fn add(&mut self, element: &str, tag: AddTag) {
        self.elements
            .entry(element.to_string())
            .or_default()
            .insert(tag);
    }

    /// Subtract `tags`; the element disappears once its set is empty
    pub fn remove<'a, I>(&mut self, element: &str, tags: I)
    where
        I: IntoIterator<Item = &'a AddTag>,
    {
        let Some(live) = self.elements.get_mut(element) else {
            return;
        };
        for tag in tags {
            live.remove(tag);
        }
        if live.is_empty() {
            self.elements.remove(element);
        }
    }

    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::Add { tag, element } => self.add(element, *tag),
            Operation::Remove { tags, element } => self.remove(element, tags),
        }
    }

    /// Snapshot of the tags currently observed for `element`
    pub fn observed(&self, element: &str) -> BTreeSet<AddTag> {
        self.elements
            .get(element)
            .map(|tags| tags.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, element: &str) -> bool {
        self.elements.contains_key(element)
    }

    /// Present elements, sorted
    pub fn elements(&self) -> BTreeSet<String> {
        self.elements.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn digest(&self) -> String {
        digest_elements(&self.elements())
    }
}

/// Hex SHA-256 of the sorted elements, each followed by a comma
///
/// Replicas holding the same elements report the same digest whatever
/// their tags are.
pub fn digest_elements(elements: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    for element in elements {
        hasher.update(element.as_bytes());
        hasher.update(b",");
    }
    hex::encode(hasher.finalize())
}
