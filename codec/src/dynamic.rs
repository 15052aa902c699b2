//! Variable-length collections with per-element change tracking.

use std::slice;

use schema::ValueType;

use crate::holder::{Element, Holder};
use crate::mask::ElementMask;
use crate::value::FieldValue;

/// A dynamic collection of values or nested holders.
///
/// Two element masks track what a diff must carry:
///
/// - `changed`: the element was modified in place.
/// - `replaced`: the element at this index is new (pushed, inserted or
///   shifted by a removal) and must be sent in full.
///
/// Both masks are always sized to the current length; bits at or past the
/// length are clear. A length change is tracked separately so that a
/// shrink which leaves no element flagged is still reported.
#[derive(Debug, Clone, Default)]
pub struct DynamicField {
    elements: Vec<Element>,
    changed: ElementMask,
    replaced: ElementMask,
    resized: bool,
}

impl DynamicField {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
            changed: ElementMask::new(),
            replaced: ElementMask::new(),
            resized: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    /// Returns a scalar element.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&FieldValue> {
        self.get(index).and_then(Element::as_value)
    }

    /// Returns a struct element.
    #[must_use]
    pub fn holder(&self, index: usize) -> Option<&Holder> {
        self.get(index).and_then(Element::as_holder)
    }

    pub fn iter(&self) -> slice::Iter<'_, Element> {
        self.elements.iter()
    }

    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Elements modified in place since the last clear.
    #[must_use]
    pub const fn changed(&self) -> &ElementMask {
        &self.changed
    }

    /// Elements that must be resent in full.
    #[must_use]
    pub const fn replaced(&self) -> &ElementMask {
        &self.replaced
    }

    /// Returns `true` if the length changed since the last clear.
    #[must_use]
    pub const fn is_resized(&self) -> bool {
        self.resized
    }

    /// Returns `true` if element `index` is carried by the next diff.
    #[must_use]
    pub fn is_flagged(&self, index: usize) -> bool {
        self.changed.test(index) || self.replaced.test(index)
    }

    /// Iterates flagged elements in ascending order.
    pub fn flagged(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.changed.word_len()).flat_map(move |word| {
            let bits = self.changed.word(word) | self.replaced.word(word);
            let base = word * 32;
            (0..32usize)
                .filter(move |bit| (bits >> bit) & 1 != 0)
                .map(move |bit| base + bit)
        })
    }

    pub(crate) fn clear_changes(&mut self) {
        self.changed.clear_all();
        self.replaced.clear_all();
        self.resized = false;
        for element in &mut self.elements {
            element.clear_changes();
        }
    }

    pub(crate) fn mark_all(&mut self) {
        let len = self.elements.len();
        self.changed.set_range(0, len);
        self.replaced.set_range(0, len);
        for element in &mut self.elements {
            element.mark_all();
        }
    }

    pub(crate) fn push(&mut self, element: Element) {
        self.elements.push(element);
        let index = self.elements.len() - 1;
        self.fit_masks();
        self.changed.set(index);
        self.replaced.set(index);
        self.resized = true;
    }

    pub(crate) fn insert(&mut self, index: usize, element: Element) -> bool {
        if index > self.elements.len() {
            return false;
        }
        self.elements.insert(index, element);
        self.fit_masks();
        self.replace_from(index);
        self.resized = true;
        true
    }

    /// Ordered removal; every element that shifts down is flagged.
    pub(crate) fn remove(&mut self, index: usize) -> Option<Element> {
        if index >= self.elements.len() {
            return None;
        }
        let removed = self.elements.remove(index);
        self.replace_from(index);
        self.fit_masks();
        self.resized = true;
        Some(removed)
    }

    pub(crate) fn clear(&mut self) -> bool {
        if self.elements.is_empty() {
            return false;
        }
        self.elements.clear();
        self.fit_masks();
        self.resized = true;
        true
    }

    pub(crate) fn mark_changed(&mut self, index: usize) {
        self.changed.set(index);
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut [Element], &mut ElementMask, &mut ElementMask) {
        (&mut self.elements, &mut self.changed, &mut self.replaced)
    }

    /// Truncates or extends with default elements; returns `true` if the
    /// length changed. Used by the apply path.
    pub(crate) fn resize_default(&mut self, len: usize, ty: &ValueType) -> bool {
        let old = self.elements.len();
        if old == len {
            return false;
        }
        if len < old {
            self.elements.truncate(len);
        } else {
            self.elements.extend((old..len).map(|_| Element::new(ty)));
        }
        self.fit_masks();
        if len > old {
            self.changed.set_range(old, len);
        }
        self.resized = true;
        true
    }

    fn replace_from(&mut self, start: usize) {
        let len = self.elements.len();
        self.changed.set_range(start, len);
        self.replaced.set_range(start, len);
    }

    fn fit_masks(&mut self) {
        let len = self.elements.len();
        self.changed.fit_len(len);
        self.replaced.fit_len(len);
    }
}

impl PartialEq for DynamicField {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}
