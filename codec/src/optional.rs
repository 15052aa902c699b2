//! Optional fields with inline or boxed storage.

use schema::OptionalStorage;

use crate::holder::{Element, Holder};
use crate::value::FieldValue;

#[derive(Debug, Clone)]
enum OptionalSlot {
    Inline(Option<Element>),
    Boxed(Option<Box<Element>>),
}

/// A field that may be absent.
///
/// `constructed` is set when the value appears (or is replaced wholesale)
/// and cleared with the owning holder's change state; while set, the next
/// diff carries the value in full.
#[derive(Debug, Clone)]
pub struct OptionalField {
    slot: OptionalSlot,
    constructed: bool,
}

impl OptionalField {
    #[must_use]
    pub const fn new(storage: OptionalStorage) -> Self {
        let slot = match storage {
            OptionalStorage::Inline => OptionalSlot::Inline(None),
            OptionalStorage::Boxed => OptionalSlot::Boxed(None),
        };
        Self {
            slot,
            constructed: false,
        }
    }

    #[must_use]
    pub const fn storage(&self) -> OptionalStorage {
        match self.slot {
            OptionalSlot::Inline(_) => OptionalStorage::Inline,
            OptionalSlot::Boxed(_) => OptionalStorage::Boxed,
        }
    }

    #[must_use]
    pub fn is_some(&self) -> bool {
        self.get().is_some()
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.get().is_none()
    }

    #[must_use]
    pub fn get(&self) -> Option<&Element> {
        match &self.slot {
            OptionalSlot::Inline(slot) => slot.as_ref(),
            OptionalSlot::Boxed(slot) => slot.as_deref(),
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&FieldValue> {
        self.get().and_then(Element::as_value)
    }

    #[must_use]
    pub fn holder(&self) -> Option<&Holder> {
        self.get().and_then(Element::as_holder)
    }

    /// Returns `true` if the value was created since the last clear.
    #[must_use]
    pub const fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Element> {
        match &mut self.slot {
            OptionalSlot::Inline(slot) => slot.as_mut(),
            OptionalSlot::Boxed(slot) => slot.as_deref_mut(),
        }
    }

    /// Replaces the value wholesale.
    pub(crate) fn insert(&mut self, element: Element) -> &mut Element {
        self.constructed = true;
        match &mut self.slot {
            OptionalSlot::Inline(slot) => slot.insert(element),
            OptionalSlot::Boxed(slot) => &mut **slot.insert(Box::new(element)),
        }
    }

    pub(crate) fn get_or_insert_with(&mut self, make: impl FnOnce() -> Element) -> &mut Element {
        if self.is_none() {
            self.constructed = true;
        }
        match &mut self.slot {
            OptionalSlot::Inline(slot) => slot.get_or_insert_with(make),
            OptionalSlot::Boxed(slot) => &mut **slot.get_or_insert_with(|| Box::new(make())),
        }
    }

    pub(crate) fn take(&mut self) -> Option<Element> {
        self.constructed = false;
        match &mut self.slot {
            OptionalSlot::Inline(slot) => slot.take(),
            OptionalSlot::Boxed(slot) => slot.take().map(|boxed| *boxed),
        }
    }

    pub(crate) fn clear_changes(&mut self) {
        self.constructed = false;
        if let Some(element) = self.get_mut() {
            element.clear_changes();
        }
    }

    pub(crate) fn mark_all(&mut self) {
        self.constructed = self.is_some();
        if let Some(element) = self.get_mut() {
            element.mark_all();
        }
    }
}

impl PartialEq for OptionalField {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_is_preserved() {
        assert_eq!(
            OptionalField::new(OptionalStorage::Boxed).storage(),
            OptionalStorage::Boxed
        );
        assert_eq!(
            OptionalField::new(OptionalStorage::Inline).storage(),
            OptionalStorage::Inline
        );
    }

    #[test]
    fn insert_sets_constructed_and_take_clears() {
        for storage in [OptionalStorage::Inline, OptionalStorage::Boxed] {
            let mut field = OptionalField::new(storage);
            assert!(field.is_none());
            field.insert(Element::Value(FieldValue::UInt(4)));
            assert!(field.is_constructed());
            assert_eq!(field.value(), Some(&FieldValue::UInt(4)));
            field.clear_changes();
            assert!(!field.is_constructed());
            assert_eq!(field.take(), Some(Element::Value(FieldValue::UInt(4))));
            assert!(field.is_none());
        }
    }

    #[test]
    fn get_or_insert_keeps_existing() {
        let mut field = OptionalField::new(OptionalStorage::Inline);
        field.insert(Element::Value(FieldValue::UInt(1)));
        field.clear_changes();
        field.get_or_insert_with(|| Element::Value(FieldValue::UInt(2)));
        assert!(!field.is_constructed());
        assert_eq!(field.value(), Some(&FieldValue::UInt(1)));
    }

    #[test]
    fn equality_ignores_storage_and_flags() {
        let mut a = OptionalField::new(OptionalStorage::Inline);
        let mut b = OptionalField::new(OptionalStorage::Boxed);
        assert_eq!(a, b);
        a.insert(Element::Value(FieldValue::Bool(true)));
        b.insert(Element::Value(FieldValue::Bool(true)));
        b.clear_changes();
        assert_eq!(a, b);
    }
}
