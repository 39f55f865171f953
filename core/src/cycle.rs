//! Meaning cycling.
//!
//! A `MeaningCycle` holds an ordered list of items and a 1-based position
//! that wraps in both directions, so a reader can tap through the senses of a
//! word one at a time and land back on the first.

use serde::{Deserialize, Serialize};

/// Map any signed 1-based position onto `1..=len`.
///
/// `len + 1` wraps to 1 and 0 wraps to `len`. Returns 0 only when `len` is 0.
pub fn wrap_index(position: i64, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    ((i128::from(position) - 1).rem_euclid(len as i128) + 1) as usize
}

/// An item together with its place in the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleItem<'a, T> {
    pub item: &'a T,
    /// 1-based.
    pub index: usize,
    pub total: usize,
}

impl<T> CycleItem<'_, T> {
    /// "(i/N)" label for display.
    pub fn label(&self) -> String {
        format!("({}/{})", self.index, self.total)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaningCycle<T> {
    items: Vec<T>,
    /// 1-based; 0 when empty.
    position: usize,
}

impl<T> Default for MeaningCycle<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            position: 0,
        }
    }
}

impl<T> MeaningCycle<T> {
    pub fn new(items: Vec<T>) -> Self {
        let position = usize::from(!items.is_empty());
        Self { items, position }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Current 1-based position.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current(&self) -> Option<CycleItem<'_, T>> {
        self.item_at(self.position)
    }

    /// Step forward, wrapping from the last item to the first.
    pub fn advance(&mut self) -> Option<CycleItem<'_, T>> {
        self.seek(self.position as i64 + 1)
    }

    /// Step back, wrapping from the first item to the last.
    pub fn retreat(&mut self) -> Option<CycleItem<'_, T>> {
        self.seek(self.position as i64 - 1)
    }

    /// Move to `position`, wrapped onto the list.
    pub fn seek(&mut self, position: i64) -> Option<CycleItem<'_, T>> {
        self.position = wrap_index(position, self.items.len());
        self.current()
    }

    /// Item at a 1-based `position` (wrapped) without moving.
    pub fn get(&self, position: i64) -> Option<CycleItem<'_, T>> {
        self.item_at(wrap_index(position, self.items.len()))
    }

    fn item_at(&self, index: usize) -> Option<CycleItem<'_, T>> {
        if index == 0 {
            return None;
        }
        self.items.get(index - 1).map(|item| CycleItem {
            item,
            index,
            total: self.items.len(),
        })
    }

    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<T> From<Vec<T>> for MeaningCycle<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}
