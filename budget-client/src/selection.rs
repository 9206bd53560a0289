//! Multi-row selection over a paginated list.
//!
//! Selection persists across pages. Range clicks extend from a fixed anchor
//! and take the anchor row's current state; the anchor itself only moves on
//! plain clicks.

use budget_core::TransactionId;
use std::collections::BTreeSet;

/// Row of the most recent plain click on the visible page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub index: usize,
    pub id: TransactionId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    selected: BTreeSet<TransactionId>,
    anchor: Option<Anchor>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> &BTreeSet<TransactionId> {
        &self.selected
    }

    /// Selected ids in ascending order, e.g. for a bulk delete.
    pub fn selected_ids(&self) -> Vec<TransactionId> {
        self.selected.iter().copied().collect()
    }

    pub fn is_selected(&self, id: TransactionId) -> bool {
        self.selected.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }

    /// Handle a click on row `index` (holding `id`) of the visible page.
    ///
    /// A plain click, or a shift-click before any anchor exists, flips `id`
    /// and makes it the anchor. A shift-click sets every row between the
    /// anchor and `index` (inclusive) to the anchor row's current state and
    /// leaves the anchor where it was.
    pub fn toggle(
        &mut self,
        id: TransactionId,
        index: usize,
        visible: &[TransactionId],
        shift_held: bool,
    ) {
        let anchor = match self.anchor {
            Some(anchor) if shift_held => anchor,
            _ => {
                if !self.selected.remove(&id) {
                    self.selected.insert(id);
                }
                self.anchor = Some(Anchor { index, id });
                return;
            }
        };

        let select = self.selected.contains(&anchor.id);
        let lo = index.min(anchor.index);
        let hi = index.max(anchor.index).min(visible.len().saturating_sub(1));
        let rows = visible.get(lo..=hi).unwrap_or_default();
        for row in rows {
            if select {
                self.selected.insert(*row);
            } else {
                self.selected.remove(row);
            }
        }
    }

    /// Whether every row of a non-empty visible page is selected.
    pub fn all_selected(&self, visible: &[TransactionId]) -> bool {
        !visible.is_empty() && visible.iter().all(|id| self.selected.contains(id))
    }

    /// Select every visible row, or deselect them all if they already are.
    /// Rows on other pages are left alone.
    pub fn select_all(&mut self, visible: &[TransactionId]) {
        if self.all_selected(visible) {
            for id in visible {
                self.selected.remove(id);
            }
        } else {
            self.selected.extend(visible.iter().copied());
        }
    }

    /// Drop ids that were on the previous page data but are gone from the
    /// current one, and forget the anchor if its row moved or vanished.
    ///
    /// Returns the ids removed from the selection.
    pub fn prune(
        &mut self,
        previous: &[TransactionId],
        current: &[TransactionId],
    ) -> Vec<TransactionId> {
        let still_visible: BTreeSet<_> = current.iter().copied().collect();
        let removed: Vec<_> = previous
            .iter()
            .copied()
            .filter(|id| !still_visible.contains(id) && self.selected.remove(id))
            .collect();

        if let Some(anchor) = self.anchor {
            if current.get(anchor.index) != Some(&anchor.id) {
                self.anchor = None;
            }
        }
        removed
    }

    /// Forget the anchor, e.g. when the visible page changes.
    pub fn reset_anchor(&mut self) {
        self.anchor = None;
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.anchor = None;
    }
}
