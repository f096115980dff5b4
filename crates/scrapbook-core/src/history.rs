//! Snapshot-based undo/redo.

use crate::elements::Element;

/// Two stacks of whole-array snapshots.
///
/// Every snapshot is a full copy of the element list, so memory is bounded by
/// `limit * elements`. The oldest undo snapshot is dropped once `limit` is
/// exceeded.
#[derive(Debug, Clone, Default)]
pub struct History {
    undo_stack: Vec<Vec<Element>>,
    redo_stack: Vec<Vec<Element>>,
    limit: Option<usize>,
}

impl History {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit,
        }
    }

    /// Record the state before a new mutation. Clears the redo stack.
    pub fn record(&mut self, previous: Vec<Element>) {
        self.undo_stack.push(previous);
        self.redo_stack.clear();
        self.enforce_limit();
    }

    /// Pop the latest undo snapshot, stashing `current` for redo.
    /// Returns `None` (and changes nothing) when there is nothing to undo.
    pub fn undo(&mut self, current: Vec<Element>) -> Option<Vec<Element>> {
        let snapshot = self.undo_stack.pop()?;
        self.redo_stack.push(current);
        Some(snapshot)
    }

    /// Pop the latest redo snapshot, stashing `current` for undo.
    pub fn redo(&mut self, current: Vec<Element>) -> Option<Vec<Element>> {
        let snapshot = self.redo_stack.pop()?;
        self.undo_stack.push(current);
        self.enforce_limit();
        Some(snapshot)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn enforce_limit(&mut self) {
        if let Some(limit) = self.limit {
            if self.undo_stack.len() > limit {
                let excess = self.undo_stack.len() - limit;
                self.undo_stack.drain(..excess);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{ElementId, TextElement};

    fn text(id: &str) -> Element {
        Element::Text(TextElement {
            id: ElementId::from(id),
            x: 0.0,
            y: 0.0,
            text: id.to_string(),
            font_size: 16.0,
            font_family: "Arial".into(),
            color: "#000000".into(),
        })
    }

    #[test]
    fn test_undo_then_redo_is_identity() {
        let mut history = History::new(None);
        let before = vec![text("a")];
        let after = vec![text("a"), text("b")];
        history.record(before.clone());

        let undone = history.undo(after.clone()).unwrap();
        assert_eq!(undone, before);
        let redone = history.redo(undone).unwrap();
        assert_eq!(redone, after);
    }

    #[test]
    fn test_empty_stacks_are_noops() {
        let mut history = History::new(None);
        assert_eq!(history.undo(vec![text("a")]), None);
        assert_eq!(history.redo(vec![text("a")]), None);
        assert_eq!(history.undo_depth(), 0);
        assert_eq!(history.redo_depth(), 0);
    }

    #[test]
    fn test_new_mutation_clears_redo() {
        let mut history = History::new(None);
        history.record(vec![]);
        history.undo(vec![text("a")]).unwrap();
        assert!(history.can_redo());

        history.record(vec![]);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::new(Some(2));
        history.record(vec![text("1")]);
        history.record(vec![text("2")]);
        history.record(vec![text("3")]);
        assert_eq!(history.undo_depth(), 2);
        assert_eq!(history.undo(vec![]).unwrap(), vec![text("3")]);
        assert_eq!(history.undo(vec![]).unwrap(), vec![text("2")]);
        assert_eq!(history.undo(vec![]), None);
    }
}
