//! Editor state and its event reducer.
//!
//! [`EditorState`] owns everything one client needs to edit a scrapbook: the
//! local element list, undo/redo history, the active tool and its gesture, the
//! view offset and the caller's role. Every input goes through
//! [`EditorState::handle`], which either refuses it synchronously or updates
//! local state and returns the [`Effect`]s the caller must carry out.

use crate::camera::Camera;
use crate::config::EngineConfig;
use crate::elements::{Element, ElementId, ImageElement, PathElement, parse_elements, prune_elements};
use crate::error::EngineResult;
use crate::history::History;
use crate::input::{PointerEvent, PointerPhase, SurfaceMapping};
use crate::permissions::{Role, ensure_can_edit};
use crate::tools::{ToolContext, ToolKind, ToolManager, ToolOutcome};
use kurbo::{Point, Size};

/// Input to the editor.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    SetTool(ToolKind),
    /// Displayed size of the canvas surface, used to scale touch input.
    SetSurface(Option<Size>),
    SetRole(Role),
    Pointer(PointerEvent),
    /// Text typed in response to [`Effect::RequestText`].
    TextEntered(String),
    TextCancelled,
    InsertImage(ImageElement),
    DeleteSelected,
    ClearCanvas,
    Undo,
    Redo,
    /// Replace the whole element list with an untrusted payload.
    ReplaceElements(serde_json::Value),
    /// Authoritative element list pushed by the store.
    RemoteSnapshot(Vec<Element>),
}

/// Work the caller must perform after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write this whole element list to the shared store.
    Persist(Vec<Element>),
    /// Prompt the user for text to place at `at`.
    RequestText { at: Point },
}

/// Local editing state for one scrapbook.
#[derive(Debug, Clone)]
pub struct EditorState {
    elements: Vec<Element>,
    history: History,
    tools: ToolManager,
    camera: Camera,
    surface: SurfaceMapping,
    selection: Option<ElementId>,
    role: Role,
    config: EngineConfig,
}

impl EditorState {
    pub fn new(elements: Vec<Element>, role: Role, config: EngineConfig) -> Self {
        Self {
            elements,
            history: History::new(config.history_limit),
            tools: ToolManager::new(),
            camera: Camera::new(),
            surface: SurfaceMapping::new(config.canvas_size),
            selection: None,
            role,
            config,
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn selection(&self) -> Option<&ElementId> {
        self.selection.as_ref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn tool(&self) -> ToolKind {
        self.tools.current_tool
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stroke being drawn, not yet part of the document.
    pub fn preview_path(&self) -> Option<&PathElement> {
        self.tools.preview_path()
    }

    /// Whether a pointer gesture is in progress.
    pub fn is_gesture_active(&self) -> bool {
        self.tools.is_active()
    }

    /// Process one event.
    ///
    /// Mutating events are refused with `PermissionDenied` unless the role
    /// may edit, and malformed payloads with `ValidationFailure`; in both
    /// cases nothing changes.
    pub fn handle(&mut self, event: EditorEvent) -> EngineResult<Vec<Effect>> {
        let effect = match event {
            EditorEvent::SetTool(tool) => {
                self.tools.set_tool(tool, &mut self.elements);
                None
            }
            EditorEvent::SetSurface(size) => {
                self.surface.displayed = size;
                None
            }
            EditorEvent::SetRole(role) => {
                self.set_role(role);
                None
            }
            EditorEvent::Pointer(pointer) => self.pointer(pointer)?,
            EditorEvent::TextEntered(text) => {
                ensure_can_edit(self.role, "insert text")?;
                let (tools, ctx) = self.split_tools();
                let outcome = tools.submit_text(ctx, text);
                self.apply_outcome(outcome)
            }
            EditorEvent::TextCancelled => {
                self.tools.cancel(&mut self.elements);
                None
            }
            EditorEvent::InsertImage(image) => {
                ensure_can_edit(self.role, "insert image")?;
                let mut next = self.elements.clone();
                next.push(Element::Image(image));
                Some(self.mutate(next))
            }
            EditorEvent::DeleteSelected => {
                ensure_can_edit(self.role, "delete")?;
                self.delete_selected()
            }
            EditorEvent::ClearCanvas => {
                ensure_can_edit(self.role, "clear canvas")?;
                self.tools.cancel(&mut self.elements);
                Some(self.mutate(Vec::new()))
            }
            EditorEvent::Undo => {
                ensure_can_edit(self.role, "undo")?;
                self.undo()
            }
            EditorEvent::Redo => {
                ensure_can_edit(self.role, "redo")?;
                self.redo()
            }
            EditorEvent::ReplaceElements(payload) => {
                ensure_can_edit(self.role, "replace elements")?;
                let next = parse_elements(&payload)?;
                self.tools.cancel(&mut self.elements);
                Some(self.mutate(next))
            }
            EditorEvent::RemoteSnapshot(elements) => {
                self.apply_remote(elements);
                None
            }
        };
        Ok(effect.into_iter().collect())
    }

    /// Steps one to three of every mutation: record `previous` for undo,
    /// drop the redo branch and show `next` immediately. The returned effect
    /// carries the write for the store.
    pub fn apply_mutation(&mut self, previous: Vec<Element>, next: Vec<Element>) -> Effect {
        let next = prune_elements(next);
        self.history.record(previous);
        self.elements = next.clone();
        self.drop_stale_selection();
        Effect::Persist(next)
    }

    /// Overwrite local state with an authoritative snapshot.
    ///
    /// Last write wins: local edits not yet reflected remotely are discarded,
    /// and a drag in progress continues on the new list. History is kept.
    pub fn apply_remote(&mut self, elements: Vec<Element>) {
        log::debug!("Applying remote snapshot with {} elements", elements.len());
        self.elements = elements;
        self.drop_stale_selection();
    }

    fn mutate(&mut self, next: Vec<Element>) -> Effect {
        let previous = self.elements.clone();
        self.apply_mutation(previous, next)
    }

    fn pointer(&mut self, event: PointerEvent) -> EngineResult<Option<Effect>> {
        let tool = self.tools.current_tool;
        let point = self.surface.to_canvas(&event);
        let screen = self.camera.world_to_screen(event.position);

        match event.phase {
            PointerPhase::Down => {
                if tool.is_mutating() {
                    ensure_can_edit(self.role, tool.action())?;
                }
                let (tools, ctx) = self.split_tools();
                let outcome = tools.begin(ctx, point, screen);
                Ok(self.apply_outcome(outcome))
            }
            PointerPhase::Move => {
                let (tools, ctx) = self.split_tools();
                tools.update(ctx, point, screen);
                Ok(None)
            }
            PointerPhase::Up => {
                let (tools, ctx) = self.split_tools();
                let outcome = tools.end(ctx, point);
                Ok(self.apply_outcome(outcome))
            }
        }
    }

    fn apply_outcome(&mut self, outcome: ToolOutcome) -> Option<Effect> {
        match outcome {
            ToolOutcome::None => None,
            ToolOutcome::Commit { previous, next } => Some(self.apply_mutation(previous, next)),
            ToolOutcome::RequestText { at } => Some(Effect::RequestText { at }),
        }
    }

    fn undo(&mut self) -> Option<Effect> {
        self.tools.cancel(&mut self.elements);
        let snapshot = self.history.undo(self.elements.clone())?;
        self.elements = snapshot.clone();
        self.drop_stale_selection();
        Some(Effect::Persist(snapshot))
    }

    fn redo(&mut self) -> Option<Effect> {
        self.tools.cancel(&mut self.elements);
        let snapshot = self.history.redo(self.elements.clone())?;
        self.elements = snapshot.clone();
        self.drop_stale_selection();
        Some(Effect::Persist(snapshot))
    }

    fn delete_selected(&mut self) -> Option<Effect> {
        let id = self.selection.clone()?;
        if !self.elements.iter().any(|el| el.id() == &id) {
            self.selection = None;
            return None;
        }
        self.tools.cancel(&mut self.elements);
        let next = self
            .elements
            .iter()
            .filter(|el| el.id() != &id)
            .cloned()
            .collect();
        Some(self.mutate(next))
    }

    fn set_role(&mut self, role: Role) {
        if !role.can_edit() && self.tools.current_tool.is_mutating() {
            self.tools.cancel(&mut self.elements);
        }
        self.role = role;
    }

    fn drop_stale_selection(&mut self) {
        if let Some(id) = &self.selection {
            if !self.elements.iter().any(|el| el.id() == id) {
                self.selection = None;
            }
        }
    }

    fn split_tools(&mut self) -> (&mut ToolManager, ToolContext<'_>) {
        let ctx = ToolContext {
            elements: &mut self.elements,
            selection: &mut self.selection,
            camera: &mut self.camera,
            config: &self.config,
        };
        (&mut self.tools, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;

    fn editor(role: Role) -> EditorState {
        EditorState::new(Vec::new(), role, EngineConfig::default())
    }

    fn down(x: f64, y: f64) -> EditorEvent {
        EditorEvent::Pointer(PointerEvent::mouse(PointerPhase::Down, x, y))
    }

    fn mv(x: f64, y: f64) -> EditorEvent {
        EditorEvent::Pointer(PointerEvent::mouse(PointerPhase::Move, x, y))
    }

    fn up(x: f64, y: f64) -> EditorEvent {
        EditorEvent::Pointer(PointerEvent::mouse(PointerPhase::Up, x, y))
    }

    fn draw_line(ed: &mut EditorState, points: &[(f64, f64)]) -> Vec<Effect> {
        ed.handle(EditorEvent::SetTool(ToolKind::Draw)).unwrap();
        let (first, rest) = points.split_first().unwrap();
        ed.handle(down(first.0, first.1)).unwrap();
        for &(x, y) in rest {
            ed.handle(mv(x, y)).unwrap();
        }
        let last = points.last().unwrap();
        ed.handle(up(last.0, last.1)).unwrap()
    }

    #[test]
    fn test_draw_persists_whole_list() {
        let mut ed = editor(Role::Owner);
        let effects = draw_line(&mut ed, &[(0.0, 0.0), (50.0, 0.0), (100.0, 0.0)]);

        assert_eq!(ed.elements().len(), 1);
        assert_eq!(effects, vec![Effect::Persist(ed.elements().to_vec())]);
        assert!(ed.history().can_undo());
        assert!(ed.preview_path().is_none());
    }

    #[test]
    fn test_viewer_refused_before_mutation() {
        let mut ed = editor(Role::Viewer);
        ed.handle(EditorEvent::SetTool(ToolKind::Draw)).unwrap();

        let err = ed.handle(down(0.0, 0.0)).unwrap_err();
        assert_eq!(err, EngineError::PermissionDenied { action: "draw" });
        assert!(!ed.is_gesture_active());

        // Moves and releases without a gesture are harmless.
        assert!(ed.handle(mv(10.0, 10.0)).unwrap().is_empty());
        assert!(ed.handle(up(10.0, 10.0)).unwrap().is_empty());
        assert!(ed.elements().is_empty());

        assert!(matches!(
            ed.handle(EditorEvent::ClearCanvas),
            Err(EngineError::PermissionDenied { .. })
        ));
        assert!(matches!(
            ed.handle(EditorEvent::Undo),
            Err(EngineError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_viewer_may_pan() {
        let mut ed = editor(Role::Viewer);
        ed.handle(EditorEvent::SetTool(ToolKind::Pan)).unwrap();
        ed.handle(down(10.0, 10.0)).unwrap();
        ed.handle(mv(20.0, 25.0)).unwrap();
        ed.handle(up(20.0, 25.0)).unwrap();
        assert_eq!(ed.camera().offset, kurbo::Vec2::new(10.0, 15.0));
    }

    #[test]
    fn test_undo_redo_inverse() {
        let mut ed = editor(Role::Editor);
        draw_line(&mut ed, &[(0.0, 0.0), (10.0, 10.0)]);
        draw_line(&mut ed, &[(0.0, 50.0), (10.0, 60.0)]);
        let before_undo = ed.elements().to_vec();

        let undo = ed.handle(EditorEvent::Undo).unwrap();
        assert_eq!(ed.elements().len(), 1);
        assert_eq!(undo, vec![Effect::Persist(ed.elements().to_vec())]);

        ed.handle(EditorEvent::Redo).unwrap();
        assert_eq!(ed.elements(), before_undo.as_slice());

        // Nothing left to redo.
        assert!(ed.handle(EditorEvent::Redo).unwrap().is_empty());
        assert_eq!(ed.elements(), before_undo.as_slice());
    }

    #[test]
    fn test_new_mutation_clears_redo() {
        let mut ed = editor(Role::Owner);
        draw_line(&mut ed, &[(0.0, 0.0), (10.0, 10.0)]);
        ed.handle(EditorEvent::Undo).unwrap();
        assert!(ed.history().can_redo());

        draw_line(&mut ed, &[(5.0, 5.0), (20.0, 20.0)]);
        assert!(!ed.history().can_redo());
    }

    #[test]
    fn test_drag_undo_restores_position() {
        let mut ed = editor(Role::Owner);
        draw_line(&mut ed, &[(0.0, 0.0), (100.0, 0.0)]);
        let original = ed.elements().to_vec();

        ed.handle(EditorEvent::SetTool(ToolKind::Select)).unwrap();
        ed.handle(down(50.0, 0.0)).unwrap();
        ed.handle(mv(50.0, 20.0)).unwrap();
        ed.handle(mv(50.0, 40.0)).unwrap();
        let effects = ed.handle(up(50.0, 40.0)).unwrap();
        assert_eq!(effects.len(), 1);

        match &ed.elements()[0] {
            Element::Path(p) => assert_eq!(p.points[0], Point::new(0.0, 40.0)),
            other => panic!("expected path, got {:?}", other),
        }

        ed.handle(EditorEvent::Undo).unwrap();
        assert_eq!(ed.elements(), original.as_slice());
    }

    #[test]
    fn test_erase_gesture_persists_once() {
        let mut ed = editor(Role::Owner);
        draw_line(&mut ed, &[(0.0, 0.0), (50.0, 0.0), (100.0, 0.0)]);
        ed.handle(EditorEvent::SetTool(ToolKind::Erase)).unwrap();

        assert!(ed.handle(down(45.0, 0.0)).unwrap().is_empty());
        assert!(ed.handle(mv(50.0, 0.0)).unwrap().is_empty());
        assert!(ed.handle(mv(55.0, 0.0)).unwrap().is_empty());
        let effects = ed.handle(up(55.0, 0.0)).unwrap();

        assert_eq!(effects.len(), 1);
        assert_eq!(ed.elements().len(), 2);
        assert_eq!(ed.history().undo_depth(), 2);
    }

    #[test]
    fn test_erasing_erased_spot_keeps_redo() {
        let mut ed = editor(Role::Owner);
        draw_line(&mut ed, &[(0.0, 0.0), (100.0, 0.0)]);
        ed.handle(EditorEvent::SetTool(ToolKind::Erase)).unwrap();
        ed.handle(down(50.0, 3.0)).unwrap();
        assert_eq!(ed.handle(up(50.0, 3.0)).unwrap().len(), 1);

        draw_line(&mut ed, &[(0.0, 100.0), (100.0, 100.0)]);
        ed.handle(EditorEvent::Undo).unwrap();
        let before = ed.elements().to_vec();
        let depth = ed.history().undo_depth();

        ed.handle(EditorEvent::SetTool(ToolKind::Erase)).unwrap();
        ed.handle(down(50.0, 3.0)).unwrap();
        assert!(ed.handle(up(50.0, 3.0)).unwrap().is_empty());

        assert_eq!(ed.elements(), before.as_slice());
        assert_eq!(ed.history().undo_depth(), depth);
        assert!(ed.history().can_redo());
    }

    #[test]
    fn test_text_flow() {
        let mut ed = editor(Role::Owner);
        ed.handle(EditorEvent::SetTool(ToolKind::Text)).unwrap();
        let effects = ed.handle(down(30.0, 40.0)).unwrap();
        assert_eq!(effects, vec![Effect::RequestText { at: Point::new(30.0, 40.0) }]);

        let effects = ed.handle(EditorEvent::TextEntered("caption".into())).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(&ed.elements()[0], Element::Text(t) if t.text == "caption"));
    }

    #[test]
    fn test_text_cancel_places_nothing() {
        let mut ed = editor(Role::Owner);
        ed.handle(EditorEvent::SetTool(ToolKind::Text)).unwrap();
        ed.handle(down(30.0, 40.0)).unwrap();
        ed.handle(EditorEvent::TextCancelled).unwrap();
        assert!(ed.handle(EditorEvent::TextEntered("late".into())).unwrap().is_empty());
        assert!(ed.elements().is_empty());
    }

    #[test]
    fn test_touch_input_is_scaled() {
        let mut ed = editor(Role::Owner);
        ed.handle(EditorEvent::SetSurface(Some(Size::new(1024.0, 1024.0)))).unwrap();
        ed.handle(EditorEvent::SetTool(ToolKind::Draw)).unwrap();
        ed.handle(EditorEvent::Pointer(PointerEvent::touch(PointerPhase::Down, 10.0, 10.0)))
            .unwrap();
        ed.handle(EditorEvent::Pointer(PointerEvent::touch(PointerPhase::Move, 20.0, 10.0)))
            .unwrap();
        ed.handle(EditorEvent::Pointer(PointerEvent::touch(PointerPhase::Up, 20.0, 10.0)))
            .unwrap();

        match &ed.elements()[0] {
            Element::Path(p) => {
                assert_eq!(p.points, vec![Point::new(40.0, 40.0), Point::new(80.0, 40.0)]);
            }
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_snapshot_overwrites_without_history() {
        let mut ed = editor(Role::Owner);
        draw_line(&mut ed, &[(0.0, 0.0), (10.0, 10.0)]);
        let depth = ed.history().undo_depth();

        let effects = ed.handle(EditorEvent::RemoteSnapshot(Vec::new())).unwrap();
        assert!(effects.is_empty());
        assert!(ed.elements().is_empty());
        assert_eq!(ed.history().undo_depth(), depth);
    }

    #[test]
    fn test_remote_snapshot_during_draw_keeps_stroke() {
        let mut ed = editor(Role::Owner);
        ed.handle(EditorEvent::SetTool(ToolKind::Draw)).unwrap();
        ed.handle(down(0.0, 0.0)).unwrap();
        ed.handle(mv(5.0, 5.0)).unwrap();

        let mut other = editor(Role::Owner);
        draw_line(&mut other, &[(100.0, 100.0), (200.0, 200.0)]);
        ed.handle(EditorEvent::RemoteSnapshot(other.elements().to_vec())).unwrap();

        ed.handle(up(5.0, 5.0)).unwrap();
        assert_eq!(ed.elements().len(), 2);
    }

    #[test]
    fn test_replace_elements_validates() {
        let mut ed = editor(Role::Owner);
        let err = ed
            .handle(EditorEvent::ReplaceElements(json!({"not": "an array"})))
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailure(_)));
        assert!(!ed.history().can_undo());

        let effects = ed
            .handle(EditorEvent::ReplaceElements(json!([
                {"id": "a", "type": "path", "points": [{"x": 0, "y": 0}, {"x": 1, "y": 1}]},
                {"id": "b", "type": "path", "points": [{"x": 0, "y": 0}]}
            ])))
            .unwrap();
        // The single-point path is pruned.
        assert_eq!(ed.elements().len(), 1);
        assert_eq!(effects, vec![Effect::Persist(ed.elements().to_vec())]);
    }

    #[test]
    fn test_clear_and_delete_selected() {
        let mut ed = editor(Role::Owner);
        draw_line(&mut ed, &[(0.0, 0.0), (100.0, 0.0)]);
        draw_line(&mut ed, &[(0.0, 50.0), (100.0, 50.0)]);

        ed.handle(EditorEvent::SetTool(ToolKind::Select)).unwrap();
        ed.handle(down(50.0, 50.0)).unwrap();
        ed.handle(up(50.0, 50.0)).unwrap();
        assert!(ed.selection().is_some());

        ed.handle(EditorEvent::DeleteSelected).unwrap();
        assert_eq!(ed.elements().len(), 1);
        assert!(ed.selection().is_none());
        // Nothing selected any more.
        assert!(ed.handle(EditorEvent::DeleteSelected).unwrap().is_empty());

        let effects = ed.handle(EditorEvent::ClearCanvas).unwrap();
        assert_eq!(effects, vec![Effect::Persist(Vec::new())]);
        ed.handle(EditorEvent::Undo).unwrap();
        assert_eq!(ed.elements().len(), 1);
    }

    #[test]
    fn test_demotion_cancels_gesture() {
        let mut ed = editor(Role::Editor);
        ed.handle(EditorEvent::SetTool(ToolKind::Draw)).unwrap();
        ed.handle(down(0.0, 0.0)).unwrap();
        ed.handle(EditorEvent::SetRole(Role::Viewer)).unwrap();
        assert!(!ed.is_gesture_active());
        assert!(ed.handle(up(10.0, 10.0)).unwrap().is_empty());
        assert!(ed.elements().is_empty());
    }
}
