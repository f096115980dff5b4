//! Tool system: per-tool pointer gesture handling.

use crate::camera::Camera;
use crate::config::EngineConfig;
use crate::elements::{Element, ElementId, PathElement, TextElement, hit_test_topmost};
use crate::eraser::erase;
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Select,
    Pan,
    Draw,
    Erase,
    Text,
}

impl ToolKind {
    /// Whether gestures with this tool can change the document.
    pub fn is_mutating(self) -> bool {
        !matches!(self, ToolKind::Pan)
    }

    /// Action name reported when the tool is refused.
    pub fn action(self) -> &'static str {
        match self {
            ToolKind::Select => "move",
            ToolKind::Pan => "pan",
            ToolKind::Draw => "draw",
            ToolKind::Erase => "erase",
            ToolKind::Text => "insert text",
        }
    }
}

/// State of a tool interaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolState {
    #[default]
    Idle,
    /// Moving the selected element. `origin` is the list before the drag.
    Dragging {
        id: ElementId,
        last: Point,
        origin: Vec<Element>,
        moved: bool,
    },
    Panning { last_screen: Point },
    /// Stroke in progress, held outside the element list.
    Drawing { path: PathElement },
    /// Erase gesture. `origin` is the list before the first cut.
    Erasing { origin: Vec<Element>, changed: bool },
    /// Waiting for the user to type the text to place at `at`.
    AwaitingText { at: Point },
}

/// What a gesture step asks the editor to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    None,
    /// Route `next` through the mutation pipeline with `previous` as the undo snapshot.
    Commit {
        previous: Vec<Element>,
        next: Vec<Element>,
    },
    RequestText { at: Point },
}

/// Mutable editor state a tool may touch.
pub struct ToolContext<'a> {
    pub elements: &'a mut Vec<Element>,
    pub selection: &'a mut Option<ElementId>,
    pub camera: &'a mut Camera,
    pub config: &'a EngineConfig,
}

/// Manages the current tool and its gesture state.
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    pub current_tool: ToolKind,
    pub state: ToolState,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch tools, abandoning any gesture in progress.
    pub fn set_tool(&mut self, tool: ToolKind, elements: &mut Vec<Element>) {
        self.cancel(elements);
        self.current_tool = tool;
    }

    /// Pointer pressed at `point` (canvas) / `screen`.
    pub fn begin(&mut self, ctx: ToolContext<'_>, point: Point, screen: Point) -> ToolOutcome {
        let (state, outcome) = match self.current_tool {
            ToolKind::Select => {
                match hit_test_topmost(ctx.elements.as_slice(), point, ctx.config.hit_tolerance) {
                    Some(index) => {
                        let id = ctx.elements[index].id().clone();
                        *ctx.selection = Some(id.clone());
                        let state = ToolState::Dragging {
                            id,
                            last: point,
                            origin: ctx.elements.clone(),
                            moved: false,
                        };
                        (state, ToolOutcome::None)
                    }
                    None => {
                        *ctx.selection = None;
                        (ToolState::Idle, ToolOutcome::None)
                    }
                }
            }
            ToolKind::Pan => (ToolState::Panning { last_screen: screen }, ToolOutcome::None),
            ToolKind::Draw => {
                let path = PathElement::start(
                    ElementId::generate(),
                    point,
                    ctx.config.stroke.color.clone(),
                    ctx.config.stroke.width,
                );
                (ToolState::Drawing { path }, ToolOutcome::None)
            }
            ToolKind::Erase => {
                let state = ToolState::Erasing {
                    origin: ctx.elements.clone(),
                    changed: false,
                };
                (state, ToolOutcome::None)
            }
            ToolKind::Text => (
                ToolState::AwaitingText { at: point },
                ToolOutcome::RequestText { at: point },
            ),
        };
        self.state = state;
        outcome
    }

    /// Pointer moved while pressed.
    pub fn update(&mut self, ctx: ToolContext<'_>, point: Point, screen: Point) {
        match &mut self.state {
            ToolState::Dragging { id, last, moved, .. } => {
                let delta = point - *last;
                match ctx.elements.iter_mut().find(|el| el.id() == id) {
                    Some(element) => {
                        element.translate(delta);
                        *last = point;
                        *moved |= delta.hypot2() > 0.0;
                    }
                    // Removed by a remote snapshot mid-drag.
                    None => self.state = ToolState::Idle,
                }
            }
            ToolState::Panning { last_screen } => {
                ctx.camera.pan(screen - *last_screen);
                *last_screen = screen;
            }
            ToolState::Drawing { path } => path.push(point),
            ToolState::Erasing { changed, .. } => {
                let outcome = erase(ctx.elements.as_slice(), point, ctx.config.eraser_radius);
                if outcome.changed {
                    *ctx.elements = outcome.elements;
                    *changed = true;
                }
            }
            ToolState::Idle | ToolState::AwaitingText { .. } => {}
        }
    }

    /// Pointer released. Returns the commit for gestures that changed the document.
    pub fn end(&mut self, ctx: ToolContext<'_>, point: Point) -> ToolOutcome {
        if matches!(self.state, ToolState::AwaitingText { .. }) {
            return ToolOutcome::None;
        }
        match std::mem::take(&mut self.state) {
            ToolState::Dragging { origin, moved: true, .. } => ToolOutcome::Commit {
                previous: origin,
                next: ctx.elements.clone(),
            },
            ToolState::Drawing { path } if path.is_valid() => {
                let previous = ctx.elements.clone();
                let mut next = previous.clone();
                next.push(Element::Path(path));
                ToolOutcome::Commit { previous, next }
            }
            ToolState::Erasing { origin, changed } => {
                let outcome = erase(ctx.elements.as_slice(), point, ctx.config.eraser_radius);
                if outcome.changed || changed {
                    ToolOutcome::Commit {
                        previous: origin,
                        next: outcome.elements,
                    }
                } else {
                    ToolOutcome::None
                }
            }
            _ => ToolOutcome::None,
        }
    }

    /// Text typed for a pending text placement. Empty input places nothing.
    pub fn submit_text(&mut self, ctx: ToolContext<'_>, text: String) -> ToolOutcome {
        let ToolState::AwaitingText { at } = self.state else {
            return ToolOutcome::None;
        };
        self.state = ToolState::Idle;
        if text.is_empty() {
            return ToolOutcome::None;
        }

        let style = &ctx.config.text;
        let previous = ctx.elements.clone();
        let mut next = previous.clone();
        next.push(Element::Text(TextElement {
            id: ElementId::generate(),
            x: at.x,
            y: at.y,
            text,
            font_size: style.font_size,
            font_family: style.font_family.clone(),
            color: style.color.clone(),
        }));
        ToolOutcome::Commit { previous, next }
    }

    /// Abandon the current gesture. Uncommitted drags and erasures are rolled back.
    pub fn cancel(&mut self, elements: &mut Vec<Element>) {
        match std::mem::take(&mut self.state) {
            ToolState::Dragging { origin, moved: true, .. } => *elements = origin,
            ToolState::Erasing { origin, changed: true } => *elements = origin,
            _ => {}
        }
    }

    /// Whether a pointer gesture is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, ToolState::Idle | ToolState::AwaitingText { .. })
    }

    /// Stroke being drawn, for live preview.
    pub fn preview_path(&self) -> Option<&PathElement> {
        match &self.state {
            ToolState::Drawing { path } => Some(path),
            _ => None,
        }
    }
}
