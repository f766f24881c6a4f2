//! Pointer input model and press/move/release tracking

use super::camera::DRAG_JITTER;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Selection modifier: rectangle-zoom on drag, fast zoom on double-click
    pub shift: bool,
    pub ctrl: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
    };

    pub const SHIFT: Modifiers = Modifiers {
        shift: true,
        ctrl: false,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Primary,
    Secondary,
    Middle,
}

/// Events delivered by the hosting UI, in viewport pixel coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    Press {
        x: i32,
        y: i32,
        button: MouseButton,
        modifiers: Modifiers,
    },
    Move {
        x: i32,
        y: i32,
    },
    Release {
        x: i32,
        y: i32,
        button: MouseButton,
    },
    /// Positive counts scroll up (zoom in)
    Wheel {
        x: i32,
        y: i32,
        count: i32,
    },
    DoubleClick {
        x: i32,
        y: i32,
        button: MouseButton,
        modifiers: Modifiers,
    },
    /// Pointer left the viewport
    Exit,
}

/// A finished press/release pair, not yet classified
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stroke {
    pub press: (i32, i32),
    pub release: (i32, i32),
    pub select: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pressed {
    Drag((i32, i32)),
    Select((i32, i32)),
}

/// Tracks the primary button between press and release.
///
/// Drag offsets and selection corners only update once the pointer has moved
/// beyond the jitter threshold from the press point.
#[derive(Debug)]
pub struct GestureTracker {
    jitter: i32,
    pressed: Option<Pressed>,
    drag_offset: Option<(i32, i32)>,
    selection_end: Option<(i32, i32)>,
    pointer: Option<(i32, i32)>,
}

impl GestureTracker {
    pub fn new(jitter: i32) -> Self {
        Self {
            jitter: jitter.max(0),
            pressed: None,
            drag_offset: None,
            selection_end: None,
            pointer: None,
        }
    }

    fn beyond_jitter(&self, from: (i32, i32), to: (i32, i32)) -> bool {
        (from.0 - to.0).abs() > self.jitter || (from.1 - to.1).abs() > self.jitter
    }

    /// Start a drag, or a selection when `select` is set and `selection_allowed`
    pub fn press(&mut self, x: i32, y: i32, select: bool, selection_allowed: bool) {
        self.pointer = Some((x, y));
        self.drag_offset = None;
        self.selection_end = None;
        self.pressed = match (select, selection_allowed) {
            (true, true) => Some(Pressed::Select((x, y))),
            (true, false) => None,
            (false, _) => Some(Pressed::Drag((x, y))),
        };
    }

    /// Returns true when the preview changed and needs a redraw
    pub fn motion(&mut self, x: i32, y: i32) -> bool {
        self.pointer = Some((x, y));
        match self.pressed {
            Some(Pressed::Drag(start)) if self.beyond_jitter(start, (x, y)) => {
                self.drag_offset = Some((start.0 - x, start.1 - y));
                true
            }
            Some(Pressed::Select(start)) if self.beyond_jitter(start, (x, y)) => {
                self.selection_end = Some((x, y));
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self, x: i32, y: i32) -> Option<Stroke> {
        self.pointer = Some((x, y));
        self.drag_offset = None;
        self.selection_end = None;
        let stroke = match self.pressed.take()? {
            Pressed::Drag(press) => Stroke {
                press,
                release: (x, y),
                select: false,
            },
            Pressed::Select(press) => Stroke {
                press,
                release: (x, y),
                select: true,
            },
        };
        Some(stroke)
    }

    pub fn cancel(&mut self) {
        self.pressed = None;
        self.drag_offset = None;
        self.selection_end = None;
    }

    pub fn leave(&mut self) {
        self.pointer = None;
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.pressed, Some(Pressed::Drag(_)))
    }

    /// Offset to shift the current composite by while dragging
    pub fn drag_offset(&self) -> Option<(i32, i32)> {
        self.drag_offset
    }

    /// Corners of the rectangle being drawn, once past the jitter threshold
    pub fn selection(&self) -> Option<((i32, i32), (i32, i32))> {
        match (self.pressed, self.selection_end) {
            (Some(Pressed::Select(start)), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    pub fn pointer(&self) -> Option<(i32, i32)> {
        self.pointer
    }
}

impl Default for GestureTracker {
    fn default() -> Self {
        Self::new(DRAG_JITTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_offset_only_past_jitter() {
        let mut tracker = GestureTracker::default();
        tracker.press(100, 100, false, true);
        assert!(tracker.is_dragging());
        assert!(!tracker.motion(105, 97));
        assert_eq!(tracker.drag_offset(), None);
        assert!(tracker.motion(80, 110));
        assert_eq!(tracker.drag_offset(), Some((20, -10)));

        let stroke = tracker.release(80, 110).unwrap();
        assert_eq!(stroke.press, (100, 100));
        assert!(!stroke.select);
        assert_eq!(tracker.drag_offset(), None);
        assert!(!tracker.is_dragging());
    }

    #[test]
    fn test_selection_rectangle() {
        let mut tracker = GestureTracker::default();
        tracker.press(10, 10, true, true);
        tracker.motion(12, 12);
        assert_eq!(tracker.selection(), None);
        tracker.motion(60, 40);
        assert_eq!(tracker.selection(), Some(((10, 10), (60, 40))));
        let stroke = tracker.release(60, 40).unwrap();
        assert!(stroke.select);
        assert_eq!(tracker.selection(), None);
    }

    #[test]
    fn test_selection_refused_when_not_allowed() {
        let mut tracker = GestureTracker::default();
        tracker.press(10, 10, true, false);
        assert!(!tracker.motion(100, 100));
        assert_eq!(tracker.release(100, 100), None);
    }

    #[test]
    fn test_release_without_press() {
        let mut tracker = GestureTracker::default();
        assert_eq!(tracker.release(1, 1), None);
        assert_eq!(tracker.pointer(), Some((1, 1)));
        tracker.leave();
        assert_eq!(tracker.pointer(), None);
    }
}
