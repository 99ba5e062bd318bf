/*

Pair windows
============

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use super::*;

/** An internal tree node holding two child windows */
pub struct PairWindow {
    pub backward: bool,
    pub border: bool,
    pub child1: u32,
    pub child2: u32,
    pub dir: u32,
    pub division: u32,
    /** Weak: cleared when the key window is closed */
    pub key: Option<u32>,
    /** Set when the key was closed; the next rearrange from the root
        recomputes the whole tree */
    pub keydamage: bool,
    pub size: u32,
    pub splitpos: f64,
    pub splitwidth: f64,
    pub vertical: bool,
}

impl PairWindow {
    pub fn new(method: u32, keytag: u32, size: u32) -> Self {
        let dir = method & winmethod_DirMask;
        PairWindow {
            backward: dir == winmethod_Left || dir == winmethod_Above,
            border: (method & winmethod_BorderMask) == winmethod_Border,
            child1: 0,
            child2: 0,
            dir,
            division: method & winmethod_DivisionMask,
            key: Some(keytag),
            keydamage: false,
            size,
            splitpos: 0.0,
            splitwidth: 0.0,
            vertical: dir == winmethod_Left || dir == winmethod_Right,
        }
    }

    pub fn method(&self) -> u32 {
        self.dir | self.division | if self.border {winmethod_Border} else {winmethod_NoBorder}
    }

    pub fn sibling_of(&self, tag: u32) -> Option<u32> {
        if self.child1 == tag {
            Some(self.child2)
        }
        else if self.child2 == tag {
            Some(self.child1)
        }
        else {
            None
        }
    }

    /** Work out this pair's split and the two child boxes. The caller
        resolves the key window's type; size values are measured in layout
        units (one character cell under the default metrics). Returns the
        boxes in (child1, child2) order. */
    pub fn compute_split(&mut self, wbox: WindowBox, keytype: Option<WindowType>) -> (WindowBox, WindowBox) {
        let (min, max) = if self.vertical {
            (wbox.left, wbox.right)
        }
        else {
            (wbox.top, wbox.bottom)
        };
        let diff = max - min;

        let splitwid = if self.border {1.0} else {0.0};

        let mut split = match self.division {
            winmethod_Proportional => (diff * self.size as f64 / 100.0).floor(),
            winmethod_Fixed => match keytype {
                Some(WindowType::Buffer) | Some(WindowType::Grid) => self.size as f64,
                _ => 0.0,
            },
            _ => (diff / 2.0).floor(),
        };

        if !self.backward {
            split = max - split - splitwid;
        }
        else {
            split += min;
        }

        if min >= max {
            split = min;
        }
        else {
            split = split.clamp(min, max - splitwid);
        }

        self.splitpos = split;
        self.splitwidth = splitwid;

        let (mut box1, mut box2) = (wbox, wbox);
        if self.vertical {
            box1.right = split;
            box2.left = split + splitwid;
        }
        else {
            box1.bottom = split;
            box2.top = split + splitwid;
        }
        if self.backward {
            (box2, box1)
        }
        else {
            (box1, box2)
        }
    }
}

impl WindowOperations for PairWindow {}

#[cfg(test)]
mod tests {
    use super::*;

    fn wbox(left: f64, top: f64, right: f64, bottom: f64) -> WindowBox {
        WindowBox {left, top, right, bottom}
    }

    #[test]
    fn fixed_split_gives_the_key_its_cells() {
        // A grid of 5 rows split below, with a border line
        let mut pair = PairWindow::new(winmethod_Below | winmethod_Fixed, 1, 5);
        let (box1, box2) = pair.compute_split(wbox(0.0, 0.0, 80.0, 24.0), Some(WindowType::Grid));
        assert_eq!(pair.splitpos, 18.0);
        assert_eq!(pair.splitwidth, 1.0);
        assert_eq!((box1.top, box1.bottom), (0.0, 18.0));
        assert_eq!((box2.top, box2.bottom), (19.0, 24.0));
        assert_eq!(box2.bottom - box2.top, 5.0);

        // Without a border the original window keeps the extra row
        let mut pair = PairWindow::new(winmethod_Below | winmethod_Fixed | winmethod_NoBorder, 1, 5);
        let (box1, box2) = pair.compute_split(wbox(0.0, 0.0, 80.0, 24.0), Some(WindowType::Grid));
        assert_eq!((box1.bottom, box2.top), (19.0, 19.0));
        assert_eq!(box2.bottom - box2.top, 5.0);
    }

    #[test]
    fn fixed_split_clamps_to_the_box() {
        let mut pair = PairWindow::new(winmethod_Above | winmethod_Fixed | winmethod_NoBorder, 1, 100);
        let (box1, box2) = pair.compute_split(wbox(0.0, 0.0, 80.0, 24.0), Some(WindowType::Grid));
        // The key (child2, backward split) takes everything
        assert_eq!((box2.top, box2.bottom), (0.0, 24.0));
        assert_eq!((box1.top, box1.bottom), (24.0, 24.0));
    }

    #[test]
    fn proportional_split() {
        let mut pair = PairWindow::new(winmethod_Right | winmethod_Proportional | winmethod_NoBorder, 1, 25);
        let (box1, box2) = pair.compute_split(wbox(0.0, 0.0, 81.0, 24.0), Some(WindowType::Buffer));
        // floor(81 * 25 / 100) = 20 columns on the right
        assert_eq!((box1.left, box1.right), (0.0, 61.0));
        assert_eq!((box2.left, box2.right), (61.0, 81.0));
    }

    #[test]
    fn missing_key_collapses_fixed_split() {
        let mut pair = PairWindow::new(winmethod_Below | winmethod_Fixed | winmethod_NoBorder, 1, 5);
        pair.key = None;
        let (box1, box2) = pair.compute_split(wbox(0.0, 0.0, 80.0, 24.0), None);
        assert_eq!((box2.top, box2.bottom), (24.0, 24.0));
        assert_eq!((box1.top, box1.bottom), (0.0, 24.0));
    }
}
