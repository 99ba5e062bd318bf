/*

Glk Windows
===========

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use super::arrays::GlkOwnedBuffer;
use super::common;
use super::constants::*;
use super::objects::DispatchRock;
use super::protocol::*;

pub mod buffer;
pub mod graphics;
pub mod grid;
pub mod pair;

pub use buffer::*;
pub use graphics::*;
pub use grid::*;
pub use pair::*;

/** A display region: a leaf window, or an internal pair node */
pub struct Window {
    /** Content rectangle, excluding borders */
    pub bbox: WindowBox,
    pub data: WindowData,
    /** Weak: cleared when the stream is deleted */
    pub echostr: Option<u32>,
    pub hyperlink: u32,
    pub input: WindowInput,
    /** The containing pair window; None for the root */
    pub parent: Option<u32>,
    /** The window's own output stream, which it exclusively owns */
    pub streamtag: u32,
    pub style: u32,
}

#[enum_dispatch]
pub enum WindowData {
    Blank(BlankWindow),
    Buffer(BufferWindow),
    Graphics(GraphicsWindow),
    Grid(GridWindow),
    Pair(PairWindow),
}

/** Per-window input request state */
pub struct WindowInput {
    pub char_request: bool,
    pub char_request_uni: bool,
    /** Applies to future line inputs, not the current one */
    pub echo_line_input: bool,
    /** The generation the pending request was opened in */
    pub gen: u32,
    pub hyperlink_request: bool,
    pub line_request: bool,
    pub line_request_uni: bool,
    /** Terminator key bitmask; applies to future line inputs */
    pub terminators: u32,
}

impl Default for WindowInput {
    fn default() -> Self {
        WindowInput {
            char_request: false,
            char_request_uni: false,
            echo_line_input: true,
            gen: 0,
            hyperlink_request: false,
            line_request: false,
            line_request_uni: false,
            terminators: 0,
        }
    }
}

impl Window {
    pub fn new(data: WindowData, streamtag: u32) -> Self {
        Window {
            bbox: WindowBox::default(),
            data,
            echostr: None,
            hyperlink: 0,
            input: WindowInput::default(),
            parent: None,
            streamtag,
            style: style_Normal,
        }
    }

    pub fn wintype(&self) -> WindowType {
        match self.data {
            WindowData::Blank(_) => WindowType::Blank,
            WindowData::Buffer(_) => WindowType::Buffer,
            WindowData::Graphics(_) => WindowType::Graphics,
            WindowData::Grid(_) => WindowType::Grid,
            WindowData::Pair(_) => WindowType::Pair,
        }
    }

    pub fn pair(&self) -> Option<&PairWindow> {
        match &self.data {
            WindowData::Pair(data) => Some(data),
            _ => None,
        }
    }

    pub fn pair_mut(&mut self) -> Option<&mut PairWindow> {
        match &mut self.data {
            WindowData::Pair(data) => Some(data),
            _ => None,
        }
    }
}

/** Operations every window type responds to; most are meaningful only for
    some types and default to no-ops */
#[enum_dispatch(WindowData)]
pub trait WindowOperations {
    fn clear(&mut self, _style: u32, _hyperlink: u32) {}
    /** The content diff since the last update, if there is anything new */
    fn content_update(&mut self, _id: u32, _resource_url: Option<&str>) -> Option<ContentUpdate> {
        None
    }
    fn put_char(&mut self, _ch: u32, _style: u32, _hyperlink: u32) {}
    /** Forget what the client has seen, so the next update resends it all */
    fn refresh(&mut self) {}
    /** Shed history past the window's size bound */
    fn trim_buffer(&mut self) {}
}

#[derive(Default)]
pub struct BlankWindow {}

impl WindowOperations for BlankWindow {}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct WindowBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl WindowBox {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}
