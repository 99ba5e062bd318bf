/*

The Glk API
===========

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::env::temp_dir;
use std::io::Write as _;
use std::path::PathBuf;

use unicode_normalization::UnicodeNormalization;

pub mod arrays;
pub mod autosave;
pub mod common;
pub mod constants;
pub mod filerefs;
mod macros;
pub mod objects;
pub mod protocol;
mod protocol_impl;
pub mod streams;
pub mod windows;

use crate::GlkSystem;
use crate::blorb::{ImageInfo, ResourceMap};
use arrays::*;
use common::GlkApiError::*;
use common::*;
use constants::*;
use filerefs::FileRef;
use macros::*;
use objects::*;
use protocol::*;
use streams::*;
use windows::*;

pub use autosave::LibraryState;

/** An event as returned to the game from `glk_select`. A line input event
    hands the caller's buffer back, filled with the accepted text. */
#[derive(Debug, Default)]
pub struct GlkEvent {
    pub buf: Option<GlkOwnedBuffer>,
    pub evtype: GlkEventType,
    pub win: Option<u32>,
    pub val1: u32,
    pub val2: u32,
}

/** The last event to come in, with the two out-of-band sentinels */
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LastEventType {
    /** The library has just started up */
    Uninitialised,
    /** The library has just autorestored; the next `select` suppresses its
        pre-read update */
    Autorestored,
    Normal(GlkEventType),
}

struct TimerState {
    /** The current request, exactly as passed to `glk_request_timer_events` */
    interval: u32,
    /** The last value sent out (0 after null was sent) */
    last_sent: u32,
    /** When the timer started or last fired */
    started: Option<jiff::Timestamp>,
}

/** An optional debug console hook */
pub trait DebugHandler {
    /** Perform one debug command, returning lines for the update's
        `debugoutput` */
    fn perform_command(&mut self, cmd: &str) -> Vec<String>;
}

/** The library context: all windows, streams, and filerefs, the current
    metrics and capabilities, and the event state machine */
pub struct GlkApi<S: GlkSystem> {
    current_stream: Option<u32>,
    debug_handler: Option<Box<dyn DebugHandler>>,
    debug_output: Vec<String>,
    dispatch: Option<Box<dyn Dispatch>>,
    filerefs: GlkObjectStore<FileRef>,
    focus_win: Option<u32>,
    gen: u32,
    geometry_changed: bool,
    interrupt_handler: Option<Box<dyn FnMut()>>,
    last_event_type: LastEventType,
    metrics: NormalisedMetrics,
    pub resource_map: Option<Box<dyn ResourceMap>>,
    /** Base URL for image/sound files */
    pub resource_url: Option<String>,
    root_win: Option<u32>,
    /** Exit after emitting one update */
    pub single_turn: bool,
    streams: GlkObjectStore<Stream>,
    support: SupportCaps,
    pub system: S,
    tempfile_counter: u32,
    timer: TimerState,
    windows: GlkObjectStore<Window>,
    working_dir: PathBuf,
}

impl<S: GlkSystem> GlkApi<S> {
    pub fn new(system: S, support: SupportCaps) -> Self {
        GlkApi {
            current_stream: None,
            debug_handler: None,
            debug_output: Vec::new(),
            dispatch: None,
            filerefs: GlkObjectStore::new(),
            focus_win: None,
            gen: 0,
            geometry_changed: true,
            interrupt_handler: None,
            last_event_type: LastEventType::Uninitialised,
            metrics: NormalisedMetrics::default(),
            resource_map: None,
            resource_url: None,
            root_win: None,
            single_turn: false,
            streams: GlkObjectStore::new(),
            support,
            system,
            tempfile_counter: 0,
            timer: TimerState {
                interval: 0,
                last_sent: 0,
                started: None,
            },
            windows: GlkObjectStore::new(),
            working_dir: PathBuf::from("."),
        }
    }

    // The initial handshake

    /** Block for the client's `init` event, adopting its metrics and
        capabilities. This must happen before the game's main entry point. */
    pub fn get_init_event(&mut self) -> GlkResult<()> {
        let event = self.system.get_event()?;
        match event.data {
            EventData::Init(init) => {
                self.metrics = init.metrics.try_into()?;
                self.support.merge(&SupportCaps::from_list(&init.support));
                self.last_event_type = LastEventType::Normal(GlkEventType::Arrange);
                Ok(())
            },
            _ => Err(FirstEventMustBeInit),
        }
    }

    /** Skip the handshake, using fixed metrics configured at startup. An
        imaginary arrange is recorded so the first `select` still behaves as
        if arrangement had occurred. */
    pub fn use_fixed_metrics(&mut self, width: f64, height: f64) -> GlkResult<()> {
        self.metrics = Metrics::new(width, height).try_into()?;
        self.last_event_type = LastEventType::Normal(GlkEventType::Arrange);
        Ok(())
    }

    pub fn current_generation(&self) -> u32 {
        self.gen
    }

    pub fn last_event_type(&self) -> LastEventType {
        self.last_event_type
    }

    pub fn support(&self) -> SupportCaps {
        self.support
    }

    pub fn set_debug_handler(&mut self, handler: Box<dyn DebugHandler>) {
        self.debug_handler = Some(handler);
    }

    /** Queue a line for the next update's `debugoutput` */
    pub fn debug_output(&mut self, line: String) {
        self.debug_output.push(line);
    }

    pub fn set_working_dir(&mut self, dir: PathBuf) {
        self.working_dir = dir;
    }

    /** Install the dispatch registry. All existing objects are registered
        at this moment. */
    pub fn set_dispatch_registry(&mut self, dispatch: Box<dyn Dispatch>) {
        self.dispatch = Some(dispatch);
        for tag in self.windows.tags() {
            self.dispatch_register(ObjectClass::Window, tag);
        }
        for tag in self.streams.tags() {
            self.dispatch_register(ObjectClass::Stream, tag);
        }
        for tag in self.filerefs.tags() {
            self.dispatch_register(ObjectClass::Fileref, tag);
        }
    }

    fn strict_warning(&mut self, msg: &str) {
        log::warn!("{}", msg);
        self.system.send_warning(msg);
    }

    // Dispatch layer plumbing

    fn dispatch_register(&mut self, class: ObjectClass, tag: u32) {
        if let Some(dispatch) = self.dispatch.as_mut() {
            let disprock = dispatch.register_object(class, tag);
            match class {
                ObjectClass::Window => self.windows.set_disprock(tag, disprock),
                ObjectClass::Stream => self.streams.set_disprock(tag, disprock),
                ObjectClass::Fileref => self.filerefs.set_disprock(tag, disprock),
            }
        }
    }

    fn dispatch_unregister(&mut self, class: ObjectClass, tag: u32) {
        if let Some(dispatch) = self.dispatch.as_mut() {
            let disprock = match class {
                ObjectClass::Window => self.windows.get_disprock(tag),
                ObjectClass::Stream => self.streams.get_disprock(tag),
                ObjectClass::Fileref => self.filerefs.get_disprock(tag),
            };
            if let Some(disprock) = disprock {
                dispatch.unregister_object(class, tag, disprock);
            }
        }
    }

    fn retain_array(&mut self, buf: &GlkOwnedBuffer) -> Option<DispatchRock> {
        self.dispatch.as_mut().map(|dispatch| dispatch.retain_array(buf))
    }

    fn unretain_array(&mut self, buf: &GlkOwnedBuffer, disprock: Option<DispatchRock>) {
        if let (Some(dispatch), Some(disprock)) = (self.dispatch.as_mut(), disprock) {
            dispatch.unretain_array(buf, disprock);
        }
    }

    // Windows

    fn content_box(&self) -> WindowBox {
        WindowBox {
            left: self.metrics.outspacingx,
            top: self.metrics.outspacingy,
            right: self.metrics.width - self.metrics.outspacingx,
            bottom: self.metrics.height - self.metrics.outspacingy,
        }
    }

    fn create_window(&mut self, data: WindowData, rock: u32) -> u32 {
        let wintag = self.windows.register(Window::new(data, 0), rock);
        let strtag = self.streams.register(Stream::new_window(wintag), 0);
        self.windows.get_mut(wintag).unwrap().streamtag = strtag;
        self.dispatch_register(ObjectClass::Window, wintag);
        self.dispatch_register(ObjectClass::Stream, strtag);
        wintag
    }

    pub fn glk_window_open(&mut self, splitwin: Option<u32>, method: u32, size: u32, wintype: u32, rock: u32) -> GlkResult<u32> {
        let wintype = match window_type(wintype) {
            Some(WindowType::Pair) | Some(WindowType::All) | None => return Err(InvalidWindowType),
            Some(wintype) => wintype,
        };

        let (wbox, oldparent, splitwin) = match self.root_win {
            None => {
                if splitwin.is_some() {
                    self.strict_warning("window_open: splitwin must be null for first window");
                    return Err(SplitMustBeNull);
                }
                (self.content_box(), None, None)
            },
            Some(_) => {
                let Some(splittag) = splitwin else {
                    self.strict_warning("window_open: invalid splitwin");
                    return Err(InvalidSplitwin);
                };
                if let Err(err) = validate_winmethod(method, wintype) {
                    let msg = format!("window_open: {}", err);
                    self.strict_warning(&msg);
                    return Err(err);
                }
                let split = win!(self, splittag);
                let oldparent = split.parent;
                if let Some(oldparent) = oldparent {
                    if win!(self, oldparent).wintype() != WindowType::Pair {
                        self.strict_warning("window_open: split window's parent isn't a pair window");
                        return Err(SplitParentIsntPair);
                    }
                }
                (split.bbox, oldparent, Some(splittag))
            },
        };

        if wintype == WindowType::Graphics && !self.support.graphicswin {
            // Graphics windows not supported; silently refuse
            return Err(GraphicsNotSupported);
        }

        let data = match wintype {
            WindowType::Blank => WindowData::Blank(BlankWindow::default()),
            WindowType::Buffer => WindowData::Buffer(BufferWindow::default()),
            WindowType::Graphics => WindowData::Graphics(GraphicsWindow::default()),
            WindowType::Grid => WindowData::Grid(GridWindow::default()),
            _ => return Err(InvalidWindowType),
        };
        let newtag = self.create_window(data, rock);

        match splitwin {
            None => {
                self.root_win = Some(newtag);
                self.rearrange_window(newtag, wbox)?;
            },
            Some(splittag) => {
                let mut pairdata = PairWindow::new(method, newtag, size);
                pairdata.child1 = splittag;
                pairdata.child2 = newtag;
                let pairtag = self.create_window(WindowData::Pair(pairdata), 0);
                win_mut!(self, splittag).parent = Some(pairtag);
                win_mut!(self, newtag).parent = Some(pairtag);
                win_mut!(self, pairtag).parent = oldparent;
                match oldparent {
                    Some(oldparent) => {
                        let pair = win_mut!(self, oldparent).pair_mut().ok_or(NotPairWindow)?;
                        if pair.child1 == splittag {
                            pair.child1 = pairtag;
                        }
                        else {
                            pair.child2 = pairtag;
                        }
                    },
                    None => {
                        self.root_win = Some(pairtag);
                    },
                }
                self.rearrange_window(pairtag, wbox)?;
            },
        }

        Ok(newtag)
    }

    pub fn glk_window_close(&mut self, wintag: u32) -> GlkResult<StreamResult> {
        let win = win!(self, wintag);
        let result = str!(self, win.streamtag).fill_result();
        let parent = win.parent;

        if self.root_win == Some(wintag) || parent.is_none() {
            // Closing the root window tears down everything
            self.root_win = None;
            self.geometry_changed = true;
            self.close_window_recursive(wintag)?;
            return Ok(result);
        }

        let pairtag = parent.unwrap();
        let pair_win = win!(self, pairtag);
        let wbox = pair_win.bbox;
        let grandparent = pair_win.parent;
        let sibling = pair_win.pair()
            .and_then(|pair| pair.sibling_of(wintag))
            .ok_or(InvalidReference)?;

        // The sibling replaces the pair in the grandparent, or becomes root
        match grandparent {
            None => {
                self.root_win = Some(sibling);
                win_mut!(self, sibling).parent = None;
            },
            Some(gptag) => {
                {
                    let pair = win_mut!(self, gptag).pair_mut().ok_or(NotPairWindow)?;
                    if pair.child1 == pairtag {
                        pair.child1 = sibling;
                    }
                    else {
                        pair.child2 = sibling;
                    }
                }
                win_mut!(self, sibling).parent = Some(gptag);
            },
        }

        // Close the subtree first, so key damage can crawl up to the root
        self.close_window_recursive(wintag)?;
        self.delete_window(pairtag)?;

        // If any surviving ancestor lost its key, the whole tree must be
        // recomputed from the root
        let mut keydamage = false;
        let mut next = Some(sibling);
        while let Some(tag) = next {
            let win = win_mut!(self, tag);
            next = win.parent;
            if let Some(pair) = win.pair_mut() {
                if pair.keydamage {
                    keydamage = true;
                    pair.keydamage = false;
                }
            }
        }
        if keydamage {
            let content_box = self.content_box();
            let root = self.root_win.ok_or(InvalidReference)?;
            self.rearrange_window(root, content_box)?;
        }
        else {
            self.rearrange_window(sibling, wbox)?;
        }

        Ok(result)
    }

    fn close_window_recursive(&mut self, wintag: u32) -> GlkResult<()> {
        let children = self.windows.get(wintag)
            .and_then(|win| win.pair())
            .map(|pair| (pair.child1, pair.child2));
        if let Some((child1, child2)) = children {
            self.close_window_recursive(child1)?;
            self.close_window_recursive(child2)?;
        }
        self.delete_window(wintag)
    }

    fn delete_window(&mut self, wintag: u32) -> GlkResult<()> {
        if self.focus_win == Some(wintag) {
            self.focus_win = None;
        }

        // Record key damage on any ancestor pair keyed to this window
        let mut ancestor = win!(self, wintag).parent;
        while let Some(ptag) = ancestor {
            match self.windows.get_mut(ptag) {
                Some(parent) => {
                    ancestor = parent.parent;
                    if let Some(pair) = parent.pair_mut() {
                        if pair.key == Some(wintag) {
                            pair.key = None;
                            pair.keydamage = true;
                        }
                    }
                },
                None => break,
            }
        }

        // Release any in-flight line input buffer
        let input_buf = {
            let win = win_mut!(self, wintag);
            match &mut win.data {
                WindowData::Buffer(data) => data.line_input.take().map(|input| (input.buf, input.disprock)),
                WindowData::Grid(data) => data.line_input.take().map(|input| (input.buf, input.disprock)),
                _ => None,
            }
        };
        if let Some((buf, disprock)) = input_buf {
            self.unretain_array(&buf, disprock);
        }

        let strtag = win!(self, wintag).streamtag;
        self.delete_stream(strtag)?;
        self.dispatch_unregister(ObjectClass::Window, wintag);
        self.windows.unregister(wintag);
        Ok(())
    }

    fn rearrange_window(&mut self, wintag: u32, wbox: WindowBox) -> GlkResult<()> {
        self.geometry_changed = true;
        {
            let metrics = self.metrics;
            let win = win_mut!(self, wintag);
            win.bbox = wbox;
            match &mut win.data {
                WindowData::Buffer(data) => data.rearrange(&wbox),
                WindowData::Graphics(data) => data.rearrange(&wbox, &metrics),
                WindowData::Grid(data) => data.rearrange(&wbox, &metrics),
                _ => {},
            }
        }
        let pair_info = self.windows.get(wintag)
            .and_then(|win| win.pair())
            .map(|pair| (pair.child1, pair.child2, pair.key));
        if let Some((child1, child2, key)) = pair_info {
            let keytype = key.and_then(|tag| self.windows.get(tag)).map(|win| win.wintype());
            let (box1, box2) = win_mut!(self, wintag).pair_mut()
                .ok_or(NotPairWindow)?
                .compute_split(wbox, keytype);
            self.rearrange_window(child1, box1)?;
            self.rearrange_window(child2, box2)?;
        }
        Ok(())
    }

    fn metrics_change(&mut self, metrics: Metrics) -> GlkResult<()> {
        self.metrics = metrics.try_into()?;
        if let Some(root) = self.root_win {
            let content_box = self.content_box();
            self.rearrange_window(root, content_box)?;
        }
        Ok(())
    }

    pub fn glk_window_get_rock(&self, wintag: u32) -> GlkResult<u32> {
        self.windows.get_rock(wintag).ok_or(InvalidReference)
    }

    pub fn glk_window_get_root(&self) -> Option<u32> {
        self.root_win
    }

    pub fn glk_window_get_parent(&self, wintag: u32) -> GlkResult<Option<u32>> {
        Ok(win!(self, wintag).parent)
    }

    pub fn glk_window_get_sibling(&self, wintag: u32) -> GlkResult<Option<u32>> {
        let win = win!(self, wintag);
        match win.parent {
            None => Ok(None),
            Some(ptag) => {
                let pair = win!(self, ptag).pair().ok_or(NotPairWindow)?;
                Ok(pair.sibling_of(wintag))
            },
        }
    }

    pub fn glk_window_get_type(&self, wintag: u32) -> GlkResult<WindowType> {
        Ok(win!(self, wintag).wintype())
    }

    pub fn glk_window_iterate(&self, wintag: Option<u32>) -> Option<IterationResult> {
        self.windows.iterate(wintag)
    }

    pub fn glk_window_get_size(&self, wintag: u32) -> GlkResult<(u32, u32)> {
        let win = win!(self, wintag);
        let metrics = &self.metrics;
        let wbox = &win.bbox;
        Ok(match win.wintype() {
            WindowType::Grid => (
                (((wbox.width() - metrics.gridmarginx) / metrics.gridcharwidth).floor()).max(0.0) as u32,
                (((wbox.height() - metrics.gridmarginy) / metrics.gridcharheight).floor()).max(0.0) as u32,
            ),
            WindowType::Buffer => (
                (((wbox.width() - metrics.buffermarginx) / metrics.buffercharwidth).floor()).max(0.0) as u32,
                (((wbox.height() - metrics.buffermarginy) / metrics.buffercharheight).floor()).max(0.0) as u32,
            ),
            WindowType::Graphics => (
                (wbox.width() - metrics.graphicsmarginx).max(0.0) as u32,
                (wbox.height() - metrics.graphicsmarginy).max(0.0) as u32,
            ),
            _ => (0, 0),
        })
    }

    pub fn glk_window_get_arrangement(&self, wintag: u32) -> GlkResult<(u32, u32, Option<u32>)> {
        let pair = win!(self, wintag).pair().ok_or(NotPairWindow)?;
        Ok((pair.method(), pair.size, pair.key))
    }

    pub fn glk_window_set_arrangement(&mut self, wintag: u32, method: u32, size: u32, keywin: Option<u32>) -> GlkResult<()> {
        {
            let win = win!(self, wintag);
            if win.pair().is_none() {
                return Err(NotPairWindow);
            }
        }
        if let Some(keytag) = keywin {
            if win!(self, keytag).wintype() == WindowType::Pair {
                return Err(KeywinCantBePair);
            }
            // The key must be a descendant of this pair
            let mut next = Some(keytag);
            let mut found = false;
            while let Some(tag) = next {
                if tag == wintag {
                    found = true;
                    break;
                }
                next = win!(self, tag).parent;
            }
            if !found {
                return Err(KeywinMustBeDescendant);
            }
        }

        let wbox = win!(self, wintag).bbox;
        let newdir = method & winmethod_DirMask;
        let newvertical = newdir == winmethod_Left || newdir == winmethod_Right;
        let newbackward = newdir == winmethod_Left || newdir == winmethod_Above;

        let keytag = match keywin {
            Some(tag) => Some(tag),
            None => win!(self, wintag).pair().and_then(|pair| pair.key),
        };
        if let Some(keytag) = keytag {
            if win!(self, keytag).wintype() == WindowType::Blank
                && (method & winmethod_DivisionMask) == winmethod_Fixed {
                return Err(InvalidWindowDivisionBlank);
            }
        }

        {
            let pair = win_mut!(self, wintag).pair_mut().ok_or(NotPairWindow)?;
            if newvertical != pair.vertical {
                return Err(CannotChangeWindowSplitDirection);
            }
            if newbackward != pair.backward {
                std::mem::swap(&mut pair.child1, &mut pair.child2);
            }
            pair.dir = newdir;
            pair.division = method & winmethod_DivisionMask;
            pair.key = keytag;
            pair.size = size;
            pair.border = (method & winmethod_BorderMask) == winmethod_Border;
            pair.vertical = newvertical;
            pair.backward = newbackward;
        }
        self.rearrange_window(wintag, wbox)
    }

    pub fn glk_window_clear(&mut self, wintag: u32) -> GlkResult<()> {
        let win = win_mut!(self, wintag);
        if win.input.line_request {
            self.strict_warning("window_clear: window has pending line request");
            return Err(PendingLineInput);
        }
        let (style, hyperlink) = (win.style, win.hyperlink);
        let win = win_mut!(self, wintag);
        win.data.clear(style, hyperlink);
        Ok(())
    }

    pub fn glk_window_get_stream(&self, wintag: u32) -> GlkResult<u32> {
        Ok(win!(self, wintag).streamtag)
    }

    pub fn glk_window_get_echo_stream(&self, wintag: u32) -> GlkResult<Option<u32>> {
        Ok(win!(self, wintag).echostr)
    }

    pub fn glk_window_set_echo_stream(&mut self, wintag: u32, strtag: Option<u32>) -> GlkResult<()> {
        win_mut!(self, wintag).echostr = strtag;
        Ok(())
    }

    pub fn glk_set_window(&mut self, wintag: Option<u32>) -> GlkResult<()> {
        self.current_stream = match wintag {
            None => None,
            Some(wintag) => Some(win!(self, wintag).streamtag),
        };
        Ok(())
    }

    pub fn glk_window_move_cursor(&mut self, wintag: u32, xpos: u32, ypos: u32) -> GlkResult<()> {
        match &mut win_mut!(self, wintag).data {
            WindowData::Grid(data) => {
                data.move_cursor(xpos, ypos);
                Ok(())
            },
            _ => Err(NotGridWindow),
        }
    }

    pub fn glk_window_flow_break(&mut self, wintag: u32) -> GlkResult<()> {
        if let WindowData::Buffer(data) = &mut win_mut!(self, wintag).data {
            data.put_flow_break();
        }
        Ok(())
    }

    // Graphics operations

    pub fn glk_image_get_info(&mut self, image: u32) -> Option<ImageInfo> {
        self.resource_map.as_mut().and_then(|map| map.load_image_info(image))
    }

    pub fn glk_image_draw(&mut self, wintag: u32, image: u32, val1: i32, val2: i32) -> GlkResult<bool> {
        let Some(info) = self.glk_image_get_info(image) else {
            return Ok(false);
        };
        let (width, height) = (info.width, info.height);
        self.draw_image(wintag, info, val1, val2, width, height)
    }

    pub fn glk_image_draw_scaled(&mut self, wintag: u32, image: u32, val1: i32, val2: i32, width: u32, height: u32) -> GlkResult<bool> {
        let Some(info) = self.glk_image_get_info(image) else {
            return Ok(false);
        };
        self.draw_image(wintag, info, val1, val2, width, height)
    }

    fn draw_image(&mut self, wintag: u32, info: ImageInfo, val1: i32, val2: i32, width: u32, height: u32) -> GlkResult<bool> {
        if !self.support.graphics {
            self.strict_warning("image_draw: graphics not supported");
            return Ok(false);
        }
        let win = win_mut!(self, wintag);
        let hyperlink = win.hyperlink;
        let mut span = SpecialSpan::new(SpecialType::Image);
        span.image = info.image;
        span.chunktype = info.chunktype;
        span.width = width;
        span.height = height;
        span.alttext = info.alttext;
        match &mut win.data {
            WindowData::Buffer(data) => {
                span.alignment = val1 as u32;
                span.hyperlink = hyperlink;
                data.put_special(span);
                Ok(true)
            },
            WindowData::Graphics(data) => {
                span.xpos = val1;
                span.ypos = val2;
                data.put_special(span);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    pub fn glk_window_erase_rect(&mut self, wintag: u32, left: i32, top: i32, width: u32, height: u32) -> GlkResult<()> {
        let mut span = SpecialSpan::new(SpecialType::Fill);
        span.hasdimensions = true;
        span.xpos = left;
        span.ypos = top;
        span.width = width;
        span.height = height;
        self.put_graphics_special(wintag, span)
    }

    pub fn glk_window_fill_rect(&mut self, wintag: u32, colour: u32, left: i32, top: i32, width: u32, height: u32) -> GlkResult<()> {
        let mut span = SpecialSpan::new(SpecialType::Fill);
        span.hasdimensions = true;
        span.xpos = left;
        span.ypos = top;
        span.width = width;
        span.height = height;
        span.hascolor = true;
        span.color = colour;
        self.put_graphics_special(wintag, span)
    }

    pub fn glk_window_set_background_color(&mut self, wintag: u32, colour: u32) -> GlkResult<()> {
        let mut span = SpecialSpan::new(SpecialType::SetColor);
        span.hascolor = true;
        span.color = colour;
        self.put_graphics_special(wintag, span)
    }

    fn put_graphics_special(&mut self, wintag: u32, span: SpecialSpan) -> GlkResult<()> {
        match &mut win_mut!(self, wintag).data {
            WindowData::Graphics(data) => {
                data.put_special(span);
                Ok(())
            },
            _ => Err(NotGraphicsWindow),
        }
    }

    // Input requests

    fn request_char(&mut self, wintag: u32, uni: bool) -> GlkResult<()> {
        let gen = self.gen;
        let win = win_mut!(self, wintag);
        if win.input.char_request || win.input.line_request {
            self.strict_warning("request_char_event: window already has keyboard request");
            return Err(PendingKeyboardRequest);
        }
        let win = win_mut!(self, wintag);
        match win.wintype() {
            WindowType::Buffer | WindowType::Grid => {
                win.input.char_request = true;
                win.input.char_request_uni = uni;
                win.input.gen = gen + 1;
                Ok(())
            },
            _ => {
                self.strict_warning("request_char_event: window does not support keyboard input");
                Err(WindowDoesntSupportKeyboardInput)
            },
        }
    }

    pub fn glk_request_char_event(&mut self, wintag: u32) -> GlkResult<()> {
        self.request_char(wintag, false)
    }

    pub fn glk_request_char_event_uni(&mut self, wintag: u32) -> GlkResult<()> {
        self.request_char(wintag, true)
    }

    pub fn glk_cancel_char_event(&mut self, wintag: u32) -> GlkResult<()> {
        let win = win_mut!(self, wintag);
        win.input.char_request = false;
        win.input.char_request_uni = false;
        win.input.gen = 0;
        Ok(())
    }

    fn request_line(&mut self, wintag: u32, buf: GlkOwnedBuffer, initlen: u32, uni: bool) -> GlkResult<()> {
        let gen = self.gen;
        {
            let win = win_mut!(self, wintag);
            if win.input.char_request || win.input.line_request {
                self.strict_warning("request_line_event: window already has keyboard request");
                return Err(PendingKeyboardRequest);
            }
        }
        match win!(self, wintag).wintype() {
            WindowType::Buffer | WindowType::Grid => {},
            _ => {
                self.strict_warning("request_line_event: window does not support keyboard input");
                return Err(WindowDoesntSupportKeyboardInput);
            },
        }

        let disprock = self.retain_array(&buf);
        let win = win_mut!(self, wintag);
        win.input.line_request = true;
        win.input.line_request_uni = uni;
        win.input.gen = gen + 1;
        let echo = win.input.echo_line_input;
        let terminators = win.input.terminators;
        let origstyle = win.style;
        let orighyperlink = win.hyperlink;
        win.style = style_Input;
        match &mut win.data {
            WindowData::Buffer(data) => data.init_line(buf, initlen as usize, echo, terminators, origstyle, orighyperlink, disprock),
            WindowData::Grid(data) => data.init_line(buf, initlen as usize, echo, terminators, origstyle, disprock),
            _ => unreachable!(),
        }
        Ok(())
    }

    pub fn glk_request_line_event(&mut self, wintag: u32, buf: Box<[u8]>, initlen: u32) -> GlkResult<()> {
        self.request_line(wintag, GlkOwnedBuffer::U8(buf), initlen, false)
    }

    pub fn glk_request_line_event_uni(&mut self, wintag: u32, buf: Box<[u32]>, initlen: u32) -> GlkResult<()> {
        self.request_line(wintag, GlkOwnedBuffer::U32(buf), initlen, true)
    }

    /** Cancel pending line input, exporting whatever was typed so far */
    pub fn glk_cancel_line_event(&mut self, wintag: u32) -> GlkResult<GlkEvent> {
        if !win!(self, wintag).input.line_request {
            return Ok(GlkEvent::default());
        }
        self.finish_line_input(wintag, 0)
    }

    pub fn glk_request_hyperlink_event(&mut self, wintag: u32) -> GlkResult<()> {
        if !self.support.hyperlinks {
            return Ok(());
        }
        let win = win_mut!(self, wintag);
        match win.wintype() {
            WindowType::Buffer | WindowType::Grid => {
                win.input.hyperlink_request = true;
                Ok(())
            },
            _ => Err(WindowDoesntSupportKeyboardInput),
        }
    }

    pub fn glk_cancel_hyperlink_event(&mut self, wintag: u32) -> GlkResult<()> {
        if !self.support.hyperlinks {
            return Ok(());
        }
        win_mut!(self, wintag).input.hyperlink_request = false;
        Ok(())
    }

    /** There is nothing useful to do about mouse input over a JSON pipe */
    pub fn glk_request_mouse_event(&mut self, _wintag: u32) {}

    pub fn glk_cancel_mouse_event(&mut self, _wintag: u32) {}

    pub fn glk_set_echo_line_event(&mut self, wintag: u32, val: u32) -> GlkResult<()> {
        win_mut!(self, wintag).input.echo_line_input = val != 0;
        Ok(())
    }

    pub fn glk_set_terminators_line_event(&mut self, wintag: u32, keycodes: &[u32]) -> GlkResult<()> {
        win_mut!(self, wintag).input.terminators = terminators_to_mask(keycodes);
        Ok(())
    }

    /** Commit line input: export to the caller's buffer, restore the
        window's style, echo if requested, and build the event */
    fn finish_line_input(&mut self, wintag: u32, terminator: u32) -> GlkResult<GlkEvent> {
        let (buf, disprock, echo, origstyle, orighyperlink, text) = {
            let win = win_mut!(self, wintag);
            let orighyperlink = win.hyperlink;
            match &mut win.data {
                WindowData::Buffer(data) => match data.complete_line() {
                    Some((input, text)) => (input.buf, input.disprock, input.echo, input.origstyle, input.orighyperlink, text),
                    None => return Ok(GlkEvent::default()),
                },
                WindowData::Grid(data) => match data.complete_line() {
                    Some((input, text)) => (input.buf, input.disprock, input.echo, input.origstyle, orighyperlink, text),
                    None => return Ok(GlkEvent::default()),
                },
                _ => return Err(WindowDoesntSupportKeyboardInput),
            }
        };

        let len = text.len().min(buf.len()) as u32;

        // Echo the accepted line before the style is restored, so it lands
        // in input style on the echo stream too
        if echo {
            let echostr = win!(self, wintag).echostr;
            if let Some(echotag) = echostr {
                self.stream_echo_line(echotag, &text)?;
            }
        }

        {
            let win = win_mut!(self, wintag);
            win.style = origstyle;
            win.hyperlink = orighyperlink;
            win.input.line_request = false;
            win.input.line_request_uni = false;
            win.input.gen = 0;
            if let WindowData::Buffer(data) = &mut win.data {
                data.set_last_run(origstyle, orighyperlink);
                if echo {
                    data.put_char('\n' as u32, origstyle, orighyperlink);
                }
            }
        }

        self.unretain_array(&buf, disprock);

        Ok(GlkEvent {
            buf: Some(buf),
            evtype: GlkEventType::Line,
            win: Some(wintag),
            val1: len,
            val2: terminator,
        })
    }

    // Streams

    pub fn glk_stream_get_current(&self) -> Option<u32> {
        self.current_stream
    }

    pub fn glk_stream_set_current(&mut self, strtag: Option<u32>) {
        self.current_stream = strtag;
    }

    pub fn glk_stream_get_rock(&self, strtag: u32) -> GlkResult<u32> {
        self.streams.get_rock(strtag).ok_or(InvalidReference)
    }

    pub fn glk_stream_iterate(&self, strtag: Option<u32>) -> Option<IterationResult> {
        self.streams.iterate(strtag)
    }

    pub fn glk_stream_open_memory(&mut self, buf: Box<[u8]>, fmode: FileMode, rock: u32) -> GlkResult<u32> {
        self.stream_open_memory(GlkOwnedBuffer::U8(buf), fmode, false, rock)
    }

    pub fn glk_stream_open_memory_uni(&mut self, buf: Box<[u32]>, fmode: FileMode, rock: u32) -> GlkResult<u32> {
        self.stream_open_memory(GlkOwnedBuffer::U32(buf), fmode, true, rock)
    }

    fn stream_open_memory(&mut self, buf: GlkOwnedBuffer, fmode: FileMode, uni: bool, rock: u32) -> GlkResult<u32> {
        if fmode == FileMode::WriteAppend {
            self.strict_warning("stream_open_memory: illegal filemode");
            return Err(IllegalFilemode);
        }
        let disprock = self.retain_array(&buf);
        let mut str = Stream::new_memory(buf, fmode, uni);
        if let StreamData::Memory(data) = &mut str.data {
            data.disprock = disprock;
        }
        let strtag = self.streams.register(str, rock);
        self.dispatch_register(ObjectClass::Stream, strtag);
        Ok(strtag)
    }

    pub fn glk_stream_open_file(&mut self, freftag: u32, fmode: FileMode, rock: u32) -> GlkResult<Option<u32>> {
        self.stream_open_file(freftag, fmode, false, rock)
    }

    pub fn glk_stream_open_file_uni(&mut self, freftag: u32, fmode: FileMode, rock: u32) -> GlkResult<Option<u32>> {
        self.stream_open_file(freftag, fmode, true, rock)
    }

    fn stream_open_file(&mut self, freftag: u32, fmode: FileMode, uni: bool, rock: u32) -> GlkResult<Option<u32>> {
        let fileref = fref!(self, freftag).clone();
        let str = match Stream::open_file(&fileref, fmode, uni) {
            Ok(Some(str)) => str,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.strict_warning("stream_open_file: unable to open file");
                return Err(err);
            },
        };
        let strtag = self.streams.register(str, rock);
        self.dispatch_register(ObjectClass::Stream, strtag);
        Ok(Some(strtag))
    }

    /** Open a file stream directly from a pathname; used by startup code
        and the autosave machinery */
    pub fn stream_open_pathname(&mut self, pathname: &str, writemode: bool, textmode: bool, rock: u32) -> GlkResult<Option<u32>> {
        let fileref = FileRef {
            filename: pathname.to_string(),
            filetype: FileType::Data,
            textmode,
        };
        let fmode = if writemode {FileMode::Write} else {FileMode::Read};
        match Stream::open_file(&fileref, fmode, false)? {
            Some(str) => {
                let strtag = self.streams.register(str, rock);
                self.dispatch_register(ObjectClass::Stream, strtag);
                Ok(Some(strtag))
            },
            None => Ok(None),
        }
    }

    fn stream_open_resource(&mut self, filenum: u32, uni: bool, rock: u32) -> GlkResult<Option<u32>> {
        let Some(chunk) = self.resource_map.as_mut().and_then(|map| map.load_resource_chunk(filenum)) else {
            return Ok(None);
        };
        let str = Stream::new_resource(chunk, filenum, uni);
        let strtag = self.streams.register(str, rock);
        self.dispatch_register(ObjectClass::Stream, strtag);
        Ok(Some(strtag))
    }

    pub fn glk_stream_open_resource(&mut self, filenum: u32, rock: u32) -> GlkResult<Option<u32>> {
        self.stream_open_resource(filenum, false, rock)
    }

    pub fn glk_stream_open_resource_uni(&mut self, filenum: u32, rock: u32) -> GlkResult<Option<u32>> {
        self.stream_open_resource(filenum, true, rock)
    }

    pub fn glk_stream_close(&mut self, strtag: u32) -> GlkResult<StreamResult> {
        let str = str_mut!(self, strtag);
        if str.wintag().is_some() {
            self.strict_warning("stream_close: cannot close window stream");
            return Err(CannotCloseWindowStream);
        }
        if let StreamData::File(data) = &mut str.data {
            let _ = data.file.flush();
        }
        self.delete_stream(strtag)
    }

    fn delete_stream(&mut self, strtag: u32) -> GlkResult<StreamResult> {
        // Clear any echo references to this stream before it goes
        for wintag in self.windows.tags() {
            let win = self.windows.get_mut(wintag).unwrap();
            if win.echostr == Some(strtag) {
                win.echostr = None;
            }
        }
        if self.current_stream == Some(strtag) {
            self.current_stream = None;
        }
        self.dispatch_unregister(ObjectClass::Stream, strtag);
        let str = self.streams.unregister(strtag).ok_or(InvalidReference)?;
        let result = str.fill_result();
        if let StreamData::Memory(data) = str.data {
            self.unretain_array(&data.buf, data.disprock);
        }
        Ok(result)
    }

    pub fn glk_stream_get_position(&mut self, strtag: u32) -> GlkResult<u32> {
        Ok(str_mut!(self, strtag).get_position())
    }

    pub fn glk_stream_set_position(&mut self, strtag: u32, pos: i32, seekmode: SeekMode) -> GlkResult<()> {
        str_mut!(self, strtag).set_position(seekmode, pos);
        Ok(())
    }

    // Output

    pub fn glk_put_char(&mut self, ch: u8) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.put_char_to_stream(strtag, ch as u32)
    }

    pub fn glk_put_char_uni(&mut self, ch: u32) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.put_char_to_stream(strtag, ch)
    }

    pub fn glk_put_char_stream(&mut self, strtag: u32, ch: u8) -> GlkResult<()> {
        self.put_char_to_stream(strtag, ch as u32)
    }

    pub fn glk_put_char_stream_uni(&mut self, strtag: u32, ch: u32) -> GlkResult<()> {
        self.put_char_to_stream(strtag, ch)
    }

    pub fn glk_put_buffer(&mut self, buf: &[u8]) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.put_buffer_to_stream(strtag, &GlkBuffer::U8(buf))
    }

    pub fn glk_put_buffer_uni(&mut self, buf: &[u32]) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.put_buffer_to_stream(strtag, &GlkBuffer::U32(buf))
    }

    pub fn glk_put_buffer_stream(&mut self, strtag: u32, buf: &[u8]) -> GlkResult<()> {
        self.put_buffer_to_stream(strtag, &GlkBuffer::U8(buf))
    }

    pub fn glk_put_buffer_stream_uni(&mut self, strtag: u32, buf: &[u32]) -> GlkResult<()> {
        self.put_buffer_to_stream(strtag, &GlkBuffer::U32(buf))
    }

    pub fn glk_put_string(&mut self, str: &str) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.put_buffer_to_stream(strtag, &GlkBuffer::U32(&str_to_u32vec(str)))
    }

    pub fn glk_put_string_stream(&mut self, strtag: u32, str: &str) -> GlkResult<()> {
        self.put_buffer_to_stream(strtag, &GlkBuffer::U32(&str_to_u32vec(str)))
    }

    fn put_char_to_stream(&mut self, strtag: u32, ch: u32) -> GlkResult<()> {
        match str!(self, strtag).wintag() {
            Some(wintag) => {
                if win!(self, wintag).input.line_request {
                    self.strict_warning("put_char: window has pending line request");
                    return Ok(());
                }
                {
                    let win = win_mut!(self, wintag);
                    let (style, hyperlink) = (win.style, win.hyperlink);
                    win.data.put_char(ch, style, hyperlink);
                }
                str_mut!(self, strtag).writecount += 1;
                if let Some(echotag) = win!(self, wintag).echostr {
                    self.put_char_to_stream(echotag, ch)?;
                }
                Ok(())
            },
            None => {
                str_mut!(self, strtag).put_char(ch);
                Ok(())
            },
        }
    }

    fn put_buffer_to_stream(&mut self, strtag: u32, buf: &GlkBuffer) -> GlkResult<()> {
        match str!(self, strtag).wintag() {
            Some(wintag) => {
                if win!(self, wintag).input.line_request {
                    self.strict_warning("put_buffer: window has pending line request");
                    return Ok(());
                }
                {
                    let win = win_mut!(self, wintag);
                    let (style, hyperlink) = (win.style, win.hyperlink);
                    for i in 0..buf.len() {
                        win.data.put_char(buf.get_u32(i), style, hyperlink);
                    }
                }
                str_mut!(self, strtag).writecount += buf.len();
                if let Some(echotag) = win!(self, wintag).echostr {
                    self.put_buffer_to_stream(echotag, buf)?;
                }
                Ok(())
            },
            None => {
                str_mut!(self, strtag).put_buffer(buf);
                Ok(())
            },
        }
    }

    /** Echo accepted line input to an echo stream: the text, tagged as
        input style, followed by a newline, without re-entering the line
        input path */
    fn stream_echo_line(&mut self, strtag: u32, text: &[u32]) -> GlkResult<()> {
        self.put_buffer_to_stream(strtag, &GlkBuffer::U32(text))?;
        self.put_char_to_stream(strtag, '\n' as u32)
    }

    pub fn glk_set_style(&mut self, val: u32) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.glk_set_style_stream(strtag, val)
    }

    pub fn glk_set_style_stream(&mut self, strtag: u32, val: u32) -> GlkResult<()> {
        let val = if val >= style_NUMSTYLES {style_Normal} else {val};
        if let Some(wintag) = str!(self, strtag).wintag() {
            win_mut!(self, wintag).style = val;
            if let Some(echotag) = win!(self, wintag).echostr {
                self.glk_set_style_stream(echotag, val)?;
            }
        }
        Ok(())
    }

    pub fn glk_set_hyperlink(&mut self, val: u32) -> GlkResult<()> {
        let strtag = current_stream!(self);
        self.glk_set_hyperlink_stream(strtag, val)
    }

    pub fn glk_set_hyperlink_stream(&mut self, strtag: u32, val: u32) -> GlkResult<()> {
        if !self.support.hyperlinks {
            return Ok(());
        }
        if let Some(wintag) = str!(self, strtag).wintag() {
            win_mut!(self, wintag).hyperlink = val;
            if let Some(echotag) = win!(self, wintag).echostr {
                self.glk_set_hyperlink_stream(echotag, val)?;
            }
        }
        Ok(())
    }

    // Input from streams

    pub fn glk_get_char_stream(&mut self, strtag: u32) -> GlkResult<i32> {
        Ok(str_mut!(self, strtag).get_char(false))
    }

    pub fn glk_get_char_stream_uni(&mut self, strtag: u32) -> GlkResult<i32> {
        Ok(str_mut!(self, strtag).get_char(true))
    }

    pub fn glk_get_buffer_stream(&mut self, strtag: u32, buf: &mut [u8]) -> GlkResult<u32> {
        Ok(str_mut!(self, strtag).get_buffer(&mut GlkBufferMut::U8(buf)))
    }

    pub fn glk_get_buffer_stream_uni(&mut self, strtag: u32, buf: &mut [u32]) -> GlkResult<u32> {
        Ok(str_mut!(self, strtag).get_buffer(&mut GlkBufferMut::U32(buf)))
    }

    pub fn glk_get_line_stream(&mut self, strtag: u32, buf: &mut [u8]) -> GlkResult<u32> {
        Ok(str_mut!(self, strtag).get_line(&mut GlkBufferMut::U8(buf)))
    }

    pub fn glk_get_line_stream_uni(&mut self, strtag: u32, buf: &mut [u32]) -> GlkResult<u32> {
        Ok(str_mut!(self, strtag).get_line(&mut GlkBufferMut::U32(buf)))
    }

    // Filerefs

    fn create_fileref(&mut self, filename: String, usage: u32, rock: u32) -> u32 {
        let freftag = self.filerefs.register(FileRef::new(filename, usage), rock);
        self.dispatch_register(ObjectClass::Fileref, freftag);
        freftag
    }

    pub fn glk_fileref_create_temp(&mut self, usage: u32, rock: u32) -> GlkResult<u32> {
        let filename = temp_dir().join(format!("glktempfref-{}", self.tempfile_counter));
        self.tempfile_counter += 1;
        Ok(self.create_fileref(filename.to_string_lossy().into_owned(), usage, rock))
    }

    pub fn glk_fileref_create_by_name(&mut self, usage: u32, name: &str, rock: u32) -> GlkResult<u32> {
        let filename = filerefs::cleaned_filename(name, usage, &self.working_dir);
        Ok(self.create_fileref(filename, usage, rock))
    }

    pub fn glk_fileref_create_from_fileref(&mut self, usage: u32, freftag: u32, rock: u32) -> GlkResult<u32> {
        let filename = fref!(self, freftag).filename.clone();
        Ok(self.create_fileref(filename, usage, rock))
    }

    /** Prompt the player for a filename. This is the library's second
        suspension point: an update goes out with a `specialinput` request,
        and we block until a `specialresponse` comes back. Returns None if
        the player cancelled. */
    pub fn glk_fileref_create_by_prompt(&mut self, usage: u32, fmode: u32, rock: u32) -> GlkResult<Option<u32>> {
        let special = SpecialInput {
            request_type: SpecialInputType,
            filemode: file_mode(fmode)?,
            filetype: file_type(usage),
            gameid: None,
        };
        if self.last_event_type != LastEventType::Autorestored {
            self.flush_update(Some(special), true)?;
            if self.single_turn {
                self.flush_all_files();
                self.system.request_exit();
            }
        }

        let value = loop {
            let event = self.system.get_event()?;
            if event.gen != self.gen {
                return Err(WrongGeneration(self.gen, event.gen));
            }
            if let EventData::Special(special) = event.data {
                break special.value;
            }
        };

        // This wasn't a real event, but it does nudge the state machine on
        self.last_event_type = LastEventType::Normal(GlkEventType::None);

        let Some(value) = value else {
            return Ok(None);
        };
        // Only clean Latin-1 text makes a pathname
        let cleaned: String = value.chars()
            .map(|ch| if (ch as u32) < 0x20 || (ch as u32) > 0xFF {'-'} else {ch})
            .collect();
        let trimmed = cleaned.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let filename = filerefs::prompted_filename(trimmed, usage, &self.working_dir);
        Ok(Some(self.create_fileref(filename, usage, rock)))
    }

    pub fn glk_fileref_destroy(&mut self, freftag: u32) -> GlkResult<()> {
        self.dispatch_unregister(ObjectClass::Fileref, freftag);
        self.filerefs.unregister(freftag).ok_or(InvalidReference)?;
        Ok(())
    }

    pub fn glk_fileref_get_rock(&self, freftag: u32) -> GlkResult<u32> {
        self.filerefs.get_rock(freftag).ok_or(InvalidReference)
    }

    pub fn glk_fileref_iterate(&self, freftag: Option<u32>) -> Option<IterationResult> {
        self.filerefs.iterate(freftag)
    }

    pub fn glk_fileref_delete_file(&mut self, freftag: u32) -> GlkResult<()> {
        fref!(self, freftag).delete_file();
        Ok(())
    }

    pub fn glk_fileref_does_file_exist(&self, freftag: u32) -> GlkResult<bool> {
        Ok(fref!(self, freftag).exists())
    }

    // The event loop

    /** The heart of the state machine: flush the window state to the
        client, then read events until one produces something returnable. */
    pub fn glk_select(&mut self) -> GlkResult<GlkEvent> {
        // Send an update before every select, but not if we just autorestored
        if self.last_event_type != LastEventType::Autorestored {
            self.flush_update(None, true)?;
            if self.single_turn {
                self.flush_all_files();
                self.system.request_exit();
            }
        }

        let event = loop {
            let event = self.system.get_event()?;
            if !matches!(event.data, EventData::Refresh) && event.gen != self.gen {
                return Err(WrongGeneration(self.gen, event.gen));
            }
            if let Some(event) = self.dispatch_event(event)? {
                break event;
            }
        };

        self.trim_buffers();
        self.last_event_type = LastEventType::Normal(event.evtype);
        Ok(event)
    }

    /** Every dispatched event either fills the pending slot or keeps the
        loop reading */
    fn dispatch_event(&mut self, event: Event) -> GlkResult<Option<GlkEvent>> {
        match event.data {
            EventData::Refresh => {
                // Repeat the current display state and keep waiting for a
                // real event
                self.geometry_changed = true;
                for wintag in self.windows.tags() {
                    self.windows.get_mut(wintag).unwrap().data.refresh();
                }
                self.flush_update(None, false)?;
                if self.single_turn {
                    self.flush_all_files();
                    self.system.request_exit();
                }
                Ok(None)
            },

            EventData::Arrange(arrange) => {
                self.metrics_change(arrange.metrics)?;
                Ok(Some(GlkEvent {
                    evtype: GlkEventType::Arrange,
                    ..Default::default()
                }))
            },

            EventData::Redraw(redraw) => {
                let win = redraw.window.filter(|tag| self.windows.get(*tag).is_some());
                Ok(Some(GlkEvent {
                    evtype: GlkEventType::Redraw,
                    win,
                    ..Default::default()
                }))
            },

            EventData::Line(line) => {
                let Some(win) = self.windows.get_mut(line.window) else {
                    return Ok(None);
                };
                if !win.input.line_request {
                    return Ok(None);
                }
                let text = str_to_u32vec(&line.value);
                match &mut win.data {
                    WindowData::Buffer(data) => data.prepare_input(&text),
                    WindowData::Grid(data) => data.prepare_input(&text),
                    _ => return Ok(None),
                }
                let terminator = line.terminator.as_deref().map(|key| {
                    let mut chars = key.chars();
                    match (chars.next(), chars.next()) {
                        (Some(ch), None) => ch as u32,
                        _ => key_name_to_code(key),
                    }
                }).unwrap_or(0);
                Ok(Some(self.finish_line_input(line.window, terminator)?))
            },

            EventData::Char(char) => {
                let Some(win) = self.windows.get_mut(char.window) else {
                    return Ok(None);
                };
                if !win.input.char_request {
                    return Ok(None);
                }
                let mut val = char.keycode();
                if !win.input.char_request_uni {
                    // Filter out non-Latin-1 characters, except we also
                    // accept the special keycode range
                    if val >= 0x100 && val < u32::MAX - keycode_MAXVAL {
                        val = QUESTION_MARK;
                    }
                }
                win.input.char_request = false;
                win.input.char_request_uni = false;
                win.input.gen = 0;
                Ok(Some(GlkEvent {
                    evtype: GlkEventType::Char,
                    win: Some(char.window),
                    val1: val,
                    ..Default::default()
                }))
            },

            EventData::Hyperlink(link) => {
                let Some(win) = self.windows.get_mut(link.window) else {
                    return Ok(None);
                };
                if !win.input.hyperlink_request {
                    return Ok(None);
                }
                win.input.hyperlink_request = false;
                Ok(Some(GlkEvent {
                    evtype: GlkEventType::Hyperlink,
                    win: Some(link.window),
                    val1: link.value,
                    ..Default::default()
                }))
            },

            EventData::Timer => {
                self.timer.started = Some(jiff::Timestamp::now());
                Ok(Some(GlkEvent {
                    evtype: GlkEventType::Timer,
                    ..Default::default()
                }))
            },

            EventData::Debug(debug) => {
                if self.debug_handler.is_some() {
                    let lines = self.debug_handler.as_mut().unwrap().perform_command(&debug.value);
                    self.debug_output.extend(lines);
                    self.flush_update(None, true)?;
                    Ok(None)
                }
                else {
                    Ok(Some(GlkEvent {
                        evtype: GlkEventType::Unknown,
                        ..Default::default()
                    }))
                }
            },

            // Everything else (including mouse clicks, which the library
            // never requests) is delivered as an ignorable event
            _ => Ok(Some(GlkEvent {
                evtype: GlkEventType::Unknown,
                ..Default::default()
            })),
        }
    }

    /** Check whether the timer deadline has passed without consulting
        stdin. Only unfired timer events can sensibly be polled for. */
    pub fn glk_select_poll(&mut self) -> GlkEvent {
        if self.support.timer && self.timer.interval > 0 {
            if let Some(started) = self.timer.started {
                let elapsed = jiff::Timestamp::now().as_millisecond() - started.as_millisecond();
                if elapsed >= 0 && elapsed >= self.timer.interval as i64 {
                    self.timer.started = Some(jiff::Timestamp::now());
                    // Resend the timer request at the next update
                    self.timer.last_sent = 0;
                    return GlkEvent {
                        evtype: GlkEventType::Timer,
                        ..Default::default()
                    };
                }
            }
        }
        GlkEvent::default()
    }

    pub fn glk_request_timer_events(&mut self, msecs: u32) {
        if !self.support.timer {
            return;
        }
        self.timer.interval = msecs;
        self.timer.started = Some(jiff::Timestamp::now());
    }

    pub fn timer_interval(&self) -> u32 {
        self.timer.interval
    }

    fn trim_buffers(&mut self) {
        for wintag in self.windows.tags() {
            self.windows.get_mut(wintag).unwrap().data.trim_buffer();
        }
    }

    /** Build and send one update stanza */
    fn flush_update(&mut self, special: Option<SpecialInput>, new_generation: bool) -> GlkResult<()> {
        if new_generation {
            self.gen += 1;
        }
        let mut update = Update {
            gen: self.gen,
            specialinput: special,
            ..Default::default()
        };

        if self.geometry_changed {
            self.geometry_changed = false;
            let mut windows = Vec::new();
            for wintag in self.windows.tags() {
                let win = self.windows.get(wintag).unwrap();
                if win.wintype() == WindowType::Pair {
                    continue;
                }
                let mut dat = WindowUpdate {
                    id: wintag,
                    wintype: win.wintype(),
                    rock: self.windows.get_rock(wintag).unwrap_or(0),
                    gridwidth: None,
                    gridheight: None,
                    graphwidth: None,
                    graphheight: None,
                    left: win.bbox.left,
                    top: win.bbox.top,
                    width: win.bbox.width(),
                    height: win.bbox.height(),
                };
                match &win.data {
                    WindowData::Grid(data) => {
                        dat.gridwidth = Some(data.width as u32);
                        dat.gridheight = Some(data.height as u32);
                    },
                    WindowData::Graphics(data) => {
                        dat.graphwidth = Some(data.graphwidth);
                        dat.graphheight = Some(data.graphheight);
                    },
                    _ => {},
                }
                windows.push(dat);
            }
            update.windows = Some(windows);
        }

        let resource_url = self.resource_url.clone();
        for wintag in self.windows.tags() {
            let win = self.windows.get_mut(wintag).unwrap();
            if let Some(content) = win.data.content_update(wintag, resource_url.as_deref()) {
                update.content.push(content);
            }
        }

        let mut inputs = Vec::new();
        for wintag in self.windows.tags() {
            let win = self.windows.get(wintag).unwrap();
            let mut dat: Option<InputUpdate> = None;
            if win.input.char_request {
                let mut input = InputUpdate::new(wintag);
                input.gen = win.input.gen;
                input.input_type = Some("char");
                if let WindowData::Grid(data) = &win.data {
                    let (x, y) = data.cursor();
                    input.xpos = Some(x as u32);
                    input.ypos = Some(y as u32);
                }
                dat = Some(input);
            }
            else if win.input.line_request {
                let mut input = InputUpdate::new(wintag);
                input.gen = win.input.gen;
                input.input_type = Some("line");
                match &win.data {
                    WindowData::Buffer(data) => {
                        if let Some(line) = &data.line_input {
                            input.maxlen = Some(line.buf.len() as u32);
                            if line.curpos > 0 {
                                input.initial = Some(u32slice_to_string(&line.buf.to_u32vec(0, line.curpos)));
                            }
                        }
                    },
                    WindowData::Grid(data) => {
                        let (x, y) = data.cursor();
                        input.xpos = Some(x as u32);
                        input.ypos = Some(y as u32);
                        if let Some(line) = &data.line_input {
                            input.maxlen = Some(line.maxlen as u32);
                            if line.curpos > 0 {
                                input.initial = Some(u32slice_to_string(&line.buf.to_u32vec(0, line.curpos)));
                            }
                        }
                    },
                    _ => {},
                }
                dat = Some(input);
            }
            if win.input.hyperlink_request {
                dat.get_or_insert_with(|| InputUpdate::new(wintag)).hyperlink = true;
            }
            if let Some(input) = dat {
                inputs.push(input);
            }
        }
        update.input = Some(inputs);

        if self.timer.last_sent != self.timer.interval {
            update.timer = Some(if self.timer.interval == 0 {None} else {Some(self.timer.interval)});
            self.timer.last_sent = self.timer.interval;
        }

        if !self.debug_output.is_empty() {
            update.debugoutput = Some(std::mem::take(&mut self.debug_output));
        }

        self.system.send_update(&update)
    }

    fn flush_all_files(&mut self) {
        for strtag in self.streams.tags() {
            if let Some(str) = self.streams.get_mut(strtag) {
                if let StreamData::File(data) = &mut str.data {
                    let _ = data.file.flush();
                }
            }
        }
    }

    /** Emit the final update and flush everything. The front-end exits the
        process after this returns. */
    pub fn glk_exit(&mut self) -> GlkResult<()> {
        self.flush_update(None, true)?;
        self.flush_all_files();
        Ok(())
    }

    pub fn glk_set_interrupt_handler(&mut self, func: Box<dyn FnMut()>) {
        self.interrupt_handler = Some(func);
    }

    /** Run the game's interrupt function; the front-end calls this on its
        way out of an interrupted process */
    pub fn call_interrupt_handler(&mut self) {
        if let Some(handler) = self.interrupt_handler.as_mut() {
            handler();
        }
        self.flush_all_files();
    }

    pub fn glk_tick(&mut self) {}

    // Gestalt

    pub fn glk_gestalt(&mut self, sel: u32, val: u32) -> u32 {
        self.glk_gestalt_ext(sel, val, None)
    }

    pub fn glk_gestalt_ext(&mut self, sel: u32, val: u32, arr: Option<&mut [u32]>) -> u32 {
        const TRUE: u32 = 1;
        const FALSE: u32 = 0;
        match sel {
            gestalt_Version => GLK_VERSION,

            gestalt_LineInput => ((32..127).contains(&val)) as u32,

            gestalt_CharInput => {
                if (32..127).contains(&val) || val == keycode_Return {
                    TRUE
                }
                else {
                    // Anything Unicode can come in over the wire, except
                    // control characters
                    ((160..0x200000).contains(&val)) as u32
                }
            },

            gestalt_CharOutput => {
                // No translation of printed characters happens, so the
                // output is always one character even if it's wrong
                if let Some(arr) = arr {
                    if !arr.is_empty() {
                        arr[0] = 1;
                    }
                }
                if (32..127).contains(&val) || (160..0x200000).contains(&val) {
                    gestalt_CharOutput_ExactPrint
                }
                else {
                    gestalt_CharOutput_CannotPrint
                }
            },

            gestalt_MouseInput => FALSE,
            gestalt_Timer => self.support.timer as u32,
            gestalt_Graphics | gestalt_GraphicsTransparency => self.support.graphics as u32,
            gestalt_GraphicsCharInput => FALSE,

            gestalt_DrawImage => {
                if self.support.graphics {
                    if val == wintype_TextBuffer {
                        return TRUE;
                    }
                    if val == wintype_Graphics && self.support.graphicswin {
                        return TRUE;
                    }
                }
                FALSE
            },

            gestalt_Unicode | gestalt_UnicodeNorm => TRUE,

            gestalt_Sound | gestalt_SoundVolume | gestalt_SoundNotify | gestalt_SoundMusic | gestalt_Sound2 => FALSE,

            gestalt_Hyperlinks | gestalt_HyperlinkInput => self.support.hyperlinks as u32,

            gestalt_LineInputEcho => TRUE,

            gestalt_LineTerminators => TRUE,
            gestalt_LineTerminatorKey => {
                // The escape and function keys aren't used for anything
                // else, so they may terminate line input
                (val == keycode_Escape || (keycode_Func12..=keycode_Func1).contains(&val)) as u32
            },

            gestalt_ResourceStream => TRUE,
            gestalt_DateTime => FALSE,

            _ => 0,
        }
    }

    // Style hints are accepted but not passed on to the client

    pub fn glk_stylehint_set(&mut self, _wintype: u32, _style: u32, _hint: u32, _val: i32) {}

    pub fn glk_stylehint_clear(&mut self, _wintype: u32, _style: u32, _hint: u32) {}

    pub fn glk_style_distinguish(&self, _wintag: u32, _style1: u32, _style2: u32) -> u32 {
        0
    }

    pub fn glk_style_measure(&self, _wintag: u32, _style: u32, _hint: u32) -> Option<u32> {
        None
    }

    // Latin-1 and Unicode case operations

    pub fn glk_char_to_lower(ch: u32) -> u32 {
        match ch {
            0x41..=0x5A => ch + 0x20,
            0xC0..=0xDE if ch != 0xD7 => ch + 0x20,
            _ => ch,
        }
    }

    pub fn glk_char_to_upper(ch: u32) -> u32 {
        match ch {
            0x61..=0x7A => ch - 0x20,
            0xE0..=0xFE if ch != 0xF7 => ch - 0x20,
            _ => ch,
        }
    }

    pub fn glk_buffer_to_lower_case_uni(buf: &mut [u32], numchars: usize) -> usize {
        Self::map_buffer(buf, numchars, |ch| {
            let mapped = unicode_case_mapping::to_lowercase(ch);
            mapped.into_iter().take_while(|&val| val != 0).collect()
        })
    }

    pub fn glk_buffer_to_upper_case_uni(buf: &mut [u32], numchars: usize) -> usize {
        Self::map_buffer(buf, numchars, |ch| {
            let mapped = unicode_case_mapping::to_uppercase(ch);
            mapped.into_iter().take_while(|&val| val != 0).collect()
        })
    }

    pub fn glk_buffer_to_title_case_uni(buf: &mut [u32], numchars: usize, lowerrest: bool) -> usize {
        let mut first = true;
        Self::map_buffer(buf, numchars, |ch| {
            if std::mem::take(&mut first) {
                let mapped = unicode_case_mapping::to_titlecase(ch);
                mapped.into_iter().take_while(|&val| val != 0).collect()
            }
            else if lowerrest {
                let mapped = unicode_case_mapping::to_lowercase(ch);
                mapped.into_iter().take_while(|&val| val != 0).collect()
            }
            else {
                Vec::new()
            }
        })
    }

    pub fn glk_buffer_canon_decompose_uni(buf: &mut [u32], numchars: usize) -> usize {
        Self::normalize_buffer(buf, numchars, true)
    }

    pub fn glk_buffer_canon_normalize_uni(buf: &mut [u32], numchars: usize) -> usize {
        Self::normalize_buffer(buf, numchars, false)
    }

    fn normalize_buffer(buf: &mut [u32], numchars: usize, decompose: bool) -> usize {
        let numchars = numchars.min(buf.len());
        let chars: Vec<char> = buf[..numchars].iter()
            .map(|&ch| char::from_u32(ch).unwrap_or('\u{FFFD}'))
            .collect();
        let normalized: Vec<u32> = if decompose {
            chars.into_iter().nfd().map(|ch| ch as u32).collect()
        }
        else {
            chars.into_iter().nfc().map(|ch| ch as u32).collect()
        };
        let len = normalized.len();
        let write = len.min(buf.len());
        buf[..write].copy_from_slice(&normalized[..write]);
        len
    }

    /** Glk's case functions return the full converted length, even when it
        doesn't fit back into the buffer */
    fn map_buffer(buf: &mut [u32], numchars: usize, mut func: impl FnMut(char) -> Vec<u32>) -> usize {
        let numchars = numchars.min(buf.len());
        let mut out: Vec<u32> = Vec::with_capacity(numchars);
        for &ch in &buf[..numchars] {
            match char::from_u32(ch) {
                Some(chr) => {
                    let mapped = func(chr);
                    if mapped.is_empty() {
                        out.push(ch);
                    }
                    else {
                        out.extend(mapped);
                    }
                },
                None => out.push(ch),
            }
        }
        let len = out.len();
        let write = len.min(buf.len());
        buf[..write].copy_from_slice(&out[..write]);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub struct NullSystem;

    impl GlkSystem for NullSystem {
        fn get_event(&mut self) -> GlkResult<Event> {
            unreachable!("no events in unit tests")
        }

        fn send_update(&mut self, _update: &Update) -> GlkResult<()> {
            Ok(())
        }

        fn send_warning(&mut self, _msg: &str) {}
    }

    fn glk() -> GlkApi<NullSystem> {
        let mut glk = GlkApi::new(NullSystem, SupportCaps::default());
        glk.use_fixed_metrics(80.0, 24.0).unwrap();
        glk
    }

    fn live_windows(glk: &GlkApi<NullSystem>) -> Vec<u32> {
        let mut tags = Vec::new();
        let mut next = glk.glk_window_iterate(None);
        while let Some(res) = next {
            tags.push(res.tag);
            next = glk.glk_window_iterate(Some(res.tag));
        }
        tags
    }

    #[test]
    fn window_tree_invariants() {
        let mut glk = glk();
        let root = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
        assert_eq!(glk.glk_window_get_root(), Some(root));
        assert_eq!(glk.glk_window_get_size(root).unwrap(), (80, 24));

        let grid = glk.glk_window_open(Some(root), winmethod_Below | winmethod_Fixed, 5, wintype_TextGrid, 2).unwrap();
        assert_eq!(live_windows(&glk).len(), 3);
        let pair = glk.glk_window_get_parent(grid).unwrap().unwrap();
        assert_eq!(glk.glk_window_get_parent(root).unwrap(), Some(pair));
        assert_eq!(glk.glk_window_get_root(), Some(pair));
        assert_eq!(glk.glk_window_get_sibling(grid).unwrap(), Some(root));
        assert_eq!(glk.glk_window_get_type(pair).unwrap(), WindowType::Pair);
        assert_eq!(glk.glk_window_get_size(grid).unwrap(), (80, 5));
        assert_eq!(glk.glk_window_get_size(root).unwrap(), (80, 18));

        let (method, size, key) = glk.glk_window_get_arrangement(pair).unwrap();
        assert_eq!(method, winmethod_Below | winmethod_Fixed | winmethod_Border);
        assert_eq!(size, 5);
        assert_eq!(key, Some(grid));

        // Closing the grid reattaches the buffer as root
        glk.glk_window_close(grid).unwrap();
        assert_eq!(glk.glk_window_get_root(), Some(root));
        assert_eq!(glk.glk_window_get_parent(root).unwrap(), None);
        assert_eq!(live_windows(&glk), vec![root]);
        assert_eq!(glk.glk_window_get_size(root).unwrap(), (80, 24));

        // Closing the root tears down everything
        glk.glk_window_close(root).unwrap();
        assert!(live_windows(&glk).is_empty());
        assert_eq!(glk.glk_window_get_root(), None);
        assert!(glk.glk_stream_iterate(None).is_none());
    }

    #[test]
    fn closing_a_key_damages_the_split() {
        let mut glk = glk();
        let buffer = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
        let grid = glk.glk_window_open(Some(buffer), winmethod_Above | winmethod_Fixed, 3, wintype_TextGrid, 2).unwrap();
        let second = glk.glk_window_open(Some(buffer), winmethod_Below | winmethod_Fixed, 5, wintype_TextGrid, 3).unwrap();

        // Closing the upper grid (a key) must leave a consistent tree
        glk.glk_window_close(grid).unwrap();
        assert_eq!(live_windows(&glk).len(), 3);
        assert_eq!(glk.glk_window_get_size(second).unwrap(), (80, 5));
    }

    #[test]
    fn window_writes_reach_the_buffer() {
        let mut glk = glk();
        let wintag = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
        glk.glk_set_window(Some(wintag)).unwrap();
        glk.glk_put_string("hi").unwrap();
        glk.glk_set_style(style_Emphasized).unwrap();
        glk.glk_put_char(b'!').unwrap();

        let strtag = glk.glk_window_get_stream(wintag).unwrap();
        assert_eq!(glk.streams.get(strtag).unwrap().writecount, 3);
        match &glk.windows.get(wintag).unwrap().data {
            WindowData::Buffer(data) => {
                assert_eq!(data.chars.len(), 3);
                assert_eq!(data.runs.len(), 2);
            },
            _ => panic!("expected buffer window"),
        }
    }

    #[test]
    fn echo_streams_are_weak() {
        let mut glk = glk();
        let wintag = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
        let memtag = glk.glk_stream_open_memory(vec![0; 16].into_boxed_slice(), FileMode::Write, 0).unwrap();
        glk.glk_window_set_echo_stream(wintag, Some(memtag)).unwrap();

        let strtag = glk.glk_window_get_stream(wintag).unwrap();
        glk.glk_put_buffer_stream(strtag, b"abc").unwrap();
        assert_eq!(glk.streams.get(memtag).unwrap().writecount, 3);

        // Deleting the stream clears the echo reference
        glk.glk_stream_close(memtag).unwrap();
        assert_eq!(glk.glk_window_get_echo_stream(wintag).unwrap(), None);
        glk.glk_put_buffer_stream(strtag, b"d").unwrap();
    }

    #[test]
    fn case_operations() {
        let mut buf = [0x41u32, 0xE9, 0x42];
        assert_eq!(GlkApi::<NullSystem>::glk_buffer_to_lower_case_uni(&mut buf, 3), 3);
        assert_eq!(buf, [0x61, 0xE9, 0x62]);
        assert_eq!(GlkApi::<NullSystem>::glk_buffer_to_upper_case_uni(&mut buf, 3), 3);
        assert_eq!(buf, [0x41, 0xC9, 0x42]);

        assert_eq!(GlkApi::<NullSystem>::glk_char_to_lower(0x41), 0x61);
        assert_eq!(GlkApi::<NullSystem>::glk_char_to_upper(0xE9), 0xC9);
        assert_eq!(GlkApi::<NullSystem>::glk_char_to_lower(0xD7), 0xD7);

        // e + combining acute composes to é
        let mut buf = [0x65u32, 0x301, 0, 0];
        assert_eq!(GlkApi::<NullSystem>::glk_buffer_canon_normalize_uni(&mut buf, 2), 1);
        assert_eq!(buf[0], 0xE9);
        let mut buf = [0xE9u32, 0, 0, 0];
        assert_eq!(GlkApi::<NullSystem>::glk_buffer_canon_decompose_uni(&mut buf, 1), 2);
        assert_eq!(&buf[..2], &[0x65, 0x301]);
    }
}
