/*

Autosave/autorestore
====================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::io::{Read, Seek, Write};

use serde::{Deserialize, Serialize};

use crate::GlkSystem;

use super::*;

pub const SERIAL_VERSION: u32 = 1;

pub const strtype_File: u32 = 1;
pub const strtype_Window: u32 = 2;
pub const strtype_Memory: u32 = 3;
pub const strtype_Resource: u32 = 4;

fn is_false(val: &bool) -> bool {
    !val
}

fn is_zero_u32(val: &u32) -> bool {
    *val == 0
}

fn is_zero_f64(val: &f64) -> bool {
    *val == 0.0
}

/** A complete dump of the library state. This is way beyond the documented
    update protocol: every field needed to reconstruct the object graph. */
#[derive(Debug, Deserialize, Serialize)]
pub struct LibraryState {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub version: u32,
    pub generation: u32,
    pub metrics: NormalisedMetrics,
    pub supportcaps: SupportCaps,
    pub windows: Vec<WindowState>,
    pub streams: Vec<StreamState>,
    pub filerefs: Vec<FilerefState>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub timerinterval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootwintag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currentstrtag: Option<u32>,
    /** Caller state carried through verbatim (the game's own dispatch layer
        owns this) */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_state: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WindowState {
    pub tag: u32,
    #[serde(rename = "type")]
    pub wintype: u32,
    pub rock: u32,
    pub bbox: WindowBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parenttag: Option<u32>,
    pub streamtag: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echostreamtag: Option<u32>,
    pub inputgen: u32,
    pub line_request: bool,
    pub line_request_uni: bool,
    pub char_request: bool,
    pub char_request_uni: bool,
    pub hyperlink_request: bool,
    pub echo_line_input: bool,
    pub terminate_line_input: u32,
    pub style: u32,
    pub hyperlink: u32,

    // Pair windows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_child1tag: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_child2tag: Option<u32>,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub pair_splitpos: f64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub pair_splitwidth: f64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub pair_dir: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pair_vertical: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pair_backward: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pair_hasborder: bool,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub pair_division: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_keytag: Option<u32>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub pair_size: u32,

    // Buffer windows
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub buf_width: f64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub buf_height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf_runs: Option<Vec<TextStyleRun>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf_specials: Option<Vec<SpecialSpan>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf_chars: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub buf_ininput: bool,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub buf_incurpos: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub buf_inunicode: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub buf_inecho: bool,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub buf_intermkeys: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub buf_inmax: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub buf_origstyle: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub buf_orighyperlink: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf_line_buffer: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buf_line_buffer_data: Option<String>,

    // Grid windows
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_width: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_height: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_curx: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_cury: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_lines: Option<Vec<GridLineState>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub grid_ininput: bool,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_incurpos: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub grid_inunicode: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub grid_inecho: bool,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_intermkeys: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_inmax: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_inoriglen: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_inorgx: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_inorgy: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub grid_origstyle: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_line_buffer: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_line_buffer_data: Option<String>,

    // Graphics windows
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub graph_width: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub graph_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_content: Option<Vec<SpecialSpan>>,
}

/** One grid row; trailing spaces and trailing zero styles/links are
    truncated away */
#[derive(Debug, Deserialize, Serialize)]
pub struct GridLineState {
    pub chars: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<u32>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StreamState {
    pub tag: u32,
    #[serde(rename = "type")]
    pub streamtype: u32,
    pub rock: u32,
    pub unicode: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub isbinary: bool,
    pub readable: bool,
    pub writable: bool,
    pub readcount: u32,
    pub writecount: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_tag: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_modestr: Option<String>,
    /** Byte position in the file */
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub file_filepos: u32,

    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mem_buflen: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_buf: Option<u64>,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mem_bufptr: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mem_bufeof: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mem_bufend: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_bufdata: Option<String>,

    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub res_fileresnum: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub res_chunktype: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub res_bufptr: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_bufdata: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FilerefState {
    pub tag: u32,
    pub rock: u32,
    pub filename: String,
    pub filetype: u32,
    pub textmode: bool,
}

impl LibraryState {
    pub fn from_reader<R: Read>(reader: R) -> GlkResult<LibraryState> {
        let state: LibraryState = serde_json::from_reader(reader)?;
        if state.version == 0 || state.version > SERIAL_VERSION {
            return Err(GlkApiError::BadAutosaveVersion(state.version));
        }
        Ok(state)
    }
}

/** Latin-1 bytes round-tripped through a JSON string */
fn latin1_to_string(buf: &[u8]) -> String {
    common::u8slice_to_string(buf)
}

fn string_to_latin1(str: &str) -> Vec<u8> {
    str.chars().map(|ch| if (ch as u32) > 0xFF {b'?'} else {ch as u8}).collect()
}

impl<S: GlkSystem> GlkApi<S> {
    /** Dump the complete library state. The stream being written to (if the
        caller is saving through a Glk stream) should be passed as
        `omit_stream` so it isn't serialised into itself. */
    pub fn save_library_state(&mut self, omit_stream: Option<u32>, extra_state: Option<serde_json::Value>) -> LibraryState {
        // Store generation+1: the upcoming update is going to increment the
        // generation, and we want to match it
        let generation = self.gen + 1;

        let windows = self.windows.tags().iter()
            .map(|&tag| self.window_state(tag))
            .collect();
        let streams = self.streams.tags().iter()
            .filter(|&&tag| omit_stream != Some(tag))
            .map(|&tag| self.stream_state(tag))
            .collect();
        let filerefs = self.filerefs.tags().iter()
            .map(|&tag| {
                let fref = self.filerefs.get(tag).unwrap();
                FilerefState {
                    tag,
                    rock: self.filerefs.get_rock(tag).unwrap_or(0),
                    filename: fref.filename.clone(),
                    filetype: fref.filetype as u32,
                    textmode: fref.textmode,
                }
            })
            .collect();

        LibraryState {
            doc_type: "autosave".to_string(),
            version: SERIAL_VERSION,
            generation,
            metrics: self.metrics,
            supportcaps: self.support,
            windows,
            streams,
            filerefs,
            timerinterval: self.timer.interval,
            rootwintag: self.root_win,
            currentstrtag: self.current_stream,
            extra_state,
        }
    }

    pub fn write_library_state<W: Write>(&mut self, writer: W, omit_stream: Option<u32>, extra_state: Option<serde_json::Value>) -> GlkResult<()> {
        let state = self.save_library_state(omit_stream, extra_state);
        serde_json::to_writer(writer, &state)?;
        Ok(())
    }

    fn locate_line_buffer(&self, buf: &GlkOwnedBuffer, disprock: Option<DispatchRock>) -> (Option<u64>, Option<String>) {
        let Some(dispatch) = self.dispatch.as_ref() else {
            return (None, None);
        };
        let Some(disprock) = disprock else {
            return (None, None);
        };
        let (key, elemsize) = dispatch.locate_array(buf, disprock);
        // An element size of zero means: identify the array but do not
        // serialise its contents
        let data = if elemsize > 0 {
            let len = buf.len_without_trailing_zeros();
            Some(common::u32slice_to_string(&buf.to_u32vec(0, len)))
        }
        else {
            None
        };
        (Some(key), data)
    }

    fn window_state(&self, tag: u32) -> WindowState {
        let win = self.windows.get(tag).unwrap();
        let mut state = WindowState {
            tag,
            wintype: win.wintype().wintype(),
            rock: self.windows.get_rock(tag).unwrap_or(0),
            bbox: win.bbox,
            parenttag: win.parent,
            streamtag: win.streamtag,
            echostreamtag: win.echostr,
            inputgen: win.input.gen,
            line_request: win.input.line_request,
            line_request_uni: win.input.line_request_uni,
            char_request: win.input.char_request,
            char_request_uni: win.input.char_request_uni,
            hyperlink_request: win.input.hyperlink_request,
            echo_line_input: win.input.echo_line_input,
            terminate_line_input: win.input.terminators,
            style: win.style,
            hyperlink: win.hyperlink,
            ..Default::default()
        };

        // Dirty state isn't saved: autosave happens just before a select,
        // so a continuously connected client is already up to date

        match &win.data {
            WindowData::Pair(pair) => {
                state.pair_child1tag = Some(pair.child1);
                state.pair_child2tag = Some(pair.child2);
                state.pair_splitpos = pair.splitpos;
                state.pair_splitwidth = pair.splitwidth;
                state.pair_dir = pair.dir;
                state.pair_vertical = pair.vertical;
                state.pair_backward = pair.backward;
                state.pair_hasborder = pair.border;
                state.pair_division = pair.division;
                state.pair_keytag = pair.key;
                state.pair_size = pair.size;
            },

            WindowData::Buffer(buffer) => {
                state.buf_width = buffer.width;
                state.buf_height = buffer.height;
                state.buf_runs = Some(buffer.runs.clone());
                state.buf_specials = Some(buffer.specials.clone());
                state.buf_chars = Some(common::u32slice_to_string(&buffer.chars));
                if let Some(input) = &buffer.line_input {
                    state.buf_ininput = true;
                    state.buf_incurpos = input.curpos as u32;
                    state.buf_inunicode = input.buf.uni();
                    state.buf_inecho = input.echo;
                    state.buf_intermkeys = input.terminators;
                    state.buf_inmax = input.buf.len() as u32;
                    state.buf_origstyle = input.origstyle;
                    state.buf_orighyperlink = input.orighyperlink;
                    let (key, data) = self.locate_line_buffer(&input.buf, input.disprock);
                    state.buf_line_buffer = key;
                    state.buf_line_buffer_data = data;
                }
            },

            WindowData::Grid(grid) => {
                state.grid_width = grid.width as u32;
                state.grid_height = grid.height as u32;
                state.grid_curx = grid.curx as u32;
                state.grid_cury = grid.cury as u32;
                state.grid_lines = Some(grid.lines.iter().map(|line| {
                    let mut len = line.chars.len();
                    while len > 0 && line.chars[len - 1] == ' ' as u32 {
                        len -= 1;
                    }
                    let chars = common::u32slice_to_string(&line.chars[..len]);
                    let mut stylelen = line.styles.len();
                    while stylelen > 0 && line.styles[stylelen - 1] == 0 {
                        stylelen -= 1;
                    }
                    let mut linklen = line.links.len();
                    while linklen > 0 && line.links[linklen - 1] == 0 {
                        linklen -= 1;
                    }
                    GridLineState {
                        chars,
                        styles: if stylelen > 0 {Some(line.styles[..stylelen].to_vec())} else {None},
                        links: if linklen > 0 {Some(line.links[..linklen].to_vec())} else {None},
                    }
                }).collect());
                if let Some(input) = &grid.line_input {
                    state.grid_ininput = true;
                    state.grid_incurpos = input.curpos as u32;
                    state.grid_inunicode = input.buf.uni();
                    state.grid_inecho = input.echo;
                    state.grid_intermkeys = input.terminators;
                    state.grid_inmax = input.maxlen as u32;
                    state.grid_inoriglen = input.buf.len() as u32;
                    state.grid_inorgx = input.orgx as u32;
                    state.grid_inorgy = input.orgy as u32;
                    state.grid_origstyle = input.origstyle;
                    let (key, data) = self.locate_line_buffer(&input.buf, input.disprock);
                    state.grid_line_buffer = key;
                    state.grid_line_buffer_data = data;
                }
            },

            WindowData::Graphics(graphics) => {
                state.graph_width = graphics.graphwidth;
                state.graph_height = graphics.graphheight;
                state.graph_content = Some(graphics.content.clone());
            },

            WindowData::Blank(_) => {},
        }

        state
    }

    fn stream_state(&mut self, tag: u32) -> StreamState {
        let dispatch = self.dispatch.as_ref();
        let str = self.streams.get_mut(tag).unwrap();
        let mut state = StreamState {
            tag,
            rock: 0,
            unicode: str.uni,
            isbinary: str.binary,
            readable: str.readable,
            writable: str.writable,
            readcount: str.readcount as u32,
            writecount: str.writecount as u32,
            ..Default::default()
        };

        match &mut str.data {
            StreamData::Window(data) => {
                state.streamtype = strtype_Window;
                state.win_tag = Some(data.wintag);
            },
            StreamData::File(data) => {
                state.streamtype = strtype_File;
                state.file_filename = Some(data.filename.clone());
                state.file_modestr = Some(data.modestr.clone());
                state.file_filepos = data.file.stream_position().unwrap_or(0) as u32;
            },
            StreamData::Memory(data) => {
                state.streamtype = strtype_Memory;
                state.mem_buflen = data.buf.len() as u32;
                state.mem_bufptr = data.ptr as u32;
                state.mem_bufeof = data.eof as u32;
                state.mem_bufend = data.buf.len() as u32;
                if let (Some(dispatch), Some(disprock)) = (dispatch, data.disprock) {
                    let (key, elemsize) = dispatch.locate_array(&data.buf, disprock);
                    state.mem_buf = Some(key);
                    if elemsize > 0 {
                        state.mem_bufdata = Some(common::u32slice_to_string(&data.buf.to_u32vec(0, data.buf.len())));
                    }
                }
            },
            StreamData::Resource(data) => {
                state.streamtype = strtype_Resource;
                state.res_fileresnum = data.filenum;
                state.res_chunktype = data.chunktype;
                state.res_bufptr = data.ptr as u32;
                state.res_bufdata = Some(latin1_to_string(&data.data));
            },
        }

        state.rock = self.streams.get_rock(tag).unwrap_or(0);
        state
    }

    /** Import a loaded library state into the live library. Existing objects
        are closed and the loaded ones are reconstructed in their place. */
    pub fn update_from_library_state(&mut self, state: LibraryState) -> GlkResult<()> {
        // First close all the windows, streams and filerefs. It only really
        // matters for streams, which need to be flushed, but it's cleaner
        // to close everything.
        if let Some(root) = self.root_win {
            self.glk_window_close(root)?;
        }
        for tag in self.streams.tags() {
            self.glk_stream_close(tag)?;
        }
        for tag in self.filerefs.tags() {
            self.glk_fileref_destroy(tag)?;
        }
        self.timer.interval = 0;
        self.timer.last_sent = 0;
        self.timer.started = None;

        if !self.windows.is_empty() || !self.streams.is_empty() || !self.filerefs.is_empty() {
            return Err(GlkApiError::UnclosedObjectsRemain);
        }
        if self.root_win.is_some() || self.current_stream.is_some() {
            return Err(GlkApiError::UnclosedObjectsRemain);
        }

        self.metrics = state.metrics;
        self.support = state.supportcaps;
        self.gen = state.generation;

        // Validate every inter-object reference before building anything
        let wintags: Vec<u32> = state.windows.iter().map(|win| win.tag).collect();
        let strtags: Vec<u32> = state.streams.iter().map(|str| str.tag).collect();
        let check_win = |tag: Option<u32>| -> GlkResult<()> {
            match tag {
                Some(tag) if !wintags.contains(&tag) => Err(GlkApiError::BadAutosaveTag(tag)),
                _ => Ok(()),
            }
        };
        let check_str = |tag: Option<u32>| -> GlkResult<()> {
            match tag {
                Some(tag) if !strtags.contains(&tag) => Err(GlkApiError::BadAutosaveTag(tag)),
                _ => Ok(()),
            }
        };
        for win in &state.windows {
            check_win(win.parenttag)?;
            check_win(win.pair_child1tag)?;
            check_win(win.pair_child2tag)?;
            check_win(win.pair_keytag)?;
            check_str(Some(win.streamtag))?;
            check_str(win.echostreamtag)?;
        }
        for str in &state.streams {
            check_win(str.win_tag)?;
        }
        check_win(state.rootwintag)?;
        check_str(state.currentstrtag)?;

        // Rebuild the object chains. Entries were saved in iteration order
        // and restore() pushes front, so insert in reverse.
        for entry in state.windows.iter().rev() {
            let win = self.restore_window(entry)?;
            self.windows.restore(entry.tag, win, entry.rock);
        }
        for entry in state.streams.iter().rev() {
            let str = self.restore_stream(entry)?;
            self.streams.restore(entry.tag, str, entry.rock);
        }
        for entry in state.filerefs.iter().rev() {
            let fref = FileRef {
                filename: entry.filename.clone(),
                filetype: file_type(entry.filetype),
                textmode: entry.textmode,
            };
            self.filerefs.restore(entry.tag, fref, entry.rock);
        }

        // Re-register everything with the dispatch layer
        if self.dispatch.is_some() {
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

        self.root_win = state.rootwintag;
        self.current_stream = state.currentstrtag;
        self.glk_request_timer_events(state.timerinterval);

        // The next select must not emit its pre-read update: the client is
        // assumed to be up to date with the state we just restored
        self.last_event_type = LastEventType::Autorestored;

        Ok(())
    }

    /** Rebind a caller-owned buffer through the dispatch layer, or degrade
        to fresh zeroed memory when there is no registry */
    fn restore_line_buffer(&mut self, key: Option<u64>, data: Option<&String>, len: u32, uni: bool)
        -> GlkResult<(GlkOwnedBuffer, Option<DispatchRock>)> {
        let restored = match (self.dispatch.as_mut(), key) {
            (Some(dispatch), Some(key)) => dispatch.restore_array(key, len, uni),
            _ => None,
        };
        let (mut buf, disprock) = match restored {
            Some((buf, disprock)) => {
                if buf.uni() != uni || buf.len() != len as usize {
                    return Err(GlkApiError::RestoredArrayWrongSize);
                }
                (buf, Some(disprock))
            },
            None => (GlkOwnedBuffer::new(uni, len as usize), None),
        };
        if let Some(data) = data {
            buf.fill_from(&common::str_to_u32vec(data));
        }
        Ok((buf, disprock))
    }

    fn restore_window(&mut self, entry: &WindowState) -> GlkResult<Window> {
        let data = match window_type(entry.wintype).ok_or(GlkApiError::InvalidWindowType)? {
            WindowType::Blank => WindowData::Blank(BlankWindow::default()),

            WindowType::Pair => {
                let mut pair = PairWindow::new(entry.pair_dir | entry.pair_division
                    | if entry.pair_hasborder {winmethod_Border} else {winmethod_NoBorder},
                    0, entry.pair_size);
                pair.child1 = entry.pair_child1tag.ok_or(GlkApiError::BadAutosaveTag(entry.tag))?;
                pair.child2 = entry.pair_child2tag.ok_or(GlkApiError::BadAutosaveTag(entry.tag))?;
                pair.key = entry.pair_keytag;
                pair.splitpos = entry.pair_splitpos;
                pair.splitwidth = entry.pair_splitwidth;
                pair.vertical = entry.pair_vertical;
                pair.backward = entry.pair_backward;
                WindowData::Pair(pair)
            },

            WindowType::Buffer => {
                let mut buffer = BufferWindow {
                    chars: common::str_to_u32vec(entry.buf_chars.as_deref().unwrap_or("")),
                    width: entry.buf_width,
                    height: entry.buf_height,
                    ..Default::default()
                };
                if let Some(runs) = &entry.buf_runs {
                    if !runs.is_empty() {
                        buffer.runs = runs.clone();
                    }
                }
                if let Some(specials) = &entry.buf_specials {
                    buffer.specials = specials.clone();
                }
                // The client has seen everything we restored
                buffer.updatemark = buffer.chars.len();
                buffer.startclear = false;
                if entry.buf_ininput {
                    let (buf, disprock) = self.restore_line_buffer(
                        entry.buf_line_buffer, entry.buf_line_buffer_data.as_ref(),
                        entry.buf_inmax, entry.buf_inunicode)?;
                    // The typed region sits at the end of the text
                    let curpos = entry.buf_incurpos as usize;
                    buffer.line_input = Some(BufferLineInput {
                        buf,
                        curpos,
                        disprock,
                        echo: entry.buf_inecho,
                        fence: buffer.chars.len().saturating_sub(curpos),
                        orighyperlink: entry.buf_orighyperlink,
                        origstyle: entry.buf_origstyle,
                        terminators: entry.buf_intermkeys,
                    });
                }
                WindowData::Buffer(buffer)
            },

            WindowType::Grid => {
                let width = entry.grid_width as usize;
                let height = entry.grid_height as usize;
                let mut grid = GridWindow::default();
                grid.update_size(width, height);
                grid.curx = entry.grid_curx as usize;
                grid.cury = entry.grid_cury as usize;
                if let Some(lines) = &entry.grid_lines {
                    for (y, line) in lines.iter().enumerate().take(height) {
                        let chars = common::str_to_u32vec(&line.chars);
                        let row = &mut grid.lines[y];
                        for (x, &ch) in chars.iter().enumerate().take(width) {
                            row.chars[x] = ch;
                        }
                        if let Some(styles) = &line.styles {
                            for (x, &style) in styles.iter().enumerate().take(width) {
                                row.styles[x] = style;
                            }
                        }
                        if let Some(links) = &line.links {
                            for (x, &link) in links.iter().enumerate().take(width) {
                                row.links[x] = link;
                            }
                        }
                    }
                }
                // Clear the dirty flags
                for row in &mut grid.lines {
                    row.dirty = false;
                }
                grid.alldirty = false;
                if entry.grid_ininput {
                    let (buf, disprock) = self.restore_line_buffer(
                        entry.grid_line_buffer, entry.grid_line_buffer_data.as_ref(),
                        entry.grid_inoriglen, entry.grid_inunicode)?;
                    grid.line_input = Some(GridLineInput {
                        buf,
                        curpos: entry.grid_incurpos as usize,
                        disprock,
                        echo: entry.grid_inecho,
                        maxlen: entry.grid_inmax as usize,
                        orgx: entry.grid_inorgx as usize,
                        orgy: entry.grid_inorgy as usize,
                        origstyle: entry.grid_origstyle,
                        terminators: entry.grid_intermkeys,
                    });
                }
                WindowData::Grid(grid)
            },

            WindowType::Graphics => {
                let mut graphics = GraphicsWindow {
                    graphwidth: entry.graph_width,
                    graphheight: entry.graph_height,
                    ..Default::default()
                };
                if let Some(content) = &entry.graph_content {
                    graphics.content = content.clone();
                }
                graphics.updatemark = graphics.content.len();
                WindowData::Graphics(graphics)
            },

            WindowType::All => return Err(GlkApiError::InvalidWindowType),
        };

        let mut win = Window::new(data, entry.streamtag);
        win.bbox = entry.bbox;
        win.parent = entry.parenttag;
        win.echostr = entry.echostreamtag;
        win.style = entry.style;
        win.hyperlink = entry.hyperlink;
        win.input.gen = entry.inputgen;
        win.input.line_request = entry.line_request;
        win.input.line_request_uni = entry.line_request_uni;
        win.input.char_request = entry.char_request;
        win.input.char_request_uni = entry.char_request_uni;
        win.input.hyperlink_request = entry.hyperlink_request;
        win.input.echo_line_input = entry.echo_line_input;
        win.input.terminators = entry.terminate_line_input;

        // Keep the invariant: line input state exists iff the request flag
        // is up
        let has_input = match &win.data {
            WindowData::Buffer(data) => data.line_input.is_some(),
            WindowData::Grid(data) => data.line_input.is_some(),
            _ => false,
        };
        if win.input.line_request && !has_input {
            win.input.line_request = false;
            win.input.line_request_uni = false;
            win.input.gen = 0;
        }

        Ok(win)
    }

    fn restore_stream(&mut self, entry: &StreamState) -> GlkResult<Stream> {
        let data = match entry.streamtype {
            strtype_Window => {
                StreamData::Window(WindowStreamData {
                    wintag: entry.win_tag.ok_or(GlkApiError::BadAutosaveTag(entry.tag))?,
                })
            },

            strtype_File => {
                let filename = entry.file_filename.as_deref()
                    .ok_or(GlkApiError::BadAutosaveTag(entry.tag))?;
                let modestr = entry.file_modestr.as_deref().unwrap_or("rb");
                StreamData::File(Stream::reopen_file(filename, modestr, entry.file_filepos as u64)?)
            },

            strtype_Memory => {
                let (mut buf, disprock) = self.restore_line_buffer(
                    entry.mem_buf, None, entry.mem_buflen, entry.unicode)?;
                if let Some(data) = &entry.mem_bufdata {
                    buf.fill_from(&common::str_to_u32vec(data));
                }
                let end = buf.len();
                StreamData::Memory(MemoryStreamData {
                    buf,
                    disprock,
                    eof: (entry.mem_bufeof as usize).min(end),
                    ptr: (entry.mem_bufptr as usize).min(end),
                })
            },

            strtype_Resource => {
                let data = string_to_latin1(entry.res_bufdata.as_deref().unwrap_or(""));
                StreamData::Resource(ResourceStreamData {
                    chunktype: entry.res_chunktype,
                    ptr: (entry.res_bufptr as usize).min(data.len()),
                    data: data.into_boxed_slice(),
                    filenum: entry.res_fileresnum,
                })
            },

            _ => return Err(GlkApiError::BadAutosaveTag(entry.tag)),
        };

        Ok(Stream {
            binary: entry.isbinary,
            data,
            readable: entry.readable,
            writable: entry.writable,
            readcount: entry.readcount as usize,
            writecount: entry.writecount as usize,
            uni: entry.unicode,
        })
    }
}
