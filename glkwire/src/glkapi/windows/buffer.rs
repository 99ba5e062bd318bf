/*

Buffer windows
==============

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use serde::{Deserialize, Serialize};

use super::*;

/* Maximum buffer size. The slack value is how much larger than the size we
   should get before we trim. */
const BUFFER_SIZE: usize = 5000;
const BUFFER_SLACK: usize = 1000;

const NEWLINE: u32 = '\n' as u32;
/** Each special span occupies one placeholder character, so that runs and
    the character sequence stay aligned */
const SPECIAL_PLACEHOLDER: u32 = 0xFFFC;

/** An append-only styled document: a character sequence partitioned into
    style runs, plus a sparse list of special spans, an update mark (the
    first character the client hasn't seen) and a start-clear flag. */
pub struct BufferWindow {
    pub chars: Vec<u32>,
    pub height: f64,
    pub line_input: Option<BufferLineInput>,
    pub runs: Vec<TextStyleRun>,
    pub specials: Vec<SpecialSpan>,
    pub startclear: bool,
    pub updatemark: usize,
    pub width: f64,
}

fn is_zero(val: &u32) -> bool {
    *val == 0
}

/** One style run. The run sequence is non-empty, starts at position 0, and
    its positions are strictly increasing. */
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct TextStyleRun {
    pub style: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hyperlink: u32,
    pub pos: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialnum: Option<usize>,
}

/** In-flight line input on a buffer window */
pub struct BufferLineInput {
    /** The caller's buffer, held for the lifetime of the request */
    pub buf: GlkOwnedBuffer,
    /** Characters currently in the input region */
    pub curpos: usize,
    pub disprock: Option<DispatchRock>,
    pub echo: bool,
    /** Where the input region begins in the character sequence */
    pub fence: usize,
    pub orighyperlink: u32,
    pub origstyle: u32,
    pub terminators: u32,
}

impl Default for BufferWindow {
    fn default() -> Self {
        BufferWindow {
            chars: Vec::new(),
            height: 0.0,
            line_input: None,
            runs: vec![TextStyleRun {
                style: style_Normal,
                hyperlink: 0,
                pos: 0,
                specialnum: None,
            }],
            specials: Vec::new(),
            startclear: false,
            updatemark: 0,
            width: 0.0,
        }
    }
}

impl BufferWindow {
    /** The last run with `pos <= pos`; runs[0].pos == 0, so this always
        succeeds */
    fn find_run_by_pos(&self, pos: usize) -> usize {
        let mut beg = 0;
        let mut end = self.runs.len();
        while beg + 1 < end {
            let val = (beg + end) / 2;
            if pos >= self.runs[val].pos {
                beg = val;
            }
            else {
                end = val;
            }
        }
        beg
    }

    /** Point the tail of the run sequence at a new style, either by
        rewriting an empty trailing run or by opening a new one */
    pub fn set_last_run(&mut self, style: u32, hyperlink: u32) {
        let pos = self.chars.len();
        let last = self.runs.last_mut().unwrap();
        if last.pos == pos && last.specialnum.is_none() {
            last.style = style;
            last.hyperlink = hyperlink;
        }
        else {
            self.runs.push(TextStyleRun {
                style,
                hyperlink,
                pos,
                specialnum: None,
            });
        }
    }

    pub fn put_special(&mut self, special: SpecialSpan) {
        let pos = self.chars.len();
        let specialnum = Some(self.specials.len());
        self.specials.push(special);
        let last = self.runs.last_mut().unwrap();
        if last.pos == pos && last.specialnum.is_none() {
            last.style = style_Normal;
            last.hyperlink = 0;
            last.specialnum = specialnum;
        }
        else {
            self.runs.push(TextStyleRun {
                style: style_Normal,
                hyperlink: 0,
                pos,
                specialnum,
            });
        }
        self.chars.push(SPECIAL_PLACEHOLDER);
    }

    pub fn put_flow_break(&mut self) {
        self.put_special(SpecialSpan::new(SpecialType::FlowBreak));
    }

    pub fn rearrange(&mut self, wbox: &WindowBox) {
        self.width = wbox.right - wbox.left;
        self.height = wbox.bottom - wbox.top;
    }

    /** Prepare for line input: remember where the input region begins and
        append any initial contents in Input style */
    pub fn init_line(&mut self, buf: GlkOwnedBuffer, initlen: usize, echo: bool,
        terminators: u32, origstyle: u32, orighyperlink: u32, disprock: Option<DispatchRock>) {
        let fence = self.chars.len();
        self.set_last_run(style_Input, 0);
        let initlen = initlen.min(buf.len());
        for i in 0..initlen {
            self.chars.push(buf.get_u32(i));
        }
        self.line_input = Some(BufferLineInput {
            buf,
            curpos: initlen,
            disprock,
            echo,
            fence,
            orighyperlink,
            origstyle,
            terminators,
        });
    }

    /** Move the typed text into the input region of the character
        sequence, replacing whatever was there */
    pub fn prepare_input(&mut self, text: &[u32]) {
        let Some(input) = self.line_input.as_mut() else {
            return;
        };
        let len = text.len().min(input.buf.len());
        self.chars.truncate(input.fence);
        self.chars.extend(&text[..len]);
        input.curpos = len;
        // The client sees the accepted region again, styled as input
        self.updatemark = self.updatemark.min(input.fence);
    }

    /** Finish line input: export the region from the fence to the end of
        the text into the caller's buffer. Without echo the typed text is
        wiped back out of the document. */
    pub fn complete_line(&mut self) -> Option<(BufferLineInput, Vec<u32>)> {
        let mut input = self.line_input.take()?;
        let text: Vec<u32> = self.chars[input.fence..].to_vec();
        input.buf.fill_from(&text);
        if !input.echo {
            self.chars.truncate(input.fence);
            self.updatemark = self.updatemark.min(self.chars.len());
        }
        Some((input, text))
    }

    /** Drop the oldest paragraphs once the text grows past its bound. Only
        text the client has already seen, below any line input region, is
        eligible; positions all slide back by the cut. */
    pub fn trim(&mut self) {
        if self.chars.len() <= BUFFER_SIZE + BUFFER_SLACK {
            return;
        }
        let mut trimsize = self.chars.len() - BUFFER_SIZE;
        trimsize = trimsize.min(self.updatemark);
        if let Some(input) = &self.line_input {
            trimsize = trimsize.min(input.fence);
        }
        let cut = match self.chars[..trimsize].iter().rposition(|&ch| ch == NEWLINE) {
            Some(pos) => pos + 1,
            None => return,
        };
        if cut == 0 {
            return;
        }
        self.chars.drain(..cut);

        let snum = self.find_run_by_pos(cut);
        self.runs.drain(..snum);
        for run in &mut self.runs {
            run.pos = run.pos.saturating_sub(cut);
        }

        // Compact the specials and renumber the runs that survive
        let mut specials = Vec::new();
        for run in &mut self.runs {
            if let Some(sx) = run.specialnum {
                run.specialnum = Some(specials.len());
                specials.push(self.specials[sx].clone());
            }
        }
        self.specials = specials;

        self.updatemark -= cut;
        if let Some(input) = &mut self.line_input {
            input.fence -= cut;
        }
    }
}

fn push_text_span(par: &mut BufferWindowParagraphUpdate, run: &TextStyleRun, text: &[u32]) {
    if text.is_empty() {
        return;
    }
    let style = style_name(run.style);
    let hyperlink = if run.hyperlink > 0 {Some(run.hyperlink)} else {None};
    let text_str = common::u32slice_to_string(text);
    match par.content.last_mut() {
        Some(LineData::TextRun(span)) if span.style == style && span.hyperlink == hyperlink => {
            span.text.push_str(&text_str);
        },
        _ => par.content.push(LineData::TextRun(TextRun {
            style,
            hyperlink,
            text: text_str,
        })),
    }
}

impl WindowOperations for BufferWindow {
    fn clear(&mut self, style: u32, hyperlink: u32) {
        self.chars.clear();
        self.runs = vec![TextStyleRun {
            style,
            hyperlink,
            pos: 0,
            specialnum: None,
        }];
        self.specials.clear();
        self.startclear = true;
        self.updatemark = 0;
    }

    fn content_update(&mut self, id: u32, resource_url: Option<&str>) -> Option<ContentUpdate> {
        if !self.startclear && self.updatemark >= self.chars.len() {
            return None;
        }

        // Carve the unsent characters into paragraphs. The first one
        // continues the client's current paragraph iff the mark sits
        // mid-paragraph.
        let mut text: Vec<BufferWindowParagraphUpdate> = Vec::new();
        let mut par = BufferWindowParagraphUpdate {
            append: self.updatemark > 0 && self.chars[self.updatemark - 1] != NEWLINE,
            ..Default::default()
        };

        let total = self.chars.len();
        let mut pos = self.updatemark;
        let mut rx = self.find_run_by_pos(pos);
        while pos < total && rx < self.runs.len() {
            let run = self.runs[rx];
            let run_end = if rx + 1 < self.runs.len() {self.runs[rx + 1].pos.min(total)} else {total};
            if let Some(sx) = run.specialnum {
                if pos == run.pos {
                    if let Some(span) = self.specials.get(sx) {
                        if span.special_type == SpecialType::FlowBreak {
                            par.flowbreak = true;
                        }
                        else {
                            par.content.push(LineData::Special(span.to_update(WindowType::Buffer, resource_url)));
                        }
                    }
                }
                if run_end <= pos {
                    rx += 1;
                    continue;
                }
            }
            else {
                let mut seg_start = pos;
                for i in pos..run_end {
                    if self.chars[i] == NEWLINE {
                        push_text_span(&mut par, &run, &self.chars[seg_start..i]);
                        text.push(std::mem::take(&mut par));
                        seg_start = i + 1;
                    }
                }
                push_text_span(&mut par, &run, &self.chars[seg_start..run_end]);
            }
            pos = run_end;
            rx += 1;
        }
        // A paragraph that ended exactly at a newline leaves nothing worth
        // sending; the next update opens the fresh paragraph itself
        if !par.content.is_empty() || par.flowbreak || par.append {
            text.push(par);
        }

        let clear = self.startclear;
        self.startclear = false;
        self.updatemark = total;

        if !clear && text.is_empty() {
            return None;
        }
        Some(ContentUpdate::Buffer(BufferWindowContentUpdate {id, clear, text}))
    }

    fn put_char(&mut self, ch: u32, style: u32, hyperlink: u32) {
        let last = self.runs.last().unwrap();
        if last.style != style || last.hyperlink != hyperlink || last.specialnum.is_some() {
            self.set_last_run(style, hyperlink);
        }
        self.chars.push(ch);
    }

    fn refresh(&mut self) {
        self.updatemark = 0;
    }

    fn trim_buffer(&mut self) {
        self.trim();
    }
}
