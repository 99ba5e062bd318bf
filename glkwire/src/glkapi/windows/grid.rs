/*

Grid windows
============

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use super::*;

/** A dense width × height grid of characters with per-cell style and
    hyperlink */
#[derive(Default)]
pub struct GridWindow {
    pub alldirty: bool,
    pub curx: usize,
    pub cury: usize,
    pub height: usize,
    pub line_input: Option<GridLineInput>,
    pub lines: Vec<GridLine>,
    pub width: usize,
}

#[derive(Clone, Default)]
pub struct GridLine {
    pub chars: Vec<u32>,
    pub dirty: bool,
    pub links: Vec<u32>,
    pub styles: Vec<u32>,
}

impl GridLine {
    fn blank(width: usize) -> Self {
        GridLine {
            chars: vec![' ' as u32; width],
            dirty: true,
            links: vec![0; width],
            styles: vec![style_Normal; width],
        }
    }
}

/** In-flight line input on a grid window */
pub struct GridLineInput {
    /** The caller's buffer, held for the lifetime of the request */
    pub buf: GlkOwnedBuffer,
    /** Characters currently in the input region */
    pub curpos: usize,
    pub disprock: Option<DispatchRock>,
    pub echo: bool,
    /** Maximum input length, clamped to the cells remaining on the row */
    pub maxlen: usize,
    pub orgx: usize,
    pub orgy: usize,
    pub origstyle: u32,
    pub terminators: u32,
}

impl GridWindow {
    /** Grow or shrink the grid; newly exposed cells are blank, and a resize
        dirties everything */
    pub fn update_size(&mut self, width: usize, height: usize) {
        self.lines.resize_with(height, || GridLine::blank(width));
        for line in &mut self.lines {
            line.chars.resize(width, ' ' as u32);
            line.styles.resize(width, style_Normal);
            line.links.resize(width, 0);
        }
        self.width = width;
        self.height = height;
        self.alldirty = true;
    }

    pub fn rearrange(&mut self, wbox: &WindowBox, metrics: &NormalisedMetrics) {
        let width = ((wbox.right - wbox.left - metrics.gridmarginx) / metrics.gridcharwidth).floor().max(0.0);
        let height = ((wbox.bottom - wbox.top - metrics.gridmarginy) / metrics.gridcharheight).floor().max(0.0);
        self.update_size(width as usize, height as usize);
    }

    /** Wrap the cursor at the right edge. Returns true when the cursor is
        beyond the last row, where output is ignored. */
    fn fit_cursor(&mut self) -> bool {
        if self.width > 0 && self.curx >= self.width {
            self.curx = 0;
            self.cury += 1;
        }
        self.cury >= self.height
    }

    /** The canonical cursor position for the input descriptor */
    pub fn cursor(&self) -> (usize, usize) {
        let mut x = self.curx;
        let mut y = self.cury;
        if self.width > 0 && x >= self.width {
            x = 0;
            y += 1;
        }
        if y >= self.height {
            return (self.width.saturating_sub(1), self.height.saturating_sub(1));
        }
        (x, y)
    }

    /** The cursor may be moved beyond the grid; it wraps or goes dead when
        the next character is printed */
    pub fn move_cursor(&mut self, x: u32, y: u32) {
        self.curx = x as usize;
        self.cury = y as usize;
    }

    fn set_cell(&mut self, x: usize, y: usize, ch: u32, style: u32, hyperlink: u32) {
        let line = &mut self.lines[y];
        line.chars[x] = ch;
        line.styles[x] = style;
        line.links[x] = hyperlink;
        line.dirty = true;
    }

    /** Prepare for line input: the request maximum is clamped to the cells
        remaining on the cursor's row, and any initial contents land in the
        grid in Input style. */
    pub fn init_line(&mut self, buf: GlkOwnedBuffer, initlen: usize, echo: bool,
        terminators: u32, origstyle: u32, disprock: Option<DispatchRock>) {
        if self.fit_cursor() {
            self.curx = self.width.saturating_sub(1);
            self.cury = self.height.saturating_sub(1);
        }
        let maxlen = buf.len().min(self.width.saturating_sub(self.curx));
        let initlen = if self.cury < self.height {initlen.min(maxlen)} else {0};
        let (orgx, orgy) = (self.curx, self.cury);
        for i in 0..initlen {
            self.set_cell(orgx + i, orgy, buf.get_u32(i), style_Input, 0);
        }
        self.curx = orgx + initlen;
        self.line_input = Some(GridLineInput {
            buf,
            curpos: initlen,
            disprock,
            echo,
            maxlen,
            orgx,
            orgy,
            origstyle,
            terminators,
        });
    }

    /** Move the typed text into the input region of the grid */
    pub fn prepare_input(&mut self, text: &[u32]) {
        let Some(input) = self.line_input.as_ref() else {
            return;
        };
        let (orgx, orgy, maxlen) = (input.orgx, input.orgy, input.maxlen);
        if orgy >= self.height {
            return;
        }
        // The grid may have shrunk since the request was opened
        let maxlen = maxlen.min(self.width.saturating_sub(orgx));
        let len = text.len().min(maxlen);
        for i in 0..len {
            self.set_cell(orgx + i, orgy, text[i], style_Input, 0);
        }
        for i in len..maxlen {
            self.set_cell(orgx + i, orgy, ' ' as u32, style_Input, 0);
        }
        if let Some(input) = self.line_input.as_mut() {
            input.curpos = len;
        }
    }

    /** Finish line input: export the input region back to the caller's
        buffer and drop the cursor to the start of the next row. Returns the
        input state and the accepted text. */
    pub fn complete_line(&mut self) -> Option<(GridLineInput, Vec<u32>)> {
        let mut input = self.line_input.take()?;
        let text: Vec<u32> = if input.orgy < self.lines.len() {
            let line = &self.lines[input.orgy];
            let end = (input.orgx + input.curpos).min(line.chars.len());
            line.chars[input.orgx.min(end)..end].to_vec()
        }
        else {
            Vec::new()
        };
        input.buf.fill_from(&text);
        self.curx = 0;
        self.cury = input.orgy + 1;
        Some((input, text))
    }
}

impl WindowOperations for GridWindow {
    fn clear(&mut self, _style: u32, _hyperlink: u32) {
        for line in &mut self.lines {
            *line = GridLine::blank(self.width);
        }
        self.alldirty = true;
        self.curx = 0;
        self.cury = 0;
    }

    fn content_update(&mut self, id: u32, _resource_url: Option<&str>) -> Option<ContentUpdate> {
        if !self.alldirty && !self.lines.iter().any(|line| line.dirty) {
            return None;
        }
        let alldirty = self.alldirty;
        self.alldirty = false;
        let width = self.width;
        let lines: Vec<GridWindowLine> = self.lines.iter_mut().enumerate()
            .filter(|(_, line)| alldirty || line.dirty)
            .map(|(y, line)| {
                line.dirty = false;
                // Merge adjacent cells with the same style and link
                let mut content: Vec<LineData> = Vec::new();
                for x in 0..width {
                    let ch = char::from_u32(line.chars[x]).unwrap_or('?');
                    let style = style_name(line.styles[x]);
                    let hyperlink = match line.links[x] {
                        0 => None,
                        val => Some(val),
                    };
                    match content.last_mut() {
                        Some(LineData::TextRun(span)) if span.style == style && span.hyperlink == hyperlink => {
                            span.text.push(ch);
                        },
                        _ => content.push(LineData::TextRun(TextRun {
                            style,
                            hyperlink,
                            text: ch.to_string(),
                        })),
                    }
                }
                GridWindowLine {
                    line: y as u32,
                    content,
                }
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        Some(ContentUpdate::Grid(GridWindowContentUpdate {id, lines}))
    }

    fn put_char(&mut self, ch: u32, style: u32, hyperlink: u32) {
        if self.fit_cursor() {
            return;
        }
        if ch == '\n' as u32 {
            self.cury += 1;
            self.curx = 0;
            return;
        }
        let (x, y) = (self.curx, self.cury);
        self.set_cell(x, y, ch, style, hyperlink);
        self.curx += 1;
    }

    fn refresh(&mut self) {
        self.alldirty = true;
    }
}
