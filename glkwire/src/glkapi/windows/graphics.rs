/*

Graphics windows
================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use super::*;

/** How many already-sent drawing operations to keep for refreshes */
const CONTENT_KEEP: usize = 4000;

/** An ordered list of drawing operations with an update mark */
#[derive(Default)]
pub struct GraphicsWindow {
    pub content: Vec<SpecialSpan>,
    pub graphheight: u32,
    pub graphwidth: u32,
    pub updatemark: usize,
}

impl GraphicsWindow {
    pub fn put_special(&mut self, special: SpecialSpan) {
        self.content.push(special);
    }

    pub fn rearrange(&mut self, wbox: &WindowBox, metrics: &NormalisedMetrics) {
        self.graphwidth = (wbox.right - wbox.left - metrics.graphicsmarginx).max(0.0) as u32;
        self.graphheight = (wbox.bottom - wbox.top - metrics.graphicsmarginy).max(0.0) as u32;
    }
}

impl WindowOperations for GraphicsWindow {
    fn clear(&mut self, _style: u32, _hyperlink: u32) {
        // A fill with no rect and no colour wipes the whole window
        self.content = vec![SpecialSpan::new(SpecialType::Fill)];
        self.updatemark = 0;
    }

    fn content_update(&mut self, id: u32, resource_url: Option<&str>) -> Option<ContentUpdate> {
        if self.updatemark >= self.content.len() {
            return None;
        }
        let draw = self.content[self.updatemark..].iter()
            .map(|special| special.to_update(WindowType::Graphics, resource_url))
            .collect();
        self.updatemark = self.content.len();
        Some(ContentUpdate::Graphics(GraphicsWindowContentUpdate {id, draw}))
    }

    fn refresh(&mut self) {
        self.updatemark = 0;
    }

    fn trim_buffer(&mut self) {
        // The client has already drawn these; a later refresh will only get
        // the remainder
        if self.updatemark > CONTENT_KEEP {
            self.content.drain(..self.updatemark);
            self.updatemark = 0;
        }
    }
}
