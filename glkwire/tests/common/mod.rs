/*

Test harness: a queue-backed client
===================================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::Value;

use glkwire::GlkSystem;
use glkwire::blorb::{self, ImageInfo, ResourceChunk, ResourceMap};
use glkwire::glkapi::GlkApi;
use glkwire::glkapi::arrays::GlkOwnedBuffer;
use glkwire::glkapi::common::{GlkApiError, GlkResult};
use glkwire::glkapi::objects::{Dispatch, DispatchRock, ObjectClass};
use glkwire::glkapi::protocol::{Event, SupportCaps, Update};

/** A client that feeds queued events and records every update */
#[derive(Default)]
pub struct TestSystem {
    pub events: VecDeque<Value>,
    pub exit_requested: bool,
    pub updates: Vec<Value>,
    pub warnings: Vec<String>,
}

impl TestSystem {
    pub fn new() -> Self {
        TestSystem::default()
    }
}

impl GlkSystem for TestSystem {
    fn get_event(&mut self) -> GlkResult<Event> {
        let value = self.events.pop_front()
            .ok_or_else(|| GlkApiError::MalformedInput("test event queue is empty".to_string()))?;
        Event::from_value(value)
    }

    fn send_update(&mut self, update: &Update) -> GlkResult<()> {
        self.updates.push(serde_json::to_value(update)?);
        Ok(())
    }

    fn send_warning(&mut self, msg: &str) {
        self.warnings.push(msg.to_string());
    }

    fn request_exit(&mut self) {
        self.exit_requested = true;
    }
}

pub type TestGlk = GlkApi<TestSystem>;

pub fn start() -> TestGlk {
    let mut glk = GlkApi::new(TestSystem::new(), SupportCaps::default());
    glk.system.events.push_back(serde_json::json!({
        "type": "init", "gen": 0,
        "metrics": {"width": 80, "height": 24, "charwidth": 1, "charheight": 1},
    }));
    glk.get_init_event().unwrap();
    glk
}

// A dispatch layer that tracks caller-owned arrays by address key, the way
// a game's dispatch glue would

#[derive(Default)]
pub struct DispatchState {
    pub arrays: HashMap<u32, (u64, u32, bool)>,
    next_key: u64,
    next_rock: u32,
    pub registered: Vec<(u32, u32)>,
    pub restored: Vec<u64>,
    pub unretained: HashMap<u64, Vec<u32>>,
}

#[derive(Clone, Default)]
pub struct TestDispatch {
    pub state: Rc<RefCell<DispatchState>>,
}

impl Dispatch for TestDispatch {
    fn register_object(&mut self, class: ObjectClass, tag: u32) -> DispatchRock {
        let mut state = self.state.borrow_mut();
        state.registered.push((class as u32, tag));
        state.next_rock += 1;
        DispatchRock(state.next_rock)
    }

    fn unregister_object(&mut self, _class: ObjectClass, _tag: u32, _disprock: DispatchRock) {}

    fn retain_array(&mut self, buf: &GlkOwnedBuffer) -> DispatchRock {
        let mut state = self.state.borrow_mut();
        state.next_rock += 1;
        state.next_key += 1;
        let rock = state.next_rock;
        let key = state.next_key;
        state.arrays.insert(rock, (key, buf.len() as u32, buf.uni()));
        DispatchRock(rock)
    }

    fn unretain_array(&mut self, buf: &GlkOwnedBuffer, disprock: DispatchRock) {
        let mut state = self.state.borrow_mut();
        if let Some(&(key, _, _)) = state.arrays.get(&disprock.0) {
            state.unretained.insert(key, buf.to_u32vec(0, buf.len()));
        }
    }

    fn locate_array(&self, buf: &GlkOwnedBuffer, disprock: DispatchRock) -> (u64, u32) {
        let state = self.state.borrow();
        match state.arrays.get(&disprock.0) {
            Some(&(key, _, _)) => (key, if buf.uni() {4} else {1}),
            None => (0, 0),
        }
    }

    fn restore_array(&mut self, key: u64, len: u32, uni: bool) -> Option<(GlkOwnedBuffer, DispatchRock)> {
        let mut state = self.state.borrow_mut();
        state.restored.push(key);
        state.next_rock += 1;
        let rock = state.next_rock;
        state.arrays.insert(rock, (key, len, uni));
        Some((GlkOwnedBuffer::new(uni, len as usize), DispatchRock(rock)))
    }
}

// A resource map exposing one TEXT chunk and one image

pub struct TestResources;

impl ResourceMap for TestResources {
    fn load_image_info(&mut self, image: u32) -> Option<ImageInfo> {
        match image {
            7 => Some(ImageInfo {
                alttext: None,
                chunktype: blorb::giblorb_ID_PNG,
                height: 40,
                image,
                width: 60,
            }),
            _ => None,
        }
    }

    fn load_resource_chunk(&mut self, filenum: u32) -> Option<ResourceChunk> {
        match filenum {
            1 => ResourceChunk::new(blorb::giblorb_ID_TEXT, b"hello".to_vec().into_boxed_slice()),
            2 => ResourceChunk::new(blorb::giblorb_ID_BINA, vec![0, 0, 0x21, 0x05].into_boxed_slice()),
            _ => None,
        }
    }
}
