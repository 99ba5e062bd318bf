/*

Glk objects
===========

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::arrays::GlkOwnedBuffer;

/** A store for Glk objects of one class, keyed by update-tag. The store
    owns the objects and maintains the newest-first ordering that
    `glk_*_iterate` exposes. */
pub struct GlkObjectStore<T> {
    first: Option<u32>,
    store: HashMap<u32, GlkObjectMetadata<T>>,
    tagcounter: u32,
}

struct GlkObjectMetadata<T> {
    disprock: Option<DispatchRock>,
    next: Option<u32>,
    obj: T,
    prev: Option<u32>,
    rock: u32,
}

pub struct IterationResult {
    pub rock: u32,
    pub tag: u32,
}

impl<T> GlkObjectStore<T> {
    /** Tags are assigned from a monotone counter started at a small random
        offset, so that tags from one run are unlikely to match another. */
    pub fn new() -> Self {
        let offset = (jiff::Timestamp::now().subsec_nanosecond().unsigned_abs() % 15) + 16;
        GlkObjectStore {
            first: None,
            store: HashMap::new(),
            tagcounter: offset,
        }
    }

    pub fn count(&self) -> usize {
        self.store.len()
    }

    pub fn get(&self, tag: u32) -> Option<&T> {
        self.store.get(&tag).map(|obj| &obj.obj)
    }

    pub fn get_mut(&mut self, tag: u32) -> Option<&mut T> {
        self.store.get_mut(&tag).map(|obj| &mut obj.obj)
    }

    pub fn get_disprock(&self, tag: u32) -> Option<DispatchRock> {
        self.store.get(&tag).and_then(|obj| obj.disprock)
    }

    pub fn get_rock(&self, tag: u32) -> Option<u32> {
        self.store.get(&tag).map(|obj| obj.rock)
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn iterate(&self, tag: Option<u32>) -> Option<IterationResult> {
        let next = match tag {
            None => self.first,
            Some(tag) => self.store.get(&tag)?.next,
        };
        next.map(|tag| IterationResult {
            rock: self.store.get(&tag).unwrap().rock,
            tag,
        })
    }

    /** Insert an object, assigning it a fresh update-tag */
    pub fn register(&mut self, obj: T, rock: u32) -> u32 {
        let tag = self.tagcounter;
        self.tagcounter += 3;
        self.insert_front(tag, obj, rock);
        tag
    }

    /** Insert a deserialised object under its saved tag. Autorestore calls
        this in reverse saved order so the iteration order survives. */
    pub fn restore(&mut self, tag: u32, obj: T, rock: u32) {
        if tag >= self.tagcounter {
            self.tagcounter = tag + 7;
        }
        self.insert_front(tag, obj, rock);
    }

    fn insert_front(&mut self, tag: u32, obj: T, rock: u32) {
        let mut glk_object = GlkObjectMetadata {
            disprock: None,
            next: None,
            obj,
            prev: None,
            rock,
        };
        if let Some(old_first) = self.first {
            self.store.get_mut(&old_first).unwrap().prev = Some(tag);
            glk_object.next = Some(old_first);
        }
        self.store.insert(tag, glk_object);
        self.first = Some(tag);
    }

    pub fn set_disprock(&mut self, tag: u32, disprock: DispatchRock) {
        if let Some(obj) = self.store.get_mut(&tag) {
            obj.disprock = Some(disprock);
        }
    }

    /** Tags in iteration order */
    pub fn tags(&self) -> Vec<u32> {
        let mut tags = Vec::with_capacity(self.store.len());
        let mut next = self.first;
        while let Some(tag) = next {
            tags.push(tag);
            next = self.store.get(&tag).unwrap().next;
        }
        tags
    }

    /** Remove an object from the store, returning it for final cleanup */
    pub fn unregister(&mut self, tag: u32) -> Option<T> {
        let obj = self.store.remove(&tag)?;
        if let Some(prev) = obj.prev {
            self.store.get_mut(&prev).unwrap().next = obj.next;
        }
        if let Some(next) = obj.next {
            self.store.get_mut(&next).unwrap().prev = obj.prev;
        }
        if self.first == Some(tag) {
            self.first = obj.next;
        }
        Some(obj.obj)
    }
}

impl<T> Default for GlkObjectStore<T> {
    fn default() -> Self {
        GlkObjectStore::new()
    }
}

// The dispatch layer registry

/** An opaque value the dispatch layer associates with each registered
    object or retained array */
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DispatchRock(pub u32);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ObjectClass {
    Window = 0,
    Stream = 1,
    Fileref = 2,
}

/** The caller-side dispatch layer. All operations degrade to no-ops when no
    registry is installed. */
pub trait Dispatch {
    fn register_object(&mut self, class: ObjectClass, tag: u32) -> DispatchRock;
    fn unregister_object(&mut self, class: ObjectClass, tag: u32, disprock: DispatchRock);
    /** Retain a caller-owned array for the lifetime of a request */
    fn retain_array(&mut self, buf: &GlkOwnedBuffer) -> DispatchRock;
    fn unretain_array(&mut self, buf: &GlkOwnedBuffer, disprock: DispatchRock);
    /** Identify a retained array for autosave: an opaque address key plus
        the element size. An element size of zero means the contents are not
        serialised. */
    fn locate_array(&self, buf: &GlkOwnedBuffer, disprock: DispatchRock) -> (u64, u32);
    /** Rebind an array by its address key on autorestore */
    fn restore_array(&mut self, key: u64, len: u32, uni: bool) -> Option<(GlkOwnedBuffer, DispatchRock)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_order_is_newest_first() {
        let mut store = GlkObjectStore::new();
        let a = store.register("a", 1);
        let b = store.register("b", 2);
        let c = store.register("c", 3);
        assert!(a < b && b < c);

        let first = store.iterate(None).unwrap();
        assert_eq!((first.tag, first.rock), (c, 3));
        let second = store.iterate(Some(c)).unwrap();
        assert_eq!((second.tag, second.rock), (b, 2));
        assert_eq!(store.tags(), vec![c, b, a]);

        store.unregister(b);
        assert_eq!(store.tags(), vec![c, a]);
        store.unregister(c);
        assert_eq!(store.tags(), vec![a]);
        assert_eq!(store.iterate(None).unwrap().tag, a);
        store.unregister(a);
        assert!(store.is_empty());
        assert!(store.iterate(None).is_none());
    }

    #[test]
    fn tags_are_never_reused() {
        let mut store = GlkObjectStore::new();
        let a = store.register("a", 0);
        store.unregister(a);
        let b = store.register("b", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn restore_bumps_the_counter() {
        let mut store = GlkObjectStore::new();
        store.restore(1000, "x", 0);
        let next = store.register("y", 0);
        assert!(next > 1000);
        assert_eq!(store.tags(), vec![next, 1000]);
    }
}
