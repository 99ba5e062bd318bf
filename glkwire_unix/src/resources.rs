/*

File-backed data resources
==========================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::collections::HashMap;
use std::fs;

use log::warn;

use glkwire::blorb::{self, ImageInfo, ResourceChunk, ResourceMap};

use crate::startup::DataResource;

/** Data chunks mapped to plain files by `-dataresource` arguments. Files
    are read once and kept; resource streams may be opened repeatedly. */
pub struct FileResourceMap {
    cache: HashMap<u32, Box<[u8]>>,
    resources: Vec<DataResource>,
}

impl FileResourceMap {
    pub fn new(resources: Vec<DataResource>) -> Self {
        FileResourceMap {
            cache: HashMap::new(),
            resources,
        }
    }
}

impl ResourceMap for FileResourceMap {
    fn load_image_info(&mut self, _image: u32) -> Option<ImageInfo> {
        None
    }

    fn load_resource_chunk(&mut self, filenum: u32) -> Option<ResourceChunk> {
        // The list isn't sorted or checked for duplicates; there probably
        // aren't many entries
        let entry = self.resources.iter().find(|res| res.num == filenum)?;
        let binary = entry.binary;
        let data = match self.cache.get(&filenum) {
            Some(data) => data.clone(),
            None => {
                let data = match fs::read(&entry.pathname) {
                    Ok(data) => data.into_boxed_slice(),
                    Err(err) => {
                        warn!("stream_open_resource: unable to read {}: {}", entry.pathname, err);
                        return None;
                    },
                };
                self.cache.insert(filenum, data.clone());
                data
            },
        };
        Some(ResourceChunk {
            binary,
            chunktype: if binary {blorb::giblorb_ID_BINA} else {blorb::giblorb_ID_TEXT},
            data,
        })
    }
}
