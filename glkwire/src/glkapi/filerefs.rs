/*

Glk FileRefs
============

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::fs;
use std::path::{Path, PathBuf};

use super::constants::*;

/** A path plus flags, used to open file streams */
#[derive(Clone, Debug)]
pub struct FileRef {
    pub filename: String,
    pub filetype: FileType,
    pub textmode: bool,
}

impl FileRef {
    pub fn new(filename: String, usage: u32) -> Self {
        FileRef {
            filename,
            filetype: file_type(usage),
            textmode: usage & fileusage_TextMode != 0,
        }
    }

    pub fn delete_file(&self) {
        let _ = fs::remove_file(Path::new(&self.filename));
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.filename).exists()
    }
}

/** Construct a path for `fileref_create_by_name`. Per the Glk spec
    recommendations: delete all characters in `"/\<>:|?*`, truncate at the
    first period, fall back to "null" if nothing is left, then append the
    suffix for the usage. */
pub fn cleaned_filename(name: &str, usage: u32, working_dir: &Path) -> String {
    let mut cleaned = String::new();
    for ch in name.chars() {
        if ch == '.' {
            break;
        }
        if let '"' | '\\' | '/' | '>' | '<' | ':' | '|' | '?' | '*' = ch {
            continue;
        }
        cleaned.push(ch);
    }
    if cleaned.is_empty() {
        cleaned.push_str("null");
    }
    cleaned.push_str(filetype_suffix(file_type(usage)));
    working_dir.join(cleaned).to_string_lossy().into_owned()
}

/** Construct a path for a prompted filename: relative names land in the
    working directory, and a usage suffix is added when the player's name
    has no extension of its own. */
pub fn prompted_filename(name: &str, usage: u32, working_dir: &Path) -> String {
    let path = PathBuf::from(name);
    let mut path = if path.is_absolute() {
        path
    }
    else {
        working_dir.join(path)
    };
    if path.extension().is_none() {
        let mut filename = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        filename.push_str(filetype_suffix(file_type(usage)));
        path.set_file_name(filename);
    }
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_cleaning() {
        let dir = Path::new("/work");
        assert_eq!(cleaned_filename("save", fileusage_SavedGame, dir), "/work/save.glksave");
        assert_eq!(cleaned_filename("a/b\\c:d*e", fileusage_Data, dir), "/work/abcde.glkdata");
        assert_eq!(cleaned_filename("story.part2.sav", fileusage_Transcript, dir), "/work/story.txt");
        assert_eq!(cleaned_filename("???", fileusage_Data, dir), "/work/null.glkdata");
        assert_eq!(cleaned_filename("", fileusage_Data, dir), "/work/null.glkdata");
    }

    #[test]
    fn prompted_names() {
        let dir = Path::new("/work");
        assert_eq!(prompted_filename("mysave", fileusage_SavedGame, dir), "/work/mysave.glksave");
        assert_eq!(prompted_filename("mysave.sav", fileusage_SavedGame, dir), "/work/mysave.sav");
        assert_eq!(prompted_filename("/tmp/x.dat", fileusage_Data, dir), "/tmp/x.dat");
    }
}
