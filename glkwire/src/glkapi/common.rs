/*

Common things
=============

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::io;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use widestring::Utf32String;

pub const MAX_LATIN1: u32 = 0xFF;
pub const QUESTION_MARK: u32 = '?' as u32;

#[derive(Debug, Error)]
pub enum GlkApiError {
    #[error("autosave references unknown object tag: {0}")]
    BadAutosaveTag(u32),
    #[error("autosave version not supported: {0}")]
    BadAutosaveVersion(u32),
    #[error("cannot change window split direction")]
    CannotChangeWindowSplitDirection,
    #[error("cannot close window stream")]
    CannotCloseWindowStream,
    #[error("metrics character size must be positive")]
    CharSizeMustBePositive,
    #[error("first input event must be 'init'")]
    FirstEventMustBeInit,
    #[error("graphics windows not supported")]
    GraphicsNotSupported,
    #[error("illegal filemode")]
    IllegalFilemode,
    #[error("invalid reference")]
    InvalidReference,
    #[error("invalid splitwin")]
    InvalidSplitwin,
    #[error("invalid method: bad direction")]
    InvalidWindowDirection,
    #[error("invalid method: must be fixed or proportional")]
    InvalidWindowDivision,
    #[error("invalid method: blank windows can only be split proportionally")]
    InvalidWindowDivisionBlank,
    #[error("invalid wintype")]
    InvalidWindowType,
    #[error("invalid keywin: can't be a pair window")]
    KeywinCantBePair,
    #[error("keywin must be a descendant")]
    KeywinMustBeDescendant,
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("no current stream")]
    NoCurrentStream,
    #[error("invalid stream: not a file stream")]
    NotFileStream,
    #[error("invalid window: not a graphics window")]
    NotGraphicsWindow,
    #[error("invalid window: not a grid window")]
    NotGridWindow,
    #[error("invalid window: not a pair window")]
    NotPairWindow,
    #[error("window already has keyboard request")]
    PendingKeyboardRequest,
    #[error("window has pending line input")]
    PendingLineInput,
    #[error("cannot read from write-only stream")]
    ReadFromWriteOnly,
    #[error("restored line input array has wrong element size")]
    RestoredArrayWrongSize,
    #[error("splitwin must be null for first window")]
    SplitMustBeNull,
    #[error("invalid splitwin: cannot be a pair window")]
    SplitCantBePair,
    #[error("invalid splitwin: split window's parent isn't a pair window")]
    SplitParentIsntPair,
    #[error("library state update: live objects remain open")]
    UnclosedObjectsRemain,
    #[error("window doesn't support keyboard input")]
    WindowDoesntSupportKeyboardInput,
    #[error("cannot write to read-only stream")]
    WriteToReadOnly,
    #[error("event has wrong generation number: expected {0}, received {1}")]
    WrongGeneration(u32, u32),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed input: {0}")]
    Json(#[from] serde_json::Error),
}
use GlkApiError::*;
pub type GlkResult<T> = Result<T, GlkApiError>;

impl GlkApiError {
    /** Errors which must terminate the process rather than degrade to a
        no-op warning (error tier 2). */
    pub fn is_fatal(&self) -> bool {
        matches!(self,
            BadAutosaveTag(_) | BadAutosaveVersion(_) | CharSizeMustBePositive
            | FirstEventMustBeInit | MalformedInput(_) | RestoredArrayWrongSize
            | UnclosedObjectsRemain | WrongGeneration(..) | Json(_))
    }
}

pub fn write_common_buffer(src: &[u32], dest: &mut [u32]) -> usize {
    let len = src.len();
    let act_len = len.min(dest.len());
    dest[..act_len].copy_from_slice(&src[..act_len]);
    len
}

// Array & string conversions

pub fn str_to_u32vec(str: &str) -> Vec<u32> {
    let str = Utf32String::from_str(str);
    str.into_vec()
}

pub fn u8slice_to_string(buf: &[u8]) -> String {
    buf.iter().map(|&c| c as char).collect()
}

pub fn u8slice_to_u32vec(buf: &[u8]) -> Vec<u32> {
    assert!(buf.len() % 4 == 0, "buffer length not multiple of 4");
    let mut dest = Vec::with_capacity(buf.len() / 4);
    for i in (0..buf.len()).step_by(4) {
        dest.push(BigEndian::read_u32(&buf[i..]));
    }
    dest
}

/** Lossy: code points that aren't Unicode scalar values become U+FFFD */
pub fn u32slice_to_string(buf: &[u32]) -> String {
    buf.iter().map(|&c| char::from_u32(c).unwrap_or('\u{FFFD}')).collect()
}

pub fn u32slice_to_u8vec(buf: &[u32]) -> Vec<u8> {
    let mut dest = Vec::with_capacity(buf.len() * 4);
    for val in buf {
        dest.extend(&val.to_be_bytes());
    }
    dest
}

// UTF-8 codec for text-mode file and resource streams

pub fn encode_utf8_char(ch: u32, dest: &mut Vec<u8>) {
    match char::from_u32(ch) {
        Some(ch) => {
            let mut buf = [0; 4];
            dest.extend(ch.encode_utf8(&mut buf).as_bytes());
        },
        None => dest.push(b'?'),
    }
}

/** Decode one UTF-8 character from a byte source. Returns `None` at the end
    of the source or on an invalid sequence. */
pub fn decode_utf8_char<F>(mut next: F) -> Option<u32>
where F: FnMut() -> Option<u8> {
    let val0 = next()? as u32;
    if val0 < 0x80 {
        return Some(val0);
    }
    let val1 = next()? as u32;
    if val1 & 0xC0 != 0x80 {
        return None;
    }
    if val0 & 0xE0 == 0xC0 {
        return Some(((val0 & 0x1F) << 6) | (val1 & 0x3F));
    }
    let val2 = next()? as u32;
    if val2 & 0xC0 != 0x80 {
        return None;
    }
    if val0 & 0xF0 == 0xE0 {
        return Some(((val0 & 0x0F) << 12) | ((val1 & 0x3F) << 6) | (val2 & 0x3F));
    }
    if val0 & 0xF8 != 0xF0 {
        return None;
    }
    let val3 = next()? as u32;
    if val3 & 0xC0 != 0x80 {
        return None;
    }
    Some(((val0 & 0x07) << 18) | ((val1 & 0x3F) << 12) | ((val2 & 0x3F) << 6) | (val3 & 0x3F))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_round_trip() {
        for &ch in &[0x41u32, 0xE9, 0x2014, 0x1F600] {
            let mut bytes = Vec::new();
            encode_utf8_char(ch, &mut bytes);
            let mut iter = bytes.iter().copied();
            assert_eq!(decode_utf8_char(|| iter.next()), Some(ch));
        }
    }

    #[test]
    fn utf8_invalid() {
        let bytes = [0xC3u8];
        let mut iter = bytes.iter().copied();
        assert_eq!(decode_utf8_char(|| iter.next()), None);
        let bytes = [0x80u8, 0x41];
        let mut iter = bytes.iter().copied();
        assert_eq!(decode_utf8_char(|| iter.next()), None);
    }

    #[test]
    fn big_endian_round_trip() {
        let chars = vec![0u32, 0x41, 0x1F600, 0xFFFFFFFF];
        assert_eq!(u8slice_to_u32vec(&u32slice_to_u8vec(&chars)), chars);
    }
}
