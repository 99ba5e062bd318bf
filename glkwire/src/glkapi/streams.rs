/*

Glk Streams
===========

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::blorb::ResourceChunk;

use super::arrays::*;
use super::common::*;
use super::constants::*;
use super::filerefs::FileRef;
use super::objects::DispatchRock;

const GLK_NULL: u32 = 0;

/** Final read/write character counts of a stream */
pub struct StreamResult {
    pub read_count: u32,
    pub write_count: u32,
}

/** A byte- or code-point-oriented read/write endpoint */
pub struct Stream {
    /** Affects file/resource encoding: raw bytes or BE-u32 rather than UTF-8 */
    pub binary: bool,
    pub data: StreamData,
    pub readable: bool,
    pub writable: bool,
    pub readcount: usize,
    pub writecount: usize,
    /** Narrow (byte) or wide (u32) elements */
    pub uni: bool,
}

pub enum StreamData {
    File(FileStreamData),
    Memory(MemoryStreamData),
    Resource(ResourceStreamData),
    Window(WindowStreamData),
}

pub struct FileStreamData {
    pub file: File,
    /** Stored for autosave */
    pub filename: String,
    /** The unix stdio discipline: a seek is needed between a read phase and
        a write phase on the same handle */
    pub lastop: u32,
    /** Stored for autosave */
    pub modestr: String,
}

pub struct MemoryStreamData {
    pub buf: GlkOwnedBuffer,
    /** Dispatch layer retain rock for the caller's array */
    pub disprock: Option<DispatchRock>,
    /** End of valid data, the write frontier; `ptr <= eof <= buf.len()` */
    pub eof: usize,
    pub ptr: usize,
}

pub struct ResourceStreamData {
    pub chunktype: u32,
    /** Chunk bytes; wide streams still index in bytes and transcode on read */
    pub data: Box<[u8]>,
    pub filenum: u32,
    pub ptr: usize,
}

pub struct WindowStreamData {
    pub wintag: u32,
}

impl Stream {
    pub fn new_memory(buf: GlkOwnedBuffer, fmode: FileMode, uni: bool) -> Stream {
        let eof = if fmode == FileMode::Write {0} else {buf.len()};
        Stream {
            binary: false,
            data: StreamData::Memory(MemoryStreamData {
                buf,
                disprock: None,
                eof,
                ptr: 0,
            }),
            readable: fmode != FileMode::Write,
            writable: fmode != FileMode::Read,
            readcount: 0,
            writecount: 0,
            uni,
        }
    }

    pub fn new_resource(chunk: ResourceChunk, filenum: u32, uni: bool) -> Stream {
        Stream {
            binary: chunk.binary,
            data: StreamData::Resource(ResourceStreamData {
                chunktype: chunk.chunktype,
                data: chunk.data,
                filenum,
                ptr: 0,
            }),
            readable: true,
            writable: false,
            readcount: 0,
            writecount: 0,
            uni,
        }
    }

    pub fn new_window(wintag: u32) -> Stream {
        Stream {
            binary: false,
            data: StreamData::Window(WindowStreamData {wintag}),
            readable: false,
            writable: true,
            readcount: 0,
            writecount: 0,
            uni: false,
        }
    }

    /** Open a file stream. Returns `Ok(None)` when a read-mode file doesn't
        exist; that is a silent failure, not a warning. */
    pub fn open_file(fileref: &FileRef, fmode: FileMode, uni: bool) -> GlkResult<Option<Stream>> {
        // Write, ReadWrite, and WriteAppend create the file if necessary,
        // but opening for read+write doesn't, so pre-touch it
        if fmode == FileMode::ReadWrite || fmode == FileMode::WriteAppend {
            OpenOptions::new().append(true).create(true).open(&fileref.filename)?;
        }

        let file = match fmode {
            FileMode::Write => OpenOptions::new().write(true).create(true).truncate(true).open(&fileref.filename),
            FileMode::Read => match File::open(&fileref.filename) {
                Ok(file) => Ok(file),
                Err(_) => return Ok(None),
            },
            FileMode::ReadWrite | FileMode::WriteAppend => OpenOptions::new().read(true).write(true).open(&fileref.filename),
        };
        let mut file = file?;
        if fmode == FileMode::WriteAppend {
            file.seek(SeekFrom::End(0))?;
        }

        let modestr = format!("{}{}", match fmode {
            FileMode::Write => "w",
            FileMode::Read => "r",
            FileMode::ReadWrite | FileMode::WriteAppend => "r+",
        }, if fileref.textmode {""} else {"b"});

        Ok(Some(Stream {
            binary: !fileref.textmode,
            data: StreamData::File(FileStreamData {
                file,
                filename: fileref.filename.clone(),
                lastop: 0,
                modestr,
            }),
            readable: fmode == FileMode::Read || fmode == FileMode::ReadWrite,
            writable: fmode != FileMode::Read,
            readcount: 0,
            writecount: 0,
            uni,
        }))
    }

    /** Reopen a file stream from its autosave record and seek to the saved
        position. The stored mode is respected except that write mode does
        not truncate what the earlier session wrote. */
    pub fn reopen_file(filename: &str, modestr: &str, pos: u64) -> GlkResult<FileStreamData> {
        if modestr.contains('+') {
            OpenOptions::new().append(true).create(true).open(filename)?;
        }
        let mut file = if modestr.starts_with('r') && !modestr.contains('+') {
            File::open(filename)?
        }
        else {
            OpenOptions::new().read(modestr.contains('+')).write(true).create(true).open(filename)?
        };
        file.seek(SeekFrom::Start(pos))?;
        Ok(FileStreamData {
            file,
            filename: filename.to_string(),
            lastop: 0,
            modestr: modestr.to_string(),
        })
    }

    pub fn fill_result(&self) -> StreamResult {
        StreamResult {
            read_count: self.readcount as u32,
            write_count: self.writecount as u32,
        }
    }

    /** The owning window of a window stream */
    pub fn wintag(&self) -> Option<u32> {
        match &self.data {
            StreamData::Window(data) => Some(data.wintag),
            _ => None,
        }
    }

    fn ensure_op(data: &mut FileStreamData, op: u32) {
        if data.lastop != 0 && data.lastop != op {
            if let Ok(pos) = data.file.stream_position() {
                let _ = data.file.seek(SeekFrom::Start(pos));
            }
        }
        data.lastop = op;
    }

    fn read_byte(file: &mut File) -> Option<u8> {
        let mut byte = [0u8];
        match file.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    /** Read one character; -1 at end of stream. Window streams can't be
        read. Without `want_uni`, non-Latin-1 characters collapse to `?`. */
    pub fn get_char(&mut self, want_uni: bool) -> i32 {
        if !self.readable {
            return -1;
        }
        let filter = |ch: u32| {
            (if !want_uni && ch > MAX_LATIN1 {QUESTION_MARK} else {ch}) as i32
        };
        match &mut self.data {
            StreamData::Memory(data) => {
                if data.ptr < data.eof {
                    let ch = data.buf.get_u32(data.ptr);
                    data.ptr += 1;
                    self.readcount += 1;
                    filter(ch)
                }
                else {
                    -1
                }
            },
            StreamData::Resource(data) => {
                let res = if !self.uni {
                    if data.ptr < data.data.len() {
                        let ch = data.data[data.ptr] as u32;
                        data.ptr += 1;
                        Some(ch)
                    }
                    else {
                        None
                    }
                }
                else if self.binary {
                    if data.ptr + 4 <= data.data.len() {
                        let ch = BigEndian::read_u32(&data.data[data.ptr..]);
                        data.ptr += 4;
                        Some(ch)
                    }
                    else {
                        None
                    }
                }
                else {
                    let bytes = &data.data;
                    let ptr = &mut data.ptr;
                    decode_utf8_char(|| {
                        let byte = bytes.get(*ptr).copied();
                        if byte.is_some() {
                            *ptr += 1;
                        }
                        byte
                    })
                };
                match res {
                    Some(ch) => {
                        self.readcount += 1;
                        filter(ch)
                    },
                    None => -1,
                }
            },
            StreamData::File(data) => {
                Stream::ensure_op(data, filemode_Read);
                let res = if !self.uni {
                    Stream::read_byte(&mut data.file).map(|byte| byte as u32)
                }
                else if self.binary {
                    let mut bytes = [0u8; 4];
                    match data.file.read(&mut bytes) {
                        Ok(4) => Some(BigEndian::read_u32(&bytes)),
                        _ => None,
                    }
                }
                else {
                    let file = &mut data.file;
                    decode_utf8_char(|| Stream::read_byte(file))
                };
                match res {
                    Some(ch) => {
                        self.readcount += 1;
                        filter(ch)
                    },
                    None => -1,
                }
            },
            StreamData::Window(_) => -1,
        }
    }

    /** Fill a buffer; short counts at end of stream */
    pub fn get_buffer(&mut self, buf: &mut GlkBufferMut) -> u32 {
        let want_uni = buf.uni();
        let mut i = 0;
        while i < buf.len() {
            let ch = self.get_char(want_uni);
            if ch == -1 {
                break;
            }
            buf.set_u32(i, ch as u32);
            i += 1;
        }
        i as u32
    }

    /** Read one line, stopping after a newline. The buffer is always
        null-terminated; the count excludes the terminator. */
    pub fn get_line(&mut self, buf: &mut GlkBufferMut) -> u32 {
        if buf.is_empty() {
            return 0;
        }
        let want_uni = buf.uni();
        let max = buf.len() - 1;
        let mut i = 0;
        while i < max {
            let ch = self.get_char(want_uni);
            if ch == -1 {
                break;
            }
            buf.set_u32(i, ch as u32);
            i += 1;
            if ch == '\n' as i32 {
                break;
            }
        }
        buf.set_u32(i, GLK_NULL);
        i as u32
    }

    /** Write one character. Writing to a non-writable stream is silently
        ignored. Window streams are not handled here: the library routes
        those through the owning window and its echo stream. */
    pub fn put_char(&mut self, ch: u32) {
        if !self.writable {
            return;
        }
        self.writecount += 1;
        match &mut self.data {
            StreamData::Memory(data) => {
                if data.ptr < data.buf.len() {
                    data.buf.set_u32(data.ptr, ch);
                    data.ptr += 1;
                    if data.ptr > data.eof {
                        data.eof = data.ptr;
                    }
                }
            },
            StreamData::File(data) => {
                Stream::ensure_op(data, filemode_Write);
                if !self.uni {
                    let byte = (if ch > MAX_LATIN1 {QUESTION_MARK} else {ch}) as u8;
                    let _ = data.file.write_all(&[byte]);
                }
                else if self.binary {
                    let _ = data.file.write_all(&ch.to_be_bytes());
                }
                else {
                    let mut bytes = Vec::with_capacity(4);
                    encode_utf8_char(ch, &mut bytes);
                    let _ = data.file.write_all(&bytes);
                }
            },
            // Resource streams are never writable, and window streams are
            // routed through the owning window
            StreamData::Resource(_) | StreamData::Window(_) => {},
        }
    }

    /** Write a buffer. The write count grows by the full buffer length even
        when a memory stream has no room for all of it. */
    pub fn put_buffer(&mut self, buf: &GlkBuffer) {
        if !self.writable {
            return;
        }
        match &mut self.data {
            StreamData::Memory(data) => {
                self.writecount += buf.len();
                let write_length = buf.len().min(data.buf.len() - data.ptr);
                for i in 0..write_length {
                    data.buf.set_u32(data.ptr + i, buf.get_u32(i));
                }
                data.ptr += write_length;
                if data.ptr > data.eof {
                    data.eof = data.ptr;
                }
            },
            _ => {
                for i in 0..buf.len() {
                    self.put_char(buf.get_u32(i));
                }
            },
        }
    }

    pub fn get_position(&mut self) -> u32 {
        match &mut self.data {
            StreamData::Memory(data) => data.ptr as u32,
            StreamData::Resource(data) => data.ptr as u32,
            StreamData::File(data) => {
                let pos = data.file.stream_position().unwrap_or(0);
                if self.uni {
                    // Use 4 here, rather than a size_of, as the on-disk
                    // format is always four bytes per code point
                    (pos / 4) as u32
                }
                else {
                    pos as u32
                }
            },
            StreamData::Window(_) => 0,
        }
    }

    /** Seek. Invalid positions clamp; window streams ignore this entirely
        (and do not pass it on to an echo stream). */
    pub fn set_position(&mut self, mode: SeekMode, pos: i32) {
        match &mut self.data {
            StreamData::Memory(data) => {
                let new_pos = match mode {
                    SeekMode::Current => data.ptr as i64 + pos as i64,
                    SeekMode::End => data.eof as i64 + pos as i64,
                    SeekMode::Start => pos as i64,
                };
                data.ptr = new_pos.clamp(0, data.eof as i64) as usize;
            },
            StreamData::Resource(data) => {
                let eof = data.data.len() as i64;
                let new_pos = match mode {
                    SeekMode::Current => data.ptr as i64 + pos as i64,
                    SeekMode::End => eof + pos as i64,
                    SeekMode::Start => pos as i64,
                };
                data.ptr = new_pos.clamp(0, eof) as usize;
            },
            StreamData::File(data) => {
                // Either reading or writing is legal after a seek
                data.lastop = 0;
                let pos = if self.uni {pos as i64 * 4} else {pos as i64};
                let _ = match mode {
                    SeekMode::Current => data.file.seek(SeekFrom::Current(pos)),
                    SeekMode::End => data.file.seek(SeekFrom::End(pos)),
                    SeekMode::Start => data.file.seek(SeekFrom::Start(pos.max(0) as u64)),
                };
            },
            StreamData::Window(_) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::blorb;

    use super::*;

    fn memory_stream(len: usize, fmode: FileMode, uni: bool) -> Stream {
        Stream::new_memory(GlkOwnedBuffer::new(uni, len), fmode, uni)
    }

    #[test]
    fn memory_stream_pointer_invariants() {
        let mut str = memory_stream(8, FileMode::ReadWrite, false);
        for ch in [0x68u32, 0x69, 0x21] {
            str.put_char(ch);
        }
        let (ptr, eof, end) = match &str.data {
            StreamData::Memory(data) => (data.ptr, data.eof, data.buf.len()),
            _ => unreachable!(),
        };
        assert!(ptr <= eof && eof <= end);
        assert_eq!((ptr, eof), (3, 3));

        // Seeks clamp into [0, eof]
        str.set_position(SeekMode::Start, 100);
        assert_eq!(str.get_position(), 3);
        str.set_position(SeekMode::Current, -100);
        assert_eq!(str.get_position(), 0);
        str.set_position(SeekMode::End, -1);
        assert_eq!(str.get_position(), 2);

        // Reading stops at eof
        assert_eq!(str.get_char(false), 0x21);
        assert_eq!(str.get_char(false), -1);
        assert_eq!(str.readcount, 2);
        assert_eq!(str.writecount, 3);
    }

    #[test]
    fn memory_write_mode_starts_empty() {
        let mut str = memory_stream(4, FileMode::Write, false);
        match &str.data {
            StreamData::Memory(data) => assert_eq!(data.eof, 0),
            _ => unreachable!(),
        }
        // A full buffer drops further writes but still counts them
        str.put_buffer(&GlkBuffer::U8(b"abcdef"));
        assert_eq!(str.writecount, 6);
        match &str.data {
            StreamData::Memory(data) => assert_eq!((data.ptr, data.eof), (4, 4)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn narrow_stream_truncates_unicode() {
        let mut str = memory_stream(4, FileMode::ReadWrite, false);
        str.put_char(0x2014);
        str.set_position(SeekMode::Start, 0);
        assert_eq!(str.get_char(true), QUESTION_MARK as i32);
    }

    #[test]
    fn get_line_stops_at_newline() {
        let mut str = memory_stream(16, FileMode::ReadWrite, false);
        str.put_buffer(&GlkBuffer::U8(b"one\ntwo"));
        str.set_position(SeekMode::Start, 0);
        let mut out = [0u8; 10];
        let count = str.get_line(&mut GlkBufferMut::U8(&mut out));
        assert_eq!(count, 4);
        assert_eq!(&out[..5], b"one\n\0");
    }

    #[test]
    fn resource_stream_forms() {
        // Narrow text resource: raw bytes
        let chunk = ResourceChunk::new(blorb::giblorb_ID_TEXT, b"hello".to_vec().into_boxed_slice()).unwrap();
        let mut str = Stream::new_resource(chunk, 1, false);
        let mut out = [0u8; 80];
        let count = str.get_line(&mut GlkBufferMut::U8(&mut out));
        assert_eq!(count, 5);
        assert_eq!(&out[..5], b"hello");

        // Wide text resource: UTF-8 decoding engages
        let chunk = ResourceChunk::new(blorb::giblorb_ID_TEXT, "h\u{2014}".as_bytes().to_vec().into_boxed_slice()).unwrap();
        let mut str = Stream::new_resource(chunk, 1, true);
        assert_eq!(str.get_char(true), 'h' as i32);
        assert_eq!(str.get_char(true), 0x2014);
        assert_eq!(str.get_char(true), -1);

        // Wide binary resource: big-endian u32s
        let chunk = ResourceChunk::new(blorb::giblorb_ID_BINA, vec![0, 0, 0x21, 0x05].into_boxed_slice()).unwrap();
        let mut str = Stream::new_resource(chunk, 1, true);
        assert_eq!(str.get_char(true), 0x2105);

        // Resource streams are never writable
        str.put_char(0x41);
        assert_eq!(str.writecount, 0);
    }

    #[test]
    fn file_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.glkdata");
        let fileref = FileRef::new(path.to_string_lossy().into_owned(), fileusage_Data | fileusage_BinaryMode);

        let mut str = Stream::open_file(&fileref, FileMode::Write, true).unwrap().unwrap();
        str.put_buffer(&GlkBuffer::U32(&[0x68, 0x2014]));
        assert_eq!(str.get_position(), 2);
        drop(str);

        let mut str = Stream::open_file(&fileref, FileMode::Read, true).unwrap().unwrap();
        assert_eq!(str.get_char(true), 0x68);
        assert_eq!(str.get_char(true), 0x2014);
        assert_eq!(str.get_char(true), -1);
        // The on-disk form is big-endian u32
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 0, 0x68, 0, 0, 0x20, 0x14]);
    }

    #[test]
    fn file_read_write_interleaving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.glkdata");
        let fileref = FileRef::new(path.to_string_lossy().into_owned(), fileusage_Data | fileusage_BinaryMode);

        let mut str = Stream::open_file(&fileref, FileMode::ReadWrite, false).unwrap().unwrap();
        str.put_buffer(&GlkBuffer::U8(b"abcd"));
        str.set_position(SeekMode::Start, 1);
        assert_eq!(str.get_char(false), 'b' as i32);
        // Write directly after read relies on the lastop seek
        str.put_char('X' as u32);
        str.set_position(SeekMode::Start, 0);
        let mut out = [0u8; 5];
        assert_eq!(str.get_buffer(&mut GlkBufferMut::U8(&mut out)), 4);
        assert_eq!(&out[..4], b"abXd");
    }

    #[test]
    fn missing_read_file_is_silent() {
        let fileref = FileRef::new("/nonexistent/nowhere.glkdata".to_string(), fileusage_Data);
        assert!(Stream::open_file(&fileref, FileMode::Read, false).unwrap().is_none());
    }
}
