/*

Glkwire constants
=================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

#![allow(non_upper_case_globals)]

use serde::{Deserialize, Serialize};

use super::*;

pub const gestalt_Version: u32 = 0;
pub const gestalt_CharInput: u32 = 1;
pub const gestalt_LineInput: u32 = 2;
pub const gestalt_CharOutput: u32 = 3;
pub const gestalt_CharOutput_CannotPrint: u32 = 0;
pub const gestalt_CharOutput_ApproxPrint: u32 = 1;
pub const gestalt_CharOutput_ExactPrint: u32 = 2;
pub const gestalt_MouseInput: u32 = 4;
pub const gestalt_Timer: u32 = 5;
pub const gestalt_Graphics: u32 = 6;
pub const gestalt_DrawImage: u32 = 7;
pub const gestalt_Sound: u32 = 8;
pub const gestalt_SoundVolume: u32 = 9;
pub const gestalt_SoundNotify: u32 = 10;
pub const gestalt_Hyperlinks: u32 = 11;
pub const gestalt_HyperlinkInput: u32 = 12;
pub const gestalt_SoundMusic: u32 = 13;
pub const gestalt_GraphicsTransparency: u32 = 14;
pub const gestalt_Unicode: u32 = 15;
pub const gestalt_UnicodeNorm: u32 = 16;
pub const gestalt_LineInputEcho: u32 = 17;
pub const gestalt_LineTerminators: u32 = 18;
pub const gestalt_LineTerminatorKey: u32 = 19;
pub const gestalt_DateTime: u32 = 20;
pub const gestalt_Sound2: u32 = 21;
pub const gestalt_ResourceStream: u32 = 22;
pub const gestalt_GraphicsCharInput: u32 = 23;

pub const GLK_VERSION: u32 = 0x00000706;

pub const keycode_Unknown: u32 = 0xffffffff;
pub const keycode_Left: u32 = 0xfffffffe;
pub const keycode_Right: u32 = 0xfffffffd;
pub const keycode_Up: u32 = 0xfffffffc;
pub const keycode_Down: u32 = 0xfffffffb;
pub const keycode_Return: u32 = 0xfffffffa;
pub const keycode_Delete: u32 = 0xfffffff9;
pub const keycode_Escape: u32 = 0xfffffff8;
pub const keycode_Tab: u32 = 0xfffffff7;
pub const keycode_PageUp: u32 = 0xfffffff6;
pub const keycode_PageDown: u32 = 0xfffffff5;
pub const keycode_Home: u32 = 0xfffffff4;
pub const keycode_End: u32 = 0xfffffff3;
pub const keycode_Func1: u32 = 0xffffffef;
pub const keycode_Func2: u32 = 0xffffffee;
pub const keycode_Func3: u32 = 0xffffffed;
pub const keycode_Func4: u32 = 0xffffffec;
pub const keycode_Func5: u32 = 0xffffffeb;
pub const keycode_Func6: u32 = 0xffffffea;
pub const keycode_Func7: u32 = 0xffffffe9;
pub const keycode_Func8: u32 = 0xffffffe8;
pub const keycode_Func9: u32 = 0xffffffe7;
pub const keycode_Func10: u32 = 0xffffffe6;
pub const keycode_Func11: u32 = 0xffffffe5;
pub const keycode_Func12: u32 = 0xffffffe4;
// The last keycode is always (0x100000000 - keycode_MAXVAL)
pub const keycode_MAXVAL: u32 = 28;

pub fn key_name_to_code(key: &str) -> u32 {
    match key {
        "delete" => keycode_Delete,
        "down" => keycode_Down,
        "end" => keycode_End,
        "escape" => keycode_Escape,
        "func1" => keycode_Func1,
        "func2" => keycode_Func2,
        "func3" => keycode_Func3,
        "func4" => keycode_Func4,
        "func5" => keycode_Func5,
        "func6" => keycode_Func6,
        "func7" => keycode_Func7,
        "func8" => keycode_Func8,
        "func9" => keycode_Func9,
        "func10" => keycode_Func10,
        "func11" => keycode_Func11,
        "func12" => keycode_Func12,
        "home" => keycode_Home,
        "left" => keycode_Left,
        "pagedown" => keycode_PageDown,
        "pageup" => keycode_PageUp,
        "return" => keycode_Return,
        "right" => keycode_Right,
        "tab" => keycode_Tab,
        "up" => keycode_Up,
        _ => keycode_Unknown,
    }
}

/* Only escape and the function keys may terminate line input. They are
   encoded as a bitmask: bit 16 for escape, bits 1-12 for func1-func12. */
pub const termmask_Escape: u32 = 0x10000;

pub fn terminators_to_mask(keycodes: &[u32]) -> u32 {
    let mut mask = 0;
    for &code in keycodes {
        if code == keycode_Escape {
            mask |= termmask_Escape;
        }
        else {
            let val = keycode_Func1.wrapping_add(1).wrapping_sub(code);
            if (1..=12).contains(&val) {
                mask |= 1 << val;
            }
        }
    }
    mask
}

pub const evtype_None: u32 = 0;
pub const evtype_Timer: u32 = 1;
pub const evtype_CharInput: u32 = 2;
pub const evtype_LineInput: u32 = 3;
pub const evtype_MouseInput: u32 = 4;
pub const evtype_Arrange: u32 = 5;
pub const evtype_Redraw: u32 = 6;
pub const evtype_SoundNotify: u32 = 7;
pub const evtype_Hyperlink: u32 = 8;
pub const evtype_VolumeNotify: u32 = 9;
/* Not defined by Glk: the type given to events whose textual name was not
   recognised. The caller is expected to ignore it. */
pub const evtype_Unknown: u32 = 0x7fffffff;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum GlkEventType {
    #[default]
    None = 0,
    Timer,
    Char,
    Line,
    Mouse,
    Arrange,
    Redraw,
    SoundNotify,
    Hyperlink,
    VolumeNotify,
    /** An event whose textual name was not recognised; the caller should
        ignore it */
    Unknown,
}

impl GlkEventType {
    pub fn evtype(&self) -> u32 {
        match self {
            GlkEventType::None => evtype_None,
            GlkEventType::Timer => evtype_Timer,
            GlkEventType::Char => evtype_CharInput,
            GlkEventType::Line => evtype_LineInput,
            GlkEventType::Mouse => evtype_MouseInput,
            GlkEventType::Arrange => evtype_Arrange,
            GlkEventType::Redraw => evtype_Redraw,
            GlkEventType::SoundNotify => evtype_SoundNotify,
            GlkEventType::Hyperlink => evtype_Hyperlink,
            GlkEventType::VolumeNotify => evtype_VolumeNotify,
            GlkEventType::Unknown => evtype_Unknown,
        }
    }
}

pub const style_Normal: u32 = 0;
pub const style_Emphasized: u32 = 1;
pub const style_Preformatted: u32 = 2;
pub const style_Header: u32 = 3;
pub const style_Subheader: u32 = 4;
pub const style_Alert: u32 = 5;
pub const style_Note: u32 = 6;
pub const style_BlockQuote: u32 = 7;
pub const style_Input: u32 = 8;
pub const style_User1: u32 = 9;
pub const style_User2: u32 = 10;
pub const style_NUMSTYLES: u32 = 11;

pub fn style_name(style: u32) -> &'static str {
    match style {
        style_Normal => "normal",
        style_Emphasized => "emphasized",
        style_Preformatted => "preformatted",
        style_Header => "header",
        style_Subheader => "subheader",
        style_Alert => "alert",
        style_Note => "note",
        style_BlockQuote => "blockquote",
        style_Input => "input",
        style_User1 => "user1",
        style_User2 => "user2",
        _ => "normal",
    }
}

pub const wintype_AllTypes: u32 = 0;
pub const wintype_Pair: u32 = 1;
pub const wintype_Blank: u32 = 2;
pub const wintype_TextBuffer: u32 = 3;
pub const wintype_TextGrid: u32 = 4;
pub const wintype_Graphics: u32 = 5;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    All = 0,
    Pair = 1,
    #[default]
    Blank = 2,
    Buffer = 3,
    Graphics = 5,
    Grid = 4,
}

impl WindowType {
    pub fn wintype(&self) -> u32 {
        *self as u32
    }
}

pub fn window_type(wintype: u32) -> Option<WindowType> {
    match wintype {
        wintype_Pair => Some(WindowType::Pair),
        wintype_Blank => Some(WindowType::Blank),
        wintype_TextBuffer => Some(WindowType::Buffer),
        wintype_TextGrid => Some(WindowType::Grid),
        wintype_Graphics => Some(WindowType::Graphics),
        _ => None,
    }
}

pub const winmethod_Left: u32 = 0x00;
pub const winmethod_Right: u32 = 0x01;
pub const winmethod_Above: u32 = 0x02;
pub const winmethod_Below: u32 = 0x03;
pub const winmethod_DirMask: u32 = 0x0f;

pub const winmethod_Fixed: u32 = 0x10;
pub const winmethod_Proportional: u32 = 0x20;
pub const winmethod_DivisionMask: u32 = 0xf0;

pub const winmethod_Border: u32 = 0x000;
pub const winmethod_NoBorder: u32 = 0x100;
pub const winmethod_BorderMask: u32 = 0x100;

pub fn validate_winmethod(method: u32, wintype: WindowType) -> GlkResult<(u32, u32, u32)> {
    if wintype == WindowType::Pair {
        return Err(SplitCantBePair);
    }
    let division = method & winmethod_DivisionMask;
    let direction = method & winmethod_DirMask;
    if division != winmethod_Fixed && division != winmethod_Proportional {
        return Err(InvalidWindowDivision);
    }
    if division == winmethod_Fixed && wintype == WindowType::Blank {
        return Err(InvalidWindowDivisionBlank);
    }
    if let winmethod_Above | winmethod_Below | winmethod_Left | winmethod_Right = direction {}
    else {
        return Err(InvalidWindowDirection);
    }
    Ok((division, direction, method & winmethod_BorderMask))
}

pub const fileusage_Data: u32 = 0x00;
pub const fileusage_SavedGame: u32 = 0x01;
pub const fileusage_Transcript: u32 = 0x02;
pub const fileusage_InputRecord: u32 = 0x03;
pub const fileusage_TypeMask: u32 = 0x0f;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    Data = 0,
    #[serde(rename = "save")]
    SavedGame,
    Transcript,
    #[serde(rename = "command")]
    InputRecord,
}

pub fn file_type(filetype: u32) -> FileType {
    match filetype & fileusage_TypeMask {
        fileusage_SavedGame => FileType::SavedGame,
        fileusage_Transcript => FileType::Transcript,
        fileusage_InputRecord => FileType::InputRecord,
        _ => FileType::Data,
    }
}

pub fn filetype_suffix(filetype: FileType) -> &'static str {
    match filetype {
        FileType::Data => ".glkdata",
        FileType::SavedGame => ".glksave",
        FileType::Transcript | FileType::InputRecord => ".txt",
    }
}

pub const fileusage_TextMode: u32 = 0x100;
pub const fileusage_BinaryMode: u32 = 0x000;

pub const filemode_Write: u32 = 0x01;
pub const filemode_Read: u32 = 0x02;
pub const filemode_ReadWrite: u32 = 0x03;
pub const filemode_WriteAppend: u32 = 0x05;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    Write = 0x01,
    #[default]
    Read = 0x02,
    ReadWrite = 0x03,
    WriteAppend = 0x05,
}

pub fn file_mode(filemode: u32) -> GlkResult<FileMode> {
    match filemode {
        filemode_Write => Ok(FileMode::Write),
        filemode_Read => Ok(FileMode::Read),
        filemode_ReadWrite => Ok(FileMode::ReadWrite),
        filemode_WriteAppend => Ok(FileMode::WriteAppend),
        _ => Err(IllegalFilemode),
    }
}

pub const seekmode_Start: u32 = 0;
pub const seekmode_Current: u32 = 1;
pub const seekmode_End: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SeekMode {
    Current = 1,
    End = 2,
    Start = 0,
}

pub const stylehint_NUMHINTS: u32 = 10;

pub const imagealign_InlineUp: u32 = 1;
pub const imagealign_InlineDown: u32 = 2;
pub const imagealign_InlineCenter: u32 = 3;
pub const imagealign_MarginLeft: u32 = 4;
pub const imagealign_MarginRight: u32 = 5;

pub fn imagealign_name(alignment: u32) -> &'static str {
    match alignment {
        imagealign_InlineDown => "inlinedown",
        imagealign_InlineCenter => "inlinecenter",
        imagealign_MarginLeft => "marginleft",
        imagealign_MarginRight => "marginright",
        _ => "inlineup",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winmethod_validation() {
        assert!(validate_winmethod(winmethod_Below | winmethod_Fixed, WindowType::Grid).is_ok());
        assert_eq!(validate_winmethod(winmethod_Above | winmethod_Proportional | winmethod_NoBorder, WindowType::Buffer).unwrap(),
            (winmethod_Proportional, winmethod_Above, winmethod_NoBorder));
        assert!(validate_winmethod(winmethod_Below, WindowType::Grid).is_err());
        assert!(validate_winmethod(winmethod_Below | winmethod_Fixed, WindowType::Blank).is_err());
        assert!(validate_winmethod(winmethod_Below | winmethod_Fixed, WindowType::Pair).is_err());
        assert!(validate_winmethod(0x08 | winmethod_Fixed, WindowType::Grid).is_err());
    }

    #[test]
    fn terminator_masks() {
        assert_eq!(terminators_to_mask(&[]), 0);
        assert_eq!(terminators_to_mask(&[keycode_Escape]), termmask_Escape);
        assert_eq!(terminators_to_mask(&[keycode_Func1]), 1 << 1);
        assert_eq!(terminators_to_mask(&[keycode_Func12, keycode_Escape]), (1 << 12) | termmask_Escape);
        // Non-terminator keys are dropped
        assert_eq!(terminators_to_mask(&[keycode_Return, 'q' as u32]), 0);
    }

    #[test]
    fn key_names() {
        assert_eq!(key_name_to_code("escape"), keycode_Escape);
        assert_eq!(key_name_to_code("func10"), keycode_Func10);
        assert_eq!(key_name_to_code("qwerty"), keycode_Unknown);
    }
}
