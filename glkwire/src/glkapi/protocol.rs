/*

The Glkwire protocol
====================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use serde::de::Error as SerdeError;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::common::*;
use super::constants::*;

/** The protocol has two halves:
 * 1. the client sends events to the library
 * 2. the library sends content updates to the client
*/

// Client -> library input events

#[derive(Clone, Debug)]
pub struct Event {
    /** Generation number */
    pub gen: u32,
    pub data: EventData,
}

#[derive(Clone, Debug)]
pub enum EventData {
    Arrange(ArrangeEvent),
    Char(CharEvent),
    Debug(DebugEvent),
    Hyperlink(HyperlinkEvent),
    Init(InitEvent),
    Line(LineEvent),
    Mouse(MouseEvent),
    Redraw(RedrawEvent),
    Refresh,
    Special(SpecialEvent),
    Timer,
    /** An event whose textual name was not recognised; ignored */
    Unknown,
}

#[derive(Clone, Debug)]
pub struct ArrangeEvent {
    pub metrics: Metrics,
}

/** Character (single key) event; the value is either a single character
    or a special key name */
#[derive(Clone, Debug)]
pub struct CharEvent {
    pub value: String,
    /** Window ID */
    pub window: u32,
}

impl CharEvent {
    /** The key as a code point, mapping special key names to keycodes */
    pub fn keycode(&self) -> u32 {
        let mut chars = self.value.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => ch as u32,
            _ => key_name_to_code(&self.value),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DebugEvent {
    pub value: String,
}

#[derive(Clone, Debug)]
pub struct HyperlinkEvent {
    pub value: u32,
    /** Window ID */
    pub window: u32,
}

/** Initialisation event */
#[derive(Clone, Debug)]
pub struct InitEvent {
    pub metrics: Metrics,
    /** Capabilities list */
    pub support: Vec<String>,
}

/** Line (text) event */
#[derive(Clone, Debug)]
pub struct LineEvent {
    /** Terminator key name */
    pub terminator: Option<String>,
    /** Line input */
    pub value: String,
    /** Window ID */
    pub window: u32,
}

#[derive(Clone, Debug)]
pub struct MouseEvent {
    /** Window ID */
    pub window: u32,
    pub x: u32,
    pub y: u32,
}

#[derive(Clone, Debug)]
pub struct RedrawEvent {
    /** Window ID, or None for all windows */
    pub window: Option<u32>,
}

/** Response to a special input request (a file name prompt) */
#[derive(Clone, Debug)]
pub struct SpecialEvent {
    /** The chosen file name; None means the player cancelled */
    pub value: Option<String>,
}

fn field<'a>(obj: &'a serde_json::Map<String, Value>, ev: &str, key: &str) -> GlkResult<&'a Value> {
    obj.get(key).ok_or_else(|| GlkApiError::MalformedInput(format!("{} event has no {}", ev, key)))
}

fn str_field(obj: &serde_json::Map<String, Value>, ev: &str, key: &str) -> GlkResult<String> {
    field(obj, ev, key)?.as_str()
        .map(|str| str.to_owned())
        .ok_or_else(|| GlkApiError::MalformedInput(format!("{} event {} must be a string", ev, key)))
}

fn u32_field(obj: &serde_json::Map<String, Value>, ev: &str, key: &str) -> GlkResult<u32> {
    field(obj, ev, key)?.as_u64()
        .map(|val| val as u32)
        .ok_or_else(|| GlkApiError::MalformedInput(format!("{} event {} must be a number", ev, key)))
}

fn metrics_field(obj: &serde_json::Map<String, Value>, ev: &str) -> GlkResult<Metrics> {
    let val = field(obj, ev, "metrics")?.clone();
    serde_json::from_value(val)
        .map_err(|err| GlkApiError::MalformedInput(format!("{} event metrics: {}", ev, err)))
}

impl Event {
    /** Decode one event stanza. Unrecognised event types are not an error:
        they become `EventData::Unknown` and the caller ignores them. */
    pub fn from_value(value: Value) -> GlkResult<Event> {
        let obj = value.as_object()
            .ok_or_else(|| GlkApiError::MalformedInput("input stanza is not an object".to_string()))?;
        let ev = obj.get("type").and_then(|val| val.as_str())
            .ok_or_else(|| GlkApiError::MalformedInput("input stanza has no type".to_string()))?
            .to_owned();
        let gen = u32_field(obj, &ev, "gen")?;

        let data = match ev.as_str() {
            "init" => EventData::Init(InitEvent {
                metrics: metrics_field(obj, "init")?,
                support: obj.get("support")
                    .and_then(|val| val.as_array())
                    .map(|list| list.iter().filter_map(|val| val.as_str().map(str::to_owned)).collect())
                    .unwrap_or_default(),
            }),
            "refresh" => EventData::Refresh,
            "arrange" => EventData::Arrange(ArrangeEvent {
                metrics: metrics_field(obj, "arrange")?,
            }),
            "redraw" => EventData::Redraw(RedrawEvent {
                window: obj.get("window").and_then(|val| val.as_u64()).map(|val| val as u32),
            }),
            "line" => EventData::Line(LineEvent {
                terminator: obj.get("terminator").and_then(|val| val.as_str()).map(str::to_owned),
                value: str_field(obj, "line", "value")?,
                window: u32_field(obj, "line", "window")?,
            }),
            "char" => EventData::Char(CharEvent {
                value: str_field(obj, "char", "value")?,
                window: u32_field(obj, "char", "window")?,
            }),
            "hyperlink" => EventData::Hyperlink(HyperlinkEvent {
                value: u32_field(obj, "hyperlink", "value")?,
                window: u32_field(obj, "hyperlink", "window")?,
            }),
            "mouse" => EventData::Mouse(MouseEvent {
                window: u32_field(obj, "mouse", "window")?,
                x: u32_field(obj, "mouse", "x")?,
                y: u32_field(obj, "mouse", "y")?,
            }),
            "timer" => EventData::Timer,
            "specialresponse" => {
                if str_field(obj, "specialresponse", "response")? != "fileref_prompt" {
                    return Err(GlkApiError::MalformedInput("specialresponse event has unknown response type".to_string()));
                }
                // The value is a plain string from a test harness, or a
                // dialog fileref object from a real client
                let value = match obj.get("value") {
                    Some(Value::String(str)) => Some(str.clone()),
                    Some(Value::Object(obj)) => obj.get("filename")
                        .and_then(|val| val.as_str())
                        .map(str::to_owned),
                    _ => None,
                };
                EventData::Special(SpecialEvent {value})
            },
            "debuginput" => EventData::Debug(DebugEvent {
                value: str_field(obj, "debuginput", "value")?,
            }),
            _ => EventData::Unknown,
        };

        Ok(Event {gen, data})
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let value = Value::deserialize(deserializer)?;
        Event::from_value(value).map_err(D::Error::custom)
    }
}

// Library -> client content updates

fn is_false(val: &bool) -> bool {
    !val
}

#[derive(Debug, Default, Serialize)]
pub struct Update {
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    pub gen: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<WindowUpdate>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<InputUpdate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialinput: Option<SpecialInput>,
    /** `Some(None)` serialises as `null`, meaning the timer was disabled */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<Option<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debugoutput: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateType;

impl Serialize for UpdateType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("update")
    }
}

/** An error stanza; fatal errors emit one of these before the process exits */
#[derive(Debug, Serialize)]
pub struct ErrorUpdate {
    #[serde(rename = "type")]
    pub update_type: ErrorUpdateType,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorUpdateType;

impl Serialize for ErrorUpdateType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("error")
    }
}

impl ErrorUpdate {
    pub fn new(message: &str) -> Self {
        ErrorUpdate {
            update_type: ErrorUpdateType,
            message: message.to_string(),
        }
    }
}

/** One non-pair window's existence and arrangement */
#[derive(Debug, Serialize)]
pub struct WindowUpdate {
    pub id: u32,
    #[serde(rename = "type")]
    pub wintype: WindowType,
    pub rock: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gridwidth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gridheight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphwidth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphheight: Option<u32>,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ContentUpdate {
    Buffer(BufferWindowContentUpdate),
    Graphics(GraphicsWindowContentUpdate),
    Grid(GridWindowContentUpdate),
}

/** Buffer window content update */
#[derive(Debug, Serialize)]
pub struct BufferWindowContentUpdate {
    pub id: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub clear: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text: Vec<BufferWindowParagraphUpdate>,
}

/** One buffer window paragraph */
#[derive(Debug, Default, Serialize)]
pub struct BufferWindowParagraphUpdate {
    /** Continue the last paragraph rather than opening a new one */
    #[serde(skip_serializing_if = "is_false")]
    pub append: bool,
    /** A flow break ends this paragraph */
    #[serde(skip_serializing_if = "is_false")]
    pub flowbreak: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<LineData>,
}

/** Grid window content update */
#[derive(Debug, Serialize)]
pub struct GridWindowContentUpdate {
    pub id: u32,
    pub lines: Vec<GridWindowLine>,
}

#[derive(Debug, Serialize)]
pub struct GridWindowLine {
    pub line: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<LineData>,
}

/** Graphics window content update */
#[derive(Debug, Serialize)]
pub struct GraphicsWindowContentUpdate {
    pub id: u32,
    pub draw: Vec<SpecialSpanUpdate>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LineData {
    TextRun(TextRun),
    Special(SpecialSpanUpdate),
}

/** A run of characters sharing one style and hyperlink */
#[derive(Debug, PartialEq, Serialize)]
pub struct TextRun {
    pub style: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<u32>,
    pub text: String,
}

/** The wire form of a special span */
#[derive(Debug, Default, Serialize)]
pub struct SpecialSpanUpdate {
    pub special: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperlink: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alttext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/** Windows with active input */
#[derive(Debug, Default, Serialize)]
pub struct InputUpdate {
    pub id: u32,
    /** Generation number from when the input was requested */
    pub gen: u32,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxlen: Option<u32>,
    /** Preloaded line input */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /** Grid window cursor */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpos: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ypos: Option<u32>,
    #[serde(skip_serializing_if = "is_false")]
    pub hyperlink: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub mouse: bool,
}

impl InputUpdate {
    pub fn new(id: u32) -> Self {
        InputUpdate {
            id,
            ..Default::default()
        }
    }
}

/** A special input request, instead of the normal input list */
#[derive(Debug, Serialize)]
pub struct SpecialInput {
    #[serde(rename = "type")]
    pub request_type: SpecialInputType,
    pub filemode: FileMode,
    pub filetype: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gameid: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SpecialInputType;

impl Serialize for SpecialInputType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("fileref_prompt")
    }
}

// Special spans (images, flow breaks, colours, fills)

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SpecialType {
    #[default]
    None = 0,
    Image = 1,
    FlowBreak = 2,
    SetColor = 3,
    Fill = 4,
}

impl Serialize for SpecialType {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(*self as u32)
    }
}

impl<'de> Deserialize<'de> for SpecialType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        match u32::deserialize(deserializer)? {
            1 => Ok(SpecialType::Image),
            2 => Ok(SpecialType::FlowBreak),
            3 => Ok(SpecialType::SetColor),
            4 => Ok(SpecialType::Fill),
            _ => Ok(SpecialType::None),
        }
    }
}

fn is_zero_u32(val: &u32) -> bool {
    *val == 0
}

fn is_zero_i32(val: &i32) -> bool {
    *val == 0
}

/** An embedded non-text element of a buffer or graphics window. The full
    field set is retained for autosave; the wire form is built on demand. */
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SpecialSpan {
    #[serde(rename = "type")]
    pub special_type: SpecialType,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub image: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub chunktype: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hasdimensions: bool,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub xpos: i32,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub ypos: i32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub width: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub alignment: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub hyperlink: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alttext: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hascolor: bool,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub color: u32,
}

impl SpecialSpan {
    pub fn new(special_type: SpecialType) -> Self {
        SpecialSpan {
            special_type,
            ..Default::default()
        }
    }

    fn image_url(&self, resource_url: Option<&str>) -> Option<String> {
        let base = resource_url?;
        let suffix = match self.chunktype {
            0x4A504547 => ".jpeg",
            0x504E4720 => ".png",
            _ => "",
        };
        Some(format!("{}pict-{}{}", base, self.image, suffix))
    }

    /** The wire form, which differs between buffer and graphics windows */
    pub fn to_update(&self, wintype: WindowType, resource_url: Option<&str>) -> SpecialSpanUpdate {
        match self.special_type {
            SpecialType::Image => {
                let mut update = SpecialSpanUpdate {
                    special: "image",
                    image: Some(self.image),
                    url: self.image_url(resource_url),
                    hyperlink: if self.hyperlink > 0 {Some(self.hyperlink)} else {None},
                    alttext: self.alttext.clone(),
                    ..Default::default()
                };
                if wintype == WindowType::Graphics {
                    update.width = Some(self.width);
                    update.height = Some(self.height);
                    update.x = Some(self.xpos);
                    update.y = Some(self.ypos);
                }
                else {
                    if self.width > 0 {
                        update.width = Some(self.width);
                    }
                    if self.height > 0 {
                        update.height = Some(self.height);
                    }
                    update.alignment = Some(imagealign_name(self.alignment));
                }
                update
            },
            SpecialType::SetColor => SpecialSpanUpdate {
                special: "setcolor",
                color: if self.hascolor {Some(format!("#{:06X}", self.color))} else {None},
                ..Default::default()
            },
            // Fill with no rect and no colour clears the whole window;
            // SpecialType::None only arises from a damaged autosave
            _ => {
                let mut update = SpecialSpanUpdate {
                    special: "fill",
                    color: if self.hascolor {Some(format!("#{:06X}", self.color))} else {None},
                    ..Default::default()
                };
                if self.hasdimensions {
                    update.x = Some(self.xpos);
                    update.y = Some(self.ypos);
                    update.width = Some(self.width);
                    update.height = Some(self.height);
                }
                update
            },
        }
    }
}

// Metrics

/** Screen and font metrics, as the client supplies them */
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub buffercharheight: Option<f64>,
    pub buffercharwidth: Option<f64>,
    pub buffermargin: Option<f64>,
    pub buffermarginx: Option<f64>,
    pub buffermarginy: Option<f64>,
    /** Character height (for both buffer and grid windows) */
    pub charheight: Option<f64>,
    /** Character width (for both buffer and grid windows) */
    pub charwidth: Option<f64>,
    pub graphicsmargin: Option<f64>,
    pub graphicsmarginx: Option<f64>,
    pub graphicsmarginy: Option<f64>,
    pub gridcharheight: Option<f64>,
    pub gridcharwidth: Option<f64>,
    pub gridmargin: Option<f64>,
    pub gridmarginx: Option<f64>,
    pub gridmarginy: Option<f64>,
    pub height: Option<f64>,
    pub inspacing: Option<f64>,
    pub inspacingx: Option<f64>,
    pub inspacingy: Option<f64>,
    /** Margin for all window types */
    pub margin: Option<f64>,
    pub marginx: Option<f64>,
    pub marginy: Option<f64>,
    pub outspacing: Option<f64>,
    pub outspacingx: Option<f64>,
    pub outspacingy: Option<f64>,
    /** Spacing for all spacing types */
    pub spacing: Option<f64>,
    pub spacingx: Option<f64>,
    pub spacingy: Option<f64>,
    pub width: Option<f64>,
}

impl Metrics {
    pub fn new(width: f64, height: f64) -> Self {
        Metrics {
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }
}

/** Metrics with the alias keys collapsed away */
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct NormalisedMetrics {
    pub buffercharheight: f64,
    pub buffercharwidth: f64,
    pub buffermarginx: f64,
    pub buffermarginy: f64,
    pub graphicsmarginx: f64,
    pub graphicsmarginy: f64,
    pub gridcharheight: f64,
    pub gridcharwidth: f64,
    pub gridmarginx: f64,
    pub gridmarginy: f64,
    pub height: f64,
    pub inspacingx: f64,
    pub inspacingy: f64,
    pub outspacingx: f64,
    pub outspacingy: f64,
    pub width: f64,
}

// Support capabilities

/** The client capability set */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SupportCaps {
    pub timer: bool,
    pub hyperlinks: bool,
    pub graphics: bool,
    pub graphicswin: bool,
    pub graphicsext: bool,
    pub sound: bool,
}

impl SupportCaps {
    /** Parse a capability list; unknown entries are ignored */
    pub fn from_list<S: AsRef<str>>(list: &[S]) -> Self {
        let mut caps = SupportCaps::default();
        for entry in list {
            match entry.as_ref() {
                "timer" | "timers" => caps.timer = true,
                "hyperlink" | "hyperlinks" => caps.hyperlinks = true,
                "graphics" => caps.graphics = true,
                "graphicswin" => caps.graphicswin = true,
                "graphicsext" => caps.graphicsext = true,
                "sound" => caps.sound = true,
                _ => {},
            }
        }
        caps
    }

    pub fn merge(&mut self, other: &SupportCaps) {
        self.timer |= other.timer;
        self.hyperlinks |= other.hyperlinks;
        self.graphics |= other.graphics;
        self.graphicswin |= other.graphicswin;
        self.graphicsext |= other.graphicsext;
        self.sound |= other.sound;
    }

    fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.timer {
            names.push("timer");
        }
        if self.hyperlinks {
            names.push("hyperlinks");
        }
        if self.graphics {
            names.push("graphics");
        }
        if self.graphicswin {
            names.push("graphicswin");
        }
        if self.graphicsext {
            names.push("graphicsext");
        }
        if self.sound {
            names.push("sound");
        }
        names
    }
}

impl Serialize for SupportCaps {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        let mut seq = s.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SupportCaps {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let list = Vec::<String>::deserialize(deserializer)?;
        Ok(SupportCaps::from_list(&list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_parsing() {
        let ev: Event = serde_json::from_str(r#"{"type":"init","gen":0,"metrics":{"width":80,"height":24,"charwidth":1,"charheight":1},"support":["timer","unknowncap"]}"#).unwrap();
        assert_eq!(ev.gen, 0);
        match ev.data {
            EventData::Init(init) => {
                assert_eq!(init.metrics.width, Some(80.0));
                assert!(SupportCaps::from_list(&init.support).timer);
            },
            _ => panic!("expected init event"),
        }

        let ev: Event = serde_json::from_str(r#"{"type":"char","gen":3,"window":25,"value":"a"}"#).unwrap();
        match ev.data {
            EventData::Char(char) => assert_eq!(char.keycode(), 0x61),
            _ => panic!("expected char event"),
        }

        let ev: Event = serde_json::from_str(r#"{"type":"char","gen":3,"window":25,"value":"escape"}"#).unwrap();
        match ev.data {
            EventData::Char(char) => assert_eq!(char.keycode(), keycode_Escape),
            _ => panic!("expected char event"),
        }

        // Unknown types are ignorable, not fatal
        let ev: Event = serde_json::from_str(r#"{"type":"squonk","gen":7}"#).unwrap();
        assert!(matches!(ev.data, EventData::Unknown));
        assert_eq!(ev.gen, 7);

        // Missing gen is fatal
        assert!(serde_json::from_str::<Event>(r#"{"type":"timer"}"#).is_err());
    }

    #[test]
    fn special_response_forms() {
        let ev: Event = serde_json::from_str(r#"{"type":"specialresponse","gen":2,"response":"fileref_prompt","value":"save1"}"#).unwrap();
        match ev.data {
            EventData::Special(special) => assert_eq!(special.value.as_deref(), Some("save1")),
            _ => panic!("expected special event"),
        }

        let ev: Event = serde_json::from_str(r#"{"type":"specialresponse","gen":2,"response":"fileref_prompt","value":{"filename":"save2"}}"#).unwrap();
        match ev.data {
            EventData::Special(special) => assert_eq!(special.value.as_deref(), Some("save2")),
            _ => panic!("expected special event"),
        }

        let ev: Event = serde_json::from_str(r#"{"type":"specialresponse","gen":2,"response":"fileref_prompt"}"#).unwrap();
        match ev.data {
            EventData::Special(special) => assert!(special.value.is_none()),
            _ => panic!("expected special event"),
        }
    }

    #[test]
    fn update_serialisation() {
        let update = Update {
            gen: 1,
            content: vec![ContentUpdate::Buffer(BufferWindowContentUpdate {
                id: 25,
                clear: false,
                text: vec![BufferWindowParagraphUpdate {
                    content: vec![LineData::TextRun(TextRun {
                        style: "normal",
                        hyperlink: None,
                        text: "hi".to_string(),
                    })],
                    ..Default::default()
                }],
            })],
            input: Some(vec![InputUpdate {
                id: 25,
                gen: 1,
                input_type: Some("char"),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({
            "type": "update",
            "gen": 1,
            "content": [{"id": 25, "text": [{"content": [{"style": "normal", "text": "hi"}]}]}],
            "input": [{"id": 25, "gen": 1, "type": "char"}],
        }));
    }

    #[test]
    fn timer_tristate() {
        let update = Update {
            gen: 4,
            timer: Some(None),
            ..Default::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({"type": "update", "gen": 4, "timer": null}));
    }

    #[test]
    fn support_caps_round_trip() {
        let caps = SupportCaps::from_list(&["timer", "hyperlinks", "nonsense"]);
        let json = serde_json::to_value(caps).unwrap();
        assert_eq!(json, serde_json::json!(["timer", "hyperlinks"]));
        let back: SupportCaps = serde_json::from_value(json).unwrap();
        assert_eq!(back, caps);
    }

    #[test]
    fn special_span_wire_forms() {
        let mut span = SpecialSpan::new(SpecialType::Image);
        span.image = 7;
        span.chunktype = 0x504E4720;
        span.width = 60;
        span.height = 40;
        span.alignment = imagealign_InlineCenter;
        let update = span.to_update(WindowType::Buffer, Some("http://x/"));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({
            "special": "image", "image": 7, "width": 60, "height": 40,
            "url": "http://x/pict-7.png", "alignment": "inlinecenter",
        }));

        let mut span = SpecialSpan::new(SpecialType::Fill);
        span.hasdimensions = true;
        span.xpos = 2;
        span.ypos = 3;
        span.width = 10;
        span.height = 20;
        span.hascolor = true;
        span.color = 0xFF00FF;
        let json = serde_json::to_value(span.to_update(WindowType::Graphics, None)).unwrap();
        assert_eq!(json, serde_json::json!({
            "special": "fill", "x": 2, "y": 3, "width": 10, "height": 20, "color": "#FF00FF",
        }));
    }
}
