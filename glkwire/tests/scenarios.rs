/*

End-to-end protocol scenarios
=============================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

mod common;

use serde_json::json;

use glkwire::glkapi::LibraryState;
use glkwire::glkapi::constants::*;
use glkwire::glkapi::protocol::SupportCaps;
use glkwire::glkapi::GlkApi;

use common::*;

#[test]
fn s1_hello_and_char_input() {
    let mut glk = start();
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_set_window(Some(win)).unwrap();
    glk.glk_put_string("hi").unwrap();
    glk.glk_request_char_event(win).unwrap();

    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": "a"}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Char);
    assert_eq!(ev.win, Some(win));
    assert_eq!(ev.val1, 0x61);

    let update = &glk.system.updates[0];
    assert_eq!(update["type"], "update");
    assert_eq!(update["gen"], 1);

    // One buffer window filling the screen
    let windows = update["windows"].as_array().unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0]["id"], win);
    assert_eq!(windows[0]["type"], "buffer");
    assert_eq!(windows[0]["rock"], 1);
    assert_eq!(windows[0]["left"].as_f64(), Some(0.0));
    assert_eq!(windows[0]["top"].as_f64(), Some(0.0));
    assert_eq!(windows[0]["width"].as_f64(), Some(80.0));
    assert_eq!(windows[0]["height"].as_f64(), Some(24.0));

    assert_eq!(update["content"], json!([
        {"id": win, "text": [{"content": [{"style": "normal", "text": "hi"}]}]},
    ]));
    assert_eq!(update["input"], json!([
        {"id": win, "gen": 1, "type": "char"},
    ]));
    assert!(glk.system.warnings.is_empty());
}

#[test]
fn s2_split_and_resize() {
    let mut glk = start();
    let buffer = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_set_window(Some(buffer)).unwrap();
    glk.glk_request_char_event(buffer).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": buffer, "value": " "}));
    glk.glk_select().unwrap();

    let grid = glk.glk_window_open(Some(buffer), winmethod_Below | winmethod_Fixed, 5, wintype_TextGrid, 2).unwrap();
    glk.glk_request_char_event(buffer).unwrap();
    glk.system.events.push_back(json!({"type": "arrange", "gen": 2, "metrics": {"width": 40, "height": 24, "charwidth": 1, "charheight": 1}}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Arrange);

    // The split: grid gets 5 rows at the bottom, with a border row between
    let update = &glk.system.updates[1];
    assert_eq!(update["gen"], 2);
    let windows = update["windows"].as_array().unwrap();
    assert_eq!(windows.len(), 2);
    let gridwin = windows.iter().find(|w| w["id"] == grid).unwrap();
    let bufwin = windows.iter().find(|w| w["id"] == buffer).unwrap();
    assert_eq!(gridwin["type"], "grid");
    assert_eq!(gridwin["gridwidth"], 80);
    assert_eq!(gridwin["gridheight"], 5);
    assert_eq!(gridwin["top"].as_f64(), Some(19.0));
    assert_eq!(gridwin["height"].as_f64(), Some(5.0));
    assert_eq!(bufwin["top"].as_f64(), Some(0.0));
    assert_eq!(bufwin["height"].as_f64(), Some(18.0));

    // After the arrange, the boxes are recomputed at width 40
    glk.glk_request_char_event(grid).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 3, "window": grid, "value": "q"}));
    glk.glk_select().unwrap();
    let update = &glk.system.updates[2];
    assert_eq!(update["gen"], 3);
    let windows = update["windows"].as_array().unwrap();
    let gridwin = windows.iter().find(|w| w["id"] == grid).unwrap();
    let bufwin = windows.iter().find(|w| w["id"] == buffer).unwrap();
    assert_eq!(gridwin["gridwidth"], 40);
    assert_eq!(gridwin["gridheight"], 5);
    assert_eq!(gridwin["top"].as_f64(), Some(19.0));
    assert_eq!(gridwin["width"].as_f64(), Some(40.0));
    assert_eq!(bufwin["height"].as_f64(), Some(18.0));
    assert_eq!(bufwin["width"].as_f64(), Some(40.0));
}

#[test]
fn s3_line_input_with_terminator() {
    let mut glk = start();
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_set_window(Some(win)).unwrap();
    glk.glk_put_string(">").unwrap();
    glk.glk_set_terminators_line_event(win, &[keycode_Escape]).unwrap();
    glk.glk_request_line_event(win, vec![0; 10].into_boxed_slice(), 0).unwrap();

    glk.system.events.push_back(json!({"type": "line", "gen": 1, "window": win, "value": "abc", "terminator": "escape"}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Line);
    assert_eq!(ev.val1, 3);
    assert_eq!(ev.val2, keycode_Escape);
    let buf = ev.buf.unwrap();
    assert_eq!(buf.to_u32vec(0, 3), vec!['a' as u32, 'b' as u32, 'c' as u32]);

    // The line input descriptor went out with the first update
    let update = &glk.system.updates[0];
    assert_eq!(update["input"], json!([
        {"id": win, "gen": 1, "type": "line", "maxlen": 10},
    ]));

    // The buffer now ends with the echoed "abc\n" in input style
    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 2, "window": win, "value": " "}));
    glk.glk_select().unwrap();
    let update = &glk.system.updates[1];
    let text = update["content"][0]["text"].as_array().unwrap();
    assert_eq!(text[0]["append"], json!(true));
    assert_eq!(text[0]["content"], json!([{"style": "input", "text": "abc"}]));
}

#[test]
fn s4_style_run_compaction() {
    let mut glk = start();
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_set_window(Some(win)).unwrap();
    glk.glk_put_string("A").unwrap();
    glk.glk_set_style(style_Emphasized).unwrap();
    glk.glk_put_string("B").unwrap();
    glk.glk_set_style(style_Normal).unwrap();
    glk.glk_put_string("C").unwrap();

    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": " "}));
    glk.glk_select().unwrap();

    let update = &glk.system.updates[0];
    assert_eq!(update["content"][0]["text"][0]["content"], json!([
        {"style": "normal", "text": "A"},
        {"style": "emphasized", "text": "B"},
        {"style": "normal", "text": "C"},
    ]));
}

#[test]
fn s5_autosave_restore_round_trip() {
    let dispatch = TestDispatch::default();
    let mut glk = start();
    glk.set_dispatch_registry(Box::new(dispatch.clone()));

    // Build up some state: split windows, written text, a memory stream,
    // a fileref, and a pending line input request
    let buffer = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    let grid = glk.glk_window_open(Some(buffer), winmethod_Below | winmethod_Fixed, 5, wintype_TextGrid, 2).unwrap();
    glk.glk_set_window(Some(buffer)).unwrap();
    glk.glk_put_string("Hello.\n>").unwrap();
    glk.glk_window_move_cursor(grid, 2, 1).unwrap();
    let gridstr = glk.glk_window_get_stream(grid).unwrap();
    glk.glk_put_string_stream(gridstr, "status").unwrap();

    let memtag = glk.glk_stream_open_memory(vec![0; 12].into_boxed_slice(), FileMode::ReadWrite, 9).unwrap();
    glk.glk_put_buffer_stream(memtag, b"mem").unwrap();
    glk.glk_stream_set_current(Some(memtag));

    let freftag = glk.glk_fileref_create_by_name(fileusage_Data, "save1", 4).unwrap();

    glk.glk_request_line_event(buffer, vec![0; 16].into_boxed_slice(), 0).unwrap();

    // Accept the line, then autosave just before the next select would run
    glk.system.events.push_back(json!({"type": "line", "gen": 1, "window": buffer, "value": "abc"}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Line);
    glk.glk_request_line_event(buffer, vec![0; 16].into_boxed_slice(), 0).unwrap();

    let state = glk.save_library_state(None, None);
    let doc = serde_json::to_value(&state).unwrap();
    assert_eq!(doc["type"], "autosave");
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["rootwintag"], glk.glk_window_get_parent(grid).unwrap().unwrap());

    // Reconstruct into a fresh library
    let restored_dispatch = TestDispatch::default();
    let mut glk2 = GlkApi::new(TestSystem::new(), SupportCaps::default());
    glk2.set_dispatch_registry(Box::new(restored_dispatch.clone()));
    let state: LibraryState = serde_json::from_value(doc.clone()).unwrap();
    glk2.update_from_library_state(state).unwrap();

    // The object graph came back under the same tags
    assert_eq!(glk2.glk_window_get_root(), glk.glk_window_get_root());
    assert_eq!(glk2.glk_stream_get_current(), Some(memtag));
    assert_eq!(glk2.glk_window_get_type(grid).unwrap(), WindowType::Grid);
    assert_eq!(glk2.glk_window_get_rock(buffer).unwrap(), 1);
    assert_eq!(glk2.glk_fileref_get_rock(freftag).unwrap(), 4);
    assert_eq!(glk2.glk_window_get_sibling(grid).unwrap(), Some(buffer));

    // The memory stream keeps its position discipline
    assert_eq!(glk2.glk_stream_get_position(memtag).unwrap(), 3);
    assert_eq!(restored_dispatch.state.borrow().restored.len(), 2);

    // Saving the restored library yields the same document, modulo the
    // generation (which always saves one ahead of the current counter)
    let mut doc2 = serde_json::to_value(glk2.save_library_state(None, None)).unwrap();
    doc2["generation"] = doc["generation"].clone();
    assert_eq!(doc, doc2);

    // The next select suppresses the pre-read update
    glk2.system.events.push_back(json!({"type": "line", "gen": doc["generation"], "window": buffer, "value": "again"}));
    let ev = glk2.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Line);
    assert_eq!(ev.val1, 5);
    assert!(glk2.system.updates.is_empty());
}

#[test]
fn s6_resource_streams() {
    let mut glk = start();
    glk.resource_map = Some(Box::new(TestResources));

    let strtag = glk.glk_stream_open_resource(1, 0).unwrap().unwrap();
    let mut buf = [0u8; 80];
    let count = glk.glk_get_line_stream(strtag, &mut buf).unwrap();
    assert_eq!(count, 5);
    assert_eq!(&buf[..5], b"hello");
    glk.glk_stream_close(strtag).unwrap();

    // A wide open of the same chunk engages the UTF-8 decode path
    let strtag = glk.glk_stream_open_resource_uni(1, 0).unwrap().unwrap();
    assert_eq!(glk.glk_get_char_stream_uni(strtag).unwrap(), 'h' as i32);
    glk.glk_stream_close(strtag).unwrap();

    // Binary chunks read as big-endian words on wide streams
    let strtag = glk.glk_stream_open_resource_uni(2, 0).unwrap().unwrap();
    assert_eq!(glk.glk_get_char_stream_uni(strtag).unwrap(), 0x2105);
    glk.glk_stream_close(strtag).unwrap();

    // Unknown chunks silently fail
    assert!(glk.glk_stream_open_resource(99, 0).unwrap().is_none());
}

#[test]
fn generation_monotonicity() {
    let mut glk = start();
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();

    let mut last_gen = 0;
    for i in 0..3 {
        glk.glk_request_char_event(win).unwrap();
        glk.system.events.push_back(json!({"type": "char", "gen": i + 1, "window": win, "value": "x"}));
        glk.glk_select().unwrap();
        let gen = glk.system.updates.last().unwrap()["gen"].as_u64().unwrap();
        assert!(gen > last_gen);
        last_gen = gen;
    }

    // A stale generation is fatal
    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": "x"}));
    let err = glk.glk_select().unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn refresh_resends_everything_without_returning() {
    let mut glk = start();
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_set_window(Some(win)).unwrap();
    glk.glk_put_string("once").unwrap();
    glk.glk_request_char_event(win).unwrap();

    // A refresh is exempt from the generation check, answers with a full
    // resend, and keeps the loop going
    glk.system.events.push_back(json!({"type": "refresh", "gen": 0}));
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": "y"}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Char);

    assert_eq!(glk.system.updates.len(), 2);
    let refresh = &glk.system.updates[1];
    // Same generation, full content again
    assert_eq!(refresh["gen"], 1);
    assert_eq!(refresh["content"][0]["text"][0]["content"][0]["text"], "once");
    assert!(refresh["windows"].is_array());
}

#[test]
fn unknown_events_are_ignorable() {
    let mut glk = start();
    glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.system.events.push_back(json!({"type": "dance", "gen": 1}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Unknown);
    assert_eq!(ev.evtype.evtype(), 0x7fffffff);
}

#[test]
fn events_for_windows_without_requests_keep_waiting() {
    let mut glk = start();
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_request_char_event(win).unwrap();

    // A line event for a window with only a char request is dropped, and
    // the loop reads the next event
    glk.system.events.push_back(json!({"type": "line", "gen": 1, "window": win, "value": "abc"}));
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": "z"}));
    let ev = glk.glk_select().unwrap();
    assert_eq!(ev.evtype, GlkEventType::Char);
    assert_eq!(ev.val1, 'z' as u32);
}

#[test]
fn fileref_prompt_flow() {
    let mut glk = start();
    glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.set_working_dir("/work".into());

    glk.system.events.push_back(json!({
        "type": "specialresponse", "gen": 1, "response": "fileref_prompt", "value": "  mysave  ",
    }));
    let freftag = glk.glk_fileref_create_by_prompt(fileusage_SavedGame, filemode_Write, 5).unwrap().unwrap();
    assert_eq!(glk.glk_fileref_get_rock(freftag).unwrap(), 5);

    // The update carried the special input request instead of input
    let update = &glk.system.updates[0];
    assert_eq!(update["specialinput"], json!({
        "type": "fileref_prompt", "filemode": "write", "filetype": "save",
    }));

    // An empty response means the player cancelled
    glk.system.events.push_back(json!({
        "type": "specialresponse", "gen": 2, "response": "fileref_prompt",
    }));
    assert!(glk.glk_fileref_create_by_prompt(fileusage_Data, filemode_Read, 0).unwrap().is_none());
}

#[test]
fn timer_updates_are_tristate() {
    // Timer support is declared at startup (or by the init event's caps)
    let mut glk = GlkApi::new(TestSystem::new(), SupportCaps::from_list(&["timer"]));
    glk.system.events.push_back(json!({
        "type": "init", "gen": 0,
        "metrics": {"width": 80, "height": 24, "charwidth": 1, "charheight": 1},
    }));
    glk.get_init_event().unwrap();

    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_request_timer_events(500);
    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": "x"}));
    glk.glk_select().unwrap();
    assert_eq!(glk.system.updates[0]["timer"], json!(500));

    // Unchanged: no timer key at all
    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 2, "window": win, "value": "x"}));
    glk.glk_select().unwrap();
    assert!(glk.system.updates[1].get("timer").is_none());

    // Disabled: an explicit null
    glk.glk_request_timer_events(0);
    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 3, "window": win, "value": "x"}));
    glk.glk_select().unwrap();
    assert_eq!(glk.system.updates[2]["timer"], json!(null));
}

#[test]
fn line_input_buffers_go_through_the_dispatch_layer() {
    let dispatch = TestDispatch::default();
    let mut glk = start();
    glk.set_dispatch_registry(Box::new(dispatch.clone()));

    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    // The window and its stream were registered as objects
    assert_eq!(dispatch.state.borrow().registered.len(), 2);
    glk.glk_request_line_event(win, vec![0; 8].into_boxed_slice(), 0).unwrap();
    assert_eq!(dispatch.state.borrow().arrays.len(), 1);

    glk.system.events.push_back(json!({"type": "line", "gen": 1, "window": win, "value": "hi"}));
    glk.glk_select().unwrap();

    // The final contents were reported when the array was unretained
    let state = dispatch.state.borrow();
    let contents = state.unretained.values().next().unwrap();
    assert_eq!(&contents[..2], &['h' as u32, 'i' as u32]);
}

#[test]
fn single_turn_mode_requests_exit_after_the_update() {
    let mut glk = start();
    glk.single_turn = true;
    let win = glk.glk_window_open(None, 0, 0, wintype_TextBuffer, 1).unwrap();
    glk.glk_request_char_event(win).unwrap();
    glk.system.events.push_back(json!({"type": "char", "gen": 1, "window": win, "value": "x"}));
    glk.glk_select().unwrap();
    assert!(glk.system.exit_requested);
}
