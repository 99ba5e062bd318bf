/*

Stdio system
============

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::io::{self, Write};

use serde::Deserialize;

use glkwire::GlkSystem;
use glkwire::glkapi::common::{GlkApiError, GlkResult};
use glkwire::glkapi::protocol::{ErrorUpdate, Event, Update};

/** The stdin/stdout client connection: one JSON stanza per message,
    followed by a blank line, then a flush */
pub struct StdioSystem {
    /** Route errors to stderr rather than emitting error stanzas */
    pub errors_to_stderr: bool,
}

impl StdioSystem {
    pub fn new(errors_to_stderr: bool) -> Self {
        StdioSystem {errors_to_stderr}
    }

    fn print_stanza(json: &str) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{}\n", json);
        let _ = lock.flush();
    }

    pub fn send_error(&mut self, msg: &str) {
        if self.errors_to_stderr {
            eprintln!("Glk library error: {}", msg);
        }
        else if let Ok(json) = serde_json::to_string(&ErrorUpdate::new(msg)) {
            StdioSystem::print_stanza(&json);
        }
    }
}

impl GlkSystem for StdioSystem {
    /** Read one complete event stanza, blocking until the value terminates.
        Anything unparseable is a fatal error. */
    fn get_event(&mut self) -> GlkResult<Event> {
        let stdin = io::stdin();
        let mut de = serde_json::Deserializer::from_reader(stdin.lock());
        Event::deserialize(&mut de)
            .map_err(|err| GlkApiError::MalformedInput(err.to_string()))
    }

    fn send_update(&mut self, update: &Update) -> GlkResult<()> {
        let json = serde_json::to_string(update)?;
        StdioSystem::print_stanza(&json);
        Ok(())
    }

    fn send_warning(&mut self, msg: &str) {
        self.send_error(msg);
    }

    fn request_exit(&mut self) {
        std::process::exit(0);
    }
}
