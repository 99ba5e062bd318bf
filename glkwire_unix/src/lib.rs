/*

Glkwire - Unix stdio front-end
==============================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

pub mod resources;
pub mod startup;
pub mod system;

use std::env;

use glkwire::glkapi::GlkApi;
use glkwire::glkapi::common::{GlkApiError, GlkResult};

pub use resources::FileResourceMap;
pub use startup::{ArgProcessingResults, LibraryOptions, process_args};
pub use system::StdioSystem;

/** The library context a game runs against */
pub type Glk = GlkApi<StdioSystem>;

/** Report a fatal library error and terminate with exit code 1. The game
    cannot catch library errors; this is where they all end up. */
pub fn fatal_error(glk: &mut Glk, err: &GlkApiError) -> ! {
    log::error!("{}", err);
    glk.system.send_error(&err.to_string());
    std::process::exit(1);
}

/** Process arguments, perform the startup handshake, hand control to the
    game, and exit. Returns the process exit code for argument errors; all
    other paths exit directly. */
pub fn run<F>(args: Vec<String>, game: F) -> i32
where F: FnOnce(&mut Glk, &[String]) -> GlkResult<()> {
    env_logger::init();

    let (game_args, options) = match process_args(&args) {
        ArgProcessingResults::ErrorMsg(msg) => {
            eprint!("{}", msg);
            return 1;
        },
        ArgProcessingResults::Msg(msg) => {
            print!("{}", msg);
            return 0;
        },
        ArgProcessingResults::Processed(game_args, options) => (game_args, options),
    };

    let system = StdioSystem::new(options.stderr);
    let mut glk = GlkApi::new(system, options.support);
    glk.single_turn = options.singleturn;
    glk.resource_url = options.resourceurl;
    if !options.dataresources.is_empty() {
        glk.resource_map = Some(Box::new(FileResourceMap::new(options.dataresources)));
    }
    if let Ok(cwd) = env::current_dir() {
        glk.set_working_dir(cwd);
    }

    // The handshake: wait for the init event with the metrics, unless fixed
    // metrics were configured, or autorestore will supply them
    if !options.autometrics {
        let handshake = if options.fixedmetrics {
            glk.use_fixed_metrics(options.width, options.height)
        }
        else {
            glk.get_init_event()
        };
        if let Err(err) = handshake {
            fatal_error(&mut glk, &err);
        }
    }

    if let Err(err) = game(&mut glk, &game_args) {
        fatal_error(&mut glk, &err);
    }
    if let Err(err) = glk.glk_exit() {
        fatal_error(&mut glk, &err);
    }
    std::process::exit(0);
}
