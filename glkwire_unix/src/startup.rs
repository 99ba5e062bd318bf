/*

Glk startup support code
========================

Copyright (c) 2026 Dannii Willis
MIT licenced
https://github.com/curiousdannii/glkwire

*/

use std::env;
use std::path::Path;

use thiserror::Error;

use glkwire::glkapi::protocol::SupportCaps;

/** Library options collected from the canonical command line */
pub struct LibraryOptions {
    /** Skip the handshake entirely; metrics arrive via autorestore */
    pub autometrics: bool,
    pub dataresources: Vec<DataResource>,
    pub debug: bool,
    /** Use the fixed width/height instead of waiting for an init event */
    pub fixedmetrics: bool,
    pub height: f64,
    pub resourceurl: Option<String>,
    pub singleturn: bool,
    pub stderr: bool,
    pub support: SupportCaps,
    pub width: f64,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        LibraryOptions {
            autometrics: false,
            dataresources: Vec::new(),
            debug: false,
            fixedmetrics: false,
            height: 50.0,
            resourceurl: None,
            singleturn: false,
            stderr: false,
            support: SupportCaps::default(),
            width: 80.0,
        }
    }
}

/** A `-dataresource NUM:PATH` mapping */
#[derive(Clone, Debug, PartialEq)]
pub struct DataResource {
    pub binary: bool,
    pub num: u32,
    pub pathname: String,
}

pub enum ArgProcessingResults {
    ErrorMsg(String),
    Msg(String),
    /** The game's own arguments plus the library options */
    Processed(Vec<String>, LibraryOptions),
}

#[derive(Debug, Error)]
enum ArgError {
    #[error("{0} must be followed by a boolean value")]
    NotBool(String),
    #[error("{0} must be followed by a number")]
    NotNumber(String),
    #[error("{0} must be followed by a value")]
    NoValue(String),
    #[error("-dataresource option requires NUM:PATHNAME")]
    BadDataResource,
    #[error("-support value not recognized: {0}")]
    UnknownSupport(String),
    #[error("unknown option: {0}")]
    UnknownArg(String),
}

fn string_to_bool(str: &str) -> Option<bool> {
    match str {
        "y" | "yes" | "on" | "+" => Some(true),
        "n" | "no" | "off" | "-" => Some(false),
        _ => None,
    }
}

/** Process the command line arguments. Hand-rolled, because none of the
    argument parsing crates handle the traditional Glk option style (glued
    values, toggling booleans, repeatable options). */
pub fn process_args(args: &[String]) -> ArgProcessingResults {
    match process_args_inner(args) {
        Ok(Some(result)) => result,
        Ok(None) => ArgProcessingResults::Msg(print_usage(args)),
        Err(err) => ArgProcessingResults::ErrorMsg(format!("{}\n{}", err, print_usage(args))),
    }
}

fn process_args_inner(args: &[String]) -> Result<Option<ArgProcessingResults>, ArgError> {
    let mut options = LibraryOptions::default();
    let mut game_args: Vec<String> = Vec::new();
    if let Some(first) = args.first() {
        game_args.push(first.clone());
    }

    let mut iter = args.iter().skip(1).peekable();
    'outer: while let Some(arg) = iter.next() {
        if !arg.starts_with('-') {
            game_args.push(arg.clone());
            continue;
        }
        let name = &arg[1..];

        if name == "help" || name == "?" {
            return Ok(None);
        }
        if name == "version" || name == "v" {
            return Ok(Some(ArgProcessingResults::Msg(
                format!("GlkWire, library version {}.\n", env!("CARGO_PKG_VERSION")))));
        }
        if name == "D" {
            options.debug = true;
            continue;
        }

        // A value can be glued to its option or follow as the next argument
        let mut take_value = |optname: &str| -> Option<String> {
            if let Some(rest) = name.strip_prefix(optname) {
                if !rest.is_empty() {
                    return Some(rest.to_string());
                }
            }
            iter.next().cloned()
        };

        for (optname, alias) in [("width", "w"), ("height", "h")] {
            if name == optname || name == alias || name.strip_prefix(optname).is_some_and(|rest| rest.parse::<f64>().is_ok()) {
                let value = take_value(optname).ok_or_else(|| ArgError::NoValue(arg.clone()))?;
                let value: f64 = value.parse().map_err(|_| ArgError::NotNumber(arg.clone()))?;
                if optname == "width" {
                    options.width = value;
                }
                else {
                    options.height = value;
                }
                continue 'outer;
            }
        }

        // Boolean options may toggle with no value at all
        for (optname, alias) in [("fixmetrics", "fm"), ("autometrics", "am"), ("singleturn", "st"), ("stderr", "stderr")] {
            if name == optname || name == alias {
                let value = match iter.peek().and_then(|next| string_to_bool(next.as_str())) {
                    Some(value) => {
                        iter.next();
                        value
                    },
                    None => true,
                };
                match optname {
                    "fixmetrics" => options.fixedmetrics = value,
                    "autometrics" => options.autometrics = value,
                    "singleturn" => options.singleturn = value,
                    _ => options.stderr = value,
                }
                continue 'outer;
            }
        }

        match name {
            "support" => {
                let value = iter.next().ok_or_else(|| ArgError::NoValue(arg.clone()))?;
                let caps = SupportCaps::from_list(&[value.as_str()]);
                if caps == SupportCaps::default() {
                    return Err(ArgError::UnknownSupport(value.clone()));
                }
                options.support.merge(&caps);
            },
            "resourceurl" | "ru" => {
                let value = iter.next().ok_or_else(|| ArgError::NoValue(arg.clone()))?;
                options.resourceurl = Some(construct_resourceurl(value, false));
            },
            "resourcedir" | "rd" => {
                let value = iter.next().ok_or_else(|| ArgError::NoValue(arg.clone()))?;
                options.resourceurl = Some(construct_resourceurl(value, true));
            },
            "dataresource" | "dataresourcebin" => {
                let value = iter.next().ok_or(ArgError::BadDataResource)?;
                options.dataresources.push(parse_dataresource(value, true)?);
            },
            "dataresourcetext" => {
                let value = iter.next().ok_or(ArgError::BadDataResource)?;
                options.dataresources.push(parse_dataresource(value, false)?);
            },
            _ => return Err(ArgError::UnknownArg(arg.clone())),
        }
    }

    Ok(Some(ArgProcessingResults::Processed(game_args, options)))
}

fn parse_dataresource(value: &str, binary: bool) -> Result<DataResource, ArgError> {
    let (num, pathname) = value.split_once(':').ok_or(ArgError::BadDataResource)?;
    if pathname.is_empty() {
        return Err(ArgError::BadDataResource);
    }
    let num = num.parse().map_err(|_| ArgError::BadDataResource)?;
    Ok(DataResource {
        binary,
        num,
        pathname: pathname.to_string(),
    })
}

/** Given a path or URL from the resourcedir/resourceurl argument, return a
    URL form. A path is absolutised against the process cwd and turned into
    a `file://` URL with a trailing slash; a URL is used exactly as given,
    because the prefix may deliberately not end at a directory boundary. */
pub fn construct_resourceurl(value: &str, ispath: bool) -> String {
    if !ispath {
        return value.to_string();
    }
    let path = Path::new(value);
    let path = if path.is_absolute() {
        path.to_path_buf()
    }
    else {
        env::current_dir().unwrap_or_default().join(path)
    };
    let mut url = format!("file://{}", path.to_string_lossy());
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn print_usage(args: &[String]) -> String {
    let name = args.first().map(String::as_str).unwrap_or("glkwire");
    format!("usage: {} [ options ... ]
library options:
  -fixmetrics BOOL: define screen size manually (default 'no')
  -autometrics BOOL: allow screen size to be set during autorestore (default 'no')
  -width NUM: manual screen width (default 80)
  -height NUM: manual screen height (default 50)
  -support [timer, hyperlinks, graphics, graphicswin, graphicsext]: declare support for various input features
  -resourceurl STR: URL base for image/sound files
  -resourcedir STR: path to image/sound files (used to create file: URLs)
  -dataresource NUM:PATHNAME, -dataresourcebin NUM:PATHNAME, -dataresourcetext NUM:PATHNAME: tell where the data resource file with the given number can be read
     (file is considered binary by default, or text if -dataresourcetext is used)
  -singleturn BOOL: exit the process after responding to one input (default 'no')
  -stderr BOOL: send errors to stderr rather than stdout (default 'no')
  -D: turn on debug console
  -version: display Glk library version
  -help: display this list
NUM values can be any number. BOOL values can be 'yes' or 'no', or no value to toggle.
", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgProcessingResults {
        let args: Vec<String> = std::iter::once("glkwire".to_string())
            .chain(args.iter().map(|arg| arg.to_string()))
            .collect();
        process_args(&args)
    }

    fn expect_options(result: ArgProcessingResults) -> (Vec<String>, LibraryOptions) {
        match result {
            ArgProcessingResults::Processed(args, options) => (args, options),
            ArgProcessingResults::Msg(msg) => panic!("unexpected message: {}", msg),
            ArgProcessingResults::ErrorMsg(msg) => panic!("unexpected error: {}", msg),
        }
    }

    #[test]
    fn metrics_and_modes() {
        let (_, options) = expect_options(parse(&["-width", "132", "-height", "40", "-fixmetrics", "yes", "-singleturn"]));
        assert_eq!(options.width, 132.0);
        assert_eq!(options.height, 40.0);
        assert!(options.fixedmetrics);
        assert!(options.singleturn);
        assert!(!options.stderr);
    }

    #[test]
    fn glued_values_and_toggles() {
        let (_, options) = expect_options(parse(&["-width132", "-stderr"]));
        assert_eq!(options.width, 132.0);
        assert!(options.stderr);
    }

    #[test]
    fn support_is_repeatable() {
        let (_, options) = expect_options(parse(&["-support", "timer", "-support", "hyperlinks"]));
        assert!(options.support.timer);
        assert!(options.support.hyperlinks);
        assert!(!options.support.graphics);

        match parse(&["-support", "teleportation"]) {
            ArgProcessingResults::ErrorMsg(msg) => assert!(msg.contains("not recognized")),
            _ => panic!("expected an error"),
        }
    }

    #[test]
    fn data_resources() {
        let (_, options) = expect_options(parse(&["-dataresource", "3:/tmp/d.bin", "-dataresourcetext", "5:notes.txt"]));
        assert_eq!(options.dataresources, vec![
            DataResource {binary: true, num: 3, pathname: "/tmp/d.bin".to_string()},
            DataResource {binary: false, num: 5, pathname: "notes.txt".to_string()},
        ]);

        assert!(matches!(parse(&["-dataresource", "nope"]), ArgProcessingResults::ErrorMsg(_)));
        assert!(matches!(parse(&["-dataresource", "3:"]), ArgProcessingResults::ErrorMsg(_)));
    }

    #[test]
    fn game_args_pass_through() {
        let (args, _) = expect_options(parse(&["story.gblorb", "-width", "100"]));
        assert_eq!(args, vec!["glkwire".to_string(), "story.gblorb".to_string()]);
    }

    #[test]
    fn unknown_options_error() {
        assert!(matches!(parse(&["-frobnicate"]), ArgProcessingResults::ErrorMsg(_)));
    }

    #[test]
    fn resource_urls() {
        assert_eq!(construct_resourceurl("http://x/prefix-", false), "http://x/prefix-");
        let url = construct_resourceurl("/data/pics", true);
        assert_eq!(url, "file:///data/pics/");
    }
}
