//
// Shiva ELF interpreter and patch engine
//
//! The prelinker CLI: `shiva-ld -e INPUT -p PATCH_BASENAME -i INTERP_PATH
//! -s SEARCH_PATH -o OUTPUT`. All five flags are required; unlike the rest
//! of Shiva's command-line surface this one is hand-rolled rather than
//! built on `argh`, because a missing flag must print usage and exit 0
//! (not a parse-error exit), matching the original `getopt_long` flow in
//! `tools/shiva-ld/shiva-ld.c`.
use std::path::PathBuf;
use std::process::ExitCode;

use eyre::{eyre, Result};
use log::LevelFilter;
use stderrlog::{LogLevelNum, StdErrLog};

use shiva::prelink::{prelink, PrelinkContext};

const USAGE: &str = "usage: shiva-ld -e INPUT -p PATCH_BASENAME -i INTERP_PATH -s SEARCH_PATH -o OUTPUT";

#[derive(Default)]
struct Args {
    input_exec: Option<String>,
    patch_basename: Option<String>,
    interp_path: Option<String>,
    search_path: Option<String>,
    output_exec: Option<String>,
}

fn parse_args(raw: impl Iterator<Item = String>) -> Option<Args> {
    let mut args = Args::default();
    let mut it = raw.peekable();
    while let Some(flag) = it.next() {
        let value = it.next()?;
        match flag.as_str() {
            "-e" => args.input_exec = Some(value),
            "-p" => args.patch_basename = Some(value),
            "-i" => args.interp_path = Some(value),
            "-s" => args.search_path = Some(value),
            "-o" => args.output_exec = Some(value),
            _ => return None,
        }
    }
    Some(args)
}

fn build_logger() -> StdErrLog {
    let mut log = stderrlog::new();
    log.module("shiva_ld");
    log.verbosity(LogLevelNum::from(LevelFilter::Info));
    log
}

fn run() -> Result<()> {
    build_logger().init().map_err(|e| eyre!(e))?;

    let raw_args = std::env::args().skip(1);
    let Some(args) = parse_args(raw_args) else {
        println!("{USAGE}");
        return Ok(());
    };

    let (input_exec, patch_basename, interp_path, search_path, output_exec) = match (
        args.input_exec,
        args.patch_basename,
        args.interp_path,
        args.search_path,
        args.output_exec,
    ) {
        (Some(e), Some(p), Some(i), Some(s), Some(o)) => (e, p, i, s, o),
        _ => {
            println!("{USAGE}");
            return Ok(());
        }
    };

    let mut ctx = PrelinkContext::new(
        PathBuf::from(input_exec),
        patch_basename,
        search_path,
        interp_path,
        PathBuf::from(output_exec),
    );

    prelink(&mut ctx)?;
    log::info!("wrote {}", ctx.output_exec.display());
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_args_requires_all_five_flags() {
        let args = parse_args(vec!["-e".to_string(), "hello".to_string()].into_iter()).unwrap();
        assert_eq!(args.input_exec, Some("hello".to_string()));
        assert!(args.output_exec.is_none());
    }

    #[test]
    fn test_parse_args_rejects_unknown_flag() {
        assert!(parse_args(vec!["-x".to_string(), "y".to_string()].into_iter()).is_none());
    }

    #[test]
    fn test_parse_args_rejects_dangling_flag() {
        assert!(parse_args(vec!["-e".to_string()].into_iter()).is_none());
    }

    #[test]
    fn test_parse_args_collects_all_flags() {
        let raw = vec![
            "-e", "in", "-p", "patch.o", "-i", "/lib/shiva", "-s", "/opt/shiva/modules", "-o", "out",
        ]
        .into_iter()
        .map(String::from);
        let args = parse_args(raw).unwrap();
        assert_eq!(args.input_exec, Some("in".to_string()));
        assert_eq!(args.patch_basename, Some("patch.o".to_string()));
        assert_eq!(args.interp_path, Some("/lib/shiva".to_string()));
        assert_eq!(args.search_path, Some("/opt/shiva/modules".to_string()));
        assert_eq!(args.output_exec, Some("out".to_string()));
    }
}
