use crate::logging::LogLevel;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;

#[derive(Parser, Debug)]
#[command(name = "recache")]
#[command(about = "A transparent compiler-invocation cache")]
#[command(version)]
pub struct Cli {
    #[arg(
        short = 'C',
        long,
        help = "Clear the cache completely (except configuration)"
    )]
    pub clear: bool,

    #[arg(short = 's', long, help = "Show statistics summary")]
    pub show_stats: bool,

    #[arg(
        short = 'M',
        long,
        value_name = "SIZE",
        help = "Set maximum size of cache to SIZE (use 0 for no limit); \
                available suffixes: k, M, G, T (decimal) and Ki, Mi, Gi, Ti \
                (binary); default suffix: G"
    )]
    pub max_size: Option<String>,

    #[arg(
        short = 'l',
        long,
        value_enum,
        default_value = "warn",
        help = "Set logging level"
    )]
    pub level: LogLevel,

    #[arg(
        value_name = "COMPILER [COMPILER-OPTIONS]",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Compiler command to wrap"
    )]
    pub command: Vec<OsString>,
}

/// Parse the command line. `Err` carries the exit code: 0 for
/// `--help`/`--version`, 1 for a usage error.
pub fn parse(args: &[OsString]) -> Result<Cli, i32> {
    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(cli),
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            Err(code)
        }
    }
}

pub fn print_help() {
    let _ = Cli::command().print_help();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_strs(args: &[&str]) -> Result<Cli, i32> {
        let args: Vec<OsString> = args.iter().map(OsString::from).collect();
        parse(&args)
    }

    #[test]
    fn default_values() {
        let cli = parse_strs(&["recache", "--clear"]).unwrap();
        assert!(cli.clear);
        assert!(!cli.show_stats);
        assert!(cli.max_size.is_none());
        assert!(matches!(cli.level, LogLevel::Warn));
        assert!(cli.command.is_empty());
    }

    #[test]
    fn short_forms() {
        assert!(parse_strs(&["recache", "-C"]).unwrap().clear);
        assert!(parse_strs(&["recache", "-s"]).unwrap().show_stats);
        assert_eq!(
            parse_strs(&["recache", "-M", "5G"]).unwrap().max_size.as_deref(),
            Some("5G")
        );
    }

    #[test]
    fn max_size_requires_an_argument() {
        assert_eq!(parse_strs(&["recache", "-M"]).unwrap_err(), 1);
    }

    #[test]
    fn log_level_parsing() {
        let cli = parse_strs(&["recache", "-l", "debug", "--clear"]).unwrap();
        assert!(matches!(cli.level, LogLevel::Debug));
        assert_eq!(parse_strs(&["recache", "-l", "loud", "--clear"]).unwrap_err(), 1);
    }

    #[test]
    fn wrapped_command_keeps_compiler_flags() {
        let cli = parse_strs(&["recache", "gcc", "-O2", "-c", "foo.c", "-o", "foo.o"]).unwrap();
        let command: Vec<String> = cli
            .command
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        assert_eq!(command, vec!["gcc", "-O2", "-c", "foo.c", "-o", "foo.o"]);
    }

    #[test]
    fn help_and_version_exit_zero() {
        assert_eq!(parse_strs(&["recache", "--help"]).unwrap_err(), 0);
        assert_eq!(parse_strs(&["recache", "-h"]).unwrap_err(), 0);
        assert_eq!(parse_strs(&["recache", "--version"]).unwrap_err(), 0);
        assert_eq!(parse_strs(&["recache", "-V"]).unwrap_err(), 0);
    }

    #[test]
    fn unknown_option_exits_one() {
        assert_eq!(parse_strs(&["recache", "--frobnicate"]).unwrap_err(), 1);
    }
}
