use std::env;
use std::ffi::OsString;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{self, Command};

use cascadenv::{DotEnv, Error, Options, TargetEnv};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILE: &str = ".env";

const HELP: &str = "\
cascadenv - run commands with variables loaded from dotenv files

Usage:
  cascadenv run [OPTIONS] -- COMMAND [ARGS...]
  cascadenv run [OPTIONS] COMMAND [ARGS...]
  cascadenv --help
  cascadenv --version

Commands:
  run       Load dotenv files and execute a command
";

const RUN_HELP: &str = "\
cascadenv run - load dotenv files and execute a command

By default the base file is loaded together with its .local, .<env> and
.<env>.local siblings, where <env> comes from the app environment variable.

Usage:
  cascadenv run [OPTIONS] -- COMMAND [ARGS...]
  cascadenv run [OPTIONS] COMMAND [ARGS...]

Options:
  -f, --file <PATHS>        Dotenv file path(s). Repeat or pass comma-separated paths.
                            Defaults to .env. The cascade takes a single base file.
      --no-cascade          Load exactly the given files, in order.
  -o, --override            Override existing variables (requires --no-cascade).
      --overload            Alias for --override.
      --env-key <KEY>       Variable naming the app environment (default APP_ENV).
      --default-env <NAME>  App environment used when none is set (default dev).
      --test-envs <LIST>    Comma-separated environments that skip the .local file.
      --prod-envs <LIST>    Comma-separated environments where debug defaults off.
      --boot                Also normalize the debug flag (APP_DEBUG) to 1 or 0.
  -v, --verbose             Print loader diagnostics to stderr.
  -h, --help                Show this help text.
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunCommand {
    Help,
    Execute(RunOptions),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOptions {
    files: Vec<PathBuf>,
    cascade: bool,
    override_existing: bool,
    boot: bool,
    loader_options: Options,
    verbose: bool,
    command: OsString,
    args: Vec<OsString>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            cascade: true,
            override_existing: false,
            boot: false,
            loader_options: Options::new(),
            verbose: false,
            command: OsString::new(),
            args: Vec::new(),
        }
    }
}

fn main() {
    process::exit(run(env::args_os()));
}

fn run(args: impl IntoIterator<Item = OsString>) -> i32 {
    let mut args = args.into_iter();
    let _bin = args.next();

    let Some(subcommand) = args.next() else {
        print_help();
        return 0;
    };

    let subcommand = subcommand.to_string_lossy();
    match subcommand.as_ref() {
        "-h" | "--help" | "help" => {
            print_help();
            0
        }
        "-V" | "--version" | "version" => {
            print_version();
            0
        }
        "run" => match parse_run_options(args.collect()) {
            Ok(RunCommand::Help) => {
                print_run_help();
                0
            }
            Ok(RunCommand::Execute(options)) => {
                init_logging(options.verbose);
                match execute_run(options) {
                    Ok(code) => code,
                    Err(err) => {
                        eprintln!("cascadenv: {err}");
                        1
                    }
                }
            }
            Err(err) => {
                eprintln!("cascadenv: {err}");
                eprintln!("Try `cascadenv run --help`.");
                1
            }
        },
        unknown => {
            eprintln!("cascadenv: unknown subcommand `{unknown}`");
            eprintln!("Try `cascadenv --help`.");
            1
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("cascadenv=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_run_options(args: Vec<OsString>) -> Result<RunCommand, String> {
    let mut options = RunOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        let token = args[index].to_string_lossy();
        match token.as_ref() {
            "--" => {
                index += 1;
                break;
            }
            "-h" | "--help" => return Ok(RunCommand::Help),
            "-f" | "--file" => {
                let value = take_value(&args, &mut index, "-f/--file")?;
                parse_file_text(&value, &mut options.files)?;
            }
            value if value.starts_with("--file=") => {
                parse_file_text(&value["--file=".len()..], &mut options.files)?;
                index += 1;
            }
            "--no-cascade" => {
                options.cascade = false;
                index += 1;
            }
            "-o" | "--override" | "--overload" => {
                options.override_existing = true;
                index += 1;
            }
            "--env-key" => {
                let value = take_value(&args, &mut index, "--env-key")?;
                options.loader_options.env_key = Some(value);
            }
            "--default-env" => {
                let value = take_value(&args, &mut index, "--default-env")?;
                options.loader_options.default_env = Some(value);
            }
            "--test-envs" => {
                let value = take_value(&args, &mut index, "--test-envs")?;
                options.loader_options.test_envs = Some(split_list(&value));
            }
            "--prod-envs" => {
                let value = take_value(&args, &mut index, "--prod-envs")?;
                options.loader_options.prod_envs = Some(split_list(&value));
            }
            "--boot" => {
                options.boot = true;
                index += 1;
            }
            "-v" | "--verbose" => {
                options.verbose = true;
                index += 1;
            }
            unknown if unknown.starts_with('-') => {
                return Err(format!("unknown option `{unknown}`"));
            }
            _ => break,
        }
    }

    let remaining = &args[index..];
    let Some((command, command_args)) = remaining.split_first() else {
        return Err("missing command after `run`".to_owned());
    };

    if options.files.is_empty() {
        options.files.push(PathBuf::from(DEFAULT_FILE));
    }
    if options.cascade && options.files.len() > 1 {
        return Err("the cascade takes a single base file; use `--no-cascade`".to_owned());
    }
    if options.cascade && options.override_existing {
        return Err("`-o/--override` requires `--no-cascade`".to_owned());
    }
    if !options.cascade && options.boot {
        return Err("`--boot` cannot be combined with `--no-cascade`".to_owned());
    }

    options.command = command.clone();
    options.args = command_args.to_vec();
    Ok(RunCommand::Execute(options))
}

fn take_value(args: &[OsString], index: &mut usize, flag: &str) -> Result<String, String> {
    *index += 1;
    let Some(value) = args.get(*index) else {
        return Err(format!("missing value for `{flag}`"));
    };
    *index += 1;
    Ok(value.to_string_lossy().into_owned())
}

fn parse_file_text(raw: &str, files: &mut Vec<PathBuf>) -> Result<(), String> {
    let before = files.len();
    files.extend(
        raw.split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(PathBuf::from),
    );
    if files.len() == before {
        return Err("`-f/--file` requires at least one path".to_owned());
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

fn execute_run(options: RunOptions) -> Result<i32, String> {
    let changed = load_environment(&options).map_err(|err| err.to_string())?;

    let mut command = Command::new(&options.command);
    command.args(&options.args).envs(changed);

    execute_command(command, &options.command)
}

/// Load into a snapshot of the process environment and return the variables
/// that were added or changed. Untouched variables are inherited as-is.
fn load_environment(options: &RunOptions) -> Result<Vec<(String, String)>, Error> {
    let initial = TargetEnv::snapshot_process();
    let mut loader = DotEnv::with_target(initial.clone());

    if options.cascade {
        let base = &options.files[0];
        let loader_options = options.loader_options.clone();
        if options.boot {
            loader.boot_env(base, loader_options)?;
        } else {
            loader.load_env(base, loader_options)?;
        }
    } else if options.override_existing {
        loader.overload(&options.files)?;
    } else {
        loader.load(&options.files)?;
    }

    let before = initial.into_memory().unwrap_or_default();
    Ok(loader
        .into_target()
        .into_memory()
        .unwrap_or_default()
        .into_iter()
        .filter(|(key, value)| before.get(key) != Some(value))
        .collect())
}

#[cfg(unix)]
fn execute_command(mut command: Command, program: &OsString) -> Result<i32, String> {
    let err = command.exec();
    Err(format!(
        "failed to execute `{}`: {err}",
        program.to_string_lossy()
    ))
}

#[cfg(not(unix))]
fn execute_command(mut command: Command, program: &OsString) -> Result<i32, String> {
    let status = command
        .status()
        .map_err(|err| format!("failed to execute `{}`: {err}", program.to_string_lossy()))?;
    Ok(status.code().unwrap_or(1))
}

fn print_help() {
    println!("{HELP}");
}

fn print_run_help() {
    println!("{RUN_HELP}");
}

fn print_version() {
    println!("cascadenv {}", env!("CARGO_PKG_VERSION"));
}
