mod ast;
mod backend;
mod codegen;
mod input;
mod lexer;
mod parser;
mod runtime;
mod session;

use std::{fs, io};

use anyhow::{anyhow, Context as _};
use backend::JitBackend;
use clap::{App, Arg};
use input::{ReadError, Utf8Chars};
use inkwell::{context::Context, OptimizationLevel};
use session::{Session, SessionConfig};

fn opt_level(level: &str) -> anyhow::Result<OptimizationLevel> {
    match level {
        "0" => Ok(OptimizationLevel::None),
        "1" => Ok(OptimizationLevel::Less),
        "2" => Ok(OptimizationLevel::Default),
        "3" => Ok(OptimizationLevel::Aggressive),
        _ => Err(anyhow!("invalid optimization level {}", level)),
    }
}

fn main() -> anyhow::Result<()> {
    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("input")
                .help("source file to run instead of reading from stdin")
                .index(1),
        )
        .arg(
            Arg::with_name("prompt")
                .long("prompt")
                .takes_value(true)
                .help("prompt written before each top-level construct"),
        )
        .arg(
            Arg::with_name("no-ir")
                .long("no-ir")
                .help("don't print the generated IR"),
        )
        .arg(
            Arg::with_name("opt-level")
                .short("O")
                .long("opt-level")
                .takes_value(true)
                .possible_values(&["0", "1", "2", "3"])
                .default_value("0")
                .help("code generation level of the jit"),
        )
        .get_matches();

    let mut config = SessionConfig::default();
    if let Some(prompt) = matches.value_of("prompt") {
        config.prompt = prompt.to_string();
    }
    config.dump_ir = !matches.is_present("no-ir");
    config.opt_level = opt_level(matches.value_of("opt-level").unwrap_or("0"))?;

    let mut read_error: Option<ReadError> = None;
    let input: Box<dyn Iterator<Item = char>> = match matches.value_of("input") {
        Some(path) => {
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path))?;
            Box::new(source.chars().collect::<Vec<_>>().into_iter())
        }
        None => {
            let chars = Utf8Chars::new(io::stdin());
            read_error = Some(chars.error());
            Box::new(chars)
        }
    };

    let context = Context::create();
    let backend = JitBackend::new(&context, config.opt_level);
    let mut session = Session::new(&context, input, backend, io::stderr(), config);
    session.run()?;

    match read_error.and_then(|error| error.replace(None)) {
        Some(err) => Err(err).context("failed to read stdin"),
        None => Ok(()),
    }
}
