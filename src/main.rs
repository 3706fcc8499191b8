//! The slang interpreter.
//!
//! Loads a program and everything it imports, then runs it.
//!
//! # Usage
//! ```text
//! slang <file>.sl
//! ```
//!
//! Program output goes to stdout. Diagnostics go to stderr; their verbosity is
//! controlled with `SLANG_LOG` (see [`slang::config`]).

use slang::config::Config;
use slang::interpreter::loader::load_program;
use slang::interpreter::vm::Vm;
use slang::utils::log;
use slang::{debug, error};
use std::env;
use std::io;
use std::process;

const USAGE: &str = "To run a program, use
\t{program} <file>.sl

Environment:
\tSLANG_LOG            log level: debug, info, warn, error
\tSLANG_GLOBALS_SIZE   global region size, in slots
\tSLANG_FRAMES_SIZE    call-frame region size, in slots
\tSLANG_STACK_SIZE     data stack size, in slots
\tSLANG_HEAP_LIMIT     maximum heap size, in slots";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(args.first().map_or("slang", String::as_str));
        return;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    log::set_level(config.log_level);

    let program = match load_program(&args[1], &config.limits) {
        Ok(program) => program,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    let stdout = io::stdout().lock();
    let mut vm = match Vm::new(program, stdout) {
        Ok(vm) => vm,
        Err(fault) => {
            error!("{fault}");
            process::exit(1);
        }
    };

    if let Err(fault) = vm.run() {
        error!("{fault}");
        process::exit(1);
    }
    debug!("halted after {} instruction(s)", vm.pc());
}

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
