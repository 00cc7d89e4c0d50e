//! Grit CLI

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use grit::interp::{Interpreter, Value};

#[derive(Parser)]
#[command(name = "grit", version, about = "Grit - stack language interpreter and debugger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Grit script and print the final stack
    Run {
        /// Source file to run
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Source file to tokenize
        file: PathBuf,
    },
    /// Serve the Debug Adapter Protocol for one client
    Dap {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:65432")]
        listen: String,
    },
    /// Start an interactive REPL
    Repl,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { file } => run_file(&file),
        Command::Tokens { file } => tokenize_file(&file),
        Command::Dap { listen } => serve_dap(&listen),
        Command::Repl => run_repl(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?.replace('\r', "");
    let filename = path.display().to_string();

    let mut vm = Interpreter::new(&source);
    match vm.execute_all() {
        Ok(stack) => {
            println!("{}", Value::List(stack));
            Ok(())
        }
        Err(e) => {
            grit::error::report_error(&filename, &source, &e);
            std::process::exit(1);
        }
    }
}

fn tokenize_file(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;

    for token in grit::lexer::tokenize(&source) {
        println!("{:?} @ {}..{}", token.text, token.span.start, token.span.end);
    }

    Ok(())
}

fn serve_dap(listen: &str) -> Result<(), Box<dyn std::error::Error>> {
    grit::dap::serve(listen)?;
    Ok(())
}

fn run_repl() -> Result<(), Box<dyn std::error::Error>> {
    let mut repl = grit::repl::Repl::new()?;
    repl.run()?;
    Ok(())
}
