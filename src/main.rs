use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use rope_eval::ast::{Program, Stmt};
use rope_eval::ast_printer::AstPrinter;
use rope_eval::error::EngineError;
use rope_eval::interpreter::Interpreter;
use rope_eval::parser::{parse_program, Parser};
use rope_eval::resolver::resolve_script;
use rope_eval::scanner::{scan_all, Scanner};

#[derive(ClapParser, Debug)]
#[command(version, about = "Rope-string script evaluator with direct and indirect eval", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize {
        filename: Option<PathBuf>,

        /// Print the token stream as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parses input from a file as a program and prints its AST
    Parse { filename: Option<PathBuf> },

    /// Evaluates input from a file as a single expression and prints the result
    Evaluate { filename: Option<PathBuf> },

    /// Runs input from a file as a script
    Run { filename: Option<PathBuf> },
}

/// Maps the file and validates it as UTF-8.
fn read_file(filename: PathBuf) -> Result<String> {
    info!("Reading file: {:?}", filename);
    let file = File::open(&filename).context(format!("Failed to open file {:?}", filename))?;

    // An empty file cannot be mapped on every platform.
    let len = file
        .metadata()
        .context(format!("Failed to stat file {:?}", filename))?
        .len();
    if len == 0 {
        return Ok(String::new());
    }

    // SAFETY: the mapping is read-only and copied out before returning.
    let mmap = unsafe { Mmap::map(&file) }.context(format!("Failed to map file {:?}", filename))?;

    let text = std::str::from_utf8(&mmap)
        .context(format!("File {:?} is not valid UTF-8", filename))?
        .to_owned();

    info!("Read {} bytes from {:?}", text.len(), filename);

    Ok(text)
}

fn init_logger() -> Result<()> {
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    Builder::new()
        .format(|buf, record| {
            // Strip 'rope_eval::' from module path
            let module = record
                .module_path()
                .unwrap_or("<unnamed>")
                .strip_prefix("rope_eval::")
                .unwrap_or(record.module_path().unwrap_or("<unnamed>"));
            writeln!(
                buf,
                "[{} {}:{}] - {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug) // Default to Debug, override with RUST_LOG
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

/// Reports an engine error and exits: 65 for errors found before any code
/// ran, 70 for everything else.
fn fail(err: EngineError) -> ! {
    debug!("Engine error: {:?}", err);
    eprintln!("{}", err);

    let code = if err.is_static() { 65 } else { 70 };
    debug!("Exiting with code {}", code);
    std::process::exit(code);
}

fn no_input(subcommand: &str) {
    info!("No filepath provided for {}", subcommand);
    println!("No input filepath was provided. Exiting...");
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    // Initialize logger only if --log flag is provided
    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Commands::Tokenize { filename, json } => {
            let Some(filename) = filename else {
                no_input("Tokenize");
                return Ok(());
            };

            info!("Running Tokenize subcommand");
            let source = read_file(filename)?;

            if json {
                let tokens = scan_all(&source).unwrap_or_else(|e| fail(e));
                let out = serde_json::to_string_pretty(&tokens)
                    .context("Failed to serialize tokens")?;
                println!("{}", out);
                return Ok(());
            }

            let mut tokenized = true;
            for token in Scanner::new(&source) {
                match token {
                    Ok(token) => println!("{}", token),
                    Err(e) => {
                        tokenized = false;
                        debug!("Tokenization debug: {}", e);
                        eprintln!("{}", e);
                    }
                }
            }

            if !tokenized {
                debug!("Tokenization failed, exiting with code 65");
                std::process::exit(65);
            }

            info!("Tokenization completed successfully");
        }

        Commands::Parse { filename } => {
            let Some(filename) = filename else {
                no_input("Parse");
                return Ok(());
            };

            info!("Running Parse subcommand");
            let source = read_file(filename)?;

            let program = parse_program(&source).unwrap_or_else(|e| fail(e));
            let printed = AstPrinter::print_program(&program);

            debug!("AST: {}", printed);
            println!("{}", printed);

            info!("Parse subcommand completed");
        }

        Commands::Evaluate { filename } => {
            let Some(filename) = filename else {
                no_input("Evaluate");
                return Ok(());
            };

            info!("Running Evaluate subcommand");
            let source = read_file(filename)?;

            let tokens = scan_all(&source).unwrap_or_else(|e| fail(e));
            let expr = Parser::new(&tokens)
                .parse_expression()
                .unwrap_or_else(|e| fail(e));
            debug!("Parsed expression: {}", AstPrinter::print(&expr));

            let program = Program::new(vec![Stmt::Expression(expr)], false);
            resolve_script(&program).unwrap_or_else(|e| fail(e));

            let mut interpreter = Interpreter::new();
            let value = interpreter
                .execute_program(&program)
                .unwrap_or_else(|e| fail(e));

            println!("{}", value);
            info!("Evaluate subcommand completed");
        }

        Commands::Run { filename } => {
            let Some(filename) = filename else {
                no_input("Run");
                return Ok(());
            };

            info!("Running Run subcommand");
            let source = read_file(filename)?;
            info!("Provided input:\n {}", source);

            let program = parse_program(&source).unwrap_or_else(|e| fail(e));
            resolve_script(&program).unwrap_or_else(|e| fail(e));
            info!("Parsed {} statements", program.body.len());

            let mut interpreter = Interpreter::new();
            match interpreter.execute_program(&program) {
                Ok(_) => info!("Program executed successfully"),
                Err(e) => fail(e),
            }
        }
    }

    Ok(())
}
