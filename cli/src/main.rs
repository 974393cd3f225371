mod test_runner;

use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineOptions, Registry};
use fabric::{Config, ContentBlock, Diagnostics};

const SUBCOMMANDS: &[&str] = &["run", "test", "help"];

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "FABRIC_LOG";

#[derive(Parser)]
#[command(name = "fabric", version, about = "Evaluate document templates")]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a document from a TOML file
    Run(RunArgs),

    /// Run .test.toml test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// TOML file defining the documents
    file: String,

    /// Document to evaluate (defaults to the first one in the file)
    #[arg(short, long)]
    document: Option<String>,

    /// Maximum number of plugin calls running at once
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Decode only, don't evaluate (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// List the decoded block tree
    #[arg(long)]
    list_blocks: bool,

    /// Suppress the rendered output (just check for errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.toml file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // `fabric file.toml` is shorthand for `fabric run file.toml`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args.iter().skip(1).position(|a| !a.starts_with('-')).map(|p| p + 1) {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "run".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    init_logging(cli.no_color);

    match cli.command {
        Command::Run(run_args) => do_run(run_args, cli.no_color),
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn init_logging(no_color: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .init();
}

fn do_run(args: RunArgs, no_color: bool) {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            process::exit(1);
        }
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());

    let body = match fabric::loader::load_str(&source, file_id) {
        Ok(body) => body,
        Err(diagnostics) => {
            emit_diagnostics(&writer, &config, &files, &diagnostics);
            process::exit(1);
        }
    };

    let options = match args.max_parallel {
        Some(max_parallel) => EngineOptions { max_parallel },
        None => EngineOptions::default(),
    };
    let mut engine = Engine::new(Registry::builtin(), options);
    let diagnostics = engine.load(&body);
    emit_diagnostics(&writer, &config, &files, &diagnostics);
    if diagnostics.has_errors() {
        process::exit(1);
    }

    if args.check {
        eprintln!("ok: {} decoded successfully", args.file);
        return;
    }

    if args.list_blocks {
        print_blocks(engine.config());
        return;
    }

    let document = match args.document.or_else(|| engine.config().documents.first().map(|d| d.name.clone())) {
        Some(name) => name,
        None => {
            eprintln!("error: '{}' defines no documents", args.file);
            process::exit(1);
        }
    };

    match engine.evaluate(&document) {
        Ok((text, warnings)) => {
            emit_diagnostics(&writer, &config, &files, &warnings);
            if !args.quiet {
                println!("{}", text);
            }
        }
        Err(diagnostics) => {
            emit_diagnostics(&writer, &config, &files, &diagnostics);
            process::exit(1);
        }
    }
}

fn print_blocks(config: &Config) {
    fn print_content(block: &ContentBlock) {
        block.walk(1, &mut |content, depth| {
            let pad = "  ".repeat(depth);
            let title = content.title.as_deref().map(|t| format!(" \"{}\"", t)).unwrap_or_default();
            println!("{}content {} {}{}", pad, content.block.block_type, content.block.name, title);
        });
    }

    for document in &config.documents {
        println!("document {}", document.name);
        for data in &document.data {
            println!("  data {} {}", data.block.block_type, data.block.name);
        }
        for content in &document.content {
            print_content(content);
        }
    }
}

fn emit_diagnostics(
    writer: &StandardStream,
    config: &term::Config,
    files: &SimpleFiles<String, String>,
    diagnostics: &Diagnostics,
) {
    for diagnostic in diagnostics.iter() {
        let _ = term::emit_to_write_style(&mut writer.lock(), config, files, &diagnostic.to_codespan());
    }
}
