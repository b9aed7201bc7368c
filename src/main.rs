use std::path::PathBuf;
use std::process::exit;

use kipper::{Engine, EngineOptions};
use rustyline::Editor;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
#[structopt(name = "kipper")]
struct Opts {
    /// The script to run. Without a file, an interactive session starts.
    file: Option<PathBuf>,

    /// Total heap size in bytes (0 keeps the defaults).
    #[structopt(long, default_value = "0")]
    heap_size: usize,

    /// How many young collections an object survives before tenuring.
    #[structopt(long, default_value = "2")]
    tenure_threshold: u8,

    /// Print the AST of every compiled script.
    #[structopt(long)]
    dump_ast: bool,
}

fn engine(opts: &Opts) -> Engine {
    Engine::with_options(EngineOptions {
        heap_size: opts.heap_size,
        tenure_threshold: opts.tenure_threshold,
        dump_ast: opts.dump_ast,
    })
}

fn run_file(opts: &Opts, path: &PathBuf) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("failed to open {}: {}", path.display(), error);
            return 1;
        }
    };
    let mut engine = engine(opts);
    let filename = path.to_string_lossy();
    match engine.eval(&filename, &source) {
        Ok(_) => 0,
        Err(error) => {
            eprintln!("{error}");
            1
        }
    }
}

fn repl(opts: &Opts) {
    println!("Kipper {} REPL", env!("CARGO_PKG_VERSION"));
    println!("Press Ctrl-C to exit.");
    println!();

    let mut editor = Editor::<()>::new();
    let mut engine = engine(opts);
    while let Ok(line) = editor.readline("> ") {
        editor.add_history_entry(&line);
        match engine.eval("(repl)", &line) {
            Ok(result) => println!("< {result:?}"),
            Err(error) => eprintln!("{error}"),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::from_args();
    if let Some(path) = opts.file.clone() {
        exit(run_file(&opts, &path));
    }
    repl(&opts);
}
