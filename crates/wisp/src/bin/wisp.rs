use std::path::PathBuf;

use clap::Parser;
use log::info;
use wisp::{Decoder, Interpreter, Value};

#[derive(Parser)]
#[command(
    name = "wisp",
    about = "Run a WebAssembly MVP binary module",
    after_help = "If no function name is given, the module is instantiated and its start \
                  function (if any) is executed."
)]
struct Cli {
    /// Path to the WebAssembly binary module.
    module: PathBuf,

    /// Name of the exported function to call.
    function: Option<String>,

    /// i32 arguments passed to the function.
    #[arg(allow_negative_numbers = true)]
    args: Vec<i32>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let module = Decoder::parse(&cli.module)?;
    info!(
        "loaded {}: {} functions, {} exports",
        cli.module.display(),
        module.total_funcs(),
        module.exports.len()
    );

    let mut interp = Interpreter::new();
    interp.instantiate(module)?;

    if let Some(name) = &cli.function {
        let args: Vec<Value> = cli.args.iter().map(|&v| Value::I32(v)).collect();
        let results = interp.call(name, &args)?;
        for (i, value) in results.iter().enumerate() {
            println!("[{i}] {value}");
        }
    }

    Ok(())
}
