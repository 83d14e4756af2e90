/*!
Runs the HomestakerOS build server.
*/

#[macro_use]
extern crate log;

use argh::FromArgs;
use buildserver::server::load_schema;
use buildserver::workspace::Workspace;
use buildserver::{BuildTools, Result, SharedData};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::process;

/// Serves builds of HomestakerOS configurations.
#[derive(FromArgs)]
struct Args {
    /// address to bind the server to
    #[argh(option, short = 'a', default = "String::from(\"0.0.0.0\")")]
    addr: String,

    /// port to bind the server to
    #[argh(option, short = 'p', default = "8081")]
    port: u16,

    /// options schema used for form submissions
    #[argh(option)]
    schema: Option<PathBuf>,

    /// command line of the JSON to Nix converter
    #[argh(option, default = "String::from(\"json2nix\")")]
    json2nix: String,

    /// command line of nix
    #[argh(option, default = "String::from(\"nix\")")]
    nix: String,

    /// directory to create the build workspace in, the system temporary directory by default
    #[argh(option)]
    work_dir: Option<PathBuf>,

    /// log level: off, error, warn, info, debug or trace
    #[argh(option, default = "LevelFilter::Info")]
    log_level: LevelFilter,
}

async fn run(args: Args) -> Result<()> {
    let schema = match &args.schema {
        Some(path) => {
            let schema = load_schema(path)?;
            info!("Loaded options schema from '{}'", path.display());
            Some(schema)
        }
        None => {
            info!("No options schema given, form submissions are disabled");
            None
        }
    };
    let tools = BuildTools {
        json2nix: args.json2nix.parse()?,
        nix: args.nix.parse()?,
    };
    let workspace = match &args.work_dir {
        Some(dir) => Workspace::new_in(dir)?,
        None => Workspace::new()?,
    };

    let shared = SharedData {
        workspace,
        tools,
        schema,
    };
    buildserver::serve(&args.addr, args.port, shared).await
}

#[actix_rt::main]
async fn main() {
    let args: Args = argh::from_env();

    // TerminalMode::Stderr keeps log output off stdout.
    if let Err(e) = TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logger: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        process::exit(1);
    }
}
