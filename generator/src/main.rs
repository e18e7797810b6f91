use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::rc::Rc;

use phillip::byte_array::byte_array_module;
use phillip::oracle::{NativeSizeOracle, ProgramSizeOracle};
use phillip::toolchain::{split_flags, CxxToolchain, ToolchainConfig};
use phillip::typemap::{Origin, ScalarTypeMap};

#[derive(Parser, Debug)]
#[command(
    name = "phillip",
    version,
    about = "Generates canonical C++ structs and FFI interfaces from tensor, foreign and record descriptors"
)]
struct Cli {
    /// C++ compiler command (default: $CXX or c++)
    #[arg(long, global = true)]
    cc: Option<String>,

    /// C++ compiler flags (default: $CXXFLAGS or -O2)
    #[arg(long, global = true)]
    cflags: Option<String>,

    /// Log generator steps at debug level
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the scalar correspondence table as JSON
    Sizes {
        /// Use the sizes of this host instead of compiling the size program
        #[arg(long)]
        native: bool,

        /// Directory for the size program
        #[arg(long, default_value = "target/phillip")]
        work_dir: PathBuf,
    },
    /// Write the ByteArray support module
    ByteArray {
        /// Output directory for byte_array.hpp and byte_array.cpp
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Also compile the module into a loadable unit
        #[arg(long)]
        build: bool,
    },
}

fn toolchain_config(cli: &Cli) -> ToolchainConfig {
    let mut config = ToolchainConfig::from_env();
    if let Some(cc) = &cli.cc {
        config.cxx = cc.clone();
    }
    if let Some(flags) = &cli.cflags {
        config.flags = split_flags(flags);
    }
    config
}

fn type_map(config: &ToolchainConfig, native: bool, work_dir: PathBuf) -> phillip::Result<ScalarTypeMap> {
    if native {
        return ScalarTypeMap::new(&NativeSizeOracle);
    }
    let oracle = ProgramSizeOracle::new(CxxToolchain::new(config.clone()), work_dir);
    ScalarTypeMap::new(&oracle)
}

fn run(cli: &Cli) -> phillip::Result<()> {
    let config = toolchain_config(cli);
    log::debug!("toolchain: {} {:?}", config.cxx, config.flags);

    match &cli.command {
        Command::Sizes { native, work_dir } => {
            let map = type_map(&config, *native, work_dir.clone())?;
            let mut table = serde_json::Map::new();
            for origin in [Origin::Target, Origin::Tensor, Origin::Foreign, Origin::Host] {
                let entries: Vec<serde_json::Value> = map
                    .correspondence(origin)
                    .into_iter()
                    .map(|(info, name)| serde_json::json!([name.name, info.signage, info.kind, info.size]))
                    .collect();
                table.insert(origin.to_string(), serde_json::Value::Array(entries));
            }
            let text = serde_json::to_string_pretty(&table).map_err(|e| phillip::Error::OracleFailure {
                message: e.to_string(),
            })?;
            println!("{text}");
        }
        Command::ByteArray { out_dir, build } => {
            let map = type_map(&config, true, out_dir.join("build"))?;
            let mut module = byte_array_module(Rc::new(map))?;
            if *build {
                let unit = module.build(&CxxToolchain::new(config), "byte_array", out_dir)?;
                println!("{}", unit.display());
            } else {
                for source in module.write_sources(out_dir, "byte_array")? {
                    println!("{}", source.display());
                }
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if let Err(e) = run(&cli) {
        eprintln!("phillip: error[{}]: {}", e.code(), e);
        std::process::exit(1);
    }
}
