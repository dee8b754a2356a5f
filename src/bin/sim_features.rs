//! sim-features: inspect and serve a region's simulator features document
//!
//! Usage:
//!   sim-features dump [--config <path>] [--json]    Print the seeded document
//!   sim-features fetch [--config <path>] [--json]   Seed, merge grid extras, print
//!   sim-features serve [--config <path>] [--bind <addr>]
//!                                                   Serve a demo capability (feature "server")

use std::path::PathBuf;

use anyhow::Context;
use sim_features::grid::{FetchPolicy, HttpGridFeatureSource};
use sim_features::llsd::xml;
use sim_features::{FeaturesConfig, SimulatorFeatures};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "dump" => cmd_dump(&args[2..]),
        "fetch" => cmd_fetch(&args[2..]),
        "serve" => cmd_serve(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("sim-features {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"sim-features - simulator features registry

USAGE:
    sim-features <COMMAND> [OPTIONS]

COMMANDS:
    dump [--config <path>] [--json]      Print the seeded features document
    fetch [--config <path>] [--json]     Merge the grid's extra features, then print
    serve [--config <path>] [--bind <addr>]
                                         Serve a capability for a demo agent
    version                              Show version information
    help                                 Show this help message

ENVIRONMENT:
    SIM_FEATURES_CONFIG                  Default configuration file
    SIM_FEATURES_GRID_URI                Grid service base URI override
    SIM_FEATURES_FETCH_TIMEOUT_SECS      Grid fetch timeout override
    RUST_LOG                             Log filter (default: info)"#
    );
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn load_config(args: &[String]) -> anyhow::Result<FeaturesConfig> {
    let path = flag_value(args, "--config")
        .map(PathBuf::from)
        .or_else(|| std::env::var("SIM_FEATURES_CONFIG").ok().map(PathBuf::from));
    let config = match path {
        Some(path) => FeaturesConfig::from_path(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FeaturesConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn print_features(module: &SimulatorFeatures, json: bool) -> anyhow::Result<()> {
    let features = module.features();
    if json {
        println!("{}", serde_json::to_string_pretty(&features)?);
    } else {
        println!("{}", xml::map_to_string(&features));
    }
    Ok(())
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

async fn merge_grid_extras(module: &SimulatorFeatures) -> anyhow::Result<()> {
    let config = module.config();
    let Some(source) = HttpGridFeatureSource::from_config(config)? else {
        tracing::info!("no grid service configured, skipping extra features");
        return Ok(());
    };
    let policy = FetchPolicy::default().with_retries(config.fetch_retries);
    module.load_grid_extra_features(&source, &policy).await;
    Ok(())
}

fn cmd_dump(args: &[String]) -> anyhow::Result<()> {
    let module = SimulatorFeatures::new(load_config(args)?)?;
    print_features(&module, args.iter().any(|a| a == "--json"))
}

fn cmd_fetch(args: &[String]) -> anyhow::Result<()> {
    let module = SimulatorFeatures::new(load_config(args)?)?;
    runtime()?.block_on(merge_grid_extras(&module))?;
    print_features(&module, args.iter().any(|a| a == "--json"))
}

#[cfg(feature = "server")]
fn cmd_serve(args: &[String]) -> anyhow::Result<()> {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use sim_features::caps::{server, CapsTable};

    let module = SimulatorFeatures::new(load_config(args)?)?;
    let bind: SocketAddr = flag_value(args, "--bind")
        .unwrap_or("127.0.0.1:9000")
        .parse()
        .context("parsing --bind address")?;

    runtime()?.block_on(async move {
        merge_grid_extras(&module).await?;

        let table = Arc::new(CapsTable::new());
        let agent = uuid::Uuid::new_v4();
        let path = module.register_caps(agent, table.as_ref())?;
        println!("agent {agent}: http://{bind}{path}");

        server::bind_and_serve(bind, table).await?;
        Ok::<(), anyhow::Error>(())
    })
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_args: &[String]) -> anyhow::Result<()> {
    anyhow::bail!("this build has no HTTP server; rebuild with `--features server`")
}
