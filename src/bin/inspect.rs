//! scriptdev-inspect - loads a device script and lists its devices
//!
//! Prints every device the script provides with its typed property
//! descriptors, the way the host will see them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use scriptdev::reflection::{Bounds, PropertyKind};
use scriptdev::{context, logging, BridgeConfig, ScriptHub, ScriptRuntime};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scriptdev-inspect")]
#[command(about = "Load a device script and print its devices and properties")]
struct Cli {
    /// Device script to load (overrides the configuration file)
    script: Option<PathBuf>,

    /// Runtime location: Python executable or Rhai module directory
    #[arg(long)]
    runtime: Option<PathBuf>,

    /// Configuration file
    #[arg(long, default_value = scriptdev::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

fn describe_bounds(bounds: Option<Bounds>) -> String {
    bounds
        .map(|b| format!(" [{}, {}]", b.min, b.max))
        .unwrap_or_default()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BridgeConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.script.is_some() {
        config.script_path = cli.script;
    }
    if cli.runtime.is_some() {
        config.runtime_path = cli.runtime;
    }
    logging::init(&config);

    let ctx = context::global();
    let backend = ctx.runtime().backend_name();
    let mut hub = ScriptHub::from_config(ctx, &config);
    hub.initialize().context("initializing script hub")?;
    info!(
        runtime = ?hub.runtime_path(),
        backend,
        "Script loaded"
    );

    for mut device in hub.detect_installed_devices()? {
        device
            .initialize()
            .with_context(|| format!("binding {}", device.id()))?;
        println!("{}", device.id());
        for property in device.properties() {
            let mut flags = String::new();
            if property.read_only {
                flags.push_str(" read-only");
            }
            let extra = match &property.kind {
                PropertyKind::Enum { keys, .. } => format!(" {{{}}}", keys.join(", ")),
                _ => String::new(),
            };
            println!(
                "  {:<20} {:<8} {:?}{}{}{}",
                property.name,
                property.kind.name(),
                property.host_type(),
                describe_bounds(property.bounds),
                extra,
                flags
            );
        }
    }

    hub.shutdown();
    Ok(())
}
