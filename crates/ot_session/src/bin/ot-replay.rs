//! ot-replay - run a scripted multi-site editing scenario
//!
//! Usage: `ot-replay <scenario.json> [session-config.json]`
//!
//! Prints every site's final text and exits with an error when the sites
//! did not converge. Set `RUST_LOG=debug` to trace the engine.

use anyhow::{bail, Context};
use ot_session::{replay, Scenario, SessionConfig};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(scenario_path) = args.next() else {
        bail!("usage: ot-replay <scenario.json> [session-config.json]");
    };
    let config = match args.next() {
        Some(path) => SessionConfig::load(Path::new(&path))?,
        None => SessionConfig::default(),
    };

    let content = std::fs::read_to_string(&scenario_path)
        .with_context(|| format!("failed to read scenario {}", scenario_path))?;
    let scenario: Scenario = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse scenario {}", scenario_path))?;

    tracing::info!(
        "Replaying {} sites from {}",
        scenario.sites.len(),
        scenario_path
    );

    let report = replay::run(&scenario, &config).context("replay failed")?;

    for site in &report.sites {
        println!("{} [{}] {:?}", site.user, site.current, site.text);
        if site.pending > 0 {
            println!("  {} requests never became ready", site.pending);
        }
    }

    if !report.converged() {
        bail!("sites diverged");
    }
    println!("converged");
    Ok(())
}
