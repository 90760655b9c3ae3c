// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Offline altitude deconfliction

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use helix_core::domain::agent::AgentId;
use helix_core::domain::node_config::NodeConfigManifest;
use helix_swarm::domain::{deconflict, DeconflictionParams};

#[derive(Args)]
pub struct DeconflictArgs {
    /// Agent altitudes as ID=METRES, in input order (ties keep this order)
    #[arg(value_name = "ID=ALT", required = true, value_parser = parse_altitude)]
    altitudes: Vec<(AgentId, f64)>,

    /// Site elevation in metres (default: configured reference altitude)
    #[arg(long)]
    site: Option<f64>,

    /// Ladder spacing in metres (default: configured step)
    #[arg(long)]
    step: Option<f64>,

    /// Lowest ladder height above the site
    #[arg(long)]
    min_height: Option<f64>,

    /// Highest ladder height above the site
    #[arg(long)]
    max_height: Option<f64>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn parse_altitude(raw: &str) -> Result<(AgentId, f64), String> {
    let (id, altitude) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=ALT, got '{}'", raw))?;
    let id = AgentId::new(id.trim()).map_err(|e| e.to_string())?;
    let altitude: f64 = altitude
        .trim()
        .parse()
        .map_err(|_| format!("invalid altitude '{}'", altitude))?;
    if !altitude.is_finite() {
        return Err(format!("altitude for {} must be finite", id));
    }
    Ok((id, altitude))
}

pub fn execute(args: DeconflictArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let (site, params) = resolve(&args, &config);
    let assigned = deconflict(&args.altitudes, site, params);

    if args.json {
        let rendered: serde_json::Map<String, serde_json::Value> = assigned
            .iter()
            .map(|(id, altitude)| (id.to_string(), serde_json::Value::from(*altitude)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "Ladder: step {} m, {} .. {} m above site {} m",
            params.step, params.bounds.0, params.bounds.1, site
        )
        .bold()
    );
    for (id, altitude) in &assigned {
        let before = args
            .altitudes
            .iter()
            .find(|(input, _)| input == id)
            .map(|(_, alt)| *alt)
            .unwrap_or(*altitude);
        println!("  {:<8} {:>9.2} -> {:>9.2}", id.to_string(), before, altitude);
    }
    Ok(())
}

fn resolve(args: &DeconflictArgs, config: &NodeConfigManifest) -> (f64, DeconflictionParams) {
    let defaults: DeconflictionParams = config.spec.flight.deconfliction.into();
    let site = args
        .site
        .unwrap_or(config.spec.geodetic_reference.altitude_m);
    let params = DeconflictionParams {
        step: args.step.unwrap_or(defaults.step),
        bounds: (
            args.min_height.unwrap_or(defaults.bounds.0),
            args.max_height.unwrap_or(defaults.bounds.1),
        ),
    };
    (site, params)
}
