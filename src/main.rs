use anyhow::{Context, Result};
use log::{debug, info};
use std::time::Instant;

use marker_common::{BmcConfig, BmcDirection, DiagnosticsSnapshot, RunSnapshot, SimulationConfig};
use marker_engine::background::Background;
use marker_engine::bmc;
use marker_engine::marker::MarkerState;
use marker_engine::output;
use marker_engine::summary::EndStateSummary;
use marker_engine::{PartitionPlan, Simulation};

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting marker engine...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = SimulationConfig::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    let start_time = Instant::now();
    let snapshot = match config.bmc.as_ref().filter(|b| b.enabled) {
        Some(bmc_cfg) => run_bmc(&config, bmc_cfg)?,
        None => run_markers(&config)?,
    };
    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());

    // --- Save Recorded Data ---
    info!("Saving recorded data...");
    let out = &config.output;
    output::save_snapshot(&snapshot, &out.base_filename, out.format.as_deref())?;
    if out.save_endstate_csv && !snapshot.endstate.is_empty() {
        let filename = format!("{}_endstate.csv", out.base_filename);
        output::write_endstate_csv(&filename, &snapshot.endstate)?;
    } else {
        info!("Skipping end-state CSV.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Runs the markers listed in the input file to their end conditions.
fn run_markers(config: &SimulationConfig) -> Result<RunSnapshot> {
    let input = config
        .markers
        .input
        .as_deref()
        .context("markers.input is required unless [bmc] is enabled")?;
    let inputs = output::read_markers_csv(input, config.markers.kind)?;

    let sim = Simulation::from_config(config)?;
    debug!("Simulation Parameters: {:#?}", sim.params());
    let mut markers: Vec<MarkerState> = inputs.into_iter().map(|m| m.into_state(sim.background())).collect();
    let inistate = markers.iter().map(MarkerState::to_record).collect();

    info!("Running {} markers...", markers.len());
    let outcome = sim.run(&mut markers)?;
    EndStateSummary::from_markers(&markers).log();

    Ok(RunSnapshot {
        inistate,
        endstate: markers.iter().map(MarkerState::to_record).collect(),
        diagnostics: outcome.diagnostics.to_snapshot(),
        probability: None,
    })
}

/// Seeds markers on the BMC mesh and sweeps them backward or forward in time.
fn run_bmc(config: &SimulationConfig, bmc_cfg: &BmcConfig) -> Result<RunSnapshot> {
    let params = config.get_sim_params();
    let background = Background::from_config(config)?;
    let mesh = bmc::mesh_histogram(bmc_cfg.mesh, &config.diagnostics)?;
    let seed = bmc::init_particles(&mesh, bmc_cfg.mesh, bmc_cfg, &background)?;
    let inistate = seed.markers.iter().map(MarkerState::to_record).collect();

    let mut sim = Simulation::new(params, Default::default(), PartitionPlan::from_config(&config.partitions), background);
    let probability = match bmc_cfg.direction {
        BmcDirection::Backward => bmc::backward_monte_carlo(&mut sim, &seed, &mesh, bmc_cfg)?,
        BmcDirection::Forward => bmc::forward_monte_carlo(&mut sim, &seed, &mesh, bmc_cfg)?,
    };
    info!(
        "BMC done: {} slices, {} mesh cells, total probability mass {:.4}.",
        probability.slices,
        probability.values.len(),
        probability.values.iter().sum::<f64>()
    );

    Ok(RunSnapshot {
        inistate,
        endstate: Vec::new(),
        diagnostics: DiagnosticsSnapshot::default(),
        probability: Some(probability),
    })
}
