use crate::engine::config::{RunConfig, SimulationConfig};
use crate::engine::error::EngineError;
use crate::engine::monte_carlo::{EnergyDrift, MonteCarlo};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::registry::Registry;
use crate::engine::setup::build_monte_carlo;
use crate::engine::trial::criteria::Criteria;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    pub name: String,
    pub attempts: u64,
    pub acceptance_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub final_energy: f64,
    /// Mean of the sampled energies; `None` without production samples.
    pub mean_energy: Option<f64>,
    /// Mean particle count per particle type name, in type order.
    pub mean_counts: Vec<(String, f64)>,
    pub num_samples: u64,
    pub drift: EnergyDrift,
    pub trials: Vec<TrialReport>,
}

/// Builds a driver from `config` and runs every phase of [`RunConfig`].
#[instrument(skip_all, name = "simulation_workflow")]
pub fn run(
    config: &SimulationConfig,
    registry: &Registry,
    reporter: &ProgressReporter,
) -> Result<SimulationReport, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Setup" });
    info!(seed = config.seed, "Building the simulation.");
    let mut mc = build_monte_carlo(config, registry)?;
    reporter.report(Progress::PhaseFinish);

    run_driver(&mut mc, &config.run, reporter)
}

/// Runs the equilibration, production and drift-check phases on an existing driver.
///
/// The driver is left in its final state so that it can be checkpointed or continued.
pub fn run_driver<C: Criteria>(
    mc: &mut MonteCarlo<C>,
    run: &RunConfig,
    reporter: &ProgressReporter,
) -> Result<SimulationReport, EngineError> {
    if run.production_attempts > 0 && run.sample_interval == 0 {
        return Err(EngineError::Configuration(
            "sample interval must be positive".to_string(),
        ));
    }

    equilibrate(mc, run, reporter);
    let (mean_energy, mean_counts, num_samples) = produce(mc, run, reporter);

    let final_energy = mc.current_energy();
    if !final_energy.is_finite() {
        return Err(EngineError::PhaseFailed {
            phase: "Production",
            reason: format!("tracked energy became {final_energy}"),
        });
    }

    reporter.report(Progress::PhaseStart { name: "Drift Check" });
    let drift = mc.check_energy_drift();
    if drift.relative() > run.drift_tolerance {
        warn!(
            tracked = drift.tracked,
            recomputed = drift.recomputed,
            tolerance = run.drift_tolerance,
            "Energy drift exceeds tolerance."
        );
        reporter.report(Progress::Message(format!(
            "Energy drift {:.3e} exceeds tolerance {:.3e}.",
            drift.relative(),
            run.drift_tolerance
        )));
    } else {
        info!(drift = drift.absolute(), "Energy drift within tolerance.");
    }
    reporter.report(Progress::PhaseFinish);

    let trials = mc
        .trials()
        .iter()
        .map(|trial| TrialReport {
            name: trial.name().to_string(),
            attempts: trial.num_attempts(),
            acceptance_rate: trial.acceptance_rate(),
        })
        .collect::<Vec<_>>();
    for trial in &trials {
        reporter.report(Progress::TrialSummary {
            name: trial.name.clone(),
            attempts: trial.attempts,
            acceptance: trial.acceptance_rate,
        });
    }

    info!(
        final_energy,
        samples = num_samples,
        "Workflow complete."
    );
    Ok(SimulationReport {
        final_energy,
        mean_energy,
        mean_counts,
        num_samples,
        drift,
        trials,
    })
}

fn equilibrate<C: Criteria>(mc: &mut MonteCarlo<C>, run: &RunConfig, reporter: &ProgressReporter) {
    if run.equilibration_attempts == 0 {
        return;
    }
    reporter.report(Progress::PhaseStart {
        name: "Equilibration",
    });
    info!(
        attempts = run.equilibration_attempts,
        tune_interval = run.tune_interval,
        "Starting equilibration."
    );
    reporter.report(Progress::TaskStart {
        total_steps: run.equilibration_attempts,
    });
    let chunk = if run.tune_interval == 0 {
        run.equilibration_attempts
    } else {
        run.tune_interval
    };
    let mut done = 0;
    while done < run.equilibration_attempts {
        let n = chunk.min(run.equilibration_attempts - done);
        mc.attempt(n);
        done += n;
        if run.tune_interval > 0 {
            mc.tune_trials();
        }
        reporter.report(Progress::TaskIncrement { amount: n });
        reporter.report(Progress::StatusUpdate {
            text: format!(
                "{done}/{} attempts, energy {:.6}",
                run.equilibration_attempts,
                mc.current_energy()
            ),
        });
    }
    reporter.report(Progress::TaskFinish);
    info!(energy = mc.current_energy(), "Equilibration finished.");
    reporter.report(Progress::PhaseFinish);
}

fn produce<C: Criteria>(
    mc: &mut MonteCarlo<C>,
    run: &RunConfig,
    reporter: &ProgressReporter,
) -> (Option<f64>, Vec<(String, f64)>, u64) {
    let num_types = mc.system().config().num_particle_types();
    let mut energy_sum = 0.0;
    let mut count_sums = vec![0.0; num_types];
    let mut num_samples = 0u64;

    if run.production_attempts > 0 {
        reporter.report(Progress::PhaseStart { name: "Production" });
        info!(
            attempts = run.production_attempts,
            sample_interval = run.sample_interval,
            "Starting production."
        );
        reporter.report(Progress::TaskStart {
            total_steps: run.production_attempts,
        });
        let mut done = 0;
        while done < run.production_attempts {
            let n = run.sample_interval.min(run.production_attempts - done);
            mc.attempt(n);
            done += n;
            energy_sum += mc.current_energy();
            let config = mc.system().config();
            for (t, sum) in count_sums.iter_mut().enumerate() {
                *sum += config.num_particles_of_type(t) as f64;
            }
            num_samples += 1;
            reporter.report(Progress::TaskIncrement { amount: n });
        }
        reporter.report(Progress::TaskFinish);
        reporter.report(Progress::PhaseFinish);
    }

    let config = mc.system().config();
    let mean_counts = count_sums
        .into_iter()
        .enumerate()
        .map(|(t, sum)| {
            let mean = if num_samples > 0 {
                sum / num_samples as f64
            } else {
                config.num_particles_of_type(t) as f64
            };
            (config.particle_type(t).name.clone(), mean)
        })
        .collect();
    let mean_energy = (num_samples > 0).then(|| energy_sum / num_samples as f64);
    (mean_energy, mean_counts, num_samples)
}

/// Runs `num_replicas` independent copies of `config`, replica `i` seeded with `seed + i`.
///
/// Replicas share nothing mutable; with the `parallel` feature they run on the rayon pool.
pub fn run_replicas(
    config: &SimulationConfig,
    registry: &Registry,
    num_replicas: u64,
) -> Result<Vec<SimulationReport>, EngineError> {
    info!(replicas = num_replicas, "Running independent replicas.");
    let seeds: Vec<u64> = (0..num_replicas)
        .map(|i| config.seed.wrapping_add(i))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = seeds.iter();

    #[cfg(feature = "parallel")]
    let iterator = seeds.par_iter();

    iterator
        .map(|&seed| {
            let replica = SimulationConfig {
                seed,
                ..config.clone()
            };
            run(&replica, registry, &ProgressReporter::new())
        })
        .collect()
}
