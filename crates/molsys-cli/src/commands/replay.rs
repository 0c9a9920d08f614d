use crate::cli::ReplayArgs;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use molsys::{
    engine::{monitor::EnergyMonitor, progress::ProgressReporter},
    workflows::{
        self,
        replay::ReplayReport,
        scenario::Scenario,
    },
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn run(args: ReplayArgs) -> Result<()> {
    info!("Loading scenario from {:?}", &args.scenario);
    let scenario = Scenario::from_file(&args.scenario)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Replaying {} step(s) on system '{}'...",
        scenario.steps.len(),
        scenario.system.name
    );
    info!("Invoking the replay workflow...");
    let report = workflows::replay::run(&scenario, &reporter)?;

    print_summary(&report);

    if let Some(path) = &args.csv {
        info!("Writing step records to {:?}", path);
        report.write_csv(path).map_err(|e| CliError::Export {
            path: path.clone(),
            source: e.into(),
        })?;
        println!("Step records written to {}", path.display());
    }

    if let Some(dir) = &args.monitors {
        write_monitors(&report, dir)?;
    }

    let failed = report.n_failed();
    if failed > 0 {
        warn!("{} of {} step(s) were rolled back.", failed, report.steps.len());
        if args.strict {
            return Err(CliError::FailedSteps(failed));
        }
    }
    Ok(())
}

fn print_summary(report: &ReplayReport) {
    for (i, step) in report.steps.iter().enumerate() {
        let energy = step
            .energy
            .map(|e| format!("{e:.4}"))
            .unwrap_or_else(|| "-".to_string());
        match &step.error {
            None => println!(
                "  {:>3}. ✓ {:<28} v{}.{}  E = {}",
                i + 1,
                step.label,
                step.major,
                step.minor,
                energy
            ),
            Some(error) => println!("  {:>3}. ✗ {:<28} {}", i + 1, step.label, error),
        }
    }
    println!(
        "Final system '{}' at version {}.",
        report.system.name(),
        report.system.version()
    );
}

fn write_monitors(report: &ReplayReport, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let monitors = report.system.monitors();
    for name in monitors.names() {
        let Ok(monitor) = monitors.get_as::<EnergyMonitor>(name) else {
            warn!("Monitor '{}' has no tabular output; skipping.", name);
            continue;
        };
        let path = monitor_path(dir, name);
        info!(
            "Writing {} sample(s) of monitor '{}' to {:?}",
            monitor.n_samples(),
            name,
            &path
        );
        monitor.write_csv(&path).map_err(|e| CliError::Export {
            path: path.clone(),
            source: e.into(),
        })?;
    }
    Ok(())
}

fn monitor_path(dir: &Path, name: &str) -> PathBuf {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{stem}.csv"))
}
