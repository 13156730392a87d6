use std::process::ExitCode;

use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use infra_probe::config::{self, ReportFormat};
use infra_probe::load::{simulate_load, LoadReport};
use infra_probe::metrics::metrics;
use infra_probe::{Config, ConnectOptions, CredentialDefaults, HealthChecker, HealthReport};

/// Everything one run produced, for `--format json` style output
#[derive(Serialize)]
struct RunReport<'a> {
    health: &'a HealthReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    load: Option<&'a LoadReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_or_default_config();
    let env_credentials = CredentialDefaults::from_env();
    let credentials = config.credentials.or(&env_credentials);
    let targets = config.targets()?;

    info!(
        services = targets.len(),
        web = config.web.len(),
        max_workers = config.health.max_workers,
        depth = ?config.health.depth,
        "Starting infrastructure checks"
    );

    let checker = HealthChecker::from_config(&config, &env_credentials)?;
    let health = checker.check_all(targets.clone(), config.web.clone()).await;

    let load = if config.report.run_load {
        let options = ConnectOptions::from(&config.health);
        Some(simulate_load(&targets, &credentials, &config.load, &options).await)
    } else {
        None
    };

    match config.report.format {
        ReportFormat::Summary => {
            print!("{}", health.summary());
            if let Some(load) = &load {
                for (name, tally) in &load.targets {
                    println!(
                        "load {:<32} {}/{} workers ok, {} round-trips",
                        name, tally.successful, tally.workers, tally.round_trips
                    );
                }
                println!(
                    "load {} ({}ms)",
                    if load.passed { "passed" } else { "FAILED" },
                    load.elapsed_ms
                );
            }
        }
        ReportFormat::Json => {
            let report = RunReport {
                health: &health,
                load: load.as_ref(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if let Some(path) = &config.report.metrics_textfile {
        match metrics().write_textfile(path) {
            Ok(()) => info!(path = %path.display(), "Wrote metrics textfile"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write metrics textfile"),
        }
    }

    let load_ok = load.as_ref().map_or(true, |l| l.passed);
    if health.all_healthy() && load_ok {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(unhealthy = ?health.unhealthy(), load_ok = load_ok, "Infrastructure checks failed");
        Ok(ExitCode::FAILURE)
    }
}

fn load_or_default_config() -> Config {
    let env_path = std::env::var("INFRA_PROBE_CONFIG").ok();
    let config_paths = env_path
        .iter()
        .map(String::as_str)
        .chain(["config/infra-probe.toml", "infra-probe.toml"]);

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
