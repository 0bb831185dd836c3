//! svcmgr - fleet service management
//!
//! Generates and deploys service configs, controls systemd services and
//! collects service metrics across the hosts of an environment.

mod config;
mod output;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use svcmgr_core::{validate_service_name, Outcome, ResultSet, Thresholds, DEFAULT_MAX_WORKERS};
use svcmgr_deploy::{
    deploy_config, fetch_config, generate_config, load_config, missing_keys, Params,
};

use crate::config::{check_sudo_setup, OutputFormat, Settings};

/// svcmgr - Fleet service management
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding templates and per-environment host inventories
    #[arg(
        long,
        global = true,
        default_value = "configs",
        env = "SVCMGR_CONFIG_DIR"
    )]
    config_dir: PathBuf,

    /// Maximum hosts contacted at once
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_WORKERS, env = "SVCMGR_MAX_WORKERS")]
    max_workers: usize,

    /// SSH connect timeout in seconds
    #[arg(long, global = true, env = "SVCMGR_SSH_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration generation and deployment
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Service control
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Metrics and health monitoring
    Monitor {
        #[command(subcommand)]
        command: MonitorCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Render a service config from a template
    Generate {
        /// Template file name under <config-dir>/templates
        #[arg(short, long, default_value = "service_config_template.json")]
        template: String,

        /// Environment name
        #[arg(short, long)]
        env: String,

        #[arg(short = 's', long)]
        service_name: String,

        #[arg(short, long)]
        port: u16,

        /// Service version written into the config
        #[arg(long, default_value = "1.0.0")]
        service_version: String,

        #[arg(long, default_value = "256MB")]
        memory: String,

        /// Write the config here instead of stdout
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },

    /// Check a config file for the required keys
    Validate { file: PathBuf },

    /// Deploy a config file to one host
    Deploy {
        file: PathBuf,

        #[arg(short, long)]
        env: String,

        /// Remote path of the config file
        #[arg(long)]
        target_path: String,

        #[arg(long, default_value_t = 0)]
        host_index: usize,
    },

    /// Download the deployed config from one host
    Fetch {
        /// Remote path of the config file
        target_path: String,

        #[arg(short, long)]
        env: String,

        #[arg(long, default_value_t = 0)]
        host_index: usize,

        /// Write the config here instead of stdout
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
}

/// Hosts and service an operation targets
#[derive(Args, Debug)]
struct Target {
    /// Environment name
    #[arg(short, long)]
    env: String,

    /// Systemd unit name
    #[arg(short = 's', long)]
    service_name: String,

    /// Inventory index of the single host to target
    #[arg(long, default_value_t = 0)]
    host_index: usize,

    /// Target every host in the environment
    #[arg(long, conflicts_with = "host_index")]
    all: bool,
}

#[derive(Subcommand, Debug)]
enum ServiceCommands {
    /// Show service state
    Status(Target),
    /// Start the service
    Start(Target),
    /// Stop the service
    Stop(Target),
    /// Restart the service
    Restart(Target),
}

#[derive(Subcommand, Debug)]
enum MonitorCommands {
    /// Collect metrics from one host
    Metrics {
        #[arg(short, long)]
        env: String,

        #[arg(short = 's', long)]
        service_name: String,

        #[arg(long, default_value_t = 0)]
        host_index: usize,
    },

    /// Metrics table for every host
    Dashboard {
        #[arg(short, long)]
        env: String,

        #[arg(short = 's', long)]
        service_name: String,
    },

    /// Check thresholds and send alerts
    Health {
        #[command(flatten)]
        target: Target,

        #[arg(long, default_value_t = 80.0)]
        cpu_threshold: f64,

        #[arg(long, default_value_t = 80.0)]
        memory_threshold: f64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Logs go to stderr so tables and JSON on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,svcmgr=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings {
        config_dir: cli.config_dir,
        max_workers: cli.max_workers,
        connect_timeout: cli.connect_timeout,
        output: cli.output,
    };

    let result = match cli.command {
        Commands::Config { command } => handle_config(&settings, command).await,
        Commands::Service { command } => handle_service(&settings, command).await,
        Commands::Monitor { command } => handle_monitor(&settings, command).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        process::exit(1);
    }
}

fn generate_params(
    service_name: &str,
    env: &str,
    port: u16,
    version: &str,
    memory: &str,
) -> Params {
    [
        ("service_name", json!(service_name)),
        ("version", json!(version)),
        ("environment", json!(env)),
        ("port", json!(port)),
        ("max_memory", json!(memory)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

async fn handle_config(settings: &Settings, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Generate {
            template,
            env,
            service_name,
            port,
            service_version,
            memory,
            out,
        } => {
            validate_service_name(&service_name)?;
            info!(template = %template, env = %env, "Generating config");

            let params = generate_params(&service_name, &env, port, &service_version, &memory);
            let config = generate_config(&settings.templates_dir(), &template, &params)
                .context("Failed to generate config")?;

            let missing = missing_keys(&config);
            if !missing.is_empty() {
                anyhow::bail!(
                    "Generated configuration is invalid, missing: {}",
                    missing.join(", ")
                );
            }

            let rendered = serde_json::to_string_pretty(&config)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, format!("{}\n", rendered))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Config saved to: {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
        ConfigCommands::Validate { file } => {
            let config = load_config(&file)?;
            let missing = missing_keys(&config);
            if settings.output == OutputFormat::Json {
                output::print_json(&json!({
                    "file": file.display().to_string(),
                    "valid": missing.is_empty(),
                    "missing": missing,
                }))?;
            } else if missing.is_empty() {
                println!("{} is valid", file.display());
            }
            if !missing.is_empty() {
                anyhow::bail!(
                    "{} is invalid, missing: {}",
                    file.display(),
                    missing.join(", ")
                );
            }
        }
        ConfigCommands::Deploy {
            file,
            env,
            target_path,
            host_index,
        } => {
            let config = load_config(&file)?;
            let missing = missing_keys(&config);
            if !missing.is_empty() {
                anyhow::bail!(
                    "Refusing to deploy invalid config, missing: {}",
                    missing.join(", ")
                );
            }

            let hosts = settings.targets(&env, host_index, false)?;
            let exec = settings.executor();
            let mut reports = Vec::with_capacity(hosts.len());
            for host in &hosts {
                info!(host = %host.host, target = %target_path, "Deploying config");
                reports.push(deploy_config(&exec, &config, host, &target_path).await?);
            }

            match settings.output {
                OutputFormat::Json => output::print_json(&reports)?,
                OutputFormat::Text => {
                    for report in &reports {
                        println!("{}", output::deploy_summary(report));
                    }
                }
            }
        }
        ConfigCommands::Fetch {
            target_path,
            env,
            host_index,
            out,
        } => {
            let hosts = settings.targets(&env, host_index, false)?;
            let exec = settings.executor();
            for host in &hosts {
                let config = fetch_config(&exec, host, &target_path)
                    .await
                    .with_context(|| format!("Failed to fetch {} from {}", target_path, host))?;

                let rendered = serde_json::to_string_pretty(&config)?;
                match &out {
                    Some(path) => {
                        std::fs::write(path, format!("{}\n", rendered))
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!("Config saved to: {}", path.display());
                    }
                    None => println!("{}", rendered),
                }
            }
        }
    }
    Ok(())
}

/// Print results and fail if any host failed
fn report_results(settings: &Settings, results: &ResultSet) -> anyhow::Result<()> {
    match settings.output {
        OutputFormat::Json => output::print_json(results)?,
        OutputFormat::Text => {
            for line in output::outcome_lines(results) {
                println!("{}", line);
            }
        }
    }

    let failed = results.iter().filter(|o| o.is_error()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} host(s) failed", failed, results.len());
    }
    Ok(())
}

async fn handle_service(settings: &Settings, command: ServiceCommands) -> anyhow::Result<()> {
    let fleet = settings.fleet();

    let results = match command {
        ServiceCommands::Status(t) => {
            let hosts = settings.targets(&t.env, t.host_index, t.all)?;
            let results = fleet.dispatch_status(&hosts, &t.service_name).await?;

            // A single-host check also shows the verbose detail
            if !t.all && settings.output == OutputFormat::Text {
                if let Some(Outcome::Status(s)) = results.first() {
                    if let Some(raw) = s.raw.as_deref().filter(|r| *r != s.status.as_str()) {
                        println!("{}\n", raw);
                    }
                }
            }
            results
        }
        ServiceCommands::Start(t) => {
            let hosts = settings.targets(&t.env, t.host_index, t.all)?;
            check_sudo_setup().await;
            fleet.dispatch_start(&hosts, &t.service_name).await?
        }
        ServiceCommands::Stop(t) => {
            let hosts = settings.targets(&t.env, t.host_index, t.all)?;
            check_sudo_setup().await;
            fleet.dispatch_stop(&hosts, &t.service_name).await?
        }
        ServiceCommands::Restart(t) => {
            let hosts = settings.targets(&t.env, t.host_index, t.all)?;
            check_sudo_setup().await;
            fleet.dispatch_restart(&hosts, &t.service_name).await?
        }
    };

    report_results(settings, &results)
}

async fn handle_monitor(settings: &Settings, command: MonitorCommands) -> anyhow::Result<()> {
    let fleet = settings.fleet();

    match command {
        MonitorCommands::Metrics {
            env,
            service_name,
            host_index,
        } => {
            let hosts = settings.targets(&env, host_index, false)?;
            let results = fleet.dispatch_metrics(&hosts, &service_name, None).await?;
            report_results(settings, &results)?;
        }
        MonitorCommands::Dashboard { env, service_name } => {
            let hosts = settings.hosts(&env)?;
            info!(hosts = hosts.len(), "Collecting metrics from all hosts");
            let report = fleet
                .collect_and_aggregate(&hosts, &service_name, None)
                .await?;

            match settings.output {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Text => {
                    println!("{}", report.table());
                    if let Some(line) = output::failed_hosts_line(&report) {
                        println!("\n{}", line);
                    }
                }
            }
        }
        MonitorCommands::Health {
            target,
            cpu_threshold,
            memory_threshold,
        } => {
            let thresholds = Thresholds {
                cpu: cpu_threshold,
                memory: memory_threshold,
            };
            let hosts = settings.targets(&target.env, target.host_index, target.all)?;
            let report = fleet
                .collect_and_aggregate(&hosts, &target.service_name, Some(thresholds))
                .await?;

            match settings.output {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Text => {
                    println!("{}\n", report.text());
                    for row in &report.rows {
                        println!("{}", output::health_summary(row));
                    }
                    if let Some(line) = output::failed_hosts_line(&report) {
                        println!("\n{}", line);
                    }
                }
            }
        }
    }
    Ok(())
}
