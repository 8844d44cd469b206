mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use path_monitor::{ChangeEvent, MonitorConfig, PathMonitor};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            paths,
            json,
            count,
            config,
            identifier,
        } => {
            let config = MonitorConfig::load(&config);
            watch(&identifier, paths, &config, json, count).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("path_monitor=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn watch(
    identifier: &str,
    mut paths: Vec<PathBuf>,
    config: &MonitorConfig,
    json: bool,
    count: Option<usize>,
) -> Result<()> {
    paths.extend(config.paths.iter().cloned());
    if paths.is_empty() {
        bail!("no paths to watch: pass PATH arguments or list `paths` in path-monitor.toml");
    }

    let monitor =
        PathMonitor::with_config(identifier, config).context("failed to start path monitor")?;
    for path in &paths {
        monitor
            .add_path(path)
            .with_context(|| format!("cannot watch {}", path.display()))?;
    }
    info!(identifier = monitor.identifier(), paths = paths.len(), "watching");

    let mut seen = 0usize;
    while count.is_none_or(|limit| seen < limit) {
        tokio::select! {
            result = monitor.next_event() => match result {
                Ok(event) => {
                    print_event(&event, json)?;
                    seen += 1;
                }
                Err(err) if err.is_cancelled() => break,
                Err(err) => return Err(err.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    monitor.shutdown();
    Ok(())
}

fn print_event(event: &ChangeEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{:<17} {}", event.kind, event.full_path().display());
    }
    Ok(())
}
