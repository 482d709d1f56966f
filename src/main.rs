mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tokio_stream::StreamExt;

use lc_core::config::Config;
use lc_core::events::EventBus;
use lc_core::{SessionStatus, StreamRequest};
use lc_server::media::MediaStore;
use lc_server::session::{SessionManager, SessionSettings};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path);

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting loopcast server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    lc_server::start(config, config_path.map(Path::to_path_buf)).await?;
    Ok(())
}

/// Config file used when `--config` is not given.
const DEFAULT_CONFIG: &str = "loopcast.json";

/// The `--config` path, or `./loopcast.json` when that file exists.
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG);
        default.is_file().then_some(default)
    })
}

fn main() -> Result<ExitCode> {
    let mut cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "loopcast=trace,lc_server=trace,lc_av=debug,lc_core=debug,tower_http=debug".to_string()
        } else {
            "loopcast=info,lc_server=info,lc_av=info,lc_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let validate_target = match &cli.command {
        Commands::Validate { config } => config.clone(),
        _ => None,
    };
    cli.config = resolve_config_path(validate_target.or(cli.config));

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Publish {
            input,
            key,
            vertical,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            let status = rt.block_on(publish(
                StreamRequest::new(input, key, vertical),
                cli.config.as_deref(),
            ))?;
            Ok(match status {
                SessionStatus::ExitedWithError => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
        Commands::Sweep { max_age_hours } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(sweep(max_age_hours, cli.config.as_deref()))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckTools => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(cli.config.as_deref()))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { .. } => {
            validate_config(cli.config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("loopcast {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run one session in the foreground, printing its log until it ends.
async fn publish(request: StreamRequest, config_path: Option<&Path>) -> Result<SessionStatus> {
    let config = Config::load_or_default(config_path);
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let tools = lc_av::ToolRegistry::discover(&config.tools);
    let settings = SessionSettings::from_config(&config, &tools);
    let manager = Arc::new(SessionManager::new(settings, Arc::new(EventBus::default())));

    let session = manager.start(request)?;
    let mut lines = manager.tail_log(session.id, usize::MAX)?;
    let printer = tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            println!("{}", line.text);
        }
    });

    let status = tokio::select! {
        status = session.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; stopping encoder");
            manager.stop();
            session.wait().await
        }
    };

    // The log stream closes once the session is finalized.
    let _ = tokio::time::timeout(Duration::from_secs(5), printer).await;

    tracing::info!(session_id = %session.id, "Session ended: {status}");
    Ok(status)
}

async fn sweep(max_age_hours: Option<u64>, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let max_age = max_age_hours
        .map(|h| Duration::from_secs(h * 3600))
        .unwrap_or_else(|| config.media.retention());

    let store = MediaStore::new(&config.media, Arc::new(EventBus::default()));
    if !store.dir().exists() {
        println!("Upload directory {} does not exist", store.dir().display());
        return Ok(());
    }

    let removed = store.sweep(max_age).await?;
    for name in &removed {
        println!("Removed {name}");
    }
    println!(
        "Swept {} file(s) from {}",
        removed.len(),
        store.dir().display()
    );
    Ok(())
}

async fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = lc_av::ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all().await {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable streaming.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Ingest: {}", config.stream.ingest_url);
    println!("  Upload dir: {}", config.media.upload_dir.display());
    println!("  Retention: {}h", config.media.retention_hours);
    println!("  Extensions: {}", config.media.extensions.join(", "));

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
