mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use mb_av::{FfprobeProber, HwAccel, Prober, ToolRegistry};
use mb_core::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediabox=trace,mb_server=trace,mb_av=trace,mb_core=debug,tower_http=debug".to_string()
        } else {
            "mediabox=info,mb_server=info,mb_av=info,mb_core=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediabox {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(
        "Starting mediabox on {}:{} with {} library root(s)",
        config.server.host,
        config.server.port,
        config.library.base_paths.len()
    );

    mb_server::start(config).await?;
    Ok(())
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Input file does not exist: {}", file.display());
    }

    let config = Config::load_or_default(config_path);
    let hw = configured_hw_accel(&config)?;
    let tools = ToolRegistry::discover(&config.tools);
    let prober = FfprobeProber::new(tools.path_or_name("ffprobe"));
    let result = prober
        .probe(file)
        .await
        .with_context(|| format!("failed to probe {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    if let Some(format) = result.format.format_name.as_deref() {
        println!("Container: {format}");
    }
    if let Some(duration) = result.format.duration {
        println!("Duration: {duration:.3}s");
    }
    if let Some(bit_rate) = result.format.bit_rate {
        println!("Bit rate: {} kb/s", bit_rate / 1000);
    }

    println!("\nStreams: {}", result.streams.len());
    for stream in &result.streams {
        print!(
            "  [{}] {} {}",
            stream.index,
            stream.codec_type.as_deref().unwrap_or("unknown"),
            stream.codec_name.as_deref().unwrap_or("?")
        );
        if let (Some(w), Some(h)) = (stream.width, stream.height) {
            print!(" {w}x{h}");
        }
        if let Some(channels) = stream.channels {
            print!(" {channels}ch");
        }
        println!();
    }

    match mb_av::resolve_decoder(hw, &result) {
        Ok(decoder) => println!("\nDecoder ({hw}): {decoder}"),
        Err(e) => println!("\nNot playable with {hw}: {e}"),
    }

    Ok(())
}

/// The configured hardware backend; a typo is an error, not a silent default.
fn configured_hw_accel(config: &Config) -> Result<HwAccel> {
    config
        .transcode
        .hw_accel
        .parse()
        .with_context(|| format!("invalid transcode.hw_accel '{}'", config.transcode.hw_accel))
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
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
        println!("Some tools are missing. Transcoding requests will fail until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Library roots: {}", config.library.base_paths.len());
    println!("  Hardware acceleration: {}", config.transcode.hw_accel);
    println!(
        "  Video: {} max {}x{}, audio {}",
        config.transcode.video_bitrate,
        config.transcode.max_long_edge,
        config.transcode.max_short_edge,
        config.transcode.audio_bitrate
    );
    println!("  Range window: {} bytes", config.streaming.range_window_bytes);

    Ok(())
}
