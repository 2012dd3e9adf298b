mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;

use cli::{Cli, Commands};
use pf_core::config::Config;
use pf_core::{validate_source_filename, ConversionMode, ConversionRequest, Setting, TargetFormat};
use pf_magick::{Converter, EncodingPlan, ToolRegistry, ENGINE};

/// Config file, then environment overrides.
fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env_overrides();
    config
}

async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Starting pixforge {}", env!("CARGO_PKG_VERSION"));
    pf_server::start(config).await?;
    Ok(())
}

async fn convert_file(
    config: Config,
    input: &Path,
    format: TargetFormat,
    mode: ConversionMode,
    setting: Setting,
    output: Option<&Path>,
) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let request = ConversionRequest::new(format, mode, setting, filename, Bytes::from(bytes))?;
    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_file_name(request.download_filename()));

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let converter = Converter::new(&config, tools);
    converter.workspaces().ensure_root()?;

    let image = converter.convert(request).await?;
    let written = image.persist(&dest).await?;

    println!("Wrote {} ({} bytes)", dest.display(), written);
    Ok(())
}

fn print_plan(format: TargetFormat, mode: ConversionMode, setting: Setting, source: &str) -> Result<()> {
    let ext = validate_source_filename(Some(source))?;
    let plan = EncodingPlan::new(
        format!("input{ext}"),
        format!("output.{format}"),
        format,
        mode,
        setting,
    );
    println!("{}", plan.command_line(Path::new(ENGINE)));
    Ok(())
}

async fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all().await {
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
        println!("All tools are available!");
    } else {
        println!("Some tools are missing. magick is required; heif-enc enables avif and heif.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
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
    println!("  Max upload: {}MB", config.limits.max_upload_mb);
    println!("  Timeout: {}s", config.limits.timeout_secs);
    println!("  Temp dir: {}", config.storage.temp_dir.display());

    let warnings = config.validate();
    for warning in &warnings {
        println!("  ⚠ {warning}");
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise use defaults based on the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "pixforge=trace,pf_server=trace,pf_magick=trace,pf_core=debug,tower_http=debug".to_string()
        } else {
            "pixforge=debug,pf_server=debug,pf_magick=debug,tower_http=info".to_string()
        }
    });

    // Logs go to stderr so command output on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = load_config(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(config))
        }
        Commands::Convert {
            input,
            format,
            mode,
            setting,
            output,
        } => {
            let config = load_config(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert_file(
                config,
                &input,
                format,
                mode,
                setting,
                output.as_deref(),
            ))
        }
        Commands::Plan {
            format,
            mode,
            setting,
            source,
        } => print_plan(format, mode, setting, &source),
        Commands::CheckTools => {
            let config = load_config(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(&config))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("pixforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
