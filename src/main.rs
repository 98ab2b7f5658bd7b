use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;
use tracing::info;

use insurer_registry::{pipeline, validate_file, BuildConfig, Expectations, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config = BuildConfig::from_env()?;

    match args.get(1).map(String::as_str) {
        None | Some("build") => run_build(&config).await,
        Some("validate") => run_validate(&config, &args[2..]),
        Some("version") => {
            println!("insurer-registry {}", VERSION);
            Ok(())
        }
        Some(other) => bail!("unknown command {:?} (expected build, validate or version)", other),
    }
}

async fn run_build(config: &BuildConfig) -> Result<()> {
    let summary = pipeline::run(config).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// validate [artifact path] [min files per source]
fn run_validate(config: &BuildConfig, args: &[String]) -> Result<()> {
    let path = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| config.output.clone());

    let min_files = match args.get(1) {
        Some(v) => v.parse()?,
        None => 1,
    };

    let methodology = config.load_methodology()?;
    let expectations = Expectations::from_methodology(&methodology).with_min_files(min_files);

    let artifact = validate_file(&path, &expectations)?;
    info!(
        path = %path.display(),
        count = artifact.meta.count,
        sources = artifact.sources.len(),
        "artifact valid"
    );
    Ok(())
}
