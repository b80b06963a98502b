use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{self, WrapErr};
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use ensemble_toolbox_core::{
    file::OsFs,
    plan_ensemble,
    scan::{Layout, MemberSet, UnitSource},
    EnsembleConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LayoutArg {
    Auto,
    YearFirst,
    MemberFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MembersArg {
    Uniform,
    PerYear,
}

/// Lists the members an ensemble root would be assembled from.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Ensemble root directory
    root: PathBuf,

    /// Grid directory, defaults to `<ROOT>/grid`
    #[arg(short, long, value_name = "DIR")]
    grid: Option<PathBuf>,

    /// JSON file with the ensemble configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,

    #[arg(long, value_enum)]
    members: Option<MembersArg>,

    /// Segment extension without the dot, may be repeated
    #[arg(long = "segment-ext", value_name = "EXT")]
    segment_extensions: Vec<String>,
}

impl Cli {
    async fn config(&self) -> eyre::Result<EnsembleConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .wrap_err_with(|| format!("Reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .wrap_err_with(|| format!("Parsing {}", path.display()))?
            }
            None => EnsembleConfig::default(),
        };

        match self.layout {
            Some(LayoutArg::Auto) => config.scan.layout = None,
            Some(LayoutArg::YearFirst) => config.scan.layout = Some(Layout::YearFirst),
            Some(LayoutArg::MemberFirst) => config.scan.layout = Some(Layout::MemberFirst),
            None => {}
        }
        match self.members {
            Some(MembersArg::Uniform) => config.scan.member_set = MemberSet::Uniform,
            Some(MembersArg::PerYear) => config.scan.member_set = MemberSet::PerYear,
            None => {}
        }
        if !self.segment_extensions.is_empty() {
            config.scan.segment_extensions = self.segment_extensions.clone();
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let config = args.config().await?;
    debug!(?config, "Using configuration");

    let grid = args.grid.clone().unwrap_or_else(|| args.root.join("grid"));
    let plan = plan_ensemble(&OsFs, &args.root, &grid, &config.scan).await?;

    if config.scan.layout.is_some() {
        println!("layout: {:?}", plan.layout);
    } else {
        println!("layout: {:?} (detected, use --layout to override)", plan.layout);
    }
    println!("members: {}", plan.members.len());
    for member in &plan.members {
        println!("{}", member.id);
        for unit in &member.units {
            match &unit.source {
                UnitSource::Raw { directory } => println!("  {}", directory.display()),
                UnitSource::Segmented { segments } => {
                    for segment in segments {
                        println!("  {}", segment.path.display());
                    }
                }
            }
        }
    }

    Ok(())
}
