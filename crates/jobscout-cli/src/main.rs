use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jobscout_adapters::ProviderKind;
use jobscout_storage::ListingStore;
use jobscout_sync::{ConfigProfile, Pipeline, PipelineConfig, RunOptions, RunSummary, Secrets};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// The scraping actor rejects smaller per-URL counts.
const MIN_JOBS_PER_SEARCH: u32 = 100;

#[derive(Debug, Parser)]
#[command(name = "jobscout")]
#[command(about = "Scrape job listings, score them against a CV and publish the best matches")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the pipeline once (default).
    Run(RunArgs),
    /// Run on the configured cron schedule until interrupted.
    Schedule(RunArgs),
    /// Print listing store statistics.
    Stats {
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long, default_value_t = 5)]
        runs: u32,
    },
    /// Create the listing database if it does not exist.
    InitDb,
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Analyze the most recent cached scrape instead of scraping.
    #[arg(long)]
    skip_scraping: bool,
    #[arg(long)]
    skip_sheets: bool,
    /// Overwrite sheet rows for listings that are already published.
    #[arg(long)]
    force_update: bool,
    /// Load a saved profile from the profiles directory.
    #[arg(long)]
    profile: Option<String>,
    /// Save the effective overrides under this profile name.
    #[arg(long)]
    save_profile: Option<String>,
    #[arg(long, value_delimiter = ',')]
    countries: Option<Vec<String>>,
    /// Roles to search, grouped under a single "Custom" category.
    #[arg(long, value_delimiter = ',')]
    job_roles: Option<Vec<String>>,
    #[arg(long, value_delimiter = ',')]
    job_types: Option<Vec<String>>,
    #[arg(long = "experience", value_delimiter = ',')]
    experience_levels: Option<Vec<String>>,
    #[arg(long = "remote", value_delimiter = ',')]
    remote_settings: Option<Vec<String>>,
    #[arg(long)]
    recent_only: bool,
    #[arg(long)]
    time_filter: Option<String>,
    #[arg(long)]
    cv_file: Option<PathBuf>,
    /// Listings per search; raised to the actor minimum of 100.
    #[arg(long)]
    max_jobs: Option<u32>,
    #[arg(long)]
    max_analyze: Option<usize>,
    #[arg(long)]
    match_threshold: Option<f64>,
    #[arg(long)]
    llm_model: Option<String>,
    #[arg(long)]
    llm_provider: Option<ProviderKind>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigProfile {
        ConfigProfile {
            countries: self.countries.clone(),
            job_roles: self
                .job_roles
                .clone()
                .map(|roles| BTreeMap::from([("Custom".to_string(), roles)])),
            job_types: self.job_types.clone(),
            experience_levels: self.experience_levels.clone(),
            remote_settings: self.remote_settings.clone(),
            recent_jobs_only: self.recent_only.then_some(true),
            time_filter: self.time_filter.clone(),
            max_jobs_per_search: self.max_jobs.map(|n| n.max(MIN_JOBS_PER_SEARCH)),
            total_target_jobs: None,
            max_jobs_to_analyze: self.max_analyze,
            match_score_threshold: self.match_threshold,
            cv_path: self.cv_file.clone(),
            prompt_name: None,
            llm_provider: self.llm_provider,
            llm_model: self.llm_model.clone(),
        }
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            skip_scraping: self.skip_scraping,
            skip_sheets: self.skip_sheets,
            force_update: self.force_update,
        }
    }

    /// Environment, then the named profile, then flags.
    async fn resolve(&self, mut config: PipelineConfig) -> Result<PipelineConfig> {
        let profiles_dir = config.profiles_dir();
        let base = match &self.profile {
            Some(name) => {
                let profile = ConfigProfile::load(&profiles_dir, name).await?;
                info!(profile = %name, "loaded profile");
                profile
            }
            None => ConfigProfile::default(),
        };

        let effective = base.merge(self.overrides());
        effective.apply(&mut config);

        if let Some(name) = &self.save_profile {
            let path = effective.save(&profiles_dir, name).await?;
            info!(path = %path.display(), "saved profile");
        }
        Ok(config)
    }
}

fn init_logging(config: &PipelineConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run complete: run_id={} fetched={} new={} analyzed={} failed={} matches={} published={}",
        summary.run_id,
        summary.fetched,
        summary.new_listings,
        summary.analyzed,
        summary.failed_analyses,
        summary.matches,
        summary.published
    );
    if let Some(path) = &summary.csv_path {
        println!("csv: {}", path.display());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;
    init_logging(&config)?;

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let config = args.resolve(config).await?;
            let pipeline = Pipeline::from_config(config, &Secrets::from_env()).await?;
            let summary = pipeline.run_once(&args.options()).await?;
            print_summary(&summary);
        }
        Commands::Schedule(args) => {
            let config = args.resolve(config).await?;
            let pipeline = Pipeline::from_config(config, &Secrets::from_env()).await?;
            jobscout_sync::run_scheduled(Arc::new(pipeline), args.options()).await?;
        }
        Commands::Stats { days, runs } => {
            let store = ListingStore::open(&config.database_path)
                .await
                .with_context(|| format!("opening {}", config.database_path.display()))?;
            let stats = store.recent_stats(days).await?;
            let recent = store.recent_runs(runs).await?;
            print!("{}", jobscout_sync::stats_markdown(&stats, &recent));
        }
        Commands::InitDb => {
            ListingStore::open(&config.database_path)
                .await
                .with_context(|| format!("creating {}", config.database_path.display()))?;
            println!("database ready: {}", config.database_path.display());
        }
    }

    Ok(())
}
