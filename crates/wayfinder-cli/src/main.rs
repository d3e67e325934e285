mod export;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wayfinder_client::acnc::ACNC_RESOURCE_ID;
use wayfinder_client::ckan::DATA_GOV_AU;
use wayfinder_client::{ReqwestFetcher, SourceSettings, build_registry};
use wayfinder_core::throttle::RetryPolicy;
use wayfinder_core::{
    AdapterRegistry, ExtractConfig, JobFilters, JobOutput, JobSpec, NullStore, PipelineConfig,
    PipelineManager, ServiceStore,
};
use wayfinder_db::{Database, ServiceRepository};

use crate::export::{OutputFormat, export};

#[derive(Parser)]
#[command(name = "wayfinder", version, about = "Community service directory ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion job against a source
    Ingest {
        /// Registered source name (see `wayfinder sources`)
        #[arg(short, long)]
        source: String,

        /// Maximum number of records to extract
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Flag likely duplicates against everything seen this run
        #[arg(long, default_value_t = false)]
        dedup: bool,

        /// Score completeness and attach quality scores
        #[arg(long, default_value_t = false)]
        quality: bool,

        /// Persist services and duplicate pairs (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,

        /// Drop services scoring below this (0.0 to 1.0); implies scoring
        #[arg(long, env = "WAYFINDER_MIN_QUALITY_SCORE")]
        min_quality: Option<f64>,

        /// Keep services in this category or service type
        #[arg(long)]
        category: Option<String>,

        /// Keep services in this state, city or suburb
        #[arg(long)]
        region: Option<String>,

        /// Keep services whose age range reaches this age
        #[arg(long)]
        min_age: Option<u32>,

        /// Keep services whose age range starts at or below this age
        #[arg(long)]
        max_age: Option<u32>,

        /// Free-text query passed to the source, where supported
        #[arg(short, long)]
        query: Option<String>,

        /// Records per upstream request
        #[arg(long)]
        page_size: Option<usize>,

        /// Records per processing batch
        #[arg(long, env = "WAYFINDER_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Write services here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        #[command(flatten)]
        sources: SourceArgs,
    },

    /// List the sources available with the current configuration
    Sources {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Find stored services with the same name in the same suburb
    Collisions {
        /// Service name
        #[arg(short, long)]
        name: String,

        /// Suburb or town
        #[arg(short, long)]
        suburb: String,
    },
}

/// Where each source lives. Unset optional sources are not registered.
#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// CKAN portal base URL
    #[arg(long, env = "WAYFINDER_CKAN_BASE_URL", default_value = DATA_GOV_AU)]
    ckan_base_url: String,

    /// CKAN datastore resource for the generic `ckan` source
    #[arg(long, env = "WAYFINDER_CKAN_RESOURCE_ID")]
    ckan_resource_id: Option<String>,

    /// Datastore resource holding the ACNC charity register
    #[arg(long, env = "WAYFINDER_ACNC_RESOURCE_ID", default_value = ACNC_RESOURCE_ID)]
    acnc_resource_id: String,

    /// Endpoint for the `json-api` source
    #[arg(long, env = "WAYFINDER_JSON_API_URL")]
    json_api_url: Option<String>,

    /// Dot path to the records array in JSON API responses
    #[arg(long, env = "WAYFINDER_JSON_API_RECORDS_PATH", default_value = "")]
    json_api_records_path: String,

    /// Page number query parameter; unset fetches a single response
    #[arg(long, env = "WAYFINDER_JSON_API_PAGE_PARAM")]
    json_api_page_param: Option<String>,

    /// CSV export for the `csv` source
    #[arg(long, env = "WAYFINDER_CSV_PATH")]
    csv_path: Option<PathBuf>,

    /// Minimum gap between requests to the same host, in milliseconds
    #[arg(long, env = "WAYFINDER_REQUEST_DELAY_MS", default_value_t = 500)]
    request_delay_ms: u64,

    /// Attempts per request before giving up on a page
    #[arg(long, env = "WAYFINDER_RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// HTTP timeout in seconds
    #[arg(long, env = "WAYFINDER_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    http_timeout_secs: u64,

    /// Allow sources on private or loopback addresses
    #[arg(long, env = "WAYFINDER_ALLOW_PRIVATE_URLS", default_value_t = false)]
    allow_private_urls: bool,
}

impl SourceArgs {
    fn settings(&self) -> SourceSettings {
        SourceSettings {
            ckan_base_url: self.ckan_base_url.clone(),
            ckan_resource_id: self.ckan_resource_id.clone(),
            acnc_resource_id: self.acnc_resource_id.clone(),
            json_api_url: self.json_api_url.clone(),
            json_api_records_path: self.json_api_records_path.clone(),
            json_api_page_param: self.json_api_page_param.clone(),
            csv_path: self.csv_path.clone(),
            request_delay: Duration::from_millis(self.request_delay_ms),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    fn registry(&self) -> Result<AdapterRegistry> {
        let mut fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(self.http_timeout_secs))
            .context("Failed to create HTTP client")?;
        if self.allow_private_urls {
            fetcher = fetcher.allow_private_urls();
        }
        Ok(build_registry(fetcher, &self.settings()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("wayfinder=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            source,
            limit,
            dedup,
            quality,
            save,
            min_quality,
            category,
            region,
            min_age,
            max_age,
            query,
            page_size,
            batch_size,
            output,
            format,
            sources,
        } => {
            let mut config = ExtractConfig::default();
            if let Some(query) = query {
                config = config.with_query(query);
            }
            if let Some(page_size) = page_size {
                config = config.with_page_size(page_size);
            }

            let mut spec = JobSpec::new(source, limit)
                .with_deduplication(dedup)
                .with_quality_assessment(quality)
                .with_store_results(save)
                .with_config(config)
                .with_filters(JobFilters {
                    category,
                    region,
                    min_age,
                    max_age,
                });
            if let Some(score) = min_quality {
                spec = spec.with_min_quality_score(score);
            }

            let mut pipeline = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
            if let Some(size) = batch_size {
                pipeline = pipeline.with_batch_size(size);
            }

            let registry = sources.registry()?;
            let job_output = if save {
                let db = connect_db().await?;
                let output = cmd_ingest(pipeline, registry, db.service_repo(), spec).await;
                db.close().await;
                output?
            } else {
                cmd_ingest(pipeline, registry, NullStore, spec).await?
            };

            export(&job_output.services, format, output.as_deref())?;
        }
        Commands::Sources { sources } => {
            for name in sources.registry()?.names() {
                println!("{name}");
            }
        }
        Commands::Collisions { name, suburb } => {
            let db = connect_db().await?;
            let result = cmd_collisions(&name, &suburb, &db.service_repo()).await;
            db.close().await;
            result?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    Database::open_from_env()
        .await
        .context("Failed to open database (is DATABASE_URL set?)")
}

async fn cmd_ingest<S: ServiceStore + 'static>(
    config: PipelineConfig,
    registry: AdapterRegistry,
    store: S,
    spec: JobSpec,
) -> Result<JobOutput> {
    let manager = PipelineManager::new(config, registry, store)
        .context("Failed to start pipeline")?;
    let source = spec.source.clone();

    let outcome = match manager.create_job(spec) {
        Ok(handle) => {
            let job_id = handle.id();
            let wait = handle.wait();
            tokio::pin!(wait);

            tokio::select! {
                outcome = &mut wait => outcome,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!(%job_id, "Interrupted, cancelling job");
                    let _ = manager.cancel_job(job_id);
                    wait.await
                }
            }
        }
        Err(e) => Err(e),
    };

    manager.cleanup().await;

    let output = outcome.with_context(|| format!("Ingestion from '{source}' failed"))?;
    let result = &output.result;
    tracing::info!(
        extracted = result.records_extracted,
        processed = result.services_processed,
        invalid = result.invalid_dropped,
        filtered = result.filtered_out,
        below_quality = result.below_quality_dropped,
        duplicates = result.duplicates_found,
        stored = result.services_stored,
        duration_ms = result.duration_ms,
        "Ingestion summary"
    );
    if let Some(average) = result.average_quality_score {
        tracing::info!(average_quality = %format!("{average:.3}"), "Quality");
    }
    for pair in &output.duplicate_pairs {
        tracing::info!(
            service_a = %pair.service_a,
            service_b = %pair.service_b,
            confidence = %format!("{:.2}", pair.confidence),
            "Possible duplicate"
        );
    }

    Ok(output)
}

async fn cmd_collisions(name: &str, suburb: &str, repo: &ServiceRepository) -> Result<()> {
    let hits = repo
        .find_collisions(name, suburb)
        .await
        .context("Collision lookup failed")?;

    if hits.is_empty() {
        println!("No stored services named '{name}' in {suburb}");
        return Ok(());
    }

    println!("Stored services named '{name}' in {suburb}:\n");
    for stored in &hits {
        let service = &stored.service;
        println!(
            "  {} [{}:{}] {} (first seen {}, quality {:.2})",
            service.id,
            service.source_name,
            service.external_id,
            service.organization.name,
            stored.first_seen_at.format("%Y-%m-%d %H:%M:%S UTC"),
            service.quality_score(),
        );
    }
    println!("\nTotal: {} services", hits.len());

    Ok(())
}
