mod bootstrap;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use ratings_core::settings::{Command, PipelineConfig, Settings};
use ratings_data::database::{ContestantDatabase, MergePolicy};
use ratings_data::enrichment::Enricher;
use ratings_data::reader::{find_result_sheets, load_result_rows, normalizer_from_config};
use ratings_data::sheet_filter::SheetFilter;
use ratings_runtime::pipeline::IngestPipeline;
use ratings_runtime::services::LocalDirectory;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    bootstrap::setup_logging(settings.tracing_level(), settings.log_file.as_deref())?;
    tracing::info!("contest-ratings v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config(&settings)?;

    match settings.command {
        Command::Ingest {
            sheets,
            results_root,
            database,
            directory,
        } => ingest(&config, &sheets, &results_root, &database, &directory).await,
        Command::Enrich {
            results_root,
            output,
            database,
        } => {
            let db = ContestantDatabase::load(&database, MergePolicy::from_config(&config))?;
            let summary = Enricher::new(&db, &config).enrich_tree(&results_root, &output)?;
            println!(
                "enriched {} sheets ({} of {} rows matched, {} skipped) into {}",
                summary.sheets,
                summary.matched,
                summary.rows,
                summary.sheets_skipped,
                output.display()
            );
            Ok(())
        }
        Command::Filter { input, output } => {
            let filter = SheetFilter::from_config(&config.filter)?;
            let tree = filter.filter_tree(&input, &output)?;
            for report in &tree.reports {
                let s = &report.summary;
                println!(
                    "{}: kept {}/{} (missing {}, floor {}, spread {}){}",
                    report.path.display(),
                    s.retained,
                    s.input,
                    s.dropped_missing,
                    s.dropped_floor,
                    s.dropped_spread,
                    if report.undersized { " [small population]" } else { "" }
                );
            }
            println!(
                "{} sheets filtered, {} excluded, {} skipped",
                tree.reports.len(),
                tree.excluded,
                tree.skipped
            );
            Ok(())
        }
        Command::Export { database, output } => {
            let db = ContestantDatabase::load(&database, MergePolicy::from_config(&config))?;
            bootstrap::ensure_parent_dir(&output)?;
            db.export_csv(&output)?;
            println!("exported {} contestants to {}", db.len(), output.display());
            Ok(())
        }
        Command::Override {
            external_id,
            name,
            country,
            database,
        } => {
            if name.is_none() && country.is_none() {
                anyhow::bail!("override needs --name and/or --country");
            }
            let mut db = ContestantDatabase::load(&database, MergePolicy::from_config(&config))?;
            db.override_identity(&external_id, name.as_deref(), country.as_deref())?;
            db.save(&database)?;
            println!("updated {external_id}");
            Ok(())
        }
    }
}

/// `--config`, then the per-user config file, then defaults.
fn load_config(settings: &Settings) -> Result<PipelineConfig> {
    if settings.config.is_some() {
        return Ok(settings.pipeline_config()?);
    }
    match bootstrap::discover_config_path() {
        Some(path) => {
            tracing::info!("Using configuration from {}", path.display());
            PipelineConfig::load_from(&path)
                .with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}

async fn ingest(
    config: &PipelineConfig,
    sheets: &[PathBuf],
    results_root: &Path,
    database: &Path,
    directory: &Path,
) -> Result<()> {
    let db = ContestantDatabase::load(database, MergePolicy::from_config(config))?;
    let services = Arc::new(
        LocalDirectory::load(directory)
            .with_context(|| format!("loading profile directory {}", directory.display()))?,
    );
    let normalizer = normalizer_from_config(&config.normalizer);

    let mut rows = Vec::new();
    let mut schema_errors = 0;
    for target in sheets {
        for path in find_result_sheets(target) {
            match load_result_rows(&path, results_root, &normalizer) {
                Ok(load) => {
                    schema_errors += load.schema_errors.len();
                    rows.extend(load.rows);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    let shared = Arc::new(Mutex::new(db));
    let mut pipeline = IngestPipeline::new(config, shared, services.clone(), services);
    if let Some(every) = config.checkpoint_every {
        pipeline = pipeline.with_checkpoints(every, database.to_path_buf());
    }

    let mut summary = pipeline.run(rows).await;
    summary.schema_errors = schema_errors;

    pipeline
        .save_snapshot(database.to_path_buf())
        .await
        .with_context(|| format!("saving database {}", database.display()))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
