//! Command dispatch for the shelfcache binary.

use anyhow::Context;
use bytesize::ByteSize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{BackfillArgs, Cli, Commands, FilesArgs, UploadArgs};
use crate::config::Config;
use crate::content::ContentHasher;
use crate::dedup::{BackfillConfig, BackfillReport, BackfillStatus};
use crate::error::ExitCode;
use crate::index::{FileId, FileRecord, SqliteFileIndex};
use crate::library::Library;
use crate::logging::init_logging;
use crate::progress::Progress;
use crate::signal::install_handler;

/// Run the command line on a fresh tokio runtime.
///
/// # Errors
///
/// Any failure of the command; [`ExitCode::for_error`] maps it to a process
/// exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.merge_cli(cli.cache_root.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(execute(cli, config))
}

async fn execute(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    let quiet = cli.quiet;
    match cli.command {
        Commands::Digest(args) => {
            let hasher = ContentHasher::new(config.digest_algorithm)
                .with_buffer_size(config.hash_buffer_size);
            let digest = hasher
                .digest(&args.path)
                .await
                .with_context(|| format!("Failed to hash {}", args.path.display()))?;
            println!("{}  {}", digest, args.path.display());
        }
        Commands::Upload(args) => upload(&open(&config)?, args).await?,
        Commands::Fetch(args) => {
            let path = open(&config)?
                .materialize(&args.owner, &args.key)
                .await
                .with_context(|| format!("Failed to fetch {}", args.key))?;
            println!("{}", path.display());
        }
        Commands::Evict(args) => {
            let library = open(&config)?;
            let before = library.usage(args.owner.as_ref()).await?;
            library.evict(args.owner.as_ref()).await?;
            if !quiet {
                println!(
                    "Evicted {} files ({})",
                    before.files,
                    ByteSize::b(before.bytes)
                );
            }
        }
        Commands::Usage(args) => {
            let usage = open(&config)?.usage(args.owner.as_ref()).await?;
            println!("{} files, {}", usage.files, ByteSize::b(usage.bytes));
        }
        Commands::Files(args) => files(&open(&config)?, args).await?,
        Commands::Backfill(args) => return backfill(&open(&config)?, args, quiet).await,
        Commands::Url(args) => {
            let url = open(&config)?
                .signed_url(FileId(args.file_id), args.ttl.map(Duration::from_secs))
                .await?;
            println!("{}", url);
        }
        Commands::Migrate(args) => {
            let path = config.index_path.clone();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let cleared = tokio::task::spawn_blocking(move || {
                SqliteFileIndex::migrate_algorithm(&path, args.algorithm)
            })
            .await
            .context("Migration task failed")??;
            if !quiet {
                println!(
                    "Cleared {} digests. Set digest_algorithm = \"{}\" and run `shelfcache backfill`.",
                    cleared, args.algorithm
                );
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
        }
    }
    Ok(ExitCode::Success)
}

fn open(config: &Config) -> anyhow::Result<Library> {
    Library::open(config).context("Failed to open library")
}

async fn upload(library: &Library, args: UploadArgs) -> anyhow::Result<()> {
    let record = match args.key {
        Some(ref key) => library.register_upload(&args.owner, &args.path, key).await,
        None => library.upload(&args.owner, &args.path).await,
    }
    .with_context(|| format!("Failed to upload {}", args.path.display()))?;

    println!("{}\t{}", record.id, record.remote_key);
    Ok(())
}

async fn files(library: &Library, args: FilesArgs) -> anyhow::Result<()> {
    let records = library.files(&args.owner).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let mut out = std::io::stdout().lock();
    for record in &records {
        writeln!(out, "{}", format_record(record))?;
    }
    Ok(())
}

fn format_record(record: &FileRecord) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        record.id,
        record
            .digest
            .as_ref()
            .map_or("-", |d| d.short()),
        ByteSize::b(record.size),
        record.remote_key,
        record.filename
    )
}

async fn backfill(library: &Library, args: BackfillArgs, quiet: bool) -> anyhow::Result<ExitCode> {
    let handler = install_handler()?;
    let config = BackfillConfig::default()
        .with_shutdown_flag(handler.get_flag())
        .with_progress_callback(Arc::new(Progress::new(quiet || args.json)));

    let report = library.backfill_all(&config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }

    Ok(if report.interrupted {
        ExitCode::Interrupted
    } else if report.failed() > 0 {
        ExitCode::GeneralError
    } else {
        ExitCode::Success
    })
}

fn print_report(report: &BackfillReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            BackfillStatus::Completed { digest } => {
                println!("ok\t{}\t{}\t{}", outcome.file_id, digest.short(), outcome.filename);
            }
            BackfillStatus::Duplicate { existing_key, .. } => println!(
                "dup\t{}\t{}\t(same content as {})",
                outcome.file_id,
                outcome.filename,
                existing_key.as_deref().unwrap_or("another file")
            ),
            BackfillStatus::Failed { message } => {
                println!("failed\t{}\t{}\t{}", outcome.file_id, outcome.filename, message);
            }
        }
    }
    println!(
        "{} completed, {} duplicates, {} failed, {} skipped",
        report.completed(),
        report.duplicates(),
        report.failed(),
        report.skipped()
    );
}
