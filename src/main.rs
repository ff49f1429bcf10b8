mod cli;

use crate::cli::{Cli, Command, CreateArgs};
use clap::Parser;
use futures::StreamExt;
use sipkit_config::Config;
use sipkit_export::{ExportEvent, ExportFormat, ExportItem, Exporter};
use sipkit_metadata::models::{CreatorSource, DescriptiveMetadata};
use sipkit_metadata::{AutoFill, Catalog};
use sipkit_sip::{PathRegistry, Rule, RuleConfig, RuleScheduler, RunState};
use std::fmt::Debug;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SIPKIT_LOG";

/// Turns a library error tree into a report for the terminal.
trait Report<T> {
    fn report(self, context: &str) -> miette::Result<T>;
}
impl<T, E: Debug> Report<T> for Result<T, E> {
    fn report(self, context: &str) -> miette::Result<T> {
        self.map_err(|error| miette::miette!("{context}: {error:?}"))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).report("unable to load configuration")?;
    let catalog: Arc<dyn Catalog> = Arc::new(config.catalog().report("unable to load templates")?);
    match cli.command {
        Command::Create(args) => create(&config, catalog, args).await,
        Command::Templates => {
            templates(catalog.as_ref());
            Ok(())
        },
        Command::Fields { path, template } => {
            tokio::task::spawn_blocking(move || fields(catalog.as_ref(), path, template.as_deref()))
                .await
                .report("unable to read metadata")?
        },
    }
}

async fn interrupt(cancel: CancellationToken) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "unable to listen for interrupts");
        return;
    }
    warn!("interrupted, stopping after the current item");
    cancel.cancel();
}

#[instrument(skip_all, fields(sources = args.sources.len()))]
async fn create(config: &Config, catalog: Arc<dyn Catalog>, args: CreateArgs) -> miette::Result<()> {
    let format = match &args.format {
        Some(format) => format.parse::<ExportFormat>().report("invalid export format")?,
        None => config.export_format().report("invalid export format")?,
    };
    let output = args.output.clone().or_else(|| config.export.output.clone()).unwrap_or_else(|| PathBuf::from("."));

    let registry = PathRegistry::new();
    for path in &args.ignore {
        registry.ignore(path);
    }
    let rule_config = RuleConfig {
        sources: args.sources.clone(),
        grouping: args.grouping(),
        metadata: args.metadata(),
        destination: args.destination.clone(),
    };
    let rule = Rule::new(rule_config, registry, catalog.clone());

    let cancel = CancellationToken::new();
    tokio::spawn(interrupt(cancel.clone()));

    let scheduler = RuleScheduler::start();
    scheduler.submit(rule.clone()).report("unable to queue the walk")?;
    let state = tokio::select! {
        state = scheduler.wait(rule.id()) => state,
        () = cancel.cancelled() => {
            scheduler.cancel(rule.id());
            scheduler.wait(rule.id()).await
        },
    };
    scheduler.shutdown().await;
    match state {
        RunState::Done => {},
        RunState::Cancelled => {
            println!("cancelled before export");
            return Ok(());
        },
        other => miette::bail!("unable to group the selected paths ({other:?}), see the log for details"),
    }

    let sips = rule.sips();
    for sip in &sips {
        let kind = if sip.is_classification() { "classification" } else { "sip" };
        println!("{kind:<14} {:<40} files={:<5} metadata={}", sip.name, sip.file_count(), sip.metadata.len());
    }
    if args.dry_run || sips.is_empty() {
        println!("{} SIP(s), nothing exported", sips.len());
        return Ok(());
    }

    let exporter = Exporter::new(format, &output, catalog);
    let mut progress = exporter.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let progress = progress.borrow_and_update().clone();
            debug!(
                created = progress.created,
                errors = progress.errors,
                total = progress.total,
                action = %progress.action,
                remaining = ?progress.remaining,
                "export progress"
            );
        }
    });

    let destination = args.destination.clone();
    let items = sips.into_iter().map(|sip| ExportItem { sip, destination: destination.clone() }).collect();
    let mut events = pin!(exporter.export(items, cancel));
    let mut summary = None;
    while let Some(event) = events.next().await {
        match event {
            ExportEvent::Started { total } => info!(total, %format, output = %output.display(), "exporting"),
            ExportEvent::Created { path, .. } => println!("created  {}", path.display()),
            ExportEvent::Failed { name, error, .. } => println!("failed   {name}: {}", *error),
            ExportEvent::Finished(finished) => summary = Some(finished),
        }
    }
    reporter.abort();

    let Some(summary) = summary else {
        miette::bail!("export ended without a summary");
    };
    println!(
        "{} created, {} failed{}",
        summary.created.len(),
        summary.unsuccessful.len(),
        if summary.cancelled { ", cancelled" } else { "" }
    );
    if !summary.unsuccessful.is_empty() {
        miette::bail!("{} SIP(s) could not be exported", summary.unsuccessful.len());
    }
    Ok(())
}

fn templates(catalog: &dyn Catalog) {
    let mut types = catalog.template_types();
    types.sort();
    types.dedup();
    for template_type in types {
        let schema = if catalog.schema(&template_type).is_some() { "schema" } else { "" };
        println!("{template_type:<12} {:<24} {schema}", catalog.filename_pattern(&template_type));
    }
}

fn fields(catalog: &dyn Catalog, path: PathBuf, template: Option<&str>) -> miette::Result<()> {
    let mut metadata = DescriptiveMetadata::from_file(path, template, CreatorSource::SingleFile);
    let values = metadata.values(catalog, &AutoFill::default()).report("unable to read metadata")?;
    let width = values.iter().map(|value| value.id.len()).max().unwrap_or_default();
    for value in values {
        let text = value.value.as_ref().map(ToString::to_string).unwrap_or_default();
        println!("{:<width$}  {text}", value.id);
    }
    Ok(())
}
