use std::{process, sync::Arc};

use futures::StreamExt;
use stockpile::{
    application::{
        error::AppError,
        maintenance::{ExportFormat, ImportRequest, MaintenanceService, PurgeRequest},
        repos::{CacheRepo, ItemFilter, MaintenanceRepo},
    },
    cache::{CacheConfig, CacheStore},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminState},
        telemetry,
    },
};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Export(args) => run_export(settings, args).await,
        config::Command::Import(args) => run_import(settings, args).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let cache_config = CacheConfig::from(&settings.cache);

    let cache_repo: Arc<dyn CacheRepo> = repositories.clone();
    let cache = CacheStore::new(cache_config.clone(), cache_repo);
    let maintenance = build_maintenance(&repositories, cache_config);

    let router = http::build_router(
        AdminState { maintenance, cache },
        settings.server.import_body_limit.get(),
    );
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "stockpile::serve",
        addr = %settings.server.addr,
        l1_max_entries = settings.cache.l1_max_entries.get(),
        serve_stale = settings.cache.serve_stale,
        "admin server listening"
    );

    let grace = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(grace))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "stockpile::serve", "admin server stopped");
    Ok(())
}

async fn shutdown_signal(grace: std::time::Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "stockpile::serve", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(
        target = "stockpile::serve",
        grace_seconds = grace.as_secs(),
        "shutdown requested, draining connections"
    );

    // Force exit if draining outlives the grace period.
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(target = "stockpile::serve", "graceful shutdown timed out");
        process::exit(1);
    });
}

async fn run_export(settings: config::Settings, args: config::ExportArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let maintenance = build_maintenance(&repositories, CacheConfig::from(&settings.cache));
    let filter = ItemFilter {
        source: args.source,
        item_type: args.item_type,
    };
    let path = args.file;

    info!(
        target = "stockpile::export",
        path = %path.display(),
        format = args.format.as_str(),
        "Starting export"
    );

    let file = tokio::fs::File::create(&path)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let mut writer = BufWriter::new(file);

    let written = match args.format {
        ExportFormat::Json => {
            let document = maintenance.export_json(&filter).await?;
            let bytes = serde_json::to_vec_pretty(&document)
                .map_err(|err| AppError::unexpected(format!("failed to encode export: {err}")))?;
            writer
                .write_all(&bytes)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            document.items.len()
        }
        ExportFormat::Ndjson => {
            let mut lines = maintenance.export_ndjson(&filter).await?;
            let mut count = 0usize;
            while let Some(line) = lines.next().await {
                writer
                    .write_all(&line?)
                    .await
                    .map_err(|err| AppError::from(InfraError::from(err)))?;
                count += 1;
            }
            count.saturating_sub(1)
        }
    };

    writer
        .flush()
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(target = "stockpile::export", items = written, "Export completed");
    Ok(())
}

async fn run_import(settings: config::Settings, args: config::ImportArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let maintenance = build_maintenance(&repositories, CacheConfig::from(&settings.cache));
    let path = args.file;

    info!(
        target = "stockpile::import",
        path = %path.display(),
        mode = args.mode.as_str(),
        "Starting import"
    );

    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let request = ImportRequest::parse(&text);
    if request.items.is_empty() {
        return Err(AppError::from(InfraError::input(
            &path,
            "no items found in file",
        )));
    }

    let report = maintenance.import(request, args.mode).await?;
    print_json(&report)?;
    Ok(())
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let maintenance = build_maintenance(&repositories, CacheConfig::from(&settings.cache));

    let report = maintenance
        .purge(PurgeRequest {
            days: args.days,
            dry: !args.apply,
        })
        .await?;

    if report.dry_run {
        info!(
            target = "stockpile::purge",
            candidates = report.items,
            "Dry run only; pass --apply to delete"
        );
    }
    print_json(&report)?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
    println!("{text}");
    Ok(())
}

fn build_maintenance(
    repositories: &Arc<PostgresRepositories>,
    cache_config: CacheConfig,
) -> Arc<MaintenanceService> {
    let maintenance_repo: Arc<dyn MaintenanceRepo> = repositories.clone();
    Arc::new(MaintenanceService::new(
        maintenance_repo,
        Arc::new(cache_config),
    ))
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}
