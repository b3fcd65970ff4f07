use std::{future::IntoFuture, io::Write, net::SocketAddr, process, sync::Arc};

use tokio::sync::Notify;
use tracing::{Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

use vellum::{
    application::{error::AppError, livereload::EVENTS_PATH},
    cache::{RebuildError, RouteCache},
    config::{self, Command, DevArgs, RoutesArgs, Settings},
    infra::{
        error::InfraError,
        http::build_router,
        layout::PagesDirectory,
        runtime::NativeRuntime,
        server::{self, DevServer},
        telemetry,
        watch::PollingWatcher,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(target = "vellum::main", error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = dispatcher::Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(target = "vellum::main", error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(Command::Dev(Box::<DevArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Dev(_) => run_dev(settings).await,
        Command::Routes(args) => run_routes(settings, args),
    }
}

async fn run_dev(settings: Settings) -> Result<(), AppError> {
    let runtime = NativeRuntime::new();
    let DevServer {
        state,
        routes,
        livereload,
        pages,
    } = server::assemble(&settings.project, settings.site.clone(), &settings.dev, &runtime)
        .await?;

    let watcher = PollingWatcher::new(pages, settings.dev.watch_interval)
        .map_err(RebuildError::from)?
        .spawn(routes.clone(), livereload);

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    let local_addr = listener.local_addr().map_err(InfraError::from)?;

    info!(
        target = "vellum::main",
        addr = %local_addr,
        base = %settings.site.base,
        events = EVENTS_PATH,
        "Development server listening"
    );

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        signal.notify_one();
    })
    .into_future();

    // Open event streams never finish on their own, so draining is bounded.
    let grace = settings.server.graceful_shutdown;
    let served = tokio::select! {
        result = serve => result.map_err(InfraError::from),
        _ = async {
            shutdown.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "vellum::main",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out, dropping open connections"
            );
            Ok(())
        }
    };

    watcher.abort();
    if watcher.await.is_err() {
        info!(target = "vellum::main", "Filesystem watcher stopped");
    }

    served?;
    info!(target = "vellum::main", "Development server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "vellum::main", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "vellum::main", "Shutdown signal received");
}

fn run_routes(settings: Settings, args: RoutesArgs) -> Result<(), AppError> {
    let pages = PagesDirectory::new(&settings.project.root, &settings.project.pages_dir);
    let routes = RouteCache::new(
        settings.site,
        Arc::new(pages),
        settings.dev.route_cache_capacity,
    )?;
    let snapshot = routes.snapshot();

    let mut stdout = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &*snapshot.routes)
            .map_err(|err| AppError::unexpected(format!("failed to encode routes: {err}")))?;
        writeln!(stdout).map_err(InfraError::from)?;
        return Ok(());
    }

    for route in snapshot.routes.iter() {
        let target = route
            .redirect
            .as_deref()
            .map(|target| format!(" -> {target}"))
            .unwrap_or_default();
        writeln!(
            stdout,
            "{:<9} {:<40} {}{}",
            route.route_type.as_str(),
            route.pattern,
            route.component,
            target
        )
        .map_err(InfraError::from)?;
    }
    Ok(())
}
