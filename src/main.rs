use std::{fs, process, sync::Arc};

use linkroll::{
    application::{error::AppError, handler::RequestHandler},
    config::{self, PageArgs, Settings, StageArgs},
    domain::link::{Link, now_unix},
    infra::{
        error::InfraError,
        flatfile::{FlatStore, InsertPosition, InsertStrategy},
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
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
        config::Command::Page(args) => run_page(&settings, &args),
        config::Command::Stage(args) => run_stage(&settings, &args),
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let handler = Arc::new(RequestHandler::from_settings(&settings)?);
    let router = http::build_router(HttpState {
        handler,
        as_html: settings.html.as_html,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "linkroll::serve",
        addr = %settings.server.listen_addr,
        url = %settings.server.url,
        cache_size = settings.server.cache_size,
        autopublish = settings.autopublish.active,
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

/// One request, answered on stdout: the CGI-style entry point.
fn run_page(settings: &Settings, args: &PageArgs) -> Result<(), AppError> {
    let handler = RequestHandler::from_settings(settings)?;
    let body = handler.handle(&args.path)?;
    println!("{body}");
    Ok(())
}

fn run_stage(settings: &Settings, args: &StageArgs) -> Result<(), AppError> {
    let text = fs::read_to_string(&args.file).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "cannot read entry file `{}`: {err}",
            args.file.display()
        )))
    })?;
    let link = Link::from_entry(&text, now_unix())
        .map_err(|err| AppError::validation(format!("{}: {err}", args.file.display())))?;

    let strategy = InsertStrategy::from_memory_wise(settings.database.memory_wise);
    let mut staging = FlatStore::open(settings.autopublish.filepath.clone(), strategy)?;
    staging.insert(std::slice::from_ref(&link), InsertPosition::Back)?;

    info!(
        target = "linkroll::stage",
        path = %staging.path().display(),
        title = %link.title,
        "Entry staged"
    );
    if !settings.autopublish.active {
        info!(
            target = "linkroll::stage",
            "Autopublish is not active; the entry waits until it is"
        );
    }
    Ok(())
}
