use std::process;

use outcache::{
    cache::OutputCache,
    config,
    infra::{
        error::InfraError,
        http::{self, AdminState, DemoState},
        telemetry,
    },
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
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

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    let cache = build_cache(&settings)?;

    match command {
        config::Command::Serve(_) => serve_http(&settings, cache).await,
        config::Command::CheckConfig => {
            let mut profiles: Vec<_> = cache.profiles().names().collect();
            profiles.sort_unstable();
            info!(
                public_addr = %settings.server.public_addr,
                admin_addr = %settings.server.admin_addr,
                cache_enabled = settings.cache.enabled,
                profiles = ?profiles,
                "configuration is valid"
            );
            Ok(())
        }
    }
}

fn build_cache(settings: &config::Settings) -> Result<OutputCache, InfraError> {
    let builder = OutputCache::builder(settings.cache.clone());
    let cache = http::with_demo_profiles(builder, &settings.cache).build()?;
    info!(
        enabled = settings.cache.enabled,
        profiles = cache.profiles().len(),
        max_entries = settings.cache.max_entries,
        "output cache ready"
    );
    Ok(cache)
}

async fn serve_http(settings: &config::Settings, cache: OutputCache) -> Result<(), InfraError> {
    let public_router = http::build_router(&cache, DemoState::default())?;
    let admin_router = http::build_admin_router(AdminState { cache });

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr).await?;

    info!(
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service());

    try_join!(public_server, admin_server)
        .map_err(|err| InfraError::server(err.to_string()))?;

    Ok(())
}
