use std::sync::Arc;

use actix_web::{App, HttpServer};
use anyhow::Context;
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;

use libraryservice_reservations::app_config::config_app;
use libraryservice_reservations::identity::IdentityConfig;
use libraryservice_reservations::library_repository::{
    InMemoryLibraryRepository, LibraryRepository, PostgresLibraryRepository,
};
use libraryservice_reservations::settings::load_settings;
use libraryservice_reservations::telemetry::{init_telemetry, shutdown_telemetry};

const APP_NAME: &str = "libraryservice_reservations";

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings().context("Failed to load settings")?;
    init_telemetry(APP_NAME, &settings.telemetry)?;

    let library_repository: Arc<dyn LibraryRepository> = if settings.application.use_in_memory_db
    {
        tracing::warn!("Using in memory library, data is lost on restart");
        Arc::new(InMemoryLibraryRepository::default())
    } else {
        match PostgresLibraryRepository::init(&settings.database).await {
            Ok(repository) => Arc::new(repository),
            Err(err) => {
                tracing::error!("Failed to init library database {:?}", err);
                shutdown_telemetry();
                return Err(err);
            }
        }
    };

    let identity_config = IdentityConfig::from_settings(&settings.application);

    tracing::info!(
        "Starting HTTP server at http://{}:{}",
        settings.application.host,
        settings.application.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(library_repository.clone()))
            .app_data(web::Data::new(identity_config.clone()))
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
    })
    .bind((settings.application.host.as_str(), settings.application.port))?
    .run()
    .await?;

    shutdown_telemetry();
    Ok(())
}
