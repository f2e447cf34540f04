//! The friend-matching backend.
//!
//! Run with:
//!   APP_ENV=development LOG_LEVEL=debug cargo run
//!
//! Try:
//!   curl http://localhost:3001/health
//!   curl http://localhost:3001/does-not-exist

use rapport::config::Config;
use rapport::logging::LogService;
use rapport::middleware::{ErrorHandler, RequestLogger, cors, security_headers};
use rapport::{App, Router, Server, health};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), rapport::Error> {
    // A missing .env file is fine.
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let logs = LogService::init(&config.log)?;
    let logger = logs.logger("app");

    let router = Router::new()
        .layer(RequestLogger::new(logs.logger("requestLogger")))
        .layer(security_headers)
        .layer(cors)
        .get("/health", health::check(config.environment))
        .catch(ErrorHandler::new(
            logs.logger("errorHandler"),
            config.environment.is_diagnostic(),
        ));

    let app = App::new(router)
        .body_limit(config.body_limit)
        .trust_proxy(config.trust_proxy)
        .logging(logs.clone());

    logger.info(
        format!("Server running on port {}", config.port),
        json!({ "environment": config.environment.as_str(), "logLevel": config.log.level.as_str() }),
    );

    let result = Server::bind(&config.listen_addr())?.serve(app).await;
    if let Err(e) = &result {
        logger.error("Server stopped with an error", json!({ "error": e.to_string() }));
    }
    logs.shutdown();
    result
}
