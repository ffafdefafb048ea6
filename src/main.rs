//! Token Authorizer - bearer-token authorization service for API gateways

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use token_authorizer::{
    authorizer::{AuthorizerEvent, Effect, Fingerprint, TokenAuthorizer},
    cli::{Cli, Command},
    config::Config,
    server::Server,
    setup_tracing, store,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Fingerprint { ref token }) => {
            println!("{}", Fingerprint::of(token));
            ExitCode::SUCCESS
        }
        Some(Command::Check {
            ref token,
            ref resource,
        }) => run_check(&cli, token, resource).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Authorize one token and print the gateway response
async fn run_check(cli: &Cli, token: &str, resource: &str) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let store = match store::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to connect token store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let authorizer = TokenAuthorizer::new(store, config.authorizer, config.store.timeout);
    let event = AuthorizerEvent {
        kind: Some("TOKEN".to_string()),
        authorization_token: token.to_string(),
        method_arn: resource.to_string(),
    };
    let response = authorizer.handle(&event).await;

    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to serialize response: {e}");
            return ExitCode::FAILURE;
        }
    }

    if response.effect() == Some(Effect::Allow) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

/// Run the authorizer server
async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        store = ?config.store.backend,
        "Starting token authorizer"
    );

    // One store handle for the life of the process
    let store = match store::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to connect token store: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = Server::new(config, store).run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Token authorizer shutdown complete");
    ExitCode::SUCCESS
}
