use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing::info;

use crate::config::AppConfig;
use crate::loader::boot;

#[derive(Parser)]
#[command(name = "school-api")]
#[command(about = "School management REST API - schools, classrooms, students and their admins")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Boot and serve HTTP (the default)")]
    Serve {
        #[arg(long, short, help = "Port to listen on, overriding PORT")]
        port: Option<u16>,
    },

    #[command(about = "Boot, print the route table and exit")]
    Routes,

    #[command(about = "Boot without serving; exits non-zero on any boot error")]
    Check,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = crate::config::config().clone();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Routes => {
            let app = boot(config).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&app.routes.describe())?);
            } else {
                app.routes.print_routes();
            }
            Ok(())
        }
        Commands::Check => {
            let app = boot(config).await?;
            println!(
                "Boot OK: {} managers, {} routes",
                app.managers.len(),
                app.routes.len()
            );
            Ok(())
        }
    }
}

async fn serve(mut config: AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let router = boot(config).await?.into_router();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("School API listening on http://{}", addr);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, draining connections");
}
