// Módulos de la aplicación
mod api;
mod app_state;
mod chat;
mod chunking;
mod cli;
mod config;
mod errors;
mod ingest;
mod llm;
mod models;
mod neo4j_client;
mod rag;
mod session;
mod upstream;
mod vector_store;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, EngineSlot};
use crate::chat::ChatEngine;
use crate::config::AppConfig;
use crate::vector_store::Collection;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(name = "chat_vendas_rag", version, about = "Chat de vendas RAG - Menos Café Mais Chá")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Indexa la carpeta de documentos en el vector store.
    Ingest {
        /// Carpeta a indexar (por defecto DOCS_DIR).
        #[arg(long)]
        docs: Option<PathBuf>,
    },
    /// Chat interactivo en la consola.
    Chat,
    /// API HTTP y chat web.
    Serve {
        /// Abre el chat web en el navegador.
        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 1. Cargar configuración (.env incluido)
    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Error al cargar la configuración: {e}");
            return ExitCode::FAILURE;
        }
    };

    // 2. Inicializar logging
    let default_level = if cfg.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.command {
        // En el chat de consola los logs no se mezclan con la conversación.
        Command::Chat => subscriber.with_writer(std::io::stderr).init(),
        _ => subscriber.init(),
    }

    let result = match cli.command {
        Command::Ingest { docs } => run_ingest(cfg, docs).await,
        Command::Chat => run_chat(cfg).await,
        Command::Serve { open } => run_server(cfg, open).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_ingest(cfg: AppConfig, docs: Option<PathBuf>) -> Result<ExitCode> {
    let docs_dir = docs.unwrap_or_else(|| cfg.docs_dir.clone());
    let collection = Collection::from_config(&cfg)
        .await
        .context("Error abriendo el vector store")?;

    let summary = ingest::ingest_directory(&collection, &docs_dir, &cfg.chunking)
        .await
        .context("Error en la ingesta")?;

    for failure in &summary.failures {
        warn!("{failure}");
    }
    println!("{summary}");
    if summary.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    println!("Total de chunks en '{}': {}", collection.name(), collection.count().await?);
    Ok(ExitCode::SUCCESS)
}

async fn run_chat(cfg: AppConfig) -> Result<ExitCode> {
    let engine = ChatEngine::from_config(&cfg)
        .await
        .context("Error al inicializar el sistema")?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    cli::run_chat_loop(&engine, stdin, std::io::stdout()).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_server(cfg: AppConfig, open: bool) -> Result<ExitCode> {
    let api_key = cfg.require_api_key()?.to_string();
    let server_addr = cfg.server_addr.clone();

    // El motor arranca en segundo plano; hasta entonces las rutas de chat
    // responden "no inicializado".
    let engine = EngineSlot::empty();
    {
        let engine = engine.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            match ChatEngine::from_config(&cfg).await {
                Ok(chat_engine) => {
                    engine.set(chat_engine);
                    info!("✅ Sistema ChatRAG carregado com sucesso");
                }
                Err(e) => error!("❌ Falha ao carregar ChatRAG: {e}"),
            }
        });
    }

    let app_state = AppState::new(cfg, &api_key, engine);
    {
        let app_state = app_state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                let purged = app_state.purge_expired_sessions();
                if purged > 0 {
                    let active = app_state.api_sessions.len() + app_state.web_sessions.len();
                    debug!("{purged} sesiones inactivas descartadas; {active} activas");
                }
            }
        });
    }

    let app = api::create_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let local_addr = listener.local_addr()?;
    info!("🚀 Servidor escuchando en http://{local_addr}");
    info!("   GET  /health  ·  POST /chat  ·  POST /chat/clear  ·  GET /chat/history  ·  /ui/");

    if open {
        let ui_url = format!("http://localhost:{}/ui/", local_addr.port());
        if webbrowser::open(&ui_url).is_err() {
            info!("No se pudo abrir el navegador. Accede a {ui_url} manualmente.");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(ExitCode::SUCCESS)
}
