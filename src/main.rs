// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod context;
mod error;
mod fields;
mod kinds;
mod llm;
mod models;
mod neo4j_client;
mod placeholder;
mod recover;
mod session;
mod store;
mod stream;
mod versions;

use crate::{
    app_state::{AppState, Status},
    config::StorageBackend,
    neo4j_client::Neo4jStore,
    store::{ConversationLog, DocumentStore, MemoryStore, PersistQueue},
};
use anyhow::{anyhow, Context, Result};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Stores = (
    Arc<dyn DocumentStore>,
    Arc<dyn ConversationLog>,
    Option<Arc<Neo4jStore>>,
);

async fn build_stores(cfg: &config::AppConfig) -> Result<Stores> {
    match cfg.storage {
        StorageBackend::Neo4j => {
            let neo4j_cfg = cfg
                .neo4j
                .as_ref()
                .ok_or_else(|| anyhow!("Falta la configuración de Neo4j"))?;
            let graph = neo4j_client::connect_from_config(neo4j_cfg)
                .await
                .context("Error conectando a Neo4j")?;
            neo4j_client::ensure_schema(&graph)
                .await
                .context("Error asegurando el esquema de Neo4j")?;
            let store = Arc::new(Neo4jStore::new(Arc::new(graph)));
            Ok((store.clone(), store.clone(), Some(store)))
        }
        StorageBackend::Memory => {
            info!("Usando almacenamiento en memoria (los datos se pierden al cerrar).");
            let store = Arc::new(MemoryStore::new());
            Ok((store.clone(), store, None))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Almacenamiento de documentos y conversación
    let (documents, conversation, neo4j) = build_stores(&cfg).await?;
    let persist = PersistQueue::spawn(documents.clone());

    // 4. Inicializar gestor de LLMs
    let llm_manager =
        llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        llm_manager,
        documents,
        persist,
        conversation,
        neo4j,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            generation: None,
        })),
        session: Arc::new(tokio::sync::Mutex::new(None)),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
