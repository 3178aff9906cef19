use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{
    config::AppConfig,
    context::ArtifactMetadata,
    fields::DialogueSinks,
    llm::LlmManager,
    neo4j_client::Neo4jStore,
    recover::{CanonicalKey, RecordDefaults},
    session::DocumentSession,
    store::{ConversationLog, DocumentStore, PersistQueue},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm_manager: LlmManager,
    pub documents: Arc<dyn DocumentStore>,
    /// Guardados de fondo del diálogo de campos, aplicados en orden.
    pub persist: PersistQueue,
    pub conversation: Arc<dyn ConversationLog>,
    /// Sólo presente con el backend Neo4j (para el health check).
    pub neo4j: Option<Arc<Neo4jStore>>,
    pub status: Arc<Mutex<Status>>,
    /// Una única sesión de documento activa por proceso.
    pub session: Arc<tokio::sync::Mutex<Option<DocumentSession>>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn sinks_for(&self, chat_id: &str) -> DialogueSinks {
        DialogueSinks {
            persist: self.persist.clone(),
            conversation: self.conversation.clone(),
            chat_id: chat_id.to_string(),
        }
    }

    pub fn record_defaults(&self) -> RecordDefaults {
        RecordDefaults::default()
            .with(CanonicalKey::Brand, self.config.export_default_brand.clone())
            .with(CanonicalKey::Designer, self.config.export_default_designer.clone())
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    /// Metadatos del borrador mientras hay una generación en curso.
    pub generation: Option<ArtifactMetadata>,
}
