//! Sesión de documento activa: une el contexto del artefacto, el diálogo de
//! campos y el cursor de versiones de un único par chat/documento.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    context::{ArtifactContext, ArtifactMetadata},
    error::StudioError,
    fields::{DialogueSinks, FieldOutcome, FieldSession, FieldState},
    kinds::{Action, DocumentKind, ToolbarItem},
    recover::{recover_record, ExtractedRecord, RecordDefaults},
    store::DocumentStore,
    stream::{run_generation, GenerationChunk, GenerationHeader, StreamEvent},
    versions::{Snapshot, VersionCursor},
};

pub struct DocumentSession {
    pub chat_id: String,
    pub context: ArtifactContext,
    pub fields: FieldSession,
    pub cursor: VersionCursor,
    sinks: DialogueSinks,
}

/// Vista serializable del estado de la sesión para la interfaz.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub chat_id: String,
    pub document_id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub owner_id: String,
    pub metadata: ArtifactMetadata,
    pub rendered: String,
    pub version_index: usize,
    pub version_count: usize,
    pub is_current_version: bool,
    pub diff_view: bool,
    pub field_state: FieldState,
    pub fields: Vec<String>,
    pub field_cursor: usize,
    pub current_field: Option<String>,
    pub actions: Vec<Action>,
    pub toolbar: Vec<ToolbarItem>,
}

#[derive(Debug, Serialize)]
pub struct DiffView<'a> {
    pub index: usize,
    pub before: &'a str,
    pub after: &'a str,
}

impl DocumentSession {
    pub fn new(chat_id: &str, document_id: &str, title: &str, owner_id: &str, sinks: DialogueSinks) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            context: ArtifactContext::new(document_id, title, DocumentKind::Text, owner_id),
            fields: FieldSession::default(),
            cursor: VersionCursor::default(),
            sinks,
        }
    }

    /// Genera el documento dentro de esta sesión y arranca el diálogo de campos
    /// con la lista extraída del texto final.
    pub async fn generate<S>(
        &mut self,
        header: GenerationHeader,
        chunks: S,
        events: &mpsc::Sender<StreamEvent>,
        documents: Arc<dyn DocumentStore>,
    ) -> Result<Vec<String>, StudioError>
    where
        S: futures::Stream<Item = anyhow::Result<GenerationChunk>> + Unpin,
    {
        let fields = run_generation(&mut self.context, header, chunks, events, documents).await?;
        self.fields = FieldSession::new(fields.clone());
        self.cursor = VersionCursor::at_latest(&self.context.document().versions);
        Ok(fields)
    }

    pub async fn submit_field(&mut self, value: &str) -> Result<FieldOutcome, StudioError> {
        let outcome = self.fields.submit(&mut self.context, &self.sinks, value).await?;
        self.cursor.latest(&self.context.document().versions);
        Ok(outcome)
    }

    pub async fn skip_field(&mut self) -> FieldOutcome {
        let outcome = self.fields.skip(&mut self.context, &self.sinks).await;
        self.cursor.latest(&self.context.document().versions);
        outcome
    }

    pub fn current_version(&self) -> Result<&Snapshot, StudioError> {
        self.context.document().versions.get(self.cursor.index)
    }

    pub fn diff(&self) -> Result<DiffView<'_>, StudioError> {
        let (before, after) = self.context.document().versions.diff_pair(self.cursor.index)?;
        Ok(DiffView {
            index: self.cursor.index,
            before,
            after,
        })
    }

    pub fn prev_version(&mut self) {
        self.cursor.prev();
    }

    pub fn next_version(&mut self) {
        self.cursor.next(&self.context.document().versions);
    }

    pub fn latest_version(&mut self) {
        self.cursor.latest(&self.context.document().versions);
    }

    pub fn toggle_diff(&mut self) {
        self.cursor.toggle();
    }

    /// Registro de exportación a partir de la versión vigente (nunca de la
    /// que se esté consultando en el historial).
    pub fn export(&self, defaults: &RecordDefaults) -> ExtractedRecord {
        recover_record(self.context.document().content(), defaults)
    }

    pub fn view(&self) -> SessionView {
        let doc = self.context.document();
        let kind = doc.kind;
        let shown = self
            .current_version()
            .map(|s| s.content.as_str())
            .unwrap_or_else(|_| self.context.current_content());
        SessionView {
            chat_id: self.chat_id.clone(),
            document_id: doc.id.clone(),
            title: doc.title.clone(),
            kind,
            owner_id: doc.owner_id.clone(),
            metadata: self.context.metadata().clone(),
            rendered: kind.render(shown, self.context.metadata().language.as_deref()),
            version_index: self.cursor.index,
            version_count: doc.versions.len(),
            is_current_version: self.cursor.is_current(&doc.versions),
            diff_view: self.cursor.diff_view,
            field_state: self.fields.state(),
            fields: self.fields.fields().to_vec(),
            field_cursor: self.fields.cursor(),
            current_field: self.fields.current_field().map(str::to_string),
            actions: kind.actions(&self.cursor, &self.context),
            toolbar: kind.toolbar(),
        }
    }
}
