//! Contexto explícito del artefacto en curso: el documento más sus metadatos de
//! visualización. Se pasa por referencia a cada operación del núcleo.

use serde::Serialize;

use crate::{kinds::DocumentKind, models::Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    #[default]
    Idle,
    Streaming,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactMetadata {
    pub status: ArtifactStatus,
    /// Una vez visible, el borrador no vuelve a ocultarse en la sesión.
    pub is_visible: bool,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactContext {
    document: Document,
    metadata: ArtifactMetadata,
    draft: String,
}

impl ArtifactContext {
    pub fn new(id: &str, title: &str, kind: DocumentKind, owner_id: &str) -> Self {
        Self {
            document: Document::new(id, title, kind, owner_id),
            metadata: ArtifactMetadata::default(),
            draft: String::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ArtifactMetadata {
        &mut self.metadata
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn append_draft(&mut self, delta: &str) {
        self.draft.push_str(delta);
    }

    pub fn set_draft(&mut self, draft: String) {
        self.draft = draft;
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    /// Lo que el usuario ve ahora: el borrador mientras se genera, la última
    /// versión guardada en otro caso.
    pub fn current_content(&self) -> &str {
        match self.metadata.status {
            ArtifactStatus::Streaming => &self.draft,
            ArtifactStatus::Idle => self.document.versions.current_content(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_content_follows_status() {
        let mut ctx = ArtifactContext::new("d", "t", DocumentKind::Text, "o");
        ctx.document_mut().versions.save("guardado");
        ctx.append_draft("borrador");

        assert_eq!(ctx.current_content(), "guardado");
        ctx.metadata_mut().status = ArtifactStatus::Streaming;
        assert_eq!(ctx.current_content(), "borrador");
    }
}
