//! Modelos de dominio: documento, turnos de diálogo y petición de generación.

use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};

use crate::{error::StudioError, kinds::DocumentKind, versions::VersionStore};

/// Documento generado. Su contenido vive en el historial de versiones.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub kind: DocumentKind,
    pub owner_id: String,
    pub versions: VersionStore,
}

impl Document {
    pub fn new(id: &str, title: &str, kind: DocumentKind, owner_id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            kind,
            owner_id: owner_id.to_string(),
            versions: VersionStore::new(),
        }
    }

    pub fn content(&self) -> &str {
        self.versions.current_content()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Turno añadido al historial de conversación; no se modifica después.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub content: String,
}

impl DialogueTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl Attachment {
    /// Tipo MIME declarado o, si falta, el deducido del nombre del fichero.
    pub fn mime_type(&self) -> Option<String> {
        self.content_type
            .clone()
            .or_else(|| MimeGuess::from_path(&self.name).first().map(|m| m.to_string()))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type()
            .map(|m| m.starts_with("image/"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub title: String,
    #[serde(default = "default_kind_tag")]
    pub kind: String,
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn default_kind_tag() -> String {
    "text".to_string()
}

impl GenerationRequest {
    /// La ficha se genera a partir de un boceto: sin imagen no se crea nada.
    pub fn require_image_attachment(&self) -> Result<&Attachment, StudioError> {
        self.attachments
            .iter()
            .find(|a| a.is_image())
            .ok_or(StudioError::MissingAttachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str, content_type: Option<&str>) -> Attachment {
        Attachment {
            name: name.to_string(),
            url: format!("https://files.local/{name}"),
            content_type: content_type.map(str::to_string),
        }
    }

    fn request(attachments: Vec<Attachment>) -> GenerationRequest {
        GenerationRequest {
            title: "Chaqueta".to_string(),
            kind: "text".to_string(),
            prompt: "ficha técnica".to_string(),
            attachments,
        }
    }

    #[test]
    fn image_is_guessed_from_file_name() {
        assert!(attachment("boceto.PNG", None).is_image());
        assert!(!attachment("notas.txt", None).is_image());
        assert!(attachment("blob", Some("image/webp")).is_image());
    }

    #[test]
    fn request_without_image_is_rejected() {
        let req = request(vec![attachment("notas.pdf", None)]);
        assert!(matches!(
            req.require_image_attachment(),
            Err(StudioError::MissingAttachment)
        ));

        let req = request(vec![attachment("notas.pdf", None), attachment("sketch.jpg", None)]);
        assert_eq!(req.require_image_attachment().unwrap().name, "sketch.jpg");
    }
}
