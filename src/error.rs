//! Errores tipados del núcleo (generación, diálogo de campos y versiones).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Se necesita al menos una imagen adjunta para generar la ficha técnica")]
    MissingAttachment,

    #[error("No hay manejador registrado para el tipo de documento: {0}")]
    UnknownKind(String),

    #[error("Versión {index} no encontrada (el documento tiene {len} versiones)")]
    VersionNotFound { index: usize, len: usize },

    #[error("No hay versión anterior con la que comparar")]
    DiffUnavailable,

    #[error("No hay ninguna sesión de documento activa")]
    NoActiveSession,

    #[error("El valor enviado está vacío")]
    EmptyValue,

    #[error("Error en la generación: {0}")]
    Generation(String),
}
