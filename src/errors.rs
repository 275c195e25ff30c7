//! Taxonomía de errores del pipeline RAG.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Falta una credencial, ruta o variable obligatoria.
    #[error("Configuración ausente: {0}")]
    ConfigurationMissing(String),

    /// Un valor de configuración existe pero no es válido.
    #[error("Configuración inválida: {0}")]
    InvalidConfiguration(String),

    #[error("Credencial inválida o ausente")]
    Unauthorized,

    /// Campo de la petición ausente o vacío.
    #[error("Petición inválida: {0}")]
    Validation(String),

    /// Fallo en una llamada externa (embeddings, chat o vector store).
    #[error("Fallo del servicio externo: {0}")]
    Upstream(String),

    #[error("El motor de chat aún no está inicializado")]
    NotInitialized,

    #[error("No se pudo generar el embedding del chunk {chunk_id}: {cause}")]
    EmbeddingFailed { chunk_id: String, cause: String },

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn upstream<E: std::fmt::Display>(err: E) -> Self {
        RagError::Upstream(err.to_string())
    }
}
