//! Modelos de dominio: documentos, chunks y mensajes de conversación.

use serde::{Deserialize, Serialize};

/// Un fichero de la carpeta de documentos, ya convertido a texto.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
}

/// Trozo de un documento. El embedding se añade durante la ingesta.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub embedding: Option<Vec<f64>>,
}

impl Chunk {
    /// `None` mientras el chunk no tenga embedding.
    pub fn into_stored(self) -> Option<StoredChunk> {
        Some(StoredChunk {
            embedding: self.embedding?,
            id: self.id,
            text: self.text,
        })
    }
}

/// Lo que persiste un vector store para cada chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f64>,
}

/// Resultado de una búsqueda por similitud (mayor `score` = más parecido).
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}
