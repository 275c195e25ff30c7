//! División de documentos en trozos de longitud fija con solapamiento.
//!
//! Las posiciones se cuentan en caracteres, no en bytes: los documentos del
//! producto están en portugués y un corte a mitad de un carácter multibyte no
//! es válido en un `&str`.

use crate::errors::RagError;
use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// Tamaño y solapamiento ya validados (`0 <= overlap < size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size debe ser mayor que 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk_overlap ({chunk_overlap}) debe ser menor que chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Avance entre el inicio de dos chunks consecutivos. Siempre > 0.
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// El chunk `i` empieza en el carácter `i * step` y mide `chunk_size`; el
/// último puede ser más corto. Se detiene en el primer chunk que alcanza el
/// final del texto, así que nunca hay un chunk final contenido en el anterior.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    // Offsets en bytes de cada carácter, más el final del texto.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_len {
        let end = (start + config.chunk_size()).min(char_len);
        chunks.push(text[boundaries[start]..boundaries[end]].to_string());
        if end == char_len {
            break;
        }
        start += config.step();
    }
    chunks
}

/// Trocea un documento asignando ids `<documento>_chunk<n>` (n desde 1).
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    split_text(&document.text, config)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            id: format!("{}_chunk{}", document.id, index + 1),
            document_id: document.id.clone(),
            index,
            text,
            embedding: None,
        })
        .collect()
}
