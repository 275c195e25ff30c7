//! Ingesta de la carpeta de documentos en el vector store: lectura,
//! chunking, embeddings y upsert en la colección fija.

use std::fmt;
use std::fs;
use std::path::Path;

use mime_guess::mime;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::chunking::{chunk_document, ChunkingConfig};
use crate::errors::RagError;
use crate::models::Document;
use crate::vector_store::Collection;

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: usize,
    pub documents_loaded: usize,
    pub files_skipped: usize,
    pub chunks_stored: usize,
    /// Un `RagError::EmbeddingFailed` por chunk que no se pudo embeber.
    pub failures: Vec<RagError>,
}

impl IngestionSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} documentos cargados, {} omitidos. \
             {} chunks almacenados, {} con error.",
            self.files_scanned,
            self.documents_loaded,
            self.files_skipped,
            self.chunks_stored,
            self.failures.len()
        )
    }
}

/// Documentos leídos de una carpeta.
#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<Document>,
    pub scanned: usize,
    pub skipped: usize,
}

/// Lee los ficheros del primer nivel de `dir`, ordenados por nombre. El id
/// de cada documento es su nombre de fichero.
pub fn load_documents(dir: &Path) -> Result<LoadedDocuments, RagError> {
    if !dir.is_dir() {
        return Err(RagError::ConfigurationMissing(format!(
            "La carpeta de documentos no existe: {}",
            dir.display()
        )));
    }

    let mut loaded = LoadedDocuments::default();
    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in entries {
        loaded.scanned += 1;
        let path = entry.path();
        let id = entry.file_name().to_string_lossy().to_string();
        match read_document(path) {
            Some(text) => loaded.documents.push(Document { id, text }),
            None => loaded.skipped += 1,
        }
    }

    Ok(loaded)
}

/// Texto del fichero según su tipo MIME; `None` si no está soportado o no
/// se puede leer.
fn read_document(path: &Path) -> Option<String> {
    let Some(mime) = mime_guess::from_path(path).first() else {
        info!("Saltando fichero sin tipo reconocible: {}", path.display());
        return None;
    };

    if mime.type_() == mime::TEXT {
        match fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Saltando fichero no-texto o no-UTF8 {}: {e}", path.display());
                None
            }
        }
    } else if mime == mime::APPLICATION_PDF {
        match pdf_extract::extract_text(path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(
                    "No se pudo extraer texto del PDF {}: {e}. Saltando fichero.",
                    path.display()
                );
                None
            }
        }
    } else {
        info!("Saltando fichero con tipo no soportado ({mime}): {}", path.display());
        None
    }
}

/// Chunking, embedding y upsert de cada documento.
///
/// Un chunk cuyo embedding falla queda registrado en `failures` y el resto
/// se almacena igualmente. Un fallo del store sí aborta la ingesta.
pub async fn ingest_documents(
    collection: &Collection,
    documents: &[Document],
    chunking: &ChunkingConfig,
) -> Result<IngestionSummary, RagError> {
    let mut summary = IngestionSummary {
        documents_loaded: documents.len(),
        ..IngestionSummary::default()
    };

    for document in documents {
        let chunks = chunk_document(document, chunking);
        if chunks.is_empty() {
            warn!("Documento vacío o sin texto útil: {}", document.id);
            continue;
        }
        info!("Procesando {} ({} chunks)...", document.id, chunks.len());

        let mut stored = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            match collection.embedder().embed(&chunk.text).await {
                Ok(embedding) => {
                    chunk.embedding = Some(embedding);
                    stored.extend(chunk.into_stored());
                }
                Err(err) => {
                    error!(
                        "Error generando el embedding del chunk {} de {}: {err}",
                        chunk.index + 1,
                        chunk.document_id
                    );
                    summary.failures.push(RagError::EmbeddingFailed {
                        chunk_id: chunk.id,
                        cause: err.to_string(),
                    });
                }
            }
        }

        if !stored.is_empty() {
            summary.chunks_stored += stored.len();
            collection.upsert(stored).await?;
        }
    }

    Ok(summary)
}

/// `load_documents` + `ingest_documents` sobre la carpeta indicada.
pub async fn ingest_directory(
    collection: &Collection,
    dir: &Path,
    chunking: &ChunkingConfig,
) -> Result<IngestionSummary, RagError> {
    info!(
        "Leyendo documentos de {} (chunks de {} caracteres, solapamiento {})",
        dir.display(),
        chunking.chunk_size(),
        chunking.chunk_overlap()
    );
    let loaded = load_documents(dir)?;
    if loaded.documents.is_empty() {
        warn!("No se encontró ningún documento en {}", dir.display());
    }

    let mut summary = ingest_documents(collection, &loaded.documents, chunking).await?;
    summary.files_scanned = loaded.scanned;
    summary.files_skipped = loaded.skipped;
    info!("{summary}");
    Ok(summary)
}
