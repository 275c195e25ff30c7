//! Vector store de los chunks.
//!
//! API pública:
//!   - `VectorStore`: backend (local en fichero JSON o Neo4j).
//!   - `Collection`: colección con nombre fijo + función de embedding, que
//!     permite consultar directamente por texto.
//!   - `open_store(&AppConfig)`: construye el backend configurado.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AppConfig, VectorStoreKind};
use crate::errors::RagError;
use crate::llm::{Embedder, OpenAiEmbedder};
use crate::models::{ScoredChunk, StoredChunk};
use crate::neo4j_client::Neo4jStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserta o sobrescribe por id. Repetir la misma ingesta no duplica.
    async fn upsert(&self, collection: &str, chunks: Vec<StoredChunk>) -> Result<(), RagError>;

    /// Los `k` chunks más parecidos a `embedding`, de mayor a menor score.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f64],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    async fn count(&self, collection: &str) -> Result<usize, RagError>;
}

/// Construye el backend indicado en la configuración.
pub async fn open_store(cfg: &AppConfig) -> Result<Arc<dyn VectorStore>, RagError> {
    match &cfg.vector_store {
        VectorStoreKind::Local { path } => Ok(Arc::new(LocalStore::open(path)?)),
        VectorStoreKind::Neo4j { .. } => Ok(Arc::new(Neo4jStore::connect(cfg).await?)),
    }
}

// ---------------------------------------------------------------------
// COLECCIÓN
// ---------------------------------------------------------------------

/// Colección con nombre sobre un backend, con su función de embedding.
#[derive(Clone)]
pub struct Collection {
    name: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl Collection {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            embedder,
        }
    }

    /// Colección configurada (`COLLECTION_NAME`) con embeddings de OpenAI.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, RagError> {
        let store = open_store(cfg).await?;
        Ok(Self::new(
            cfg.collection_name.clone(),
            store,
            Arc::new(OpenAiEmbedder::from_config(cfg)),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<(), RagError> {
        debug!("Upsert de {} chunks en '{}'", chunks.len(), self.name);
        self.store.upsert(&self.name, chunks).await
    }

    /// Búsqueda por texto: el embedding de la consulta lo calcula la colección.
    pub async fn query_text(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        let embedding = self.embedder.embed(text).await?;
        self.query_embedding(&embedding, k).await
    }

    pub async fn query_embedding(
        &self,
        embedding: &[f64],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut results = self.store.query(&self.name, embedding, k).await?;
        results.truncate(k);
        Ok(results)
    }

    pub async fn count(&self) -> Result<usize, RagError> {
        self.store.count(&self.name).await
    }
}

// ---------------------------------------------------------------------
// BACKEND LOCAL
// ---------------------------------------------------------------------

type Collections = BTreeMap<String, BTreeMap<String, StoredChunk>>;

/// Vector store en memoria, persistido opcionalmente como JSON en disco.
/// La similitud es coseno y los empates se resuelven por id.
///
/// Con fichero, cada operación relee el snapshot si otro proceso (p. ej. un
/// `ingest` con el servidor en marcha) lo ha reescrito.
pub struct LocalStore {
    path: Option<PathBuf>,
    collections: RwLock<Collections>,
    /// Marca del fichero tal como lo leímos o escribimos por última vez.
    seen: Mutex<Option<Fingerprint>>,
}

/// (mtime, tamaño) del snapshot.
type Fingerprint = (SystemTime, u64);

#[derive(Serialize, Deserialize)]
struct Snapshot {
    updated_at: DateTime<Utc>,
    collections: Collections,
}

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

fn read_snapshot(path: &Path) -> Result<Snapshot, RagError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        RagError::InvalidConfiguration(format!(
            "Fichero de vector store corrupto {}: {e}",
            path.display()
        ))
    })
}

impl LocalStore {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            collections: RwLock::new(Collections::new()),
            seen: Mutex::new(None),
        }
    }

    /// Abre (o prepara) el fichero de persistencia. Si aún no existe, el
    /// store empieza vacío y el fichero se crea en el primer upsert.
    pub fn open(path: &Path) -> Result<Self, RagError> {
        let seen = fingerprint(path);
        let collections = if path.exists() {
            let snapshot = read_snapshot(path)?;
            info!(
                "Vector store local cargado desde {} (actualizado {})",
                path.display(),
                snapshot.updated_at.to_rfc3339()
            );
            snapshot.collections
        } else {
            info!("Vector store local nuevo en {}", path.display());
            Collections::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            collections: RwLock::new(collections),
            seen: Mutex::new(seen),
        })
    }

    fn lock_seen(&self) -> MutexGuard<'_, Option<Fingerprint>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Orden de locks: siempre `collections` antes que `seen`.
    fn reload_if_changed(&self) -> Result<(), RagError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let current = fingerprint(path);
        if current.is_none() || *self.lock_seen() == current {
            return Ok(());
        }

        let mut guard = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let mut seen = self.lock_seen();
        if *seen == current {
            return Ok(());
        }
        let snapshot = read_snapshot(path)?;
        info!(
            "Vector store local recargado desde {} (actualizado {})",
            path.display(),
            snapshot.updated_at.to_rfc3339()
        );
        *guard = snapshot.collections;
        *seen = current;
        Ok(())
    }

    fn persist(&self, collections: &Collections) -> Result<(), RagError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot {
            updated_at: Utc::now(),
            collections: collections.clone(),
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| RagError::Io(std::io::Error::other(e)))?;
        // Escritura atómica: fichero temporal + rename.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        *self.lock_seen() = fingerprint(path);
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn upsert(&self, collection: &str, chunks: Vec<StoredChunk>) -> Result<(), RagError> {
        self.reload_if_changed()?;
        let mut guard = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let entries = guard.entry(collection.to_string()).or_default();
        for chunk in chunks {
            entries.insert(chunk.id.clone(), chunk);
        }
        self.persist(&guard)
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f64],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        self.reload_if_changed()?;
        let guard = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredChunk> = entries
            .values()
            .map(|chunk| ScoredChunk {
                id: chunk.id.clone(),
                text: chunk.text.clone(),
                score: cosine_similarity(embedding, &chunk.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, collection: &str) -> Result<usize, RagError> {
        self.reload_if_changed()?;
        let guard = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(collection).map_or(0, BTreeMap::len))
    }
}

/// Similitud coseno; 0.0 si algún vector es nulo o las longitudes difieren.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if denom <= f64::EPSILON {
        return 0.0;
    }
    dot / denom
}
