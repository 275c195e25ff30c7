//! Integración con Neo4j como vector store para los `:Chunk`.
//!
//! Cada chunk es un nodo `(:Chunk {id, collection, text, embedding})`. El par
//! `(collection, id)` es único (constraint) y el upsert se hace con `MERGE`
//! sobre ese par, así que repetir la ingesta sobrescribe. Las búsquedas usan
//! un índice vectorial coseno compartido por todas las colecciones.

use async_trait::async_trait;
use neo4rs::{query, Graph, Query};
use tracing::{debug, info};
use url::Url;

use crate::config::{AppConfig, VectorStoreKind};
use crate::errors::RagError;
use crate::models::{ScoredChunk, StoredChunk};
use crate::upstream::RetryPolicy;
use crate::vector_store::VectorStore;

const INDEX_NAME: &str = "chunkEmbeddingIndex";

const UPSERT_CHUNK: &str = "\
MERGE (c:Chunk {collection: $collection, id: $id})
SET c.text = $text, c.embedding = $embedding";

/// El índice devuelve los `$candidates` vecinos de todas las colecciones; el
/// filtro por colección va después, de ahí el sobremuestreo.
const QUERY_INDEX: &str = "\
CALL db.index.vector.queryNodes($index_name, $candidates, $embedding)
YIELD node, score
WHERE node.collection = $collection
RETURN node.id AS id, node.text AS text, score
ORDER BY score DESC, id
LIMIT $k";

/// Recorrido exacto de la colección, para cuando el índice no basta.
const QUERY_SCAN: &str = "\
MATCH (node:Chunk {collection: $collection})
WITH node, vector.similarity.cosine(node.embedding, $embedding) AS score
RETURN node.id AS id, node.text AS text, score
ORDER BY score DESC, id
LIMIT $k";

const MIN_CANDIDATES: usize = 100;

pub struct Neo4jStore {
    graph: Graph,
    retry: RetryPolicy,
}

impl Neo4jStore {
    /// Conecta, asegura el constraint de ids y el índice vectorial.
    pub async fn connect(cfg: &AppConfig) -> Result<Self, RagError> {
        let VectorStoreKind::Neo4j {
            uri,
            user,
            password,
        } = &cfg.vector_store
        else {
            return Err(RagError::InvalidConfiguration(
                "VECTOR_STORE no es neo4j".to_string(),
            ));
        };

        let addr = bolt_address(uri)?;
        info!("Conectando a Neo4j en {addr}...");
        let graph = Graph::new(&addr, user, password)
            .await
            .map_err(RagError::upstream)?;
        info!("Conexión a Neo4j OK");

        let store = Self {
            graph,
            retry: cfg.upstream,
        };
        store.ensure_schema(cfg.embedding_dimensions).await?;
        Ok(store)
    }

    async fn ensure_schema(&self, dimensions: usize) -> Result<(), RagError> {
        // El constraint antiguo sólo sobre `id` impediría repetir ids entre colecciones.
        self.graph
            .run(query("DROP CONSTRAINT chunk_id IF EXISTS"))
            .await
            .map_err(RagError::upstream)?;
        self.graph
            .run(query(
                "CREATE CONSTRAINT chunk_collection_id IF NOT EXISTS
                 FOR (c:Chunk)
                 REQUIRE (c.collection, c.id) IS UNIQUE",
            ))
            .await
            .map_err(RagError::upstream)?;

        // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                    .param("name", INDEX_NAME),
            )
            .await
            .map_err(RagError::upstream)?;

        if cursor.next().await.map_err(RagError::upstream)?.is_some() {
            info!("Índice vectorial '{INDEX_NAME}' ya existe.");
            return Ok(());
        }

        let cypher = format!(
            "\
CREATE VECTOR INDEX {INDEX_NAME}
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
        );
        self.graph
            .run(query(&cypher))
            .await
            .map_err(RagError::upstream)?;
        info!("Índice vectorial '{INDEX_NAME}' creado ({dimensions} dimensiones).");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for Neo4jStore {
    async fn upsert(&self, collection: &str, chunks: Vec<StoredChunk>) -> Result<(), RagError> {
        for chunk in chunks {
            self.retry
                .run("upsert en Neo4j", || {
                    self.graph.run(
                        query(UPSERT_CHUNK)
                            .param("id", chunk.id.clone())
                            .param("collection", collection)
                            .param("text", chunk.text.clone())
                            .param("embedding", chunk.embedding.clone()),
                    )
                })
                .await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f64],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = candidate_count(k);
        let output = self
            .search(
                "búsqueda vectorial en Neo4j",
                query(QUERY_INDEX)
                    .param("index_name", INDEX_NAME)
                    .param("candidates", candidates as i64)
                    .param("k", k as i64)
                    .param("embedding", embedding.to_vec())
                    .param("collection", collection),
            )
            .await?;
        if output.len() >= k {
            return Ok(output);
        }

        // Menos de `k` tras filtrar: si la colección tiene más chunks, los
        // vecinos eran de otras colecciones.
        let total = self.count(collection).await?;
        if total <= output.len() {
            return Ok(output);
        }
        debug!(
            "El índice devolvió {} de {k} chunks de '{collection}'; recorrido exacto",
            output.len()
        );
        self.search(
            "recorrido vectorial en Neo4j",
            query(QUERY_SCAN)
                .param("k", k as i64)
                .param("embedding", embedding.to_vec())
                .param("collection", collection),
        )
        .await
    }

    async fn count(&self, collection: &str) -> Result<usize, RagError> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (c:Chunk {collection: $collection}) RETURN count(c) AS total")
                    .param("collection", collection),
            )
            .await
            .map_err(RagError::upstream)?;

        let total: i64 = match cursor.next().await.map_err(RagError::upstream)? {
            Some(row) => row.get("total").unwrap_or(0),
            None => 0,
        };
        Ok(total.max(0) as usize)
    }
}

impl Neo4jStore {
    async fn search(&self, what: &str, q: Query) -> Result<Vec<ScoredChunk>, RagError> {
        let mut cursor = self
            .retry
            .run(what, || self.graph.execute(q.clone()))
            .await?;

        let mut output = Vec::new();
        while let Some(row) = cursor.next().await.map_err(RagError::upstream)? {
            let missing = |field: &str| {
                RagError::Upstream(format!("Falta campo '{field}' en resultado de Neo4j"))
            };
            output.push(ScoredChunk {
                id: row.get("id").ok_or_else(|| missing("id"))?,
                text: row.get("text").ok_or_else(|| missing("text"))?,
                score: row.get("score").ok_or_else(|| missing("score"))?,
            });
        }
        Ok(output)
    }
}

/// Vecinos a pedir al índice para quedarse con `k` de una colección.
fn candidate_count(k: usize) -> usize {
    k.saturating_mul(10).max(MIN_CANDIDATES)
}

/// `neo4j://host:port` → `host:port` (puerto bolt 7687 por defecto).
fn bolt_address(uri: &str) -> Result<String, RagError> {
    let url = Url::parse(uri).map_err(|e| {
        RagError::InvalidConfiguration(format!("NEO4J_URI inválida '{uri}': {e}"))
    })?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bolt_address_defaults_port() {
        assert_eq!(bolt_address("neo4j://db.local").unwrap(), "db.local:7687");
        assert_eq!(
            bolt_address("bolt://127.0.0.1:7999").unwrap(),
            "127.0.0.1:7999"
        );
        assert!(matches!(
            bolt_address("no es una url"),
            Err(RagError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn index_is_oversampled_for_small_k() {
        assert_eq!(candidate_count(1), 100);
        assert_eq!(candidate_count(5), 100);
        assert_eq!(candidate_count(50), 500);
        assert_eq!(candidate_count(usize::MAX), usize::MAX);
    }

    #[test]
    fn chunks_are_keyed_by_collection_and_id() {
        assert!(UPSERT_CHUNK.contains("MERGE (c:Chunk {collection: $collection, id: $id})"));
        for cypher in [QUERY_INDEX, QUERY_SCAN] {
            assert!(cypher.contains("collection"));
            assert!(cypher.contains("LIMIT $k"));
        }
        assert!(QUERY_INDEX.contains("queryNodes($index_name, $candidates, $embedding)"));
    }
}
