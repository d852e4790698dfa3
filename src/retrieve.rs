//! Top-K retrieval with document-level deduplication.
//!
//! Queries the vector index for the most similar chunks, resolves each chunk
//! to its owning document, and deduplicates while preserving the
//! highest-rank occurrence of each document. The index instance is passed in
//! explicitly; the retriever holds no hidden state.

use std::collections::HashMap;

use crate::embedding::Embedder;
use crate::errors::IndexError;
use crate::index::VectorIndex;
use crate::models::ContextDocument;
use crate::store::DocumentStore;

pub struct Retriever<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn Embedder,
    documents: &'a DocumentStore,
}

impl<'a> Retriever<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn Embedder,
        documents: &'a DocumentStore,
    ) -> Self {
        Self {
            index,
            embedder,
            documents,
        }
    }

    /// Return the documents backing the top-`k` chunks for `prompt`, ordered
    /// by best rank, deduplicated. Returns fewer than `k` documents when the
    /// index holds fewer distinct chunks, and an empty vec for an empty
    /// index. Low relevance is never an error.
    pub async fn retrieve(
        &self,
        prompt: &str,
        k: usize,
    ) -> Result<Vec<ContextDocument>, IndexError> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed_query(prompt).await?;
        let hits = self.index.search(&query, k);

        let mut out: Vec<ContextDocument> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for hit in hits {
            match seen.get(&hit.document_id) {
                Some(&pos) => {
                    // Lower-ranked chunk of an already-seen document: keep the
                    // document at its best rank, append the excerpt.
                    out[pos].excerpts.push(hit.text);
                }
                None => {
                    let document = self
                        .documents
                        .get(&hit.document_id)
                        .await
                        .map_err(|e| IndexError::Resolve(e.to_string()))?
                        .ok_or_else(|| {
                            IndexError::Resolve(format!(
                                "document {} indexed but not stored",
                                hit.document_id
                            ))
                        })?;

                    seen.insert(hit.document_id.clone(), out.len());
                    out.push(ContextDocument {
                        document,
                        excerpts: vec![hit.text],
                        score: hit.score,
                    });
                }
            }
        }

        Ok(out)
    }
}
