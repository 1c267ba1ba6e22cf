use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::application::{BatchOutcome, DocumentStore};
use crate::domain::{
    Document, DocumentKind, DocumentMeta, DomainError, HybridQuery, Language, ScoredDocument,
    SymbolKind,
};

pub const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";
const DEFAULT_INDEX: &str = "codesmriti-documents";
const LIST_PAGE_SIZE: usize = 10_000;

/// Document store backed by an OpenSearch/Elasticsearch-style FTS engine.
///
/// The index declares `embedding` as a dense vector with fixed dims and
/// dot-product similarity (equivalent to cosine since every stored vector is
/// unit length), and keyword fields under a lowercasing normalizer. Hybrid
/// requests put the keyword predicate inside the kNN clause so the engine
/// pre-filters before scoring.
pub struct OpenSearchStore {
    client: reqwest::Client,
    base_url: String,
    index: String,
    dims: usize,
}

impl OpenSearchStore {
    pub async fn new(
        base_url: impl Into<String>,
        index: impl Into<String>,
        dims: usize,
    ) -> Result<Self, DomainError> {
        let store = Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
            dims,
        };
        store.ensure_index().await?;
        Ok(store)
    }

    pub async fn from_env(dims: usize) -> Result<Self, DomainError> {
        let base = std::env::var("CODESMRITI_OPENSEARCH_URL")
            .unwrap_or_else(|_| DEFAULT_OPENSEARCH_URL.to_string());
        Self::new(base, DEFAULT_INDEX, dims).await
    }

    async fn ensure_index(&self) -> Result<(), DomainError> {
        let mapping = json!({
            "settings": {
                "analysis": {
                    "normalizer": {
                        "keyword_lowercase": {
                            "type": "custom",
                            "filter": ["lowercase"]
                        }
                    }
                }
            },
            "mappings": {
                "properties": {
                    "type": {"type": "keyword", "normalizer": "keyword_lowercase"},
                    "tenant_id": {"type": "keyword"},
                    "repo_id": {"type": "keyword"},
                    "path": {"type": "keyword"},
                    "parent_id": {"type": "keyword"},
                    "symbol_name": {"type": "keyword"},
                    "symbol_kind": {"type": "keyword"},
                    "parent_class": {"type": "keyword"},
                    "file_commit": {"type": "keyword"},
                    "language": {"type": "keyword"},
                    "languages": {"type": "keyword"},
                    "children_ids": {"type": "keyword"},
                    "content_hash": {"type": "keyword"},
                    "summary_text": {"type": "text"},
                    "line_count": {"type": "long"},
                    "start_line": {"type": "long"},
                    "end_line": {"type": "long"},
                    "created_at": {"type": "long"},
                    "updated_at": {"type": "long"},
                    "aggregation_truncated": {"type": "boolean"},
                    "summary_degraded": {"type": "boolean"},
                    "parse_degraded": {"type": "boolean"},
                    "doc_counts": {"type": "object", "enabled": false},
                    "embedding": {
                        "type": "dense_vector",
                        "dims": self.dims,
                        "index": true,
                        "similarity": "dot_product"
                    }
                }
            }
        });

        let response = self
            .client
            .put(format!("{}/{}", self.base_url, self.index))
            .json(&mapping)
            .send()
            .await
            .map_err(|e| DomainError::storage(format!("Index creation failed: {}", e)))?;

        if response.status().is_success() {
            debug!("Created index {}", self.index);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(DomainError::storage(format!(
            "Index creation rejected: {}",
            body
        )))
    }

    fn doc_url(&self, endpoint: &str, id: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            self.index,
            endpoint,
            encode_path_segment(id)
        )
    }

    async fn search_raw(&self, body: Value) -> Result<Value, DomainError> {
        let response = self
            .client
            .post(format!("{}/{}/_search", self.base_url, self.index))
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::storage(format!("Search request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| DomainError::storage(format!("Search response unreadable: {}", e)))?;

        if status == reqwest::StatusCode::NOT_FOUND
            || payload["error"]["type"] == "index_not_found_exception"
        {
            return Err(DomainError::index_unavailable(format!(
                "Index {} does not exist",
                self.index
            )));
        }
        if !status.is_success() {
            return Err(DomainError::storage(format!(
                "Search returned {}: {}",
                status, payload
            )));
        }
        Ok(payload)
    }

    fn keyword_filters(
        tenant_id: &str,
        kind: Option<DocumentKind>,
        repo_id: Option<&str>,
    ) -> Vec<Value> {
        let mut filters = vec![json!({"term": {"tenant_id": tenant_id}})];
        if let Some(kind) = kind {
            filters.push(json!({"term": {"type": kind.as_str()}}));
        }
        if let Some(repo) = repo_id {
            filters.push(json!({"term": {"repo_id": repo}}));
        }
        filters
    }

    async fn delete_by_query(&self, query: Value) -> Result<u64, DomainError> {
        let response = self
            .client
            .post(format!(
                "{}/{}/_delete_by_query?refresh=true",
                self.base_url, self.index
            ))
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| DomainError::storage(format!("Delete-by-query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DomainError::storage(format!(
                "Delete-by-query returned {}",
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| DomainError::storage(format!("Delete response unreadable: {}", e)))?;
        Ok(payload["deleted"].as_u64().unwrap_or(0))
    }

    fn parse_hits(payload: &Value) -> Result<Vec<ScoredDocument>, DomainError> {
        let hits = payload["hits"]["hits"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        hits.iter()
            .map(|hit| {
                let score = hit["_score"].as_f64().unwrap_or(0.0) as f32;
                let doc = document_from_source(&hit["_source"])?;
                Ok(ScoredDocument::new(doc, score))
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for OpenSearchStore {
    async fn upsert_documents(&self, batch: &[Document]) -> Result<BatchOutcome, DomainError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut body = String::new();
        for doc in batch {
            let action = json!({"index": {"_index": self.index, "_id": doc.id()}});
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&index_json(doc).to_string());
            body.push('\n');
        }

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| DomainError::storage(format!("Bulk upsert failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DomainError::storage(format!(
                "Bulk upsert returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| DomainError::storage(format!("Bulk response unreadable: {}", e)))?;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for item in payload["items"].as_array().cloned().unwrap_or_default() {
            let entry = &item["index"];
            let id = entry["_id"].as_str().unwrap_or_default().to_string();
            if entry["error"].is_object() {
                warn!("Upsert failed for {}: {}", id, entry["error"]);
                failed.push(id);
            } else {
                succeeded.push(id);
            }
        }
        Ok(BatchOutcome::new(succeeded, failed))
    }

    async fn mutate_embedding(&self, id: &str, vector: &[f32]) -> Result<(), DomainError> {
        let response = self
            .client
            .post(self.doc_url("_update", id))
            .json(&json!({"doc": {"embedding": vector}}))
            .send()
            .await
            .map_err(|e| DomainError::storage(format!("Embedding update failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => {
                Err(DomainError::not_found(format!("Document {}", id)))
            }
            status => Err(DomainError::storage(format!(
                "Embedding update returned {}",
                status
            ))),
        }
    }

    async fn get_file_commits(
        &self,
        tenant_id: &str,
        repo_id: &str,
    ) -> Result<HashMap<String, String>, DomainError> {
        let body = json!({
            "size": LIST_PAGE_SIZE,
            "_source": ["path", "file_commit"],
            "query": {"bool": {"filter": Self::keyword_filters(
                tenant_id,
                Some(DocumentKind::FileIndex),
                Some(repo_id),
            )}}
        });
        let payload = self.search_raw(body).await?;
        let mut commits = HashMap::new();
        for hit in payload["hits"]["hits"].as_array().cloned().unwrap_or_default() {
            let source = &hit["_source"];
            if let (Some(path), Some(commit)) =
                (source["path"].as_str(), source["file_commit"].as_str())
            {
                commits.insert(path.to_string(), commit.to_string());
            }
        }
        Ok(commits)
    }

    async fn delete_by_file(
        &self,
        tenant_id: &str,
        repo_id: &str,
        path: &str,
    ) -> Result<u64, DomainError> {
        self.delete_by_query(json!({
            "bool": {
                "filter": [
                    {"term": {"tenant_id": tenant_id}},
                    {"term": {"repo_id": repo_id}},
                    {"term": {"path": path}},
                    {"terms": {"type": ["file_index", "symbol_index"]}}
                ]
            }
        }))
        .await
    }

    async fn delete_by_repo(&self, tenant_id: &str, repo_id: &str) -> Result<u64, DomainError> {
        self.delete_by_query(json!({
            "bool": {
                "filter": [
                    {"term": {"tenant_id": tenant_id}},
                    {"term": {"repo_id": repo_id}}
                ]
            }
        }))
        .await
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<u64, DomainError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_by_query(json!({"ids": {"values": ids}})).await
    }

    async fn hybrid_search(
        &self,
        query: &HybridQuery,
    ) -> Result<Vec<ScoredDocument>, DomainError> {
        // Keyword AND kNN: the filter rides inside the knn clause, so the
        // engine restricts the candidate set before vector scoring.
        let body = json!({
            "size": query.k(),
            "knn": {
                "field": "embedding",
                "query_vector": query.query_vector(),
                "k": query.k(),
                "num_candidates": (query.k() * 4).max(50),
                "filter": {"bool": {"filter": Self::keyword_filters(
                    query.tenant_id(),
                    Some(query.kind()),
                    query.repo_id(),
                )}}
            }
        });
        let payload = self.search_raw(body).await?;
        Self::parse_hits(&payload)
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, DomainError> {
        let response = self
            .client
            .get(self.doc_url("_doc", id))
            .send()
            .await
            .map_err(|e| DomainError::storage(format!("Fetch failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DomainError::storage(format!(
                "Fetch returned {}",
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| DomainError::storage(format!("Fetch response unreadable: {}", e)))?;
        if payload["found"].as_bool() != Some(true) {
            return Ok(None);
        }
        document_from_source(&payload["_source"]).map(Some)
    }

    async fn fetch_children(&self, id: &str) -> Result<Vec<Document>, DomainError> {
        let body = json!({
            "size": LIST_PAGE_SIZE,
            "query": {"term": {"parent_id": id}}
        });
        let payload = self.search_raw(body).await?;
        let mut children: Vec<Document> = Self::parse_hits(&payload)?
            .into_iter()
            .map(ScoredDocument::into_document)
            .collect();
        children.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(children)
    }

    async fn list_by_kind(
        &self,
        tenant_id: &str,
        repo_id: Option<&str>,
        kind: DocumentKind,
    ) -> Result<Vec<Document>, DomainError> {
        let body = json!({
            "size": LIST_PAGE_SIZE,
            "query": {"bool": {"filter": Self::keyword_filters(tenant_id, Some(kind), repo_id)}}
        });
        let payload = self.search_raw(body).await?;
        let mut docs: Vec<Document> = Self::parse_hits(&payload)?
            .into_iter()
            .map(ScoredDocument::into_document)
            .collect();
        docs.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(docs)
    }
}

/// Flatten a document into the index shape. Kind-specific attributes live
/// at the top level so keyword predicates can reach them.
fn index_json(doc: &Document) -> Value {
    let mut map = Map::new();
    map.insert("type".into(), json!(doc.kind().as_str()));
    map.insert("tenant_id".into(), json!(doc.tenant_id()));
    map.insert("repo_id".into(), json!(doc.repo_id()));
    map.insert("summary_text".into(), json!(doc.summary_text()));
    map.insert("embedding".into(), json!(doc.embedding()));
    map.insert("parent_id".into(), json!(doc.parent_id()));
    map.insert("children_ids".into(), json!(doc.children_ids()));
    map.insert("content_hash".into(), json!(doc.content_hash()));
    map.insert("created_at".into(), json!(doc.created_at()));
    map.insert("updated_at".into(), json!(doc.updated_at()));
    map.insert(
        "aggregation_truncated".into(),
        json!(doc.aggregation_truncated()),
    );
    map.insert("summary_degraded".into(), json!(doc.summary_degraded()));
    map.insert("parse_degraded".into(), json!(doc.parse_degraded()));

    match doc.meta() {
        DocumentMeta::Repo {
            languages,
            doc_counts,
        } => {
            map.insert("languages".into(), json!(languages));
            map.insert("doc_counts".into(), json!(doc_counts));
        }
        DocumentMeta::Module { path } => {
            map.insert("path".into(), json!(path));
        }
        DocumentMeta::File {
            path,
            language,
            line_count,
            file_commit,
        } => {
            map.insert("path".into(), json!(path));
            map.insert("language".into(), json!(language.as_str()));
            map.insert("line_count".into(), json!(line_count));
            map.insert("file_commit".into(), json!(file_commit));
        }
        DocumentMeta::Symbol {
            path,
            symbol_name,
            symbol_kind,
            start_line,
            end_line,
            parent_class,
        } => {
            map.insert("path".into(), json!(path));
            map.insert("symbol_name".into(), json!(symbol_name));
            map.insert("symbol_kind".into(), json!(symbol_kind.as_str()));
            map.insert("start_line".into(), json!(start_line));
            map.insert("end_line".into(), json!(end_line));
            map.insert("parent_class".into(), json!(parent_class));
        }
    }
    Value::Object(map)
}

fn document_from_source(source: &Value) -> Result<Document, DomainError> {
    let kind = source["type"]
        .as_str()
        .and_then(DocumentKind::parse)
        .ok_or_else(|| DomainError::storage("Stored document has no valid type"))?;
    let tenant_id = required_str(source, "tenant_id")?;
    let repo_id = required_str(source, "repo_id")?;

    let meta = match kind {
        DocumentKind::RepoSummary => DocumentMeta::Repo {
            languages: string_array(&source["languages"]),
            doc_counts: source["doc_counts"]
                .as_object()
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| Some((k.clone(), v.as_u64()?)))
                        .collect()
                })
                .unwrap_or_default(),
        },
        DocumentKind::ModuleSummary => DocumentMeta::Module {
            path: source["path"].as_str().unwrap_or_default().to_string(),
        },
        DocumentKind::FileIndex => DocumentMeta::File {
            path: required_str(source, "path")?,
            language: Language::parse(source["language"].as_str().unwrap_or_default()),
            line_count: source["line_count"].as_u64().unwrap_or(0) as u32,
            file_commit: required_str(source, "file_commit")?,
        },
        DocumentKind::SymbolIndex => DocumentMeta::Symbol {
            path: required_str(source, "path")?,
            symbol_name: required_str(source, "symbol_name")?,
            symbol_kind: match source["symbol_kind"].as_str() {
                Some("class") => SymbolKind::Class,
                Some("method") => SymbolKind::Method,
                _ => SymbolKind::Function,
            },
            start_line: source["start_line"].as_u64().unwrap_or(0) as u32,
            end_line: source["end_line"].as_u64().unwrap_or(0) as u32,
            parent_class: source["parent_class"].as_str().map(String::from),
        },
    };

    let embedding = source["embedding"].as_array().map(|values| {
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Vec<f32>>()
    });

    // Reconstitute the id from its deterministic parts so a stored id can
    // never drift from its provenance fields.
    let id = match &meta {
        DocumentMeta::Repo { .. } => crate::domain::repo_doc_id(&tenant_id, &repo_id),
        DocumentMeta::Module { path } => crate::domain::module_doc_id(&tenant_id, &repo_id, path),
        DocumentMeta::File { path, .. } => crate::domain::file_doc_id(&tenant_id, &repo_id, path),
        DocumentMeta::Symbol {
            path,
            symbol_name,
            parent_class,
            ..
        } => crate::domain::symbol_doc_id(
            &tenant_id,
            &repo_id,
            path,
            &crate::domain::canonical_symbol_name(symbol_name, parent_class.as_deref()),
        ),
    };

    Ok(Document::reconstitute(
        id,
        tenant_id,
        repo_id,
        kind,
        source["summary_text"].as_str().unwrap_or_default().to_string(),
        embedding,
        source["parent_id"].as_str().map(String::from),
        string_array(&source["children_ids"]),
        source["content_hash"].as_str().unwrap_or_default().to_string(),
        source["created_at"].as_i64().unwrap_or(0),
        source["updated_at"].as_i64().unwrap_or(0),
        source["aggregation_truncated"].as_bool().unwrap_or(false),
        source["summary_degraded"].as_bool().unwrap_or(false),
        source["parse_degraded"].as_bool().unwrap_or(false),
        meta,
    ))
}

fn required_str(source: &Value, field: &str) -> Result<String, DomainError> {
    source[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| DomainError::storage(format!("Stored document missing {}", field)))
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-encode a document id for use as a URL path segment.
fn encode_path_segment(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_segment() {
        assert_eq!(
            encode_path_segment("t:r:file_index:a/b.py"),
            "t%3Ar%3Afile_index%3Aa%2Fb.py"
        );
        assert_eq!(encode_path_segment("plain-id_1.2~x"), "plain-id_1.2~x");
    }

    #[test]
    fn test_index_json_round_trip() {
        let mut doc = Document::symbol_index(
            "acme",
            "owner/repo",
            "pkg/util.py",
            "hello",
            SymbolKind::Method,
            3,
            9,
            Some("Greeter".to_string()),
        )
        .with_summary("says hello to a user by name, used by the greeting endpoint")
        .with_content_hash("abc123");
        doc.set_embedding(vec![1.0, 0.0]);

        let restored = document_from_source(&index_json(&doc)).unwrap();
        assert_eq!(restored.id(), doc.id());
        assert_eq!(restored.kind(), DocumentKind::SymbolIndex);
        assert_eq!(restored.parent_id(), doc.parent_id());
        assert_eq!(restored.summary_text(), doc.summary_text());
        assert_eq!(restored.embedding(), doc.embedding());
        assert_eq!(restored.canonical_name().as_deref(), Some("Greeter.hello"));
    }

    #[test]
    fn test_round_trip_preserves_repo_stats() {
        let doc = Document::repo_summary("acme", "owner/repo")
            .with_summary("a repository summary of reasonable descriptive length here")
            .with_repo_stats(
                vec!["python".to_string()],
                [("file_index".to_string(), 4u64)].into_iter().collect(),
            );
        let restored = document_from_source(&index_json(&doc)).unwrap();
        assert_eq!(restored.languages(), Some(&["python".to_string()][..]));
        assert_eq!(restored.doc_counts().unwrap().get("file_index"), Some(&4));
    }
}
