use serde::{Deserialize, Serialize};

/// A file's stored commit hash, used by the reconciler for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCommit {
    path: String,
    commit: String,
}

impl FileCommit {
    pub fn new(path: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            commit: commit.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }
}

/// SHA-256 hex digest of raw content. The unit of change detection for
/// symbols and files.
pub fn compute_content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(content.as_bytes());
    format!("{:x}", hash)
}

/// Hash of the ordered list of child ids plus their summaries. The unit of
/// change detection for module and repo documents.
pub fn compute_aggregate_hash(children: &[(String, String)]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for (id, summary) in children {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(summary.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
