use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::domain::{DomainError, EngineConfig, FileSlice, Language};

/// On-demand source fetch from the on-disk repository checkout.
///
/// Documents never store raw code; this is the only way code leaves the
/// system. Reads are clipped at a per-request byte cap.
pub struct FetchSourceUseCase {
    config: Arc<EngineConfig>,
}

impl FetchSourceUseCase {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Checkout location for `(tenant, repo)` under the configured root.
    pub fn checkout_path(&self, tenant_id: &str, repo_id: &str) -> PathBuf {
        self.config.checkout_root.join(tenant_id).join(repo_id)
    }

    pub async fn execute(
        &self,
        tenant_id: &str,
        repo_id: &str,
        path: &str,
        start_line: Option<u32>,
        end_line: Option<u32>,
    ) -> Result<FileSlice, DomainError> {
        let relative = sanitize_relative_path(path)?;
        let absolute = self.checkout_path(tenant_id, repo_id).join(&relative);

        let content = tokio::fs::read_to_string(&absolute).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DomainError::not_found(format!("{} not present in checkout", path))
            } else {
                DomainError::IoError(e)
            }
        })?;

        let total_lines = content.lines().count() as u32;
        if total_lines == 0 {
            return Ok(FileSlice {
                code: String::new(),
                total_lines: 0,
                language: Language::from_path(Path::new(path)),
                truncated: false,
            });
        }
        let start = start_line.unwrap_or(1).max(1);
        let end = end_line.unwrap_or(total_lines).min(total_lines);
        if start > end {
            return Err(DomainError::invalid_input(format!(
                "Line range {}-{} is empty",
                start, end
            )));
        }

        let mut code = String::new();
        let mut truncated = false;
        for line in content
            .lines()
            .skip(start as usize - 1)
            .take((end - start + 1) as usize)
        {
            if code.len() + line.len() + 1 > self.config.max_fetch_bytes {
                truncated = true;
                break;
            }
            code.push_str(line);
            code.push('\n');
        }

        debug!(
            "Fetched {}:{}-{} ({} bytes{})",
            path,
            start,
            end,
            code.len(),
            if truncated { ", truncated" } else { "" }
        );

        Ok(FileSlice {
            code,
            total_lines,
            language: Language::from_path(Path::new(path)),
            truncated,
        })
    }
}

/// Reject absolute paths and any traversal out of the checkout.
fn sanitize_relative_path(path: &str) -> Result<PathBuf, DomainError> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(DomainError::invalid_input("Absolute paths are not allowed"));
    }
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(DomainError::invalid_input(format!(
                    "Path '{}' escapes the checkout",
                    path
                )))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(DomainError::invalid_input("Empty path"));
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_relative_path("../etc/passwd").is_err());
        assert!(sanitize_relative_path("/etc/passwd").is_err());
        assert!(sanitize_relative_path("a/../../b").is_err());
        assert!(sanitize_relative_path("").is_err());
    }

    #[test]
    fn test_sanitize_accepts_normal_paths() {
        assert_eq!(
            sanitize_relative_path("src/./util.py").unwrap(),
            PathBuf::from("src/util.py")
        );
    }
}
