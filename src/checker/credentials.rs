//! Bearer credentials read from disk.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Token file that is re-read on every use, so rotated service-account
/// tokens are picked up without a restart.
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current token, or `None` (logged) if the file cannot be read or is
    /// empty.
    pub async fn read(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                if token.is_empty() {
                    warn!(path = %self.path.display(), "Token file is empty");
                    None
                } else {
                    Some(token.to_string())
                }
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_trimmed_token() {
        let path = std::env::temp_dir().join(format!("netnurse-token-{}", std::process::id()));
        tokio::fs::write(&path, "abc.def.ghi\n").await.unwrap();
        assert_eq!(FileToken::new(&path).read().await.as_deref(), Some("abc.def.ghi"));

        tokio::fs::write(&path, "  \n").await.unwrap();
        assert_eq!(FileToken::new(&path).read().await, None);
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        assert_eq!(FileToken::new("/nonexistent/token").read().await, None);
    }
}
