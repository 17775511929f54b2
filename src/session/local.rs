use super::{SessionError, SessionRecord, SessionStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

/// Session store writing one JSON file per session: `<root>/<route>/<session_id>.json`.
pub struct LocalSessionStore {
    root: PathBuf,
}

impl LocalSessionStore {
    /// Store rooted at `root` (usually `paths.sessions_dir`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, route: &str, session_id: &str) -> PathBuf {
        self.root
            .join(sanitize(route))
            .join(format!("{}.json", sanitize(session_id)))
    }

    async fn read_record(path: &Path) -> Result<SessionRecord, SessionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SessionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|source| SessionError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Keep ids and route names from escaping the store root.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    async fn create(&self, route: &str) -> Result<SessionRecord, SessionError> {
        let record = SessionRecord::new(route);
        self.save(&record).await?;
        tracing::info!(route, session_id = %record.session_id, "Session created");
        Ok(record)
    }

    async fn load(&self, route: &str, session_id: &str) -> Result<SessionRecord, SessionError> {
        let path = self.record_path(route, session_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SessionError::NotFound {
                session_id: session_id.to_string(),
            });
        }
        Self::read_record(&path).await
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let path = self.record_path(&record.route, &record.session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SessionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let json = serde_json::to_vec_pretty(record).map_err(|source| SessionError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .map_err(|source| SessionError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| SessionError::Io {
                path: path.clone(),
                source,
            })
    }

    async fn evict_idle(&self, idle: Duration) -> Result<Vec<String>, SessionError> {
        let now = OffsetDateTime::now_utc();
        let mut evicted = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record = match Self::read_record(path).await {
                Ok(record) => record,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "Skipping unreadable session");
                    continue;
                }
            };
            if record.is_idle(idle, now) {
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|source| SessionError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
                evicted.push(record.session_id);
            }
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "Evicted idle sessions");
        }
        Ok(evicted)
    }
}
