use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::reconcile::Track;

/// Produces the newest-first listening history for one account.
pub trait HistorySource {
    fn fetch_history(&self) -> Result<Vec<Track>>;
}

/// Reads a history export written by an external fetcher.
///
/// Both a bare array of tracks and an object with a `history` array are accepted.
pub struct JsonHistoryFile {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryExport {
    Bare(Vec<Track>),
    Wrapped { history: Vec<Track> },
}

impl JsonHistoryFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl HistorySource for JsonHistoryFile {
    fn fetch_history(&self) -> Result<Vec<Track>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to fetch history from {}", self.path.display()))?;
        parse_history(&raw)
            .with_context(|| format!("Failed parsing history at {}", self.path.display()))
    }
}

pub fn parse_history(raw: &str) -> Result<Vec<Track>> {
    let export: HistoryExport = serde_json::from_str(raw)?;
    Ok(match export {
        HistoryExport::Bare(tracks) => tracks,
        HistoryExport::Wrapped { history } => history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{FailureKind, classify_error};
    use tempfile::TempDir;

    #[test]
    fn parses_bare_and_wrapped_exports() {
        let bare = parse_history(
            r#"[{"title":"A","artist":"B","album":"C","playedAt":"Today"},{"title":"D"}]"#,
        )
        .unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[1].artist, None);

        let wrapped =
            parse_history(r#"{"history":[{"title":"A","artist":"B","album":"C"}]}"#).unwrap();
        assert_eq!(wrapped[0].key().unwrap().album, "C");
    }

    #[test]
    fn reads_export_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, r#"[{"title":"A","artist":"B","album":"C"}]"#).unwrap();
        assert_eq!(JsonHistoryFile::new(&path).fetch_history().unwrap().len(), 1);
    }

    #[test]
    fn missing_export_is_a_fetch_failure() {
        let err = JsonHistoryFile::new(Path::new("no-such-dir/history.json"))
            .fetch_history()
            .unwrap_err();
        assert_eq!(classify_error(&err), FailureKind::Network);
    }
}
