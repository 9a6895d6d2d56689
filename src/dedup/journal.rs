// src/dedup/journal.rs
//! Durable repository backed by an append-only JSON-lines journal.
//!
//! Every mark/unmark is appended and synced to disk before the call returns,
//! so an acknowledged mark survives a crash. A failed append is truncated
//! away, so the file never holds a mark the caller was told failed.
//!
//! On open the journal is replayed; a torn final line (crash mid-append) is
//! ignored, any other unreadable line is reported as corruption. If the
//! journal had a torn tail or superseded lines it is rewritten with only the
//! live marks before new lines are appended.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{IdempotentRepository, MarkOutcome, RepositoryError};
use crate::key::DedupKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Op {
    Mark,
    Unmark,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    op: Op,
    source: String,
    key: String,
}

fn encode(line: &JournalLine) -> Result<Vec<u8>, RepositoryError> {
    let mut buf = serde_json::to_vec(line)
        .map_err(|e| RepositoryError::Unavailable(format!("encode journal line: {e}")))?;
    buf.push(b'\n');
    Ok(buf)
}

async fn write_synced(file: &mut File, buf: &[u8]) -> std::io::Result<()> {
    file.write_all(buf).await?;
    file.flush().await?;
    file.sync_data().await
}

struct State {
    marks: HashMap<String, HashSet<String>>,
    file: File,
    /// Length of the journal up to the last complete, acknowledged line.
    len: u64,
}

impl State {
    async fn append(&mut self, line: &JournalLine) -> Result<(), RepositoryError> {
        let buf = encode(line)?;
        if let Err(e) = write_synced(&mut self.file, &buf).await {
            if let Err(te) = self.file.set_len(self.len).await {
                tracing::error!(target: "pipeline", error = %te, "failed to truncate journal after a failed append");
            }
            return Err(e.into());
        }
        self.len += buf.len() as u64;
        Ok(())
    }
}

pub struct JournalRepository {
    path: PathBuf,
    state: Mutex<State>,
}

impl std::fmt::Debug for JournalRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalRepository")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JournalRepository {
    /// Open (or create) the journal at `path`, replay it and compact it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        let content = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let replayed = replay(&content)?;
        let live: usize = replayed.marks.values().map(HashSet::len).sum();

        let mut len = content.len() as u64;
        if replayed.unterminated || replayed.records > live {
            len = compact(&path, &replayed.marks).await?;
            tracing::info!(
                target: "pipeline",
                path = %path.display(),
                before = replayed.records,
                after = live,
                unterminated = replayed.unterminated,
                "dedup journal compacted"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::info!(
            target: "pipeline",
            path = %path.display(),
            sources = replayed.marks.len(),
            marks = live,
            "dedup journal opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(State {
                marks: replayed.marks,
                file,
                len,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Replayed {
    marks: HashMap<String, HashSet<String>>,
    /// Lines applied.
    records: usize,
    /// The file did not end on a line boundary.
    unterminated: bool,
}

fn replay(content: &str) -> Result<Replayed, RepositoryError> {
    let mut marks: HashMap<String, HashSet<String>> = HashMap::new();
    let mut records = 0;
    let lines: Vec<&str> = content.lines().collect();
    let unterminated = !content.is_empty() && !content.ends_with('\n');

    for (i, raw) in lines.iter().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let line: JournalLine = match serde_json::from_str(raw) {
            Ok(l) => l,
            Err(_) if unterminated && i + 1 == lines.len() => {
                tracing::warn!(target: "pipeline", line = i + 1, "ignoring torn journal tail");
                break;
            }
            Err(e) => {
                return Err(RepositoryError::Corrupt {
                    line: i + 1,
                    reason: e.to_string(),
                })
            }
        };
        records += 1;
        let set = marks.entry(line.source).or_default();
        match line.op {
            Op::Mark => {
                set.insert(line.key);
            }
            Op::Unmark => {
                set.remove(&line.key);
            }
        }
    }
    marks.retain(|_, keys| !keys.is_empty());
    Ok(Replayed {
        marks,
        records,
        unterminated,
    })
}

/// Rewrite the journal with one mark line per live key, replacing it atomically.
/// Returns the new length.
async fn compact(
    path: &Path,
    marks: &HashMap<String, HashSet<String>>,
) -> Result<u64, RepositoryError> {
    let mut buf = Vec::new();
    let mut sources: Vec<&String> = marks.keys().collect();
    sources.sort();
    for source in sources {
        let mut keys: Vec<&String> = marks[source].iter().collect();
        keys.sort();
        for key in keys {
            buf.extend(encode(&JournalLine {
                op: Op::Mark,
                source: source.clone(),
                key: key.clone(),
            })?);
        }
    }

    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".compact");
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp).await?;
    file.write_all(&buf).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(buf.len() as u64)
}

#[async_trait]
impl IdempotentRepository for JournalRepository {
    async fn check_and_mark(
        &self,
        source: &str,
        key: &DedupKey,
    ) -> Result<MarkOutcome, RepositoryError> {
        let k = key.storage_key();
        let mut st = self.state.lock().await;
        if st.marks.get(source).is_some_and(|s| s.contains(&k)) {
            return Ok(MarkOutcome::AlreadyPresent);
        }
        st.append(&JournalLine {
            op: Op::Mark,
            source: source.to_string(),
            key: k.clone(),
        })
        .await?;
        st.marks.entry(source.to_string()).or_default().insert(k);
        Ok(MarkOutcome::NewlyMarked)
    }

    async fn unmark(&self, source: &str, key: &DedupKey) -> Result<(), RepositoryError> {
        let k = key.storage_key();
        let mut st = self.state.lock().await;
        if !st.marks.get(source).is_some_and(|s| s.contains(&k)) {
            return Ok(());
        }
        st.append(&JournalLine {
            op: Op::Unmark,
            source: source.to_string(),
            key: k.clone(),
        })
        .await?;
        if let Some(set) = st.marks.get_mut(source) {
            set.remove(&k);
        }
        Ok(())
    }

    async fn contains(&self, source: &str, key: &DedupKey) -> Result<bool, RepositoryError> {
        let st = self.state.lock().await;
        Ok(st
            .marks
            .get(source)
            .is_some_and(|s| s.contains(&key.storage_key())))
    }
}
