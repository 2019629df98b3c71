//! Append-only JSON lines journal backing the result store

use crate::errors::{MonitorError, Result};
use crate::records::{NewRecord, RecordFilter, RecordId, ResponseRecord, ServiceStats};
use crate::store::{MemoryStore, ResultStore};
use async_trait::async_trait;
use fs2::FileExt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result store persisted as one JSON document per line.
///
/// A journal has at most one writer, enforced with an exclusive file lock.
/// The writer serves reads from the records it replayed and appended itself.
/// Any number of read-only handles may follow the same file; they pick up
/// newly completed lines before every query.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    access: Access,
    index: MemoryStore,
}

#[derive(Debug)]
enum Access {
    Writer(Mutex<Writer>),
    /// Byte offset just past the last line consumed
    Reader(Mutex<u64>),
}

#[derive(Debug)]
struct Writer {
    file: File,
    /// Length of the journal through its last complete line
    len: u64,
    /// Set when a failed write could not be rolled back
    poisoned: bool,
    #[cfg(test)]
    faults: Faults,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    /// Write only this many bytes of the next line, then fail
    short_write: Option<usize>,
    fail_truncate: bool,
}

impl Writer {
    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(written) = self.faults.short_write.take() {
            self.file.write_all(&line[..written.min(line.len())]).await?;
            self.file.flush().await?;
            return Err(io::Error::other("no space left on device"));
        }

        self.file.write_all(line).await?;
        self.file.flush().await
    }

    /// Cut off whatever a failed write left behind
    async fn rollback(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if self.faults.fail_truncate {
            return Err(io::Error::other("truncate refused"));
        }

        self.file.set_len(self.len).await
    }
}

impl JournalStore {
    /// Open or create the journal at `path` for writing and replay its records.
    ///
    /// Fails with [`MonitorError::Storage`] when another writer holds the journal.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                MonitorError::Storage(format!("unable to open {}: {}", path.display(), e))
            })?;

        file.try_lock_exclusive().map_err(|e| {
            MonitorError::Storage(format!(
                "journal {} is held by another writer: {}",
                path.display(),
                e
            ))
        })?;

        let replay = read_complete_lines(&path, 0).await?;
        if replay.torn {
            warn!(
                "Discarding torn trailing line in {} at byte {}",
                path.display(),
                replay.end
            );
            file.set_len(replay.end)?;
        }

        info!(
            "Opened journal {} with {} records",
            path.display(),
            replay.records.len()
        );

        let writer = Writer {
            file: File::from_std(file),
            len: replay.end,
            poisoned: false,
            #[cfg(test)]
            faults: Faults::default(),
        };

        Ok(Self {
            path,
            access: Access::Writer(Mutex::new(writer)),
            index: MemoryStore::from_records(replay.records),
        })
    }

    /// Open the journal at `path` without writing to it.
    ///
    /// A missing journal reads as empty until a writer creates it. A line
    /// still being written is left alone and read once it is complete.
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !tokio::fs::try_exists(&path).await? {
            warn!("Journal {} does not exist yet", path.display());
        }

        let store = Self {
            path,
            access: Access::Reader(Mutex::new(0)),
            index: MemoryStore::new(),
        };
        store.catch_up().await?;

        info!(
            "Following journal {} with {} records",
            store.path.display(),
            store.index.len().await
        );

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.access, Access::Reader(_))
    }

    pub async fn len(&self) -> usize {
        self.index.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.index.is_empty().await
    }

    /// Load lines completed since the last read; the writer's index is always current
    async fn catch_up(&self) -> Result<()> {
        let Access::Reader(offset) = &self.access else {
            return Ok(());
        };
        let mut offset = offset.lock().await;

        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }

        let replay = read_complete_lines(&self.path, *offset).await?;
        if !replay.records.is_empty() {
            debug!(
                "Read {} new records from {}",
                replay.records.len(),
                self.path.display()
            );
        }

        for record in replay.records {
            self.index.insert(record).await;
        }
        *offset = replay.end;

        Ok(())
    }
}

struct Replay {
    records: Vec<ResponseRecord>,
    /// Offset just past the last complete line
    end: u64,
    /// An unterminated line follows `end`
    torn: bool,
}

/// Read every complete record starting at byte `start`.
///
/// Appends are acknowledged only after their newline is written, so an
/// unterminated final line is either an interrupted or an ongoing write.
async fn read_complete_lines(path: &Path, start: u64) -> Result<Replay> {
    let mut file = File::open(path).await?;
    let file_len = file.metadata().await?.len();

    if file_len < start {
        return Err(MonitorError::Storage(format!(
            "journal {} shrank from {} to {} bytes",
            path.display(),
            start,
            file_len
        )));
    }

    file.seek(SeekFrom::Start(start)).await?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut end = start;

    loop {
        let mut line = Vec::new();
        let bytes_read = reader.read_until(b'\n', &mut line).await?;

        if bytes_read == 0 {
            break;
        }

        if line.last() != Some(&b'\n') {
            return Ok(Replay {
                records,
                end,
                torn: true,
            });
        }

        let line_start = end;
        end += bytes_read as u64;

        if line.trim_ascii().is_empty() {
            continue;
        }

        let record = serde_json::from_slice::<ResponseRecord>(&line).map_err(|e| {
            MonitorError::Storage(format!(
                "corrupt record in {} at byte {}: {}",
                path.display(),
                line_start,
                e
            ))
        })?;
        records.push(record);
    }

    Ok(Replay {
        records,
        end,
        torn: false,
    })
}

#[async_trait]
impl ResultStore for JournalStore {
    async fn append(&self, record: NewRecord) -> Result<RecordId> {
        let Access::Writer(writer) = &self.access else {
            return Err(MonitorError::Storage(format!(
                "journal {} is open read-only",
                self.path.display()
            )));
        };
        let mut writer = writer.lock().await;

        if writer.poisoned {
            return Err(MonitorError::Storage(format!(
                "journal {} is unusable after a failed write could not be rolled back",
                self.path.display()
            )));
        }

        let id = self.index.next_id().await;
        let record = record.with_id(id);

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if let Err(e) = writer.write_line(&line).await {
            let len = writer.len;
            match writer.rollback().await {
                Ok(()) => warn!(
                    "Rolled back partial write to {} at byte {}",
                    self.path.display(),
                    len
                ),
                Err(rollback) => {
                    writer.poisoned = true;
                    error!(
                        "Unable to roll back {} to {} bytes, refusing further writes: {}",
                        self.path.display(),
                        len,
                        rollback
                    );
                }
            }

            return Err(MonitorError::Storage(format!(
                "write to {} failed: {}",
                self.path.display(),
                e
            )));
        }

        writer.len += line.len() as u64;
        self.index.insert(record).await;
        debug!("Journaled record {} to {}", id, self.path.display());

        Ok(id)
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<ResponseRecord>> {
        self.catch_up().await?;
        self.index.list_records(filter).await
    }

    async fn summarize(&self, service: &str) -> Result<ServiceStats> {
        self.catch_up().await?;
        self.index.summarize(service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Outcome;
    use futures::future::join_all;
    use std::sync::Arc;

    fn new_record(name: &str, outcome: Outcome) -> NewRecord {
        NewRecord::new(name, "http://localhost/", outcome)
    }

    fn journal_line(id: RecordId, name: &str) -> String {
        let record = new_record(name, Outcome::response(200)).with_id(id);
        let mut line = serde_json::to_string(&record).unwrap();
        line.push('\n');
        line
    }

    async fn inject(store: &JournalStore, faults: Faults) {
        let Access::Writer(writer) = &store.access else {
            panic!("journal is read-only");
        };
        writer.lock().await.faults = faults;
    }

    async fn everything(store: &JournalStore) -> Vec<ResponseRecord> {
        store
            .list_records(&RecordFilter::all().with_limit(usize::MAX))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        {
            let store = JournalStore::open(&path).await.unwrap();
            store.append(new_record("ping", Outcome::response(200))).await.unwrap();
            store
                .append(new_record("ping", Outcome::transport_failure("refused")))
                .await
                .unwrap();
        }

        let reopened = JournalStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);

        let id = reopened.append(new_record("ping", Outcome::response(200))).await.unwrap();
        assert_eq!(id, 3);

        let stats = reopened.summarize("ping").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total_failed, 1);

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("statter.journal");

        let store = JournalStore::open(&path).await.unwrap();
        assert!(store.is_empty().await);
        assert!(!store.is_read_only());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let mut content = journal_line(1, "ping");
        content.push_str(r#"{"id":2,"name":"pi"#);
        tokio::fs::write(&path, content).await.unwrap();

        let store = JournalStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);

        let id = store.append(new_record("ping", Outcome::response(204))).await.unwrap();
        assert_eq!(id, 2);

        drop(store);
        let reopened = JournalStore::open(&path).await.unwrap();
        let records = everything(&reopened).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, Outcome::response(204));
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");
        tokio::fs::write(&path, "not json\n{}\n").await.unwrap();

        let result = JournalStore::open(&path).await;
        assert!(matches!(result, Err(MonitorError::Storage(_))));
    }

    #[tokio::test]
    async fn test_second_writer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let first = JournalStore::open(&path).await.unwrap();
        first.append(new_record("ping", Outcome::response(200))).await.unwrap();

        let second = JournalStore::open(&path).await;
        assert!(matches!(second, Err(MonitorError::Storage(_))));

        drop(first);
        let after_release = JournalStore::open(&path).await.unwrap();
        assert_eq!(after_release.len().await, 1);
    }

    #[tokio::test]
    async fn test_reader_leaves_line_in_progress_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let first = journal_line(1, "ping");
        let second = journal_line(2, "ping");
        let (head, tail) = second.split_at(10);
        tokio::fs::write(&path, format!("{}{}", first, head)).await.unwrap();
        let written = tokio::fs::metadata(&path).await.unwrap().len();

        let reader = JournalStore::open_read_only(&path).await.unwrap();
        assert!(reader.is_read_only());
        assert_eq!(everything(&reader).await.len(), 1);
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), written);

        let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(tail.as_bytes()).await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let records = everything(&reader).await;
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);

        let writer = JournalStore::open(&path).await.unwrap();
        assert_eq!(writer.len().await, 2);
    }

    #[tokio::test]
    async fn test_reader_follows_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let writer = JournalStore::open(&path).await.unwrap();
        let reader = JournalStore::open_read_only(&path).await.unwrap();
        assert!(reader.is_empty().await);

        for _ in 0..3 {
            writer.append(new_record("ping", Outcome::response(200))).await.unwrap();
        }

        assert_eq!(reader.summarize("ping").await.unwrap().total, 3);
        let ids: Vec<_> = everything(&reader).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let refused = reader.append(new_record("ping", Outcome::response(200))).await;
        assert!(matches!(refused, Err(MonitorError::Storage(_))));

        let id = writer.append(new_record("ping", Outcome::response(200))).await.unwrap();
        assert_eq!(id, 4);
        assert_eq!(reader.len().await, 3);
        assert_eq!(everything(&reader).await.len(), 4);
    }

    #[tokio::test]
    async fn test_reader_of_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let reader = JournalStore::open_read_only(&path).await.unwrap();
        assert!(everything(&reader).await.is_empty());
        assert!(!path.exists());

        let writer = JournalStore::open(&path).await.unwrap();
        writer.append(new_record("ping", Outcome::response(200))).await.unwrap();
        assert_eq!(everything(&reader).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let store = JournalStore::open(&path).await.unwrap();
        store.append(new_record("ping", Outcome::response(200))).await.unwrap();
        let intact = tokio::fs::read(&path).await.unwrap();

        inject(
            &store,
            Faults {
                short_write: Some(10),
                ..Faults::default()
            },
        )
        .await;
        let failed = store.append(new_record("ping", Outcome::response(500))).await;
        assert!(matches!(failed, Err(MonitorError::Storage(_))));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), intact);
        assert_eq!(store.len().await, 1);

        let id = store.append(new_record("ping", Outcome::response(204))).await.unwrap();
        assert_eq!(id, 2);

        drop(store);
        let reopened = JournalStore::open(&path).await.unwrap();
        let records = everything(&reopened).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, Outcome::response(204));
    }

    #[tokio::test]
    async fn test_unrecoverable_write_stops_further_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");

        let store = JournalStore::open(&path).await.unwrap();
        store.append(new_record("ping", Outcome::response(200))).await.unwrap();

        inject(
            &store,
            Faults {
                short_write: Some(10),
                fail_truncate: true,
            },
        )
        .await;
        assert!(store.append(new_record("ping", Outcome::response(500))).await.is_err());

        let refused = store.append(new_record("ping", Outcome::response(200))).await;
        match refused {
            Err(MonitorError::Storage(message)) => assert!(message.contains("unusable")),
            other => panic!("expected a storage error, got {:?}", other),
        }
        assert_eq!(store.summarize("ping").await.unwrap().total, 1);

        drop(store);
        let reopened = JournalStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");
        let store = Arc::new(JournalStore::open(&path).await.unwrap());

        let appends = (0..32).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.append(new_record("ping", Outcome::response(200))).await.unwrap()
            })
        });
        let mut ids: Vec<RecordId> = join_all(appends)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=32).collect::<Vec<_>>());

        drop(store);
        let reopened = JournalStore::open(&path).await.unwrap();
        let records = reopened
            .list_records(&RecordFilter::all().with_limit(100))
            .await
            .unwrap();
        assert_eq!(records.len(), 32);
        assert!(records.windows(2).all(|w| w[0].id > w[1].id));
    }

    /// Check that a store shows a gap-free prefix of complete records
    async fn assert_consistent(store: &JournalStore) -> usize {
        let records = everything(store).await;
        let ids: Vec<RecordId> = records.iter().rev().map(|r| r.id).collect();
        assert_eq!(ids, (1..=records.len() as RecordId).collect::<Vec<_>>());

        for record in &records {
            assert_eq!(record.url, "http://localhost/");
            match record.name.as_str() {
                "up" => assert_eq!(record.outcome, Outcome::response(200)),
                "down" => assert_eq!(record.outcome, Outcome::transport_failure("refused")),
                other => panic!("unexpected service {}", other),
            }
        }

        let up = store.summarize("up").await.unwrap();
        assert_eq!(up.total_failed, 0);
        let down = store.summarize("down").await.unwrap();
        assert_eq!(down.total_failed, down.total);
        assert!(up.total + down.total >= records.len() as u64);

        records.len()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reads_during_appends_see_whole_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statter.journal");
        let writer = Arc::new(JournalStore::open(&path).await.unwrap());
        let reader = JournalStore::open_read_only(&path).await.unwrap();

        let appending = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                let appends = (0..64).map(|i| {
                    let writer = Arc::clone(&writer);
                    tokio::spawn(async move {
                        let record = if i % 2 == 0 {
                            new_record("up", Outcome::response(200))
                        } else {
                            new_record("down", Outcome::transport_failure("refused"))
                        };
                        writer.append(record).await.unwrap()
                    })
                });
                for result in join_all(appends).await {
                    result.unwrap();
                }
            })
        };

        let mut seen_by_reader = 0;
        while !appending.is_finished() {
            assert_consistent(&writer).await;
            let visible = assert_consistent(&reader).await;
            assert!(visible >= seen_by_reader);
            seen_by_reader = visible;
            tokio::task::yield_now().await;
        }
        appending.await.unwrap();

        assert_eq!(assert_consistent(&writer).await, 64);
        assert_eq!(assert_consistent(&reader).await, 64);
    }
}
