//! Filesystem collaborators: `<root>/<bucket>/<key>` blobs, one JSON file per
//! streamer cursor, and one JSON-lines file per stream of points.

use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use bytes::Bytes;

use crate::{
    dedup::ReconciledPoint,
    ids::{self, StreamerKey},
    ingest::StreamerCursor,
};

use super::{
    BlobStore, CursorStore, PointStore, Series, StoreError, lock, series_last_with_value, series_range,
};

const CURSORS_DIR: &str = "cursors";
const POINTS_DIR: &str = "points";

/// Joins relative, non-escaping path segments onto `root`
fn resolve(root: &Path, parts: &[&str]) -> Result<PathBuf, StoreError> {
    let mut path = root.to_path_buf();
    for part in parts {
        let valid = !part.is_empty()
            && Path::new(part)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(part.to_string()));
        }
        path.push(part);
    }
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for FsBlobStore {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let path = resolve(&self.root, &[bucket, key])?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = resolve(&self.root, &[bucket, key])?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FsCursorStore {
    dir: PathBuf,
    /// serializes read-modify-write in `save`
    write: Mutex<()>,
}

impl FsCursorStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = root.as_ref().join(CURSORS_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write: Mutex::new(()),
        })
    }

    fn path(&self, key: StreamerKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read(path: &Path) -> Result<Option<StreamerCursor>, StoreError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CursorStore for FsCursorStore {
    fn load(&self, key: StreamerKey) -> Result<Option<StreamerCursor>, StoreError> {
        Self::read(&self.path(key))
    }

    fn device_cursors(&self, device_id: u32) -> Result<Vec<StreamerCursor>, StoreError> {
        let prefix = format!("t--{}--", ids::gid64(device_id as u64));
        let mut cursors = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&prefix) {
                continue;
            }
            if let Some(cursor) = Self::read(&entry.path())? {
                cursors.push(cursor);
            }
        }
        cursors.sort_by_key(|c: &StreamerCursor| c.streamer.index);
        Ok(cursors)
    }

    fn save(&self, cursor: &StreamerCursor) -> Result<(), StoreError> {
        let _guard = lock(&self.write)?;
        let path = self.path(cursor.streamer);

        let mut next = cursor.clone();
        if let Some(current) = Self::read(&path)? {
            next.last_processed_id = next.last_processed_id.max(current.last_processed_id);
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&next)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Appends to `<root>/points/<stream>.jsonl`. Each stream file is read once
/// and then served from memory, which is also what makes inserts idempotent.
#[derive(Debug)]
pub struct FsPointStore {
    dir: PathBuf,
    streams: Mutex<HashMap<String, Series>>,
}

impl FsPointStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = root.as_ref().join(POINTS_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            streams: Mutex::new(HashMap::new()),
        })
    }

    fn path(&self, stream_slug: &str) -> Result<PathBuf, StoreError> {
        resolve(&self.dir, &[&format!("{stream_slug}.jsonl")])
    }

    fn read(&self, stream_slug: &str) -> Result<Series, StoreError> {
        let content = match fs::read_to_string(self.path(stream_slug)?) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Series::new()),
            Err(e) => return Err(e.into()),
        };

        let mut series = Series::new();
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            let point: ReconciledPoint = serde_json::from_str(line)?;
            series.entry(point.counter).or_insert(point);
        }
        Ok(series)
    }

    fn series<'a>(
        &self,
        streams: &'a mut HashMap<String, Series>,
        stream_slug: &str,
    ) -> Result<&'a mut Series, StoreError> {
        match streams.entry(stream_slug.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(self.read(stream_slug)?)),
        }
    }
}

impl PointStore for FsPointStore {
    fn bulk_insert(&self, points: &[ReconciledPoint]) -> Result<usize, StoreError> {
        let mut streams = lock(&self.streams)?;

        let mut fresh: BTreeMap<&str, Vec<&ReconciledPoint>> = BTreeMap::new();
        for point in points {
            let stored = self
                .series(&mut streams, &point.stream_slug)?
                .contains_key(&point.counter);
            let batch = fresh.entry(point.stream_slug.as_str()).or_default();
            if !stored && !batch.iter().any(|p| p.counter == point.counter) {
                batch.push(point);
            }
        }

        // encode everything before touching any file
        let mut encoded = Vec::with_capacity(fresh.len());
        for (stream_slug, batch) in &fresh {
            let mut lines = String::new();
            for point in batch {
                lines.push_str(&serde_json::to_string(point)?);
                lines.push('\n');
            }
            encoded.push((*stream_slug, lines, batch));
        }

        let mut stored = 0;
        for (stream_slug, lines, batch) in encoded {
            if batch.is_empty() {
                continue;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path(stream_slug)?)?;
            file.write_all(lines.as_bytes())?;

            let series = self.series(&mut streams, stream_slug)?;
            for point in batch {
                series.insert(point.counter, (*point).clone());
            }
            stored += batch.len();
        }
        Ok(stored)
    }

    fn points(&self, stream_slug: &str) -> Result<Vec<ReconciledPoint>, StoreError> {
        let mut streams = lock(&self.streams)?;
        Ok(self.series(&mut streams, stream_slug)?.values().cloned().collect())
    }

    fn range(
        &self,
        stream_slug: &str,
        after: u32,
        through: u32,
    ) -> Result<Vec<ReconciledPoint>, StoreError> {
        let mut streams = lock(&self.streams)?;
        let series = self.series(&mut streams, stream_slug)?;
        Ok(series_range(Some(series), after, through))
    }

    fn last_with_value(
        &self,
        stream_slug: &str,
        value: u32,
    ) -> Result<Option<ReconciledPoint>, StoreError> {
        let mut streams = lock(&self.streams)?;
        let series = self.series(&mut streams, stream_slug)?;
        Ok(series_last_with_value(Some(series), value))
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::*;
    use crate::report::selector::StreamerSelector;

    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("streamer-ingest-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_blob_roundtrip() {
        let root = scratch();
        let store = FsBlobStore::new(&root);
        store.put("reports", "2024/05/a.bin", b"abc").unwrap();
        assert_eq!(store.fetch("reports", "2024/05/a.bin").unwrap(), Bytes::from_static(b"abc"));
        assert!(matches!(
            store.fetch("reports", "missing.bin"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.fetch("reports", "../escape.bin"),
            Err(StoreError::InvalidKey(_))
        ));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_cursor_files() {
        let root = scratch();
        let store = FsCursorStore::open(&root).unwrap();

        let mut cursor = StreamerCursor::new(StreamerKey::new(0xa, 1), StreamerSelector::User);
        cursor.last_processed_id = 30;
        store.save(&cursor).unwrap();
        cursor.last_processed_id = 10;
        store.save(&cursor).unwrap();
        store
            .save(&StreamerCursor::new(StreamerKey::new(0xa, 0), StreamerSelector::System))
            .unwrap();
        store
            .save(&StreamerCursor::new(StreamerKey::new(0xb, 0), StreamerSelector::System))
            .unwrap();

        let cursors = store.device_cursors(0xa).unwrap();
        assert_eq!(cursors.len(), 2);
        assert_eq!(cursors[1].last_processed_id, 30);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_point_lines() {
        let root = scratch();
        let point = ReconciledPoint {
            stream_slug: "s--0000-0000-0000-000a--5001".to_string(),
            counter: 1,
            timestamp: Timestamp::UNIX_EPOCH,
            device_timestamp: 0,
            value: 7,
            dirty: false,
            unverified: false,
        };
        let next = ReconciledPoint {
            counter: 2,
            ..point.clone()
        };

        let store = FsPointStore::open(&root).unwrap();
        assert_eq!(store.bulk_insert(&[point.clone(), point.clone()]).unwrap(), 1);
        assert_eq!(store.bulk_insert(&[point.clone(), next.clone()]).unwrap(), 1);
        assert_eq!(store.points(&point.stream_slug).unwrap().len(), 2);
        assert!(store.points("s--none").unwrap().is_empty());

        // a fresh store sees what is on disk
        let reopened = FsPointStore::open(&root).unwrap();
        assert_eq!(reopened.bulk_insert(&[next.clone()]).unwrap(), 0);
        assert_eq!(reopened.range(&point.stream_slug, 1, 2).unwrap(), vec![next.clone()]);
        assert_eq!(reopened.last_with_value(&point.stream_slug, 7).unwrap(), Some(next));

        let lines = fs::read_to_string(root.join(POINTS_DIR).join("s--0000-0000-0000-000a--5001.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 2);
        fs::remove_dir_all(root).unwrap();
    }
}
