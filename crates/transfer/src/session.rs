use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use stevedore_protocol::SessionSnapshot;

/// Engine-local bookkeeping for one chunked transfer.
///
/// Tracks which chunk indices the server has acknowledged. The remote
/// snapshot is authoritative; [`adopt`](Self::adopt) replaces local state
/// with the server's record on resume.
#[derive(Debug, Clone)]
pub struct TransferSession {
    file_id: String,
    file_name: String,
    mime_type: String,
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
    acknowledged: HashSet<u32>,
}

impl TransferSession {
    pub fn new(
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        file_size: u64,
        chunk_size: u64,
        total_chunks: u32,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            file_size,
            chunk_size,
            total_chunks,
            acknowledged: HashSet::new(),
        }
    }

    /// Builds a session from the server's view, dropping acknowledged
    /// indices outside the valid range.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let mut session = Self::new(
            snapshot.file_id.clone(),
            snapshot.file_name.clone(),
            snapshot.mime_type.clone(),
            snapshot.file_size,
            snapshot.chunk_size,
            snapshot.total_chunks,
        );
        session.adopt(&snapshot.acknowledged_chunks);
        session
    }

    /// Replaces the acknowledged set with the server's record.
    pub fn adopt(&mut self, acknowledged: &[u32]) {
        self.acknowledged = acknowledged
            .iter()
            .copied()
            .filter(|i| *i < self.total_chunks)
            .collect();
    }

    /// Records a server acknowledgment. Returns `false` for out-of-range
    /// or already-acknowledged indices.
    pub fn acknowledge(&mut self, index: u32) -> bool {
        if index >= self.total_chunks {
            return false;
        }
        self.acknowledged.insert(index)
    }

    pub fn is_acknowledged(&self, index: u32) -> bool {
        self.acknowledged.contains(&index)
    }

    /// Indices still to send, in ascending order.
    pub fn pending(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.acknowledged.contains(i))
            .collect()
    }

    pub fn acknowledged_count(&self) -> u32 {
        self.acknowledged.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.acknowledged.len() as u32 == self.total_chunks
    }

    /// Bytes confirmed so far. The final chunk may be shorter than
    /// `chunk_size`, so this sums actual span lengths.
    pub fn bytes_acknowledged(&self) -> u64 {
        self.acknowledged
            .iter()
            .map(|i| {
                let start = u64::from(*i) * self.chunk_size;
                self.file_size.saturating_sub(start).min(self.chunk_size)
            })
            .sum()
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Client-side record of a previously started session, keyed by signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub file_id: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Client-side cache mapping file signatures to session identifiers.
///
/// Lets a restarted client re-open the session it created earlier (session
/// creation is idempotent per `file_id`). Purely an optimization: the
/// server snapshot remains the source of truth for which chunks exist.
pub trait SessionStore: Send + Sync {
    fn load(&self, signature: &str) -> Option<StoredSession>;
    fn save(&self, signature: &str, session: StoredSession);
    fn remove(&self, signature: &str);
}

/// In-memory [`SessionStore`] (thread-safe).
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, signature: &str) -> Option<StoredSession> {
        self.inner.read().unwrap().get(signature).cloned()
    }

    fn save(&self, signature: &str, session: StoredSession) {
        self.inner
            .write()
            .unwrap()
            .insert(signature.to_string(), session);
    }

    fn remove(&self, signature: &str) {
        self.inner.write().unwrap().remove(signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> TransferSession {
        // 10 bytes in chunks of 4: indices 0, 1 full, index 2 holds 2 bytes.
        TransferSession::new("f1", "test.bin", "application/octet-stream", 10, 4, 3)
    }

    #[test]
    fn new_session_has_all_chunks_pending() {
        let s = sample_session();
        assert_eq!(s.pending(), vec![0, 1, 2]);
        assert_eq!(s.acknowledged_count(), 0);
        assert!(!s.is_complete());
        assert_eq!(s.bytes_acknowledged(), 0);
    }

    #[test]
    fn acknowledge_tracks_progress() {
        let mut s = sample_session();
        assert!(s.acknowledge(1));
        assert!(s.is_acknowledged(1));
        assert_eq!(s.pending(), vec![0, 2]);
        assert_eq!(s.acknowledged_count(), 1);
    }

    #[test]
    fn acknowledge_rejects_out_of_range() {
        let mut s = sample_session();
        assert!(!s.acknowledge(3));
        assert!(!s.acknowledge(99));
        assert_eq!(s.acknowledged_count(), 0);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut s = sample_session();
        assert!(s.acknowledge(0));
        assert!(!s.acknowledge(0));
        assert_eq!(s.acknowledged_count(), 1);
    }

    #[test]
    fn complete_when_all_acknowledged() {
        let mut s = sample_session();
        for i in 0..3 {
            s.acknowledge(i);
        }
        assert!(s.is_complete());
        assert!(s.pending().is_empty());
    }

    #[test]
    fn bytes_acknowledged_accounts_for_short_tail() {
        let mut s = sample_session();
        s.acknowledge(2); // final chunk: 2 bytes, not 4
        assert_eq!(s.bytes_acknowledged(), 2);
        s.acknowledge(0);
        assert_eq!(s.bytes_acknowledged(), 6);
        s.acknowledge(1);
        assert_eq!(s.bytes_acknowledged(), 10);
    }

    #[test]
    fn from_snapshot_adopts_server_record() {
        let snapshot = SessionSnapshot {
            file_id: "f9".into(),
            file_name: "big.mp4".into(),
            mime_type: "video/mp4".into(),
            file_size: 10,
            chunk_size: 4,
            total_chunks: 3,
            acknowledged_chunks: vec![0, 2],
        };
        let s = TransferSession::from_snapshot(&snapshot);
        assert_eq!(s.file_id(), "f9");
        assert_eq!(s.mime_type(), "video/mp4");
        assert_eq!(s.pending(), vec![1]);
        assert_eq!(s.acknowledged_count(), 2);
    }

    #[test]
    fn from_snapshot_filters_invalid_indices() {
        let snapshot = SessionSnapshot {
            file_id: "f9".into(),
            file_name: "big.mp4".into(),
            mime_type: "video/mp4".into(),
            file_size: 10,
            chunk_size: 4,
            total_chunks: 3,
            acknowledged_chunks: vec![0, 7, 42],
        };
        let s = TransferSession::from_snapshot(&snapshot);
        assert_eq!(s.acknowledged_count(), 1);
        assert_eq!(s.pending(), vec![1, 2]);
    }

    #[test]
    fn adopt_replaces_local_state() {
        let mut s = sample_session();
        s.acknowledge(0);
        s.adopt(&[1, 2]);
        assert!(!s.is_acknowledged(0));
        assert_eq!(s.pending(), vec![0]);
    }

    #[test]
    fn store_save_load_remove() {
        let store = MemorySessionStore::new();
        let sig = "video.mp4_1000_1700000000";
        assert!(store.load(sig).is_none());

        store.save(
            sig,
            StoredSession {
                file_id: "f1".into(),
                chunk_size: 4,
                total_chunks: 250,
            },
        );
        let loaded = store.load(sig).unwrap();
        assert_eq!(loaded.file_id, "f1");
        assert_eq!(loaded.total_chunks, 250);

        store.remove(sig);
        assert!(store.load(sig).is_none());
    }

    #[test]
    fn store_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemorySessionStore::new());
        let mut handles = vec![];

        for i in 0..10 {
            let s = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let sig = format!("file_{i}_{j}");
                    s.save(
                        &sig,
                        StoredSession {
                            file_id: format!("id_{i}_{j}"),
                            chunk_size: 4,
                            total_chunks: 1,
                        },
                    );
                    assert!(s.load(&sig).is_some());
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert!(store.load("file_0_0").is_some());
        assert!(store.load("file_9_99").is_some());
    }
}
