use crate::api::models::{LogKey, Message};
use crate::error::{InboxError, Result};
use directories::ProjectDirs;
use rusqlite::{params, Connection, ErrorCode};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Persistence for per-(engagement, pair) message logs.
///
/// Implementations are synchronous: a write that returned `Ok` is visible to
/// the next read issued through the same store.
pub trait MessageStore {
    /// Messages of one log in append order.
    fn get_log(&self, key: &LogKey) -> Result<Vec<Message>>;

    fn append_log(&mut self, key: &LogKey, message: &Message) -> Result<()>;

    /// Marks every message of the log not sent by `reader` as read.
    /// Returns how many messages changed.
    fn set_read_flags(&mut self, key: &LogKey, reader: &str) -> Result<usize> {
        self.set_read_flags_all(std::slice::from_ref(key), reader)
    }

    /// Same as [`MessageStore::set_read_flags`] over several logs, applied as
    /// a single unit: either every log is updated or none is.
    fn set_read_flags_all(&mut self, keys: &[LogKey], reader: &str) -> Result<usize>;
}

pub fn default_db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "GigChat")?;
    let dir = proj.data_dir().to_path_buf();
    Some(dir.join("messages.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        engagement_id TEXT NOT NULL,
        party_a TEXT NOT NULL,
        party_b TEXT NOT NULL,
        id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at TEXT NOT NULL,
        read INTEGER NOT NULL DEFAULT 0,
        UNIQUE (engagement_id, party_a, party_b, id)
    );
    CREATE INDEX IF NOT EXISTS messages_log ON messages (engagement_id, party_a, party_b, seq);
"#;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_dir(path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn open_default() -> Result<Self> {
        let path = default_db_path()
            .ok_or_else(|| InboxError::Config("no data dir".into()))?;
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

impl MessageStore for SqliteStore {
    fn get_log(&self, key: &LogKey) -> Result<Vec<Message>> {
        let (a, b) = key.pair.parties();
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, sender_id, text, created_at, read FROM messages
             WHERE engagement_id = ?1 AND party_a = ?2 AND party_b = ?3
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![key.engagement_id, a, b], |row| {
            Ok(Message {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                text: row.get(2)?,
                created_at: row.get(3)?,
                read: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn append_log(&mut self, key: &LogKey, message: &Message) -> Result<()> {
        let (a, b) = key.pair.parties();
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT INTO messages (engagement_id, party_a, party_b, id, sender_id, text, created_at, read)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                key.engagement_id,
                a,
                b,
                message.id,
                message.sender_id,
                message.text,
                message.created_at,
                message.read
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(InboxError::DuplicateMessage(message.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;
        Ok(())
    }

    fn set_read_flags_all(&mut self, keys: &[LogKey], reader: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        for key in keys {
            let (a, b) = key.pair.parties();
            changed += tx.execute(
                r#"
                UPDATE messages SET read = 1
                WHERE engagement_id = ?1 AND party_a = ?2 AND party_b = ?3
                  AND sender_id <> ?4 AND read = 0
                "#,
                params![key.engagement_id, a, b, reader],
            )?;
        }
        tx.commit()?;
        Ok(changed)
    }
}

/// Process-local store, used for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: HashMap<LogKey, Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStore {
    fn get_log(&self, key: &LogKey) -> Result<Vec<Message>> {
        Ok(self.logs.get(key).cloned().unwrap_or_default())
    }

    fn append_log(&mut self, key: &LogKey, message: &Message) -> Result<()> {
        let log = self.logs.entry(key.clone()).or_default();
        if log.iter().any(|m| m.id == message.id) {
            return Err(InboxError::DuplicateMessage(message.id.clone()));
        }
        log.push(message.clone());
        Ok(())
    }

    fn set_read_flags_all(&mut self, keys: &[LogKey], reader: &str) -> Result<usize> {
        let mut changed = 0;
        for key in keys {
            if let Some(log) = self.logs.get_mut(key) {
                for m in log.iter_mut().filter(|m| m.sender_id != reader && !m.read) {
                    m.read = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::ConversationKey;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, sender: &str, secs: i64) -> Message {
        Message {
            id: id.into(),
            sender_id: sender.into(),
            text: format!("text {id}"),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            read: false,
        }
    }

    fn stores() -> Vec<Box<dyn MessageStore>> {
        vec![
            Box::new(MemoryStore::new()),
            Box::new(SqliteStore::open_in_memory().unwrap()),
        ]
    }

    #[test]
    fn append_then_get_keeps_order() {
        for mut store in stores() {
            let key = LogKey::new("p1", ConversationKey::new("u2", "u1"));
            store.append_log(&key, &msg("m1", "u1", 0)).unwrap();
            store.append_log(&key, &msg("m2", "u2", 5)).unwrap();
            let log = store.get_log(&key).unwrap();
            assert_eq!(log.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), ["m1", "m2"]);
            assert_eq!(log[1], msg("m2", "u2", 5));
        }
    }

    #[test]
    fn pair_order_does_not_matter() {
        for mut store in stores() {
            store
                .append_log(&LogKey::new("p1", ConversationKey::new("u1", "u2")), &msg("m1", "u1", 0))
                .unwrap();
            let log = store
                .get_log(&LogKey::new("p1", ConversationKey::new("u2", "u1")))
                .unwrap();
            assert_eq!(log.len(), 1);
        }
    }

    #[test]
    fn logs_are_scoped_by_engagement() {
        for mut store in stores() {
            let pair = ConversationKey::new("u1", "u2");
            store.append_log(&LogKey::new("p1", pair.clone()), &msg("m1", "u1", 0)).unwrap();
            assert!(store.get_log(&LogKey::new("p2", pair)).unwrap().is_empty());
        }
    }

    #[test]
    fn duplicate_id_rejected() {
        for mut store in stores() {
            let key = LogKey::new("p1", ConversationKey::new("u1", "u2"));
            store.append_log(&key, &msg("m1", "u1", 0)).unwrap();
            let err = store.append_log(&key, &msg("m1", "u1", 1)).unwrap_err();
            assert!(matches!(err, InboxError::DuplicateMessage(id) if id == "m1"));
            assert_eq!(store.get_log(&key).unwrap().len(), 1);
        }
    }

    #[test]
    fn read_flags_skip_reader_messages() {
        for mut store in stores() {
            let key = LogKey::new("p1", ConversationKey::new("u1", "u2"));
            store.append_log(&key, &msg("m1", "u1", 0)).unwrap();
            store.append_log(&key, &msg("m2", "u2", 1)).unwrap();
            store.append_log(&key, &msg("m3", "u2", 2)).unwrap();

            assert_eq!(store.set_read_flags(&key, "u1").unwrap(), 2);
            let log = store.get_log(&key).unwrap();
            assert!(!log[0].read);
            assert!(log[1].read && log[2].read);

            assert_eq!(store.set_read_flags(&key, "u1").unwrap(), 0);
        }
    }

    #[test]
    fn read_flags_across_logs() {
        for mut store in stores() {
            let pair = ConversationKey::new("u1", "u2");
            let k1 = LogKey::new("p1", pair.clone());
            let k2 = LogKey::new("p2", pair);
            store.append_log(&k1, &msg("m1", "u2", 0)).unwrap();
            store.append_log(&k2, &msg("m2", "u2", 1)).unwrap();
            assert_eq!(store.set_read_flags_all(&[k1.clone(), k2.clone()], "u1").unwrap(), 2);
            assert!(store.get_log(&k1).unwrap()[0].read);
            assert!(store.get_log(&k2).unwrap()[0].read);
        }
    }

    #[test]
    fn failed_batch_read_leaves_every_log_unread() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let pair = ConversationKey::new("u1", "u2");
        let k1 = LogKey::new("p1", pair.clone());
        let k2 = LogKey::new("p2", pair);
        store.append_log(&k1, &msg("m1", "u2", 0)).unwrap();
        store.append_log(&k1, &msg("m2", "u2", 1)).unwrap();
        store.append_log(&k2, &msg("m3", "u2", 2)).unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER block_p2 BEFORE UPDATE ON messages
                 WHEN OLD.engagement_id = 'p2'
                 BEGIN SELECT RAISE(ABORT, 'blocked'); END;",
            )
            .unwrap();

        let err = store.set_read_flags_all(&[k1.clone(), k2.clone()], "u1").unwrap_err();
        assert!(matches!(err, InboxError::Storage(_)));
        assert!(store.get_log(&k1).unwrap().iter().all(|m| !m.read));
        assert!(store.get_log(&k2).unwrap().iter().all(|m| !m.read));

        store.conn.execute_batch("DROP TRIGGER block_p2;").unwrap();
        assert_eq!(store.set_read_flags_all(&[k1, k2], "u1").unwrap(), 3);
    }

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("messages.sqlite");
        let key = LogKey::new("p1", ConversationKey::new("u1", "u2"));
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.append_log(&key, &msg("m1", "u1", 0)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_log(&key).unwrap().len(), 1);
    }
}
