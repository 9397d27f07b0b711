//! SQLite-backed face store.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};

use super::FaceStore;
use crate::engine::Identity;
use crate::package::{FaceKind, FaceRecord, Region};

pub const SCHEMA: &str = r#"
-- Person tags referenced by face records
CREATE TABLE IF NOT EXISTS face_tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    identity_id INTEGER,               -- recognizer identity mapped to this tag
    is_unknown_person INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_face_tags_identity ON face_tags(identity_id);

-- Face records: one row per (item, tag, region)
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    kind INTEGER NOT NULL,             -- 0 unknown, 1 unconfirmed, 2 confirmed, 3 for-training
    region_x INTEGER NOT NULL,
    region_y INTEGER NOT NULL,
    region_w INTEGER NOT NULL,
    region_h INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (tag_id) REFERENCES face_tags(id)
);

CREATE INDEX IF NOT EXISTS idx_faces_item ON faces(item_id);
CREATE INDEX IF NOT EXISTS idx_faces_tag ON faces(tag_id);

-- Items already processed for faces
CREATE TABLE IF NOT EXISTS face_scans (
    item_id INTEGER PRIMARY KEY,
    scanned_at TEXT NOT NULL
);
"#;

pub struct SqliteFaceStore {
    conn: Mutex<Connection>,
}

impl SqliteFaceStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Failed to lock database connection: {}", e))
    }

    fn faces_where(&self, item_id: i64, kinds: &[FaceKind]) -> Result<Vec<FaceRecord>> {
        let conn = self.lock()?;
        let kind_list = kinds
            .iter()
            .map(|k| k.to_db().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT item_id, tag_id, kind, region_x, region_y, region_w, region_h
            FROM faces
            WHERE item_id = ? AND kind IN ({})
            ORDER BY id
            "#,
            kind_list
        ))?;

        let faces = stmt
            .query_map([item_id], row_to_record)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(faces)
    }
}

/// Tag ids come from the surrounding application's taxonomy, so a face write
/// may name a tag this store has never seen. Materialize the row on demand
/// instead of rejecting the write.
fn ensure_tag(conn: &Connection, tag_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO face_tags (id, name) VALUES (?, ?)",
        params![tag_id, format!("Person #{}", tag_id)],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaceRecord> {
    Ok(FaceRecord {
        item_id: row.get(0)?,
        tag_id: row.get(1)?,
        kind: FaceKind::from_db(row.get(2)?),
        region: Region {
            x: row.get(3)?,
            y: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        },
    })
}

impl FaceStore for SqliteFaceStore {
    fn has_been_scanned(&self, item_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM face_scans WHERE item_id = ?",
            [item_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn mark_as_scanned(&self, item_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO face_scans (item_id, scanned_at) VALUES (?, ?)",
            params![item_id, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn faces_for_item(&self, item_id: i64) -> Result<Vec<FaceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT item_id, tag_id, kind, region_x, region_y, region_w, region_h
            FROM faces
            WHERE item_id = ?
            ORDER BY id
            "#,
        )?;

        let faces = stmt
            .query_map([item_id], row_to_record)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(faces)
    }

    fn unconfirmed_faces(&self, item_id: i64) -> Result<Vec<FaceRecord>> {
        self.faces_where(item_id, &[FaceKind::UnknownName, FaceKind::UnconfirmedName])
    }

    fn confirmed_faces(&self, item_id: i64) -> Result<Vec<FaceRecord>> {
        self.faces_where(item_id, &[FaceKind::ConfirmedName])
    }

    fn faces_for_training(&self, item_id: i64) -> Result<Vec<FaceRecord>> {
        self.faces_where(item_id, &[FaceKind::FaceForTraining])
    }

    fn add_face(&self, record: &FaceRecord) -> Result<()> {
        let conn = self.lock()?;
        ensure_tag(&conn, record.tag_id)?;
        conn.execute(
            r#"
            INSERT INTO faces (item_id, tag_id, kind, region_x, region_y, region_w, region_h)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.item_id,
                record.tag_id,
                record.kind.to_db(),
                record.region.x,
                record.region.y,
                record.region.width,
                record.region.height,
            ],
        )?;
        Ok(())
    }

    fn remove_face(&self, record: &FaceRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            DELETE FROM faces
            WHERE item_id = ? AND tag_id = ?
              AND region_x = ? AND region_y = ? AND region_w = ? AND region_h = ?
            "#,
            params![
                record.item_id,
                record.tag_id,
                record.region.x,
                record.region.y,
                record.region.width,
                record.region.height,
            ],
        )?;
        Ok(())
    }

    fn remove_faces_of_kind(&self, item_id: i64, kinds: &[FaceKind]) -> Result<()> {
        let conn = self.lock()?;
        let kind_list = kinds
            .iter()
            .map(|k| k.to_db().to_string())
            .collect::<Vec<_>>()
            .join(",");
        conn.execute(
            &format!("DELETE FROM faces WHERE item_id = ? AND kind IN ({})", kind_list),
            [item_id],
        )?;
        Ok(())
    }

    fn update_face(&self, old: &FaceRecord, new: &FaceRecord) -> Result<()> {
        let conn = self.lock()?;
        ensure_tag(&conn, new.tag_id)?;
        conn.execute(
            r#"
            UPDATE faces
            SET tag_id = ?, kind = ?, region_x = ?, region_y = ?, region_w = ?, region_h = ?
            WHERE item_id = ? AND tag_id = ?
              AND region_x = ? AND region_y = ? AND region_w = ? AND region_h = ?
            "#,
            params![
                new.tag_id,
                new.kind.to_db(),
                new.region.x,
                new.region.y,
                new.region.width,
                new.region.height,
                old.item_id,
                old.tag_id,
                old.region.x,
                old.region.y,
                old.region.width,
                old.region.height,
            ],
        )?;
        Ok(())
    }

    fn unknown_person_tag(&self) -> Result<i64> {
        let conn = self.lock()?;
        let existing = conn.query_row(
            "SELECT id FROM face_tags WHERE is_unknown_person = 1",
            [],
            |row| row.get::<_, i64>(0),
        );
        match existing {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                conn.execute(
                    "INSERT INTO face_tags (name, is_unknown_person) VALUES ('Unknown', 1)",
                    [],
                )?;
                Ok(conn.last_insert_rowid())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn tag_for_identity(&self, identity: Option<&Identity>) -> Result<i64> {
        let identity = match identity {
            Some(identity) => identity,
            None => return self.unknown_person_tag(),
        };

        let conn = self.lock()?;
        let existing = conn.query_row(
            "SELECT id FROM face_tags WHERE identity_id = ?",
            [identity.id],
            |row| row.get::<_, i64>(0),
        );
        match existing {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let name = identity
                    .attributes
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| format!("Suggested #{}", identity.id));
                conn.execute(
                    "INSERT INTO face_tags (name, identity_id) VALUES (?, ?)",
                    params![name, identity.id],
                )?;
                Ok(conn.last_insert_rowid())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn identity_for_tag(&self, tag_id: i64) -> Result<i64> {
        let conn = self.lock()?;
        ensure_tag(&conn, tag_id)?;
        let identity: Option<i64> = conn.query_row(
            "SELECT identity_id FROM face_tags WHERE id = ?",
            [tag_id],
            |row| row.get(0),
        )?;
        if let Some(id) = identity {
            return Ok(id);
        }

        // No mapping yet: allocate one. Tag ids are unique, so the tag id
        // itself is a safe identity handle for the recognizer.
        conn.execute(
            "UPDATE face_tags SET identity_id = ? WHERE id = ?",
            params![tag_id, tag_id],
        )?;
        Ok(tag_id)
    }
}
