use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::database::schema::SCHEMA;
use crate::error::Result;

/// Identity and descriptive fields of a video as returned by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCandidate {
    pub video_id: String,
    pub title: String,
    pub channel_name: String,
    pub published_at: DateTime<Utc>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Engagement counters for one video.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub views: u64,
    pub likes: u64,
    pub comments: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub channel_name: String,
    pub published_at: DateTime<Utc>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub counters: Counters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// The video catalog. Records are only ever inserted or updated.
pub struct VideoCatalog {
    conn: Connection,
}

impl VideoCatalog {
    pub fn open(path: &str) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Raw SQL against the catalog, for installing failure triggers in tests.
    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Inserts `candidate` or refreshes the descriptive fields of the record
    /// with the same id. Counters are never touched here.
    pub fn upsert(&self, candidate: &VideoCandidate) -> Result<UpsertOutcome> {
        let existed = self.contains(&candidate.video_id)?;

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO youtube_video (video_id, title, channel_name, published_at, description, thumbnail_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(video_id) DO UPDATE SET
                title=excluded.title,
                channel_name=excluded.channel_name,
                published_at=excluded.published_at,
                description=excluded.description,
                thumbnail_url=excluded.thumbnail_url",
        )?;
        stmt.execute(params![
            candidate.video_id,
            candidate.title,
            candidate.channel_name,
            candidate.published_at,
            candidate.description,
            candidate.thumbnail_url,
        ])?;

        Ok(if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    /// Overwrites the counters of an existing record. Returns false when no
    /// record has that id.
    pub fn update_counters(&self, video_id: &str, counters: Counters) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE youtube_video SET views = ?2, likes = ?3, comments = ?4 WHERE video_id = ?1",
        )?;
        let changed = stmt.execute(params![
            video_id,
            to_sql_count(counters.views),
            to_sql_count(counters.likes),
            to_sql_count(counters.comments),
        ])?;
        Ok(changed > 0)
    }

    /// All known ids, in insertion order.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT video_id FROM youtube_video ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn contains(&self, video_id: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM youtube_video WHERE video_id = ?1")?;
        Ok(stmt.exists(params![video_id])?)
    }

    pub fn get(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT video_id, title, channel_name, published_at, description, thumbnail_url,
                    views, likes, comments
             FROM youtube_video WHERE video_id = ?1",
        )?;
        let record = stmt
            .query_row(params![video_id], |row| {
                Ok(VideoRecord {
                    video_id: row.get(0)?,
                    title: row.get(1)?,
                    channel_name: row.get(2)?,
                    published_at: row.get(3)?,
                    description: row.get(4)?,
                    thumbnail_url: row.get(5)?,
                    counters: Counters {
                        views: from_sql_count(row.get(6)?),
                        likes: from_sql_count(row.get(7)?),
                        comments: from_sql_count(row.get(8)?),
                    },
                })
            })
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM youtube_video", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }
}

// SQLite integers are signed; counts above i64::MAX cannot occur in practice.
fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_sql_count(n: i64) -> u64 {
    n.max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(id: &str, title: &str) -> VideoCandidate {
        VideoCandidate {
            video_id: id.to_string(),
            title: title.to_string(),
            channel_name: "channel".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            description: None,
            thumbnail_url: Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id)),
        }
    }

    #[test]
    fn upsert_inserts_unknown_id_once() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        assert_eq!(catalog.upsert(&candidate("v1", "first"))?, UpsertOutcome::Inserted);
        assert_eq!(catalog.count()?, 1);

        let record = catalog.get("v1")?.expect("record exists");
        assert_eq!(record.title, "first");
        assert_eq!(record.counters, Counters::default());
        assert_eq!(record.published_at, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        Ok(())
    }

    #[test]
    fn upsert_existing_id_updates_fields_and_keeps_counters() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        catalog.upsert(&candidate("v1", "first"))?;
        let counters = Counters { views: 10, likes: 2, comments: 1 };
        assert!(catalog.update_counters("v1", counters)?);

        let mut changed = candidate("v1", "renamed");
        changed.description = Some("now with text".into());
        assert_eq!(catalog.upsert(&changed)?, UpsertOutcome::Updated);

        assert_eq!(catalog.count()?, 1);
        let record = catalog.get("v1")?.expect("record exists");
        assert_eq!(record.video_id, "v1");
        assert_eq!(record.title, "renamed");
        assert_eq!(record.description.as_deref(), Some("now with text"));
        assert_eq!(record.counters, counters);
        Ok(())
    }

    #[test]
    fn update_counters_on_unknown_id_is_a_no_op() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        assert!(!catalog.update_counters("ghost", Counters { views: 1, likes: 1, comments: 1 })?);
        assert_eq!(catalog.count()?, 0);
        Ok(())
    }

    #[test]
    fn ids_come_back_in_insertion_order() -> Result<()> {
        let catalog = VideoCatalog::open_in_memory()?;
        for id in ["c", "a", "b"] {
            catalog.upsert(&candidate(id, id))?;
        }
        catalog.upsert(&candidate("a", "again"))?;
        assert_eq!(catalog.all_ids()?, vec!["c", "a", "b"]);
        Ok(())
    }
}
