/// SQLite index adapter
///
/// Implements the index writer and a lexical searcher over a local SQLite
/// database. Always available; deployments without an external search
/// index run entirely on this adapter.
use crate::domain::models::{ContentChunk, MeetingMapping, SpeakerContext, Utterance};
use crate::error::{AppError, Result};
use crate::ports::index::IndexWriterPort;
use crate::ports::search::{SearchHit, SearcherPort};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// SQLite-backed index implementation
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndex {
    /// Create a new index with the given database path
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run database migrations
    pub fn run_migrations(&self) -> Result<()> {
        use rusqlite_migration::{Migrations, M};

        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../../migrations/001_initial.sql"
        ))]);

        let mut conn = self.conn.lock().unwrap();
        migrations
            .to_latest(&mut conn)
            .map_err(|e| AppError::Database(rusqlite::Error::ToSqlConversionFailure(Box::new(e))))?;

        Ok(())
    }

    fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentChunk> {
        let speaker_ids: String = row.get(2)?;
        let speaker_names: String = row.get(3)?;
        Ok(ContentChunk {
            chunk_id: row.get(0)?,
            meeting_id: row.get(1)?,
            speaker_ids: serde_json::from_str(&speaker_ids).unwrap_or_default(),
            speaker_names: serde_json::from_str(&speaker_names).unwrap_or_default(),
            text: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
        })
    }
}

#[async_trait]
impl IndexWriterPort for SqliteIndex {
    async fn insert_chunk(&self, chunk: &ContentChunk) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO transcript_chunks
             (chunk_id, meeting_id, speaker_ids, speaker_names, text, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chunk.chunk_id,
                chunk.meeting_id,
                serde_json::to_string(&chunk.speaker_ids)?,
                serde_json::to_string(&chunk.speaker_names)?,
                chunk.text,
                chunk.start_time,
                chunk.end_time,
            ],
        )?;
        Ok(())
    }

    async fn upsert_speaker_context(&self, context: &SpeakerContext) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO speaker_context
             (doc_id, meeting_id, speaker_id, speaker_name, summary, topics, last_updated, segment_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                context.doc_id(),
                context.meeting_id,
                context.speaker_id,
                context.speaker_name,
                context.summary,
                serde_json::to_string(&context.topics)?,
                context.last_updated,
                context.segment_count as i64,
            ],
        )?;
        Ok(())
    }

    async fn persist_meeting_mapping(&self, mapping: &MeetingMapping) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO meetings (meeting_id, uuid, start_time, end_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(meeting_id) DO UPDATE SET
               uuid = excluded.uuid,
               start_time = COALESCE(excluded.start_time, meetings.start_time),
               end_time = COALESCE(excluded.end_time, meetings.end_time),
               status = excluded.status",
            params![
                mapping.meeting_id,
                mapping.uuid,
                mapping.start_time,
                mapping.end_time,
                mapping.status,
            ],
        )?;
        Ok(())
    }

    async fn resolve_meeting_uuid(&self, meeting_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT uuid FROM meetings WHERE meeting_id = ?1")?;
        let mut rows = stmt.query(params![meeting_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn get_speaker_context(
        &self,
        meeting_id: &str,
        speaker_id: &str,
    ) -> Result<Option<SpeakerContext>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT meeting_id, speaker_id, speaker_name, summary, topics, last_updated, segment_count
             FROM speaker_context WHERE doc_id = ?1",
        )?;
        let mut rows = stmt.query(params![format!("{}-{}", meeting_id, speaker_id)])?;

        if let Some(row) = rows.next()? {
            let topics: String = row.get(4)?;
            let segment_count: i64 = row.get(6)?;
            Ok(Some(SpeakerContext {
                meeting_id: row.get(0)?,
                speaker_id: row.get(1)?,
                speaker_name: row.get(2)?,
                summary: row.get(3)?,
                topics: serde_json::from_str(&topics).unwrap_or_default(),
                last_updated: row.get(5)?,
                segment_count: segment_count as u64,
            }))
        } else {
            Ok(None)
        }
    }

    async fn list_chunks(&self, meeting_id: &str, limit: usize) -> Result<Vec<ContentChunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, meeting_id, speaker_ids, speaker_names, text, start_time, end_time
             FROM transcript_chunks WHERE meeting_id = ?1
             ORDER BY start_time ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![meeting_id, limit as i64], Self::chunk_from_row)?;

        let mut chunks = Vec::new();
        for chunk in rows {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }

    async fn list_meeting_speakers(&self, meeting_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT speaker_id, speaker_name FROM speaker_transcripts
             WHERE meeting_id = ?1 ORDER BY speaker_id",
        )?;
        let rows = stmt.query_map(params![meeting_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut speakers = Vec::new();
        for speaker in rows {
            speakers.push(speaker?);
        }

        // Fall back to chunk metadata when raw utterances were not kept
        if speakers.is_empty() {
            let mut stmt = conn.prepare(
                "SELECT speaker_ids, speaker_names FROM transcript_chunks WHERE meeting_id = ?1",
            )?;
            let rows = stmt.query_map(params![meeting_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (ids_json, names_json) = row?;
                let ids: Vec<String> = serde_json::from_str(&ids_json).unwrap_or_default();
                let names: Vec<String> = serde_json::from_str(&names_json).unwrap_or_default();
                for (id, name) in ids.into_iter().zip(names.into_iter()) {
                    if !speakers.iter().any(|(existing, _)| *existing == id) {
                        speakers.push((id, name));
                    }
                }
            }
        }
        Ok(speakers)
    }

    async fn append_speaker_transcript(
        &self,
        meeting_id: &str,
        utterance: &Utterance,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO speaker_transcripts (meeting_id, speaker_id, speaker_name, text, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meeting_id,
                utterance.speaker_id,
                utterance.speaker_name,
                utterance.text,
                utterance.timestamp,
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SearcherPort for SqliteIndex {
    /// Lexical search: the query is split into terms, each pushed down as
    /// a `LIKE` clause (SQLite `LIKE` is ASCII-case-insensitive), and the
    /// matching rows are ranked by how often the terms occur.
    async fn semantic_search(
        &self,
        query: &str,
        meeting_uuid: Option<&str>,
        speaker_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Dynamic parameterized filter: scope clauses plus one LIKE per
        // term, so the row set never leaves SQLite unfiltered
        let mut sql = String::from(
            "SELECT chunk_id, meeting_id, speaker_ids, speaker_names, text, start_time, end_time
             FROM transcript_chunks
             WHERE (?1 IS NULL OR meeting_id = ?1)
               AND (?2 IS NULL OR speaker_ids LIKE '%\"' || ?2 || '\"%')",
        );
        let meeting_param = meeting_uuid.map(str::to_string);
        let speaker_param = speaker_id.map(str::to_string);
        let term_patterns: Vec<String> = terms.iter().map(|t| format!("%{}%", t)).collect();

        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&meeting_param, &speaker_param];
        for pattern in &term_patterns {
            params.push(pattern);
            sql.push_str(&format!(" AND text LIKE ?{}", params.len()));
        }

        let candidates = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params.as_slice(), Self::chunk_from_row)?;
            let mut chunks = Vec::new();
            for chunk in rows {
                chunks.push(chunk?);
            }
            chunks
        };

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|chunk| {
                let haystack = chunk.text.to_lowercase();
                let occurrences: usize =
                    terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                SearchHit {
                    chunk,
                    score: occurrences as f32,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SqliteIndex {
        let index = SqliteIndex::in_memory().unwrap();
        index.run_migrations().unwrap();
        index
    }

    fn chunk(id: &str, meeting: &str, text: &str, start: i64) -> ContentChunk {
        ContentChunk {
            chunk_id: id.to_string(),
            meeting_id: meeting.to_string(),
            speaker_ids: vec!["U1".to_string()],
            speaker_names: vec!["Ada".to_string()],
            text: text.to_string(),
            start_time: start,
            end_time: start + 1000,
        }
    }

    #[tokio::test]
    async fn test_mapping_round_trip() {
        let index = index();
        index
            .persist_meeting_mapping(&MeetingMapping::started(111, "UUID-A".to_string()))
            .await
            .unwrap();

        assert_eq!(
            index.resolve_meeting_uuid(111).await.unwrap(),
            Some("UUID-A".to_string())
        );
        assert_eq!(index.resolve_meeting_uuid(112).await.unwrap(), None);

        // Closing the mapping keeps the uuid and records the end
        index
            .persist_meeting_mapping(&MeetingMapping {
                meeting_id: 111,
                uuid: "UUID-A".to_string(),
                start_time: None,
                end_time: Some(99),
                status: "ended".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            index.resolve_meeting_uuid(111).await.unwrap(),
            Some("UUID-A".to_string())
        );
    }

    #[tokio::test]
    async fn test_chunks_sorted_and_bounded() {
        let index = index();
        index.insert_chunk(&chunk("M-chunk-2", "M", "later text", 2_000)).await.unwrap();
        index.insert_chunk(&chunk("M-chunk-1", "M", "earlier text", 1_000)).await.unwrap();
        index.insert_chunk(&chunk("X-chunk-1", "X", "other meeting", 0)).await.unwrap();

        let chunks = index.list_chunks("M", 10).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, "M-chunk-1");
        assert_eq!(chunks[1].chunk_id, "M-chunk-2");

        let bounded = index.list_chunks("M", 1).await.unwrap();
        assert_eq!(bounded.len(), 1);
    }

    #[tokio::test]
    async fn test_speaker_context_upsert() {
        let index = index();
        let mut context = SpeakerContext {
            meeting_id: "M".to_string(),
            speaker_id: "U1".to_string(),
            speaker_name: "Ada".to_string(),
            summary: "first".to_string(),
            topics: vec!["intro".to_string()],
            last_updated: 1,
            segment_count: 1,
        };
        index.upsert_speaker_context(&context).await.unwrap();

        context.summary = "second".to_string();
        context.segment_count = 4;
        index.upsert_speaker_context(&context).await.unwrap();

        let loaded = index.get_speaker_context("M", "U1").await.unwrap().unwrap();
        assert_eq!(loaded.summary, "second");
        assert_eq!(loaded.segment_count, 4);
        assert_eq!(loaded.topics, vec!["intro"]);
        assert!(index.get_speaker_context("M", "U2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lexical_search_filters_and_ranks() {
        let index = index();
        index
            .insert_chunk(&chunk("M-chunk-1", "M", "budget review budget numbers", 0))
            .await
            .unwrap();
        index
            .insert_chunk(&chunk("M-chunk-2", "M", "one budget mention", 1_000))
            .await
            .unwrap();
        index
            .insert_chunk(&chunk("M-chunk-3", "M", "unrelated topic", 2_000))
            .await
            .unwrap();

        let hits = index.semantic_search("budget", Some("M"), None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        // Two occurrences rank above one
        assert_eq!(hits[0].chunk.chunk_id, "M-chunk-1");
        assert!(hits[0].score > hits[1].score);

        let scoped = index
            .semantic_search("budget", Some("M"), Some("U1"), 10)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 2);

        let unknown_speaker = index
            .semantic_search("budget", Some("M"), Some("U9"), 10)
            .await
            .unwrap();
        assert!(unknown_speaker.is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rtms-scribe.db");

        {
            let index = SqliteIndex::new(db_path.clone()).unwrap();
            index.run_migrations().unwrap();
            index
                .persist_meeting_mapping(&MeetingMapping::started(7, "UUID-P".to_string()))
                .await
                .unwrap();
        }

        let reopened = SqliteIndex::new(db_path).unwrap();
        reopened.run_migrations().unwrap();
        assert_eq!(
            reopened.resolve_meeting_uuid(7).await.unwrap(),
            Some("UUID-P".to_string())
        );
    }

    #[tokio::test]
    async fn test_speakers_from_raw_transcripts() {
        let index = index();
        index
            .append_speaker_transcript(
                "M",
                &Utterance {
                    speaker_id: "U1".to_string(),
                    speaker_name: "Ada".to_string(),
                    text: "hello".to_string(),
                    timestamp: 0,
                },
            )
            .await
            .unwrap();

        let speakers = index.list_meeting_speakers("M").await.unwrap();
        assert_eq!(speakers, vec![("U1".to_string(), "Ada".to_string())]);
    }
}
