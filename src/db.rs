// SQLite persistence layer for speeches, resources, timer state, and visit
// statistics.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::resource::{Resource, ResourceSort};
use crate::speech::Speech;
use crate::stats::SiteStats;
use crate::timer::TimerState;

/// Current time truncated to millisecond precision. Timestamps are stored as
/// fixed-width RFC 3339 text (millisecond precision, `Z` suffix) so they sort
/// lexicographically; truncating here makes in-memory values round-trip
/// through the database exactly.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    now.with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(now)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(column: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

/// SQLite-backed persistence for the debate hub tables. All writes serialize
/// on the connection mutex, which is what makes the storage-level counter
/// updates atomic with respect to each other.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path`, ensure all tables exist,
    /// and seed the singleton timer and statistics rows. Pass `":memory:"`
    /// for an ephemeral in-memory database (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS speeches (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                speaker      TEXT NOT NULL,
                content      TEXT NOT NULL,
                debate_topic TEXT NOT NULL DEFAULT 'General Debate',
                duration     INTEGER NOT NULL DEFAULT 60,
                speech_time  TEXT NOT NULL,
                likes        INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS resources (
                id             TEXT PRIMARY KEY,
                filename       TEXT NOT NULL,
                originalname   TEXT NOT NULL,
                mimetype       TEXT NOT NULL,
                size           INTEGER NOT NULL,
                category       TEXT NOT NULL DEFAULT 'other',
                description    TEXT NOT NULL DEFAULT '',
                uploader       TEXT NOT NULL DEFAULT 'Anonymous',
                storage_path   TEXT,
                public_url     TEXT,
                upload_time    TEXT NOT NULL,
                download_count INTEGER NOT NULL DEFAULT 0,
                likes          INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS timer_state (
                id              INTEGER PRIMARY KEY CHECK (id = 1),
                is_running      INTEGER NOT NULL DEFAULT 0,
                remaining_time  INTEGER NOT NULL DEFAULT 300,
                total_time      INTEGER NOT NULL DEFAULT 300,
                current_speaker TEXT NOT NULL DEFAULT '',
                last_update     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS site_stats (
                id              INTEGER PRIMARY KEY CHECK (id = 1),
                total_visits    INTEGER NOT NULL DEFAULT 0,
                today_visits    INTEGER NOT NULL DEFAULT 0,
                last_reset_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS access_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                page        TEXT NOT NULL,
                ip_address  TEXT,
                user_agent  TEXT,
                access_time TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        // Seed the singleton rows exactly once; restarts keep existing state.
        let initial = TimerState::initial(now());
        conn.execute(
            "INSERT OR IGNORE INTO timer_state
                (id, is_running, remaining_time, total_time, current_speaker, last_update)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                initial.is_running,
                initial.remaining_time,
                initial.total_time,
                initial.current_speaker,
                format_ts(&initial.last_update),
            ],
        )
        .context("failed to seed timer state")?;
        conn.execute(
            "INSERT OR IGNORE INTO site_stats (id, total_visits, today_visits, last_reset_date)
             VALUES (1, 0, 0, ?1)",
            params![format_date(Local::now().date_naive())],
        )
        .context("failed to seed site statistics")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection mutex.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Timer state (singleton row, id = 1)
    // ------------------------------------------------------------------

    /// Load the authoritative timer tuple.
    pub fn timer_state(&self) -> Result<TimerState> {
        let conn = self.conn();
        conn.query_row(
            "SELECT is_running, remaining_time, total_time, current_speaker, last_update
             FROM timer_state WHERE id = 1",
            [],
            |row| {
                let raw: String = row.get(4)?;
                Ok(TimerState {
                    is_running: row.get(0)?,
                    remaining_time: row.get(1)?,
                    total_time: row.get(2)?,
                    current_speaker: row.get(3)?,
                    last_update: parse_ts(4, &raw)?,
                })
            },
        )
        .context("failed to load timer state")
    }

    /// Overwrite the singleton timer row with the given tuple.
    pub fn save_timer_state(&self, state: &TimerState) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE timer_state
             SET is_running = ?1, remaining_time = ?2, total_time = ?3,
                 current_speaker = ?4, last_update = ?5
             WHERE id = 1",
            params![
                state.is_running,
                state.remaining_time,
                state.total_time,
                state.current_speaker,
                format_ts(&state.last_update),
            ],
        )
        .context("failed to save timer state")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Speeches
    // ------------------------------------------------------------------

    /// Insert a speech and return its assigned id.
    pub fn insert_speech(
        &self,
        speaker: &str,
        content: &str,
        debate_topic: &str,
        duration: i64,
        speech_time: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO speeches (speaker, content, debate_topic, duration, speech_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![speaker, content, debate_topic, duration, format_ts(&speech_time)],
        )
        .context("failed to insert speech")?;
        Ok(conn.last_insert_rowid())
    }

    /// Load the `limit` most recent speeches, newest first. Creation-time
    /// ties break on id, also descending.
    pub fn latest_speeches(&self, limit: u32) -> Result<Vec<Speech>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, speaker, content, debate_topic, duration, speech_time, likes
                 FROM speeches ORDER BY speech_time DESC, id DESC LIMIT ?1",
            )
            .context("failed to prepare latest_speeches query")?;
        let speeches = stmt
            .query_map(params![limit], speech_from_row)
            .context("failed to query speeches")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map speech rows")?;
        Ok(speeches)
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Insert a resource metadata record.
    pub fn insert_resource(&self, resource: &Resource) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO resources
                (id, filename, originalname, mimetype, size, category, description,
                 uploader, storage_path, public_url, upload_time, download_count, likes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                resource.id,
                resource.filename,
                resource.original_name,
                resource.mime_type,
                resource.size_bytes,
                resource.category,
                resource.description,
                resource.uploader,
                resource.storage_path,
                resource.public_url,
                format_ts(&resource.upload_time),
                resource.download_count,
                resource.likes,
            ],
        )
        .context("failed to insert resource")?;
        Ok(())
    }

    /// Load a resource by id. Returns `None` when no record matches.
    pub fn get_resource(&self, id: &str) -> Result<Option<Resource>> {
        let conn = self.conn();
        conn.query_row(
            &format!("{RESOURCE_COLUMNS} WHERE id = ?1"),
            params![id],
            resource_from_row,
        )
        .optional()
        .context("failed to load resource")
    }

    /// List resources, optionally filtered by exact category, in the order
    /// given by `sort`.
    pub fn list_resources(
        &self,
        category: Option<&str>,
        sort: ResourceSort,
    ) -> Result<Vec<Resource>> {
        let conn = self.conn();
        let sql = match category {
            Some(_) => format!(
                "{RESOURCE_COLUMNS} WHERE category = ?1 ORDER BY {}",
                sort.order_clause()
            ),
            None => format!("{RESOURCE_COLUMNS} ORDER BY {}", sort.order_clause()),
        };
        let mut stmt = conn
            .prepare(&sql)
            .context("failed to prepare list_resources query")?;
        let rows = match category {
            Some(cat) => stmt.query_map(params![cat], resource_from_row),
            None => stmt.query_map([], resource_from_row),
        }
        .context("failed to query resources")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map resource rows")?;
        Ok(rows)
    }

    /// Bump a resource's download counter with a storage-level atomic update.
    pub fn increment_download_count(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE resources SET download_count = download_count + 1 WHERE id = ?1",
            params![id],
        )
        .context("failed to increment download count")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Visit statistics
    // ------------------------------------------------------------------

    /// Append an access-log row and bump both visit counters as one
    /// transaction, so a visit is either fully counted or not at all.
    pub fn record_visit(
        &self,
        page: &str,
        ip_address: &str,
        user_agent: &str,
        access_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin visit transaction")?;
        tx.execute(
            "INSERT INTO access_log (page, ip_address, user_agent, access_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![page, ip_address, user_agent, format_ts(&access_time)],
        )
        .context("failed to insert access log entry")?;
        tx.execute(
            "UPDATE site_stats
             SET total_visits = total_visits + 1, today_visits = today_visits + 1
             WHERE id = 1",
            [],
        )
        .context("failed to update visit counters")?;
        tx.commit().context("failed to commit visit")?;
        Ok(())
    }

    /// Load the singleton visit counters.
    pub fn site_stats(&self) -> Result<SiteStats> {
        let conn = self.conn();
        conn.query_row(
            "SELECT total_visits, today_visits, last_reset_date FROM site_stats WHERE id = 1",
            [],
            |row| {
                let raw: String = row.get(2)?;
                Ok(SiteStats {
                    total_visits: row.get(0)?,
                    today_visits: row.get(1)?,
                    last_reset_date: parse_date(2, &raw)?,
                })
            },
        )
        .context("failed to load site statistics")
    }

    /// Zero the daily counter when the stored reset date differs from
    /// `today`. Returns `true` when a reset happened.
    pub fn maybe_reset_daily(&self, today: NaiveDate) -> Result<bool> {
        if !self.site_stats()?.needs_reset(today) {
            return Ok(false);
        }
        let conn = self.conn();
        conn.execute(
            "UPDATE site_stats SET today_visits = 0, last_reset_date = ?1 WHERE id = 1",
            params![format_date(today)],
        )
        .context("failed to reset daily visits")?;
        Ok(true)
    }
}

const RESOURCE_COLUMNS: &str = "SELECT id, filename, originalname, mimetype, size, category, \
     description, uploader, storage_path, public_url, upload_time, download_count, likes \
     FROM resources";

fn speech_from_row(row: &Row<'_>) -> rusqlite::Result<Speech> {
    let raw: String = row.get(5)?;
    Ok(Speech {
        id: row.get(0)?,
        speaker: row.get(1)?,
        content: row.get(2)?,
        debate_topic: row.get(3)?,
        duration: row.get(4)?,
        speech_time: parse_ts(5, &raw)?,
        likes: row.get(6)?,
    })
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    let raw: String = row.get(10)?;
    Ok(Resource {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_name: row.get(2)?,
        mime_type: row.get(3)?,
        size_bytes: row.get(4)?,
        category: row.get(5)?,
        description: row.get(6)?,
        uploader: row.get(7)?,
        storage_path: row.get(8)?,
        public_url: row.get(9)?,
        upload_time: parse_ts(10, &raw)?,
        download_count: row.get(11)?,
        likes: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn sample_resource(id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            filename: format!("{id}.pdf"),
            original_name: "notes.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 1024,
            category: "other".to_string(),
            description: String::new(),
            uploader: "Anonymous".to_string(),
            storage_path: None,
            public_url: None,
            upload_time: now(),
            download_count: 0,
            likes: 0,
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables_and_seeds_singletons() {
        let db = test_db();
        {
            let conn = db.conn();
            let tables: Vec<String> = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            for table in ["speeches", "resources", "timer_state", "site_stats", "access_log"] {
                assert!(tables.contains(&table.to_string()), "missing {table}");
            }
        }

        let timer = db.timer_state().unwrap();
        assert!(!timer.is_running);
        assert_eq!(timer.remaining_time, 300);
        assert_eq!(timer.total_time, 300);
        assert_eq!(timer.current_speaker, "");

        let stats = db.site_stats().unwrap();
        assert_eq!(stats.total_visits, 0);
        assert_eq!(stats.today_visits, 0);
    }

    // ------------------------------------------------------------------
    // Timer state
    // ------------------------------------------------------------------

    #[test]
    fn timer_state_round_trip() {
        let db = test_db();
        let state = TimerState {
            is_running: true,
            remaining_time: 123,
            total_time: 240,
            current_speaker: "Alice".to_string(),
            last_update: now(),
        };
        db.save_timer_state(&state).unwrap();
        assert_eq!(db.timer_state().unwrap(), state);
    }

    // ------------------------------------------------------------------
    // Speeches
    // ------------------------------------------------------------------

    #[test]
    fn speeches_get_monotonic_ids() {
        let db = test_db();
        let first = db
            .insert_speech("A", "one", "General Debate", 60, now())
            .unwrap();
        let second = db
            .insert_speech("B", "two", "General Debate", 60, now())
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn latest_speeches_orders_newest_first_with_id_tiebreak() {
        let db = test_db();
        let base = now();
        db.insert_speech("A", "oldest", "General Debate", 60, base - Duration::seconds(10))
            .unwrap();
        // Two speeches sharing a creation time: the later id wins.
        db.insert_speech("B", "tie-low", "General Debate", 60, base).unwrap();
        db.insert_speech("C", "tie-high", "General Debate", 60, base)
            .unwrap();

        let speeches = db.latest_speeches(10).unwrap();
        assert_eq!(speeches.len(), 3);
        assert_eq!(speeches[0].speaker, "C");
        assert_eq!(speeches[1].speaker, "B");
        assert_eq!(speeches[2].speaker, "A");
    }

    #[test]
    fn latest_speeches_respects_limit() {
        let db = test_db();
        for i in 0..5 {
            db.insert_speech(&format!("S{i}"), "x", "General Debate", 60, now())
                .unwrap();
        }
        assert_eq!(db.latest_speeches(2).unwrap().len(), 2);
    }

    #[test]
    fn speech_fields_round_trip() {
        let db = test_db();
        let time = now();
        let id = db
            .insert_speech("Alice", "hello", "Climate Policy", 90, time)
            .unwrap();
        let speeches = db.latest_speeches(1).unwrap();
        assert_eq!(
            speeches[0],
            Speech {
                id,
                speaker: "Alice".to_string(),
                content: "hello".to_string(),
                debate_topic: "Climate Policy".to_string(),
                duration: 90,
                speech_time: time,
                likes: 0,
            }
        );
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    #[test]
    fn resource_round_trip() {
        let db = test_db();
        let resource = Resource {
            storage_path: Some("2026/notes.pdf".to_string()),
            public_url: Some("https://x/y".to_string()),
            ..sample_resource("res-1")
        };
        db.insert_resource(&resource).unwrap();
        assert_eq!(db.get_resource("res-1").unwrap(), Some(resource));
        assert_eq!(db.get_resource("missing").unwrap(), None);
    }

    #[test]
    fn list_resources_filters_and_sorts() {
        let db = test_db();
        let old = Resource {
            category: "slides".to_string(),
            upload_time: now() - Duration::minutes(5),
            download_count: 7,
            ..sample_resource("res-old")
        };
        let fresh = Resource {
            likes: 3,
            ..sample_resource("res-new")
        };
        db.insert_resource(&old).unwrap();
        db.insert_resource(&fresh).unwrap();

        let newest = db.list_resources(None, ResourceSort::Newest).unwrap();
        assert_eq!(newest[0].id, "res-new");

        let by_downloads = db.list_resources(None, ResourceSort::Download).unwrap();
        assert_eq!(by_downloads[0].id, "res-old");

        let by_likes = db.list_resources(None, ResourceSort::Likes).unwrap();
        assert_eq!(by_likes[0].id, "res-new");

        let slides = db
            .list_resources(Some("slides"), ResourceSort::Newest)
            .unwrap();
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].id, "res-old");
    }

    #[test]
    fn increment_download_count_bumps_by_one() {
        let db = test_db();
        db.insert_resource(&sample_resource("res-1")).unwrap();
        db.increment_download_count("res-1").unwrap();
        db.increment_download_count("res-1").unwrap();
        assert_eq!(db.get_resource("res-1").unwrap().unwrap().download_count, 2);
    }

    // ------------------------------------------------------------------
    // Visit statistics
    // ------------------------------------------------------------------

    #[test]
    fn record_visit_bumps_both_counters_and_logs() {
        let db = test_db();
        for _ in 0..3 {
            db.record_visit("/", "203.0.113.9", "test-agent", now()).unwrap();
        }
        let stats = db.site_stats().unwrap();
        assert_eq!(stats.total_visits, 3);
        assert_eq!(stats.today_visits, 3);

        let conn = db.conn();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM access_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[test]
    fn same_day_reset_is_a_noop() {
        let db = test_db();
        for _ in 0..3 {
            db.record_visit("/", "203.0.113.9", "test-agent", now()).unwrap();
        }
        let today = db.site_stats().unwrap().last_reset_date;
        assert!(!db.maybe_reset_daily(today).unwrap());
        assert_eq!(db.site_stats().unwrap().today_visits, 3);
    }

    #[test]
    fn date_change_resets_today_but_not_total() {
        let db = test_db();
        for _ in 0..3 {
            db.record_visit("/", "203.0.113.9", "test-agent", now()).unwrap();
        }
        let tomorrow = db.site_stats().unwrap().last_reset_date + Duration::days(1);
        assert!(db.maybe_reset_daily(tomorrow).unwrap());

        let stats = db.site_stats().unwrap();
        assert_eq!(stats.today_visits, 0);
        assert_eq!(stats.total_visits, 3);
        assert_eq!(stats.last_reset_date, tomorrow);

        // The following check on the same "day" is a no-op again.
        assert!(!db.maybe_reset_daily(tomorrow).unwrap());
    }
}
