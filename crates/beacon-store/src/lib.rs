use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_core::RepoSummary;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

pub const STORE_FILE_NAME: &str = "beacon.sqlite";

/// Grouped read result: system name to its summaries in insertion order.
pub type GroupedSummaries = BTreeMap<String, Vec<RepoSummary>>;

/// One persisted fact payload for a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRecord {
    pub entity_ref: String,
    pub payload: String,
    pub collected_at: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub trait Store {
    /// Persist summaries for one system and date. Entries whose summary is
    /// empty or whitespace-only are dropped; when nothing remains, no
    /// database operation runs. Colliding (system, repo, date) keys
    /// overwrite the existing summary.
    fn save_summaries(
        &self,
        system: &str,
        date: NaiveDate,
        summaries: &[RepoSummary],
    ) -> Result<(), StoreError>;

    /// All summaries for a date, grouped by system. Systems with zero rows
    /// do not appear.
    fn summaries_for_date(&self, date: NaiveDate) -> Result<GroupedSummaries, StoreError>;

    fn summaries_for_system_on_date(
        &self,
        system: &str,
        date: NaiveDate,
    ) -> Result<Vec<RepoSummary>, StoreError>;

    fn upsert_facts(
        &self,
        retriever: &str,
        entity_ref: &str,
        payload: &str,
        collected_at: i64,
    ) -> Result<(), StoreError>;

    fn get_facts(&self, retriever: &str, entity_ref: &str)
    -> Result<Option<FactRecord>, StoreError>;

    fn list_facts(&self, retriever: &str) -> Result<Vec<FactRecord>, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
    beacon_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let workspace_root = workspace_root.as_ref();
        let beacon_dir = workspace_root.join(".beacon");
        let sqlite_path = beacon_dir.join(STORE_FILE_NAME);

        fs::create_dir_all(&beacon_dir)?;

        let conn = Connection::open(sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self { conn, beacon_dir })
    }

    pub fn beacon_dir(&self) -> &Path {
        &self.beacon_dir
    }
}

impl Store for SqliteStore {
    fn save_summaries(
        &self,
        system: &str,
        date: NaiveDate,
        summaries: &[RepoSummary],
    ) -> Result<(), StoreError> {
        let writable = summaries
            .iter()
            .filter(|entry| !entry.summary.trim().is_empty())
            .collect::<Vec<_>>();
        if writable.is_empty() {
            return Ok(());
        }

        let result = (|| -> Result<(), StoreError> {
            let tx = self.conn.unchecked_transaction()?;
            for entry in &writable {
                tx.execute(
                    r#"
                    INSERT INTO summaries (system, repo_name, summary, date)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(system, repo_name, date) DO UPDATE SET
                        summary = excluded.summary
                    "#,
                    params![system, entry.repo_name, entry.summary, date.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })();

        if let Err(err) = &result {
            tracing::warn!(system, %date, error = %err, "failed to save summaries");
        }

        result
    }

    fn summaries_for_date(&self, date: NaiveDate) -> Result<GroupedSummaries, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT system, repo_name, summary
            FROM summaries
            WHERE date = ?1
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map(params![date.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                RepoSummary {
                    repo_name: row.get(1)?,
                    summary: row.get(2)?,
                },
            ))
        })?;

        let mut grouped = GroupedSummaries::new();
        for row in rows {
            let (system, summary) = row?;
            grouped.entry(system).or_default().push(summary);
        }

        Ok(grouped)
    }

    fn summaries_for_system_on_date(
        &self,
        system: &str,
        date: NaiveDate,
    ) -> Result<Vec<RepoSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT repo_name, summary
            FROM summaries
            WHERE system = ?1 AND date = ?2
            ORDER BY rowid
            "#,
        )?;

        let rows = stmt.query_map(params![system, date.to_string()], |row| {
            Ok(RepoSummary {
                repo_name: row.get(0)?,
                summary: row.get(1)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn upsert_facts(
        &self,
        retriever: &str,
        entity_ref: &str,
        payload: &str,
        collected_at: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO facts (retriever, entity_ref, payload, collected_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(retriever, entity_ref) DO UPDATE SET
                payload = excluded.payload,
                collected_at = excluded.collected_at
            "#,
            params![retriever, entity_ref, payload, collected_at],
        )?;

        Ok(())
    }

    fn get_facts(
        &self,
        retriever: &str,
        entity_ref: &str,
    ) -> Result<Option<FactRecord>, StoreError> {
        self.conn
            .query_row(
                r#"
                SELECT entity_ref, payload, collected_at
                FROM facts
                WHERE retriever = ?1 AND entity_ref = ?2
                "#,
                params![retriever, entity_ref],
                |row| {
                    Ok(FactRecord {
                        entity_ref: row.get(0)?,
                        payload: row.get(1)?,
                        collected_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    fn list_facts(&self, retriever: &str) -> Result<Vec<FactRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT entity_ref, payload, collected_at
            FROM facts
            WHERE retriever = ?1
            ORDER BY entity_ref
            "#,
        )?;

        let rows = stmt.query_map(params![retriever], |row| {
            Ok(FactRecord {
                entity_ref: row.get(0)?,
                payload: row.get(1)?,
                collected_at: row.get(2)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            system TEXT NOT NULL,
            repo_name TEXT NOT NULL,
            summary TEXT NOT NULL,
            date TEXT NOT NULL,
            PRIMARY KEY (system, repo_name, date)
        );

        CREATE TABLE IF NOT EXISTS facts (
            retriever TEXT NOT NULL,
            entity_ref TEXT NOT NULL,
            payload TEXT NOT NULL,
            collected_at INTEGER NOT NULL,
            PRIMARY KEY (retriever, entity_ref)
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn summary(repo_name: &str, summary: &str) -> RepoSummary {
        RepoSummary {
            repo_name: repo_name.to_owned(),
            summary: summary.to_owned(),
        }
    }

    fn date(value: &str) -> NaiveDate {
        value.parse().expect("valid date")
    }

    #[test]
    fn save_summaries_upsert_is_idempotent_with_last_write_winning() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let day = date("2025-06-19");

        store
            .save_summaries("sysX", day, &[summary("repo1", "Summary 1")])
            .expect("first save");
        store
            .save_summaries("sysX", day, &[summary("repo1", "Summary 2")])
            .expect("second save");

        let rows = store
            .summaries_for_system_on_date("sysX", day)
            .expect("read rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].repo_name, "repo1");
        assert_eq!(rows[0].summary, "Summary 2");
    }

    #[test]
    fn save_summaries_skips_whitespace_only_entries() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let day = date("2025-06-19");

        store
            .save_summaries("sysX", day, &[summary("r1", "   ")])
            .expect("save");

        assert!(
            store
                .summaries_for_system_on_date("sysX", day)
                .expect("read rows")
                .is_empty()
        );
    }

    #[test]
    fn save_summaries_keeps_non_blank_entries_from_mixed_batch() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let day = date("2025-06-19");

        store
            .save_summaries(
                "sysX",
                day,
                &[summary("r1", ""), summary("r2", "Shipped a fix")],
            )
            .expect("save");

        let rows = store
            .summaries_for_system_on_date("sysX", day)
            .expect("read rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].repo_name, "r2");
    }

    #[test]
    fn summaries_for_date_groups_by_system_in_insertion_order() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        let day = date("2025-06-19");

        store
            .save_summaries("sysA", day, &[summary("repo1", "a1")])
            .expect("save");
        store
            .save_summaries("sysB", day, &[summary("repo2", "b1")])
            .expect("save");
        store
            .save_summaries("sysA", day, &[summary("repo3", "a2")])
            .expect("save");

        let grouped = store.summaries_for_date(day).expect("read grouped");

        assert_eq!(grouped.len(), 2);
        let sys_a = grouped.get("sysA").expect("sysA group");
        assert_eq!(sys_a[0].repo_name, "repo1");
        assert_eq!(sys_a[1].repo_name, "repo3");
        let sys_b = grouped.get("sysB").expect("sysB group");
        assert_eq!(sys_b.len(), 1);
        assert_eq!(sys_b[0].repo_name, "repo2");
    }

    #[test]
    fn summaries_for_date_ignores_other_dates() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store
            .save_summaries("sysA", date("2025-06-18"), &[summary("repo1", "old")])
            .expect("save");

        assert!(
            store
                .summaries_for_date(date("2025-06-19"))
                .expect("read grouped")
                .is_empty()
        );
    }

    #[test]
    fn upsert_facts_overwrites_payload_and_timestamp() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store
            .upsert_facts(
                "commit_facts",
                "service:default/a",
                r#"{"commit_count_last_week":1}"#,
                100,
            )
            .expect("first upsert");
        store
            .upsert_facts(
                "commit_facts",
                "service:default/a",
                r#"{"commit_count_last_week":4}"#,
                200,
            )
            .expect("second upsert");

        let record = store
            .get_facts("commit_facts", "service:default/a")
            .expect("read facts")
            .expect("record present");
        assert_eq!(record.collected_at, 200);
        assert!(record.payload.contains("4"));

        assert_eq!(
            store.list_facts("commit_facts").expect("list facts").len(),
            1
        );
    }

    #[test]
    fn get_facts_returns_none_for_unknown_entity() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        assert!(
            store
                .get_facts("commit_facts", "service:default/missing")
                .expect("read facts")
                .is_none()
        );
    }
}
