use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::capability::CapabilityRecord;
use crate::models::pattern::{CoOccurrenceDaily, Pattern, TimeOfDayDaily};
use crate::models::suggestion::{
    Feedback, FeedbackAction, Suggestion, SuggestionStatus, UpdateSuggestionRequest,
};
use crate::models::synergy::SynergyOpportunity;
use crate::usage_tracker::LlmUsageDay;

/// Durable key/value store for patterns, suggestions, synergies, device
/// capabilities, feedback and daily aggregates. Single writer per key;
/// all mutation in the service goes through this type.
pub struct SuggestionStore {
    conn: Mutex<Connection>,
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_else(Utc::now))
}

fn json_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

impl SuggestionStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS patterns (
                id           TEXT PRIMARY KEY,
                pattern_type TEXT NOT NULL CHECK(pattern_type IN ('time_of_day','co_occurrence')),
                subject      TEXT NOT NULL,
                payload      TEXT NOT NULL,
                confidence   REAL NOT NULL,
                occurrences  INTEGER NOT NULL,
                created_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_patterns_type ON patterns(pattern_type, confidence DESC);
            CREATE INDEX IF NOT EXISTS idx_patterns_subject ON patterns(subject);

            CREATE TABLE IF NOT EXISTS suggestions (
                id                 TEXT PRIMARY KEY,
                source             TEXT NOT NULL CHECK(source IN ('pattern','feature','synergy','community')),
                title              TEXT NOT NULL,
                description        TEXT NOT NULL DEFAULT '',
                rationale          TEXT NOT NULL DEFAULT '',
                automation_spec    TEXT,
                confidence         REAL NOT NULL,
                category           TEXT NOT NULL CHECK(category IN ('energy','comfort','security','convenience')),
                priority           TEXT NOT NULL CHECK(priority IN ('high','medium','low')),
                status             TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','approved','rejected','deployed')),
                pattern_ref        TEXT,
                synergy_ref        TEXT,
                validated_entities TEXT NOT NULL DEFAULT '[]',
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_suggestions_status ON suggestions(status, created_at DESC);

            CREATE TABLE IF NOT EXISTS synergy_opportunities (
                id           TEXT PRIMARY KEY,
                synergy_type TEXT NOT NULL CHECK(synergy_type IN ('device_pair','weather_context','energy_context','event_context')),
                payload      TEXT NOT NULL,
                impact_score REAL NOT NULL,
                confidence   REAL NOT NULL,
                created_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_synergies_type ON synergy_opportunities(synergy_type, impact_score DESC);

            CREATE TABLE IF NOT EXISTS device_capabilities (
                device_model TEXT PRIMARY KEY,
                manufacturer TEXT NOT NULL DEFAULT '',
                payload      TEXT NOT NULL,
                source       TEXT NOT NULL CHECK(source IN ('bridge','manual','inferred')),
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_feedback (
                id            TEXT PRIMARY KEY,
                suggestion_id TEXT NOT NULL REFERENCES suggestions(id) ON DELETE CASCADE,
                action        TEXT NOT NULL CHECK(action IN ('approved','rejected','modified')),
                free_text     TEXT,
                created_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_suggestion ON user_feedback(suggestion_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS time_of_day_daily (
                date        TEXT NOT NULL,
                entity_id   TEXT NOT NULL,
                payload     TEXT NOT NULL,
                PRIMARY KEY(date, entity_id)
            );

            CREATE TABLE IF NOT EXISTS co_occurrence_daily (
                date        TEXT NOT NULL,
                combined_id TEXT NOT NULL,
                payload     TEXT NOT NULL,
                PRIMARY KEY(date, combined_id)
            );

            CREATE TABLE IF NOT EXISTS llm_usage_daily (
                date          TEXT PRIMARY KEY,
                calls         INTEGER NOT NULL DEFAULT 0,
                failed_calls  INTEGER NOT NULL DEFAULT 0,
                input_tokens  INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                est_cost_usd  REAL NOT NULL DEFAULT 0.0
            );
            ",
        )?;
        Ok(())
    }

    // ── Pattern operations ──

    /// Upsert detected patterns. Pattern ids are deterministic, so re-running
    /// the detectors refreshes existing rows instead of duplicating them.
    pub fn upsert_patterns(&self, patterns: &[Pattern]) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stored = 0;
        for p in patterns {
            let payload = serde_json::to_string(p)?;
            conn.execute(
                "INSERT INTO patterns (id, pattern_type, subject, payload, confidence, occurrences, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(id) DO UPDATE SET payload = ?4, confidence = ?5, occurrences = ?6, created_at = ?7",
                params![
                    p.pattern_id,
                    p.pattern_type(),
                    p.subject(),
                    payload,
                    p.confidence,
                    p.occurrences,
                    fmt_ts(p.created_at),
                ],
            )?;
            stored += 1;
        }
        Ok(stored)
    }

    pub fn list_patterns(
        &self,
        pattern_type: Option<&str>,
        subject: Option<&str>,
        min_confidence: Option<f64>,
        limit: usize,
    ) -> anyhow::Result<Vec<Pattern>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM patterns ORDER BY confidence DESC, created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let payload: String = row.get(0)?;
                serde_json::from_str::<Pattern>(&payload).map_err(|e| json_err(0, e))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|p| pattern_type.map_or(true, |t| p.pattern_type() == t))
            .filter(|p| subject.map_or(true, |s| p.subject() == s || p.entities().contains(&s)))
            .filter(|p| min_confidence.map_or(true, |c| p.confidence >= c))
            .take(limit)
            .collect())
    }

    pub fn get_pattern(&self, id: &str) -> anyhow::Result<Option<Pattern>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT payload FROM patterns WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str::<Pattern>(&payload).map_err(|e| json_err(0, e))
        })?;
        Ok(rows.next().transpose()?)
    }

    /// Delete patterns whose created_at is older than `days` days.
    pub fn cleanup_patterns(&self, days: i64) -> anyhow::Result<usize> {
        let cutoff = fmt_ts(Utc::now() - chrono::Duration::days(days));
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM patterns WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(count)
    }

    // ── Suggestion operations ──

    pub fn insert_suggestion(&self, s: &Suggestion) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO suggestions (id, source, title, description, rationale, automation_spec, \
             confidence, category, priority, status, pattern_ref, synergy_ref, validated_entities, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                s.id,
                s.source.as_str(),
                s.title,
                s.description,
                s.rationale,
                s.automation_spec,
                s.confidence,
                s.category.as_str(),
                s.priority.as_str(),
                s.status.as_str(),
                s.pattern_ref,
                s.synergy_ref,
                serde_json::to_string(&s.validated_entities)?,
                fmt_ts(s.created_at),
                fmt_ts(s.updated_at),
            ],
        )?;
        Ok(())
    }

    fn row_to_suggestion(row: &rusqlite::Row<'_>) -> rusqlite::Result<Suggestion> {
        let source: String = row.get(1)?;
        let category: String = row.get(7)?;
        let priority: String = row.get(8)?;
        let status: String = row.get(9)?;
        let validated: String = row.get(12)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;
        Ok(Suggestion {
            id: row.get(0)?,
            source: crate::models::suggestion::SuggestionSource::parse(&source)
                .unwrap_or(crate::models::suggestion::SuggestionSource::Pattern),
            title: row.get(2)?,
            description: row.get(3)?,
            rationale: row.get(4)?,
            automation_spec: row.get(5)?,
            confidence: row.get(6)?,
            category: crate::models::suggestion::Category::parse(&category)
                .unwrap_or(crate::models::suggestion::Category::Convenience),
            priority: crate::models::suggestion::Priority::parse(&priority)
                .unwrap_or(crate::models::suggestion::Priority::Medium),
            status: SuggestionStatus::parse(&status).unwrap_or(SuggestionStatus::Pending),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            pattern_ref: row.get(10)?,
            synergy_ref: row.get(11)?,
            validated_entities: serde_json::from_str(&validated).map_err(|e| json_err(12, e))?,
        })
    }

    const SUGGESTION_COLS: &'static str =
        "id, source, title, description, rationale, automation_spec, confidence, category, \
         priority, status, pattern_ref, synergy_ref, validated_entities, created_at, updated_at";

    pub fn get_suggestion(&self, id: &str) -> anyhow::Result<Option<Suggestion>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM suggestions WHERE id = ?1",
            Self::SUGGESTION_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::row_to_suggestion)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_suggestions(
        &self,
        status: Option<SuggestionStatus>,
        limit: usize,
    ) -> anyhow::Result<Vec<Suggestion>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM suggestions ORDER BY created_at DESC",
            Self::SUGGESTION_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], Self::row_to_suggestion)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|s| status.map_or(true, |want| s.status == want))
            .take(limit)
            .collect())
    }

    pub fn update_suggestion_status(
        &self,
        id: &str,
        status: SuggestionStatus,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE suggestions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), fmt_ts(Utc::now())],
        )?;
        Ok(count > 0)
    }

    /// Attach the materialised automation specification and the entity list
    /// that was validated while generating it.
    pub fn set_automation_spec(
        &self,
        id: &str,
        spec: &str,
        validated_entities: &[String],
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE suggestions SET automation_spec = ?2, validated_entities = ?3, updated_at = ?4 \
             WHERE id = ?1",
            params![
                id,
                spec,
                serde_json::to_string(validated_entities)?,
                fmt_ts(Utc::now()),
            ],
        )?;
        Ok(count > 0)
    }

    pub fn apply_suggestion_edit(
        &self,
        id: &str,
        edit: &UpdateSuggestionRequest,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE suggestions SET \
             title = COALESCE(?2, title), \
             description = COALESCE(?3, description), \
             rationale = COALESCE(?4, rationale), \
             automation_spec = COALESCE(?5, automation_spec), \
             updated_at = ?6 \
             WHERE id = ?1",
            params![
                id,
                edit.title,
                edit.description,
                edit.rationale,
                edit.automation_spec,
                fmt_ts(Utc::now()),
            ],
        )?;
        Ok(count > 0)
    }

    pub fn delete_suggestion(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM suggestions WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // ── Feedback operations ──

    pub fn insert_feedback(&self, f: &Feedback) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_feedback (id, suggestion_id, action, free_text, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                f.id,
                f.suggestion_id,
                f.action.as_str(),
                f.free_text,
                fmt_ts(f.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_feedback(&self, suggestion_id: &str) -> anyhow::Result<Vec<Feedback>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, suggestion_id, action, free_text, created_at FROM user_feedback \
             WHERE suggestion_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![suggestion_id], |row| {
                let action: String = row.get(2)?;
                let created_at: String = row.get(4)?;
                Ok(Feedback {
                    id: row.get(0)?,
                    suggestion_id: row.get(1)?,
                    action: FeedbackAction::parse(&action).unwrap_or(FeedbackAction::Modified),
                    free_text: row.get(3)?,
                    created_at: parse_ts(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Capability operations ──

    pub fn upsert_capability(&self, record: &CapabilityRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO device_capabilities (device_model, manufacturer, payload, source, last_updated) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(device_model) DO UPDATE SET \
             manufacturer = ?2, payload = ?3, source = ?4, last_updated = ?5",
            params![
                record.device_model,
                record.manufacturer,
                payload,
                record.source.as_str(),
                fmt_ts(record.last_updated),
            ],
        )?;
        Ok(())
    }

    pub fn get_capability(&self, model: &str) -> anyhow::Result<Option<CapabilityRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT payload FROM device_capabilities WHERE device_model = ?1")?;
        let mut rows = stmt.query_map(params![model], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str::<CapabilityRecord>(&payload).map_err(|e| json_err(0, e))
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_capabilities(&self) -> anyhow::Result<Vec<CapabilityRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT payload FROM device_capabilities ORDER BY device_model")?;
        let rows = stmt
            .query_map([], |row| {
                let payload: String = row.get(0)?;
                serde_json::from_str::<CapabilityRecord>(&payload).map_err(|e| json_err(0, e))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// (total, stale) capability record counts for the health endpoint.
    pub fn capability_stats(&self, now: DateTime<Utc>) -> anyhow::Result<(usize, usize)> {
        let records = self.list_capabilities()?;
        let stale = records.iter().filter(|r| r.is_stale(now)).count();
        Ok((records.len(), stale))
    }

    // ── Synergy operations ──

    pub fn upsert_synergies(&self, synergies: &[SynergyOpportunity]) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stored = 0;
        for s in synergies {
            let payload = serde_json::to_string(s)?;
            conn.execute(
                "INSERT INTO synergy_opportunities (id, synergy_type, payload, impact_score, confidence, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO UPDATE SET \
                 payload = ?3, impact_score = ?4, confidence = ?5, created_at = ?6",
                params![
                    s.synergy_id,
                    s.synergy_type.as_str(),
                    payload,
                    s.impact_score,
                    s.confidence,
                    fmt_ts(s.created_at),
                ],
            )?;
            stored += 1;
        }
        Ok(stored)
    }

    pub fn list_synergies(&self, limit: usize) -> anyhow::Result<Vec<SynergyOpportunity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM synergy_opportunities ORDER BY impact_score DESC, created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let payload: String = row.get(0)?;
                serde_json::from_str::<SynergyOpportunity>(&payload).map_err(|e| json_err(0, e))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().take(limit).collect())
    }

    pub fn get_synergy(&self, id: &str) -> anyhow::Result<Option<SynergyOpportunity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT payload FROM synergy_opportunities WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str::<SynergyOpportunity>(&payload).map_err(|e| json_err(0, e))
        })?;
        Ok(rows.next().transpose()?)
    }

    // ── Daily aggregate operations ──

    /// Best-effort write; callers log and continue on failure so pattern
    /// emission never depends on the aggregate path.
    pub fn upsert_time_of_day_daily(&self, rows: &[TimeOfDayDaily]) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stored = 0;
        for r in rows {
            let payload = serde_json::to_string(r)?;
            conn.execute(
                "INSERT INTO time_of_day_daily (date, entity_id, payload) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(date, entity_id) DO UPDATE SET payload = ?3",
                params![r.date.to_string(), r.entity_id, payload],
            )?;
            stored += 1;
        }
        Ok(stored)
    }

    pub fn upsert_co_occurrence_daily(&self, rows: &[CoOccurrenceDaily]) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stored = 0;
        for r in rows {
            let payload = serde_json::to_string(r)?;
            conn.execute(
                "INSERT INTO co_occurrence_daily (date, combined_id, payload) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(date, combined_id) DO UPDATE SET payload = ?3",
                params![r.date.to_string(), r.combined_id, payload],
            )?;
            stored += 1;
        }
        Ok(stored)
    }

    // ── LLM usage operations ──

    pub fn add_llm_usage(&self, day: &LlmUsageDay) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO llm_usage_daily (date, calls, failed_calls, input_tokens, output_tokens, est_cost_usd) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(date) DO UPDATE SET \
             calls = calls + ?2, failed_calls = failed_calls + ?3, \
             input_tokens = input_tokens + ?4, output_tokens = output_tokens + ?5, \
             est_cost_usd = est_cost_usd + ?6",
            params![
                day.date.to_string(),
                day.calls,
                day.failed_calls,
                day.input_tokens,
                day.output_tokens,
                day.est_cost_usd,
            ],
        )?;
        Ok(())
    }

    pub fn get_llm_usage(&self, date: chrono::NaiveDate) -> anyhow::Result<Option<LlmUsageDay>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT date, calls, failed_calls, input_tokens, output_tokens, est_cost_usd \
             FROM llm_usage_daily WHERE date = ?1",
        )?;
        let mut rows = stmt.query_map(params![date.to_string()], |row| {
            let date_str: String = row.get(0)?;
            Ok(LlmUsageDay {
                date: date_str.parse().unwrap_or(date),
                calls: row.get(1)?,
                failed_calls: row.get(2)?,
                input_tokens: row.get(3)?,
                output_tokens: row.get(4)?,
                est_cost_usd: row.get(5)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    // ── Counts for health/stats ──

    pub fn count(&self, table: Table) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |r| {
                r.get(0)
            })?;
        Ok(count as usize)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Table {
    Patterns,
    Suggestions,
    Synergies,
    Capabilities,
    Feedback,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Patterns => "patterns",
            Table::Suggestions => "suggestions",
            Table::Synergies => "synergy_opportunities",
            Table::Capabilities => "device_capabilities",
            Table::Feedback => "user_feedback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capability::{CapabilitySource, Complexity};
    use crate::models::pattern::PatternKind;
    use crate::models::suggestion::{Category, Priority, SuggestionSource};
    use crate::models::synergy::{SynergyOpportunity, SynergyType};

    fn open_store() -> (SuggestionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = SuggestionStore::open(path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    fn sample_pattern(id: &str, confidence: f64, created_at: DateTime<Utc>) -> Pattern {
        Pattern {
            pattern_id: id.to_string(),
            kind: PatternKind::TimeOfDay {
                entity_id: "light.bedroom".to_string(),
                hour: 7,
                minute: 5,
                std_minutes: 2.0,
                total_events: 30,
            },
            confidence,
            occurrences: 29,
            created_at,
        }
    }

    fn sample_suggestion(id: &str) -> Suggestion {
        Suggestion {
            id: id.to_string(),
            source: SuggestionSource::Pattern,
            title: "Morning light".to_string(),
            description: "Turn on the bedroom light at 07:05".to_string(),
            rationale: "Happens daily".to_string(),
            automation_spec: None,
            confidence: 0.95,
            category: Category::Convenience,
            priority: Priority::High,
            status: SuggestionStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            pattern_ref: Some("tod-light.bedroom-07:05".to_string()),
            synergy_ref: None,
            validated_entities: vec!["light.bedroom".to_string()],
        }
    }

    #[test]
    fn patterns_upsert_and_filter() {
        let (store, _dir) = open_store();
        let now = Utc::now();
        store
            .upsert_patterns(&[
                sample_pattern("p1", 0.95, now),
                sample_pattern("p2", 0.72, now),
            ])
            .unwrap();
        // Upserting the same id again must not duplicate.
        store.upsert_patterns(&[sample_pattern("p1", 0.96, now)]).unwrap();

        let all = store.list_patterns(None, None, None, 100).unwrap();
        assert_eq!(all.len(), 2);
        let strong = store.list_patterns(None, None, Some(0.9), 100).unwrap();
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].pattern_id, "p1");
        assert_eq!(strong[0].confidence, 0.96);

        let by_entity = store
            .list_patterns(None, Some("light.bedroom"), None, 100)
            .unwrap();
        assert_eq!(by_entity.len(), 2);
    }

    #[test]
    fn cleanup_removes_only_old_patterns() {
        let (store, _dir) = open_store();
        let now = Utc::now();
        store
            .upsert_patterns(&[
                sample_pattern("old", 0.9, now - chrono::Duration::days(45)),
                sample_pattern("new", 0.9, now),
            ])
            .unwrap();
        let removed = store.cleanup_patterns(30).unwrap();
        assert_eq!(removed, 1);
        let rest = store.list_patterns(None, None, None, 100).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].pattern_id, "new");
    }

    #[test]
    fn suggestion_lifecycle() {
        let (store, _dir) = open_store();
        store.insert_suggestion(&sample_suggestion("s1")).unwrap();

        let loaded = store.get_suggestion("s1").unwrap().unwrap();
        assert_eq!(loaded.status, SuggestionStatus::Pending);
        assert_eq!(loaded.validated_entities, vec!["light.bedroom"]);

        assert!(store
            .update_suggestion_status("s1", SuggestionStatus::Approved)
            .unwrap());
        assert!(store
            .set_automation_spec("s1", "alias: test", &["light.bedroom".to_string()])
            .unwrap());

        let approved = store
            .list_suggestions(Some(SuggestionStatus::Approved), 10)
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].automation_spec.as_deref(), Some("alias: test"));

        assert!(store.delete_suggestion("s1").unwrap());
        assert!(store.get_suggestion("s1").unwrap().is_none());
    }

    #[test]
    fn suggestion_edit_patches_only_given_fields() {
        let (store, _dir) = open_store();
        store.insert_suggestion(&sample_suggestion("s2")).unwrap();
        let edit = UpdateSuggestionRequest {
            title: Some("Better title".to_string()),
            description: None,
            rationale: None,
            automation_spec: None,
        };
        assert!(store.apply_suggestion_edit("s2", &edit).unwrap());
        let loaded = store.get_suggestion("s2").unwrap().unwrap();
        assert_eq!(loaded.title, "Better title");
        assert_eq!(loaded.description, "Turn on the bedroom light at 07:05");
    }

    #[test]
    fn feedback_cascades_with_suggestion() {
        let (store, _dir) = open_store();
        store.insert_suggestion(&sample_suggestion("s3")).unwrap();
        store
            .insert_feedback(&Feedback {
                id: "f1".to_string(),
                suggestion_id: "s3".to_string(),
                action: FeedbackAction::Approved,
                free_text: Some("nice".to_string()),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.list_feedback("s3").unwrap().len(), 1);
        store.delete_suggestion("s3").unwrap();
        assert_eq!(store.list_feedback("s3").unwrap().len(), 0);
    }

    #[test]
    fn capability_round_trip_and_staleness() {
        let (store, _dir) = open_store();
        let record = CapabilityRecord {
            device_model: "VZM31-SN".to_string(),
            manufacturer: "Inovelli".to_string(),
            description: "Smart dimmer".to_string(),
            capabilities: Default::default(),
            raw_exposes: serde_json::json!([{"type": "light"}]),
            source: CapabilitySource::Bridge,
            last_updated: Utc::now() - chrono::Duration::days(45),
        };
        store.upsert_capability(&record).unwrap();
        let loaded = store.get_capability("VZM31-SN").unwrap().unwrap();
        assert_eq!(loaded.manufacturer, "Inovelli");
        let (total, stale) = store.capability_stats(Utc::now()).unwrap();
        assert_eq!((total, stale), (1, 1));
    }

    #[test]
    fn synergies_ordered_by_impact() {
        let (store, _dir) = open_store();
        let make = |id: &str, impact: f64| SynergyOpportunity {
            synergy_id: id.to_string(),
            synergy_type: SynergyType::DevicePair,
            devices: vec!["binary_sensor.hall_motion".to_string(), "light.hall".to_string()],
            relationship: "motion_triggers_light".to_string(),
            area: Some("hall".to_string()),
            impact_score: impact,
            complexity: Complexity::Easy,
            confidence: 0.8,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };
        store.upsert_synergies(&[make("a", 0.4), make("b", 0.9)]).unwrap();
        let listed = store.list_synergies(10).unwrap();
        assert_eq!(listed[0].synergy_id, "b");
        assert!(store.get_synergy("a").unwrap().is_some());
        assert!(store.get_synergy("zzz").unwrap().is_none());
    }

    #[test]
    fn llm_usage_accumulates_per_day() {
        let (store, _dir) = open_store();
        let date = chrono::NaiveDate::from_ymd_opt(2025, 11, 2).unwrap();
        let day = LlmUsageDay {
            date,
            calls: 5,
            failed_calls: 1,
            input_tokens: 1000,
            output_tokens: 400,
            est_cost_usd: 0.00039,
        };
        store.add_llm_usage(&day).unwrap();
        store.add_llm_usage(&day).unwrap();
        let loaded = store.get_llm_usage(date).unwrap().unwrap();
        assert_eq!(loaded.calls, 10);
        assert_eq!(loaded.failed_calls, 2);
        assert_eq!(loaded.input_tokens, 2000);
    }
}
