use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use common::{
    Error, NewSignal, RelayThread, Result, Side, Signal, SignalStatus, SignalUpdate,
    MAX_TAKE_PROFITS,
};

/// Columns the tracker owns. Selected by name so that columns added by other
/// processes are ignored.
const SIGNAL_COLUMNS: &str = "id, source_chat, source_message, source_title, symbol, side, \
    entry, stop_loss, tp1, tp2, tp3, tp4, hits, status, close_reason, last_announced_hit, \
    last_announced_ts, created_at, anchor_ts, last_check_ts, relay_chat, relay_message";

const SECS_PER_DAY: i64 = 86_400;

/// Durable record of every tracked signal.
///
/// Rows are never deleted. Writes are single-row; `update` refuses to lower
/// `hits`, reopen a closed signal, or replace an existing close reason.
#[derive(Clone)]
pub struct SignalStore {
    pool: SqlitePool,
}

impl SignalStore {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single pinned connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Signal store ready");
        Ok(Self { pool })
    }

    /// Insert a new open signal and return its id, or `None` when its source
    /// message is already stored. The check cursor starts at the observation
    /// time.
    pub async fn create(&self, signal: &NewSignal) -> Result<Option<i64>> {
        let tps = signal.levels.take_profits;
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                source_chat, source_message, source_title, symbol, side, entry, stop_loss,
                tp1, tp2, tp3, tp4, hits, status, created_at, anchor_ts, last_check_ts
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, 'open', ?12, ?13, ?12)
            ON CONFLICT(source_chat, source_message) DO NOTHING
            "#,
        )
        .bind(signal.source_chat)
        .bind(signal.source_message)
        .bind(&signal.source_title)
        .bind(&signal.symbol)
        .bind(signal.levels.side)
        .bind(signal.levels.entry)
        .bind(signal.levels.stop_loss)
        .bind(tps[0])
        .bind(tps[1])
        .bind(tps[2])
        .bind(tps[3])
        .bind(signal.created_at)
        .bind(signal.anchor_ts)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                chat = signal.source_chat,
                message = signal.source_message,
                "Source message already stored"
            );
            return Ok(None);
        }
        let id = result.last_insert_rowid();
        debug!(signal_id = id, symbol = %signal.symbol, "Signal inserted");
        Ok(Some(id))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Signal>> {
        let sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| signal_from_row(&row))
            .transpose()
    }

    pub async fn find_by_source(&self, chat_id: i64, message_id: i64) -> Result<Option<Signal>> {
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals WHERE source_chat = ?1 AND source_message = ?2"
        );
        sqlx::query(&sql)
            .bind(chat_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| signal_from_row(&row))
            .transpose()
    }

    /// Resolve a message to its signal: either the original source message or
    /// a relayed copy recorded with `link_message`.
    pub async fn find_by_message(&self, chat_id: i64, message_id: i64) -> Result<Option<Signal>> {
        if let Some(signal) = self.find_by_source(chat_id, message_id).await? {
            return Ok(Some(signal));
        }
        let linked: Option<i64> = sqlx::query_scalar(
            "SELECT signal_id FROM message_links WHERE chat_id = ?1 AND message_id = ?2",
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        match linked {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    /// Open signals created within the last `max_age_days`, ascending id.
    pub async fn open_signals(&self, max_age_days: i64, now: i64) -> Result<Vec<Signal>> {
        let cutoff = now - max_age_days * SECS_PER_DAY;
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals \
             WHERE status = 'open' AND created_at >= ?1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql).bind(cutoff).fetch_all(&self.pool).await?;
        rows.iter().map(signal_from_row).collect()
    }

    pub async fn count_open(&self, max_age_days: i64, now: i64) -> Result<i64> {
        let cutoff = now - max_age_days * SECS_PER_DAY;
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM signals WHERE status = 'open' AND created_at >= ?1",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Apply a partial update to one signal in a single statement.
    pub async fn update(&self, id: i64, update: &SignalUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE signals SET ");
        let mut set = qb.separated(", ");
        if let Some(hits) = update.hits {
            set.push("hits = MAX(hits, ")
                .push_bind_unseparated(i64::from(hits))
                .push_unseparated(")");
        }
        if let Some(status) = update.status {
            set.push("status = CASE WHEN status = 'closed' THEN 'closed' ELSE ")
                .push_bind_unseparated(status.as_str())
                .push_unseparated(" END");
        }
        if let Some(reason) = &update.close_reason {
            set.push("close_reason = CASE WHEN status = 'closed' THEN close_reason ELSE ")
                .push_bind_unseparated(reason.clone())
                .push_unseparated(" END");
        }
        if let Some(hit) = update.last_announced_hit {
            set.push("last_announced_hit = MAX(last_announced_hit, ")
                .push_bind_unseparated(i64::from(hit))
                .push_unseparated(")");
        }
        if let Some(ts) = update.last_announced_ts {
            set.push("last_announced_ts = ").push_bind_unseparated(ts);
        }
        if let Some(ts) = update.last_check_ts {
            set.push("last_check_ts = ").push_bind_unseparated(ts);
        }
        if let Some(thread) = update.relay {
            set.push("relay_chat = ").push_bind_unseparated(thread.chat_id);
            set.push("relay_message = ").push_bind_unseparated(thread.message_id);
        }
        qb.push(" WHERE id = ").push_bind(id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    /// Move every open signal's check cursor to `boundary`, discarding backlog.
    pub async fn warm_start(&self, boundary: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE signals SET last_check_ts = ?1 WHERE status = 'open'")
            .bind(boundary)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Id of a signal from the same chat with the same symbol and side created
    /// at or after `since`.
    pub async fn recent_duplicate(
        &self,
        chat_id: i64,
        symbol: &str,
        side: Side,
        since: i64,
    ) -> Result<Option<i64>> {
        let id = sqlx::query_scalar(
            r#"
            SELECT id FROM signals
            WHERE source_chat = ?1 AND symbol = ?2 AND side = ?3 AND created_at >= ?4
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(chat_id)
        .bind(symbol)
        .bind(side)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn link_message(&self, thread: RelayThread, signal_id: i64, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO message_links (chat_id, message_id, signal_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(chat_id, message_id) DO NOTHING
            "#,
        )
        .bind(thread.chat_id)
        .bind(thread.message_id)
        .bind(signal_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_audit(
        &self,
        signal_id: Option<i64>,
        kind: &str,
        payload: &serde_json::Value,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (signal_id, kind, payload, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(signal_id)
        .bind(kind)
        .bind(serde_json::to_string(payload)?)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn signal_from_row(row: &SqliteRow) -> Result<Signal> {
    let mut take_profits = [None; MAX_TAKE_PROFITS];
    for (i, slot) in take_profits.iter_mut().enumerate() {
        *slot = row.try_get(format!("tp{}", i + 1).as_str())?;
    }

    let relay_chat: Option<i64> = row.try_get("relay_chat")?;
    let relay_message: Option<i64> = row.try_get("relay_message")?;
    let relay = relay_chat
        .zip(relay_message)
        .map(|(chat_id, message_id)| RelayThread { chat_id, message_id });

    Ok(Signal {
        id: row.try_get("id")?,
        source_chat: row.try_get("source_chat")?,
        source_message: row.try_get("source_message")?,
        source_title: row.try_get("source_title")?,
        symbol: row.try_get("symbol")?,
        side: row.try_get::<Side, _>("side")?,
        entry: row.try_get("entry")?,
        stop_loss: row.try_get("stop_loss")?,
        take_profits,
        hits: level(row.try_get("hits")?),
        status: row.try_get::<SignalStatus, _>("status")?,
        close_reason: row.try_get("close_reason")?,
        last_announced_hit: level(row.try_get("last_announced_hit")?),
        last_announced_ts: row.try_get("last_announced_ts")?,
        created_at: row.try_get("created_at")?,
        anchor_ts: row.try_get("anchor_ts")?,
        last_check_ts: row.try_get("last_check_ts")?,
        relay,
    })
}

fn level(raw: i64) -> u8 {
    raw.clamp(0, MAX_TAKE_PROFITS as i64) as u8
}
