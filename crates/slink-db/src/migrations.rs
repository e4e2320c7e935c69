use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use slink_types::models::{Channel, WORLD_CHAT_ID, WORLD_CHAT_NAME};

use crate::models::Kind;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            kind        TEXT NOT NULL,
            id          TEXT NOT NULL,
            data        TEXT NOT NULL,
            created_at  INTEGER NOT NULL, -- nanoseconds since the epoch
            PRIMARY KEY (kind, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_created
            ON documents(kind, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON documents(json_extract(data, '$.channelID'), created_at)
            WHERE kind = 'message';

        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_screenname
            ON documents(json_extract(data, '$.screenname'))
            WHERE kind = 'user';
        ",
    )?;

    seed_world_chat(conn)?;

    info!("Database migrations complete");
    Ok(())
}

fn seed_world_chat(conn: &Connection) -> Result<()> {
    let now = Utc::now();
    let channel = Channel {
        id: WORLD_CHAT_ID,
        name: WORLD_CHAT_NAME.to_string(),
        user_id: Uuid::nil(),
        user_ids: Default::default(),
        private: false,
        last_message_sent_at: None,
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT OR IGNORE INTO documents (kind, id, data, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            Kind::Channel.as_str(),
            channel.id.to_string(),
            serde_json::to_string(&channel)?,
            now.timestamp_nanos_opt().context("clock out of range")?,
        ],
    )?;
    Ok(())
}
