use crate::{datetime_from_db_text, DbError, DbPool};
use chatline_models::{ChatId, Message, MessageId, UserId};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            body: self.body,
            created_at: self.created_at,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            sender_id: row.try_get("sender_id")?,
            body: row.try_get("body")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn create_message(
    pool: &DbPool,
    id: MessageId,
    chat_id: ChatId,
    sender_id: UserId,
    body: &str,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, chat_id, sender_id, body)
         VALUES ($1, $2, $3, $4)
         RETURNING id, chat_id, sender_id, body, created_at",
    )
    .bind(id)
    .bind(chat_id)
    .bind(sender_id)
    .bind(body)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Message history, newest first. `before` pages backwards through snowflake
/// ids; this is the catch-up read path for clients that missed the live
/// broadcast.
pub async fn list_for_chat(
    pool: &DbPool,
    chat_id: ChatId,
    before: Option<MessageId>,
    limit: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = match before {
        Some(before) => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, chat_id, sender_id, body, created_at FROM messages
                 WHERE chat_id = $1 AND id < $2
                 ORDER BY id DESC LIMIT $3",
            )
            .bind(chat_id)
            .bind(before)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, chat_id, sender_id, body, created_at FROM messages
                 WHERE chat_id = $1
                 ORDER BY id DESC LIMIT $2",
            )
            .bind(chat_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

pub async fn count_for_chat(pool: &DbPool, chat_id: ChatId) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id = $1")
        .bind(chat_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chats, create_pool, run_migrations, users};

    #[tokio::test]
    async fn history_pages_newest_first() {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        users::create_user(&pool, 1, "alice", "alice@example.com", "hash")
            .await
            .expect("user");
        chats::create_chat(&pool, 100, None, false, 1, &[1])
            .await
            .expect("chat");

        for id in [501, 502, 503] {
            create_message(&pool, id, 100, 1, &format!("m{id}"))
                .await
                .expect("message");
        }

        let latest = list_for_chat(&pool, 100, None, 2).await.expect("list");
        assert_eq!(
            latest.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![503, 502]
        );

        let older = list_for_chat(&pool, 100, Some(502), 10).await.expect("list");
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), vec![501]);

        assert_eq!(count_for_chat(&pool, 100).await.expect("count"), 3);
    }
}
