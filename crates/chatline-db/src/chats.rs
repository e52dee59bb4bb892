use crate::{bool_from_any_row, datetime_from_db_text, DbError, DbPool};
use chatline_models::{Chat, ChatId, UserId};
use chrono::{DateTime, Utc};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: ChatId,
    pub name: Option<String>,
    pub is_group: bool,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl ChatRow {
    pub fn into_chat(self, participant_ids: Vec<UserId>) -> Chat {
        Chat {
            id: self.id,
            name: self.name,
            is_group: self.is_group,
            creator_id: self.creator_id,
            participant_ids,
            created_at: self.created_at,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ChatRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            is_group: bool_from_any_row(row, "is_group")?,
            creator_id: row.try_get("creator_id")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

/// Create a chat and its initial participant list in one transaction, so a
/// half-created chat is never visible to the membership notifier.
pub async fn create_chat(
    pool: &DbPool,
    id: ChatId,
    name: Option<&str>,
    is_group: bool,
    creator_id: UserId,
    participant_ids: &[UserId],
) -> Result<ChatRow, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ChatRow>(
        "INSERT INTO chats (id, name, is_group, creator_id)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, is_group, creator_id, created_at",
    )
    .bind(id)
    .bind(name)
    .bind(if is_group { 1_i32 } else { 0_i32 })
    .bind(creator_id)
    .fetch_one(&mut *tx)
    .await?;

    for user_id in participant_ids {
        sqlx::query("INSERT INTO chat_participants (chat_id, user_id) VALUES ($1, $2)")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(row)
}

pub async fn get_chat(pool: &DbPool, id: ChatId) -> Result<Option<ChatRow>, DbError> {
    let row = sqlx::query_as::<_, ChatRow>(
        "SELECT id, name, is_group, creator_id, created_at FROM chats WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete_chat(pool: &DbPool, id: ChatId) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM messages WHERE chat_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chat_participants WHERE chat_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn get_participants(pool: &DbPool, chat_id: ChatId) -> Result<Vec<UserId>, DbError> {
    let rows: Vec<(UserId,)> =
        sqlx::query_as("SELECT user_id FROM chat_participants WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn is_participant(
    pool: &DbPool,
    chat_id: ChatId,
    user_id: UserId,
) -> Result<bool, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chat_participants WHERE chat_id = $1 AND user_id = $2",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn add_participant(
    pool: &DbPool,
    chat_id: ChatId,
    user_id: UserId,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO chat_participants (chat_id, user_id)
         SELECT $1, $2
         WHERE NOT EXISTS (SELECT 1 FROM chat_participants WHERE chat_id = $1 AND user_id = $2)",
    )
    .bind(chat_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_participant(
    pool: &DbPool,
    chat_id: ChatId,
    user_id: UserId,
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM chat_participants WHERE chat_id = $1 AND user_id = $2")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// An existing one-on-one chat between two users, if any. Direct chats are
/// deduplicated at creation time rather than enforced by schema.
pub async fn find_direct_chat(
    pool: &DbPool,
    a: UserId,
    b: UserId,
) -> Result<Option<ChatRow>, DbError> {
    let row = sqlx::query_as::<_, ChatRow>(
        "SELECT c.id, c.name, c.is_group, c.creator_id, c.created_at
         FROM chats c
         JOIN chat_participants pa ON pa.chat_id = c.id AND pa.user_id = $1
         JOIN chat_participants pb ON pb.chat_id = c.id AND pb.user_id = $2
         WHERE c.is_group = 0
         LIMIT 1",
    )
    .bind(a)
    .bind(b)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_chats_for_user(pool: &DbPool, user_id: UserId) -> Result<Vec<ChatRow>, DbError> {
    let rows = sqlx::query_as::<_, ChatRow>(
        "SELECT c.id, c.name, c.is_group, c.creator_id, c.created_at
         FROM chats c
         JOIN chat_participants p ON p.chat_id = c.id
         WHERE p.user_id = $1
         ORDER BY c.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Every (chat_id, user_id) pair, used to seed the room registry at startup.
pub async fn all_memberships(pool: &DbPool) -> Result<Vec<(ChatId, UserId)>, DbError> {
    let rows: Vec<(ChatId, UserId)> =
        sqlx::query_as("SELECT chat_id, user_id FROM chat_participants")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, users};

    async fn pool_with_users(ids: &[UserId]) -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        for id in ids {
            users::create_user(
                &pool,
                *id,
                &format!("user{id}"),
                &format!("user{id}@example.com"),
                "hash",
            )
            .await
            .expect("create user");
        }
        pool
    }

    #[tokio::test]
    async fn create_chat_records_participants() {
        let pool = pool_with_users(&[1, 2, 3]).await;

        let chat = create_chat(&pool, 100, Some("room"), true, 1, &[1, 2, 3])
            .await
            .expect("create chat");
        assert!(chat.is_group);

        let mut members = get_participants(&pool, 100).await.expect("participants");
        members.sort_unstable();
        assert_eq!(members, vec![1, 2, 3]);
        assert!(is_participant(&pool, 100, 2).await.expect("query"));
        assert!(!is_participant(&pool, 100, 9).await.expect("query"));
    }

    #[tokio::test]
    async fn direct_chat_lookup_ignores_groups() {
        let pool = pool_with_users(&[1, 2]).await;

        create_chat(&pool, 100, Some("group"), true, 1, &[1, 2])
            .await
            .expect("group chat");
        assert!(find_direct_chat(&pool, 1, 2)
            .await
            .expect("query")
            .is_none());

        create_chat(&pool, 101, None, false, 1, &[1, 2])
            .await
            .expect("direct chat");
        let found = find_direct_chat(&pool, 2, 1)
            .await
            .expect("query")
            .expect("exists");
        assert_eq!(found.id, 101);
    }

    #[tokio::test]
    async fn add_participant_is_idempotent() {
        let pool = pool_with_users(&[1, 2]).await;
        create_chat(&pool, 100, Some("room"), true, 1, &[1])
            .await
            .expect("chat");

        add_participant(&pool, 100, 2).await.expect("add");
        add_participant(&pool, 100, 2).await.expect("add again");
        assert_eq!(get_participants(&pool, 100).await.expect("query").len(), 2);

        remove_participant(&pool, 100, 2).await.expect("remove");
        remove_participant(&pool, 100, 2).await.expect("remove again");
        assert_eq!(get_participants(&pool, 100).await.expect("query"), vec![1]);
    }

    #[tokio::test]
    async fn delete_chat_drops_messages_and_participants() {
        let pool = pool_with_users(&[1, 2]).await;
        create_chat(&pool, 100, None, false, 1, &[1, 2])
            .await
            .expect("chat");
        crate::messages::create_message(&pool, 500, 100, 1, "hello")
            .await
            .expect("message");

        delete_chat(&pool, 100).await.expect("delete");
        assert!(get_chat(&pool, 100).await.expect("query").is_none());
        assert!(get_participants(&pool, 100).await.expect("query").is_empty());
        assert_eq!(
            crate::messages::count_for_chat(&pool, 100).await.expect("count"),
            0
        );
    }
}
