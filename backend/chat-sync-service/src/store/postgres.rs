use super::{ChatStore, DirectConversation, NewGroup, NewMessage, StoreError, StoreResult};
use crate::models::{Conversation, MemberPair, Message, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config as PgConfig, GenericClient, NoTls, Row};
use uuid::Uuid;

const CONVERSATION_SELECT: &str = r#"
    SELECT
        c.id, c.is_group, c.name, c.image, c.last_message_at, c.created_at,
        COALESCE(
            array_agg(cm.user_id ORDER BY cm.joined_at, cm.user_id)
                FILTER (WHERE cm.user_id IS NOT NULL),
            '{}'::uuid[]
        ) AS user_ids
    FROM conversations c
    LEFT JOIN conversation_members cm ON cm.conversation_id = c.id
"#;

const MESSAGE_SELECT: &str = r#"
    SELECT
        m.id, m.conversation_id, m.sender_id, m.content, m.image, m.created_at,
        COALESCE(
            array_agg(s.user_id ORDER BY s.seen_at, s.user_id)
                FILTER (WHERE s.user_id IS NOT NULL),
            '{}'::uuid[]
        ) AS seen_ids
    FROM messages m
    LEFT JOIN message_seen s ON s.message_id = m.id
"#;

fn row_to_user(row: &Row) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        image: row.get("image"),
        created_at: row.get("created_at"),
    }
}

fn row_to_conversation(row: &Row) -> Conversation {
    Conversation {
        id: row.get("id"),
        is_group: row.get("is_group"),
        name: row.get("name"),
        image: row.get("image"),
        last_message_at: row.get("last_message_at"),
        created_at: row.get("created_at"),
        user_ids: row.get("user_ids"),
    }
}

fn row_to_message(row: &Row) -> Message {
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        image: row.get("image"),
        created_at: row.get("created_at"),
        seen_ids: row.get("seen_ids"),
    }
}

/// Foreign key violations mean a referenced user/conversation/message is missing
fn map_write_error(what: &str, e: tokio_postgres::Error) -> StoreError {
    match e.code() {
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => {
            StoreError::NotFound(what.to_string())
        }
        Some(code) if *code == SqlState::UNIQUE_VIOLATION || *code == SqlState::CHECK_VIOLATION => {
            StoreError::Conflict(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

async fn query_conversation<C: GenericClient>(
    client: &C,
    id: Uuid,
) -> StoreResult<Option<Conversation>> {
    let sql = format!("{CONVERSATION_SELECT} WHERE c.id = $1 GROUP BY c.id");
    let row = client.query_opt(sql.as_str(), &[&id]).await?;
    Ok(row.as_ref().map(row_to_conversation))
}

async fn query_message<C: GenericClient>(client: &C, id: Uuid) -> StoreResult<Option<Message>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = $1 GROUP BY m.id");
    let row = client.query_opt(sql.as_str(), &[&id]).await?;
    Ok(row.as_ref().map(row_to_message))
}

/// PostgreSQL-backed store (deadpool-postgres over tokio-postgres)
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Build the pool and verify one connection before returning
    pub async fn connect(
        database_url: &str,
        max_connections: usize,
        connect_timeout: Duration,
    ) -> StoreResult<Self> {
        let pg_config: PgConfig = database_url.parse()?;
        let mgr = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr)
            .max_size(max_connections)
            .build()
            .map_err(|e| StoreError::Backend(format!("build pool: {e}")))?;

        match tokio::time::timeout(connect_timeout, async {
            let client = pool.get().await?;
            client.simple_query("SELECT 1").await?;
            Ok::<(), StoreError>(())
        })
        .await
        {
            Ok(Ok(())) => {
                tracing::info!(max_connections, "database pool created and verified");
                Ok(Self { pool })
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "database connection verification failed");
                Err(e)
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = connect_timeout.as_secs(),
                    "database connection verification timeout"
                );
                Err(StoreError::Backend("connection verification timed out".into()))
            }
        }
    }
}

#[async_trait]
impl ChatStore for PostgresStore {
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO users (id, email, name, image, created_at) VALUES ($1, $2, $3, $4, $5)",
                &[&user.id, &user.email, &user.name, &user.image, &user.created_at],
            )
            .await
            .map_err(|e| map_write_error("user", e))?;
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, email, name, image, created_at FROM users WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, email, name, image, created_at FROM users WHERE email = $1",
                &[&email],
            )
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn find_users(&self, ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, email, name, image, created_at FROM users WHERE id = ANY($1)",
                &[&ids],
            )
            .await?;
        let mut users: Vec<User> = rows.iter().map(row_to_user).collect();
        // Keep the caller's order (member order, seen order)
        users.sort_by_key(|u| ids.iter().position(|id| *id == u.id));
        Ok(users)
    }

    async fn list_users_except(&self, user_id: Uuid) -> StoreResult<Vec<User>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, email, name, image, created_at FROM users WHERE id <> $1 ORDER BY created_at DESC",
                &[&user_id],
            )
            .await?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    async fn find_conversation(&self, id: Uuid) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        query_conversation(&**client, id).await
    }

    async fn find_direct_conversation(
        &self,
        pair: MemberPair,
    ) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "{CONVERSATION_SELECT} WHERE NOT c.is_group AND c.direct_member_low = $1 AND c.direct_member_high = $2 GROUP BY c.id"
        );
        let row = client
            .query_opt(sql.as_str(), &[&pair.low(), &pair.high()])
            .await?;
        Ok(row.as_ref().map(row_to_conversation))
    }

    async fn create_direct_conversation(
        &self,
        pair: MemberPair,
    ) -> StoreResult<DirectConversation> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let id = Uuid::new_v4();

        // A concurrent insert of the same pair blocks here until it commits, then
        // DO NOTHING returns no row and we resolve to the committed record.
        let inserted = tx
            .query_opt(
                r#"
                INSERT INTO conversations (id, is_group, direct_member_low, direct_member_high)
                VALUES ($1, FALSE, $2, $3)
                ON CONFLICT ON CONSTRAINT conversations_direct_pair_key DO NOTHING
                RETURNING id
                "#,
                &[&id, &pair.low(), &pair.high()],
            )
            .await
            .map_err(|e| map_write_error("conversation", e))?;

        if inserted.is_none() {
            let sql = format!(
                "{CONVERSATION_SELECT} WHERE c.direct_member_low = $1 AND c.direct_member_high = $2 GROUP BY c.id"
            );
            let row = tx
                .query_one(sql.as_str(), &[&pair.low(), &pair.high()])
                .await?;
            tx.commit().await?;
            return Ok(DirectConversation::Existing(row_to_conversation(&row)));
        }

        tx.execute(
            "INSERT INTO conversation_members (conversation_id, user_id) VALUES ($1, $2), ($1, $3)",
            &[&id, &pair.low(), &pair.high()],
        )
        .await
        .map_err(|e| map_write_error("user", e))?;

        let conversation = query_conversation(&*tx, id)
            .await?
            .ok_or_else(|| StoreError::Backend("inserted conversation vanished".into()))?;
        tx.commit().await?;
        Ok(DirectConversation::Created(conversation))
    }

    async fn create_group_conversation(&self, group: NewGroup) -> StoreResult<Conversation> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let id = Uuid::new_v4();

        tx.execute(
            "INSERT INTO conversations (id, is_group, name, image) VALUES ($1, TRUE, $2, $3)",
            &[&id, &group.name, &group.image],
        )
        .await
        .map_err(|e| map_write_error("conversation", e))?;

        for member_id in &group.member_ids {
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&id, member_id],
            )
            .await
            .map_err(|e| map_write_error("user", e))?;
        }

        let conversation = query_conversation(&*tx, id)
            .await?
            .ok_or_else(|| StoreError::Backend("inserted conversation vanished".into()))?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn delete_conversation(&self, id: Uuid, member_id: Uuid) -> StoreResult<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                r#"
                DELETE FROM conversations c
                WHERE c.id = $1
                  AND EXISTS (
                      SELECT 1 FROM conversation_members cm
                      WHERE cm.conversation_id = c.id AND cm.user_id = $2
                  )
                "#,
                &[&id, &member_id],
            )
            .await?;
        Ok(deleted)
    }

    async fn list_conversations_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let sql = format!(
            r#"{CONVERSATION_SELECT}
            WHERE c.id IN (SELECT conversation_id FROM conversation_members WHERE user_id = $1)
            GROUP BY c.id
            ORDER BY c.last_message_at DESC"#
        );
        let rows = client.query(sql.as_str(), &[&user_id]).await?;
        Ok(rows.iter().map(row_to_conversation).collect())
    }

    async fn append_message(&self, new: NewMessage) -> StoreResult<(Message, Conversation)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Row lock on the conversation serializes appends, so created_at order and
        // commit order agree within a conversation.
        let bumped = tx
            .query_opt(
                r#"
                UPDATE conversations
                SET last_message_at = GREATEST(clock_timestamp(), last_message_at)
                WHERE id = $1
                RETURNING last_message_at
                "#,
                &[&new.conversation_id],
            )
            .await?;
        let Some(bumped) = bumped else {
            return Err(StoreError::NotFound(format!(
                "conversation {}",
                new.conversation_id
            )));
        };
        let created_at: DateTime<Utc> = bumped.get(0);
        let id = Uuid::new_v4();

        tx.execute(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, image, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[
                &id,
                &new.conversation_id,
                &new.sender_id,
                &new.content,
                &new.image,
                &created_at,
            ],
        )
        .await
        .map_err(|e| map_write_error("user", e))?;

        tx.execute(
            "INSERT INTO message_seen (message_id, user_id) VALUES ($1, $2)",
            &[&id, &new.sender_id],
        )
        .await?;

        let message = query_message(&*tx, id)
            .await?
            .ok_or_else(|| StoreError::Backend("inserted message vanished".into()))?;
        let conversation = query_conversation(&*tx, new.conversation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", new.conversation_id)))?;
        tx.commit().await?;
        Ok((message, conversation))
    }

    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "{MESSAGE_SELECT} WHERE m.conversation_id = $1 GROUP BY m.id ORDER BY m.created_at ASC, m.seq ASC"
        );
        let rows = client.query(sql.as_str(), &[&conversation_id]).await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    async fn latest_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "{MESSAGE_SELECT} WHERE m.conversation_id = $1 GROUP BY m.id ORDER BY m.created_at DESC, m.seq DESC LIMIT 1"
        );
        let row = client.query_opt(sql.as_str(), &[&conversation_id]).await?;
        Ok(row.as_ref().map(row_to_message))
    }

    async fn add_seen(&self, message_id: Uuid, user_id: Uuid) -> StoreResult<Message> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO message_seen (message_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&message_id, &user_id],
            )
            .await
            .map_err(|e| map_write_error("message", e))?;
        query_message(&**client, message_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))
    }
}
