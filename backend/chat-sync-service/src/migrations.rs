use deadpool_postgres::Pool;

// Embed SQL migrations at compile time for deterministic startup
const MIG_0001: &str = include_str!("../migrations/0001_create_users.sql");
const MIG_0002: &str = include_str!("../migrations/0002_create_conversations.sql");
const MIG_0003: &str = include_str!("../migrations/0003_create_conversation_members.sql");
const MIG_0004: &str = include_str!("../migrations/0004_create_messages.sql");

/// Apply every migration in order. Statements are idempotent (`IF NOT EXISTS`),
/// so re-running against an initialized database is a no-op.
pub async fn run_all(db: &Pool) -> anyhow::Result<()> {
    let client = db.get().await?;
    for (i, sql) in [MIG_0001, MIG_0002, MIG_0003, MIG_0004]
        .into_iter()
        .enumerate()
    {
        let label = i + 1;
        client.batch_execute(sql).await.map_err(|e| {
            tracing::error!(migration = %label, error = %e, "migration failed");
            anyhow::anyhow!("migration {label}: {e}")
        })?;
        tracing::info!(migration = %label, "chat-sync-service migration applied");
    }
    Ok(())
}
