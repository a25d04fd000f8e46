use std::collections::HashMap;

use anyhow::bail;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::models::{
    BotResponse, ChatStats, Message, MessageStats, MessageWithResponses, NewMessage, SenderType,
};

const MESSAGE_COLUMNS: &str = "message_id, telegram_message_id, chat_id, sender_type, sender_id, \
     text_content, attachment_url, created_at";

const RESPONSE_COLUMNS: &str = "response_id, message_id, text_content, attachment_url, created_at";

fn message_from_row(row: &PgRow) -> anyhow::Result<Message> {
    let sender_type: String = row.get("sender_type");
    Ok(Message {
        message_id: row.get("message_id"),
        telegram_message_id: row.get("telegram_message_id"),
        chat_id: row.get("chat_id"),
        sender_type: sender_type.parse()?,
        sender_id: row.get("sender_id"),
        text_content: row.get("text_content"),
        attachment_url: row.get("attachment_url"),
        created_at: row.get("created_at"),
    })
}

fn response_from_row(row: &PgRow) -> BotResponse {
    BotResponse {
        response_id: row.get("response_id"),
        message_id: row.get("message_id"),
        text_content: row.get("text_content"),
        attachment_url: row.get("attachment_url"),
        created_at: row.get("created_at"),
    }
}

/// Loads bot responses for every message in one query and pairs them up,
/// keeping the message order.
async fn attach_responses(
    pool: &PgPool,
    messages: Vec<Message>,
) -> anyhow::Result<Vec<MessageWithResponses>> {
    let ids: Vec<i64> = messages.iter().map(|message| message.message_id).collect();
    let rows = sqlx::query(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM tutor.bot_responses \
         WHERE message_id = ANY($1) ORDER BY created_at, response_id"
    ))
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_message: HashMap<i64, Vec<BotResponse>> = HashMap::new();
    for row in &rows {
        let response = response_from_row(row);
        by_message.entry(response.message_id).or_default().push(response);
    }

    Ok(messages
        .into_iter()
        .map(|message| MessageWithResponses {
            bot_responses: by_message.remove(&message.message_id).unwrap_or_default(),
            message,
        })
        .collect())
}

/// Newest first.
pub async fn list_messages(
    pool: &PgPool,
    chat_id: Option<i64>,
    sender_type: Option<SenderType>,
    sender_id: Option<i64>,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<MessageWithResponses>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {MESSAGE_COLUMNS} FROM tutor.messages
        WHERE ($1::bigint IS NULL OR chat_id = $1)
          AND ($2::text IS NULL OR sender_type = $2)
          AND ($3::bigint IS NULL OR sender_id = $3)
        ORDER BY created_at DESC, message_id DESC
        OFFSET $4 LIMIT $5
        "#
    ))
    .bind(chat_id)
    .bind(sender_type.map(SenderType::as_str))
    .bind(sender_id)
    .bind(skip.max(0))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await?;

    let messages = rows.iter().map(message_from_row).collect::<anyhow::Result<Vec<_>>>()?;
    attach_responses(pool, messages).await
}

pub async fn get_message(
    pool: &PgPool,
    message_id: i64,
) -> anyhow::Result<Option<MessageWithResponses>> {
    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM tutor.messages WHERE message_id = $1"
    ))
    .bind(message_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let message = message_from_row(&row)?;
    Ok(attach_responses(pool, vec![message]).await?.pop())
}

pub async fn create_message(pool: &PgPool, message: &NewMessage) -> anyhow::Result<Message> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tutor.messages
        (telegram_message_id, chat_id, sender_type, sender_id, text_content, attachment_url)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(message.telegram_message_id)
    .bind(message.chat_id)
    .bind(message.sender_type.as_str())
    .bind(message.sender_id)
    .bind(&message.text_content)
    .bind(&message.attachment_url)
    .fetch_one(pool)
    .await?;

    let created = message_from_row(&row)?;
    info!(message_id = created.message_id, chat_id = created.chat_id, "message stored");
    Ok(created)
}

pub async fn create_bot_response(
    pool: &PgPool,
    message_id: i64,
    text_content: Option<&str>,
    attachment_url: Option<&str>,
) -> anyhow::Result<BotResponse> {
    let exists = sqlx::query("SELECT 1 FROM tutor.messages WHERE message_id = $1")
        .bind(message_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        bail!("message {message_id} not found");
    }

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO tutor.bot_responses (message_id, text_content, attachment_url)
        VALUES ($1, $2, $3)
        RETURNING {RESPONSE_COLUMNS}
        "#
    ))
    .bind(message_id)
    .bind(text_content)
    .bind(attachment_url)
    .fetch_one(pool)
    .await?;

    Ok(response_from_row(&row))
}

pub async fn chat_stats(pool: &PgPool, chat_id: i64) -> anyhow::Result<ChatStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total_messages,
               COUNT(*) FILTER (WHERE sender_type = 'user') AS user_messages,
               COUNT(*) FILTER (WHERE sender_type = 'bot') AS bot_messages,
               MAX(created_at) AS last_activity,
               COUNT(DISTINCT sender_id) FILTER (WHERE sender_type = 'user') AS active_users
        FROM tutor.messages
        WHERE chat_id = $1
        "#,
    )
    .bind(chat_id)
    .fetch_one(pool)
    .await?;

    Ok(ChatStats {
        chat_id,
        total_messages: row.get("total_messages"),
        user_messages: row.get("user_messages"),
        bot_messages: row.get("bot_messages"),
        last_activity: row.get("last_activity"),
        active_users: row.get("active_users"),
    })
}

pub async fn message_stats(pool: &PgPool) -> anyhow::Result<MessageStats> {
    let totals = sqlx::query(
        r#"
        SELECT (SELECT COUNT(*) FROM tutor.messages) AS total_messages,
               (SELECT COUNT(DISTINCT chat_id) FROM tutor.messages) AS total_chats,
               (SELECT COUNT(*) FROM tutor.bot_responses) AS total_responses
        "#,
    )
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query(
        "SELECT sender_type, COUNT(*) AS count FROM tutor.messages \
         GROUP BY sender_type ORDER BY sender_type",
    )
    .fetch_all(pool)
    .await?;

    let mut by_sender_type = Vec::new();
    for row in rows {
        let sender_type: SenderType = row.get::<String, _>("sender_type").parse()?;
        by_sender_type.push((sender_type, row.get::<i64, _>("count")));
    }

    Ok(MessageStats {
        total_messages: totals.get("total_messages"),
        by_sender_type,
        total_chats: totals.get("total_chats"),
        total_responses: totals.get("total_responses"),
    })
}

pub async fn search_messages(
    pool: &PgPool,
    term: &str,
    skip: i64,
    limit: i64,
) -> anyhow::Result<Vec<MessageWithResponses>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {MESSAGE_COLUMNS} FROM tutor.messages
        WHERE text_content ILIKE $1
        ORDER BY created_at DESC, message_id DESC
        OFFSET $2 LIMIT $3
        "#
    ))
    .bind(format!("%{term}%"))
    .bind(skip.max(0))
    .bind(limit.clamp(1, 1000))
    .fetch_all(pool)
    .await?;

    let messages = rows.iter().map(message_from_row).collect::<anyhow::Result<Vec<_>>>()?;
    attach_responses(pool, messages).await
}
