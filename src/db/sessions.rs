use sqlx::SqlitePool;

use super::models::User;
use super::now_unix;
use crate::error::ApiResult;

/// Opaque bearer token: two v4 UUIDs, hex only.
fn new_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

pub async fn create(pool: &SqlitePool, user_id: &str) -> ApiResult<String> {
    let token = new_token();
    sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(now_unix())
        .execute(pool)
        .await?;
    Ok(token)
}

pub async fn find_user(pool: &SqlitePool, token: &str) -> ApiResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT users.* FROM sessions JOIN users ON users.id = sessions.user_id
         WHERE sessions.token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Returns whether a session was removed.
pub async fn delete(pool: &SqlitePool, token: &str) -> ApiResult<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{memory, models::NewUser, users};

    #[tokio::test]
    async fn test_session_round_trip() {
        let db = memory().await;
        let user = users::create(
            db.pool(),
            NewUser {
                name: "Bob".into(),
                email: "bob@example.com".into(),
                role: "user".into(),
                password_hash: "hash".into(),
            },
        )
        .await
        .unwrap();

        let token = create(db.pool(), &user.id).await.unwrap();
        assert_eq!(token.len(), 64);

        let found = find_user(db.pool(), &token).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);

        assert!(delete(db.pool(), &token).await.unwrap());
        assert!(find_user(db.pool(), &token).await.unwrap().is_none());
    }
}
