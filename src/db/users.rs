use sqlx::SqlitePool;

use super::models::{NewUser, User, UserChanges};
use super::now_unix;
use crate::error::{ApiError, ApiResult};

fn not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("User not found with id of {id}"))
}

pub async fn create(pool: &SqlitePool, new: NewUser) -> ApiResult<User> {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: new.name,
        email: new.email.to_lowercase(),
        role: new.role,
        password_hash: new.password_hash,
        avatar: None,
        created_at: now_unix(),
    };

    sqlx::query(
        "INSERT INTO users (id, name, email, role, password_hash, avatar, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.role)
    .bind(&user.password_hash)
    .bind(&user.avatar)
    .bind(user.created_at)
    .execute(pool)
    .await?;

    Ok(user)
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| not_found(id))
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> ApiResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// One page of users, oldest first.
pub async fn list(pool: &SqlitePool, limit: u32, offset: u32) -> ApiResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT * FROM users ORDER BY created_at, rowid LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn count(pool: &SqlitePool) -> ApiResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn update(pool: &SqlitePool, id: &str, changes: UserChanges) -> ApiResult<User> {
    let result = sqlx::query(
        "UPDATE users SET
            name = COALESCE(?, name),
            email = COALESCE(?, email),
            role = COALESCE(?, role)
         WHERE id = ?",
    )
    .bind(changes.name)
    .bind(changes.email.map(|e| e.to_lowercase()))
    .bind(changes.role)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    find_by_id(pool, id).await
}

pub async fn set_avatar(pool: &SqlitePool, id: &str, avatar: &str) -> ApiResult<User> {
    let result = sqlx::query("UPDATE users SET avatar = ? WHERE id = ?")
        .bind(avatar)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    find_by_id(pool, id).await
}

pub async fn delete(pool: &SqlitePool, id: &str) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory;

    fn alice() -> NewUser {
        NewUser {
            name: "Alice".into(),
            email: "Alice@Example.com".into(),
            role: "user".into(),
            password_hash: "hash".into(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let db = memory().await;
        let created = create(db.pool(), alice()).await.unwrap();

        assert_eq!(created.email, "alice@example.com");
        let found = find_by_id(db.pool(), &created.id).await.unwrap();
        assert_eq!(found.name, "Alice");
        assert!(find_by_email(db.pool(), "ALICE@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_bad_request() {
        let db = memory().await;
        create(db.pool(), alice()).await.unwrap();
        let err = create(db.pool(), alice()).await.unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Duplicate field value entered");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = memory().await;
        let user = create(db.pool(), alice()).await.unwrap();

        let updated = update(
            db.pool(),
            &user.id,
            UserChanges {
                name: Some("Alicia".into()),
                ..UserChanges::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.email, "alice@example.com");

        delete(db.pool(), &user.id).await.unwrap();
        assert!(matches!(
            find_by_id(db.pool(), &user.id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            delete(db.pool(), &user.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_pages() {
        let db = memory().await;
        for i in 0..3 {
            create(
                db.pool(),
                NewUser {
                    email: format!("user{i}@example.com"),
                    ..alice()
                },
            )
            .await
            .unwrap();
        }

        assert_eq!(list(db.pool(), 2, 0).await.unwrap().len(), 2);
        assert_eq!(list(db.pool(), 2, 2).await.unwrap().len(), 1);
        assert_eq!(count(db.pool()).await.unwrap(), 3);
    }
}
