//! Room and membership repository.

use super::{bounded, DbError};
use sqlx::SqlitePool;

/// A chat room. Names conventionally begin with `#`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Room {
    #[sqlx(rename = "room_id")]
    pub id: i64,
    pub name: String,
    pub created_by: i64,
    pub created_at: i64,
    pub topic: Option<String>,
    pub is_private: bool,
    pub max_members: i64,
}

/// A member's role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Moderator,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Moderator => "moderator",
            Self::Owner => "owner",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "owner" => Self::Owner,
            "moderator" => Self::Moderator,
            _ => Self::Member,
        }
    }

    /// NAMES-list sigil: `@` owner, `+` moderator, empty for members.
    pub fn sigil(&self) -> &'static str {
        match self {
            Self::Owner => "@",
            Self::Moderator => "+",
            Self::Member => "",
        }
    }
}

/// A (room, account) membership row.
#[derive(Debug, Clone)]
pub struct Membership {
    pub room_id: i64,
    pub account_id: i64,
    pub role: Role,
    pub is_muted: bool,
    pub joined_at: i64,
}

/// Repository for rooms and memberships.
pub struct RoomRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoomRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    const ROOM_COLUMNS: &'static str =
        "room_id, name, created_by, created_at, topic, is_private, max_members";

    pub async fn get_by_name(&self, name: &str) -> Result<Room, DbError> {
        bounded(async {
            sqlx::query_as::<_, Room>(&format!(
                "SELECT {} FROM rooms WHERE name = ?",
                Self::ROOM_COLUMNS
            ))
            .bind(name)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| DbError::RoomNotFound(name.to_string()))
        })
        .await
    }

    pub async fn get_by_id(&self, room_id: i64) -> Result<Room, DbError> {
        bounded(async {
            sqlx::query_as::<_, Room>(&format!(
                "SELECT {} FROM rooms WHERE room_id = ?",
                Self::ROOM_COLUMNS
            ))
            .bind(room_id)
            .fetch_optional(self.pool)
            .await?
            .ok_or_else(|| DbError::RoomNotFound(format!("#{room_id}")))
        })
        .await
    }

    /// Create a room and enroll the creator as owner in one transaction.
    pub async fn create(
        &self,
        name: &str,
        created_by: i64,
        is_private: bool,
    ) -> Result<Room, DbError> {
        bounded(async {
            let now = chrono::Utc::now().timestamp();
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                "INSERT INTO rooms (name, created_by, created_at, is_private) VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(created_by)
            .bind(now)
            .bind(is_private)
            .execute(&mut *tx)
            .await?;
            let room_id = result.last_insert_rowid();

            sqlx::query(
                "INSERT INTO room_members (room_id, account_id, role, joined_at) VALUES (?, ?, ?, ?)",
            )
            .bind(room_id)
            .bind(created_by)
            .bind(Role::Owner.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            sqlx::query_as::<_, Room>(&format!(
                "SELECT {} FROM rooms WHERE room_id = ?",
                Self::ROOM_COLUMNS
            ))
            .bind(room_id)
            .fetch_one(self.pool)
            .await
            .map_err(DbError::from)
        })
        .await
    }

    pub async fn add_member(
        &self,
        room_id: i64,
        account_id: i64,
        role: Role,
    ) -> Result<(), DbError> {
        bounded(async {
            sqlx::query(
                "INSERT INTO room_members (room_id, account_id, role, joined_at) VALUES (?, ?, ?, ?)",
            )
            .bind(room_id)
            .bind(account_id)
            .bind(role.as_str())
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn remove_member(&self, room_id: i64, account_id: i64) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("DELETE FROM room_members WHERE room_id = ? AND account_id = ?")
                .bind(room_id)
                .bind(account_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// All members of a room, in join order.
    pub async fn members(&self, room_id: i64) -> Result<Vec<Membership>, DbError> {
        bounded(async {
            let rows = sqlx::query_as::<_, (i64, i64, String, bool, i64)>(
                "SELECT room_id, account_id, role, is_muted, joined_at \
                 FROM room_members WHERE room_id = ? ORDER BY joined_at, membership_id",
            )
            .bind(room_id)
            .fetch_all(self.pool)
            .await?;

            Ok(rows
                .into_iter()
                .map(|(room_id, account_id, role, is_muted, joined_at)| Membership {
                    room_id,
                    account_id,
                    role: Role::from_str(&role),
                    is_muted,
                    joined_at,
                })
                .collect())
        })
        .await
    }

    pub async fn is_member(&self, room_id: i64, account_id: i64) -> Result<bool, DbError> {
        bounded(async {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM room_members WHERE room_id = ? AND account_id = ?",
            )
            .bind(room_id)
            .bind(account_id)
            .fetch_one(self.pool)
            .await?;
            Ok(count > 0)
        })
        .await
    }

    /// The member's role, or `None` when not a member.
    pub async fn member_role(
        &self,
        room_id: i64,
        account_id: i64,
    ) -> Result<Option<Role>, DbError> {
        bounded(async {
            let role: Option<String> = sqlx::query_scalar(
                "SELECT role FROM room_members WHERE room_id = ? AND account_id = ?",
            )
            .bind(room_id)
            .bind(account_id)
            .fetch_optional(self.pool)
            .await?;
            Ok(role.as_deref().map(Role::from_str))
        })
        .await
    }

    pub async fn update_topic(&self, room_id: i64, topic: &str) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("UPDATE rooms SET topic = ? WHERE room_id = ?")
                .bind(topic)
                .bind(room_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, room_id: i64) -> Result<(), DbError> {
        bounded(async {
            sqlx::query("DELETE FROM rooms WHERE room_id = ?")
                .bind(room_id)
                .execute(self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn list_public(&self) -> Result<Vec<Room>, DbError> {
        bounded(async {
            Ok(sqlx::query_as::<_, Room>(&format!(
                "SELECT {} FROM rooms WHERE is_private = 0 ORDER BY name",
                Self::ROOM_COLUMNS
            ))
            .fetch_all(self.pool)
            .await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::Role;
    use crate::db::{test_db, Database, DbError};

    async fn account(db: &Database, name: &str) -> i64 {
        db.accounts()
            .create(name, &"a".repeat(64), &"b".repeat(32))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn create_enrolls_creator_as_owner() {
        let db = test_db().await;
        let alice = account(&db, "alice").await;

        let room = db.rooms().create("#general", alice, false).await.unwrap();
        assert_eq!(room.name, "#general");
        assert_eq!(room.created_by, alice);
        assert!(room.topic.is_none());

        assert_eq!(
            db.rooms().member_role(room.id, alice).await.unwrap(),
            Some(Role::Owner)
        );
    }

    #[tokio::test]
    async fn membership_lifecycle() {
        let db = test_db().await;
        let alice = account(&db, "alice").await;
        let bob = account(&db, "bob").await;
        let room = db.rooms().create("#general", alice, false).await.unwrap();

        assert!(!db.rooms().is_member(room.id, bob).await.unwrap());
        db.rooms().add_member(room.id, bob, Role::Member).await.unwrap();
        assert!(db.rooms().is_member(room.id, bob).await.unwrap());

        let members = db.rooms().members(room.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].account_id, alice);
        assert_eq!(members[0].role, Role::Owner);

        db.rooms().remove_member(room.id, bob).await.unwrap();
        assert!(!db.rooms().is_member(room.id, bob).await.unwrap());
        assert_eq!(db.rooms().member_role(room.id, bob).await.unwrap(), None);
    }

    #[tokio::test]
    async fn topic_and_listing() {
        let db = test_db().await;
        let alice = account(&db, "alice").await;
        let room = db.rooms().create("#general", alice, false).await.unwrap();
        db.rooms().create("#secret", alice, true).await.unwrap();

        db.rooms().update_topic(room.id, "welcome").await.unwrap();
        let reloaded = db.rooms().get_by_name("#general").await.unwrap();
        assert_eq!(reloaded.topic.as_deref(), Some("welcome"));

        let public = db.rooms().list_public().await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].name, "#general");
    }

    #[tokio::test]
    async fn missing_room_is_not_found() {
        let db = test_db().await;
        assert!(matches!(
            db.rooms().get_by_name("#nowhere").await,
            Err(DbError::RoomNotFound(_))
        ));
    }

    #[test]
    fn role_sigils() {
        assert_eq!(Role::Owner.sigil(), "@");
        assert_eq!(Role::Moderator.sigil(), "+");
        assert_eq!(Role::Member.sigil(), "");
    }
}
