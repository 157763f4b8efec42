//! The identity store and the production implementations of the storage
//! boundary the lifecycle rules consume.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use signet_lifecycle::{
    GroupDirectory, LifecycleDispatcher, RuleDeps, RuleError, SessionStore,
};
use signet_model::{
    Application, Attributes, AuthenticatedSession, Group, Provider, RequestContext, Session,
    SessionKey, SignetError, User,
};

/// A pre-write failure aborts the write; keep the invariant message intact.
fn write_abort(error: RuleError) -> SignetError {
    match error {
        RuleError::Invariant(msg) => SignetError::Validation(msg),
        RuleError::SideEffect(err) => SignetError::Anyhow(err),
    }
}

fn db_err(error: sqlx::Error) -> SignetError {
    SignetError::Database(error.to_string())
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn row_to_user(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        attributes: Attributes::from_value(row.try_get::<serde_json::Value, _>("attributes")?),
    })
}

fn row_to_group(row: &PgRow) -> Result<Group, sqlx::Error> {
    Ok(Group {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

fn row_to_application(row: &PgRow) -> Result<Application, sqlx::Error> {
    Ok(Application {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
    })
}

fn row_to_provider(row: &PgRow) -> Result<Provider, sqlx::Error> {
    Ok(Provider {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_backchannel: row.try_get("is_backchannel")?,
    })
}

fn row_to_session(row: &PgRow) -> Result<Session, sqlx::Error> {
    Ok(Session {
        key: SessionKey::new(row.try_get::<String, _>("key")?),
        expiring: row.try_get("expiring")?,
        expires: row.try_get("expires")?,
    })
}

fn row_to_authenticated_session(row: &PgRow) -> Result<AuthenticatedSession, sqlx::Error> {
    Ok(AuthenticatedSession {
        session_key: SessionKey::new(row.try_get::<String, _>("session_key")?),
        user_id: row.try_get("user_id")?,
        device_id: row.try_get("device_id")?,
        last_ip: row.try_get("last_ip")?,
        last_user_agent: row.try_get("last_user_agent")?,
        expiring: row.try_get("expiring")?,
        expires: row.try_get("expires")?,
    })
}

fn attributes_value(attributes: &Attributes) -> serde_json::Value {
    serde_json::to_value(attributes).unwrap_or_else(|_| serde_json::json!({}))
}

// ---------------------------------------------------------------------------
// IdentityStore
// ---------------------------------------------------------------------------

/// Postgres store for identity entities. Writes dispatch lifecycle rules;
/// reads are plain queries.
#[derive(Clone)]
pub struct IdentityStore {
    pool: PgPool,
    dispatcher: Arc<LifecycleDispatcher>,
    deps: RuleDeps,
}

impl IdentityStore {
    pub fn new(pool: PgPool, dispatcher: Arc<LifecycleDispatcher>, deps: RuleDeps) -> Self {
        Self {
            pool,
            dispatcher,
            deps,
        }
    }

    /// Collaborator handles (cache, channels, ...) shared with the rules.
    pub fn deps(&self) -> &RuleDeps {
        &self.deps
    }

    pub fn dispatcher(&self) -> &Arc<LifecycleDispatcher> {
        &self.dispatcher
    }

    // -- users -------------------------------------------------------------

    pub async fn create_user(&self, mut user: User) -> Result<User, SignetError> {
        self.dispatcher
            .pre_write(&mut user)
            .await
            .map_err(write_abort)?;
        sqlx::query("INSERT INTO users (id, username, attributes) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(&user.username)
            .bind(attributes_value(&user.attributes))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.dispatcher.post_write(&user, true, &self.deps).await;
        Ok(user)
    }

    pub async fn update_user(&self, mut user: User) -> Result<User, SignetError> {
        self.dispatcher
            .pre_write(&mut user)
            .await
            .map_err(write_abort)?;
        let result = sqlx::query("UPDATE users SET username = $2, attributes = $3 WHERE id = $1")
            .bind(user.id)
            .bind(&user.username)
            .bind(attributes_value(&user.attributes))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(SignetError::Database(format!("user {} not found", user.id)));
        }
        self.dispatcher.post_write(&user, false, &self.deps).await;
        Ok(user)
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<bool, SignetError> {
        let row = sqlx::query("DELETE FROM users WHERE id = $1 RETURNING id, username, attributes")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let user = row_to_user(&row).map_err(db_err)?;
                self.dispatcher.post_delete(&user, &self.deps).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>, SignetError> {
        sqlx::query("SELECT id, username, attributes FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| row_to_user(&row))
            .transpose()
            .map_err(db_err)
    }

    // -- groups ------------------------------------------------------------

    pub async fn create_group(&self, mut group: Group) -> Result<Group, SignetError> {
        self.dispatcher
            .pre_write(&mut group)
            .await
            .map_err(write_abort)?;
        sqlx::query("INSERT INTO groups (id, name) VALUES ($1, $2)")
            .bind(group.id)
            .bind(&group.name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.dispatcher.post_write(&group, true, &self.deps).await;
        Ok(group)
    }

    pub async fn find_group_by_name(&self, name: &str) -> Result<Option<Group>, SignetError> {
        sqlx::query("SELECT id, name FROM groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| row_to_group(&row))
            .transpose()
            .map_err(db_err)
    }

    /// Groups the user belongs to, by name order.
    pub async fn groups_for_user(&self, user_id: Uuid) -> Result<Vec<Group>, SignetError> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.name
            FROM groups g
            JOIN user_groups ug ON ug.group_id = g.id
            WHERE ug.user_id = $1
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|row| row_to_group(row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    // -- applications --------------------------------------------------------

    pub async fn create_application(
        &self,
        mut application: Application,
    ) -> Result<Application, SignetError> {
        self.dispatcher
            .pre_write(&mut application)
            .await
            .map_err(write_abort)?;
        sqlx::query("INSERT INTO applications (id, name, slug) VALUES ($1, $2, $3)")
            .bind(application.id)
            .bind(&application.name)
            .bind(&application.slug)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.dispatcher
            .post_write(&application, true, &self.deps)
            .await;
        Ok(application)
    }

    pub async fn get_application(&self, id: Uuid) -> Result<Option<Application>, SignetError> {
        sqlx::query("SELECT id, name, slug FROM applications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| row_to_application(&row))
            .transpose()
            .map_err(db_err)
    }

    // -- providers -----------------------------------------------------------

    pub async fn create_provider(&self, mut provider: Provider) -> Result<Provider, SignetError> {
        self.dispatcher
            .pre_write(&mut provider)
            .await
            .map_err(write_abort)?;
        sqlx::query("INSERT INTO providers (id, name, is_backchannel) VALUES ($1, $2, $3)")
            .bind(provider.id)
            .bind(&provider.name)
            .bind(provider.is_backchannel)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.dispatcher.post_write(&provider, true, &self.deps).await;
        Ok(provider)
    }

    pub async fn update_provider(&self, mut provider: Provider) -> Result<Provider, SignetError> {
        self.dispatcher
            .pre_write(&mut provider)
            .await
            .map_err(write_abort)?;
        let result =
            sqlx::query("UPDATE providers SET name = $2, is_backchannel = $3 WHERE id = $1")
                .bind(provider.id)
                .bind(&provider.name)
                .bind(provider.is_backchannel)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(SignetError::Database(format!(
                "provider {} not found",
                provider.id
            )));
        }
        self.dispatcher
            .post_write(&provider, false, &self.deps)
            .await;
        Ok(provider)
    }

    pub async fn get_provider(&self, id: Uuid) -> Result<Option<Provider>, SignetError> {
        sqlx::query("SELECT id, name, is_backchannel FROM providers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| row_to_provider(&row))
            .transpose()
            .map_err(db_err)
    }

    // -- sessions ------------------------------------------------------------

    pub async fn create_session(&self, mut session: Session) -> Result<Session, SignetError> {
        self.dispatcher
            .pre_write(&mut session)
            .await
            .map_err(write_abort)?;
        sqlx::query("INSERT INTO sessions (key, expiring, expires) VALUES ($1, $2, $3)")
            .bind(session.key.as_str())
            .bind(session.expiring)
            .bind(session.expires)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        self.dispatcher.post_write(&session, true, &self.deps).await;
        Ok(session)
    }

    /// Delete a storage session directly. Dispatches post-delete for the
    /// Session entity; no core rule reacts to it, so authenticated sessions
    /// are left alone (the cascade is one-way).
    pub async fn delete_session(&self, key: &SessionKey) -> Result<bool, SignetError> {
        let row = sqlx::query(
            "DELETE FROM sessions WHERE key = $1 RETURNING key, expiring, expires",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let session = row_to_session(&row).map_err(db_err)?;
                self.dispatcher.post_delete(&session, &self.deps).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SignetError> {
        sqlx::query("SELECT key, expiring, expires FROM sessions WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(|row| row_to_session(&row))
            .transpose()
            .map_err(db_err)
    }

    pub async fn delete_authenticated_session(
        &self,
        key: &SessionKey,
    ) -> Result<bool, SignetError> {
        let row = sqlx::query(
            r#"
            DELETE FROM authenticated_sessions WHERE session_key = $1
            RETURNING session_key, user_id, device_id, last_ip, last_user_agent, expiring, expires
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let session = row_to_authenticated_session(&row).map_err(db_err)?;
                self.dispatcher.post_delete(&session, &self.deps).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_authenticated_session(
        &self,
        key: &SessionKey,
    ) -> Result<Option<AuthenticatedSession>, SignetError> {
        sqlx::query(
            r#"
            SELECT session_key, user_id, device_id, last_ip, last_user_agent, expiring, expires
            FROM authenticated_sessions WHERE session_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|row| row_to_authenticated_session(&row))
        .transpose()
        .map_err(db_err)
    }

    // -- auth boundary -------------------------------------------------------

    /// Entry point for the authentication layer after a successful login.
    pub async fn login_succeeded(&self, user: &User, request: &RequestContext) {
        self.dispatcher
            .login_succeeded(user, request, &self.deps)
            .await;
    }

    /// Entry point for the authentication layer after a password change.
    pub async fn password_changed(&self, user: &User) {
        self.dispatcher.password_changed(user, &self.deps).await;
    }

    /// Entry point for the authentication layer after a failed login attempt.
    pub async fn login_failed(&self, username: &str, request: &RequestContext) {
        self.dispatcher
            .login_failed(username, request, &self.deps)
            .await;
    }
}

// ---------------------------------------------------------------------------
// PgGroupDirectory
// ---------------------------------------------------------------------------

/// Group directory over the groups / user_groups tables.
pub struct PgGroupDirectory {
    pool: PgPool,
}

impl PgGroupDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupDirectory for PgGroupDirectory {
    async fn find_by_name(&self, name: &str) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT id, name FROM groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row_to_group(&row)).transpose()?)
    }

    async fn is_member(&self, user_id: Uuid, group_id: Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_groups WHERE user_id = $1 AND group_id = $2)",
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn add_member(&self, user_id: Uuid, group_id: Uuid) -> Result<()> {
        // Scoped transaction; the conflict clause makes a racing identical
        // add a no-op instead of a duplicate or an error.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgSessionStore
// ---------------------------------------------------------------------------

/// Session persistence over the sessions / authenticated_sessions tables.
/// Holds the dispatcher so authenticated-session saves run the pre-write
/// phase like every other write.
pub struct PgSessionStore {
    pool: PgPool,
    dispatcher: Arc<LifecycleDispatcher>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, dispatcher: Arc<LifecycleDispatcher>) -> Self {
        Self { pool, dispatcher }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn save_authenticated(&self, session: &mut AuthenticatedSession) -> Result<()> {
        self.dispatcher.pre_write(session).await?;
        sqlx::query(
            r#"
            INSERT INTO authenticated_sessions
                (session_key, user_id, device_id, last_ip, last_user_agent, expiring, expires)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_key) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                device_id = EXCLUDED.device_id,
                last_ip = EXCLUDED.last_ip,
                last_user_agent = EXCLUDED.last_user_agent,
                expiring = EXCLUDED.expiring,
                expires = EXCLUDED.expires
            "#,
        )
        .bind(session.session_key.as_str())
        .bind(session.user_id)
        .bind(&session.device_id)
        .bind(&session.last_ip)
        .bind(&session.last_user_agent)
        .bind(session.expiring)
        .bind(session.expires)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
