use std::path::{Path, PathBuf};

use sqlx::{sqlite::SqliteConnection, Connection, Sqlite, Transaction};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{validate_new_user, CredentialHasher},
    config::{AppConfig, StoreMode},
    db,
    errors::StoreError,
    users::{
        dto::NewUser,
        repo_types::{StoreState, User},
    },
};

const SELECT_USER: &str =
    "SELECT id, first_name, last_name, username, email, password_hash FROM User";

/// Natural keys a user can be looked up by.
#[derive(Debug, Clone, Copy)]
pub enum UserLookup<'a> {
    Id(i64),
    Username(&'a str),
    Email(&'a str),
}

/// Persistence for user accounts over a single SQLite connection.
///
/// The connection is opened lazily on first use and reused until [`close`].
/// All operations take `&mut self`; callers sharing a store across tasks must
/// serialize access themselves.
///
/// [`close`]: UserStore::close
pub struct UserStore {
    path: PathBuf,
    hasher: CredentialHasher,
    delete_confirmation_hash: Option<String>,
    conn: Option<SqliteConnection>,
    state: StoreState,
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("path", &self.path)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl UserStore {
    pub fn new(path: impl Into<PathBuf>, hasher: CredentialHasher) -> Self {
        Self {
            path: path.into(),
            hasher,
            delete_confirmation_hash: None,
            conn: None,
            state: StoreState::Uninitialized,
        }
    }

    /// Hash that `delete_store` codes are checked against.
    pub fn with_delete_confirmation(mut self, hash: impl Into<String>) -> Self {
        self.delete_confirmation_hash = Some(hash.into());
        self
    }

    /// Build a store bound to the backing file `mode` selects.
    pub fn from_config(config: &AppConfig, mode: StoreMode) -> Result<Self, StoreError> {
        let hasher = CredentialHasher::with_cost(config.hash_cost)?;
        let mut store = Self::new(config.path_for(mode).clone(), hasher);
        store.delete_confirmation_hash = config.delete_confirmation_hash.clone();
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn hasher(&self) -> &CredentialHasher {
        &self.hasher
    }

    /// Create the backing file and the user table if absent. Safe to call
    /// repeatedly.
    #[instrument(skip(self))]
    pub async fn initialize(&mut self) -> Result<(), StoreError> {
        if self.conn.is_none() {
            let conn = db::connect(&self.path).await?;
            self.conn = Some(conn);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(StoreError::ConnectionFailure("connection unavailable".into()));
        };
        db::create_tables(conn).await?;

        if matches!(self.state, StoreState::Uninitialized | StoreState::Closed) {
            self.state = StoreState::SchemaReady;
        }
        Ok(())
    }

    async fn connection(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        if self.conn.is_none() {
            self.initialize().await?;
        }
        self.state = StoreState::Open;
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::ConnectionFailure("connection unavailable".into()))
    }

    #[instrument(skip(self))]
    pub async fn get(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        self.find(UserLookup::Id(id)).await
    }

    pub async fn find_by_username(&mut self, username: &str) -> Result<Option<User>, StoreError> {
        self.find(UserLookup::Username(username)).await
    }

    pub async fn find_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        self.find(UserLookup::Email(email)).await
    }

    async fn find(&mut self, lookup: UserLookup<'_>) -> Result<Option<User>, StoreError> {
        let conn = self.connection().await?;
        let user = fetch_user(conn, lookup).await?;
        debug!(?lookup, found = user.is_some(), "user lookup");
        Ok(user)
    }

    pub async fn count(&mut self) -> Result<i64, StoreError> {
        let conn = self.connection().await?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM User")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| StoreError::from_query(e, "count users"))?;
        Ok(count)
    }

    /// Insert a new user, hashing its password first. Returns the stored
    /// record with the id storage assigned.
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create(&mut self, user: &NewUser) -> Result<User, StoreError> {
        if let Err(e) = validate_new_user(user) {
            warn!(error = %e, "rejected new user");
            return Err(e.into());
        }
        let password_hash = self.hasher.hash(&user.password)?;

        let conn = self.connection().await?;
        let mut tx = begin(conn).await?;
        match insert_user(&mut tx, user, password_hash).await {
            Ok(created) => {
                commit(tx).await?;
                info!(user_id = created.id, "user created");
                Ok(created)
            }
            Err(e) => {
                rollback(tx, "create").await;
                Err(e)
            }
        }
    }

    /// Overwrite every mutable field of user `id`. The id carried by
    /// `updated` is ignored.
    #[instrument(skip(self, updated))]
    pub async fn update(&mut self, id: i64, updated: &NewUser) -> Result<User, StoreError> {
        if let Err(e) = validate_new_user(updated) {
            warn!(error = %e, "rejected user update");
            return Err(e.into());
        }
        let password_hash = self.hasher.hash(&updated.password)?;

        let conn = self.connection().await?;
        let mut tx = begin(conn).await?;
        match replace_user(&mut tx, id, updated, password_hash).await {
            Ok(user) => {
                commit(tx).await?;
                info!(user_id = id, "user updated");
                Ok(user)
            }
            Err(e) => {
                rollback(tx, "update").await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn delete(&mut self, id: i64) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        let mut tx = begin(conn).await?;
        match remove_user(&mut tx, id).await {
            Ok(()) => {
                commit(tx).await?;
                info!(user_id = id, "user deleted");
                Ok(())
            }
            Err(e) => {
                rollback(tx, "delete").await;
                Err(e)
            }
        }
    }

    /// Look a user up by username and return it only if `password` verifies.
    pub async fn verify_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, StoreError> {
        let Some(user) = self.find_by_username(username).await? else {
            return Ok(None);
        };
        if self.hasher.verify(password, &user.password_hash) {
            Ok(Some(user))
        } else {
            warn!(user_id = user.id, "password mismatch");
            Ok(None)
        }
    }

    /// Release the connection. Idempotent; a later operation reopens it.
    pub async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(|e| {
                error!(error = %e, "closing connection failed");
                StoreError::ConnectionFailure(e.to_string())
            })?;
            info!(path = %self.path.display(), "connection closed");
        }
        self.state = StoreState::Closed;
        Ok(())
    }

    /// Irreversibly delete this store's backing file. `confirmation_code` must
    /// verify against the configured confirmation hash.
    #[instrument(skip(self, confirmation_code))]
    pub async fn delete_store(&mut self, confirmation_code: &str) -> Result<(), StoreError> {
        let authorized = self
            .delete_confirmation_hash
            .as_deref()
            .is_some_and(|hash| self.hasher.verify(confirmation_code, hash));
        if !authorized {
            warn!("incorrect confirmation code, backing store kept");
            return Err(StoreError::InvalidCode);
        }

        self.close().await?;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(error = %e, "removing backing store failed");
                return Err(StoreError::Storage(format!("{}: {e}", self.path.display())));
            }
        }
        self.state = StoreState::Uninitialized;
        warn!("backing store deleted");
        Ok(())
    }
}

async fn begin(conn: &mut SqliteConnection) -> Result<Transaction<'_, Sqlite>, StoreError> {
    conn.begin()
        .await
        .map_err(|e| StoreError::from_query(e, "begin transaction"))
}

async fn commit(tx: Transaction<'_, Sqlite>) -> Result<(), StoreError> {
    tx.commit().await.map_err(|e| {
        error!(error = %e, "commit failed");
        StoreError::from_query(e, "commit transaction")
    })
}

async fn rollback(tx: Transaction<'_, Sqlite>, op: &'static str) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, op, "rollback failed");
    }
}

async fn fetch_user(
    conn: &mut SqliteConnection,
    lookup: UserLookup<'_>,
) -> Result<Option<User>, StoreError> {
    let sql = match lookup {
        UserLookup::Id(_) => format!("{SELECT_USER} WHERE id = ?"),
        UserLookup::Username(_) => format!("{SELECT_USER} WHERE username = ?"),
        UserLookup::Email(_) => format!("{SELECT_USER} WHERE email = ?"),
    };
    let query = sqlx::query_as::<_, User>(&sql);
    let query = match lookup {
        UserLookup::Id(id) => query.bind(id),
        UserLookup::Username(username) => query.bind(username),
        UserLookup::Email(email) => query.bind(email),
    };
    query
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StoreError::from_query(e, "get user"))
}

async fn ensure_unique(conn: &mut SqliteConnection, user: &NewUser) -> Result<(), StoreError> {
    let mut checks = vec![
        (UserLookup::Username(&user.username), format!("username {}", user.username)),
        (UserLookup::Email(&user.email), format!("email {}", user.email)),
    ];
    if let Some(id) = user.id {
        checks.insert(0, (UserLookup::Id(id), format!("id {id}")));
    }
    for (lookup, label) in checks {
        if fetch_user(conn, lookup).await?.is_some() {
            warn!(key = %label, "duplicate user");
            return Err(StoreError::DuplicateKey(label));
        }
    }
    Ok(())
}

async fn insert_user(
    conn: &mut SqliteConnection,
    user: &NewUser,
    password_hash: String,
) -> Result<User, StoreError> {
    ensure_unique(conn, user).await?;

    // A NULL id lets SQLite assign the next rowid.
    let result = sqlx::query(
        r#"
        INSERT INTO User (id, first_name, last_name, username, email, password_hash)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&password_hash)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::from_query(e, "insert user"))?;

    Ok(User {
        id: result.last_insert_rowid(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        password_hash,
    })
}

async fn replace_user(
    conn: &mut SqliteConnection,
    id: i64,
    user: &NewUser,
    password_hash: String,
) -> Result<User, StoreError> {
    if fetch_user(conn, UserLookup::Id(id)).await?.is_none() {
        warn!(user_id = id, "update target not found");
        return Err(StoreError::NotFound(id));
    }

    sqlx::query(
        r#"
        UPDATE User
        SET first_name = ?, last_name = ?, username = ?, email = ?, password_hash = ?
        WHERE id = ?
        "#,
    )
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&password_hash)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::from_query(e, "update user"))?;

    Ok(User {
        id,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        password_hash,
    })
}

async fn remove_user(conn: &mut SqliteConnection, id: i64) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM User WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::from_query(e, "delete user"))?;
    if result.rows_affected() == 0 {
        warn!(user_id = id, "delete target not found");
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::cheap_hasher;

    fn temp_store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = UserStore::new(dir.path().join("accounts_test.db"), cheap_hasher());
        (dir, store)
    }

    fn jose() -> NewUser {
        NewUser {
            id: Some(1),
            first_name: "Jose".into(),
            last_name: "Moyano".into(),
            username: "josemoyano04".into(),
            email: "josemoyano059@gmail.com".into(),
            password: "contraseña".into(),
        }
    }

    fn jose_modified() -> NewUser {
        NewUser {
            id: Some(1),
            first_name: "Jose_MODIFICADO".into(),
            last_name: "Moyano_MODIFICADO".into(),
            username: "josemoyano04_MODIFICADO".into(),
            email: "josemoyano059@gmail.com".into(),
            password: "contraseña_MODIFICADO".into(),
        }
    }

    fn ana() -> NewUser {
        NewUser {
            id: None,
            first_name: "Ana".into(),
            last_name: "Lopez".into(),
            username: "analopez".into(),
            email: "ana@example.com".into(),
            password: "ana-secret-1".into(),
        }
    }

    fn assert_matches_input(stored: &User, input: &NewUser, hasher: &CredentialHasher) {
        assert_eq!(stored.first_name, input.first_name);
        assert_eq!(stored.last_name, input.last_name);
        assert_eq!(stored.username, input.username);
        assert_eq!(stored.email, input.email);
        assert_ne!(stored.password_hash, input.password);
        assert!(hasher.verify(&input.password, &stored.password_hash));
    }

    #[tokio::test]
    async fn register_update_delete_scenario() {
        let (_dir, mut store) = temp_store();
        store.initialize().await.expect("initialize");

        let created = store.create(&jose()).await.expect("create");
        assert_eq!(created.id, 1);

        let fetched = store.get(1).await.unwrap().expect("user 1 exists");
        assert_eq!(fetched, created);
        assert_matches_input(&fetched, &jose(), store.hasher());

        store.update(1, &jose_modified()).await.expect("update");
        let fetched = store.get(1).await.unwrap().expect("user 1 still exists");
        assert_matches_input(&fetched, &jose_modified(), store.hasher());
        assert!(!store.hasher().verify("contraseña", &fetched.password_hash));
        assert!(store.find_by_username("josemoyano04").await.unwrap().is_none());

        store.delete(1).await.expect("delete");
        assert!(store.get(1).await.unwrap().is_none());

        let err = store.delete(1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(1)));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn storage_assigns_id_when_absent() {
        let (_dir, mut store) = temp_store();
        let first = store.create(&ana()).await.unwrap();
        let second = store
            .create(&NewUser {
                username: "ana2".into(),
                email: "ana2@example.com".into(),
                ..ana()
            })
            .await
            .unwrap();
        assert!(first.id >= 0);
        assert!(second.id > first.id);
        assert_eq!(store.get(second.id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn get_missing_or_negative_id_is_absent() {
        let (_dir, mut store) = temp_store();
        store.initialize().await.unwrap();
        assert!(store.get(999).await.unwrap().is_none());
        assert!(store.get(-1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected_and_store_unchanged() {
        let (_dir, mut store) = temp_store();
        let original = store.create(&jose()).await.unwrap();

        let same_id = NewUser {
            username: "other".into(),
            email: "other@example.com".into(),
            ..jose()
        };
        let same_username = NewUser {
            id: None,
            email: "other@example.com".into(),
            ..jose()
        };
        let same_email = NewUser {
            id: None,
            username: "other".into(),
            ..jose()
        };

        for dup in [same_id, same_username, same_email] {
            let err = store.create(&dup).await.unwrap_err();
            assert!(matches!(err, StoreError::DuplicateKey(_)), "got {err:?}");
        }

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(1).await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn storage_unique_violation_maps_to_duplicate_key() {
        let (_dir, mut store) = temp_store();
        let created = store.create(&jose()).await.unwrap();

        let conn = store.connection().await.unwrap();
        let err = sqlx::query(
            "INSERT INTO User (first_name, last_name, username, email, password_hash) \
             VALUES ('x', 'y', ?, 'z@example.com', 'h')",
        )
        .bind(&created.username)
        .execute(&mut *conn)
        .await
        .unwrap_err();

        let mapped = StoreError::from_query(err, "insert user");
        assert!(matches!(mapped, StoreError::DuplicateKey(_)), "got {mapped:?}");
    }

    #[tokio::test]
    async fn update_missing_user_is_not_found() {
        let (_dir, mut store) = temp_store();
        let err = store.update(42, &jose()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_update_rolls_back() {
        let (_dir, mut store) = temp_store();
        store.create(&jose()).await.unwrap();
        let stored_ana = store.create(&ana()).await.unwrap();

        let clash = NewUser {
            first_name: "Changed".into(),
            username: "josemoyano04".into(),
            ..ana_input_with_new_password()
        };
        let err = store.update(stored_ana.id, &clash).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)), "got {err:?}");

        let unchanged = store.get(stored_ana.id).await.unwrap().unwrap();
        assert_eq!(unchanged, stored_ana);
        assert!(store.hasher().verify("ana-secret-1", &unchanged.password_hash));
    }

    fn ana_input_with_new_password() -> NewUser {
        NewUser {
            password: "another-secret".into(),
            ..ana()
        }
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_storage() {
        let (_dir, mut store) = temp_store();
        let short = NewUser {
            password: "short".into(),
            ..jose()
        };
        let err = store.create(&short).await.unwrap_err();
        assert!(matches!(err, StoreError::ValidationFailure(_)));

        let bad_email = NewUser {
            email: "not-an-email".into(),
            ..jose()
        };
        let err = store.create(&bad_email).await.unwrap_err();
        assert!(matches!(err, StoreError::ValidationFailure(_)));

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn verify_credentials_checks_hash() {
        let (_dir, mut store) = temp_store();
        let created = store.create(&jose()).await.unwrap();

        let ok = store
            .verify_credentials("josemoyano04", "contraseña")
            .await
            .unwrap();
        assert_eq!(ok, Some(created));
        assert!(store
            .verify_credentials("josemoyano04", "wrong-password")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .verify_credentials("nobody", "contraseña")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lookup_by_natural_keys() {
        let (_dir, mut store) = temp_store();
        let created = store.create(&jose()).await.unwrap();
        assert_eq!(
            store.find_by_email("josemoyano059@gmail.com").await.unwrap(),
            Some(created.clone())
        );
        assert_eq!(
            store.find_by_username("josemoyano04").await.unwrap(),
            Some(created)
        );
        assert!(store.find_by_email("missing@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_transitions_and_reopen() {
        let (_dir, mut store) = temp_store();
        assert_eq!(store.state(), StoreState::Uninitialized);

        store.initialize().await.unwrap();
        assert_eq!(store.state(), StoreState::SchemaReady);
        store.initialize().await.unwrap();
        assert_eq!(store.state(), StoreState::SchemaReady);

        store.create(&jose()).await.unwrap();
        assert_eq!(store.state(), StoreState::Open);

        store.close().await.unwrap();
        assert_eq!(store.state(), StoreState::Closed);
        store.close().await.unwrap();
        assert_eq!(store.state(), StoreState::Closed);

        // Data survives a close; the connection is reacquired lazily.
        assert!(store.get(1).await.unwrap().is_some());
        assert_eq!(store.state(), StoreState::Open);
    }

    #[tokio::test]
    async fn close_without_open_is_safe() {
        let (dir, mut store) = temp_store();
        store.close().await.unwrap();
        assert_eq!(store.state(), StoreState::Closed);
        assert!(!dir.path().join("accounts_test.db").exists());
    }

    #[tokio::test]
    async fn operations_initialize_lazily() {
        let (dir, mut store) = temp_store();
        assert!(store.get(1).await.unwrap().is_none());
        assert!(dir.path().join("accounts_test.db").exists());
    }

    #[tokio::test]
    async fn delete_store_requires_matching_code() {
        let dir = tempfile::tempdir().unwrap();
        let hasher = cheap_hasher();
        let code_hash = hasher.hash("borrar-todo").unwrap();
        let path = dir.path().join("accounts_test.db");
        let mut store = UserStore::new(&path, hasher).with_delete_confirmation(code_hash);

        store.create(&jose()).await.unwrap();

        let err = store.delete_store("wrong-code").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCode));
        assert!(path.exists());
        assert_eq!(store.count().await.unwrap(), 1);

        store.delete_store("borrar-todo").await.expect("delete store");
        assert!(!path.exists());
        assert_eq!(store.state(), StoreState::Uninitialized);

        // A fresh, empty store is created on next use.
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_store_without_configured_hash_is_refused() {
        let (dir, mut store) = temp_store();
        store.initialize().await.unwrap();
        let err = store.delete_store("anything").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCode));
        assert!(dir.path().join("accounts_test.db").exists());
    }

    #[test]
    fn from_config_binds_mode_path() {
        let config = AppConfig {
            database_path: PathBuf::from("prod.db"),
            test_database_path: PathBuf::from("isolated.db"),
            hash_cost: crate::auth::HashCost {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            ..AppConfig::default()
        };
        let store = UserStore::from_config(&config, StoreMode::Test).unwrap();
        assert_eq!(store.path(), Path::new("isolated.db"));
        assert_eq!(store.state(), StoreState::Uninitialized);

        let bad = AppConfig {
            hash_cost: crate::auth::HashCost {
                memory_kib: 1024,
                iterations: 0,
                parallelism: 1,
            },
            ..AppConfig::default()
        };
        assert!(matches!(
            UserStore::from_config(&bad, StoreMode::Production),
            Err(StoreError::HashFailure(_))
        ));
    }
}
