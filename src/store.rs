/*!
The data database client: per-user profile documents.

One table, one row per person the portal knows about, keyed by the uid
the auth DB minted for them. This is where roles and provisioning state
live. Rows are never deleted; "deleting" a user sets the `disabled` flag
and stamps who did it.

```sql
CREATE TABLE profiles (
    uid             TEXT PRIMARY KEY,
    email           TEXT UNIQUE NOT NULL,
    display_name    TEXT NOT NULL,
    email_verified  BOOL NOT NULL DEFAULT FALSE,
    role            TEXT,    /* NULL until setup completes */
    setup_requested BOOL NOT NULL DEFAULT FALSE,
    requested_role  TEXT,
    disabled        BOOL NOT NULL DEFAULT FALSE,
    created_at      TEXT NOT NULL,    /* RFC 3339 */
    created_by      TEXT NOT NULL,
    approved_at     TEXT,
    approved_by     TEXT,
    updated_at      TEXT,
    updated_by      TEXT,
    disabled_at     TEXT,
    disabled_by     TEXT
);
```

Timestamps are RFC 3339 text on purpose: lexicographic `ORDER BY
created_at` is creation order, and nothing ever does date arithmetic on
them.
*/
use std::fmt::Write;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_postgres::{Client, NoTls, Row, types::{ToSql, Type}};

use crate::user::{Profile, Role};

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'profiles'",
        "CREATE TABLE profiles (
            uid             TEXT PRIMARY KEY,
            email           TEXT UNIQUE NOT NULL,
            display_name    TEXT NOT NULL,
            email_verified  BOOL NOT NULL DEFAULT FALSE,
            role            TEXT,
            setup_requested BOOL NOT NULL DEFAULT FALSE,
            requested_role  TEXT,
            disabled        BOOL NOT NULL DEFAULT FALSE,
            created_at      TEXT NOT NULL,
            created_by      TEXT NOT NULL,
            approved_at     TEXT,
            approved_by     TEXT,
            updated_at      TEXT,
            updated_by      TEXT,
            disabled_at     TEXT,
            disabled_by     TEXT
        )",
        "DROP TABLE profiles",
    ),
];

#[derive(Debug, PartialEq)]
pub struct DbError(String);

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    fn annotate(self, annotation: &str) -> Self {
        let s = format!("{}: {}", annotation, &self.0);
        Self(s)
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            write!(&mut s, "; {}", dbe).unwrap();
        }
        DbError(s)
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError(s) }
}

impl From<DbError> for String {
    fn from(e: DbError) -> String { e.0 }
}

fn role_from_opt(s: Option<&str>) -> Result<Option<Role>, DbError> {
    match s {
        Some(s) => Ok(Some(s.parse()?)),
        None => Ok(None),
    }
}

fn profile_from_row(row: &Row) -> Result<Profile, DbError> {
    log::trace!("profile_from_row( {:?} ) called.", row);

    let role: Option<&str> = row.try_get("role")?;
    let requested_role: Option<&str> = row.try_get("requested_role")?;

    let p = Profile {
        uid: row.try_get("uid")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        email_verified: row.try_get("email_verified")?,
        role: role_from_opt(role)?,
        setup_requested: row.try_get("setup_requested")?,
        requested_role: role_from_opt(requested_role)?,
        disabled: row.try_get("disabled")?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
        approved_at: row.try_get("approved_at")?,
        approved_by: row.try_get("approved_by")?,
        updated_at: row.try_get("updated_at")?,
        updated_by: row.try_get("updated_by")?,
        disabled_at: row.try_get("disabled_at")?,
        disabled_by: row.try_get("disabled_by")?,
    };

    log::trace!("    ...profile_from_row() returning {:?}", &p);
    Ok(p)
}

pub struct Store {
    connection_string: String,
}

impl Store {
    pub fn new(connection_string: String) -> Self {
        log::trace!("Store::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "Store::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(test_stmt.to_owned(), &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(create_stmt.to_owned(), &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look
    at the ERROR level log output when testing to ensure this method did
    its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err);
            }
        }

        log::trace!("    ...nuking complete.");
        Ok(())
    }

    /// The metadata document for one uid, if there is one.
    pub async fn get_profile(
        &self,
        uid: &str,
    ) -> Result<Option<Profile>, DbError> {
        log::trace!("Store::get_profile( {:?} ) called.", uid);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT * FROM profiles WHERE uid = $1",
            &[&uid]
        ).await? {
            Some(row) => Ok(Some(profile_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Every profile, newest first.
    pub async fn get_profiles(&self) -> Result<Vec<Profile>, DbError> {
        log::trace!("Store::get_profiles() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM profiles ORDER BY created_at DESC",
            &[]
        ).await?;

        let mut profiles: Vec<Profile> = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            profiles.push(profile_from_row(row)?);
        }

        Ok(profiles)
    }

    pub async fn count_admins(&self) -> Result<i64, DbError> {
        log::trace!("Store::count_admins() called.");

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT COUNT(*) AS n FROM profiles
                WHERE role = 'Admin' AND NOT disabled",
            &[]
        ).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n)
    }

    /// Inserts a fully-formed profile (the invitation path; role already
    /// decided by the inviting admin). Errors informatively if the uid or
    /// email is already present.
    pub async fn insert_profile(&self, p: &Profile) -> Result<(), DbError> {
        log::trace!("Store::insert_profile( {:?} ) called.", &p.uid);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        if let Some(row) = t.query_opt(
            "SELECT email FROM profiles WHERE uid = $1 OR email = $2",
            &[&p.uid, &p.email]
        ).await? {
            let email: &str = row.try_get("email")?;
            return Err(DbError(format!(
                "A profile for {} already exists.", email
            )));
        }

        let role_str = p.role.map(|r| r.to_string());
        let requested_str = p.requested_role.map(|r| r.to_string());
        t.execute(
            "INSERT INTO profiles (
                uid, email, display_name, email_verified,
                role, setup_requested, requested_role, disabled,
                created_at, created_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            &[
                &p.uid, &p.email, &p.display_name, &p.email_verified,
                &role_str, &p.setup_requested, &requested_str, &p.disabled,
                &p.created_at, &p.created_by,
            ]
        ).await?;

        t.commit().await?;
        log::trace!("Inserted profile {:?} ({}).", &p.uid, &p.email);
        Ok(())
    }

    /// The bulk-invitation path: all the profile inserts run concurrently
    /// inside one transaction, after one pass that reports any emails
    /// already present.
    pub async fn insert_profiles(
        &self,
        profiles: &[Profile]
    ) -> Result<usize, DbError> {
        log::trace!(
            "Store::insert_profiles( [ {} profiles ] ) called.",
            profiles.len()
        );

        let new_emails: Vec<&str> = profiles.iter()
            .map(|p| p.email.as_str())
            .collect();

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let preexisting_rows = t.query(
            "SELECT email FROM profiles WHERE email = ANY($1)",
            &[&new_emails]
        ).await?;
        if !preexisting_rows.is_empty() {
            let mut estr = String::from(
                "Profiles already exist for the following addresses:"
            );
            for row in preexisting_rows.iter() {
                let email: &str = row.try_get("email")?;
                write!(&mut estr, "\n{}", email).map_err(|e| format!(
                    "There was an error preparing an error message: {}", &e
                ))?;
            }
            return Err(DbError(estr));
        }

        let insert_stmt = t.prepare_typed(
            "INSERT INTO profiles (
                uid, email, display_name, email_verified,
                role, setup_requested, requested_role, disabled,
                created_at, created_by
            ) VALUES ($1, $2, $3, $4, $5, FALSE, NULL, FALSE, $6, $7)",
            &[
                Type::TEXT, Type::TEXT, Type::TEXT, Type::BOOL,
                Type::TEXT, Type::TEXT, Type::TEXT,
            ]
        ).await?;

        let mut n_inserted: u64 = 0;
        {
            let role_strs: Vec<Option<String>> = profiles.iter()
                .map(|p| p.role.map(|r| r.to_string()))
                .collect();
            let pvec: Vec<[&(dyn ToSql + Sync); 7]> = profiles.iter()
                .enumerate()
                .map(|(n, p)| {
                    let params: [&(dyn ToSql + Sync); 7] = [
                        &p.uid, &p.email, &p.display_name, &p.email_verified,
                        &role_strs[n], &p.created_at, &p.created_by,
                    ];
                    params
                }).collect();

            let mut inserts = FuturesUnordered::new();
            for params in pvec.iter() {
                inserts.push(
                    t.execute(&insert_stmt, params)
                );
            }

            while let Some(res) = inserts.next().await {
                match res {
                    Ok(_) => { n_inserted += 1; },
                    Err(e) => {
                        let estr = format!(
                            "Error inserting profile into database: {}", &e
                        );
                        return Err(DbError(estr));
                    }
                }
            }
        }

        t.commit().await?;

        log::trace!("Inserted {} profiles.", &n_inserted);
        Ok(n_inserted as usize)
    }

    /**
    The first-run role-selection write, admin bootstrap included.

    For a plain `Parent`/`Teacher` selection this just writes the profile
    with that role. When the selection is `Admin` (or `request_admin` is
    set), the existing-admin count and the insert happen in ONE statement:
    zero live admins (or `allow_first_admin`) grants `Admin` outright;
    otherwise the user lands as `Parent` with a pending `Admin` request.

    The transaction locks the table first, so two users racing to be the
    first admin serialize; the loser sees an admin and goes to the queue.

    Returns the profile as written.
    */
    pub async fn setup_role(
        &self,
        uid: &str,
        email: &str,
        display_name: &str,
        email_verified: bool,
        selected: Role,
        request_admin: bool,
        allow_first_admin: bool,
    ) -> Result<Profile, DbError> {
        log::trace!(
            "Store::setup_role( {:?}, {:?}, {:?}, {}, {}, {}, {} ) called.",
            uid, email, display_name, &email_verified,
            &selected, &request_admin, &allow_first_admin
        );

        let created_at = crate::now_stamp();

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = if selected == Role::Admin || request_admin {
            t.execute("LOCK TABLE profiles IN EXCLUSIVE MODE", &[]).await
                .map_err(|e| DbError::from(e)
                    .annotate("Unable to lock profiles for admin bootstrap"))?;

            t.query_one(
                "INSERT INTO profiles (
                    uid, email, display_name, email_verified,
                    role, setup_requested, requested_role, disabled,
                    created_at, created_by
                )
                SELECT $1, $2, $3, $4,
                    CASE WHEN ok.grant_admin THEN 'Admin' ELSE 'Parent' END,
                    NOT ok.grant_admin,
                    CASE WHEN ok.grant_admin THEN NULL ELSE 'Admin' END,
                    FALSE, $6, $1
                FROM (
                    SELECT ($5 OR NOT EXISTS (
                        SELECT 1 FROM profiles
                            WHERE role = 'Admin' AND NOT disabled
                    )) AS grant_admin
                ) AS ok
                ON CONFLICT (uid) DO UPDATE
                    SET role = EXCLUDED.role,
                        setup_requested = EXCLUDED.setup_requested,
                        requested_role = EXCLUDED.requested_role
                RETURNING *",
                &[
                    &uid, &email, &display_name, &email_verified,
                    &allow_first_admin, &created_at,
                ]
            ).await?
        } else {
            let role_str = selected.to_string();
            t.query_one(
                "INSERT INTO profiles (
                    uid, email, display_name, email_verified,
                    role, setup_requested, requested_role, disabled,
                    created_at, created_by
                ) VALUES ($1, $2, $3, $4, $5, FALSE, NULL, FALSE, $6, $1)
                ON CONFLICT (uid) DO UPDATE
                    SET role = EXCLUDED.role,
                        setup_requested = FALSE,
                        requested_role = NULL
                RETURNING *",
                &[
                    &uid, &email, &display_name, &email_verified,
                    &role_str, &created_at,
                ]
            ).await?
        };

        let p = profile_from_row(&row)?;
        t.commit().await?;

        log::trace!("Role setup for {:?} wrote {:?}.", uid, &p.role);
        Ok(p)
    }

    /**
    Resolve a pending role request.

    Approval sets the role the admin granted; rejection is just approval
    with `Parent`. Either way the request fields clear and the approval
    is stamped.
    */
    pub async fn approve_role(
        &self,
        uid: &str,
        role: Role,
        approver_uid: &str,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::approve_role( {:?}, {}, {:?} ) called.",
            uid, &role, approver_uid
        );

        let stamp = crate::now_stamp();
        let role_str = role.to_string();

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE profiles
                SET role = $2, setup_requested = FALSE,
                    requested_role = NULL,
                    approved_at = $3, approved_by = $4
                WHERE uid = $1",
            &[&uid, &role_str, &stamp, &approver_uid]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no profile with uid {:?}.", uid)))
        } else {
            Ok(())
        }
    }

    /// Direct role overwrite by an admin, outside the request queue.
    pub async fn update_role(
        &self,
        uid: &str,
        role: Role,
        updater_uid: &str,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::update_role( {:?}, {}, {:?} ) called.",
            uid, &role, updater_uid
        );

        let stamp = crate::now_stamp();
        let role_str = role.to_string();

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE profiles
                SET role = $2, updated_at = $3, updated_by = $4
                WHERE uid = $1",
            &[&uid, &role_str, &stamp, &updater_uid]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no profile with uid {:?}.", uid)))
        } else {
            Ok(())
        }
    }

    /**
    The soft delete. The row stays (the portal can't remove the identity
    record anyway); the flag locks the user out everywhere that checks.
    */
    pub async fn disable_user(
        &self,
        uid: &str,
        disabler_uid: &str,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::disable_user( {:?}, {:?} ) called.",
            uid, disabler_uid
        );

        let stamp = crate::now_stamp();

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE profiles
                SET disabled = TRUE, disabled_at = $2, disabled_by = $3
                WHERE uid = $1",
            &[&uid, &stamp, &disabler_uid]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no profile with uid {:?}.", uid)))
        } else {
            Ok(())
        }
    }

    /// Keep the profile's copy of the display name in step with the
    /// auth DB. Quietly does nothing for accounts with no profile yet.
    pub async fn update_display_name(
        &self,
        uid: &str,
        display_name: &str,
    ) -> Result<(), DbError> {
        log::trace!(
            "Store::update_display_name( {:?}, {:?} ) called.",
            uid, display_name
        );

        let client = self.connect().await?;
        client.execute(
            "UPDATE profiles SET display_name = $2 WHERE uid = $1",
            &[&uid, &display_name]
        ).await?;
        Ok(())
    }

    /// Keep the profile's copy of the verified flag in step with the
    /// auth DB after a verification token is consumed.
    pub async fn set_email_verified(&self, uid: &str) -> Result<(), DbError> {
        log::trace!("Store::set_email_verified( {:?} ) called.", uid);

        let client = self.connect().await?;
        client.execute(
            "UPDATE profiles SET email_verified = TRUE WHERE uid = $1",
            &[&uid]
        ).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    /*!
    These tests assume you have a Postgres instance running on your local
    machine with resources named according to what you see in the
    `static TEST_CONNECTION &str`:

    ```text
    user: portal_test
    password: portal_test

    with write access to:

    database: portal_store_test
    ```
    */
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    pub static TEST_CONNECTION: &str =
        "host=localhost user=portal_test password='portal_test' dbname=portal_store_test";

    fn test_profile(
        uid: &str,
        email: &str,
        role: Option<Role>,
        created_at: &str,
    ) -> Profile {
        Profile {
            uid: uid.to_owned(),
            email: email.to_owned(),
            display_name: uid.to_owned(),
            email_verified: false,
            role,
            setup_requested: false,
            requested_role: None,
            disabled: false,
            created_at: created_at.to_owned(),
            created_by: uid.to_owned(),
            approved_at: None,
            approved_by: None,
            updated_at: None,
            updated_by: None,
            disabled_at: None,
            disabled_by: None,
        }
    }

    /**
    This function is for getting the database back in a blank slate state
    if a test panics partway through and leaves it munged.

    ```bash
    cargo test reset_store -- --ignored
    ```
    */
    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_store() {
        ensure_logging();
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn create_store() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn insert_get_and_ordering() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.insert_profile(&test_profile(
            "uid-a", "a@camelotacademy.org",
            Some(Role::Parent), "2024-01-01T09:00:00Z",
        )).await.unwrap();
        db.insert_profile(&test_profile(
            "uid-b", "b@camelotacademy.org",
            Some(Role::Teacher), "2024-01-03T09:00:00Z",
        )).await.unwrap();
        db.insert_profile(&test_profile(
            "uid-c", "c@camelotacademy.org",
            None, "2024-01-02T09:00:00Z",
        )).await.unwrap();

        let p = db.get_profile("uid-b").await.unwrap().unwrap();
        assert_eq!(p.role, Some(Role::Teacher));
        assert!(db.get_profile("uid-z").await.unwrap().is_none());

        // Newest first.
        let profiles = db.get_profiles().await.unwrap();
        let uids: Vec<&str> = profiles.iter().map(|p| p.uid.as_str()).collect();
        assert_eq!(uids, vec!["uid-b", "uid-c", "uid-a"]);

        // Same uid or email again is an informative error.
        let e = db.insert_profile(&test_profile(
            "uid-a", "other@camelotacademy.org",
            None, "2024-01-04T09:00:00Z",
        )).await.unwrap_err();
        assert!(String::from(e).contains("already exists"));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn first_admin_bootstrap() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        // Nobody yet, so the first Admin request is granted outright.
        let p = db.setup_role(
            "uid-one", "one@camelotacademy.org", "One", true,
            Role::Admin, true, false,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Admin));
        assert!(!p.setup_requested);
        assert_eq!(p.requested_role, None);

        // The second asker goes to the queue as an interim Parent.
        let p = db.setup_role(
            "uid-two", "two@camelotacademy.org", "Two", true,
            Role::Admin, true, false,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Parent));
        assert!(p.setup_requested);
        assert_eq!(p.requested_role, Some(Role::Admin));

        // ...unless the override flag is set.
        let p = db.setup_role(
            "uid-three", "three@camelotacademy.org", "Three", true,
            Role::Admin, true, true,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Admin));
        assert!(!p.setup_requested);

        assert_eq!(db.count_admins().await.unwrap(), 2);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn disabled_admins_do_not_count()  {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let p = db.setup_role(
            "uid-old", "old@camelotacademy.org", "Old Admin", true,
            Role::Admin, true, false,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Admin));

        db.disable_user("uid-old", "uid-old").await.unwrap();
        assert_eq!(db.count_admins().await.unwrap(), 0);

        // With the only admin disabled, the seat is open again.
        let p = db.setup_role(
            "uid-new", "new@camelotacademy.org", "New Admin", true,
            Role::Admin, true, false,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Admin));

        let old = db.get_profile("uid-old").await.unwrap().unwrap();
        assert!(old.disabled);
        assert!(old.disabled_at.is_some());
        assert_eq!(old.disabled_by.as_deref(), Some("uid-old"));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn plain_selections_write_directly() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let p = db.setup_role(
            "uid-t", "t@camelotacademy.org", "Ms T", true,
            Role::Teacher, false, false,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Teacher));
        assert!(!p.setup_requested);

        let p = db.setup_role(
            "uid-p", "p@camelotacademy.org", "A Parent", true,
            Role::Parent, false, false,
        ).await.unwrap();
        assert_eq!(p.role, Some(Role::Parent));

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn approve_and_reject_requests() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.setup_role(
            "uid-root", "root@camelotacademy.org", "Root", true,
            Role::Admin, true, false,
        ).await.unwrap();

        // Two more hopefuls, both queued.
        for (uid, email) in [
            ("uid-x", "x@camelotacademy.org"),
            ("uid-y", "y@camelotacademy.org"),
        ] {
            let p = db.setup_role(
                uid, email, uid, true, Role::Admin, true, false,
            ).await.unwrap();
            assert!(p.pending_request());
        }

        // Approve one as the role requested...
        db.approve_role("uid-x", Role::Admin, "uid-root").await.unwrap();
        let p = db.get_profile("uid-x").await.unwrap().unwrap();
        assert_eq!(p.role, Some(Role::Admin));
        assert!(!p.setup_requested);
        assert_eq!(p.requested_role, None);
        assert_eq!(p.approved_by.as_deref(), Some("uid-root"));
        assert!(p.approved_at.is_some());

        // ...and reject the other back to Parent.
        db.approve_role("uid-y", Role::Parent, "uid-root").await.unwrap();
        let p = db.get_profile("uid-y").await.unwrap().unwrap();
        assert_eq!(p.role, Some(Role::Parent));
        assert!(!p.setup_requested);
        assert_eq!(p.requested_role, None);

        // Approving a ghost is an error.
        assert!(
            db.approve_role("uid-ghost", Role::Admin, "uid-root")
                .await.is_err()
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn role_overwrite_and_verified_flag() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.insert_profile(&test_profile(
            "uid-m", "m@camelotacademy.org",
            Some(Role::Parent), "2024-02-01T09:00:00Z",
        )).await.unwrap();

        db.update_role("uid-m", Role::Teacher, "uid-root").await.unwrap();
        let p = db.get_profile("uid-m").await.unwrap().unwrap();
        assert_eq!(p.role, Some(Role::Teacher));
        assert_eq!(p.updated_by.as_deref(), Some("uid-root"));

        assert!(!p.email_verified);
        db.set_email_verified("uid-m").await.unwrap();
        let p = db.get_profile("uid-m").await.unwrap().unwrap();
        assert!(p.email_verified);

        db.update_display_name("uid-m", "M Renamed").await.unwrap();
        let p = db.get_profile("uid-m").await.unwrap().unwrap();
        assert_eq!(p.display_name, "M Renamed");

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn bulk_profile_insert() {
        ensure_logging();

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let batch: Vec<Profile> = [
            ("uid-r1", "r1@camelotacademy.org"),
            ("uid-r2", "r2@camelotacademy.org"),
            ("uid-r3", "r3@camelotacademy.org"),
        ].iter().map(|(uid, email)| test_profile(
            uid, email, Some(Role::Parent), "2024-03-01T09:00:00Z",
        )).collect();

        assert_eq!(db.insert_profiles(&batch).await.unwrap(), 3);

        // A batch containing a known address fails whole, and names it.
        let batch = vec![test_profile(
            "uid-r4", "r2@camelotacademy.org",
            Some(Role::Parent), "2024-03-02T09:00:00Z",
        )];
        let e = db.insert_profiles(&batch).await.unwrap_err();
        assert!(String::from(e).contains("r2@camelotacademy.org"));

        db.nuke_database().await.unwrap();
    }
}
