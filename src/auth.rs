/*!
The authentication database client.

This side of the house knows about credentials and nothing else: password
digests, session keys, password-reset and email-verification tokens, and
the failed-login counter. Who a person *is* to the portal (role,
provisioning state) lives in the data DB; see the `store` module.

The Postgres database this connects to carries the following tables.

```sql
CREATE TABLE accounts (
    uid            TEXT PRIMARY KEY,
    email          TEXT UNIQUE NOT NULL,
    display_name   TEXT NOT NULL,
    digest         TEXT NOT NULL,
    salt           TEXT NOT NULL,
    email_verified BOOL NOT NULL DEFAULT FALSE,
    failed_logins  SMALLINT NOT NULL DEFAULT 0,
    last_failure   TIMESTAMPTZ
);

CREATE TABLE keys (
    uid       TEXT PRIMARY KEY REFERENCES accounts(uid),
    key       TEXT NOT NULL,
    last_used TIMESTAMPTZ NOT NULL
);

CREATE TABLE resets (
    uid    TEXT PRIMARY KEY REFERENCES accounts(uid),
    token  TEXT UNIQUE NOT NULL,
    issued TIMESTAMPTZ NOT NULL
);

CREATE TABLE verifications (
    uid   TEXT PRIMARY KEY REFERENCES accounts(uid),
    token TEXT UNIQUE NOT NULL
);
```

Time comparisons (key lifetime, throttle window, reset expiry) all happen
in SQL against `now()`, so no clock values cross the wire.
*/
use std::fmt::Write;

use rand::{Rng, distributions};
use sha2::{Digest, Sha256};
use tokio_postgres::{Client, NoTls};

const TOKEN_CHARS: &str =
"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const SALT_LENGTH: usize = 4;
const UID_LENGTH: usize = 28;
const KEY_LENGTH: usize = 32;
const RESET_TOKEN_LENGTH: usize = 32;
const TEMP_PASSWORD_LENGTH: usize = 12;

/// Failed password checks allowed inside the throttle window before
/// `Throttled` responses start.
pub const MAX_FAILED_LOGINS: i16 = 5;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'accounts'",
        "CREATE TABLE accounts (
            uid            TEXT PRIMARY KEY,
            email          TEXT UNIQUE NOT NULL,
            display_name   TEXT NOT NULL,
            digest         TEXT NOT NULL,
            salt           TEXT NOT NULL,
            email_verified BOOL NOT NULL DEFAULT FALSE,
            failed_logins  SMALLINT NOT NULL DEFAULT 0,
            last_failure   TIMESTAMPTZ
        )",
        "DROP TABLE accounts",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'keys'",
        "CREATE TABLE keys (
            uid       TEXT PRIMARY KEY REFERENCES accounts(uid),
            key       TEXT NOT NULL,
            last_used TIMESTAMPTZ NOT NULL
        )",
        "DROP TABLE keys",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'resets'",
        "CREATE TABLE resets (
            uid    TEXT PRIMARY KEY REFERENCES accounts(uid),
            token  TEXT UNIQUE NOT NULL,
            issued TIMESTAMPTZ NOT NULL
        )",
        "DROP TABLE resets",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'verifications'",
        "CREATE TABLE verifications (
            uid   TEXT PRIMARY KEY REFERENCES accounts(uid),
            token TEXT UNIQUE NOT NULL
        )",
        "DROP TABLE verifications",
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
        let mut s = format!("Auth DB: {}", &e);
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

/// The identity record, minus anything secret.
#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
}

/**
The expected outcomes of auth operations.

Infrastructure trouble is a `DbError`; these are the answers the database
gave when it was working fine.
*/
#[derive(Debug, PartialEq)]
pub enum AuthResult {
    Ok,
    /// A fresh session key.
    Key(String),
    /// A freshly-created identity record.
    Account(Account),
    NoSuchUser,
    BadPassword,
    InvalidKey,
    EmailInUse,
    Throttled,
}

impl AuthResult {
    /// The stable error code for a refusal, or `None` for the success
    /// variants. These are the codes `user_message()` translates.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            AuthResult::Ok => None,
            AuthResult::Key(_) => None,
            AuthResult::Account(_) => None,
            AuthResult::NoSuchUser => Some("user-not-found"),
            AuthResult::BadPassword => Some("wrong-password"),
            AuthResult::InvalidKey => Some("invalid-credential"),
            AuthResult::EmailInUse => Some("email-already-in-use"),
            AuthResult::Throttled => Some("too-many-requests"),
        }
    }
}

/**
The fixed code-to-banner-text table.

Every identity or store refusal funnels through here on its way to an
inline alert; codes nobody recognizes get the generic retry line.
*/
pub fn user_message(code: &str) -> &'static str {
    match code {
        "user-not-found" => "No account found with this email address.",
        "wrong-password" => "Incorrect password. Please try again.",
        "invalid-credential" => "Invalid email or password. Please try again.",
        "email-already-in-use" => "An account with this email already exists.",
        "weak-password" => "Password should be at least 6 characters long.",
        "invalid-email" => "Please enter a valid email address.",
        "user-disabled" => "This account has been disabled.",
        "too-many-requests" => "Too many failed attempts. Please try again later.",
        "network-request-failed" => "Network error. Please check your connection.",
        "permission-denied" => "You do not have permission to perform this action.",
        "not-found" => "User data not found.",
        "unavailable" => "Service temporarily unavailable. Please try again.",
        _ => "An error occurred. Please try again.",
    }
}

fn account_from_row(row: &tokio_postgres::Row) -> Result<Account, DbError> {
    Ok(Account {
        uid: row.try_get("uid")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        email_verified: row.try_get("email_verified")?,
    })
}

/// Hex SHA-256 of salt + password. The salt rides along in the same row,
/// which makes this only as strong as the demo deployment needs.
fn digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let hash = hasher.finalize();

    let mut hex = String::with_capacity(hash.len() * 2);
    for byte in hash.iter() {
        // Writing into a String can't fail.
        write!(&mut hex, "{:02x}", byte).unwrap();
    }
    hex
}

pub struct Db {
    connection_string: String,
    token_chars: Vec<char>,
}

impl Db {
    pub fn new(connection_string: String) -> Self {
        log::trace!("auth::Db::new( {:?} ) called.", &connection_string);

        let token_chars: Vec<char> = TOKEN_CHARS.chars().collect();
        Self { connection_string, token_chars }
    }

    /// Generate a random token of the given length from the token
    /// character set.
    fn generate_token(&self, length: usize) -> String {
        // self.token_chars never has zero length.
        let dist = distributions::Slice::new(&self.token_chars).unwrap();
        let rng = rand::thread_rng();
        rng.sample_iter(&dist).take(length).collect()
    }

    /// A throwaway password for invited accounts; the invitee resets it
    /// before ever seeing it.
    pub fn generate_temp_password(&self) -> String {
        self.generate_token(TEMP_PASSWORD_LENGTH)
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "auth::Db::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Auth DB connection error: {}", &e);
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
        log::trace!("auth::Db::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Auth DB unable to begin transaction"))?;

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
        log::trace!("auth::Db::nuke_database() called.");

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

    pub async fn get_account(
        &self,
        email: &str,
    ) -> Result<Option<Account>, DbError> {
        log::trace!("auth::Db::get_account( {:?} ) called.", email);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT uid, email, display_name, email_verified
                FROM accounts WHERE email = $1",
            &[&email]
        ).await? {
            Some(row) => Ok(Some(account_from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_account_by_uid(
        &self,
        uid: &str,
    ) -> Result<Option<Account>, DbError> {
        log::trace!("auth::Db::get_account_by_uid( {:?} ) called.", uid);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT uid, email, display_name, email_verified
                FROM accounts WHERE uid = $1",
            &[&uid]
        ).await? {
            Some(row) => Ok(Some(account_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /**
    Create a new identity record.

    Returns `AuthResult::Account` with the fresh record, or `EmailInUse`.
    The insert itself arbitrates duplicate emails, so two racing signups
    for the same address can't both win.
    */
    pub async fn sign_up(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!(
            "auth::Db::sign_up( {:?}, {:?}, [ password ] ) called.",
            email, display_name
        );

        let uid = self.generate_token(UID_LENGTH);
        let salt = self.generate_token(SALT_LENGTH);
        let dgst = digest(password, &salt);

        let client = self.connect().await?;
        let n = client.execute(
            "INSERT INTO accounts (uid, email, display_name, digest, salt)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (email) DO NOTHING",
            &[&uid, &email, &display_name, &dgst, &salt]
        ).await?;

        if n == 0 {
            return Ok(AuthResult::EmailInUse);
        }

        log::trace!("Inserted account {:?} ({}).", email, &uid);
        Ok(AuthResult::Account(Account {
            uid,
            email: email.to_owned(),
            display_name: display_name.to_owned(),
            email_verified: false,
        }))
    }

    /**
    Check an email/password pair.

    Five bad attempts inside fifteen minutes parks the account behind
    `Throttled` until the window passes; a good check clears the counter.
    */
    pub async fn check_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!(
            "auth::Db::check_password( {:?}, [ password ] ) called.",
            email
        );

        let client = self.connect().await?;

        let row = match client.query_opt(
            "SELECT uid, digest, salt, failed_logins,
                (last_failure IS NOT NULL
                    AND last_failure > now() - INTERVAL '15 minutes')
                    AS in_window
                FROM accounts WHERE email = $1",
            &[&email]
        ).await? {
            Some(row) => row,
            None => { return Ok(AuthResult::NoSuchUser); },
        };

        let uid: &str = row.try_get("uid")?;
        let stored: &str = row.try_get("digest")?;
        let salt: &str = row.try_get("salt")?;
        let failed: i16 = row.try_get("failed_logins")?;
        let in_window: bool = row.try_get("in_window")?;

        if failed >= MAX_FAILED_LOGINS && in_window {
            log::warn!(
                "Account {:?} is throttled ({} recent failures).",
                email, &failed
            );
            return Ok(AuthResult::Throttled);
        }

        if digest(password, salt) == stored {
            client.execute(
                "UPDATE accounts
                    SET failed_logins = 0, last_failure = NULL
                    WHERE uid = $1",
                &[&uid]
            ).await?;
            return Ok(AuthResult::Ok);
        }

        // A stale failure run restarts at one.
        client.execute(
            "UPDATE accounts
                SET failed_logins = CASE
                        WHEN last_failure IS NOT NULL
                            AND last_failure > now() - INTERVAL '15 minutes'
                        THEN failed_logins + 1
                        ELSE 1
                    END,
                    last_failure = now()
                WHERE uid = $1",
            &[&uid]
        ).await?;

        Ok(AuthResult::BadPassword)
    }

    /// `check_password()`, and on success replace any standing session
    /// key with a fresh one.
    pub async fn check_password_and_issue_key(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!(
            "auth::Db::check_password_and_issue_key( {:?}, [ password ] ) called.",
            email
        );

        match self.check_password(email, password).await? {
            AuthResult::Ok => { /* Good; go issue the key. */ },
            x => { return Ok(x); },
        }

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT uid FROM accounts WHERE email = $1",
            &[&email]
        ).await?;
        let uid: &str = row.try_get("uid")?;

        let key = self.generate_token(KEY_LENGTH);
        client.execute(
            "INSERT INTO keys (uid, key, last_used)
                VALUES ($1, $2, now())
                ON CONFLICT (uid)
                DO UPDATE SET key = EXCLUDED.key, last_used = now()",
            &[&uid, &key]
        ).await?;

        Ok(AuthResult::Key(key))
    }

    /// Check a session key and refresh its idle timer. Keys idle for two
    /// hours stop working.
    pub async fn check_key(
        &self,
        uid: &str,
        key: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!("auth::Db::check_key( {:?}, [ key ] ) called.", uid);

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE keys SET last_used = now()
                WHERE uid = $1 AND key = $2
                AND last_used > now() - INTERVAL '2 hours'",
            &[&uid, &key]
        ).await?;

        match n {
            0 => Ok(AuthResult::InvalidKey),
            _ => Ok(AuthResult::Ok),
        }
    }

    /// Invalidate the standing session key, if any.
    pub async fn sign_out(&self, uid: &str) -> Result<(), DbError> {
        log::trace!("auth::Db::sign_out( {:?} ) called.", uid);

        let client = self.connect().await?;
        client.execute("DELETE FROM keys WHERE uid = $1", &[&uid]).await?;
        Ok(())
    }

    pub async fn update_display_name(
        &self,
        uid: &str,
        display_name: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!(
            "auth::Db::update_display_name( {:?}, {:?} ) called.",
            uid, display_name
        );

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE accounts SET display_name = $2 WHERE uid = $1",
            &[&uid, &display_name]
        ).await?;

        match n {
            0 => Ok(AuthResult::NoSuchUser),
            _ => Ok(AuthResult::Ok),
        }
    }

    /**
    Issue a password-reset token for the given address.

    Returns `None` when no such account exists; the public-facing
    handler banners success either way so the form can't be used to
    probe for addresses. There is no mail transport here: the caller
    logs the token and the `/password` form consumes it.
    */
    pub async fn send_password_reset(
        &self,
        email: &str,
    ) -> Result<Option<String>, DbError> {
        log::trace!("auth::Db::send_password_reset( {:?} ) called.", email);

        let client = self.connect().await?;
        let row = match client.query_opt(
            "SELECT uid FROM accounts WHERE email = $1",
            &[&email]
        ).await? {
            Some(row) => row,
            None => { return Ok(None); },
        };
        let uid: &str = row.try_get("uid")?;

        let token = self.generate_token(RESET_TOKEN_LENGTH);
        client.execute(
            "INSERT INTO resets (uid, token, issued)
                VALUES ($1, $2, now())
                ON CONFLICT (uid)
                DO UPDATE SET token = EXCLUDED.token, issued = now()",
            &[&uid, &token]
        ).await?;

        Ok(Some(token))
    }

    /**
    Consume a reset token and set a new password.

    Tokens are single-use and expire after two hours. A successful reset
    proves control of the address, so it also marks the email verified,
    clears the throttle counter, and drops any standing session key.
    */
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<AuthResult, DbError> {
        log::trace!("auth::Db::reset_password( [ token ], ... ) called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = match t.query_opt(
            "DELETE FROM resets
                WHERE token = $1 AND issued > now() - INTERVAL '2 hours'
                RETURNING uid",
            &[&token]
        ).await? {
            Some(row) => row,
            None => { return Ok(AuthResult::InvalidKey); },
        };
        let uid: String = row.try_get("uid")?;

        let salt = self.generate_token(SALT_LENGTH);
        let dgst = digest(new_password, &salt);
        t.execute(
            "UPDATE accounts
                SET digest = $2, salt = $3, email_verified = TRUE,
                    failed_logins = 0, last_failure = NULL
                WHERE uid = $1",
            &[&uid, &dgst, &salt]
        ).await?;
        t.execute("DELETE FROM keys WHERE uid = $1", &[&uid]).await?;

        t.commit().await?;
        log::trace!("Password reset for uid {:?}.", &uid);
        Ok(AuthResult::Ok)
    }

    /// Issue (or reissue) an email-verification token for the account.
    pub async fn create_email_verification(
        &self,
        uid: &str,
    ) -> Result<String, DbError> {
        log::trace!(
            "auth::Db::create_email_verification( {:?} ) called.",
            uid
        );

        let token = self.generate_token(RESET_TOKEN_LENGTH);
        let client = self.connect().await?;
        client.execute(
            "INSERT INTO verifications (uid, token)
                VALUES ($1, $2)
                ON CONFLICT (uid) DO UPDATE SET token = EXCLUDED.token",
            &[&uid, &token]
        ).await?;

        Ok(token)
    }

    /// Consume a verification token, flipping the account's verified
    /// flag. Returns the verified uid so the caller can update the
    /// profile copy of the flag.
    pub async fn verify_email(
        &self,
        token: &str,
    ) -> Result<Result<String, AuthResult>, DbError> {
        log::trace!("auth::Db::verify_email( [ token ] ) called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        let row = match t.query_opt(
            "DELETE FROM verifications WHERE token = $1 RETURNING uid",
            &[&token]
        ).await? {
            Some(row) => row,
            None => { return Ok(Err(AuthResult::InvalidKey)); },
        };
        let uid: String = row.try_get("uid")?;

        t.execute(
            "UPDATE accounts SET email_verified = TRUE WHERE uid = $1",
            &[&uid]
        ).await?;

        t.commit().await?;
        Ok(Ok(uid))
    }
}

#[cfg(test)]
mod tests {
    /*!
    Most of these tests assume you have a Postgres instance running on
    your local machine with resources named according to what you see in
    the `static TEST_CONNECTION &str`:

    ```text
    user: portal_test
    password: portal_test

    with write access to:

    database: portal_auth_test
    ```
    */
    use super::*;
    use crate::tests::ensure_logging;

    use serial_test::serial;

    pub static TEST_CONNECTION: &str =
        "host=localhost user=portal_test password='portal_test' dbname=portal_auth_test";

    #[test]
    fn digests_are_salted() {
        let a = digest("Secret1", "abcd");
        let b = digest("Secret1", "abce");
        let c = digest("Secret1", "abcd");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn error_code_table() {
        assert_eq!(
            user_message("user-not-found"),
            "No account found with this email address."
        );
        assert_eq!(
            user_message("wrong-password"),
            "Incorrect password. Please try again."
        );
        assert_eq!(
            user_message("email-already-in-use"),
            "An account with this email already exists."
        );
        assert_eq!(
            user_message("user-disabled"),
            "This account has been disabled."
        );
        assert_eq!(
            user_message("too-many-requests"),
            "Too many failed attempts. Please try again later."
        );
        assert_eq!(
            user_message("network-request-failed"),
            "Network error. Please check your connection."
        );
        // Anything unrecognized falls back to the generic line.
        assert_eq!(
            user_message("some-novel-code"),
            "An error occurred. Please try again."
        );
        assert_eq!(user_message(""), "An error occurred. Please try again.");
    }

    #[test]
    fn refusals_map_to_codes() {
        assert_eq!(
            AuthResult::NoSuchUser.error_code(),
            Some("user-not-found")
        );
        assert_eq!(
            AuthResult::Throttled.error_code(),
            Some("too-many-requests")
        );
        assert_eq!(AuthResult::Ok.error_code(), None);
        assert_eq!(AuthResult::Key("k".to_owned()).error_code(), None);
    }

    /**
    This function is for getting the database back in a blank slate state
    if a test panics partway through and leaves it munged.

    ```bash
    cargo test reset_auth -- --ignored
    ```
    */
    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_auth() {
        ensure_logging();
        let db = Db::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn signup_and_password_check() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let acct = match db.sign_up(
            "thelma@camelotacademy.org", "Thelma", "Secret1"
        ).await.unwrap() {
            AuthResult::Account(a) => a,
            x => panic!("sign_up returned {:?}", &x),
        };
        assert!(!acct.email_verified);
        assert_eq!(acct.uid.len(), UID_LENGTH);

        // Same address again.
        assert_eq!(
            db.sign_up("thelma@camelotacademy.org", "Thelma II", "Secret2")
                .await.unwrap(),
            AuthResult::EmailInUse
        );

        assert_eq!(
            db.check_password("thelma@camelotacademy.org", "Secret1")
                .await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.check_password("thelma@camelotacademy.org", "WrongOne1")
                .await.unwrap(),
            AuthResult::BadPassword
        );
        assert_eq!(
            db.check_password("nobody@camelotacademy.org", "Secret1")
                .await.unwrap(),
            AuthResult::NoSuchUser
        );

        assert_eq!(
            db.update_display_name(&acct.uid, "Thelma the First")
                .await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.update_display_name("no-such-uid", "Nobody").await.unwrap(),
            AuthResult::NoSuchUser
        );
        let acct = db.get_account_by_uid(&acct.uid).await.unwrap().unwrap();
        assert_eq!(acct.display_name, "Thelma the First");

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn throttling_after_repeated_failures() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.sign_up("dan@camelotacademy.org", "Dan", "Secret1")
            .await.unwrap();

        for _ in 0..MAX_FAILED_LOGINS {
            assert_eq!(
                db.check_password("dan@camelotacademy.org", "nope")
                    .await.unwrap(),
                AuthResult::BadPassword
            );
        }

        // Even the right password is refused once the counter trips.
        assert_eq!(
            db.check_password("dan@camelotacademy.org", "Secret1")
                .await.unwrap(),
            AuthResult::Throttled
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn keys_issue_check_and_sign_out() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let acct = match db.sign_up(
            "jenny@camelotacademy.org", "Ms Jenny", "Secret1"
        ).await.unwrap() {
            AuthResult::Account(a) => a,
            x => panic!("sign_up returned {:?}", &x),
        };

        let key = match db.check_password_and_issue_key(
            "jenny@camelotacademy.org", "Secret1"
        ).await.unwrap() {
            AuthResult::Key(k) => k,
            x => panic!("check_password_and_issue_key returned {:?}", &x),
        };

        assert_eq!(
            db.check_key(&acct.uid, &key).await.unwrap(),
            AuthResult::Ok
        );
        assert_eq!(
            db.check_key(&acct.uid, "bogus").await.unwrap(),
            AuthResult::InvalidKey
        );

        // A second login displaces the first key.
        let key2 = match db.check_password_and_issue_key(
            "jenny@camelotacademy.org", "Secret1"
        ).await.unwrap() {
            AuthResult::Key(k) => k,
            x => panic!("check_password_and_issue_key returned {:?}", &x),
        };
        assert_eq!(
            db.check_key(&acct.uid, &key).await.unwrap(),
            AuthResult::InvalidKey
        );

        db.sign_out(&acct.uid).await.unwrap();
        assert_eq!(
            db.check_key(&acct.uid, &key2).await.unwrap(),
            AuthResult::InvalidKey
        );

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn password_reset_flow() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let acct = match db.sign_up(
            "berro@camelotacademy.org", "Mr Berro", "Secret1"
        ).await.unwrap() {
            AuthResult::Account(a) => a,
            x => panic!("sign_up returned {:?}", &x),
        };

        // Unknown addresses produce no token.
        assert_eq!(
            db.send_password_reset("nobody@camelotacademy.org")
                .await.unwrap(),
            None
        );

        let token = db.send_password_reset("berro@camelotacademy.org")
            .await.unwrap().unwrap();

        assert_eq!(
            db.reset_password("bogus-token", "NewSecret1").await.unwrap(),
            AuthResult::InvalidKey
        );
        assert_eq!(
            db.reset_password(&token, "NewSecret1").await.unwrap(),
            AuthResult::Ok
        );
        // Single use.
        assert_eq!(
            db.reset_password(&token, "NewerSecret1").await.unwrap(),
            AuthResult::InvalidKey
        );

        assert_eq!(
            db.check_password("berro@camelotacademy.org", "Secret1")
                .await.unwrap(),
            AuthResult::BadPassword
        );
        assert_eq!(
            db.check_password("berro@camelotacademy.org", "NewSecret1")
                .await.unwrap(),
            AuthResult::Ok
        );

        // Resetting proves control of the address.
        let acct = db.get_account_by_uid(&acct.uid).await.unwrap().unwrap();
        assert!(acct.email_verified);

        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn email_verification_flow() {
        ensure_logging();

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let acct = match db.sign_up(
            "irfan@camelotacademy.org", "Mr Irfan", "Secret1"
        ).await.unwrap() {
            AuthResult::Account(a) => a,
            x => panic!("sign_up returned {:?}", &x),
        };

        let token = db.create_email_verification(&acct.uid).await.unwrap();

        assert_eq!(
            db.verify_email("bogus-token").await.unwrap(),
            Err(AuthResult::InvalidKey)
        );
        assert_eq!(
            db.verify_email(&token).await.unwrap(),
            Ok(acct.uid.clone())
        );

        let acct = db.get_account_by_uid(&acct.uid).await.unwrap().unwrap();
        assert!(acct.email_verified);

        db.nuke_database().await.unwrap();
    }
}
