/*!
Structs to hold configuration data and global variables.
*/
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{
    auth, auth::AuthResult,
    school::SchoolData,
    store::Store,
    user::{Invitation, Profile, Role},
};

#[derive(Deserialize)]
struct ConfigFile {
    auth_db_connect_string: Option<String>,
    data_db_connect_string: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    allow_first_admin: Option<bool>,
    templates_dir: Option<String>,
    static_dir: Option<String>,
}

#[derive(Debug)]
pub struct Cfg {
    pub auth_db_connect_string: String,
    pub data_db_connect_string: String,
    pub addr: SocketAddr,
    pub allow_first_admin: bool,
    pub templates_dir: String,
    pub static_dir: String,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            auth_db_connect_string: "host=localhost user=portal_test password='portal_test' dbname=portal_auth_test".to_owned(),
            data_db_connect_string: "host=localhost user=portal_test password='portal_test' dbname=portal_store_test".to_owned(),
            addr: SocketAddr::new(
                "0.0.0.0".parse().unwrap(),
                8001
            ),
            allow_first_admin: false,
            templates_dir: "templates".to_owned(),
            static_dir: "static".to_owned(),
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file: {}", &e))?;
        let cf: ConfigFile = toml::from_str(&file_contents)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.auth_db_connect_string {
            c.auth_db_connect_string = s;
        }
        if let Some(s) = cf.data_db_connect_string {
            c.data_db_connect_string = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(b) = cf.allow_first_admin {
            c.allow_first_admin = b;
        }
        if let Some(s) = cf.templates_dir {
            c.templates_dir = s;
        }
        if let Some(s) = cf.static_dir {
            c.static_dir = s;
        }

        Ok(c)
    }
}

/**
This guy will haul around some global variables and be passed in an
`axum::Extension` to the handlers who need him.

`users` is a cache of every profile, keyed by uid, refreshed from the
data DB after anything writes over there. `school` is the demo snapshot
itself; it lives nowhere else.
*/
pub struct Glob {
    auth: Arc<RwLock<auth::Db>>,
    data: Arc<RwLock<Store>>,
    pub users: HashMap<String, Profile>,
    pub school: SchoolData,
    pub addr: SocketAddr,
    pub allow_first_admin: bool,
    pub templates_dir: String,
    pub static_dir: String,
}

impl Glob {
    pub fn auth(&self) -> Arc<RwLock<auth::Db>> { self.auth.clone() }
    pub fn data(&self) -> Arc<RwLock<Store>> { self.data.clone() }

    /// Reread the profile cache from the data DB.
    pub async fn refresh_users(&mut self) -> Result<(), String> {
        log::trace!("Glob::refresh_users() called.");

        let profiles = self.data.read().await.get_profiles().await
            .map_err(|e| format!(
                "Error rereading profiles from data DB: {}", &e
            ))?;

        let mut map: HashMap<String, Profile> =
            HashMap::with_capacity(profiles.len());
        for p in profiles.into_iter() {
            map.insert(p.uid.clone(), p);
        }
        self.users = map;

        Ok(())
    }

    /// Cached profiles, newest first (the order the admin view shows).
    pub fn users_by_newest(&self) -> Vec<&Profile> {
        let mut users: Vec<&Profile> = self.users.values().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        users
    }

    /**
    Create an account on an admin's behalf.

    The account gets a throwaway password and an immediate reset token;
    the profile gets the role the admin chose. The token would ride an
    invitation email if this server had a mailer; instead it lands in
    the log.
    */
    pub async fn invite_user(
        &self,
        email: &str,
        display_name: &str,
        role: Role,
        inviter_uid: &str,
    ) -> Result<(), String> {
        log::trace!(
            "Glob::invite_user( {:?}, {:?}, {}, {:?} ) called.",
            email, display_name, &role, inviter_uid
        );

        let auth = self.auth();
        let auth = auth.read().await;

        let temp_password = auth.generate_temp_password();
        let acct = match auth.sign_up(email, display_name, &temp_password)
            .await
            .map_err(|e| format!("Error creating account: {}", &e))?
        {
            AuthResult::Account(acct) => acct,
            AuthResult::EmailInUse => {
                return Err(
                    auth::user_message("email-already-in-use").to_owned()
                );
            },
            x => {
                return Err(format!(
                    "Account creation returned {:?}, which shouldn't happen.",
                    &x
                ));
            },
        };

        let p = Profile {
            uid: acct.uid.clone(),
            email: acct.email.clone(),
            display_name: acct.display_name.clone(),
            email_verified: false,
            role: Some(role),
            setup_requested: false,
            requested_role: None,
            disabled: false,
            created_at: crate::now_stamp(),
            created_by: inviter_uid.to_owned(),
            approved_at: None,
            approved_by: None,
            updated_at: None,
            updated_by: None,
            disabled_at: None,
            disabled_by: None,
        };
        self.data.read().await.insert_profile(&p).await
            .map_err(|e| format!("Error inserting profile: {}", &e))?;

        match auth.send_password_reset(email).await {
            Ok(Some(token)) => {
                log::info!(
                    "Invitation password-reset token for {}: {}",
                    email, &token
                );
            },
            Ok(None) => {
                log::warn!(
                    "Freshly-invited account {} vanished before its reset token was issued.",
                    email
                );
            },
            Err(e) => {
                log::error!(
                    "Error issuing invitation reset token for {}: {}",
                    email, &e
                );
            },
        }

        Ok(())
    }

    /**
    The bulk version of `invite_user()`: a whole roster of CSV rows.

    Accounts are created one at a time (a duplicate address aborts the
    rest and reports itself); the profile inserts then land in a single
    transaction.
    */
    pub async fn invite_roster(
        &self,
        csv_text: &str,
        inviter_uid: &str,
    ) -> Result<usize, String> {
        log::trace!(
            "Glob::invite_roster( [ {} bytes of CSV ], {:?} ) called.",
            csv_text.len(), inviter_uid
        );

        let invitations = Invitation::vec_from_csv_reader(
            Cursor::new(csv_text)
        )?;
        if invitations.is_empty() {
            return Err("The roster contained no invitations.".to_owned());
        }

        let auth = self.auth();
        let auth = auth.read().await;

        let mut profiles: Vec<Profile> = Vec::with_capacity(invitations.len());
        for inv in invitations.iter() {
            let temp_password = auth.generate_temp_password();
            let acct = match auth.sign_up(
                &inv.email, &inv.display_name, &temp_password
            ).await.map_err(|e| format!(
                "Error creating account for {}: {}", &inv.email, &e
            ))? {
                AuthResult::Account(acct) => acct,
                AuthResult::EmailInUse => {
                    return Err(format!(
                        "An account with the address {} already exists.",
                        &inv.email
                    ));
                },
                x => {
                    return Err(format!(
                        "Account creation for {} returned {:?}, which shouldn't happen.",
                        &inv.email, &x
                    ));
                },
            };

            profiles.push(Profile {
                uid: acct.uid,
                email: inv.email.clone(),
                display_name: inv.display_name.clone(),
                email_verified: false,
                role: Some(inv.role),
                setup_requested: false,
                requested_role: None,
                disabled: false,
                created_at: crate::now_stamp(),
                created_by: inviter_uid.to_owned(),
                approved_at: None,
                approved_by: None,
                updated_at: None,
                updated_by: None,
                disabled_at: None,
                disabled_by: None,
            });
        }

        let n = self.data.read().await.insert_profiles(&profiles).await
            .map_err(|e| format!("Error inserting profiles: {}", &e))?;

        for p in profiles.iter() {
            match auth.send_password_reset(&p.email).await {
                Ok(Some(token)) => {
                    log::info!(
                        "Invitation password-reset token for {}: {}",
                        &p.email, &token
                    );
                },
                Ok(None) => {
                    log::warn!(
                        "Freshly-invited account {} vanished before its reset token was issued.",
                        &p.email
                    );
                },
                Err(e) => {
                    log::error!(
                        "Error issuing invitation reset token for {}: {}",
                        &p.email, &e
                    );
                },
            }
        }

        Ok(n)
    }

    /// First-run role selection for the given authenticated uid. Returns
    /// the profile as written; the caller refreshes the cache.
    pub async fn setup_role(
        &self,
        uid: &str,
        role: Role,
        request_admin: bool,
    ) -> Result<Profile, String> {
        log::trace!(
            "Glob::setup_role( {:?}, {}, {} ) called.",
            uid, &role, &request_admin
        );

        let acct = match self.auth.read().await.get_account_by_uid(uid).await {
            Ok(Some(acct)) => acct,
            Ok(None) => {
                return Err(format!("There is no account with uid {:?}.", uid));
            },
            Err(e) => {
                return Err(format!("Error retrieving account: {}", &e));
            },
        };

        self.data.read().await.setup_role(
            &acct.uid,
            &acct.email,
            &acct.display_name,
            acct.email_verified,
            role,
            request_admin,
            self.allow_first_admin,
        ).await.map_err(|e| format!("Error writing role setup: {}", &e))
    }
}

/**
Loads system configuration and ensures all appropriate database tables
exist.

There is deliberately no default-admin insertion here: the first person
to ask for Admin through role setup gets the seat (see
`Store::setup_role()`).
*/
pub async fn load_configuration<P: AsRef<Path>>(path: P) -> Result<Glob, String> {
    let mut cfg = match Cfg::from_file(path.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("{}; falling back to default configuration.", &e);
            Cfg::default()
        },
    };
    // The environment has the last word on the bootstrap override.
    if let Ok(val) = std::env::var("PORTAL_ALLOW_FIRST_ADMIN") {
        cfg.allow_first_admin = val == "true";
    }
    log::info!("Configuration:\n{:#?}", &cfg);

    log::trace!("Checking state of auth DB...");
    let auth_db = auth::Db::new(cfg.auth_db_connect_string.clone());
    if let Err(e) = auth_db.ensure_db_schema().await {
        let estr = format!("Unable to ensure state of auth DB: {}", &e);
        return Err(estr);
    }
    log::trace!("...auth DB okay.");

    log::trace!("Checking state of data DB...");
    let data_db = Store::new(cfg.data_db_connect_string.clone());
    if let Err(e) = data_db.ensure_db_schema().await {
        let estr = format!("Unable to ensure state of data DB: {}", &e);
        return Err(estr);
    }
    log::trace!("...data DB okay.");

    match data_db.count_admins().await {
        Err(e) => {
            let estr = format!("Error counting admins in data DB: {}", &e);
            return Err(estr);
        },
        Ok(0) => {
            log::info!(
                "No admins exist yet; the first Admin request will be granted."
            );
        },
        Ok(n) => {
            log::info!("{} admin(s) on record.", &n);
        },
    }

    log::trace!("Retrieving profiles from data DB.");
    let profiles = data_db.get_profiles().await
        .map_err(|e| format!("Error retrieving profiles from data DB: {}", &e))?;
    log::info!("Retrieved {} profiles from data DB.", &profiles.len());

    let mut users: HashMap<String, Profile> =
        HashMap::with_capacity(profiles.len());
    for p in profiles.into_iter() {
        users.insert(p.uid.clone(), p);
    }

    let glob = Glob {
        auth: Arc::new(RwLock::new(auth_db)),
        data: Arc::new(RwLock::new(data_db)),
        users,
        school: SchoolData::demo(),
        addr: cfg.addr,
        allow_first_admin: cfg.allow_first_admin,
        templates_dir: cfg.templates_dir,
        static_dir: cfg.static_dir,
    };

    Ok(glob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_fold() {
        let text = r#"
            host = "127.0.0.1"
            port = 9001
            allow_first_admin = true
        "#;
        let cf: ConfigFile = toml::from_str(text).unwrap();

        let mut c = Cfg::default();
        if let Some(s) = cf.host {
            c.addr.set_ip(s.parse().unwrap());
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(b) = cf.allow_first_admin {
            c.allow_first_admin = b;
        }

        assert_eq!(c.addr.to_string(), "127.0.0.1:9001");
        assert!(c.allow_first_admin);
        // Untouched keys keep their defaults.
        assert_eq!(c.templates_dir, "templates");
    }
}
