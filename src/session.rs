/*!
Session resolution.

Every authenticated transition funnels through here: given the identity
record the auth DB vouched for, what kind of session does this person
get? The answer comes from the profile document, and from nowhere else.

The one deliberate asymmetry: if the data DB cannot be reached, the user
resolves to `NeedsSetup` instead of being locked out. A store outage
should degrade to a harmless extra setup screen, not block every login.
*/
use crate::auth::Account;
use crate::store::Store;
use crate::user::{Profile, Role};

/// A fully-provisioned portal session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionUser {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
    pub role: Role,
    /// Still waiting on an admin to rule on a role request; the UI shows
    /// a ribbon but the interim role works normally.
    pub pending_request: bool,
}

#[derive(Debug, PartialEq)]
pub enum Resolution {
    /// Provisioned; proceed to the role's view.
    Active(SessionUser),
    /// Authenticated but no usable profile; show the role-selection
    /// screen.
    NeedsSetup,
    /// The profile is disabled; refuse the session.
    Disabled,
}

/// The pure classification rule, split out from the lookup so it can be
/// reasoned about (and tested) without a database.
pub fn classify(acct: &Account, profile: Option<&Profile>) -> Resolution {
    let p = match profile {
        Some(p) => p,
        None => { return Resolution::NeedsSetup; },
    };

    if p.disabled {
        return Resolution::Disabled;
    }

    match p.role {
        Some(role) => Resolution::Active(SessionUser {
            uid: p.uid.clone(),
            email: p.email.clone(),
            display_name: p.display_name.clone(),
            email_verified: p.email_verified || acct.email_verified,
            role,
            pending_request: p.pending_request(),
        }),
        None => Resolution::NeedsSetup,
    }
}

/**
Look up the account's profile and classify the session.

Lookup failures are logged and swallowed; see the module docs for why
they land on `NeedsSetup`.
*/
pub async fn resolve(store: &Store, acct: &Account) -> Resolution {
    log::trace!("session::resolve( [ Store ], {:?} ) called.", &acct.uid);

    match store.get_profile(&acct.uid).await {
        Ok(profile) => classify(acct, profile.as_ref()),
        Err(e) => {
            log::error!(
                "Error fetching profile for {:?} during session resolution: {}; treating as needing setup.",
                &acct.uid, &e
            );
            Resolution::NeedsSetup
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    fn acct(uid: &str) -> Account {
        Account {
            uid: uid.to_owned(),
            email: format!("{}@camelotacademy.org", uid),
            display_name: uid.to_owned(),
            email_verified: true,
        }
    }

    fn profile(uid: &str, role: Option<Role>) -> Profile {
        Profile {
            uid: uid.to_owned(),
            email: format!("{}@camelotacademy.org", uid),
            display_name: uid.to_owned(),
            email_verified: true,
            role,
            setup_requested: false,
            requested_role: None,
            disabled: false,
            created_at: "2024-01-01T09:00:00Z".to_owned(),
            created_by: uid.to_owned(),
            approved_at: None,
            approved_by: None,
            updated_at: None,
            updated_by: None,
            disabled_at: None,
            disabled_by: None,
        }
    }

    #[test]
    fn stored_role_means_active() {
        let a = acct("thelma");
        for role in [Role::Parent, Role::Teacher, Role::Admin] {
            let p = profile("thelma", Some(role));
            match classify(&a, Some(&p)) {
                Resolution::Active(su) => {
                    assert_eq!(su.role, role);
                    assert!(!su.pending_request);
                },
                x => panic!("classify returned {:?}", &x),
            }
        }
    }

    #[test]
    fn missing_profile_or_role_means_setup() {
        let a = acct("newcomer");
        assert_eq!(classify(&a, None), Resolution::NeedsSetup);

        let p = profile("newcomer", None);
        assert_eq!(classify(&a, Some(&p)), Resolution::NeedsSetup);
    }

    #[test]
    fn disabled_profile_is_refused() {
        let a = acct("gone");
        let mut p = profile("gone", Some(Role::Teacher));
        p.disabled = true;
        assert_eq!(classify(&a, Some(&p)), Resolution::Disabled);
    }

    #[test]
    fn pending_request_rides_along() {
        let a = acct("hopeful");
        let mut p = profile("hopeful", Some(Role::Parent));
        p.setup_requested = true;
        p.requested_role = Some(Role::Admin);
        match classify(&a, Some(&p)) {
            Resolution::Active(su) => {
                assert_eq!(su.role, Role::Parent);
                assert!(su.pending_request);
            },
            x => panic!("classify returned {:?}", &x),
        }
    }

    /// An unreachable data DB must not lock anyone out.
    #[tokio::test]
    async fn lookup_failure_fails_open() {
        ensure_logging();

        let store = Store::new(
            "host=localhost port=1 user=nobody dbname=nothing connect_timeout=1".to_owned()
        );
        let a = acct("unlucky");
        assert_eq!(resolve(&store, &a).await, Resolution::NeedsSetup);
    }
}
