/*!
Portal users: roles and the per-user profile document.

The profile is the record the data DB keeps about a person, as opposed to
the credential record the auth DB keeps. A freshly-authenticated account
may have no profile at all yet; that's what the setup workflow is for.
*/
use std::io::Read;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Parent,
    Teacher,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Parent  => "Parent",
            Role::Teacher => "Teacher",
            Role::Admin   => "Admin",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Parent"  => Ok(Role::Parent),
            "Teacher" => Ok(Role::Teacher),
            "Admin"   => Ok(Role::Admin),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

/**
The per-user metadata document stored in the data DB.

`role` is `None` for accounts that have authenticated but never completed
role setup. `created_at` (and the other stamps) are RFC 3339 strings, so
lexicographic order is chronological order.
*/
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
    pub role: Option<Role>,
    pub setup_requested: bool,
    pub requested_role: Option<Role>,
    pub disabled: bool,
    pub created_at: String,
    pub created_by: String,
    pub approved_at: Option<String>,
    pub approved_by: Option<String>,
    pub updated_at: Option<String>,
    pub updated_by: Option<String>,
    pub disabled_at: Option<String>,
    pub disabled_by: Option<String>,
}

impl Profile {
    /// Whether this user is waiting in the role-approval queue.
    pub fn pending_request(&self) -> bool {
        self.setup_requested && self.requested_role.is_some()
    }

    /// A profile counts as provisioned once it carries a role and hasn't
    /// been disabled.
    pub fn provisioned(&self) -> bool {
        self.role.is_some() && !self.disabled
    }
}

/// A single row of an admin's bulk-invitation roster.
#[derive(Clone, Debug, PartialEq)]
pub struct Invitation {
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

impl Invitation {
    /**
    Roster .csv rows should look like this

    ```csv
    #email,                     display name,   role
    js.senior@gmail.com,        Jane Smith,     Parent
    berro@camelotacademy.org,   Mr Berro,       Teacher
    ```
    */
    pub fn from_csv_line(
        row: &csv::StringRecord
    ) -> Result<Invitation, String> {
        log::trace!("Invitation::from_csv_line( {:?} ) called.", row);

        let email = match row.get(0) {
            Some(s) => s.to_owned(),
            None => { return Err("no email address".to_owned()); },
        };
        let display_name = match row.get(1) {
            Some(s) => s.to_owned(),
            None => { return Err("no display name".to_owned()); },
        };
        let role: Role = match row.get(2) {
            Some(s) => s.parse()?,
            None => { return Err("no role".to_owned()); },
        };

        Ok(Invitation { email, display_name, role })
    }

    pub fn vec_from_csv_reader<R: Read>(r: R) -> Result<Vec<Invitation>, String> {
        log::trace!("Invitation::vec_from_csv_reader(...) called.");

        let mut csv_reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(false)
            .has_headers(false)
            .from_reader(r);

        let mut invitations: Vec<Invitation> = Vec::new();

        for (n, res) in csv_reader.records().enumerate() {
            match res {
                Ok(record) => match Invitation::from_csv_line(&record) {
                    Ok(inv) => { invitations.push(inv); },
                    Err(e) => {
                        let estr = match record.position() {
                            Some(p) => format!(
                                "Error on line {}: {}",
                                p.line(), &e
                            ),
                            None => format!(
                                "Error in CSV record {}: {}", &n, &e
                            ),
                        };
                        return Err(estr);
                    },
                },
                Err(e) => {
                    let estr = match e.position() {
                        Some(p) => format!(
                            "Error on line {}: {}", p.line(), &e
                        ),
                        None => format!(
                            "Error in CSV record {}: {}", &n, &e
                        ),
                    };
                    return Err(estr);
                }
            }
        }

        log::trace!(
            "Invitation::vec_from_csv_reader() returns {} Invitations.",
            invitations.len()
        );
        Ok(invitations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    #[test]
    fn role_round_trip() {
        for role in [Role::Parent, Role::Teacher, Role::Admin] {
            let s = role.to_string();
            assert_eq!(s.parse::<Role>().unwrap(), role);
        }
        assert!("Boss".parse::<Role>().is_err());
        assert!("parent".parse::<Role>().is_err());
    }

    #[test]
    fn invitations_from_csv() {
        ensure_logging();
        let f = std::fs::File::open("test/good_roster_0.csv").unwrap();
        let invs = Invitation::vec_from_csv_reader(f).unwrap();
        log::trace!("Invitations:\n{:#?}", &invs);
        assert_eq!(invs.len(), 3);
        assert_eq!(invs[0].role, Role::Parent);
        assert_eq!(invs[2].role, Role::Teacher);
    }

    #[test]
    fn bad_roster_line_reported() {
        ensure_logging();
        let text = "someone@example.com, Someone, Boss\n";
        let e = Invitation::vec_from_csv_reader(text.as_bytes()).unwrap_err();
        assert!(e.contains("line 1"), "unexpected error text: {}", e);
    }
}
