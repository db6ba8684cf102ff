/*!
Subcrate for interoperation with Admin users.

Admins get the whole surface: user management (inviting, role changes,
the approval queue, disabling) plus every school-data action.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::header::{HeaderMap, HeaderName, HeaderValue},
    Json,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::Glob;
use crate::user::{Profile, Role};
use super::*;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvitePayload {
    email: String,
    display_name: String,
    role: Role,
}

#[derive(Debug, Deserialize)]
struct RoleUpdate {
    uid: String,
    role: Role,
}

pub async fn api(
    headers: HeaderMap,
    body: Option<String>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>
) -> Response {

    let uid: &str = match headers.get("x-portal-uid") {
        Some(uid) => match uid.to_str() {
            Ok(s) => s,
            Err(_) => { return text_500(None); }
        },
        None => { return text_500(None); },
    };

    let p: Profile = {
        let glob = glob.read().await;
        if let Some(p) = glob.users.get(uid) {
            p.clone()
        } else {
            return text_500(None);
        }
    };

    match (p.role, p.disabled) {
        (Some(Role::Admin), false) => { /* Okay, request may proceed. */ },
        _ => {
            return (
                StatusCode::FORBIDDEN,
                "Who is this? What's your operating number?".to_owned(),
            ).into_response();
        },
    };

    let action = match headers.get("x-portal-action") {
        Some(act) => match act.to_str() {
            Ok(s) => s,
            Err(_) => { return respond_bad_request(
                "x-portal-action header unrecognizable.".to_owned()
            ); },
        },
        None => {
            return respond_bad_request(
                "Request must have an x-portal-action header.".to_owned()
            );
        },
    };

    let actor = p.uid;

    match action {
        "populate-users" => populate_users(glob.clone()).await,
        "invite-user" => invite_user(body, actor, glob.clone()).await,
        "upload-roster" => upload_roster(body, actor, glob.clone()).await,
        "update-user-role" => update_user_role(body, actor, glob.clone()).await,
        "disable-user" => disable_user(body, actor, glob.clone()).await,
        "resend-invite" => resend_invite(body, glob.clone()).await,
        "approve-role" => approve_role(body, actor, glob.clone()).await,
        "reject-role" => reject_role(body, actor, glob.clone()).await,
        "populate-dashboard" => school::populate_dashboard(glob.clone()).await,
        "populate-students" => school::populate_students(glob.clone()).await,
        "populate-results" => school::populate_results(glob.clone()).await,
        "populate-materials" => school::populate_materials(glob.clone()).await,
        "grade-summary" => school::grade_summary(body, glob.clone()).await,
        "add-event" => school::add_event(body, glob.clone()).await,
        "update-event" => school::update_event(body, glob.clone()).await,
        "delete-event" => school::delete_event(body, glob.clone()).await,
        "add-student" => school::add_student(body, glob.clone()).await,
        "update-student" => school::update_student(body, glob.clone()).await,
        "delete-student" => school::delete_student(body, glob.clone()).await,
        "add-grade" => school::add_grade(body, glob.clone()).await,
        "update-grade" => school::update_grade(body, glob.clone()).await,
        "delete-grade" => school::delete_grade(body, glob.clone()).await,
        "add-material" => school::add_material(body, glob.clone()).await,
        "delete-material" => school::delete_material(body, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognizable x-portal-action value.", x)
        ),
    }
}

async fn populate_users(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("admin::populate_users( [ Glob ] ) called.");

    let glob = glob.read().await;
    let users: Vec<&Profile> = glob.users_by_newest();

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-portal-action"),
            HeaderValue::from_static("populate-users")
        )],
        Json(users),
    ).into_response()
}

async fn refresh_and_repopulate_users(glob: Arc<RwLock<Glob>>) -> Response {
    {
        let mut glob = glob.write().await;
        if let Err(e) = glob.refresh_users().await {
            log::error!(
                "Error refreshing user hash from database: {}", &e
            );
            return text_500(Some("Unable to reread users from database.".to_owned()));
        }
    }

    populate_users(glob).await
}

async fn invite_user(
    body: Option<String>,
    actor: String,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let inv: InvitePayload = match serde_json::from_str(&body) {
        Ok(inv) => inv,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as InvitePayload: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize InvitePayload.".to_owned()));
        },
    };

    if !valid::valid_email(&inv.email) {
        return respond_bad_request(
            auth::user_message("invalid-email").to_owned()
        );
    }

    {
        let glob = glob.read().await;
        if let Err(e) = glob.invite_user(
            &inv.email, &inv.display_name, inv.role, &actor
        ).await {
            log::error!(
                "Error inviting new user ({:?}): {}", &inv.email, &e
            );
            return text_500(Some(e));
        }
    }

    refresh_and_repopulate_users(glob).await
}

async fn upload_roster(
    body: Option<String>,
    actor: String,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a CSV body.".to_owned()
        ); }
    };

    {
        let glob = glob.read().await;
        match glob.invite_roster(&body, &actor).await {
            Ok(n) => {
                log::trace!("Invited {} users from uploaded roster.", &n);
            },
            Err(e) => {
                log::error!(
                    "Error inviting new users via CSV: {}\n\nCSV text:\n\n{}\n",
                    &e, &body
                );
                return text_500(Some(e));
            },
        }
    }

    refresh_and_repopulate_users(glob).await
}

async fn update_user_role(
    body: Option<String>,
    actor: String,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let update: RoleUpdate = match serde_json::from_str(&body) {
        Ok(u) => u,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as RoleUpdate: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize RoleUpdate.".to_owned()));
        },
    };

    {
        let glob = glob.read().await;
        let data = glob.data();
        let res = data.read().await.update_role(
            &update.uid, update.role, &actor
        ).await;
        if let Err(e) = res {
            log::error!(
                "Error updating role of user {:?}: {}", &update.uid, &e
            );
            return text_500(Some(e.into()));
        }
    }

    refresh_and_repopulate_users(glob).await
}

async fn disable_user(
    body: Option<String>,
    actor: String,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let uid = match body {
        Some(uid) => uid,
        None => { return respond_bad_request(
            "Request must include the uid to disable as a body.".to_owned()
        ); },
    };

    if uid == actor {
        return respond_bad_request(
            "You cannot disable your own account.".to_owned()
        );
    }

    {
        let glob = glob.read().await;
        let data = glob.data();
        let res = data.read().await.disable_user(&uid, &actor).await;
        if let Err(e) = res {
            log::error!("Error disabling user {:?}: {}", &uid, &e);
            return text_500(Some(e.into()));
        }
    }

    refresh_and_repopulate_users(glob).await
}

async fn resend_invite(
    body: Option<String>,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let email = match body {
        Some(email) => email,
        None => { return respond_bad_request(
            "Request must include the email address as a body.".to_owned()
        ); },
    };

    let reset_response = {
        glob.read().await.auth().read().await
            .send_password_reset(&email).await
    };

    match reset_response {
        Err(e) => {
            log::error!(
                "Error reissuing invitation token for {}: {}", &email, &e
            );
            text_500(Some(e.into()))
        },
        Ok(None) => respond_bad_request(
            auth::user_message("user-not-found").to_owned()
        ),
        Ok(Some(token)) => {
            log::info!(
                "Invitation password-reset token for {}: {}", &email, &token
            );
            (
                StatusCode::OK,
                "Password reset issued.".to_owned(),
            ).into_response()
        },
    }
}

async fn approve_role(
    body: Option<String>,
    actor: String,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let update: RoleUpdate = match serde_json::from_str(&body) {
        Ok(u) => u,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as RoleUpdate: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize RoleUpdate.".to_owned()));
        },
    };

    {
        let glob = glob.read().await;
        let data = glob.data();
        let res = data.read().await.approve_role(
            &update.uid, update.role, &actor
        ).await;
        if let Err(e) = res {
            log::error!(
                "Error approving role request of {:?}: {}", &update.uid, &e
            );
            return text_500(Some(e.into()));
        }
    }

    refresh_and_repopulate_users(glob).await
}

/// Rejection is approval as the default role.
async fn reject_role(
    body: Option<String>,
    actor: String,
    glob: Arc<RwLock<Glob>>
) -> Response {
    let uid = match body {
        Some(uid) => uid,
        None => { return respond_bad_request(
            "Request must include the uid to reject as a body.".to_owned()
        ); },
    };

    {
        let glob = glob.read().await;
        let data = glob.data();
        let res = data.read().await.approve_role(
            &uid, Role::Parent, &actor
        ).await;
        if let Err(e) = res {
            log::error!(
                "Error rejecting role request of {:?}: {}", &uid, &e
            );
            return text_500(Some(e.into()));
        }
    }

    refresh_and_repopulate_users(glob).await
}
