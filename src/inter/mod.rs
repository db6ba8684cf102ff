/*!
Interoperation between the client (user) and server.

(Not the application and the databases; that's covered by `auth` and
`store`.)

This module owns the template registry, the shared response helpers, the
two middleware layers the keyed API sits behind, and the pre-auth form
handlers (login, signup, password reset, email verification, role setup,
logout). The per-role APIs live in the submodules.
*/
use std::{
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use axum::{
    extract::{Extension, Form, Query},
    http::{Request, StatusCode},
    http::header::{HeaderName, HeaderValue},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use handlebars::Handlebars;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use crate::{
    auth, auth::AuthResult,
    config::Glob,
    session, session::{Resolution, SessionUser},
    user::Role,
    valid,
};

pub mod admin;
pub mod parent;
pub mod school;
pub mod teacher;

static TEMPLATES: OnceCell<Handlebars> = OnceCell::new();

static HTML_500: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>portal | Error</title>
<link rel="stylesheet" href="/static/portal.css">
</head>
<body>
<h1>Internal Server Error</h1>
<p>(Error 500)</p>
<p>Something went wrong on our end. No further or more
helpful information is available about the problem.</p>
</body>
</html>"#;

static TEXT_500: &str = "An internal error occurred; an appropriate response was inconstructable.";

trait AddHeaders: IntoResponse + Sized {
    fn add_headers(self, mut new_headers: Vec<(HeaderName, HeaderValue)>) -> Response {
        let mut r = self.into_response();
        let r_headers = r.headers_mut();
        for (name, value) in new_headers.drain(..) {
            r_headers.insert(name, value);
        }

        r
    }
}

impl<T: IntoResponse + Sized> AddHeaders for T {}

/// Data type to read the form data from a front-page login request.
#[derive(Deserialize, Debug)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct SignupData {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub display_name: String,
}

#[derive(Deserialize, Debug)]
pub struct ResetRequestData {
    pub email: String,
}

#[derive(Deserialize, Debug)]
pub struct PasswordData {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Deserialize, Debug)]
pub struct VerifyParams {
    pub token: String,
}

/// Role setup and logout both carry the session back in form fields,
/// since they arrive as page posts rather than API calls.
#[derive(Deserialize, Debug)]
pub struct SetupData {
    pub uid: String,
    pub key: String,
    pub role: String,
}

#[derive(Deserialize, Debug)]
pub struct SessionData {
    pub uid: String,
    pub key: String,
}

#[derive(Deserialize, Debug)]
pub struct ProfileData {
    pub uid: String,
    pub key: String,
    pub display_name: String,
}

/**
Initializes the resources used in this module. This function should be
called before any functionality of this module or any of its submodules
is used.

Currently the only thing that happens here is loading the templates used
by `serve_template()`, which will panic unless `init()` has been called
first.

The argument is the path to the directory where the templates used by
`serve_template()` can be found.
*/
pub fn init<P: AsRef<Path>>(template_dir: P) -> Result<(), String> {
    if TEMPLATES.get().is_some() {
        log::warn!("Templates directory already initialized; ignoring.");
        return Ok(())
    }

    let template_dir = template_dir.as_ref();

    let mut h = Handlebars::new();
    #[cfg(debug_assertions)]
    h.set_dev_mode(true);
    h.register_templates_directory(".html", template_dir)
        .map_err(|e| format!(
            "Error registering templates directory {}: {}",
            template_dir.display(), &e
        ))?;

    TEMPLATES.set(h)
        .map_err(|old_h| {
            let mut estr = String::from("Templates directory already registered w/templates:");
            for template_name in old_h.get_templates().keys() {
                estr.push('\n');
                estr.push_str(template_name.as_str());
            }
            estr
        })?;

    Ok(())
}

/**
Return an HTML response in the case of an unrecoverable* error.

(*"Unrecoverable" from the perspective of fielding the current request,
not from the perspective of the program crashing.)
*/
pub fn html_500() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(HTML_500)
    ).into_response()
}

pub fn text_500(text: Option<String>) -> Response {
    match text {
        Some(text) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            text
        ).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            TEXT_500.to_owned()
        ).into_response()
    }
}

pub fn serve_template<S>(
    code: StatusCode,
    template_name: &str,
    data: &S,
    addl_headers: Vec<(HeaderName, HeaderValue)>
) -> Response
where
    S: Serialize + Debug
{
    log::trace!("serve_template( {}, {:?}, ... ) called.", &code, template_name);

    match TEMPLATES.get().unwrap().render(template_name, data) {
        Ok(response_body) => (
            code,
            Html(response_body)
        ).add_headers(addl_headers),
        Err(e) => {
            log::error!(
                "Error rendering template {:?} with data {:?}:\n{}",
                template_name, data, &e
            );
            html_500()
        },
    }
}

/// The login page again, with the banner text for the given error code.
pub fn respond_auth_refusal(code: &str) -> Response {
    log::trace!("respond_auth_refusal( {:?} ) called.", code);

    let data = json!({
        "error_message": auth::user_message(code)
    });

    serve_template(
        StatusCode::UNAUTHORIZED,
        "login",
        &data,
        vec![]
    )
}

pub fn respond_bad_key() -> Response {
    log::trace!("respond_bad_key() called.");

    (
        StatusCode::UNAUTHORIZED,
        "Invalid authorization key.".to_owned(),
    ).into_response()
}

pub fn respond_bad_request(msg: String) -> Response {
    log::trace!("respond_bad_request( {:?} ) called.", &msg);

    (
        StatusCode::BAD_REQUEST,
        msg
    ).into_response()
}

/// Middleware function to ensure `x-portal-request-id` header is
/// maintained between request and response.
pub async fn request_identity<B>(
    req: Request<B>,
    next: Next<B>
) -> Response {
    let id_header = match req.headers().get("x-portal-request-id") {
        Some(id) => id.to_owned(),
        None => {
            return respond_bad_request(
                "Request must have an x-portal-request-id header.".to_owned()
            );
        },
    };

    let mut response = next.run(req).await;
    response.headers_mut().insert("x-portal-request-id", id_header);
    response
}

pub async fn key_authenticate<B>(
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let glob: &Arc<RwLock<Glob>> = req.extensions().get().unwrap();

    let key = match req.headers().get("x-portal-key") {
        Some(k_val) => match k_val.to_str() {
            Ok(s) => s,
            Err(e) => {
                log::error!(
                    "Failed converting auth key value {:?} to &str: {}",
                    k_val, &e
                );
                return respond_bad_request(
                    "x-portal-key value unrecognizable.".to_owned()
                );
            },
        },
        None => {
            return respond_bad_request(
                "Request must have an x-portal-key header.".to_owned()
            );
        },
    };

    let uid = match req.headers().get("x-portal-uid") {
        Some(u_val) => match u_val.to_str() {
            Ok(s) => s,
            Err(e) => {
                log::error!(
                    "Failed converting uid value {:?} to &str: {}",
                    u_val, &e
                );
                return respond_bad_request(
                    "x-portal-uid value unrecognizable.".to_owned()
                );
            },
        },
        None => {
            return respond_bad_request(
                "Request must have an x-portal-uid header.".to_owned()
            );
        },
    };

    // We bind the result, then match on the returned value, instead of
    // matching on the whole chain expression, so that the locks release.
    let res = glob.read().await.auth().read().await.check_key(
        uid, key
    ).await;

    match res {
        Err(e) => {
            log::error!(
                "auth::Db::check_key( {:?}, [ key ] ) returned error: {}",
                uid, &e
            );

            return text_500(None);
        },
        Ok(AuthResult::InvalidKey) => {
            return respond_bad_key();
        },
        Ok(AuthResult::Ok) => {
            // This is the good path. We will just fall through and call
            // the next layer after the match.
        }
        Ok(x) => {
            log::warn!(
                "auth::Db::check_key() returned {:?}, which should never happen.",
                &x
            );
            return text_500(None);
        },
    }

    next.run(req).await
}

/// The role-appropriate page for a provisioned session.
fn serve_session(su: &SessionUser, key: &str) -> Response {
    let template_name = match su.role {
        Role::Admin   => "admin",
        Role::Teacher => "teacher",
        Role::Parent  => "parent",
    };

    let data = json!({
        "uid": &su.uid,
        "key": key,
        "displayName": &su.display_name,
        "email": &su.email,
        "role": su.role.to_string(),
        "pendingRequest": su.pending_request,
    });

    serve_template(
        StatusCode::OK,
        template_name,
        &data,
        vec![]
    )
}

pub async fn login(
    Form(form): Form<LoginData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("login( {:?}, [ global state ] ) called.", &form.email);

    let errors = valid::validate_login(&form.email, &form.password);
    if !errors.is_empty() {
        let data = json!({ "error_message": valid::error_banner(&errors) });
        return serve_template(StatusCode::BAD_REQUEST, "login", &data, vec![]);
    }

    let auth_response = {
        glob.read().await.auth().read().await.check_password_and_issue_key(
            &form.email,
            &form.password,
        ).await
    };

    let auth_key = match auth_response {
        Err(e) => {
            log::error!(
                "Error: auth::Db::check_password_and_issue_key( {:?}, ... ): {}",
                &form.email, &e
            );
            return html_500();
        },
        Ok(AuthResult::Key(k)) => k,
        Ok(refusal) => {
            let code = refusal.error_code().unwrap_or("invalid-credential");
            return respond_auth_refusal(code);
        },
    };

    let acct_response = {
        glob.read().await.auth().read().await.get_account(&form.email).await
    };
    let acct = match acct_response {
        Ok(Some(acct)) => acct,
        Ok(None) => {
            log::error!(
                "Account {:?} passed the password check but has no record.",
                &form.email
            );
            return html_500();
        },
        Err(e) => {
            log::error!(
                "Error retrieving account {:?}: {}", &form.email, &e
            );
            return html_500();
        },
    };

    let resolution = {
        let glob = glob.read().await;
        let data = glob.data();
        let store = data.read().await;
        session::resolve(&store, &acct).await
    };

    match resolution {
        Resolution::Active(su) => serve_session(&su, &auth_key),
        Resolution::NeedsSetup => {
            let data = json!({
                "uid": &acct.uid,
                "key": &auth_key,
                "displayName": &acct.display_name,
                "email": &acct.email,
            });
            serve_template(StatusCode::OK, "setup", &data, vec![])
        },
        Resolution::Disabled => {
            // Take back the key we just issued.
            if let Err(e) = {
                glob.read().await.auth().read().await.sign_out(&acct.uid).await
            } {
                log::error!(
                    "Error revoking key for disabled account {:?}: {}",
                    &acct.uid, &e
                );
            }
            respond_auth_refusal("user-disabled")
        },
    }
}

pub async fn signup(
    Form(form): Form<SignupData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("signup( {:?}, [ global state ] ) called.", &form.email);

    let errors = valid::validate_signup(
        &form.email,
        &form.password,
        &form.confirm_password,
        &form.display_name,
    );
    if !errors.is_empty() {
        let data = json!({ "error_message": valid::error_banner(&errors) });
        return serve_template(StatusCode::BAD_REQUEST, "signup", &data, vec![]);
    }

    let signup_response = {
        glob.read().await.auth().read().await.sign_up(
            &form.email,
            form.display_name.trim(),
            &form.password,
        ).await
    };

    let acct = match signup_response {
        Err(e) => {
            log::error!(
                "Error: auth::Db::sign_up( {:?}, {:?}, ... ): {}",
                &form.email, &form.display_name, &e
            );
            return html_500();
        },
        Ok(AuthResult::Account(acct)) => acct,
        Ok(AuthResult::EmailInUse) => {
            let data = json!({
                "error_message": auth::user_message("email-already-in-use")
            });
            return serve_template(
                StatusCode::CONFLICT, "signup", &data, vec![]
            );
        },
        Ok(x) => {
            log::warn!(
                "auth::Db::sign_up( {:?}, ... ) returned {:?}, which shouldn't happen.",
                &form.email, &x
            );
            return html_500();
        },
    };

    // No mailer here; the verification link goes to the log.
    match {
        glob.read().await.auth().read().await
            .create_email_verification(&acct.uid).await
    } {
        Ok(token) => {
            log::info!(
                "Email-verification token for {}: {}", &acct.email, &token
            );
        },
        Err(e) => {
            log::error!(
                "Error issuing verification token for {}: {}",
                &acct.email, &e
            );
        },
    }

    let data = json!({
        "notice": "Account created. Check your email to verify your address, then log in."
    });
    serve_template(StatusCode::OK, "login", &data, vec![])
}

pub async fn request_password_reset(
    Form(form): Form<ResetRequestData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!(
        "request_password_reset( {:?}, [ global state ] ) called.",
        &form.email
    );

    if !valid::valid_email(&form.email) {
        let data = json!({
            "error_message": auth::user_message("invalid-email")
        });
        return serve_template(StatusCode::BAD_REQUEST, "login", &data, vec![]);
    }

    match {
        glob.read().await.auth().read().await
            .send_password_reset(&form.email).await
    } {
        Ok(Some(token)) => {
            log::info!(
                "Password-reset token for {}: {}", &form.email, &token
            );
        },
        Ok(None) => {
            log::trace!(
                "Password reset requested for unknown address {:?}.",
                &form.email
            );
        },
        Err(e) => {
            log::error!(
                "Error issuing password-reset token for {}: {}",
                &form.email, &e
            );
            return html_500();
        },
    }

    // The same answer whether or not the address exists.
    let data = json!({
        "notice": "If that address has an account, a reset link is on its way."
    });
    serve_template(StatusCode::OK, "login", &data, vec![])
}

pub async fn reset_password(
    Form(form): Form<PasswordData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("reset_password( [ token ], [ global state ] ) called.");

    let errors = valid::validate_password_change(
        &form.password,
        &form.confirm_password,
    );
    if !errors.is_empty() {
        let data = json!({ "error_message": valid::error_banner(&errors) });
        return serve_template(StatusCode::BAD_REQUEST, "login", &data, vec![]);
    }

    let reset_response = {
        glob.read().await.auth().read().await.reset_password(
            &form.token,
            &form.password,
        ).await
    };

    match reset_response {
        Err(e) => {
            log::error!("Error: auth::Db::reset_password( ... ): {}", &e);
            html_500()
        },
        Ok(AuthResult::Ok) => {
            let data = json!({
                "notice": "Your password has been updated. Log in with your new password."
            });
            serve_template(StatusCode::OK, "login", &data, vec![])
        },
        Ok(AuthResult::InvalidKey) => {
            let data = json!({
                "error_message": "That password-reset link is no longer valid. Request a new one."
            });
            serve_template(StatusCode::BAD_REQUEST, "login", &data, vec![])
        },
        Ok(x) => {
            log::warn!(
                "auth::Db::reset_password( ... ) returned {:?}, which shouldn't happen.",
                &x
            );
            html_500()
        },
    }
}

pub async fn verify_email(
    Query(params): Query<VerifyParams>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("verify_email( [ token ], [ global state ] ) called.");

    let verify_response = {
        glob.read().await.auth().read().await
            .verify_email(&params.token).await
    };

    let uid = match verify_response {
        Err(e) => {
            log::error!("Error: auth::Db::verify_email( ... ): {}", &e);
            return html_500();
        },
        Ok(Ok(uid)) => uid,
        Ok(Err(_)) => {
            let data = json!({
                "error_message": "That verification link is no longer valid."
            });
            return serve_template(
                StatusCode::BAD_REQUEST, "login", &data, vec![]
            );
        },
    };

    // Mirror the flag onto the profile, if there is one yet.
    if let Err(e) = {
        let glob = glob.read().await;
        let data = glob.data();
        let res = data.read().await.set_email_verified(&uid).await;
        res
    } {
        log::error!(
            "Error mirroring verified flag for {:?} to data DB: {}",
            &uid, &e
        );
    }
    if let Err(e) = glob.write().await.refresh_users().await {
        log::error!("Error refreshing user hash from database: {}", &e);
    }

    let data = json!({
        "notice": "Email address verified. You can log in."
    });
    serve_template(StatusCode::OK, "login", &data, vec![])
}

pub async fn setup_role(
    Form(form): Form<SetupData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!(
        "setup_role( {:?} -> {:?}, [ global state ] ) called.",
        &form.uid, &form.role
    );

    let key_response = {
        glob.read().await.auth().read().await.check_key(
            &form.uid, &form.key
        ).await
    };
    match key_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_key( {:?}, [ key ] ) returned error: {}",
                &form.uid, &e
            );
            return text_500(None);
        },
        Ok(AuthResult::Ok) => { /* Proceed to the actual setup. */ },
        Ok(_) => { return respond_bad_key(); },
    }

    let role: Role = match form.role.parse() {
        Ok(r) => r,
        Err(e) => { return respond_bad_request(e); },
    };
    // Picking Admin on the setup screen IS the admin request.
    let request_admin = role == Role::Admin;

    let setup_response = {
        glob.read().await.setup_role(&form.uid, role, request_admin).await
    };
    let profile = match setup_response {
        Ok(p) => p,
        Err(e) => {
            log::error!(
                "Error setting up role for {:?}: {}", &form.uid, &e
            );
            return text_500(Some(e));
        },
    };

    if let Err(e) = glob.write().await.refresh_users().await {
        log::error!("Error refreshing user hash from database: {}", &e);
    }

    match profile.role {
        Some(role) => {
            let su = SessionUser {
                uid: profile.uid.clone(),
                email: profile.email.clone(),
                display_name: profile.display_name.clone(),
                email_verified: profile.email_verified,
                role,
                pending_request: profile.pending_request(),
            };
            serve_session(&su, &form.key)
        },
        None => {
            log::warn!(
                "Role setup for {:?} wrote a roleless profile, which shouldn't happen.",
                &form.uid
            );
            let data = json!({
                "uid": &profile.uid,
                "key": &form.key,
                "displayName": &profile.display_name,
                "email": &profile.email,
            });
            serve_template(StatusCode::OK, "setup", &data, vec![])
        },
    }
}

pub async fn update_profile(
    Form(form): Form<ProfileData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!(
        "update_profile( {:?} -> {:?}, [ global state ] ) called.",
        &form.uid, &form.display_name
    );

    let key_response = {
        glob.read().await.auth().read().await.check_key(
            &form.uid, &form.key
        ).await
    };
    match key_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_key( {:?}, [ key ] ) returned error: {}",
                &form.uid, &e
            );
            return text_500(None);
        },
        Ok(AuthResult::Ok) => { /* Proceed to the update. */ },
        Ok(_) => { return respond_bad_key(); },
    }

    let display_name = form.display_name.trim();
    if display_name.len() < valid::MIN_DISPLAY_NAME_LEN {
        return respond_bad_request(
            "Full name must be at least 2 characters.".to_owned()
        );
    }

    let update_response = {
        glob.read().await.auth().read().await.update_display_name(
            &form.uid, display_name
        ).await
    };
    match update_response {
        Err(e) => {
            log::error!(
                "Error updating display name of {:?}: {}", &form.uid, &e
            );
            return text_500(None);
        },
        Ok(AuthResult::Ok) => { /* Mirror it below. */ },
        Ok(_) => {
            return respond_bad_request(
                auth::user_message("user-not-found").to_owned()
            );
        },
    }

    if let Err(e) = {
        let glob = glob.read().await;
        let data = glob.data();
        let res = data.read().await.update_display_name(
            &form.uid, display_name
        ).await;
        res
    } {
        log::error!(
            "Error mirroring display name of {:?} to data DB: {}",
            &form.uid, &e
        );
        return text_500(None);
    }
    if let Err(e) = glob.write().await.refresh_users().await {
        log::error!("Error refreshing user hash from database: {}", &e);
    }

    (
        StatusCode::OK,
        "Display name updated.".to_owned(),
    ).into_response()
}

pub async fn logout(
    Form(form): Form<SessionData>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("logout( {:?}, [ global state ] ) called.", &form.uid);

    let key_response = {
        glob.read().await.auth().read().await.check_key(
            &form.uid, &form.key
        ).await
    };
    match key_response {
        Err(e) => {
            log::error!(
                "auth::Db::check_key( {:?}, [ key ] ) returned error: {}",
                &form.uid, &e
            );
            return text_500(None);
        },
        Ok(AuthResult::Ok) => { /* Fine; go revoke it. */ },
        Ok(_) => { return respond_bad_key(); },
    }

    if let Err(e) = {
        glob.read().await.auth().read().await.sign_out(&form.uid).await
    } {
        log::error!("Error signing out {:?}: {}", &form.uid, &e);
        return text_500(None);
    }

    let data = json!({ "notice": "Signed out." });
    serve_template(StatusCode::OK, "login", &data, vec![])
}
