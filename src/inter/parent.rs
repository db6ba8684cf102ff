/*!
Subcrate for interoperation with Parent users.

Parents are read-only: dashboard, results, materials. A parent whose
admin request is still in the queue lands here too, since the interim
role is Parent.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::header::HeaderMap,
    response::{IntoResponse, Response},
};
use tokio::sync::RwLock;

use crate::config::Glob;
use crate::user::{Profile, Role};
use super::*;

pub async fn api(
    headers: HeaderMap,
    body: Option<String>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>
) -> Response {

    let uid: &str = match headers.get("x-portal-uid") {
        Some(uid) => match uid.to_str() {
            Ok(s) => s,
            Err(_) => { return text_500(None); },
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
        (Some(Role::Parent), false) => { /* Okay, approved, you can be here. */ },
        _ => {
            return (
                StatusCode::FORBIDDEN,
                "Who is this? What's your operating number?".to_owned(),
            ).into_response();
        },
    }

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

    match action {
        "populate-dashboard" => school::populate_dashboard(glob.clone()).await,
        "populate-results" => school::populate_results(glob.clone()).await,
        "populate-materials" => school::populate_materials(glob.clone()).await,
        "grade-summary" => school::grade_summary(body, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognizable x-portal-action value.", x)
        ),
    }
}
