/*!
Actions over the in-memory school snapshot, shared by the role APIs.

Each role's `api()` decides which of these a caller may reach; the
functions themselves don't gate anything. Reads take the `Glob` read
lock and serialize straight out of the snapshot; mutations take the
write lock, then answer with the refreshed view of their kind, so the
front end can repaint from the response alone.
*/
use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    http::header::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::Glob;
use crate::school::{EventForm, GradeForm, MaterialForm, StudentForm};
use super::{respond_bad_request, text_500};

#[derive(Debug, Deserialize)]
struct EventUpdate {
    id: i64,
    #[serde(flatten)]
    form: EventForm,
}

#[derive(Debug, Deserialize)]
struct StudentUpdate {
    id: i64,
    #[serde(flatten)]
    form: StudentForm,
}

#[derive(Debug, Deserialize)]
struct GradeUpdate {
    id: i64,
    #[serde(flatten)]
    form: GradeForm,
}

#[derive(Debug, Deserialize)]
struct MaterialDelete {
    grade: String,
    id: i64,
}

pub async fn populate_dashboard(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("school::populate_dashboard( [ Glob ] ) called.");

    let glob = glob.read().await;
    let data = json!({
        "events": &glob.school.events,
        "schoolImages": &glob.school.school_images,
        "averages": glob.school.grade_averages(),
    });

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-portal-action"),
            HeaderValue::from_static("populate-dashboard")
        )],
        Json(data),
    ).into_response()
}

pub async fn populate_students(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("school::populate_students( [ Glob ] ) called.");

    let glob = glob.read().await;

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-portal-action"),
            HeaderValue::from_static("populate-students")
        )],
        Json(&glob.school.students),
    ).into_response()
}

pub async fn populate_results(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("school::populate_results( [ Glob ] ) called.");

    let glob = glob.read().await;
    // The raw results plus the students to join names against.
    let data = json!({
        "results": &glob.school.results,
        "students": &glob.school.students,
    });

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-portal-action"),
            HeaderValue::from_static("populate-results")
        )],
        Json(data),
    ).into_response()
}

pub async fn populate_materials(glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("school::populate_materials( [ Glob ] ) called.");

    let glob = glob.read().await;

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-portal-action"),
            HeaderValue::from_static("populate-materials")
        )],
        Json(&glob.school.materials),
    ).into_response()
}

/// The per-student subject/score rows for one grade level; the body is
/// the grade level's name.
pub async fn grade_summary(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let grade = match body {
        Some(grade) => grade,
        None => { return respond_bad_request(
            "Request must include the grade level as a body.".to_owned()
        ); },
    };

    let glob = glob.read().await;
    let rows = glob.school.results_by_grade(&grade);

    (
        StatusCode::OK,
        [(
            HeaderName::from_static("x-portal-action"),
            HeaderValue::from_static("grade-summary")
        )],
        Json(rows),
    ).into_response()
}

//
//
// This section is for dealing with EVENTS.
//
//

pub async fn add_event(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let form: EventForm = match serde_json::from_str(&body) {
        Ok(form) => form,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as EventForm: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize EventForm.".to_owned()));
        },
    };

    {
        glob.write().await.school.add_event(form);
    }

    populate_dashboard(glob).await
}

pub async fn update_event(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let update: EventUpdate = match serde_json::from_str(&body) {
        Ok(u) => u,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as EventUpdate: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize EventUpdate.".to_owned()));
        },
    };

    let found = {
        glob.write().await.school.update_event(update.id, update.form)
    };
    if !found {
        return respond_bad_request(format!(
            "There is no event with id {}.", &update.id
        ));
    }

    populate_dashboard(glob).await
}

pub async fn delete_event(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires id of event in body.".to_owned()
        ); },
    };

    let id: i64 = match body.parse() {
        Ok(n) => n,
        Err(e) => {
            return respond_bad_request(format!(
                "Unable to parse body of request {:?} as event id: {}",
                &body, &e
            ));
        },
    };

    let found = {
        glob.write().await.school.delete_event(id)
    };
    if !found {
        return respond_bad_request(format!(
            "There is no event with id {}.", &id
        ));
    }

    populate_dashboard(glob).await
}

//
//
// This section is for dealing with STUDENTS.
//
//

pub async fn add_student(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let form: StudentForm = match serde_json::from_str(&body) {
        Ok(form) => form,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as StudentForm: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize StudentForm.".to_owned()));
        },
    };

    {
        glob.write().await.school.add_student(form);
    }

    populate_students(glob).await
}

pub async fn update_student(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let update: StudentUpdate = match serde_json::from_str(&body) {
        Ok(u) => u,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as StudentUpdate: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize StudentUpdate.".to_owned()));
        },
    };

    let found = {
        glob.write().await.school.update_student(update.id, update.form)
    };
    if !found {
        return respond_bad_request(format!(
            "There is no student with id {}.", &update.id
        ));
    }

    populate_students(glob).await
}

pub async fn delete_student(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires id of student in body.".to_owned()
        ); },
    };

    let id: i64 = match body.parse() {
        Ok(n) => n,
        Err(e) => {
            return respond_bad_request(format!(
                "Unable to parse body of request {:?} as student id: {}",
                &body, &e
            ));
        },
    };

    let (found, n_results) = {
        glob.write().await.school.delete_student(id)
    };
    if !found {
        return respond_bad_request(format!(
            "There is no student with id {}.", &id
        ));
    }
    log::trace!(
        "Deleted student {} and {} of their results.", &id, &n_results
    );

    populate_students(glob).await
}

//
//
// This section is for dealing with GRADES (results).
//
//

pub async fn add_grade(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let form: GradeForm = match serde_json::from_str(&body) {
        Ok(form) => form,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as GradeForm: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize GradeForm.".to_owned()));
        },
    };

    if let Err(e) = {
        glob.write().await.school.add_result(form)
    } {
        return respond_bad_request(e);
    }

    populate_results(glob).await
}

pub async fn update_grade(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let update: GradeUpdate = match serde_json::from_str(&body) {
        Ok(u) => u,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as GradeUpdate: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize GradeUpdate.".to_owned()));
        },
    };

    match {
        glob.write().await.school.update_result(update.id, update.form)
    } {
        Err(e) => { return respond_bad_request(e); },
        Ok(false) => {
            return respond_bad_request(format!(
                "There is no result with id {}.", &update.id
            ));
        },
        Ok(true) => { /* Updated; fall through to repopulate. */ },
    }

    populate_results(glob).await
}

pub async fn delete_grade(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires id of result in body.".to_owned()
        ); },
    };

    let id: i64 = match body.parse() {
        Ok(n) => n,
        Err(e) => {
            return respond_bad_request(format!(
                "Unable to parse body of request {:?} as result id: {}",
                &body, &e
            ));
        },
    };

    let found = {
        glob.write().await.school.delete_result(id)
    };
    if !found {
        return respond_bad_request(format!(
            "There is no result with id {}.", &id
        ));
    }

    populate_results(glob).await
}

//
//
// This section is for dealing with MATERIALS.
//
//

pub async fn add_material(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let form: MaterialForm = match serde_json::from_str(&body) {
        Ok(form) => form,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as MaterialForm: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize MaterialForm.".to_owned()));
        },
    };

    // The upload date is just the calendar-date half of the stamp.
    let stamp = crate::now_stamp();
    let upload_date = stamp.split('T').next().unwrap_or(&stamp).to_owned();

    {
        glob.write().await.school.add_material(form, upload_date);
    }

    populate_materials(glob).await
}

pub async fn delete_material(body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match body {
        Some(body) => body,
        None => { return respond_bad_request(
            "Request requires a JSON body.".to_owned()
        ); },
    };

    let del: MaterialDelete = match serde_json::from_str(&body) {
        Ok(d) => d,
        Err(e) => {
            log::error!(
                "Error deserializing JSON {:?} as MaterialDelete: {}",
                &body, &e
            );
            return text_500(Some("Unable to deserialize MaterialDelete.".to_owned()));
        },
    };

    let found = {
        glob.write().await.school.delete_material(&del.grade, del.id)
    };
    if !found {
        return respond_bad_request(format!(
            "There is no {} material with id {}.", &del.grade, &del.id
        ));
    }

    populate_materials(glob).await
}
