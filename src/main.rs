/*!
The portal server binary: load configuration, make sure both databases
are in shape, and serve.
*/
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    Router,
    routing::{get, get_service, post},
};
use simplelog::{ColorChoice, TerminalMode, TermLogger};
use tokio::sync::RwLock;
use tower_http::{
    services::fs::{ServeDir, ServeFile},
};

use portal::config;
use portal::inter;

async fn catchall_error_handler(e: std::io::Error) -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Unhandled internal error: {}", &e)
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("portal")
        .build();
    TermLogger::init(
        portal::log_level_from_env(),
        log_cfg,
        TerminalMode::Stdout,
        ColorChoice::Auto
    ).unwrap();
    log::info!("Logging started.");

    let config_path = std::env::args().nth(1)
        .unwrap_or_else(|| "portal.toml".to_owned());
    let glob = config::load_configuration(&config_path).await.unwrap();

    inter::init(&glob.templates_dir).unwrap();

    let addr = glob.addr;
    let static_dir = glob.static_dir.clone();
    let index_path = format!("{}/index.html", &static_dir);
    let glob = Arc::new(RwLock::new(glob));

    let serve_root = get_service(ServeFile::new(index_path))
        .handle_error(catchall_error_handler);

    let serve_static = get_service(ServeDir::new(static_dir))
        .handle_error(catchall_error_handler);

    let api_routes = Router::new()
        .route("/admin", post(inter::admin::api))
        .route("/teacher", post(inter::teacher::api))
        .route("/parent", post(inter::parent::api))
        .layer(middleware::from_fn(inter::key_authenticate))
        .layer(middleware::from_fn(inter::request_identity));

    let app = Router::new()
        .route("/", serve_root)
        .nest("/static", serve_static)
        .route("/login", post(inter::login))
        .route("/signup", post(inter::signup))
        .route("/reset", post(inter::request_password_reset))
        .route("/password", post(inter::reset_password))
        .route("/verify", get(inter::verify_email))
        .route("/setup", post(inter::setup_role))
        .route("/profile", post(inter::update_profile))
        .route("/logout", post(inter::logout))
        .nest("/api", api_routes)
        .layer(Extension(glob));

    log::info!("Listening on {}", &addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
