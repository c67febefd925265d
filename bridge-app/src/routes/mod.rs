pub mod qr;
pub mod reply;
pub mod session;
pub mod status;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(status::router())
        .merge(qr::router())
        .merge(reply::router())
        .merge(session::router())
}
