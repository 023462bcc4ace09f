//! HTTP surface

pub mod handlers;
pub mod owner;

use actix_web::web;

use crate::api::handlers::*;

/// Register every route on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(post_upload)
        .service(get_upload)
        .service(delete_upload)
        .service(list_uploads)
        .service(post_image)
        .service(get_image)
        .service(delete_image)
        .service(list_images)
        .service(post_page)
        .service(put_page)
        .service(get_page)
        .service(delete_page)
        .service(list_pages)
        .service(post_register)
        .service(post_login)
        .service(get_profile)
        .service(delete_profile);
}
