//! HTTP handlers and route configuration.

mod assignments;
mod chat;
mod health;
mod parse;
mod transcript;

#[cfg(test)]
mod tests;

use actix_web::web;

/// Rate-limit action for checklist extraction.
pub const PARSE_ACTION: &str = "parse";
/// Rate-limit action for step tutoring.
pub const CHAT_ACTION: &str = "chat";

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Public routes
            .route("/health", web::get().to(health::health_check))
            // Gated by the rate limiter
            .route("/parse-assignment", web::post().to(parse::parse_assignment))
            .route("/step-chat", web::post().to(chat::step_chat))
            // Checklist data
            .route("/save-assignment", web::post().to(assignments::save_assignment))
            .route("/assignments", web::get().to(assignments::list_assignments))
            .route("/assignments/{id}", web::get().to(assignments::get_assignment))
            .route("/steps/{id}", web::patch().to(assignments::update_step)),
    );
}
