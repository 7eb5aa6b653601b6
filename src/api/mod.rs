pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod user_extractor;

pub use routes::create_router;
