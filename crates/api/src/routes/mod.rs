mod health;
mod signals;

pub use health::health_router;
pub use signals::api_router;
