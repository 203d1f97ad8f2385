pub mod clock;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod digest;
    pub mod kdf;
    pub mod password;
    pub mod payload;
    pub mod token;
}

pub mod models {
    pub mod api_key;
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod user;
}

pub mod services {
    pub mod api_keys;
    pub mod fields;
    pub mod session;
}

pub mod guard {
    pub mod limiter;
    pub mod redis_store;
    pub mod store;
}

pub mod handlers {
    pub mod auth;
    pub mod fields;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
    pub mod signature;
}

pub mod validation {
    pub mod auth;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use routes::build_router;
pub use state::AppState;
