use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use chrono::Utc;

use crate::{
    error::{AppError, Result},
    models::user::User,
};

/// An in-memory user directory keyed by lowercase email.
#[derive(Clone, Default)]
pub struct UserRepository {
    users: Arc<RwLock<HashMap<String, User>>>,
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

impl UserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new user, failing if the email is already registered.
    pub async fn create_user(&self, email: &str, password_hash: String) -> Result<User> {
        let email = normalize(email);
        let mut users = self.users.write().await;

        if users.contains_key(&email) {
            return Err(AppError::Validation("Email already registered".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash,
            created_at: Utc::now(),
        };
        users.insert(email, user.clone());
        Ok(user)
    }

    /// Finds a user by their email address.
    pub async fn find_by_email(&self, email: &str) -> Option<User> {
        self.users.read().await.get(&normalize(email)).cloned()
    }
}
