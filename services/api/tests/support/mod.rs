#![allow(dead_code)]

use std::sync::Arc;

use api::AppState;
use api::models::{Category, NewResource};
use common::CachePolicy;
use gateway::MemoryBackend;
use uuid::Uuid;

pub const PASSWORD: &str = "secret1";
pub const USER: &str = "ada@example.com";
pub const OTHER: &str = "grace@example.com";
pub const ADMIN: &str = "root@example.com";

pub struct Backend {
    pub backend: MemoryBackend,
    pub user_id: Uuid,
    pub other_id: Uuid,
    pub admin_id: Uuid,
}

pub async fn backend() -> Backend {
    let backend = MemoryBackend::new();
    let user_id = backend
        .seed_user(USER, PASSWORD, "Ada Lovelace", "user")
        .await
        .unwrap();
    let other_id = backend
        .seed_user(OTHER, PASSWORD, "Grace Hopper", "user")
        .await
        .unwrap();
    let admin_id = backend
        .seed_user(ADMIN, PASSWORD, "Root Admin", "admin")
        .await
        .unwrap();
    Backend {
        backend,
        user_id,
        other_id,
        admin_id,
    }
}

/// A client with its own cache, not signed in
pub async fn anonymous(backend: &MemoryBackend) -> AppState {
    let state = AppState::new(Arc::new(backend.connect()), CachePolicy::default());
    state.session.start().await.unwrap();
    settle().await;
    state
}

/// A client with its own cache, signed in as `email`
pub async fn client(backend: &MemoryBackend, email: &str) -> AppState {
    let state = anonymous(backend).await;
    state.session.sign_in(email, PASSWORD).await.unwrap();
    settle().await;
    state
}

/// Let tasks spawned by session listeners run
pub async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

pub fn tool_a() -> NewResource {
    NewResource {
        title: "Tool A".to_string(),
        description: "A useful AI tool for writing".to_string(),
        url: "https://a.example".to_string(),
        category: Category::AiTools,
    }
}

pub fn resource(title: &str, category: Category) -> NewResource {
    NewResource {
        title: title.to_string(),
        description: format!("{} is worth sharing with everyone", title),
        url: format!("https://{}.example", title.to_lowercase().replace(' ', "-")),
        category,
    }
}
