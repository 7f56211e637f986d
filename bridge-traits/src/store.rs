//! Persistence contracts for sessions and file records.
//!
//! Stores are plain CRUD. They do not validate status transitions; the core
//! validates before it persists.

use async_trait::async_trait;
use core_async::sync::mpsc;

use crate::{
    error::Result,
    model::{FileId, SessionId, SyncFile, SyncSession},
};

/// Stream of change notifications. Dropping the receiver unsubscribes.
pub type Subscription<T> = mpsc::Receiver<Result<T>>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &SyncSession) -> Result<()>;

    async fn update(&self, session: &SyncSession) -> Result<()>;

    /// # Errors
    ///
    /// `BridgeError::NotFound` when no such session exists.
    async fn get(&self, id: SessionId) -> Result<SyncSession>;

    async fn list(&self, user_id: &str) -> Result<Vec<SyncSession>>;

    async fn subscribe(&self, id: SessionId) -> Result<Subscription<SyncSession>>;

    async fn delete(&self, id: SessionId) -> Result<()>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create(&self, file: &SyncFile) -> Result<()>;

    async fn update(&self, file: &SyncFile) -> Result<()>;

    /// # Errors
    ///
    /// `BridgeError::NotFound` when no such file exists.
    async fn get(&self, id: FileId) -> Result<SyncFile>;

    async fn list_by_session(&self, session_id: SessionId) -> Result<Vec<SyncFile>>;

    async fn subscribe_by_session(&self, session_id: SessionId) -> Result<Subscription<SyncFile>>;

    async fn delete(&self, id: FileId) -> Result<()>;
}
