//! In-memory artifact repository for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::artifact::{ArtifactCoordinates, ArtifactRepository, RepositoryError};

/// Mock implementation of the ArtifactRepository trait.
///
/// Files live in a map keyed by `{path}/{file}`. Like a Nexus raw repository
/// with redeploy disabled, overwriting an existing file is refused.
#[derive(Debug, Default)]
pub struct MockRepository {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// If set, the next operation fails with this error.
    next_error: Arc<RwLock<Option<RepositoryError>>>,
    puts: Arc<RwLock<u32>>,
    gets: Arc<RwLock<u32>>,
    /// Every trait method invoked, in order.
    call_log: Arc<RwLock<Vec<String>>>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(coordinates: &ArtifactCoordinates, file: &str) -> String {
        format!("{}/{}", coordinates.path(), file)
    }

    /// Store a file directly, bypassing the overwrite check.
    pub async fn insert(&self, coordinates: &ArtifactCoordinates, file: &str, bytes: Vec<u8>) {
        self.files
            .write()
            .await
            .insert(Self::key(coordinates, file), bytes);
    }

    pub async fn contains(&self, coordinates: &ArtifactCoordinates, file: &str) -> bool {
        self.files
            .read()
            .await
            .contains_key(&Self::key(coordinates, file))
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn set_next_error(&self, error: RepositoryError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn put_count(&self) -> u32 {
        *self.puts.read().await
    }

    pub async fn get_count(&self) -> u32 {
        *self.gets.read().await
    }

    pub async fn call_log(&self) -> Vec<String> {
        self.call_log.read().await.clone()
    }

    async fn begin(&self, call: &str) -> Result<(), RepositoryError> {
        self.call_log.write().await.push(call.to_string());
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ArtifactRepository for MockRepository {
    fn name(&self) -> &str {
        "mock"
    }

    fn url_for(&self, coordinates: &ArtifactCoordinates, file: &str) -> String {
        format!("mock://repository/{}", Self::key(coordinates, file))
    }

    async fn exists(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
    ) -> Result<bool, RepositoryError> {
        self.begin("exists").await?;
        Ok(self.contains(coordinates, file).await)
    }

    async fn get(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
    ) -> Result<Option<Vec<u8>>, RepositoryError> {
        self.begin("get").await?;
        *self.gets.write().await += 1;
        Ok(self
            .files
            .read()
            .await
            .get(&Self::key(coordinates, file))
            .cloned())
    }

    async fn put(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RepositoryError> {
        self.begin("put").await?;
        *self.puts.write().await += 1;

        let mut files = self.files.write().await;
        let key = Self::key(coordinates, file);
        if files.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!("{} already exists", key)));
        }
        files.insert(key, bytes);
        Ok(())
    }
}
