//! Artifact publisher
//!
//! Archives the application source and uploads it to the in-cluster object
//! store through a port-forward:
//! - `tar -czf <work_dir>/build.tgz <source>`
//! - open a tunnel to the store service
//! - ensure the bucket exists, retrying while the tunnel comes up and
//!   giving up early if the forward dies
//! - stream the archive as `<name>-<version>.tgz`

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::domain::{AppDescriptor, PublishedArtifact, StoreConfig};
use crate::error::{DeployError, Result};
use crate::process::{CommandRunner, ExternalCommand};
use crate::store::{ARCHIVE_CONTENT_TYPE, ObjectStoreClient, StoreConnector, StoreEndpoint, StoreError};
use crate::tunnel::{TunnelManager, TunnelSession};

/// File name of the source archive inside the working directory
pub const SOURCE_ARCHIVE: &str = "build.tgz";

/// Publishes application source to the object store
pub struct ArtifactPublisher {
    runner: Arc<dyn CommandRunner>,
    tunnels: TunnelManager,
    connector: Arc<dyn StoreConnector>,
    tar: String,
    bucket: String,
    store_port: u16,
    region: String,
    retry: RetryPolicy,
}

impl ArtifactPublisher {
    /// Creates a publisher
    ///
    /// # Arguments
    /// * `runner` - Runner used for the archiver
    /// * `tunnels` - Tunnel manager used to reach the store
    /// * `connector` - Store client factory
    /// * `tar` - tar binary
    /// * `bucket` - Bucket archives are published to
    /// * `store_port` - Port the store listens on inside the cluster
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tunnels: TunnelManager,
        connector: Arc<dyn StoreConnector>,
        tar: impl Into<String>,
        bucket: impl Into<String>,
        store_port: u16,
    ) -> Self {
        Self {
            runner,
            tunnels,
            connector,
            tar: tar.into(),
            bucket: bucket.into(),
            store_port,
            region: crate::config::DEFAULT_STORE_REGION.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Archives `descriptor.source` into `work_dir` and uploads it
    pub async fn publish(
        &self,
        work_dir: &Path,
        descriptor: &AppDescriptor,
        store: &StoreConfig,
    ) -> Result<PublishedArtifact> {
        let archive = work_dir.join(SOURCE_ARCHIVE);
        let key = descriptor.artifact_key();

        let command = ExternalCommand::new(&self.tar)
            .arg("-czf")
            .arg(&archive)
            .arg(&descriptor.source);
        self.runner.run(&command).map_err(|e| {
            DeployError::packaging(
                format!("packaging source {} failed", descriptor.source.display()),
                e,
            )
        })?;

        let file = tokio::fs::File::open(&archive).await.map_err(|e| {
            DeployError::packaging(format!("reading source {} failed", archive.display()), e)
        })?;

        info!("Uploading {} as {}/{}", archive.display(), self.bucket, key);

        self.tunnels
            .with_tunnel(&store.namespace, &store.service, self.store_port, |session| {
                self.upload(session, store, &key, file)
            })
            .await?;

        Ok(PublishedArtifact {
            bucket: self.bucket.clone(),
            key,
            archive,
        })
    }

    async fn upload(
        &self,
        session: TunnelSession,
        store: &StoreConfig,
        key: &str,
        file: tokio::fs::File,
    ) -> Result<()> {
        let endpoint = StoreEndpoint::loopback(
            session.local_port(),
            &store.access_key,
            &store.secret_key,
            &self.region,
        );
        let url = endpoint.url.clone();

        let client = self
            .connector
            .connect(endpoint)
            .await
            .map_err(|e| DeployError::store(format!("connecting to store at {} failed", url), e))?;

        self.ensure_bucket(client.as_ref(), &session).await?;

        let size = client
            .put_object(&self.bucket, key, file, ARCHIVE_CONTENT_TYPE)
            .await
            .map_err(|e| DeployError::store(format!("uploading source {} failed", key), e))?;

        info!("Uploaded {} ({} bytes)", key, size);
        Ok(())
    }

    /// Creates the bucket, retrying while the store is unreachable
    ///
    /// An unreachable store behind a forward that has exited will never come
    /// up, so that is reported as a transport error without further retries.
    async fn ensure_bucket(
        &self,
        client: &dyn ObjectStoreClient,
        session: &TunnelSession,
    ) -> Result<()> {
        let failed = |e: StoreError| {
            DeployError::store(format!("creating bucket {} failed", self.bucket), e)
        };
        let mut attempt = 0;

        loop {
            attempt += 1;

            match client.ensure_bucket(&self.bucket).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Store reachable after {} attempt(s)", attempt);
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    session.ensure_alive()?;
                    if attempt >= self.retry.attempts {
                        return Err(failed(e));
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Store not reachable yet (attempt {}/{}): {}; retrying in {:?}",
                        attempt, self.retry.attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(failed(e)),
            }
        }
    }
}
