//! Striped files
//!
//! # Architecture
//!
//! ```text
//! Filesystem ──create/open──→ File
//!                              ├─ lanes: [Lane 0, Lane 1, ..., Lane N-1]   (by lane number)
//!                              ├─ writer ring: least-filled lane first
//!                              └─ reader ring: lane-number order
//! ```
//!
//! File bytes are striped over the lanes one record at a time: stripe `s`
//! lives in lane `s % N`, record `s / N`. A write or read is split into
//! batches of at most one record per lane; each batch fans out one task per
//! lane and joins them before the rings move, so batches on one file are
//! strictly sequenced.

mod buffered;
mod copy;
mod read;
mod seek;
mod stat;
mod write;

pub use buffered::BufferedWriter;
pub use stat::FileStat;

use crate::backend::Backend;
use crate::config::FsConfig;
use crate::error::{Error, Result};
use crate::index::{FileHeader, FileOptions, Index, LaneEntry};
use crate::lane::{Lane, LaneHeader};
use crate::pool::ClientPool;
use crate::remote::{Container, RemoteStore, Role};
use crate::ring::LaneRing;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Ring cursors and logical read position, guarded together
struct Cursors {
    writer: LaneRing,
    reader: LaneRing,
    read_pos: u64,
}

/// A byte stream striped over the lanes of one container
pub struct File {
    container: RwLock<Container>,
    header: FileHeader,
    lanes: Vec<Arc<Mutex<Lane>>>,
    cursors: Mutex<Cursors>,
    backend: Arc<Backend>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("container", &self.container.read().id)
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

impl File {
    fn from_index(container: Container, index: Index, backend: Arc<Backend>) -> Result<Self> {
        if index.lanes.is_empty() {
            return Err(Error::MalformedHeader(format!(
                "container {} has no lanes",
                container.id
            )));
        }

        let writer = LaneRing::new(index.writer_order());
        let reader = LaneRing::new((0..index.lanes.len()).collect());
        let lanes = index
            .lanes
            .into_iter()
            .map(|entry| {
                Arc::new(Mutex::new(Lane::new(
                    container.id.clone(),
                    entry.thread_id,
                    entry.header,
                    entry.modified,
                    Arc::clone(&backend),
                )))
            })
            .collect();

        Ok(Self {
            container: RwLock::new(container),
            header: index.header,
            lanes,
            cursors: Mutex::new(Cursors {
                writer,
                reader,
                read_pos: 0,
            }),
            backend,
        })
    }

    /// Container id
    pub fn id(&self) -> String {
        self.container.read().id.clone()
    }

    pub fn name(&self) -> String {
        self.container.read().name.clone()
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Index as currently held by this handle
    pub async fn index(&self) -> Index {
        let mut lanes = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let lane = lane.lock().await;
            lanes.push(LaneEntry {
                thread_id: lane.thread_id().to_string(),
                header: lane.header().clone(),
                modified: lane.modified(),
            });
        }
        Index {
            header: self.header,
            lanes,
        }
    }

    /// Size in bytes according to the lane headers
    pub async fn size(&self) -> u64 {
        let mut size = 0;
        for lane in &self.lanes {
            size += lane.lock().await.size();
        }
        size
    }
}

/// Entry point: creates, opens and removes files on a store
pub struct Filesystem {
    backend: Arc<Backend>,
    config: FsConfig,
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("backend", &self.backend)
            .finish()
    }
}

impl Filesystem {
    pub fn new(pool: ClientPool, config: FsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(Backend::new(pool, &config)),
            config,
        })
    }

    /// Filesystem over a single credential
    pub fn with_store(store: Arc<dyn RemoteStore>, config: FsConfig) -> Result<Self> {
        let pool = ClientPool::single(store, &config.limits);
        Self::new(pool, config)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub async fn create_file(&self, name: &str, options: FileOptions) -> Result<File> {
        self.create_file_ctx(&CancellationToken::new(), name, options).await
    }

    /// Create a container named `name` and provision its headers.
    ///
    /// The container is deleted again if provisioning fails.
    #[instrument(skip(self, cancel, options), fields(lanes = options.lanes))]
    pub async fn create_file_ctx(&self, cancel: &CancellationToken, name: &str, options: FileOptions) -> Result<File> {
        let options = options.resolve(self.config.default_lanes);
        let container = self
            .backend
            .once(cancel, 1, |client| async move { client.create_container(name).await })
            .await?;
        info!(container = %container.id, lanes = options.lanes, "Created container");

        match self.provision(cancel, &container.id, options).await {
            Ok(lanes) => File::from_index(
                container,
                Index {
                    header: FileHeader::new(options),
                    lanes,
                },
                Arc::clone(&self.backend),
            ),
            Err(err) => {
                warn!(container = %container.id, error = %err, "Provisioning failed, deleting container");
                let id = container.id.as_str();
                let cleanup = self
                    .backend
                    .retry(&CancellationToken::new(), "delete_container", 1, |client| async move {
                        client.delete_container(id).await
                    })
                    .await;
                if let Err(cleanup) = cleanup {
                    error!(container = %container.id, error = %cleanup, "Unable to delete partially created container");
                }
                Err(err)
            }
        }
    }

    async fn provision(&self, cancel: &CancellationToken, container: &str, options: FileOptions) -> Result<Vec<LaneEntry>> {
        let emails = self.backend.pool().emails();
        if emails.len() > 1 {
            self.share(cancel, container, &emails).await?;
        }

        let header = FileHeader::new(options).to_json()?;
        let header = &header;
        self.backend
            .retry(cancel, "create_thread", 1, |client| async move {
                client.create_thread(container, header.clone()).await
            })
            .await?;

        let handles: Vec<_> = (0..options.lanes)
            .map(|number| {
                let backend = Arc::clone(&self.backend);
                let cancel = cancel.clone();
                let container = container.to_string();
                tokio::spawn(async move {
                    let header = LaneHeader::new(number);
                    let content = header.to_json()?;
                    let (container, content) = (container.as_str(), &content);
                    let thread = backend
                        .retry(&cancel, "create_thread", 1, |client| async move {
                            client.create_thread(container, content.clone()).await
                        })
                        .await?;
                    Ok::<_, Error>(LaneEntry {
                        thread_id: thread.id,
                        header,
                        modified: thread.modified,
                    })
                })
            })
            .collect();

        let mut lanes = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(entry)) => lanes.push(entry),
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join) => {
                    first_error.get_or_insert(Error::Internal(format!("lane provisioning task failed: {}", join)));
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => {
                debug!(container, lanes = lanes.len(), "Provisioned lanes");
                Ok(lanes)
            }
        }
    }

    /// Grant every pooled identity write access to `container`.
    async fn share(&self, cancel: &CancellationToken, container: &str, emails: &[String]) -> Result<()> {
        let existing = self
            .backend
            .retry(cancel, "list_permissions", 1, |client| async move {
                client.list_permissions(container).await
            })
            .await?;

        for email in emails {
            if existing.iter().any(|p| &p.email == email) {
                continue;
            }
            let email = email.as_str();
            self.backend
                .retry(cancel, "create_permission", 1, |client| async move {
                    client.create_permission(container, email, Role::Writer).await
                })
                .await?;
            debug!(container, email, "Granted writer permission");
        }
        Ok(())
    }

    pub async fn open_file(&self, name: &str) -> Result<File> {
        self.open_file_ctx(&CancellationToken::new(), name).await
    }

    /// Open the container named exactly `name`.
    #[instrument(skip(self, cancel))]
    pub async fn open_file_ctx(&self, cancel: &CancellationToken, name: &str) -> Result<File> {
        let mut matches = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page_token = token.as_deref();
            let page = self
                .backend
                .retry(cancel, "list_containers", 1, |client| async move {
                    client.list_containers(Some(name), page_token).await
                })
                .await?;
            matches.extend(page.items.into_iter().filter(|c| c.name == name));
            match page.next_page {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        match matches.len() {
            0 => Err(Error::NotFound(format!("file {}", name))),
            1 => {
                let id = matches[0].id.clone();
                self.open_container_ctx(cancel, &id).await
            }
            n => Err(Error::InvalidArgument(format!("{} files are named {}", n, name))),
        }
    }

    pub async fn open_container(&self, id: &str) -> Result<File> {
        self.open_container_ctx(&CancellationToken::new(), id).await
    }

    /// Open a file by container id, rebuilding its index from the store.
    #[instrument(skip(self, cancel))]
    pub async fn open_container_ctx(&self, cancel: &CancellationToken, id: &str) -> Result<File> {
        let container = self
            .backend
            .retry(cancel, "get_container", 1, |client| async move {
                client.get_container(id).await
            })
            .await?;
        let index = Index::build(&self.backend, cancel, id).await?;
        info!(container = id, lanes = index.lanes.len(), "Opened file");
        File::from_index(container, index, Arc::clone(&self.backend))
    }

    /// Open `name`, creating it when no such file exists.
    pub async fn open_or_create(&self, name: &str, options: FileOptions) -> Result<File> {
        match self.open_file(name).await {
            Err(Error::NotFound(_)) => self.create_file(name, options).await,
            other => other,
        }
    }

    /// Delete the file's container.
    #[instrument(skip(self, file), fields(container = %file.id()))]
    pub async fn remove_file(&self, file: File) -> Result<()> {
        let id = file.id();
        let id = id.as_str();
        self.backend
            .once(&CancellationToken::new(), 1, |client| async move {
                client.delete_container(id).await
            })
            .await?;
        info!(container = id, "Removed file");
        Ok(())
    }
}
