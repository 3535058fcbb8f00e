//! The embedding service: an actor that owns an [`EmbeddingBackend`].
//!
//! ```text
//!  EmbeddingService ──mpsc<Request>──▶ actor task ──▶ backend
//!        ▲                                 │
//!        └──────── watch<EmbeddingEvent> ◀─┘
//! ```
//!
//! The service is an explicitly owned handle: nothing works until
//! [`EmbeddingService::open`] spawns the actor, and [`EmbeddingService::close`]
//! shuts it down. Requests wait for the model to reach
//! [`EmbeddingEvent::Ready`] before being forwarded; a load failure
//! ([`EmbeddingEvent::Error`]) fails them instead. The actor handles one
//! request at a time, so backends never see concurrent calls.
//!
//! When the loaded [`ModelSpec`] names `dims`, every vector the backend
//! returns must have that length; anything else is refused with
//! [`ServiceError::WrongDimension`] before it can reach the store.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::{EmbeddingBackend, ModelSpec};

/// Requests queued on the actor before senders block.
const REQUEST_QUEUE: usize = 32;

/// Model lifecycle, published on a `watch` channel.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingEvent {
    /// Model loading in progress.
    Progress { loaded: u64, total: u64 },
    /// The named model is loaded and serving requests.
    Ready { model_id: String },
    /// The last load failed; requests are refused until a load succeeds.
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Not opened yet, or already closed.
    #[error("embedding service unavailable")]
    Unavailable,
    #[error("embedding model failed to load: {0}")]
    LoadFailed(String),
    #[error("model {model} returned a {actual}-dimensional vector, expected {expected}")]
    WrongDimension {
        model: String,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

enum Request {
    LoadModel {
        spec: ModelSpec,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    EmbedTexts {
        texts: Vec<String>,
        reply: oneshot::Sender<Result<Vec<Vec<f32>>, ServiceError>>,
    },
    EmbedQuery {
        text: String,
        reply: oneshot::Sender<Result<Vec<f32>, ServiceError>>,
    },
}

struct Handle {
    tx: mpsc::Sender<Request>,
    events: watch::Receiver<EmbeddingEvent>,
    task: JoinHandle<()>,
}

/// Owned handle to the embedding actor.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    handle: Mutex<Option<Handle>>,
}

impl EmbeddingService {
    /// Create a closed service around `backend`.
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the actor and start loading `spec`. Returns immediately;
    /// requests made before loading finishes wait for it.
    ///
    /// Opening an already-open service does nothing.
    pub async fn open(&self, spec: ModelSpec) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let (events_tx, events) = watch::channel(EmbeddingEvent::Progress {
            loaded: 0,
            total: 0,
        });
        let backend = Arc::clone(&self.backend);
        let task = tokio::spawn(run_actor(backend, spec, rx, events_tx));

        *guard = Some(Handle { tx, events, task });
    }

    /// Stop accepting requests and wait for the actor to drain.
    ///
    /// Requests already handed to the actor run to completion.
    pub async fn close(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(Handle { tx, events, task }) = handle {
            drop(tx);
            drop(events);
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "embedding actor ended abnormally");
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Subscribe to model lifecycle events.
    pub async fn subscribe(&self) -> Result<watch::Receiver<EmbeddingEvent>, ServiceError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(ServiceError::Unavailable)?;
        Ok(handle.events.clone())
    }

    /// The model currently serving requests, waiting for any load in flight.
    pub async fn active_model(&self) -> Result<String, ServiceError> {
        let (_, mut events) = self.channels().await?;
        wait_ready(&mut events).await
    }

    /// Switch to a different model. Resolves once the load finishes.
    pub async fn load_model(&self, spec: ModelSpec) -> Result<(), ServiceError> {
        let (tx, _) = self.channels().await?;
        let (reply, rx) = oneshot::channel();
        tx.send(Request::LoadModel { spec, reply })
            .await
            .map_err(|_| ServiceError::Unavailable)?;
        rx.await.map_err(|_| ServiceError::Unavailable)??;
        Ok(())
    }

    /// Embed a batch of texts, one vector per input.
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ServiceError> {
        let expected = texts.len();
        let tx = self.ready_sender().await?;
        let (reply, rx) = oneshot::channel();
        tx.send(Request::EmbedTexts { texts, reply })
            .await
            .map_err(|_| ServiceError::Unavailable)?;
        let vectors = rx.await.map_err(|_| ServiceError::Unavailable)??;
        if vectors.len() != expected {
            return Err(ServiceError::Backend(anyhow::anyhow!(
                "backend returned {} embeddings for {} texts",
                vectors.len(),
                expected
            )));
        }
        Ok(vectors)
    }

    /// Embed a single query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let tx = self.ready_sender().await?;
        let (reply, rx) = oneshot::channel();
        tx.send(Request::EmbedQuery {
            text: text.to_string(),
            reply,
        })
        .await
        .map_err(|_| ServiceError::Unavailable)?;
        Ok(rx.await.map_err(|_| ServiceError::Unavailable)??)
    }

    async fn channels(
        &self,
    ) -> Result<(mpsc::Sender<Request>, watch::Receiver<EmbeddingEvent>), ServiceError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(ServiceError::Unavailable)?;
        Ok((handle.tx.clone(), handle.events.clone()))
    }

    async fn ready_sender(&self) -> Result<mpsc::Sender<Request>, ServiceError> {
        let (tx, mut events) = self.channels().await?;
        wait_ready(&mut events).await?;
        Ok(tx)
    }
}

async fn wait_ready(events: &mut watch::Receiver<EmbeddingEvent>) -> Result<String, ServiceError> {
    loop {
        let state = events.borrow_and_update().clone();
        match state {
            EmbeddingEvent::Ready { model_id } => return Ok(model_id),
            EmbeddingEvent::Error { message } => return Err(ServiceError::LoadFailed(message)),
            EmbeddingEvent::Progress { .. } => {}
        }
        events
            .changed()
            .await
            .map_err(|_| ServiceError::Unavailable)?;
    }
}

async fn run_actor(
    backend: Arc<dyn EmbeddingBackend>,
    initial: ModelSpec,
    mut rx: mpsc::Receiver<Request>,
    events: watch::Sender<EmbeddingEvent>,
) {
    let mut active = initial.clone();
    let _ = load(backend.as_ref(), &initial, &events).await;

    while let Some(request) = rx.recv().await {
        match request {
            Request::LoadModel { spec, reply } => {
                let result = load(backend.as_ref(), &spec, &events).await;
                if result.is_ok() {
                    active = spec;
                }
                let _ = reply.send(result);
            }
            Request::EmbedTexts { texts, reply } => {
                let result = match backend.embed_texts(&texts).await {
                    Ok(vectors) => match vectors.iter().try_for_each(|v| check_dims(&active, v)) {
                        Ok(()) => Ok(vectors),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(ServiceError::Backend(e)),
                };
                let _ = reply.send(result);
            }
            Request::EmbedQuery { text, reply } => {
                let result = match backend.embed_query(&text).await {
                    Ok(vector) => check_dims(&active, &vector).map(|()| vector),
                    Err(e) => Err(ServiceError::Backend(e)),
                };
                let _ = reply.send(result);
            }
        }
    }

    tracing::debug!("embedding actor stopped");
}

fn check_dims(spec: &ModelSpec, vector: &[f32]) -> Result<(), ServiceError> {
    match spec.dims {
        Some(expected) if vector.len() != expected => Err(ServiceError::WrongDimension {
            model: spec.model_id.clone(),
            expected,
            actual: vector.len(),
        }),
        _ => Ok(()),
    }
}

async fn load(
    backend: &dyn EmbeddingBackend,
    spec: &ModelSpec,
    events: &watch::Sender<EmbeddingEvent>,
) -> anyhow::Result<()> {
    events.send_replace(EmbeddingEvent::Progress {
        loaded: 0,
        total: 0,
    });
    let progress = |loaded: u64, total: u64| {
        events.send_replace(EmbeddingEvent::Progress { loaded, total });
    };

    match backend.load(spec, &progress).await {
        Ok(()) => {
            tracing::info!(model = %spec.model_id, "embedding model ready");
            events.send_replace(EmbeddingEvent::Ready {
                model_id: spec.model_id.clone(),
            });
            Ok(())
        }
        Err(e) => {
            tracing::warn!(model = %spec.model_id, error = %e, "embedding model failed to load");
            events.send_replace(EmbeddingEvent::Error {
                message: e.to_string(),
            });
            Err(e)
        }
    }
}
