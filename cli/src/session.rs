//! The session orchestrator.
//!
//! All state lives behind one async mutex. Intents lock, decide, unlock, talk
//! to the backend, then lock again to apply the result, but only if no newer
//! intent for the same slot (model, generation, upload) was issued meanwhile.
//! Every change is published as a fresh [`SessionState`] on a watch channel.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{Backend, BackendError};
use crate::error::SessionError;
use crate::export;
use crate::generation::{self, GenerationRequest};
use crate::lifecycle::{ModelLifecycle, Transition};
use crate::player;
use crate::registry::{self, ModelRegistry};
use crate::resources::{AudioSource, PlayableHandle, ResourcePool};
use crate::state::{Busy, PromptField, SessionState, Track, UploadedFile};
use crate::types::{AudioFormat, GenerationMode, GenerationOutput};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Client-side limit for any single backend call.
    pub request_timeout: Duration,
    pub audio_retry_delay: Duration,
    pub extend_seconds: u32,
    pub export_dir: PathBuf,
    pub audio_format: AudioFormat,
}

#[derive(Debug, Error)]
enum CallError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("timed out")]
    Timeout,
}

struct Inner {
    state: SessionState,
    registry: ModelRegistry,
    lifecycle: ModelLifecycle,
    resources: ResourcePool,
    generation_token: u64,
    upload_token: u64,
}

pub struct Session<B> {
    backend: Arc<B>,
    options: SessionOptions,
    inner: Mutex<Inner>,
    updates: watch::Sender<SessionState>,
    /// Woken whenever an unload returns.
    unloads: Notify,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: Arc<B>, options: SessionOptions) -> Self {
        let (updates, _) = watch::channel(SessionState::default());
        let inner = Inner {
            state: SessionState::default(),
            registry: ModelRegistry::default(),
            lifecycle: ModelLifecycle::default(),
            resources: ResourcePool::new(),
            generation_token: 0,
            upload_token: 0,
        };
        Self { backend, options, inner: Mutex::new(inner), updates, unloads: Notify::new() }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.updates.borrow().clone()
    }

    pub async fn refresh_models(&self) {
        let fetch = registry::fetch_models(self.backend.as_ref());
        let result = tokio::time::timeout(self.options.request_timeout, fetch)
            .await
            .unwrap_or(Err(SessionError::Timeout("model registry")));
        let mut inner = self.inner.lock().await;
        match result {
            Ok(models) => {
                if models.is_empty() {
                    info!("backend offers no models");
                }
                let active = inner.lifecycle.active().map(str::to_string);
                let pending = inner.lifecycle.pending().map(str::to_string);
                inner.registry.replace(models, active.as_deref(), pending.as_deref());
                inner.state.last_error = None;
                self.publish(&mut inner);
            }
            Err(err) => self.reject(&mut inner, err),
        }
    }

    pub async fn select_model(&self, id: &str) {
        let transition = {
            let mut inner = self.inner.lock().await;
            if inner.state.busy == Busy::Generating {
                return self.reject(&mut inner, SessionError::Busy("generation"));
            }
            if !inner.registry.contains(id) {
                return self.reject(&mut inner, SessionError::invalid(format!("unknown model {id}")));
            }
            let Some(transition) = inner.lifecycle.begin(id) else {
                debug!("model {id} is already active");
                return;
            };
            if transition.unload.is_some() {
                inner.registry.clear_active();
            }
            inner.state.busy = Busy::LoadingModel;
            info!("switching to model {id}");
            self.publish(&mut inner);
            transition
        };

        let Transition { token, target, unload } = transition;
        if let Some(previous) = unload {
            self.unload(&previous).await;
            let mut inner = self.inner.lock().await;
            if !inner.lifecycle.unload_finished(token) {
                debug!("{} for {target}", SessionError::StaleResponseDiscarded("unload"));
                return;
            }
        }
        if !self.await_unload_of(&target, token).await {
            debug!("selection of {target} superseded while its unload was in flight");
            return;
        }

        let backend = Arc::clone(&self.backend);
        let id = target.clone();
        let result = self.call(async move { backend.load_model(&id).await }).await;

        let mut inner = self.inner.lock().await;
        let current = match &result {
            Ok(()) => inner.lifecycle.complete(token),
            Err(_) => inner.lifecycle.fail(token),
        };
        match (result, current) {
            (Ok(()), true) => {
                inner.registry.mark_active(&target);
                inner.state.busy = Busy::Idle;
                inner.state.last_error = None;
                info!("model {target} is active");
                self.publish(&mut inner);
            }
            (Ok(()), false) => {
                debug!("{} for {target}", SessionError::StaleResponseDiscarded("load"));
                let wanted = inner.lifecycle.active() == Some(target.as_str())
                    || inner.lifecycle.pending() == Some(target.as_str());
                if !wanted {
                    inner.lifecycle.unload_started(&target);
                    drop(inner);
                    info!("unloading superseded model {target}");
                    self.unload(&target).await;
                }
            }
            (Err(err), true) => {
                inner.registry.clear_active();
                inner.state.busy = Busy::Idle;
                let err = match err {
                    CallError::Timeout => SessionError::Timeout("model load"),
                    CallError::Backend(err) => {
                        SessionError::ModelLoadFailed { id: target, reason: err.to_string() }
                    }
                };
                error!("{err}");
                inner.state.last_error = Some(err);
                self.publish(&mut inner);
            }
            (Err(err), false) => {
                debug!("{} for {target}: {err}", SessionError::StaleResponseDiscarded("load"));
            }
        }
    }

    pub async fn set_prompt_field(&self, field: PromptField) {
        let mut inner = self.inner.lock().await;
        inner.state.prompt.apply(field);
        self.publish(&mut inner);
    }

    /// Switches between plain generation and remixing. Leaving remix mode
    /// discards the uploaded file.
    pub async fn set_mode(&self, mode: GenerationMode) {
        let mut inner = self.inner.lock().await;
        if mode == GenerationMode::Extend {
            return self.reject(
                &mut inner,
                SessionError::invalid("extend is started from a track in the history"),
            );
        }
        if inner.state.mode == GenerationMode::Remix && mode != GenerationMode::Remix {
            Self::discard_upload(&mut inner);
        }
        inner.state.mode = mode;
        self.publish(&mut inner);
    }

    /// Submits a request built from the current prompt fields.
    pub async fn generate(&self) {
        let request = {
            let mut inner = self.inner.lock().await;
            match GenerationRequest::from_state(&inner.state) {
                Some(request) => request,
                None => return self.reject(&mut inner, SessionError::invalid("no model is loaded")),
            }
        };
        self.submit(request).await;
    }

    pub async fn extend(&self, track_id: &str) {
        let request = {
            let mut inner = self.inner.lock().await;
            let Some(model) = inner.lifecycle.active().map(str::to_string) else {
                return self.reject(&mut inner, SessionError::invalid("no model is loaded"));
            };
            let Some(track) = inner.state.history.get(track_id) else {
                return self
                    .reject(&mut inner, SessionError::invalid(format!("unknown track {track_id}")));
            };
            GenerationRequest::extend(track, &model, self.options.extend_seconds)
        };
        self.submit(request).await;
    }

    pub async fn submit(&self, request: GenerationRequest) {
        let (token, original) = {
            let mut inner = self.inner.lock().await;
            if inner.state.busy == Busy::Generating {
                return self.reject(&mut inner, SessionError::Busy("generation"));
            }
            if let Err(err) = request.validate(&inner.state) {
                return self.reject(&mut inner, err);
            }
            let original = request.replaces().and_then(|id| inner.state.history.get(id).cloned());
            inner.generation_token += 1;
            inner.state.busy = Busy::Generating;
            inner.state.last_error = None;
            info!("{} with {} started", request.mode.label(), request.model_id);
            self.publish(&mut inner);
            (inner.generation_token, original)
        };

        let outcome = self.produce(&request).await;

        let mut inner = self.inner.lock().await;
        if inner.generation_token != token {
            debug!("{}", SessionError::StaleResponseDiscarded("generation"));
            return;
        }
        inner.state.busy = Busy::Idle;
        match outcome {
            Ok((server_id, bytes)) => {
                let id = Self::install_track(&mut inner, &request, original, server_id, bytes);
                inner.state.last_error = None;
                info!("{} finished as track {id}", request.mode.label());
            }
            Err(CallError::Timeout) => {
                error!("{} timed out", request.mode.label());
                inner.state.last_error = Some(SessionError::Timeout("generation"));
            }
            Err(CallError::Backend(err)) => {
                error!("{} failed: {err}", request.mode.label());
                inner.state.last_error = Some(SessionError::GenerationFailed(err.to_string()));
            }
        }
        self.publish(&mut inner);
    }

    pub async fn upload_file(&self, name: &str, bytes: Vec<u8>) {
        let token = {
            let mut inner = self.inner.lock().await;
            if bytes.is_empty() {
                return self.reject(&mut inner, SessionError::invalid(format!("{name} is empty")));
            }
            inner.upload_token += 1;
            inner.upload_token
        };
        info!("uploading {name} ({} bytes)", bytes.len());

        let blob: Arc<[u8]> = Arc::from(bytes);
        let backend = Arc::clone(&self.backend);
        let (file_name, payload) = (name.to_string(), blob.to_vec());
        let result = self.call(async move { backend.upload(&file_name, payload).await }).await;

        let mut inner = self.inner.lock().await;
        if inner.upload_token != token {
            debug!("{} for {name}", SessionError::StaleResponseDiscarded("upload"));
            return;
        }
        match result {
            Ok(server_id) => {
                let size = blob.len();
                let audio =
                    inner.resources.acquire(AudioSource::Uploaded { name: name.to_string(), bytes: blob });
                let file = UploadedFile { name: name.to_string(), size, server_id, audio };
                if let Some(previous) = inner.state.uploaded_file.replace(file) {
                    inner.resources.release(previous.audio);
                }
                inner.state.mode = GenerationMode::Remix;
                inner.state.last_error = None;
                info!("{name} uploaded, remix ready");
            }
            Err(CallError::Timeout) => {
                inner.state.last_error = Some(SessionError::Timeout("upload"));
            }
            Err(CallError::Backend(err)) => {
                warn!("upload of {name} failed: {err}");
                inner.state.last_error = Some(SessionError::UploadFailed(err.to_string()));
            }
        }
        self.publish(&mut inner);
    }

    pub async fn clear_upload(&self) {
        let mut inner = self.inner.lock().await;
        Self::discard_upload(&mut inner);
        if inner.state.mode == GenerationMode::Remix {
            inner.state.mode = GenerationMode::Generate;
        }
        self.publish(&mut inner);
    }

    pub async fn select_track(&self, track_id: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.state.history.contains(track_id) {
            return self.reject(&mut inner, SessionError::invalid(format!("unknown track {track_id}")));
        }
        inner.state.current_track = Some(track_id.to_string());
        self.publish(&mut inner);
    }

    /// Bytes behind a history track while its handle is live.
    pub async fn track_audio(&self, track_id: &str) -> Option<(String, Arc<[u8]>)> {
        let inner = self.inner.lock().await;
        let track = inner.state.history.get(track_id)?;
        let source = inner.resources.resolve(track.audio)?;
        Some((track.name.clone(), Arc::clone(source.bytes())))
    }

    pub async fn upload_audio(&self) -> Option<(String, Arc<[u8]>)> {
        let inner = self.inner.lock().await;
        let file = inner.state.uploaded_file.as_ref()?;
        let source = inner.resources.resolve(file.audio)?;
        Some((file.name.clone(), Arc::clone(source.bytes())))
    }

    pub async fn export_track(&self, track_id: &str) {
        let Some((track, bytes)) = self.export_source(track_id).await else {
            let mut inner = self.inner.lock().await;
            return self.reject(&mut inner, SessionError::invalid(format!("unknown track {track_id}")));
        };
        let dir = self.options.export_dir.clone();
        let result = export::export_track(dir, track, bytes, self.options.audio_format).await;
        let mut inner = self.inner.lock().await;
        match result {
            Ok(path) => {
                info!("exported {track_id} to {}", path.display());
                inner.state.last_export = Some(path);
                self.publish(&mut inner);
            }
            Err(err) => self.reject(&mut inner, SessionError::ExportFailed(format!("{err:#}"))),
        }
    }

    /// Surfaces a failure that happened outside the session, e.g. reading a file.
    pub async fn report(&self, err: SessionError) {
        let mut inner = self.inner.lock().await;
        self.reject(&mut inner, err);
    }

    /// Ends the session: in-flight results are ignored and every handle released.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.generation_token += 1;
        inner.upload_token += 1;
        let tracks = inner.state.history.drain();
        for track in tracks {
            inner.resources.release(track.audio);
        }
        Self::discard_upload(&mut inner);
        inner.state.current_track = None;
        inner.state.busy = Busy::Idle;
        if inner.resources.live_count() > 0 {
            warn!("{} handles were not owned by the session", inner.resources.live_count());
            inner.resources.release_all();
        }
        info!("session closed");
        self.publish(&mut inner);
    }

    async fn export_source(&self, track_id: &str) -> Option<(Track, Arc<[u8]>)> {
        let inner = self.inner.lock().await;
        let track = inner.state.history.get(track_id)?.clone();
        let bytes = Arc::clone(inner.resources.resolve(track.audio)?.bytes());
        Some((track, bytes))
    }

    async fn produce(
        &self,
        request: &GenerationRequest,
    ) -> Result<(Option<String>, Vec<u8>), CallError> {
        let backend = Arc::clone(&self.backend);
        let output = match request.extend_body(self.options.extend_seconds) {
            Some(body) => self.call(async move { backend.extend(&body).await }).await?,
            None => {
                let body = request.generate_body();
                self.call(async move { backend.generate(&body).await }).await?
            }
        };
        match output {
            GenerationOutput::Inline(bytes) => Ok((None, bytes)),
            GenerationOutput::Pending { track_id } => {
                debug!("track {track_id} accepted, fetching audio");
                let backend = Arc::clone(&self.backend);
                let delay = self.options.audio_retry_delay;
                let id = track_id.clone();
                let bytes = self
                    .call(async move { generation::resolve_audio(backend.as_ref(), &id, delay).await })
                    .await?;
                Ok((Some(track_id), bytes))
            }
        }
    }

    /// Runs a backend call as a detached task bounded by the client timeout.
    /// On timeout the task keeps running and its result is dropped.
    async fn call<T, F>(&self, request: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, BackendError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(request);
        match tokio::time::timeout(self.options.request_timeout, task).await {
            Ok(Ok(result)) => result.map_err(CallError::from),
            Ok(Err(join)) => Err(CallError::Backend(BackendError::Aborted(join.to_string()))),
            Err(_) => Err(CallError::Timeout),
        }
    }

    /// Unloads `id`, which must already be recorded as unloading. Failures are
    /// logged only.
    async fn unload(&self, id: &str) {
        let backend = Arc::clone(&self.backend);
        let model = id.to_string();
        if let Err(err) = self.call(async move { backend.unload_model(&model).await }).await {
            let reason = err.to_string();
            warn!("{}", SessionError::ModelUnloadFailed { id: id.to_string(), reason });
        }
        self.inner.lock().await.lifecycle.unload_returned(id);
        self.unloads.notify_waiters();
    }

    /// Waits until no unload of `target` is in flight. Returns false when the
    /// transition `token` was superseded meanwhile.
    async fn await_unload_of(&self, target: &str, token: u64) -> bool {
        loop {
            let returned = self.unloads.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();
            {
                let inner = self.inner.lock().await;
                if !inner.lifecycle.is_current(token) {
                    return false;
                }
                if !inner.lifecycle.is_unloading(target) {
                    return true;
                }
            }
            debug!("waiting for the unload of {target} to return");
            returned.await;
        }
    }

    fn install_track(
        inner: &mut Inner,
        request: &GenerationRequest,
        original: Option<Track>,
        server_id: Option<String>,
        bytes: Vec<u8>,
    ) -> String {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let duration_seconds = player::probe_duration(&bytes)
            .or_else(|| request.duration_hint.map(|seconds| seconds as f32));
        let audio = inner.resources.acquire(AudioSource::Generated(bytes));
        let track = Track {
            id: server_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: request.track_name(original.as_ref()),
            model: request.model_id.clone(),
            duration_seconds,
            has_vocals: request.has_vocals,
            content_prompt: request.content_prompt.clone(),
            style_prompt: request.style_prompt.clone(),
            created_at: Utc::now(),
            audio,
        };
        let id = track.id.clone();

        let mut candidates: Vec<PlayableHandle> =
            inner.state.current().map(|current| current.audio).into_iter().collect();
        let displaced = match original {
            Some(original) => match inner.state.history.replace(&original.id, track) {
                Ok((previous, duplicate)) => Some(previous).into_iter().chain(duplicate).collect(),
                Err(track) => inner.state.history.push(track).into_iter().collect(),
            },
            None => inner.state.history.push(track).into_iter().collect::<Vec<_>>(),
        };
        candidates.extend(displaced.into_iter().map(|track| track.audio));
        inner.state.current_track = Some(id.clone());

        // History keeps every track it still lists; only orphans are released.
        for handle in candidates {
            if handle != audio && !inner.state.history.references(handle) {
                inner.resources.release(handle);
            }
        }
        id
    }

    fn discard_upload(inner: &mut Inner) {
        inner.upload_token += 1;
        if let Some(file) = inner.state.uploaded_file.take() {
            inner.resources.release(file.audio);
            debug!("discarded upload {}", file.name);
        }
    }

    fn reject(&self, inner: &mut Inner, err: SessionError) {
        warn!("{err}");
        inner.state.last_error = Some(err);
        self.publish(inner);
    }

    fn publish(&self, inner: &mut Inner) {
        debug_assert!(inner.registry.loaded_count() <= 1);
        inner.state.models = inner.registry.models();
        inner.state.selected_model = inner.lifecycle.active().map(str::to_string);
        inner.state.pending_model = inner.lifecycle.pending().map(str::to_string);
        inner.state.revision += 1;
        self.updates.send_replace(inner.state.clone());
    }

    #[cfg(test)]
    async fn live_handles(&self) -> Vec<PlayableHandle> {
        let inner = self.inner.lock().await;
        let mut handles: Vec<_> = inner.resources.live_handles().collect();
        handles.sort();
        handles
    }
}
