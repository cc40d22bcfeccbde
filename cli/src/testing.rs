//! Scripted in-memory backend for orchestrator tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::StatusCode;
use tokio::sync::Notify;

use crate::api::{Backend, BackendError};
use crate::types::{ExtendBody, GenerateBody, GenerationOutput, ModelDescriptor};

#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    models: Mutex<Option<Vec<ModelDescriptor>>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_unloads: AtomicBool,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    generations: Mutex<VecDeque<Result<GenerationOutput, BackendError>>>,
    audio: Mutex<VecDeque<Result<Vec<u8>, BackendError>>>,
    uploads: Mutex<VecDeque<Result<String, BackendError>>>,
}

pub fn server_error(message: &str) -> BackendError {
    BackendError::Status { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
}

impl FakeBackend {
    pub fn with_models(ids: &[&str]) -> Arc<Self> {
        let backend = Self::default();
        backend.offer(ids);
        Arc::new(backend)
    }

    /// Changes what the registry returns from now on.
    pub fn offer(&self, ids: &[&str]) {
        let models = ids
            .iter()
            .map(|id| ModelDescriptor {
                id: id.to_string(),
                name: Some(format!("Model {id}")),
                description: None,
            })
            .collect();
        *self.models.lock().unwrap() = Some(models);
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| call.starts_with(prefix)).count()
    }

    pub fn fail_load(&self, id: &str) {
        self.failing_loads.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_unloads(&self) {
        self.failing_unloads.store(true, Ordering::SeqCst);
    }

    /// Holds calls recorded as `key` until the returned notify fires.
    pub fn gate(&self, key: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(key.to_string(), notify.clone());
        notify
    }

    pub fn push_generation(&self, result: Result<GenerationOutput, BackendError>) {
        self.generations.lock().unwrap().push_back(result);
    }

    pub fn push_audio(&self, result: Result<Vec<u8>, BackendError>) {
        self.audio.lock().unwrap().push_back(result);
    }

    pub fn push_upload(&self, result: Result<String, BackendError>) {
        self.uploads.lock().unwrap().push_back(result);
    }

    async fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call.clone());
        let gate = self.gates.lock().unwrap().get(&call).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn next_generation(&self) -> Result<GenerationOutput, BackendError> {
        self.generations.lock().unwrap().pop_front().unwrap_or_else(|| Err(server_error("unscripted")))
    }
}

impl Backend for FakeBackend {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        self.record("list".into()).await;
        self.models.lock().unwrap().clone().ok_or_else(|| server_error("registry down"))
    }

    async fn load_model(&self, id: &str) -> Result<(), BackendError> {
        self.record(format!("load:{id}")).await;
        if self.failing_loads.lock().unwrap().contains(id) {
            return Err(server_error(&format!("Failed to load {id}")));
        }
        Ok(())
    }

    async fn unload_model(&self, id: &str) -> Result<(), BackendError> {
        self.record(format!("unload:{id}")).await;
        if self.failing_unloads.load(Ordering::SeqCst) {
            return Err(server_error(&format!("Failed to unload {id}")));
        }
        Ok(())
    }

    async fn generate(&self, body: &GenerateBody) -> Result<GenerationOutput, BackendError> {
        self.record(format!("generate:{}", body.model)).await;
        self.next_generation()
    }

    async fn extend(&self, body: &ExtendBody) -> Result<GenerationOutput, BackendError> {
        self.record(format!("extend:{}", body.track_id)).await;
        self.next_generation()
    }

    async fn fetch_audio(&self, track_id: &str) -> Result<Vec<u8>, BackendError> {
        self.record(format!("audio:{track_id}")).await;
        self.audio
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("audio of {track_id}").into_bytes()))
    }

    async fn upload(&self, name: &str, _bytes: Vec<u8>) -> Result<String, BackendError> {
        self.record(format!("upload:{name}")).await;
        self.uploads.lock().unwrap().pop_front().unwrap_or_else(|| Ok(format!("id-{name}")))
    }
}
