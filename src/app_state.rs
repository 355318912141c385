use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::Device;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{GenerateError, InitError};
use crate::llm::inference;
use crate::llm::store::{device_label, ModelLoader, ModelStore};
use crate::prompt::Prompt;

/// Process-wide flag telling whether the model store finished initializing.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    ready: AtomicBool,
}

impl ReadinessGate {
    pub fn is_open(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn open(&self) {
        self.ready.store(true, Ordering::Release);
    }

    fn close(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub device: &'static str,
    pub model_loaded: bool,
    pub tokenizer_loaded: bool,
}

/// Shared service context handed to every request handler.
pub struct AppState {
    store: ModelStore,
    gate: ReadinessGate,
    init_started: AtomicBool,
}

impl AppState {
    pub fn new(device: Device) -> Self {
        Self {
            store: ModelStore::new(device),
            gate: ReadinessGate::default(),
            init_started: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Populates the model store and opens the readiness gate.
    ///
    /// Runs at most once. On failure the gate stays closed for the rest of the
    /// process lifetime; there is no retry.
    pub fn init(&self, loader: &dyn ModelLoader) -> Result<(), InitError> {
        if self.init_started.swap(true, Ordering::AcqRel) {
            return Err(InitError::AlreadyInitialized);
        }

        info!(source = %loader.describe(), device = device_label(self.store.device()), "loading tokenizer and model");
        match self.populate(loader) {
            Ok(()) => {
                self.gate.open();
                info!("model store ready");
                Ok(())
            }
            Err(e) => {
                error!("failed to initialize model store: {e}");
                Err(e)
            }
        }
    }

    fn populate(&self, loader: &dyn ModelLoader) -> Result<(), InitError> {
        let mut loaded = loader.load_tokenizer()?;
        inference::configure_fixed_length(&mut loaded.tokenizer, &loaded.special_tokens, loaded.eos_token_id)?;
        self.store.set_tokenizer(loaded.tokenizer)?;

        let model = loader.load_model(self.store.device())?;
        self.store.set_model(model)
    }

    pub fn shutdown(&self) {
        if self.gate.is_open() {
            info!("closing readiness gate");
        }
        self.gate.close();
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.is_ready() { "healthy" } else { "initializing" },
            device: device_label(self.store.device()),
            model_loaded: self.store.model_loaded(),
            tokenizer_loaded: self.store.tokenizer_loaded(),
        }
    }

    /// Encodes the prompt to a fixed-length sequence, runs one forward pass and
    /// decodes the per-position argmax.
    ///
    /// Blocks for the whole forward pass.
    pub fn generate(&self, prompt: &Prompt) -> Result<String, GenerateError> {
        if !self.is_ready() {
            return Err(GenerateError::NotReady);
        }

        let (Some(tokenizer), Some(model)) = (self.store.tokenizer(), self.store.model()) else {
            warn!("readiness gate open but model store is not populated");
            return Err(GenerateError::NotReady);
        };

        inference::generate(prompt.as_str(), tokenizer, model, self.store.device()).map_err(|e| {
            error!("error generating code: {e}");
            GenerateError::Inference(e.to_string())
        })
    }
}
