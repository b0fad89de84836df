use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::codec::{decode_data_uri_bytes, MeasureError};
use crate::gateway::{GenerationError, GenerationGateway, GenerationRequest, ImageService};
use crate::history::HistoryStore;
use crate::model::{
    ActiveFunction, AspectRatio, CreateFunction, EditFunction, GenerationResult, HistoryEntry,
    ImageInput, Mode, Slot,
};
use crate::settings::Settings;
use crate::storage::KvStore;
use crate::utils::now_millis;

/// Everything the UI renders. Only [`StudioController`] mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudioState {
    pub mode: Mode,
    pub create_function: CreateFunction,
    pub edit_function: EditFunction,
    pub aspect_ratio: AspectRatio,
    pub prompt: String,
    pub image1: Option<ImageInput>,
    pub image2: Option<ImageInput>,
    /// Two source images are required (compose view).
    pub composing: bool,
    pub loading: bool,
    pub current: Option<HistoryEntry>,
    pub modal_open: bool,
    /// Last message shown to the user.
    pub notice: Option<String>,
    pub history: Vec<HistoryEntry>,
}

impl StudioState {
    pub fn active_function(&self) -> ActiveFunction {
        match self.mode {
            Mode::Create => ActiveFunction::Create(self.create_function),
            Mode::Edit => ActiveFunction::Edit(self.edit_function),
        }
    }

    fn clear_images(&mut self) {
        self.image1 = None;
        self.image2 = None;
    }
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("a prompt is required")]
    EmptyPrompt,
    #[error("a generation is already in progress")]
    AlreadyLoading,
    #[error("an image is required for editing")]
    MissingPrimaryImage,
    #[error("this function needs a second image")]
    MissingSecondImage,
    #[error("{action} is only available in {expected:?} mode")]
    WrongMode { action: &'static str, expected: Mode },
    #[error("the second image slot is only used when composing")]
    SecondSlotUnavailable,
    #[error("there is no current result")]
    NoCurrentResult,
    #[error("history entry {0} not found")]
    UnknownHistoryEntry(i64),
    #[error("clearing history was not confirmed")]
    NotConfirmed,
    #[error("generation was superseded by a newer action")]
    Superseded,
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("current result is not a valid image: {0}")]
    Measure(#[from] MeasureError),
    #[error("download failed: {0}")]
    Download(#[source] std::io::Error),
}

/// A started generation. Completing it is only honoured while its ticket is
/// still the one in flight.
#[derive(Debug)]
pub struct PendingGeneration {
    ticket: u64,
    pub request: GenerationRequest,
}

/// The request the service is currently working on. `discard` is set when the
/// user navigated away: the call still holds `loading` but its outcome is
/// dropped.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    discard: bool,
}

pub struct StudioController<S, K> {
    state: StudioState,
    gateway: GenerationGateway<S>,
    history: HistoryStore<K>,
    settings: Settings,
    next_ticket: u64,
    in_flight: Option<InFlight>,
    updates: watch::Sender<Arc<StudioState>>,
}

impl<S: ImageService, K: KvStore> StudioController<S, K> {
    pub async fn new(
        gateway: GenerationGateway<S>,
        history: HistoryStore<K>,
        settings: Settings,
    ) -> Self {
        let state = StudioState {
            history: history.load().await,
            ..StudioState::default()
        };
        let (updates, _) = watch::channel(Arc::new(state.clone()));
        Self {
            state,
            gateway,
            history,
            settings,
            next_ticket: 0,
            in_flight: None,
            updates,
        }
    }

    pub fn state(&self) -> &StudioState {
        &self.state
    }

    /// Receives an immutable snapshot after every accepted transition.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StudioState>> {
        self.updates.subscribe()
    }

    fn publish(&self) {
        self.updates.send_replace(Arc::new(self.state.clone()));
    }

    /// The running request keeps `loading` until it returns, but its result
    /// will be ignored.
    fn discard_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.discard = true;
            debug!(ticket = in_flight.ticket, "in-flight generation will be discarded");
        }
    }

    pub fn switch_mode(&mut self, mode: Mode) {
        debug!(?mode, "switch mode");
        self.discard_in_flight();
        self.state.mode = mode;
        self.state.clear_images();
        self.state.composing = false;
        self.state.current = None;
        self.publish();
    }

    pub fn switch_create_function(&mut self, function: CreateFunction) -> Result<(), StudioError> {
        if self.state.mode != Mode::Create {
            return Err(StudioError::WrongMode {
                action: "create functions",
                expected: Mode::Create,
            });
        }
        self.state.create_function = function;
        self.publish();
        Ok(())
    }

    pub fn switch_edit_function(&mut self, function: EditFunction) -> Result<(), StudioError> {
        if self.state.mode != Mode::Edit {
            return Err(StudioError::WrongMode {
                action: "edit functions",
                expected: Mode::Edit,
            });
        }
        self.state.edit_function = function;
        self.state.clear_images();
        self.state.composing = function.requires_two();
        self.publish();
        Ok(())
    }

    pub fn set_prompt(&mut self, text: impl Into<String>) {
        self.state.prompt = text.into();
        self.publish();
    }

    pub fn set_aspect_ratio(&mut self, ratio: AspectRatio) {
        self.state.aspect_ratio = ratio;
        self.publish();
    }

    pub fn set_image_slot(&mut self, slot: Slot, image: Option<ImageInput>) -> Result<(), StudioError> {
        match slot {
            Slot::First => self.state.image1 = image,
            Slot::Second if image.is_some() && !self.state.composing => {
                return Err(StudioError::SecondSlotUnavailable)
            }
            Slot::Second => self.state.image2 = image,
        }
        self.publish();
        Ok(())
    }

    /// Validates and enters the loading state. The caller runs the returned
    /// request through the gateway and hands the outcome to
    /// [`StudioController::finish_generation`].
    pub fn begin_generation(&mut self) -> Result<PendingGeneration, StudioError> {
        let state = &self.state;
        if state.loading {
            return Err(StudioError::AlreadyLoading);
        }
        if state.prompt.trim().is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        if state.mode == Mode::Edit && state.image1.is_none() {
            return Err(StudioError::MissingPrimaryImage);
        }
        if state.composing && state.image2.is_none() {
            return Err(StudioError::MissingSecondImage);
        }

        let (image1, image2) = match state.mode {
            Mode::Create => (None, None),
            Mode::Edit => (state.image1.clone(), state.image2.clone()),
        };
        let request = GenerationRequest {
            function: state.active_function(),
            prompt: state.prompt.clone(),
            image1,
            image2,
            aspect_ratio: state.aspect_ratio,
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.in_flight = Some(InFlight {
            ticket,
            discard: false,
        });
        self.state.loading = true;
        self.state.current = None;
        self.state.notice = None;
        self.publish();
        info!(ticket, function = %request.function, "generation started");
        Ok(PendingGeneration { ticket, request })
    }

    pub async fn finish_generation(
        &mut self,
        pending: PendingGeneration,
        outcome: Result<GenerationResult, GenerationError>,
    ) -> Result<HistoryEntry, StudioError> {
        let in_flight = match self.in_flight {
            Some(in_flight) if in_flight.ticket == pending.ticket => in_flight,
            _ => {
                debug!(ticket = pending.ticket, "discarding stale generation result");
                return Err(StudioError::Superseded);
            }
        };
        self.in_flight = None;
        self.state.loading = false;
        if in_flight.discard {
            debug!(ticket = pending.ticket, "discarding generation result after navigation");
            self.publish();
            return Err(StudioError::Superseded);
        }

        match outcome {
            Ok(result) => {
                let history = self.history.record(result, &self.state.history).await;
                // record always prepends the new entry
                let entry = history[0].clone();
                self.state.history = history;
                self.state.current = Some(entry.clone());
                if self.settings.compact_layout() {
                    self.state.modal_open = true;
                }
                self.publish();
                info!(ticket = pending.ticket, id = entry.id, "generation stored");
                Ok(entry)
            }
            Err(e) => {
                warn!(ticket = pending.ticket, error = %e, "generation failed");
                self.state.current = None;
                self.state.notice = Some(e.to_string());
                self.publish();
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn request_generation(&mut self) -> Result<HistoryEntry, StudioError> {
        let pending = self.begin_generation()?;
        let outcome = self.gateway.generate(&pending.request).await;
        self.finish_generation(pending, outcome).await
    }

    /// Moves the current result into the edit flow as the first source image.
    pub fn request_edit(&mut self, new_prompt: impl Into<String>) -> Result<(), StudioError> {
        let new_prompt = new_prompt.into();
        if new_prompt.trim().is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        let current = self.state.current.as_ref().ok_or(StudioError::NoCurrentResult)?;
        let staged = ImageInput::from_data_uri(&current.image_data_url)?;

        self.state.mode = Mode::Edit;
        self.state.edit_function = EditFunction::AddRemove;
        self.state.composing = false;
        self.state.prompt = new_prompt;
        self.state.image1 = Some(staged);
        self.state.image2 = None;
        self.state.current = None;
        self.state.modal_open = false;
        self.publish();
        Ok(())
    }

    pub fn select_from_history(&mut self, id: i64) -> Result<(), StudioError> {
        let entry = self
            .state
            .history
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(StudioError::UnknownHistoryEntry(id))?;

        self.discard_in_flight();
        self.state.current = Some(entry);
        self.state.mode = Mode::Edit;
        self.state.edit_function = EditFunction::AddRemove;
        self.state.prompt.clear();
        self.state.clear_images();
        self.state.composing = false;
        self.publish();
        Ok(())
    }

    pub fn start_new(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!(ticket = in_flight.ticket, "in-flight generation abandoned");
        }
        self.state.loading = false;
        self.state.mode = Mode::Create;
        self.state.create_function = CreateFunction::Free;
        self.state.prompt.clear();
        self.state.clear_images();
        self.state.current = None;
        self.state.composing = false;
        self.state.modal_open = false;
        self.publish();
    }

    /// Irreversible; `confirm` is asked first.
    pub async fn clear_history(&mut self, confirm: impl FnOnce() -> bool) -> Result<(), StudioError> {
        if !confirm() {
            return Err(StudioError::NotConfirmed);
        }
        self.history.clear().await;
        self.state.history.clear();
        self.publish();
        info!("history cleared");
        Ok(())
    }

    /// Writes the current result to `dir` as `<prefix>-<millis>.jpeg`.
    pub async fn download(&self, dir: &Path) -> Result<PathBuf, StudioError> {
        let current = self.state.current.as_ref().ok_or(StudioError::NoCurrentResult)?;
        let bytes = decode_data_uri_bytes(&current.image_data_url)?;
        let path = dir.join(format!(
            "{}-{}.jpeg",
            self.settings.download_prefix(),
            now_millis()
        ));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(StudioError::Download)?;
        info!(path = %path.display(), "result downloaded");
        Ok(path)
    }
}
