use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::codec::{self, MeasureError};
use crate::model::{
    ActiveFunction, AspectRatio, CreateFunction, EditFunction, GenerationResult, ImageInput,
};
use crate::prompts::{compose_create_prompt, compose_edit_prompt};
use crate::utils::now_iso;

/// One image from the synthesis endpoint, still base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedImage {
    pub base64: String,
    pub mime_type: Option<String>,
}

/// A piece of a multimodal edit response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    InlineImage { data: String, mime_type: String },
    Text(String),
}

/// The hosted generation service. Implementations own transport and auth.
pub trait ImageService: Send + Sync {
    fn synthesize(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> impl Future<Output = anyhow::Result<Vec<SynthesizedImage>>> + Send;

    fn edit(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<ResponsePart>>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub function: ActiveFunction,
    pub prompt: String,
    pub image1: Option<ImageInput>,
    pub image2: Option<ImageInput>,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to generate image. No image was generated.")]
    NoImageGenerated,
    #[error("Failed to generate image. {}", describe_missing_edit(.detail))]
    NoImageReturned { detail: Option<String> },
    #[error("Failed to generate image. An image is required for editing.")]
    MissingSourceImage,
    #[error("Failed to generate image. {0}")]
    GenerationFailed(String),
    #[error("Failed to generate image. {0}")]
    Measure(#[from] MeasureError),
}

fn describe_missing_edit(detail: &Option<String>) -> String {
    match detail {
        Some(text) => format!("Image editing failed: {}", text),
        None => "No edited image was returned. This may be due to safety settings.".to_string(),
    }
}

/// Created images are always requested, and labelled, as JPEG.
pub const CREATE_MIME_TYPE: &str = "image/jpeg";

pub struct GenerationGateway<S> {
    service: Arc<S>,
}

impl<S> Clone for GenerationGateway<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<S: ImageService> GenerationGateway<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Runs one request against the service, at most once, and measures the
    /// returned image locally.
    #[instrument(skip(self, request), fields(function = %request.function, aspect = %request.aspect_ratio))]
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        let outcome = self.run(request).await;
        match &outcome {
            Ok(result) => info!(
                width = result.width,
                height = result.height,
                size_kb = result.size_kb,
                "image generated"
            ),
            Err(e) => warn!(error = %e, "generation failed"),
        }
        outcome
    }

    async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let image_data_url = match request.function {
            ActiveFunction::Create(function) => {
                self.create(&request.prompt, function, request.aspect_ratio)
                    .await?
            }
            ActiveFunction::Edit(function) => {
                let image1 = request
                    .image1
                    .as_ref()
                    .ok_or(GenerationError::MissingSourceImage)?;
                self.edit(&request.prompt, function, image1, request.image2.is_some())
                    .await?
            }
        };

        let metrics = codec::measure(&image_data_url)?;
        Ok(GenerationResult {
            image_data_url,
            width: metrics.width,
            height: metrics.height,
            size_kb: metrics.size_kb,
            generated_at: now_iso(),
        })
    }

    async fn create(
        &self,
        text: &str,
        function: CreateFunction,
        aspect_ratio: AspectRatio,
    ) -> Result<String, GenerationError> {
        let prompt = compose_create_prompt(text, function);
        let images = self
            .service
            .synthesize(&prompt, aspect_ratio)
            .await
            .map_err(service_failure)?;
        if images.len() > 1 {
            debug!(count = images.len(), "extra synthesized images ignored");
        }
        let first = images
            .into_iter()
            .find(|img| !img.base64.is_empty())
            .ok_or(GenerationError::NoImageGenerated)?;
        if let Some(label) = first.mime_type.as_deref().filter(|m| *m != CREATE_MIME_TYPE) {
            debug!(label, "synthesized image relabelled as jpeg");
        }
        Ok(format!("data:{};base64,{}", CREATE_MIME_TYPE, first.base64))
    }

    async fn edit(
        &self,
        text: &str,
        function: EditFunction,
        image1: &ImageInput,
        has_second_image: bool,
    ) -> Result<String, GenerationError> {
        let instruction = compose_edit_prompt(text, function, has_second_image);
        let parts = self
            .service
            .edit(image1, &instruction)
            .await
            .map_err(service_failure)?;

        let mut reply_text = String::new();
        for part in parts {
            match part {
                ResponsePart::InlineImage { data, mime_type } if !data.is_empty() => {
                    return Ok(format!("data:{};base64,{}", mime_type, data));
                }
                ResponsePart::Text(t) => reply_text.push_str(&t),
                ResponsePart::InlineImage { .. } => {}
            }
        }

        let detail = Some(reply_text.trim().to_string()).filter(|t| !t.is_empty());
        Err(GenerationError::NoImageReturned { detail })
    }
}

fn service_failure(e: anyhow::Error) -> GenerationError {
    GenerationError::GenerationFailed(format!("{:#}", e))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    use std::sync::Mutex;

    use crate::codec::tests::png_bytes;

    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Images(Vec<SynthesizedImage>),
        Parts(Vec<ResponsePart>),
        Fail(String),
    }

    /// Scripted service that records every call it receives.
    pub(crate) struct FakeService {
        reply: Mutex<Reply>,
        pub synth_calls: Mutex<Vec<(String, AspectRatio)>>,
        pub edit_calls: Mutex<Vec<(ImageInput, String)>>,
    }

    pub(crate) fn png_base64(width: u32, height: u32) -> String {
        B64.encode(png_bytes(width, height))
    }

    impl FakeService {
        pub(crate) fn replying(reply: Reply) -> Self {
            Self {
                reply: Mutex::new(reply),
                synth_calls: Mutex::new(Vec::new()),
                edit_calls: Mutex::new(Vec::new()),
            }
        }

        /// Answers both endpoints with a 64x32 PNG.
        pub(crate) fn working() -> Self {
            Self::replying(Reply::Images(vec![SynthesizedImage {
                base64: png_base64(64, 32),
                mime_type: Some("image/png".into()),
            }]))
        }

        pub(crate) fn set_reply(&self, reply: Reply) {
            *self.reply.lock().unwrap() = reply;
        }

        pub(crate) fn calls(&self) -> usize {
            self.synth_calls.lock().unwrap().len() + self.edit_calls.lock().unwrap().len()
        }

        fn current(&self) -> Reply {
            self.reply.lock().unwrap().clone()
        }
    }

    impl ImageService for FakeService {
        async fn synthesize(
            &self,
            prompt: &str,
            aspect_ratio: AspectRatio,
        ) -> anyhow::Result<Vec<SynthesizedImage>> {
            self.synth_calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), aspect_ratio));
            match self.current() {
                Reply::Images(images) => Ok(images),
                Reply::Parts(_) => Ok(Vec::new()),
                Reply::Fail(msg) => Err(anyhow::anyhow!(msg)),
            }
        }

        async fn edit(
            &self,
            image: &ImageInput,
            instruction: &str,
        ) -> anyhow::Result<Vec<ResponsePart>> {
            self.edit_calls
                .lock()
                .unwrap()
                .push((image.clone(), instruction.to_string()));
            match self.current() {
                Reply::Parts(parts) => Ok(parts),
                Reply::Images(images) => Ok(images
                    .into_iter()
                    .map(|img| ResponsePart::InlineImage {
                        data: img.base64,
                        mime_type: img.mime_type.unwrap_or_else(|| "image/png".into()),
                    })
                    .collect()),
                Reply::Fail(msg) => Err(anyhow::anyhow!(msg)),
            }
        }
    }
}
