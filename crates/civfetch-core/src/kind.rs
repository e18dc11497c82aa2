//! Expected model kinds supplied by the workflow extractor.
//!
//! A kind only chooses where a file lands. It never reaches the registry
//! and never contributes to scoring.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Checkpoint,
    Lora,
    LoCon,
    Embedding,
    Vae,
    Controlnet,
    Upscaler,
    TextEncoder,
    Hypernetwork,
    Other,
}

impl ModelKind {
    /// Parse a loose hint string (`"adapter"`, `"LORA"`, `"clip"`...).
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "checkpoint" | "checkpoints" | "ckpt" | "unet" | "diffusion_model" => {
                ModelKind::Checkpoint
            }
            "lora" | "loras" | "adapter" => ModelKind::Lora,
            "locon" | "lycoris" => ModelKind::LoCon,
            "embedding" | "embeddings" | "textual_inversion" | "textualinversion" => {
                ModelKind::Embedding
            }
            "vae" => ModelKind::Vae,
            "controlnet" | "control_net" => ModelKind::Controlnet,
            "upscaler" | "upscale_model" | "upscale_models" => ModelKind::Upscaler,
            "encoder" | "text_encoder" | "text_encoders" | "clip" => ModelKind::TextEncoder,
            "hypernetwork" | "hypernetworks" => ModelKind::Hypernetwork,
            _ => ModelKind::Other,
        }
    }

    /// ComfyUI `models/` subdirectory for this kind.
    pub fn subdirectory(&self) -> &'static str {
        match self {
            ModelKind::Checkpoint => "checkpoints",
            ModelKind::Lora | ModelKind::LoCon => "loras",
            ModelKind::Embedding => "embeddings",
            ModelKind::Vae => "vae",
            ModelKind::Controlnet => "controlnet",
            ModelKind::Upscaler => "upscale_models",
            ModelKind::TextEncoder => "text_encoders",
            ModelKind::Hypernetwork => "hypernetworks",
            ModelKind::Other => "other",
        }
    }

    /// Destination directory for this kind under a models root.
    pub fn destination_dir(&self, models_root: &Path) -> PathBuf {
        models_root.join(self.subdirectory())
    }
}
