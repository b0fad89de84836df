use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Create,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CreateFunction {
    #[default]
    Free,
    Sticker,
    Text,
    Comic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EditFunction {
    #[default]
    AddRemove,
    Retouch,
    Style,
    Compose,
}

impl EditFunction {
    /// Compose merges two sources; every other edit works on a single image.
    pub fn requires_two(self) -> bool {
        matches!(self, EditFunction::Compose)
    }
}

/// The function a generation request runs under, tagged by mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveFunction {
    Create(CreateFunction),
    Edit(EditFunction),
}

impl fmt::Display for ActiveFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActiveFunction::Create(CreateFunction::Free) => "free",
            ActiveFunction::Create(CreateFunction::Sticker) => "sticker",
            ActiveFunction::Create(CreateFunction::Text) => "text",
            ActiveFunction::Create(CreateFunction::Comic) => "comic",
            ActiveFunction::Edit(EditFunction::AddRemove) => "add-remove",
            ActiveFunction::Edit(EditFunction::Retouch) => "retouch",
            ActiveFunction::Edit(EditFunction::Style) => "style",
            ActiveFunction::Edit(EditFunction::Compose) => "compose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    Tall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Standard,
        AspectRatio::Tall,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Standard => "4:3",
            AspectRatio::Tall => "3:4",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AspectRatio::ALL
            .into_iter()
            .find(|r| r.label() == s.trim())
            .ok_or_else(|| format!("unsupported aspect ratio: {s}"))
    }
}

/// An image staged for a request: base64 payload plus its declared mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    pub base64: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    First,
    Second,
}

/// A normalized service result, measured locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub image_data_url: String,
    pub width: u32,
    pub height: u32,
    pub size_kb: u64,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub image_data_url: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "size")]
    pub size_kb: u64,
    pub created_at: String,
}

impl HistoryEntry {
    pub fn from_result(id: i64, created_at: String, result: GenerationResult) -> Self {
        Self {
            id,
            image_data_url: result.image_data_url,
            width: result.width,
            height: result.height,
            size_kb: result.size_kb,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_labels_parse_back() {
        for ratio in AspectRatio::ALL {
            assert_eq!(ratio.label().parse::<AspectRatio>().unwrap(), ratio);
        }
        assert!("2:1".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn only_compose_needs_two_images() {
        assert!(EditFunction::Compose.requires_two());
        assert!(!EditFunction::AddRemove.requires_two());
        assert!(!EditFunction::Retouch.requires_two());
        assert!(!EditFunction::Style.requires_two());
    }

    #[test]
    fn history_entry_uses_stored_field_names() {
        let entry = HistoryEntry {
            id: 1700000000000,
            image_data_url: "data:image/jpeg;base64,AAAA".into(),
            width: 10,
            height: 20,
            size_kb: 3,
            created_at: "2024-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["imageDataUrl"], "data:image/jpeg;base64,AAAA");
        assert_eq!(json["size"], 3);
        assert_eq!(json["createdAt"], "2024-01-01T00:00:00Z");
    }
}
