//! Pages and the article candidates segmented out of them.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Stable ordering key carried through every stage.
///
/// `page_index` is 1-based, `segment_index` is the 0-based position of the
/// region in the segmenter's output for that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArticleKey {
    pub page_index: u32,
    pub segment_index: u32,
}

impl ArticleKey {
    pub fn new(page_index: u32, segment_index: u32) -> Self {
        Self {
            page_index,
            segment_index,
        }
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}s{}", self.page_index, self.segment_index)
    }
}

/// Classification label assigned by the segmenter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SegmentLabel {
    Article,
    Advertisement,
    Masthead,
    Photo,
    Other(String),
}

impl SegmentLabel {
    pub fn as_str(&self) -> &str {
        match self {
            SegmentLabel::Article => "article",
            SegmentLabel::Advertisement => "advertisement",
            SegmentLabel::Masthead => "masthead",
            SegmentLabel::Photo => "photo",
            SegmentLabel::Other(s) => s,
        }
    }
}

impl From<String> for SegmentLabel {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "article" => SegmentLabel::Article,
            "advertisement" | "ad" => SegmentLabel::Advertisement,
            "masthead" => SegmentLabel::Masthead,
            "photo" | "image" => SegmentLabel::Photo,
            _ => SegmentLabel::Other(s),
        }
    }
}

impl From<&str> for SegmentLabel {
    fn from(s: &str) -> Self {
        SegmentLabel::from(s.to_string())
    }
}

impl From<SegmentLabel> for String {
    fn from(label: SegmentLabel) -> Self {
        label.as_str().to_string()
    }
}

impl fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region geometry in page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A rendered page image as returned by the converter.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub bytes: Bytes,
}

impl PageImage {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

/// One region returned by the segmentation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: SegmentLabel,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Cropped region image, when the segmenter returns one
    pub crop: Option<Bytes>,
}

impl Segment {
    pub fn new(label: impl Into<SegmentLabel>, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence: 1.0,
            crop: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_crop(mut self, crop: impl Into<Bytes>) -> Self {
        self.crop = Some(crop.into());
        self
    }
}

/// A labeled region of one page: an article candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentUnit {
    pub key: ArticleKey,
    pub label: SegmentLabel,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub crop: Option<Bytes>,
}

/// One physical page of a document, owned by the job that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageUnit {
    pub index: u32,
    pub image: PageImage,
    pub segments: Vec<SegmentUnit>,
}

impl PageUnit {
    pub fn new(index: u32, image: PageImage) -> Self {
        Self {
            index,
            image,
            segments: Vec::new(),
        }
    }

    /// Attach segmenter output, assigning stable keys in output order.
    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments
            .into_iter()
            .enumerate()
            .map(|(i, s)| SegmentUnit {
                key: ArticleKey::new(self.index, i as u32),
                label: s.label,
                bbox: s.bbox,
                confidence: s.confidence,
                crop: s.crop,
            })
            .collect();
        self
    }
}
