use std::fmt;
use std::path::Path;

/// Output-encoding family of a segmentation network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// Single-channel person probability
    BodyPix,
    /// Per-class scores over the Pascal VOC labels
    DeepLab,
    /// Two-channel {background, person} logits
    GoogleMeetSegmentation,
    /// Single-channel person probability
    MLKitSelfie,
    /// Unrecognized name: the network still runs but the mask is never decoded
    Unknown,
}

/// Affine map from raw 8-bit pixel values into the network's input range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub scaling: f32,
    pub offset: f32,
}

impl Normalization {
    pub fn apply(&self, value: u8) -> f32 {
        value as f32 * self.scaling + self.offset
    }
}

/// Labels DeepLab v3 was trained on, in output channel order
pub const DEEPLAB_LABELS: [&str; 21] = [
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "dining table",
    "dog",
    "horse",
    "motorbike",
    "person",
    "potted plant",
    "sheep",
    "sofa",
    "train",
    "tv",
];

/// Channel of the "person" class in DeepLab output
pub const DEEPLAB_PERSON_CLASS: usize = label_index(&DEEPLAB_LABELS, "person");

const fn label_index(labels: &[&str], wanted: &str) -> usize {
    let mut i = 0;
    while i < labels.len() {
        if str_eq(labels[i], wanted) {
            return i;
        }
        i += 1;
    }
    panic!("label not present in table");
}

const fn str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

// First match wins.
const NAME_PATTERNS: [(&str, ModelFamily); 4] = [
    ("body-pix", ModelFamily::BodyPix),
    ("deeplab", ModelFamily::DeepLab),
    ("segm_", ModelFamily::GoogleMeetSegmentation),
    ("selfie", ModelFamily::MLKitSelfie),
];

impl ModelFamily {
    /// Infer the family from a model file name.
    ///
    /// Only the last path component is inspected. Never fails: names that
    /// match no known pattern yield [`ModelFamily::Unknown`].
    pub fn classify(model_file: impl AsRef<Path>) -> Self {
        let path = model_file.as_ref();
        let name = path
            .file_name()
            .unwrap_or(path.as_os_str())
            .to_string_lossy();

        NAME_PATTERNS
            .iter()
            .find(|(pattern, _)| name.contains(pattern))
            .map(|&(_, family)| family)
            .unwrap_or(ModelFamily::Unknown)
    }

    pub fn normalization(self) -> Normalization {
        match self {
            ModelFamily::DeepLab => Normalization {
                scaling: 1.0 / 127.5,
                offset: -1.0,
            },
            ModelFamily::BodyPix
            | ModelFamily::GoogleMeetSegmentation
            | ModelFamily::MLKitSelfie
            | ModelFamily::Unknown => Normalization {
                scaling: 1.0 / 255.0,
                offset: 0.0,
            },
        }
    }

    /// Whether the decoder knows how to read this family's output
    pub fn is_decodable(self) -> bool {
        self != ModelFamily::Unknown
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::BodyPix => "BodyPix",
            ModelFamily::DeepLab => "DeepLab",
            ModelFamily::GoogleMeetSegmentation => "Google Meet segmentation",
            ModelFamily::MLKitSelfie => "ML Kit selfie",
            ModelFamily::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
