//! Topical tag extraction for the tag-based cascade stage.

use super::normalize::keywords;

/// Upper bound on tags returned by [`extract_tags`].
pub const MAX_TAGS: usize = 5;

const STYLE_TERMS: &[&str] = &[
    "anime", "realistic", "photorealistic", "cartoon", "painting", "watercolor", "sketch",
    "pixel", "comic", "manga", "cinematic", "fantasy", "cyberpunk", "minimalist", "illustration",
    "lineart",
];

const CONTENT_TERMS: &[&str] = &[
    "character", "portrait", "landscape", "architecture", "clothing", "background", "vehicle",
    "creature", "food", "concept", "building", "interior", "weapon", "armor", "animal",
];

const ANATOMICAL_TERMS: &[&str] = &[
    "anatomy", "hand", "hands", "face", "faces", "eye", "eyes", "body", "pose", "poses", "skin",
    "hair", "finger", "fingers", "feet",
];

const TECHNIQUE_TERMS: &[&str] = &[
    "detail", "detailed", "details", "tweaker", "lighting", "slider", "upscale", "enhance",
    "enhancer", "sharpen", "contrast", "color", "style", "inpainting", "depth", "noise",
    "offset", "refiner", "turbo", "lightning",
];

/// Fold a few plural and adjective forms onto their base term so that
/// `hands`, `detailed` and `details` produce one tag each.
fn stem(token: &str) -> &str {
    match token {
        "hands" => "hand",
        "faces" => "face",
        "eyes" => "eye",
        "poses" => "pose",
        "fingers" => "finger",
        "detailed" | "details" => "detail",
        "enhancer" => "enhance",
        "photorealistic" => "realistic",
        other => other,
    }
}

fn in_vocabulary(token: &str) -> bool {
    [STYLE_TERMS, CONTENT_TERMS, ANATOMICAL_TERMS, TECHNIQUE_TERMS]
        .iter()
        .any(|vocab| vocab.contains(&token))
}

/// Extract up to [`MAX_TAGS`] tags from a name and optional description.
///
/// Name tokens come first, then description tokens, each in their original
/// order. Duplicates (after stemming) are dropped.
pub fn extract_tags(name: &str, description: Option<&str>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    let sources = std::iter::once(name).chain(description);
    for text in sources {
        for token in ordered_tokens(text) {
            if !in_vocabulary(&token) {
                continue;
            }
            let tag = stem(&token).to_string();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
            if tags.len() == MAX_TAGS {
                return tags;
            }
        }
    }

    tags
}

/// Keyword-filtered tokens in text order.
fn ordered_tokens(text: &str) -> Vec<String> {
    let allowed = keywords(text);
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| allowed.contains(*t))
        .map(String::from)
        .collect()
}
