use serde::{Deserialize, Serialize};

/// Cloudinary resource class an asset is uploaded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Raw,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Raw => "raw",
        }
    }
}

const FONT_SUFFIXES: &[&str] = &[".woff2", ".woff", ".ttf", ".otf"];

/// Classify a URL by its suffix. The test runs on the full lowercased
/// string, so a trailing query defeats the match and the asset falls back
/// to `image`. svg/png/jpg/webp/gif all upload as images anyway.
pub fn infer_resource_type(url: &str) -> ResourceType {
    let lowered = url.to_lowercase();
    if lowered.ends_with(".mp4") {
        return ResourceType::Video;
    }
    if FONT_SUFFIXES.iter().any(|suffix| lowered.ends_with(suffix)) {
        return ResourceType::Raw;
    }
    ResourceType::Image
}

/// One row of the asset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub source_url: String,
    pub public_id: String,
    pub resource_type: ResourceType,
}

const DELIVERY_TRANSFORM: &str = "f_auto,q_auto";

/// Synthesize the CDN delivery URL for a migrated asset. Video and image
/// variants carry the fixed transform segment; raw assets carry none.
pub fn delivery_url(
    delivery_host: &str,
    cloud_name: &str,
    public_id: &str,
    resource_type: ResourceType,
) -> String {
    match resource_type {
        ResourceType::Raw => {
            format!("https://{delivery_host}/{cloud_name}/raw/upload/{public_id}")
        }
        ResourceType::Video => {
            format!("https://{delivery_host}/{cloud_name}/video/upload/{DELIVERY_TRANSFORM}/{public_id}")
        }
        ResourceType::Image => {
            format!("https://{delivery_host}/{cloud_name}/image/upload/{DELIVERY_TRANSFORM}/{public_id}")
        }
    }
}
