use crate::{
    chroma::{ChromaKeySpec, Rgb},
    error::{QuadkeyError, QuadkeyResult},
    geometry::Quad,
    keyframe::{Keyframe, KeyframeTrack, QuadSource},
};

/// One preset as it appears in the configuration source. Corner fields are
/// flat `<corner>_X`/`<corner>_Y` pairs; animated presets carry a
/// `frameChanges` sequence instead.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct PresetRecord {
    pub name: String,
    #[serde(rename = "videoFile")]
    pub video_file: String,
    #[serde(rename = "chromakeyColor")]
    pub chromakey_color: String,
    #[serde(rename = "chromakeyThreshold")]
    pub chromakey_threshold: f32,
    #[serde(rename = "chromakeySmoothing")]
    pub chromakey_smoothing: f32,
    #[serde(flatten)]
    pub corners: Option<CornerFields>,
    #[serde(rename = "frameChanges", default, skip_serializing_if = "Vec::is_empty")]
    pub frame_changes: Vec<KeyframeRecord>,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct CornerFields {
    #[serde(rename = "topLeft_X")]
    pub top_left_x: f64,
    #[serde(rename = "topLeft_Y")]
    pub top_left_y: f64,
    #[serde(rename = "topRight_X")]
    pub top_right_x: f64,
    #[serde(rename = "topRight_Y")]
    pub top_right_y: f64,
    #[serde(rename = "bottomRight_X")]
    pub bottom_right_x: f64,
    #[serde(rename = "bottomRight_Y")]
    pub bottom_right_y: f64,
    #[serde(rename = "bottomLeft_X")]
    pub bottom_left_x: f64,
    #[serde(rename = "bottomLeft_Y")]
    pub bottom_left_y: f64,
}

impl CornerFields {
    pub fn to_quad(self) -> Quad {
        Quad::new(
            (self.top_left_x, self.top_left_y),
            (self.top_right_x, self.top_right_y),
            (self.bottom_right_x, self.bottom_right_y),
            (self.bottom_left_x, self.bottom_left_y),
        )
    }

    /// Corner values rounded to 2 decimal places, the precision used for
    /// copy-paste back into the configuration source.
    pub fn from_quad_rounded(quad: &Quad) -> Self {
        fn r2(v: f64) -> f64 {
            (v * 100.0).round() / 100.0
        }
        Self {
            top_left_x: r2(quad.top_left.x),
            top_left_y: r2(quad.top_left.y),
            top_right_x: r2(quad.top_right.x),
            top_right_y: r2(quad.top_right.y),
            bottom_right_x: r2(quad.bottom_right.x),
            bottom_right_y: r2(quad.bottom_right.y),
            bottom_left_x: r2(quad.bottom_left.x),
            bottom_left_y: r2(quad.bottom_left.y),
        }
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct KeyframeRecord {
    pub frame: u64,
    #[serde(flatten)]
    pub corners: CornerFields,
    #[serde(default = "default_interpolate")]
    pub interpolate: bool,
}

fn default_interpolate() -> bool {
    true
}

/// A preset resolved into the core's in-memory types.
#[derive(Clone, Debug)]
pub struct Preset {
    pub name: String,
    pub video_file: String,
    pub chroma_key: ChromaKeySpec,
    pub geometry: QuadSource,
}

impl PresetRecord {
    pub fn resolve(&self) -> QuadkeyResult<Preset> {
        let color = Rgb::from_hex(&self.chromakey_color)?;
        let chroma_key =
            ChromaKeySpec::new(color, self.chromakey_threshold, self.chromakey_smoothing)?;

        let geometry = if self.frame_changes.is_empty() {
            let corners = self.corners.ok_or_else(|| {
                QuadkeyError::config(format!(
                    "preset '{}' has neither corner fields nor frameChanges",
                    self.name
                ))
            })?;
            QuadSource::Static(corners.to_quad())
        } else {
            let keys = self
                .frame_changes
                .iter()
                .map(|kf| Keyframe {
                    frame: kf.frame,
                    quad: kf.corners.to_quad(),
                    interpolate: kf.interpolate,
                })
                .collect();
            // duplicate frame numbers reject the whole preset
            QuadSource::Animated(KeyframeTrack::new(keys).map_err(|e| {
                QuadkeyError::config(format!("preset '{}': {e}", self.name))
            })?)
        };

        Ok(Preset {
            name: self.name.clone(),
            video_file: self.video_file.clone(),
            chroma_key,
            geometry,
        })
    }
}

/// Parses a preset configuration payload leniently: a malformed record is
/// skipped with a warning, the rest still load. A payload that is not a JSON
/// array at all is a hard config error.
pub fn load_presets(json: &str) -> QuadkeyResult<Vec<Preset>> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| QuadkeyError::config(format!("preset payload is not valid JSON: {e}")))?;
    let serde_json::Value::Array(items) = value else {
        return Err(QuadkeyError::config(
            "preset payload must be a JSON array of preset records",
        ));
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let record: PresetRecord = match serde_json::from_value(item) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "skipping malformed preset record");
                continue;
            }
        };
        match record.resolve() {
            Ok(preset) => out.push(preset),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "skipping invalid preset");
            }
        }
    }
    Ok(out)
}

/// Produces the single-preset diagnostic payload for the current static
/// quad, shaped for copy-paste back into the configuration source.
pub fn preset_to_json(
    name: &str,
    video_file: &str,
    chroma_key: &ChromaKeySpec,
    quad: &Quad,
) -> QuadkeyResult<String> {
    let record = PresetRecord {
        name: name.to_string(),
        video_file: video_file.to_string(),
        chromakey_color: chroma_key.color.to_hex(),
        chromakey_threshold: chroma_key.threshold,
        chromakey_smoothing: chroma_key.smoothing,
        corners: Some(CornerFields::from_quad_rounded(quad)),
        frame_changes: Vec::new(),
    };
    serde_json::to_string_pretty(&vec![record])
        .map_err(|e| QuadkeyError::config(format!("failed to serialize preset: {e}")))
}
