use std::collections::BTreeMap;

use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::Result;

/// One field of a procedure result.
#[derive(Debug, Clone)]
pub enum OutputValue {
    /// Numbers, strings, flags and nested structures.
    Data(Value),
    /// A rendered visualization; encoding it for transport is left to the caller.
    Image(DynamicImage),
}

/// Procedure-specific result: named fields, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ResultMap {
    fields: BTreeMap<String, OutputValue>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `value` and stores it under `key`.
    pub fn insert_data<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.fields
            .insert(key.to_string(), OutputValue::Data(serde_json::to_value(value)?));
        Ok(())
    }

    pub fn insert_image(&mut self, key: &str, image: impl Into<DynamicImage>) {
        self.fields
            .insert(key.to_string(), OutputValue::Image(image.into()));
    }

    pub fn get(&self, key: &str) -> Option<&OutputValue> {
        self.fields.get(key)
    }

    pub fn data(&self, key: &str) -> Option<&Value> {
        match self.fields.get(key)? {
            OutputValue::Data(value) => Some(value),
            OutputValue::Image(_) => None,
        }
    }

    pub fn image(&self, key: &str) -> Option<&DynamicImage> {
        match self.fields.get(key)? {
            OutputValue::Image(image) => Some(image),
            OutputValue::Data(_) => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OutputValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Splits the map into its JSON fields and its images. `image_ref` decides what each
    /// image is replaced with in the JSON object (a file name, an encoded payload, ...).
    pub fn into_json<F>(
        self,
        mut image_ref: F,
    ) -> Result<(Map<String, Value>, Vec<(String, DynamicImage)>)>
    where
        F: FnMut(&str, &DynamicImage) -> Result<Value>,
    {
        let mut json = Map::new();
        let mut images = Vec::new();
        for (key, value) in self.fields {
            match value {
                OutputValue::Data(value) => {
                    json.insert(key, value);
                }
                OutputValue::Image(image) => {
                    json.insert(key.clone(), image_ref(&key, &image)?);
                    images.push((key, image));
                }
            }
        }
        Ok((json, images))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceMeta {
    pub inference_time_ms: f64,
    pub model_version: String,
}

/// Uniform envelope around every procedure result.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub model_id: String,
    pub output: ResultMap,
    pub meta: InferenceMeta,
}

impl InferenceResponse {
    /// JSON form of the envelope; images are replaced through `image_ref`.
    pub fn into_json<F>(self, image_ref: F) -> Result<(Value, Vec<(String, DynamicImage)>)>
    where
        F: FnMut(&str, &DynamicImage) -> Result<Value>,
    {
        let (output, images) = self.output.into_json(image_ref)?;
        let envelope = serde_json::json!({
            "model_id": self.model_id,
            "output": output,
            "meta": serde_json::to_value(&self.meta)?,
        });
        Ok((envelope, images))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_result_map_accessors() -> Result<()> {
        let mut map = ResultMap::new();
        map.insert_data("edge_ratio", &0.25)?;
        map.insert_image("preview", RgbImage::new(4, 4));

        assert_eq!(map.len(), 2);
        assert_eq!(map.data("edge_ratio"), Some(&Value::from(0.25)));
        assert!(map.data("preview").is_none());
        assert_eq!(map.image("preview").map(|i| i.width()), Some(4));
        assert!(map.image("edge_ratio").is_none());
        Ok(())
    }

    #[test]
    fn test_envelope_json_replaces_images() -> Result<()> {
        let mut output = ResultMap::new();
        output.insert_data("dominant_color", "#ff0000")?;
        output.insert_image("preview", RgbImage::new(2, 2));

        let response = InferenceResponse {
            model_id: "color-analyzer".to_string(),
            output,
            meta: InferenceMeta {
                inference_time_ms: 1.5,
                model_version: "1.0".to_string(),
            },
        };

        let (json, images) =
            response.into_json(|key, _| Ok(Value::from(format!("{key}.png"))))?;
        assert_eq!(json["model_id"], "color-analyzer");
        assert_eq!(json["output"]["preview"], "preview.png");
        assert_eq!(json["output"]["dominant_color"], "#ff0000");
        assert_eq!(json["meta"]["model_version"], "1.0");
        assert_eq!(images.len(), 1);
        Ok(())
    }
}
