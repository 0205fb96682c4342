//! Live2D model descriptor: the model info forwarded to the client and the
//! expression names the actions extractor recognizes.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Live2dModel {
    pub name: String,
    pub model_info: Value,
    pub expressions: Vec<String>,
}

impl Live2dModel {
    /// Look the model up in `model_dict.json` (an array of model entries
    /// with an `emotionMap`). Falls back to a built-in descriptor when the
    /// dict or the entry is missing, so a bare checkout still boots.
    pub fn load(name: &str, dict_path: &str) -> Self {
        match Self::try_load(name, dict_path) {
            Some(model) => model,
            None => {
                tracing::warn!(model = %name, dict = %dict_path, "model not found, using built-in default");
                Self::default_model(name)
            }
        }
    }

    fn try_load(name: &str, dict_path: &str) -> Option<Self> {
        let raw = std::fs::read_to_string(dict_path).ok()?;
        let dict: Value = serde_json::from_str(&raw).ok()?;
        let entry = dict
            .as_array()?
            .iter()
            .find(|entry| entry["name"].as_str() == Some(name))?
            .clone();

        let expressions = entry["emotionMap"]
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();

        Some(Self {
            name: name.to_string(),
            model_info: entry,
            expressions,
        })
    }

    fn default_model(name: &str) -> Self {
        let expressions = vec![
            "neutral".to_string(),
            "joy".to_string(),
            "anger".to_string(),
            "sadness".to_string(),
            "surprise".to_string(),
        ];
        let emotion_map: serde_json::Map<String, Value> = expressions
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), Value::from(idx as i64)))
            .collect();

        Self {
            name: name.to_string(),
            model_info: serde_json::json!({
                "name": name,
                "url": format!("/live2d-models/{name}/{name}.model3.json"),
                "kScale": 0.5,
                "emotionMap": emotion_map,
            }),
            expressions,
        }
    }
}
