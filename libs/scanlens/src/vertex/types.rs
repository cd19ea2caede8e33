use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_LANGUAGE: &str = "English";

const ENV_PROJECT_ID: &str = "GOOGLE_PROJECT_ID";
const ENV_LOCATION: &str = "VERTEX_LOCATION";
const ENV_MODEL: &str = "VERTEX_MODEL";
const ENV_LANGUAGE: &str = "OCR_LANGUAGE";

/// Everything needed to address one hosted model: project, region, model
/// id, and the language the OCR instruction assumes when a request does
/// not name one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexConfig {
    pub project_id: String,
    pub location: String,
    pub model: String,
    pub default_language: String,
}

impl VertexConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: DEFAULT_LOCATION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// Read the config from the environment. Only the project id is
    /// required; the rest fall back to defaults.
    pub fn from_env() -> Option<Self> {
        let project_id = match std::env::var(ENV_PROJECT_ID) {
            Ok(value) if !value.trim().is_empty() => value,
            _ => {
                log::warn!("{} is not set", ENV_PROJECT_ID);
                return None;
            }
        };

        Some(Self {
            project_id,
            location: env_or(ENV_LOCATION, DEFAULT_LOCATION),
            model: env_or(ENV_MODEL, DEFAULT_MODEL),
            default_language: env_or(ENV_LANGUAGE, DEFAULT_LANGUAGE),
        })
    }

    pub fn endpoint_url(&self) -> String {
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}:generateContent",
            location = self.location,
            project = self.project_id,
            model = self.model,
        )
    }
}

fn env_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let config = VertexConfig::new("proj-1");
        assert_eq!(
            config.endpoint_url(),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/proj-1/locations/us-central1/publishers/google/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = VertexConfig::new("p");
        assert_eq!(config.location, DEFAULT_LOCATION);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.default_language, DEFAULT_LANGUAGE);
    }
}
