use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::download::LocalResource;

/// Categories produced by the NSFW model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Drawings,
    Hentai,
    Neutral,
    Porn,
    Sexy,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Drawings => "drawings",
            Category::Hentai => "hentai",
            Category::Neutral => "neutral",
            Category::Porn => "porn",
            Category::Sexy => "sexy",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("missing score for category '{0}'")]
    MissingCategory(Category),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read resource: {0}")]
    Io(#[from] std::io::Error),
}

/// Category name to score in [0, 1].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scores(BTreeMap<String, f64>);

impl Scores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: Category, score: f64) -> Self {
        self.0.insert(category.as_str().to_string(), score);
        self
    }

    pub fn get(&self, category: Category) -> Option<f64> {
        self.0.get(category.as_str()).copied()
    }

    /// Score for a category the decision policy cannot do without.
    pub fn require(&self, category: Category) -> Result<f64, ClassificationError> {
        self.get(category)
            .ok_or(ClassificationError::MissingCategory(category))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Parse a classifier response body.
    ///
    /// Accepts a flat `{"porn": 0.1, ...}` object, or an object with a single
    /// entry (keyed by file path or name) whose value is such an object.
    pub fn from_json(value: &Value) -> Result<Self, ClassificationError> {
        let object = value.as_object().ok_or_else(|| {
            ClassificationError::Malformed(format!("expected a JSON object, got {value}"))
        })?;

        if object.is_empty() {
            return Err(ClassificationError::Malformed("empty score set".to_string()));
        }

        let object = match object.values().next() {
            Some(Value::Object(inner)) if object.len() == 1 => inner,
            _ => object,
        };

        let mut scores = BTreeMap::new();
        for (category, raw) in object {
            let score = raw.as_f64().ok_or_else(|| {
                ClassificationError::Malformed(format!("score for '{category}' is not a number: {raw}"))
            })?;
            if !(0.0..=1.0).contains(&score) {
                return Err(ClassificationError::Malformed(format!(
                    "score for '{category}' out of range: {score}"
                )));
            }
            scores.insert(category.clone(), score);
        }

        Ok(Scores(scores))
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, resource: &LocalResource) -> Result<Scores, ClassificationError>;
}

/// Classifier backed by a model-serving HTTP endpoint.
///
/// The image bytes are POSTed as the request body and the model reference is
/// passed as the `model` query parameter.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, model: &str) -> Result<Self, ClassificationError> {
        let mut endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| ClassificationError::Unavailable(format!("invalid endpoint '{endpoint}': {e}")))?;
        endpoint.query_pairs_mut().append_pair("model", model);

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ClassificationError::Unavailable(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, resource: &LocalResource) -> Result<Scores, ClassificationError> {
        let body = tokio::fs::read(resource.path()).await?;

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, resource.content_type())
            .body(body)
            .send()
            .await
            .map_err(|e| ClassificationError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(256)
                .collect::<String>();
            return Err(ClassificationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ClassificationError::Malformed(e.to_string()))?;

        Scores::from_json(&value)
    }
}
