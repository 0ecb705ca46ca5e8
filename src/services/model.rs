use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One row of model input: `(unix_timestamp, latitude, longitude)`.
///
/// Location fields may be missing after sentinel normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRow {
    pub unix_timestamp: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl FeatureRow {
    fn get(&self, feature: usize) -> Option<f64> {
        match feature {
            0 => Some(self.unix_timestamp),
            1 => self.latitude,
            2 => self.longitude,
            _ => None,
        }
    }
}

/// One row of model output, in the order the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub humidity: f64,
    pub temperature: f64,
    pub pm10: f64,
    pub pm2_5: f64,
}

impl From<[f64; 4]> for Prediction {
    fn from(v: [f64; 4]) -> Self {
        Self {
            humidity: v[0],
            temperature: v[1],
            pm10: v[2],
            pm2_5: v[3],
        }
    }
}

/// Batched regression model used to fill missing readings.
///
/// Implementations must return exactly one prediction per feature row, in order.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, features: &[FeatureRow]) -> Result<Vec<Prediction>, InferenceError>;
}

/// Number of input features every split may reference.
const FEATURE_COUNT: usize = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        /// Branch taken when the feature is missing.
        #[serde(default = "default_missing_left")]
        missing_left: bool,
    },
    Leaf {
        value: [f64; 4],
    },
}

fn default_missing_left() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn evaluate(&self, row: &FeatureRow) -> [f64; 4] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_left,
                } => {
                    let go_left = match row.get(*feature) {
                        Some(x) => x <= *threshold,
                        None => *missing_left,
                    };
                    idx = if go_left { *left } else { *right };
                }
            }
        }
    }

    /// Children must point forward so evaluation always terminates.
    fn validate(&self, tree: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Invalid(format!("tree {tree} has no nodes")));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(ModelError::Invalid(format!(
                        "tree {tree} node {i} splits on unknown feature {feature}"
                    )));
                }
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(ModelError::Invalid(format!(
                            "tree {tree} node {i} has invalid child {child}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pre-trained multi-output regression forest, exported as JSON.
///
/// Each split sends `x <= threshold` left; leaves hold the four targets. The
/// forest prediction is the mean over trees.
#[derive(Debug, Clone, Deserialize)]
pub struct ForestModel {
    trees: Vec<Tree>,
}

impl ForestModel {
    /// Load and validate the artifact at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        let model: ForestModel = serde_json::from_slice(bytes)?;
        if model.trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".to_string()));
        }
        for (i, tree) in model.trees.iter().enumerate() {
            tree.validate(i)?;
        }
        Ok(model)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn predict_row(&self, row: &FeatureRow) -> Prediction {
        let mut sum = [0.0; 4];
        for tree in &self.trees {
            let value = tree.evaluate(row);
            for (acc, v) in sum.iter_mut().zip(value) {
                *acc += v;
            }
        }
        let n = self.trees.len() as f64;
        Prediction::from(sum.map(|s| s / n))
    }
}

#[async_trait]
impl Predictor for ForestModel {
    async fn predict(&self, features: &[FeatureRow]) -> Result<Vec<Prediction>, InferenceError> {
        Ok(features.iter().map(|row| self.predict_row(row)).collect())
    }
}

/// Client for a model served over HTTP.
pub struct RemoteModel {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: &'a [FeatureRow],
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<Prediction>,
}

impl RemoteModel {
    pub fn new(endpoint: String, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint,
            api_token,
        }
    }
}

#[async_trait]
impl Predictor for RemoteModel {
    async fn predict(&self, features: &[FeatureRow]) -> Result<Vec<Prediction>, InferenceError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&PredictRequest { instances: features });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(InferenceError::Http)?
            .error_for_status()
            .map_err(InferenceError::Http)?;

        let body: PredictResponse = response.json().await.map_err(InferenceError::Http)?;
        Ok(body.predictions)
    }
}

/// Build the process-wide model handle: remote if an endpoint is configured,
/// otherwise the local artifact.
pub fn load_predictor(
    model_path: &str,
    endpoint: Option<&str>,
    api_token: Option<&str>,
) -> Result<Arc<dyn Predictor>, ModelError> {
    match endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Using remote inference endpoint");
            Ok(Arc::new(RemoteModel::new(
                endpoint.to_string(),
                api_token.map(str::to_string),
            )))
        }
        None => {
            let model = ForestModel::load(model_path)?;
            tracing::info!(path = %model_path, trees = model.tree_count(), "Loaded regression forest");
            Ok(Arc::new(model))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to read model artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid model artifact: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model returned {got} predictions for {expected} rows")]
    Shape { expected: usize, got: usize },

    #[error("Inference failed: {0}")]
    Model(String),
}
