use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::detect::model::DetectionModel;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::render;

/// Configuration for a remote inference service.
#[derive(Clone, Debug)]
pub struct HttpModelConfig {
    /// Endpoint accepting a JPEG body (e.g. "http://127.0.0.1:9100/infer").
    pub url: String,
    /// Ask the service to keep track ids stable across frames.
    pub persist_tracks: bool,
    /// JPEG quality of the uploaded frame.
    pub jpeg_quality: u8,
    pub timeout: Duration,
}

impl Default for HttpModelConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9100/infer".to_string(),
            persist_tracks: true,
            jpeg_quality: 90,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Detection model served over HTTP.
///
/// Each frame is POSTed as `image/jpeg`; the service answers with
/// `{"detections": [...]}` in the `Detection` JSON shape.
pub struct HttpModel {
    agent: ureq::Agent,
    endpoint: Url,
    jpeg_quality: u8,
}

impl HttpModel {
    pub fn new(config: HttpModelConfig) -> Result<Self> {
        let mut endpoint = Url::parse(&config.url).context("parse model url")?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported model scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        if config.persist_tracks {
            endpoint.query_pairs_mut().append_pair("persist", "true");
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            endpoint,
            jpeg_quality: config.jpeg_quality,
        })
    }
}

impl DetectionModel for HttpModel {
    fn name(&self) -> &'static str {
        "http"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let image = frame.to_image()?;
        let jpeg = render::encode_jpeg(&image, self.jpeg_quality)?;
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .context("post frame to inference service")?;
        let parsed: InferResponse = response
            .into_json()
            .context("decode inference response")?;
        Ok(parsed.detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        let config = HttpModelConfig {
            url: "ftp://models.local/infer".to_string(),
            ..HttpModelConfig::default()
        };
        assert!(HttpModel::new(config).is_err());
    }

    #[test]
    fn persist_flag_is_sent_as_query() {
        let model = HttpModel::new(HttpModelConfig::default()).unwrap();
        assert_eq!(model.endpoint.query(), Some("persist=true"));
    }

    #[test]
    fn parses_detection_payload() {
        let body = r#"{"detections":[{"bbox":{"cx":5.0,"cy":6.0,"w":2.0,"h":3.0},"class":"person","confidence":0.9,"keypoints":[{"x":1.0,"y":2.0,"confidence":0.5}]}]}"#;
        let parsed: InferResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.detections.len(), 1);
        assert!(parsed.detections[0].is_person());
        assert_eq!(parsed.detections[0].keypoint(0).unwrap().y, 2.0);
        assert_eq!(parsed.detections[0].track_id, None);
    }
}
