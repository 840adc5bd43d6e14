//! Confluent-compatible schema registry client over HTTP

use super::{RegisteredSchema, RegistryClient, RegistryError, RegistryResult};
use crate::config::RegistryConfig;
use crate::schema::{CompatibilityMode, ParsedSchema, SchemaType};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info};

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Serialize)]
struct SchemaRequest<'a> {
    schema: &'a str,
    #[serde(rename = "schemaType")]
    schema_type: &'static str,
}

impl<'a> From<&'a ParsedSchema> for SchemaRequest<'a> {
    fn from(schema: &'a ParsedSchema) -> Self {
        Self {
            schema: &schema.raw,
            schema_type: schema.schema_type.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    subject: String,
    version: u32,
    id: u32,
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompatibilityCheckResponse {
    is_compatible: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    #[serde(rename = "compatibilityLevel")]
    compatibility_level: String,
}

#[derive(Debug, Serialize)]
struct ConfigRequest {
    compatibility: &'static str,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error_code: Option<u32>,
    message: Option<String>,
}

/// Registry client speaking the Confluent REST API
pub struct HttpRegistryClient {
    client: Client,
    base_url: String,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            use base64::Engine;
            use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

            let credentials = format!("{}:{}", username, password);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);

            let mut headers = HeaderMap::new();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Basic {}", encoded))
                    .map_err(|e| RegistryError::Config(e.to_string()))?,
            );
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /subjects/{subject}/versions/{version}`, absent on 404
    async fn fetch_version(
        &self,
        subject: &str,
        version: &str,
    ) -> RegistryResult<Option<RegisteredSchema>> {
        let response = self
            .client
            .get(self.url(&format!("/subjects/{}/versions/{}", subject, version)))
            .header("Accept", CONTENT_TYPE)
            .send()
            .await?;

        let result: SubjectVersionResponse = match Self::success(response).await {
            Ok(response) => response.json().await?,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let schema_type = result
            .schema_type
            .as_deref()
            .unwrap_or("AVRO")
            .parse()
            .unwrap_or(SchemaType::Avro);

        Ok(Some(RegisteredSchema {
            subject: result.subject,
            version: result.version,
            id: result.id,
            schema_type,
            schema: result.schema,
        }))
    }

    /// Pass successful responses through, map the rest to typed errors
    async fn success(response: Response) -> RegistryResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(parse_error(status, &body))
    }
}

fn parse_error(status: StatusCode, body: &str) -> RegistryError {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        let msg = err.message.unwrap_or_else(|| body.to_string());
        return match err.error_code {
            Some(40401) => RegistryError::SubjectNotFound(msg),
            Some(40402) => RegistryError::VersionNotFound(msg),
            Some(40403) => RegistryError::SchemaNotFound(msg),
            Some(409) => RegistryError::Incompatible(msg),
            Some(42201) => RegistryError::InvalidSchema(msg),
            _ if status == StatusCode::NOT_FOUND => RegistryError::SubjectNotFound(msg),
            _ => RegistryError::Network(format!("{}: {}", status, msg)),
        };
    }
    if status == StatusCode::NOT_FOUND {
        return RegistryError::SubjectNotFound(body.to_string());
    }
    RegistryError::Network(format!("{}: {}", status, body))
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_latest_schema(&self, subject: &str) -> RegistryResult<Option<RegisteredSchema>> {
        self.fetch_version(subject, "latest").await
    }

    async fn get_schema(
        &self,
        subject: &str,
        version: u32,
    ) -> RegistryResult<Option<RegisteredSchema>> {
        self.fetch_version(subject, &version.to_string()).await
    }

    async fn list_subjects(&self) -> RegistryResult<BTreeSet<String>> {
        let response = self
            .client
            .get(self.url("/subjects"))
            .header("Accept", CONTENT_TYPE)
            .send()
            .await?;
        let subjects: Vec<String> = Self::success(response).await?.json().await?;
        Ok(subjects.into_iter().collect())
    }

    async fn test_compatibility(
        &self,
        subject: &str,
        schema: &ParsedSchema,
    ) -> RegistryResult<bool> {
        let response = self
            .client
            .post(self.url(&format!(
                "/compatibility/subjects/{}/versions/latest",
                subject
            )))
            .header("Content-Type", CONTENT_TYPE)
            .json(&SchemaRequest::from(schema))
            .send()
            .await?;

        match Self::success(response).await {
            Ok(response) => {
                let result: CompatibilityCheckResponse = response.json().await?;
                Ok(result.is_compatible)
            }
            // no registered version yet
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn get_all_versions(&self, subject: &str) -> RegistryResult<Vec<u32>> {
        let response = self
            .client
            .get(self.url(&format!("/subjects/{}/versions", subject)))
            .header("Accept", CONTENT_TYPE)
            .send()
            .await?;

        match Self::success(response).await {
            Ok(response) => Ok(response.json().await?),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn get_version(&self, subject: &str, schema: &ParsedSchema) -> RegistryResult<u32> {
        let response = self
            .client
            .post(self.url(&format!("/subjects/{}", subject)))
            .header("Content-Type", CONTENT_TYPE)
            .json(&SchemaRequest::from(schema))
            .send()
            .await?;

        match Self::success(response).await {
            Ok(response) => {
                let result: SubjectVersionResponse = response.json().await?;
                Ok(result.version)
            }
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn register(&self, subject: &str, schema: &ParsedSchema) -> RegistryResult<u32> {
        let response = self
            .client
            .post(self.url(&format!("/subjects/{}/versions", subject)))
            .header("Content-Type", CONTENT_TYPE)
            .json(&SchemaRequest::from(schema))
            .send()
            .await?;

        let result: RegisterResponse = Self::success(response).await?.json().await?;
        info!(subject = %subject, schema_id = result.id, "Registered schema");
        Ok(result.id)
    }

    async fn get_compatibility(&self, subject: &str) -> RegistryResult<Option<CompatibilityMode>> {
        let response = self
            .client
            .get(self.url(&format!("/config/{}", subject)))
            .header("Accept", CONTENT_TYPE)
            .send()
            .await?;

        let config: ConfigResponse = match Self::success(response).await {
            Ok(response) => response.json().await?,
            Err(e) if e.is_not_found() => {
                debug!(subject = %subject, "No subject-level compatibility configured");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        config
            .compatibility_level
            .parse()
            .map(Some)
            .map_err(RegistryError::Config)
    }

    async fn update_compatibility(
        &self,
        subject: &str,
        mode: CompatibilityMode,
    ) -> RegistryResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/config/{}", subject)))
            .header("Content-Type", CONTENT_TYPE)
            .json(&ConfigRequest {
                compatibility: mode.as_str(),
            })
            .send()
            .await?;

        Self::success(response).await?;
        info!(subject = %subject, compatibility = %mode, "Updated subject compatibility");
        Ok(())
    }

    async fn delete_subject(&self, subject: &str) -> RegistryResult<Vec<u32>> {
        let response = self
            .client
            .delete(self.url(&format!("/subjects/{}", subject)))
            .header("Accept", CONTENT_TYPE)
            .send()
            .await?;

        let versions: Vec<u32> = Self::success(response).await?.json().await?;
        info!(subject = %subject, versions = ?versions, "Deleted subject");
        Ok(versions)
    }
}
