//! ☁️ SalesforceStore: the [`RecordStore`] that actually leaves the building.
//!
//! 🧠 Knowledge graph:
//! - auth: either a ready-made `access_token` + `instance_url`, or the OAuth password
//!   flow against `login_url` (password and security token glued together, as is
//!   tradition).
//! - query: REST `query?q=` endpoint, following `nextRecordsUrl` until the last page.
//! - insert / upsert / soft delete: sObject Collections with `allOrNone=true`, so one
//!   bad record rolls back its whole chunk. That is exactly the chunk atomicity the
//!   uploader reports on.
//! - hard delete: a Bulk API 2.0 `hardDelete` ingest job. Create, upload CSV of Ids,
//!   mark `UploadComplete`. The job finishes server-side on its own schedule.
//!
//! Collections cap out at 200 records per call, so chunk sizes above that are refused
//! before a single byte hits the wire. 🦆

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::common::Record;
use crate::error::StoreError;
use crate::store::{
    DeleteMode, Query, RecordStore, WriteKind, check_identifier, field_as_string,
};

/// 📏 sObject Collections refuse more than this many records per request.
pub const MAX_COLLECTION_RECORDS: usize = 200;

/// 🔧 How to find and authenticate against the org.
#[derive(Debug, Clone, Deserialize)]
pub struct SalesforceConfig {
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// 🏖️ log in against the sandbox login host instead of production
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub security_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn default_login_url() -> String {
    "https://login.salesforce.com".to_string()
}

const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

fn default_api_version() -> String {
    "59.0".to_string()
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            sandbox: false,
            api_version: default_api_version(),
            instance_url: None,
            access_token: None,
            username: None,
            password: None,
            security_token: None,
            client_id: None,
            client_secret: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default, rename = "nextRecordsUrl")]
    next_records_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<SaveError>,
}

#[derive(Debug, Deserialize)]
struct SaveError {
    #[serde(default, rename = "statusCode")]
    status_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    id: String,
}

/// ☁️ A live, authenticated connection to one org.
#[derive(Debug, Clone)]
pub struct SalesforceStore {
    client: reqwest::Client,
    instance_url: String,
    access_token: String,
    api_version: String,
}

/// 📮 `application/x-www-form-urlencoded`, courtesy of the URL parser's query encoder.
fn form_body(pairs: &[(&str, &str)]) -> Result<String, StoreError> {
    let mut scratch =
        Url::parse("http://form.invalid/").map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
    scratch.query_pairs_mut().extend_pairs(pairs.iter());
    Ok(scratch.query().unwrap_or_default().to_string())
}

fn strip_attributes(mut record: Record) -> Record {
    record.remove("attributes");
    record
}

/// 🧮 Count per-record failures in a Collections response.
fn tally(body: &str, total: usize) -> Result<usize, StoreError> {
    let results: Vec<SaveResult> = serde_json::from_str(body)?;
    let failed = results.iter().filter(|r| !r.success).count();
    if failed == 0 {
        return Ok(results.len());
    }
    // -- with allOrNone every sibling reports a rollback; the interesting error is the other one
    let first_error = results
        .iter()
        .flat_map(|r| r.errors.iter())
        .find(|e| e.status_code != "ALL_OR_NONE_OPERATION_ROLLED_BACK")
        .or_else(|| results.iter().flat_map(|r| r.errors.iter()).next())
        .map(|e| format!("{}: {}", e.status_code, e.message))
        .unwrap_or_else(|| "no error detail returned".to_string());
    Err(StoreError::Rejected {
        failed,
        total,
        first_error,
    })
}

fn check_collection_size(records: &[Record]) -> Result<(), StoreError> {
    if records.len() > MAX_COLLECTION_RECORDS {
        return Err(StoreError::Refused(format!(
            "{} records in one call, the collections API takes at most {MAX_COLLECTION_RECORDS}",
            records.len()
        )));
    }
    Ok(())
}

impl SalesforceConfig {
    /// 🔑 Where the OAuth token request goes. An explicit non-default `login_url` wins
    /// over the sandbox switch.
    pub fn effective_login_url(&self) -> &str {
        if self.sandbox && self.login_url == default_login_url() {
            SANDBOX_LOGIN_URL
        } else {
            self.login_url.trim_end_matches('/')
        }
    }
}

impl SalesforceStore {
    /// 🚀 Build the HTTP client and get ourselves a token.
    pub async fn connect(config: &SalesforceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 Could not build the HTTP client. The TLS stack had a bad day.")?;

        let (instance_url, access_token) = match (&config.instance_url, &config.access_token) {
            (Some(url), Some(token)) => (url.clone(), token.clone()),
            _ => {
                let token = Self::password_login(&client, config).await?;
                (token.instance_url, token.access_token)
            }
        };
        info!("☁️ Connected to Salesforce instance {instance_url}");

        Ok(Self {
            client,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version: config.api_version.clone(),
        })
    }

    async fn password_login(
        client: &reqwest::Client,
        config: &SalesforceConfig,
    ) -> anyhow::Result<TokenResponse> {
        let required = |value: &Option<String>, name: &str| {
            value.clone().with_context(|| {
                format!("💀 Salesforce login needs '{name}' (or set instance_url + access_token)")
            })
        };
        let username = required(&config.username, "username")?;
        let password = required(&config.password, "password")?;
        let client_id = required(&config.client_id, "client_id")?;
        let client_secret = required(&config.client_secret, "client_secret")?;
        let password = format!(
            "{password}{}",
            config.security_token.as_deref().unwrap_or_default()
        );

        let body = form_body(&[
            ("grant_type", "password"),
            ("client_id", &client_id),
            ("client_secret", &client_secret),
            ("username", &username),
            ("password", &password),
        ])?;
        let token_url = format!(
            "{}/services/oauth2/token",
            config.effective_login_url()
        );

        let response = client
            .post(&token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .with_context(|| format!("💀 Login request to {token_url} never came back"))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("💀 Salesforce login refused with HTTP {status}: {text}");
        }
        serde_json::from_str(&text).context("💀 Salesforce login answered, but not with a token")
    }

    fn data_url(&self, rest: &str) -> String {
        format!(
            "{}/services/data/v{}/{rest}",
            self.instance_url, self.api_version
        )
    }

    /// 📡 Attach the token, send, and insist on a 2xx.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, StoreError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.access_token))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn collection_body(object: &str, records: &[Record]) -> Result<String, StoreError> {
        let records: Vec<Value> = records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                record.insert("attributes".into(), json!({ "type": object }));
                Value::Object(record)
            })
            .collect();
        Ok(serde_json::to_string(
            &json!({ "allOrNone": true, "records": records }),
        )?)
    }

    fn ids_of(records: &[Record]) -> Result<Vec<String>, StoreError> {
        records
            .iter()
            .map(|record| {
                let id = field_as_string(record, "Id")
                    .ok_or_else(|| StoreError::Refused("delete record has no Id".into()))?;
                check_identifier(&id)?;
                Ok(id)
            })
            .collect()
    }

    async fn hard_delete(&self, object: &str, ids: &[String]) -> Result<usize, StoreError> {
        let job_body = serde_json::to_string(&json!({
            "object": object,
            "operation": "hardDelete",
            "contentType": "CSV",
            "lineEnding": "LF",
        }))?;
        let created = self
            .send(
                self.client
                    .post(self.data_url("jobs/ingest"))
                    .header("Content-Type", "application/json")
                    .body(job_body),
            )
            .await?;
        let job: JobInfo = serde_json::from_str(&created)?;
        debug!("🗑️ hardDelete job {} opened for {} ids", job.id, ids.len());

        let mut csv_body = String::from("Id\n");
        for id in ids {
            csv_body.push_str(id);
            csv_body.push('\n');
        }
        self.send(
            self.client
                .put(self.data_url(&format!("jobs/ingest/{}/batches", job.id)))
                .header("Content-Type", "text/csv")
                .body(csv_body),
        )
        .await?;

        self.send(
            self.client
                .patch(self.data_url(&format!("jobs/ingest/{}", job.id)))
                .header("Content-Type", "application/json")
                .body(r#"{"state":"UploadComplete"}"#),
        )
        .await?;
        Ok(ids.len())
    }
}

#[async_trait]
impl RecordStore for SalesforceStore {
    async fn query(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let soql = query.to_soql()?;
        let mut url =
            Url::parse(&self.data_url("query")).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("q", &soql);

        let mut records = Vec::new();
        let mut next_url = url.to_string();
        loop {
            let body = self.send(self.client.get(&next_url)).await?;
            let page: QueryPage = serde_json::from_str(&body)?;
            records.extend(page.records.into_iter().map(strip_attributes));
            match page.next_records_url {
                Some(next) => next_url = format!("{}{next}", self.instance_url),
                None => break,
            }
        }
        debug!("🔍 {} rows back for: {soql}", records.len());
        Ok(records)
    }

    async fn insert(&self, object: &str, records: &[Record]) -> Result<usize, StoreError> {
        check_identifier(object)?;
        check_collection_size(records)?;
        let body = self
            .send(
                self.client
                    .post(self.data_url("composite/sobjects"))
                    .header("Content-Type", "application/json")
                    .body(Self::collection_body(object, records)?),
            )
            .await?;
        tally(&body, records.len())
    }

    async fn upsert(
        &self,
        object: &str,
        key_field: &str,
        records: &[Record],
    ) -> Result<usize, StoreError> {
        check_identifier(object)?;
        check_identifier(key_field)?;
        check_collection_size(records)?;
        let body = self
            .send(
                self.client
                    .patch(self.data_url(&format!("composite/sobjects/{object}/{key_field}")))
                    .header("Content-Type", "application/json")
                    .body(Self::collection_body(object, records)?),
            )
            .await?;
        tally(&body, records.len())
    }

    async fn delete(
        &self,
        object: &str,
        records: &[Record],
        mode: DeleteMode,
    ) -> Result<usize, StoreError> {
        check_identifier(object)?;
        let ids = Self::ids_of(records)?;
        match mode {
            DeleteMode::Hard => self.hard_delete(object, &ids).await,
            DeleteMode::Soft => {
                check_collection_size(records)?;
                let mut url = Url::parse(&self.data_url("composite/sobjects"))
                    .map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
                url.query_pairs_mut()
                    .append_pair("ids", &ids.join(","))
                    .append_pair("allOrNone", "true");
                let body = self.send(self.client.delete(url.as_str())).await?;
                tally(&body, records.len())
            }
        }
    }

    /// Hard delete goes through a bulk job and has no per-call cap. Everything else
    /// rides the collections API.
    fn max_records_per_call(&self, kind: WriteKind) -> Option<usize> {
        match kind {
            WriteKind::Delete(DeleteMode::Hard) => None,
            WriteKind::Insert | WriteKind::Upsert | WriteKind::Delete(DeleteMode::Soft) => {
                Some(MAX_COLLECTION_RECORDS)
            }
        }
    }
}
