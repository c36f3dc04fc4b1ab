use crate::config::Config;
use crate::date::to_timestamp_int;
use crate::distribute::AggregateRecord;
use crate::doc_type::DocType;
use crate::error::Error;
use crate::planner::JobType;
use crate::sync_state::{LastSyncInfo, SyncStates};
use chrono::NaiveDate;
use log::{info, warn};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const INSERT_BATCH_SIZE: usize = 1000;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DataService: Send + Sync + 'static {
    /// Fetches LinkedIn integration settings, restricted to `project_ids` when non empty.
    async fn fetch_settings(&self, project_ids: &[String])
        -> Result<Vec<IntegrationSetting>, Error>;

    /// Fetches the last sync and backfill dates of every document type of an ad account.
    async fn fetch_sync_states(&self, setting: &AdAccountSetting) -> Result<SyncStates, Error>;

    /// Inserts the documents of one date.
    /// # Arguments
    /// * `setting` - The ad account the documents belong to.
    /// * `doc_type` - The document type.
    /// * `date` - The date the documents are stored under.
    /// * `docs` - The documents. An empty slice stores a placeholder so the date counts as synced.
    /// * `backfill` - The backfill job replacing previously synced data, `None` for regular syncs.
    async fn insert_documents(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
        date: NaiveDate,
        docs: &[AggregateRecord],
        backfill: Option<JobType>,
    ) -> Result<(), Error>;

    /// Deletes every document of `doc_type` stored under `date`.
    async fn delete_documents(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
        date: NaiveDate,
    ) -> Result<(), Error>;
}

/// Integration settings row. `ad_accounts` may hold several comma separated accounts.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IntegrationSetting {
    pub project_id: u64,
    #[serde(rename = "int_linkedin_ad_account")]
    pub ad_accounts: String,
    #[serde(rename = "int_linkedin_access_token")]
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdAccountSetting {
    pub project_id: u64,
    pub ad_account: String,
    pub access_token: String,
}

/// Splits settings into one entry per ad account. Rows without a usable account are
/// returned as failure messages.
pub fn split_ad_accounts(
    settings: Vec<IntegrationSetting>,
) -> (Vec<AdAccountSetting>, Vec<String>) {
    let mut accounts = vec![];
    let mut failures = vec![];

    for setting in settings {
        let ids: Vec<&str> = setting
            .ad_accounts
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect();

        if ids.is_empty() {
            failures.push(format!(
                "Project {} has no LinkedIn ad account",
                setting.project_id
            ));
            continue;
        }

        accounts.extend(ids.into_iter().map(|id| AdAccountSetting {
            project_id: setting.project_id,
            ad_account: id.to_string(),
            access_token: setting.access_token.clone(),
        }));
    }

    (accounts, failures)
}

#[derive(Serialize)]
struct DocumentPayload<'a> {
    project_id: u64,
    customer_ad_account_id: &'a str,
    type_alias: &'static str,
    id: String,
    value: &'a AggregateRecord,
    timestamp: u32,
    sync_status: u8,
}

/// Identifier a document is stored under: its `id`, or the id at the end of its pivot URN.
pub fn document_id(doc: &AggregateRecord) -> Option<String> {
    match doc.get("id") {
        Some(Value::String(id)) => return Some(id.clone()),
        Some(Value::Number(id)) => return Some(id.to_string()),
        _ => {}
    }

    let urn = doc.get("pivotValue").and_then(Value::as_str).or_else(|| {
        doc.get("pivotValues")
            .and_then(Value::as_array)
            .and_then(|values| values.first())
            .and_then(Value::as_str)
    })?;

    urn.rsplit(':').next().map(str::to_string)
}

fn placeholder_document(date: NaiveDate) -> AggregateRecord {
    let timestamp = to_timestamp_int(date);
    let value = json!({
        "id": format!("empty-{timestamp}"),
        "campaign_group_id": format!("empty-cg-{timestamp}"),
        "campaign_id": format!("empty-c-{timestamp}"),
        "creative_id": format!("empty-cr-{timestamp}"),
    });
    value.as_object().cloned().unwrap_or_default()
}

#[derive(Clone)]
pub struct HttpDataService {
    client: Client,
    host: String,
    dry_run: bool,
}

impl HttpDataService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(HttpDataService {
            client,
            host: config.data_service_host.trim_end_matches('/').to_string(),
            dry_run: config.dry_run,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/data_service/linkedin{}", self.host, path)
    }

    async fn last_sync_infos(
        &self,
        path: &str,
        setting: &AdAccountSetting,
    ) -> Result<Vec<LastSyncInfo>, Error> {
        let resp = self
            .client
            .get(self.url(path))
            .json(&json!({
                "project_id": setting.project_id,
                "customer_ad_account_id": setting.ad_account,
            }))
            .send()
            .await?;

        Ok(check_status(resp).await?.json().await?)
    }
}

async fn check_status(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() || status == StatusCode::CONFLICT {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(Error::ApiStatus {
        status: status.as_u16(),
        body,
    })
}

#[async_trait::async_trait]
impl DataService for HttpDataService {
    async fn fetch_settings(
        &self,
        project_ids: &[String],
    ) -> Result<Vec<IntegrationSetting>, Error> {
        let request = if project_ids.is_empty() {
            self.client.get(self.url("/project/settings"))
        } else {
            self.client
                .get(self.url("/project/settings/projects"))
                .json(&json!({ "project_ids": project_ids }))
        };

        let resp = check_status(request.send().await?).await?;
        let settings: Vec<IntegrationSetting> = resp.json().await?;

        if settings.is_empty() {
            return Err(Error::NoData {
                message: "No LinkedIn integration settings found".to_string(),
            });
        }

        Ok(settings)
    }

    async fn fetch_sync_states(&self, setting: &AdAccountSetting) -> Result<SyncStates, Error> {
        let mut infos = self
            .last_sync_infos("/documents/ads/last_sync_info/V1", setting)
            .await?;
        infos.extend(
            self.last_sync_infos("/documents/company/last_sync_info/V1", setting)
                .await?,
        );

        SyncStates::from_last_sync_infos(&infos)
    }

    async fn insert_documents(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
        date: NaiveDate,
        docs: &[AggregateRecord],
        backfill: Option<JobType>,
    ) -> Result<(), Error> {
        let placeholder;
        let docs = if docs.is_empty() {
            placeholder = [placeholder_document(date)];
            &placeholder[..]
        } else {
            docs
        };

        if self.dry_run {
            info!(
                "Dry run, skipping insert of {} {} documents for project {} on {}",
                docs.len(),
                doc_type,
                setting.project_id,
                date
            );
            return Ok(());
        }

        let timestamp = to_timestamp_int(date);
        let sync_status = backfill.map_or(0, |job| job.sync_type());
        for batch in docs.chunks(INSERT_BATCH_SIZE) {
            let payloads: Vec<DocumentPayload> = batch
                .iter()
                .map(|doc| DocumentPayload {
                    project_id: setting.project_id,
                    customer_ad_account_id: &setting.ad_account,
                    type_alias: doc_type.alias(),
                    id: document_id(doc).unwrap_or_else(|| format!("{doc_type}-{timestamp}")),
                    value: doc,
                    timestamp,
                    sync_status,
                })
                .collect();

            let resp = self
                .client
                .post(self.url("/documents/add_multiple"))
                .json(&payloads)
                .send()
                .await?;
            check_status(resp).await?;
        }

        Ok(())
    }

    async fn delete_documents(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
        date: NaiveDate,
    ) -> Result<(), Error> {
        if self.dry_run {
            warn!(
                "Dry run, skipping delete of {} documents for project {} on {}",
                doc_type, setting.project_id, date
            );
            return Ok(());
        }

        let resp = self
            .client
            .delete(self.url("/documents"))
            .json(&json!({
                "project_id": setting.project_id,
                "customer_ad_account_id": setting.ad_account,
                "type_alias": doc_type.alias(),
                "timestamp": to_timestamp_int(date),
            }))
            .send()
            .await?;
        check_status(resp).await?;

        Ok(())
    }
}
