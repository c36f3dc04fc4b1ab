use crate::config::Config;
use crate::data_service::AdAccountSetting;
use crate::distribute::AggregateRecord;
use crate::doc_type::DocType;
use crate::error::Error;
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use reqwest::{header::AUTHORIZATION, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const INSIGHTS_PAGE_SIZE: usize = 10_000;
const METADATA_PAGE_SIZE: usize = 100;
const ORG_BATCH_SIZE: usize = 500;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(30);
const RESTLI_PROTOCOL_VERSION: &str = "2.0.0";

const REQUESTED_FIELDS: &str = "totalEngagements,impressions,clicks,dateRange,landingPageClicks,\
approximateUniqueImpressions,shares,costInUsd,leadGenerationMailContactInfoShares,\
leadGenerationMailInterestedClicks,oneClickLeadFormOpens,oneClickLeads,opens,videoCompletions,\
videoFirstQuartileCompletions,videoMidpointCompletions,videoThirdQuartileCompletions,videoViews,\
externalWebsiteConversions,externalWebsitePostClickConversions,externalWebsitePostViewConversions,\
costInLocalCurrency,conversionValueInLocalCurrency,pivotValue,pivotValues";

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InsightsApi: Send + Sync + 'static {
    /// Fetches every metadata element of `doc_type` for the ad account.
    async fn fetch_metadata(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
    ) -> Result<Vec<AggregateRecord>, Error>;

    /// Fetches insights of `doc_type` between `start` and `end`, both inclusive.
    /// Member company insights come back as one aggregate per company for the whole range.
    async fn fetch_insights(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AggregateRecord>, Error>;

    /// Fetches the ad account document itself.
    async fn fetch_ad_account(&self, setting: &AdAccountSetting) -> Result<AggregateRecord, Error>;

    /// Looks up organizations by id. Ids LinkedIn does not return are missing from the map.
    async fn fetch_organizations(
        &self,
        setting: &AdAccountSetting,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, Error>;
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    elements: Vec<AggregateRecord>,
}

#[derive(Deserialize)]
struct OrganizationsLookup {
    results: HashMap<String, Value>,
}

#[derive(Clone)]
pub struct LinkedinClient {
    client: Client,
    base_url: String,
    retry_delay: Duration,
}

impl LinkedinClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(LinkedinClient {
            client,
            base_url: config.linkedin_api_url.to_string(),
            retry_delay: RETRY_DELAY,
        })
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sends a GET, retrying transport errors and 5xx/429 responses.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        access_token: &str,
    ) -> Result<T, Error> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .client
                .get(url.clone())
                .header(AUTHORIZATION, format!("Bearer {access_token}"))
                .header("X-Restli-Protocol-Version", RESTLI_PROTOCOL_VERSION)
                .send()
                .await;

            let error = match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json().await?),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    let error = Error::ApiStatus {
                        status: status.as_u16(),
                        body,
                    };
                    if !is_retryable(status) {
                        return Err(error);
                    }
                    error
                }
                Err(err) => Error::ApiFailure(err),
            };

            if attempt > MAX_RETRIES {
                return Err(error);
            }
            warn!("Request to {} failed, attempt {}: {}", url.path(), attempt, error);
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn get_all_pages<F>(
        &self,
        access_token: &str,
        page_size: usize,
        build_url: F,
    ) -> Result<Vec<AggregateRecord>, Error>
    where
        F: Fn(usize) -> Result<Url, Error> + Send + Sync,
    {
        let mut elements = vec![];
        let mut start = 0;

        loop {
            let page: Page = self.get_json(build_url(start)?, access_token).await?;
            let fetched = page.elements.len();
            elements.extend(page.elements);

            if fetched < page_size {
                break;
            }
            start += page_size;
        }

        Ok(elements)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn account_urn(ad_account: &str) -> String {
    format!("urn:li:sponsoredAccount:{ad_account}")
}

fn insights_url(
    base_url: &str,
    ad_account: &str,
    doc_type: DocType,
    start: NaiveDate,
    end: NaiveDate,
    page_start: usize,
) -> Result<Url, Error> {
    let pivot = doc_type
        .pivot()
        .ok_or_else(|| Error::UnknownDocType(doc_type.alias().to_string()))?;
    let granularity = match doc_type {
        DocType::MemberCompanyInsights => "ALL",
        _ => "DAILY",
    };

    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
        .pop_if_empty()
        .extend(&["v2", "adAnalyticsV2"]);
    url.query_pairs_mut()
        .append_pair("q", "analytics")
        .append_pair("pivot", pivot)
        .append_pair("dateRange.start.day", &start.day().to_string())
        .append_pair("dateRange.start.month", &start.month().to_string())
        .append_pair("dateRange.start.year", &start.year().to_string())
        .append_pair("dateRange.end.day", &end.day().to_string())
        .append_pair("dateRange.end.month", &end.month().to_string())
        .append_pair("dateRange.end.year", &end.year().to_string())
        .append_pair("timeGranularity", granularity)
        .append_pair("fields", REQUESTED_FIELDS)
        .append_pair("accounts[0]", &account_urn(ad_account))
        .append_pair("start", &page_start.to_string())
        .append_pair("count", &INSIGHTS_PAGE_SIZE.to_string());

    Ok(url)
}

fn ad_account_url(base_url: &str, ad_account: &str) -> Result<Url, Error> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
        .pop_if_empty()
        .extend(&["v2", "adAccountsV2", ad_account]);

    Ok(url)
}

fn organizations_url(base_url: &str, ids: &[String]) -> Result<Url, Error> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
        .pop_if_empty()
        .extend(&["v2", "organizationsLookup"]);
    // Rest.li list syntax, parentheses and commas must stay unencoded
    url.set_query(Some(&format!("ids=List({})", ids.join(","))));

    Ok(url)
}

fn missing_ids(ids: &[String], found: &HashMap<String, Value>) -> Vec<String> {
    ids.iter()
        .filter(|id| !found.contains_key(*id))
        .cloned()
        .collect()
}

fn metadata_url(
    base_url: &str,
    ad_account: &str,
    doc_type: DocType,
    page_start: usize,
) -> Result<Url, Error> {
    let endpoint = doc_type
        .metadata_endpoint()
        .ok_or_else(|| Error::UnknownDocType(doc_type.alias().to_string()))?;

    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
        .pop_if_empty()
        .extend(&["v2", endpoint]);
    url.query_pairs_mut()
        .append_pair("q", "search")
        .append_pair("search.account.values[0]", &account_urn(ad_account))
        .append_pair("start", &page_start.to_string())
        .append_pair("count", &METADATA_PAGE_SIZE.to_string());

    Ok(url)
}

#[async_trait::async_trait]
impl InsightsApi for LinkedinClient {
    async fn fetch_metadata(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
    ) -> Result<Vec<AggregateRecord>, Error> {
        let elements = self
            .get_all_pages(&setting.access_token, METADATA_PAGE_SIZE, |start| {
                metadata_url(&self.base_url, &setting.ad_account, doc_type, start)
            })
            .await?;

        debug!(
            "Fetched {} {} records for project {}",
            elements.len(),
            doc_type,
            setting.project_id
        );
        Ok(elements)
    }

    async fn fetch_insights(
        &self,
        setting: &AdAccountSetting,
        doc_type: DocType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AggregateRecord>, Error> {
        let elements = self
            .get_all_pages(&setting.access_token, INSIGHTS_PAGE_SIZE, |page_start| {
                insights_url(
                    &self.base_url,
                    &setting.ad_account,
                    doc_type,
                    start,
                    end,
                    page_start,
                )
            })
            .await?;

        debug!(
            "Fetched {} {} records for project {} from {} to {}",
            elements.len(),
            doc_type,
            setting.project_id,
            start,
            end
        );
        Ok(elements)
    }

    async fn fetch_ad_account(&self, setting: &AdAccountSetting) -> Result<AggregateRecord, Error> {
        let url = ad_account_url(&self.base_url, &setting.ad_account)?;
        self.get_json(url, &setting.access_token).await
    }

    async fn fetch_organizations(
        &self,
        setting: &AdAccountSetting,
        ids: &[String],
    ) -> Result<HashMap<String, Value>, Error> {
        let unique: Vec<String> = {
            let mut seen = HashSet::new();
            ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
        };

        let mut organizations = HashMap::new();
        for batch in unique.chunks(ORG_BATCH_SIZE) {
            let url = organizations_url(&self.base_url, batch)?;
            let lookup: OrganizationsLookup = self.get_json(url, &setting.access_token).await?;
            organizations.extend(lookup.results);

            // LinkedIn sometimes answers a batch partially, ask once more for the rest
            let missing = missing_ids(batch, &organizations);
            if missing.is_empty() {
                continue;
            }
            let url = organizations_url(&self.base_url, &missing)?;
            match self
                .get_json::<OrganizationsLookup>(url, &setting.access_token)
                .await
            {
                Ok(lookup) => organizations.extend(lookup.results),
                Err(err) => warn!(
                    "Organization lookup retry failed for project {}: {}",
                    setting.project_id, err
                ),
            }
        }

        debug!(
            "Fetched {} of {} organizations for project {}",
            organizations.len(),
            unique.len(),
            setting.project_id
        );
        Ok(organizations)
    }
}
