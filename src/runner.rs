use crate::config::Config;
use crate::data_service::{split_ad_accounts, AdAccountSetting, DataService, HttpDataService};
use crate::date::{add_days, format_timestamp, today_in};
use crate::distribute::{distribute_across_range, AggregateRecord};
use crate::doc_type::DocType;
use crate::error::Error;
use crate::linkedin::{InsightsApi, LinkedinClient};
use crate::lookup::LookupTables;
use crate::planner::{
    compute_backfill_chunks, compute_timestamp_range, exclude_chunks_containing,
    validate_custom_range, BackfillWindow, JobType, RangePlan, SyncStart, TimestampRange,
    MAX_LOOKBACK,
};
use crate::sync_state::{SyncState, SyncStates};
use chrono::NaiveDate;
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HIERARCHY: [(DocType, DocType); 3] = [
    (DocType::CampaignGroup, DocType::CampaignGroupInsights),
    (DocType::Campaign, DocType::CampaignInsights),
    (DocType::Creative, DocType::CreativeInsights),
];

const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Dates given on the command line, overriding the persisted sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub project_id: u64,
    pub ad_account: String,
    pub dates_synced: usize,
    pub truncated: Vec<DocType>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Failure {
    pub project_id: Option<u64>,
    pub ad_account: Option<String>,
    pub doc_type: Option<DocType>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub successes: Vec<AccountSummary>,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cancels the returned token once `deadline` has elapsed.
pub fn deadline_token(deadline: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let guard = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        guard.cancel();
    });
    token
}

/// One sync run over every configured ad account.
pub struct SyncJob<'a> {
    config: &'a Config,
    data_service: &'a dyn DataService,
    api: &'a dyn InsightsApi,
    today: NaiveDate,
    custom: CustomRange,
    cancel: CancellationToken,
}

#[derive(Default)]
struct AccountRun {
    dates_synced: usize,
    truncated: Vec<DocType>,
    failures: Vec<(DocType, Error)>,
}

impl<'a> SyncJob<'a> {
    pub fn new(
        config: &'a Config,
        data_service: &'a dyn DataService,
        api: &'a dyn InsightsApi,
        today: NaiveDate,
        custom: CustomRange,
        cancel: CancellationToken,
    ) -> Self {
        SyncJob {
            config,
            data_service,
            api,
            today,
            custom,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<RunReport, Error> {
        validate_custom_range(self.custom.start, self.custom.end, self.today)?;

        let settings = self
            .guarded(self.data_service.fetch_settings(&self.config.project_ids))
            .await?;
        let (accounts, invalid) = split_ad_accounts(settings);

        let mut report = RunReport::default();
        report
            .failures
            .extend(invalid.into_iter().map(|message| Failure {
                project_id: None,
                ad_account: None,
                doc_type: None,
                message,
            }));

        for account in &accounts {
            if let Err(err) = self.ensure_active() {
                report.failures.push(account_failure(account, None, &err));
                continue;
            }

            match self.sync_account(account).await {
                Ok(run) => {
                    for (doc_type, err) in &run.failures {
                        report
                            .failures
                            .push(account_failure(account, Some(*doc_type), err));
                    }
                    if run.failures.is_empty() {
                        report.successes.push(AccountSummary {
                            project_id: account.project_id,
                            ad_account: account.ad_account.clone(),
                            dates_synced: run.dates_synced,
                            truncated: run.truncated,
                        });
                    }
                }
                Err(err) => {
                    error!(
                        "Sync failed for project {} ad account {}: {}",
                        account.project_id, account.ad_account, err
                    );
                    report.failures.push(account_failure(account, None, &err));
                }
            }
        }

        Ok(report)
    }

    fn ensure_active(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Awaits `fut` unless the deadline passes first.
    async fn guarded<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::DeadlineExceeded),
            result = fut => result,
        }
    }

    async fn sync_account(&self, account: &AdAccountSetting) -> Result<AccountRun, Error> {
        info!(
            "Syncing project {} ad account {}",
            account.project_id, account.ad_account
        );

        let states = if self.custom.start.is_some() {
            SyncStates::default()
        } else {
            self.guarded(self.data_service.fetch_sync_states(account))
                .await?
        };

        let mut run = AccountRun::default();
        let mut lookup = LookupTables::new();

        if self.config.runs(JobType::Daily) {
            self.sync_daily(account, &states, &mut lookup, &mut run)
                .await;
        }

        if self.config.backfill_enabled_for(account.project_id) {
            let state = states.get(DocType::MemberCompanyInsights);
            for job in JobType::ALL.into_iter().filter(|job| self.config.runs(*job)) {
                if let Err(err) = self
                    .backfill_member_company(account, job, state, &mut lookup, &mut run)
                    .await
                {
                    error!(
                        "Failed {:?} backfill for project {}: {}",
                        job, account.project_id, err
                    );
                    run.failures.push((DocType::MemberCompanyInsights, err));
                }
            }
        }

        Ok(run)
    }

    async fn sync_daily(
        &self,
        account: &AdAccountSetting,
        states: &SyncStates,
        lookup: &mut LookupTables,
        run: &mut AccountRun,
    ) {
        if let Err(err) = self.sync_ad_account(account).await {
            error!(
                "Failed {} sync for project {}: {}",
                DocType::AdAccount,
                account.project_id,
                err
            );
            run.failures.push((DocType::AdAccount, err));
        }

        for (metadata_type, insights_type) in HIERARCHY {
            if let Err(err) = self
                .sync_metadata(account, states, lookup, metadata_type, run)
                .await
            {
                error!(
                    "Failed {} sync for project {}: {}",
                    metadata_type, account.project_id, err
                );
                run.failures.push((metadata_type, err));
                continue;
            }

            if let Err(err) = self
                .sync_insights(account, states, lookup, insights_type, run)
                .await
            {
                error!(
                    "Failed {} sync for project {}: {}",
                    insights_type, account.project_id, err
                );
                run.failures.push((insights_type, err));
            }
        }

        let state = states.get(DocType::MemberCompanyInsights);
        if let Err(err) = self
            .sync_member_company(account, state, lookup, run)
            .await
        {
            error!(
                "Failed {} sync for project {}: {}",
                DocType::MemberCompanyInsights,
                account.project_id,
                err
            );
            run.failures.push((DocType::MemberCompanyInsights, err));
        }
    }

    /// Stores today's ad account document, or under the custom end date when one is given.
    async fn sync_ad_account(&self, account: &AdAccountSetting) -> Result<(), Error> {
        self.ensure_active()?;

        let ad_account = self.guarded(self.api.fetch_ad_account(account)).await?;
        let date = self.custom.end.unwrap_or(self.today);
        self.guarded(self.data_service.insert_documents(
            account,
            DocType::AdAccount,
            date,
            &[ad_account],
            None,
        ))
        .await
    }

    fn plan(
        &self,
        account: &AdAccountSetting,
        doc_type: DocType,
        state: SyncState,
        run: &mut AccountRun,
    ) -> RangePlan {
        let start = match (self.custom.start, state.last_synced) {
            (Some(start), _) => SyncStart::From(start),
            (None, Some(last_synced)) => SyncStart::After(last_synced),
            (None, None) => SyncStart::From(add_days(self.today, -(MAX_LOOKBACK as i64))),
        };

        let plan = compute_timestamp_range(doc_type, start, self.custom.end, self.today);
        if let Some(truncation) = &plan.truncation {
            warn!(
                "Project {} ad account {}: {}",
                account.project_id, account.ad_account, truncation
            );
            run.truncated.push(doc_type);
        }
        if plan.range.is_empty() {
            info!(
                "Skipping {} for project {}, already synced",
                doc_type, account.project_id
            );
        }
        plan
    }

    async fn sync_metadata(
        &self,
        account: &AdAccountSetting,
        states: &SyncStates,
        lookup: &mut LookupTables,
        doc_type: DocType,
        run: &mut AccountRun,
    ) -> Result<(), Error> {
        self.ensure_active()?;

        let mut metadata = self
            .guarded(self.api.fetch_metadata(account, doc_type))
            .await?;
        lookup.record_metadata(doc_type, &metadata);
        lookup.enrich(doc_type, &mut metadata);

        info!(
            "{} {} records for project {}",
            metadata.len(),
            doc_type,
            account.project_id
        );

        // Today's metadata stands in for every date still missing.
        let plan = self.plan(account, doc_type, states.get(doc_type), run);
        for date in plan.range.iter() {
            self.ensure_active()?;
            self.guarded(
                self.data_service
                    .insert_documents(account, doc_type, *date, &metadata, None),
            )
            .await?;
            run.dates_synced += 1;
        }

        Ok(())
    }

    async fn sync_insights(
        &self,
        account: &AdAccountSetting,
        states: &SyncStates,
        lookup: &LookupTables,
        doc_type: DocType,
        run: &mut AccountRun,
    ) -> Result<(), Error> {
        let plan = self.plan(account, doc_type, states.get(doc_type), run);

        for date in plan.range.iter() {
            self.ensure_active()?;

            let mut records = self
                .guarded(self.api.fetch_insights(account, doc_type, *date, *date))
                .await?;
            lookup.enrich(doc_type, &mut records);

            self.guarded(
                self.data_service
                    .insert_documents(account, doc_type, *date, &records, None),
            )
            .await?;
            run.dates_synced += 1;
        }

        Ok(())
    }

    async fn sync_member_company(
        &self,
        account: &AdAccountSetting,
        state: SyncState,
        lookup: &mut LookupTables,
        run: &mut AccountRun,
    ) -> Result<(), Error> {
        let doc_type = DocType::MemberCompanyInsights;

        let plan = self.plan(account, doc_type, state, run);
        for date in plan.range.iter() {
            self.ensure_active()?;

            let mut records = self
                .guarded(self.api.fetch_insights(account, doc_type, *date, *date))
                .await?;
            self.add_organizations(account, lookup, &mut records)
                .await?;
            self.guarded(
                self.data_service
                    .insert_documents(account, doc_type, *date, &records, None),
            )
            .await?;
            run.dates_synced += 1;
        }

        Ok(())
    }

    fn backfill_chunks(
        &self,
        job: JobType,
        state: SyncState,
    ) -> Result<Vec<TimestampRange>, Error> {
        let custom_window = match (job, self.custom.start, self.custom.end) {
            (JobType::Weekly | JobType::WeeklyBuffered, Some(start), Some(end)) => {
                Some(BackfillWindow::explicit(start, end)?)
            }
            _ => None,
        };

        if let Some(window) = custom_window {
            return Ok(compute_backfill_chunks(None, &window));
        }

        let window = job.backfill_window(self.today);
        let chunks = compute_backfill_chunks(state.last_backfill(job), &window);
        Ok(match job.unsettled_date(self.today) {
            Some(date) => exclude_chunks_containing(chunks, date),
            None => chunks,
        })
    }

    /// Replaces each chunk's days with the chunk aggregate spread evenly across them.
    async fn backfill_member_company(
        &self,
        account: &AdAccountSetting,
        job: JobType,
        state: SyncState,
        lookup: &mut LookupTables,
        run: &mut AccountRun,
    ) -> Result<(), Error> {
        let doc_type = DocType::MemberCompanyInsights;
        let schema = doc_type.field_schema();

        for chunk in self.backfill_chunks(job, state)? {
            let (Some(start), Some(end)) = (chunk.first().copied(), chunk.last().copied())
            else {
                continue;
            };
            self.ensure_active()?;

            info!(
                "{:?} backfill of {} for project {} from {} to {}",
                job,
                doc_type,
                account.project_id,
                format_timestamp(start),
                format_timestamp(end)
            );

            let mut records = self
                .guarded(self.api.fetch_insights(account, doc_type, start, end))
                .await?;
            self.add_organizations(account, lookup, &mut records)
                .await?;
            let distributed = distribute_across_range(&records, &chunk, &schema)?;

            for (date, docs) in &distributed {
                self.guarded(self.data_service.delete_documents(account, doc_type, *date))
                    .await?;
                self.guarded(
                    self.data_service
                        .insert_documents(account, doc_type, *date, docs, Some(job)),
                )
                .await?;
                run.dates_synced += 1;
            }
        }

        Ok(())
    }

    /// Adds organization details to member company records, looking up only
    /// organizations not seen earlier in this run.
    async fn add_organizations(
        &self,
        account: &AdAccountSetting,
        lookup: &mut LookupTables,
        records: &mut [AggregateRecord],
    ) -> Result<(), Error> {
        if records.is_empty() {
            warn!(
                "No member company insights for project {} ad account {}",
                account.project_id, account.ad_account
            );
            return Ok(());
        }

        let unknown = lookup.unknown_organizations(records);
        if !unknown.is_empty() {
            let found = self
                .guarded(self.api.fetch_organizations(account, &unknown))
                .await?;
            lookup.record_organizations(unknown, found);
        }

        lookup.enrich(DocType::MemberCompanyInsights, records);
        Ok(())
    }
}

fn account_failure(account: &AdAccountSetting, doc_type: Option<DocType>, err: &Error) -> Failure {
    Failure {
        project_id: Some(account.project_id),
        ad_account: Some(account.ad_account.clone()),
        doc_type,
        message: err.to_string(),
    }
}

/// Pings the healthcheck with the run report. Only production runs report.
pub async fn notify_healthcheck(config: &Config, report: &RunReport) -> Result<(), Error> {
    let Some(url) = config.healthcheck_url.as_deref() else {
        return Ok(());
    };
    if !config.is_production() {
        info!("Skipping healthcheck ping for env {}", config.env);
        return Ok(());
    }

    let url = if report.is_success() {
        url.to_string()
    } else {
        format!("{}/fail", url.trim_end_matches('/'))
    };

    Client::new()
        .post(url)
        .timeout(HEALTHCHECK_TIMEOUT)
        .json(report)
        .send()
        .await?
        .error_for_status()?;

    Ok(())
}

pub async fn sync_linkedin_ads(config: Config, custom: CustomRange) -> Result<RunReport, Error> {
    let data_service = HttpDataService::new(&config)?;
    let api = LinkedinClient::new(&config)?;
    let today = today_in(&config.timezone);
    let cancel = deadline_token(Duration::from_secs(config.deadline_secs));

    let report = SyncJob::new(&config, &data_service, &api, today, custom, cancel)
        .run()
        .await?;

    info!(
        "LinkedIn sync finished, {} accounts synced, {} failures",
        report.successes.len(),
        report.failures.len()
    );

    if let Err(err) = notify_healthcheck(&config, &report).await {
        error!("Healthcheck ping failed: {}", err);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_service::{IntegrationSetting, MockDataService};
    use crate::date::to_timestamp_int;
    use crate::linkedin::MockInsightsApi;
    use crate::sync_state::LastSyncInfo;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Inserted = Arc<Mutex<Vec<(DocType, NaiveDate, Vec<AggregateRecord>, Option<JobType>)>>>;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> Config {
        Config::for_host("http://localhost:1")
    }

    fn backfill_config(job_types: Vec<JobType>) -> Config {
        let mut config = config();
        config.backfill_project_ids = vec!["*".to_string()];
        config.job_types = job_types;
        config
    }

    fn setting() -> IntegrationSetting {
        IntegrationSetting {
            project_id: 1,
            ad_accounts: "123".to_string(),
            access_token: "token".to_string(),
        }
    }

    fn record(value: Value) -> AggregateRecord {
        value.as_object().cloned().unwrap()
    }

    fn member_company(impressions: i64) -> AggregateRecord {
        record(json!({
            "pivotValues": ["urn:li:organization:77"],
            "impressions": impressions,
        }))
    }

    /// Sync state rows marking every document type synced until `date`.
    fn synced_until(date: NaiveDate, backfills: &[(JobType, NaiveDate)]) -> SyncStates {
        let mut rows: Vec<LastSyncInfo> = DocType::ALL
            .iter()
            .map(|doc_type| LastSyncInfo {
                type_alias: doc_type.to_string(),
                last_timestamp: to_timestamp_int(date),
                sync_type: 0,
            })
            .collect();
        rows.extend(backfills.iter().map(|(job, date)| LastSyncInfo {
            type_alias: DocType::MemberCompanyInsights.to_string(),
            last_timestamp: to_timestamp_int(*date),
            sync_type: job.sync_type(),
        }));
        SyncStates::from_last_sync_infos(&rows).unwrap()
    }

    fn data_service(states: SyncStates, inserted: &Inserted) -> MockDataService {
        let mut data_service = MockDataService::new();
        data_service
            .expect_fetch_settings()
            .returning(|_| Ok(vec![setting()]));
        data_service
            .expect_fetch_sync_states()
            .returning(move |_| Ok(states.clone()));
        let inserted = inserted.clone();
        data_service
            .expect_insert_documents()
            .returning(move |_, doc_type, date, docs, backfill| {
                inserted
                    .lock()
                    .unwrap()
                    .push((doc_type, date, docs.to_vec(), backfill));
                Ok(())
            });
        data_service
    }

    fn insights_api() -> MockInsightsApi {
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account()
            .returning(|_| Ok(record(json!({"id": 123, "name": "Account"}))));
        api.expect_fetch_metadata().returning(|_, _| Ok(vec![]));
        api.expect_fetch_insights()
            .returning(|_, doc_type, _, _| match doc_type {
                DocType::MemberCompanyInsights => Ok(vec![member_company(14)]),
                _ => Ok(vec![]),
            });
        api.expect_fetch_organizations().returning(|_, ids| {
            Ok(ids
                .iter()
                .map(|id| (id.clone(), json!({"localizedName": "Acme"})))
                .collect::<HashMap<_, _>>())
        });
        api
    }

    async fn run(
        config: &Config,
        data_service: &MockDataService,
        api: &MockInsightsApi,
        today: NaiveDate,
        custom: CustomRange,
    ) -> RunReport {
        SyncJob::new(config, data_service, api, today, custom, CancellationToken::new())
            .run()
            .await
            .unwrap()
    }

    fn inserted_of(inserted: &Inserted, doc_type: DocType) -> Vec<NaiveDate> {
        inserted
            .lock()
            .unwrap()
            .iter()
            .filter(|(inserted_type, ..)| *inserted_type == doc_type)
            .map(|(_, date, ..)| *date)
            .collect()
    }

    #[tokio::test]
    async fn test_syncs_every_doc_type_for_missing_dates() {
        let today = ymd(2023, 8, 15);
        let inserted = Inserted::default();
        let data_service = data_service(synced_until(ymd(2023, 8, 12), &[]), &inserted);
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account()
            .times(1)
            .returning(|_| Ok(record(json!({"id": 123}))));
        api.expect_fetch_metadata().times(3).returning(|_, _| Ok(vec![]));
        api.expect_fetch_insights()
            .times(8)
            .returning(|_, doc_type, _, _| match doc_type {
                DocType::MemberCompanyInsights => Ok(vec![member_company(5)]),
                _ => Ok(vec![]),
            });
        api.expect_fetch_organizations()
            .times(1)
            .returning(|_, _| Ok(HashMap::new()));

        let report = run(&config(), &data_service, &api, today, CustomRange::default()).await;

        assert!(report.is_success());
        assert_eq!(report.successes[0].dates_synced, 14);
        assert_eq!(inserted_of(&inserted, DocType::AdAccount), vec![today]);
        assert_eq!(
            inserted_of(&inserted, DocType::CreativeInsights),
            vec![ymd(2023, 8, 13), ymd(2023, 8, 14)]
        );
        let inserted = inserted.lock().unwrap();
        assert!(inserted.iter().all(|(.., backfill)| backfill.is_none()));
        let (.., docs, _) = inserted
            .iter()
            .find(|(doc_type, ..)| *doc_type == DocType::MemberCompanyInsights)
            .unwrap();
        assert_eq!(docs[0]["localizedName"], "$none");
    }

    #[tokio::test]
    async fn test_end_only_custom_range_syncs_from_state_up_to_end() {
        let today = ymd(2023, 8, 15);
        let inserted = Inserted::default();
        let data_service = data_service(synced_until(ymd(2023, 6, 20), &[]), &inserted);
        let api = insights_api();
        let custom = CustomRange {
            start: None,
            end: Some(ymd(2023, 7, 1)),
        };

        let report = run(&config(), &data_service, &api, today, custom).await;

        assert!(report.is_success());
        assert_eq!(report.successes[0].dates_synced, 77);
        assert_eq!(inserted_of(&inserted, DocType::AdAccount), vec![ymd(2023, 7, 1)]);
        let campaigns = inserted_of(&inserted, DocType::Campaign);
        assert_eq!(campaigns.len(), 11);
        assert_eq!(campaigns.first(), Some(&ymd(2023, 6, 21)));
        assert_eq!(campaigns.last(), Some(&ymd(2023, 7, 1)));
    }

    #[tokio::test]
    async fn test_custom_range_over_lookback_is_rejected() {
        let data_service = MockDataService::new();
        let api = MockInsightsApi::new();
        let custom = CustomRange {
            start: Some(ymd(2023, 6, 1)),
            end: Some(ymd(2023, 8, 1)),
        };

        let result = SyncJob::new(
            &config(),
            &data_service,
            &api,
            ymd(2023, 8, 15),
            custom,
            CancellationToken::new(),
        )
        .run()
        .await;

        assert!(matches!(
            result,
            Err(Error::CustomRangeExceedsLookback { days: 62, .. })
        ));
    }

    #[tokio::test]
    async fn test_ad_account_failure_is_isolated() {
        let today = ymd(2023, 8, 15);
        let inserted = Inserted::default();
        let data_service = data_service(synced_until(ymd(2023, 8, 13), &[]), &inserted);
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account().returning(|_| {
            Err(Error::ApiStatus {
                status: 403,
                body: "forbidden".to_string(),
            })
        });
        api.expect_fetch_metadata().returning(|_, _| Ok(vec![]));
        api.expect_fetch_insights().returning(|_, _, _, _| Ok(vec![]));

        let report = run(&config(), &data_service, &api, today, CustomRange::default()).await;

        assert!(report.successes.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].doc_type, Some(DocType::AdAccount));
        assert!(inserted_of(&inserted, DocType::AdAccount).is_empty());
        assert_eq!(inserted.lock().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_metadata_failure_skips_its_insights_only() {
        let today = ymd(2023, 8, 15);
        let inserted = Inserted::default();
        let data_service = data_service(synced_until(ymd(2023, 8, 13), &[]), &inserted);
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account()
            .returning(|_| Ok(record(json!({"id": 123}))));
        api.expect_fetch_metadata()
            .returning(|_, doc_type| match doc_type {
                DocType::Campaign => Err(Error::ApiStatus {
                    status: 500,
                    body: String::new(),
                }),
                _ => Ok(vec![]),
            });
        api.expect_fetch_insights()
            .withf(|_, doc_type, _, _| *doc_type != DocType::CampaignInsights)
            .returning(|_, _, _, _| Ok(vec![]));

        let report = run(&config(), &data_service, &api, today, CustomRange::default()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].doc_type, Some(DocType::Campaign));
        assert!(inserted_of(&inserted, DocType::CampaignInsights).is_empty());
        assert_eq!(inserted_of(&inserted, DocType::CreativeInsights), vec![ymd(2023, 8, 14)]);
    }

    #[tokio::test]
    async fn test_daily_backfill_distributes_week_chunks() {
        let today = ymd(2023, 8, 15);
        let inserted = Inserted::default();
        let states = synced_until(ymd(2023, 8, 14), &[(JobType::Daily, ymd(2023, 7, 23))]);
        let mut data_service = data_service(states, &inserted);
        data_service
            .expect_delete_documents()
            .withf(|_, doc_type, _| *doc_type == DocType::MemberCompanyInsights)
            .times(8)
            .returning(|_, _, _| Ok(()));
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account()
            .returning(|_| Ok(record(json!({"id": 123}))));
        api.expect_fetch_metadata().returning(|_, _| Ok(vec![]));
        api.expect_fetch_insights()
            .withf(|_, doc_type, start, end| {
                *doc_type == DocType::MemberCompanyInsights
                    && ((*start == ymd(2023, 7, 24) && *end == ymd(2023, 7, 30))
                        || (*start == ymd(2023, 7, 31) && *end == ymd(2023, 7, 31)))
            })
            .times(2)
            .returning(|_, _, _, _| Ok(vec![member_company(14)]));
        api.expect_fetch_organizations()
            .times(1)
            .returning(|_, _| {
                Ok(HashMap::from([(
                    "77".to_string(),
                    json!({"localizedName": "Acme", "vanityName": "acme"}),
                )]))
            });

        let config = backfill_config(vec![JobType::Daily]);
        let report = run(&config, &data_service, &api, today, CustomRange::default()).await;

        assert!(report.is_success());
        let inserted = inserted.lock().unwrap();
        let backfilled: Vec<_> = inserted
            .iter()
            .filter(|(doc_type, ..)| *doc_type == DocType::MemberCompanyInsights)
            .collect();
        assert_eq!(backfilled.len(), 8);
        for (_, date, docs, backfill) in &backfilled {
            assert_eq!(*backfill, Some(JobType::Daily));
            assert_eq!(docs[0]["localizedName"], "Acme");
            let expected = if *date == ymd(2023, 7, 31) { 14 } else { 2 };
            assert_eq!(docs[0]["impressions"], expected);
        }
    }

    #[tokio::test]
    async fn test_weekly_job_backfills_settled_weeks_only() {
        let today = ymd(2023, 8, 17);
        let inserted = Inserted::default();
        let mut data_service = data_service(synced_until(ymd(2023, 8, 16), &[]), &inserted);
        data_service
            .expect_delete_documents()
            .times(14)
            .returning(|_, _, _| Ok(()));
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account().never();
        api.expect_fetch_metadata().never();
        api.expect_fetch_insights()
            .withf(|_, doc_type, start, end| {
                *doc_type == DocType::MemberCompanyInsights
                    && ((*start == ymd(2023, 7, 31) && *end == ymd(2023, 8, 6))
                        || (*start == ymd(2023, 8, 7) && *end == ymd(2023, 8, 13)))
            })
            .times(2)
            .returning(|_, _, _, _| Ok(vec![member_company(7)]));
        api.expect_fetch_organizations()
            .times(1)
            .returning(|_, _| Ok(HashMap::new()));

        let config = backfill_config(vec![JobType::Weekly]);
        let report = run(&config, &data_service, &api, today, CustomRange::default()).await;

        assert!(report.is_success());
        assert_eq!(report.successes[0].dates_synced, 14);
        let inserted = inserted.lock().unwrap();
        assert_eq!(inserted.len(), 14);
        assert!(inserted
            .iter()
            .all(|(_, _, docs, backfill)| *backfill == Some(JobType::Weekly)
                && docs[0]["impressions"] == 1));
    }

    #[tokio::test]
    async fn test_weekly_job_leaves_unsettled_week() {
        let today = ymd(2023, 8, 14);
        let inserted = Inserted::default();
        let mut data_service = data_service(synced_until(ymd(2023, 8, 13), &[]), &inserted);
        data_service
            .expect_delete_documents()
            .times(7)
            .returning(|_, _, _| Ok(()));
        let mut api = MockInsightsApi::new();
        api.expect_fetch_insights()
            .withf(|_, _, start, end| *start == ymd(2023, 7, 31) && *end == ymd(2023, 8, 6))
            .times(1)
            .returning(|_, _, _, _| Ok(vec![member_company(7)]));
        api.expect_fetch_organizations()
            .returning(|_, _| Ok(HashMap::new()));

        let config = backfill_config(vec![JobType::Weekly]);
        let report = run(&config, &data_service, &api, today, CustomRange::default()).await;

        assert!(report.is_success());
        assert_eq!(inserted.lock().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_weekly_job_uses_custom_weeks() {
        let today = ymd(2023, 8, 14);
        let inserted = Inserted::default();
        let mut data_service = data_service(SyncStates::default(), &inserted);
        data_service
            .expect_delete_documents()
            .times(7)
            .returning(|_, _, _| Ok(()));
        let mut api = MockInsightsApi::new();
        api.expect_fetch_insights()
            .withf(|_, _, start, end| *start == ymd(2023, 7, 17) && *end == ymd(2023, 7, 23))
            .times(1)
            .returning(|_, _, _, _| Ok(vec![member_company(7)]));
        api.expect_fetch_organizations()
            .returning(|_, _| Ok(HashMap::new()));
        let custom = CustomRange {
            start: Some(ymd(2023, 7, 17)),
            end: Some(ymd(2023, 7, 23)),
        };

        let config = backfill_config(vec![JobType::WeeklyBuffered]);
        let report = run(&config, &data_service, &api, today, custom).await;

        assert!(report.is_success());
        assert_eq!(
            inserted_of(&inserted, DocType::MemberCompanyInsights).first(),
            Some(&ymd(2023, 7, 17))
        );
    }

    #[tokio::test]
    async fn test_organization_lookup_failure_fails_member_company() {
        let today = ymd(2023, 8, 15);
        let inserted = Inserted::default();
        let data_service = data_service(synced_until(ymd(2023, 8, 13), &[]), &inserted);
        let mut api = MockInsightsApi::new();
        api.expect_fetch_ad_account()
            .returning(|_| Ok(record(json!({"id": 123}))));
        api.expect_fetch_metadata().returning(|_, _| Ok(vec![]));
        api.expect_fetch_insights()
            .returning(|_, doc_type, _, _| match doc_type {
                DocType::MemberCompanyInsights => Ok(vec![member_company(1)]),
                _ => Ok(vec![]),
            });
        api.expect_fetch_organizations().returning(|_, _| {
            Err(Error::ApiStatus {
                status: 401,
                body: String::new(),
            })
        });

        let report = run(&config(), &data_service, &api, today, CustomRange::default()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].doc_type,
            Some(DocType::MemberCompanyInsights)
        );
        assert!(inserted_of(&inserted, DocType::MemberCompanyInsights).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_deadline() {
        let mut data_service = MockDataService::new();
        data_service
            .expect_fetch_settings()
            .returning(|_| Ok(vec![setting()]));
        let api = MockInsightsApi::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = config();
        let result = SyncJob::new(
            &config,
            &data_service,
            &api,
            ymd(2023, 8, 15),
            CustomRange::default(),
            cancel,
        )
        .run()
        .await;

        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_pending_request() {
        let data_service = MockDataService::new();
        let api = MockInsightsApi::new();
        let config = config();
        let cancel = deadline_token(Duration::from_millis(50));
        let job = SyncJob::new(
            &config,
            &data_service,
            &api,
            ymd(2023, 8, 15),
            CustomRange::default(),
            cancel,
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            job.guarded(std::future::pending::<Result<(), Error>>()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_healthcheck_skipped_outside_production() {
        let mut config = config();
        config.healthcheck_url = Some("http://localhost:1/ping".to_string());

        let result = notify_healthcheck(&config, &RunReport::default()).await;

        assert!(result.is_ok());
    }
}
