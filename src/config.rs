use crate::planner::JobType;
use chrono_tz::Tz;
use clap::Args as ClapArgs;

const DEFAULT_DATA_SERVICE_HOST: &str = "http://localhost:8089";
const DEFAULT_LINKEDIN_API_URL: &str = "https://api.linkedin.com";
const DEFAULT_ENV: &str = "development";
const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";
const DEFAULT_DEADLINE_SECS: u64 = 3 * 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(ClapArgs, Debug, Clone)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_DATA_SERVICE_HOST, env = "DATA_SERVICE_HOST")]
    pub(crate) data_service_host: String,

    #[arg(long, default_value = DEFAULT_LINKEDIN_API_URL, env = "LINKEDIN_API_URL")]
    pub(crate) linkedin_api_url: String,

    #[arg(long, default_value = DEFAULT_ENV, env = "SYNC_ENV")]
    pub(crate) env: String,

    #[arg(
        long,
        default_value = DEFAULT_TIMEZONE,
        env = "SYNC_TIMEZONE",
        value_parser = parse_tz,
        help = "Timezone used to compute today and yesterday"
    )]
    pub(crate) timezone: Tz,

    #[arg(
        long,
        env = "PROJECT_IDS",
        value_delimiter = ',',
        help = "Only sync these projects"
    )]
    pub(crate) project_ids: Vec<String>,

    #[arg(
        long,
        env = "BACKFILL_PROJECT_IDS",
        value_delimiter = ',',
        help = "Projects with member company backfill enabled, '*' for all"
    )]
    pub(crate) backfill_project_ids: Vec<String>,

    #[arg(
        long,
        value_enum,
        env = "JOB_TYPES",
        value_delimiter = ',',
        default_value = "daily",
        help = "Sync jobs to run"
    )]
    pub(crate) job_types: Vec<JobType>,

    #[arg(long, env = "DRY_RUN")]
    pub(crate) dry_run: bool,

    #[arg(long, env = "HEALTHCHECK_URL")]
    pub(crate) healthcheck_url: Option<String>,

    #[arg(long, default_value_t = DEFAULT_DEADLINE_SECS, env = "JOB_DEADLINE_SECS")]
    pub(crate) deadline_secs: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS,
        env = "REQUEST_TIMEOUT_SECS"
    )]
    pub(crate) request_timeout_secs: u64,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn backfill_enabled_for(&self, project_id: u64) -> bool {
        let project_id = project_id.to_string();
        self.backfill_project_ids
            .iter()
            .any(|id| id == "*" || *id == project_id)
    }

    pub fn runs(&self, job: JobType) -> bool {
        self.job_types.contains(&job)
    }
}

fn parse_tz(s: &str) -> Result<Tz, String> {
    crate::date::parse_timezone(s).map_err(|err| err.to_string())
}

#[cfg(test)]
impl Config {
    /// Daily-only config with both services at `host`.
    pub(crate) fn for_host(host: &str) -> Config {
        Config {
            data_service_host: host.to_string(),
            linkedin_api_url: host.to_string(),
            env: "test".to_string(),
            timezone: Tz::UTC,
            project_ids: vec![],
            backfill_project_ids: vec![],
            job_types: vec![JobType::Daily],
            dry_run: false,
            healthcheck_url: None,
            deadline_secs: 60,
            request_timeout_secs: 5,
        }
    }
}
