use crate::date::parse_timestamp_int;
use crate::doc_type::DocType;
use crate::error::Error;
use crate::planner::JobType;
use chrono::NaiveDate;
use log::warn;
use serde::Deserialize;
use std::collections::HashMap;

/// Row returned by the data service's last sync info endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LastSyncInfo {
    pub type_alias: String,
    /// `YYYYMMDD`, or 0 when nothing was synced yet.
    pub last_timestamp: u32,
    /// 0 for regular syncs, otherwise the [`JobType::sync_type`] of a backfill.
    #[serde(default)]
    pub sync_type: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    pub last_synced: Option<NaiveDate>,
    last_backfills: [Option<NaiveDate>; JobType::ALL.len()],
}

impl SyncState {
    pub fn last_backfill(&self, job: JobType) -> Option<NaiveDate> {
        self.last_backfills[job as usize]
    }

    fn set_last_backfill(&mut self, job: JobType, date: Option<NaiveDate>) {
        self.last_backfills[job as usize] = date;
    }
}

/// Sync state of every document type of one ad account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStates {
    by_doc_type: HashMap<DocType, SyncState>,
}

impl SyncStates {
    pub fn from_last_sync_infos(infos: &[LastSyncInfo]) -> Result<Self, Error> {
        let mut by_doc_type: HashMap<DocType, SyncState> = HashMap::new();

        for info in infos {
            let doc_type = match info.type_alias.parse::<DocType>() {
                Ok(doc_type) => doc_type,
                Err(_) => {
                    warn!("Ignoring sync info for unknown type {}", info.type_alias);
                    continue;
                }
            };

            let date = decode_last_timestamp(info.last_timestamp)?;
            let state = by_doc_type.entry(doc_type).or_default();
            match info.sync_type {
                0 => state.last_synced = date,
                sync_type => match JobType::from_sync_type(sync_type) {
                    Some(job) => state.set_last_backfill(job, date),
                    None => warn!(
                        "Ignoring {} sync info with unknown sync type {}",
                        info.type_alias, sync_type
                    ),
                },
            }
        }

        Ok(Self { by_doc_type })
    }

    pub fn get(&self, doc_type: DocType) -> SyncState {
        self.by_doc_type
            .get(&doc_type)
            .copied()
            .unwrap_or_default()
    }
}

/// 0 is the only "never happened" marker.
pub fn decode_last_timestamp(value: u32) -> Result<Option<NaiveDate>, Error> {
    match value {
        0 => Ok(None),
        value => parse_timestamp_int(value).map(Some),
    }
}
