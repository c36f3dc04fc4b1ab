use crate::data_service::document_id;
use crate::distribute::AggregateRecord;
use crate::doc_type::DocType;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CampaignGroupInfo {
    name: String,
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CampaignInfo {
    name: String,
    status: String,
    campaign_group_id: Option<String>,
}

const NONE_VALUE: &str = "$none";

/// Campaign hierarchy and organizations seen for one ad account, built for a single run
/// and dropped with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupTables {
    campaign_groups: HashMap<String, CampaignGroupInfo>,
    campaigns: HashMap<String, CampaignInfo>,
    creative_campaigns: HashMap<String, String>,
    organizations: HashMap<String, Value>,
}

fn string_field(record: &AggregateRecord, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn urn_field(record: &AggregateRecord, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .and_then(|urn| urn.rsplit(':').next())
        .map(str::to_string)
}

impl LookupTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the metadata elements fetched for `doc_type`.
    pub fn record_metadata(&mut self, doc_type: DocType, elements: &[AggregateRecord]) {
        for element in elements {
            let Some(id) = document_id(element) else {
                continue;
            };

            match doc_type {
                DocType::CampaignGroup => {
                    self.campaign_groups.insert(
                        id,
                        CampaignGroupInfo {
                            name: string_field(element, "name"),
                            status: string_field(element, "status"),
                        },
                    );
                }
                DocType::Campaign => {
                    self.campaigns.insert(
                        id,
                        CampaignInfo {
                            name: string_field(element, "name"),
                            status: string_field(element, "status"),
                            campaign_group_id: urn_field(element, "campaignGroup"),
                        },
                    );
                }
                DocType::Creative => {
                    if let Some(campaign_id) = urn_field(element, "campaign") {
                        self.creative_campaigns.insert(id, campaign_id);
                    }
                }
                _ => {}
            }
        }
    }

    /// Organization ids of member company records not looked up yet, in first-seen order.
    pub fn unknown_organizations(&self, records: &[AggregateRecord]) -> Vec<String> {
        let mut ids: Vec<String> = vec![];
        for id in records.iter().filter_map(document_id) {
            if !self.organizations.contains_key(&id) && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Caches the lookup result for `requested`. Ids LinkedIn did not return are cached
    /// as unknown so they are not requested again.
    pub fn record_organizations(
        &mut self,
        requested: Vec<String>,
        mut found: HashMap<String, Value>,
    ) {
        for id in requested {
            let org = found.remove(&id).unwrap_or(Value::Null);
            self.organizations.insert(id, org);
        }
        self.organizations.extend(found);
    }

    /// Adds campaign hierarchy names and ids to metadata or insight records, and
    /// organization details to member company records.
    pub fn enrich(&self, doc_type: DocType, records: &mut [AggregateRecord]) {
        for record in records.iter_mut() {
            let Some(id) = document_id(record) else {
                continue;
            };

            match doc_type {
                DocType::CampaignGroupInsights => self.add_campaign_group(record, &id),
                DocType::CampaignInsights => self.add_campaign(record, &id),
                DocType::Campaign => {
                    if let Some(group_id) = urn_field(record, "campaignGroup") {
                        self.add_campaign_group(record, &group_id);
                    }
                }
                DocType::CreativeInsights | DocType::Creative => {
                    record.insert("creative_id".to_string(), Value::from(id.clone()));
                    let campaign_id = match doc_type {
                        DocType::Creative => urn_field(record, "campaign"),
                        _ => self.creative_campaigns.get(&id).cloned(),
                    };
                    if let Some(campaign_id) = campaign_id {
                        self.add_campaign(record, &campaign_id);
                    }
                }
                DocType::MemberCompanyInsights => self.add_organization(record, &id),
                _ => {}
            }
        }
    }

    fn add_campaign_group(&self, record: &mut AggregateRecord, group_id: &str) {
        record.insert("campaign_group_id".to_string(), Value::from(group_id));
        if let Some(group) = self.campaign_groups.get(group_id) {
            record.insert(
                "campaign_group_name".to_string(),
                Value::from(group.name.as_str()),
            );
            record.insert(
                "campaign_group_status".to_string(),
                Value::from(group.status.as_str()),
            );
        }
    }

    fn add_organization(&self, record: &mut AggregateRecord, org_id: &str) {
        let org = self.organizations.get(org_id);
        let field = |path: &[&str]| -> Value {
            org.and_then(|org| path.iter().try_fold(org, |value, key| value.get(*key)))
                .cloned()
                .unwrap_or_else(|| Value::from(NONE_VALUE))
        };

        let headquarters = org
            .and_then(|org| org.get("locations"))
            .and_then(Value::as_array)
            .and_then(|locations| {
                locations.iter().find(|location| {
                    location.get("locationType").and_then(Value::as_str) == Some("HEADQUARTERS")
                })
            })
            .and_then(|location| location.pointer("/address/country"))
            .cloned()
            .unwrap_or_else(|| Value::from(NONE_VALUE));

        record.insert("vanityName".to_string(), field(&["vanityName"]));
        record.insert("localizedName".to_string(), field(&["localizedName"]));
        record.insert("localizedWebsite".to_string(), field(&["localizedWebsite"]));
        record.insert(
            "preferredCountry".to_string(),
            field(&["name", "preferredLocale", "country"]),
        );
        record.insert("companyHeadquarters".to_string(), headquarters);
    }

    fn add_campaign(&self, record: &mut AggregateRecord, campaign_id: &str) {
        record.insert("campaign_id".to_string(), Value::from(campaign_id));
        if let Some(campaign) = self.campaigns.get(campaign_id) {
            record.insert(
                "campaign_name".to_string(),
                Value::from(campaign.name.as_str()),
            );
            record.insert(
                "campaign_status".to_string(),
                Value::from(campaign.status.as_str()),
            );
            if let Some(group_id) = &campaign.campaign_group_id {
                self.add_campaign_group(record, group_id);
            }
        }
    }
}
