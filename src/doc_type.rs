use crate::distribute::FieldSchema;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LinkedIn document types tracked by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    AdAccount,
    CampaignGroup,
    Campaign,
    Creative,
    CampaignGroupInsights,
    CampaignInsights,
    CreativeInsights,
    MemberCompanyInsights,
}

const INTEGER_METRICS: &[&str] = &[
    "impressions",
    "clicks",
    "totalEngagements",
    "landingPageClicks",
    "approximateUniqueImpressions",
    "shares",
    "opens",
    "oneClickLeadFormOpens",
    "oneClickLeads",
    "leadGenerationMailContactInfoShares",
    "leadGenerationMailInterestedClicks",
    "videoViews",
    "videoCompletions",
    "videoFirstQuartileCompletions",
    "videoMidpointCompletions",
    "videoThirdQuartileCompletions",
    "externalWebsiteConversions",
    "externalWebsitePostClickConversions",
    "externalWebsitePostViewConversions",
];

const CURRENCY_METRICS: &[&str] = &[
    "costInUsd",
    "costInLocalCurrency",
    "conversionValueInLocalCurrency",
];

impl DocType {
    pub const ALL: [DocType; 8] = [
        DocType::AdAccount,
        DocType::CampaignGroup,
        DocType::Campaign,
        DocType::Creative,
        DocType::CampaignGroupInsights,
        DocType::CampaignInsights,
        DocType::CreativeInsights,
        DocType::MemberCompanyInsights,
    ];

    pub fn alias(&self) -> &'static str {
        match self {
            DocType::AdAccount => "ad_account",
            DocType::CampaignGroup => "campaign_group",
            DocType::Campaign => "campaign",
            DocType::Creative => "creative",
            DocType::CampaignGroupInsights => "campaign_group_insights",
            DocType::CampaignInsights => "campaign_insights",
            DocType::CreativeInsights => "creative_insights",
            DocType::MemberCompanyInsights => "member_company_insights",
        }
    }

    /// Grouping dimension of the analytics request, for insights types.
    pub fn pivot(&self) -> Option<&'static str> {
        match self {
            DocType::CampaignGroupInsights => Some("CAMPAIGN_GROUP"),
            DocType::CampaignInsights => Some("CAMPAIGN"),
            DocType::CreativeInsights => Some("CREATIVE"),
            DocType::MemberCompanyInsights => Some("MEMBER_COMPANY"),
            _ => None,
        }
    }

    /// REST collection listing this metadata type.
    pub fn metadata_endpoint(&self) -> Option<&'static str> {
        match self {
            DocType::CampaignGroup => Some("adCampaignGroupsV2"),
            DocType::Campaign => Some("adCampaignsV2"),
            DocType::Creative => Some("adCreativesV2"),
            _ => None,
        }
    }

    pub fn is_insights(&self) -> bool {
        self.pivot().is_some()
    }

    pub fn field_schema(&self) -> FieldSchema {
        if self.is_insights() {
            FieldSchema::new()
                .with_integers(INTEGER_METRICS)
                .with_currencies(CURRENCY_METRICS)
        } else {
            FieldSchema::new()
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

impl FromStr for DocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocType::ALL
            .into_iter()
            .find(|doc_type| doc_type.alias() == s)
            .ok_or_else(|| Error::UnknownDocType(s.to_string()))
    }
}
