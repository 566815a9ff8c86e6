//! Search filters and their mapping into the scraping-payload vocabulary.

use serde::{Deserialize, Serialize};

/// Target job board.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    #[default]
    Linkedin,
    Indeed,
    Generic,
}

impl Portal {
    pub fn as_str(self) -> &'static str {
        match self {
            Portal::Linkedin => "linkedin",
            Portal::Indeed => "indeed",
            Portal::Generic => "generic",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperienceLevel {
    Internship,
    Entry,
    Associate,
    MidSenior,
    Director,
    Executive,
}

impl ExperienceLevel {
    pub fn payload_value(self) -> &'static str {
        match self {
            ExperienceLevel::Internship => "internship",
            ExperienceLevel::Entry => "entry_level",
            ExperienceLevel::Associate => "associate",
            ExperienceLevel::MidSenior => "mid_senior",
            ExperienceLevel::Director => "director",
            ExperienceLevel::Executive => "executive",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
}

impl JobType {
    pub fn payload_value(self) -> &'static str {
        match self {
            JobType::FullTime => "full_time",
            JobType::PartTime => "part_time",
            JobType::Contract => "contract",
            JobType::Temporary => "temporary",
            JobType::Internship => "internship",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkMode {
    OnSite,
    Remote,
    Hybrid,
}

impl WorkMode {
    pub fn payload_value(self) -> &'static str {
        match self {
            WorkMode::OnSite => "on_site",
            WorkMode::Remote => "remote",
            WorkMode::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatePosted {
    AnyTime,
    PastDay,
    PastWeek,
    PastMonth,
}

impl DatePosted {
    pub fn payload_value(self) -> &'static str {
        match self {
            DatePosted::AnyTime => "any_time",
            DatePosted::PastDay => "past_24_hours",
            DatePosted::PastWeek => "past_week",
            DatePosted::PastMonth => "past_month",
        }
    }
}

/// What a blueprint searches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlueprintFilters {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub experience: Option<ExperienceLevel>,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub work_mode: Option<WorkMode>,
    #[serde(default)]
    pub min_salary: Option<u32>,
    #[serde(default)]
    pub date_posted: Option<DatePosted>,
}

impl BlueprintFilters {
    /// Keywords as a single search string.
    pub fn keyword_query(&self) -> String {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Portals accept one location per search; the first non-empty entry wins.
    pub fn primary_location(&self) -> String {
        self.locations
            .iter()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}
