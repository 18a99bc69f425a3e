//! Lead records and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lead lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "qualified" => Ok(LeadStatus::Qualified),
            "converted" => Ok(LeadStatus::Converted),
            "lost" => Ok(LeadStatus::Lost),
            other => Err(format!("unknown lead status: {other}")),
        }
    }
}

/// Outreach priority assigned to a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LeadPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl LeadPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadPriority::Low => "low",
            LeadPriority::Medium => "medium",
            LeadPriority::High => "high",
        }
    }
}

impl std::str::FromStr for LeadPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(LeadPriority::Low),
            "medium" => Ok(LeadPriority::Medium),
            "high" => Ok(LeadPriority::High),
            other => Err(format!("unknown lead priority: {other}")),
        }
    }
}

/// A contact record sourced from import or webhook ingestion.
///
/// `call_sid` references the most recent outbound call placed to this lead;
/// it is unique across leads — one call belongs to at most one lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub status: LeadStatus,
    pub priority: LeadPriority,
    pub notes: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub call_sid: Option<String>,
    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Create a fresh lead with default lifecycle fields
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: None,
            email: None,
            phone: None,
            company: None,
            source: None,
            status: LeadStatus::New,
            priority: LeadPriority::Medium,
            notes: None,
            metadata: None,
            call_sid: None,
            last_contacted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the phone number
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this lead is eligible for an automated refill call:
    /// never contacted, and carries a dialable phone number.
    pub fn is_callable(&self) -> bool {
        self.status == LeadStatus::New
            && self.call_sid.is_none()
            && self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_new_defaults() {
        let lead = Lead::new("lead-1");
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.priority, LeadPriority::Medium);
        assert!(lead.call_sid.is_none());
    }

    #[test]
    fn test_is_callable() {
        let lead = Lead::new("lead-1").with_phone("+15551234567");
        assert!(lead.is_callable());

        let no_phone = Lead::new("lead-2");
        assert!(!no_phone.is_callable());

        let blank_phone = Lead::new("lead-3").with_phone("   ");
        assert!(!blank_phone.is_callable());

        let mut contacted = Lead::new("lead-4").with_phone("+15551234567");
        contacted.call_sid = Some("CA123".to_string());
        assert!(!contacted.is_callable());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            LeadStatus::New,
            LeadStatus::Contacted,
            LeadStatus::Qualified,
            LeadStatus::Converted,
            LeadStatus::Lost,
        ] {
            assert_eq!(status.as_str().parse::<LeadStatus>().unwrap(), status);
        }
    }
}
