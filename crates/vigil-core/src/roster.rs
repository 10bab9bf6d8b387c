//! Household roster and detection matching.
//!
//! Matching a detection to a roster member is a pluggable policy behind
//! [`PresenceMatcher`]. The default, [`FirstEligibleMatcher`], is a
//! placeholder: any person detection is attributed to the first household
//! member in roster order.

use serde::{Deserialize, Serialize};

/// Role of a roster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Resident,
    Family,
    Service,
    FrequentVisitor,
    Guest,
}

impl MemberRole {
    /// Residents and family members.
    #[must_use]
    pub const fn is_household(&self) -> bool {
        matches!(self, MemberRole::Resident | MemberRole::Family)
    }
}

/// A known person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub id: String,
    pub name: String,
    pub role: MemberRole,
}

impl RosterMember {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: MemberRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }
}

/// The parts of a detection a matcher may look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionRef<'a> {
    pub label: &'a str,
    pub entity_id: Option<&'a str>,
    pub zone_id: Option<&'a str>,
}

impl<'a> DetectionRef<'a> {
    #[must_use]
    pub fn labelled(label: &'a str) -> Self {
        Self {
            label,
            entity_id: None,
            zone_id: None,
        }
    }
}

/// Attributes a detection to a roster member.
pub trait PresenceMatcher: Send + Sync {
    /// Pick the member `detection` belongs to, if any. Must be pure.
    fn match_detection<'r>(
        &self,
        detection: &DetectionRef<'_>,
        roster: &'r [RosterMember],
    ) -> Option<&'r RosterMember>;
}

/// Attributes every `person` detection to the first household member.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstEligibleMatcher;

impl PresenceMatcher for FirstEligibleMatcher {
    fn match_detection<'r>(
        &self,
        detection: &DetectionRef<'_>,
        roster: &'r [RosterMember],
    ) -> Option<&'r RosterMember> {
        match_detection_to_member(detection, roster)
    }
}

/// The default matching policy as a free function.
#[must_use]
pub fn match_detection_to_member<'r>(
    detection: &DetectionRef<'_>,
    roster: &'r [RosterMember],
) -> Option<&'r RosterMember> {
    if detection.label != "person" {
        return None;
    }
    roster.iter().find(|member| member.role.is_household())
}
