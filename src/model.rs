//! Enumerations shared between the reconciliation engine and the
//! persisted rows.
//!
//! Upstream feeds carry these as bare integers. Every conversion here is
//! total: unknown codes fall back to the conservative default instead of
//! failing, because a feed with a new enum value is still a usable feed.

/// Trip-level schedule relationship. Only [`Scheduled`] trips get
/// per-stop rows.
///
/// [`Scheduled`]: ScheduleRelationship::Scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRelationship {
    Scheduled,
    Added,
    Unscheduled,
    Canceled,
    Replacement,
}

impl ScheduleRelationship {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(1) => Self::Added,
            Some(2) => Self::Unscheduled,
            Some(3) => Self::Canceled,
            Some(5) => Self::Replacement,
            _ => Self::Scheduled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Added => "ADDED",
            Self::Unscheduled => "UNSCHEDULED",
            Self::Canceled => "CANCELED",
            Self::Replacement => "REPLACEMENT",
        }
    }
}

/// Per-stop schedule relationship. Code 1 (SKIPPED in the wire format)
/// maps to `Scheduled` here; the sources this service consumes mark
/// skipped stops with NO_DATA instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopScheduleRelationship {
    Scheduled,
    Skipped,
    NoData,
}

impl StopScheduleRelationship {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(2) => Self::NoData,
            _ => Self::Scheduled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Skipped => "SKIPPED",
            Self::NoData => "NO_DATA",
        }
    }

    /// True when the stop carries no usable realtime timing by
    /// definition.
    pub fn is_dataless(&self) -> bool {
        matches!(self, Self::Skipped | Self::NoData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    UnknownCause,
    OtherCause,
    TechnicalProblem,
    Strike,
    Demonstration,
    Accident,
    Holiday,
    Weather,
    Maintenance,
    Construction,
    PoliceActivity,
    MedicalEmergency,
}

impl Cause {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(2) => Self::OtherCause,
            Some(3) => Self::TechnicalProblem,
            Some(4) => Self::Strike,
            Some(5) => Self::Demonstration,
            Some(6) => Self::Accident,
            Some(7) => Self::Holiday,
            Some(8) => Self::Weather,
            Some(9) => Self::Maintenance,
            Some(10) => Self::Construction,
            Some(11) => Self::PoliceActivity,
            Some(12) => Self::MedicalEmergency,
            _ => Self::UnknownCause,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownCause => "UNKNOWN_CAUSE",
            Self::OtherCause => "OTHER_CAUSE",
            Self::TechnicalProblem => "TECHNICAL_PROBLEM",
            Self::Strike => "STRIKE",
            Self::Demonstration => "DEMONSTRATION",
            Self::Accident => "ACCIDENT",
            Self::Holiday => "HOLIDAY",
            Self::Weather => "WEATHER",
            Self::Maintenance => "MAINTENANCE",
            Self::Construction => "CONSTRUCTION",
            Self::PoliceActivity => "POLICE_ACTIVITY",
            Self::MedicalEmergency => "MEDICAL_EMERGENCY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    NoService,
    ReducedService,
    SignificantDelays,
    Detour,
    AdditionalService,
    ModifiedService,
    OtherEffect,
    UnknownEffect,
    StopMoved,
}

impl Effect {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(1) => Self::NoService,
            Some(2) => Self::ReducedService,
            Some(3) => Self::SignificantDelays,
            Some(4) => Self::Detour,
            Some(5) => Self::AdditionalService,
            Some(6) => Self::ModifiedService,
            Some(7) => Self::OtherEffect,
            Some(9) => Self::StopMoved,
            _ => Self::UnknownEffect,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoService => "NO_SERVICE",
            Self::ReducedService => "REDUCED_SERVICE",
            Self::SignificantDelays => "SIGNIFICANT_DELAYS",
            Self::Detour => "DETOUR",
            Self::AdditionalService => "ADDITIONAL_SERVICE",
            Self::ModifiedService => "MODIFIED_SERVICE",
            Self::OtherEffect => "OTHER_EFFECT",
            Self::UnknownEffect => "UNKNOWN_EFFECT",
            Self::StopMoved => "STOP_MOVED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_relationship_codes() {
        assert_eq!(
            ScheduleRelationship::from_code(Some(0)),
            ScheduleRelationship::Scheduled
        );
        assert_eq!(
            ScheduleRelationship::from_code(Some(3)),
            ScheduleRelationship::Canceled
        );
        assert_eq!(
            ScheduleRelationship::from_code(Some(5)),
            ScheduleRelationship::Replacement
        );
        // 4 is unassigned in the wire format, unknowns stay scheduled
        assert_eq!(
            ScheduleRelationship::from_code(Some(4)),
            ScheduleRelationship::Scheduled
        );
        assert_eq!(
            ScheduleRelationship::from_code(None),
            ScheduleRelationship::Scheduled
        );
    }

    #[test]
    fn test_stop_relationship_codes() {
        assert_eq!(
            StopScheduleRelationship::from_code(Some(1)),
            StopScheduleRelationship::Scheduled
        );
        assert_eq!(
            StopScheduleRelationship::from_code(Some(2)),
            StopScheduleRelationship::NoData
        );
        assert_eq!(
            StopScheduleRelationship::from_code(Some(99)),
            StopScheduleRelationship::Scheduled
        );
    }

    #[test]
    fn test_cause_effect_defaults() {
        assert_eq!(Cause::from_code(None), Cause::UnknownCause);
        assert_eq!(Cause::from_code(Some(42)), Cause::UnknownCause);
        assert_eq!(Effect::from_code(None), Effect::UnknownEffect);
        assert_eq!(Effect::from_code(Some(42)), Effect::UnknownEffect);
        assert_eq!(Effect::from_code(Some(9)), Effect::StopMoved);
    }
}
