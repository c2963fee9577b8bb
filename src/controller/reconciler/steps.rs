//! # Steps
//!
//! The ordered phases of a reconcile pass and what each one can report back
//! to the driver.

use std::fmt;

/// Phases of a pass, in execution order. The existence check happens before
/// the first phase, when the `MailServer` is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Release the finalizer of a `MailServer` being deleted
    Deletion,
    /// Put the finalizer in place before anything is created
    Finalizer,
    /// Bind the domain into status, reject renames
    Domain,
    /// Read the LDAP bind credentials
    Ldap,
    /// Compute the target object set
    Generate,
    /// Create the postmaster credentials secret once
    Credentials,
    /// Converge every desired object
    Apply,
    /// Delete objects of disabled features
    Retire,
    /// Record feature enablement in status
    FeatureStatus,
    /// Record the external address and publish the A record
    Address,
    /// Observe available replicas and the workload selector
    Replicas,
    /// Observe the data volume capacity
    Volume,
    /// Publish the discovered public address in the SPF record
    Spf,
    /// Publish the signing key generated by the workload
    Dkim,
}

impl Phase {
    pub const ALL: [Phase; 14] = [
        Phase::Deletion,
        Phase::Finalizer,
        Phase::Domain,
        Phase::Ldap,
        Phase::Generate,
        Phase::Credentials,
        Phase::Apply,
        Phase::Retire,
        Phase::FeatureStatus,
        Phase::Address,
        Phase::Replicas,
        Phase::Volume,
        Phase::Spf,
        Phase::Dkim,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Phase::Deletion => "deletion",
            Phase::Finalizer => "finalizer",
            Phase::Domain => "domain",
            Phase::Ldap => "ldap",
            Phase::Generate => "generate",
            Phase::Credentials => "credentials",
            Phase::Apply => "apply",
            Phase::Retire => "retire",
            Phase::FeatureStatus => "feature-status",
            Phase::Address => "address",
            Phase::Replicas => "replicas",
            Phase::Volume => "volume",
            Phase::Spf => "spf",
            Phase::Dkim => "dkim",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a pass stopped early without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingReason {
    FinalizerAdded,
    DomainBound,
    CredentialsCreated,
    ObjectsChanged,
    ObjectsRetired,
    FeatureStatus,
    AwaitingAddress,
    AddressRecorded,
    AddressRecordChanged,
    ReplicasObserved,
    VolumeObserved,
    WorkloadNotReady,
    SpfUpdated,
    DkimUpdated,
}

impl PendingReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PendingReason::FinalizerAdded => "finalizer-added",
            PendingReason::DomainBound => "domain-bound",
            PendingReason::CredentialsCreated => "credentials-created",
            PendingReason::ObjectsChanged => "objects-changed",
            PendingReason::ObjectsRetired => "objects-retired",
            PendingReason::FeatureStatus => "feature-status",
            PendingReason::AwaitingAddress => "awaiting-address",
            PendingReason::AddressRecorded => "address-recorded",
            PendingReason::AddressRecordChanged => "address-record-changed",
            PendingReason::ReplicasObserved => "replicas-observed",
            PendingReason::VolumeObserved => "volume-observed",
            PendingReason::WorkloadNotReady => "workload-not-ready",
            PendingReason::SpfUpdated => "spf-updated",
            PendingReason::DkimUpdated => "dkim-updated",
        }
    }

    /// Whether the pass wrote something before stopping. The others wait on
    /// a dependency outside the controller.
    #[must_use]
    pub fn wrote(self) -> bool {
        !matches!(
            self,
            PendingReason::AwaitingAddress | PendingReason::WorkloadNotReady
        )
    }
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Go on with the next phase
    Continue,
    /// Stop here and come back soon
    Pending(PendingReason),
    /// Stop here, nothing left to do for this object
    Halt,
}

/// Result of a whole pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The `MailServer` is gone or its deletion was let through
    Stopped,
    Pending(PendingReason),
    /// Every phase completed without a write
    Converged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_phase_order_and_names() {
        assert_eq!(Phase::ALL[0], Phase::Deletion);
        assert_eq!(Phase::ALL[Phase::ALL.len() - 1], Phase::Dkim);
        let names: HashSet<_> = Phase::ALL.iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), Phase::ALL.len());
        let apply = Phase::ALL.iter().position(|p| *p == Phase::Apply);
        let address = Phase::ALL.iter().position(|p| *p == Phase::Address);
        assert!(apply < address);
    }

    #[test]
    fn test_only_waiting_reasons_have_no_write() {
        assert!(!PendingReason::AwaitingAddress.wrote());
        assert!(!PendingReason::WorkloadNotReady.wrote());
        assert!(PendingReason::ObjectsChanged.wrote());
        assert_eq!(PendingReason::DkimUpdated.to_string(), "dkim-updated");
    }
}
