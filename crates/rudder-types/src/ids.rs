//! Strongly-typed identifiers for Rudder entities
//!
//! All IDs are UUID-based but wrapped in newtype structs for type safety.
//! They display as the bare UUID so that they can be embedded in external
//! run names and recovered by pattern matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a workspace (tenant boundary)
    WorkspaceId
);
uuid_id!(
    /// Unique identifier for a system (groups environments and deployments)
    SystemId
);
uuid_id!(
    /// Unique identifier for a resource
    ResourceId
);
uuid_id!(
    /// Unique identifier for an environment
    EnvironmentId
);
uuid_id!(
    /// Unique identifier for a deployment
    DeploymentId
);
uuid_id!(
    /// Unique identifier for a deployment version
    DeploymentVersionId
);
uuid_id!(
    /// Unique identifier for a release target
    ReleaseTargetId
);
uuid_id!(
    /// Unique identifier for a release
    ReleaseId
);
uuid_id!(
    /// Unique identifier for a version release
    VersionReleaseId
);
uuid_id!(
    /// Unique identifier for a variable set release
    VariableSetReleaseId
);
uuid_id!(
    /// Unique identifier for a job
    JobId
);
uuid_id!(
    /// Unique identifier for a job agent
    JobAgentId
);
uuid_id!(
    /// Unique identifier for a policy
    PolicyId
);
uuid_id!(
    /// Unique identifier for an environment/system variable set
    VariableSetId
);
uuid_id!(
    /// Unique identifier for a resource relationship rule
    RelationshipRuleId
);
uuid_id!(
    /// Unique identifier for a recorded approval
    ApprovalRecordId
);
