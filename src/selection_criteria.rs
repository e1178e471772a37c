use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{cluster::ServerType, options::ServerAddress};

/// Describes which servers are suitable for a given operation.
#[derive(Clone)]
#[non_exhaustive]
pub enum SelectionCriteria {
    /// A read preference that describes the suitable servers based on the
    /// server type, max staleness, and server tags.
    ReadPreference(ReadPreference),

    /// A predicate used to filter servers that are considered suitable. A
    /// server will be considered suitable if the predicate returns true for
    /// it.
    Predicate(Predicate),
}

/// A predicate used to filter servers that are considered suitable.
pub type Predicate = Arc<dyn Send + Sync + Fn(&ServerInfo) -> bool>;

impl fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ReadPreference(read_pref) => write!(f, "ReadPreference({:?})", read_pref),
            Self::Predicate(..) => write!(f, "Predicate"),
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl SelectionCriteria {
    pub(crate) fn as_read_pref(&self) -> Option<&ReadPreference> {
        match self {
            Self::ReadPreference(ref read_pref) => Some(read_pref),
            Self::Predicate(..) => None,
        }
    }

    /// Criteria that selects the server at the given address. Used to route
    /// cursor continuation commands back to the server that created the
    /// cursor.
    pub(crate) fn from_address(address: ServerAddress) -> Self {
        SelectionCriteria::Predicate(Arc::new(move |server| server.address == address))
    }
}

/// Information about a server usable by a selection predicate.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServerInfo {
    /// The address of the server.
    pub address: ServerAddress,

    /// The type of the server.
    pub server_type: ServerType,
}

/// Specifies how the driver routes read operations among the members of a
/// cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
#[non_exhaustive]
pub enum ReadPreference {
    /// Only route this operation to the primary.
    Primary,

    /// Only route this operation to a secondary.
    Secondary,

    /// Route this operation to the primary if it's available, but fall back to
    /// a secondary if it isn't.
    PrimaryPreferred,

    /// Route this operation to a secondary if one is available, but fall back
    /// to the primary if it isn't.
    SecondaryPreferred,

    /// Route this operation to the node with the least network latency
    /// regardless of whether it's the primary or a secondary.
    Nearest,
}
