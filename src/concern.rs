//! Contains the types for read concerns and write concerns.

use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::doc,
    error::{ErrorKind, Result},
    serde_util,
};

/// Specifies the consistency and isolation properties of read operations from
/// replica sets and replica set shards.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ReadConcern {
    /// The level of the read concern.
    pub level: ReadConcernLevel,
}

/// Specifies the level consistency and isolation properties of a given
/// `ReadConcern`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "String")]
#[non_exhaustive]
pub enum ReadConcernLevel {
    /// See the specific documentation for this read concern level.
    Local,

    /// See the specific documentation for this read concern level.
    Majority,

    /// See the specific documentation for this read concern level.
    Linearizable,

    /// See the specific documentation for this read concern level.
    Available,

    /// Reads from a consistent snapshot tied to the session's snapshot time.
    Snapshot,

    /// Specify a custom read concern level. This is present to provide forwards
    /// compatibility with any future read concerns which may be added to new
    /// versions of the server.
    Custom(String),
}

impl ReadConcern {
    /// A `ReadConcern` with level "local".
    pub fn local() -> Self {
        ReadConcernLevel::Local.into()
    }

    /// A `ReadConcern` with level "majority".
    pub fn majority() -> Self {
        ReadConcernLevel::Majority.into()
    }

    /// A `ReadConcern` with level "linearizable".
    pub fn linearizable() -> Self {
        ReadConcernLevel::Linearizable.into()
    }

    /// A `ReadConcern` with level "available".
    pub fn available() -> Self {
        ReadConcernLevel::Available.into()
    }

    /// A `ReadConcern` with level "snapshot".
    pub fn snapshot() -> Self {
        ReadConcernLevel::Snapshot.into()
    }
}

impl From<ReadConcernLevel> for ReadConcern {
    fn from(level: ReadConcernLevel) -> Self {
        Self { level }
    }
}

impl ReadConcernLevel {
    pub(crate) fn from_str(s: &str) -> Self {
        match s {
            "local" => ReadConcernLevel::Local,
            "majority" => ReadConcernLevel::Majority,
            "linearizable" => ReadConcernLevel::Linearizable,
            "available" => ReadConcernLevel::Available,
            "snapshot" => ReadConcernLevel::Snapshot,
            s => ReadConcernLevel::Custom(s.to_string()),
        }
    }

    /// Gets the string representation of the `ReadConcernLevel`.
    pub(crate) fn as_str(&self) -> &str {
        match self {
            ReadConcernLevel::Local => "local",
            ReadConcernLevel::Majority => "majority",
            ReadConcernLevel::Linearizable => "linearizable",
            ReadConcernLevel::Available => "available",
            ReadConcernLevel::Snapshot => "snapshot",
            ReadConcernLevel::Custom(ref s) => s,
        }
    }
}

impl From<String> for ReadConcernLevel {
    fn from(s: String) -> Self {
        Self::from_str(&s)
    }
}

impl Serialize for ReadConcernLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Specifies the level of acknowledgment requested from the server for write
/// operations.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WriteConcern {
    /// Requests acknowledgment that the operation has propagated to a specific
    /// number or variety of servers.
    #[builder(default, setter(strip_option))]
    pub w: Option<Acknowledgment>,

    /// Specifies a time limit for the write concern. If an operation has not
    /// propagated to the requested level within the time limit, an error will
    /// return.
    ///
    /// Note that an error being returned due to a write concern error does not
    /// imply that the write would not have finished propagating if allowed more
    /// time to finish, and the server will not roll back the writes that
    /// occurred before the timeout was reached.
    #[builder(default, setter(strip_option))]
    #[serde(rename = "wtimeout")]
    #[serde(serialize_with = "serde_util::serialize_duration_option_as_int_millis")]
    #[serde(deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis")]
    #[serde(default)]
    pub w_timeout: Option<Duration>,

    /// Requests acknowledgment that the operation has propagated to the
    /// on-disk journal.
    #[builder(default, setter(strip_option))]
    #[serde(rename = "j")]
    pub journal: Option<bool>,
}

/// The type of the `w` field in a [`WriteConcern`](struct.WriteConcern.html).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Acknowledgment {
    /// Requires acknowledgment that the write has reached the specified number
    /// of nodes.
    ///
    /// Note: specifying 0 here indicates that the write concern is
    /// unacknowledged, which means the driver will not know whether it
    /// succeeded or failed.
    Nodes(u32),

    /// Requires acknowledgment that the write has reached the majority of nodes.
    #[serde(rename = "majority")]
    Majority,

    /// Requires acknowledgment according to the given custom write concern.
    /// See the deployment's configuration for more information.
    Custom(String),
}

impl From<u32> for Acknowledgment {
    fn from(i: u32) -> Self {
        Acknowledgment::Nodes(i)
    }
}

impl From<String> for Acknowledgment {
    fn from(s: String) -> Self {
        if s == "majority" {
            Acknowledgment::Majority
        } else {
            Acknowledgment::Custom(s)
        }
    }
}

impl WriteConcern {
    /// A `WriteConcern` requesting majority acknowledgment.
    pub fn majority() -> Self {
        Acknowledgment::Majority.into()
    }

    /// Whether this write concern requests acknowledgment from the server. An
    /// absent `w` value requests the server's default, which is acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Some(Acknowledgment::Nodes(0)) || self.journal == Some(true)
    }

    /// Whether this write concern contains any specified options.
    pub fn is_empty(&self) -> bool {
        self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none()
    }

    /// Validates that the write concern is consistent: requesting no
    /// acknowledgment while also requesting journaling is contradictory.
    pub fn validate(&self) -> Result<()> {
        if self.w == Some(Acknowledgment::Nodes(0)) && self.journal == Some(true) {
            return Err(ErrorKind::InvalidArgument {
                message: "write concern cannot have w=0 and j=true".to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn to_document(&self) -> Result<crate::bson::Document> {
        self.validate()?;
        Ok(crate::bson::to_document(self)?)
    }
}

impl<T: Into<Acknowledgment>> From<T> for WriteConcern {
    fn from(w: T) -> Self {
        WriteConcern {
            w: Some(w.into()),
            w_timeout: None,
            journal: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_concern_acknowledgment() {
        assert!(WriteConcern::default().is_acknowledged());
        assert!(WriteConcern::majority().is_acknowledged());
        assert!(!WriteConcern::from(0).is_acknowledged());
        let journaled = WriteConcern::builder()
            .w(Acknowledgment::Nodes(0))
            .journal(true)
            .build();
        assert!(journaled.is_acknowledged());
        assert!(journaled.validate().is_err());
    }

    #[test]
    fn write_concern_serialization() {
        let wc = WriteConcern::builder()
            .w(Acknowledgment::Majority)
            .w_timeout(Duration::from_millis(100))
            .build();
        let doc = wc.to_document().unwrap();
        assert_eq!(doc, doc! { "w": "majority", "wtimeout": 100_i32 });
    }
}
