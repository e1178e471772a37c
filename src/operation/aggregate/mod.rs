#[cfg(test)]
mod test;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::CursorSpecification,
    error::{ErrorKind, Result},
    operation::{
        CursorBody,
        OperationWithDefaults,
        Retryability,
        WriteConcernOnlyBody,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::{AggregateOptions, SelectionCriteria, WriteConcern},
    Namespace,
};

#[derive(Debug)]
pub(crate) struct Aggregate {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
}

impl Aggregate {
    pub(crate) fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: Option<AggregateOptions>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options,
        }
    }

    /// Creates an aggregation that materializes its results into a collection.
    /// The pipeline must end in an output stage.
    pub(crate) fn new_to_collection(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: Option<AggregateOptions>,
    ) -> Result<Self> {
        let aggregate = Self::new(target, pipeline, options);
        if !aggregate.is_out_or_merge() {
            return Err(ErrorKind::InvalidArgument {
                message: "an aggregate-to-collection pipeline must end in an $out or $merge \
                          stage"
                    .to_string(),
            }
            .into());
        }
        Ok(aggregate)
    }

    /// Returns whether this is a $out or $merge aggregation operation.
    fn is_out_or_merge(&self) -> bool {
        self.pipeline
            .last()
            .map(|stage| {
                let stage = bson_util::first_key(stage);
                stage == Some("$out") || stage == Some("$merge")
            })
            .unwrap_or(false)
    }

    /// The wire format allows a `$out` targeting the operation's own database
    /// to be written as the bare collection name.
    fn simplified_pipeline(&self) -> Vec<Document> {
        let mut pipeline = self.pipeline.clone();
        if let Some(last) = pipeline.last_mut() {
            let simplified = match last.get_document("$out") {
                Ok(out) => match (out.get_str("db"), out.get_str("coll")) {
                    (Ok(db), Ok(coll)) if db == self.target.db_name() && out.len() == 2 => {
                        Some(coll.to_string())
                    }
                    _ => None,
                },
                Err(_) => None,
            };
            if let Some(coll) = simplified {
                last.insert("$out", coll);
            }
        }
        pipeline
    }
}

impl OperationWithDefaults for Aggregate {
    type O = CursorSpecification;
    const NAME: &'static str = "aggregate";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.target.to_bson(),
            "pipeline": bson_util::to_bson_array(&self.simplified_pipeline()),
        };

        if let Some(ref options) = self.options {
            if let Some(allow_disk_use) = options.allow_disk_use {
                body.insert("allowDiskUse", allow_disk_use);
            }
            if let Some(bypass) = options.bypass_document_validation {
                body.insert("bypassDocumentValidation", bypass);
            }
            if let Some(max_time) = options.max_time {
                body.insert("maxTimeMS", max_time.as_millis() as i64);
            }
            if let Some(ref collation) = options.collation {
                body.insert("collation", crate::bson::to_bson(collation)?);
            }
            if let Some(ref read_concern) = options.read_concern {
                body.insert("readConcern", doc! { "level": read_concern.level.as_str() });
            }
            if let Some(ref write_concern) = options.write_concern {
                if !write_concern.is_empty() {
                    body.insert("writeConcern", write_concern.to_document()?);
                }
            }
        }

        // The cursor field is always present for cursored aggregations, empty
        // or carrying the requested batch size. Aggregations that write to a
        // collection return no first batch worth bounding.
        let mut cursor = Document::new();
        if let Some(batch_size) = self.options.as_ref().and_then(|options| options.batch_size) {
            if !self.is_out_or_merge() {
                cursor.insert("batchSize", batch_size as i32);
            }
        }
        body.insert("cursor", cursor);

        if let Some(ref options) = self.options {
            if let Some(ref hint) = options.hint {
                body.insert("hint", crate::bson::to_bson(hint)?);
            }
            if let Some(ref let_vars) = options.let_vars {
                body.insert("let", let_vars.clone());
            }
            if let Some(ref comment) = options.comment {
                body.insert("comment", comment.clone());
            }
        }

        Ok(Command::new(Self::NAME, self.target.db_name(), body))
    }

    fn extract_at_cluster_time(
        &self,
        response: &crate::bson::RawDocument,
    ) -> Result<Option<crate::bson::Timestamp>> {
        CursorBody::extract_at_cluster_time(response)
    }

    fn handle_response(
        &self,
        response: &RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        let cursor_response: CursorBody = response.body()?;

        if self.is_out_or_merge() {
            let wc_error_info: WriteConcernOnlyBody = response.body()?;
            wc_error_info.validate()?;
        };

        // The comment should only be propagated to getMore calls on 4.4+.
        let comment = if description.max_wire_version.unwrap_or(0) < SERVER_4_4_0_WIRE_VERSION {
            None
        } else {
            self.options
                .as_ref()
                .and_then(|options| options.comment.clone())
        };

        Ok(CursorSpecification::new(
            cursor_response.cursor,
            description.server_address.clone(),
            self.options.as_ref().and_then(|options| options.batch_size),
            self.options
                .as_ref()
                .and_then(|options| options.max_await_time),
            comment,
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options
            .as_ref()
            .and_then(|options| options.selection_criteria.as_ref())
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.is_out_or_merge() {
            Retryability::None
        } else {
            Retryability::Read
        }
    }
}

/// What an aggregation runs over: a whole database (for pipelines like
/// `$currentOp`) or a single collection.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum AggregateTarget {
    /// A database-scoped aggregation, addressed as `aggregate: 1` on the wire.
    Database(String),

    /// An aggregation over a collection.
    Collection(Namespace),
}

impl AggregateTarget {
    fn to_bson(&self) -> Bson {
        match self {
            AggregateTarget::Database(_) => Bson::Int32(1),
            AggregateTarget::Collection(ref ns) => Bson::String(ns.coll.to_string()),
        }
    }

    pub(crate) fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(ref s) => s.as_str(),
            AggregateTarget::Collection(ref ns) => ns.db.as_str(),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

impl From<String> for AggregateTarget {
    fn from(db_name: String) -> Self {
        AggregateTarget::Database(db_name)
    }
}
