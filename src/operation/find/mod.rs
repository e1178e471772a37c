#[cfg(test)]
mod test;

use std::time::Duration;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    cursor::CursorSpecification,
    error::{ErrorKind, Result},
    operation::{CursorBody, OperationWithDefaults, Retryability, SERVER_4_4_0_WIRE_VERSION},
    options::{CursorType, FindOptions, Hint, SelectionCriteria},
    Namespace,
};

#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<Box<FindOptions>>,
}

impl Find {
    pub(crate) fn new(ns: Namespace, filter: Document, options: Option<FindOptions>) -> Self {
        Self {
            ns,
            filter,
            options: options.map(Box::new),
        }
    }

    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self::new(Namespace::empty(), Document::new(), None)
    }

    /// Computes the effective options: each recognized key in the legacy
    /// `modifiers` document maps onto the corresponding first-class option,
    /// and an explicitly set option always shadows the modifier value of the
    /// same semantic.
    fn resolve_options(&self) -> Result<FindOptions> {
        let mut options = self
            .options
            .as_deref()
            .cloned()
            .unwrap_or_default();

        let modifiers = match options.modifiers.take() {
            Some(modifiers) => modifiers,
            None => return Ok(options),
        };

        for (key, value) in modifiers {
            match key.as_str() {
                "$comment" => {
                    if options.comment.is_none() {
                        options.comment = Some(expect_string(&key, value)?);
                    }
                }
                "$hint" => {
                    if options.hint.is_none() {
                        options.hint = Some(match value {
                            Bson::String(name) => Hint::Name(name),
                            Bson::Document(keys) => Hint::Keys(keys),
                            other => return Err(modifier_type_error(&key, &other)),
                        });
                    }
                }
                "$max" => {
                    if options.max.is_none() {
                        options.max = Some(expect_document(&key, value)?);
                    }
                }
                "$maxScan" => {
                    if options.max_scan.is_none() {
                        options.max_scan = Some(expect_int(&key, value)?);
                    }
                }
                "$maxTimeMS" => {
                    if options.max_time.is_none() {
                        let millis = expect_int(&key, value)?;
                        options.max_time = Some(Duration::from_millis(millis as u64));
                    }
                }
                "$min" => {
                    if options.min.is_none() {
                        options.min = Some(expect_document(&key, value)?);
                    }
                }
                "$orderby" => {
                    if options.sort.is_none() {
                        options.sort = Some(expect_document(&key, value)?);
                    }
                }
                "$returnKey" => {
                    if options.return_key.is_none() {
                        options.return_key = Some(expect_bool(&key, value)?);
                    }
                }
                "$showDiskLoc" => {
                    if options.show_record_id.is_none() {
                        options.show_record_id = Some(expect_bool(&key, value)?);
                    }
                }
                "$snapshot" => {
                    if options.snapshot.is_none() {
                        options.snapshot = Some(expect_bool(&key, value)?);
                    }
                }
                other => {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!("unrecognized query modifier: {}", other),
                    }
                    .into())
                }
            }
        }

        Ok(options)
    }
}

fn modifier_type_error(key: &str, value: &Bson) -> crate::error::Error {
    ErrorKind::InvalidArgument {
        message: format!(
            "invalid value for query modifier {}: {:?}",
            key, value
        ),
    }
    .into()
}

fn expect_string(key: &str, value: Bson) -> Result<String> {
    match value {
        Bson::String(s) => Ok(s),
        other => Err(modifier_type_error(key, &other)),
    }
}

fn expect_document(key: &str, value: Bson) -> Result<Document> {
    match value {
        Bson::Document(doc) => Ok(doc),
        other => Err(modifier_type_error(key, &other)),
    }
}

fn expect_int(key: &str, value: Bson) -> Result<i64> {
    bson_util::get_int(&value).ok_or_else(|| modifier_type_error(key, &value))
}

fn expect_bool(key: &str, value: Bson) -> Result<bool> {
    match value {
        Bson::Boolean(b) => Ok(b),
        other => Err(modifier_type_error(key, &other)),
    }
}

impl OperationWithDefaults for Find {
    type O = CursorSpecification;
    const NAME: &'static str = "find";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let options = self.resolve_options()?;

        if options
            .batch_size
            .map(|batch_size| batch_size > i32::MAX as u32)
            == Some(true)
        {
            return Err(ErrorKind::InvalidArgument {
                message: "the batch size must fit into a signed 32-bit integer".to_string(),
            }
            .into());
        }

        // The field layout below is part of the wire contract; each field is
        // emitted only when its option is set.
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        if let Some(ref sort) = options.sort {
            body.insert("sort", sort.clone());
        }
        if let Some(ref projection) = options.projection {
            body.insert("projection", projection.clone());
        }
        if let Some(ref hint) = options.hint {
            body.insert("hint", crate::bson::to_bson(hint)?);
        }
        if let Some(skip) = options.skip {
            body.insert("skip", skip);
        }
        if let Some(limit) = options.limit {
            if limit != 0 {
                body.insert("limit", limit.abs());
            }
        }
        if let Some(batch_size) = options.batch_size {
            body.insert("batchSize", batch_size as i32);
        }
        // A negative limit is a request for a single batch.
        if options.limit.map(|limit| limit < 0) == Some(true)
            || options.single_batch == Some(true)
        {
            body.insert("singleBatch", true);
        }
        if let Some(ref comment) = options.comment {
            body.insert("comment", comment.clone());
        }
        if let Some(max_scan) = options.max_scan {
            body.insert("maxScan", max_scan);
        }
        if let Some(max_time) = options.max_time {
            body.insert("maxTimeMS", max_time.as_millis() as i64);
        }
        if let Some(ref max) = options.max {
            body.insert("max", max.clone());
        }
        if let Some(ref min) = options.min {
            body.insert("min", min.clone());
        }
        if let Some(return_key) = options.return_key {
            body.insert("returnKey", return_key);
        }
        if let Some(show_record_id) = options.show_record_id {
            body.insert("showRecordId", show_record_id);
        }
        if let Some(snapshot) = options.snapshot {
            body.insert("snapshot", snapshot);
        }
        match options.cursor_type {
            Some(CursorType::Tailable) => {
                body.insert("tailable", true);
            }
            Some(CursorType::TailableAwait) => {
                body.insert("tailable", true);
            }
            _ => {}
        }
        if let Some(oplog_replay) = options.oplog_replay {
            body.insert("oplogReplay", oplog_replay);
        }
        if let Some(no_cursor_timeout) = options.no_cursor_timeout {
            body.insert("noCursorTimeout", no_cursor_timeout);
        }
        if options.cursor_type == Some(CursorType::TailableAwait) {
            body.insert("awaitData", true);
        }
        if let Some(allow_disk_use) = options.allow_disk_use {
            body.insert("allowDiskUse", allow_disk_use);
        }
        // Partial first batches are only meaningful when some shards may be
        // unreachable, so the field is only sent to shard routers.
        if let Some(allow_partial_results) = options.allow_partial_results {
            if description.is_sharded() {
                body.insert("allowPartialResults", allow_partial_results);
            }
        }
        if let Some(ref collation) = options.collation {
            body.insert("collation", crate::bson::to_bson(collation)?);
        }
        if let Some(ref read_concern) = options.read_concern {
            body.insert("readConcern", doc! { "level": read_concern.level.as_str() });
        }
        if let Some(ref let_vars) = options.let_vars {
            body.insert("let", let_vars.clone());
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
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
        let response: CursorBody = response.body()?;

        // The maximum await time only applies to cursors the server will block
        // on.
        let max_await_time = if self
            .options
            .as_ref()
            .map(|options| options.cursor_type == Some(CursorType::TailableAwait))
            == Some(true)
        {
            self.options.as_ref().and_then(|options| options.max_await_time)
        } else {
            None
        };

        // The comment should only be propagated to getMore calls on 4.4+.
        let comment = if description.max_wire_version.unwrap_or(0) < SERVER_4_4_0_WIRE_VERSION {
            None
        } else {
            self.options
                .as_ref()
                .and_then(|options| options.comment.clone().map(Bson::String))
        };

        Ok(CursorSpecification::new(
            response.cursor,
            description.server_address.clone(),
            self.options.as_ref().and_then(|options| options.batch_size),
            max_await_time,
            comment,
        )
        .with_limit(self.options.as_ref().and_then(|options| options.limit)))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options
            .as_ref()
            .and_then(|options| options.selection_criteria.as_ref())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
