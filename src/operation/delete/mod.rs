
use crate::{
    bson::doc,
    bulk::DeleteRequest,
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::{BulkWriteFailure, Error, ErrorKind, Result},
    operation::{
        OperationWithDefaults,
        Retryability,
        WriteResponseBody,
        COMMAND_OVERHEAD_SIZE,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::{DeleteManyOptions, WriteConcern},
    results::DeleteManyResult,
    Namespace,
};

/// One batch-bounded `delete` command over a slice of the caller's requests.
#[derive(Debug)]
pub(crate) struct Delete {
    ns: Namespace,
    requests: Vec<DeleteRequest>,
    options: Option<DeleteManyOptions>,
    /// How many statements the most recent `build` included.
    n_attempted: usize,
}

impl Delete {
    pub(crate) fn new(
        ns: Namespace,
        requests: Vec<DeleteRequest>,
        options: Option<DeleteManyOptions>,
    ) -> Self {
        Self {
            ns,
            requests,
            options,
            n_attempted: 0,
        }
    }

    pub(crate) fn n_attempted(&self) -> usize {
        self.n_attempted
    }
}

impl OperationWithDefaults for Delete {
    type O = DeleteManyResult;
    const NAME: &'static str = "delete";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let max_statement_bytes =
            (description.max_message_size_bytes as usize).saturating_sub(COMMAND_OVERHEAD_SIZE);

        let mut deletes = Vec::new();
        let mut size = 0;
        for request in self
            .requests
            .iter()
            .take(description.max_write_batch_size as usize)
        {
            let mut delete = doc! {
                "q": request.filter.clone(),
                "limit": request.limit as i32,
            };
            if let Some(ref collation) = request.collation {
                delete.insert("collation", crate::bson::to_bson(collation)?);
            }
            if let Some(ref hint) = request.hint {
                delete.insert("hint", crate::bson::to_bson(hint)?);
            }

            let statement_size = crate::bson::to_vec(&delete)?.len();
            if !deletes.is_empty() && size + statement_size > max_statement_bytes {
                break;
            }
            size += statement_size;
            deletes.push(delete);
        }

        // The gate applies to the statements this command actually carries; a
        // hinted request deferred to a later batch does not constrain this one.
        let has_hint = deletes.iter().any(|delete| delete.contains_key("hint"));
        if has_hint && description.max_wire_version.unwrap_or(0) < SERVER_4_4_0_WIRE_VERSION {
            return Err(ErrorKind::IncompatibleServer {
                message: "the connected server does not support specifying an index hint on \
                          delete operations"
                    .to_string(),
            }
            .into());
        }
        self.n_attempted = deletes.len();

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "deletes": deletes,
            "ordered": self
                .options
                .as_ref()
                .and_then(|options| options.ordered)
                .unwrap_or(true),
        };
        if let Some(ref options) = self.options {
            if let Some(ref let_vars) = options.let_vars {
                body.insert("let", let_vars.clone());
            }
            if let Some(ref write_concern) = options.write_concern {
                if !write_concern.is_empty() {
                    body.insert("writeConcern", write_concern.to_document()?);
                }
            }
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: &RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let body: WriteResponseBody = response.body()?;

        if body.write_errors.is_some() || body.write_concern_error.is_some() {
            return Err(Error::new(
                ErrorKind::BulkWrite(BulkWriteFailure {
                    write_errors: body.write_errors.clone(),
                    write_concern_error: body.write_concern_error.clone(),
                    inserted_ids: Default::default(),
                }),
                body.labels.clone(),
            ));
        }

        Ok(DeleteManyResult {
            deleted_count: body.n,
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        // Multi-document deletes replayed after a partial apply would delete
        // documents the first attempt missed, so only single-document
        // statements are retryable.
        if self.requests.iter().all(|request| request.limit == 1) {
            Retryability::Write
        } else {
            Retryability::None
        }
    }
}
