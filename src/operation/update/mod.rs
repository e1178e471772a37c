
use serde::Deserialize;

use crate::{
    bson::{doc, Bson},
    bulk::UpdateRequest,
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::{BulkWriteFailure, Error, ErrorKind, Result},
    operation::{
        OperationWithDefaults,
        Retryability,
        WriteResponseBody,
        COMMAND_OVERHEAD_SIZE,
        SERVER_4_2_0_WIRE_VERSION,
    },
    options::{UpdateManyOptions, WriteConcern},
    results::UpdateManyResult,
    Namespace,
};

/// One batch-bounded `update` command over a slice of the caller's requests.
#[derive(Debug)]
pub(crate) struct Update {
    ns: Namespace,
    requests: Vec<UpdateRequest>,
    options: Option<UpdateManyOptions>,
    n_attempted: usize,
}

impl Update {
    pub(crate) fn new(
        ns: Namespace,
        requests: Vec<UpdateRequest>,
        options: Option<UpdateManyOptions>,
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

impl OperationWithDefaults for Update {
    type O = UpdateManyResult;
    const NAME: &'static str = "update";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let max_statement_bytes =
            (description.max_message_size_bytes as usize).saturating_sub(COMMAND_OVERHEAD_SIZE);

        let mut updates = Vec::new();
        let mut size = 0;
        for request in self
            .requests
            .iter()
            .take(description.max_write_batch_size as usize)
        {
            crate::bson_util::update_document_check(&request.update)?;

            let mut update = doc! {
                "q": request.filter.clone(),
                "u": request.update.clone(),
            };
            if request.multi {
                update.insert("multi", true);
            }
            if let Some(upsert) = request.upsert {
                update.insert("upsert", upsert);
            }
            if let Some(ref array_filters) = request.array_filters {
                update.insert("arrayFilters", array_filters.clone());
            }
            if let Some(ref collation) = request.collation {
                update.insert("collation", crate::bson::to_bson(collation)?);
            }
            if let Some(ref hint) = request.hint {
                update.insert("hint", crate::bson::to_bson(hint)?);
            }

            let statement_size = crate::bson::to_vec(&update)?.len();
            if !updates.is_empty() && size + statement_size > max_statement_bytes {
                break;
            }
            size += statement_size;
            updates.push(update);
        }

        // The gate applies to the statements this command actually carries; a
        // hinted request deferred to a later batch does not constrain this one.
        let has_hint = updates.iter().any(|update| update.contains_key("hint"));
        if has_hint && description.max_wire_version.unwrap_or(0) < SERVER_4_2_0_WIRE_VERSION {
            return Err(ErrorKind::IncompatibleServer {
                message: "the connected server does not support specifying an index hint on \
                          update operations"
                    .to_string(),
            }
            .into());
        }
        self.n_attempted = updates.len();

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "updates": updates,
            "ordered": self
                .options
                .as_ref()
                .and_then(|options| options.ordered)
                .unwrap_or(true),
        };
        if let Some(ref options) = self.options {
            if let Some(bypass) = options.bypass_document_validation {
                body.insert("bypassDocumentValidation", bypass);
            }
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
        let body: WriteResponseBody<UpdateBody> = response.body()?;

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

        let matched_count = body.n;
        let modified_count = body.n_modified;
        let mut upserted_ids = std::collections::HashMap::new();
        if let Some(ref upserted) = body.upserted {
            for entry in upserted {
                upserted_ids.insert(entry.index, entry.id.clone());
            }
        }

        Ok(UpdateManyResult {
            // an upserted document does not count as matched
            matched_count: matched_count.saturating_sub(upserted_ids.len() as u64),
            modified_count,
            upserted_ids,
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        // Multi-document updates cannot be deduplicated server-side.
        if self.requests.iter().all(|request| !request.multi) {
            Retryability::Write
        } else {
            Retryability::None
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateBody {
    #[serde(rename = "nModified", default)]
    n_modified: u64,

    upserted: Option<Vec<UpsertedEntry>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpsertedEntry {
    #[serde(default)]
    index: usize,

    #[serde(rename = "_id")]
    id: Bson,
}
