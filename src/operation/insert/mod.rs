
use crate::{
    bson::{doc, oid::ObjectId, Bson, Document},
    bson_util,
    cmap::{Command, RawCommandResponse, StreamDescription},
    error::{BulkWriteFailure, Error, ErrorKind, Result},
    operation::{append_options, OperationWithDefaults, Retryability, WriteResponseBody, COMMAND_OVERHEAD_SIZE},
    options::{InsertManyOptions, WriteConcern},
    results::InsertManyResult,
    Namespace,
};

/// One batch-bounded `insert` command over a slice of the caller's documents.
#[derive(Debug)]
pub(crate) struct Insert {
    ns: Namespace,
    documents: Vec<Document>,
    inserted_ids: Vec<Bson>,
    options: Option<InsertManyOptions>,
}

impl Insert {
    pub(crate) fn new(
        ns: Namespace,
        documents: Vec<Document>,
        options: Option<InsertManyOptions>,
    ) -> Self {
        Self {
            ns,
            documents,
            inserted_ids: vec![],
            options,
        }
    }

    pub(crate) fn n_attempted(&self) -> usize {
        self.inserted_ids.len()
    }

    fn is_ordered(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|options| options.ordered)
            .unwrap_or(true)
    }
}

impl OperationWithDefaults for Insert {
    type O = InsertManyResult;
    const NAME: &'static str = "insert";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        self.inserted_ids.clear();

        let max_doc_size = description.max_bson_object_size as usize;
        let max_payload_size =
            (description.max_message_size_bytes as usize).saturating_sub(COMMAND_OVERHEAD_SIZE);

        let mut docs = Vec::new();
        let mut size = 0;
        for (index, document) in self
            .documents
            .iter()
            .take(description.max_write_batch_size as usize)
            .enumerate()
        {
            // The server requires every document to carry an _id; generating
            // it driver-side lets the caller observe the ids of documents
            // that were inserted before a partial failure.
            let (document, id) = match document.get("_id") {
                Some(id) => (document.clone(), id.clone()),
                None => {
                    let id = Bson::ObjectId(ObjectId::new());
                    let mut with_id = doc! { "_id": id.clone() };
                    with_id.extend(document.clone());
                    (with_id, id)
                }
            };

            let doc_size = crate::bson::to_vec(&document)?.len();
            if doc_size > max_doc_size {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "insert document must be within {} bytes, but document provided is {} \
                         bytes",
                        max_doc_size, doc_size
                    ),
                }
                .into());
            }

            let entry_size = bson_util::array_entry_size_bytes(index, doc_size);
            if !docs.is_empty() && size + entry_size > max_payload_size {
                break;
            }
            size += entry_size;
            docs.push(document);
            self.inserted_ids.push(id);
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "documents": docs,
        };
        append_options(&mut body, self.options.as_ref())?;
        if !body.contains_key("ordered") {
            body.insert("ordered", true);
        }
        if let Some(ref write_concern) = self.write_concern() {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document()?);
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

        let mut inserted_ids = std::collections::HashMap::new();
        if self.is_ordered() {
            // in ordered inserts, only the first n statements were attempted
            for (index, id) in self.inserted_ids.iter().enumerate().take(body.n as usize) {
                inserted_ids.insert(index, id.clone());
            }
        } else {
            // for unordered, all statements were attempted; remove the ones
            // with associated write errors
            for (index, id) in self.inserted_ids.iter().enumerate() {
                inserted_ids.insert(index, id.clone());
            }
            if let Some(ref write_errors) = body.write_errors {
                for error in write_errors {
                    inserted_ids.remove(&error.index);
                }
            }
        }

        if body.write_errors.is_some() || body.write_concern_error.is_some() {
            return Err(Error::new(
                ErrorKind::BulkWrite(BulkWriteFailure {
                    write_errors: body.write_errors.clone(),
                    write_concern_error: body.write_concern_error.clone(),
                    inserted_ids,
                }),
                body.labels.clone(),
            ));
        }

        Ok(InsertManyResult { inserted_ids })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}
