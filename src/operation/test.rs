use crate::{
    bson::{doc, Document},
    bson_util,
    cmap::RawCommandResponse,
    options::ServerAddress,
    Namespace,
};

pub(crate) fn raw_response(body: Document) -> RawCommandResponse {
    RawCommandResponse::with_document_and_address(ServerAddress::default(), body).unwrap()
}

pub(crate) fn cursor_response(
    id: i64,
    ns: &Namespace,
    first_batch: Vec<Document>,
) -> RawCommandResponse {
    raw_response(doc! {
        "cursor": {
            "id": id,
            "ns": ns.to_string(),
            "firstBatch": bson_util::to_bson_array(&first_batch),
        },
        "ok": 1,
    })
}

pub(crate) fn ok_response(mut body: Document) -> RawCommandResponse {
    if !body.contains_key("ok") {
        body.insert("ok", 1);
    }
    raw_response(body)
}
