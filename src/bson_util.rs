use crate::{
    bson::{Bson, Document},
    error::{ErrorKind, Result},
};

/// Coerce numeric types into an `i64` if it would be lossless to do so. If
/// this Bson is not numeric or the conversion would be lossy (e.g. 1.5), this
/// returns `None`.
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

/// The `RawBsonRef` analogue of [`get_int`].
pub(crate) fn get_int_raw(val: crate::bson::RawBsonRef<'_>) -> Option<i64> {
    match val {
        crate::bson::RawBsonRef::Int32(i) => get_int(&Bson::Int32(i)),
        crate::bson::RawBsonRef::Int64(i) => get_int(&Bson::Int64(i)),
        crate::bson::RawBsonRef::Double(f) => get_int(&Bson::Double(f)),
        _ => None,
    }
}

/// Returns the name of the first key in the document, i.e. the command name
/// for a command document or the stage name for an aggregation stage.
pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

pub(crate) fn to_bson_array(docs: &[Document]) -> Bson {
    Bson::Array(docs.iter().map(|doc| Bson::Document(doc.clone())).collect())
}

pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    match first_key(update) {
        Some(key) if !key.starts_with('$') => Err(ErrorKind::InvalidArgument {
            message: "update document must only contain update modifiers".to_string(),
        }
        .into()),
        None => Err(ErrorKind::InvalidArgument {
            message: "update document must not be empty".to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// The number of bytes a document contributes to a BSON array: a one-byte
/// element type, the decimal index string with its trailing null, and the
/// document itself.
pub(crate) fn array_entry_size_bytes(index: usize, doc_len: usize) -> usize {
    1 + num_decimal_digits(index) + 1 + doc_len
}

fn num_decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
pub(crate) fn sort_document(document: &mut Document) {
    let temp = std::mem::take(document);
    let mut entries: Vec<_> = temp.into_iter().collect();
    entries.sort_by(|e1, e2| e1.0.cmp(&e2.0));
    document.extend(entries);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bson::bson;

    #[test]
    fn get_int_coerces_lossless_doubles() {
        assert_eq!(get_int(&bson!(500.0)), Some(500));
        assert_eq!(get_int(&bson!(500.5)), None);
        assert_eq!(get_int(&bson!(5_i32)), Some(5));
        assert_eq!(get_int(&bson!("5")), None);
    }

    #[test]
    fn array_entry_size() {
        assert_eq!(array_entry_size_bytes(0, 10), 13);
        assert_eq!(array_entry_size_bytes(10, 10), 14);
        assert_eq!(array_entry_size_bytes(100, 10), 15);
    }
}
