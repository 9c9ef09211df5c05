//! Line codec for the delimiter-separated link files.
//!
//! One record per line, four fields separated by the ASCII unit separator
//! (`0x1F`): title, description, url, publication timestamp. Text never needs
//! escaping as long as it contains neither the separator nor a newline.

use thiserror::Error;

use crate::domain::link::Link;

pub const FIELD_DELIMITER: char = '\u{1f}';
pub const RECORD_TERMINATOR: char = '\n';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("expected 4 fields, found {found}")]
    FieldCount { found: usize },
    #[error("publication timestamp `{0}` is not an integer")]
    Timestamp(String),
    #[error("field `{field}` contains a reserved delimiter")]
    ReservedCharacter { field: &'static str },
}

/// Encode a link as one terminated record.
pub fn encode(link: &Link) -> Result<String, RecordError> {
    let fields = [
        ("title", link.title.as_str()),
        ("description", link.description.as_str()),
        ("url", link.url.as_str()),
    ];
    for (field, value) in fields {
        if value.contains([FIELD_DELIMITER, RECORD_TERMINATOR, '\r']) {
            return Err(RecordError::ReservedCharacter { field });
        }
    }

    let mut line = String::with_capacity(
        link.title.len() + link.description.len() + link.url.len() + 24,
    );
    line.push_str(&link.title);
    line.push(FIELD_DELIMITER);
    line.push_str(&link.description);
    line.push(FIELD_DELIMITER);
    line.push_str(&link.url);
    line.push(FIELD_DELIMITER);
    line.push_str(&link.publication_date.to_string());
    line.push(RECORD_TERMINATOR);
    Ok(line)
}

/// Encode a batch in order, concatenated.
pub fn encode_all<'a, I>(links: I) -> Result<String, RecordError>
where
    I: IntoIterator<Item = &'a Link>,
{
    let mut out = String::new();
    for link in links {
        out.push_str(&encode(link)?);
    }
    Ok(out)
}

/// Decode a single line (without its terminator).
pub fn decode(line: &str) -> Result<Link, RecordError> {
    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    let [title, description, url, timestamp] = fields.as_slice() else {
        return Err(RecordError::FieldCount {
            found: fields.len(),
        });
    };

    let publication_date = timestamp
        .trim()
        .parse::<i64>()
        .map_err(|_| RecordError::Timestamp((*timestamp).to_string()))?;

    Ok(Link::new(*title, *description, *url, publication_date))
}
