//! The ingested body as seen by handlers.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::charset::Charset;
use crate::multimap::{MultiMap, Params};
use crate::upload::FileUpload;
use crate::utils::ensure;
use crate::BodyError;

/// Everything ingestion produced for one request.
///
/// A raw body is kept for every content type except multipart. Requests whose
/// method carries no body and that received no byte have no raw body at all,
/// which is different from a zero-length body.
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    body: Option<Bytes>,
    form_attributes: MultiMap,
    params: Params,
    file_uploads: Vec<FileUpload>,
    charset: Option<Charset>,
}

impl RequestBody {
    pub(crate) fn new(
        body: Option<Bytes>,
        form_attributes: MultiMap,
        params: MultiMap,
        file_uploads: Vec<FileUpload>,
        charset: Option<Charset>,
    ) -> Self {
        Self { body, form_attributes, params: params.into(), file_uploads, charset }
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Attributes decoded from a url-encoded or multipart body.
    pub fn form_attributes(&self) -> &MultiMap {
        &self.form_attributes
    }

    /// Query parameters, followed by the form attributes when merging is enabled.
    ///
    /// A lookup by name returns the query value when both carry the name.
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn file_uploads(&self) -> &[FileUpload] {
        &self.file_uploads
    }

    /// The charset declared by the request `Content-Type`.
    pub fn charset(&self) -> Option<Charset> {
        self.charset
    }

    /// Length of the raw body, zero when there is none.
    pub fn len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the raw body with the request charset, UTF-8 when undeclared.
    pub fn as_string(&self) -> Option<String> {
        self.as_string_with(self.charset.unwrap_or_default())
    }

    pub fn as_string_with(&self, charset: Charset) -> Option<String> {
        self.body.as_ref().map(|body| charset.decode(body).into_owned())
    }

    /// Parses the raw body as JSON, rejecting nesting deeper than `max_depth`.
    ///
    /// Returns `None` when there is no body or it is empty.
    pub fn json_value(&self, max_depth: usize) -> Result<Option<Value>, BodyError> {
        let Some(body) = self.body.as_ref().filter(|body| !body.is_empty()) else {
            return Ok(None);
        };

        check_json_depth(body, max_depth)?;
        serde_json::from_slice(body).map(Some).map_err(|e| BodyError::malformed(format!("invalid json body: {e}")))
    }

    /// Like [`RequestBody::json_value`] but the top level value must be an object.
    pub fn json_object(&self, max_depth: usize) -> Result<Option<Map<String, Value>>, BodyError> {
        match self.json_value(max_depth)? {
            None => Ok(None),
            Some(Value::Object(object)) => Ok(Some(object)),
            Some(_) => Err(BodyError::malformed("json body is not an object")),
        }
    }

    /// Deserializes the raw body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        let body = self.body.as_deref().unwrap_or_default();
        serde_json::from_slice(body).map_err(|e| BodyError::malformed(format!("invalid json body: {e}")))
    }

    /// Deserializes the form attributes into `T`.
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, BodyError> {
        let encoded = serde_urlencoded::to_string(&self.form_attributes).map_err(BodyError::malformed)?;
        serde_urlencoded::from_str(&encoded).map_err(BodyError::malformed)
    }
}

/// Fails when arrays and objects in `bytes` nest deeper than `max_depth`.
///
/// Brackets inside strings are ignored. The scan does not validate the JSON,
/// the parser that runs afterwards does.
fn check_json_depth(bytes: &[u8], max_depth: usize) -> Result<(), BodyError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &b in bytes {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                ensure!(depth <= max_depth, BodyError::structure_too_deep(max_depth));
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    Ok(())
}
