//! Request body ingestion.
//!
//! [`BodyAccumulator`] consumes the body of one request and produces a
//! [`RequestBody`]. The content type decides how the bytes are treated:
//!
//! - `multipart/form-data` is decoded while streaming, attribute parts end up
//!   in the form attributes and file parts in the uploads directory
//! - `application/x-www-form-urlencoded` is buffered, then decoded into form
//!   attributes
//! - anything else is buffered as is
//!
//! Every frame goes through the [`LimitEnforcer`] before anything else looks at
//! it. Whatever the outcome, an ingestion that does not return `Ok` leaves no
//! backing file behind.

use std::error::Error;
use std::mem;
use std::pin::pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method};
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http_body::Body;
use http_body_util::BodyExt;
use mime::Mime;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::charset::Charset;
use crate::codec::{MultipartDecoder, MultipartItem, PartHeader, parse_boundary};
use crate::config::BodyConfig;
use crate::form::{decode_form, decode_query};
use crate::limit::{DeclaredLength, LimitEnforcer};
use crate::multimap::MultiMap;
use crate::request_body::RequestBody;
use crate::upload::{FileUpload, PartHandle, UploadManager};
use crate::utils::ensure;
use crate::BodyError;

/// How a request body is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Raw,
    FormUrlEncoded,
    Multipart { boundary: String },
}

impl BodyKind {
    /// Classifies a request by its `Content-Type`, returning the kind and the
    /// declared charset if any.
    pub fn classify(content_type: Option<&Mime>) -> Result<(BodyKind, Option<Charset>), BodyError> {
        let Some(mime) = content_type else {
            return Ok((BodyKind::Raw, None));
        };

        let charset = mime
            .params()
            .find(|(name, _)| name.as_str().eq_ignore_ascii_case("charset"))
            .and_then(|(_, value)| Charset::from_label(value.as_str()));

        let type_ = mime.type_().as_str();
        let subtype = mime.subtype().as_str();

        let kind = if type_.eq_ignore_ascii_case("multipart") && subtype.eq_ignore_ascii_case("form-data") {
            BodyKind::Multipart { boundary: parse_boundary(mime)? }
        } else if type_.eq_ignore_ascii_case("application") && subtype.eq_ignore_ascii_case("x-www-form-urlencoded") {
            BodyKind::FormUrlEncoded
        } else {
            BodyKind::Raw
        };

        Ok((kind, charset))
    }
}

/// Ingests the body of a single request.
#[derive(Debug)]
pub struct BodyAccumulator {
    config: Arc<BodyConfig>,
    kind: BodyKind,
    charset: Option<Charset>,
    declared: DeclaredLength,
    method_has_body: bool,
    query: MultiMap,
}

impl BodyAccumulator {
    /// Prepares ingestion for the request described by `parts`.
    ///
    /// Fails with `MalformedBody` when the request is multipart but carries no
    /// usable boundary, or when a form content type cannot be parsed.
    pub fn new(config: Arc<BodyConfig>, parts: &Parts) -> Result<Self, BodyError> {
        let content_type = content_type(&parts.headers)?;
        let (kind, charset) = BodyKind::classify(content_type.as_ref())?;

        Ok(Self {
            config,
            kind,
            charset,
            declared: DeclaredLength::from_headers(&parts.headers),
            method_has_body: method_has_body(&parts.method),
            query: parts.uri.query().map(decode_query).unwrap_or_default(),
        })
    }

    pub fn kind(&self) -> &BodyKind {
        &self.kind
    }

    /// Consumes `body` until its end and produces the decoded request body.
    ///
    /// On error every backing file created so far has been deleted. Dropping
    /// the returned future before completion deletes them too.
    pub async fn ingest<B>(self, body: B) -> Result<RequestBody, BodyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let limit = LimitEnforcer::new(self.config.body_limit());
        limit.check_declared(self.declared, body.size_hint().exact())?;

        let body = pin!(body);
        let boundary = match &self.kind {
            BodyKind::Multipart { boundary } => Some(boundary.clone()),
            BodyKind::FormUrlEncoded | BodyKind::Raw => None,
        };

        match boundary {
            Some(boundary) => self.ingest_multipart(body, limit, &boundary).await,
            None => self.ingest_buffered(body, limit).await,
        }
    }

    async fn ingest_buffered<B>(self, mut body: B, mut limit: LimitEnforcer) -> Result<RequestBody, BodyError>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let mut buffer = BytesMut::with_capacity(self.config.initial_capacity(self.declared.known()));

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(client_aborted)?;
            if let Ok(data) = frame.into_data() {
                limit.admit(data.len())?;
                buffer.extend_from_slice(&data);
            }
        }

        let raw = buffer.freeze();
        debug!(size = raw.len(), kind = ?self.kind, "request body received");

        let form_attributes = match self.kind {
            BodyKind::FormUrlEncoded => {
                decode_form(&raw, self.charset.unwrap_or_default(), self.config.max_form_attribute_size())?
            }
            _ => MultiMap::new(),
        };

        let raw_body = if raw.is_empty() && !self.method_has_body { None } else { Some(raw) };
        Ok(self.finish(raw_body, form_attributes, Vec::new()))
    }

    async fn ingest_multipart<B>(self, mut body: B, mut limit: LimitEnforcer, boundary: &str) -> Result<RequestBody, BodyError>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let manager = self.config.handle_file_uploads().then(|| UploadManager::new(self.config.uploads_directory()));
        let mut sink = PartSink {
            manager,
            current: CurrentPart::Idle,
            attributes: MultiMap::new(),
            uploads: Vec::new(),
            charset: self.charset.unwrap_or_default(),
            max_attribute_size: self.config.max_form_attribute_size(),
        };
        let mut decoder = MultipartDecoder::new(boundary);

        match drive_multipart(&mut body, &mut limit, &mut decoder, &mut sink).await {
            Ok(()) => {
                let (attributes, uploads) = sink.finish().await;
                debug!(size = limit.bytes_read(), attributes = attributes.len(), uploads = uploads.len(), "multipart body received");
                Ok(self.finish(None, attributes, uploads))
            }
            Err(e) => {
                debug!(cause = %e, "multipart ingestion failed");
                sink.abort().await;
                Err(e)
            }
        }
    }

    fn finish(self, body: Option<Bytes>, form_attributes: MultiMap, file_uploads: Vec<FileUpload>) -> RequestBody {
        let mut params = self.query;
        if self.config.merge_form_attributes() {
            params.append(&form_attributes);
        }

        RequestBody::new(body, form_attributes, params, file_uploads, self.charset)
    }
}

/// Reads the request `Content-Type`.
///
/// A value that does not parse is ignored, the body is then kept raw, unless it
/// names one of the form types: those cannot be decoded without their
/// parameters.
fn content_type(headers: &HeaderMap) -> Result<Option<Mime>, BodyError> {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return Ok(None);
    };

    let value = String::from_utf8_lossy(value.as_bytes());
    match value.parse::<Mime>() {
        Ok(mime) => Ok(Some(mime)),
        Err(e) => {
            let essence = value.split(';').next().unwrap_or_default().trim();
            ensure!(
                !FORM_TYPES.iter().any(|form| essence.eq_ignore_ascii_case(form)),
                BodyError::malformed(format!("invalid content type {value:?}: {e}"))
            );
            debug!(content_type = %value, cause = %e, "unparseable content type, keep body raw");
            Ok(None)
        }
    }
}

const FORM_TYPES: [&str; 2] = ["multipart/form-data", "application/x-www-form-urlencoded"];

/// Methods that are not expected to carry a body.
fn method_has_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::CONNECT)
}

fn client_aborted<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> BodyError {
    let e: Box<dyn Error + Send + Sync> = e.into();
    warn!(cause = %e, "client aborted while sending request body");
    BodyError::client_aborted(e)
}

async fn drive_multipart<B>(
    body: &mut B,
    limit: &mut LimitEnforcer,
    decoder: &mut MultipartDecoder,
    sink: &mut PartSink,
) -> Result<(), BodyError>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<Box<dyn Error + Send + Sync>>,
{
    let mut buffer = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(client_aborted)?;
        let Ok(data) = frame.into_data() else {
            continue;
        };

        limit.admit(data.len())?;
        if decoder.is_finished() {
            // the epilogue still counts toward the limit
            continue;
        }

        buffer.extend_from_slice(&data);
        while let Some(item) = decoder.decode(&mut buffer)? {
            sink.accept(item).await?;
        }
    }

    while !decoder.is_finished() {
        match decoder.decode_eof(&mut buffer)? {
            Some(item) => sink.accept(item).await?,
            None => break,
        }
    }

    Ok(())
}

#[derive(Debug)]
enum CurrentPart {
    Idle,
    Attribute { header: PartHeader, value: BytesMut },
    File(PartHandle),
    /// file part received while file uploads are disabled
    Discard,
}

/// Routes decoded multipart items to form attributes or backing files.
#[derive(Debug)]
struct PartSink {
    manager: Option<UploadManager>,
    current: CurrentPart,
    attributes: MultiMap,
    uploads: Vec<FileUpload>,
    charset: Charset,
    max_attribute_size: Option<u64>,
}

impl PartSink {
    async fn accept(&mut self, item: MultipartItem) -> Result<(), BodyError> {
        match item {
            MultipartItem::PartStart(header) => self.start(header).await,
            MultipartItem::PartChunk(bytes) => self.chunk(bytes).await,
            MultipartItem::PartEnd => self.end().await,
            MultipartItem::Finished => {
                trace!("multipart terminal boundary");
                Ok(())
            }
        }
    }

    async fn start(&mut self, header: PartHeader) -> Result<(), BodyError> {
        self.current = match (&mut self.manager, header.is_file()) {
            (Some(manager), true) => CurrentPart::File(manager.begin_part(&header).await?),
            (None, true) => {
                debug!(name = header.name(), "file uploads disabled, discard file part");
                CurrentPart::Discard
            }
            (_, false) => CurrentPart::Attribute { header, value: BytesMut::new() },
        };
        Ok(())
    }

    async fn chunk(&mut self, bytes: Bytes) -> Result<(), BodyError> {
        match &mut self.current {
            CurrentPart::Attribute { value, .. } => {
                if let Some(max) = self.max_attribute_size {
                    ensure!(
                        (value.len() + bytes.len()) as u64 <= max,
                        BodyError::malformed("form attribute size exceed allowed maximum capacity")
                    );
                }
                value.extend_from_slice(&bytes);
            }
            CurrentPart::File(handle) => {
                if let Some(manager) = &self.manager {
                    manager.write(handle, &bytes).await?;
                }
            }
            CurrentPart::Discard | CurrentPart::Idle => {}
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), BodyError> {
        match mem::replace(&mut self.current, CurrentPart::Idle) {
            CurrentPart::Attribute { header, value } => {
                let charset = header.charset().unwrap_or(self.charset);
                let value = charset.decode(&value).into_owned();
                trace!(name = header.name(), size = value.len(), "decoded multipart attribute");
                self.attributes.add(header.name(), value);
            }
            CurrentPart::File(handle) => {
                if let Some(manager) = &mut self.manager {
                    self.uploads.push(manager.end_part(handle).await?);
                }
            }
            CurrentPart::Discard | CurrentPart::Idle => {}
        }
        Ok(())
    }

    /// Hands over the decoded attributes and the completed uploads.
    async fn finish(self) -> (MultiMap, Vec<FileUpload>) {
        if let Some(manager) = self.manager {
            // the upload records now own their files
            manager.into_guard().release(false).await;
        }
        (self.attributes, self.uploads)
    }

    /// Removes every file created for the request, the one being written included.
    async fn abort(&mut self) {
        let Some(manager) = &mut self.manager else {
            return;
        };

        if let CurrentPart::File(handle) = mem::replace(&mut self.current, CurrentPart::Idle) {
            manager.abort_part(handle).await;
        }

        let deleted = manager.delete_all().await;
        debug!(deleted = deleted, "deleted uploaded files of failed request");
    }
}
