//! The middleware surface.
//!
//! [`Handler`] is the seam between the transport and application code: it
//! receives a request and answers with a response. [`BodyHandler`] is a
//! `Handler` over raw request bodies that ingests the body, hands a
//! `Request<RequestBody>` to the handler it wraps and turns ingestion failures
//! into error responses.
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use micro_body::handler::{make_handler, BodyHandler};
//! use micro_body::{BodyConfig, RequestBody};
//!
//! async fn upload(req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     let count = req.body().file_uploads().len();
//!     Ok(Response::new(Full::from(format!("received {count} files"))))
//! }
//!
//! let config = BodyConfig::builder().body_limit(10 * 1024 * 1024).build();
//! let handler = BodyHandler::new(config, make_handler(upload));
//! ```

use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{Either, Full};
use tracing::{error, info};

use crate::BodyError;
use crate::accumulator::BodyAccumulator;
use crate::config::BodyConfig;
use crate::request_body::RequestBody;
use crate::upload::UploadGuard;

/// An async request handler.
///
/// Application code implements it over `RequestBody` to receive ingested
/// requests, and [`BodyHandler`] implements it over raw transport bodies, so a
/// `BodyHandler` can be mounted wherever a handler is expected.
#[async_trait]
pub trait Handler<ReqBody> {
    type RespBody: Body;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error>;
}

/// A [`Handler`] backed by an async function.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<ReqBody, RespBody, Err, F, Fut> Handler<ReqBody> for HandlerFn<F>
where
    RespBody: Body,
    ReqBody: Send + 'static,
    F: Fn(Request<ReqBody>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<RespBody>, Err>> + Send,
{
    type RespBody = RespBody;
    type Error = Err;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        (self.f)(req).await
    }
}

/// Turns an async function into a [`Handler`], typically the one wrapped by a
/// [`BodyHandler`].
pub fn make_handler<F, ReqBody, RespBody, Err, Ret>(f: F) -> HandlerFn<F>
where
    RespBody: Body,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Ret: Future<Output = Result<Response<RespBody>, Err>>,
    F: Fn(Request<ReqBody>) -> Ret,
{
    HandlerFn { f }
}

/// Ingests request bodies before calling the wrapped handler.
///
/// Failures never escape as errors, they become responses:
///
/// - ingestion errors answer with [`BodyError::status_code`]
/// - errors of the wrapped handler are logged and answer `500`
///
/// Uploaded files are deleted after the wrapped handler completes, whatever
/// its outcome, when the configuration asks for it.
#[derive(Debug)]
pub struct BodyHandler<H> {
    config: Arc<BodyConfig>,
    handler: H,
}

impl<H> BodyHandler<H> {
    pub fn new(config: BodyConfig, handler: H) -> Self {
        Self::with_shared_config(Arc::new(config), handler)
    }

    pub fn with_shared_config(config: Arc<BodyConfig>, handler: H) -> Self {
        Self { config, handler }
    }

    pub fn config(&self) -> &BodyConfig {
        &self.config
    }

    async fn ingest<B>(&self, req: Request<B>) -> Result<Request<RequestBody>, BodyError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let accumulator = BodyAccumulator::new(Arc::clone(&self.config), &parts)?;
        let request_body = accumulator.ingest(body).await?;
        Ok(Request::from_parts(parts, request_body))
    }
}

#[async_trait]
impl<B, H> Handler<B> for BodyHandler<H>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn Error + Send + Sync>> + Send,
    H: Handler<RequestBody> + Send + Sync,
    H::RespBody: Body<Data = Bytes> + Send,
    <H::RespBody as Body>::Error: Into<Box<dyn Error + Send + Sync>>,
    H::Error: Send,
{
    type RespBody = Either<H::RespBody, Full<Bytes>>;
    type Error = Infallible;

    async fn call(&self, req: Request<B>) -> Result<Response<Self::RespBody>, Self::Error> {
        let req = match self.ingest(req).await {
            Ok(req) => req,
            Err(e) => return Ok(error_response(&e).map(Either::Right)),
        };

        // an armed guard also covers the wrapped handler being cancelled
        let guard = self
            .config
            .delete_uploaded_files_on_end()
            .then(|| UploadGuard::adopt(req.body().file_uploads()));

        let result = self.handler.call(req).await;

        if let Some(guard) = guard {
            guard.release(true).await;
        }

        match result {
            Ok(response) => Ok(response.map(Either::Left)),
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "handler failed after request body ingestion");
                Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()))
            }
        }
    }
}

fn error_response(e: &BodyError) -> Response<Full<Bytes>> {
    let status = e.status_code();
    if status.is_server_error() {
        error!(cause = %e, status = status.as_u16(), "request body ingestion failed");
    } else {
        info!(cause = %e, status = status.as_u16(), "reject request body");
    }

    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from_static(reason.as_bytes())));
    *response.status_mut() = status;
    response
}

fn status_response<L>(status: StatusCode, body: Bytes) -> Response<Either<L, Full<Bytes>>> {
    let mut response = Response::new(Either::Right(Full::new(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn echo(req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, Infallible> {
        let body = req.body().body().cloned().unwrap_or_default();
        Ok(Response::new(Full::new(body)))
    }

    async fn failing(_req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, std::io::Error> {
        Err(std::io::Error::other("boom"))
    }

    fn post(body: &'static str) -> Request<Full<Bytes>> {
        Request::post("/").body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap()
    }

    #[tokio::test]
    async fn passes_body_through() {
        let handler = BodyHandler::new(BodyConfig::default(), make_handler(echo));

        let response = handler.call(post("hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "hello");
    }

    #[tokio::test]
    async fn too_large() {
        let handler = BodyHandler::new(BodyConfig::builder().body_limit(3).build(), make_handler(echo));

        let response = handler.call(post("hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn handler_failure_is_500() {
        let handler = BodyHandler::new(BodyConfig::default(), make_handler(failing));

        let response = handler.call(post("hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
