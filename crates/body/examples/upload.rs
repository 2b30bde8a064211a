use std::convert::Infallible;
use std::io;

use bytes::Bytes;
use futures::stream;
use http::{Request, Response};
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use micro_body::handler::{BodyHandler, Handler, make_handler};
use micro_body::{BodyConfig, RequestBody};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const BOUNDARY: &str = "micro-body-example";

async fn show_upload(req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = req.body();
    for (name, value) in body.params().iter() {
        info!(name = name, value = value, "param");
    }
    for upload in body.file_uploads() {
        info!(
            name = upload.name(),
            file_name = upload.file_name(),
            size = upload.size(),
            path = ?upload.uploaded_file_name(),
            "file upload"
        );
    }

    Ok(Response::new(Full::from(format!("received {} files\r\n", body.file_uploads().len()))))
}

fn multipart_frames() -> Vec<Result<Frame<Bytes>, io::Error>> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         holiday pictures\r\n\
         --{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"picture\"; filename=\"beach.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         pretend this is a picture of a beach\r\n\
         --{BOUNDARY}--\r\n"
    );

    // split like a transport would
    body.into_bytes().chunks(16).map(|chunk| Ok(Frame::data(Bytes::copy_from_slice(chunk)))).collect()
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let uploads = std::env::temp_dir().join("micro-body-uploads");
    let config = BodyConfig::builder()
        .uploads_directory(&uploads)
        .body_limit(1024 * 1024)
        .delete_uploaded_files_on_end(true)
        .build();
    let handler = BodyHandler::new(config, make_handler(show_upload));

    let request = Request::post("/albums?owner=zava")
        .header(http::header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(StreamBody::new(stream::iter(multipart_frames())))
        .expect("request should be valid");

    let Ok(response) = handler.call(request).await;
    info!(status = %response.status(), "handled request");

    match response.into_body().collect().await {
        Ok(collected) => info!(body = ?collected.to_bytes(), "response body"),
        Err(e) => error!(cause = %e, "failed to read response body"),
    }
}
