//! Request gateway: GraphQL over HTTP `POST`.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::transport::message::OperationPayload;
use crate::transport::server::ServerState;

pub type HttpResponse = Response<Full<Bytes>>;

/// Execute the operation in the request body with a fresh execution context.
pub async fn execute(req: Request<Incoming>, state: &ServerState) -> HttpResponse {
    let limit = state.settings().transport.max_body_bytes;
    let body = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
        Err(e) => {
            return error(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
            );
        }
    };

    let payload: OperationPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "malformed request body");
            return error(StatusCode::BAD_REQUEST, &format!("malformed request: {e}"));
        }
    };

    let request = payload.into_request().data(state.context());
    let response = state.schema().execute(request).await;
    json(StatusCode::OK, &response)
}

pub fn not_found() -> HttpResponse {
    error(StatusCode::NOT_FOUND, "not found")
}

pub fn method_not_allowed() -> HttpResponse {
    let mut response = error(StatusCode::METHOD_NOT_ALLOWED, "use POST or a websocket upgrade");
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST"));
    response
}

/// `{"errors": [{"message": ...}]}` with `status`.
pub fn error(status: StatusCode, message: &str) -> HttpResponse {
    json(status, &json!({ "errors": [{ "message": message }] }))
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes)));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            warn!(error = %e, "failed to encode response");
            let mut response = Response::new(Full::new(Bytes::from_static(b"internal error")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
