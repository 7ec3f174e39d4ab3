//! Connection login over the reserved `$auth` method.
//!
//! The client sends an [`AuthData`] record as the single payload chunk of a
//! `$auth` request. On success the server marks the connection's
//! [`Session`](crate::Session) authenticated, which opens up every method
//! registered with [`Router::register_guarded`](crate::Router::register_guarded).

use std::sync::Arc;

use bytes::Bytes;
use wirerpc_frame::{decode_message, encode_message, AuthData, Code, Request, Response, AUTH_METHOD};

use crate::client::RequestWriter;
use crate::context::{RequestReader, ResponseWriter};
use crate::error::{Result, RpcError};
use crate::router::{BoxFuture, Handler};

const MAX_IDENTITY_LEN: usize = 128;
const MAX_CREDENTIAL_LEN: usize = 4096;

type AuthCheck = dyn Fn(&AuthData) -> std::result::Result<(), String> + Send + Sync;

/// Server handler for `$auth`.
#[derive(Clone)]
pub struct AuthHandler {
    check: Arc<AuthCheck>,
}

impl AuthHandler {
    /// Accept a login when `check` returns `Ok`; an `Err` reason is sent back
    /// as the `ReqNoAuth` message.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&AuthData) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }

    /// Accept any identity presenting `token` as its credential.
    pub fn token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(move |auth| {
            if auth.credential == token {
                Ok(())
            } else {
                Err("invalid credential".to_string())
            }
        })
    }

    async fn login(
        check: Arc<AuthCheck>,
        mut request: RequestReader,
        mut response: ResponseWriter,
    ) -> Result<()> {
        let body = request.read_to_end().await?;
        let auth: AuthData = match decode_message(&body) {
            Ok(auth) => auth,
            Err(err) => {
                return response
                    .write_response(Response::error(
                        Code::ReqBadParams,
                        format!("invalid auth data: {err}"),
                    ))
                    .await;
            }
        };
        if auth.identity.len() > MAX_IDENTITY_LEN || auth.credential.len() > MAX_CREDENTIAL_LEN {
            return response
                .write_response(Response::error(Code::ReqBadParams, "auth data too large"))
                .await;
        }

        let session = request.session();
        match check(&auth) {
            Ok(()) => {
                tracing::info!(session = session.id(), identity = %auth.identity, "login accepted");
                session.authenticate(auth.identity);
                response.write_response(Response::ok()).await
            }
            Err(reason) => {
                tracing::warn!(session = session.id(), identity = %auth.identity, %reason, "login rejected");
                response
                    .write_response(Response::error(Code::ReqNoAuth, reason))
                    .await
            }
        }
    }
}

impl Handler for AuthHandler {
    fn call(&self, request: RequestReader, response: ResponseWriter) -> BoxFuture<Result<()>> {
        Box::pin(Self::login(self.check.clone(), request, response))
    }
}

impl std::fmt::Debug for AuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHandler").finish_non_exhaustive()
    }
}

/// Log in on the connection behind `writer`.
///
/// Returns the server's Response on success and [`RpcError::AuthFailed`]
/// carrying the server's message otherwise.
pub async fn login(writer: &RequestWriter, auth: &AuthData) -> Result<Response> {
    let body = Bytes::from(encode_message(auth)?);
    let (response, _) = writer.call(Request::new(AUTH_METHOD), Some(body)).await?;
    if !response.code.is_success() {
        let reason = if response.message.is_empty() {
            response.code.as_str().to_string()
        } else {
            response.message.clone()
        };
        return Err(RpcError::AuthFailed(reason));
    }
    Ok(response)
}
