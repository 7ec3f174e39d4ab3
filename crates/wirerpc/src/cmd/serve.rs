use wirerpc_conn::{AuthHandler, PingHandler, RequestReader, ResponseWriter, Router, Server, ServerConfig};
use wirerpc_frame::{Response, AUTH_METHOD, PING_METHOD};

use crate::cmd::ServeArgs;
use crate::exit::{rpc_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

pub async fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let router = build_router(args.auth_token.as_deref());
    let mut config = ServerConfig::default();
    if let Some(max) = args.max_connections {
        config = config.with_max_connections(max);
    }
    let server = Server::with_config(router, config);

    let listener = args
        .endpoint
        .bind()
        .await
        .map_err(|err| transport_error("bind failed", err))?;
    tracing::info!(
        endpoint = %args.endpoint,
        methods = ?server.router().methods(),
        auth = args.auth_token.is_some(),
        "echo server ready"
    );

    tokio::select! {
        served = server.serve(&*listener) => {
            served.map_err(|err| rpc_error("serve failed", err))?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
            tracing::info!("interrupt received, shutting down");
            server.shutdown();
        }
    }

    Ok(SUCCESS)
}

/// `echo`, `$ping` and, with a token, `$auth` guarding `echo`.
fn build_router(auth_token: Option<&str>) -> Router {
    let mut router = Router::new();
    router.register(PING_METHOD, PingHandler);
    match auth_token {
        Some(token) => {
            router
                .register(AUTH_METHOD, AuthHandler::token(token))
                .register_guarded("echo", echo);
        }
        None => {
            router.register("echo", echo);
        }
    }
    router
}

async fn echo(mut request: RequestReader, mut response: ResponseWriter) -> wirerpc_conn::Result<()> {
    let body = request.read_to_end().await?;
    let head = request.request();
    tracing::info!(
        request_id = head.id,
        session = request.session().id(),
        size = body.len(),
        "echoing request"
    );

    let reply = Response::ok().with_message("ok");
    response
        .reply(reply, head.has_payload.then_some(body))
        .await
}
