use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use parley_chat_client::{
    ChatClient, ChatClientConfig, HttpAuthTransport, SendMessageRequest, StreamOutcome,
};
use parley_client_core::token::{now_unix, refresh_delay, token_expiry};
use parley_client_core::{
    AuthRetryPolicy, AuthSessionManager, LoginNavigator, TokenRefreshScheduler, login_url,
    normalize_base_url, resolve_api_base_url,
};
use tokio_util::sync::CancellationToken;

use crate::store::{FileAuthStateStore, resolve_session_path};
use crate::{Commands, ParleyCli};

type Session = AuthSessionManager<HttpAuthTransport, FileAuthStateStore>;

struct CliContext {
    base_url: String,
    client: ChatClient,
    session: Arc<Session>,
}

/// A terminal cannot navigate, so the login page is logged instead.
struct LogLoginNavigator {
    login_url: String,
}

impl LoginNavigator for LogLoginNavigator {
    fn redirect_to_login(&self) {
        tracing::warn!(login_url = %self.login_url, "session expired; sign in again");
    }
}

pub async fn run(cli: ParleyCli) -> Result<()> {
    let context = build_context(&cli)?;
    match cli.command {
        Commands::Send {
            conversation_id,
            message,
        } => send(&context, &conversation_id, &message).await,
        Commands::Conversations => conversations(&context).await,
        Commands::Refresh => refresh(&context).await,
        Commands::Token => token(&context),
        Commands::Watch { interval } => watch(&context, interval).await,
        Commands::Logout => logout(&context).await,
    }
}

fn build_context(cli: &ParleyCli) -> Result<CliContext> {
    let base_url = match cli.base_url.as_deref() {
        Some(raw) => normalize_base_url(raw).context("invalid --base-url")?,
        None => {
            let (base_url, source) = resolve_api_base_url().context("resolve api base url")?;
            tracing::debug!(base_url = %base_url, source, "resolved api base url");
            base_url
        }
    };
    let session_path =
        resolve_session_path(cli.session_file.as_deref()).context("resolve session file")?;
    tracing::debug!(path = %session_path.display(), "using session file");

    let client =
        ChatClient::new(ChatClientConfig::new(&base_url)).context("build chat client")?;
    let transport = HttpAuthTransport::for_client(&client).context("build auth transport")?;
    let session = Arc::new(AuthSessionManager::new(
        transport,
        FileAuthStateStore::new(session_path),
    ));

    Ok(CliContext {
        base_url,
        client,
        session,
    })
}

fn cancel_on_ctrl_c(cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    })
}

async fn send(context: &CliContext, conversation_id: &str, message: &str) -> Result<()> {
    let access_token = context.session.access_token();
    let cancel = CancellationToken::new();
    let ctrl_c = cancel_on_ctrl_c(&cancel);

    let stdout = std::io::stdout();
    let mut write_failure = None;
    let mut stream_failure = None;
    let outcome = context
        .client
        .send_message_stream(
            SendMessageRequest {
                conversation_id,
                content: message,
                access_token: access_token.as_deref(),
            },
            |event| {
                if write_failure.is_some() {
                    return;
                }
                if let Err(error) = writeln!(stdout.lock(), "{}", event.to_value()) {
                    write_failure = Some(error);
                    cancel.cancel();
                }
            },
            |error| stream_failure = Some(error),
            &cancel,
        )
        .await;
    ctrl_c.abort();

    if let Some(error) = write_failure {
        return Err(error).context("write event to stdout");
    }
    match outcome {
        StreamOutcome::Failed => Err(anyhow!(
            stream_failure.unwrap_or_else(|| "send failed".to_string())
        )),
        StreamOutcome::Cancelled => {
            tracing::info!(conversation_id, "send cancelled");
            Ok(())
        }
        StreamOutcome::Completed | StreamOutcome::Terminated => Ok(()),
    }
}

async fn conversations(context: &CliContext) -> Result<()> {
    let navigator = LogLoginNavigator {
        login_url: login_url(&context.base_url),
    };
    let client = &context.client;
    let session = &context.session;

    let result = AuthRetryPolicy::new(session.as_ref(), &navigator)
        .run(|| {
            let access_token = session.access_token();
            async move { client.list_conversations(access_token.as_deref()).await }
        })
        .await;

    let conversations = result
        .into_result()
        .map_err(|message| anyhow!(message))?
        .unwrap_or_default();

    let mut stdout = std::io::stdout().lock();
    if conversations.is_empty() {
        writeln!(stdout, "no conversations")?;
    }
    for conversation in conversations {
        writeln!(
            stdout,
            "{}\t{}",
            conversation.id,
            conversation.title.as_deref().unwrap_or("(untitled)")
        )?;
    }
    Ok(())
}

async fn refresh(context: &CliContext) -> Result<()> {
    let state = context.session.refresh().await.context("refresh session")?;
    let mut stdout = std::io::stdout().lock();
    match token_expiry(&state.access_token) {
        Some(expires_at) => writeln!(
            stdout,
            "session refreshed; access token expires in {}s",
            expires_at - now_unix()
        )?,
        None => writeln!(stdout, "session refreshed")?,
    }
    Ok(())
}

fn token(context: &CliContext) -> Result<()> {
    let Some(access_token) = context.session.access_token() else {
        bail!("no stored session; sign in at {}", login_url(&context.base_url));
    };

    let mut stdout = std::io::stdout().lock();
    let Some(expires_at) = token_expiry(&access_token) else {
        writeln!(stdout, "access token carries no expiry; no proactive refresh")?;
        return Ok(());
    };

    let now = now_unix();
    let expires = chrono::DateTime::from_timestamp(expires_at, 0)
        .map_or_else(|| expires_at.to_string(), |at| at.to_rfc3339());
    writeln!(stdout, "expires_at: {expires}")?;
    writeln!(stdout, "remaining: {}s", expires_at - now)?;
    match refresh_delay(&access_token, now) {
        Some(delay) => writeln!(stdout, "refresh_in: {}s", delay.as_secs())?,
        None => writeln!(stdout, "refresh_in: expired")?,
    }
    Ok(())
}

async fn watch(context: &CliContext, interval_secs: u64) -> Result<()> {
    if context.session.access_token().is_none() {
        bail!("no stored session; sign in at {}", login_url(&context.base_url));
    }

    let scheduler = TokenRefreshScheduler::new(Arc::clone(&context.session));
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for ctrl-c")?;
                break;
            }
            _ = ticker.tick() => {
                let state = scheduler.schedule();
                tracing::info!(?state, "refresh timer armed");
            }
        }
    }

    scheduler.cancel();
    tracing::info!("stopped watching session");
    Ok(())
}

async fn logout(context: &CliContext) -> Result<()> {
    context.session.sign_out().await.context("sign out")?;
    writeln!(std::io::stdout().lock(), "signed out")?;
    Ok(())
}
