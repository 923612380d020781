use clap::Parser;
use eyre::Context;
use panopto_captions::oauth::TokenStatus;
use panopto_captions::{AuthError, PanoptoClient, PanoptoConfig};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Exit code when authentication worked but no captions could be found.
const NO_CONTENT: u8 = 2;

/// Sessions younger than this may still have captions in processing.
const RECENT_RECORDING: Duration = Duration::from_secs(2 * 3600);

/// Fetch the captions of a Panopto session as plain text.
///
/// Connection settings come from PANOPTO_BASE_URL, PANOPTO_CLIENT_ID,
/// PANOPTO_CLIENT_SECRET, and optionally PANOPTO_TOKEN_FILE and PANOPTO_VERIFY_SSL.
#[derive(Debug, Parser)]
#[command(name = "panopto-captions", version)]
struct Args {
    /// Session to fetch captions for. Without one, only authenticates.
    session_id: Option<String>,

    /// Try the client-credentials grant before asking for browser authorization.
    #[arg(long)]
    unattended: bool,

    /// Delete saved tokens before doing anything else.
    #[arg(long)]
    clear_tokens: bool,

    /// Print the state of the saved tokens and exit.
    #[arg(long)]
    token_status: bool,

    /// Write captions to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.log_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let config = PanoptoConfig::from_env().context("load configuration")?;
    let client = PanoptoClient::from_config(config)
        .context("set up Panopto client")?
        .with_unattended(args.unattended);

    if args.clear_tokens {
        client.oauth().lock().await.clear_stored_tokens();
    }

    if args.token_status {
        print_status(&client).await;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(session_id) = args.session_id else {
        if let Err(e) = client.access_token().await {
            return Ok(auth_failure(&e));
        }
        print_status(&client).await;
        return Ok(ExitCode::SUCCESS);
    };

    let captions = match client.captions(&session_id).await {
        Ok(captions) => captions,
        Err(e) => return Ok(auth_failure(&e)),
    };
    let Some(captions) = captions else {
        eprintln!("No captions found for session {session_id}.");
        if let Ok(Some(session)) = client.session_info(&session_id).await {
            if session.recorded_within(RECENT_RECORDING) {
                eprintln!("The session was recorded recently; captions may still be processing.");
            }
        }
        return Ok(ExitCode::from(NO_CONTENT));
    };

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, captions.trim_end())
                .await
                .with_context(|| format!("write captions to {}", path.display()))?;
            eprintln!("Captions written to {}", path.display());
        }
        None => println!("{}", captions.trim_end()),
    }
    Ok(ExitCode::SUCCESS)
}

fn auth_failure(e: &AuthError) -> ExitCode {
    tracing::error!("authentication failed: {e}");
    eprintln!("Authentication failed: {e}");
    let code = u8::try_from(e.kind().exit_code()).unwrap_or(1);
    ExitCode::from(code)
}

async fn print_status(client: &PanoptoClient) {
    let oauth = client.oauth().lock().await;
    let TokenStatus {
        has_access_token,
        has_refresh_token,
        expires_at,
        is_valid,
        store_exists,
        seconds_until_expiry,
    } = oauth.status();

    println!("Token file: {}", client.config().token_file.display());
    println!("  saved:          {store_exists}");
    println!("  access token:   {has_access_token}");
    println!("  refresh token:  {has_refresh_token}");
    println!("  valid:          {is_valid}");
    if let Some(expires_at) = expires_at.and_then(|s| jiff::Timestamp::from_second(s).ok()) {
        println!("  expires at:     {expires_at}");
    }
    if let Some(seconds) = seconds_until_expiry {
        println!("  expires in:     {:.1} hours", seconds as f64 / 3600.0);
    }
    let (ready, reason) = oauth.unattended_readiness();
    println!("  unattended:     {ready} ({reason})");
}
