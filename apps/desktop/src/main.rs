use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    realtime::VerifyParams,
    session::{SessionUpdate, UserInfoPatch},
    AuthOperations, SignInClient, SignInFlow, SignInState,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod views;

use views::{parse_input, render_header, render_step, BindForm, Intent, SignInReason};

#[derive(Parser, Debug)]
struct Cli {
    /// Backend origin, e.g. https://hubs.example.com
    #[arg(long, global = true)]
    origin: Option<String>,
    /// Phoenix socket endpoint used for sign-in and permissions
    #[arg(long, global = true)]
    socket_url: Option<String>,
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the interactive sign-in wizard.
    SignIn {
        #[arg(long)]
        destination: Option<String>,
        #[arg(long)]
        reason: Option<SignInReason>,
    },
    /// Confirm a magic link from its query parameters.
    Verify {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        payload: String,
    },
    Classroom {
        /// Bound profile token sent as the auth header
        #[arg(long)]
        token: String,
        #[command(subcommand)]
        action: ClassroomAction,
    },
}

#[derive(Subcommand, Debug)]
enum ClassroomAction {
    Save {
        #[arg(long)]
        body: String,
    },
    Update {
        #[arg(long)]
        body: String,
    },
    Delete {
        #[arg(long)]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.config)?;
    if let Some(origin) = cli.origin {
        settings.origin = origin;
    }
    if let Some(socket_url) = cli.socket_url {
        settings.socket_url = Some(socket_url);
    }
    info!(
        api = %settings.api_base_url(),
        socket = ?settings.socket_url,
        "desktop: settings loaded"
    );
    let client = SignInClient::new(settings).context("failed to build client")?;

    match cli.command {
        Command::SignIn {
            destination,
            reason,
        } => run_sign_in(&client, destination, reason).await?,
        Command::Verify {
            topic,
            token,
            payload,
        } => {
            client
                .auth()
                .verify(&VerifyParams {
                    topic,
                    token,
                    payload,
                })
                .await?;
            println!("Verification sent. You can return to the original window.");
        }
        Command::Classroom { token, action } => {
            client
                .session()
                .update(SessionUpdate::MergeUserInfo(UserInfoPatch {
                    token: Some(token),
                    ..UserInfoPatch::default()
                }));
            let api = client.api();
            let delivery = match action {
                ClassroomAction::Save { body } => api.save_classroom(&parse_body(&body)?).await?,
                ClassroomAction::Update { body } => {
                    api.update_classroom(&parse_body(&body)?).await?
                }
                ClassroomAction::Delete { body } => {
                    api.delete_classroom(&parse_body(&body)?).await?
                }
            };
            match delivery.completed() {
                Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                None => warn!("desktop: classroom request superseded"),
            }
        }
    }

    Ok(())
}

fn parse_body(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("body must be JSON")? {
        Value::Object(body) => Ok(body),
        _ => anyhow::bail!("body must be a JSON object"),
    }
}

fn print_screen(
    client: &SignInClient,
    state: &SignInState,
    form: &BindForm,
    reason: Option<SignInReason>,
) {
    let session = client.session().snapshot();
    println!("\n{}", render_header(&client.auth().snapshot(), &session.profile));
    println!("---- Sign In ----");
    println!("{}", render_step(state, form, reason));
}

async fn run_sign_in(
    client: &SignInClient,
    destination: Option<String>,
    reason: Option<SignInReason>,
) -> Result<()> {
    client.auth().mount().await;
    let flow = client.sign_in_flow(destination);
    let mut states = flow.subscribe();
    let mut form = BindForm::new(&flow.state());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "commands: type student|teacher, email <x>, password <x>, store <n>, \
         next, cancel, sign-out, quit"
    );
    print_screen(client, &flow.state(), &form, reason);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                form.sync(&state);
                print_screen(client, &state, &form, reason);
                if let Some(url) = flow.redirect_url() {
                    println!("Redirecting to {url}");
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let state = flow.state();
                match form.handle(parse_input(&line), &state) {
                    Ok(Some(Intent::Quit)) => break,
                    Ok(Some(intent)) => run_intent(client, &flow, intent),
                    Ok(None) => print_screen(client, &state, &form, reason),
                    Err(message) => println!("! {message}"),
                }
            }
        }
    }

    client.auth().unmount().await;
    Ok(())
}

/// Bind and sign-in calls run in the background so input stays responsive.
fn run_intent(client: &SignInClient, flow: &Arc<SignInFlow>, intent: Intent) {
    let flow = Arc::clone(flow);
    match intent {
        Intent::BindMember { email, password } => {
            tokio::spawn(async move { flow.bind_member(&email, &password).await });
        }
        Intent::BindSeller { email, password } => {
            tokio::spawn(async move { flow.bind_seller(&email, &password).await });
        }
        Intent::BindStore { email, store_id } => {
            tokio::spawn(async move { flow.bind_store(&email, store_id).await });
        }
        Intent::SubmitEmail(email) => {
            tokio::spawn(async move { flow.submit_email(&email).await });
        }
        Intent::Cancel => {
            tokio::spawn(async move { flow.cancel().await });
        }
        Intent::CancelBind => flow.cancel_bind(),
        Intent::SignOut => {
            client.auth().sign_out();
            println!("Signed out.");
        }
        Intent::Quit => {}
    }
}
