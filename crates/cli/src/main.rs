mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use providers::{GoogleConfig, ModelDispatchClient, ReplyOptions};
use reply_core::grounding::GroundingOption;
use reply_core::llm::{AuthOptions, ConversationRequest, Reply, StreamEvent, Turn};
use reply_core::options::{ClientOptions, ModelOptions};
use std::io::Write;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "goreply")]
#[command(about = "Send one prompt to a Gemini, Vertex AI or Imagen model")]
#[command(long_about = "Streams a single reply to stdout.\n\n\
Environment Variables:\n\
  GOOGLE_KEY           Generative Language API key\n\
  GOOGLE_PROJECT_ID    Vertex AI project (managed, grounded and image models)\n\
  GOOGLE_ACCESS_TOKEN  OAuth token for the Vertex AI project\n\
  GOOGLE_LOC           Vertex AI location (default us-central1)\n\
  GOREPLY_LOG          Log filter (default info)")]
struct Args {
    /// Prompt text; read from stdin when omitted.
    prompt: Option<String>,

    #[arg(short, long, help = "Model to use, overrides the config file")]
    model: Option<String>,

    #[arg(short, long, help = "System prompt prefix")]
    system: Option<String>,

    #[arg(
        short,
        long,
        help = "Grounding: none, \"Google Search\", \"Vertex AI Search\" or \"Enterprise Web Search\""
    )]
    grounding: Option<String>,

    #[arg(long, help = "Datastore path for Vertex AI Search")]
    datastore: Option<String>,

    #[arg(long, help = "Delay between streamed fragments in milliseconds")]
    stream_rate: Option<u64>,

    #[arg(long, help = "User id for generated image storage")]
    user: Option<String>,

    #[arg(long, help = "Print a short title for the prompt instead of a reply")]
    title: bool,
}

fn parse_grounding(s: &str) -> Result<GroundingOption> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("unknown grounding option: {}", s))
}

async fn read_prompt(arg: Option<String>) -> Result<String> {
    if let Some(p) = arg {
        return Ok(p);
    }
    let mut s = String::new();
    tokio::io::stdin()
        .read_to_string(&mut s)
        .await
        .context("read prompt from stdin")?;
    Ok(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init();

    let cfg = GoogleConfig::from_env_and_file()?;
    let auth = AuthOptions {
        project_id: cfg.project_id.clone(),
        access_token: cfg.access_token.clone(),
    };
    let mut client = ModelDispatchClient::new(cfg)?;

    let grounding = args.grounding.as_deref().map(parse_grounding).transpose()?;
    client.configure(ClientOptions {
        model_options: ModelOptions {
            model: args.model.clone(),
            ..Default::default()
        },
        stream_rate: args.stream_rate,
        prompt_prefix: args.system.clone(),
        grounding_option: grounding,
        grounding_path: args.datastore.clone(),
        is_grounded: grounding.map(|g| !g.is_off()),
        ..Default::default()
    })?;

    let prompt = read_prompt(args.prompt).await?;
    let request = ConversationRequest::from_turns(vec![Turn::user(prompt.trim())]);

    let abort = CancellationToken::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    if args.title {
        let title = client
            .get_title(
                &request,
                ReplyOptions {
                    abort,
                    auth,
                    ..Default::default()
                },
            )
            .await?;
        println!("{}", title);
        return Ok(());
    }

    info!(target:"cli","reply model={}", client.options().model());
    let mut streamed = 0usize;
    let result = client
        .get_reply(
            request,
            ReplyOptions {
                on_progress: Some(Box::new(|ev: &StreamEvent| {
                    streamed = ev.reply.len();
                    let mut out = std::io::stdout().lock();
                    let _ = out.write_all(ev.text.as_bytes());
                    let _ = out.flush();
                })),
                abort,
                user: args.user,
                auth,
            },
        )
        .await;

    match result {
        Ok(Reply::Text(text)) => {
            // Citations are appended after the stream ends.
            let rest = text.get(streamed..).unwrap_or_default();
            println!("{}", rest);
        }
        Ok(Reply::Images(images)) => {
            println!("{}", serde_json::to_string_pretty(&images)?);
        }
        Err(e) => {
            error!(target:"cli","reply failed: {}", e);
            return Err(e.into());
        }
    }
    Ok(())
}
