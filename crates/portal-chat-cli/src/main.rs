//! Portal chat CLI - talk to the course assistant from a terminal.
//!
//! This is the entry point for the `pchat` binary.

mod app;
mod render;

use clap::{Parser, Subcommand};
use portal_chat::context::{DEFAULT_DEPARTMENT, DEFAULT_SCHOOL, DEFAULT_SITE_URL};
use portal_chat::{
    ChatContext, ChatSession, ChatTarget, ClientConfig, StreamTransport, ThreadPolicy, UserProfile,
};
use portal_chat_core::ThreadId;
use tracing_subscriber::EnvFilter;

use app::App;

/// Portal chat CLI - streaming chat with the university assistant.
#[derive(Parser, Debug)]
#[command(name = "pchat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL.
    #[arg(long, env = "PORTAL_CHAT_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for authentication.
    #[arg(long, env = "PORTAL_CHAT_TOKEN")]
    token: Option<String>,

    /// Continue an existing thread instead of starting a new one.
    #[arg(long)]
    thread: Option<ThreadId>,

    /// Mint a new thread id for every message.
    #[arg(long, default_value = "false")]
    thread_per_message: bool,

    /// Send one message, print the answer and exit.
    #[arg(short, long)]
    message: Option<String>,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    surface: Option<Surface>,
}

#[derive(Subcommand, Debug)]
enum Surface {
    /// The general student assistant (default).
    Assistant {
        /// Portal user id.
        #[arg(long, env = "PORTAL_USER_ID")]
        user_id: Option<String>,

        /// Student number.
        #[arg(long, env = "PORTAL_STUDENT_ID")]
        student_id: Option<String>,

        /// Department id.
        #[arg(long, env = "PORTAL_DEPARTMENT_ID")]
        department_id: Option<String>,

        /// Institutional site.
        #[arg(long, default_value = DEFAULT_SITE_URL)]
        url: String,

        /// Institution name.
        #[arg(long, default_value = DEFAULT_SCHOOL)]
        school: String,
    },
    /// Chat scoped to one course.
    Course {
        /// Course id.
        course_id: String,
    },
    /// The SSE probe endpoint.
    Probe {
        /// Full endpoint URL, overriding the configured probe path.
        #[arg(long)]
        endpoint: Option<String>,

        /// Institutional site.
        #[arg(long, default_value = DEFAULT_SITE_URL)]
        url: String,

        /// Institution name.
        #[arg(long, default_value = DEFAULT_SCHOOL)]
        school: String,

        /// Department name.
        #[arg(long, default_value = DEFAULT_DEPARTMENT)]
        department: String,
    },
}

impl Args {
    fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(base_url) = &self.base_url {
            config.base_url.clone_from(base_url);
        }
        if self.thread_per_message {
            config.thread_policy = ThreadPolicy::PerMessage;
        }
        if let Some(Surface::Probe {
            endpoint: Some(endpoint),
            ..
        }) = &self.surface
        {
            config.probe_path.clone_from(endpoint);
        }
        config
    }

    fn context(&self) -> ChatContext {
        let context = match &self.surface {
            None => ChatContext::new(ChatTarget::assistant()),
            Some(Surface::Assistant {
                user_id,
                student_id,
                department_id,
                url,
                school,
            }) => ChatContext::new(ChatTarget::Assistant {
                url: url.clone(),
                school: school.clone(),
            })
            .with_profile(UserProfile {
                id: user_id.clone(),
                student_id: student_id.clone(),
                department_id: department_id.clone(),
            }),
            Some(Surface::Course { course_id }) => {
                ChatContext::new(ChatTarget::course(course_id.clone()))
            }
            Some(Surface::Probe {
                url,
                school,
                department,
                ..
            }) => ChatContext::new(ChatTarget::Probe {
                url: url.clone(),
                school: school.clone(),
                department: department.clone(),
            }),
        };
        match &self.token {
            Some(token) => context.with_token(token.clone()),
            None => context,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug
    let default_filter = if args.debug {
        "portal_chat=debug,portal_chat_cli=debug,warn"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.config();
    let transport = StreamTransport::new(&config)?;
    let mut session = ChatSession::new(transport, config, args.context());
    if let Some(thread_id) = args.thread.clone() {
        session = session.with_thread_id(thread_id);
    }

    let mut app = App::new(session);
    match &args.message {
        Some(message) => {
            app.ask(message).await?;
            Ok(())
        }
        None => app.run().await,
    }
}
