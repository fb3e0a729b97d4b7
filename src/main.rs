use std::process::ExitCode;

use anyhow::Context;
use bookpost_bridge::config::{Config, MailTransport};
use bookpost_bridge::{BridgeChannels, MessageFromBackend};
use bookpost_client::{
    BackendBridge, DESTINATION_ADDRESS_KEY, DeliveryOrchestrator, DeliveryOutcome,
    DeliveryRequest, DeliverySession, FilePreferenceStore, PreferenceStore, SubmitError,
};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "bookpost", about = "Send books to a reading device", version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a book and mail it to a reading device
    Send {
        /// Identifier of the book at the configured source
        resource: String,
        /// Destination address, defaults to the remembered one
        #[arg(long)]
        email: Option<String>,
        /// Title used in the mail subject
        #[arg(long, default_value = "")]
        title: String,
        /// Author used in the mail subject
        #[arg(long, default_value = "")]
        author: String,
    },
    /// Show the remembered destination address
    Preference,
    /// Show the configuration the backend runs with, saving any changes
    /// given as flags first
    Config(ConfigEdits),
}

#[derive(Args, Default)]
struct ConfigEdits {
    /// Turn mailing on
    #[arg(long, conflicts_with = "disable_mail")]
    enable_mail: bool,
    /// Turn mailing off
    #[arg(long)]
    disable_mail: bool,
    /// How mail leaves the backend
    #[arg(long, value_enum)]
    transport: Option<TransportArg>,
    /// Sender address of delivered books
    #[arg(long)]
    mail_from: Option<String>,
    #[arg(long)]
    smtp_host: Option<String>,
    #[arg(long)]
    smtp_port: Option<u16>,
    #[arg(long)]
    smtp_username: Option<String>,
    #[arg(long)]
    smtp_password: Option<String>,
    /// Connect to the SMTP relay without STARTTLS
    #[arg(long)]
    no_tls: bool,
    /// Base URL books are downloaded from
    #[arg(long)]
    source_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Smtp,
    PickupDir,
}

impl From<TransportArg> for MailTransport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Smtp => MailTransport::Smtp,
            TransportArg::PickupDir => MailTransport::PickupDir,
        }
    }
}

impl ConfigEdits {
    /// Applies the given flags to `config`. Returns whether anything changed.
    fn apply(self, config: &mut Config) -> bool {
        let before = toml::to_string(&*config).ok();
        let mail = &mut config.mail;
        if self.enable_mail {
            mail.enabled = true;
        }
        if self.disable_mail {
            mail.enabled = false;
        }
        if let Some(transport) = self.transport {
            mail.transport = transport.into();
        }
        if let Some(from) = self.mail_from {
            mail.from_address = from;
        }
        if let Some(host) = self.smtp_host {
            mail.smtp_host = host;
        }
        if let Some(port) = self.smtp_port {
            mail.smtp_port = port;
        }
        if self.smtp_username.is_some() {
            mail.smtp_username = self.smtp_username;
        }
        if self.smtp_password.is_some() {
            mail.smtp_password = self.smtp_password;
        }
        if self.no_tls {
            mail.use_tls = false;
        }
        if let Some(url) = self.source_url {
            config.fetch.source_url = url;
        }
        toml::to_string(&*config).ok() != before
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_colors(true)
        .with_threads(true)
        .with_local_timestamps()
        .with_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Send {
            resource,
            email,
            title,
            author,
        } => runtime.block_on(send(resource, email, title, author)),
        Command::Preference => {
            let preferences = FilePreferenceStore::open_default()?;
            match preferences.read(DESTINATION_ADDRESS_KEY) {
                Some(address) => println!("{address}"),
                None => println!("No remembered address"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Config(edits) => runtime.block_on(show_config(edits)),
    }
}

async fn send(
    resource: String,
    email: Option<String>,
    title: String,
    author: String,
) -> anyhow::Result<ExitCode> {
    let config = bookpost_backend::config::load_config().await?;
    let BridgeChannels {
        client_tx,
        backend_rx,
        events_tx,
    } = BridgeChannels::default();

    let orchestrator = DeliveryOrchestrator::new(
        BackendBridge::new(client_tx),
        FilePreferenceStore::open_default()?,
        config.delivery.clone(),
    );
    let address = match email.or_else(|| orchestrator.remembered_address()) {
        Some(address) => address,
        None => anyhow::bail!("no --email given and no address remembered"),
    };

    let mut session = DeliverySession::new(orchestrator, &events_tx);
    let backend = bookpost_backend::run(backend_rx, events_tx, config)?;

    let request = DeliveryRequest::new(resource, address).with_display(title, author);
    let result = session
        .run(request, |state, status| {
            log::debug!("Delivery is now {state:?}");
            if !status.is_empty() {
                println!("{status}");
            }
        })
        .await;

    // Closing the command channel stops the backend.
    drop(session);
    if backend.join().is_err() {
        log::error!("Backend thread panicked");
    }

    match result {
        Ok(DeliveryOutcome::Delivered) => Ok(ExitCode::SUCCESS),
        Ok(DeliveryOutcome::Failed(reason)) => {
            eprintln!("{}", reason.message());
            Ok(ExitCode::FAILURE)
        }
        Err(SubmitError::Validation(err)) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

async fn show_config(edits: ConfigEdits) -> anyhow::Result<ExitCode> {
    let mut config = bookpost_backend::config::load_config().await?;
    if edits.apply(&mut config) {
        bookpost_backend::config::save_config(&config).await?;
        log::info!("Saved configuration changes");
    }
    let BridgeChannels {
        client_tx,
        backend_rx,
        events_tx,
    } = BridgeChannels::default();
    let mut events = events_tx.subscribe();
    let backend = bookpost_backend::run(backend_rx, events_tx, config)?;

    let bridge = BackendBridge::new(client_tx);
    bridge.request_config().await?;
    let config: Config = loop {
        match events.recv().await.context("backend stopped before answering")? {
            MessageFromBackend::ConfigurationResponse(config) => break config,
            MessageFromBackend::NotificationMessage(_) => continue,
        }
    };
    drop(bridge);
    if backend.join().is_err() {
        log::error!("Backend thread panicked");
    }

    print!("{}", toml::to_string_pretty(&config)?);
    Ok(ExitCode::SUCCESS)
}
