use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "smsxmpp")]
#[command(about = "SMS-over-XMPP gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway until Ctrl+C or SIGTERM. Exits with an error if no SMS provider can be opened.
    Run {
        /// Config file path (default: SMSXMPP_CONFIG_PATH or ~/.smsxmpp/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Load the config and show what the gateway would use, without connecting to anything.
    Check {
        /// Config file path (default: SMSXMPP_CONFIG_PATH or ~/.smsxmpp/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("smsxmpp {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_gateway(config).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = smsxmpp::config::load_config(config_path)?;
    log::info!("loaded config from {}", path.display());
    let gateway = smsxmpp::gateway::Gateway::from_config(&config).await?;
    tokio::select! {
        _ = gateway.run() => {},
        _ = smsxmpp::gateway::shutdown_signal() => {},
    }
    log::info!("gateway stopped");
    Ok(())
}

fn run_check(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = smsxmpp::config::load_config(config_path)?;
    println!("config: {}", path.display());
    println!(
        "sms provider: {}",
        config.provider_kind().unwrap_or("none (need to configure an SMS provider)")
    );
    println!("xmpp server: {}:{}", config.xmpp.host, config.xmpp.port);
    println!("xmpp bridge: {}", config.xmpp.bridge);
    let translator = config.translator_config()?;
    println!("component domain: {}", translator.domain);
    match &translator.target {
        Some(jid) => println!("inbound sms go to: {}", jid),
        None => println!("inbound sms go to: directory lookup"),
    }
    println!(
        "secret: {}",
        if smsxmpp::config::resolve_xmpp_secret(&config).is_some() { "set" } else { "not set" }
    );
    println!("directory entries: {}", config.directory().len());
    println!("xmpp restart cooldown: {:?}", config.xmpp_cooldown());
    Ok(())
}
