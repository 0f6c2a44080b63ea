//! tilewire-msg
//!
//! Send commands and queries to i3 or sway and watch its events.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use serde::Serialize;
use tilewire::{Con, Connection, Event, Handler};
use tilewire_config::{ClientConfig, DEFAULT_CONFIG_PATH};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tilewire-msg")]
#[command(about = "Talk to i3 or sway over IPC")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Socket to use instead of the configured or discovered one
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command, e.g. `tilewire-msg command workspace 2`
    Command {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },

    /// Query the window manager and print the reply
    Get {
        #[arg(value_enum)]
        query: Query,

        /// Bar id for `bar-config` (the first bar when omitted)
        #[arg(long)]
        bar: Option<String>,
    },

    /// Send a tick event to every tick subscriber
    Tick {
        #[arg(default_value = "")]
        payload: String,
    },

    /// Print events as they arrive, e.g. `window::new` or `workspace`
    Subscribe {
        #[arg(required = true)]
        events: Vec<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Query {
    Workspaces,
    Outputs,
    Tree,
    Marks,
    BarConfig,
    Version,
    BindingModes,
    BindingState,
    Config,
    Inputs,
    Seats,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();
    let config = tilewire_config::load_config(Some(&config_path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = %config_path.display(), ?config, "Loaded configuration");
    let conn = connect(&config, cli.socket)?;

    match cli.command {
        Commands::Command { words } => cmd_command(&conn, &words.join(" ")),
        Commands::Get { query, bar } => cmd_get(&conn, query, bar.as_deref()),
        Commands::Tick { payload } => cmd_tick(&conn, &payload),
        Commands::Subscribe { events, timeout } => {
            cmd_subscribe(&conn, &events, timeout.map(Duration::from_secs))
        }
    }
}

fn connect(config: &ClientConfig, socket: Option<PathBuf>) -> miette::Result<Connection> {
    let mut options = config.connection_options();
    if let Some(socket) = socket {
        options = options.socket_path(socket);
    }

    Connection::connect(options).map_err(|e| miette::miette!("{}", e))
}

fn cmd_command(conn: &Connection, command: &str) -> miette::Result<()> {
    let replies = conn
        .command(command)
        .map_err(|e| miette::miette!("{}", e))?;

    let mut failed = 0;
    for (i, reply) in replies.iter().enumerate() {
        if reply.is_success() {
            println!("[{}] ok", i + 1);
        } else {
            failed += 1;
            println!(
                "[{}] failed: {}",
                i + 1,
                reply.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if failed > 0 {
        return Err(miette::miette!("{} of {} statements failed", failed, replies.len()));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{}", json);
    Ok(())
}

fn cmd_get(conn: &Connection, query: Query, bar: Option<&str>) -> miette::Result<()> {
    let ipc = |e: tilewire::IpcError| miette::miette!("{}", e);

    match query {
        Query::Workspaces => print_json(&conn.get_workspaces().map_err(ipc)?),
        Query::Outputs => print_json(&conn.get_outputs().map_err(ipc)?),
        Query::Tree => {
            let tree = conn.get_tree().map_err(ipc)?;
            print_tree(&tree, 0);
            Ok(())
        }
        Query::Marks => print_json(&conn.get_marks().map_err(ipc)?),
        Query::BarConfig => match conn.get_bar_config(bar).map_err(ipc)? {
            Some(config) => print_json(&config),
            None => Err(miette::miette!("No bar is configured")),
        },
        Query::Version => print_json(&conn.get_version().map_err(ipc)?),
        Query::BindingModes => print_json(&conn.get_binding_modes().map_err(ipc)?),
        Query::BindingState => print_json(&conn.get_binding_state().map_err(ipc)?),
        Query::Config => {
            let config = conn.get_config().map_err(ipc)?;
            print!("{}", config.config.unwrap_or_default());
            Ok(())
        }
        Query::Inputs => print_json(&conn.get_inputs().map_err(ipc)?),
        Query::Seats => print_json(&conn.get_seats().map_err(ipc)?),
    }
}

fn print_tree(con: &Con, depth: usize) {
    let mut line = format!(
        "{}{} #{}",
        "  ".repeat(depth),
        con.node_type.as_str(),
        con.id
    );
    if let Some(name) = &con.name {
        line.push_str(&format!(" {:?}", name));
    }
    if con.focused {
        line.push_str(" [focused]");
    }
    if con.is_floating() {
        line.push_str(" [floating]");
    }
    if !con.marks.is_empty() {
        line.push_str(&format!(" marks={}", con.marks.join(",")));
    }
    println!("{}", line);

    for child in con.nodes().iter().chain(con.floating_nodes().iter()) {
        print_tree(child, depth + 1);
    }
}

fn cmd_tick(conn: &Connection, payload: &str) -> miette::Result<()> {
    let reply = conn
        .send_tick(payload)
        .map_err(|e| miette::miette!("{}", e))?;

    if reply.success != Some(true) {
        return Err(miette::miette!("Tick was not delivered"));
    }
    println!("Tick sent");
    Ok(())
}

fn cmd_subscribe(
    conn: &Connection,
    events: &[String],
    timeout: Option<Duration>,
) -> miette::Result<()> {
    let printer = Handler::new(|_, event| {
        println!("{}", describe(event));
        Ok(())
    });

    for event in events {
        conn.on(event, printer.clone())
            .map_err(|e| miette::miette!("{}", e))?;
    }

    conn.main(timeout).map_err(|e| miette::miette!("{}", e))
}

fn describe_con(con: &Con) -> String {
    match &con.name {
        Some(name) => format!("#{} {:?}", con.id, name),
        None => format!("#{}", con.id),
    }
}

/// One line per event
fn describe(event: &Event) -> String {
    let kind = event.event_type();
    match event {
        Event::Workspace(e) => {
            let current = e.current.as_ref().map(|c| describe_con(c)).unwrap_or_default();
            format!("{}::{} {}", kind, e.change, current)
        }
        Event::Window(e) => format!("{}::{} {}", kind, e.change, describe_con(&e.container)),
        Event::Mode(e) => format!("{}::{}", kind, e.change),
        Event::Binding(e) => format!(
            "{}::{} {}",
            kind,
            e.change,
            e.binding.command.as_deref().unwrap_or_default()
        ),
        Event::Tick(e) => format!("{} {}", kind, e.payload.as_deref().unwrap_or_default()),
        Event::BarconfigUpdate(e) => format!("{} {}", kind, e.id.as_deref().unwrap_or_default()),
        Event::Input(e) => format!(
            "{}::{} {}",
            kind,
            e.change,
            e.input.identifier.as_deref().unwrap_or_default()
        ),
        Event::Output(_) | Event::Shutdown(_) | Event::IpcShutdown => match event.change() {
            Some(change) => format!("{}::{}", kind, change),
            None => kind.to_string(),
        },
    }
}
