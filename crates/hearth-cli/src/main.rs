use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hearth_client::{BackendClient, WsConnector};
use hearth_core::{
    ActiveSubjectsPoller, CaptureOutcome, EnrollmentController, EnrollmentState,
    EventStreamSynchronizer, CAPTURES_PER_ANGLE,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::Config;

#[derive(Parser)]
#[command(name = "hearth", about = "Hearth home-security client")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/hearth/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Appliance base URL, overriding config and HEARTH_BASE_URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the appliance is reachable
    Status,
    /// Save one still from the camera
    Snapshot {
        /// Output file
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Enroll a new face: 4 captures for each of 5 angles
    Enroll {
        /// Name to enroll (e.g., "Justin")
        #[arg(short, long)]
        name: String,
    },
    /// Follow the live detection feed
    Events,
    /// Follow who is currently in view
    Active,
    /// Manage enrolled people
    People {
        #[command(subcommand)]
        command: PeopleCommand,
    },
}

#[derive(Subcommand)]
enum PeopleCommand {
    /// List enrolled people
    List,
    /// Remove an enrolled person and their face data
    Remove {
        /// Person ID
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    let client = BackendClient::new(&config.client_config()?)?;
    tracing::debug!(base_url = %client.base_url(), "hearth starting");

    match cli.command {
        Commands::Status => {
            let online = client.health().await;
            println!(
                "Backend: {}",
                if online { "Online" } else { "Offline" }
            );
        }
        Commands::Snapshot { output } => snapshot(&client, output).await?,
        Commands::Enroll { name } => enroll(client, &name).await?,
        Commands::Events => events(client, &config).await?,
        Commands::Active => active(client, &config).await?,
        Commands::People { command } => match command {
            PeopleCommand::List => {
                let people = client.people().await?;
                if people.is_empty() {
                    println!("No one enrolled");
                }
                for person in people {
                    println!("{:>4}  {}", person.id, person.name);
                }
            }
            PeopleCommand::Remove { id } => {
                client.delete_person(id).await?;
                println!("Removed person {id}");
            }
        },
    }

    Ok(())
}

async fn snapshot(client: &BackendClient, output: PathBuf) -> Result<()> {
    let snap = client.fetch_snapshot().await?;
    tokio::fs::write(&output, &snap.bytes)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    match image::load_from_memory(&snap.bytes) {
        Ok(img) => println!(
            "Saved {} ({}, {}x{}, {} bytes)",
            output.display(),
            snap.content_type,
            img.width(),
            img.height(),
            snap.bytes.len()
        ),
        Err(e) => {
            tracing::warn!(error = %e, "snapshot did not decode");
            println!(
                "Saved {} ({}, {} bytes)",
                output.display(),
                snap.content_type,
                snap.bytes.len()
            );
        }
    }
    Ok(())
}

fn print_progress(state: EnrollmentState) {
    if let EnrollmentState::Capturing { angle, count, .. } = state {
        println!(
            "Angle: {}   Progress: {count}/{CAPTURES_PER_ANGLE}   [Enter = capture, q = abandon]",
            angle.as_str().to_uppercase()
        );
    }
}

async fn enroll(client: BackendClient, name: &str) -> Result<()> {
    let client = Arc::new(client);
    let controller = EnrollmentController::new(client.clone(), client);

    let session = controller.start(name).await?;
    tracing::debug!(%session, "enrollment session open");
    println!("Enrolling {}. Hold each requested angle steady.", name.trim());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_progress(controller.state());
        let Some(line) = lines.next_line().await? else {
            controller.reset();
            println!("Input closed; enrollment abandoned");
            return Ok(());
        };
        if line.trim().eq_ignore_ascii_case("q") {
            controller.reset();
            println!("Enrollment abandoned");
            return Ok(());
        }

        match controller.capture_once().await {
            Ok(CaptureOutcome::Completed) => {
                println!("Complete. Your face should now be recognized.");
                return Ok(());
            }
            Ok(CaptureOutcome::AngleAdvanced { next }) => {
                println!("Angle done. Next: {}", next.as_str().to_uppercase());
            }
            Ok(CaptureOutcome::Counted { .. }) | Ok(CaptureOutcome::Discarded) => {}
            Err(e) if e.is_validation() => return Err(e.into()),
            Err(e) => println!("Capture failed: {e}. Press Enter to retry."),
        }
    }
}

async fn events(client: BackendClient, config: &Config) -> Result<()> {
    let connector = WsConnector::from_config(&config.client_config()?)?;
    let mut sync = EventStreamSynchronizer::new(
        Arc::new(client),
        Arc::new(connector),
        config.sync_config(),
    );
    let mut updates = sync.subscribe();
    sync.activate().await?;

    let initial: Vec<_> = updates.borrow_and_update().feed().iter().cloned().collect();
    if initial.is_empty() {
        println!("No recent events");
    }
    for event in initial.iter().rev() {
        println!("{}", render::event_line(event));
    }
    println!("Following live events ({:?}); Ctrl-C to stop", sync.channel_status());
    let mut printed: HashSet<i64> = initial.iter().map(|e| e.id).collect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let (current, status) = {
                    let state = updates.borrow_and_update();
                    (state.feed().iter().cloned().collect::<Vec<_>>(), state.channel())
                };
                for event in render::unprinted(&printed, &current) {
                    println!("{}", render::event_line(event));
                }
                printed = current.iter().map(|e| e.id).collect();
                tracing::debug!(channel = ?status, "feed updated");
            }
        }
    }

    sync.deactivate().await;
    Ok(())
}

async fn active(client: BackendClient, config: &Config) -> Result<()> {
    let mut poller = ActiveSubjectsPoller::new(Arc::new(client), config.active_poll());
    let mut updates = poller.subscribe();
    poller.activate();
    println!("Watching who is in view; Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let subjects = updates.borrow_and_update().clone();
                if subjects.is_empty() {
                    println!("No one currently detected.");
                }
                for subject in &subjects {
                    println!("{}", render::subject_line(subject));
                }
            }
        }
    }

    poller.deactivate().await;
    Ok(())
}
