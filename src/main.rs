use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use regsweep::{Client, Configuration, Digest};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Opt {
    /// Extra configuration files, merged in order
    #[clap(short, long, value_parser)]
    config: Vec<PathBuf>,

    #[clap(long)]
    host: Option<String>,

    #[clap(long)]
    repository: Option<String>,

    /// Service account key file. Without one the credential helper is used
    #[clap(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    key_file: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the images directly under the repository
    Images,
    /// List the manifests of an image and the tags they carry
    Tags { image: String },
    /// Delete a tag and every manifest carrying it
    Delete { image: String, tag: String },
    /// Delete a single manifest by digest
    DeleteDigest { image: String, digest: String },
}

fn load_config(options: &Opt) -> Result<Configuration> {
    let mut figment = Configuration::figment(options.config.clone());

    if let Some(host) = &options.host {
        figment = figment.merge(("host", host));
    }
    if let Some(repository) = &options.repository {
        figment = figment.merge(("repository", repository));
    }
    if let Some(key_file) = &options.key_file {
        figment = Configuration::with_key_file(figment, key_file);
    }

    Configuration::config(figment)
}

async fn run(command: Command, client: Client, cancel: CancellationToken) -> Result<()> {
    match command {
        Command::Images => {
            let catalog = client.list_repository(&cancel).await?;
            for child in &catalog.children {
                println!("{child}");
            }
        }
        Command::Tags { image } => {
            let catalog = client.list_tags(&image, &cancel).await?;
            for (digest, manifest) in &catalog.manifests {
                println!("{digest}\t{}", manifest.tags.join(","));
            }
            if catalog.manifests.is_empty() {
                for tag in &catalog.tags {
                    println!("{tag}");
                }
            }
        }
        Command::Delete { image, tag } => {
            let outcome = client.delete_tag(&image, &tag, &cancel).await?;
            if !outcome.is_success() {
                for error in &outcome.errors {
                    eprintln!("{error}");
                }
                bail!("registry rejected deletion of {image}:{tag}");
            }
            info!(%image, %tag, "Deleted");
        }
        Command::DeleteDigest { image, digest } => {
            let digest = Digest::parse_lenient(&digest)?;
            let outcome = client.delete_digest(&image, &digest, &cancel).await?;
            if !outcome.is_success() {
                for error in &outcome.errors {
                    eprintln!("{error}");
                }
                bail!("registry rejected deletion of {image}@{digest}");
            }
            info!(%image, %digest, "Deleted");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Opt::parse();
    let config = load_config(&options)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl+C: {err:?}");
                return;
            }
            info!("Interrupted, cancelling");
            cancel.cancel();
        }
    });

    let client = Client::connect(&config, &cancel)
        .await
        .context("Failed to obtain registry credentials")?;

    run(options.command, client, cancel).await
}
