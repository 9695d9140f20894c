use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{error, info};

use open_music_cache::cache::{ListScope, OfflineCaches};
use open_music_cache::config::Config;
use open_music_cache::sources::{HttpSource, SourceError, StreamUrlBuilder};
use url::Url;

/// Mantenimiento de la caché offline de Open Music
#[derive(Debug, Parser)]
#[command(name = "open-music-cache", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show how much space each cache uses
    Usage,
    /// Delete cached content
    Clear {
        #[arg(value_enum, default_value_t = Target::All)]
        target: Target,
    },
    /// Download songs into the cache (or confirm they are cached)
    Fetch {
        #[arg(required = true)]
        song_ids: Vec<String>,
    },
    /// Print a cached playlist or album song list as JSON
    List {
        #[arg(value_enum)]
        scope: Scope,
        id: String,
    },
    /// Apply the eviction policies now
    Prune,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    Songs,
    Lists,
    All,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scope {
    Playlist,
    Album,
}

/// Stands in for the server when no credentials are configured.
struct Offline;

impl StreamUrlBuilder for Offline {
    fn stream_url(&self, _song_id: &str) -> Result<Url, SourceError> {
        Err(SourceError::NotConfigured)
    }
}

impl From<Scope> for ListScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Playlist => ListScope::Playlist,
            Scope::Album => ListScope::Album,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_cache=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let source = Arc::new(HttpSource::new(config.connect_timeout, config.read_timeout)?);
    let urls: Arc<dyn StreamUrlBuilder> = match config.subsonic_urls() {
        Ok(urls) => Arc::new(urls),
        Err(e) if matches!(cli.command, Command::Fetch { .. }) => return Err(e),
        // Only downloads need the server; other commands stay offline
        Err(_) => Arc::new(Offline),
    };

    let caches = OfflineCaches::new(&config, source, urls);

    match cli.command {
        Command::Usage => {
            println!("{}", caches.usage().await);
        }
        Command::Clear { target } => {
            if matches!(target, Target::Songs | Target::All) {
                caches.clear_songs().await?;
            }
            if matches!(target, Target::Lists | Target::All) {
                caches.clear_song_lists().await?;
            }
            println!("{}", caches.usage().await);
        }
        Command::Fetch { song_ids } => {
            let mut misses = 0;
            for song_id in &song_ids {
                match caches.songs().fetch(song_id).await {
                    Some(path) => println!("{}\t{}", song_id, path.display()),
                    None => {
                        error!("Song {} could not be cached", song_id);
                        println!("{}\tmiss", song_id);
                        misses += 1;
                    }
                }
            }
            if misses > 0 {
                anyhow::bail!("{} of {} songs could not be cached", misses, song_ids.len());
            }
        }
        Command::List { scope, id } => match caches.song_lists().load(scope.into(), &id).await {
            Some(songs) => println!("{}", serde_json::to_string_pretty(&songs)?),
            None => anyhow::bail!("No cached {} song list for {}", ListScope::from(scope), id),
        },
        Command::Prune => {
            let (songs, lists) = caches.prune().await;
            println!(
                "Removed {} songs and {} song lists, {} abandoned downloads, {} bytes freed",
                songs.removed(),
                lists.removed(),
                songs.stale_parts + lists.stale_parts,
                songs.freed_bytes + lists.freed_bytes
            );
            println!("{}", caches.usage().await);
        }
    }

    Ok(())
}
