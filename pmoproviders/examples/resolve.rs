//! Resolve a query and print what the registry found
//!
//! ```sh
//! cargo run -p pmoproviders --example resolve -- "https://clyp.it/abcd1234"
//! cargo run -p pmoproviders --example resolve -- "speak:hello world" --open
//! ```

use pmoconfig::{get_config, init_logging};
use pmoproviders::default_registry;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();
    let _logs = init_logging(&config)?;

    let mut args = std::env::args().skip(1);
    let Some(query) = args.next() else {
        anyhow::bail!("usage: resolve <query> [--open]");
    };
    let open = args.any(|a| a == "--open");

    let registry = default_registry(&config)?;
    info!(providers = ?registry.providers(), "Registry built");

    let item = registry.resolve(&query).await?;
    for track in item.into_tracks() {
        println!(
            "[{}] {} - {} ({})",
            track.source_name,
            track.author,
            track.title,
            track
                .duration()
                .map(|d| format!("{}s", d.as_secs()))
                .unwrap_or_else(|| "live".to_string())
        );

        if open {
            let mut stream = registry.open(&track).await?;
            let mut total = 0usize;
            while let Some(chunk) = stream.next_chunk().await? {
                total += chunk.len();
            }
            println!(
                "  {} bytes of {} (seekable: {})",
                total,
                stream.container().mime_type(),
                stream.is_seekable()
            );
        }
    }

    Ok(())
}
