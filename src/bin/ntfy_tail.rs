use std::sync::Arc;

use futures::StreamExt;
use ntfy_desk_lib::config::StreamConfig;
use ntfy_desk_lib::db::{MemoryStore, SnapshotStore};
use ntfy_desk_lib::StreamManager;

const DEFAULT_SERVER: &str = "https://ntfy.sh";

#[derive(Debug, Default)]
struct Options {
    server: Option<String>,
    targets: Vec<String>,
    persist: bool,
    all_events: bool,
    publish: Option<String>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    ntfy_desk_lib::init_tracing();

    if let Err(error) = run().await {
        eprintln!("ntfy_tail failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let Some(options) = parse_args()? else {
        return Ok(());
    };
    let server = options.server.as_deref().unwrap_or(DEFAULT_SERVER);
    let targets = options
        .targets
        .iter()
        .map(|target| split_target(server, target))
        .collect::<Result<Vec<_>, _>>()?;

    let store: Arc<dyn SnapshotStore> = if options.persist {
        ntfy_desk_lib::open_store().map_err(|e| e.to_string())?
    } else {
        Arc::new(MemoryStore::new())
    };
    let manager =
        StreamManager::new(StreamConfig::from_env(), store).map_err(|e| e.to_string())?;

    if let Some(body) = options.publish {
        if targets.is_empty() {
            return Err("--publish needs at least one topic".to_string());
        }
        for (server, topic) in &targets {
            manager
                .publish(server, topic, &body)
                .await
                .map_err(|e| e.to_string())?;
            eprintln!("published to {server}/{topic}");
        }
        return Ok(());
    }

    // Attach before subscribing so the first frames are not missed.
    let mut messages = manager.messages();

    if options.persist {
        manager.restore();
    }
    for (server, topic) in &targets {
        manager.subscribe(server, topic).map_err(|e| e.to_string())?;
    }
    if manager.list().is_empty() {
        return Err("nothing to follow; pass at least one topic".to_string());
    }
    for subscription in manager.list() {
        eprintln!("following {}", subscription.key);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = messages.next() => {
                let Some(event) = event else { break };
                if !options.all_events && !event.message.is_message() {
                    continue;
                }
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "could not encode message"),
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// `topic`, `host/topic` or `scheme://host/topic`.
fn split_target(default_server: &str, target: &str) -> Result<(String, String), String> {
    let target = target.trim();
    match target.rsplit_once('/') {
        Some((server, _)) if server.ends_with(":/") => {
            Err(format!("'{target}' names a server but no topic"))
        }
        Some((server, topic)) if !server.is_empty() => Ok((server.to_string(), topic.to_string())),
        _ => Ok((default_server.to_string(), target.to_string())),
    }
}

fn parse_args() -> Result<Option<Options>, String> {
    let mut options = Options {
        persist: true,
        ..Options::default()
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(None);
        }

        if let Some(value) = arg.strip_prefix("--server=") {
            options.server = Some(value.to_string());
            continue;
        }
        if arg == "--server" {
            let value = args
                .next()
                .ok_or_else(|| "--server requires a value".to_string())?;
            options.server = Some(value);
            continue;
        }

        if let Some(value) = arg.strip_prefix("--publish=") {
            options.publish = Some(value.to_string());
            continue;
        }
        if arg == "--publish" {
            let value = args
                .next()
                .ok_or_else(|| "--publish requires a message body".to_string())?;
            options.publish = Some(value);
            continue;
        }

        if arg == "--no-persist" {
            options.persist = false;
            continue;
        }
        if arg == "--all-events" {
            options.all_events = true;
            continue;
        }

        if arg.starts_with("--") {
            return Err(format!("unknown option '{arg}'. Use --help for usage"));
        }
        options.targets.push(arg);
    }

    Ok(Some(options))
}

fn print_help() {
    println!(
        "ntfy_tail: follow ntfy topics and print each message as a JSON line\n\n\
         USAGE:\n    ntfy_tail [OPTIONS] [TOPIC | HOST/TOPIC | URL/TOPIC]...\n\n\
         OPTIONS:\n\
         \x20   --server <URL>      server for bare topic names (default {DEFAULT_SERVER})\n\
         \x20   --publish <BODY>    post BODY to every given topic and exit\n\
         \x20   --all-events        also print open, keepalive and poll_request events\n\
         \x20   --no-persist        do not restore or store subscriptions\n\
         \x20   -h, --help          show this help\n\n\
         Subscriptions are remembered in the data directory (NTFY_DESK_DATA_DIR)\n\
         and restored on the next run unless --no-persist is given."
    );
}

#[cfg(test)]
mod tests {
    use super::split_target;

    #[test]
    fn targets_fall_back_to_default_server() {
        assert_eq!(
            split_target("https://ntfy.sh", "alerts"),
            Ok(("https://ntfy.sh".to_string(), "alerts".to_string()))
        );
        assert_eq!(
            split_target("https://ntfy.sh", "http://localhost:8080/builds"),
            Ok(("http://localhost:8080".to_string(), "builds".to_string()))
        );
        assert_eq!(
            split_target("https://ntfy.sh", "example.com/news"),
            Ok(("example.com".to_string(), "news".to_string()))
        );
    }

    #[test]
    fn bare_server_url_is_rejected() {
        assert!(split_target("https://ntfy.sh", "http://localhost:8080").is_err());
        assert!(split_target("https://ntfy.sh", "https://ntfy.sh").is_err());
    }
}
