//! Outreach events - inspect the local event queue
//!
//! # Usage
//!
//! ```bash
//! # Show the 10 most recent connect requests and DMs
//! outreach-events
//!
//! # Only DMs, up to 25
//! outreach-events --kind dm -n 25
//!
//! # Record a DM sent outside the tracked page
//! outreach-events --log-dm
//!
//! # Show counts only
//! outreach-events --stats
//!
//! # Dump raw JSON from a specific database
//! outreach-events --db /path/to/events.db --json
//! ```

use outreach_store::{EventQueue, OutreachEvent, OutreachKind, DEFAULT_CAPACITY};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    db_path: PathBuf,
    /// Per section
    limit: usize,
    kind: Option<OutreachKind>,
    stats_only: bool,
    json: bool,
    clear: bool,
    log_dm: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        db_path: EventQueue::default_path(),
        limit: 10,
        kind: None,
        stats_only: false,
        json: false,
        clear: false,
        log_dm: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--db" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    parsed.db_path = PathBuf::from(path);
                }
            }
            "--limit" | "-n" => {
                i += 1;
                if let Some(n) = args.get(i).and_then(|v| v.parse().ok()) {
                    parsed.limit = n;
                }
            }
            "--kind" => {
                i += 1;
                match args.get(i).map(|v| v.parse::<OutreachKind>()) {
                    Some(Ok(kind)) => parsed.kind = Some(kind),
                    Some(Err(e)) => {
                        eprintln!("{}", e);
                        std::process::exit(2);
                    }
                    None => {
                        eprintln!("--kind needs a value: connect or dm");
                        std::process::exit(2);
                    }
                }
            }
            "--log-dm" => parsed.log_dm = true,
            "--stats" => parsed.stats_only = true,
            "--json" => parsed.json = true,
            "--clear" => parsed.clear = true,
            other => {
                eprintln!("Unknown argument: {}", other);
                print_help();
                std::process::exit(2);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"outreach-events - inspect tracked outreach actions

USAGE:
    outreach-events [OPTIONS]

OPTIONS:
    --db <PATH>       Event database (default: {})
    -n, --limit <N>   Events to show per section (default: 10)
    --kind <KIND>     Only connect requests (connect) or DMs (dm)
    --stats           Print counts only
    --log-dm          Record a DM sent by hand
    --json            Print events as JSON lines
    --clear           Delete all stored events
    -h, --help        Print this help"#,
        EventQueue::default_path().display()
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args();
    let mut queue = EventQueue::open(&args.db_path, DEFAULT_CAPACITY)?;

    if args.clear {
        let removed = queue.clear()?;
        println!("Removed {} events", removed);
        return Ok(());
    }

    if args.log_dm {
        let event = OutreachEvent::manual_dm(chrono::Utc::now().timestamp_millis());
        queue.push(&event)?;
        println!("Logged:");
        print_event(&event);
        return Ok(());
    }

    let stats = queue.stats()?;
    if args.stats_only {
        println!("Connect requests: {}", stats.connect);
        println!("DMs:              {}", stats.message);
        println!("Confirmed:        {}/{}", stats.confirmed, stats.total);
        return Ok(());
    }

    let kinds = match args.kind {
        Some(kind) => vec![kind],
        None => vec![OutreachKind::Connect, OutreachKind::Message],
    };

    if args.json {
        for kind in kinds {
            for event in queue.recent_of_kind(kind, args.limit)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        return Ok(());
    }

    if stats.total == 0 {
        println!("No outreach tracked yet.");
        return Ok(());
    }

    println!(
        "{} connect requests, {} DMs ({} confirmed)",
        stats.connect, stats.message, stats.confirmed
    );
    for kind in kinds {
        let events = queue.recent_of_kind(kind, args.limit)?;
        if !events.is_empty() {
            print_section(section_title(kind), &events);
        }
    }

    Ok(())
}

fn section_title(kind: OutreachKind) -> &'static str {
    match kind {
        OutreachKind::Connect => "Connect requests",
        OutreachKind::Message => "DMs sent",
    }
}

fn print_section(title: &str, events: &[OutreachEvent]) {
    println!("\n{}", title);
    for event in events {
        print_event(event);
    }
}

fn print_event(event: &OutreachEvent) {
    println!("{}", event.display_name());
    println!("  {}", event.sent_line());
    println!("  {} ({})", event.kind.activity(), event.status);
    if !event.url.is_empty() {
        println!("  {}", event.url);
    }
}
