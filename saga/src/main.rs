//! Headless narrative role-play client.
//!
//! A line-oriented interface for playing a story with a language model as
//! the storyteller. Player actions are read from stdin; the story is written
//! to stdout and logs go to stderr.
//!
//! ```bash
//! cargo run -p saga -- --name "Lan" --gender female --world river_town.txt
//! ```

mod headless;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Check for API key
    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let options = headless::parse_options_from_args(&args);
    headless::run_headless(options).await.map_err(|e| e.into())
}

fn print_help() {
    println!("saga - narrative role-play with a language model storyteller");
    println!();
    println!("USAGE:");
    println!("  saga [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help              Show this help message");
    println!("  --name <NAME>           Character name (default: Traveller)");
    println!("  --gender <GENDER>       Character gender");
    println!("  --appearance <TEXT>     What the character looks like");
    println!("  --personality <TEXT>    How the character behaves");
    println!("  --background <TEXT>     Where the character comes from");
    println!("  --world <FILE>          Text file describing the world to play in");
    println!("  --nsfw                  Allow adult content");
    println!("  --load <FILE>           Continue a saved game");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY       Required");
    println!("  SAGA_MODEL              Model for the story stages");
    println!("  RUST_LOG                Log filter (default: warn)");
    println!();
    println!("EXAMPLES:");
    println!("  saga --name Lan --gender female --background \"tea seller\"");
    println!("  saga --world river_town.txt --nsfw");
    println!("  saga --load saves/Lan.json");
}
