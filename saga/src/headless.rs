//! Headless mode for the story client.
//!
//! A simple text-based interface suitable for scripting and AI agents.

use saga_core::{
    headless::{HeadlessConfig, HeadlessGame},
    CharacterData, EquipmentSlot, PersistError, Scenario, SessionError, TurnError, TurnResult,
    ValidationError,
};
use std::io::{self, BufRead, Write};

/// Parsed command line options.
pub struct Options {
    pub config: HeadlessConfig,
    pub load: Option<String>,
    pub world_file: Option<String>,
}

const HELP: &[&str] = &[
    "  #quit                  - Exit the game",
    "  #save <path>           - Save the game",
    "  #load <path>           - Load a saved game",
    "  #export                - Print the game as JSON",
    "  #status                - Show current game status",
    "  #inventory             - List items and equipment",
    "  #equip <n>             - Equip inventory item n",
    "  #unequip <slot>        - Unequip weapon or armor",
    "  #lore                  - List lorebook entries",
    "  #lore add <key> = <v>  - Add a lorebook entry",
    "  #lore rm <n>           - Remove lorebook entry n",
    "  #suggestions           - List pending lore suggestions",
    "  #accept <n>            - Accept suggestion n",
    "  #dismiss <n|all>       - Dismiss suggestion n, or all",
    "  #goals                 - List goals",
    "  #goal add <text>       - Add a goal",
    "  #goal done <n>         - Toggle goal n",
    "  #goal rm <n>           - Remove goal n",
    "  #confess <npc>         - Confess your feelings",
    "  #propose <npc>         - Propose to the one you are dating",
    "  #chat <npc>            - Chat with a companion",
    "  #gift <n> <npc>        - Give inventory item n to a companion",
    "  #regen                 - Regenerate the last turn",
    "  #retry                 - Retry the last failed turn",
    "  #nsfw <on|off>         - Toggle adult content",
    "  #help                  - Show this help",
];

fn print_help() {
    for line in HELP {
        println!("{line}");
    }
}

/// Run the game in headless mode.
///
/// This provides a simple line-oriented protocol:
/// - Lines starting with `#` are commands
/// - Numbered choices like `1` pick a suggested action
/// - Anything else is sent as a player action
pub async fn run_headless(options: Options) -> Result<(), SessionError> {
    let mut game = match &options.load {
        Some(path) => HeadlessGame::load(path, options.config.session.clone()).await?,
        None => {
            let mut config = options.config;
            if let Some(path) = &options.world_file {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| SessionError::Persist(PersistError::Io(e)))?;
                config.scenario = Scenario::custom("", "", &content);
            }
            HeadlessGame::new(config)?
        }
    };

    println!("=== Saga Headless Mode ===");
    println!("Character: {}", game.player_name());
    println!("World: {}", game.world_title());
    println!("Time: {}", game.clock());
    println!();
    println!("Commands:");
    print_help();
    println!();

    if options.load.is_none() {
        run_turn(&game, TurnCommand::Opening).await;
    } else if let Some(last) = game.last_response() {
        println!("[STORY]");
        println!("{last}");
        println!();
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let parts: Vec<&str> = command.split_whitespace().collect();
            match parts.first().copied() {
                Some("quit") | Some("exit") => {
                    println!("Goodbye!");
                    break;
                }
                Some("save") => match parts.get(1) {
                    Some(path) => match game.save(path).await {
                        Ok(()) => println!("[SAVED] Game saved to {path}"),
                        Err(e) => println!("[ERROR] Save failed: {e}"),
                    },
                    None => println!("[ERROR] Usage: #save <path>"),
                },
                Some("load") => match parts.get(1) {
                    Some(path) => {
                        match HeadlessGame::load(path, game.session().config().clone()).await {
                            Ok(loaded) => {
                                game = loaded;
                                println!("[LOADED] Game loaded from {path}");
                                println!("[STATUS] {} in {}, {}", game.player_name(), game.world_title(), game.clock());
                            }
                            Err(e) => println!("[ERROR] Load failed: {e}"),
                        }
                    }
                    None => println!("[ERROR] Usage: #load <path>"),
                },
                Some("export") => match game.session().export_json() {
                    Ok(json) => println!("{json}"),
                    Err(e) => println!("[ERROR] Export failed: {e}"),
                },
                Some("status") => print_status(&game),
                Some("inventory") | Some("inv") => print_inventory(&game),
                Some("equip") => {
                    let item = game
                        .session()
                        .with_state(|s| pick(&s.inventory, parts.get(1)).map(|i| i.id));
                    match item {
                        Some(id) => match game.session().equip(id) {
                            Ok(slot) => println!("[OK] Equipped as {slot}"),
                            Err(e) => println!("[ERROR] {e}"),
                        },
                        None => println!("[ERROR] Usage: #equip <n> (see #inventory)"),
                    }
                }
                Some("unequip") => {
                    let slot = parts.get(1).copied().unwrap_or_default();
                    match EquipmentSlot::parse(slot) {
                        Some(slot) => match game.session().unequip(slot) {
                            Ok(Some(_)) => println!("[OK] {slot} slot emptied"),
                            Ok(None) => println!("[OK] Nothing equipped as {slot}"),
                            Err(e) => println!("[ERROR] {e}"),
                        },
                        None => println!("[ERROR] {}", ValidationError::UnknownSlot(slot.to_string())),
                    }
                }
                Some("lore") => handle_lore(&game, command),
                Some("suggestions") => print_suggestions(&game),
                Some("accept") => {
                    let id = game
                        .session()
                        .with_state(|s| pick(s.lore_suggestions.pending(), parts.get(1)).map(|l| l.id));
                    match id.map(|id| game.session().accept_suggestion(id)) {
                        Some(Ok(Some(_))) => println!("[OK] Added to the lorebook"),
                        Some(Ok(None)) | None => println!("[ERROR] Usage: #accept <n> (see #suggestions)"),
                        Some(Err(e)) => println!("[ERROR] {e}"),
                    }
                }
                Some("dismiss") => {
                    if parts.get(1) == Some(&"all") {
                        match game.session().dismiss_all_suggestions() {
                            Ok(n) => println!("[OK] Dismissed {n} suggestions"),
                            Err(e) => println!("[ERROR] {e}"),
                        }
                    } else {
                        let id = game.session().with_state(|s| {
                            pick(s.lore_suggestions.pending(), parts.get(1)).map(|l| l.id)
                        });
                        match id.map(|id| game.session().dismiss_suggestion(id)) {
                            Some(Ok(_)) => println!("[OK] Dismissed"),
                            Some(Err(e)) => println!("[ERROR] {e}"),
                            None => println!("[ERROR] Usage: #dismiss <n|all>"),
                        }
                    }
                }
                Some("goals") => print_goals(&game),
                Some("goal") => handle_goal(&game, command),
                Some("confess") | Some("propose") | Some("chat") => {
                    let npc = parts[1..].join(" ");
                    if npc.is_empty() {
                        println!("[ERROR] Usage: #{} <npc>", parts[0]);
                    } else {
                        let turn = match parts[0] {
                            "confess" => TurnCommand::Confess(npc),
                            "propose" => TurnCommand::Propose(npc),
                            _ => TurnCommand::Chat(npc),
                        };
                        run_turn(&game, turn).await;
                    }
                }
                Some("gift") => {
                    let item = game
                        .session()
                        .with_state(|s| pick(&s.inventory, parts.get(1)).map(|i| i.id));
                    let npc = parts.get(2..).map(|p| p.join(" ")).unwrap_or_default();
                    match item {
                        Some(id) if !npc.is_empty() => {
                            run_turn(&game, TurnCommand::Gift(npc, id)).await
                        }
                        _ => println!("[ERROR] Usage: #gift <n> <npc>"),
                    }
                }
                Some("regen") => run_turn(&game, TurnCommand::Regenerate).await,
                Some("retry") => run_turn(&game, TurnCommand::Retry).await,
                Some("nsfw") => {
                    let enabled = match parts.get(1).copied() {
                        Some("on") => Some(true),
                        Some("off") => Some(false),
                        _ => None,
                    };
                    match enabled.map(|on| game.session().set_nsfw(on)) {
                        Some(Ok(())) => println!("[OK] Adult content {}", parts[1]),
                        Some(Err(e)) => println!("[ERROR] {e}"),
                        None => println!("[ERROR] Usage: #nsfw <on|off>"),
                    }
                }
                Some("help") => {
                    println!("[HELP]");
                    print_help();
                    println!("  <n>                    - Take suggested action n");
                    println!("  (anything else is sent as player action)");
                }
                _ => {
                    println!("[ERROR] Unknown command. Type #help for help.");
                }
            }
            stdout.flush().ok();
            continue;
        }

        // A bare number picks one of the suggested actions.
        let action = match line.parse::<usize>() {
            Ok(n) => match game.suggested_actions().get(n.wrapping_sub(1)) {
                Some(action) => action.clone(),
                None => line.to_string(),
            },
            Err(_) => line.to_string(),
        };

        print!("[PROCESSING]");
        stdout.flush().ok();
        let result = game.send(&action).await;
        print!("\r            \r");
        stdout.flush().ok();
        report(&game, result);
    }

    Ok(())
}

enum TurnCommand {
    Opening,
    Confess(String),
    Propose(String),
    Chat(String),
    Gift(String, saga_core::ItemId),
    Regenerate,
    Retry,
}

async fn run_turn(game: &HeadlessGame, command: TurnCommand) {
    let session = game.session();
    print!("[PROCESSING]");
    io::stdout().flush().ok();

    let result = match command {
        TurnCommand::Opening => session.start_story(None).await,
        TurnCommand::Confess(npc) => session.confess(&npc).await,
        TurnCommand::Propose(npc) => session.propose(&npc).await,
        TurnCommand::Chat(npc) => session.chat_with(&npc).await,
        TurnCommand::Gift(npc, item) => session.give_gift(&npc, item).await,
        TurnCommand::Regenerate => session.regenerate().await,
        TurnCommand::Retry => session.retry().await,
    };

    print!("\r            \r");
    io::stdout().flush().ok();
    report(game, result);
}

fn report(game: &HeadlessGame, result: Result<TurnResult, TurnError>) {
    match result {
        Ok(turn) => {
            match turn.speaker.name() {
                Some(name) => println!("[{name}]"),
                None => println!("[STORY]"),
            }
            for para in turn.narrative.split("\n\n") {
                println!("{para}");
            }
            println!();
            if !turn.suggested_actions.is_empty() {
                println!("[ACTIONS]");
                for (i, action) in turn.suggested_actions.iter().enumerate() {
                    println!("  {}. {action}", i + 1);
                }
                println!();
            }
        }
        Err(e) if e.is_auth() => {
            println!("[ERROR] {e}");
            println!("[ERROR] The API key was rejected. Update ANTHROPIC_API_KEY and restart.");
        }
        Err(e @ TurnError::Stage(_)) => {
            println!("[ERROR] {e}");
            println!("[ERROR] Nothing was changed. Type #retry to try again.");
        }
        Err(e) => println!("[ERROR] {e}"),
    }

    for notice in game.session().take_notices() {
        println!("[NOTICE] {notice}");
    }
}

fn handle_lore(game: &HeadlessGame, command: &str) {
    let rest = command.trim_start_matches("lore").trim();
    if rest.is_empty() {
        let entries = game.session().with_state(|s| s.lorebook.entries().to_vec());
        println!("[LORE]");
        if entries.is_empty() {
            println!("  (empty)");
        }
        for (i, entry) in entries.iter().enumerate() {
            println!("  {}. {entry}", i + 1);
        }
    } else if let Some(body) = rest.strip_prefix("add ") {
        match body.split_once('=') {
            Some((key, value)) => match game.session().add_lore(key.trim(), value.trim()) {
                Ok(_) => println!("[OK] Added {}", key.trim()),
                Err(e) => println!("[ERROR] {e}"),
            },
            None => println!("[ERROR] Usage: #lore add <key> = <value>"),
        }
    } else if let Some(index) = rest.strip_prefix("rm ") {
        let index = index.trim();
        let id = game
            .session()
            .with_state(|s| pick(s.lorebook.entries(), Some(&index)).map(|e| e.id));
        match id.map(|id| game.session().remove_lore(id)) {
            Some(Ok(_)) => println!("[OK] Removed"),
            Some(Err(e)) => println!("[ERROR] {e}"),
            None => println!("[ERROR] Usage: #lore rm <n>"),
        }
    } else {
        println!("[ERROR] Usage: #lore, #lore add <key> = <value>, #lore rm <n>");
    }
}

fn handle_goal(game: &HeadlessGame, command: &str) {
    let rest = command.trim_start_matches("goal").trim();
    if let Some(text) = rest.strip_prefix("add ") {
        match game.session().add_goal(text) {
            Ok(_) => println!("[OK] Goal added"),
            Err(e) => println!("[ERROR] {e}"),
        }
        return;
    }

    let mut parts = rest.split_whitespace();
    let verb = parts.next();
    let index = parts.next();
    let id = game
        .session()
        .with_state(|s| pick(&s.goals, index.as_ref()).map(|g| g.id));
    let result = match (verb, id) {
        (Some("done"), Some(id)) => game.session().toggle_goal(id),
        (Some("rm"), Some(id)) => game.session().remove_goal(id),
        _ => {
            println!("[ERROR] Usage: #goal add <text>, #goal done <n>, #goal rm <n>");
            return;
        }
    };
    match result {
        Ok(_) => println!("[OK]"),
        Err(e) => println!("[ERROR] {e}"),
    }
}

fn print_status(game: &HeadlessGame) {
    println!("[STATUS]");
    println!("  Character: {}", game.player_name());
    println!("  World: {}", game.world_title());
    println!("  Time: {}", game.clock());
    println!("  Actions taken: {}", game.turn_count());
    if let Some(relationship) = game.relationship() {
        println!("  Relationship: {relationship}");
    }
    let companions = game.companions();
    if !companions.is_empty() {
        println!("  Companions: {}", companions.join(", "));
    }
    for (npc, score, tier) in game.affinities() {
        println!("  {npc}: {score} ({tier})");
    }
    game.session().with_state(|s| {
        if let Some(pregnancy) = &s.pregnancy {
            println!(
                "  Expecting a child with {}: week {}",
                pregnancy.partner_name,
                pregnancy.weeks(s.clock)
            );
        }
    });
    if game.session().is_compacting() {
        println!("  (summarizing the story so far...)");
    }
}

fn print_inventory(game: &HeadlessGame) {
    game.session().with_state(|s| {
        println!("[INVENTORY]");
        for slot in EquipmentSlot::ALL {
            if let Some(item) = s.equipment.get(slot) {
                println!("  {slot}: {}", item.name);
            }
        }
        if s.inventory.is_empty() {
            println!("  (nothing carried)");
        }
        for (i, item) in s.inventory.iter().enumerate() {
            println!("  {}. {} [{}] {}", i + 1, item.name, item.category.name(), item.description);
        }
    });
}

fn print_suggestions(game: &HeadlessGame) {
    game.session().with_state(|s| {
        println!("[SUGGESTIONS]");
        if s.lore_suggestions.is_empty() {
            println!("  (none)");
        }
        for (i, suggestion) in s.lore_suggestions.pending().iter().enumerate() {
            println!("  {}. {}: {}", i + 1, suggestion.key, suggestion.value);
        }
    });
}

fn print_goals(game: &HeadlessGame) {
    game.session().with_state(|s| {
        println!("[GOALS]");
        if s.goals.is_empty() {
            println!("  (none)");
        }
        for (i, goal) in s.goals.iter().enumerate() {
            let mark = if goal.completed { "x" } else { " " };
            println!("  {}. [{mark}] {}", i + 1, goal.text);
        }
    });
}

/// Pick the 1-based `index` from `items`.
fn pick<'a, T>(items: &'a [T], index: Option<&&str>) -> Option<&'a T> {
    let n: usize = index?.parse().ok()?;
    items.get(n.checked_sub(1)?)
}

/// Parse options from command line arguments.
pub fn parse_options_from_args(args: &[String]) -> Options {
    let mut character = CharacterData::new("Traveller");
    let mut config = HeadlessConfig::quick_start("Traveller");
    let mut load = None;
    let mut world_file = None;

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--name", Some(v)) => {
                character.name = v;
                i += 1;
            }
            ("--gender", Some(v)) => {
                character.gender = v;
                i += 1;
            }
            ("--appearance", Some(v)) => {
                character.appearance = v;
                i += 1;
            }
            ("--personality", Some(v)) => {
                character.personality = v;
                i += 1;
            }
            ("--background", Some(v)) => {
                character.background = v;
                i += 1;
            }
            ("--world", Some(v)) => {
                world_file = Some(v);
                i += 1;
            }
            ("--load", Some(v)) => {
                load = Some(v);
                i += 1;
            }
            ("--nsfw", _) => config.nsfw = true,
            _ => {}
        }
        i += 1;
    }

    if let Ok(model) = std::env::var("SAGA_MODEL") {
        config.session.pipeline = config.session.pipeline.clone().with_model(model);
    }

    Options {
        config: config.with_character(character),
        load,
        world_file,
    }
}
