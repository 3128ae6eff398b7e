#![forbid(unsafe_code)]
//! Command-line front end for Blogochain
//!
//! Runs one command against a fresh in-memory ledger, or keeps the ledger
//! alive across commands in interactive mode. `watch` attaches to a running
//! server's websocket and prints what it pushes.

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use std::io::{self, BufRead, Write};
use std::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use blogochain::blockchain::Blockchain;
use blogochain::protocol::{Inbound, Outbound};

const DEFAULT_DIFFICULTY: u32 = 4;

#[derive(Parser)]
#[command(author, version, about = "Blogochain command-line interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new blockchain with the given difficulty
    CreateChain {
        difficulty: Option<u32>,
    },
    /// Add a transaction to the pending pool
    AddTx {
        #[arg(required = true, num_args = 1..)]
        data: Vec<String>,
    },
    /// Mine a block with the pending transactions
    MineBlock,
    /// Display the entire blockchain
    ShowChain,
    /// Validate the blockchain integrity
    Validate,
    /// Search transactions across all blocks
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Show blockchain status
    Status,
    /// Discard the current blockchain
    Reset,
    /// Start an interactive shell
    Interactive,
    /// Follow a running server's live feed
    Watch {
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,
        /// Name announced to the server
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Default)]
struct Shell {
    ledger: Option<Blockchain>,
}

impl Shell {
    fn ledger(&mut self, difficulty: Option<u32>) -> Result<&Blockchain, Box<dyn std::error::Error>> {
        if self.ledger.is_none() {
            let difficulty = difficulty.unwrap_or(DEFAULT_DIFFICULTY);
            println!("{}", format!("⛓️  Creating new blockchain with difficulty {}", difficulty).bright_cyan());
            self.ledger = Some(Blockchain::new(difficulty)?);
        }
        self.ledger.as_ref().ok_or_else(|| "blockchain unavailable".into())
    }

    fn execute(&mut self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::CreateChain { difficulty } => {
                let bc = self.ledger(difficulty)?;
                println!("Blockchain created with {} blocks", bc.len());
                println!("Current difficulty: {}", bc.get_difficulty());
                println!("Pending transactions: {}", bc.get_pending_transactions().len());
            }
            Commands::AddTx { data } => {
                let data = data.join(" ");
                let bc = self.ledger(None)?;
                bc.add_transaction(data.clone());
                println!("{} {}", "Transaction added:".green(), data);
                println!("Total pending: {}", bc.get_pending_transactions().len());
            }
            Commands::MineBlock => mine_block(self.ledger(None)?),
            Commands::ShowChain => show_chain(self.ledger(None)?),
            Commands::Validate => validate_chain(self.ledger(None)?),
            Commands::Search { query } => search(self.ledger(None)?, &query.join(" ")),
            Commands::Status => self.status(),
            Commands::Reset => self.reset()?,
            Commands::Interactive | Commands::Watch { .. } => {
                println!("{}", "Already running; this command is only available from the shell prompt.".yellow());
            }
        }
        Ok(())
    }

    fn status(&self) {
        let Some(bc) = &self.ledger else {
            println!("Blockchain Status: Not initialized");
            println!("Use 'create-chain [difficulty]' to initialize");
            return;
        };

        println!("{}", "Blockchain Status".bold());
        println!("{}", "=".repeat(30));
        println!("Total blocks: {}", bc.len());
        println!("Difficulty: {}", bc.get_difficulty());
        println!("Pending transactions: {}", bc.get_pending_transactions().len());
        println!("Chain valid: {}", bc.is_valid());

        if let Some(latest) = bc.latest_block() {
            println!("Latest block: #{}", latest.index);
            println!("Latest hash: {}...", short_hash(&latest.hash));
            println!("Latest timestamp: {}", latest.timestamp.format("%H:%M:%S"));
        }

        let hashrate = bc.last_hashrate();
        if hashrate > 0.0 {
            println!("Last hashrate: {:.2} H/s", hashrate);
        }
    }

    fn reset(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        print!("Are you sure you want to reset the blockchain? (y/N): ");
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        let answer = answer.trim().to_lowercase();
        if answer == "y" || answer == "yes" {
            self.ledger = None;
            println!("{}", "Blockchain reset successfully!".green());
            println!("Use 'create-chain [difficulty]' to create a new blockchain");
        } else {
            println!("Reset cancelled");
        }
        Ok(())
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

fn mine_block(bc: &Blockchain) {
    let pending = bc.get_pending_transactions();
    if pending.is_empty() {
        println!("{}", "No pending transactions to mine".yellow());
        println!("Use 'add-tx <data>' to add transactions first");
        return;
    }

    println!("Mining block with {} pending transactions...", pending.len());
    println!("Current difficulty: {}", bc.get_difficulty());
    println!("{}", "-".repeat(40));

    let start = Instant::now();
    let block = bc.mine_block();
    let elapsed = start.elapsed();

    match block {
        Some(block) => {
            println!("\n{}", "✅ Block mined successfully!".bright_green().bold());
            println!("Block #{}", block.index);
            println!("Hash: {}", block.hash);
            println!("Nonce: {}", block.nonce);
            println!("Mining time: {}", humantime::format_duration(elapsed));
            println!("Hashrate: {:.2} H/s", bc.last_hashrate());
        }
        None => println!("{}", "Nothing was mined".yellow()),
    }
}

fn show_chain(bc: &Blockchain) {
    let chain = bc.get_chain();

    println!("{}", "Blockchain Overview".bold());
    println!("{}", "=".repeat(50));
    println!("Total blocks: {}", chain.len());
    println!("Current difficulty: {}", bc.get_difficulty());
    println!("Pending transactions: {}", bc.get_pending_transactions().len());
    println!("Chain valid: {}", bc.is_valid());
    println!();

    for (i, block) in chain.iter().enumerate() {
        println!("{}", format!("Block #{}", block.index).bright_cyan());
        println!("  Timestamp: {}", block.timestamp.format("%Y-%m-%d %H:%M:%S"));
        println!("  Hash: {}", block.hash);
        println!("  Previous: {}", block.prev_hash);
        println!("  Nonce: {}", block.nonce);
        println!("  Difficulty: {}", block.difficulty);
        println!("  Merkle Root: {}", block.merkle_root);
        println!("  Transactions ({}):", block.transactions.len());
        for (j, tx) in block.transactions.iter().enumerate() {
            println!("    {}. {}", j + 1, tx);
        }
        if i + 1 < chain.len() {
            println!("{}", "-".repeat(30));
        }
    }
}

fn validate_chain(bc: &Blockchain) {
    println!("Validating blockchain...");
    println!("{}", "=".repeat(30));

    let start = Instant::now();
    let result = bc.validate();
    let elapsed = start.elapsed();

    match &result {
        Ok(()) => println!("{}", "Blockchain is valid!".green().bold()),
        Err(e) => println!("{} {}", "Blockchain validation failed:".red().bold(), e),
    }
    if result.is_err() && bc.validate_as_sealed().is_ok() {
        println!(
            "{}",
            "Every block meets the difficulty it was sealed at; the current difficulty is higher.".yellow()
        );
    }

    let chain = bc.get_chain();
    println!("Validation time: {}", humantime::format_duration(elapsed));
    println!("Total blocks validated: {}", chain.len());
    println!("\nDetailed validation:");

    let difficulty = bc.get_difficulty();
    for (i, block) in chain.iter().enumerate() {
        let verdict = if i > 0 && block.prev_hash != chain[i - 1].hash {
            "Previous hash mismatch".red()
        } else if block.hash != block.calculate_hash() {
            "Hash mismatch".red()
        } else if i > 0 && !block.is_valid(difficulty) {
            format!("Below current difficulty {}", difficulty).yellow()
        } else {
            "OK".green()
        };
        println!("  Block #{}: {}", block.index, verdict);
    }
}

fn search(bc: &Blockchain, query: &str) {
    let results = bc.search_data(query);

    println!("Search results for \"{}\":", query);
    println!("{}", "=".repeat(40));

    if results.is_empty() {
        println!("No transactions found matching the query");
        return;
    }

    println!("Found {} blocks containing the query:\n", results.len());
    let needle = query.to_lowercase();
    for block in results {
        println!("Block #{} (Hash: {}...)", block.index, short_hash(&block.hash));
        println!("  Timestamp: {}", block.timestamp.format("%Y-%m-%d %H:%M:%S"));
        println!("  Matching transactions:");
        for (i, tx) in block.transactions.iter().enumerate() {
            if tx.to_lowercase().contains(&needle) {
                println!("    {}. {}", i + 1, tx);
            }
        }
        println!();
    }
}

fn interactive(shell: &mut Shell) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "Blogochain CLI".bright_cyan().bold());
    println!("Type 'help' for available commands or 'exit' to quit");
    println!("{}", "=".repeat(50));

    let stdin = io::stdin();
    loop {
        print!("\nblogochain> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => {
                println!("Goodbye!");
                break;
            }
            "clear" => {
                print!("\x1b[2J\x1b[H");
                println!("Blogochain Interactive CLI");
                continue;
            }
            _ => {}
        }

        let args = std::iter::once("blogochain").chain(input.split_whitespace());
        match Cli::try_parse_from(args) {
            Ok(Cli { command: Some(command) }) => {
                if let Err(e) = shell.execute(command) {
                    eprintln!("{} {}", "Error:".red(), e);
                }
            }
            Ok(Cli { command: None }) => {}
            Err(e) => {
                let _ = e.print();
            }
        }
    }
    Ok(())
}

async fn watch(url: &str, name: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await?;
    println!("{} {}", "Connected to".green(), url);

    if let Some(name) = name {
        let hello = serde_json::to_string(&Inbound::Hello { name })?;
        socket.send(Message::Text(hello)).await?;
    }

    while let Some(frame) = socket.next().await {
        match frame? {
            Message::Text(text) => match Outbound::decode(&text) {
                Ok(message) => print_outbound(&message),
                Err(_) => println!("{}", text),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    println!("{}", "Disconnected".yellow());
    Ok(())
}

fn print_outbound(message: &Outbound) {
    match message {
        Outbound::Metrics(m) => println!(
            "{} viewers={} hashrate={:.2} pending={} blocks={} difficulty={} server={:.2} H/s",
            "[metrics]".dimmed(),
            m.miners,
            m.total_hashrate,
            m.pending,
            m.chain_len,
            m.difficulty,
            m.server_hashrate
        ),
        Outbound::Chain { blocks } => {
            let tip = blocks.last().map(|b| short_hash(&b.hash).to_string()).unwrap_or_default();
            println!("{} {} blocks, tip {}...", "[chain]".bright_cyan(), blocks.len(), tip);
        }
        Outbound::MiningStatus(s) if s.mining => println!(
            "{} mining block #{} at difficulty {}",
            "[mining]".bright_yellow(),
            s.block_index,
            s.difficulty
        ),
        Outbound::MiningStatus(s) => println!("{} block #{} done", "[mining]".bright_yellow(), s.block_index),
        Outbound::PendingTransactions { transactions } => {
            println!("{} {:?}", "[pending]".bright_blue(), transactions)
        }
        Outbound::AddTransactionResponse(r)
        | Outbound::MineBlockResponse(r)
        | Outbound::SetDifficultyResponse(r)
        | Outbound::SearchChainResponse(r) => {
            let tag = if r.success { "[ok]".green() } else { "[failed]".red() };
            println!("{} {}", tag, r.message);
        }
        Outbound::Error { message } => println!("{} {}", "[error]".red(), message),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut shell = Shell::default();

    match cli.command {
        None | Some(Commands::Interactive) => interactive(&mut shell)?,
        Some(Commands::Watch { url, name }) => watch(&url, name).await?,
        Some(command) => shell.execute(command)?,
    }

    Ok(())
}
