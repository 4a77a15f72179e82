//! CLI argument definitions and command execution.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use serde::Serialize;
use tracing::info;

use blockwitness_core::hash::{hash_reader, is_digest};
use blockwitness_core::ledger::{ChainReport, Ledger, MatchedLeaf};
use blockwitness_core::{Database, EvidenceItem, LedgerConfig, ReportCandidate};

use crate::Exit;

/// BlockWitness - tamper-evident evidence ledger
#[derive(Debug, Parser)]
#[command(name = "blockwitness", version, about, long_about = None, propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "BLOCKWITNESS_CONFIG",
        value_hint = ValueHint::FilePath
    )]
    pub config: Option<PathBuf>,

    /// Ledger database, overriding the configuration
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Seal a report and its evidence files into a new block
    Submit {
        /// Evidence files, in order
        #[arg(value_hint = ValueHint::FilePath)]
        files: Vec<PathBuf>,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        uploader: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        location: String,

        /// When the recorded events happened
        #[arg(long, default_value = "")]
        time: String,

        /// Media type recorded for every file
        #[arg(long, default_value = "application/octet-stream")]
        media_type: String,
    },

    /// Show a block and its transactions
    Block { index: u64 },

    /// List the most recent blocks
    List {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Every block, newest first, with its transactions
    Timeline,

    /// Build a Merkle inclusion proof for a block leaf
    Proof {
        index: u64,

        /// Leaf digest; defaults to the report digest
        #[arg(long)]
        leaf: Option<String>,

        /// Print the portable export format instead
        #[arg(long)]
        export: bool,
    },

    /// Re-verify the whole chain; exits 1 if problems are found
    Verify {
        /// Also rebuild every block's Merkle root from stored reports
        #[arg(long)]
        merkle: bool,
    },

    /// Find ledger entries containing a file or digest
    Find {
        /// A file path or a hex SHA-256 digest
        target: String,
    },

    /// Certificate data for a committed report
    Certificate { report_id: String },
}

impl Cli {
    fn load_config(&self) -> Result<LedgerConfig> {
        let mut config = LedgerConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;
        if let Some(db) = &self.db {
            config.database_path = db.clone();
        }
        Ok(config)
    }

    pub fn execute(self) -> Result<Exit> {
        let config = self.load_config()?;
        let db = Database::open_with_timeout(&config.database_path, config.busy_timeout())
            .with_context(|| format!("failed to open {}", config.database_path.display()))?;
        info!(path = %config.database_path.display(), "opened ledger");

        let out = Output {
            format: self.format,
        };
        let ledger = Ledger::with_config(&db, config);

        match self.command {
            Commands::Submit {
                files,
                title,
                uploader,
                description,
                location,
                time,
                media_type,
            } => {
                let mut candidate = ReportCandidate::new(title, uploader)
                    .with_description(description)
                    .with_location(location)
                    .with_time(time);
                for path in &files {
                    let item = EvidenceItem::from_file(path, &media_type)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    candidate = candidate.with_evidence(item);
                }

                let receipt = ledger.submit(candidate)?;
                out.emit(&receipt, || {
                    format!(
                        "report {} sealed in block {}\n  tx:          {}\n  block hash:  {}\n  merkle root: {}",
                        receipt.report_id,
                        receipt.block_index,
                        receipt.tx_id,
                        receipt.block_hash,
                        receipt.merkle_root
                    )
                })?;
            }

            Commands::Block { index } => {
                let detail = ledger.get_block(index)?;
                out.emit(&detail, || {
                    let b = &detail.block;
                    let mut text = format!(
                        "block {}\n  timestamp:     {}\n  previous hash: {}\n  merkle root:   {}\n  block hash:    {}",
                        b.index, b.timestamp, b.previous_hash, b.merkle_root, b.block_hash
                    );
                    for tx in &detail.transactions {
                        text.push_str(&format!(
                            "\n  {}  {} ({})  report {}",
                            tx.tx_id, tx.title, tx.uploader, tx.report_id
                        ));
                    }
                    text
                })?;
            }

            Commands::List { limit } => {
                let blocks = ledger.list_recent_blocks(limit)?;
                out.emit(&blocks, || {
                    blocks
                        .iter()
                        .map(|b| format!("{:>6}  {}  {}", b.index, b.timestamp, b.block_hash))
                        .collect::<Vec<_>>()
                        .join("\n")
                })?;
            }

            Commands::Timeline => {
                let entries = ledger.timeline()?;
                out.emit(&entries, || {
                    entries
                        .iter()
                        .map(|e| {
                            let titles: Vec<&str> =
                                e.transactions.iter().map(|t| t.title.as_str()).collect();
                            format!("{:>6}  {}  {}", e.index, e.timestamp, titles.join(", "))
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })?;
            }

            Commands::Proof {
                index,
                leaf,
                export,
            } => {
                let report = ledger.get_merkle_proof(index, leaf.as_deref())?;
                if export {
                    match report.to_merkle_proof() {
                        Some(proof) => println!("{}", proof.to_export_format().to_json()?),
                        None => bail!("leaf {} is not part of block {}", report.leaf, index),
                    }
                } else {
                    out.emit(&report, || {
                        let mut text = format!(
                            "leaf:  {}\nroot:  {}\nvalid: {}",
                            report.leaf, report.root, report.valid
                        );
                        match &report.proof {
                            Some(steps) => {
                                for step in steps {
                                    text.push_str(&format!(
                                        "\n  {:<5} {}",
                                        step.position.as_str(),
                                        step.sibling
                                    ));
                                }
                            }
                            None => text.push_str("\nleaf not found in block"),
                        }
                        text
                    })?;
                }
            }

            Commands::Verify { merkle } => {
                let mut report = ledger.verify_chain()?;
                if merkle {
                    let roots = ledger.verify_merkle_roots()?;
                    report.problems.extend(roots.problems);
                    report = ChainReport::from(report.problems);
                }
                out.emit(&report, || {
                    if report.ok {
                        "chain verified: no problems".to_string()
                    } else {
                        report
                            .problems
                            .iter()
                            .map(|p| p.to_string())
                            .collect::<Vec<_>>()
                            .join("\n")
                    }
                })?;
                if !report.ok {
                    return Ok(Exit::IntegrityFailure);
                }
            }

            Commands::Find { target } => {
                let digest = resolve_digest(&target)?;
                let matches = ledger.find_by_digest(&digest)?;
                out.emit(&matches, || {
                    if matches.is_empty() {
                        format!("{} not found in ledger", digest)
                    } else {
                        matches
                            .iter()
                            .map(|m| {
                                let matched = match &m.matched {
                                    MatchedLeaf::Evidence { stored_name } => {
                                        format!("evidence {}", stored_name)
                                    }
                                    MatchedLeaf::Report => "report digest".to_string(),
                                };
                                format!(
                                    "block {}  tx {}  report {}  {}",
                                    m.block_index, m.tx_id, m.report_id, matched
                                )
                            })
                            .collect::<Vec<_>>()
                            .join("\n")
                    }
                })?;
            }

            Commands::Certificate { report_id } => {
                let cert = ledger.certificate(&report_id)?;
                out.emit(&cert, || {
                    format!(
                        "report:      {} ({})\nuploader:    {}\ntransaction: {}\nblock:       {} {}\nverify at:   {}",
                        cert.report.report_id,
                        cert.report.title,
                        cert.report.uploader,
                        cert.transaction.tx_id,
                        cert.block.index,
                        cert.block.block_hash,
                        cert.verification_url
                    )
                })?;
            }
        }

        Ok(Exit::Success)
    }
}

/// A lookup target is an existing file (hashed) or a literal digest.
fn resolve_digest(target: &str) -> Result<String> {
    let path = Path::new(target);
    if path.is_file() {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        return Ok(hash_reader(std::io::BufReader::new(file))?);
    }

    let digest = target.trim().to_lowercase();
    if !is_digest(&digest) {
        bail!("{} is neither a file nor a SHA-256 hex digest", target);
    }
    Ok(digest)
}

struct Output {
    format: OutputFormat,
}

impl Output {
    fn emit<T, F>(&self, value: &T, text: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce() -> String,
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", text()),
        }
        Ok(())
    }
}
