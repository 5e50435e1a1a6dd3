use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use raftmeta_kernel::config::{Peer, RaftConfig};
use raftmeta_kernel::store::StoreOptions;
use raftmeta_kernel::{ConsensusMetadataManager, ConsensusState, CreateMode};

mod logging;

/// Raftmeta consensus metadata tool
#[derive(Parser, Debug)]
#[command(name = "raftmeta")]
#[command(
    about = "Inspect and repair replica consensus metadata",
    long_about = "Inspect and repair replica consensus metadata.\n\n\
                  Run only against a stopped replica: opening the store removes \
                  temporary files, including those of a writer still in flight."
)]
struct Cli {
    /// Filesystem root holding the consensus metadata directory
    #[arg(long)]
    fs_root: PathBuf,

    /// Path to store options JSON
    #[arg(long)]
    options: Option<PathBuf>,

    /// Id of the local peer
    #[arg(long, default_value = "local")]
    peer_id: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a replica's consensus state as JSON
    Print { replica: String },

    /// Print the peer ids of a replica's committed config
    PrintReplicaIds { replica: String },

    /// Advance a replica's current term and flush it
    SetTerm { replica: String, term: i64 },

    /// Bootstrap a replica with a single-voter config
    Create {
        replica: String,

        /// Voter id (defaults to --peer-id)
        #[arg(long)]
        peer: Option<String>,

        #[arg(long, default_value_t = 0)]
        term: i64,
    },

    /// Permanently delete a replica's consensus metadata
    Delete { replica: String },
}

#[derive(Debug)]
enum Outcome {
    State(ConsensusState),
    ReplicaIds(Vec<String>),
    Done,
}

fn load_options(path: Option<&Path>) -> Result<StoreOptions> {
    match path {
        Some(path) => {
            let data = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(serde_json::from_str(&data)?)
        }
        None => Ok(StoreOptions::default_options()),
    }
}

fn run(
    manager: &ConsensusMetadataManager,
    command: Command,
) -> raftmeta_kernel::Result<Outcome> {
    match command {
        Command::Print { replica } => {
            let cmeta = manager.load(&replica)?;
            Ok(Outcome::State(cmeta.to_consensus_state()))
        }
        Command::PrintReplicaIds { replica } => {
            let cmeta = manager.load(&replica)?;
            let ids = cmeta
                .committed_config()
                .peers
                .into_iter()
                .map(|p| p.id)
                .collect();
            Ok(Outcome::ReplicaIds(ids))
        }
        Command::SetTerm { replica, term } => {
            let cmeta = manager.load(&replica)?;
            cmeta.set_current_term(term)?;
            cmeta.flush()?;
            Ok(Outcome::State(cmeta.to_consensus_state()))
        }
        Command::Create {
            replica,
            peer,
            term,
        } => {
            let peer = peer.unwrap_or_else(|| manager.peer_id().to_string());
            let config = RaftConfig::new(vec![Peer::voter(peer)]);
            let cmeta = manager.create(&replica, config, term, CreateMode::FlushOnCreate)?;
            Ok(Outcome::State(cmeta.to_consensus_state()))
        }
        Command::Delete { replica } => {
            manager.delete(&replica)?;
            Ok(Outcome::Done)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let options = load_options(cli.options.as_deref())?;
    let manager = ConsensusMetadataManager::open(&cli.fs_root, options, cli.peer_id.clone())
        .with_context(|| format!("opening {}", cli.fs_root.display()))?;

    let outcome = match run(&manager, cli.command) {
        Ok(outcome) => outcome,
        Err(err) if err.is_fatal() => {
            tracing::error!("consensus invariant violated: {err}");
            eprintln!("FATAL: {err}");
            std::process::abort();
        }
        Err(err) => return Err(err.into()),
    };

    match outcome {
        Outcome::State(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        Outcome::ReplicaIds(ids) => println!("{}", ids.join(" ")),
        Outcome::Done => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn manager(root: &TempDir) -> ConsensusMetadataManager {
        ConsensusMetadataManager::open(root.path(), StoreOptions::default_options(), "local")
            .unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn help_warns_about_live_replicas() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("stopped replica"));
    }

    #[test]
    fn create_set_term_print() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);

        run(
            &manager,
            Command::Create {
                replica: "t1".into(),
                peer: None,
                term: 1,
            },
        )
        .unwrap();

        let Outcome::State(state) = run(
            &manager,
            Command::SetTerm {
                replica: "t1".into(),
                term: 4,
            },
        )
        .unwrap() else {
            panic!("expected state");
        };
        assert_eq!(state.current_term, 4);

        // a fresh process sees the flushed term
        let restarted = self::manager(&root);
        let Outcome::ReplicaIds(ids) = run(
            &restarted,
            Command::PrintReplicaIds {
                replica: "t1".into(),
            },
        )
        .unwrap() else {
            panic!("expected ids");
        };
        assert_eq!(ids, vec!["local".to_string()]);
        assert_eq!(restarted.load("t1").unwrap().current_term(), 4);
    }

    #[test]
    fn lowering_the_term_is_fatal() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        run(
            &manager,
            Command::Create {
                replica: "t1".into(),
                peer: Some("a".into()),
                term: 5,
            },
        )
        .unwrap();

        let err = run(
            &manager,
            Command::SetTerm {
                replica: "t1".into(),
                term: 3,
            },
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn delete_twice() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        run(
            &manager,
            Command::Create {
                replica: "t1".into(),
                peer: None,
                term: 0,
            },
        )
        .unwrap();
        run(&manager, Command::Delete { replica: "t1".into() }).unwrap();
        let err = run(&manager, Command::Delete { replica: "t1".into() }).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn options_file_is_optional() {
        assert_eq!(load_options(None).unwrap(), StoreOptions::default_options());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{ "fsync": false }"#).unwrap();
        assert!(!load_options(Some(&path)).unwrap().fsync);
    }
}
