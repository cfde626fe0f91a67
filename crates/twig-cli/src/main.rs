//! twig - a minimal git-compatible version control tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod logging;
mod transport;

use config::Config;

/// twig - a minimal git-compatible version control tool
#[derive(Parser, Debug)]
#[command(name = "twig")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a YAML configuration file
    #[arg(long, env = "TWIG_CONFIG")]
    config: Option<PathBuf>,

    /// Run as if started in this directory
    #[arg(short = 'C', long, default_value = ".")]
    work_tree: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty repository
    Init {
        /// Directory to initialize (default: the working tree)
        path: Option<PathBuf>,
    },

    /// Print the content of an object
    CatFile {
        /// Pretty-print the object's content
        #[arg(short = 'p')]
        pretty: bool,
        /// Object id
        object: String,
    },

    /// Compute the blob id of a file
    HashObject {
        /// Store the blob in the object database
        #[arg(short = 'w')]
        write: bool,
        /// File to hash
        file: PathBuf,
    },

    /// List the contents of a tree
    LsTree {
        /// Print only entry names
        #[arg(long)]
        name_only: bool,
        /// Tree or commit id
        tree: String,
    },

    /// Snapshot the working tree as a tree object
    WriteTree,

    /// Create a commit object
    CommitTree {
        /// Tree id
        tree: String,
        /// Parent commit ids
        #[arg(short = 'p')]
        parents: Vec<String>,
        /// Commit message
        #[arg(short = 'm')]
        message: String,
    },

    /// Clone a repository over smart HTTP
    Clone {
        /// Repository URL
        url: String,
        /// Destination directory
        dir: Option<PathBuf>,
        /// Do not check out a working tree
        #[arg(long)]
        bare: bool,
    },
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    let out = &mut stdout;
    let root = cli.work_tree.as_path();

    match cli.command {
        Commands::Init { path } => {
            let target = path.map_or_else(|| root.to_path_buf(), |p| root.join(p));
            commands::init(&target, &config, out)
        }
        Commands::CatFile { pretty, object } => {
            if !pretty {
                anyhow::bail!("cat-file: only -p is supported");
            }
            commands::cat_file(root, &config, &object, out)
        }
        Commands::HashObject { write, file } => {
            commands::hash_object(root, &config, &file, write, out)
        }
        Commands::LsTree { name_only, tree } => {
            commands::ls_tree(root, &config, &tree, name_only, out)
        }
        Commands::WriteTree => commands::write_tree(root, &config, out),
        Commands::CommitTree {
            tree,
            parents,
            message,
        } => commands::commit_tree(root, &config, &tree, &parents, &message, out),
        Commands::Clone { url, dir, bare } => {
            commands::clone(root, &config, &url, dir.as_deref(), bare, out).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    logging::init_logging(
        logging::level_for(cli.verbose, &config.log_level),
        config.log_format,
    );

    if let Err(e) = run(cli, config).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commit_tree() {
        let cli = Cli::try_parse_from([
            "twig", "commit-tree", "abc", "-p", "p1", "-p", "p2", "-m", "msg",
        ])
        .unwrap();
        match cli.command {
            Commands::CommitTree {
                tree,
                parents,
                message,
            } => {
                assert_eq!(tree, "abc");
                assert_eq!(parents, vec!["p1", "p2"]);
                assert_eq!(message, "msg");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["twig", "-vv", "-C", "/tmp/repo", "ls-tree", "--name-only", "t"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.work_tree, PathBuf::from("/tmp/repo"));
        assert!(matches!(cli.command, Commands::LsTree { name_only: true, .. }));
    }
}
