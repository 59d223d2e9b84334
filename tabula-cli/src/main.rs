use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use tabula_core::{
    BadRowAction, Column, Commit, CommitMeta, Config, DiffRow, DiffType, DoltRef, FastForward,
    Hash, PullMode, PullProgress, Repo, RootValue, Row, RowDiffSource, Schema, Table, ValueKind,
};

/// Repository data lives under this directory of the working directory.
const DATA_DIR: &str = ".tabula";
const CONFIG_FILE: &str = "config.toml";
const STATE_FILE: &str = "repo_state.json";

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Versioned tables with branches, commits and diffs", long_about = None)]
struct Cli {
    /// Path to the repository
    #[arg(long, default_value = ".", global = true)]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty repository
    Init {
        /// Author name recorded in commits
        #[arg(long)]
        name: String,

        /// Author email recorded in commits
        #[arg(long)]
        email: String,
    },

    /// Add an empty table to the working set
    CreateTable {
        /// Table name
        name: String,

        /// Columns as name:type, with a trailing :pk for key columns
        #[arg(required = true)]
        columns: Vec<String>,
    },

    /// Insert or overwrite a row in the working set
    PutRow {
        /// Table name
        table: String,

        /// Column values as name=value
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Record the working set as a new commit on the current branch
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Show commit history
    Log {
        /// Start from this commit (default: HEAD)
        spec: Option<String>,

        /// Maximum number of commits to show
        #[arg(short = 'n', long, default_value = "10")]
        max_count: usize,
    },

    /// List, create or delete branches
    Branch {
        /// Branch name (if not provided, lists all branches)
        name: Option<String>,

        /// Create branch from this commit (default: HEAD)
        #[arg(short, long)]
        from: Option<String>,

        /// Delete the named branch
        #[arg(short, long)]
        delete: bool,
    },

    /// Switch to a different branch
    Checkout {
        /// Branch name to checkout
        branch: String,
    },

    /// Show row changes between two commits
    Diff {
        /// Old side: a commit, WORKING or STAGED
        from: String,

        /// New side: a commit, WORKING or STAGED
        to: String,

        /// Only diff this table
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Fetch a branch from another repository and fast-forward to it
    Pull {
        /// Path to the source repository
        src_repo: PathBuf,

        /// Branch to pull
        branch: String,

        /// Copy one chunk per round trip instead of batching
        #[arg(long)]
        one_at_a_time: bool,
    },

    /// Reset the staged (and with --hard, working) tables to HEAD
    Reset {
        /// Discard working changes too
        #[arg(long)]
        hard: bool,

        /// Only unstage (the default)
        #[arg(long)]
        soft: bool,
    },
}

/// Uncommitted roots, kept next to the refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RepoState {
    working: String,
    staged: String,
}

impl RepoState {
    fn at(root: Hash) -> Self {
        RepoState {
            working: root.to_hex(),
            staged: root.to_hex(),
        }
    }

    fn working(&self) -> anyhow::Result<Hash> {
        Hash::from_hex(&self.working).context("corrupt working root in repo state")
    }

    fn staged(&self) -> anyhow::Result<Hash> {
        Hash::from_hex(&self.staged).context("corrupt staged root in repo state")
    }
}

/// An opened repository plus its uncommitted state.
struct Workspace {
    data_dir: PathBuf,
    repo: Repo,
    state: RepoState,
}

impl Workspace {
    fn open(repo_path: &Path) -> anyhow::Result<Self> {
        let data_dir = repo_path.join(DATA_DIR);
        if !data_dir.is_dir() {
            bail!(
                "{} is not a tabula repository (run `tabula init`)",
                repo_path.display()
            );
        }
        let config = load_config(&data_dir)?;
        let repo = Repo::open(&data_dir, config)
            .with_context(|| format!("failed to open repository at {}", data_dir.display()))?;
        let state_path = data_dir.join(STATE_FILE);
        let content = std::fs::read_to_string(&state_path)
            .with_context(|| format!("failed to read {}", state_path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", state_path.display()))?;
        Ok(Workspace {
            data_dir,
            repo,
            state,
        })
    }

    fn save_state(&self) -> anyhow::Result<()> {
        write_state(&self.data_dir, &self.state)
    }

    fn working_root(&self) -> anyhow::Result<RootValue> {
        Ok(self.repo.read_root_value(self.state.working()?)?)
    }

    fn set_working(&mut self, root: &RootValue) -> anyhow::Result<()> {
        self.state.working = root.write()?.to_hex();
        self.save_state()
    }

    /// True when nothing differs from the head commit.
    fn is_clean(&self) -> anyhow::Result<bool> {
        let head = self.repo.head_commit()?.root;
        Ok(self.state.working()? == head && self.state.staged()? == head)
    }

    /// Root hash for a diff side: a commit spec, or WORKING/STAGED.
    fn resolve_root(&self, name: &str) -> anyhow::Result<Hash> {
        match name.to_ascii_uppercase().as_str() {
            "WORKING" => self.state.working(),
            "STAGED" => self.state.staged(),
            _ => Ok(self
                .repo
                .resolve_str(name)
                .with_context(|| format!("cannot resolve '{}'", name))?
                .root),
        }
    }
}

fn load_config(data_dir: &Path) -> anyhow::Result<Config> {
    let path = data_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn write_state(data_dir: &Path, state: &RepoState) -> anyhow::Result<()> {
    let path = data_dir.join(STATE_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(state)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Parse `name:type` or `name:type:pk`.
fn parse_column(text: &str, tag: u64) -> anyhow::Result<Column> {
    let parts: Vec<&str> = text.split(':').collect();
    let (name, kind, pk) = match parts.as_slice() {
        [name, kind] => (*name, *kind, false),
        [name, kind, flag] if flag.eq_ignore_ascii_case("pk") => (*name, *kind, true),
        _ => bail!("bad column '{}': expected name:type[:pk]", text),
    };
    let kind: ValueKind = kind.parse()?;
    let column = Column::new(name, tag, kind);
    Ok(if pk { column.primary_key() } else { column })
}

/// Parse `col=value` pairs against a schema.
fn parse_row(schema: &Schema, assignments: &[String]) -> anyhow::Result<Row> {
    let mut row = Row::new();
    for assignment in assignments {
        let (name, text) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("bad value '{}': expected col=value", assignment))?;
        let column = schema
            .by_name(name)
            .ok_or_else(|| anyhow!("no column named '{}'", name))?;
        row.set(column.tag, column.kind.parse_value(text)?);
    }
    Ok(row)
}

fn format_row(schema: &Schema, row: &Row) -> String {
    schema
        .columns()
        .iter()
        .filter_map(|c| row.get(c.tag).map(|v| format!("{}={}", c.name, v)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_date(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(date) => date.format("%a %b %e %H:%M:%S %Y %z").to_string(),
        None => format!("@{}ms", millis),
    }
}

fn print_commit(commit: &Commit) {
    println!("commit {}", commit.hash);
    if commit.parents.len() > 1 {
        let parents: Vec<String> = commit.parents.iter().map(|p| p.short()).collect();
        println!("Merge: {}", parents.join(" "));
    }
    println!("Author: {} <{}>", commit.meta.name, commit.meta.email);
    println!("Date:   {}", format_date(commit.meta.timestamp));
    println!();
    for line in commit.meta.description.lines() {
        println!("    {}", line);
    }
    println!();
}

fn init_cmd(repo_path: &Path, name: &str, email: &str) -> anyhow::Result<()> {
    let data_dir = repo_path.join(DATA_DIR);
    if data_dir.exists() {
        bail!("repository already exists at {}", data_dir.display());
    }
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let mut config = Config::default();
    config.user.name = Some(name.to_string());
    config.user.email = Some(email.to_string());
    config.save(&data_dir.join(CONFIG_FILE))?;

    let repo = Repo::open(&data_dir, config)?;
    let commit = repo.init(name, email)?;
    write_state(&data_dir, &RepoState::at(commit.root))?;

    println!(
        "Initialized tabula repository in {} on {}",
        data_dir.display(),
        repo.default_branch()?.path()
    );
    Ok(())
}

fn create_table_cmd(repo_path: &Path, name: &str, columns: &[String]) -> anyhow::Result<()> {
    let mut ws = Workspace::open(repo_path)?;
    let root = ws.working_root()?;
    if root.has_table(name)? {
        bail!("table '{}' already exists", name);
    }
    let columns = columns
        .iter()
        .zip(0u64..)
        .map(|(text, tag)| parse_column(text, tag))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let schema = Schema::new(columns)?;
    let table = Table::new(ws.repo.value_store(), schema)?;
    ws.set_working(&root.put_table(name, &table)?)?;

    println!("Created table {}", name);
    Ok(())
}

fn put_row_cmd(repo_path: &Path, table_name: &str, values: &[String]) -> anyhow::Result<()> {
    let mut ws = Workspace::open(repo_path)?;
    let root = ws.working_root()?;
    let table = root
        .get_table(table_name)?
        .ok_or_else(|| anyhow!("table '{}' not found", table_name))?;
    let row = parse_row(table.schema(), values)?;
    let table = table.put_rows([row])?;
    ws.set_working(&root.put_table(table_name, &table)?)?;

    println!("{} now has {} rows", table_name, table.row_count());
    Ok(())
}

fn commit_cmd(repo_path: &Path, message: &str) -> anyhow::Result<()> {
    let mut ws = Workspace::open(repo_path)?;
    let user = &ws.repo.config().user;
    let (name, email) = match (&user.name, &user.email) {
        (Some(name), Some(email)) => (name.clone(), email.clone()),
        _ => bail!("user.name and user.email must be set in {}", CONFIG_FILE),
    };

    let working = ws.state.working()?;
    let head = ws.repo.head_commit()?;
    if working == head.root {
        bail!("nothing to commit");
    }

    let meta = CommitMeta::new(&name, &email, message)?;
    let branch = ws.repo.head_ref()?;
    let commit = ws.repo.commit(working, &branch, meta)?;
    ws.state = RepoState::at(commit.root);
    ws.save_state()?;

    println!("[{} {}] {}", branch.path(), commit.hash.short(), message.trim());
    Ok(())
}

fn log_cmd(repo_path: &Path, spec: Option<&str>, max_count: usize) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_path)?;
    let spec = spec.unwrap_or("HEAD");
    let commits = ws
        .repo
        .log(&spec.parse()?, max_count)
        .with_context(|| format!("cannot read history from '{}'", spec))?;
    for commit in &commits {
        print_commit(commit);
    }
    Ok(())
}

fn branch_cmd(
    repo_path: &Path,
    name: Option<&str>,
    from: Option<&str>,
    delete: bool,
) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_path)?;
    let current = ws.repo.head_ref()?;

    let Some(name) = name else {
        if delete || from.is_some() {
            bail!("a branch name is required");
        }
        for (dref, hash) in ws.repo.branches()? {
            let marker = if dref == current { "*" } else { " " };
            println!("{} {:<20} {}", marker, dref.path(), hash.short());
        }
        return Ok(());
    };

    if delete {
        if from.is_some() {
            bail!("--delete and --from cannot be combined");
        }
        if current.path() == name {
            bail!("cannot delete the checked out branch '{}'", name);
        }
        ws.repo.delete_branch(name)?;
        println!("Deleted branch {}", name);
        return Ok(());
    }

    let start = ws.repo.resolve_str(from.unwrap_or("HEAD"))?;
    ws.repo.new_branch_at_commit(name, start.hash)?;
    println!("Created branch {} at {}", name, start.hash.short());
    Ok(())
}

fn checkout_cmd(repo_path: &Path, branch: &str) -> anyhow::Result<()> {
    let mut ws = Workspace::open(repo_path)?;
    let dref = DoltRef::branch(branch)?;
    if dref == ws.repo.head_ref()? {
        println!("Already on {}", branch);
        return Ok(());
    }
    if !ws.is_clean()? {
        bail!("uncommitted changes; commit or `reset --hard` before switching branches");
    }

    ws.repo
        .set_head_ref(&dref)
        .with_context(|| format!("no branch named '{}'", branch))?;
    ws.state = RepoState::at(ws.repo.head_commit()?.root);
    ws.save_state()?;

    println!("Switched to branch {}", branch);
    Ok(())
}

fn print_diff_row(schema: &Schema, diff: &DiffRow) {
    let marker = match diff.diff_type {
        DiffType::Added => "+",
        DiffType::Removed => "-",
        DiffType::ModifiedOld => "<",
        DiffType::ModifiedNew => ">",
    };
    let mut line = format!("{} {}", marker, format_row(schema, &diff.row));
    if let Some(cols) = &diff.col_diffs {
        let changed: Vec<&str> = cols.keys().map(String::as_str).collect();
        line.push_str(&format!("  ({})", changed.join(", ")));
    }
    println!("{}", line);
}

fn diff_cmd(repo_path: &Path, from: &str, to: &str, table: Option<&str>) -> anyhow::Result<()> {
    let ws = Workspace::open(repo_path)?;
    let store = ws.repo.value_store();
    let old_root = ws.repo.read_root_value(ws.resolve_root(from)?)?;
    let new_root = ws.repo.read_root_value(ws.resolve_root(to)?)?;

    let names = match table {
        Some(name) => vec![name.to_string()],
        None => {
            let mut names = old_root.table_names()?;
            names.extend(new_root.table_names()?);
            names.sort();
            names.dedup();
            names
        }
    };

    let start = Instant::now();
    let mut total = 0;
    for name in &names {
        let (old, new) = match (old_root.get_table(name)?, new_root.get_table(name)?) {
            (None, None) => bail!("table '{}' not found on either side", name),
            (Some(old), None) => {
                println!("table {} (dropped)", name);
                let empty = Table::new(store, old.schema().clone())?;
                (old, empty)
            }
            (None, Some(new)) => {
                println!("table {} (added)", name);
                let empty = Table::new(store, new.schema().clone())?;
                (empty, new)
            }
            (Some(old), Some(new)) => {
                if old.rows().hash() == new.rows().hash() && old.schema() == new.schema() {
                    continue;
                }
                println!("table {}", name);
                (old, new)
            }
        };

        let mut source = RowDiffSource::for_tables(&old, &new, &ws.repo.config().diff)?;
        let schema = source.schema().clone();
        let stats = source.for_each_diff(
            |row| {
                print_diff_row(&schema, &row);
                Ok(())
            },
            |e| {
                eprintln!("skipping row: {}", e);
                BadRowAction::Continue
            },
            None,
        )?;
        source.close()?;
        total += stats.rows;
    }

    log::debug!("diffed {} tables in {:?}", names.len(), start.elapsed());
    if total == 0 {
        println!("no changes");
    }
    Ok(())
}

fn pull_cmd(
    repo_path: &Path,
    src_path: &Path,
    branch: &str,
    one_at_a_time: bool,
) -> anyhow::Result<()> {
    let mut ws = Workspace::open(repo_path)?;
    let src = Workspace::open(src_path)
        .with_context(|| format!("cannot open source repository {}", src_path.display()))?;

    let dref = DoltRef::branch(branch)?;
    let remote_head = src
        .repo
        .ref_head(&dref)?
        .ok_or_else(|| anyhow!("source has no branch '{}'", branch))?;
    let on_branch = ws.repo.head_ref()? == dref;
    if on_branch && !ws.is_clean()? {
        bail!("uncommitted changes on {}; commit or reset first", branch);
    }

    let mode = if one_at_a_time {
        PullMode::OneAtATime
    } else {
        PullMode::default()
    };
    let (tx, rx) = mpsc::channel::<PullProgress>();
    let reporter = thread::spawn(move || {
        let mut last = None;
        for progress in rx {
            log::debug!(
                "pulled {}/{} chunks ({} bytes)",
                progress.done_count,
                progress.known_count,
                progress.done_bytes
            );
            last = Some(progress);
        }
        last
    });

    let start = Instant::now();
    let result = ws.repo.pull_chunks(&src.repo, remote_head, mode, Some(&tx), None);
    drop(tx);
    let _ = reporter.join();
    let stats = result?;
    println!(
        "Copied {} chunks ({} bytes) in {:.2}s",
        stats.chunks_copied,
        stats.bytes_copied,
        start.elapsed().as_secs_f64()
    );

    match ws.repo.fast_forward(&dref, remote_head)? {
        FastForward::Applied => {
            println!("Fast-forwarded {} to {}", branch, remote_head.short());
            if on_branch {
                ws.state = RepoState::at(ws.repo.head_commit()?.root);
                ws.save_state()?;
            }
        }
        FastForward::UpToDate => println!("Already up to date."),
        FastForward::Rejected => bail!(
            "cannot fast-forward {} to {}: histories have diverged",
            branch,
            remote_head.short()
        ),
    }
    Ok(())
}

fn reset_cmd(repo_path: &Path, hard: bool, soft: bool) -> anyhow::Result<()> {
    if hard && soft {
        bail!("--hard and --soft are mutually exclusive");
    }
    let mut ws = Workspace::open(repo_path)?;
    let head = ws.repo.head_commit()?.root;
    ws.state.staged = head.to_hex();
    if hard {
        ws.state.working = head.to_hex();
    }
    ws.save_state()?;

    println!(
        "Reset {} to HEAD",
        if hard { "working and staged tables" } else { "staged tables" }
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let repo = cli.repo.as_path();

    match cli.command {
        Commands::Init { name, email } => init_cmd(repo, &name, &email)?,
        Commands::CreateTable { name, columns } => create_table_cmd(repo, &name, &columns)?,
        Commands::PutRow { table, values } => put_row_cmd(repo, &table, &values)?,
        Commands::Commit { message } => commit_cmd(repo, &message)?,
        Commands::Log { spec, max_count } => log_cmd(repo, spec.as_deref(), max_count)?,
        Commands::Branch { name, from, delete } => {
            branch_cmd(repo, name.as_deref(), from.as_deref(), delete)?
        }
        Commands::Checkout { branch } => checkout_cmd(repo, &branch)?,
        Commands::Diff { from, to, table } => diff_cmd(repo, &from, &to, table.as_deref())?,
        Commands::Pull {
            src_repo,
            branch,
            one_at_a_time,
        } => pull_cmd(repo, &src_repo, &branch, one_at_a_time)?,
        Commands::Reset { hard, soft } => reset_cmd(repo, hard, soft)?,
    }

    Ok(())
}
