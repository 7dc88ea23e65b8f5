use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Section kinds a blueprint may declare, keyed by the `TYPE` parameter.
/// `BUILD` and `DEFAULT` are reserved section names, not kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Creds,
    SshProxy,
    Db,
    LocalTask,
    RemoteTask,
    DbTask,
}

impl SectionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREDS" => Some(Self::Creds),
            "SSH_PROXY" => Some(Self::SshProxy),
            "DB" => Some(Self::Db),
            "LOCAL_TASK" => Some(Self::LocalTask),
            "REMOTE_TASK" => Some(Self::RemoteTask),
            "DB_TASK" => Some(Self::DbTask),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Creds => "CREDS",
            Self::SshProxy => "SSH_PROXY",
            Self::Db => "DB",
            Self::LocalTask => "LOCAL_TASK",
            Self::RemoteTask => "REMOTE_TASK",
            Self::DbTask => "DB_TASK",
        }
    }

    pub fn is_task(&self) -> bool {
        matches!(self, Self::LocalTask | Self::RemoteTask | Self::DbTask)
    }
}

/// Login material shared by remote tasks, proxies and databases.
/// Empty strings mean "not provided".
#[derive(Debug, Clone)]
pub struct Credential {
    pub user: String,
    pub password: String,
    pub private_key: String,
}

/// An intermediate SSH host used to reach targets that are not directly
/// network-reachable.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    /// Name of the `CREDS` section used to log into the proxy itself.
    pub credentials: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    Mysql,
}

impl DbEngine {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::Mysql),
            _ => None,
        }
    }

    /// URL scheme understood by the sqlx Any driver.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub credentials: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Csv,
    Xlsx,
}

impl ResultFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

/// A validated task. One record type with a variant tag; the scheduler and
/// executors dispatch on the tag.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique name, also the graph node id.
    pub name: String,
    pub requires: Vec<String>,
    /// Completion marker and success output location.
    pub result_path: PathBuf,
    /// Delete a pre-existing result before running.
    pub cleanup: bool,
    pub kind: TaskKind,
}

#[derive(Debug, Clone)]
pub enum TaskKind {
    Local(LocalSpec),
    Remote(RemoteSpec),
    Db(DbSpec),
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local(_) => "LOCAL_TASK",
            Self::Remote(_) => "REMOTE_TASK",
            Self::Db(_) => "DB_TASK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSpec {
    pub command: String,
    pub success_exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct RemoteSpec {
    pub command: String,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    /// Name of the `CREDS` section used against the target host.
    pub credentials: String,
    /// `Some` iff `USE_PROXY` was set; names an `SSH_PROXY` section.
    pub proxy: Option<String>,
    pub success_exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct DbSpec {
    /// Name of the `DB` section to query.
    pub database: String,
    pub query_path: PathBuf,
    pub proxy: Option<String>,
    pub result_format: ResultFormat,
}

/// The `[BUILD]` section: which tasks to run and with how many workers.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub tasks: Vec<String>,
    pub workers: usize,
    /// Accepted for blueprint compatibility; gates nothing in this design.
    pub local_scheduler: bool,
}

/// Fully validated blueprint. Immutable after resolution; shared read-only
/// across workers.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub credentials: HashMap<String, Credential>,
    pub proxies: HashMap<String, Proxy>,
    pub databases: HashMap<String, Database>,
    pub tasks: HashMap<String, Task>,
    /// Declaration order of task sections, for stable iteration.
    pub task_order: Vec<String>,
    pub build: BuildPlan,
}

impl Blueprint {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn credential(&self, name: &str) -> Option<&Credential> {
        self.credentials.get(name)
    }

    pub fn proxy(&self, name: &str) -> Option<&Proxy> {
        self.proxies.get(name)
    }

    pub fn database(&self, name: &str) -> Option<&Database> {
        self.databases.get(name)
    }
}
