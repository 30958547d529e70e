use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Multi-tenant requirements tracking")]
pub struct Cli {
    /// Path to the database file (.yaml/.yml for YAML, anything else for SQLite)
    #[clap(long, global = true)]
    pub db: Option<PathBuf>,

    /// Database name to use from the registry
    #[clap(long, global = true)]
    pub project_db: Option<String>,

    /// Username to act as
    #[clap(long, short = 'u', global = true, env = "REQTRACK_USER")]
    pub user: Option<String>,

    /// Project (name or UUID) for requirement commands
    #[clap(long, short = 'p', global = true, env = "REQTRACK_PROJECT")]
    pub project: Option<String>,

    /// Increase log output (-v info, -vv debug)
    #[clap(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// User management commands
    #[clap(subcommand)]
    User(UserCommand),

    /// Organization and membership commands
    #[clap(subcommand)]
    Org(OrgCommand),

    /// Project commands
    #[clap(subcommand)]
    Project(ProjectCommand),

    /// Requirement category commands
    #[clap(subcommand)]
    Category(CategoryCommand),

    /// Project objective commands
    #[clap(subcommand)]
    Objective(ObjectiveCommand),

    /// Requirement commands
    #[clap(subcommand)]
    Req(ReqCommand),

    /// Export data to different formats
    #[clap(subcommand)]
    Export(ExportCommand),

    /// Show your organizations and recently updated projects
    Dashboard,

    /// Show the requirement-to-objective traceability matrix of a project
    Matrix,

    /// Database management commands
    #[clap(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user
    Add {
        username: String,

        #[clap(long, default_value = "")]
        email: String,
    },

    /// List all users
    List,

    /// Delete a user; their records stay with an empty author
    Delete {
        username: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum OrgCommand {
    /// Create an organization; you become its admin
    Create {
        name: String,

        #[clap(long, default_value = "")]
        description: String,
    },

    /// List the organizations you belong to
    List,

    /// Show members and projects of an organization
    Show {
        /// Organization name or UUID
        org: String,
    },

    /// Add a user to an organization
    AddMember {
        org: String,
        username: String,

        /// Role (admin, member, viewer)
        #[clap(long, default_value = "member")]
        role: String,
    },

    /// Change a member's role
    SetRole {
        org: String,
        username: String,
        role: String,
    },

    /// Remove a user from an organization
    RemoveMember { org: String, username: String },

    /// Delete an organization with all of its projects
    Delete {
        org: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project in an organization
    Create {
        /// Organization name or UUID
        org: String,
        name: String,

        #[clap(long, default_value = "")]
        description: String,
    },

    /// List projects you can see
    List {
        /// Only projects of this organization
        #[clap(long)]
        org: Option<String>,
    },

    /// Show a project with its status breakdown (uses --project)
    Show,

    /// Delete a project and everything in it (uses --project)
    Delete {
        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommand {
    /// Add a category to the project
    Add {
        name: String,

        #[clap(long, default_value = "")]
        description: String,
    },

    /// List the project's categories
    List,

    /// Delete a category; its requirements become uncategorized
    Delete {
        /// Category name or UUID
        category: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ObjectiveCommand {
    /// Add an objective to the project
    Add {
        title: String,

        #[clap(long, default_value = "")]
        description: String,
    },

    /// List the project's objectives
    List,

    /// Delete an objective
    Delete {
        /// Objective title or UUID
        objective: String,
    },

    /// Link a requirement to an objective
    Link {
        /// Requirement identifier or UUID
        req: String,
        /// Objective title or UUID
        objective: String,
    },

    /// Remove a requirement-objective link
    Unlink { req: String, objective: String },
}

#[derive(Subcommand, Debug)]
pub enum ReqCommand {
    /// Add a new requirement to the project
    Add {
        #[clap(long)]
        title: Option<String>,

        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        acceptance: Option<String>,

        /// Type (functional, non-functional, business, user, technical)
        #[clap(long)]
        r#type: Option<String>,

        /// Priority (high, medium, low)
        #[clap(long)]
        priority: Option<String>,

        /// Initial status, exactly as displayed (e.g. "In Review")
        #[clap(long)]
        status: Option<String>,

        /// Category name or UUID
        #[clap(long)]
        category: Option<String>,

        /// Parent requirement identifier or UUID
        #[clap(long)]
        parent: Option<String>,

        /// Use this identifier instead of the next REQ-NNN
        #[clap(long)]
        id: Option<String>,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// List the project's requirements
    List {
        /// Case-insensitive title substring
        #[clap(long)]
        title: Option<String>,

        #[clap(long)]
        status: Option<String>,

        #[clap(long)]
        priority: Option<String>,

        #[clap(long)]
        r#type: Option<String>,

        /// Category name or UUID
        #[clap(long)]
        category: Option<String>,
    },

    /// Show a requirement with its links and history
    Show {
        /// Requirement identifier (REQ-001) or UUID
        req: String,
    },

    /// Edit a requirement; prompts when no field is given
    Edit {
        req: String,

        #[clap(long)]
        title: Option<String>,

        #[clap(long)]
        description: Option<String>,

        #[clap(long)]
        acceptance: Option<String>,

        #[clap(long)]
        r#type: Option<String>,

        #[clap(long)]
        priority: Option<String>,

        /// Category name or UUID; "none" clears it
        #[clap(long)]
        category: Option<String>,
    },

    /// Move a requirement to another status
    Status {
        req: String,

        /// One of: Draft, "In Review", Approved, Rejected, Implemented, Verified
        status: String,
    },

    /// Show the status history of a requirement, newest first
    History { req: String },

    /// Delete a requirement
    Delete {
        req: String,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Mark a requirement as related to another
    Relate {
        req: String,
        other: String,

        /// Remove the link instead
        #[clap(long)]
        remove: bool,
    },

    /// Set or clear (no PARENT) the parent of a requirement
    Parent { req: String, parent: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum ExportCommand {
    /// Export the project's requirements as CSV (uses --project)
    Csv {
        /// Output file path (defaults to requirements-<project>.csv)
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Export the whole database as JSON
    Json {
        /// Output file path
        #[clap(long, short = 'o', default_value = "reqtrack.json")]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Register a database in the registry
    Register {
        /// Name of the database
        #[clap(long)]
        name: Option<String>,

        /// Path to the database file
        #[clap(long)]
        path: Option<PathBuf>,

        /// Description of the database
        #[clap(long)]
        description: Option<String>,

        /// Set this database as the default
        #[clap(long)]
        default: bool,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// Remove a database from the registry (the file is kept)
    Unregister { name: String },

    /// Print the path of the database in use
    Path,

    /// Show record counts
    Stats,

    /// Copy the current database into another file (backend chosen by extension)
    Migrate {
        /// Destination path
        to: PathBuf,
    },

    /// Replace the current database with a JSON export
    Import {
        input: PathBuf,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}
